//! Fosen – Einstiegspunkt
//!
//! `fosen server` startet den Tunnel-Server, `fosen client` oeffnet eine
//! interaktive Session: jede Zeile von stdin geht als Data-Frame raus,
//! die entschluesselte Antwort wird ausgegeben.

use anyhow::Result;
use clap::{Parser, Subcommand};
use fosen_client::{ClientConfig, ClientConnector};
use fosen_observability::logging_initialisieren;
use fosen_server::{config::ServerConfig, Server};
use tokio::io::{AsyncBufReadExt, BufReader};

#[derive(Parser)]
#[command(name = "fosen")]
#[command(version)]
#[command(about = "Verschluesselter Punkt-zu-Punkt-Tunnel ueber TCP")]
struct Cli {
    #[command(subcommand)]
    befehl: Befehl,
}

#[derive(Subcommand)]
enum Befehl {
    /// Startet den Tunnel-Server
    Server {
        /// Pfad zur TOML-Konfiguration
        #[arg(short, long, env = "FOSEN_CONFIG", default_value = "fosen.toml")]
        config: String,
    },

    /// Verbindet sich mit einem Server und startet eine interaktive Session
    Client {
        #[arg(long, default_value = "127.0.0.1")]
        host: String,

        #[arg(short, long, default_value_t = 8888)]
        port: u16,

        #[arg(short, long)]
        username: String,

        #[arg(long, env = "FOSEN_PASSWORD", hide_env_values = true)]
        password: String,

        /// Log-Level fuer den Client
        #[arg(long, default_value = "warn")]
        log_level: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.befehl {
        Befehl::Server { config } => server_starten(&config).await,
        Befehl::Client {
            host,
            port,
            username,
            password,
            log_level,
        } => {
            logging_initialisieren(&log_level, "text");
            client_starten(ClientConfig::neu(host, port, username, password)).await
        }
    }
}

async fn server_starten(config_pfad: &str) -> Result<()> {
    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(config_pfad)?;

    logging_initialisieren(&config.logging.level, &config.logging.format);

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Fosen Server wird initialisiert"
    );

    let server = Server::binden(config).await?;
    server.starten().await
}

async fn client_starten(config: ClientConfig) -> Result<()> {
    let adresse = config.adresse();
    let mut session = ClientConnector::connect(config).await?;
    println!("Verbunden mit {adresse}. Eingabe senden, 'quit' beendet.");

    let mut zeilen = BufReader::new(tokio::io::stdin()).lines();
    while let Some(zeile) = zeilen.next_line().await? {
        let zeile = zeile.trim_end();
        if zeile == "quit" {
            break;
        }
        if zeile.is_empty() {
            continue;
        }

        session.send(zeile.as_bytes().to_vec()).await?;
        let antwort = session.receive().await?;
        println!("{}", String::from_utf8_lossy(&antwort));
    }

    session.close().await;
    println!("Verbindung getrennt");
    Ok(())
}
