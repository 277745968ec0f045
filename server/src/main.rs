//! Callbridge Server – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Server.

use anyhow::Result;
use callbridge_observability::logging_initialisieren;
use callbridge_server::{config::ServerConfig, Server};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("CALLBRIDGE_CONFIG").unwrap_or_else(|_| "config.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = ServerConfig::laden(&config_pfad)?;

    // Logging initialisieren (CB_LOG_LEVEL / CB_LOG_FORMAT haben Vorrang)
    logging_initialisieren(&config.logging.level, &config.logging.format);

    // TLS-Provider fuer wss:// zum Sprach-Backend
    if rustls::crypto::ring::default_provider()
        .install_default()
        .is_err()
    {
        tracing::debug!("rustls-Provider war bereits installiert");
    }

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Callbridge wird initialisiert"
    );

    let server = Server::binden(config).await?;
    server.starten().await?;

    Ok(())
}
