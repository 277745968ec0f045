//! Fehlertypen des Sprachkanals

use callbridge_core::BridgeError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RealtimeError {
    #[error("Verbindungsaufbau fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Zeitlimit beim Verbindungsaufbau ({0:?})")]
    Zeitlimit(std::time::Duration),

    #[error("Protokollfehler: {0}")]
    Protokoll(String),

    #[error("Verbindung geschlossen: {0}")]
    Geschlossen(String),

    #[error("Ungueltige Konfiguration: {0}")]
    Konfiguration(String),
}

pub type RealtimeResult<T> = Result<T, RealtimeError>;

impl From<tokio_tungstenite::tungstenite::Error> for RealtimeError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        use tokio_tungstenite::tungstenite::Error as WsError;
        match e {
            WsError::ConnectionClosed | WsError::AlreadyClosed => Self::Geschlossen(e.to_string()),
            WsError::Protocol(_) => Self::Protokoll(e.to_string()),
            andere => Self::Verbindung(andere.to_string()),
        }
    }
}

impl From<RealtimeError> for BridgeError {
    fn from(e: RealtimeError) -> Self {
        match e {
            RealtimeError::Verbindung(m) => BridgeError::Verbindung(m),
            RealtimeError::Zeitlimit(d) => BridgeError::Zeitlimit(format!("{:?}", d)),
            RealtimeError::Protokoll(m) => BridgeError::UngueltigeNachricht(m),
            RealtimeError::Geschlossen(m) => BridgeError::Getrennt(m),
            RealtimeError::Konfiguration(m) => BridgeError::Konfiguration(m),
        }
    }
}
