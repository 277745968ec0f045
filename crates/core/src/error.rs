//! Fehlertypen fuer Callbridge
//!
//! Zentraler Fehler-Enum fuer alles, was die Bruecke zwischen Telefonie
//! und Sprach-Backend scheitern lassen kann. Untermodule (Audio, Protokoll)
//! definieren eigene Fehler und werden an den Grenzen hierhin konvertiert.

use thiserror::Error;

/// Globaler Result-Alias fuer Callbridge
pub type Result<T> = std::result::Result<T, BridgeError>;

/// Alle moeglichen Fehler im Callbridge-System
#[derive(Debug, Error)]
pub enum BridgeError {
    // --- Verbindung & Netzwerk ---
    #[error("Verbindung fehlgeschlagen: {0}")]
    Verbindung(String),

    #[error("Verbindung getrennt: {0}")]
    Getrennt(String),

    #[error("Zeitlimit ueberschritten: {0}")]
    Zeitlimit(String),

    #[error("Wiederverbindung aufgegeben nach {versuche} Versuchen")]
    WiederverbindungErschoepft { versuche: u32 },

    // --- Protokoll ---
    #[error("Ungueltige Nachricht: {0}")]
    UngueltigeNachricht(String),

    #[error("Ungueltiger Frame: {0}")]
    UngueltigerFrame(String),

    // --- Sitzungen ---
    #[error("Sitzung nicht gefunden: {0}")]
    SitzungNichtGefunden(String),

    #[error("Sitzung bereits beendet: {0}")]
    SitzungBeendet(String),

    // --- Konfiguration ---
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    // --- Audio ---
    #[error("Audiofehler: {0}")]
    Audio(String),

    // --- Intern ---
    #[error("Interner Fehler: {0}")]
    Intern(String),

    #[error("E/A-Fehler: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl BridgeError {
    /// Erstellt einen internen Fehler aus einer beliebigen Nachricht
    pub fn intern(msg: impl Into<String>) -> Self {
        Self::Intern(msg.into())
    }

    /// Gibt true zurueck wenn ein erneuter Verbindungsversuch sinnvoll ist
    pub fn ist_wiederholbar(&self) -> bool {
        matches!(
            self,
            Self::Zeitlimit(_) | Self::Verbindung(_) | Self::Getrennt(_)
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = BridgeError::SitzungNichtGefunden("abc-123".into());
        assert_eq!(e.to_string(), "Sitzung nicht gefunden: abc-123");
    }

    #[test]
    fn wiederholbar_erkennung() {
        assert!(BridgeError::Zeitlimit("ws".into()).ist_wiederholbar());
        assert!(BridgeError::Getrennt("ws".into()).ist_wiederholbar());
        assert!(!BridgeError::UngueltigerFrame("odd".into()).ist_wiederholbar());
        assert!(!BridgeError::WiederverbindungErschoepft { versuche: 5 }.ist_wiederholbar());
    }

    #[test]
    fn io_fehler_konvertierung() {
        let io = std::io::Error::new(std::io::ErrorKind::AddrInUse, "belegt");
        let e: BridgeError = io.into();
        assert!(e.to_string().contains("belegt"));
    }
}
