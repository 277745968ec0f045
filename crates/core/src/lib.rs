//! callbridge-core – Gemeinsame Typen, Traits und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von allen anderen
//! Callbridge-Crates gemeinsam genutzt werden: Sitzungs-IDs, den zentralen
//! Fehler-Enum, Call-Control-Ereignisse und die Transkript-Schnittstelle.

pub mod error;
pub mod event;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{BridgeError, Result};
pub use event::{LogBeobachter, Sprecher, SteuerEreignis, TranskriptBeobachter};
pub use types::{SessionId, SessionToken};
