//! callbridge-realtime – Sprachkanal zum Realtime-Backend
//!
//! Jede Anrufsitzung besitzt genau einen [`SprachKanal`]: eine WebSocket-
//! Verbindung, ueber die Anrufer-Audio als Base64-PCM16 hinausgeht und
//! Antwort-Audio, Sprecherkennung und Transkripte hereinkommen.
//!
//! Der Kanal verbindet sich bei Abbruechen selbst neu (lineares Backoff)
//! und schickt danach die Sitzungskonfiguration erneut.

pub mod backoff;
pub mod config;
pub mod error;
pub mod kanal;
mod verbindung;
pub mod verteiler;

pub use backoff::{BackoffConfig, LinearBackoff};
pub use config::{RealtimeConfig, ServerVad};
pub use error::{RealtimeError, RealtimeResult};
pub use kanal::{KanalEreignis, KanalGegenstelle, KanalZustand, SendeErgebnis, SprachKanal};
