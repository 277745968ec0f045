//! callbridge-voice – Medienpfad zwischen Telefonie und Sprach-Backend
//!
//! Pro Anruf eine Sitzung mit eigenem Task. Eingehendes RTP wird
//! dekodiert, gepuffert und ans Backend weitergereicht; Backend-Audio
//! laeuft ueber die Wiedergabe-Pipeline zurueck in ausgehendes RTP.
//!
//! ## Module
//! - [`udp`] – UDP-Medienserver, Empfangs-Loop
//! - [`verzeichnis`] – Sitzungsverzeichnis (Adresse/Token -> Sitzung)
//! - [`sitzung`] – Sitzungskern und Sitzungs-Task
//! - [`rtp_sitzung`] – RTP-Zaehler, SSRC, Payload-Typ
//! - [`timing_buffer`] – Takt-Puffer mit fester Obergrenze
//! - [`playback`] – Wiedergabe-Pipeline fuer Backend-Audio
//! - [`barge_in`] – Unterbrechungserkennung
//! - [`config`] – Medien-Konfiguration

pub mod barge_in;
pub mod config;
pub mod playback;
pub mod rtp_sitzung;
pub mod sitzung;
pub mod timing_buffer;
pub mod udp;
pub mod verzeichnis;

pub use barge_in::BargeInArbiter;
pub use config::{BargeInConfig, MedienConfig, TimingBufferConfig};
pub use playback::{DeltaErgebnis, PlaybackPipeline, WiedergabeZustand};
pub use rtp_sitzung::RtpSitzung;
pub use sitzung::{SitzungsHandle, SitzungsKern, SitzungsZustand, SteuerBefehl, Zustellung};
pub use timing_buffer::{TaktAusgabe, TimingBuffer};
pub use udp::MedienServer;
pub use verzeichnis::{KanalFabrik, RealtimeFabrik, SessionDirectory};
