//! callbridge-protocol – Drahtformate der Bruecke
//!
//! Zwei Seiten, zwei Formate:
//! - [`rtp`]: binaere RTP-Pakete von und zur Telefonanlage (UDP)
//! - [`realtime`]: JSON-Nachrichten des Sprach-Backends (WebSocket)

pub mod realtime;
pub mod rtp;

pub use realtime::{ClientNachricht, ServerEreignis, SitzungsKonfiguration};
pub use rtp::{PayloadTyp, RtpHeader, RtpPaket, RTP_VERSION};
