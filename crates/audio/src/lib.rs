//! callbridge-audio – Audio-Verarbeitung der Bruecke
//!
//! - G.711 A-law / µ-law <-> PCM16
//! - Abtastraten-Wandlung Schmalband <-> Breitband
//! - RMS-Energie fuer die lokale Sprecherkennung

pub mod codec;
pub mod energie;
pub mod error;
pub mod resample;

// Bequeme Re-Exporte der wichtigsten Typen
pub use codec::{pcm16_aus_bytes, pcm16_zu_bytes, G711Variante};
pub use energie::{ist_laut, rms_normiert};
pub use error::{AudioError, AudioResult};
pub use resample::{block_groesse, umrechnen};
