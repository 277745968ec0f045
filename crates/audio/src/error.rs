//! Fehlertypen fuer die Audio-Verarbeitung

use callbridge_core::BridgeError;
use thiserror::Error;

/// Alle moeglichen Fehler der Audio-Verarbeitung
#[derive(Debug, Error)]
pub enum AudioError {
    /// PCM16-Daten muessen eine gerade Byteanzahl haben
    #[error("Ungueltiger Frame: {laenge} Bytes sind kein Vielfaches von {vielfaches}")]
    UngueltigerFrame { laenge: usize, vielfaches: usize },

    #[error("Payload-Typ {0} wird nicht unterstuetzt")]
    NichtUnterstuetzterPayloadTyp(u8),

    #[error("Ungueltige Abtastrate: {von} Hz -> {nach} Hz")]
    UngueltigeRate { von: u32, nach: u32 },
}

pub type AudioResult<T> = Result<T, AudioError>;

impl From<AudioError> for BridgeError {
    fn from(e: AudioError) -> Self {
        match e {
            AudioError::UngueltigerFrame { .. } => BridgeError::UngueltigerFrame(e.to_string()),
            andere => BridgeError::Audio(andere.to_string()),
        }
    }
}
