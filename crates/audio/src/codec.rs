//! G.711 Codec (A-law / µ-law)
//!
//! Zustandslose Umwandlung zwischen 8-Bit-Companding und linearem PCM16.
//! Ein Byte entspricht genau einem Abtastwert, ein 20-ms-Frame bei 8 kHz
//! also 160 Bytes.
//!
//! Die Segment-Tabellen folgen der ITU-T-Referenzimplementierung.

use callbridge_protocol::PayloadTyp;
use serde::{Deserialize, Serialize};

use crate::error::{AudioError, AudioResult};

/// Ruhe-Byte fuer A-law (kodierte 0)
pub const ALAW_STILLE: u8 = 0xD5;
/// Ruhe-Byte fuer µ-law (kodierte 0)
pub const ULAW_STILLE: u8 = 0xFF;

const SEG_AEND: [i32; 8] = [0x1F, 0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF];
const SEG_UEND: [i32; 8] = [0x3F, 0x7F, 0xFF, 0x1FF, 0x3FF, 0x7FF, 0xFFF, 0x1FFF];

const ULAW_BIAS: i32 = 0x84;
const ULAW_CLIP: i32 = 8159;

// ---------------------------------------------------------------------------
// Variante
// ---------------------------------------------------------------------------

/// Welche G.711-Variante auf der Telefonieseite gesprochen wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum G711Variante {
    /// A-law (PCMA, Payload-Typ 8), europaeischer Standard
    Alaw,
    /// µ-law (PCMU, Payload-Typ 0)
    Ulaw,
}

impl Default for G711Variante {
    fn default() -> Self {
        Self::Alaw
    }
}

impl G711Variante {
    /// Ordnet einen statischen RTP-Payload-Typ zu
    pub fn aus_payload_typ(pt: u8) -> AudioResult<Self> {
        match pt {
            PayloadTyp::PCMA => Ok(Self::Alaw),
            PayloadTyp::PCMU => Ok(Self::Ulaw),
            andere => Err(AudioError::NichtUnterstuetzterPayloadTyp(andere)),
        }
    }

    pub fn payload_typ(&self) -> u8 {
        match self {
            Self::Alaw => PayloadTyp::PCMA,
            Self::Ulaw => PayloadTyp::PCMU,
        }
    }

    /// Byte, das digitale Stille kodiert
    pub fn stille_byte(&self) -> u8 {
        match self {
            Self::Alaw => ALAW_STILLE,
            Self::Ulaw => ULAW_STILLE,
        }
    }

    /// Dekodiert G.711-Bytes zu linearen Abtastwerten
    pub fn dekodieren(&self, nutzdaten: &[u8]) -> Vec<i16> {
        match self {
            Self::Alaw => nutzdaten.iter().map(|&b| alaw_zu_linear(b)).collect(),
            Self::Ulaw => nutzdaten.iter().map(|&b| ulaw_zu_linear(b)).collect(),
        }
    }

    /// Kodiert lineare Abtastwerte zu G.711-Bytes
    pub fn kodieren(&self, samples: &[i16]) -> Vec<u8> {
        match self {
            Self::Alaw => samples.iter().map(|&s| linear_zu_alaw(s)).collect(),
            Self::Ulaw => samples.iter().map(|&s| linear_zu_ulaw(s)).collect(),
        }
    }

    /// Kodiert PCM16-LE-Bytes; eine ungerade Byteanzahl ist ein Fehler
    pub fn kodieren_bytes(&self, pcm16_le: &[u8]) -> AudioResult<Vec<u8>> {
        let samples = pcm16_aus_bytes(pcm16_le)?;
        Ok(self.kodieren(&samples))
    }
}

// ---------------------------------------------------------------------------
// PCM16-Bytes
// ---------------------------------------------------------------------------

/// Liest PCM16 little-endian
pub fn pcm16_aus_bytes(bytes: &[u8]) -> AudioResult<Vec<i16>> {
    if bytes.len() % 2 != 0 {
        return Err(AudioError::UngueltigerFrame {
            laenge: bytes.len(),
            vielfaches: 2,
        });
    }
    Ok(bytes
        .chunks_exact(2)
        .map(|p| i16::from_le_bytes([p[0], p[1]]))
        .collect())
}

/// Schreibt PCM16 little-endian
pub fn pcm16_zu_bytes(samples: &[i16]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * 2);
    for s in samples {
        out.extend_from_slice(&s.to_le_bytes());
    }
    out
}

// ---------------------------------------------------------------------------
// Einzelwert-Umwandlung
// ---------------------------------------------------------------------------

fn segment(wert: i32, tabelle: &[i32; 8]) -> usize {
    tabelle.iter().position(|&grenze| wert <= grenze).unwrap_or(8)
}

/// Linear PCM16 -> A-law
pub fn linear_zu_alaw(pcm: i16) -> u8 {
    let mut wert = (pcm as i32) >> 3;
    let maske: i32 = if wert >= 0 {
        0xD5
    } else {
        wert = -wert - 1;
        0x55
    };

    let seg = segment(wert, &SEG_AEND);
    if seg >= 8 {
        return (0x7F ^ maske) as u8;
    }

    let mut aval = (seg as i32) << 4;
    if seg < 2 {
        aval |= (wert >> 1) & 0x0F;
    } else {
        aval |= (wert >> seg) & 0x0F;
    }
    (aval ^ maske) as u8
}

/// A-law -> linear PCM16
pub fn alaw_zu_linear(a: u8) -> i16 {
    let a = a ^ 0x55;
    let mut t = ((a & 0x0F) as i32) << 4;
    let seg = ((a & 0x70) >> 4) as i32;
    match seg {
        0 => t += 8,
        1 => t += 0x108,
        _ => {
            t += 0x108;
            t <<= seg - 1;
        }
    }
    if a & 0x80 != 0 {
        t as i16
    } else {
        (-t) as i16
    }
}

/// Linear PCM16 -> µ-law
pub fn linear_zu_ulaw(pcm: i16) -> u8 {
    let mut wert = (pcm as i32) >> 2;
    let maske: i32 = if wert < 0 {
        wert = -wert;
        0x7F
    } else {
        0xFF
    };
    if wert > ULAW_CLIP {
        wert = ULAW_CLIP;
    }
    wert += ULAW_BIAS >> 2;

    let seg = segment(wert, &SEG_UEND);
    if seg >= 8 {
        return (0x7F ^ maske) as u8;
    }
    let uval = ((seg as i32) << 4) | ((wert >> (seg + 1)) & 0x0F);
    (uval ^ maske) as u8
}

/// µ-law -> linear PCM16
pub fn ulaw_zu_linear(u: u8) -> i16 {
    let u = !u;
    let mut t = (((u & 0x0F) as i32) << 3) + ULAW_BIAS;
    t <<= ((u & 0x70) >> 4) as i32;
    if u & 0x80 != 0 {
        (ULAW_BIAS - t) as i16
    } else {
        (t - ULAW_BIAS) as i16
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    /// Quantisierungsfehler von G.711 waechst mit dem Segment
    fn toleranz(x: i16) -> i32 {
        (x as i32).abs() / 16 + 16
    }

    #[test]
    fn stille_bytes() {
        assert_eq!(linear_zu_alaw(0), ALAW_STILLE);
        assert_eq!(linear_zu_ulaw(0), ULAW_STILLE);
        assert_eq!(ulaw_zu_linear(ULAW_STILLE), 0);
        assert!(alaw_zu_linear(ALAW_STILLE).abs() <= 8);
    }

    #[test]
    fn bekannte_referenzwerte() {
        // Vollaussteuerung positiv
        assert_eq!(linear_zu_alaw(32767), 0xAA);
        assert_eq!(alaw_zu_linear(0xAA), 32256);
        assert_eq!(linear_zu_ulaw(32767), 0x80);
        assert_eq!(ulaw_zu_linear(0x80), 32124);
    }

    #[test]
    fn hin_und_zurueck_innerhalb_toleranz() {
        for variante in [G711Variante::Alaw, G711Variante::Ulaw] {
            let samples: Vec<i16> = vec![
                0, 1, -1, 100, -100, 1000, -1000, 8000, -8000, 16384, -16384, 32767, -32768,
            ];
            let kodiert = variante.kodieren(&samples);
            let dekodiert = variante.dekodieren(&kodiert);
            for (orig, zurueck) in samples.iter().zip(dekodiert.iter()) {
                let diff = (*orig as i32 - *zurueck as i32).abs();
                assert!(
                    diff <= toleranz(*orig),
                    "{:?}: {} -> {} (diff {})",
                    variante,
                    orig,
                    zurueck,
                    diff
                );
            }
        }
    }

    #[test]
    fn vorzeichen_bleibt_erhalten() {
        for variante in [G711Variante::Alaw, G711Variante::Ulaw] {
            let d = variante.dekodieren(&variante.kodieren(&[5000, -5000]));
            assert!(d[0] > 0);
            assert!(d[1] < 0);
        }
    }

    #[test]
    fn frame_laenge_bleibt_erhalten() {
        let variante = G711Variante::Alaw;
        let pcm = variante.dekodieren(&[ALAW_STILLE; 160]);
        assert_eq!(pcm.len(), 160);
        assert_eq!(variante.kodieren(&pcm).len(), 160);
    }

    #[test]
    fn ungerade_pcm_laenge_ist_fehler() {
        let err = G711Variante::Ulaw.kodieren_bytes(&[0u8; 321]).unwrap_err();
        assert!(matches!(
            err,
            AudioError::UngueltigerFrame {
                laenge: 321,
                vielfaches: 2
            }
        ));
        assert_eq!(G711Variante::Ulaw.kodieren_bytes(&[0u8; 320]).unwrap().len(), 160);
    }

    #[test]
    fn payload_typ_zuordnung() {
        assert_eq!(G711Variante::aus_payload_typ(8).unwrap(), G711Variante::Alaw);
        assert_eq!(G711Variante::aus_payload_typ(0).unwrap(), G711Variante::Ulaw);
        assert!(G711Variante::aus_payload_typ(96).is_err());
        assert_eq!(G711Variante::Alaw.payload_typ(), 8);
        assert_eq!(G711Variante::Ulaw.stille_byte(), 0xFF);
    }

    #[test]
    fn pcm16_bytes_little_endian() {
        let bytes = pcm16_zu_bytes(&[1, -2]);
        assert_eq!(bytes, vec![0x01, 0x00, 0xFE, 0xFF]);
        assert_eq!(pcm16_aus_bytes(&bytes).unwrap(), vec![1, -2]);
    }
}
