//! RTP-Paketformat (RFC 3550)
//!
//! Die Telefonanlage spricht schlichtes RTP ueber UDP. Empfangsseitig werden
//! CSRC-Liste, Header-Extension und Padding korrekt uebersprungen, gesendet
//! wird immer der minimale 12-Byte-Header.
//!
//! ## Header-Format
//!
//! ```text
//! Offset  Bits  Beschreibung
//! ------  ----  -----------
//!  0      2     Version (muss 2 sein)
//!  0      1     Padding
//!  0      1     Extension
//!  0      4     CSRC-Anzahl
//!  1      1     Marker
//!  1      7     Payload-Typ
//!  2      16    Sequenznummer (big-endian)
//!  4      32    Zeitstempel (big-endian, Abtastwerte)
//!  8      32    SSRC (big-endian)
//! 12+     N     [CSRC-Liste] [Extension] Nutzdaten [Padding]
//! ```

use std::io;

/// Einzige unterstuetzte RTP-Version
pub const RTP_VERSION: u8 = 2;

/// Maximale Nutzdaten-Laenge eines empfangenen Paketes
pub const MAX_NUTZDATEN_LAENGE: usize = 1500 - RtpHeader::SIZE;

/// Statische Payload-Typen (RFC 3551)
pub struct PayloadTyp;

impl PayloadTyp {
    /// G.711 µ-law
    pub const PCMU: u8 = 0;
    /// G.711 A-law
    pub const PCMA: u8 = 8;
}

fn ungueltig(msg: String) -> io::Error {
    io::Error::new(io::ErrorKind::InvalidData, msg)
}

// ---------------------------------------------------------------------------
// RtpHeader
// ---------------------------------------------------------------------------

/// Fester Teil des RTP-Headers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeader {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_anzahl: u8,
    pub marker: bool,
    pub payload_typ: u8,
    pub sequenz: u16,
    pub zeitstempel: u32,
    pub ssrc: u32,
}

impl RtpHeader {
    /// Groesse des festen Headers in Bytes
    pub const SIZE: usize = 12;

    /// Header fuer ein ausgehendes Paket (ohne CSRC, Extension, Padding)
    pub fn neu(payload_typ: u8, marker: bool, sequenz: u16, zeitstempel: u32, ssrc: u32) -> Self {
        Self {
            version: RTP_VERSION,
            padding: false,
            extension: false,
            csrc_anzahl: 0,
            marker,
            payload_typ: payload_typ & 0x7F,
            sequenz,
            zeitstempel,
            ssrc,
        }
    }

    /// Serialisiert den festen Header (big-endian)
    pub fn encode(&self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[0] = (self.version << 6)
            | (u8::from(self.padding) << 5)
            | (u8::from(self.extension) << 4)
            | (self.csrc_anzahl & 0x0F);
        buf[1] = (u8::from(self.marker) << 7) | (self.payload_typ & 0x7F);
        buf[2..4].copy_from_slice(&self.sequenz.to_be_bytes());
        buf[4..8].copy_from_slice(&self.zeitstempel.to_be_bytes());
        buf[8..12].copy_from_slice(&self.ssrc.to_be_bytes());
        buf
    }

    /// Liest den festen Header
    ///
    /// # Fehler
    /// - `InvalidData` wenn das Slice kuerzer als 12 Bytes ist
    /// - `InvalidData` bei Version != 2
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        if buf.len() < Self::SIZE {
            return Err(ungueltig(format!(
                "RTP-Header zu kurz: {} Bytes (erwartet {})",
                buf.len(),
                Self::SIZE
            )));
        }

        let version = buf[0] >> 6;
        if version != RTP_VERSION {
            return Err(ungueltig(format!(
                "Ungueltige RTP-Version: {} (erwartet {})",
                version, RTP_VERSION
            )));
        }

        Ok(Self {
            version,
            padding: buf[0] & 0x20 != 0,
            extension: buf[0] & 0x10 != 0,
            csrc_anzahl: buf[0] & 0x0F,
            marker: buf[1] & 0x80 != 0,
            payload_typ: buf[1] & 0x7F,
            sequenz: u16::from_be_bytes([buf[2], buf[3]]),
            zeitstempel: u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]),
            ssrc: u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]),
        })
    }
}

// ---------------------------------------------------------------------------
// RtpPaket
// ---------------------------------------------------------------------------

/// RTP-Paket mit extrahierten Nutzdaten
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RtpPaket {
    pub header: RtpHeader,
    pub nutzdaten: Vec<u8>,
}

impl RtpPaket {
    pub fn neu(header: RtpHeader, nutzdaten: Vec<u8>) -> Self {
        Self { header, nutzdaten }
    }

    /// Serialisiert Header und Nutzdaten in einen Byte-Vec
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(RtpHeader::SIZE + self.nutzdaten.len());
        buf.extend_from_slice(&self.header.encode());
        buf.extend_from_slice(&self.nutzdaten);
        buf
    }

    /// Parst ein Datagramm und schneidet CSRC, Extension und Padding ab
    pub fn decode(buf: &[u8]) -> io::Result<Self> {
        let header = RtpHeader::decode(buf)?;

        let mut start = RtpHeader::SIZE + 4 * header.csrc_anzahl as usize;
        if buf.len() < start {
            return Err(ungueltig(format!(
                "CSRC-Liste abgeschnitten: {} Bytes, benoetigt {}",
                buf.len(),
                start
            )));
        }

        if header.extension {
            if buf.len() < start + 4 {
                return Err(ungueltig("Extension-Header abgeschnitten".into()));
            }
            let woerter = u16::from_be_bytes([buf[start + 2], buf[start + 3]]) as usize;
            start += 4 + 4 * woerter;
            if buf.len() < start {
                return Err(ungueltig(format!(
                    "Extension abgeschnitten: {} Bytes, benoetigt {}",
                    buf.len(),
                    start
                )));
            }
        }

        let mut ende = buf.len();
        if header.padding {
            let padding = buf[buf.len() - 1] as usize;
            if padding == 0 || start + padding > buf.len() {
                return Err(ungueltig(format!("Ungueltiges Padding: {}", padding)));
            }
            ende -= padding;
        }

        let nutzdaten = &buf[start..ende];
        if nutzdaten.len() > MAX_NUTZDATEN_LAENGE {
            return Err(ungueltig(format!(
                "Nutzdaten zu lang: {} Bytes (Maximum {})",
                nutzdaten.len(),
                MAX_NUTZDATEN_LAENGE
            )));
        }

        Ok(Self {
            header,
            nutzdaten: nutzdaten.to_vec(),
        })
    }

    /// Gesamtgroesse des serialisierten Paketes
    pub fn groesse(&self) -> usize {
        RtpHeader::SIZE + self.nutzdaten.len()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn pcma_paket() -> Vec<u8> {
        // V=2, kein P/X, CC=0 | M=1, PT=8 | seq=0x1234 | ts=0x01020304 | ssrc=0xCAFEBABE
        let mut buf = vec![
            0x80, 0x88, 0x12, 0x34, 0x01, 0x02, 0x03, 0x04, 0xCA, 0xFE, 0xBA, 0xBE,
        ];
        buf.extend(std::iter::repeat(0xD5).take(160));
        buf
    }

    #[test]
    fn header_felder_werden_gelesen() {
        let paket = RtpPaket::decode(&pcma_paket()).unwrap();
        let h = paket.header;
        assert_eq!(h.version, 2);
        assert!(!h.padding);
        assert!(!h.extension);
        assert_eq!(h.csrc_anzahl, 0);
        assert!(h.marker);
        assert_eq!(h.payload_typ, PayloadTyp::PCMA);
        assert_eq!(h.sequenz, 0x1234);
        assert_eq!(h.zeitstempel, 0x0102_0304);
        assert_eq!(h.ssrc, 0xCAFE_BABE);
        assert_eq!(paket.nutzdaten.len(), 160);
    }

    #[test]
    fn header_big_endian_byte_reihenfolge() {
        let h = RtpHeader::neu(PayloadTyp::PCMU, false, 0x0102, 0x0304_0506, 0x0708_090A);
        let buf = h.encode();
        assert_eq!(buf[0], 0x80);
        assert_eq!(buf[1], 0x00);
        assert_eq!(&buf[2..4], &[0x01, 0x02]);
        assert_eq!(&buf[4..8], &[0x03, 0x04, 0x05, 0x06]);
        assert_eq!(&buf[8..12], &[0x07, 0x08, 0x09, 0x0A]);
    }

    #[test]
    fn marker_bit_wird_gesetzt() {
        let h = RtpHeader::neu(PayloadTyp::PCMA, true, 1, 2, 3);
        assert_eq!(h.encode()[1], 0x88);
    }

    #[test]
    fn zu_kurzes_datagramm_ist_fehler() {
        let err = RtpPaket::decode(&[0x80, 0x08, 0x00]).unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidData);
    }

    #[test]
    fn falsche_version_ist_fehler() {
        let mut buf = pcma_paket();
        buf[0] = 0x40; // Version 1
        assert!(RtpPaket::decode(&buf).is_err());
    }

    #[test]
    fn csrc_liste_wird_uebersprungen() {
        let mut buf = vec![0x82, 0x08, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        buf.extend_from_slice(&[0xAA; 8]); // zwei CSRCs
        buf.extend_from_slice(&[1, 2, 3]);
        let paket = RtpPaket::decode(&buf).unwrap();
        assert_eq!(paket.header.csrc_anzahl, 2);
        assert_eq!(paket.nutzdaten, vec![1, 2, 3]);
    }

    #[test]
    fn extension_wird_uebersprungen() {
        let mut buf = vec![0x90, 0x08, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        // Profil 0xBEDE, Laenge 1 Wort
        buf.extend_from_slice(&[0xBE, 0xDE, 0x00, 0x01, 0x11, 0x22, 0x33, 0x44]);
        buf.extend_from_slice(&[9, 9]);
        let paket = RtpPaket::decode(&buf).unwrap();
        assert_eq!(paket.nutzdaten, vec![9, 9]);
    }

    #[test]
    fn padding_wird_abgeschnitten() {
        let mut buf = vec![0xA0, 0x08, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        buf.extend_from_slice(&[5, 6, 7, 0, 0, 3]);
        let paket = RtpPaket::decode(&buf).unwrap();
        assert_eq!(paket.nutzdaten, vec![5, 6, 7]);
    }

    #[test]
    fn ungueltiges_padding_ist_fehler() {
        let mut buf = vec![0xA0, 0x08, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1];
        buf.extend_from_slice(&[5, 40]);
        assert!(RtpPaket::decode(&buf).is_err());
    }

    #[test]
    fn abgeschnittene_csrc_liste_ist_fehler() {
        let buf = vec![0x83, 0x08, 0, 1, 0, 0, 0, 0, 0, 0, 0, 1, 0, 0];
        assert!(RtpPaket::decode(&buf).is_err());
    }

    #[test]
    fn leere_nutzdaten_sind_erlaubt() {
        let h = RtpHeader::neu(PayloadTyp::PCMA, false, 7, 160, 42);
        let paket = RtpPaket::decode(&h.encode()).unwrap();
        assert!(paket.nutzdaten.is_empty());
        assert_eq!(paket.groesse(), RtpHeader::SIZE);
    }

    #[test]
    fn gesendetes_paket_wird_identisch_gelesen() {
        let paket = RtpPaket::neu(
            RtpHeader::neu(PayloadTyp::PCMU, true, u16::MAX, u32::MAX, 1),
            vec![0xFF; 160],
        );
        assert_eq!(RtpPaket::decode(&paket.encode()).unwrap(), paket);
    }
}
