//! RTP-Zustand einer Anrufsitzung
//!
//! Merkt sich Payload-Typ und SSRC der Gegenstelle und fuehrt die
//! ausgehenden Zaehler (Sequenz, Zeitstempel). Solange kein eingehendes
//! Paket gesehen wurde, wird mit einer lokal gewuerfelten SSRC und dem
//! Standard-Codec gesendet.

use callbridge_audio::{AudioResult, G711Variante};
use callbridge_protocol::{RtpHeader, RtpPaket};
use std::net::SocketAddr;

pub struct RtpSitzung {
    gegenstelle: SocketAddr,
    standard_codec: G711Variante,
    samples_pro_frame: usize,

    eingang_pt: Option<u8>,
    eingang_ssrc: Option<u32>,

    lokale_ssrc: u32,
    sequenz: u16,
    zeitstempel: u32,
    erstes_paket: bool,
    letzter_ausgang_pt: Option<u8>,

    empfangen: u64,
    gesendet: u64,
}

impl RtpSitzung {
    /// Neue Sitzung mit zufaelliger SSRC und zufaelligen Startwerten
    pub fn neu(gegenstelle: SocketAddr, standard_codec: G711Variante, samples_pro_frame: usize) -> Self {
        Self::mit_startwerten(
            gegenstelle,
            standard_codec,
            samples_pro_frame,
            rand::random(),
            rand::random(),
            rand::random(),
        )
    }

    pub fn mit_startwerten(
        gegenstelle: SocketAddr,
        standard_codec: G711Variante,
        samples_pro_frame: usize,
        ssrc: u32,
        sequenz: u16,
        zeitstempel: u32,
    ) -> Self {
        Self {
            gegenstelle,
            standard_codec,
            samples_pro_frame,
            eingang_pt: None,
            eingang_ssrc: None,
            lokale_ssrc: ssrc,
            sequenz,
            zeitstempel,
            erstes_paket: true,
            letzter_ausgang_pt: None,
            empfangen: 0,
            gesendet: 0,
        }
    }

    /// Wertet den Header eines eingehenden Pakets aus
    ///
    /// Gibt die G.711-Variante des Pakets zurueck. Fremde Payload-Typen
    /// sind ein Fehler; Zustand wird dann nicht veraendert.
    pub fn eingang(&mut self, header: &RtpHeader) -> AudioResult<G711Variante> {
        let variante = G711Variante::aus_payload_typ(header.payload_typ)?;
        self.empfangen += 1;

        match self.eingang_pt {
            None => {
                tracing::info!(
                    remote = %self.gegenstelle,
                    pt = header.payload_typ,
                    ssrc = header.ssrc,
                    seq = header.sequenz,
                    "RTP-Parameter der Gegenstelle uebernommen"
                );
                if let Some(aus) = self.letzter_ausgang_pt {
                    if aus != header.payload_typ {
                        tracing::warn!(
                            remote = %self.gegenstelle,
                            ausgang_pt = aus,
                            eingang_pt = header.payload_typ,
                            "Ausgehender Payload-Typ weicht vom Eingang ab, wechsle"
                        );
                    }
                }
            }
            Some(alt) if alt != header.payload_typ => {
                tracing::warn!(
                    remote = %self.gegenstelle,
                    alt,
                    neu = header.payload_typ,
                    "Payload-Typ der Gegenstelle gewechselt"
                );
            }
            Some(_) => {}
        }
        self.eingang_pt = Some(header.payload_typ);

        if self.eingang_ssrc.is_none() {
            self.eingang_ssrc = Some(header.ssrc);
        }

        if header.sequenz % 500 == 0 {
            tracing::debug!(
                remote = %self.gegenstelle,
                seq = header.sequenz,
                ts = header.zeitstempel,
                empfangen = self.empfangen,
                "RTP-Eingang"
            );
        }
        Ok(variante)
    }

    /// Codec fuer ausgehende Pakete
    pub fn codec(&self) -> G711Variante {
        self.eingang_pt
            .and_then(|pt| G711Variante::aus_payload_typ(pt).ok())
            .unwrap_or(self.standard_codec)
    }

    /// SSRC fuer ausgehende Pakete
    pub fn ausgang_ssrc(&self) -> u32 {
        self.eingang_ssrc.unwrap_or(self.lokale_ssrc)
    }

    /// Verpackt einen kodierten Frame und zaehlt Sequenz/Zeitstempel weiter
    pub fn paket_bauen(&mut self, nutzdaten: Vec<u8>) -> RtpPaket {
        if nutzdaten.len() != self.samples_pro_frame {
            tracing::warn!(
                remote = %self.gegenstelle,
                laenge = nutzdaten.len(),
                erwartet = self.samples_pro_frame,
                "Ausgehender Frame hat unerwartete Laenge"
            );
        }

        let pt = self.codec().payload_typ();
        let header = RtpHeader::neu(
            pt,
            self.erstes_paket,
            self.sequenz,
            self.zeitstempel,
            self.ausgang_ssrc(),
        );

        self.erstes_paket = false;
        self.letzter_ausgang_pt = Some(pt);
        self.sequenz = self.sequenz.wrapping_add(1);
        // G.711: ein Byte pro Abtastwert
        self.zeitstempel = self.zeitstempel.wrapping_add(nutzdaten.len() as u32);
        self.gesendet += 1;

        tracing::trace!(
            remote = %self.gegenstelle,
            seq = header.sequenz,
            ts = header.zeitstempel,
            "RTP-Paket gebaut"
        );
        RtpPaket::neu(header, nutzdaten)
    }

    pub fn gegenstelle(&self) -> SocketAddr {
        self.gegenstelle
    }

    pub fn eingang_pt(&self) -> Option<u8> {
        self.eingang_pt
    }

    pub fn eingang_ssrc(&self) -> Option<u32> {
        self.eingang_ssrc
    }

    pub fn empfangen(&self) -> u64 {
        self.empfangen
    }

    pub fn gesendet(&self) -> u64 {
        self.gesendet
    }
}
