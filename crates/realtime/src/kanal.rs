//! Sprachkanal-Handle
//!
//! Ein [`SprachKanal`] gehoert genau einer Sitzung. Er nimmt Anrufer-Audio
//! entgegen (nicht blockierend, nur im Zustand `Offen`), meldet Backend-
//! Ereignisse ueber einen mpsc-Kanal und wird beim Droppen geschlossen.
//!
//! ## Zustandsmaschine
//! ```text
//! Verbindend -> Offen -> Wiederverbindend -> Offen -> ... -> Geschlossen
//!      |                        |
//!      +------------------------+--> Geschlossen (Backoff erschoepft / Abbruch)
//! ```

use bytes::Bytes;
use callbridge_core::{SessionId, TranskriptBeobachter};
use std::sync::Arc;
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;

use crate::config::RealtimeConfig;
use crate::verbindung::verbindungs_loop;

// ---------------------------------------------------------------------------
// Zustand & Ereignisse
// ---------------------------------------------------------------------------

/// Verbindungszustand des Kanals
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KanalZustand {
    Verbindend,
    Offen,
    Wiederverbindend,
    Geschlossen,
}

/// Was die Sitzung vom Backend erfaehrt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KanalEreignis {
    /// Verbindung steht und ist konfiguriert
    Verbunden,
    /// Serverseitige VAD: Anrufer spricht
    SpracheBegonnen,
    SpracheBeendet,
    AntwortErstellt { antwort_id: Option<String> },
    /// Antwort-Audio, PCM16 LE mit Breitband-Rate
    Audio {
        antwort_id: Option<String>,
        pcm: Bytes,
    },
    /// Antwort vollstaendig, abgebrochen oder fehlgeschlagen
    AntwortFertig { antwort_id: Option<String> },
    /// Verbindung abgerissen, Wiederverbindung laeuft
    VerbindungVerloren,
    /// Endgueltig geschlossen, es kommen keine weiteren Ereignisse
    Geschlossen,
}

/// Ergebnis eines Sendeversuchs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SendeErgebnis {
    Eingereiht,
    /// Kanal nicht offen, Audio verworfen
    NichtVerbunden,
    /// Sendewarteschlange voll, Audio verworfen
    Ueberlastet,
}

// ---------------------------------------------------------------------------
// SprachKanal
// ---------------------------------------------------------------------------

pub struct SprachKanal {
    sitzung: SessionId,
    audio_tx: mpsc::Sender<Bytes>,
    zustand_rx: watch::Receiver<KanalZustand>,
    abbruch: CancellationToken,
}

/// Gegenseite eines lokalen Kanals (ohne Netzwerk)
pub struct KanalGegenstelle {
    pub audio_rx: mpsc::Receiver<Bytes>,
    pub ereignis_tx: mpsc::Sender<KanalEreignis>,
    pub zustand_tx: watch::Sender<KanalZustand>,
    pub abbruch: CancellationToken,
}

impl SprachKanal {
    /// Startet den Verbindungs-Task und gibt Handle und Ereignis-Empfaenger zurueck
    ///
    /// Muss innerhalb einer tokio-Runtime aufgerufen werden.
    pub fn oeffnen(
        config: Arc<RealtimeConfig>,
        sitzung: SessionId,
        beobachter: Arc<dyn TranskriptBeobachter>,
    ) -> (Self, mpsc::Receiver<KanalEreignis>) {
        let (audio_tx, audio_rx) = mpsc::channel(config.sende_puffer.max(1));
        let (ereignis_tx, ereignis_rx) = mpsc::channel(config.ereignis_puffer.max(1));
        let (zustand_tx, zustand_rx) = watch::channel(KanalZustand::Verbindend);
        let abbruch = CancellationToken::new();

        tokio::spawn(verbindungs_loop(
            config,
            sitzung,
            beobachter,
            audio_rx,
            ereignis_tx,
            zustand_tx,
            abbruch.clone(),
        ));

        (
            Self {
                sitzung,
                audio_tx,
                zustand_rx,
                abbruch,
            },
            ereignis_rx,
        )
    }

    /// Kanal ohne Netzwerkverbindung; die Gegenstelle steuert Zustand und Ereignisse
    pub fn lokal(
        sitzung: SessionId,
        kapazitaet: usize,
    ) -> (Self, mpsc::Receiver<KanalEreignis>, KanalGegenstelle) {
        let (audio_tx, audio_rx) = mpsc::channel(kapazitaet.max(1));
        let (ereignis_tx, ereignis_rx) = mpsc::channel(kapazitaet.max(1));
        let (zustand_tx, zustand_rx) = watch::channel(KanalZustand::Verbindend);
        let abbruch = CancellationToken::new();

        (
            Self {
                sitzung,
                audio_tx,
                zustand_rx,
                abbruch: abbruch.clone(),
            },
            ereignis_rx,
            KanalGegenstelle {
                audio_rx,
                ereignis_tx,
                zustand_tx,
                abbruch,
            },
        )
    }

    pub fn sitzung(&self) -> SessionId {
        self.sitzung
    }

    pub fn zustand(&self) -> KanalZustand {
        *self.zustand_rx.borrow()
    }

    /// Reiht einen Frame Anrufer-Audio (PCM16 LE, Breitband) ein
    ///
    /// Blockiert nie. Ist der Kanal nicht offen oder die Warteschlange voll,
    /// wird der Frame verworfen.
    pub fn audio_senden(&self, pcm16_le: Bytes) -> SendeErgebnis {
        if self.zustand() != KanalZustand::Offen {
            return SendeErgebnis::NichtVerbunden;
        }
        match self.audio_tx.try_send(pcm16_le) {
            Ok(()) => SendeErgebnis::Eingereiht,
            Err(mpsc::error::TrySendError::Full(_)) => SendeErgebnis::Ueberlastet,
            Err(mpsc::error::TrySendError::Closed(_)) => SendeErgebnis::NichtVerbunden,
        }
    }

    /// Schliesst den Kanal; idempotent
    pub fn schliessen(&self) {
        if !self.abbruch.is_cancelled() {
            tracing::debug!(sitzung = %self.sitzung, "Sprachkanal wird geschlossen");
            self.abbruch.cancel();
        }
    }

    pub fn ist_geschlossen(&self) -> bool {
        self.abbruch.is_cancelled() || self.zustand() == KanalZustand::Geschlossen
    }
}

impl Drop for SprachKanal {
    fn drop(&mut self) {
        self.abbruch.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn lokaler_kanal_verwirft_audio_solange_nicht_offen() {
        let (kanal, _ereignisse, mut gegenstelle) = SprachKanal::lokal(SessionId::new(), 4);
        assert_eq!(kanal.zustand(), KanalZustand::Verbindend);
        assert_eq!(
            kanal.audio_senden(Bytes::from_static(&[0, 0])),
            SendeErgebnis::NichtVerbunden
        );

        gegenstelle.zustand_tx.send(KanalZustand::Offen).unwrap();
        assert_eq!(
            kanal.audio_senden(Bytes::from_static(&[1, 0])),
            SendeErgebnis::Eingereiht
        );
        assert_eq!(
            gegenstelle.audio_rx.recv().await.unwrap(),
            Bytes::from_static(&[1, 0])
        );
    }

    #[tokio::test]
    async fn volle_warteschlange_meldet_ueberlast() {
        let (kanal, _ereignisse, gegenstelle) = SprachKanal::lokal(SessionId::new(), 1);
        gegenstelle.zustand_tx.send(KanalZustand::Offen).unwrap();
        assert_eq!(kanal.audio_senden(Bytes::new()), SendeErgebnis::Eingereiht);
        assert_eq!(kanal.audio_senden(Bytes::new()), SendeErgebnis::Ueberlastet);
    }

    #[tokio::test]
    async fn schliessen_ist_idempotent_und_bricht_ab() {
        let (kanal, _ereignisse, gegenstelle) = SprachKanal::lokal(SessionId::new(), 1);
        kanal.schliessen();
        kanal.schliessen();
        assert!(kanal.ist_geschlossen());
        assert!(gegenstelle.abbruch.is_cancelled());
    }

    #[tokio::test]
    async fn drop_bricht_ab() {
        let (kanal, _ereignisse, gegenstelle) = SprachKanal::lokal(SessionId::new(), 1);
        drop(kanal);
        assert!(gegenstelle.abbruch.is_cancelled());
    }
}
