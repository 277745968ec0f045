//! Wiedergabe-Pipeline: Backend-Audio -> Ausgangspuffer
//!
//! Nimmt PCM16-Deltas des Backends (Breitband) entgegen, rechnet sie auf
//! Schmalband herunter, zerlegt sie in 20-ms-Frames, kodiert G.711 und
//! legt sie in den Ausgangs-[`TimingBuffer`].
//!
//! ## Zustaende
//! ```text
//! Leerlauf --(erstes Audio einer Antwort)--> Spielt
//! Spielt --(Antwort fertig + Puffer leer)--> Leerlauf
//! Spielt --(unterbrechen)--> Leerlauf
//! ```
//!
//! Deltas koennen an beliebigen Byte-Grenzen enden. Ein ungerades Byte,
//! nicht wandelbare Breitband-Reste und angefangene Schmalband-Frames
//! werden bis zum naechsten Delta aufbewahrt.

use bytes::Bytes;
use callbridge_audio::{block_groesse, umrechnen, G711Variante};
use std::time::Instant;

use crate::config::TimingBufferConfig;
use crate::timing_buffer::{TaktAusgabe, TimingBuffer};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WiedergabeZustand {
    Leerlauf,
    Spielt,
}

/// Was mit einem Audio-Delta passiert ist
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeltaErgebnis {
    Angenommen {
        /// Neu eingereihte Frames
        frames: usize,
        /// Durch Pufferueberlauf verworfene Frames
        verworfen: usize,
        /// Dieses Delta hat die Wiedergabe gestartet
        gestartet: bool,
    },
    /// Gehoert zu einer unterbrochenen Antwort
    Veraltet,
    /// Gehoert nicht zur laufenden Antwort
    Fremd,
}

pub struct PlaybackPipeline {
    zustand: WiedergabeZustand,
    codec: G711Variante,
    breit_rate: u32,
    schmal_rate: u32,
    samples_pro_frame: usize,

    rest_byte: Option<u8>,
    breit_rest: Vec<i16>,
    schmal_rest: Vec<i16>,
    ausgang: TimingBuffer,

    aktive_antwort: Option<String>,
    unterbrochene_antwort: Option<String>,
    /// Backend hat das Ende der laufenden Antwort gemeldet
    fertig: bool,
}

fn stille_frame(codec: G711Variante, samples: usize) -> Bytes {
    Bytes::from(vec![codec.stille_byte(); samples])
}

impl PlaybackPipeline {
    pub fn neu(
        puffer: TimingBufferConfig,
        codec: G711Variante,
        breit_rate: u32,
        schmal_rate: u32,
        samples_pro_frame: usize,
    ) -> Self {
        Self {
            zustand: WiedergabeZustand::Leerlauf,
            codec,
            breit_rate,
            schmal_rate,
            samples_pro_frame: samples_pro_frame.max(1),
            rest_byte: None,
            breit_rest: Vec::new(),
            schmal_rest: Vec::with_capacity(samples_pro_frame),
            ausgang: TimingBuffer::neu(puffer, stille_frame(codec, samples_pro_frame)),
            aktive_antwort: None,
            unterbrochene_antwort: None,
            fertig: false,
        }
    }

    pub fn zustand(&self) -> WiedergabeZustand {
        self.zustand
    }

    pub fn spielt(&self) -> bool {
        self.zustand == WiedergabeZustand::Spielt
    }

    pub fn codec(&self) -> G711Variante {
        self.codec
    }

    /// Wechselt den Ausgangs-Codec (folgt dem Payload-Typ der Gegenstelle)
    pub fn codec_setzen(&mut self, codec: G711Variante) {
        if codec != self.codec {
            self.codec = codec;
            self.ausgang
                .stille_setzen(stille_frame(codec, self.samples_pro_frame));
        }
    }

    pub fn aktive_antwort(&self) -> Option<&str> {
        self.aktive_antwort.as_deref()
    }

    /// Gepufferte Ausgangs-Frames
    pub fn gepuffert(&self) -> usize {
        self.ausgang.len()
    }

    pub fn ausgang(&self) -> &TimingBuffer {
        &self.ausgang
    }

    /// Backend meldet eine neue Antwort
    ///
    /// Laeuft gerade eine andere Antwort, wird sie unterbrochen. Gibt
    /// `true` zurueck, wenn das passiert ist.
    pub fn antwort_erstellt(&mut self, antwort_id: Option<String>) -> bool {
        let mut unterbrochen = false;
        if self.spielt() && !self.fertig {
            if let (Some(alt), Some(neu)) = (&self.aktive_antwort, &antwort_id) {
                if alt != neu {
                    tracing::info!(alt = %alt, neu = %neu, "Neue Antwort ersetzt laufende Wiedergabe");
                    self.unterbrechen();
                    unterbrochen = true;
                }
            }
        }
        if antwort_id.is_some() {
            self.aktive_antwort = antwort_id;
            self.fertig = false;
        }
        unterbrochen
    }

    /// Verarbeitet ein Audio-Delta (PCM16 LE, Breitband)
    pub fn audio_delta(
        &mut self,
        antwort_id: Option<&str>,
        pcm16_le: &[u8],
        jetzt: Instant,
    ) -> DeltaErgebnis {
        if let Some(id) = antwort_id {
            if self.unterbrochene_antwort.as_deref() == Some(id) {
                return DeltaErgebnis::Veraltet;
            }
            let fremd = matches!(&self.aktive_antwort, Some(aktiv) if aktiv.as_str() != id && !self.fertig);
            if fremd {
                return DeltaErgebnis::Fremd;
            }
            if self.aktive_antwort.as_deref() != Some(id) {
                self.aktive_antwort = Some(id.to_string());
                self.fertig = false;
            }
        }

        let gestartet = !self.spielt();
        if gestartet {
            self.zustand = WiedergabeZustand::Spielt;
            tracing::debug!(antwort = ?self.aktive_antwort, "Wiedergabe gestartet");
        }

        let mut bytes = pcm16_le;
        if let Some(b0) = self.rest_byte.take() {
            match bytes.split_first() {
                Some((b1, rest)) => {
                    self.breit_rest.push(i16::from_le_bytes([b0, *b1]));
                    bytes = rest;
                }
                None => self.rest_byte = Some(b0),
            }
        }
        let mut paare = bytes.chunks_exact(2);
        self.breit_rest
            .extend(paare.by_ref().map(|p| i16::from_le_bytes([p[0], p[1]])));
        if let [b] = paare.remainder() {
            self.rest_byte = Some(*b);
        }

        let block = block_groesse(self.breit_rate, self.schmal_rate);
        let wandelbar = self.breit_rest.len() - self.breit_rest.len() % block;
        if wandelbar > 0 {
            let schmal = umrechnen(&self.breit_rest[..wandelbar], self.breit_rate, self.schmal_rate);
            self.breit_rest.drain(..wandelbar);
            self.schmal_rest.extend_from_slice(&schmal);
        }

        let (frames, verworfen) = self.frames_einreihen(jetzt);
        DeltaErgebnis::Angenommen {
            frames,
            verworfen,
            gestartet,
        }
    }

    fn frames_einreihen(&mut self, jetzt: Instant) -> (usize, usize) {
        let mut frames = 0;
        let mut verworfen = 0;
        let n = self.samples_pro_frame;
        let voll = self.schmal_rest.len() / n * n;
        for frame in self.schmal_rest[..voll].chunks_exact(n) {
            verworfen += self.ausgang.push(Bytes::from(self.codec.kodieren(frame)), jetzt);
            frames += 1;
        }
        self.schmal_rest.drain(..voll);
        (frames, verworfen)
    }

    /// Backend meldet das Ende einer Antwort
    ///
    /// Ein angefangener Frame wird mit Stille aufgefuellt. Die Wiedergabe
    /// geht in den Leerlauf, sobald der Ausgangspuffer leer ist.
    pub fn antwort_fertig(&mut self, antwort_id: Option<&str>, jetzt: Instant) -> usize {
        if let Some(id) = antwort_id {
            if self.unterbrochene_antwort.as_deref() == Some(id) {
                return 0;
            }
            if let Some(aktiv) = &self.aktive_antwort {
                if aktiv != id {
                    tracing::debug!(aktiv = %aktiv, fertig = %id, "Ende einer fremden Antwort ignoriert");
                    return 0;
                }
            }
        }

        let mut verworfen = 0;
        if !self.schmal_rest.is_empty() {
            self.schmal_rest.resize(self.samples_pro_frame, 0);
            verworfen = self.frames_einreihen(jetzt).1;
        }
        self.breit_rest.clear();
        self.rest_byte = None;

        self.fertig = true;
        self.leerlauf_pruefen();
        verworfen
    }

    /// Ein Tick des Ausgangstakts
    pub fn takt(&mut self, jetzt: Instant) -> TaktAusgabe {
        let ausgabe = self.ausgang.takt(jetzt);
        self.leerlauf_pruefen();
        ausgabe
    }

    fn leerlauf_pruefen(&mut self) {
        if self.fertig && self.ausgang.ist_leer() {
            if self.spielt() {
                tracing::debug!(antwort = ?self.aktive_antwort, "Wiedergabe beendet");
            }
            self.zustand = WiedergabeZustand::Leerlauf;
            self.aktive_antwort = None;
            self.fertig = false;
        }
    }

    /// Bricht die Wiedergabe ab und verwirft alles Gepufferte
    ///
    /// Idempotent. Gibt die Anzahl verworfener Frames zurueck.
    pub fn unterbrechen(&mut self) -> usize {
        let verworfen = self.ausgang.leeren();
        self.rest_byte = None;
        self.breit_rest.clear();
        self.schmal_rest.clear();
        if let Some(id) = self.aktive_antwort.take() {
            self.unterbrochene_antwort = Some(id);
        }
        self.fertig = false;
        if self.zustand == WiedergabeZustand::Spielt {
            tracing::debug!(verworfen, "Wiedergabe unterbrochen");
        }
        self.zustand = WiedergabeZustand::Leerlauf;
        verworfen
    }
}
