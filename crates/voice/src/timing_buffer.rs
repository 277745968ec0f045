//! Timing-Puffer fuer Audio-Frames
//!
//! Entkoppelt unregelmaessig ankommende Frames vom festen 20-ms-Takt:
//! - `push` reiht Frames ein; bei Ueberlauf wird der aelteste verworfen
//! - `takt` gibt pro Tick genau einen Frame aus, sobald entweder die
//!   Ziel-Tiefe erreicht ist oder der aelteste Frame lange genug gewartet
//!   hat; sonst das Stille-Template
//! - `leeren` verwirft alles (Unterbrechung, Abbau)
//!
//! Die Zeit wird explizit uebergeben (`jetzt`), damit der Puffer ohne
//! Runtime deterministisch testbar bleibt. Nicht thread-safe: gehoert
//! genau einer Sitzung.

use bytes::Bytes;
use std::collections::VecDeque;
use std::time::Instant;

use crate::config::TimingBufferConfig;

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TimingBufferStatistik {
    pub empfangen: u64,
    pub ausgegeben: u64,
    /// Ticks, an denen Stille statt eines Frames ausgegeben wurde
    pub stille: u64,
    /// Durch Ueberlauf verworfene Frames
    pub ueberlauf: u64,
    /// Durch `leeren` verworfene Frames
    pub geleert: u64,
}

/// Ergebnis eines Ticks
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaktAusgabe {
    pub frame: Bytes,
    pub ist_stille: bool,
}

// ---------------------------------------------------------------------------
// TimingBuffer
// ---------------------------------------------------------------------------

pub struct TimingBuffer {
    config: TimingBufferConfig,
    ziel_frames: usize,
    frames: VecDeque<(Instant, Bytes)>,
    stille: Bytes,
    statistik: TimingBufferStatistik,
}

impl TimingBuffer {
    /// `stille` ist der Frame, der bei Unterlauf ausgegeben wird
    pub fn neu(config: TimingBufferConfig, stille: Bytes) -> Self {
        Self {
            ziel_frames: config.ziel_frames(),
            frames: VecDeque::with_capacity(config.max_frames.min(512)),
            config,
            stille,
            statistik: TimingBufferStatistik::default(),
        }
    }

    /// Reiht einen Frame ein; gibt die Anzahl verworfener Frames zurueck
    pub fn push(&mut self, frame: Bytes, jetzt: Instant) -> usize {
        self.statistik.empfangen += 1;
        self.frames.push_back((jetzt, frame));

        let mut verworfen = 0;
        while self.frames.len() > self.config.max_frames.max(1) {
            self.frames.pop_front();
            verworfen += 1;
        }
        if verworfen > 0 {
            self.statistik.ueberlauf += verworfen as u64;
            tracing::warn!(
                verworfen,
                fuellstand = self.frames.len(),
                "Puffer-Ueberlauf: aeltester Frame verworfen"
            );
        }
        verworfen
    }

    fn bereit(&self, jetzt: Instant) -> bool {
        if !self.config.aktiviert || self.frames.len() >= self.ziel_frames {
            return true;
        }
        match self.frames.front() {
            Some((ankunft, _)) => jetzt.saturating_duration_since(*ankunft) >= self.config.ziel_tiefe,
            None => false,
        }
    }

    /// Ein Tick: naechster Frame oder Stille
    pub fn takt(&mut self, jetzt: Instant) -> TaktAusgabe {
        if self.bereit(jetzt) {
            if let Some((_, frame)) = self.frames.pop_front() {
                self.statistik.ausgegeben += 1;
                return TaktAusgabe {
                    frame,
                    ist_stille: false,
                };
            }
        }

        self.statistik.stille += 1;
        TaktAusgabe {
            frame: self.stille.clone(),
            ist_stille: true,
        }
    }

    /// Verwirft alle gepufferten Frames; gibt deren Anzahl zurueck
    pub fn leeren(&mut self) -> usize {
        let anzahl = self.frames.len();
        self.frames.clear();
        self.statistik.geleert += anzahl as u64;
        anzahl
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn ist_leer(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn ziel_frames(&self) -> usize {
        self.ziel_frames
    }

    pub fn stille(&self) -> &Bytes {
        &self.stille
    }

    /// Tauscht das Stille-Template (z.B. nach Codec-Wechsel)
    pub fn stille_setzen(&mut self, stille: Bytes) {
        self.stille = stille;
    }

    pub fn statistik(&self) -> &TimingBufferStatistik {
        &self.statistik
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
