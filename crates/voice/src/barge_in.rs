//! Barge-in: Anrufer unterbricht die laufende Wiedergabe
//!
//! Zwei unabhaengige Ausloeser:
//! - lokal: RMS-Energie eingehender Frames, N laute Frames in Folge
//! - remote: das Backend meldet Sprachbeginn
//!
//! Wer zuerst ausloest, unterbricht; der andere trifft dann auf eine
//! Pipeline im Leerlauf und bewirkt nichts.

use callbridge_audio::rms_normiert;

use crate::config::BargeInConfig;
use crate::playback::PlaybackPipeline;

pub struct BargeInArbiter {
    config: BargeInConfig,
    laute_frames: u32,
    ausgeloest: u64,
}

impl BargeInArbiter {
    pub fn neu(config: BargeInConfig) -> Self {
        Self {
            config,
            laute_frames: 0,
            ausgeloest: 0,
        }
    }

    /// Bewertet einen eingehenden Frame (Schmalband, linear)
    ///
    /// Gibt `true` zurueck, wenn die Wiedergabe dadurch unterbrochen wurde.
    pub fn lokal_frame(&mut self, samples: &[i16], wiedergabe: &mut PlaybackPipeline) -> bool {
        if !self.config.aktiviert {
            return false;
        }

        let energie = rms_normiert(samples);
        if energie < self.config.energie_schwelle {
            self.laute_frames = 0;
            return false;
        }

        self.laute_frames = self.laute_frames.saturating_add(1);
        tracing::trace!(energie, laute_frames = self.laute_frames, "Lauter Frame");

        if self.laute_frames >= self.config.frame_schwelle.max(1) && wiedergabe.spielt() {
            tracing::info!(energie, frames = self.laute_frames, "Barge-in (lokal)");
            self.ausloesen(wiedergabe);
            return true;
        }
        false
    }

    /// Backend hat Sprachbeginn erkannt
    pub fn remote_sprache(&mut self, wiedergabe: &mut PlaybackPipeline) -> bool {
        if !self.config.remote || !wiedergabe.spielt() {
            return false;
        }
        tracing::info!("Barge-in (Backend-VAD)");
        self.ausloesen(wiedergabe);
        true
    }

    fn ausloesen(&mut self, wiedergabe: &mut PlaybackPipeline) {
        wiedergabe.unterbrechen();
        self.ausgeloest += 1;
        self.zuruecksetzen();
    }

    /// Bei Wiedergabestart und nach jeder Unterbrechung
    pub fn zuruecksetzen(&mut self) {
        self.laute_frames = 0;
    }

    pub fn laute_frames(&self) -> u32 {
        self.laute_frames
    }

    pub fn ausgeloest(&self) -> u64 {
        self.ausgeloest
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TimingBufferConfig;
    use callbridge_audio::{pcm16_zu_bytes, G711Variante};
    use std::time::Instant;

    const LAUT: [i16; 160] = [8000; 160];
    const LEISE: [i16; 160] = [100; 160];

    fn spielende_pipeline() -> PlaybackPipeline {
        let mut p =
            PlaybackPipeline::neu(TimingBufferConfig::neu(40, 100), G711Variante::Alaw, 24000, 8000, 160);
        p.audio_delta(Some("r1"), &pcm16_zu_bytes(&[500; 4800]), Instant::now());
        assert!(p.spielt());
        p
    }

    #[test]
    fn knapp_unter_schwelle_loest_nicht_aus() {
        let mut arbiter = BargeInArbiter::neu(BargeInConfig {
            frame_schwelle: 3,
            ..BargeInConfig::default()
        });
        let mut p = spielende_pipeline();

        assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        assert!(!arbiter.lokal_frame(&LEISE, &mut p));
        assert_eq!(arbiter.laute_frames(), 0);
        assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        assert!(p.spielt());
    }

    #[test]
    fn genau_schwelle_loest_einmal_aus() {
        let mut arbiter = BargeInArbiter::neu(BargeInConfig::default());
        let mut p = spielende_pipeline();

        assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        assert!(arbiter.lokal_frame(&LAUT, &mut p));
        assert!(!p.spielt());
        assert_eq!(p.gepuffert(), 0);

        // Weitere laute Frames treffen auf Leerlauf
        for _ in 0..5 {
            assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        }
        assert_eq!(arbiter.ausgeloest(), 1);
    }

    #[test]
    fn ohne_wiedergabe_keine_unterbrechung() {
        let mut arbiter = BargeInArbiter::neu(BargeInConfig::default());
        let mut p = PlaybackPipeline::neu(TimingBufferConfig::default(), G711Variante::Alaw, 24000, 8000, 160);
        for _ in 0..10 {
            assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        }
        assert!(!arbiter.remote_sprache(&mut p));
        assert_eq!(arbiter.ausgeloest(), 0);
    }

    #[test]
    fn deaktiviert_zaehlt_nicht() {
        let mut arbiter = BargeInArbiter::neu(BargeInConfig {
            aktiviert: false,
            ..BargeInConfig::default()
        });
        let mut p = spielende_pipeline();
        for _ in 0..10 {
            assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        }
        assert_eq!(arbiter.laute_frames(), 0);
        assert!(p.spielt());
    }

    #[test]
    fn remote_und_lokal_nur_einmal() {
        let mut arbiter = BargeInArbiter::neu(BargeInConfig::default());
        let mut p = spielende_pipeline();

        assert!(arbiter.remote_sprache(&mut p));
        assert!(!arbiter.remote_sprache(&mut p));
        assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        assert!(!arbiter.lokal_frame(&LAUT, &mut p));
        assert_eq!(arbiter.ausgeloest(), 1);
    }

    #[test]
    fn remote_abgeschaltet_ignoriert_backend_vad() {
        let mut arbiter = BargeInArbiter::neu(BargeInConfig {
            remote: false,
            ..BargeInConfig::default()
        });
        let mut p = spielende_pipeline();
        assert!(!arbiter.remote_sprache(&mut p));
        assert!(p.spielt());
        // Lokale Erkennung bleibt aktiv
        arbiter.lokal_frame(&LAUT, &mut p);
        assert!(arbiter.lokal_frame(&LAUT, &mut p));
    }
}
