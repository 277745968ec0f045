//! Medien-Konfiguration einer Sitzung
//!
//! Wird beim Serverstart aus der TOML-Konfiguration gebaut und von allen
//! Sitzungen geteilt (`Arc<MedienConfig>`).

use callbridge_audio::G711Variante;
use std::time::Duration;

/// Einstellungen eines Timing-Puffers (Ein- oder Ausgang)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimingBufferConfig {
    /// Ohne Puffer wird jeder Frame sofort weitergegeben
    pub aktiviert: bool,
    /// Vorpuffer-Tiefe, bevor ausgegeben wird
    pub ziel_tiefe: Duration,
    /// Obergrenze; bei Ueberlauf wird der aelteste Frame verworfen
    pub max_frames: usize,
    pub frame_dauer: Duration,
}

impl TimingBufferConfig {
    pub fn neu(ziel_tiefe_ms: u64, max_frames: usize) -> Self {
        Self {
            aktiviert: true,
            ziel_tiefe: Duration::from_millis(ziel_tiefe_ms),
            max_frames,
            frame_dauer: Duration::from_millis(20),
        }
    }

    /// Ziel-Tiefe in Frames, mindestens 1
    pub fn ziel_frames(&self) -> usize {
        let frame_ms = self.frame_dauer.as_millis().max(1);
        ((self.ziel_tiefe.as_millis() / frame_ms) as usize).max(1)
    }
}

impl Default for TimingBufferConfig {
    fn default() -> Self {
        Self::neu(40, 200)
    }
}

/// Lokale Unterbrechungserkennung
#[derive(Debug, Clone, PartialEq)]
pub struct BargeInConfig {
    pub aktiviert: bool,
    /// Normierter RMS-Wert (0.0..=1.0), ab dem ein Frame als Sprache gilt
    pub energie_schwelle: f32,
    /// So viele laute Frames in Folge loesen die Unterbrechung aus
    pub frame_schwelle: u32,
    /// Sprachbeginn-Meldungen des Backends unterbrechen die Wiedergabe
    pub remote: bool,
}

impl Default for BargeInConfig {
    fn default() -> Self {
        Self {
            aktiviert: true,
            energie_schwelle: 0.08,
            frame_schwelle: 2,
            remote: true,
        }
    }
}

/// Alles, was eine Sitzung ueber Audio und Zeitverhalten wissen muss
#[derive(Debug, Clone)]
pub struct MedienConfig {
    /// Telefonie-Rate (G.711)
    pub schmalband_rate: u32,
    /// Rate des Sprach-Backends
    pub breitband_rate: u32,
    pub frame_dauer: Duration,
    /// Codec fuer ausgehende Pakete, solange kein eingehendes Paket gesehen wurde
    pub standard_codec: G711Variante,
    pub eingang: TimingBufferConfig,
    pub ausgang: TimingBufferConfig,
    pub barge_in: BargeInConfig,
    /// Beim Aktivieren sofort ein Stille-Paket senden (oeffnet NAT/Medienpfad)
    pub stille_beim_start: bool,
    /// Sitzungen ohne eingehende Pakete werden nach dieser Zeit beendet
    pub leerlauf_timeout: Duration,
    /// Kapazitaet der Paket-Warteschlange zwischen UDP-Empfang und Sitzung
    pub eingangs_warteschlange: usize,
    /// Aufeinanderfolgende Sendefehler, nach denen die Sitzung aufgibt
    pub max_sendefehler: u32,
}

impl Default for MedienConfig {
    fn default() -> Self {
        Self {
            schmalband_rate: 8000,
            breitband_rate: 24000,
            frame_dauer: Duration::from_millis(20),
            standard_codec: G711Variante::Alaw,
            eingang: TimingBufferConfig::neu(40, 200),
            ausgang: TimingBufferConfig::neu(40, 3000),
            barge_in: BargeInConfig::default(),
            stille_beim_start: true,
            leerlauf_timeout: Duration::from_secs(60),
            eingangs_warteschlange: 256,
            max_sendefehler: 50,
        }
    }
}

impl MedienConfig {
    /// Abtastwerte pro Frame auf der Telefonieseite (160 bei 8 kHz / 20 ms)
    pub fn samples_schmal(&self) -> usize {
        (self.schmalband_rate as u128 * self.frame_dauer.as_millis() / 1000) as usize
    }

    /// Abtastwerte pro Frame auf der Backend-Seite (480 bei 24 kHz / 20 ms)
    pub fn samples_breit(&self) -> usize {
        (self.breitband_rate as u128 * self.frame_dauer.as_millis() / 1000) as usize
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn frame_groessen() {
        let cfg = MedienConfig::default();
        assert_eq!(cfg.samples_schmal(), 160);
        assert_eq!(cfg.samples_breit(), 480);
    }

    #[test]
    fn ziel_frames_mindestens_eins() {
        assert_eq!(TimingBufferConfig::neu(40, 10).ziel_frames(), 2);
        assert_eq!(TimingBufferConfig::neu(0, 10).ziel_frames(), 1);
        assert_eq!(TimingBufferConfig::neu(50, 10).ziel_frames(), 2);
    }
}
