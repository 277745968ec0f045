//! Lineares Backoff fuer Wiederverbindungen
//!
//! Versuch n wartet `basis * n`, hoechstens `obergrenze`. Nach `max_versuche`
//! Fehlschlaegen in Folge wird aufgegeben.

use std::time::Duration;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BackoffConfig {
    pub basis: Duration,
    pub obergrenze: Duration,
    pub max_versuche: u32,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            basis: Duration::from_secs(1),
            obergrenze: Duration::from_secs(10),
            max_versuche: 10,
        }
    }
}

#[derive(Debug, Clone)]
pub struct LinearBackoff {
    config: BackoffConfig,
    versuch: u32,
}

impl LinearBackoff {
    pub fn neu(config: BackoffConfig) -> Self {
        Self { config, versuch: 0 }
    }

    /// Wartezeit vor dem naechsten Versuch, `None` wenn erschoepft
    pub fn naechste_verzoegerung(&mut self) -> Option<Duration> {
        if self.versuch >= self.config.max_versuche {
            return None;
        }
        self.versuch += 1;
        let verzoegerung = self.config.basis.saturating_mul(self.versuch);
        Some(verzoegerung.min(self.config.obergrenze))
    }

    /// Nach einer vom Backend bestaetigten Verbindung wieder von vorn zaehlen
    pub fn zuruecksetzen(&mut self) {
        self.versuch = 0;
    }

    pub fn versuche(&self) -> u32 {
        self.versuch
    }

    pub fn config(&self) -> &BackoffConfig {
        &self.config
    }
}
