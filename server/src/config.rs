//! Server-Konfiguration
//!
//! Wird aus einer TOML-Datei geladen. Alle Felder haben Standardwerte,
//! fehlende Abschnitte oder Felder werden automatisch ergaenzt. Der
//! API-Schluessel des Sprach-Backends steht nie in der Datei, sondern
//! wird aus der Umgebungsvariablen `backend.api_key_env` gelesen.

use anyhow::Context;
use callbridge_audio::G711Variante;
use callbridge_protocol::realtime::TranskriptionsEinstellung;
use callbridge_realtime::{BackoffConfig, RealtimeConfig, ServerVad};
use callbridge_voice::{BargeInConfig, MedienConfig, TimingBufferConfig};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::path::Path;
use std::time::Duration;

/// Anweisungen, wenn keine Datei konfiguriert oder lesbar ist
pub const STANDARD_ANWEISUNGEN: &str =
    "Du bist ein hoeflicher Sprachassistent am Telefon. Sprich natuerlich, sachlich und kurz.";

/// Vollstaendige Server-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub netzwerk: NetzwerkEinstellungen,
    pub audio: AudioEinstellungen,
    pub puffer: PufferEinstellungen,
    pub barge_in: BargeInEinstellungen,
    pub backend: BackendEinstellungen,
    pub sitzung: SitzungsEinstellungen,
    pub logging: LoggingEinstellungen,
    pub protokoll: ProtokollEinstellungen,
}

// ---------------------------------------------------------------------------
// Abschnitte
// ---------------------------------------------------------------------------

/// Netzwerk-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct NetzwerkEinstellungen {
    /// IP-Adresse auf der gebunden wird
    pub bind_adresse: String,
    /// UDP-Port fuer RTP
    pub medien_port: u16,
    /// HTTP-Port der Call-Control-API (inkl. `/metrics`)
    pub api_port: u16,
}

impl Default for NetzwerkEinstellungen {
    fn default() -> Self {
        Self {
            bind_adresse: "0.0.0.0".to_string(),
            medien_port: 7575,
            api_port: 8888,
        }
    }
}

/// Abtastraten und Codec
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioEinstellungen {
    pub schmalband_rate: u32,
    pub breitband_rate: u32,
    pub frame_ms: u64,
    /// `pcma` (A-law) oder `pcmu` (µ-law)
    pub standard_codec: String,
}

impl Default for AudioEinstellungen {
    fn default() -> Self {
        Self {
            schmalband_rate: 8000,
            breitband_rate: 24000,
            frame_ms: 20,
            standard_codec: "pcma".to_string(),
        }
    }
}

/// Timing-Puffer fuer Ein- und Ausgang
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PufferEinstellungen {
    pub aktiviert: bool,
    pub eingang_ziel_ms: u64,
    pub eingang_max_frames: usize,
    pub ausgang_ziel_ms: u64,
    pub ausgang_max_frames: usize,
}

impl Default for PufferEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            eingang_ziel_ms: 40,
            eingang_max_frames: 200,
            ausgang_ziel_ms: 40,
            ausgang_max_frames: 3000,
        }
    }
}

/// Lokale Unterbrechungserkennung
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BargeInEinstellungen {
    pub aktiviert: bool,
    pub energie_schwelle: f32,
    pub frame_schwelle: u32,
}

impl Default for BargeInEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            energie_schwelle: 0.08,
            frame_schwelle: 2,
        }
    }
}

/// Realtime-Sprach-Backend
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendEinstellungen {
    pub url: String,
    /// Name der Umgebungsvariablen mit dem API-Schluessel
    pub api_key_env: String,
    pub modell: String,
    pub stimme: String,
    /// Sprache der Anrufer-Transkription (z.B. `de`), leer = automatisch
    pub sprache: Option<String>,
    /// Leer schaltet die Transkription ab
    pub transkriptions_modell: Option<String>,
    pub anweisungen_datei: Option<String>,
    pub vad_schwelle: f32,
    pub vad_vorlauf_ms: u32,
    pub vad_stille_ms: u32,
    /// Backend bricht Antworten bei Sprachbeginn ab (`interrupt_response`); zugleich
    /// unterbricht dessen Sprachbeginn die lokale Wiedergabe
    pub auto_unterbrechung: bool,
    pub verbindungs_timeout_s: u64,
    pub keepalive_intervall_s: u64,
    pub keepalive_timeout_s: u64,
    pub backoff_basis_ms: u64,
    pub backoff_obergrenze_ms: u64,
    pub backoff_max_versuche: u32,
    pub begruessung: bool,
    pub sende_puffer: usize,
}

impl Default for BackendEinstellungen {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".to_string(),
            api_key_env: "OPENAI_API_KEY".to_string(),
            modell: "gpt-4o-mini-realtime-preview".to_string(),
            stimme: "alloy".to_string(),
            sprache: None,
            transkriptions_modell: Some("whisper-1".to_string()),
            anweisungen_datei: Some("instructions.md".to_string()),
            vad_schwelle: 0.5,
            vad_vorlauf_ms: 300,
            vad_stille_ms: 550,
            auto_unterbrechung: true,
            verbindungs_timeout_s: 10,
            keepalive_intervall_s: 20,
            keepalive_timeout_s: 60,
            backoff_basis_ms: 1000,
            backoff_obergrenze_ms: 10_000,
            backoff_max_versuche: 10,
            begruessung: true,
            sende_puffer: 200,
        }
    }
}

/// Lebenszyklus der Sitzungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SitzungsEinstellungen {
    /// Ohne eingehende Pakete wird die Sitzung nach dieser Zeit beendet
    pub leerlauf_timeout_s: u64,
    /// Abstand der Leerlauf-Pruefung
    pub bereinigungs_intervall_s: u64,
    pub stille_beim_start: bool,
    pub eingangs_warteschlange: usize,
    pub max_sendefehler: u32,
}

impl Default for SitzungsEinstellungen {
    fn default() -> Self {
        Self {
            leerlauf_timeout_s: 60,
            bereinigungs_intervall_s: 10,
            stille_beim_start: true,
            eingangs_warteschlange: 256,
            max_sendefehler: 50,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level: trace, debug, info, warn, error
    pub level: String,
    /// Format: text oder json
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            format: "text".to_string(),
        }
    }
}

/// Gespraechsprotokolle als Datei
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ProtokollEinstellungen {
    pub aktiviert: bool,
    pub verzeichnis: String,
}

impl Default for ProtokollEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: false,
            verzeichnis: "logs/calls".to_string(),
        }
    }
}

// ---------------------------------------------------------------------------
// Laden und Umwandeln
// ---------------------------------------------------------------------------

impl ServerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        match std::fs::read_to_string(pfad) {
            Ok(inhalt) => {
                let config: Self = toml::from_str(&inhalt)
                    .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?;
                Ok(config)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Ok(Self::default())
            }
            Err(e) => Err(anyhow::anyhow!(
                "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
            )),
        }
    }

    /// UDP-Adresse fuer RTP
    pub fn medien_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.medien_port);
        text.parse()
            .with_context(|| format!("Ungueltige Medien-Adresse '{text}'"))
    }

    /// TCP-Adresse der Call-Control-API
    pub fn api_bind_adresse(&self) -> anyhow::Result<SocketAddr> {
        let text = format!("{}:{}", self.netzwerk.bind_adresse, self.netzwerk.api_port);
        text.parse()
            .with_context(|| format!("Ungueltige API-Adresse '{text}'"))
    }

    pub fn standard_codec(&self) -> anyhow::Result<G711Variante> {
        match self.audio.standard_codec.to_ascii_lowercase().as_str() {
            "pcma" | "alaw" => Ok(G711Variante::Alaw),
            "pcmu" | "ulaw" => Ok(G711Variante::Ulaw),
            andere => anyhow::bail!("Unbekannter Codec '{andere}' (erwartet pcma oder pcmu)"),
        }
    }

    /// Medien-Konfiguration fuer alle Sitzungen
    pub fn medien_config(&self) -> anyhow::Result<MedienConfig> {
        let frame_dauer = Duration::from_millis(self.audio.frame_ms.max(1));
        let puffer = |ziel_ms: u64, max_frames: usize| TimingBufferConfig {
            aktiviert: self.puffer.aktiviert,
            ziel_tiefe: Duration::from_millis(ziel_ms),
            max_frames: max_frames.max(1),
            frame_dauer,
        };

        Ok(MedienConfig {
            schmalband_rate: self.audio.schmalband_rate,
            breitband_rate: self.audio.breitband_rate,
            frame_dauer,
            standard_codec: self.standard_codec()?,
            eingang: puffer(self.puffer.eingang_ziel_ms, self.puffer.eingang_max_frames),
            ausgang: puffer(self.puffer.ausgang_ziel_ms, self.puffer.ausgang_max_frames),
            barge_in: BargeInConfig {
                aktiviert: self.barge_in.aktiviert,
                energie_schwelle: self.barge_in.energie_schwelle,
                frame_schwelle: self.barge_in.frame_schwelle,
                remote: self.backend.auto_unterbrechung,
            },
            stille_beim_start: self.sitzung.stille_beim_start,
            leerlauf_timeout: Duration::from_secs(self.sitzung.leerlauf_timeout_s),
            eingangs_warteschlange: self.sitzung.eingangs_warteschlange.max(1),
            max_sendefehler: self.sitzung.max_sendefehler,
        })
    }

    /// Sprachkanal-Konfiguration; liest API-Schluessel und Anweisungen
    pub fn realtime_config(&self) -> RealtimeConfig {
        let backend = &self.backend;
        let api_key = std::env::var(&backend.api_key_env)
            .ok()
            .filter(|k| !k.trim().is_empty());
        if api_key.is_none() {
            tracing::warn!(
                variable = %backend.api_key_env,
                "Kein API-Schluessel gesetzt, Backend-Verbindungen laufen ohne Authorization"
            );
        }

        let transkription = backend
            .transkriptions_modell
            .clone()
            .filter(|m| !m.is_empty())
            .map(|model| TranskriptionsEinstellung {
                model,
                language: backend.sprache.clone().filter(|s| !s.is_empty()),
            });

        RealtimeConfig {
            url: backend.url.clone(),
            api_key,
            modell: backend.modell.clone(),
            stimme: backend.stimme.clone(),
            anweisungen: anweisungen_laden(backend.anweisungen_datei.as_deref()),
            vad: ServerVad {
                schwelle: backend.vad_schwelle,
                vorlauf_ms: backend.vad_vorlauf_ms,
                stille_ms: backend.vad_stille_ms,
                auto_unterbrechung: backend.auto_unterbrechung,
            },
            transkription,
            begruessung: backend.begruessung,
            verbindungs_timeout: Duration::from_secs(backend.verbindungs_timeout_s),
            keepalive_intervall: Duration::from_secs(backend.keepalive_intervall_s),
            keepalive_timeout: Duration::from_secs(backend.keepalive_timeout_s),
            backoff: BackoffConfig {
                basis: Duration::from_millis(backend.backoff_basis_ms),
                obergrenze: Duration::from_millis(backend.backoff_obergrenze_ms),
                max_versuche: backend.backoff_max_versuche,
            },
            sende_puffer: backend.sende_puffer.max(1),
            ..RealtimeConfig::default()
        }
    }
}

/// Liest die Assistenten-Anweisungen; faellt bei fehlender oder leerer
/// Datei auf [`STANDARD_ANWEISUNGEN`] zurueck
pub fn anweisungen_laden(pfad: Option<&str>) -> String {
    let Some(pfad) = pfad else {
        return STANDARD_ANWEISUNGEN.to_string();
    };
    match std::fs::read_to_string(Path::new(pfad)) {
        Ok(text) if !text.trim().is_empty() => {
            let text = text.trim().to_string();
            tracing::info!(pfad, zeichen = text.len(), "Anweisungen geladen");
            text
        }
        Ok(_) => {
            tracing::warn!(pfad, "Anweisungsdatei ist leer, verwende Standardtext");
            STANDARD_ANWEISUNGEN.to_string()
        }
        Err(e) => {
            tracing::warn!(pfad, fehler = %e, "Anweisungsdatei nicht lesbar, verwende Standardtext");
            STANDARD_ANWEISUNGEN.to_string()
        }
    }
}
