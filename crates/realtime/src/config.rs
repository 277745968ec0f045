//! Konfiguration des Sprachkanals
//!
//! Wird einmal beim Serverstart aus der TOML-Konfiguration gebaut und von
//! allen Sitzungen geteilt (`Arc<RealtimeConfig>`).

use callbridge_protocol::realtime::{
    AntwortOptionen, ClientNachricht, SitzungsKonfiguration, SprachErkennung,
    TranskriptionsEinstellung, FORMAT_PCM16,
};
use std::time::Duration;

use crate::backoff::BackoffConfig;

/// Serverseitige Sprecherkennung des Backends
#[derive(Debug, Clone, PartialEq)]
pub struct ServerVad {
    pub schwelle: f32,
    pub vorlauf_ms: u32,
    pub stille_ms: u32,
    /// Backend unterbricht seine Antwort selbst, wenn der Anrufer spricht
    pub auto_unterbrechung: bool,
}

impl Default for ServerVad {
    fn default() -> Self {
        Self {
            schwelle: 0.5,
            vorlauf_ms: 500,
            stille_ms: 800,
            auto_unterbrechung: true,
        }
    }
}

/// Alles, was ein Sprachkanal zum Verbinden und Konfigurieren braucht
#[derive(Debug, Clone)]
pub struct RealtimeConfig {
    /// WebSocket-Endpunkt ohne Query, z.B. `wss://api.openai.com/v1/realtime`
    pub url: String,
    /// Bearer-Token; ohne Schluessel wird kein Authorization-Header gesendet
    pub api_key: Option<String>,
    pub modell: String,
    pub stimme: String,
    pub anweisungen: String,
    pub modalitaeten: Vec<String>,
    pub vad: ServerVad,
    /// `None` schaltet die Transkription des Anrufer-Audios ab
    pub transkription: Option<TranskriptionsEinstellung>,
    /// Nach dem Konfigurieren sofort eine Antwort anfordern
    pub begruessung: bool,
    pub verbindungs_timeout: Duration,
    pub keepalive_intervall: Duration,
    /// Ohne eingehende Daten fuer diese Dauer gilt die Verbindung als tot
    pub keepalive_timeout: Duration,
    pub backoff: BackoffConfig,
    /// Kapazitaet der Audio-Sendewarteschlange (Frames)
    pub sende_puffer: usize,
    /// Kapazitaet der Ereigniswarteschlange zur Sitzung
    pub ereignis_puffer: usize,
}

impl Default for RealtimeConfig {
    fn default() -> Self {
        Self {
            url: "wss://api.openai.com/v1/realtime".into(),
            api_key: None,
            modell: "gpt-4o-mini-realtime-preview".into(),
            stimme: "alloy".into(),
            anweisungen: "Du bist ein freundlicher Telefonassistent. Antworte kurz.".into(),
            modalitaeten: vec!["audio".into(), "text".into()],
            vad: ServerVad::default(),
            transkription: Some(TranskriptionsEinstellung {
                model: "whisper-1".into(),
                language: None,
            }),
            begruessung: true,
            verbindungs_timeout: Duration::from_secs(10),
            keepalive_intervall: Duration::from_secs(20),
            keepalive_timeout: Duration::from_secs(60),
            backoff: BackoffConfig::default(),
            sende_puffer: 200,
            ereignis_puffer: 256,
        }
    }
}

impl RealtimeConfig {
    /// Vollstaendige Verbindungs-URL inklusive Modell-Parameter
    pub fn endpunkt(&self) -> String {
        if self.url.contains('?') || self.modell.is_empty() {
            self.url.clone()
        } else {
            format!("{}?model={}", self.url, self.modell)
        }
    }

    /// `session.update`, wie es nach jedem Verbindungsaufbau gesendet wird
    pub fn konfigurations_nachricht(&self) -> ClientNachricht {
        ClientNachricht::SitzungAktualisieren {
            session: SitzungsKonfiguration {
                model: Some(self.modell.clone()).filter(|m| !m.is_empty()),
                instructions: self.anweisungen.clone(),
                modalities: self.modalitaeten.clone(),
                voice: self.stimme.clone(),
                input_audio_format: FORMAT_PCM16.into(),
                output_audio_format: FORMAT_PCM16.into(),
                turn_detection: SprachErkennung {
                    art: "server_vad".into(),
                    threshold: self.vad.schwelle,
                    prefix_padding_ms: self.vad.vorlauf_ms,
                    silence_duration_ms: self.vad.stille_ms,
                    interrupt_response: self.vad.auto_unterbrechung,
                    create_response: true,
                },
                input_audio_transcription: self.transkription.clone(),
            },
        }
    }

    /// `response.create` fuer die Begruessung
    pub fn begruessungs_nachricht(&self) -> ClientNachricht {
        ClientNachricht::AntwortAnfordern {
            response: AntwortOptionen {
                modalities: self.modalitaeten.clone(),
            },
        }
    }
}
