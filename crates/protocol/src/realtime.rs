//! Nachrichten des Realtime-Sprach-Backends (JSON ueber WebSocket)
//!
//! Jede Nachricht ist ein JSON-Objekt mit einem `type`-Feld. Audio wird in
//! beide Richtungen als Base64-kodiertes PCM16 (little-endian, mono)
//! uebertragen.
//!
//! Unbekannte Ereignistypen werden als [`ServerEreignis::Unbekannt`]
//! gelesen statt als Fehler behandelt, damit neue Backend-Versionen den
//! Kanal nicht abreissen lassen.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use serde::{Deserialize, Serialize};

/// Audioformat-Bezeichner fuer PCM16
pub const FORMAT_PCM16: &str = "pcm16";

// ---------------------------------------------------------------------------
// Ausgehend (Bruecke -> Backend)
// ---------------------------------------------------------------------------

/// Nachrichten, die die Bruecke an das Backend schickt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientNachricht {
    /// Sitzungskonfiguration, wird nach jedem (Wieder-)Verbindungsaufbau gesendet
    #[serde(rename = "session.update")]
    SitzungAktualisieren { session: SitzungsKonfiguration },

    /// Ein Stueck Anrufer-Audio (Base64 PCM16)
    #[serde(rename = "input_audio_buffer.append")]
    AudioAnhaengen { audio: String },

    /// Fordert eine Antwort an, z.B. fuer die Begruessung
    #[serde(rename = "response.create")]
    AntwortAnfordern { response: AntwortOptionen },
}

impl ClientNachricht {
    /// Baut eine `input_audio_buffer.append`-Nachricht aus PCM16-LE-Bytes
    pub fn audio(pcm16_le: &[u8]) -> Self {
        Self::AudioAnhaengen {
            audio: STANDARD.encode(pcm16_le),
        }
    }

    /// Serialisiert die Nachricht als JSON-Text
    pub fn als_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Inhalt von `session.update`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SitzungsKonfiguration {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub model: Option<String>,
    pub instructions: String,
    pub modalities: Vec<String>,
    pub voice: String,
    pub input_audio_format: String,
    pub output_audio_format: String,
    pub turn_detection: SprachErkennung,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub input_audio_transcription: Option<TranskriptionsEinstellung>,
}

/// Serverseitige Sprecherkennung (`server_vad`)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SprachErkennung {
    #[serde(rename = "type")]
    pub art: String,
    pub threshold: f32,
    pub prefix_padding_ms: u32,
    pub silence_duration_ms: u32,
    /// Backend bricht eine laufende Antwort ab, sobald der Anrufer spricht
    #[serde(default = "wahr")]
    pub interrupt_response: bool,
    /// Backend erzeugt nach Ende eines Sprecherbeitrags selbst eine Antwort
    #[serde(default = "wahr")]
    pub create_response: bool,
}

fn wahr() -> bool {
    true
}

/// Einstellungen fuer die Transkription des Anrufer-Audios
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TranskriptionsEinstellung {
    pub model: String,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub language: Option<String>,
}

/// Inhalt von `response.create`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AntwortOptionen {
    pub modalities: Vec<String>,
}

// ---------------------------------------------------------------------------
// Eingehend (Backend -> Bruecke)
// ---------------------------------------------------------------------------

/// Metadaten einer Antwort (`response.created`, `response.done`)
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct AntwortInfo {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// Fehlerbeschreibung des Backends
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct FehlerInfo {
    #[serde(default, rename = "type")]
    pub art: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Ereignisse, die vom Backend kommen
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEreignis {
    #[serde(rename = "session.created")]
    SitzungErstellt,

    #[serde(rename = "session.updated")]
    SitzungAktualisiert,

    /// Serverseitige VAD hat Sprache des Anrufers erkannt
    #[serde(rename = "input_audio_buffer.speech_started")]
    SpracheBegonnen {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "input_audio_buffer.speech_stopped")]
    SpracheBeendet {
        #[serde(default)]
        item_id: Option<String>,
    },

    #[serde(rename = "response.created")]
    AntwortErstellt {
        #[serde(default)]
        response: AntwortInfo,
    },

    /// Ein Stueck Antwort-Audio (Base64 PCM16)
    #[serde(rename = "response.audio.delta", alias = "response.output_audio.delta")]
    AudioDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.delta")]
    AssistentTranskriptDelta {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "response.audio_transcript.done")]
    AssistentTranskriptFertig {
        #[serde(default)]
        response_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.delta")]
    AnruferTranskriptDelta {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        delta: String,
    },

    #[serde(rename = "conversation.item.input_audio_transcription.completed")]
    AnruferTranskriptFertig {
        #[serde(default)]
        item_id: Option<String>,
        #[serde(default)]
        transcript: Option<String>,
    },

    /// Antwort abgeschlossen (auch `response.completed` bei aelteren Versionen)
    #[serde(rename = "response.done", alias = "response.completed")]
    AntwortFertig {
        #[serde(default)]
        response: Option<AntwortInfo>,
    },

    #[serde(rename = "response.cancelled")]
    AntwortAbgebrochen {
        #[serde(default)]
        response: Option<AntwortInfo>,
    },

    #[serde(rename = "error")]
    Fehler {
        #[serde(default)]
        error: FehlerInfo,
    },

    #[serde(other)]
    Unbekannt,
}

impl ServerEreignis {
    /// Parst ein Ereignis aus einem JSON-Text
    pub fn aus_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }
}

/// Dekodiert Base64-Audio aus einem Delta-Ereignis
pub fn audio_dekodieren(delta: &str) -> Result<Vec<u8>, base64::DecodeError> {
    STANDARD.decode(delta)
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
