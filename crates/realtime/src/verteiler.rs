//! Zuordnung der Backend-Ereignisse
//!
//! Uebersetzt [`ServerEreignis`] in die schmale Ereignismenge, die eine
//! Sitzung braucht ([`KanalEreignis`]). Transkripte gehen nicht an die
//! Sitzung, sondern direkt an den [`TranskriptBeobachter`].

use bytes::Bytes;
use callbridge_core::{SessionId, Sprecher, TranskriptBeobachter};
use callbridge_protocol::realtime::{audio_dekodieren, ServerEreignis};
use std::collections::HashMap;
use std::sync::Arc;

use crate::kanal::KanalEreignis;

/// Zustandsbehafteter Uebersetzer fuer einen Kanal
pub struct EreignisVerteiler {
    sitzung: SessionId,
    beobachter: Arc<dyn TranskriptBeobachter>,
    /// Teiltranskripte des Assistenten pro Antwort-ID
    assistent: HashMap<String, String>,
    /// Teiltranskripte des Anrufers pro Item-ID
    anrufer: HashMap<String, String>,
    /// `session.updated` gesehen, noch nicht abgeholt
    konfiguriert: bool,
}

impl EreignisVerteiler {
    pub fn neu(sitzung: SessionId, beobachter: Arc<dyn TranskriptBeobachter>) -> Self {
        Self {
            sitzung,
            beobachter,
            assistent: HashMap::new(),
            anrufer: HashMap::new(),
            konfiguriert: false,
        }
    }

    /// Verarbeitet einen JSON-Text vom Backend
    pub fn text_verarbeiten(&mut self, text: &str) -> Option<KanalEreignis> {
        match ServerEreignis::aus_json(text) {
            Ok(ereignis) => self.verarbeiten(ereignis),
            Err(e) => {
                tracing::warn!(sitzung = %self.sitzung, "Unlesbares Backend-Ereignis: {}", e);
                None
            }
        }
    }

    pub fn verarbeiten(&mut self, ereignis: ServerEreignis) -> Option<KanalEreignis> {
        match ereignis {
            ServerEreignis::SitzungErstellt => {
                tracing::debug!(sitzung = %self.sitzung, "Backend-Sitzung erstellt");
                None
            }
            ServerEreignis::SitzungAktualisiert => {
                tracing::info!(sitzung = %self.sitzung, "Backend-Sitzung konfiguriert");
                self.konfiguriert = true;
                None
            }
            ServerEreignis::SpracheBegonnen { .. } => Some(KanalEreignis::SpracheBegonnen),
            ServerEreignis::SpracheBeendet { .. } => Some(KanalEreignis::SpracheBeendet),
            ServerEreignis::AntwortErstellt { response } => Some(KanalEreignis::AntwortErstellt {
                antwort_id: response.id,
            }),
            ServerEreignis::AudioDelta { response_id, delta } => {
                if delta.is_empty() {
                    return None;
                }
                match audio_dekodieren(&delta) {
                    Ok(pcm) => Some(KanalEreignis::Audio {
                        antwort_id: response_id,
                        pcm: Bytes::from(pcm),
                    }),
                    Err(e) => {
                        tracing::warn!(sitzung = %self.sitzung, "Audio-Delta nicht dekodierbar: {}", e);
                        None
                    }
                }
            }
            ServerEreignis::AssistentTranskriptDelta { response_id, delta } => {
                self.beobachter
                    .transkript(self.sitzung, Sprecher::Assistent, &delta, false);
                self.assistent
                    .entry(response_id.unwrap_or_default())
                    .or_default()
                    .push_str(&delta);
                None
            }
            ServerEreignis::AssistentTranskriptFertig {
                response_id,
                transcript,
            } => {
                let gesammelt = self.assistent.remove(&response_id.unwrap_or_default());
                let text = transcript.filter(|t| !t.is_empty()).or(gesammelt);
                if let Some(text) = text {
                    self.beobachter
                        .transkript(self.sitzung, Sprecher::Assistent, &text, true);
                }
                None
            }
            ServerEreignis::AnruferTranskriptDelta { item_id, delta } => {
                self.beobachter
                    .transkript(self.sitzung, Sprecher::Anrufer, &delta, false);
                self.anrufer
                    .entry(item_id.unwrap_or_default())
                    .or_default()
                    .push_str(&delta);
                None
            }
            ServerEreignis::AnruferTranskriptFertig {
                item_id,
                transcript,
            } => {
                let gesammelt = self.anrufer.remove(&item_id.unwrap_or_default());
                let text = transcript.filter(|t| !t.is_empty()).or(gesammelt);
                if let Some(text) = text {
                    self.beobachter
                        .transkript(self.sitzung, Sprecher::Anrufer, &text, true);
                }
                None
            }
            ServerEreignis::AntwortFertig { response } => {
                let info = response.unwrap_or_default();
                if let Some(status) = info.status.as_deref() {
                    if status != "completed" {
                        tracing::info!(sitzung = %self.sitzung, status, "Antwort nicht vollstaendig");
                    }
                }
                Some(KanalEreignis::AntwortFertig {
                    antwort_id: info.id,
                })
            }
            ServerEreignis::AntwortAbgebrochen { response } => {
                let info = response.unwrap_or_default();
                tracing::info!(sitzung = %self.sitzung, antwort = ?info.id, "Antwort abgebrochen");
                Some(KanalEreignis::AntwortFertig {
                    antwort_id: info.id,
                })
            }
            ServerEreignis::Fehler { error } => {
                tracing::warn!(
                    sitzung = %self.sitzung,
                    art = ?error.art,
                    code = ?error.code,
                    "Backend-Fehler: {}",
                    error.message.as_deref().unwrap_or("-")
                );
                None
            }
            ServerEreignis::Unbekannt => None,
        }
    }

    /// Verwirft gesammelte Teiltranskripte, z.B. nach Verbindungsverlust
    pub fn zuruecksetzen(&mut self) {
        self.assistent.clear();
        self.anrufer.clear();
        self.konfiguriert = false;
    }

    /// `true` genau einmal nach jedem `session.updated`
    pub fn konfiguration_bestaetigt(&mut self) -> bool {
        std::mem::take(&mut self.konfiguriert)
    }
}
