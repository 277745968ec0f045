//! Call-Control-Ereignisse und Transkript-Schnittstelle
//!
//! Die Telefonanlage steuert den Lebenszyklus eines Anrufs ueber
//! [`SteuerEreignis`]. Transkripte des Sprach-Backends werden an einen
//! [`TranskriptBeobachter`] weitergereicht, der sie protokolliert oder
//! persistiert.

use crate::types::{SessionId, SessionToken};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Lebenszyklus-Ereignisse der Telefonanlage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "ereignis", rename_all = "snake_case")]
pub enum SteuerEreignis {
    /// Neuer Anruf: Token wird an die RTP-Gegenstelle gebunden
    Anlegen {
        token: SessionToken,
        gegenstelle: SocketAddr,
    },
    /// Der Anruf wurde angenommen
    Starten { token: SessionToken },
    /// Der Anruf wurde aufgelegt
    Beenden { token: SessionToken },
}

impl SteuerEreignis {
    pub fn token(&self) -> &SessionToken {
        match self {
            Self::Anlegen { token, .. } | Self::Starten { token } | Self::Beenden { token } => {
                token
            }
        }
    }
}

/// Wer gesprochen hat
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sprecher {
    Anrufer,
    Assistent,
}

impl Sprecher {
    pub fn bezeichnung(&self) -> &'static str {
        match self {
            Self::Anrufer => "USER",
            Self::Assistent => "ASSISTANT",
        }
    }
}

/// Empfaenger fuer Transkripte
///
/// Wird aus den Empfangs-Tasks der Sprachkanaele aufgerufen und darf daher
/// nicht blockieren.
pub trait TranskriptBeobachter: Send + Sync + 'static {
    /// Eine Sitzung wurde angelegt
    fn sitzung_begonnen(
        &self,
        _sitzung: SessionId,
        _token: Option<&SessionToken>,
        _gegenstelle: SocketAddr,
    ) {
    }

    /// Teil- oder Endtranskript einer Aeusserung
    fn transkript(&self, sitzung: SessionId, sprecher: Sprecher, text: &str, endgueltig: bool);

    /// Eine Sitzung wurde abgebaut
    fn sitzung_beendet(&self, _sitzung: SessionId) {}
}

/// Beobachter, der Transkripte nur ins Log schreibt
#[derive(Debug, Default, Clone, Copy)]
pub struct LogBeobachter;

impl TranskriptBeobachter for LogBeobachter {
    fn transkript(&self, sitzung: SessionId, sprecher: Sprecher, text: &str, endgueltig: bool) {
        if endgueltig {
            tracing::info!(%sitzung, sprecher = sprecher.bezeichnung(), "{}", text);
        } else {
            tracing::trace!(%sitzung, sprecher = sprecher.bezeichnung(), delta = text);
        }
    }
}
