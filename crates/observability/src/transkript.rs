//! Gespraechsprotokolle
//!
//! Schreibt die endgueltigen Transkripte jedes Anrufs ins Log und optional
//! in eine eigene Datei `call_<zeitstempel>_<token8>.txt` mit Kopf- und
//! Fusszeile. Teiltranskripte landen nur auf `trace`-Level im Log.

use callbridge_core::{LogBeobachter, SessionId, SessionToken, Sprecher, TranskriptBeobachter};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

/// Transkript-Beobachter mit optionaler Dateiablage
pub struct GespraechsProtokoll {
    verzeichnis: Option<PathBuf>,
    dateien: Mutex<HashMap<SessionId, File>>,
}

impl GespraechsProtokoll {
    /// Nur Logging, keine Dateien
    pub fn nur_log() -> Self {
        Self {
            verzeichnis: None,
            dateien: Mutex::new(HashMap::new()),
        }
    }

    /// Legt das Verzeichnis bei Bedarf an
    pub fn mit_verzeichnis(verzeichnis: impl Into<PathBuf>) -> std::io::Result<Self> {
        let verzeichnis = verzeichnis.into();
        fs::create_dir_all(&verzeichnis)?;
        Ok(Self {
            verzeichnis: Some(verzeichnis),
            dateien: Mutex::new(HashMap::new()),
        })
    }

    pub fn verzeichnis(&self) -> Option<&Path> {
        self.verzeichnis.as_deref()
    }

    /// Anzahl aktuell offener Protokolldateien
    pub fn offene_dateien(&self) -> usize {
        self.dateien.lock().len()
    }

    fn dateiname(sitzung: SessionId, token: Option<&SessionToken>) -> String {
        let zeit = chrono::Local::now().format("%Y%m%d_%H%M%S");
        let kennung = match token {
            Some(t) => t.kurz().to_string(),
            None => sitzung.inner().simple().to_string()[..8].to_string(),
        };
        format!("call_{}_{}.txt", zeit, kennung)
    }
}

impl TranskriptBeobachter for GespraechsProtokoll {
    fn sitzung_begonnen(
        &self,
        sitzung: SessionId,
        token: Option<&SessionToken>,
        gegenstelle: SocketAddr,
    ) {
        let Some(verzeichnis) = &self.verzeichnis else {
            return;
        };

        let pfad = verzeichnis.join(Self::dateiname(sitzung, token));
        let datei = OpenOptions::new().create(true).append(true).open(&pfad);
        match datei {
            Ok(mut datei) => {
                let kopf = format!(
                    "# Anruf {} von {} (token={})\n",
                    chrono::Local::now().to_rfc3339(),
                    gegenstelle,
                    token.map(|t| t.as_str()).unwrap_or("-"),
                );
                if let Err(e) = datei.write_all(kopf.as_bytes()) {
                    tracing::warn!(%sitzung, pfad = %pfad.display(), "Protokollkopf nicht schreibbar: {}", e);
                }
                self.dateien.lock().insert(sitzung, datei);
            }
            Err(e) => {
                tracing::warn!(%sitzung, pfad = %pfad.display(), "Protokolldatei nicht anlegbar: {}", e);
            }
        }
    }

    fn transkript(&self, sitzung: SessionId, sprecher: Sprecher, text: &str, endgueltig: bool) {
        LogBeobachter.transkript(sitzung, sprecher, text, endgueltig);

        if !endgueltig || text.trim().is_empty() {
            return;
        }

        let mut dateien = self.dateien.lock();
        if let Some(datei) = dateien.get_mut(&sitzung) {
            let zeile = format!(
                "[{}] {}: {}\n",
                chrono::Local::now().format("%H:%M:%S"),
                sprecher.bezeichnung(),
                text.trim()
            );
            if let Err(e) = datei.write_all(zeile.as_bytes()) {
                tracing::warn!(%sitzung, "Transkript nicht schreibbar: {}", e);
            }
        }
    }

    fn sitzung_beendet(&self, sitzung: SessionId) {
        if let Some(mut datei) = self.dateien.lock().remove(&sitzung) {
            let fuss = format!("# Ende {}\n", chrono::Local::now().to_rfc3339());
            if let Err(e) = datei.write_all(fuss.as_bytes()).and_then(|_| datei.flush()) {
                tracing::warn!(%sitzung, "Protokoll nicht abschliessbar: {}", e);
            }
        }
    }
}
