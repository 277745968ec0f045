//! Logging-Setup via tracing-subscriber
//!
//! Level und Format stammen aus dem `[logging]`-Abschnitt der Konfiguration.
//! `CB_LOG_LEVEL` und `CB_LOG_FORMAT` ueberschreiben sie zur Laufzeit.
//!
//! Jeder Sitzungs-Task laeuft in einem eigenen Span ([`sitzungs_span`]).
//! Dessen Felder `sitzung`, `remote` und `token` haengen damit an jedem
//! Ereignis des Anrufs, ohne dass sie einzeln mitgegeben werden muessen.

use callbridge_core::{SessionId, SessionToken};
use std::net::SocketAddr;
use tracing::field;
use tracing::Span;
use tracing_subscriber::{fmt, EnvFilter};

const ENV_LEVEL: &str = "CB_LOG_LEVEL";
const ENV_FORMAT: &str = "CB_LOG_FORMAT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Text,
    Json,
}

impl LogFormat {
    pub fn parsen(s: &str) -> Option<Self> {
        match s {
            "text" => Some(Self::Text),
            "json" => Some(Self::Json),
            _ => None,
        }
    }
}

/// Aufgeloeste Logging-Einstellungen
///
/// `warnungen` sammelt ungueltige Eingaben; sie koennen erst ausgegeben
/// werden, wenn der Subscriber steht.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LogEinstellungen {
    /// EnvFilter-Direktive, z.B. `info` oder `callbridge_voice=debug,info`
    pub filter: String,
    pub format: LogFormat,
    pub warnungen: Vec<String>,
}

impl LogEinstellungen {
    /// Umgebung vor Konfiguration; ungueltiges faellt auf `info`/`text` zurueck
    pub fn aufloesen(
        level: &str,
        format: &str,
        env_level: Option<String>,
        env_format: Option<String>,
    ) -> Self {
        let mut warnungen = Vec::new();

        let filter = env_level.unwrap_or_else(|| level.to_string());
        let filter = if EnvFilter::try_new(&filter).is_ok() && !filter.trim().is_empty() {
            filter
        } else {
            warnungen.push(format!("Ungueltiger Log-Level '{filter}', verwende 'info'"));
            "info".to_string()
        };

        let format_text = env_format.unwrap_or_else(|| format.to_string());
        let format = LogFormat::parsen(&format_text).unwrap_or_else(|| {
            warnungen.push(format!("Unbekanntes Log-Format '{format_text}', verwende 'text'"));
            LogFormat::Text
        });

        Self {
            filter,
            format,
            warnungen,
        }
    }

    pub fn aus_umgebung(level: &str, format: &str) -> Self {
        Self::aufloesen(
            level,
            format,
            std::env::var(ENV_LEVEL).ok(),
            std::env::var(ENV_FORMAT).ok(),
        )
    }
}

/// Initialisiert den globalen Subscriber
///
/// Ein bereits gesetzter Subscriber (Tests) bleibt bestehen.
pub fn logging_initialisieren(level: &str, format: &str) {
    let einstellungen = LogEinstellungen::aus_umgebung(level, format);
    let filter = EnvFilter::new(&einstellungen.filter);

    let ergebnis = match einstellungen.format {
        LogFormat::Json => fmt()
            .json()
            .with_env_filter(filter)
            .with_current_span(true)
            .with_span_list(false)
            .try_init(),
        LogFormat::Text => fmt().with_env_filter(filter).with_target(false).try_init(),
    };

    if ergebnis.is_err() {
        tracing::debug!("Logging war bereits initialisiert");
        return;
    }
    for warnung in &einstellungen.warnungen {
        tracing::warn!("{warnung}");
    }
}

// ---------------------------------------------------------------------------
// Sitzungs-Spans
// ---------------------------------------------------------------------------

/// Span eines Anrufs; `token` bleibt leer, bis die Steuerebene eines vergibt
pub fn sitzungs_span(sitzung: SessionId, remote: SocketAddr, token: Option<&SessionToken>) -> Span {
    let span = tracing::info_span!(
        "sitzung",
        sitzung = %sitzung,
        remote = %remote,
        token = field::Empty,
    );
    if let Some(token) = token {
        token_aufzeichnen(&span, token);
    }
    span
}

/// Traegt ein (neues) Token in einen Sitzungs-Span ein
pub fn token_aufzeichnen(span: &Span, token: &SessionToken) {
    span.record("token", field::display(token));
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io;
    use std::sync::{Arc, Mutex};

    #[derive(Clone, Default)]
    struct Mitschrift(Arc<Mutex<Vec<u8>>>);

    impl io::Write for Mitschrift {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Mitschrift {
        fn text(&self) -> String {
            String::from_utf8_lossy(&self.0.lock().unwrap()).to_string()
        }
    }

    fn mitschneiden(f: impl FnOnce()) -> String {
        let mitschrift = Mitschrift::default();
        let schreiber = mitschrift.clone();
        let subscriber = fmt()
            .with_writer(move || schreiber.clone())
            .with_ansi(false)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        mitschrift.text()
    }

    #[test]
    fn konfiguration_gilt_ohne_umgebung() {
        let e = LogEinstellungen::aufloesen("debug", "json", None, None);
        assert_eq!(e.filter, "debug");
        assert_eq!(e.format, LogFormat::Json);
        assert!(e.warnungen.is_empty());
    }

    #[test]
    fn umgebung_ueberschreibt_konfiguration() {
        let e = LogEinstellungen::aufloesen(
            "info",
            "text",
            Some("callbridge_voice=trace,warn".into()),
            Some("json".into()),
        );
        assert_eq!(e.filter, "callbridge_voice=trace,warn");
        assert_eq!(e.format, LogFormat::Json);
    }

    #[test]
    fn ungueltiges_faellt_zurueck_mit_warnung() {
        let e = LogEinstellungen::aufloesen("", "xml", None, None);
        assert_eq!(e.filter, "info");
        assert_eq!(e.format, LogFormat::Text);
        assert_eq!(e.warnungen.len(), 2);

        let e = LogEinstellungen::aufloesen("info", "JSON", None, None);
        assert_eq!(e.format, LogFormat::Text);
        assert_eq!(e.warnungen.len(), 1);
    }

    #[test]
    fn sitzungs_span_traegt_felder() {
        let id = SessionId::new();
        let text = mitschneiden(|| {
            let span = sitzungs_span(
                id,
                "127.0.0.1:40000".parse().unwrap(),
                Some(&SessionToken::from("abc123")),
            );
            let _g = span.enter();
            tracing::info!("Paket empfangen");
        });
        assert!(text.contains("Paket empfangen"));
        assert!(text.contains("remote=127.0.0.1:40000"));
        assert!(text.contains("token=abc123"));
        assert!(text.contains(&id.to_string()));
    }

    #[test]
    fn token_wird_nachgetragen() {
        let text = mitschneiden(|| {
            let span = sitzungs_span(SessionId::new(), "10.0.0.5:7000".parse().unwrap(), None);
            let _g = span.enter();
            tracing::info!("vor Anmeldung");
            token_aufzeichnen(&span, &SessionToken::from("spaet"));
            tracing::info!("nach Anmeldung");
        });
        let zeilen: Vec<&str> = text.lines().collect();
        assert_eq!(zeilen.len(), 2);
        assert!(!zeilen[0].contains("token="));
        assert!(zeilen[1].contains("token=spaet"));
    }

    #[test]
    fn mehrfaches_initialisieren_ist_harmlos() {
        logging_initialisieren("info", "text");
        logging_initialisieren("debug", "json");
    }
}
