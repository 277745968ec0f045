//! Prometheus-kompatible Metriken fuer Callbridge
//!
//! Registrierte Metriken:
//! - `callbridge_sessions_active` – Gauge: Laufende Anrufsitzungen
//! - `callbridge_rtp_packets_received_total` – Counter: Empfangene RTP-Pakete
//! - `callbridge_rtp_packets_sent_total` – Counter: Gesendete RTP-Pakete
//! - `callbridge_rtp_packets_invalid_total` – Counter: Nicht parsebare Datagramme
//! - `callbridge_frames_dropped_total` – Counter: Verworfene Frames (grund)
//! - `callbridge_barge_ins_total` – Counter: Unterbrechungen (quelle)
//! - `callbridge_backend_reconnects_total` – Counter: Verbindungsabbrueche zum Backend

use anyhow::Result;
use axum::{response::IntoResponse, routing::get, Router};
use prometheus::{Encoder, IntCounter, IntCounterVec, IntGauge, Opts, Registry, TextEncoder};
use std::sync::Arc;

/// Warum ein Frame verworfen wurde
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerwerfGrund {
    /// Eingangspuffer voll, aeltester Frame verworfen
    EingangUeberlauf,
    /// Ausgangspuffer voll, aeltester Frame verworfen
    AusgangUeberlauf,
    /// Backend nicht verbunden, Anrufer-Audio verworfen
    BackendNichtBereit,
    /// Payload-Typ nicht G.711
    PayloadTyp,
    /// Audio einer abgebrochenen oder fremden Antwort
    VeralteteAntwort,
    /// Sitzungs-Warteschlange voll
    SitzungUeberlastet,
}

impl VerwerfGrund {
    pub fn label(&self) -> &'static str {
        match self {
            Self::EingangUeberlauf => "ingress_overflow",
            Self::AusgangUeberlauf => "egress_overflow",
            Self::BackendNichtBereit => "backend_not_ready",
            Self::PayloadTyp => "payload_type",
            Self::VeralteteAntwort => "stale_response",
            Self::SitzungUeberlastet => "session_overloaded",
        }
    }
}

/// Alle Callbridge-Prometheus-Metriken
#[derive(Clone)]
pub struct BridgeMetrics {
    pub registry: Arc<Registry>,

    pub sessions_active: IntGauge,
    pub rtp_packets_received: IntCounter,
    pub rtp_packets_sent: IntCounter,
    pub rtp_packets_invalid: IntCounter,
    pub frames_dropped: IntCounterVec,
    pub barge_ins: IntCounterVec,
    pub backend_reconnects: IntCounter,
}

impl BridgeMetrics {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        let sessions_active = IntGauge::with_opts(Opts::new(
            "callbridge_sessions_active",
            "Anzahl laufender Anrufsitzungen",
        ))?;
        registry.register(Box::new(sessions_active.clone()))?;

        // --- RTP ---
        let rtp_packets_received = IntCounter::with_opts(Opts::new(
            "callbridge_rtp_packets_received_total",
            "Gesamtanzahl empfangener RTP-Pakete",
        ))?;
        registry.register(Box::new(rtp_packets_received.clone()))?;

        let rtp_packets_sent = IntCounter::with_opts(Opts::new(
            "callbridge_rtp_packets_sent_total",
            "Gesamtanzahl gesendeter RTP-Pakete",
        ))?;
        registry.register(Box::new(rtp_packets_sent.clone()))?;

        let rtp_packets_invalid = IntCounter::with_opts(Opts::new(
            "callbridge_rtp_packets_invalid_total",
            "Datagramme, die nicht als RTP gelesen werden konnten",
        ))?;
        registry.register(Box::new(rtp_packets_invalid.clone()))?;

        let frames_dropped = IntCounterVec::new(
            Opts::new("callbridge_frames_dropped_total", "Verworfene Audio-Frames"),
            &["reason"],
        )?;
        registry.register(Box::new(frames_dropped.clone()))?;

        // --- Gespraechssteuerung ---
        let barge_ins = IntCounterVec::new(
            Opts::new(
                "callbridge_barge_ins_total",
                "Unterbrechungen der Wiedergabe durch den Anrufer",
            ),
            &["source"],
        )?;
        registry.register(Box::new(barge_ins.clone()))?;

        let backend_reconnects = IntCounter::with_opts(Opts::new(
            "callbridge_backend_reconnects_total",
            "Verbindungsabbrueche zum Sprach-Backend",
        ))?;
        registry.register(Box::new(backend_reconnects.clone()))?;

        Ok(Self {
            registry: Arc::new(registry),
            sessions_active,
            rtp_packets_received,
            rtp_packets_sent,
            rtp_packets_invalid,
            frames_dropped,
            barge_ins,
            backend_reconnects,
        })
    }

    pub fn frame_verworfen(&self, grund: VerwerfGrund, anzahl: u64) {
        if anzahl > 0 {
            self.frames_dropped
                .with_label_values(&[grund.label()])
                .inc_by(anzahl);
        }
    }

    /// Zaehlt eine Unterbrechung; `lokal` = eigene Energieerkennung
    pub fn barge_in(&self, lokal: bool) {
        let quelle = if lokal { "local" } else { "remote" };
        self.barge_ins.with_label_values(&[quelle]).inc();
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: BridgeMetrics) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(
    axum::extract::State(metriken): axum::extract::State<BridgeMetrics>,
) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
