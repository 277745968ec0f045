//! # callbridge-observability
//!
//! Observability-Crate fuer Callbridge:
//! - Prometheus-kompatible Metriken (`/metrics`)
//! - Structured Logging via tracing-subscriber (Text oder JSON)
//! - Gespraechsprotokolle pro Anruf
//! - Anfrage-Logging fuer die Steuer-API

pub mod logging;
pub mod metrics;
pub mod middleware;
pub mod transkript;

pub use logging::{
    logging_initialisieren, sitzungs_span, token_aufzeichnen, LogEinstellungen, LogFormat,
};
pub use metrics::{metrics_router, BridgeMetrics, VerwerfGrund};
pub use middleware::{anfrage_protokollieren, trace_layer};
pub use transkript::GespraechsProtokoll;
