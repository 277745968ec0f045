//! Anfrage-Logging fuer die Steuer-API
//!
//! Jede HTTP-Anfrage der Telefonanlage wird mit Methode, Pfad, Status und
//! Dauer als strukturiertes Log-Event festgehalten. Fehlerantworten (4xx/5xx)
//! landen auf `warn`, alles andere auf `info`.

use axum::{
    body::Body,
    http::{Request, Response, StatusCode},
    middleware::Next,
};
use std::time::Instant;
use tower_http::classify::{ServerErrorsAsFailures, SharedClassifier};
use tower_http::trace::TraceLayer;

/// Tracing-Spans pro Anfrage (Details auf `debug`)
pub fn trace_layer() -> TraceLayer<SharedClassifier<ServerErrorsAsFailures>> {
    TraceLayer::new_for_http()
}

/// Axum-Middleware-Funktion: misst Antwortzeit und loggt strukturiert.
///
/// ```ignore
/// Router::new()
///     .route("/register", post(handler))
///     .layer(axum::middleware::from_fn(anfrage_protokollieren))
/// ```
pub async fn anfrage_protokollieren(req: Request<Body>, next: Next) -> Response<Body> {
    let methode = req.method().clone();
    let pfad = req.uri().path().to_string();
    let start = Instant::now();

    let antwort = next.run(req).await;

    let dauer_ms = start.elapsed().as_millis() as u64;
    let status = antwort.status();
    if ist_fehler(status) {
        tracing::warn!(
            methode = %methode,
            pfad = %pfad,
            status = status.as_u16(),
            dauer_ms,
            "Steuer-Anfrage abgelehnt"
        );
    } else {
        tracing::info!(
            methode = %methode,
            pfad = %pfad,
            status = status.as_u16(),
            dauer_ms,
            "Steuer-Anfrage bearbeitet"
        );
    }

    antwort
}

fn ist_fehler(status: StatusCode) -> bool {
    status.is_client_error() || status.is_server_error()
}
