//! Call-Control REST-API
//!
//! Die Telefonanlage meldet hier den Lebenszyklus eines Anrufs:
//!
//! | Methode | Pfad          | Koerper                          |
//! |---------|---------------|----------------------------------|
//! | POST    | `/register`   | `{ip, port, session_uuid}`       |
//! | POST    | `/start`      | `{session_uuid}`                 |
//! | POST    | `/unregister` | `{session_uuid}`                 |
//!
//! Jede Anfrage wird in ein [`SteuerEreignis`] uebersetzt und auf das
//! [`SessionDirectory`] angewendet.

use axum::{
    extract::{rejection::JsonRejection, State},
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::post,
    Router,
};
use callbridge_core::{BridgeError, SessionId, SessionToken, SteuerEreignis};
use callbridge_voice::SessionDirectory;
use serde::Deserialize;
use serde_json::json;
use std::net::{IpAddr, SocketAddr};

/// Axum-State der Steuer-API
#[derive(Clone)]
pub struct SteuerState {
    pub verzeichnis: SessionDirectory,
}

/// Erstellt den Router mit allen Steuer-Endpunkten
pub fn steuer_router(verzeichnis: SessionDirectory) -> Router {
    Router::new()
        .route("/register", post(registrieren))
        .route("/start", post(starten))
        .route("/unregister", post(abmelden))
        .with_state(SteuerState { verzeichnis })
}

/// Wendet ein Steuerereignis auf das Verzeichnis an
pub fn steuern(
    verzeichnis: &SessionDirectory,
    ereignis: SteuerEreignis,
) -> callbridge_core::Result<SessionId> {
    match ereignis {
        SteuerEreignis::Anlegen { token, gegenstelle } => {
            Ok(verzeichnis.sitzung_anlegen(token, gegenstelle).id())
        }
        SteuerEreignis::Starten { token } => verzeichnis.sitzung_starten(&token),
        SteuerEreignis::Beenden { token } => verzeichnis.sitzung_beenden(&token),
    }
}

// ---------------------------------------------------------------------------
// Anfragen
// ---------------------------------------------------------------------------

#[derive(Debug, Deserialize)]
pub struct RegistrierAnfrage {
    pub ip: Option<String>,
    pub port: Option<u16>,
    pub session_uuid: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct TokenAnfrage {
    pub session_uuid: Option<String>,
}

fn fehler(status: StatusCode, nachricht: impl Into<String>) -> Response {
    (status, Json(json!({ "error": nachricht.into() }))).into_response()
}

fn token_aus(session_uuid: Option<String>) -> Result<SessionToken, Response> {
    session_uuid
        .filter(|t| !t.trim().is_empty())
        .map(SessionToken::new)
        .ok_or_else(|| fehler(StatusCode::BAD_REQUEST, "Missing session_uuid"))
}

fn sitzungsfehler(e: BridgeError) -> Response {
    match e {
        BridgeError::SitzungNichtGefunden(token) => fehler(
            StatusCode::NOT_FOUND,
            format!("Session not found: {token}"),
        ),
        BridgeError::SitzungBeendet(token) => {
            fehler(StatusCode::GONE, format!("Session ended: {token}"))
        }
        andere => {
            tracing::error!(fehler = %andere, "Steuerereignis fehlgeschlagen");
            fehler(StatusCode::INTERNAL_SERVER_ERROR, andere.to_string())
        }
    }
}

// ---------------------------------------------------------------------------
// Handler
// ---------------------------------------------------------------------------

/// POST /register
pub async fn registrieren(
    State(state): State<SteuerState>,
    anfrage: Result<Json<RegistrierAnfrage>, JsonRejection>,
) -> Response {
    let Json(anfrage) = match anfrage {
        Ok(a) => a,
        Err(e) => return fehler(StatusCode::BAD_REQUEST, e.body_text()),
    };

    let (Some(ip), Some(port), Some(session_uuid)) =
        (anfrage.ip, anfrage.port, anfrage.session_uuid.filter(|t| !t.is_empty()))
    else {
        return fehler(StatusCode::BAD_REQUEST, "Missing ip, port, or session_uuid");
    };
    let ip: IpAddr = match ip.parse() {
        Ok(ip) => ip,
        Err(_) => return fehler(StatusCode::BAD_REQUEST, format!("Invalid ip: {ip}")),
    };
    let gegenstelle = SocketAddr::new(ip, port);
    let token = SessionToken::new(session_uuid);

    let ereignis = SteuerEreignis::Anlegen {
        token: token.clone(),
        gegenstelle,
    };
    match steuern(&state.verzeichnis, ereignis) {
        Ok(sitzung) => {
            tracing::info!(token = %token, remote = %gegenstelle, sitzung = %sitzung, "Sitzung registriert");
            (
                StatusCode::OK,
                Json(json!({
                    "status": "registered",
                    "ip": ip.to_string(),
                    "port": port,
                    "session_uuid": token.as_str(),
                })),
            )
                .into_response()
        }
        Err(e) => sitzungsfehler(e),
    }
}

/// POST /start
pub async fn starten(
    State(state): State<SteuerState>,
    anfrage: Result<Json<TokenAnfrage>, JsonRejection>,
) -> Response {
    let token = match anfrage {
        Ok(Json(a)) => match token_aus(a.session_uuid) {
            Ok(t) => t,
            Err(r) => return r,
        },
        Err(e) => return fehler(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match steuern(&state.verzeichnis, SteuerEreignis::Starten { token: token.clone() }) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({ "status": "started", "session_uuid": token.as_str() })),
        )
            .into_response(),
        Err(e) => sitzungsfehler(e),
    }
}

/// POST /unregister
pub async fn abmelden(
    State(state): State<SteuerState>,
    anfrage: Result<Json<TokenAnfrage>, JsonRejection>,
) -> Response {
    let token = match anfrage {
        Ok(Json(a)) => match token_aus(a.session_uuid) {
            Ok(t) => t,
            Err(r) => return r,
        },
        Err(e) => return fehler(StatusCode::BAD_REQUEST, e.body_text()),
    };

    match steuern(&state.verzeichnis, SteuerEreignis::Beenden { token: token.clone() }) {
        Ok(_) => (
            StatusCode::OK,
            Json(json!({
                "status": "unregistered",
                "session_uuid": token.as_str(),
                "removed_count": 1,
            })),
        )
            .into_response(),
        Err(e) => sitzungsfehler(e),
    }
}
