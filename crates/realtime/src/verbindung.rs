//! Verbindungs-Task eines Sprachkanals
//!
//! Baut die WebSocket-Verbindung auf, sendet die Konfiguration (und
//! optional die Begruessung), pumpt Audio hinaus und Ereignisse herein.
//! Bricht die Verbindung ab, wird mit linearem Backoff neu verbunden und
//! erneut konfiguriert. Der Backoff beginnt von vorn, sobald das Backend
//! eine Konfiguration mit `session.updated` bestaetigt.
//!
//! ## Keepalive
//! - alle `keepalive_intervall` wird ein WebSocket-Ping gesendet
//! - kommt laenger als `keepalive_timeout` nichts an, gilt die Verbindung als tot

use bytes::Bytes;
use callbridge_core::{SessionId, TranskriptBeobachter};
use callbridge_protocol::ClientNachricht;
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::handshake::client::Request;
use tokio_tungstenite::tungstenite::http::{header::AUTHORIZATION, HeaderValue};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};
use tokio_util::sync::CancellationToken;

use crate::backoff::LinearBackoff;
use crate::config::RealtimeConfig;
use crate::error::{RealtimeError, RealtimeResult};
use crate::kanal::{KanalEreignis, KanalZustand};
use crate::verteiler::EreignisVerteiler;

type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Wie eine einzelne Verbindung geendet hat
#[derive(Debug)]
enum VerbindungsEnde {
    /// Kanal wurde geschlossen, nicht erneut verbinden
    Abgebrochen,
    /// Verbindung verloren, erneut versuchen
    Verloren(String),
}

/// Baut die Handshake-Anfrage mit Authorization- und Beta-Header
pub(crate) fn anfrage_bauen(config: &RealtimeConfig) -> RealtimeResult<Request> {
    let mut anfrage = config
        .endpunkt()
        .into_client_request()
        .map_err(|e| RealtimeError::Konfiguration(format!("Ungueltige URL: {}", e)))?;

    let kopfzeilen = anfrage.headers_mut();
    if let Some(key) = &config.api_key {
        let wert = HeaderValue::from_str(&format!("Bearer {}", key))
            .map_err(|e| RealtimeError::Konfiguration(format!("Ungueltiger API-Key: {}", e)))?;
        kopfzeilen.insert(AUTHORIZATION, wert);
    }
    kopfzeilen.insert("OpenAI-Beta", HeaderValue::from_static("realtime=v1"));

    Ok(anfrage)
}

async fn verbinden(config: &RealtimeConfig) -> RealtimeResult<WsStream> {
    let anfrage = anfrage_bauen(config)?;
    match tokio::time::timeout(
        config.verbindungs_timeout,
        tokio_tungstenite::connect_async(anfrage),
    )
    .await
    {
        Ok(Ok((ws, _antwort))) => Ok(ws),
        Ok(Err(e)) => Err(e.into()),
        Err(_) => Err(RealtimeError::Zeitlimit(config.verbindungs_timeout)),
    }
}

async fn json_senden(
    schreiber: &mut futures_util::stream::SplitSink<WsStream, Message>,
    nachricht: &ClientNachricht,
) -> RealtimeResult<()> {
    let text = nachricht
        .als_json()
        .map_err(|e| RealtimeError::Protokoll(e.to_string()))?;
    schreiber.send(Message::Text(text.into())).await?;
    Ok(())
}

/// Haupt-Task: verbinden, betreiben, bei Verlust mit Backoff neu verbinden
pub(crate) async fn verbindungs_loop(
    config: Arc<RealtimeConfig>,
    sitzung: SessionId,
    beobachter: Arc<dyn TranskriptBeobachter>,
    mut audio_rx: mpsc::Receiver<Bytes>,
    ereignis_tx: mpsc::Sender<KanalEreignis>,
    zustand_tx: watch::Sender<KanalZustand>,
    abbruch: CancellationToken,
) {
    let mut backoff = LinearBackoff::neu(config.backoff.clone());
    let mut verteiler = EreignisVerteiler::neu(sitzung, beobachter);
    let mut erster_versuch = true;

    loop {
        let _ = zustand_tx.send(if erster_versuch {
            KanalZustand::Verbindend
        } else {
            KanalZustand::Wiederverbindend
        });

        let ergebnis = tokio::select! {
            _ = abbruch.cancelled() => break,
            r = verbinden(&config) => r,
        };

        match ergebnis {
            Ok(ws) => {
                tracing::info!(%sitzung, url = %config.url, "Mit Sprach-Backend verbunden");

                // Audio aus der Zeit vor dem Verbindungsaufbau ist veraltet
                while audio_rx.try_recv().is_ok() {}

                let ende = verbindung_betreiben(
                    ws,
                    &config,
                    sitzung,
                    &mut verteiler,
                    &mut backoff,
                    &mut audio_rx,
                    &ereignis_tx,
                    &zustand_tx,
                    &abbruch,
                )
                .await;

                match ende {
                    VerbindungsEnde::Abgebrochen => break,
                    VerbindungsEnde::Verloren(grund) => {
                        tracing::warn!(%sitzung, grund = %grund, "Verbindung zum Sprach-Backend verloren");
                        verteiler.zuruecksetzen();
                        if ereignis_tx.send(KanalEreignis::VerbindungVerloren).await.is_err() {
                            break;
                        }
                    }
                }
            }
            Err(e) => {
                tracing::warn!(%sitzung, fehler = %e, "Verbindungsaufbau zum Sprach-Backend fehlgeschlagen");
            }
        }

        erster_versuch = false;
        let _ = zustand_tx.send(KanalZustand::Wiederverbindend);

        match backoff.naechste_verzoegerung() {
            Some(warten) => {
                tracing::info!(
                    %sitzung,
                    versuch = backoff.versuche(),
                    warten_ms = warten.as_millis() as u64,
                    "Neuer Verbindungsversuch geplant"
                );
                tokio::select! {
                    _ = abbruch.cancelled() => break,
                    _ = tokio::time::sleep(warten) => {}
                }
            }
            None => {
                tracing::error!(
                    %sitzung,
                    versuche = backoff.versuche(),
                    "Wiederverbindung aufgegeben"
                );
                break;
            }
        }
    }

    let _ = zustand_tx.send(KanalZustand::Geschlossen);
    let _ = ereignis_tx.try_send(KanalEreignis::Geschlossen);
    tracing::debug!(%sitzung, "Verbindungs-Task beendet");
}

#[allow(clippy::too_many_arguments)]
async fn verbindung_betreiben(
    ws: WsStream,
    config: &RealtimeConfig,
    sitzung: SessionId,
    verteiler: &mut EreignisVerteiler,
    backoff: &mut LinearBackoff,
    audio_rx: &mut mpsc::Receiver<Bytes>,
    ereignis_tx: &mpsc::Sender<KanalEreignis>,
    zustand_tx: &watch::Sender<KanalZustand>,
    abbruch: &CancellationToken,
) -> VerbindungsEnde {
    let (mut schreiber, mut leser) = ws.split();

    // Jede (Wieder-)Verbindung beginnt mit frischer Konfiguration
    if let Err(e) = json_senden(&mut schreiber, &config.konfigurations_nachricht()).await {
        return VerbindungsEnde::Verloren(format!("session.update: {}", e));
    }
    tracing::info!(
        %sitzung,
        stimme = %config.stimme,
        anweisungen_len = config.anweisungen.len(),
        "Sitzungskonfiguration gesendet"
    );

    if config.begruessung {
        if let Err(e) = json_senden(&mut schreiber, &config.begruessungs_nachricht()).await {
            return VerbindungsEnde::Verloren(format!("response.create: {}", e));
        }
        tracing::debug!(%sitzung, "Begruessung angefordert");
    }

    let _ = zustand_tx.send(KanalZustand::Offen);
    if ereignis_tx.send(KanalEreignis::Verbunden).await.is_err() {
        return VerbindungsEnde::Abgebrochen;
    }

    let mut letzter_empfang = Instant::now();
    let mut naechster_ping = Instant::now() + config.keepalive_intervall;
    let mut gesendete_frames: u64 = 0;

    loop {
        let jetzt = Instant::now();

        if jetzt.duration_since(letzter_empfang) > config.keepalive_timeout {
            return VerbindungsEnde::Verloren("Keepalive-Timeout".into());
        }

        let ping_verzoegerung = if jetzt < naechster_ping {
            naechster_ping.duration_since(jetzt)
        } else {
            Duration::from_millis(1)
        };

        tokio::select! {
            _ = abbruch.cancelled() => {
                let _ = schreiber.send(Message::Close(None)).await;
                return VerbindungsEnde::Abgebrochen;
            }

            // Anrufer-Audio -> Backend
            audio = audio_rx.recv() => {
                let Some(pcm) = audio else {
                    return VerbindungsEnde::Abgebrochen;
                };
                if let Err(e) = json_senden(&mut schreiber, &ClientNachricht::audio(&pcm)).await {
                    return VerbindungsEnde::Verloren(format!("Audio senden: {}", e));
                }
                gesendete_frames += 1;
                if gesendete_frames % 500 == 0 {
                    tracing::debug!(%sitzung, frames = gesendete_frames, "Audio an Backend gesendet");
                }
            }

            // Backend -> Sitzung
            nachricht = leser.next() => {
                match nachricht {
                    Some(Ok(Message::Text(text))) => {
                        letzter_empfang = Instant::now();
                        let ereignis = verteiler.text_verarbeiten(text.as_str());
                        // Erst die bestaetigte Konfiguration zaehlt als erfolgreicher Versuch
                        if verteiler.konfiguration_bestaetigt() && backoff.versuche() > 0 {
                            tracing::debug!(%sitzung, versuche = backoff.versuche(), "Backoff zurueckgesetzt");
                            backoff.zuruecksetzen();
                        }
                        if let Some(ereignis) = ereignis {
                            if ereignis_tx.send(ereignis).await.is_err() {
                                return VerbindungsEnde::Abgebrochen;
                            }
                        }
                    }
                    Some(Ok(Message::Close(rahmen))) => {
                        let grund = rahmen
                            .map(|r| format!("{} {}", u16::from(r.code), &*r.reason))
                            .unwrap_or_else(|| "ohne Grund".into());
                        return VerbindungsEnde::Verloren(format!("Close-Frame: {}", grund));
                    }
                    Some(Ok(_)) => {
                        // Ping/Pong/Binaer zaehlen als Lebenszeichen
                        letzter_empfang = Instant::now();
                    }
                    Some(Err(e)) => {
                        return VerbindungsEnde::Verloren(e.to_string());
                    }
                    None => {
                        return VerbindungsEnde::Verloren("Stream beendet".into());
                    }
                }
            }

            // Keepalive-Ping
            _ = tokio::time::sleep(ping_verzoegerung) => {
                if Instant::now() >= naechster_ping {
                    if let Err(e) = schreiber.send(Message::Ping(Bytes::new())).await {
                        return VerbindungsEnde::Verloren(format!("Ping: {}", e));
                    }
                    naechster_ping = Instant::now() + config.keepalive_intervall;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anfrage_enthaelt_header() {
        let config = RealtimeConfig {
            api_key: Some("sk-test".into()),
            ..RealtimeConfig::default()
        };
        let anfrage = anfrage_bauen(&config).unwrap();
        assert_eq!(
            anfrage.headers().get(AUTHORIZATION).unwrap(),
            "Bearer sk-test"
        );
        assert_eq!(anfrage.headers().get("OpenAI-Beta").unwrap(), "realtime=v1");
        assert!(anfrage.uri().to_string().contains("model=gpt-4o-mini-realtime-preview"));
    }

    #[test]
    fn ohne_key_kein_authorization_header() {
        let anfrage = anfrage_bauen(&RealtimeConfig::default()).unwrap();
        assert!(anfrage.headers().get(AUTHORIZATION).is_none());
    }

    #[test]
    fn ungueltige_url_ist_konfigurationsfehler() {
        let config = RealtimeConfig {
            url: "kein url".into(),
            ..RealtimeConfig::default()
        };
        assert!(matches!(
            anfrage_bauen(&config),
            Err(RealtimeError::Konfiguration(_))
        ));
    }
}
