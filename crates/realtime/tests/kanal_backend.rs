//! Integrationstests: Sprachkanal gegen einen lokalen WebSocket-Server

use bytes::Bytes;
use callbridge_core::{LogBeobachter, SessionId};
use callbridge_realtime::{
    BackoffConfig, KanalEreignis, KanalZustand, RealtimeConfig, SendeErgebnis, SprachKanal,
};
use futures_util::{SinkExt, StreamExt};
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::WebSocketStream;

const WARTEN: Duration = Duration::from_secs(5);

fn test_config(adresse: std::net::SocketAddr) -> Arc<RealtimeConfig> {
    Arc::new(RealtimeConfig {
        url: format!("ws://{}/v1/realtime", adresse),
        api_key: Some("sk-test".into()),
        verbindungs_timeout: Duration::from_secs(2),
        backoff: BackoffConfig {
            basis: Duration::from_millis(20),
            obergrenze: Duration::from_millis(50),
            max_versuche: 3,
        },
        ..RealtimeConfig::default()
    })
}

async fn naechstes_json(ws: &mut WebSocketStream<TcpStream>) -> serde_json::Value {
    loop {
        let msg = tokio::time::timeout(WARTEN, ws.next())
            .await
            .expect("Zeitlimit beim Lesen")
            .expect("Stream beendet")
            .expect("Lesefehler");
        if let Message::Text(text) = msg {
            return serde_json::from_str(text.as_str()).unwrap();
        }
    }
}

async fn naechstes_ereignis(rx: &mut mpsc::Receiver<KanalEreignis>) -> KanalEreignis {
    tokio::time::timeout(WARTEN, rx.recv())
        .await
        .expect("Zeitlimit beim Warten auf Ereignis")
        .expect("Ereigniskanal geschlossen")
}

async fn senden(ws: &mut WebSocketStream<TcpStream>, json: &str) {
    ws.send(Message::Text(json.to_string().into())).await.unwrap();
}

#[tokio::test]
async fn konfiguration_audio_und_ereignisse() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();

        let update = naechstes_json(&mut ws).await;
        assert_eq!(update["type"], "session.update");
        assert_eq!(update["session"]["input_audio_format"], "pcm16");
        let begruessung = naechstes_json(&mut ws).await;
        assert_eq!(begruessung["type"], "response.create");

        senden(&mut ws, r#"{"type":"session.updated","session":{}}"#).await;
        senden(&mut ws, r#"{"type":"response.created","response":{"id":"r1"}}"#).await;
        senden(
            &mut ws,
            r#"{"type":"response.audio.delta","response_id":"r1","delta":"AAABAA=="}"#,
        )
        .await;
        senden(&mut ws, r#"{"type":"response.done","response":{"id":"r1"}}"#).await;

        // Anrufer-Audio kommt als input_audio_buffer.append an
        let append = naechstes_json(&mut ws).await;
        assert_eq!(append["type"], "input_audio_buffer.append");
        assert_eq!(append["audio"], "AQACAA==");
        ws
    });

    let (kanal, mut ereignisse) =
        SprachKanal::oeffnen(test_config(adresse), SessionId::new(), Arc::new(LogBeobachter));

    assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Verbunden);
    assert_eq!(kanal.zustand(), KanalZustand::Offen);
    assert_eq!(
        naechstes_ereignis(&mut ereignisse).await,
        KanalEreignis::AntwortErstellt {
            antwort_id: Some("r1".into())
        }
    );
    assert_eq!(
        naechstes_ereignis(&mut ereignisse).await,
        KanalEreignis::Audio {
            antwort_id: Some("r1".into()),
            pcm: Bytes::from_static(&[0, 0, 1, 0]),
        }
    );
    assert_eq!(
        naechstes_ereignis(&mut ereignisse).await,
        KanalEreignis::AntwortFertig {
            antwort_id: Some("r1".into())
        }
    );

    assert_eq!(
        kanal.audio_senden(Bytes::from_static(&[1, 0, 2, 0])),
        SendeErgebnis::Eingereiht
    );

    let _ws = tokio::time::timeout(WARTEN, server).await.unwrap().unwrap();
    kanal.schliessen();
}

#[tokio::test]
async fn wiederverbindung_sendet_konfiguration_erneut() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();

    let server = tokio::spawn(async move {
        // Erste Verbindung: konfigurieren lassen, dann hart trennen
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(naechstes_json(&mut ws).await["type"], "session.update");
        drop(ws);

        // Zweite Verbindung: wieder session.update als erste Nachricht
        let (stream, _) = listener.accept().await.unwrap();
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(naechstes_json(&mut ws).await["type"], "session.update");
        ws
    });

    let config = Arc::new(RealtimeConfig {
        begruessung: false,
        ..(*test_config(adresse)).clone()
    });
    let (kanal, mut ereignisse) = SprachKanal::oeffnen(config, SessionId::new(), Arc::new(LogBeobachter));

    assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Verbunden);
    assert_eq!(
        naechstes_ereignis(&mut ereignisse).await,
        KanalEreignis::VerbindungVerloren
    );
    assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Verbunden);

    let _ws = tokio::time::timeout(WARTEN, server).await.unwrap().unwrap();
    kanal.schliessen();
}

#[tokio::test]
async fn unerreichbares_backend_schliesst_nach_backoff() {
    // Port belegen und wieder freigeben: danach wird die Verbindung abgelehnt
    let adresse = {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        listener.local_addr().unwrap()
    };

    let (kanal, mut ereignisse) =
        SprachKanal::oeffnen(test_config(adresse), SessionId::new(), Arc::new(LogBeobachter));

    assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Geschlossen);
    assert_eq!(kanal.zustand(), KanalZustand::Geschlossen);
    assert_eq!(
        kanal.audio_senden(Bytes::from_static(&[0, 0])),
        SendeErgebnis::NichtVerbunden
    );
}

/// Nimmt `anzahl` Verbindungen an, wartet jeweils auf `session.update` und
/// trennt dann; mit `bestaetigen` antwortet es vorher mit `session.updated`
async fn kurzlebiges_backend(listener: TcpListener, anzahl: usize, bestaetigen: bool) {
    for _ in 0..anzahl {
        let Ok((stream, _)) = listener.accept().await else {
            return;
        };
        let mut ws = tokio_tungstenite::accept_async(stream).await.unwrap();
        assert_eq!(naechstes_json(&mut ws).await["type"], "session.update");
        if bestaetigen {
            senden(&mut ws, r#"{"type":"session.updated","session":{}}"#).await;
        }
        drop(ws);
    }
}

#[tokio::test]
async fn bestaetigte_verbindungen_setzen_backoff_zurueck() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    // Mehr Abbrueche als max_versuche (3)
    let server = tokio::spawn(kurzlebiges_backend(listener, 6, true));

    let config = Arc::new(RealtimeConfig {
        begruessung: false,
        ..(*test_config(adresse)).clone()
    });
    let (kanal, mut ereignisse) = SprachKanal::oeffnen(config, SessionId::new(), Arc::new(LogBeobachter));

    for _ in 0..6 {
        assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Verbunden);
        assert_eq!(
            naechstes_ereignis(&mut ereignisse).await,
            KanalEreignis::VerbindungVerloren
        );
    }
    assert_ne!(kanal.zustand(), KanalZustand::Geschlossen);

    tokio::time::timeout(WARTEN, server).await.unwrap().unwrap();
    kanal.schliessen();
}

#[tokio::test]
async fn unbestaetigte_abbrueche_erschoepfen_backoff() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let adresse = listener.local_addr().unwrap();
    // Erstversuch plus drei Wiederholungen
    let server = tokio::spawn(kurzlebiges_backend(listener, 4, false));

    let config = Arc::new(RealtimeConfig {
        begruessung: false,
        ..(*test_config(adresse)).clone()
    });
    let (kanal, mut ereignisse) = SprachKanal::oeffnen(config, SessionId::new(), Arc::new(LogBeobachter));

    for _ in 0..4 {
        assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Verbunden);
        assert_eq!(
            naechstes_ereignis(&mut ereignisse).await,
            KanalEreignis::VerbindungVerloren
        );
    }
    assert_eq!(naechstes_ereignis(&mut ereignisse).await, KanalEreignis::Geschlossen);
    assert_eq!(kanal.zustand(), KanalZustand::Geschlossen);

    tokio::time::timeout(WARTEN, server).await.unwrap().unwrap();
}
