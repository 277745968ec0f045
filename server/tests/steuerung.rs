//! Integrationstests: Steuer-API und Medienpfad eines vollstaendigen Servers
//!
//! Beide Ports werden vom Betriebssystem vergeben (Port 0), das
//! Sprach-Backend ist durch lokale Kanaele ersetzt.

use callbridge_core::{LogBeobachter, SessionId};
use callbridge_protocol::RtpPaket;
use callbridge_realtime::{KanalEreignis, KanalGegenstelle, SprachKanal};
use callbridge_server::{config::ServerConfig, Server};
use callbridge_voice::KanalFabrik;
use std::net::SocketAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WARTEN: Duration = Duration::from_secs(3);

#[derive(Default)]
struct TestFabrik {
    gegenstellen: Mutex<Vec<KanalGegenstelle>>,
}

impl KanalFabrik for TestFabrik {
    fn oeffnen(&self, sitzung: SessionId) -> (SprachKanal, mpsc::Receiver<KanalEreignis>) {
        let (kanal, ereignisse, gegenstelle) = SprachKanal::lokal(sitzung, 64);
        self.gegenstellen.lock().unwrap().push(gegenstelle);
        (kanal, ereignisse)
    }
}

fn test_config() -> ServerConfig {
    let mut config = ServerConfig::default();
    config.netzwerk.bind_adresse = "127.0.0.1".into();
    config.netzwerk.medien_port = 0;
    config.netzwerk.api_port = 0;
    config
}

/// Minimaler HTTP/1.1-Client: gibt Statuscode und Koerper zurueck
async fn http(api: SocketAddr, methode: &str, pfad: &str, koerper: &str) -> (u16, String) {
    let mut stream = TcpStream::connect(api).await.unwrap();
    let anfrage = format!(
        "{methode} {pfad} HTTP/1.1\r\nHost: {api}\r\nContent-Type: application/json\r\n\
         Content-Length: {}\r\nConnection: close\r\n\r\n{koerper}",
        koerper.len()
    );
    stream.write_all(anfrage.as_bytes()).await.unwrap();

    let mut antwort = Vec::new();
    tokio::time::timeout(WARTEN, stream.read_to_end(&mut antwort))
        .await
        .expect("Zeitlimit beim Warten auf HTTP-Antwort")
        .unwrap();
    let text = String::from_utf8_lossy(&antwort).to_string();

    let status = text
        .split_whitespace()
        .nth(1)
        .and_then(|s| s.parse().ok())
        .expect("Statuszeile fehlt");
    let koerper = text
        .split_once("\r\n\r\n")
        .map(|(_, k)| k.to_string())
        .unwrap_or_default();
    (status, koerper)
}

#[tokio::test]
async fn anruf_lebenszyklus_ueber_http() {
    let fabrik = Arc::new(TestFabrik::default());
    let server = Server::binden_mit_fabrik(test_config(), fabrik.clone(), Arc::new(LogBeobachter))
        .await
        .unwrap();
    let api = server.api_adresse().unwrap();
    let verzeichnis = server.verzeichnis();

    let shutdown = CancellationToken::new();
    let laeuft = tokio::spawn(server.laufen(shutdown.clone()));

    let telefon = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let telefon_port = telefon.local_addr().unwrap().port();

    let (status, koerper) = http(
        api,
        "POST",
        "/register",
        &format!(r#"{{"ip":"127.0.0.1","port":{telefon_port},"session_uuid":"abc123"}}"#),
    )
    .await;
    assert_eq!(status, 200);
    assert!(koerper.contains(r#""status":"registered""#));

    // Erstes Paket: Stille mit Marker
    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(WARTEN, telefon.recv_from(&mut buf))
        .await
        .expect("Zeitlimit beim Warten auf RTP")
        .unwrap();
    let paket = RtpPaket::decode(&buf[..n]).unwrap();
    assert!(paket.header.marker);
    assert_eq!(paket.nutzdaten, vec![0xD5; 160]);

    let (status, _) = http(api, "POST", "/start", r#"{"session_uuid":"abc123"}"#).await;
    assert_eq!(status, 200);

    let (status, metriken) = http(api, "GET", "/metrics", "").await;
    assert_eq!(status, 200);
    assert!(metriken.contains("callbridge_sessions_active 1"));

    let (status, _) = http(api, "POST", "/unregister", r#"{"session_uuid":"abc123"}"#).await;
    assert_eq!(status, 200);
    assert_eq!(verzeichnis.anzahl(), 0);

    let (status, koerper) = http(api, "POST", "/unregister", r#"{"session_uuid":"abc123"}"#).await;
    assert_eq!(status, 404);
    assert!(koerper.contains("Session not found: abc123"));

    let abbruch = fabrik.gegenstellen.lock().unwrap()[0].abbruch.clone();
    tokio::time::timeout(WARTEN, abbruch.cancelled())
        .await
        .expect("Sprachkanal muss geschlossen werden");

    shutdown.cancel();
    tokio::time::timeout(WARTEN, laeuft)
        .await
        .expect("Server muss herunterfahren")
        .unwrap()
        .unwrap();
}

#[tokio::test]
async fn leerlauf_sitzungen_werden_bereinigt() {
    let mut config = test_config();
    config.sitzung.leerlauf_timeout_s = 0;
    config.sitzung.bereinigungs_intervall_s = 1;

    let server = Server::binden_mit_fabrik(
        config,
        Arc::new(TestFabrik::default()),
        Arc::new(LogBeobachter),
    )
    .await
    .unwrap();
    let api = server.api_adresse().unwrap();
    let verzeichnis = server.verzeichnis();

    let shutdown = CancellationToken::new();
    let laeuft = tokio::spawn(server.laufen(shutdown.clone()));

    let (status, _) = http(
        api,
        "POST",
        "/register",
        r#"{"ip":"127.0.0.1","port":40999,"session_uuid":"leerlauf"}"#,
    )
    .await;
    assert_eq!(status, 200);

    let mut entfernt = false;
    for _ in 0..40 {
        tokio::time::sleep(Duration::from_millis(100)).await;
        if verzeichnis.anzahl() == 0 {
            entfernt = true;
            break;
        }
    }
    assert!(entfernt, "Inaktive Sitzung muss entfernt werden");

    shutdown.cancel();
    tokio::time::timeout(WARTEN, laeuft)
        .await
        .expect("Server muss herunterfahren")
        .unwrap()
        .unwrap();
}
