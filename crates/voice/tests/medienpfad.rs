//! Integrationstests: Medienpfad ueber echte UDP-Sockets auf localhost
//!
//! Das Sprach-Backend wird durch lokale Kanaele ersetzt; der Test spielt
//! die Telefonanlage (RTP-Gegenstelle) und das Backend (Ereignisse).

use bytes::Bytes;
use callbridge_audio::{pcm16_zu_bytes, G711Variante};
use callbridge_core::{LogBeobachter, SessionId, SessionToken};
use callbridge_observability::BridgeMetrics;
use callbridge_protocol::{PayloadTyp, RtpHeader, RtpPaket};
use callbridge_realtime::{KanalEreignis, KanalGegenstelle, KanalZustand, SprachKanal};
use callbridge_voice::{KanalFabrik, MedienConfig, MedienServer};
use parking_lot::Mutex;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

const WARTEN: Duration = Duration::from_secs(3);

#[derive(Default)]
struct TestFabrik {
    gegenstellen: Mutex<Vec<KanalGegenstelle>>,
}

impl KanalFabrik for TestFabrik {
    fn oeffnen(&self, sitzung: SessionId) -> (SprachKanal, mpsc::Receiver<KanalEreignis>) {
        let (kanal, ereignisse, gegenstelle) = SprachKanal::lokal(sitzung, 256);
        self.gegenstellen.lock().push(gegenstelle);
        (kanal, ereignisse)
    }
}

struct Aufbau {
    server: Arc<MedienServer>,
    server_addr: SocketAddr,
    fabrik: Arc<TestFabrik>,
    telefon: UdpSocket,
    shutdown: CancellationToken,
}

async fn aufbauen() -> Aufbau {
    let fabrik = Arc::new(TestFabrik::default());
    let server = MedienServer::binden(
        "127.0.0.1:0".parse().unwrap(),
        Arc::new(MedienConfig::default()),
        fabrik.clone(),
        Arc::new(LogBeobachter),
        BridgeMetrics::neu().unwrap(),
    )
    .await
    .unwrap();
    let server_addr = server.lokale_adresse().unwrap();
    let server = Arc::new(server);

    let shutdown = CancellationToken::new();
    {
        let server = Arc::clone(&server);
        let shutdown = shutdown.clone();
        tokio::spawn(async move { server.empfangs_loop(shutdown).await });
    }

    Aufbau {
        server,
        server_addr,
        fabrik,
        telefon: UdpSocket::bind("127.0.0.1:0").await.unwrap(),
        shutdown,
    }
}

async fn empfangen(telefon: &UdpSocket) -> RtpPaket {
    let mut buf = [0u8; 1500];
    let (n, _) = tokio::time::timeout(WARTEN, telefon.recv_from(&mut buf))
        .await
        .expect("Zeitlimit beim Warten auf RTP")
        .unwrap();
    RtpPaket::decode(&buf[..n]).unwrap()
}

fn stille_paket(seq: u16) -> Vec<u8> {
    RtpPaket::neu(
        RtpHeader::neu(PayloadTyp::PCMA, seq == 0, seq, seq as u32 * 160, 0x1357_9BDF),
        vec![0xD5; 160],
    )
    .encode()
}

fn ist_stille(p: &RtpPaket) -> bool {
    p.nutzdaten.iter().all(|b| *b == 0xD5)
}

#[tokio::test]
async fn sitzung_mit_token_sendet_stille_und_takt() {
    let a = aufbauen().await;
    let telefon_addr = a.telefon.local_addr().unwrap();
    let verzeichnis = a.server.verzeichnis();

    verzeichnis.sitzung_anlegen(SessionToken::from("abc123"), telefon_addr);

    // Sofortiger Stille-Frame nach dem Anlegen
    let erstes = empfangen(&a.telefon).await;
    assert!(erstes.header.marker);
    assert_eq!(erstes.nutzdaten, vec![0xD5; 160]);

    // Telefonanlage sendet 50 Stille-Frames im 20-ms-Takt
    let telefon = Arc::new(a.telefon);
    let task = {
        let sock = Arc::clone(&telefon);
        let ziel = a.server_addr;
        tokio::spawn(async move {
            for seq in 0..50u16 {
                sock.send_to(&stille_paket(seq), ziel).await.unwrap();
                tokio::time::sleep(Duration::from_millis(20)).await;
            }
        })
    };

    let start = Instant::now();
    let mut vorher = erstes.header.sequenz;
    for _ in 0..10 {
        let p = empfangen(&telefon).await;
        assert_eq!(p.header.sequenz, vorher.wrapping_add(1));
        assert!(ist_stille(&p));
        assert!(!p.header.marker);
        vorher = p.header.sequenz;
    }
    // Zehn Frames im 20-ms-Takt brauchen gut 200 ms
    assert!(start.elapsed() >= Duration::from_millis(150));

    task.await.unwrap();
    let sitzung = verzeichnis.sitzung(&telefon_addr).unwrap();
    assert_eq!(sitzung.token(), Some(SessionToken::from("abc123")));

    verzeichnis
        .sitzung_beenden(&SessionToken::from("abc123"))
        .unwrap();
    assert_eq!(verzeichnis.anzahl(), 0);

    let abgebrochen = a.fabrik.gegenstellen.lock()[0].abbruch.clone();
    tokio::time::timeout(WARTEN, abgebrochen.cancelled())
        .await
        .expect("Sprachkanal muss geschlossen werden");

    a.shutdown.cancel();
}

#[tokio::test]
async fn backend_audio_kommt_als_fuenfzig_frames_an() {
    let a = aufbauen().await;
    let telefon_addr = a.telefon.local_addr().unwrap();
    a.server
        .verzeichnis()
        .sitzung_anlegen(SessionToken::from("audio"), telefon_addr);
    let erstes = empfangen(&a.telefon).await;
    assert!(ist_stille(&erstes));

    let ereignis_tx = a.fabrik.gegenstellen.lock()[0].ereignis_tx.clone();
    ereignis_tx
        .send(KanalEreignis::AntwortErstellt {
            antwort_id: Some("r1".into()),
        })
        .await
        .unwrap();

    // Eine Sekunde Breitband-Audio in ungleichen Stuecken
    let pcm = pcm16_zu_bytes(&vec![3000i16; 24000]);
    for stueck in pcm.chunks(7001) {
        ereignis_tx
            .send(KanalEreignis::Audio {
                antwort_id: Some("r1".into()),
                pcm: Bytes::copy_from_slice(stueck),
            })
            .await
            .unwrap();
    }
    ereignis_tx
        .send(KanalEreignis::AntwortFertig {
            antwort_id: Some("r1".into()),
        })
        .await
        .unwrap();

    let erwartet = G711Variante::Alaw.kodieren(&[3000; 160]);
    let mut audio_frames = 0;
    let mut stille_danach = 0;
    let ende = Instant::now() + Duration::from_secs(5);
    while Instant::now() < ende && stille_danach < 10 {
        let p = empfangen(&a.telefon).await;
        assert_eq!(p.nutzdaten.len(), 160);
        if ist_stille(&p) {
            if audio_frames > 0 {
                stille_danach += 1;
            }
        } else {
            assert_eq!(p.nutzdaten, erwartet);
            stille_danach = 0;
            audio_frames += 1;
        }
    }
    assert_eq!(audio_frames, 50);

    a.server.verzeichnis().alle_beenden();
    a.shutdown.cancel();
}

#[tokio::test]
async fn anrufer_audio_erreicht_backend_als_breitband() {
    let a = aufbauen().await;
    let telefon_addr = a.telefon.local_addr().unwrap();

    // Sitzung entsteht durch das erste Datagramm
    a.telefon
        .send_to(&stille_paket(0), a.server_addr)
        .await
        .unwrap();
    let erstes = empfangen(&a.telefon).await;
    assert!(ist_stille(&erstes));
    let sitzung = a.server.verzeichnis().sitzung(&telefon_addr).unwrap();
    assert!(sitzung.token().is_none());

    let mut audio_rx = {
        let mut gegenstellen = a.fabrik.gegenstellen.lock();
        let g = &mut gegenstellen[0];
        g.zustand_tx.send(KanalZustand::Offen).unwrap();
        std::mem::replace(&mut g.audio_rx, mpsc::channel(1).1)
    };

    for seq in 1..5u16 {
        a.telefon
            .send_to(&stille_paket(seq), a.server_addr)
            .await
            .unwrap();
    }

    let frame = tokio::time::timeout(WARTEN, audio_rx.recv())
        .await
        .expect("Zeitlimit beim Warten auf Backend-Audio")
        .unwrap();
    assert_eq!(frame.len(), 960);

    a.server.verzeichnis().alle_beenden();
    a.shutdown.cancel();
}
