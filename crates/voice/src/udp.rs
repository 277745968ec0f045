//! UDP-Medienserver – RTP-Empfang fuer alle Sitzungen
//!
//! Bindet einen UDP-Socket, liest Datagramme, dekodiert den RTP-Header
//! und reicht das Paket ueber das [`SessionDirectory`] an die Sitzung der
//! Absenderadresse weiter. Gesendet wird von den Sitzungs-Tasks ueber
//! denselben (geteilten) Socket.
//!
//! ```text
//! UDP Socket (recv_from)
//!     |
//!     v
//! RtpPaket::decode()                    <- Validierung
//!     |
//!     v
//! SessionDirectory::datagramm_zustellen <- Sitzung finden oder anlegen
//!     |
//!     v
//! Sitzungs-Task (mpsc)
//! ```

use callbridge_core::TranskriptBeobachter;
use callbridge_observability::BridgeMetrics;
use callbridge_protocol::rtp::MAX_NUTZDATEN_LAENGE;
use callbridge_protocol::{RtpHeader, RtpPaket};
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;

use crate::config::MedienConfig;
use crate::verzeichnis::{KanalFabrik, SessionDirectory};

/// Empfangspuffer: groesstes gueltiges RTP-Paket
const UDP_BUFFER_SIZE: usize = RtpHeader::SIZE + MAX_NUTZDATEN_LAENGE;

pub struct MedienServer {
    socket: Arc<UdpSocket>,
    verzeichnis: SessionDirectory,
}

impl MedienServer {
    /// Bindet den UDP-Socket und legt das Sitzungsverzeichnis an
    pub async fn binden(
        bind_addr: SocketAddr,
        config: Arc<MedienConfig>,
        fabrik: Arc<dyn KanalFabrik>,
        beobachter: Arc<dyn TranskriptBeobachter>,
        metriken: BridgeMetrics,
    ) -> std::io::Result<Self> {
        let socket = Arc::new(UdpSocket::bind(bind_addr).await?);
        tracing::info!(addr = %socket.local_addr()?, "UDP-Medienserver gebunden");

        let verzeichnis =
            SessionDirectory::neu(config, Arc::clone(&socket), fabrik, beobachter, metriken);
        Ok(Self {
            socket,
            verzeichnis,
        })
    }

    pub fn lokale_adresse(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    pub fn verzeichnis(&self) -> &SessionDirectory {
        &self.verzeichnis
    }

    /// Empfangs-Loop; laeuft bis `shutdown` ausgeloest wird
    pub async fn empfangs_loop(&self, shutdown: CancellationToken) {
        let mut buf = vec![0u8; UDP_BUFFER_SIZE];
        tracing::info!("RTP-Empfangs-Loop gestartet");

        loop {
            tokio::select! {
                ergebnis = self.socket.recv_from(&mut buf) => {
                    match ergebnis {
                        Ok((len, absender)) => self.datagramm_verarbeiten(&buf[..len], absender),
                        Err(e) => {
                            tracing::error!(fehler = %e, "UDP-Empfangsfehler");
                            // Kurze Pause gegen Busy-Loop bei dauerhaftem Fehler
                            tokio::time::sleep(std::time::Duration::from_millis(1)).await;
                        }
                    }
                }

                _ = shutdown.cancelled() => {
                    tracing::info!("Medienserver: Shutdown-Signal empfangen");
                    break;
                }
            }
        }

        self.verzeichnis.alle_beenden();
        tracing::info!("RTP-Empfangs-Loop beendet");
    }

    fn datagramm_verarbeiten(&self, daten: &[u8], absender: SocketAddr) {
        let paket = match RtpPaket::decode(daten) {
            Ok(p) => p,
            Err(e) => {
                self.verzeichnis.metriken().rtp_packets_invalid.inc();
                tracing::warn!(
                    fehler = %e,
                    absender = %absender,
                    laenge = daten.len(),
                    "Ungueltiges RTP-Paket verworfen"
                );
                return;
            }
        };

        tracing::trace!(
            absender = %absender,
            seq = paket.header.sequenz,
            ssrc = paket.header.ssrc,
            bytes = daten.len(),
            "RTP-Paket empfangen"
        );
        self.verzeichnis.datagramm_zustellen(absender, paket);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use callbridge_core::{LogBeobachter, SessionId};
    use callbridge_realtime::{KanalEreignis, KanalGegenstelle, SprachKanal};
    use parking_lot::Mutex;
    use tokio::sync::mpsc;

    #[derive(Default)]
    struct LeereFabrik {
        gegenstellen: Mutex<Vec<KanalGegenstelle>>,
    }

    impl KanalFabrik for LeereFabrik {
        fn oeffnen(&self, sitzung: SessionId) -> (SprachKanal, mpsc::Receiver<KanalEreignis>) {
            let (kanal, ereignisse, gegenstelle) = SprachKanal::lokal(sitzung, 8);
            self.gegenstellen.lock().push(gegenstelle);
            (kanal, ereignisse)
        }
    }

    async fn server() -> MedienServer {
        MedienServer::binden(
            "127.0.0.1:0".parse().unwrap(),
            Arc::new(MedienConfig::default()),
            Arc::new(LeereFabrik::default()),
            Arc::new(LogBeobachter),
            BridgeMetrics::neu().unwrap(),
        )
        .await
        .expect("Server muss binden koennen")
    }

    #[tokio::test]
    async fn medienserver_binden() {
        let s = server().await;
        let addr = s.lokale_adresse().expect("Adresse muss verfuegbar sein");
        assert_ne!(addr.port(), 0, "OS muss einen Port zuweisen");
    }

    #[test]
    fn udp_buffer_groesse_ausreichend() {
        assert!(UDP_BUFFER_SIZE >= RtpHeader::SIZE + 160);
    }

    #[tokio::test]
    async fn muell_wird_gezaehlt_und_legt_keine_sitzung_an() {
        let s = server().await;
        s.datagramm_verarbeiten(b"TEST-UDP-SELF", "127.0.0.1:5000".parse().unwrap());
        s.datagramm_verarbeiten(&[0x80, 8], "127.0.0.1:5000".parse().unwrap());
        assert_eq!(s.verzeichnis().anzahl(), 0);
        assert_eq!(s.verzeichnis().metriken().rtp_packets_invalid.get(), 2);
    }

    #[tokio::test]
    async fn shutdown_beendet_loop() {
        let s = Arc::new(server().await);
        let shutdown = CancellationToken::new();
        let task = {
            let s = Arc::clone(&s);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { s.empfangs_loop(shutdown).await })
        };
        shutdown.cancel();
        tokio::time::timeout(std::time::Duration::from_secs(2), task)
            .await
            .unwrap()
            .unwrap();
    }
}
