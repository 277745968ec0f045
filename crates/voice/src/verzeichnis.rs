//! Sitzungsverzeichnis – alle laufenden Anrufe
//!
//! Schluessel ist die Transportadresse der Gegenstelle; ein zweiter Index
//! fuehrt vom Token der Steuerebene zur Adresse. Eine Sitzung entsteht
//! durch das, was zuerst ankommt: eine Anlege-Anfrage mit Token oder das
//! erste Datagramm einer unbekannten Adresse.
//!
//! Thread-safe durch DashMap. Jede Sitzung laeuft in einem eigenen Task
//! und meldet sich beim Ende selbst ab.

use callbridge_core::{BridgeError, Result, SessionId, SessionToken, TranskriptBeobachter};
use callbridge_observability::{sitzungs_span, BridgeMetrics, VerwerfGrund};
use callbridge_protocol::RtpPaket;
use callbridge_realtime::{KanalEreignis, RealtimeConfig, SprachKanal};
use dashmap::DashMap;
use std::net::SocketAddr;
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tracing::Instrument;

use crate::config::MedienConfig;
use crate::sitzung::{sitzung_betreiben, SitzungsHandle, SitzungsKern, SteuerBefehl, Zustellung};

// ---------------------------------------------------------------------------
// KanalFabrik
// ---------------------------------------------------------------------------

/// Oeffnet den Sprachkanal einer neuen Sitzung
pub trait KanalFabrik: Send + Sync + 'static {
    fn oeffnen(&self, sitzung: SessionId) -> (SprachKanal, mpsc::Receiver<KanalEreignis>);
}

/// Sprachkanal zum Realtime-Backend
pub struct RealtimeFabrik {
    config: Arc<RealtimeConfig>,
    beobachter: Arc<dyn TranskriptBeobachter>,
}

impl RealtimeFabrik {
    pub fn neu(config: Arc<RealtimeConfig>, beobachter: Arc<dyn TranskriptBeobachter>) -> Self {
        Self { config, beobachter }
    }
}

impl KanalFabrik for RealtimeFabrik {
    fn oeffnen(&self, sitzung: SessionId) -> (SprachKanal, mpsc::Receiver<KanalEreignis>) {
        SprachKanal::oeffnen(Arc::clone(&self.config), sitzung, Arc::clone(&self.beobachter))
    }
}

// ---------------------------------------------------------------------------
// SessionDirectory
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct SessionDirectory {
    inner: Arc<VerzeichnisInner>,
}

struct VerzeichnisInner {
    sitzungen: DashMap<SocketAddr, Arc<SitzungsHandle>>,
    token_index: DashMap<SessionToken, SocketAddr>,
    config: Arc<MedienConfig>,
    socket: Arc<UdpSocket>,
    fabrik: Arc<dyn KanalFabrik>,
    beobachter: Arc<dyn TranskriptBeobachter>,
    metriken: BridgeMetrics,
}

impl SessionDirectory {
    pub fn neu(
        config: Arc<MedienConfig>,
        socket: Arc<UdpSocket>,
        fabrik: Arc<dyn KanalFabrik>,
        beobachter: Arc<dyn TranskriptBeobachter>,
        metriken: BridgeMetrics,
    ) -> Self {
        Self {
            inner: Arc::new(VerzeichnisInner {
                sitzungen: DashMap::new(),
                token_index: DashMap::new(),
                config,
                socket,
                fabrik,
                beobachter,
                metriken,
            }),
        }
    }

    pub fn config(&self) -> &Arc<MedienConfig> {
        &self.inner.config
    }

    pub fn metriken(&self) -> &BridgeMetrics {
        &self.inner.metriken
    }

    /// Legt eine Sitzung fuer `token` an oder ordnet das Token einer
    /// bestehenden Sitzung unter derselben Adresse zu
    pub fn sitzung_anlegen(&self, token: SessionToken, remote: SocketAddr) -> Arc<SitzungsHandle> {
        if let Some(handle) = self.sitzung(&remote) {
            let alt = handle.token();
            match handle.token_setzen(token.clone()) {
                Ok(()) => {
                    if let Some(alt) = alt.filter(|alt| *alt != token) {
                        self.inner
                            .token_index
                            .remove_if(&alt, |_, adresse| *adresse == remote);
                    }
                    tracing::warn!(
                        remote = %remote,
                        token = %token,
                        sitzung = %handle.id(),
                        "Sitzung existiert bereits, Token aktualisiert"
                    );
                    self.inner.token_index.insert(token, remote);
                    return handle;
                }
                Err(e) => {
                    // Task laeuft nicht mehr, Eintrag ersetzen
                    tracing::warn!(remote = %remote, sitzung = %handle.id(), fehler = %e, "Verwaiste Sitzung wird ersetzt");
                    self.abmelden(remote, handle.id());
                }
            }
        }

        tracing::info!(remote = %remote, token = %token, "Sitzung wird angelegt");
        let handle = self.eintragen(remote, Some(token.clone()));
        if handle.token().as_ref() != Some(&token) {
            // Ein Datagramm war schneller; dessen Sitzung uebernimmt das Token
            if let Err(e) = handle.token_setzen(token.clone()) {
                tracing::warn!(remote = %remote, sitzung = %handle.id(), fehler = %e, "Token nicht uebernommen");
            }
        }
        self.inner.token_index.insert(token, remote);
        handle
    }

    /// Reicht ein Datagramm an die Sitzung seiner Absenderadresse weiter;
    /// unbekannte Adressen bekommen eine neue Sitzung
    pub fn datagramm_zustellen(&self, remote: SocketAddr, paket: RtpPaket) -> Zustellung {
        self.inner.metriken.rtp_packets_received.inc();

        let handle = match self.sitzung(&remote) {
            Some(h) => h,
            None => {
                tracing::info!(remote = %remote, "Neue Sitzung durch erstes Datagramm");
                self.eintragen(remote, None)
            }
        };

        let ergebnis = handle.paket_zustellen(paket);
        match ergebnis {
            Zustellung::Zugestellt => {}
            Zustellung::Ueberlastet => {
                tracing::trace!(remote = %remote, "Sitzungs-Warteschlange voll");
                self.inner
                    .metriken
                    .frame_verworfen(VerwerfGrund::SitzungUeberlastet, 1);
            }
            Zustellung::Beendet => {
                tracing::debug!(remote = %remote, "Datagramm fuer beendete Sitzung");
            }
        }
        ergebnis
    }

    /// Start-Benachrichtigung der Steuerebene
    ///
    /// Laeuft der Sitzungs-Task nicht mehr, wird die Sitzung abgemeldet und
    /// [`BridgeError::SitzungBeendet`] geliefert.
    pub fn sitzung_starten(&self, token: &SessionToken) -> Result<SessionId> {
        let handle = self
            .sitzung_zu_token(token)
            .ok_or_else(|| BridgeError::SitzungNichtGefunden(token.to_string()))?;
        match handle.starten() {
            Ok(true) => {}
            Ok(false) => tracing::debug!(token = %token, "Sitzung war bereits gestartet"),
            Err(e) => {
                tracing::warn!(token = %token, sitzung = %handle.id(), fehler = %e, "Start nicht zustellbar");
                self.abmelden(handle.gegenstelle(), handle.id());
                return Err(BridgeError::SitzungBeendet(token.to_string()));
            }
        }
        Ok(handle.id())
    }

    /// Ende-Benachrichtigung: Sitzung sofort abbauen
    pub fn sitzung_beenden(&self, token: &SessionToken) -> Result<SessionId> {
        let (_, remote) = self
            .inner
            .token_index
            .remove(token)
            .ok_or_else(|| BridgeError::SitzungNichtGefunden(token.to_string()))?;
        let (_, handle) = self
            .inner
            .sitzungen
            .remove(&remote)
            .ok_or_else(|| BridgeError::SitzungNichtGefunden(token.to_string()))?;

        handle.beenden();
        tracing::info!(token = %token, remote = %remote, sitzung = %handle.id(), "Sitzung beendet");
        Ok(handle.id())
    }

    pub fn sitzung(&self, remote: &SocketAddr) -> Option<Arc<SitzungsHandle>> {
        self.inner.sitzungen.get(remote).map(|h| Arc::clone(h.value()))
    }

    pub fn sitzung_zu_token(&self, token: &SessionToken) -> Option<Arc<SitzungsHandle>> {
        let remote = *self.inner.token_index.get(token)?;
        self.sitzung(&remote)
    }

    /// Beendet Sitzungen ohne Aktivitaet seit `timeout`
    ///
    /// Gibt die Adressen der entfernten Sitzungen zurueck.
    pub fn inaktive_bereinigen(&self, timeout: Duration) -> Vec<SocketAddr> {
        let inaktive: Vec<SocketAddr> = self
            .inner
            .sitzungen
            .iter()
            .filter(|e| e.ist_inaktiv(timeout))
            .map(|e| *e.key())
            .collect();

        for remote in &inaktive {
            if let Some((_, handle)) = self.inner.sitzungen.remove(remote) {
                self.token_entfernen(&handle);
                handle.beenden();
                tracing::warn!(remote = %remote, sitzung = %handle.id(), "Inaktive Sitzung entfernt (Timeout)");
            }
        }
        inaktive
    }

    /// Beendet alle Sitzungen (Shutdown)
    pub fn alle_beenden(&self) {
        let alle: Vec<SocketAddr> = self.inner.sitzungen.iter().map(|e| *e.key()).collect();
        for remote in alle {
            if let Some((_, handle)) = self.inner.sitzungen.remove(&remote) {
                handle.beenden();
            }
        }
        self.inner.token_index.clear();
        tracing::info!("Alle Sitzungen beendet");
    }

    pub fn anzahl(&self) -> usize {
        self.inner.sitzungen.len()
    }

    // -----------------------------------------------------------------------
    // Intern
    // -----------------------------------------------------------------------

    /// Entfernt die Sitzung nur, wenn unter `remote` noch dieselbe eingetragen ist
    fn abmelden(&self, remote: SocketAddr, id: SessionId) {
        if let Some((_, handle)) = self.inner.sitzungen.remove_if(&remote, |_, h| h.id() == id) {
            self.token_entfernen(&handle);
            tracing::debug!(remote = %remote, sitzung = %id, "Sitzung abgemeldet");
        }
    }

    fn token_entfernen(&self, handle: &SitzungsHandle) {
        if let Some(token) = handle.token() {
            let remote = handle.gegenstelle();
            self.inner
                .token_index
                .remove_if(&token, |_, adresse| *adresse == remote);
        }
    }

    /// Traegt eine neue Sitzung unter `remote` ein, sofern dort noch keine
    /// steht, und liefert die eingetragene
    ///
    /// Kanal und Kern entstehen vor dem Zugriff auf die Tabelle; verliert
    /// die Vorbereitung das Rennen, wird sie wieder abgebaut.
    fn eintragen(&self, remote: SocketAddr, token: Option<SessionToken>) -> Arc<SitzungsHandle> {
        let vorbereitung = self.vorbereiten(remote, token);
        let eigene = vorbereitung.handle.id();

        let eingetragen = Arc::clone(
            self.inner
                .sitzungen
                .entry(remote)
                .or_insert_with(|| Arc::clone(&vorbereitung.handle))
                .value(),
        );

        if eingetragen.id() == eigene {
            self.in_betrieb_nehmen(vorbereitung);
        } else {
            tracing::debug!(remote = %remote, sitzung = %eigene, "Gleichzeitig angelegt, Vorbereitung verworfen");
            vorbereitung.verwerfen();
        }
        eingetragen
    }

    fn vorbereiten(&self, remote: SocketAddr, token: Option<SessionToken>) -> Vorbereitung {
        let inner = &self.inner;
        let id = SessionId::new();
        let (paket_tx, pakete) = mpsc::channel(inner.config.eingangs_warteschlange.max(1));
        let (steuer_tx, steuerung) = mpsc::unbounded_channel();
        let handle = Arc::new(SitzungsHandle::neu(id, remote, token.clone(), paket_tx, steuer_tx));

        let (kanal, kanal_ereignisse) = inner.fabrik.oeffnen(id);
        let kern = SitzungsKern::neu(
            id,
            token,
            remote,
            Arc::clone(&inner.config),
            kanal,
            inner.metriken.clone(),
        );

        Vorbereitung {
            handle,
            kern,
            pakete,
            steuerung,
            kanal_ereignisse,
        }
    }

    fn in_betrieb_nehmen(&self, vorbereitung: Vorbereitung) {
        let inner = &self.inner;
        let Vorbereitung {
            handle,
            kern,
            pakete,
            steuerung,
            kanal_ereignisse,
        } = vorbereitung;
        let id = handle.id();
        let remote = handle.gegenstelle();

        inner.beobachter.sitzung_begonnen(id, handle.token().as_ref(), remote);
        inner.metriken.sessions_active.inc();

        let verzeichnis: Weak<VerzeichnisInner> = Arc::downgrade(inner);
        let socket = Arc::clone(&inner.socket);
        let beobachter = Arc::clone(&inner.beobachter);
        let metriken = inner.metriken.clone();
        let abbruch = handle.abbruch();
        let span = sitzungs_span(id, remote, handle.token().as_ref());

        tokio::spawn(
            async move {
                sitzung_betreiben(kern, pakete, steuerung, kanal_ereignisse, socket, abbruch).await;

                if let Some(inner) = verzeichnis.upgrade() {
                    SessionDirectory { inner }.abmelden(remote, id);
                }
                beobachter.sitzung_beendet(id);
                metriken.sessions_active.dec();
            }
            .instrument(span),
        );
    }
}

/// Sitzung mit geoeffnetem Kanal, deren Task noch nicht laeuft
struct Vorbereitung {
    handle: Arc<SitzungsHandle>,
    kern: SitzungsKern,
    pakete: mpsc::Receiver<RtpPaket>,
    steuerung: mpsc::UnboundedReceiver<SteuerBefehl>,
    kanal_ereignisse: mpsc::Receiver<KanalEreignis>,
}

impl Vorbereitung {
    fn verwerfen(mut self) {
        self.handle.beenden();
        self.kern.abbauen();
    }
}
