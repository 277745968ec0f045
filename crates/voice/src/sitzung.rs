//! Anrufsitzung: Kern-Zustandsmaschine und Sitzungs-Task
//!
//! [`SitzungsKern`] haelt den gesamten Zustand eines Anrufs (RTP,
//! Eingangspuffer, Wiedergabe, Barge-in, Sprachkanal) und ist rein
//! synchron: Zeit kommt als `Instant` herein, Pakete gehen als Bytes
//! hinaus. [`sitzung_betreiben`] treibt den Kern in einem eigenen Task
//! mit Paketen, Backend-Ereignissen und dem 20-ms-Takt.
//!
//! ```text
//! UDP -> SitzungsHandle::paket_zustellen -> mpsc -> Task
//! API -> SitzungsHandle::starten ---------> mpsc -> Task
//!                                                   |
//!   Takt (20 ms) -> ingress_takt -> SprachKanal     |
//!                -> egress_takt  -> UDP send_to     |
//!   KanalEreignis -> backend_ereignis <-------------+
//! ```

use bytes::Bytes;
use callbridge_audio::{pcm16_aus_bytes, pcm16_zu_bytes, umrechnen, AudioResult};
use callbridge_core::{BridgeError, Result, SessionId, SessionToken};
use callbridge_observability::{token_aufzeichnen, BridgeMetrics, VerwerfGrund};
use callbridge_protocol::RtpPaket;
use callbridge_realtime::{KanalEreignis, SendeErgebnis, SprachKanal};
use parking_lot::{Mutex, RwLock};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::barge_in::BargeInArbiter;
use crate::config::MedienConfig;
use crate::playback::{DeltaErgebnis, PlaybackPipeline};
use crate::rtp_sitzung::RtpSitzung;
use crate::timing_buffer::TimingBuffer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SitzungsZustand {
    Aktiv,
    Schliessend,
    Geschlossen,
}

// ---------------------------------------------------------------------------
// SitzungsKern
// ---------------------------------------------------------------------------

pub struct SitzungsKern {
    id: SessionId,
    token: Option<SessionToken>,
    config: Arc<MedienConfig>,
    rtp: RtpSitzung,
    eingang: TimingBuffer,
    wiedergabe: PlaybackPipeline,
    arbiter: BargeInArbiter,
    kanal: SprachKanal,
    metriken: BridgeMetrics,
    zustand: SitzungsZustand,
    gestartet: bool,
    frames_empfangen: u64,
}

impl SitzungsKern {
    pub fn neu(
        id: SessionId,
        token: Option<SessionToken>,
        gegenstelle: SocketAddr,
        config: Arc<MedienConfig>,
        kanal: SprachKanal,
        metriken: BridgeMetrics,
    ) -> Self {
        let rtp = RtpSitzung::neu(gegenstelle, config.standard_codec, config.samples_schmal());
        Self::mit_rtp(id, token, rtp, config, kanal, metriken)
    }

    /// Wie [`SitzungsKern::neu`], aber mit vorgegebenem RTP-Zustand
    pub fn mit_rtp(
        id: SessionId,
        token: Option<SessionToken>,
        rtp: RtpSitzung,
        config: Arc<MedienConfig>,
        kanal: SprachKanal,
        metriken: BridgeMetrics,
    ) -> Self {
        // Eingangspuffer haelt lineare Schmalband-Frames
        let eingang = TimingBuffer::neu(
            config.eingang.clone(),
            Bytes::from(vec![0u8; config.samples_schmal() * 2]),
        );
        let wiedergabe = PlaybackPipeline::neu(
            config.ausgang.clone(),
            rtp.codec(),
            config.breitband_rate,
            config.schmalband_rate,
            config.samples_schmal(),
        );
        let arbiter = BargeInArbiter::neu(config.barge_in.clone());

        Self {
            id,
            token,
            config,
            rtp,
            eingang,
            wiedergabe,
            arbiter,
            kanal,
            metriken,
            zustand: SitzungsZustand::Aktiv,
            gestartet: false,
            frames_empfangen: 0,
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn token(&self) -> Option<&SessionToken> {
        self.token.as_ref()
    }

    pub fn token_setzen(&mut self, token: SessionToken) {
        self.token = Some(token);
    }

    pub fn gegenstelle(&self) -> SocketAddr {
        self.rtp.gegenstelle()
    }

    pub fn zustand(&self) -> SitzungsZustand {
        self.zustand
    }

    pub fn ist_gestartet(&self) -> bool {
        self.gestartet
    }

    pub fn wiedergabe(&self) -> &PlaybackPipeline {
        &self.wiedergabe
    }

    pub fn rtp(&self) -> &RtpSitzung {
        &self.rtp
    }

    /// Fuellstand (Eingang, Ausgang) in Frames
    pub fn gepuffert(&self) -> (usize, usize) {
        (self.eingang.len(), self.wiedergabe.gepuffert())
    }

    /// Erstes Paket nach dem Anlegen
    ///
    /// Manche Gegenstellen senden erst, nachdem sie selbst etwas empfangen
    /// haben. Deshalb geht sofort ein Stille-Frame hinaus (abschaltbar).
    pub fn aktivieren(&mut self) -> Option<Vec<u8>> {
        if !self.config.stille_beim_start {
            return None;
        }
        let stille = vec![self.rtp.codec().stille_byte(); self.config.samples_schmal()];
        tracing::debug!(sitzung = %self.id, remote = %self.gegenstelle(), "Stille-Frame zum Start");
        Some(self.rtp.paket_bauen(stille).encode())
    }

    /// Steuerebene meldet: Medien duerfen fliessen
    pub fn starten(&mut self) {
        if !self.gestartet {
            self.gestartet = true;
            tracing::info!(
                sitzung = %self.id,
                token = self.token.as_ref().map(|t| t.kurz()).unwrap_or("-"),
                "Sitzung gestartet"
            );
        }
    }

    /// Verarbeitet ein eingehendes RTP-Paket
    pub fn paket_empfangen(&mut self, paket: &RtpPaket, jetzt: Instant) -> AudioResult<()> {
        let variante = match self.rtp.eingang(&paket.header) {
            Ok(v) => v,
            Err(e) => {
                self.metriken.frame_verworfen(VerwerfGrund::PayloadTyp, 1);
                return Err(e);
            }
        };
        self.wiedergabe.codec_setzen(self.rtp.codec());

        let samples = variante.dekodieren(&paket.nutzdaten);
        if samples.is_empty() {
            return Ok(());
        }
        self.frames_empfangen += 1;
        if self.frames_empfangen % 500 == 0 {
            let (ein, aus) = self.gepuffert();
            tracing::debug!(
                sitzung = %self.id,
                frames = self.frames_empfangen,
                eingang = ein,
                ausgang = aus,
                "Sitzungsstatistik"
            );
        }

        if self.arbiter.lokal_frame(&samples, &mut self.wiedergabe) {
            self.metriken.barge_in(true);
        }

        let pcm = Bytes::from(pcm16_zu_bytes(&samples));
        if self.config.eingang.aktiviert {
            let verworfen = self.eingang.push(pcm, jetzt);
            if verworfen > 0 {
                self.metriken
                    .frame_verworfen(VerwerfGrund::EingangUeberlauf, verworfen as u64);
            }
        } else {
            self.an_backend(&pcm, true);
        }
        Ok(())
    }

    fn an_backend(&mut self, schmal_pcm: &[u8], zaehlen: bool) {
        let samples = match pcm16_aus_bytes(schmal_pcm) {
            Ok(s) => s,
            Err(e) => {
                tracing::warn!(sitzung = %self.id, fehler = %e, "Eingangs-Frame verworfen");
                return;
            }
        };
        let breit = umrechnen(&samples, self.config.schmalband_rate, self.config.breitband_rate);
        match self.kanal.audio_senden(Bytes::from(pcm16_zu_bytes(&breit))) {
            SendeErgebnis::Eingereiht => {}
            SendeErgebnis::NichtVerbunden if zaehlen => {
                self.metriken.frame_verworfen(VerwerfGrund::BackendNichtBereit, 1);
            }
            SendeErgebnis::Ueberlastet if zaehlen => {
                tracing::trace!(sitzung = %self.id, "Backend-Warteschlange voll");
                self.metriken.frame_verworfen(VerwerfGrund::SitzungUeberlastet, 1);
            }
            _ => {}
        }
    }

    /// Eingangstakt: ein Frame (oder Stille) Richtung Backend
    pub fn ingress_takt(&mut self, jetzt: Instant) {
        if !self.config.eingang.aktiviert {
            return;
        }
        let ausgabe = self.eingang.takt(jetzt);
        self.an_backend(&ausgabe.frame, !ausgabe.ist_stille);
    }

    /// Ausgangstakt: liefert das naechste RTP-Paket fuer die Gegenstelle
    pub fn egress_takt(&mut self, jetzt: Instant) -> Vec<u8> {
        let ausgabe = self.wiedergabe.takt(jetzt);
        self.rtp.paket_bauen(ausgabe.frame.to_vec()).encode()
    }

    /// Verarbeitet ein Ereignis des Sprachkanals
    ///
    /// Gibt `false` zurueck, wenn die Sitzung enden muss.
    pub fn backend_ereignis(&mut self, ereignis: KanalEreignis, jetzt: Instant) -> bool {
        match ereignis {
            KanalEreignis::Verbunden => {
                tracing::info!(sitzung = %self.id, "Backend verbunden");
            }
            KanalEreignis::SpracheBegonnen => {
                if self.arbiter.remote_sprache(&mut self.wiedergabe) {
                    self.metriken.barge_in(false);
                }
            }
            KanalEreignis::SpracheBeendet => {
                tracing::debug!(sitzung = %self.id, "Backend: Sprache beendet");
            }
            KanalEreignis::AntwortErstellt { antwort_id } => {
                if self.wiedergabe.antwort_erstellt(antwort_id) {
                    self.arbiter.zuruecksetzen();
                }
            }
            KanalEreignis::Audio { antwort_id, pcm } => {
                match self.wiedergabe.audio_delta(antwort_id.as_deref(), &pcm, jetzt) {
                    DeltaErgebnis::Angenommen {
                        verworfen,
                        gestartet,
                        ..
                    } => {
                        if gestartet {
                            self.arbiter.zuruecksetzen();
                        }
                        if verworfen > 0 {
                            self.metriken
                                .frame_verworfen(VerwerfGrund::AusgangUeberlauf, verworfen as u64);
                        }
                    }
                    DeltaErgebnis::Veraltet | DeltaErgebnis::Fremd => {
                        tracing::trace!(sitzung = %self.id, antwort = ?antwort_id, "Audio-Delta verworfen");
                        self.metriken.frame_verworfen(VerwerfGrund::VeralteteAntwort, 1);
                    }
                }
            }
            KanalEreignis::AntwortFertig { antwort_id } => {
                let verworfen = self.wiedergabe.antwort_fertig(antwort_id.as_deref(), jetzt);
                if verworfen > 0 {
                    self.metriken
                        .frame_verworfen(VerwerfGrund::AusgangUeberlauf, verworfen as u64);
                }
            }
            KanalEreignis::VerbindungVerloren => {
                // Veraltetes Audio darf nach der Wiederverbindung nicht mehr spielen
                let verworfen = self.wiedergabe.unterbrechen();
                self.arbiter.zuruecksetzen();
                self.metriken.backend_reconnects.inc();
                tracing::warn!(sitzung = %self.id, verworfen, "Backend-Verbindung verloren");
            }
            KanalEreignis::Geschlossen => {
                tracing::warn!(sitzung = %self.id, "Backend endgueltig geschlossen");
                return false;
            }
        }
        true
    }

    /// Gibt alle Puffer frei und schliesst den Sprachkanal; idempotent
    pub fn abbauen(&mut self) {
        if self.zustand == SitzungsZustand::Geschlossen {
            return;
        }
        self.zustand = SitzungsZustand::Schliessend;
        let eingang = self.eingang.leeren();
        let ausgang = self.wiedergabe.unterbrechen();
        self.kanal.schliessen();
        self.zustand = SitzungsZustand::Geschlossen;
        tracing::info!(
            sitzung = %self.id,
            remote = %self.gegenstelle(),
            empfangen = self.rtp.empfangen(),
            gesendet = self.rtp.gesendet(),
            verworfen = eingang + ausgang,
            "Sitzung abgebaut"
        );
    }
}

// ---------------------------------------------------------------------------
// SitzungsHandle
// ---------------------------------------------------------------------------

/// Steuerbefehle an den Sitzungs-Task
///
/// Laufen ueber einen eigenen, unbegrenzten Kanal, damit volle
/// Paket-Warteschlangen sie nicht verdraengen.
#[derive(Debug)]
pub enum SteuerBefehl {
    Starten,
    Token(SessionToken),
}

/// Geteilter Zugriff auf eine laufende Sitzung (Verzeichnis, UDP-Server)
pub struct SitzungsHandle {
    id: SessionId,
    gegenstelle: SocketAddr,
    token: RwLock<Option<SessionToken>>,
    pakete: mpsc::Sender<RtpPaket>,
    steuerung: mpsc::UnboundedSender<SteuerBefehl>,
    letzte_aktivitaet: Mutex<Instant>,
    gestartet: AtomicBool,
    abbruch: CancellationToken,
}

/// Ergebnis einer Paketzustellung
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Zustellung {
    Zugestellt,
    Ueberlastet,
    Beendet,
}

impl SitzungsHandle {
    pub fn neu(
        id: SessionId,
        gegenstelle: SocketAddr,
        token: Option<SessionToken>,
        pakete: mpsc::Sender<RtpPaket>,
        steuerung: mpsc::UnboundedSender<SteuerBefehl>,
    ) -> Self {
        Self {
            id,
            gegenstelle,
            token: RwLock::new(token),
            pakete,
            steuerung,
            letzte_aktivitaet: Mutex::new(Instant::now()),
            gestartet: AtomicBool::new(false),
            abbruch: CancellationToken::new(),
        }
    }

    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn gegenstelle(&self) -> SocketAddr {
        self.gegenstelle
    }

    pub fn token(&self) -> Option<SessionToken> {
        self.token.read().clone()
    }

    /// Ordnet der Sitzung ein neues Token zu
    ///
    /// Schlaegt fehl, wenn der Sitzungs-Task nicht mehr laeuft; das Token
    /// bleibt dann unveraendert.
    pub fn token_setzen(&self, token: SessionToken) -> Result<()> {
        self.steuern(SteuerBefehl::Token(token.clone()))?;
        *self.token.write() = Some(token);
        Ok(())
    }

    /// Reicht ein Paket an den Sitzungs-Task weiter, ohne zu blockieren
    pub fn paket_zustellen(&self, paket: RtpPaket) -> Zustellung {
        self.aktivitaet();
        match self.pakete.try_send(paket) {
            Ok(()) => Zustellung::Zugestellt,
            Err(mpsc::error::TrySendError::Full(_)) => Zustellung::Ueberlastet,
            Err(mpsc::error::TrySendError::Closed(_)) => Zustellung::Beendet,
        }
    }

    /// Start-Benachrichtigung; `Ok(false)`, wenn bereits gestartet
    pub fn starten(&self) -> Result<bool> {
        self.aktivitaet();
        if self.gestartet.swap(true, Ordering::SeqCst) {
            return Ok(false);
        }
        if let Err(e) = self.steuern(SteuerBefehl::Starten) {
            self.gestartet.store(false, Ordering::SeqCst);
            return Err(e);
        }
        Ok(true)
    }

    fn steuern(&self, befehl: SteuerBefehl) -> Result<()> {
        if self.abbruch.is_cancelled() {
            tracing::warn!(sitzung = %self.id, befehl = ?befehl, "Steuerbefehl an abgebrochene Sitzung");
            return Err(BridgeError::SitzungBeendet(self.id.to_string()));
        }
        self.steuerung.send(befehl).map_err(|e| {
            tracing::warn!(sitzung = %self.id, befehl = ?e.0, "Steuerbefehl nicht zustellbar, Sitzungs-Task beendet");
            BridgeError::SitzungBeendet(self.id.to_string())
        })
    }

    pub fn ist_gestartet(&self) -> bool {
        self.gestartet.load(Ordering::SeqCst)
    }

    /// Beendet den Sitzungs-Task; idempotent
    pub fn beenden(&self) {
        self.abbruch.cancel();
    }

    pub fn ist_beendet(&self) -> bool {
        self.abbruch.is_cancelled() || self.pakete.is_closed() || self.steuerung.is_closed()
    }

    pub fn abbruch(&self) -> CancellationToken {
        self.abbruch.clone()
    }

    fn aktivitaet(&self) {
        *self.letzte_aktivitaet.lock() = Instant::now();
    }

    /// Kein Paket und keine Steuerung seit `timeout`
    pub fn ist_inaktiv(&self, timeout: Duration) -> bool {
        self.letzte_aktivitaet.lock().elapsed() > timeout
    }
}

// ---------------------------------------------------------------------------
// Sitzungs-Task
// ---------------------------------------------------------------------------

/// Treibt einen Sitzungskern bis zum Abbruch, Backend-Ende oder
/// dauerhaften Sendefehlern. Baut die Sitzung auf jedem Weg ab.
pub async fn sitzung_betreiben(
    mut kern: SitzungsKern,
    mut pakete: mpsc::Receiver<RtpPaket>,
    mut steuerung: mpsc::UnboundedReceiver<SteuerBefehl>,
    mut kanal_ereignisse: mpsc::Receiver<KanalEreignis>,
    socket: Arc<UdpSocket>,
    abbruch: CancellationToken,
) {
    let ziel = kern.gegenstelle();
    let metriken = kern.metriken.clone();
    let max_fehler = kern.config.max_sendefehler.max(1);
    let frame_dauer = kern.config.frame_dauer;
    let mut sendefehler: u32 = 0;

    if let Some(paket) = kern.aktivieren() {
        match socket.send_to(&paket, ziel).await {
            Ok(_) => metriken.rtp_packets_sent.inc(),
            Err(e) => tracing::warn!(sitzung = %kern.id(), remote = %ziel, fehler = %e, "Stille-Frame nicht gesendet"),
        }
    }

    let mut takt = tokio::time::interval_at(tokio::time::Instant::now() + frame_dauer, frame_dauer);

    loop {
        tokio::select! {
            _ = abbruch.cancelled() => {
                tracing::debug!(sitzung = %kern.id(), "Sitzung abgebrochen");
                break;
            }

            befehl = steuerung.recv() => match befehl {
                Some(SteuerBefehl::Starten) => kern.starten(),
                Some(SteuerBefehl::Token(token)) => {
                    token_aufzeichnen(&tracing::Span::current(), &token);
                    kern.token_setzen(token);
                }
                None => break,
            },

            paket = pakete.recv() => match paket {
                Some(paket) => {
                    if let Err(e) = kern.paket_empfangen(&paket, Instant::now()) {
                        tracing::debug!(
                            sitzung = %kern.id(),
                            seq = paket.header.sequenz,
                            fehler = %e,
                            "Paket verworfen"
                        );
                    }
                }
                None => break,
            },

            ereignis = kanal_ereignisse.recv() => match ereignis {
                Some(ereignis) => {
                    if !kern.backend_ereignis(ereignis, Instant::now()) {
                        break;
                    }
                }
                None => break,
            },

            _ = takt.tick() => {
                let jetzt = Instant::now();
                kern.ingress_takt(jetzt);
                let paket = kern.egress_takt(jetzt);
                match socket.send_to(&paket, ziel).await {
                    Ok(_) => {
                        sendefehler = 0;
                        metriken.rtp_packets_sent.inc();
                    }
                    Err(e) => {
                        sendefehler += 1;
                        tracing::warn!(
                            sitzung = %kern.id(),
                            remote = %ziel,
                            fehler = %e,
                            fehler_in_folge = sendefehler,
                            "UDP-Sendefehler"
                        );
                        if sendefehler >= max_fehler {
                            tracing::error!(sitzung = %kern.id(), remote = %ziel, "Zu viele Sendefehler, Sitzung wird beendet");
                            break;
                        }
                    }
                }
            }
        }
    }

    kern.abbauen();
}
