//! callbridge-server – Bibliotheks-Root
//!
//! Verdrahtet Medienserver, Sitzungsverzeichnis und Steuer-API und stellt
//! den oeffentlichen Einstiegspunkt fuer Integrationstests bereit.

pub mod api;
pub mod config;

use anyhow::{Context, Result};
use axum::Router;
use callbridge_core::TranskriptBeobachter;
use callbridge_observability::{
    anfrage_protokollieren, metrics_router, trace_layer, BridgeMetrics, GespraechsProtokoll,
};
use callbridge_voice::{KanalFabrik, MedienServer, RealtimeFabrik, SessionDirectory};
use config::ServerConfig;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;

/// Haelt den gebundenen Server-Zustand zusammen
pub struct Server {
    config: ServerConfig,
    medien: Arc<MedienServer>,
    api_listener: TcpListener,
    metriken: BridgeMetrics,
}

impl Server {
    /// Bindet UDP- und HTTP-Socket mit dem echten Realtime-Backend
    pub async fn binden(config: ServerConfig) -> Result<Self> {
        let beobachter = beobachter_erstellen(&config);
        let realtime = Arc::new(config.realtime_config());
        tracing::info!(
            url = %realtime.url,
            modell = %realtime.modell,
            stimme = %realtime.stimme,
            anweisungen_zeichen = realtime.anweisungen.len(),
            "Sprach-Backend konfiguriert"
        );
        let fabrik = Arc::new(RealtimeFabrik::neu(realtime, Arc::clone(&beobachter)));
        Self::binden_mit_fabrik(config, fabrik, beobachter).await
    }

    /// Bindet mit beliebiger Kanal-Fabrik (Tests ersetzen damit das Backend)
    pub async fn binden_mit_fabrik(
        config: ServerConfig,
        fabrik: Arc<dyn KanalFabrik>,
        beobachter: Arc<dyn TranskriptBeobachter>,
    ) -> Result<Self> {
        let metriken = BridgeMetrics::neu().context("Metriken nicht registrierbar")?;
        let medien_config = Arc::new(config.medien_config()?);

        let medien = MedienServer::binden(
            config.medien_bind_adresse()?,
            medien_config,
            fabrik,
            beobachter,
            metriken.clone(),
        )
        .await
        .context("UDP-Medienport nicht bindbar")?;

        let api_adresse = config.api_bind_adresse()?;
        let api_listener = TcpListener::bind(api_adresse)
            .await
            .with_context(|| format!("Steuer-API nicht bindbar auf {api_adresse}"))?;

        Ok(Self {
            config,
            medien: Arc::new(medien),
            api_listener,
            metriken,
        })
    }

    pub fn medien_adresse(&self) -> Result<SocketAddr> {
        Ok(self.medien.lokale_adresse()?)
    }

    pub fn api_adresse(&self) -> Result<SocketAddr> {
        Ok(self.api_listener.local_addr()?)
    }

    pub fn verzeichnis(&self) -> SessionDirectory {
        self.medien.verzeichnis().clone()
    }

    /// Startet alle Subsysteme und laeuft bis Ctrl-C
    pub async fn starten(self) -> Result<()> {
        let shutdown = CancellationToken::new();
        {
            let shutdown = shutdown.clone();
            tokio::spawn(async move {
                match tokio::signal::ctrl_c().await {
                    Ok(()) => tracing::info!("Shutdown-Signal empfangen, Server wird beendet"),
                    Err(e) => tracing::error!(fehler = %e, "Signal-Handler nicht installierbar"),
                }
                shutdown.cancel();
            });
        }
        self.laufen(shutdown).await
    }

    /// Laeuft bis `shutdown` ausgeloest wird
    ///
    /// Reihenfolge:
    /// 1. RTP-Empfangs-Loop
    /// 2. Periodische Leerlauf-Bereinigung
    /// 3. Steuer-API inkl. `/metrics`
    pub async fn laufen(self, shutdown: CancellationToken) -> Result<()> {
        tracing::info!(
            medien = %self.medien_adresse()?,
            api = %self.api_adresse()?,
            "Callbridge laeuft"
        );

        let empfang = {
            let medien = Arc::clone(&self.medien);
            let shutdown = shutdown.clone();
            tokio::spawn(async move { medien.empfangs_loop(shutdown).await })
        };

        let bereinigung = tokio::spawn(bereinigen(
            self.verzeichnis(),
            Duration::from_secs(self.config.sitzung.bereinigungs_intervall_s.max(1)),
            Duration::from_secs(self.config.sitzung.leerlauf_timeout_s),
            shutdown.clone(),
        ));

        let app = router(self.verzeichnis(), self.metriken.clone());
        let ergebnis = axum::serve(self.api_listener, app)
            .with_graceful_shutdown(shutdown.clone().cancelled_owned())
            .await;

        // API beendet (auch bei Fehler): Rest herunterfahren
        shutdown.cancel();
        if let Err(e) = empfang.await {
            tracing::error!(fehler = %e, "RTP-Empfangs-Task abgebrochen");
        }
        if let Err(e) = bereinigung.await {
            tracing::error!(fehler = %e, "Bereinigungs-Task abgebrochen");
        }

        ergebnis.context("Steuer-API beendet mit Fehler")?;
        tracing::info!("Callbridge beendet");
        Ok(())
    }
}

/// Steuer-Endpunkte und `/metrics` auf einem Listener
pub fn router(verzeichnis: SessionDirectory, metriken: BridgeMetrics) -> Router {
    api::steuer_router(verzeichnis)
        .merge(metrics_router(metriken))
        .layer(axum::middleware::from_fn(anfrage_protokollieren))
        .layer(trace_layer())
}

fn beobachter_erstellen(config: &ServerConfig) -> Arc<dyn TranskriptBeobachter> {
    if !config.protokoll.aktiviert {
        return Arc::new(GespraechsProtokoll::nur_log());
    }
    match GespraechsProtokoll::mit_verzeichnis(&config.protokoll.verzeichnis) {
        Ok(p) => {
            tracing::info!(verzeichnis = %config.protokoll.verzeichnis, "Gespraechsprotokolle aktiviert");
            Arc::new(p)
        }
        Err(e) => {
            tracing::warn!(
                verzeichnis = %config.protokoll.verzeichnis,
                fehler = %e,
                "Protokollverzeichnis nicht anlegbar, Transkripte nur im Log"
            );
            Arc::new(GespraechsProtokoll::nur_log())
        }
    }
}

/// Entfernt regelmaessig Sitzungen ohne eingehende Pakete
async fn bereinigen(
    verzeichnis: SessionDirectory,
    intervall: Duration,
    timeout: Duration,
    shutdown: CancellationToken,
) {
    let mut takt = tokio::time::interval(intervall);
    takt.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    loop {
        tokio::select! {
            _ = takt.tick() => {
                let entfernt = verzeichnis.inaktive_bereinigen(timeout);
                if !entfernt.is_empty() {
                    tracing::info!(anzahl = entfernt.len(), aktiv = verzeichnis.anzahl(), "Leerlauf-Bereinigung");
                }
            }
            _ = shutdown.cancelled() => break,
        }
    }
}
