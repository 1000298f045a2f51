//! Service Alerter
//!
//! Runs the metadata refresher and both alert engines as background loops
//! and serves the liveness endpoint in the foreground.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use incident_notify::{Dispatcher, PagerDutyChannel};
use service_alerter::allocations::AllocationAlertEngine;
use service_alerter::config::Cli;
use service_alerter::consul::{ConsulClient, ServiceMesh};
use service_alerter::health::HealthAlertEngine;
use service_alerter::metadata::{MetadataRefresher, MetadataStore};
use service_alerter::nomad::{NomadClient, Orchestrator};
use service_alerter::{server, telemetry};
use tokio::task::JoinSet;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    telemetry::init(cli.log_format);

    info!(
        nomad = %cli.nomad_addr,
        consul = %cli.consul_addr,
        datacenter = cli.consul_datacenter.as_deref().unwrap_or("default"),
        labels = %cli.labels(),
        "Starting service alerter"
    );

    let nomad: Arc<dyn Orchestrator> = Arc::new(
        NomadClient::new(&cli.nomad_addr, cli.http_timeout())
            .context("Failed to create Nomad client")?,
    );
    let consul: Arc<dyn ServiceMesh> = Arc::new(
        ConsulClient::new(&cli.consul_addr, cli.consul_datacenter.clone(), cli.http_timeout())
            .context("Failed to create Consul client")?,
    );

    let dispatcher = if cli.alerts_enabled() {
        let pagerduty = PagerDutyChannel::with_timeout(&cli.pagerduty_url, cli.http_timeout())
            .context("Failed to create PagerDuty channel")?;
        Dispatcher::with_channels(vec![Arc::new(pagerduty)])
    } else {
        warn!(
            alert_switch = %cli.alert_switch,
            "Alert delivery disabled, incidents will only be logged"
        );
        Dispatcher::disabled()
    };
    let dispatcher = Arc::new(dispatcher);
    info!(channels = dispatcher.channel_count(), "Alert delivery configured");

    let store = MetadataStore::new();
    let refresher =
        MetadataRefresher::new(Arc::clone(&nomad), store.clone(), cli.metadata_refresh());
    if refresher.refresh_once().await.is_none() {
        warn!("Initial metadata refresh failed, health alerts wait for the next refresh");
    }

    let health = HealthAlertEngine::new(
        consul,
        store,
        Arc::clone(&dispatcher),
        cli.labels(),
        cli.consul_wait(),
    );
    let allocations =
        AllocationAlertEngine::new(nomad, dispatcher, cli.labels(), cli.allocation_interval())
            .with_min_age(cli.pending_age());

    let mut loops = JoinSet::new();
    loops.spawn(refresher.run());
    loops.spawn(health.run());
    loops.spawn(allocations.run());

    tokio::select! {
        result = server::run_server(&cli.listen_addr) => result?,
        Some(joined) = loops.join_next() => {
            if let Err(e) = joined {
                error!(error = %e, "Background loop panicked");
            }
            anyhow::bail!("background loop exited unexpectedly");
        }
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for shutdown signal")?;
            info!("Shutdown signal received");
        }
    }

    Ok(())
}
