//! Background maintenance: nonce pruning and purging of long-frozen domains

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use bastion_core::{DomainId, RequestContext, Result};
use bastion_domains::DomainService;
use bastion_token::{TokenService, PRUNE_INTERVAL};

pub const PURGE_INTERVAL: Duration = Duration::from_secs(60 * 60);

/// Totals from one maintenance pass.
#[derive(Debug, Clone, Default, Serialize)]
pub struct PurgeSummary {
    pub nonces: u64,
    pub domains: Vec<DomainId>,
    pub invitations: u64,
    pub tombstones: u64,
}

/// Expired nonces, then domains frozen past retention with their tombstones.
pub async fn purge_once(tokens: &TokenService, domains: &DomainService) -> Result<PurgeSummary> {
    let nonces = tokens.blacklist().prune(Utc::now()).await?;
    let report = domains.purge_frozen(&RequestContext::background()).await?;
    Ok(PurgeSummary {
        nonces,
        domains: report.domains,
        invitations: report.invitations,
        tombstones: report.tombstones,
    })
}

/// Starts the periodic tasks; each stops when `shutdown` is cancelled.
pub fn spawn_background(
    tokens: Arc<TokenService>,
    domains: Arc<DomainService>,
    shutdown: CancellationToken,
) -> Vec<JoinHandle<()>> {
    let pruner = tokens.blacklist().clone().spawn_pruner(PRUNE_INTERVAL, shutdown.clone());
    let purger = spawn_frozen_purger(domains, PURGE_INTERVAL, shutdown);
    vec![pruner, purger]
}

fn spawn_frozen_purger(
    domains: Arc<DomainService>,
    interval: Duration,
    shutdown: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("frozen domain purger stopped");
                    return;
                }
                _ = ticker.tick() => {
                    match domains.purge_frozen(&RequestContext::background()).await {
                        Ok(report) if report.domains.is_empty() && report.tombstones == 0 => {}
                        Ok(report) => info!(
                            domains = report.domains.len(),
                            invitations = report.invitations,
                            tombstones = report.tombstones,
                            "purged frozen domains"
                        ),
                        Err(e) => error!(error = %e, "frozen domain purge failed"),
                    }
                }
            }
        }
    })
}
