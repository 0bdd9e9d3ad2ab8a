//! Pending order sweeper
//!
//! Periodically re-attempts execution of every PENDING order. Each order is
//! independent: a failed price lookup or store error for one order does not
//! stop the others. Fill attempts are idempotent because the ledger only
//! moves an order out of PENDING once.

use chrono::{DateTime, Utc};
use futures_util::stream::{self, StreamExt};
use serde::Serialize;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::config::SweeperConfig;
use crate::engine::{ExecutionResult, OrderService};
use crate::error::Result;

/// Orders re-attempted concurrently within one sweep
const SWEEP_CONCURRENCY: usize = 8;

/// Result of a single sweep
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub total_checked: u64,
    pub executed_count: u64,
    pub errors: u64,
}

/// Cumulative sweeper statistics
#[derive(Debug, Clone, Default, Serialize)]
pub struct SweepStats {
    pub cycles: u64,
    pub orders_checked: u64,
    pub orders_filled: u64,
    pub errors: u64,
    pub last_sweep: Option<DateTime<Utc>>,
}

pub struct OrderSweeper {
    service: Arc<OrderService>,
    interval: Duration,
    /// Running flag
    running: Arc<AtomicBool>,
    /// Bumped on every start and stop; a loop exits once its generation is stale
    generation: Arc<AtomicU64>,
    stats: Arc<RwLock<SweepStats>>,
}

impl OrderSweeper {
    pub fn new(service: Arc<OrderService>, config: &SweeperConfig) -> Self {
        Self {
            service,
            interval: Duration::from_secs(config.interval_secs.max(1)),
            running: Arc::new(AtomicBool::new(false)),
            generation: Arc::new(AtomicU64::new(0)),
            stats: Arc::new(RwLock::new(SweepStats::default())),
        }
    }

    pub async fn get_stats(&self) -> SweepStats {
        self.stats.read().await.clone()
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Start the sweep loop in the background
    pub fn start(&self) {
        if self.running.swap(true, Ordering::SeqCst) {
            warn!("Order sweeper already running");
            return;
        }

        info!("Starting order sweeper (interval: {:?})", self.interval);

        let service = self.service.clone();
        let running = self.running.clone();
        let generation = self.generation.clone();
        let stats = self.stats.clone();
        let period = self.interval;
        let mine = generation.fetch_add(1, Ordering::SeqCst) + 1;

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            let active =
                || running.load(Ordering::SeqCst) && generation.load(Ordering::SeqCst) == mine;

            while active() {
                interval.tick().await;
                if !active() {
                    break;
                }

                if let Err(e) = Self::sweep(&service, &stats).await {
                    error!("Order sweep failed: {}", e);
                }
            }

            info!("Order sweeper stopped");
        });
    }

    /// Stop the sweep loop after the current cycle
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);
        info!("Order sweeper stop requested");
    }

    /// Run one sweep now
    pub async fn run_once(&self) -> Result<SweepReport> {
        Self::sweep(&self.service, &self.stats).await
    }

    async fn sweep(service: &OrderService, stats: &RwLock<SweepStats>) -> Result<SweepReport> {
        let pending = service.pending_orders(None).await?;

        let mut report = SweepReport {
            total_checked: pending.len() as u64,
            ..SweepReport::default()
        };

        if !pending.is_empty() {
            let results: Vec<_> = stream::iter(pending)
                .map(|order| async move { (order.id, service.execute_pending(&order).await) })
                .buffer_unordered(SWEEP_CONCURRENCY)
                .collect()
                .await;

            for (order_id, result) in results {
                match result {
                    Ok(ExecutionResult::Filled(_)) => report.executed_count += 1,
                    Ok(ExecutionResult::Pending(reason)) => {
                        debug!("Order {} left pending: {}", order_id, reason);
                    }
                    Err(e) => {
                        report.errors += 1;
                        warn!("Sweep of order {} failed: {}", order_id, e);
                    }
                }
            }
        }

        if report.total_checked > 0 {
            info!(
                "Sweep complete: checked={} filled={} errors={}",
                report.total_checked, report.executed_count, report.errors
            );
        }

        let mut stats = stats.write().await;
        stats.cycles += 1;
        stats.orders_checked += report.total_checked;
        stats.orders_filled += report.executed_count;
        stats.errors += report.errors;
        stats.last_sweep = Some(Utc::now());

        Ok(report)
    }
}
