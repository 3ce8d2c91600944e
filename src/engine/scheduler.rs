use std::sync::Arc;
use std::time::Instant;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::engine::dispatch::dispatch_order;
use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TickReport {
    pub attempted: usize,
    pub assigned: usize,
    pub failed: usize,
}

/// One pass over ready orders that still lack a delivery.
///
/// Orders are dispatched one after another; a failing order is logged and the
/// pass moves on.
pub async fn run_assignment_tick(state: &AppState) -> Result<TickReport, AppError> {
    let ready = state
        .orders
        .ready_without_delivery(state.config.assignment_batch_size)
        .await?;

    let mut report = TickReport::default();
    if ready.is_empty() {
        debug!("no ready orders awaiting a courier");
        return Ok(report);
    }

    let start = Instant::now();
    for order in ready {
        report.attempted += 1;
        match dispatch_order(state, order.id).await {
            Ok(Some(_)) => report.assigned += 1,
            Ok(None) => {}
            Err(err) => {
                report.failed += 1;
                error!(order_id = %order.id, error = %err, "dispatch failed");
            }
        }
    }

    info!(
        attempted = report.attempted,
        assigned = report.assigned,
        failed = report.failed,
        elapsed_ms = start.elapsed().as_millis() as u64,
        "assignment tick finished"
    );

    Ok(report)
}

/// Drops courier connections idle for longer than the configured threshold.
pub fn run_sweep(state: &AppState) -> usize {
    let swept = state.connections.sweep_stale();

    if !swept.is_empty() {
        state
            .metrics
            .stale_connections_swept_total
            .inc_by(swept.len() as u64);
        info!(count = swept.len(), "stale courier connections removed");
    }
    state.refresh_connection_gauge();

    swept.len()
}

/// Owns the periodic assignment and sweep loops.
pub struct AssignmentScheduler {
    shutdown_tx: watch::Sender<bool>,
    handles: Vec<JoinHandle<()>>,
}

impl AssignmentScheduler {
    pub fn start(state: Arc<AppState>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let assignment = {
            let state = state.clone();
            let mut shutdown_rx = shutdown_rx.clone();
            tokio::spawn(async move {
                let mut ticker = interval(state.config.assignment_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            if let Err(err) = run_assignment_tick(&state).await {
                                error!(error = %err, "assignment tick failed");
                            }
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }

                info!("assignment loop stopped");
            })
        };

        let sweep = {
            let mut shutdown_rx = shutdown_rx;
            tokio::spawn(async move {
                let mut ticker = interval(state.config.sweep_interval);
                ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

                loop {
                    tokio::select! {
                        _ = ticker.tick() => {
                            run_sweep(&state);
                        }
                        _ = shutdown_rx.changed() => break,
                    }
                }

                info!("connection sweep stopped");
            })
        };

        info!("scheduler started");

        Self {
            shutdown_tx,
            handles: vec![assignment, sweep],
        }
    }

    /// Signals both loops and waits for the tick in flight to finish.
    pub async fn shutdown(self) {
        if self.shutdown_tx.send(true).is_err() {
            debug!("scheduler loops already gone");
        }

        for handle in self.handles {
            if let Err(err) = handle.await {
                warn!(error = %err, "scheduler task ended abnormally");
            }
        }
    }
}
