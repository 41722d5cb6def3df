//! Batch operation coordinator.
//!
//! Setters apply one mutation across the filtered view in a single collection
//! swap. The launch/pause pipelines keep a progress ledger per run and pace
//! the work in fixed-size concurrent waves with a small stagger, purely for
//! animated feedback; each wave fully settles before the next starts.
//! Ledgers stay visible after completion until explicitly dismissed.

use dashmap::DashMap;
use futures::future::join_all;
use parking_lot::RwLock;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

use crate::context::DeskContext;
use crate::desk_state::{DeskError, DeskState, LaunchOutcome};
use crate::model::{PriceMode, PriceSource, SecurityType, Side};
use crate::view::{self, ViewFilter};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchVariant {
    All,
    Bid,
    Ask,
}

impl BatchVariant {
    pub fn touches(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (BatchVariant::All, _) | (BatchVariant::Bid, Side::Bid) | (BatchVariant::Ask, Side::Ask)
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BatchKind {
    Launch,
    Pause,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Pending,
    Processing,
    Success,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProgressItem {
    pub stream_id: String,
    pub security_id: String,
    /// Grouping key, display only
    pub security_type: SecurityType,
    pub status: ProgressStatus,
    pub expected_bid_orders: u8,
    pub expected_ask_orders: u8,
    #[serde(default)]
    pub message: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchProgress {
    pub id: String,
    pub kind: BatchKind,
    pub variant: BatchVariant,
    pub items: Vec<ProgressItem>,
    pub started_at_ms: i64,
    pub completed: bool,
}

#[derive(Debug, Clone)]
pub struct BatchTimings {
    pub batch_size: usize,
    pub launch_stagger: Duration,
    pub pause_stagger: Duration,
    pub launch_latency: Duration,
    pub side_launch_latency: Duration,
}

impl Default for BatchTimings {
    fn default() -> Self {
        Self {
            batch_size: 2,
            launch_stagger: Duration::from_millis(150),
            pause_stagger: Duration::from_millis(100),
            launch_latency: Duration::from_millis(300),
            side_launch_latency: Duration::from_millis(250),
        }
    }
}

pub struct BatchCoordinator {
    state: Arc<RwLock<DeskState>>,
    ledgers: DashMap<String, BatchProgress>,
    ctx: DeskContext,
    timings: BatchTimings,
}

impl BatchCoordinator {
    pub fn new(state: Arc<RwLock<DeskState>>, ctx: DeskContext, timings: BatchTimings) -> Self {
        Self {
            state,
            ledgers: DashMap::new(),
            ctx,
            timings,
        }
    }

    fn target_ids(&self, filter: &ViewFilter) -> Vec<String> {
        let state = self.state.read();
        view::filter_stream_ids(state.streams(), filter)
    }

    // --- Atomic batch setters ---

    pub fn set_price_source(
        &self,
        filter: &ViewFilter,
        source: PriceSource,
    ) -> Result<usize, DeskError> {
        let ids = self.target_ids(filter);
        self.state.write().batch_set_price_source(&ids, source)?;
        Ok(ids.len())
    }

    pub fn set_price_mode(&self, filter: &ViewFilter, mode: PriceMode) -> Result<usize, DeskError> {
        let ids = self.target_ids(filter);
        self.state
            .write()
            .update_streams(&ids, false, |s| s.price_mode = mode)?;
        Ok(ids.len())
    }

    pub fn set_max_lvls(
        &self,
        filter: &ViewFilter,
        bid: Option<u8>,
        ask: Option<u8>,
    ) -> Result<usize, DeskError> {
        let ids = self.target_ids(filter);
        let bid = bid.map(|v| v.min(crate::model::MAX_LEVELS_CAP));
        let ask = ask.map(|v| v.min(crate::model::MAX_LEVELS_CAP));
        self.state.write().update_streams(&ids, false, |s| {
            if let Some(v) = bid {
                s.bid.max_lvls = Some(v);
            }
            if let Some(v) = ask {
                s.ask.max_lvls = Some(v);
            }
        })?;
        Ok(ids.len())
    }

    pub fn set_quantity(&self, filter: &ViewFilter, quantity: i64) -> Result<usize, DeskError> {
        let ids = self.target_ids(filter);
        self.state.write().update_streams(&ids, false, |s| {
            for level in s
                .bid
                .spread_matrix
                .iter_mut()
                .chain(s.ask.spread_matrix.iter_mut())
            {
                level.quantity = quantity;
            }
        })?;
        Ok(ids.len())
    }

    /// Positive widens both sides away from the reference, per the side
    /// sign convention.
    pub fn adjust_spreads(
        &self,
        filter: &ViewFilter,
        adjustment_bps: Decimal,
    ) -> Result<usize, DeskError> {
        let ids = self.target_ids(filter);
        self.state.write().update_streams(&ids, false, |s| {
            for level in &mut s.bid.spread_matrix {
                level.delta_bps += adjustment_bps;
            }
            for level in &mut s.ask.spread_matrix {
                level.delta_bps -= adjustment_bps;
            }
        })?;
        Ok(ids.len())
    }

    // --- Progress-tracked pipelines ---

    /// Build the launch ledger up front; `run_launch` drives it. Split so a
    /// caller can hand the id back for polling while the pipeline runs.
    pub fn prepare_launch(&self, filter: &ViewFilter, variant: BatchVariant) -> String {
        self.build_ledger(filter, BatchKind::Launch, variant, false)
    }

    /// Pause ledgers pre-filter to streams that actually have active levels
    /// on the targeted side(s).
    pub fn prepare_pause(&self, filter: &ViewFilter, variant: BatchVariant) -> String {
        self.build_ledger(filter, BatchKind::Pause, variant, true)
    }

    /// Launch every targeted stream in staggered waves. The future resolves
    /// when the last wave has settled.
    pub async fn launch_with_progress(&self, filter: &ViewFilter, variant: BatchVariant) -> String {
        let ledger_id = self.prepare_launch(filter, variant);
        self.run_launch(&ledger_id).await;
        ledger_id
    }

    pub async fn run_launch(&self, ledger_id: &str) {
        let Some((variant, targets)) = self.ledger_targets(ledger_id, BatchKind::Launch) else {
            return;
        };

        info!(
            ledger_id = %ledger_id,
            count = targets.len(),
            variant = ?variant,
            "Batch launch started"
        );

        let latency = match variant {
            BatchVariant::All => self.timings.launch_latency,
            _ => self.timings.side_launch_latency,
        };

        for wave in targets.chunks(self.timings.batch_size) {
            let futures = wave.iter().enumerate().map(|(offset, stream_id)| async move {
                // Stagger within the wave, for paced visual feedback only
                tokio::time::sleep(self.timings.launch_stagger * offset as u32).await;
                self.set_status(ledger_id, stream_id, ProgressStatus::Processing, None);
                tokio::time::sleep(latency).await;

                let outcome = {
                    let mut state = self.state.write();
                    match variant {
                        BatchVariant::All => state.launch_stream(stream_id),
                        BatchVariant::Bid => state.relaunch_side(stream_id, Side::Bid),
                        BatchVariant::Ask => state.relaunch_side(stream_id, Side::Ask),
                    }
                };
                let (status, message) = Self::outcome_to_status(outcome);
                self.set_status(ledger_id, stream_id, status, message);
            });
            // Wave fully settles before the next one starts
            join_all(futures).await;
        }

        self.complete_ledger(ledger_id);
    }

    /// Pause every targeted stream. Staging-exempt, faster stagger.
    pub async fn pause_with_progress(&self, filter: &ViewFilter, variant: BatchVariant) -> String {
        let ledger_id = self.prepare_pause(filter, variant);
        self.run_pause(&ledger_id).await;
        ledger_id
    }

    pub async fn run_pause(&self, ledger_id: &str) {
        let Some((variant, targets)) = self.ledger_targets(ledger_id, BatchKind::Pause) else {
            return;
        };

        info!(
            ledger_id = %ledger_id,
            count = targets.len(),
            variant = ?variant,
            "Batch pause started"
        );

        for wave in targets.chunks(self.timings.batch_size) {
            let futures = wave.iter().enumerate().map(|(offset, stream_id)| async move {
                tokio::time::sleep(self.timings.pause_stagger * offset as u32).await;
                self.set_status(ledger_id, stream_id, ProgressStatus::Processing, None);

                let result = {
                    let mut state = self.state.write();
                    let bid = if variant.touches(Side::Bid) {
                        state.pause_side(stream_id, Side::Bid)
                    } else {
                        Ok(())
                    };
                    let ask = if variant.touches(Side::Ask) {
                        state.pause_side(stream_id, Side::Ask)
                    } else {
                        Ok(())
                    };
                    bid.and(ask)
                };
                let (status, message) = match result {
                    Ok(()) => (ProgressStatus::Success, None),
                    Err(e) => (ProgressStatus::Error, Some(e.to_string())),
                };
                self.set_status(ledger_id, stream_id, status, message);
            });
            join_all(futures).await;
        }

        self.complete_ledger(ledger_id);
    }

    fn ledger_targets(
        &self,
        ledger_id: &str,
        kind: BatchKind,
    ) -> Option<(BatchVariant, Vec<String>)> {
        let ledger = self.ledgers.get(ledger_id)?;
        if ledger.kind != kind || ledger.completed {
            return None;
        }
        let targets = ledger.items.iter().map(|i| i.stream_id.clone()).collect();
        Some((ledger.variant, targets))
    }

    pub fn get_ledger(&self, ledger_id: &str) -> Option<BatchProgress> {
        self.ledgers.get(ledger_id).map(|l| l.clone())
    }

    pub fn ledgers(&self) -> Vec<BatchProgress> {
        self.ledgers.iter().map(|l| l.clone()).collect()
    }

    /// Completion never auto-hides a ledger; this is the explicit dismissal.
    pub fn dismiss_ledger(&self, ledger_id: &str) -> bool {
        self.ledgers.remove(ledger_id).is_some()
    }

    // --- Internals ---

    fn build_ledger(
        &self,
        filter: &ViewFilter,
        kind: BatchKind,
        variant: BatchVariant,
        only_with_active_levels: bool,
    ) -> String {
        let ledger_id = self.ctx.id.new_id();
        let items: Vec<ProgressItem> = {
            let state = self.state.read();
            view::filter_streams(state.streams(), filter)
                .into_iter()
                .filter(|s| {
                    if !only_with_active_levels {
                        return true;
                    }
                    (variant.touches(Side::Bid) && s.bid.has_active_levels())
                        || (variant.touches(Side::Ask) && s.ask.has_active_levels())
                })
                .map(|s| {
                    let bid_max = s.bid.effective_max_lvls();
                    let ask_max = s.ask.effective_max_lvls();
                    ProgressItem {
                        stream_id: s.id.clone(),
                        security_id: s.security_id.clone(),
                        security_type: s.security_type,
                        status: ProgressStatus::Pending,
                        expected_bid_orders: if variant.touches(Side::Bid) { bid_max } else { 0 },
                        expected_ask_orders: if variant.touches(Side::Ask) { ask_max } else { 0 },
                        message: None,
                    }
                })
                .collect()
        };

        self.ledgers.insert(
            ledger_id.clone(),
            BatchProgress {
                id: ledger_id.clone(),
                kind,
                variant,
                items,
                started_at_ms: self.ctx.time.now_millis(),
                completed: false,
            },
        );
        ledger_id
    }

    fn set_status(
        &self,
        ledger_id: &str,
        stream_id: &str,
        status: ProgressStatus,
        message: Option<String>,
    ) {
        if let Some(mut ledger) = self.ledgers.get_mut(ledger_id) {
            if let Some(item) = ledger.items.iter_mut().find(|i| i.stream_id == stream_id) {
                item.status = status;
                item.message = message;
            }
        }
    }

    fn complete_ledger(&self, ledger_id: &str) {
        if let Some(mut ledger) = self.ledgers.get_mut(ledger_id) {
            ledger.completed = true;
        }
    }

    /// One failing stream never aborts the batch: every outcome folds into
    /// a per-item status row.
    fn outcome_to_status(
        outcome: Result<LaunchOutcome, DeskError>,
    ) -> (ProgressStatus, Option<String>) {
        match outcome {
            Ok(LaunchOutcome::Launched) => (ProgressStatus::Success, None),
            Ok(LaunchOutcome::Halted(result)) => (ProgressStatus::Error, result.error),
            Ok(LaunchOutcome::MissingPriceSource) => (
                ProgressStatus::Error,
                Some("no price source selected".to_string()),
            ),
            Ok(LaunchOutcome::ManualPriceError(side)) => (
                ProgressStatus::Error,
                Some(format!("no manual price entered for {:?}", side)),
            ),
            Ok(LaunchOutcome::Refused) => {
                (ProgressStatus::Error, Some("refused".to_string()))
            }
            Err(e) => (ProgressStatus::Error, Some(e.to_string())),
        }
    }
}
