//! Central desk state: the shared stream collection and every transition on it.
//!
//! All mutations go through here. The collection is replaced wholesale on each
//! update (copy-on-write), so no two mutations ever interleave on the same
//! stream within one call. Derived staging flags are recomputed by the
//! debounced reconciliation pass in `poll_staging`.

use crossbeam_channel::{unbounded, Receiver, Sender};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};

use crate::context::DeskContext;
use crate::model::{PriceSource, Side, SideState, StreamSet, StreamSide, MAX_LEVELS_CAP};
use crate::persistence::redb_store::StoreError;
use crate::persistence::store::PersistenceStore;
use crate::snapshot::{configs_equal, create_side_snapshot, create_snapshot};
use crate::staging::StagingScheduler;
use crate::stream_fsm::{StateError, StreamFsm, StreamState};
use crate::validation::{self, ValidationResult};

#[derive(Debug, Error)]
pub enum DeskError {
    #[error("Unknown stream: {0}")]
    UnknownStream(String),
    #[error("Cannot delete stream {0} while levels are active")]
    ActiveLevels(String),
    #[error("Stream {0} has no staged changes to revert")]
    NothingToRevert(String),
    #[error("Stream {0} cannot be paused from {1}")]
    NotPausable(String, StreamState),
    #[error(transparent)]
    State(#[from] StateError),
    #[error("Persistence error: {0}")]
    Persistence(#[from] StoreError),
}

/// Outcome of a launch-shaped operation. Soft refusals are data, not errors:
/// a missing price source or manual-price gap flags the stream and aborts
/// without halting it; a level launch at the cap is a silent no-op.
#[derive(Debug, Clone, PartialEq)]
pub enum LaunchOutcome {
    Launched,
    Halted(ValidationResult),
    MissingPriceSource,
    ManualPriceError(Side),
    Refused,
}

#[derive(Debug, Clone)]
pub enum DeskEvent {
    StateChanged {
        stream_id: String,
        from: StreamState,
        to: StreamState,
    },
    StagingChanged {
        stream_id: String,
        staged: bool,
    },
    StreamUpdated {
        stream_id: String,
    },
    StreamDeleted {
        stream_id: String,
    },
}

pub struct DeskState {
    streams: Vec<StreamSet>,
    scheduler: StagingScheduler,
    ctx: DeskContext,
    persistence: Option<Arc<PersistenceStore>>,
    subscribers: Vec<Sender<DeskEvent>>,
}

impl DeskState {
    pub fn new(
        ctx: DeskContext,
        debounce_ms: i64,
        persistence: Option<Arc<PersistenceStore>>,
    ) -> Self {
        Self {
            streams: Vec::new(),
            scheduler: StagingScheduler::new(debounce_ms),
            ctx,
            persistence,
            subscribers: Vec::new(),
        }
    }

    /// Replace the collection, e.g. from persisted state at startup.
    pub fn load(&mut self, streams: Vec<StreamSet>) {
        self.streams = streams;
    }

    pub fn add_stream(&mut self, stream: StreamSet) {
        self.streams.push(stream);
        self.persist();
    }

    pub fn streams(&self) -> &[StreamSet] {
        &self.streams
    }

    pub fn get_stream(&self, stream_id: &str) -> Option<&StreamSet> {
        self.streams.iter().find(|s| s.id == stream_id)
    }

    pub fn persistence(&self) -> Option<&Arc<PersistenceStore>> {
        self.persistence.as_ref()
    }

    pub fn subscribe(&mut self) -> Receiver<DeskEvent> {
        let (tx, rx) = unbounded();
        self.subscribers.push(tx);
        rx
    }

    fn emit(&mut self, event: DeskEvent) {
        self.subscribers.retain(|tx| tx.send(event.clone()).is_ok());
    }

    fn persist(&self) {
        if let Some(store) = &self.persistence {
            if let Err(e) = store.save_streams(&self.streams) {
                warn!("Failed to persist stream collection: {}", e);
            }
        }
    }

    fn index_of(&self, stream_id: &str) -> Result<usize, DeskError> {
        self.streams
            .iter()
            .position(|s| s.id == stream_id)
            .ok_or_else(|| DeskError::UnknownStream(stream_id.to_string()))
    }

    /// Rules applied after every edit: unconfigured promotion, transient
    /// manual-price-error clearing, and halt self-healing.
    fn post_edit_rules(
        stream: &mut StreamSet,
        now_ms: i64,
        skip_staging: bool,
    ) -> Result<Vec<(StreamState, StreamState)>, StateError> {
        let mut transitions = Vec::new();

        // Unconfigured → staging once a source and levels exist
        if stream.state == StreamState::Unconfigured
            && stream.selected_price_source.is_some()
            && !stream.bid.spread_matrix.is_empty()
        {
            transitions.push(Self::transition(stream, StreamState::Staging, now_ms, None)?);
        }

        // A valid manual entry clears the transient per-side error
        if let Some(side) = stream.manual_price_error {
            let (bid_base, ask_base) = validation::resolve_bases(stream);
            let resolved = match side {
                Side::Bid => bid_base,
                Side::Ask => ask_base,
            };
            if resolved.is_some() {
                stream.manual_price_error = None;
            }
        }

        // Halt self-healing: if the edit already fixed the halt condition,
        // re-stage without an explicit acknowledge step.
        if !skip_staging
            && stream.state == StreamState::Halted
            && validation::validate(stream, None).success
        {
            transitions.push(Self::transition(
                stream,
                StreamState::Staging,
                now_ms,
                Some("halt condition resolved by edit".to_string()),
            )?);
            stream.halt_reason = None;
            stream.halt_details = None;
        }

        Ok(transitions)
    }

    /// Guarded lifecycle transition, logged through the FSM.
    fn transition(
        stream: &mut StreamSet,
        next: StreamState,
        now_ms: i64,
        reason: Option<String>,
    ) -> Result<(StreamState, StreamState), StateError> {
        let from = stream.state;
        let mut fsm = StreamFsm::resume(stream.id.clone(), stream.state);
        fsm.transition(next, now_ms, reason)?;
        stream.state = fsm.state;
        Ok((from, next))
    }

    fn activate_side(side: &mut StreamSide) {
        let max = side.effective_max_lvls();
        for level in &mut side.spread_matrix {
            level.is_active = Some(level.level_number <= max);
        }
        side.is_active = max > 0;
        side.levels_to_launch = Some(max);
        side.state = if max > 0 {
            SideState::Active
        } else {
            SideState::Paused
        };
    }

    fn deactivate_side(side: &mut StreamSide, state: SideState) {
        for level in &mut side.spread_matrix {
            level.is_active = Some(false);
        }
        side.is_active = false;
        side.state = state;
    }

    /// Central edit path. Applies the mutation to a copy of the collection,
    /// runs the unconfigured promotion, manual-price-error clearing, and
    /// halt self-healing rules, then swaps the collection in one step.
    /// Staging-exempt mutations pass `skip_staging = true` and never touch
    /// the debounce queue.
    pub fn update_stream<F>(
        &mut self,
        stream_id: &str,
        skip_staging: bool,
        mutate: F,
    ) -> Result<(), DeskError>
    where
        F: FnOnce(&mut StreamSet),
    {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let transitions = {
            let stream = &mut next[idx];
            mutate(stream);
            Self::post_edit_rules(stream, now, skip_staging)?
        };

        if !skip_staging {
            self.scheduler.mark_dirty(stream_id, now);
        }
        self.streams = next;
        self.persist();
        for (from, to) in transitions {
            self.emit(DeskEvent::StateChanged {
                stream_id: stream_id.to_string(),
                from,
                to,
            });
        }
        self.emit(DeskEvent::StreamUpdated {
            stream_id: stream_id.to_string(),
        });
        Ok(())
    }

    /// Batch edit path: one mutation applied across many streams in a single
    /// collection swap, so observers never see a partially applied batch.
    /// Unknown ids are skipped. Runs the same post-edit rules as
    /// `update_stream` for every touched stream.
    pub fn update_streams<F>(
        &mut self,
        stream_ids: &[String],
        skip_staging: bool,
        mutate: F,
    ) -> Result<(), DeskError>
    where
        F: Fn(&mut StreamSet),
    {
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let mut touched = Vec::new();
        let mut all_transitions = Vec::new();

        for id in stream_ids {
            let Some(stream) = next.iter_mut().find(|s| s.id == *id) else {
                continue;
            };
            mutate(stream);
            let transitions = Self::post_edit_rules(stream, now, skip_staging)?;
            all_transitions.extend(
                transitions
                    .into_iter()
                    .map(|(from, to)| (id.clone(), from, to)),
            );
            touched.push(id.clone());
        }

        if !skip_staging {
            for id in &touched {
                self.scheduler.mark_dirty(id, now);
            }
        }
        self.streams = next;
        self.persist();
        for (stream_id, from, to) in all_transitions {
            self.emit(DeskEvent::StateChanged { stream_id, from, to });
        }
        for stream_id in touched {
            self.emit(DeskEvent::StreamUpdated { stream_id });
        }
        Ok(())
    }

    /// Batch price-source assignment with feed synthesis: a stream that has
    /// never seen the target feed gets a feed entry cloned from any stream
    /// that has it, or a zero-value placeholder, so the assignment never
    /// leaves a dangling source reference.
    pub fn batch_set_price_source(
        &mut self,
        stream_ids: &[String],
        source: PriceSource,
    ) -> Result<(), DeskError> {
        let donor = match &source {
            PriceSource::Feed(feed_id) => self
                .streams
                .iter()
                .flat_map(|s| s.quote_feeds.iter())
                .find(|f| f.feed_id == *feed_id)
                .cloned(),
            PriceSource::Manual => None,
        };

        self.update_streams(stream_ids, false, |stream| {
            if let PriceSource::Feed(feed_id) = &source {
                if stream.find_feed(feed_id).is_none() {
                    let feed = donor
                        .clone()
                        .unwrap_or_else(|| crate::model::QuoteFeed::placeholder(feed_id));
                    stream.quote_feeds.push(feed);
                }
            }
            stream.selected_price_source = Some(source.clone());
            stream.missing_price_source = false;
        })
    }

    /// Recompute `has_staging_changes` for every stream whose debounce window
    /// has settled. Returns the streams whose flag flipped.
    pub fn poll_staging(&mut self) -> Vec<(String, bool)> {
        let now = self.ctx.time.now_millis();
        let due = self.scheduler.take_due(now);
        if due.is_empty() {
            return Vec::new();
        }

        let mut next = self.streams.clone();
        let mut flipped = Vec::new();
        for id in due {
            let Some(stream) = next.iter_mut().find(|s| s.id == id) else {
                continue;
            };
            let staged = match &stream.last_launched_snapshot {
                Some(snapshot) => !configs_equal(stream, snapshot),
                // Never launched: suppress the flag unless a genuinely
                // non-zero manual price has been entered.
                None => has_manual_entry(stream),
            };
            if staged != stream.has_staging_changes {
                stream.has_staging_changes = staged;
                flipped.push((id, staged));
            }
        }

        self.streams = next;
        if !flipped.is_empty() {
            self.persist();
            for (stream_id, staged) in &flipped {
                self.emit(DeskEvent::StagingChanged {
                    stream_id: stream_id.clone(),
                    staged: *staged,
                });
            }
        }
        flipped
    }

    // --- Launch / pause operations ---

    /// Whole-stream launch: validate, then either go live (capturing a fresh
    /// snapshot and activating both sides up to their caps) or halt with the
    /// failure pinned to the affected side(s).
    pub fn launch_stream(&mut self, stream_id: &str) -> Result<LaunchOutcome, DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let mut transitions = Vec::new();

        let outcome = {
            let stream = &mut next[idx];
            if stream.selected_price_source.is_none() {
                stream.missing_price_source = true;
                LaunchOutcome::MissingPriceSource
            } else {
                stream.missing_price_source = false;
                let result = validation::validate(stream, None);
                if result.success {
                    transitions.push(Self::transition(stream, StreamState::Active, now, None)?);
                    stream.last_launched_snapshot = Some(create_snapshot(stream));
                    Self::activate_side(&mut stream.bid);
                    Self::activate_side(&mut stream.ask);
                    stream.halt_reason = None;
                    stream.halt_details = None;
                    stream.has_staging_changes = false;
                    self.scheduler.clear(stream_id);
                    info!(stream_id = %stream.id, "Stream launched");
                    LaunchOutcome::Launched
                } else {
                    Self::halt_stream(stream, &result, now, &mut transitions)?;
                    LaunchOutcome::Halted(result)
                }
            }
        };

        self.finish(stream_id, next, transitions);
        Ok(outcome)
    }

    fn halt_stream(
        stream: &mut StreamSet,
        result: &ValidationResult,
        now_ms: i64,
        transitions: &mut Vec<(StreamState, StreamState)>,
    ) -> Result<(), StateError> {
        transitions.push(Self::transition(
            stream,
            StreamState::Halted,
            now_ms,
            result.error.clone(),
        )?);
        stream.halt_reason = result.error_type.map(|t| t.as_str().to_string());
        stream.halt_details = result.error.clone();

        // Only the affected side(s) transition to halted
        if let Some(affected) = result.affected_side {
            if affected.touches(Side::Bid) {
                Self::deactivate_side(&mut stream.bid, SideState::Halted);
            }
            if affected.touches(Side::Ask) {
                Self::deactivate_side(&mut stream.ask, SideState::Halted);
            }
        }
        Ok(())
    }

    /// Activate one level on one side. Staging-exempt: runtime effect only.
    pub fn launch_level(
        &mut self,
        stream_id: &str,
        side: Side,
        level_number: u8,
    ) -> Result<LaunchOutcome, DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let mut transitions = Vec::new();

        let outcome = {
            let stream = &mut next[idx];
            if stream.selected_price_source.is_none() {
                stream.missing_price_source = true;
                LaunchOutcome::MissingPriceSource
            } else {
                let side_ref = stream.side(side);
                let max = side_ref.effective_max_lvls();
                let at_cap = side_ref.active_level_count() >= max as usize;
                let already_active = side_ref
                    .level(level_number)
                    .map(|lvl| side_ref.level_is_active(lvl))
                    .unwrap_or(true);

                if max == 0 || level_number > max || at_cap || already_active {
                    // Silent refusal: cap and bounds are hard limits
                    LaunchOutcome::Refused
                } else {
                    let was_dark = !stream.side(side).has_active_levels();
                    let side_mut = stream.side_mut(side);
                    if let Some(level) = side_mut.level_mut(level_number) {
                        level.is_active = Some(true);
                    }
                    if was_dark {
                        side_mut.state = SideState::Active;
                        side_mut.is_active = true;
                    }
                    if matches!(stream.state, StreamState::Paused | StreamState::Halted)
                        && stream.has_any_active_level()
                    {
                        transitions.push(Self::transition(
                            stream,
                            StreamState::Active,
                            now,
                            None,
                        )?);
                        stream.halt_reason = None;
                        stream.halt_details = None;
                    }
                    LaunchOutcome::Launched
                }
            }
        };

        self.finish(stream_id, next, transitions);
        Ok(outcome)
    }

    /// Deactivate one level. Staging-exempt.
    pub fn pause_level(
        &mut self,
        stream_id: &str,
        side: Side,
        level_number: u8,
    ) -> Result<(), DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let mut transitions = Vec::new();
        {
            let stream = &mut next[idx];
            let side_mut = stream.side_mut(side);
            if let Some(level) = side_mut.level_mut(level_number) {
                level.is_active = Some(false);
            }
            if !side_mut.has_active_levels() {
                side_mut.state = SideState::Paused;
                side_mut.is_active = false;
            }
            if !stream.has_any_active_level() && stream.state == StreamState::Active {
                transitions.push(Self::transition(stream, StreamState::Paused, now, None)?);
            }
        }
        self.finish(stream_id, next, transitions);
        Ok(())
    }

    /// Relaunch all levels on one side, committing a side-specific snapshot.
    pub fn relaunch_side(
        &mut self,
        stream_id: &str,
        side: Side,
    ) -> Result<LaunchOutcome, DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let mut transitions = Vec::new();

        let outcome = {
            let stream = &mut next[idx];
            if stream.selected_price_source.is_none() {
                stream.missing_price_source = true;
                LaunchOutcome::MissingPriceSource
            } else {
                let is_manual = stream
                    .selected_price_source
                    .as_ref()
                    .map(|s| s.is_manual())
                    .unwrap_or(true);
                let (bid_base, ask_base) = validation::resolve_bases(stream);
                let side_base = match side {
                    Side::Bid => bid_base,
                    Side::Ask => ask_base,
                };

                if is_manual && side_base.is_none() {
                    // Softer than a halt: the other side may remain healthy
                    stream.manual_price_error = Some(side);
                    LaunchOutcome::ManualPriceError(side)
                } else {
                    stream.manual_price_error = None;
                    let result = validation::validate(stream, Some(side));
                    if !result.success {
                        Self::halt_stream(stream, &result, now, &mut transitions)?;
                        LaunchOutcome::Halted(result)
                    } else {
                        Self::activate_side(stream.side_mut(side));
                        transitions.push(Self::transition(
                            stream,
                            StreamState::Active,
                            now,
                            None,
                        )?);
                        stream.halt_reason = None;
                        stream.halt_details = None;

                        // Commit this side only; then recompute whether the
                        // stream still differs (the other side might).
                        let merged = create_side_snapshot(
                            stream,
                            side,
                            stream.last_launched_snapshot.as_ref(),
                        );
                        stream.has_staging_changes = !configs_equal(stream, &merged);
                        stream.last_launched_snapshot = Some(merged);
                        self.scheduler.clear(stream_id);
                        LaunchOutcome::Launched
                    }
                }
            }
        };

        self.finish(stream_id, next, transitions);
        Ok(outcome)
    }

    /// Deactivate all levels on one side. Staging-exempt.
    pub fn pause_side(&mut self, stream_id: &str, side: Side) -> Result<(), DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        let mut next = self.streams.clone();
        let mut transitions = Vec::new();
        {
            let stream = &mut next[idx];
            Self::deactivate_side(stream.side_mut(side), SideState::Paused);
            if !stream.has_any_active_level() && stream.state == StreamState::Active {
                transitions.push(Self::transition(stream, StreamState::Paused, now, None)?);
            }
        }
        self.finish(stream_id, next, transitions);
        Ok(())
    }

    /// Runtime stop of the whole stream. Snapshot and staging are untouched;
    /// relaunch reverses it.
    pub fn pause_stream(&mut self, stream_id: &str) -> Result<(), DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        if self.streams[idx].state != StreamState::Active {
            return Err(DeskError::NotPausable(
                stream_id.to_string(),
                self.streams[idx].state,
            ));
        }
        let mut next = self.streams.clone();
        let mut transitions = Vec::new();
        {
            let stream = &mut next[idx];
            Self::deactivate_side(&mut stream.bid, SideState::Paused);
            Self::deactivate_side(&mut stream.ask, SideState::Paused);
            transitions.push(Self::transition(stream, StreamState::Paused, now, None)?);
        }
        self.finish(stream_id, next, transitions);
        Ok(())
    }

    /// Restore configured values from the last launched snapshot. Runtime
    /// activity flags are preserved: revert never changes what is live.
    pub fn revert_staging(&mut self, stream_id: &str) -> Result<(), DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();

        let snapshot = match &self.streams[idx].last_launched_snapshot {
            Some(snap) if self.streams[idx].has_staging_changes => snap.clone(),
            _ => return Err(DeskError::NothingToRevert(stream_id.to_string())),
        };

        let mut next = self.streams.clone();
        let mut transitions = Vec::new();
        {
            let stream = &mut next[idx];
            for (side, snap_side) in [(Side::Bid, &snapshot.bid), (Side::Ask, &snapshot.ask)] {
                let side_mut = stream.side_mut(side);
                for level in &mut side_mut.spread_matrix {
                    if let Some(s) = snap_side
                        .levels
                        .iter()
                        .find(|l| l.level_number == level.level_number)
                    {
                        level.delta_bps = s.delta_bps;
                        level.quantity = s.quantity;
                    }
                }
                side_mut.max_lvls = Some(snap_side.max_lvls);
                side_mut.price_source = snap_side.price_source.clone();
                side_mut.price = snap_side.price;
            }
            stream.selected_price_source = Some(snapshot.selected_price_source.clone());
            stream.price_mode = snapshot.price_mode;
            stream.reference_price = snapshot.reference_price.clone();
            stream.has_staging_changes = false;
            self.scheduler.clear(stream_id);

            // A snapshot is a previously-successful configuration, so any
            // halt state is cleared by reverting to it.
            if stream.state == StreamState::Halted {
                stream.halt_reason = None;
                stream.halt_details = None;
                let target = if stream.has_any_active_level() {
                    StreamState::Active
                } else {
                    StreamState::Paused
                };
                transitions.push(Self::transition(
                    stream,
                    target,
                    now,
                    Some("reverted to launched snapshot".to_string()),
                )?);
            }
        }
        self.finish(stream_id, next, transitions);
        self.emit(DeskEvent::StagingChanged {
            stream_id: stream_id.to_string(),
            staged: false,
        });
        Ok(())
    }

    /// Remove a stream entirely. Disallowed while any level is live.
    pub fn delete_stream(&mut self, stream_id: &str) -> Result<(), DeskError> {
        let idx = self.index_of(stream_id)?;
        let now = self.ctx.time.now_millis();
        if self.streams[idx].has_any_active_level() {
            return Err(DeskError::ActiveLevels(stream_id.to_string()));
        }
        let mut next = self.streams.clone();
        Self::transition(
            &mut next[idx],
            StreamState::Cancelled,
            now,
            Some("deleted".to_string()),
        )?;
        next.remove(idx);
        self.scheduler.clear(stream_id);
        self.streams = next;
        self.persist();
        self.emit(DeskEvent::StreamDeleted {
            stream_id: stream_id.to_string(),
        });
        Ok(())
    }

    /// Dismiss the missing-price-source banner.
    pub fn dismiss_missing_price_source(&mut self, stream_id: &str) -> Result<(), DeskError> {
        self.update_stream(stream_id, true, |s| s.missing_price_source = false)
    }

    // --- Field setters (normal staging-tracked edit path) ---

    pub fn set_price_source(
        &mut self,
        stream_id: &str,
        source: PriceSource,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, false, |s| {
            s.selected_price_source = Some(source);
            s.missing_price_source = false;
        })
    }

    pub fn set_price_mode(
        &mut self,
        stream_id: &str,
        mode: crate::model::PriceMode,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, false, |s| s.price_mode = mode)
    }

    pub fn set_max_lvls(
        &mut self,
        stream_id: &str,
        side: Side,
        max_lvls: u8,
    ) -> Result<(), DeskError> {
        let capped = max_lvls.min(MAX_LEVELS_CAP);
        self.update_stream(stream_id, false, |s| {
            s.side_mut(side).max_lvls = Some(capped);
        })
    }

    pub fn set_level_quantity(
        &mut self,
        stream_id: &str,
        side: Side,
        level_number: u8,
        quantity: i64,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, false, |s| {
            if let Some(level) = s.side_mut(side).level_mut(level_number) {
                level.quantity = quantity;
            }
        })
    }

    pub fn set_level_delta(
        &mut self,
        stream_id: &str,
        side: Side,
        level_number: u8,
        delta_bps: Decimal,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, false, |s| {
            if let Some(level) = s.side_mut(side).level_mut(level_number) {
                level.delta_bps = delta_bps;
            }
        })
    }

    /// Widen or tighten every level by `adjustment_bps`. Sign convention:
    /// positive widens (bid deltas grow, ask deltas shrink).
    pub fn adjust_spreads(
        &mut self,
        stream_id: &str,
        adjustment_bps: Decimal,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, false, |s| {
            for level in &mut s.bid.spread_matrix {
                level.delta_bps += adjustment_bps;
            }
            for level in &mut s.ask.spread_matrix {
                level.delta_bps -= adjustment_bps;
            }
        })
    }

    pub fn set_manual_price(
        &mut self,
        stream_id: &str,
        side: Option<Side>,
        value: Decimal,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, false, |s| match side {
            Some(Side::Bid) => s.reference_price.manual_bid = Some(value),
            Some(Side::Ask) => s.reference_price.manual_ask = Some(value),
            None => s.reference_price.value = value,
        })
    }

    /// Runtime feed tick: refresh quote values without touching staging.
    pub fn apply_feed_update(
        &mut self,
        stream_id: &str,
        feed_id: &str,
        bid: Decimal,
        ask: Decimal,
        timestamp_ms: i64,
    ) -> Result<(), DeskError> {
        self.update_stream(stream_id, true, |s| {
            if let Some(feed) = s.quote_feeds.iter_mut().find(|f| f.feed_id == feed_id) {
                feed.bid = bid;
                feed.ask = ask;
                feed.bid_timestamp = Some(timestamp_ms);
                feed.ask_timestamp = Some(timestamp_ms);
            }
        })
    }

    fn finish(
        &mut self,
        stream_id: &str,
        next: Vec<StreamSet>,
        transitions: Vec<(StreamState, StreamState)>,
    ) {
        self.streams = next;
        self.persist();
        for (from, to) in transitions {
            self.emit(DeskEvent::StateChanged {
                stream_id: stream_id.to_string(),
                from,
                to,
            });
        }
        self.emit(DeskEvent::StreamUpdated {
            stream_id: stream_id.to_string(),
        });
    }
}

fn has_manual_entry(stream: &StreamSet) -> bool {
    let manual = stream
        .selected_price_source
        .as_ref()
        .map(|s| s.is_manual())
        .unwrap_or(false);
    if !manual {
        return false;
    }
    let non_zero = |v: Option<Decimal>| v.map(|d| !d.is_zero()).unwrap_or(false);
    !stream.reference_price.value.is_zero()
        || non_zero(stream.reference_price.manual_bid)
        || non_zero(stream.reference_price.manual_ask)
}
