//! Workflow tests across the desk state: launch, staging, halt recovery,
//! level caps, revert, and batch edits driven by a simulated clock.

use rust_decimal_macros::dec;
use std::sync::Arc;

use crate::context::{DeskContext, SimulatedTimeProvider};
use crate::desk_state::{DeskError, DeskEvent, DeskState, LaunchOutcome};
use crate::feeds;
use crate::model::{PriceMode, PriceSource, SecurityType, Side, SideState};
use crate::staging::DEFAULT_DEBOUNCE_MS;
use crate::stream_fsm::StreamState;

fn desk() -> (DeskState, Arc<SimulatedTimeProvider>) {
    let (ctx, time) = DeskContext::simulated_with_clock(1_000);
    let mut state = DeskState::new(ctx, DEFAULT_DEBOUNCE_MS, None);

    let mut stream = feeds::build_stream(
        "s-1",
        "AU-GOV-10Y",
        "Treasury Bond 10Y 2035",
        SecurityType::GovernmentBond,
        5,
        vec![],
    );
    stream.selected_price_source = Some(PriceSource::Manual);
    stream.reference_price.value = dec!(4.5);
    stream.state = StreamState::Staging;
    state.add_stream(stream);
    (state, time)
}

fn launched_desk() -> (DeskState, Arc<SimulatedTimeProvider>) {
    let (mut state, time) = desk();
    let outcome = state.launch_stream("s-1").unwrap();
    assert_eq!(outcome, LaunchOutcome::Launched);
    (state, time)
}

#[test]
fn launch_activates_levels_up_to_the_cap() {
    let (mut state, _) = desk();
    state.set_max_lvls("s-1", Side::Bid, 3).unwrap();
    state.set_max_lvls("s-1", Side::Ask, 2).unwrap();

    state.launch_stream("s-1").unwrap();
    let stream = state.get_stream("s-1").unwrap();
    assert_eq!(stream.state, StreamState::Active);
    assert_eq!(stream.bid.active_level_count(), 3);
    assert_eq!(stream.ask.active_level_count(), 2);
    assert!(!stream.has_staging_changes);
    assert!(stream.last_launched_snapshot.is_some());
}

#[test]
fn staged_flag_settles_only_after_the_debounce_window() {
    let (mut state, time) = launched_desk();

    state.set_level_delta("s-1", Side::Bid, 2, dec!(5)).unwrap();
    // Inside the window nothing flips
    time.advance(DEFAULT_DEBOUNCE_MS - 1);
    assert!(state.poll_staging().is_empty());
    assert!(!state.get_stream("s-1").unwrap().has_staging_changes);

    time.advance(1);
    let flipped = state.poll_staging();
    assert_eq!(flipped, vec![("s-1".to_string(), true)]);
    assert!(state.get_stream("s-1").unwrap().has_staging_changes);
}

#[test]
fn further_edits_restart_the_debounce_window() {
    let (mut state, time) = launched_desk();

    state.set_level_delta("s-1", Side::Bid, 2, dec!(5)).unwrap();
    time.advance(200);
    state
        .set_level_quantity("s-1", Side::Bid, 2, 2_000_000)
        .unwrap();
    // 200ms after the first edit the window has restarted
    time.advance(200);
    assert!(state.poll_staging().is_empty());

    time.advance(DEFAULT_DEBOUNCE_MS);
    assert_eq!(state.poll_staging().len(), 1);
}

#[test]
fn reverting_an_edit_before_the_window_settles_stays_unstaged() {
    let (mut state, time) = launched_desk();
    let original = state.get_stream("s-1").unwrap().bid.spread_matrix[1].delta_bps;

    state.set_level_delta("s-1", Side::Bid, 2, dec!(99)).unwrap();
    state.set_level_delta("s-1", Side::Bid, 2, original).unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    // The recomputation runs but the config matches the snapshot again
    assert!(state.poll_staging().is_empty());
    assert!(!state.get_stream("s-1").unwrap().has_staging_changes);
}

#[test]
fn revert_restores_the_launched_snapshot() {
    let (mut state, time) = launched_desk();
    let original = state.get_stream("s-1").unwrap().bid.spread_matrix[0].delta_bps;

    state.set_level_delta("s-1", Side::Bid, 1, dec!(42)).unwrap();
    state.set_price_mode("s-1", PriceMode::Notional).unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    state.poll_staging();
    assert!(state.get_stream("s-1").unwrap().has_staging_changes);

    state.revert_staging("s-1").unwrap();
    let stream = state.get_stream("s-1").unwrap();
    assert_eq!(stream.bid.spread_matrix[0].delta_bps, original);
    assert_eq!(stream.price_mode, PriceMode::Quantity);
    assert!(!stream.has_staging_changes);
    // Revert never touches runtime activity
    assert!(stream.bid.has_active_levels());
}

#[test]
fn revert_without_staged_changes_is_an_error() {
    let (mut state, _) = launched_desk();
    assert!(matches!(
        state.revert_staging("s-1"),
        Err(DeskError::NothingToRevert(_))
    ));
}

#[test]
fn failed_launch_halts_only_the_affected_side() {
    let (mut state, _) = desk();
    // Bid FFCH breach; ask remains within bounds
    state.set_level_delta("s-1", Side::Bid, 1, dec!(150)).unwrap();

    let outcome = state.launch_stream("s-1").unwrap();
    assert!(matches!(outcome, LaunchOutcome::Halted(_)));

    let stream = state.get_stream("s-1").unwrap();
    assert_eq!(stream.state, StreamState::Halted);
    assert_eq!(stream.halt_reason.as_deref(), Some("ffch"));
    assert_eq!(stream.bid.state, SideState::Halted);
    assert_eq!(stream.ask.state, SideState::Paused);
    assert!(stream.last_launched_snapshot.is_none());
}

#[test]
fn fixing_the_halt_condition_self_heals_to_staging() {
    let (mut state, _) = desk();
    state.set_level_delta("s-1", Side::Bid, 1, dec!(150)).unwrap();
    state.launch_stream("s-1").unwrap();
    assert_eq!(state.get_stream("s-1").unwrap().state, StreamState::Halted);

    state.set_level_delta("s-1", Side::Bid, 1, dec!(50)).unwrap();
    let stream = state.get_stream("s-1").unwrap();
    assert_eq!(stream.state, StreamState::Staging);
    assert!(stream.halt_reason.is_none());
}

#[test]
fn level_launch_beyond_the_cap_is_silently_refused() {
    let (mut state, _) = desk();
    state.set_max_lvls("s-1", Side::Bid, 2).unwrap();
    state.launch_stream("s-1").unwrap();

    // Cap reached: levels 1 and 2 are live
    assert_eq!(
        state.launch_level("s-1", Side::Bid, 3).unwrap(),
        LaunchOutcome::Refused
    );

    // Freeing a slot lets another level in, still bounded by the cap
    state.pause_level("s-1", Side::Bid, 1).unwrap();
    assert_eq!(
        state.launch_level("s-1", Side::Bid, 3).unwrap(),
        LaunchOutcome::Refused,
        "level number above the cap stays refused even with a free slot"
    );
    assert_eq!(
        state.launch_level("s-1", Side::Bid, 1).unwrap(),
        LaunchOutcome::Launched
    );
    assert_eq!(state.get_stream("s-1").unwrap().bid.active_level_count(), 2);
}

#[test]
fn pausing_every_level_pauses_the_stream() {
    let (mut state, _) = launched_desk();
    state.pause_side("s-1", Side::Bid).unwrap();
    assert_eq!(state.get_stream("s-1").unwrap().state, StreamState::Active);

    state.pause_side("s-1", Side::Ask).unwrap();
    let stream = state.get_stream("s-1").unwrap();
    assert_eq!(stream.state, StreamState::Paused);
    assert!(!stream.has_any_active_level());
}

#[test]
fn level_launch_from_paused_reactivates_the_stream() {
    let (mut state, _) = launched_desk();
    state.pause_stream("s-1").unwrap();
    assert_eq!(state.get_stream("s-1").unwrap().state, StreamState::Paused);

    state.launch_level("s-1", Side::Bid, 1).unwrap();
    assert_eq!(state.get_stream("s-1").unwrap().state, StreamState::Active);
}

#[test]
fn pause_is_only_valid_from_active() {
    let (mut state, _) = desk();
    assert!(matches!(
        state.pause_stream("s-1"),
        Err(DeskError::NotPausable(_, StreamState::Staging))
    ));
}

#[test]
fn delete_refused_while_levels_are_live() {
    let (mut state, _) = launched_desk();
    assert!(matches!(
        state.delete_stream("s-1"),
        Err(DeskError::ActiveLevels(_))
    ));

    state.pause_stream("s-1").unwrap();
    state.delete_stream("s-1").unwrap();
    assert!(state.get_stream("s-1").is_none());
}

#[test]
fn launch_without_a_price_source_raises_the_banner() {
    let (mut state, _) = desk();
    let mut bare = feeds::build_stream(
        "s-2",
        "AU-BILL-90D",
        "Bank Bill 90D",
        SecurityType::Bill,
        2,
        vec![],
    );
    bare.state = StreamState::Staging;
    state.add_stream(bare);

    assert_eq!(
        state.launch_stream("s-2").unwrap(),
        LaunchOutcome::MissingPriceSource
    );
    assert!(state.get_stream("s-2").unwrap().missing_price_source);

    state.dismiss_missing_price_source("s-2").unwrap();
    assert!(!state.get_stream("s-2").unwrap().missing_price_source);
}

#[test]
fn assigning_a_source_promotes_unconfigured_to_staging() {
    let (mut state, _) = desk();
    let bare = feeds::build_stream(
        "s-3",
        "AU-CORP-5Y",
        "Corp Senior Note 2030",
        SecurityType::CorporateBond,
        3,
        vec![],
    );
    assert_eq!(bare.state, StreamState::Unconfigured);
    state.add_stream(bare);

    state.set_price_source("s-3", PriceSource::Manual).unwrap();
    assert_eq!(state.get_stream("s-3").unwrap().state, StreamState::Staging);
}

#[test]
fn side_relaunch_with_missing_manual_price_flags_the_side() {
    let (mut state, _) = desk();
    state
        .update_stream("s-1", true, |s| {
            s.reference_price.value = dec!(0);
            s.reference_price.manual_ask = Some(dec!(4.4));
        })
        .unwrap();

    let outcome = state.relaunch_side("s-1", Side::Bid).unwrap();
    assert_eq!(outcome, LaunchOutcome::ManualPriceError(Side::Bid));
    assert_eq!(
        state.get_stream("s-1").unwrap().manual_price_error,
        Some(Side::Bid)
    );

    // Entering a valid bid price clears the flag on the next edit pass
    state
        .set_manual_price("s-1", Some(Side::Bid), dec!(4.5))
        .unwrap();
    assert!(state.get_stream("s-1").unwrap().manual_price_error.is_none());
}

#[test]
fn side_relaunch_commits_only_that_side() {
    let (mut state, time) = launched_desk();

    state.set_level_delta("s-1", Side::Bid, 1, dec!(9)).unwrap();
    state.set_level_delta("s-1", Side::Ask, 1, dec!(-9)).unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    state.poll_staging();
    assert!(state.get_stream("s-1").unwrap().has_staging_changes);

    let outcome = state.relaunch_side("s-1", Side::Bid).unwrap();
    assert_eq!(outcome, LaunchOutcome::Launched);

    // The ask edit is still pending against its baseline
    let stream = state.get_stream("s-1").unwrap();
    assert!(stream.has_staging_changes);
    let snap = stream.last_launched_snapshot.as_ref().unwrap();
    assert_eq!(snap.bid.levels[0].delta_bps, dec!(9));
    assert_ne!(snap.ask.levels[0].delta_bps, dec!(-9));
}

#[test]
fn feed_updates_never_mark_staging() {
    let (mut state, time) = launched_desk();
    state
        .update_stream("s-1", true, |s| {
            s.quote_feeds.push(crate::model::QuoteFeed::placeholder("feed-cba"));
        })
        .unwrap();

    state
        .apply_feed_update("s-1", "feed-cba", dec!(4.6), dec!(4.5), 2_000)
        .unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    assert!(state.poll_staging().is_empty());
    assert!(!state.get_stream("s-1").unwrap().has_staging_changes);
}

#[test]
fn never_launched_streams_do_not_stage_on_config_edits() {
    let (mut state, time) = desk();
    let fresh = feeds::build_stream(
        "s-2",
        "AU-BILL-180D",
        "Bank Bill 180D",
        SecurityType::Bill,
        2,
        vec![],
    );
    state.add_stream(fresh);
    state.set_price_source("s-2", PriceSource::Manual).unwrap();
    state.set_max_lvls("s-2", Side::Bid, 2).unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    state.poll_staging();
    // No manual price entered yet, so nothing reads as staged
    assert!(!state.get_stream("s-2").unwrap().has_staging_changes);
}

#[test]
fn manual_price_entry_stages_a_never_launched_stream() {
    let (mut state, time) = desk();
    state.set_manual_price("s-1", None, dec!(5.1)).unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    let flipped = state.poll_staging();
    assert_eq!(flipped, vec![("s-1".to_string(), true)]);
}

#[test]
fn subscribers_observe_lifecycle_transitions() {
    let (mut state, _) = desk();
    let rx = state.subscribe();

    state.launch_stream("s-1").unwrap();

    let events: Vec<DeskEvent> = rx.try_iter().collect();
    assert!(events.iter().any(|e| matches!(
        e,
        DeskEvent::StateChanged {
            from: StreamState::Staging,
            to: StreamState::Active,
            ..
        }
    )));
    assert!(events
        .iter()
        .any(|e| matches!(e, DeskEvent::StreamUpdated { .. })));
}

#[test]
fn batch_edit_swaps_the_collection_once() {
    let (mut state, time) = launched_desk();
    let mut other = feeds::build_stream(
        "s-2",
        "AU-GOV-3Y",
        "Treasury Bond 3Y 2028",
        SecurityType::GovernmentBond,
        5,
        vec![],
    );
    other.selected_price_source = Some(PriceSource::Manual);
    other.reference_price.value = dec!(4.0);
    other.state = StreamState::Staging;
    state.add_stream(other);

    let ids = vec!["s-1".to_string(), "s-2".to_string()];
    state
        .update_streams(&ids, false, |s| s.price_mode = PriceMode::Amount)
        .unwrap();
    for id in &ids {
        assert_eq!(state.get_stream(id).unwrap().price_mode, PriceMode::Amount);
    }

    // Re-applying the launched stream's existing mode is a no-op diff
    state
        .update_streams(&ids, false, |s| s.price_mode = PriceMode::Quantity)
        .unwrap();
    time.advance(DEFAULT_DEBOUNCE_MS);
    state.poll_staging();
    assert!(!state.get_stream("s-1").unwrap().has_staging_changes);
}

#[test]
fn batch_price_source_synthesizes_missing_feeds() {
    let (mut state, _) = desk();
    let mut donor = feeds::build_stream(
        "s-2",
        "AU-GOV-3Y",
        "Treasury Bond 3Y 2028",
        SecurityType::GovernmentBond,
        3,
        vec![crate::model::QuoteFeed {
            feed_id: "feed-ubs".into(),
            feed_name: "UBS".into(),
            bid: dec!(4.2),
            ask: dec!(4.1),
            bid_timestamp: None,
            ask_timestamp: None,
        }],
    );
    donor.selected_price_source = Some(PriceSource::Manual);
    donor.state = StreamState::Staging;
    state.add_stream(donor);

    let ids = vec!["s-1".to_string(), "s-2".to_string()];
    state
        .batch_set_price_source(&ids, PriceSource::Feed("feed-ubs".into()))
        .unwrap();

    // s-1 never had feed-ubs: it gets the donor's entry
    let s1 = state.get_stream("s-1").unwrap();
    assert_eq!(
        s1.selected_price_source,
        Some(PriceSource::Feed("feed-ubs".into()))
    );
    assert_eq!(s1.find_feed("feed-ubs").unwrap().bid, dec!(4.2));
}
