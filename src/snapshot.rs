//! Snapshot model and staging diff.
//!
//! A snapshot is the "launched truth" baseline: the configured values a
//! successful launch committed, captured without any runtime activity flags.
//! The diff against it is exact equality; display-level tolerances live in
//! the UI, never here.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::model::{PriceMode, PriceSource, ReferencePrice, Side, StreamSet, StreamSide};

/// One level as a snapshot sees it: configured values only, no `is_active`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LevelSnapshot {
    pub level_number: u8,
    pub delta_bps: Decimal,
    pub quantity: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SideSnapshot {
    pub levels: Vec<LevelSnapshot>,
    pub max_lvls: u8,
    /// Independent-pricing fields, carried only when that mode is on.
    #[serde(default)]
    pub price_source: Option<PriceSource>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

/// Immutable-at-creation baseline for the staging diff.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StagingSnapshot {
    pub bid: SideSnapshot,
    pub ask: SideSnapshot,
    pub selected_price_source: PriceSource,
    pub price_mode: PriceMode,
    pub reference_price: ReferencePrice,
}

fn snapshot_side(side: &StreamSide) -> SideSnapshot {
    SideSnapshot {
        levels: side
            .spread_matrix
            .iter()
            .map(|lvl| LevelSnapshot {
                level_number: lvl.level_number,
                delta_bps: lvl.delta_bps,
                quantity: lvl.quantity,
            })
            .collect(),
        max_lvls: side.effective_max_lvls(),
        price_source: side.price_source.clone(),
        price: side.price,
    }
}

/// Capture the full launched configuration of a stream.
pub fn create_snapshot(stream: &StreamSet) -> StagingSnapshot {
    StagingSnapshot {
        bid: snapshot_side(&stream.bid),
        ask: snapshot_side(&stream.ask),
        selected_price_source: stream
            .selected_price_source
            .clone()
            .unwrap_or(PriceSource::Manual),
        price_mode: stream.price_mode,
        reference_price: stream.reference_price.clone(),
    }
}

/// Side-specific snapshot merge, used when relaunching one side.
///
/// Global fields (price source, price mode, reference price) are always taken
/// live: they are shared across both sides, so committing either side commits
/// them. The specified side's matrix comes from the live stream; the other
/// side's matrix and independent-price fields carry over from the existing
/// snapshot so a one-side relaunch never silently commits the other side's
/// unapplied edits.
pub fn create_side_snapshot(
    stream: &StreamSet,
    side: Side,
    existing: Option<&StagingSnapshot>,
) -> StagingSnapshot {
    let Some(existing) = existing else {
        return create_snapshot(stream);
    };

    let (bid, ask) = match side {
        Side::Bid => (snapshot_side(&stream.bid), existing.ask.clone()),
        Side::Ask => (existing.bid.clone(), snapshot_side(&stream.ask)),
    };

    StagingSnapshot {
        bid,
        ask,
        selected_price_source: stream
            .selected_price_source
            .clone()
            .unwrap_or(PriceSource::Manual),
        price_mode: stream.price_mode,
        reference_price: stream.reference_price.clone(),
    }
}

fn side_matches(side: &StreamSide, snap: &SideSnapshot) -> bool {
    if side.effective_max_lvls() != snap.max_lvls {
        return false;
    }
    if side.spread_matrix.len() != snap.levels.len() {
        return false;
    }
    side.spread_matrix.iter().zip(&snap.levels).all(|(live, s)| {
        live.level_number == s.level_number
            && live.delta_bps == s.delta_bps
            && live.quantity == s.quantity
    })
}

/// Authoritative staging check: does the live configuration match the
/// snapshot exactly? Returns true when there are no staged changes.
pub fn configs_equal(stream: &StreamSet, snapshot: &StagingSnapshot) -> bool {
    let live_source = stream
        .selected_price_source
        .clone()
        .unwrap_or(PriceSource::Manual);
    if live_source != snapshot.selected_price_source {
        return false;
    }
    if stream.price_mode != snapshot.price_mode {
        return false;
    }

    // The scalar value only counts under manual pricing; for feed sources it
    // is runtime-driven, not user-edited.
    if live_source.is_manual() && stream.reference_price.value != snapshot.reference_price.value {
        return false;
    }

    let zero = Decimal::ZERO;
    if stream.reference_price.manual_bid.unwrap_or(zero)
        != snapshot.reference_price.manual_bid.unwrap_or(zero)
    {
        return false;
    }
    if stream.reference_price.manual_ask.unwrap_or(zero)
        != snapshot.reference_price.manual_ask.unwrap_or(zero)
    {
        return false;
    }

    side_matches(&stream.bid, &snapshot.bid) && side_matches(&stream.ask, &snapshot.ask)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds;
    use crate::model::SecurityType;
    use rust_decimal_macros::dec;

    fn stream() -> StreamSet {
        let mut s = feeds::build_stream(
            "snap-1",
            "AU-GOV-2",
            "Test Bond 2032",
            SecurityType::GovernmentBond,
            3,
            vec![],
        );
        s.selected_price_source = Some(PriceSource::Manual);
        s.reference_price.value = dec!(4.25);
        s
    }

    #[test]
    fn snapshot_is_idempotent_against_diff() {
        // P1: a freshly captured snapshot always compares equal
        let s = stream();
        let snap = create_snapshot(&s);
        assert!(configs_equal(&s, &snap));
    }

    #[test]
    fn snapshot_drops_activity_flags() {
        let mut s = stream();
        s.bid.spread_matrix[0].is_active = Some(true);
        let snap = create_snapshot(&s);
        // Toggling runtime activity must not register as a staged change
        s.bid.spread_matrix[0].is_active = Some(false);
        assert!(configs_equal(&s, &snap));
    }

    #[test]
    fn delta_edit_is_a_staged_change() {
        let mut s = stream();
        let snap = create_snapshot(&s);
        s.bid.spread_matrix[1].delta_bps += dec!(1);
        assert!(!configs_equal(&s, &snap));
    }

    #[test]
    fn manual_value_counts_only_under_manual_source() {
        let mut s = stream();
        s.quote_feeds.push(crate::model::QuoteFeed::placeholder("feed-a"));
        s.selected_price_source = Some(PriceSource::Feed("feed-a".into()));
        let snap = create_snapshot(&s);

        // Runtime-driven scalar moves are ignored for feed sources
        s.reference_price.value = dec!(9.99);
        assert!(configs_equal(&s, &snap));

        // But switching the source itself is staged
        s.selected_price_source = Some(PriceSource::Manual);
        assert!(!configs_equal(&s, &snap));
    }

    #[test]
    fn unset_manual_prices_read_as_zero() {
        let mut s = stream();
        s.reference_price.manual_bid = Some(Decimal::ZERO);
        let snap = create_snapshot(&s);
        s.reference_price.manual_bid = None;
        assert!(configs_equal(&s, &snap));
    }

    #[test]
    fn unset_max_lvls_reads_as_one() {
        let mut s = stream();
        s.bid.max_lvls = Some(1);
        let snap = create_snapshot(&s);
        s.bid.max_lvls = None;
        assert!(configs_equal(&s, &snap));

        s.bid.max_lvls = Some(2);
        assert!(!configs_equal(&s, &snap));
    }

    #[test]
    fn side_snapshot_preserves_other_side() {
        // P4: relaunching bid must carry the ask baseline over unchanged
        let mut s = stream();
        let original = create_snapshot(&s);

        // Stage edits on both sides
        s.bid.spread_matrix[0].delta_bps = dec!(7);
        s.ask.spread_matrix[0].delta_bps = dec!(-7);

        let merged = create_side_snapshot(&s, Side::Bid, Some(&original));
        assert_eq!(merged.ask, original.ask);
        assert_eq!(merged.bid.levels[0].delta_bps, dec!(7));
        // Ask still differs from its baseline → stream still staged
        assert!(!configs_equal(&s, &merged));
    }

    #[test]
    fn side_snapshot_commits_global_fields_from_live() {
        let mut s = stream();
        let original = create_snapshot(&s);
        s.price_mode = PriceMode::Notional;
        let merged = create_side_snapshot(&s, Side::Ask, Some(&original));
        assert_eq!(merged.price_mode, PriceMode::Notional);
    }

    #[test]
    fn side_snapshot_without_existing_falls_back_to_full() {
        let s = stream();
        let snap = create_side_snapshot(&s, Side::Bid, None);
        assert!(configs_equal(&s, &snap));
    }
}
