//! Simulated quote feeds and the mock security catalog.
//!
//! Feed values are randomly generated but shaped like a live market-data
//! snapshot. In yield terms the bid always sits at or above the ask, so a
//! freshly seeded stream validates clean.

use once_cell::sync::Lazy;
use rand::Rng;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use tracing::debug;

use crate::context::DeskContext;
use crate::desk_state::DeskState;
use crate::model::{
    Level, PriceMode, PriceSource, QuoteFeed, ReferencePrice, SecurityType, StreamSet, StreamSide,
};
use crate::stream_fsm::StreamState;

pub const FEED_IDS: [&str; 3] = ["feed-cba", "feed-ubs", "feed-jpm"];

static DEFAULT_BID_DELTAS: Lazy<[Decimal; 5]> =
    Lazy::new(|| [dec!(2), dec!(4), dec!(6), dec!(8), dec!(10)]);
static DEFAULT_ASK_DELTAS: Lazy<[Decimal; 5]> =
    Lazy::new(|| [dec!(-2), dec!(-4), dec!(-6), dec!(-8), dec!(-10)]);

const DEFAULT_QUANTITY: i64 = 1_000_000;

fn default_side(levels: u8, deltas: &[Decimal; 5]) -> StreamSide {
    let levels = levels.clamp(1, 5);
    StreamSide::new(
        (1..=levels)
            .map(|n| Level::new(n, deltas[(n - 1) as usize], DEFAULT_QUANTITY))
            .collect(),
    )
}

/// Construct a stream with default ladders. Streams start unconfigured;
/// callers assign a price source to promote them to staging.
pub fn build_stream(
    id: &str,
    security_id: &str,
    security_name: &str,
    security_type: SecurityType,
    levels: u8,
    quote_feeds: Vec<QuoteFeed>,
) -> StreamSet {
    StreamSet {
        id: id.to_string(),
        security_id: security_id.to_string(),
        security_name: security_name.to_string(),
        security_type,
        state: StreamState::Unconfigured,
        price_mode: PriceMode::Quantity,
        selected_price_source: None,
        reference_price: ReferencePrice::default(),
        quote_feeds,
        bid: default_side(levels, &DEFAULT_BID_DELTAS),
        ask: default_side(levels, &DEFAULT_ASK_DELTAS),
        has_staging_changes: false,
        last_launched_snapshot: None,
        halt_reason: None,
        halt_details: None,
        missing_price_source: false,
        manual_price_error: None,
    }
}

fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64_retain(value)
        .unwrap_or_default()
        .round_dp(3)
}

/// Generate one quote set around a mid yield, bid at or above ask.
pub fn random_feed_set(now_ms: i64) -> Vec<QuoteFeed> {
    let mut rng = rand::thread_rng();
    FEED_IDS
        .iter()
        .map(|feed_id| {
            let mid = rng.gen_range(2.0..6.0);
            let half_spread = rng.gen_range(0.005..0.05);
            QuoteFeed {
                feed_id: feed_id.to_string(),
                feed_name: feed_id.to_uppercase().replace("FEED-", ""),
                bid: to_decimal(mid + half_spread),
                ask: to_decimal(mid - half_spread),
                bid_timestamp: Some(now_ms),
                ask_timestamp: Some(now_ms),
            }
        })
        .collect()
}

/// Seed the desk with a small catalog covering every security type.
pub fn seed_catalog(ctx: &DeskContext) -> Vec<StreamSet> {
    let now = ctx.time.now_millis();
    let catalog = [
        ("AU-GOV-3Y", "Treasury Bond 3Y 2028", SecurityType::GovernmentBond, 5),
        ("AU-GOV-10Y", "Treasury Bond 10Y 2035", SecurityType::GovernmentBond, 5),
        ("AU-CORP-5Y", "Corp Senior Note 2030", SecurityType::CorporateBond, 3),
        ("AU-CORP-7Y", "Corp Sub Note 2032", SecurityType::CorporateBond, 3),
        ("AU-BILL-90D", "Bank Bill 90D", SecurityType::Bill, 2),
        ("AU-BILL-180D", "Bank Bill 180D", SecurityType::Bill, 2),
    ];

    catalog
        .iter()
        .map(|(security_id, name, kind, levels)| {
            let mut stream = build_stream(
                &ctx.id.new_id(),
                security_id,
                name,
                *kind,
                *levels,
                random_feed_set(now),
            );
            // Seeded streams come up staged against their first feed
            stream.selected_price_source =
                Some(PriceSource::Feed(FEED_IDS[0].to_string()));
            stream.state = StreamState::Staging;
            stream
        })
        .collect()
}

/// One simulated market-data tick: jitter every feed on every stream.
/// Runtime-only mutation, never touches staging.
pub fn tick(state: &mut DeskState, ctx: &DeskContext) {
    let now = ctx.time.now_millis();
    let mut rng = rand::thread_rng();

    let mut updates: Vec<(String, String, Decimal, Decimal)> = Vec::new();
    for stream in state.streams() {
        for feed in &stream.quote_feeds {
            let drift = rng.gen_range(-0.01..0.01);
            let bid = (feed.bid + to_decimal(drift)).max(dec!(0.01));
            // Keep bid >= ask by construction
            let ask = feed.ask.min(bid);
            updates.push((stream.id.clone(), feed.feed_id.clone(), bid, ask));
        }
    }

    for (stream_id, feed_id, bid, ask) in updates {
        if let Err(e) = state.apply_feed_update(&stream_id, &feed_id, bid, ask, now) {
            debug!("Feed tick skipped for {}: {}", stream_id, e);
        }
    }
}
