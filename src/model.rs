use rust_decimal::Decimal;
use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

/// Hard bounds on a level quantity, inclusive.
pub const MIN_QUANTITY: i64 = 1;
pub const MAX_QUANTITY: i64 = 50_000_000;

/// Upper bound on simultaneously active levels per side.
pub const MAX_LEVELS_CAP: u8 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SecurityType {
    #[serde(rename = "GOVERNMENT_BOND")]
    GovernmentBond,
    #[serde(rename = "CORPORATE_BOND")]
    CorporateBond,
    #[serde(rename = "BILL")]
    Bill,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PriceMode {
    #[serde(rename = "QUANTITY")]
    Quantity,
    #[serde(rename = "NOTIONAL")]
    Notional,
    #[serde(rename = "AMOUNT")]
    Amount,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    #[serde(rename = "BID")]
    Bid,
    #[serde(rename = "ASK")]
    Ask,
}

impl Side {
    pub fn opposite(&self) -> Side {
        match self {
            Side::Bid => Side::Ask,
            Side::Ask => Side::Bid,
        }
    }
}

/// Which side(s) a validation failure points at.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum AffectedSide {
    #[serde(rename = "BID")]
    Bid,
    #[serde(rename = "ASK")]
    Ask,
    #[serde(rename = "BOTH")]
    Both,
}

impl AffectedSide {
    pub fn touches(&self, side: Side) -> bool {
        matches!(
            (self, side),
            (AffectedSide::Both, _) | (AffectedSide::Bid, Side::Bid) | (AffectedSide::Ask, Side::Ask)
        )
    }
}

/// A price source is either the literal "manual" or a quote-feed id.
/// Serialized as a bare string so stored state stays shape-compatible
/// with the original flat representation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PriceSource {
    Manual,
    Feed(String),
}

impl PriceSource {
    pub fn is_manual(&self) -> bool {
        matches!(self, PriceSource::Manual)
    }

    pub fn as_str(&self) -> &str {
        match self {
            PriceSource::Manual => "manual",
            PriceSource::Feed(id) => id.as_str(),
        }
    }
}

impl Default for PriceSource {
    fn default() -> Self {
        PriceSource::Manual
    }
}

impl From<&str> for PriceSource {
    fn from(s: &str) -> Self {
        if s.is_empty() || s.eq_ignore_ascii_case("manual") {
            PriceSource::Manual
        } else {
            PriceSource::Feed(s.to_string())
        }
    }
}

impl Serialize for PriceSource {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for PriceSource {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        if s.is_empty() {
            return Err(de::Error::custom("price source must be non-empty"));
        }
        Ok(PriceSource::from(s.as_str()))
    }
}

/// One quote feed entry attached to a stream. Shaped like a live
/// market-data snapshot; `bid >= ask` by construction (yield terms).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct QuoteFeed {
    pub feed_id: String,
    pub feed_name: String,
    pub bid: Decimal,
    pub ask: Decimal,
    #[serde(default)]
    pub bid_timestamp: Option<i64>,
    #[serde(default)]
    pub ask_timestamp: Option<i64>,
}

impl QuoteFeed {
    /// Zero-value placeholder used when a batch price-source assignment
    /// targets a feed the stream has never seen.
    pub fn placeholder(feed_id: &str) -> Self {
        Self {
            feed_id: feed_id.to_string(),
            feed_name: feed_id.to_string(),
            bid: Decimal::ZERO,
            ask: Decimal::ZERO,
            bid_timestamp: None,
            ask_timestamp: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReferencePrice {
    pub source: PriceSource,
    pub value: Decimal,
    #[serde(default)]
    pub manual_bid: Option<Decimal>,
    #[serde(default)]
    pub manual_ask: Option<Decimal>,
}

impl Default for ReferencePrice {
    fn default() -> Self {
        Self {
            source: PriceSource::Manual,
            value: Decimal::ZERO,
            manual_bid: None,
            manual_ask: None,
        }
    }
}

/// One rung of the ladder. `level_number` is 1-based and fixed at creation.
/// `is_active` is the per-level runtime override; when absent, activity is
/// derived from side state and `levels_to_launch`/`max_lvls`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Level {
    pub level_number: u8,
    pub delta_bps: Decimal,
    pub quantity: i64,
    #[serde(default)]
    pub is_active: Option<bool>,
}

impl Level {
    pub fn new(level_number: u8, delta_bps: Decimal, quantity: i64) -> Self {
        Self {
            level_number,
            delta_bps,
            quantity,
            is_active: None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SideState {
    #[serde(rename = "ACTIVE")]
    Active,
    #[serde(rename = "PAUSED")]
    Paused,
    #[serde(rename = "HALTED")]
    Halted,
}

/// One side (bid or ask) of a stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StreamSide {
    pub is_active: bool,
    pub state: SideState,
    /// Cap on simultaneously active levels, 0..=5. Unset reads as 1.
    #[serde(default)]
    pub max_lvls: Option<u8>,
    #[serde(default)]
    pub levels_to_launch: Option<u8>,
    /// Always exactly N entries, index-aligned to level_number 1..N.
    pub spread_matrix: Vec<Level>,
    /// Independent per-side pricing, populated only when that mode is on.
    #[serde(default)]
    pub price_source: Option<PriceSource>,
    #[serde(default)]
    pub price: Option<Decimal>,
}

impl StreamSide {
    pub fn new(levels: Vec<Level>) -> Self {
        Self {
            is_active: false,
            state: SideState::Paused,
            max_lvls: Some(1),
            levels_to_launch: None,
            spread_matrix: levels,
            price_source: None,
            price: None,
        }
    }

    pub fn effective_max_lvls(&self) -> u8 {
        self.max_lvls.unwrap_or(1)
    }

    /// Whether one level is live, resolving the per-level override first.
    pub fn level_is_active(&self, level: &Level) -> bool {
        match level.is_active {
            Some(flag) => flag,
            None => {
                self.is_active
                    && level.level_number <= self.levels_to_launch.unwrap_or(0)
                    && level.level_number <= self.effective_max_lvls()
            }
        }
    }

    pub fn active_level_count(&self) -> usize {
        self.spread_matrix
            .iter()
            .filter(|lvl| self.level_is_active(lvl))
            .count()
    }

    pub fn has_active_levels(&self) -> bool {
        self.active_level_count() > 0
    }

    pub fn level(&self, level_number: u8) -> Option<&Level> {
        self.spread_matrix
            .iter()
            .find(|lvl| lvl.level_number == level_number)
    }

    pub fn level_mut(&mut self, level_number: u8) -> Option<&mut Level> {
        self.spread_matrix
            .iter_mut()
            .find(|lvl| lvl.level_number == level_number)
    }
}

use crate::snapshot::StagingSnapshot;
use crate::stream_fsm::StreamState;

/// The aggregate root: one configurable bid/ask quote ladder for a security.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StreamSet {
    pub id: String,
    pub security_id: String,
    pub security_name: String,
    pub security_type: SecurityType,
    pub state: StreamState,
    pub price_mode: PriceMode,
    /// None means the stream has never been given a source (unconfigured).
    #[serde(default)]
    pub selected_price_source: Option<PriceSource>,
    pub reference_price: ReferencePrice,
    #[serde(default)]
    pub quote_feeds: Vec<QuoteFeed>,
    pub bid: StreamSide,
    pub ask: StreamSide,
    /// Derived/cached: live config differs from `last_launched_snapshot`.
    /// Re-derived after every staging-relevant mutation (debounced).
    #[serde(default)]
    pub has_staging_changes: bool,
    #[serde(default)]
    pub last_launched_snapshot: Option<StagingSnapshot>,
    #[serde(default)]
    pub halt_reason: Option<String>,
    #[serde(default)]
    pub halt_details: Option<String>,
    /// Dismissible banner flag; never halts the stream.
    #[serde(default)]
    pub missing_price_source: bool,
    /// Transient per-side manual-price error; auto-clears on a valid entry.
    #[serde(default)]
    pub manual_price_error: Option<Side>,
}

impl StreamSet {
    pub fn side(&self, side: Side) -> &StreamSide {
        match side {
            Side::Bid => &self.bid,
            Side::Ask => &self.ask,
        }
    }

    pub fn side_mut(&mut self, side: Side) -> &mut StreamSide {
        match side {
            Side::Bid => &mut self.bid,
            Side::Ask => &mut self.ask,
        }
    }

    pub fn has_any_active_level(&self) -> bool {
        self.bid.has_active_levels() || self.ask.has_active_levels()
    }

    pub fn find_feed(&self, feed_id: &str) -> Option<&QuoteFeed> {
        self.quote_feeds.iter().find(|f| f.feed_id == feed_id)
    }

    /// Displayed status: halted/cancelled/unconfigured pass through,
    /// otherwise active iff either side has at least one live level.
    pub fn display_status(&self) -> StreamState {
        match self.state {
            StreamState::Halted | StreamState::Cancelled | StreamState::Unconfigured => self.state,
            _ => {
                if self.has_any_active_level() {
                    StreamState::Active
                } else {
                    StreamState::Paused
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn side_with_levels(n: u8) -> StreamSide {
        StreamSide::new(
            (1..=n)
                .map(|i| Level::new(i, dec!(5), 1_000_000))
                .collect(),
        )
    }

    #[test]
    fn price_source_round_trip() {
        let manual: PriceSource = serde_json::from_str("\"manual\"").unwrap();
        assert_eq!(manual, PriceSource::Manual);

        let feed: PriceSource = serde_json::from_str("\"feed-cba\"").unwrap();
        assert_eq!(feed, PriceSource::Feed("feed-cba".into()));

        assert_eq!(serde_json::to_string(&manual).unwrap(), "\"manual\"");
        assert_eq!(serde_json::to_string(&feed).unwrap(), "\"feed-cba\"");
    }

    #[test]
    fn derived_activity_respects_max_lvls() {
        let mut side = side_with_levels(5);
        side.is_active = true;
        side.levels_to_launch = Some(5);
        side.max_lvls = Some(2);

        let active: Vec<u8> = side
            .spread_matrix
            .iter()
            .filter(|lvl| side.level_is_active(lvl))
            .map(|lvl| lvl.level_number)
            .collect();
        assert_eq!(active, vec![1, 2]);
    }

    #[test]
    fn explicit_level_flag_overrides_derivation() {
        let mut side = side_with_levels(3);
        side.is_active = false;
        side.level_mut(3).unwrap().is_active = Some(true);

        assert_eq!(side.active_level_count(), 1);
        assert!(side.has_active_levels());
    }

    #[test]
    fn unset_max_lvls_reads_as_one() {
        let mut side = side_with_levels(2);
        side.max_lvls = None;
        assert_eq!(side.effective_max_lvls(), 1);
    }
}
