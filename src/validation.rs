//! Launch validation engine.
//!
//! Pure rule evaluation over a stream's current bid/ask configuration.
//! Rules run in a fixed order, first failure wins:
//! reference price presence → FFCH bid → FFCH ask → yield crossing →
//! quantity bounds (bid then ask). Failures are data, never errors.

use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::{Deserialize, Serialize};
use std::time::Duration;

use crate::model::{AffectedSide, PriceSource, Side, StreamSet, MAX_QUANTITY, MIN_QUANTITY};

/// Fat-finger limit on level-1 spreads, in basis points.
pub const FFCH_LIMIT_BPS: Decimal = dec!(100);

/// Basis points per yield point: yield = base + delta_bps / 100.
const BPS_PER_POINT: Decimal = dec!(100);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValidationErrorType {
    Ffch,
    YieldCrossing,
    QuantityLimit,
}

impl ValidationErrorType {
    /// Stable wire name, matching the serde representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationErrorType::Ffch => "ffch",
            ValidationErrorType::YieldCrossing => "yield_crossing",
            ValidationErrorType::QuantityLimit => "quantity_limit",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ValidationResult {
    pub success: bool,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub error_type: Option<ValidationErrorType>,
    #[serde(default)]
    pub affected_side: Option<AffectedSide>,
}

impl ValidationResult {
    pub fn ok() -> Self {
        Self {
            success: true,
            error: None,
            error_type: None,
            affected_side: None,
        }
    }

    pub fn fail(error_type: ValidationErrorType, affected_side: AffectedSide, message: String) -> Self {
        Self {
            success: false,
            error: Some(message),
            error_type: Some(error_type),
            affected_side: Some(affected_side),
        }
    }
}

/// Resolve the per-side reference bases for a stream.
///
/// A selected quote feed supplies its own bid/ask. Manual pricing uses the
/// per-side manual value when present, falling back to the single scalar
/// reference price. Zero reads as missing in all cases.
pub fn resolve_bases(stream: &StreamSet) -> (Option<Decimal>, Option<Decimal>) {
    let non_zero = |v: Decimal| if v.is_zero() { None } else { Some(v) };

    match &stream.selected_price_source {
        Some(PriceSource::Feed(feed_id)) => match stream.find_feed(feed_id) {
            Some(feed) => (non_zero(feed.bid), non_zero(feed.ask)),
            None => (None, None),
        },
        _ => {
            let fallback = non_zero(stream.reference_price.value);
            let bid = stream
                .reference_price
                .manual_bid
                .and_then(non_zero)
                .or(fallback);
            let ask = stream
                .reference_price
                .manual_ask
                .and_then(non_zero)
                .or(fallback);
            (bid, ask)
        }
    }
}

/// Evaluate the full launch-eligibility rule set for a stream.
///
/// The `side` parameter does not restrict evaluation; side-specific callers
/// use `affected_side` on the result to decide which side(s) to halt.
pub fn validate(stream: &StreamSet, _side: Option<Side>) -> ValidationResult {
    // 1. Reference price presence
    let (bid_base, ask_base) = resolve_bases(stream);
    let (bid_base, ask_base) = match (bid_base, ask_base) {
        (Some(b), Some(a)) => (b, a),
        _ => {
            return ValidationResult::fail(
                ValidationErrorType::Ffch,
                AffectedSide::Both,
                format!(
                    "No reference price available from source '{}'",
                    stream
                        .selected_price_source
                        .as_ref()
                        .map(|s| s.as_str())
                        .unwrap_or("manual")
                ),
            );
        }
    };

    let bid_l1 = stream.bid.spread_matrix.first();
    let ask_l1 = stream.ask.spread_matrix.first();

    // 2. FFCH on bid level 1
    if let Some(level) = bid_l1 {
        if level.delta_bps.abs() > FFCH_LIMIT_BPS {
            let implied = bid_base + level.delta_bps / BPS_PER_POINT;
            return ValidationResult::fail(
                ValidationErrorType::Ffch,
                AffectedSide::Bid,
                format!(
                    "Bid level 1 spread {} bps exceeds FFCH limit (implied yield {:.3})",
                    level.delta_bps, implied
                ),
            );
        }
    }

    // 3. FFCH on ask level 1
    if let Some(level) = ask_l1 {
        if level.delta_bps.abs() > FFCH_LIMIT_BPS {
            let implied = ask_base + level.delta_bps / BPS_PER_POINT;
            return ValidationResult::fail(
                ValidationErrorType::Ffch,
                AffectedSide::Ask,
                format!(
                    "Ask level 1 spread {} bps exceeds FFCH limit (implied yield {:.3})",
                    level.delta_bps, implied
                ),
            );
        }
    }

    // 4. Yield crossing. Equal yields are valid; only a strictly greater
    //    ask yield is an inverted market.
    if let (Some(bid), Some(ask)) = (bid_l1, ask_l1) {
        let bid_yield = bid_base + bid.delta_bps / BPS_PER_POINT;
        let ask_yield = ask_base + ask.delta_bps / BPS_PER_POINT;
        if ask_yield > bid_yield {
            return ValidationResult::fail(
                ValidationErrorType::YieldCrossing,
                AffectedSide::Both,
                format!(
                    "Ask yield {:.3} crosses bid yield {:.3}",
                    ask_yield, bid_yield
                ),
            );
        }
    }

    // 5. Quantity bounds, bid first
    if let Some(level) = bid_l1 {
        if level.quantity < MIN_QUANTITY || level.quantity > MAX_QUANTITY {
            return ValidationResult::fail(
                ValidationErrorType::QuantityLimit,
                AffectedSide::Bid,
                format!(
                    "Bid level 1 quantity {} outside [{}, {}]",
                    level.quantity, MIN_QUANTITY, MAX_QUANTITY
                ),
            );
        }
    }
    if let Some(level) = ask_l1 {
        if level.quantity < MIN_QUANTITY || level.quantity > MAX_QUANTITY {
            return ValidationResult::fail(
                ValidationErrorType::QuantityLimit,
                AffectedSide::Ask,
                format!(
                    "Ask level 1 quantity {} outside [{}, {}]",
                    level.quantity, MIN_QUANTITY, MAX_QUANTITY
                ),
            );
        }
    }

    ValidationResult::ok()
}

/// Async wrapper standing in for an order-management-system round trip.
/// Used by whole-stream launch call sites; per-level launches use the
/// synchronous result directly.
pub async fn validate_with_latency(
    stream: &StreamSet,
    side: Option<Side>,
    latency: Duration,
) -> ValidationResult {
    tokio::time::sleep(latency).await;
    validate(stream, side)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::feeds;
    use crate::model::{PriceMode, SecurityType};
    use rust_decimal_macros::dec;

    fn manual_stream(bid_value: Decimal) -> StreamSet {
        let mut stream = feeds::build_stream(
            "test-1",
            "AU-GOV-1",
            "Test Bond 2030",
            SecurityType::GovernmentBond,
            3,
            vec![],
        );
        stream.selected_price_source = Some(PriceSource::Manual);
        stream.price_mode = PriceMode::Quantity;
        stream.reference_price.value = bid_value;
        stream
    }

    #[test]
    fn missing_reference_price_fails_as_ffch_both() {
        // Scenario A: manual source, zero reference price
        let stream = manual_stream(dec!(0));
        let result = validate(&stream, None);
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ValidationErrorType::Ffch));
        assert_eq!(result.affected_side, Some(AffectedSide::Both));
    }

    #[test]
    fn missing_price_wins_over_ffch_violation() {
        // P5: missing reference price AND an FFCH breach must report
        // the reference-price failure (both sides), per the fixed order.
        let mut stream = manual_stream(dec!(0));
        stream.bid.spread_matrix[0].delta_bps = dec!(500);
        let result = validate(&stream, None);
        assert_eq!(result.error_type, Some(ValidationErrorType::Ffch));
        assert_eq!(result.affected_side, Some(AffectedSide::Both));
    }

    #[test]
    fn ffch_bid_breach_reports_implied_yield() {
        // Scenario B: base 9.5, delta 150 bps → implied yield 11.000
        let mut stream = manual_stream(dec!(9.5));
        stream.bid.spread_matrix[0].delta_bps = dec!(150);
        let result = validate(&stream, None);
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ValidationErrorType::Ffch));
        assert_eq!(result.affected_side, Some(AffectedSide::Bid));
        assert!(result.error.unwrap().contains("11.000"));
    }

    #[test]
    fn ffch_ask_breach_reports_ask_side() {
        let mut stream = manual_stream(dec!(9.5));
        stream.ask.spread_matrix[0].delta_bps = dec!(-120);
        let result = validate(&stream, None);
        assert_eq!(result.error_type, Some(ValidationErrorType::Ffch));
        assert_eq!(result.affected_side, Some(AffectedSide::Ask));
    }

    #[test]
    fn equal_yields_are_not_a_crossing() {
        // Scenario C / P6 boundary: bid yield == ask yield is valid
        let mut stream = manual_stream(dec!(9.0));
        stream.bid.spread_matrix[0].delta_bps = dec!(0);
        stream.ask.spread_matrix[0].delta_bps = dec!(0);
        assert!(validate(&stream, None).success);
    }

    #[test]
    fn marginally_crossed_yields_fail() {
        // P6: ask yield 0.001 above bid yield must fail
        let mut stream = manual_stream(dec!(9.0));
        stream.bid.spread_matrix[0].delta_bps = dec!(0);
        stream.ask.spread_matrix[0].delta_bps = dec!(0.1);
        let result = validate(&stream, None);
        assert!(!result.success);
        assert_eq!(result.error_type, Some(ValidationErrorType::YieldCrossing));
        assert_eq!(result.affected_side, Some(AffectedSide::Both));
    }

    #[test]
    fn quantity_bounds_checked_bid_first() {
        let mut stream = manual_stream(dec!(9.0));
        stream.bid.spread_matrix[0].quantity = 0;
        stream.ask.spread_matrix[0].quantity = 60_000_000;
        let result = validate(&stream, None);
        assert_eq!(result.error_type, Some(ValidationErrorType::QuantityLimit));
        assert_eq!(result.affected_side, Some(AffectedSide::Bid));
    }

    #[test]
    fn quantity_upper_bound_is_inclusive() {
        let mut stream = manual_stream(dec!(9.0));
        stream.bid.spread_matrix[0].quantity = MAX_QUANTITY;
        stream.ask.spread_matrix[0].quantity = MAX_QUANTITY;
        assert!(validate(&stream, None).success);
    }

    #[test]
    fn feed_source_uses_feed_bases() {
        let mut stream = manual_stream(dec!(0));
        stream.quote_feeds.push(crate::model::QuoteFeed {
            feed_id: "feed-a".into(),
            feed_name: "Feed A".into(),
            bid: dec!(4.5),
            ask: dec!(4.4),
            bid_timestamp: None,
            ask_timestamp: None,
        });
        stream.selected_price_source = Some(PriceSource::Feed("feed-a".into()));
        assert!(validate(&stream, None).success);

        // Dangling feed id → missing reference price
        stream.selected_price_source = Some(PriceSource::Feed("feed-z".into()));
        let result = validate(&stream, None);
        assert_eq!(result.affected_side, Some(AffectedSide::Both));
    }

    #[test]
    fn error_type_names_match_the_wire_form() {
        for kind in [
            ValidationErrorType::Ffch,
            ValidationErrorType::YieldCrossing,
            ValidationErrorType::QuantityLimit,
        ] {
            let wire = serde_json::to_string(&kind).unwrap();
            assert_eq!(wire, format!("\"{}\"", kind.as_str()));
        }
    }

    #[test]
    fn manual_per_side_prices_take_precedence() {
        let mut stream = manual_stream(dec!(5.0));
        stream.reference_price.manual_bid = Some(dec!(9.0));
        stream.reference_price.manual_ask = Some(dec!(8.5));
        let (bid, ask) = resolve_bases(&stream);
        assert_eq!(bid, Some(dec!(9.0)));
        assert_eq!(ask, Some(dec!(8.5)));
    }
}
