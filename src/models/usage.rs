//! Usage accounting for successful conversions.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Price per estimated page, in cents.
const CENTS_PER_PAGE: u64 = 1;

/// Token count treated as one estimated page.
const TOKENS_PER_PAGE: u64 = 1000;

/// Default margin applied on top of the base cost, in percent.
pub const DEFAULT_MARGIN_PERCENT: u64 = 30;

/// One usage row per successful conversion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UsageRecord {
    pub document_id: String,
    pub operation: String,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub base_cost_cents: u64,
    pub margin_percent: u64,
    pub total_cost_cents: u64,
    pub created_at: DateTime<Utc>,
}

/// Cost breakdown for one conversion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConversionCost {
    pub estimated_pages: u64,
    pub base_cost_cents: u64,
    pub margin_percent: u64,
    pub total_cost_cents: u64,
}

impl ConversionCost {
    /// Price a conversion from its total token usage.
    ///
    /// Pages are estimated at one page per 1000 tokens, rounded up; base cost
    /// is 1¢ per estimated page; total is base plus margin, rounded up.
    pub fn from_tokens(total_tokens: u64, margin_percent: u64) -> Self {
        let estimated_pages = total_tokens.div_ceil(TOKENS_PER_PAGE);
        let base_cost_cents = estimated_pages * CENTS_PER_PAGE;
        let total_cost_cents = (base_cost_cents * (100 + margin_percent)).div_ceil(100);
        Self {
            estimated_pages,
            base_cost_cents,
            margin_percent,
            total_cost_cents,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_tokens_cost_nothing() {
        let cost = ConversionCost::from_tokens(0, DEFAULT_MARGIN_PERCENT);
        assert_eq!(cost.estimated_pages, 0);
        assert_eq!(cost.base_cost_cents, 0);
        assert_eq!(cost.total_cost_cents, 0);
    }

    #[test]
    fn test_single_page() {
        let cost = ConversionCost::from_tokens(1, DEFAULT_MARGIN_PERCENT);
        assert_eq!(cost.estimated_pages, 1);
        assert_eq!(cost.base_cost_cents, 1);
        // ceil(1 * 1.30) = 2
        assert_eq!(cost.total_cost_cents, 2);
    }

    #[test]
    fn test_page_rounding() {
        assert_eq!(
            ConversionCost::from_tokens(1001, DEFAULT_MARGIN_PERCENT).estimated_pages,
            2
        );
        assert_eq!(
            ConversionCost::from_tokens(2000, DEFAULT_MARGIN_PERCENT).estimated_pages,
            2
        );
        assert_eq!(
            ConversionCost::from_tokens(2001, DEFAULT_MARGIN_PERCENT).estimated_pages,
            3
        );
    }

    #[test]
    fn test_margin_rounds_up() {
        // 10 pages: base 10¢, +30% = 13¢ exactly
        let cost = ConversionCost::from_tokens(10_000, 30);
        assert_eq!(cost.base_cost_cents, 10);
        assert_eq!(cost.total_cost_cents, 13);

        // 3 pages: base 3¢, 3.9¢ rounds up to 4¢
        let cost = ConversionCost::from_tokens(3_000, 30);
        assert_eq!(cost.total_cost_cents, 4);
    }

    #[test]
    fn test_zero_margin() {
        let cost = ConversionCost::from_tokens(5_000, 0);
        assert_eq!(cost.base_cost_cents, cost.total_cost_cents);
    }
}
