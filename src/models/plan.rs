use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Subscription plans offered by the marketplace. The plan/duration/price
/// table is static; checkout validates against it before any Stripe call.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Plan {
    Free,
    Basic,
    Pro,
}

impl Plan {
    pub fn as_str(&self) -> &'static str {
        match self {
            Plan::Free => "free",
            Plan::Basic => "basic",
            Plan::Pro => "pro",
        }
    }
}

impl FromStr for Plan {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "free" => Ok(Plan::Free),
            "basic" => Ok(Plan::Basic),
            "pro" => Ok(Plan::Pro),
            _ => Err(()),
        }
    }
}

impl fmt::Display for Plan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Billing duration, written as "1m" / "6m" / "12m" in the API.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PlanDuration {
    #[serde(rename = "1m")]
    OneMonth,
    #[serde(rename = "6m")]
    SixMonths,
    #[serde(rename = "12m")]
    TwelveMonths,
}

impl PlanDuration {
    pub fn as_str(&self) -> &'static str {
        match self {
            PlanDuration::OneMonth => "1m",
            PlanDuration::SixMonths => "6m",
            PlanDuration::TwelveMonths => "12m",
        }
    }

    /// Number of days of access the duration grants.
    pub fn days(&self) -> i64 {
        match self {
            PlanDuration::OneMonth => 30,
            PlanDuration::SixMonths => 180,
            PlanDuration::TwelveMonths => 365,
        }
    }

    /// Stripe recurring interval count, in months.
    pub fn interval_months(&self) -> u32 {
        match self {
            PlanDuration::OneMonth => 1,
            PlanDuration::SixMonths => 6,
            PlanDuration::TwelveMonths => 12,
        }
    }
}

impl FromStr for PlanDuration {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "1m" => Ok(PlanDuration::OneMonth),
            "6m" => Ok(PlanDuration::SixMonths),
            "12m" => Ok(PlanDuration::TwelveMonths),
            _ => Err(()),
        }
    }
}

impl fmt::Display for PlanDuration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Price in cents for a plan/duration pair, or None when the combination is
/// not sold (the free plan is only available as a 30-day activation, never
/// through checkout).
pub fn plan_price_cents(plan: Plan, duration: PlanDuration) -> Option<i64> {
    match (plan, duration) {
        (Plan::Free, _) => None,
        (Plan::Basic, PlanDuration::OneMonth) => Some(999),
        (Plan::Basic, PlanDuration::SixMonths) => Some(4_999),
        (Plan::Basic, PlanDuration::TwelveMonths) => Some(8_999),
        (Plan::Pro, PlanDuration::OneMonth) => Some(1_999),
        (Plan::Pro, PlanDuration::SixMonths) => Some(9_999),
        (Plan::Pro, PlanDuration::TwelveMonths) => Some(17_999),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn free_plan_has_no_checkout_price() {
        assert_eq!(plan_price_cents(Plan::Free, PlanDuration::OneMonth), None);
        assert_eq!(plan_price_cents(Plan::Free, PlanDuration::TwelveMonths), None);
    }

    #[test]
    fn paid_plans_are_priced_for_all_durations() {
        for plan in [Plan::Basic, Plan::Pro] {
            for duration in [
                PlanDuration::OneMonth,
                PlanDuration::SixMonths,
                PlanDuration::TwelveMonths,
            ] {
                assert!(plan_price_cents(plan, duration).is_some());
            }
        }
    }

    #[test]
    fn duration_round_trips_through_str() {
        for duration in [
            PlanDuration::OneMonth,
            PlanDuration::SixMonths,
            PlanDuration::TwelveMonths,
        ] {
            assert_eq!(duration.as_str().parse::<PlanDuration>(), Ok(duration));
        }
        assert!("2w".parse::<PlanDuration>().is_err());
    }
}
