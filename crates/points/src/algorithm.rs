//! Points algorithm (pure, decimal arithmetic).
//!
//! ```text
//! x      = collection / target                 (0 when target == 0)
//! actual = ((A^x - 1) / (A - 1)) * 3000 * (target / 1_000_000),  A = 160
//! total  = actual + bonus(day of month)
//! ```
//!
//! Bonus tiers by day of month:
//!
//! | day    | bonus                                   |
//! |--------|-----------------------------------------|
//! | 1..=10 | `2 * actual`                            |
//! | 11..=20| `actual + day10 carry`                  |
//! | 21..=31| `0.1 * actual + day10 + day20 carries`  |
//!
//! Rounding: the ratio to 10 places, `actual` to 9.
//!
//! ## Saturation
//!
//! `A^x` leaves the decimal range once `x` passes about 13, which a month of
//! on-target days reaches in the cumulative recalculation. `actual` is
//! therefore clamped to [`ACTUAL_POINTS_CEILING`] (10^24) and the score is
//! flagged `saturated`. At that ceiling a full month of bonus-weighted totals
//! still fits in a `Decimal`, so scoring never fails.

use std::collections::BTreeMap;

use chrono::{Datelike, NaiveDate};
use rust_decimal::{Decimal, MathematicalOps};
use serde::{Deserialize, Serialize};

/// Curve base `A`.
pub const BASE: Decimal = Decimal::from_parts(160, 0, 0, false, 0);

/// Upper bound for `actual` (10^24).
pub const ACTUAL_POINTS_CEILING: Decimal = Decimal::from_parts(2_701_131_776, 466_537_709, 54_210, false, 0);

const POINTS_PER_UNIT: Decimal = Decimal::from_parts(3000, 0, 0, false, 0);
const TARGET_UNIT: Decimal = Decimal::from_parts(1_000_000, 0, 0, false, 0);
const TWO: Decimal = Decimal::from_parts(2, 0, 0, false, 0);
const TENTH: Decimal = Decimal::from_parts(1, 0, 0, false, 1);

/// Largest exponent for which `160^x` stays below `Decimal::MAX`.
const EXPONENT_LIMIT: Decimal = Decimal::from_parts(13, 0, 0, false, 0);

const RATIO_DP: u32 = 10;
const ACTUAL_DP: u32 = 9;
const TOTAL_DP: u32 = 10;

/// Bonus carried from the milestone days into later tiers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BonusCarry {
    pub day10: Decimal,
    pub day20: Decimal,
}

/// Points for one scored day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DayScore {
    pub actual: Decimal,
    pub bonus: Decimal,
    pub total: Decimal,
    /// Carries after this day.
    pub carry: BonusCarry,
    /// Some `actual` in the computation hit [`ACTUAL_POINTS_CEILING`].
    #[serde(default)]
    pub saturated: bool,
}

impl DayScore {
    pub fn zero() -> Self {
        Self {
            actual: Decimal::ZERO,
            bonus: Decimal::ZERO,
            total: Decimal::ZERO,
            carry: BonusCarry::default(),
            saturated: false,
        }
    }
}

/// `amount / target` rounded to 10 places; zero target yields zero.
///
/// A quotient beyond the decimal range saturates at `Decimal::MAX`.
pub fn ratio(amount: Decimal, target: Decimal) -> Decimal {
    if target.is_zero() {
        return Decimal::ZERO;
    }
    amount
        .checked_div(target)
        .map(|x| x.round_dp(RATIO_DP))
        .unwrap_or(Decimal::MAX)
}

/// Pre-bonus points for ratio `x` against `target`, clamped to
/// [`ACTUAL_POINTS_CEILING`].
pub fn actual_points(x: Decimal, target: Decimal) -> Decimal {
    clamped_actual(x, target).0
}

/// `(actual, saturated)`.
fn clamped_actual(x: Decimal, target: Decimal) -> (Decimal, bool) {
    if target.is_zero() {
        return (Decimal::ZERO, false);
    }
    match curve(x, target) {
        Some(points) if points <= ACTUAL_POINTS_CEILING => (points, false),
        _ => (ACTUAL_POINTS_CEILING, true),
    }
}

/// Unclamped curve value; `None` when it leaves the decimal range.
fn curve(x: Decimal, target: Decimal) -> Option<Decimal> {
    if x > EXPONENT_LIMIT {
        return None;
    }
    let growth = BASE.checked_powd(x)?;
    let shape = (growth - Decimal::ONE).checked_div(BASE - Decimal::ONE)?;
    let scale = (target / TARGET_UNIT).checked_mul(POINTS_PER_UNIT)?;

    shape.checked_mul(scale).map(|p| p.round_dp(ACTUAL_DP))
}

/// Score a single day's collection in isolation (incremental path).
///
/// Day 10 records `2 * actual` and day 20 records `actual` into the returned
/// carry; later tiers read the carry passed in.
pub fn score_day(date: NaiveDate, amount: Decimal, target: Decimal, carry: BonusCarry) -> DayScore {
    let x = ratio(amount, target);
    let (actual, saturated) = clamped_actual(x, target);
    let day = date.day();

    let mut carry = carry;
    match day {
        10 => carry.day10 = TWO * actual,
        20 => carry.day20 = actual,
        _ => {}
    }

    let bonus = match day {
        1..=10 => TWO * actual,
        11..=20 => actual + carry.day10,
        _ => TENTH * actual + carry.day10 + carry.day20,
    };

    DayScore {
        actual,
        bonus,
        total: (actual + bonus).round_dp(TOTAL_DP),
        carry,
        saturated,
    }
}

/// Full recalculation over every recorded day of a month.
///
/// The ratio accumulates across days in ascending date order, so `actual` is
/// the month-to-date curve value. Milestone snapshots isolate what each later
/// tier adds. Carries start from zero on every call; the returned score holds
/// the last day's points and the final carries.
pub fn recalculate(daily: &BTreeMap<NaiveDate, Decimal>, target: Decimal) -> DayScore {
    let mut x = Decimal::ZERO;
    let mut carry = BonusCarry::default();
    let mut day10_points = Decimal::ZERO;
    let mut day20_points = Decimal::ZERO;
    let mut saturated = false;
    let mut score = DayScore::zero();

    for (date, amount) in daily {
        x = if target.is_zero() {
            Decimal::ZERO
        } else {
            x.checked_add(ratio(*amount, target)).unwrap_or(Decimal::MAX)
        };
        let (actual, clamped) = clamped_actual(x, target);
        saturated |= clamped;
        let day = date.day();

        match day {
            10 => {
                carry.day10 = TWO * actual;
                day10_points = actual;
            }
            20 => {
                carry.day20 = actual - day10_points;
                day20_points = actual;
            }
            _ => {}
        }

        let bonus = match day {
            1..=10 => TWO * actual,
            11..=20 => actual - day10_points + carry.day10,
            _ => TENTH * (actual - day20_points) + carry.day10 + carry.day20,
        };

        score = DayScore {
            actual,
            bonus,
            total: actual + bonus,
            carry,
            saturated,
        };
    }

    score
}
