//! Weighted-average costing.
//!
//! Cost is receipt-weighted and issue-neutral: receipts blend the incoming unit
//! cost into the running average, issues never change it.

use rust_decimal::{Decimal, RoundingStrategy};

/// Decimal places kept on average unit cost.
pub const COST_SCALE: u32 = 6;

/// Round a unit cost to the stored scale.
pub fn round_cost(cost: Decimal) -> Decimal {
    cost.round_dp_with_strategy(COST_SCALE, RoundingStrategy::MidpointAwayFromZero)
}

/// Blend a receipt into an existing average.
///
/// `(on_hand * avg_cost + received * unit_cost) / (on_hand + received)`.
/// When the resulting quantity is zero the previous average is returned unchanged.
pub fn weighted_average_cost(
    on_hand: Decimal,
    avg_cost: Decimal,
    received: Decimal,
    unit_cost: Decimal,
) -> Decimal {
    let new_on_hand = on_hand + received;
    if new_on_hand.is_zero() {
        return avg_cost;
    }
    round_cost((on_hand * avg_cost + received * unit_cost) / new_on_hand)
}

/// `quantity * unit_cost`, the value carried by a position or a movement line.
pub fn extended_value(quantity: Decimal, unit_cost: Decimal) -> Decimal {
    quantity * unit_cost
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    #[test]
    fn blends_two_receipts() {
        assert_eq!(weighted_average_cost(dec!(100), dec!(10), dec!(50), dec!(16)), dec!(12));
    }

    #[test]
    fn zero_quantity_keeps_previous_cost() {
        assert_eq!(weighted_average_cost(dec!(0), dec!(7.5), dec!(0), dec!(99)), dec!(7.5));
    }

    #[test]
    fn receipt_into_empty_position_takes_incoming_cost() {
        assert_eq!(weighted_average_cost(dec!(0), dec!(10), dec!(20), dec!(3.25)), dec!(3.25));
    }

    #[test]
    fn repeating_fractions_are_rounded_to_cost_scale() {
        // (1*1 + 2*2) / 3 = 1.666...
        assert_eq!(weighted_average_cost(dec!(1), dec!(1), dec!(2), dec!(2)), dec!(1.666667));
    }

    fn qty() -> impl Strategy<Value = Decimal> {
        (0i64..1_000_000i64).prop_map(|n| Decimal::new(n, 2))
    }

    fn cost() -> impl Strategy<Value = Decimal> {
        (0i64..10_000_000i64).prop_map(|n| Decimal::new(n, 4))
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: the blended cost always lies between the two input costs.
        #[test]
        fn average_is_bounded_by_inputs(
            on_hand in qty(),
            avg in cost(),
            received in qty(),
            unit in cost(),
        ) {
            let blended = weighted_average_cost(on_hand, avg, received, unit);
            let lo = round_cost(avg.min(unit));
            let hi = round_cost(avg.max(unit));
            if (on_hand + received).is_zero() {
                prop_assert_eq!(blended, avg);
            } else {
                prop_assert!(blended >= lo && blended <= hi, "{blended} not in [{lo}, {hi}]");
            }
        }

        /// Property: the blended value differs from the sum of the input values
        /// by no more than the rounding of one unit cost across the new quantity.
        #[test]
        fn value_is_conserved_within_rounding(
            on_hand in qty(),
            avg in cost(),
            received in qty(),
            unit in cost(),
        ) {
            let new_on_hand = on_hand + received;
            prop_assume!(!new_on_hand.is_zero());
            let blended = weighted_average_cost(on_hand, avg, received, unit);
            let before = extended_value(on_hand, avg) + extended_value(received, unit);
            let after = extended_value(new_on_hand, blended);
            let tolerance = new_on_hand * Decimal::new(5, COST_SCALE + 1);
            prop_assert!((after - before).abs() <= tolerance);
        }
    }
}
