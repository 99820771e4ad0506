//! Property tests for threshold classification

use alerting::{classify_bounds, Classification};
use model::ThresholdBounds;
use proptest::prelude::*;
use rust_decimal::Decimal;

fn decimal() -> impl Strategy<Value = Decimal> {
    (-10_000_000i64..10_000_000i64).prop_map(|m| Decimal::new(m, 2))
}

proptest! {
    #[test]
    fn value_on_warning_max_is_normal(bound in decimal()) {
        let bounds = ThresholdBounds { warning_max: Some(bound), ..Default::default() };
        prop_assert_eq!(classify_bounds(bound, &bounds), Classification::Normal);
        prop_assert_eq!(classify_bounds(bound + Decimal::ONE, &bounds), Classification::Warning);
        prop_assert_eq!(classify_bounds(bound - Decimal::ONE, &bounds), Classification::Normal);
    }

    #[test]
    fn value_on_any_single_bound_is_normal(bound in decimal(), which in 0usize..4) {
        let mut bounds = ThresholdBounds::default();
        match which {
            0 => bounds.warning_min = Some(bound),
            1 => bounds.warning_max = Some(bound),
            2 => bounds.critical_min = Some(bound),
            _ => bounds.critical_max = Some(bound),
        }
        prop_assert_eq!(classify_bounds(bound, &bounds), Classification::Normal);
    }

    #[test]
    fn critical_dominates_when_both_tiers_crossed(
        warning_max in decimal(),
        gap in 1i64..100_000,
        beyond in 1i64..100_000,
    ) {
        let critical_max = warning_max + Decimal::new(gap, 2);
        let bounds = ThresholdBounds {
            warning_max: Some(warning_max),
            critical_max: Some(critical_max),
            warning_min: Some(warning_max - Decimal::from(1000)),
            critical_min: Some(warning_max - Decimal::from(2000)),
        };
        let above = critical_max + Decimal::new(beyond, 2);
        prop_assert_eq!(classify_bounds(above, &bounds), Classification::Critical);

        let below = warning_max - Decimal::from(2000) - Decimal::new(beyond, 2);
        prop_assert_eq!(classify_bounds(below, &bounds), Classification::Critical);
    }

    #[test]
    fn unset_bounds_are_always_normal(value in decimal()) {
        prop_assert_eq!(classify_bounds(value, &ThresholdBounds::default()), Classification::Normal);
    }
}
