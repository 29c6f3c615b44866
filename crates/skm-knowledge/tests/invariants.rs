// SPDX-License-Identifier: MIT OR Apache-2.0
//! Property tests for the activation and breadth-regularization formulae.

use chrono::NaiveDate;
use proptest::prelude::*;
use skm_knowledge::{Knowledge, KnowledgeConfig, Reference, breadth_regularization};

fn today() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

proptest! {
    #[test]
    fn activation_is_monotonically_nonincreasing_in_age(d1 in 0i64..8000, d2 in 0i64..8000) {
        let (fresh, stale) = if d1 <= d2 { (d1, d2) } else { (d2, d1) };
        let a_fresh = Reference::new(today() - chrono::Days::new(fresh as u64)).activation(today());
        let a_stale = Reference::new(today() - chrono::Days::new(stale as u64)).activation(today());
        prop_assert!(a_fresh >= a_stale);
    }

    #[test]
    fn activation_is_bounded(days in 0i64..100_000) {
        let a = Reference::new(today() - chrono::Days::new(days as u64)).activation(today());
        prop_assert!((0.1..=1.0).contains(&a));
    }

    #[test]
    fn breadth_regularization_is_subadditive(
        x in 0.0f64..10_000.0,
        y in 0.0f64..10_000.0,
        k in 1.0f64..1_000.0,
    ) {
        let lhs = breadth_regularization(x, k) + breadth_regularization(y, k);
        let rhs = breadth_regularization(x + y, k);
        prop_assert!(lhs >= rhs - 1e-9);
    }

    #[test]
    fn breadth_regularization_is_monotonic(
        x in 0.0f64..10_000.0,
        delta in 0.0f64..10_000.0,
        k in 1.0f64..1_000.0,
    ) {
        prop_assert!(breadth_regularization(x + delta, k) >= breadth_regularization(x, k) - 1e-12);
    }

    #[test]
    fn overall_rollup_equals_bucket_sum(counts in proptest::collection::vec(1u32..50, 1..8)) {
        let mut knowledge = Knowledge::new();
        for (index, count) in counts.iter().enumerate() {
            let parts = vec!["python".to_string(), format!("mod{index}"), "f".to_string()];
            knowledge.add(&parts, today(), *count);
        }
        let config = KnowledgeConfig::default();
        let normalized = knowledge.normalize(&config, today());
        let bucket_sum: f64 = normalized
            .iter()
            .filter(|(name, _)| !name.ends_with("__overall__"))
            .map(|(_, score)| score)
            .sum();
        let overall = normalized.get("python.__overall__").unwrap();
        prop_assert!((overall - bucket_sum).abs() < 1e-6);
    }
}
