//! Property-based tests for output selection and split planning.
//!
//! Uses proptest to verify invariants hold for arbitrary inputs.

use proptest::prelude::*;

use crate::errors::AnchorError;
use crate::provider::UnspentOutput;
use crate::tx::{plan_split, select_largest};
use crate::DUST_THRESHOLD_SATOSHI;

// ============================================================================
// Arbitrary Implementations
// ============================================================================

/// Generate arbitrary 64-hex-digit transaction ids.
fn arb_txid() -> impl Strategy<Value = String> {
    prop::array::uniform32(any::<u8>()).prop_map(hex::encode)
}

/// Generate arbitrary unspent outputs.
fn arb_unspent() -> impl Strategy<Value = UnspentOutput> {
    (arb_txid(), 0u32..8, 1u64..10_000_000_000)
        .prop_map(|(txid, vout, amount)| UnspentOutput::new(txid, vout, amount))
}

/// Generate non-empty unspent output sets.
fn arb_unspent_set() -> impl Strategy<Value = Vec<UnspentOutput>> {
    prop::collection::vec(arb_unspent(), 1..20)
}

// ============================================================================
// Selection Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// The selected output carries the maximum amount.
    #[test]
    fn prop_select_largest_is_maximum(unspent in arb_unspent_set()) {
        let selected = select_largest(&unspent).unwrap();
        let max = unspent.iter().map(|u| u.amount_satoshi).max().unwrap();
        prop_assert_eq!(selected.amount_satoshi, max);
    }

    /// Ties go to the first output seen.
    #[test]
    fn prop_select_largest_first_seen(unspent in arb_unspent_set()) {
        let selected = select_largest(&unspent).unwrap();
        let first = unspent
            .iter()
            .position(|u| u.amount_satoshi == selected.amount_satoshi)
            .unwrap();
        prop_assert_eq!(&unspent[first], selected);
    }

    /// A strictly greatest output is always the one chosen.
    #[test]
    fn prop_select_strict_maximum(
        unspent in prop::collection::vec(arb_unspent(), 0..10),
        winner in arb_txid(),
    ) {
        let top = unspent.iter().map(|u| u.amount_satoshi).max().unwrap_or(0) + 1;
        let mut all = unspent.clone();
        all.push(UnspentOutput::new(winner.clone(), 0, top));

        let selected = select_largest(&all).unwrap();
        prop_assert_eq!(&selected.source_tx_id, &winner);
    }
}

// ============================================================================
// Split Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(1000))]

    /// When the full count clears the dust threshold it is used as-is.
    #[test]
    fn prop_split_full_count(
        total in 0u64..100_000_000_000,
        fee in 0u64..1_000_000,
        max_outputs in 1usize..200,
    ) {
        prop_assume!(total >= fee);
        let per_output = (total - fee) / max_outputs as u64;
        prop_assume!(per_output >= DUST_THRESHOLD_SATOSHI);

        let plan = plan_split(total, fee, max_outputs).unwrap();
        prop_assert_eq!(plan.count, max_outputs);
        prop_assert_eq!(plan.per_output_satoshi, per_output);
    }

    /// Every successful plan clears dust and never spends more than the balance.
    #[test]
    fn prop_split_plan_is_sound(
        total in 0u64..100_000_000_000,
        fee in 0u64..1_000_000,
        max_outputs in 1usize..200,
    ) {
        if let Ok(plan) = plan_split(total, fee, max_outputs) {
            prop_assert!(plan.count >= 1 && plan.count <= max_outputs);
            prop_assert!(plan.per_output_satoshi >= DUST_THRESHOLD_SATOSHI);
            prop_assert!(plan.per_output_satoshi * plan.count as u64 + fee <= total);
        }
    }

    /// The chosen count is the largest that clears dust.
    #[test]
    fn prop_split_count_is_maximal(
        total in 0u64..100_000_000_000,
        fee in 0u64..1_000_000,
        max_outputs in 1usize..1_000_000_000,
    ) {
        if let Ok(plan) = plan_split(total, fee, max_outputs) {
            if plan.count < max_outputs {
                let one_more = (total - fee) / (plan.count as u64 + 1);
                prop_assert!(one_more < DUST_THRESHOLD_SATOSHI);
            }
        }
    }

    /// A balance too small for even one output fails.
    #[test]
    fn prop_split_insufficient(
        fee in 0u64..1_000_000,
        shortfall in 1u64..DUST_THRESHOLD_SATOSHI,
        max_outputs in 1usize..50,
    ) {
        let total = fee + DUST_THRESHOLD_SATOSHI - shortfall;
        let result = plan_split(total, fee, max_outputs);
        let is_insufficient = matches!(result, Err(AnchorError::InsufficientFunds { .. }));
        prop_assert!(is_insufficient);
    }
}
