//! Property-based tests for override nesting.
//!
//! Any set of overrides released in any order leaves every attribute at its
//! original value, and at each intermediate step the visible value belongs to
//! the innermost override that has not been released.

use std::sync::Arc;

use proptest::prelude::*;

use super::registry::{OverrideGuard, PatchRegistry};
use super::target::AttributeTable;

const ATTRS: [&str; 2] = ["open_file_names", "question"];

// ──────────────────── strategies ────────────────────

/// Attribute choice per override plus a release permutation.
fn arb_plan() -> impl Strategy<Value = (Vec<usize>, Vec<usize>)> {
    (1usize..12).prop_flat_map(|n| {
        (
            prop::collection::vec(0..ATTRS.len(), n),
            Just((0..n).collect::<Vec<_>>()).prop_shuffle(),
        )
    })
}

// ──────────────────── model ────────────────────

/// Expected visible value: the newest still-live override for the
/// attribute, or the original once every live one is gone.
///
/// An override released early stays in effect only while shadowed, so the
/// visible value is the replacement of the newest unreleased record.
fn expected(attr: usize, attrs: &[usize], released: &[bool]) -> String {
    attrs
        .iter()
        .enumerate()
        .rev()
        .find(|&(i, &a)| a == attr && !released[i])
        .map_or_else(|| format!("original-{attr}"), |(i, _)| format!("override-{i}"))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Releasing overrides in any order unwinds to the originals.
    #[test]
    fn any_release_order_round_trips((attrs, order) in arb_plan()) {
        let table = Arc::new(AttributeTable::new("dialogs"));
        for (idx, name) in ATTRS.iter().enumerate() {
            table.insert(*name, format!("original-{idx}"));
        }
        let registry = PatchRegistry::new();

        let mut guards: Vec<Option<OverrideGuard>> = attrs
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                Some(registry.with_override(&table, ATTRS[a], format!("override-{i}")).unwrap())
            })
            .collect();
        let mut released = vec![false; attrs.len()];

        for idx in order {
            let guard = guards[idx].take().unwrap();
            guard.restore().unwrap();
            released[idx] = true;

            for (a, name) in ATTRS.iter().enumerate() {
                let visible = table.get::<String>(name).unwrap();
                prop_assert_eq!(visible, expected(a, &attrs, &released));
            }
        }

        prop_assert!(registry.is_empty());
        for (idx, name) in ATTRS.iter().enumerate() {
            prop_assert_eq!(table.get::<String>(name).unwrap(), format!("original-{idx}"));
        }
    }

    /// `restore_all` from any partially released state unwinds to the originals.
    #[test]
    fn restore_all_from_any_state((attrs, order) in arb_plan(), keep in 0usize..12) {
        let table = Arc::new(AttributeTable::new("dialogs"));
        for (idx, name) in ATTRS.iter().enumerate() {
            table.insert(*name, format!("original-{idx}"));
        }
        let registry = PatchRegistry::new();

        let mut guards: Vec<Option<OverrideGuard>> = attrs
            .iter()
            .enumerate()
            .map(|(i, &a)| {
                Some(registry.with_override(&table, ATTRS[a], format!("override-{i}")).unwrap())
            })
            .collect();

        for idx in order.into_iter().take(keep) {
            drop(guards[idx].take());
        }

        prop_assert!(registry.restore_all().is_empty());
        for (idx, name) in ATTRS.iter().enumerate() {
            prop_assert_eq!(table.get::<String>(name).unwrap(), format!("original-{idx}"));
        }
        drop(guards);
        prop_assert!(registry.is_empty());
    }
}
