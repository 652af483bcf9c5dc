use proptest::prelude::*;
use splice_engine::PendingChangeSet;
use splice_unit::UnitName;

/// `host/<Top>` optionally followed by up to three `$Nested` segments
fn unit_strategy() -> impl Strategy<Value = UnitName> {
    (
        prop::sample::select(vec!["Server", "Session", "Serve"]),
        proptest::collection::vec(prop::sample::select(vec!["1", "Worker", "Inner"]), 0..4),
    )
        .prop_map(|(top, nested)| {
            let mut name = format!("host/{top}");
            for segment in nested {
                name.push('$');
                name.push_str(segment);
            }
            name.parse().unwrap()
        })
}

proptest! {
    #[test]
    fn prop_exclusion_matches_identity_or_ancestor(
        excluded in proptest::collection::vec(unit_strategy(), 0..6),
        probe in unit_strategy(),
    ) {
        let mut set = PendingChangeSet::new();
        for unit in &excluded {
            set.exclude(unit.clone());
        }

        let expected = excluded
            .iter()
            .any(|e| *e == probe || e.is_ancestor_of(&probe));
        prop_assert_eq!(set.is_excluded(&probe), expected);
    }

    #[test]
    fn prop_exclusion_never_leaks_to_siblings(unit in unit_strategy()) {
        let mut set = PendingChangeSet::new();
        set.exclude(unit.clone());

        let sibling: UnitName = format!("{}X", unit.outermost()).parse().unwrap();
        prop_assert!(!set.is_excluded(&sibling));
        if let Some(parent) = unit.parent() {
            prop_assert!(!set.is_excluded(&parent));
        }
    }
}
