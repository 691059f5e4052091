//! Property-based test generators using proptest.
//!
//! Provides strategies for generating change records and store contents
//! that satisfy the ordering invariants the engine relies on.

use ledgerline_protocol::{ChangeRecord, ChangeType, MigrationType, ObjectType, RowMetadata};
use proptest::prelude::*;
use std::collections::BTreeMap;

/// Strategy for object types.
pub fn object_type_strategy() -> impl Strategy<Value = ObjectType> {
    prop::sample::select(ObjectType::ALL.to_vec())
}

/// Strategy for change types.
pub fn change_type_strategy() -> impl Strategy<Value = ChangeType> {
    prop_oneof![
        Just(ChangeType::Create),
        Just(ChangeType::Update),
        Just(ChangeType::Delete),
    ]
}

/// Strategy for migration types.
pub fn migration_type_strategy() -> impl Strategy<Value = MigrationType> {
    prop::sample::select(MigrationType::ALL.to_vec())
}

/// Strategy for unnumbered change records over a small id space, so that
/// generated sequences register the same object more than once.
pub fn change_record_strategy() -> impl Strategy<Value = ChangeRecord> {
    (
        0u8..8,
        prop::sample::select(vec![ObjectType::Entity, ObjectType::Table]),
        change_type_strategy(),
        prop::option::of(1u64..5),
    )
        .prop_map(|(id, object_type, change_type, user)| {
            let record = ChangeRecord::new(id.to_string(), object_type, change_type);
            match user {
                Some(user_id) => record.with_user(user_id),
                None => record,
            }
        })
}

/// Strategy for short etags.
pub fn etag_strategy() -> impl Strategy<Value = String> {
    prop::string::string_regex("[a-f0-9]{1,6}").expect("Invalid regex")
}

/// Strategy for table contents: ids below `max_id` mapped to etags.
pub fn store_contents_strategy(max_id: u64, max_rows: usize) -> impl Strategy<Value = BTreeMap<u64, String>> {
    prop::collection::btree_map(0..max_id, etag_strategy(), 0..max_rows)
}

/// Strategy for a source and a destination that share part of their rows.
///
/// Half of the destination is derived from the source, either kept as is or
/// with a changed etag, so diffs contain inserts, updates and deletes.
pub fn diverged_contents_strategy() -> impl Strategy<Value = (BTreeMap<u64, String>, BTreeMap<u64, String>)> {
    (
        store_contents_strategy(200, 60),
        store_contents_strategy(200, 30),
        prop::collection::vec(any::<bool>(), 60),
    )
        .prop_map(|(source, extra, flips)| {
            let mut destination = extra;
            for ((id, etag), flip) in source.iter().zip(flips) {
                if id % 2 == 0 {
                    let copied = if flip { format!("{etag}-old") } else { etag.clone() };
                    destination.insert(*id, copied);
                }
            }
            (source, destination)
        })
}

/// Strategy for ascending metadata lists.
pub fn sorted_metadata_strategy() -> impl Strategy<Value = Vec<RowMetadata>> {
    store_contents_strategy(500, 100).prop_map(|contents| {
        contents
            .into_iter()
            .map(|(id, etag)| RowMetadata::new(id, etag))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::test_runner::TestRunner;

    #[test]
    fn sorted_metadata_is_strictly_ascending() {
        let mut runner = TestRunner::default();
        runner
            .run(&sorted_metadata_strategy(), |rows| {
                prop_assert!(rows.windows(2).all(|w| w[0].id < w[1].id));
                Ok(())
            })
            .unwrap();
    }
}
