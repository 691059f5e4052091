//! Sorted-merge diff of two metadata streams.
//!
//! Both inputs are ascending by id. The diff walks them with one cursor
//! each, so it holds a single entry per side regardless of table size. An
//! id present only in the source is inserted, one present only in the
//! destination is deleted, and one present on both sides with different
//! etags is updated.

use crate::error::{MigrationError, MigrationResult};
use ledgerline_protocol::RowMetadata;
use std::cmp::Ordering;

/// A change the destination needs to match the source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DiffOp {
    /// The row exists only in the source.
    Insert(u64),
    /// The row exists on both sides with different etags.
    Update(u64),
    /// The row exists only in the destination.
    Delete(u64),
}

impl DiffOp {
    /// Returns the row id.
    pub fn id(&self) -> u64 {
        match *self {
            DiffOp::Insert(id) | DiffOp::Update(id) | DiffOp::Delete(id) => id,
        }
    }
}

/// One side of the merge, checking that ids strictly ascend.
struct SortedCursor<I> {
    inner: I,
    side: &'static str,
    head: Option<RowMetadata>,
    last: Option<u64>,
    done: bool,
}

impl<I> SortedCursor<I>
where
    I: Iterator<Item = MigrationResult<RowMetadata>>,
{
    fn new(inner: I, side: &'static str) -> Self {
        Self {
            inner,
            side,
            head: None,
            last: None,
            done: false,
        }
    }

    fn fill(&mut self) -> MigrationResult<()> {
        if self.head.is_some() || self.done {
            return Ok(());
        }
        match self.inner.next() {
            None => self.done = true,
            Some(Err(e)) => {
                self.done = true;
                return Err(e);
            }
            Some(Ok(meta)) => {
                if let Some(previous) = self.last {
                    if meta.id <= previous {
                        self.done = true;
                        return Err(MigrationError::OutOfOrder {
                            side: self.side,
                            previous,
                            next: meta.id,
                        });
                    }
                }
                self.last = Some(meta.id);
                self.head = Some(meta);
            }
        }
        Ok(())
    }
}

/// Lazy diff between a source and a destination stream.
///
/// Yields operations in ascending id order. The first error ends the
/// iteration.
pub struct MergeDiff<L, R> {
    source: SortedCursor<L>,
    destination: SortedCursor<R>,
    failed: bool,
}

impl<L, R> MergeDiff<L, R>
where
    L: Iterator<Item = MigrationResult<RowMetadata>>,
    R: Iterator<Item = MigrationResult<RowMetadata>>,
{
    /// Creates a diff of `source` against `destination`.
    pub fn new(source: L, destination: R) -> Self {
        Self {
            source: SortedCursor::new(source, "source"),
            destination: SortedCursor::new(destination, "destination"),
            failed: false,
        }
    }
}

impl<L, R> Iterator for MergeDiff<L, R>
where
    L: Iterator<Item = MigrationResult<RowMetadata>>,
    R: Iterator<Item = MigrationResult<RowMetadata>>,
{
    type Item = MigrationResult<DiffOp>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed {
            return None;
        }
        loop {
            if let Err(e) = self.source.fill().and_then(|()| self.destination.fill()) {
                self.failed = true;
                return Some(Err(e));
            }

            let (op, advance_source, advance_destination) =
                match (self.source.head.as_ref(), self.destination.head.as_ref()) {
                    (None, None) => return None,
                    (Some(s), None) => (Some(DiffOp::Insert(s.id)), true, false),
                    (None, Some(d)) => (Some(DiffOp::Delete(d.id)), false, true),
                    (Some(s), Some(d)) => match s.id.cmp(&d.id) {
                        Ordering::Less => (Some(DiffOp::Insert(s.id)), true, false),
                        Ordering::Greater => (Some(DiffOp::Delete(d.id)), false, true),
                        Ordering::Equal if s.etag == d.etag => (None, true, true),
                        Ordering::Equal => (Some(DiffOp::Update(s.id)), true, true),
                    },
                };

            if advance_source {
                self.source.head = None;
            }
            if advance_destination {
                self.destination.head = None;
            }
            if let Some(op) = op {
                return Some(Ok(op));
            }
        }
    }
}

/// Diffs two in-memory metadata lists.
pub fn diff_metadata(source: &[RowMetadata], destination: &[RowMetadata]) -> MigrationResult<Vec<DiffOp>> {
    MergeDiff::new(
        source.iter().cloned().map(Ok),
        destination.iter().cloned().map(Ok),
    )
    .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(pairs: &[(u64, &str)]) -> Vec<RowMetadata> {
        pairs.iter().map(|(id, etag)| RowMetadata::new(*id, *etag)).collect()
    }

    #[test]
    fn insert_update_delete() {
        let source = meta(&[(1, "e1"), (2, "e2")]);
        let destination = meta(&[(1, "e1old"), (3, "e3")]);

        let ops = diff_metadata(&source, &destination).unwrap();
        assert_eq!(
            ops,
            vec![DiffOp::Update(1), DiffOp::Insert(2), DiffOp::Delete(3)]
        );
    }

    #[test]
    fn identical_sides_yield_nothing() {
        let rows = meta(&[(1, "a"), (5, "b"), (9, "c")]);
        assert!(diff_metadata(&rows, &rows).unwrap().is_empty());
    }

    #[test]
    fn one_side_empty() {
        let rows = meta(&[(1, "a"), (2, "b")]);
        assert_eq!(
            diff_metadata(&rows, &[]).unwrap(),
            vec![DiffOp::Insert(1), DiffOp::Insert(2)]
        );
        assert_eq!(
            diff_metadata(&[], &rows).unwrap(),
            vec![DiffOp::Delete(1), DiffOp::Delete(2)]
        );
    }

    #[test]
    fn unordered_input_is_rejected() {
        let source = meta(&[(2, "a"), (1, "b")]);
        let err = diff_metadata(&source, &[]).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::OutOfOrder {
                side: "source",
                previous: 2,
                next: 1
            }
        ));

        let duplicated = meta(&[(1, "a"), (1, "a")]);
        assert!(diff_metadata(&[], &duplicated).is_err());
    }

    #[test]
    fn stream_errors_end_the_diff() {
        let source = vec![
            Ok(RowMetadata::new(1, "a")),
            Err(MigrationError::transient("gone")),
            Ok(RowMetadata::new(3, "c")),
        ];
        let mut diff = MergeDiff::new(source.into_iter(), std::iter::empty());
        assert_eq!(diff.next().unwrap().unwrap(), DiffOp::Insert(1));
        assert!(diff.next().unwrap().is_err());
        assert!(diff.next().is_none());
    }

    proptest::proptest! {
        #[test]
        fn ops_are_ascending_and_cover_the_symmetric_difference(
            source in proptest::collection::btree_map(0u64..100, "[ab]", 0..40),
            destination in proptest::collection::btree_map(0u64..100, "[ab]", 0..40),
        ) {
            let to_meta = |m: &std::collections::BTreeMap<u64, String>| -> Vec<RowMetadata> {
                m.iter().map(|(id, e)| RowMetadata::new(*id, e.clone())).collect()
            };
            let ops = diff_metadata(&to_meta(&source), &to_meta(&destination)).unwrap();

            proptest::prop_assert!(ops.windows(2).all(|w| w[0].id() < w[1].id()));
            for op in &ops {
                match *op {
                    DiffOp::Insert(id) => {
                        proptest::prop_assert!(source.contains_key(&id) && !destination.contains_key(&id));
                    }
                    DiffOp::Update(id) => {
                        proptest::prop_assert_ne!(&source[&id], &destination[&id]);
                    }
                    DiffOp::Delete(id) => {
                        proptest::prop_assert!(!source.contains_key(&id));
                    }
                }
            }
            let changed = source.iter().filter(|(id, e)| destination.get(id) != Some(e)).count()
                + destination.keys().filter(|id| !source.contains_key(id)).count();
            proptest::prop_assert_eq!(ops.len(), changed);
        }
    }
}
