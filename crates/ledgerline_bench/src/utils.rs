//! Benchmark utilities.

use ledgerline_migration::MemoryRowStore;
use ledgerline_protocol::{MigrationType, Row, RowMetadata};
use rand::Rng;

/// Generate a random hex etag.
pub fn random_etag() -> String {
    let mut rng = rand::thread_rng();
    format!("{:016x}", rng.gen::<u64>())
}

/// Generate ascending fingerprints for ids `0..count`.
pub fn generate_metadata(count: u64) -> Vec<RowMetadata> {
    (0..count).map(|id| RowMetadata::new(id, random_etag())).collect()
}

/// Copy `rows` and change roughly `percent` of them.
///
/// Changed rows get a new etag, or are dropped when their id is odd.
pub fn diverge(rows: &[RowMetadata], percent: u32) -> Vec<RowMetadata> {
    let mut rng = rand::thread_rng();
    rows.iter()
        .filter_map(|row| {
            if rng.gen_range(0..100) >= percent {
                Some(row.clone())
            } else if row.id % 2 == 0 {
                Some(RowMetadata::new(row.id, random_etag()))
            } else {
                None
            }
        })
        .collect()
}

/// Build a store holding the given fingerprints for one type.
pub fn store_with(name: &str, migration_type: MigrationType, rows: &[RowMetadata]) -> MemoryRowStore {
    let store = MemoryRowStore::new(name);
    for row in rows {
        store.put(
            migration_type,
            Row::new(row.id, row.etag.clone(), row.etag.as_bytes().to_vec()),
        );
    }
    store
}
