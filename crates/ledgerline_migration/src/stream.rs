//! Lazy paged metadata iteration.

use crate::error::{MigrationError, MigrationResult};
use crate::retry::Retrier;
use crate::store::RowStore;
use ledgerline_protocol::{MigrationType, RowMetadata};
use std::collections::VecDeque;

/// Iterates the metadata of one type in one store, a page at a time.
///
/// Filtered placeholders are skipped. Only one page is held in memory. A
/// failed page fetch is yielded once as an error and ends the stream.
pub struct MetadataStream<'a, S: RowStore + ?Sized> {
    store: &'a S,
    migration_type: MigrationType,
    page_size: usize,
    retrier: &'a Retrier,
    cursor: Option<u64>,
    buffer: VecDeque<RowMetadata>,
    exhausted: bool,
    pages: u64,
}

impl<'a, S: RowStore + ?Sized> MetadataStream<'a, S> {
    pub(crate) fn new(
        store: &'a S,
        migration_type: MigrationType,
        page_size: usize,
        retrier: &'a Retrier,
    ) -> Self {
        Self {
            store,
            migration_type,
            page_size: page_size.max(1),
            retrier,
            cursor: None,
            buffer: VecDeque::new(),
            exhausted: false,
            pages: 0,
        }
    }

    /// Returns the number of pages fetched so far.
    pub fn pages_fetched(&self) -> u64 {
        self.pages
    }

    fn fetch_page(&mut self) -> MigrationResult<()> {
        let page = self.retrier.run("list_metadata", || {
            self.store
                .list_metadata(self.migration_type, self.cursor, self.page_size)
        })?;
        self.pages += 1;
        self.buffer.extend(page.rows.into_iter().flatten());

        match page.next {
            Some(next) if self.cursor.is_some_and(|c| next <= c) => {
                return Err(MigrationError::store(format!(
                    "{} did not advance its {} cursor past {next}",
                    self.store.name(),
                    self.migration_type
                )));
            }
            Some(next) => self.cursor = Some(next),
            None => self.exhausted = true,
        }
        Ok(())
    }
}

impl<S: RowStore + ?Sized> Iterator for MetadataStream<'_, S> {
    type Item = MigrationResult<RowMetadata>;

    fn next(&mut self) -> Option<Self::Item> {
        loop {
            if let Some(meta) = self.buffer.pop_front() {
                return Some(Ok(meta));
            }
            if self.exhausted {
                return None;
            }
            if let Err(e) = self.fetch_page() {
                self.exhausted = true;
                self.buffer.clear();
                return Some(Err(e));
            }
        }
    }
}
