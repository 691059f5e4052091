//! The dependency-ordered catalog of migration types.

use crate::error::{MigrationError, MigrationResult};
use ledgerline_protocol::MigrationType;
use std::collections::HashSet;

/// One catalog entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CatalogEntry {
    /// The type to migrate.
    pub migration_type: MigrationType,
    /// The primary type it depends on, `None` for primary types.
    pub primary: Option<MigrationType>,
}

impl CatalogEntry {
    /// Creates a primary entry.
    pub fn primary(migration_type: MigrationType) -> Self {
        Self {
            migration_type,
            primary: None,
        }
    }

    /// Creates a dependent entry.
    pub fn dependent(migration_type: MigrationType, primary: MigrationType) -> Self {
        Self {
            migration_type,
            primary: Some(primary),
        }
    }

    /// Returns true if the entry does not depend on another type.
    pub fn is_primary(&self) -> bool {
        self.primary.is_none()
    }
}

/// An ordered list of types where every dependent follows its primary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MigrationCatalog {
    entries: Vec<CatalogEntry>,
}

impl MigrationCatalog {
    /// Creates a catalog, validating its ordering.
    ///
    /// Every type may appear once. Every dependent must name a primary that
    /// is itself primary and appears earlier in the list.
    pub fn new(entries: Vec<CatalogEntry>) -> MigrationResult<Self> {
        let mut seen: HashSet<MigrationType> = HashSet::new();
        let mut primaries: HashSet<MigrationType> = HashSet::new();

        for entry in &entries {
            if !seen.insert(entry.migration_type) {
                return Err(MigrationError::invalid_catalog(format!(
                    "{} appears more than once",
                    entry.migration_type
                )));
            }
            match entry.primary {
                None => {
                    primaries.insert(entry.migration_type);
                }
                Some(primary) if !seen.contains(&primary) => {
                    return Err(MigrationError::invalid_catalog(format!(
                        "{} must follow its primary {}",
                        entry.migration_type, primary
                    )));
                }
                Some(primary) if !primaries.contains(&primary) => {
                    return Err(MigrationError::invalid_catalog(format!(
                        "{} depends on {}, which is not a primary type",
                        entry.migration_type, primary
                    )));
                }
                Some(_) => {}
            }
        }

        Ok(Self { entries })
    }

    /// Returns the entries in migration order.
    pub fn entries(&self) -> &[CatalogEntry] {
        &self.entries
    }

    /// Returns the types in migration order.
    pub fn types(&self) -> Vec<MigrationType> {
        self.entries.iter().map(|e| e.migration_type).collect()
    }

    /// Returns the primary of a type, if it has one.
    pub fn primary_of(&self, migration_type: MigrationType) -> Option<MigrationType> {
        self.entries
            .iter()
            .find(|e| e.migration_type == migration_type)
            .and_then(|e| e.primary)
    }

    /// Returns the types that depend on `primary`.
    pub fn dependents_of(&self, primary: MigrationType) -> Vec<MigrationType> {
        self.entries
            .iter()
            .filter(|e| e.primary == Some(primary))
            .map(|e| e.migration_type)
            .collect()
    }

    /// Returns true if the catalog lists the type.
    pub fn contains(&self, migration_type: MigrationType) -> bool {
        self.entries.iter().any(|e| e.migration_type == migration_type)
    }

    /// Returns the number of types.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if the catalog is empty.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Returns a catalog holding only the given types, in this catalog's
    /// order.
    ///
    /// A dependent whose primary is left out is treated as primary: its
    /// primary is assumed to have been migrated by an earlier run.
    pub fn restricted_to(&self, types: &[MigrationType]) -> MigrationResult<Self> {
        if let Some(unknown) = types.iter().find(|t| !self.contains(**t)) {
            return Err(MigrationError::invalid_catalog(format!(
                "{unknown} is not in the catalog"
            )));
        }
        let wanted: HashSet<_> = types.iter().copied().collect();
        let entries = self
            .entries
            .iter()
            .filter(|e| wanted.contains(&e.migration_type))
            .map(|e| CatalogEntry {
                migration_type: e.migration_type,
                primary: e.primary.filter(|p| wanted.contains(p)),
            })
            .collect();
        Self::new(entries)
    }
}

impl Default for MigrationCatalog {
    /// The catalog of every [`MigrationType`] in declaration order.
    fn default() -> Self {
        Self {
            entries: MigrationType::ALL
                .iter()
                .map(|t| CatalogEntry {
                    migration_type: *t,
                    primary: t.default_primary(),
                })
                .collect(),
        }
    }
}
