//! The in-memory set of applied versions, loaded from the bookkeeping table.

use std::collections::BTreeSet;

use crate::adapter::Adapter;
use crate::db::DbPool;
use crate::error::{MigrateError, Result};

/// Applied version tokens. Membership is the only query the engine needs;
/// the ordered set keeps listings stable.
#[derive(Debug, Default, Clone)]
pub struct VersionSet {
    applied: BTreeSet<String>,
}

impl VersionSet {
    pub fn insert(&mut self, version: impl Into<String>) {
        self.applied.insert(version.into());
    }

    pub fn contains(&self, version: &str) -> bool {
        self.applied.contains(version)
    }

    pub fn len(&self) -> usize {
        self.applied.len()
    }

    pub fn is_empty(&self) -> bool {
        self.applied.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.applied.iter().map(String::as_str)
    }

    /// Load the applied versions once per engine invocation.
    ///
    /// The bookkeeping table is created best-effort first; if the table is
    /// missing the subsequent select fails anyway, and the select error is
    /// surfaced with the creation error as context. Tokens are
    /// whitespace-trimmed (fixed-width char columns pad them).
    pub async fn load(
        pool: &dyn DbPool,
        adapter: &Adapter,
        schema: Option<&str>,
    ) -> Result<Self> {
        let create_err = pool
            .exec_batch(&(adapter.create_versions_table)(schema))
            .await
            .err();
        let rows = match pool
            .query_strings(&(adapter.select_existing_versions)(schema))
            .await
        {
            Ok(rows) => rows,
            Err(e) => {
                return Err(MigrateError::VersionsQuery {
                    message: e.to_string(),
                    create_context: create_err.map(|c| c.to_string()),
                })
            }
        };

        let mut set = Self::default();
        for row in rows {
            set.insert(row.trim());
        }
        Ok(set)
    }
}

impl<S: Into<String>> FromIterator<S> for VersionSet {
    fn from_iter<I: IntoIterator<Item = S>>(iter: I) -> Self {
        Self {
            applied: iter.into_iter().map(Into::into).collect(),
        }
    }
}
