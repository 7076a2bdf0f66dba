//! Datastore access behind a repository trait.
//!
//! The host CMS owns the media records; this engine only queries slices,
//! writes annotation fields, and keeps idempotency bookkeeping. The trait
//! keeps the coordinator testable against an in-memory implementation.

mod memory;
mod sqlite;

pub use memory::InMemoryMediaRepository;
pub use sqlite::SqliteMediaRepository;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::models::{BatchFilter, Scope, WorkItem};

/// Errors from datastore operations.
#[derive(Debug, Error)]
pub enum RepositoryError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("repository lock poisoned")]
    Poisoned,

    #[error("item not found: {0}")]
    NotFound(u64),
}

/// Query shape for cursor-bounded slices, derived from the run filter.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SliceQuery {
    /// Only items with empty alt text.
    pub missing_only: bool,
    /// Only items attached to a parent entity.
    pub attached_only: bool,
    /// Only items without an asset mapping (never charged).
    pub unprocessed_only: bool,
    /// Only items whose parent is in this category.
    pub category: Option<String>,
}

impl SliceQuery {
    /// Derive the datastore query from a library-scope filter.
    pub fn from_filter(filter: &BatchFilter) -> Self {
        let missing_only = matches!(filter.mode, crate::models::GenerationMode::MissingOnly);
        match &filter.scope {
            Scope::Library {
                attached_only,
                unprocessed_only,
                category,
            } => Self {
                missing_only,
                attached_only: *attached_only,
                unprocessed_only: *unprocessed_only,
                category: category.clone(),
            },
            Scope::Selection { .. } => Self {
                missing_only,
                ..Self::default()
            },
        }
    }

    /// Whether a materialized item matches this query.
    pub fn matches(&self, item: &WorkItem, has_asset: bool) -> bool {
        if self.missing_only && item.has_alt_text() {
            return false;
        }
        if self.attached_only && !item.attached {
            return false;
        }
        if self.unprocessed_only && has_asset {
            return false;
        }
        if let Some(category) = &self.category {
            if !item
                .categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(category))
            {
                return false;
            }
        }
        true
    }
}

/// Which derived display fields receive the generated text.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FieldPropagation {
    pub title: bool,
    pub caption: bool,
    pub description: bool,
}

/// Derived display fields of an item.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplayFields {
    pub title: Option<String>,
    pub caption: Option<String>,
    pub description: Option<String>,
}

/// Read/write access to the media datastore.
#[async_trait]
pub trait MediaRepository: Send + Sync {
    /// Up to `limit` items with `id > cursor`, ascending, matching the query.
    async fn next_slice(
        &self,
        cursor: u64,
        query: &SliceQuery,
        limit: u32,
    ) -> Result<Vec<WorkItem>, RepositoryError>;

    async fn get(&self, id: u64) -> Result<Option<WorkItem>, RepositoryError>;

    /// Linked translation derivatives of an item (same link group, other IDs).
    async fn derivatives_of(&self, item: &WorkItem) -> Result<Vec<WorkItem>, RepositoryError>;

    /// Write generated alt text, optionally propagating into display fields.
    async fn update_alt_text(
        &self,
        id: u64,
        alt_text: &str,
        propagate: &FieldPropagation,
    ) -> Result<(), RepositoryError>;

    /// Persist the external asset ID for an item (idempotency bookkeeping).
    async fn record_asset_mapping(&self, id: u64, asset_id: &str) -> Result<(), RepositoryError>;

    async fn has_asset_mapping(&self, id: u64) -> Result<bool, RepositoryError>;

    async fn display_fields(&self, id: u64) -> Result<Option<DisplayFields>, RepositoryError>;

    /// Create or replace an explicit-selection working set.
    async fn selection_create(&self, token: &str, ids: &[u64]) -> Result<(), RepositoryError>;

    /// Peek up to `limit` IDs from a selection set, ascending, without
    /// removing them.
    async fn selection_peek(&self, token: &str, limit: u32) -> Result<Vec<u64>, RepositoryError>;

    /// Remove processed IDs from a selection set.
    async fn selection_remove(&self, token: &str, ids: &[u64]) -> Result<(), RepositoryError>;

    async fn selection_len(&self, token: &str) -> Result<u64, RepositoryError>;

    async fn count_matching(&self, query: &SliceQuery) -> Result<u64, RepositoryError>;

    /// Insert or replace an item (library import and tests).
    async fn upsert_item(&self, item: &WorkItem) -> Result<(), RepositoryError>;
}
