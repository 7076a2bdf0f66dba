//! In-memory media repository for tests and dry runs.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::ops::Bound;
use std::sync::RwLock;

use async_trait::async_trait;

use crate::models::WorkItem;

use super::{DisplayFields, FieldPropagation, MediaRepository, RepositoryError, SliceQuery};

/// Media repository held entirely in memory. Mirrors the SQLite
/// implementation's semantics so coordinator tests run without a database.
#[derive(Default)]
pub struct InMemoryMediaRepository {
    items: RwLock<BTreeMap<u64, WorkItem>>,
    assets: RwLock<HashMap<u64, String>>,
    display: RwLock<HashMap<u64, DisplayFields>>,
    selections: RwLock<HashMap<String, BTreeSet<u64>>>,
}

impl InMemoryMediaRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Convenience constructor preloading items.
    pub fn with_items(items: impl IntoIterator<Item = WorkItem>) -> Self {
        let repo = Self::new();
        {
            let mut map = repo.items.write().expect("lock poisoned");
            for item in items {
                map.insert(item.id, item);
            }
        }
        repo
    }
}

#[async_trait]
impl MediaRepository for InMemoryMediaRepository {
    async fn next_slice(
        &self,
        cursor: u64,
        query: &SliceQuery,
        limit: u32,
    ) -> Result<Vec<WorkItem>, RepositoryError> {
        let items = self.items.read().map_err(|_| RepositoryError::Poisoned)?;
        let assets = self.assets.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(items
            .range((Bound::Excluded(cursor), Bound::Unbounded))
            .map(|(_, item)| item)
            .filter(|item| query.matches(item, assets.contains_key(&item.id)))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn get(&self, id: u64) -> Result<Option<WorkItem>, RepositoryError> {
        let items = self.items.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(items.get(&id).cloned())
    }

    async fn derivatives_of(&self, item: &WorkItem) -> Result<Vec<WorkItem>, RepositoryError> {
        let Some(group) = item.link_group else {
            return Ok(Vec::new());
        };
        let items = self.items.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(items
            .values()
            .filter(|other| other.link_group == Some(group) && other.id != item.id)
            .cloned()
            .collect())
    }

    async fn update_alt_text(
        &self,
        id: u64,
        alt_text: &str,
        propagate: &FieldPropagation,
    ) -> Result<(), RepositoryError> {
        let mut items = self.items.write().map_err(|_| RepositoryError::Poisoned)?;
        let item = items.get_mut(&id).ok_or(RepositoryError::NotFound(id))?;
        item.alt_text = Some(alt_text.to_string());

        let mut display = self.display.write().map_err(|_| RepositoryError::Poisoned)?;
        let fields = display.entry(id).or_default();
        if propagate.title {
            fields.title = Some(alt_text.to_string());
        }
        if propagate.caption {
            fields.caption = Some(alt_text.to_string());
        }
        if propagate.description {
            fields.description = Some(alt_text.to_string());
        }
        Ok(())
    }

    async fn record_asset_mapping(&self, id: u64, asset_id: &str) -> Result<(), RepositoryError> {
        let mut assets = self.assets.write().map_err(|_| RepositoryError::Poisoned)?;
        assets.insert(id, asset_id.to_string());
        Ok(())
    }

    async fn has_asset_mapping(&self, id: u64) -> Result<bool, RepositoryError> {
        let assets = self.assets.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(assets.contains_key(&id))
    }

    async fn display_fields(&self, id: u64) -> Result<Option<DisplayFields>, RepositoryError> {
        let display = self.display.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(display.get(&id).cloned())
    }

    async fn selection_create(&self, token: &str, ids: &[u64]) -> Result<(), RepositoryError> {
        let mut selections = self
            .selections
            .write()
            .map_err(|_| RepositoryError::Poisoned)?;
        selections.insert(token.to_string(), ids.iter().copied().collect());
        Ok(())
    }

    async fn selection_peek(&self, token: &str, limit: u32) -> Result<Vec<u64>, RepositoryError> {
        let selections = self
            .selections
            .read()
            .map_err(|_| RepositoryError::Poisoned)?;
        Ok(selections
            .get(token)
            .map(|set| set.iter().copied().take(limit as usize).collect())
            .unwrap_or_default())
    }

    async fn selection_remove(&self, token: &str, ids: &[u64]) -> Result<(), RepositoryError> {
        let mut selections = self
            .selections
            .write()
            .map_err(|_| RepositoryError::Poisoned)?;
        if let Some(set) = selections.get_mut(token) {
            for id in ids {
                set.remove(id);
            }
        }
        Ok(())
    }

    async fn selection_len(&self, token: &str) -> Result<u64, RepositoryError> {
        let selections = self
            .selections
            .read()
            .map_err(|_| RepositoryError::Poisoned)?;
        Ok(selections.get(token).map(|s| s.len() as u64).unwrap_or(0))
    }

    async fn count_matching(&self, query: &SliceQuery) -> Result<u64, RepositoryError> {
        let items = self.items.read().map_err(|_| RepositoryError::Poisoned)?;
        let assets = self.assets.read().map_err(|_| RepositoryError::Poisoned)?;
        Ok(items
            .values()
            .filter(|item| query.matches(item, assets.contains_key(&item.id)))
            .count() as u64)
    }

    async fn upsert_item(&self, item: &WorkItem) -> Result<(), RepositoryError> {
        let mut items = self.items.write().map_err(|_| RepositoryError::Poisoned)?;
        items.insert(item.id, item.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(id: u64, alt: Option<&str>) -> WorkItem {
        WorkItem {
            id,
            url: Some(format!("https://cdn.example/{}.jpg", id)),
            payload: None,
            alt_text: alt.map(String::from),
            parent_id: None,
            parent_title: None,
            mime_type: "image/jpeg".to_string(),
            file_size: Some(1000),
            width: Some(640),
            height: Some(480),
            language: None,
            link_group: None,
            categories: Vec::new(),
            keywords_meta: Vec::new(),
            attached: false,
        }
    }

    #[tokio::test]
    async fn never_returns_items_at_or_below_cursor() {
        let repo = InMemoryMediaRepository::with_items((1..=20).map(|id| item(id, None)));
        for cursor in [0u64, 5, 19, 20, 100] {
            let slice = repo
                .next_slice(cursor, &SliceQuery::default(), 5)
                .await
                .unwrap();
            assert!(slice.iter().all(|i| i.id > cursor), "cursor {}", cursor);
        }
    }

    #[tokio::test]
    async fn matches_parity_with_query_flags() {
        let mut annotated = item(2, Some("done"));
        annotated.attached = true;
        let repo = InMemoryMediaRepository::with_items([item(1, None), annotated]);

        let missing = SliceQuery {
            missing_only: true,
            ..SliceQuery::default()
        };
        let ids: Vec<u64> = repo
            .next_slice(0, &missing, 10)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![1]);

        let attached = SliceQuery {
            attached_only: true,
            ..SliceQuery::default()
        };
        let ids: Vec<u64> = repo
            .next_slice(0, &attached, 10)
            .await
            .unwrap()
            .iter()
            .map(|i| i.id)
            .collect();
        assert_eq!(ids, vec![2]);
    }
}
