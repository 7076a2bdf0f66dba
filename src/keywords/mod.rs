//! Keyword sources for annotation requests.
//!
//! Multiple keyword providers are probed in a fixed order until one yields a
//! non-empty result, so SEO integrations can plug in without the engine
//! hard-coding each one.

use crate::models::{WorkItem, MAX_KEYWORDS};

/// One source of keywords for an item.
pub trait KeywordProvider: Send + Sync {
    fn name(&self) -> &'static str;

    /// Keywords for this item, empty when the provider has nothing.
    fn keywords_for(&self, item: &WorkItem) -> Vec<String>;
}

/// Keywords stored on the item itself (SEO plugin metadata).
pub struct ItemMetaProvider;

impl KeywordProvider for ItemMetaProvider {
    fn name(&self) -> &'static str {
        "item_meta"
    }

    fn keywords_for(&self, item: &WorkItem) -> Vec<String> {
        item.keywords_meta.clone()
    }
}

/// Title of the parent entity, split into words.
pub struct ParentTitleProvider;

impl KeywordProvider for ParentTitleProvider {
    fn name(&self) -> &'static str {
        "parent_title"
    }

    fn keywords_for(&self, item: &WorkItem) -> Vec<String> {
        item.parent_title
            .as_deref()
            .map(|title| {
                title
                    .split_whitespace()
                    .filter(|w| w.len() > 2)
                    .map(|w| w.to_lowercase())
                    .collect()
            })
            .unwrap_or_default()
    }
}

/// Fixed operator-configured keyword list, always non-empty when configured.
pub struct FixedListProvider {
    keywords: Vec<String>,
}

impl FixedListProvider {
    pub fn new(keywords: Vec<String>) -> Self {
        Self { keywords }
    }
}

impl KeywordProvider for FixedListProvider {
    fn name(&self) -> &'static str {
        "fixed_list"
    }

    fn keywords_for(&self, _item: &WorkItem) -> Vec<String> {
        self.keywords.clone()
    }
}

/// Ordered provider chain; first non-empty result wins.
pub struct KeywordChain {
    providers: Vec<Box<dyn KeywordProvider>>,
}

impl KeywordChain {
    pub fn new(providers: Vec<Box<dyn KeywordProvider>>) -> Self {
        Self { providers }
    }

    /// Default chain: item metadata, then parent title.
    pub fn standard(fixed: Vec<String>) -> Self {
        let mut providers: Vec<Box<dyn KeywordProvider>> =
            vec![Box::new(ItemMetaProvider), Box::new(ParentTitleProvider)];
        if !fixed.is_empty() {
            providers.push(Box::new(FixedListProvider::new(fixed)));
        }
        Self::new(providers)
    }

    /// Resolve keywords for an item, bounded to the request limit.
    pub fn resolve(&self, item: &WorkItem) -> Vec<String> {
        for provider in &self.providers {
            let mut keywords = provider.keywords_for(item);
            keywords.retain(|k| !k.trim().is_empty());
            if !keywords.is_empty() {
                keywords.truncate(MAX_KEYWORDS);
                return keywords;
            }
        }
        Vec::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(meta: Vec<&str>, parent_title: Option<&str>) -> WorkItem {
        WorkItem {
            id: 1,
            url: None,
            payload: None,
            alt_text: None,
            parent_id: None,
            parent_title: parent_title.map(String::from),
            mime_type: "image/png".to_string(),
            file_size: Some(1000),
            width: None,
            height: None,
            language: None,
            link_group: None,
            categories: Vec::new(),
            keywords_meta: meta.into_iter().map(String::from).collect(),
            attached: false,
        }
    }

    #[test]
    fn first_non_empty_provider_wins() {
        let chain = KeywordChain::standard(vec!["brand".into()]);
        let it = item(vec!["bike", "red"], Some("Mountain Gear"));
        assert_eq!(chain.resolve(&it), vec!["bike", "red"]);
    }

    #[test]
    fn falls_through_to_parent_title() {
        let chain = KeywordChain::standard(Vec::new());
        let it = item(vec![], Some("The Mountain Gear Shop"));
        assert_eq!(chain.resolve(&it), vec!["the", "mountain", "gear", "shop"]);
    }

    #[test]
    fn fixed_list_is_the_last_resort() {
        let chain = KeywordChain::standard(vec!["brand".into()]);
        let it = item(vec![], None);
        assert_eq!(chain.resolve(&it), vec!["brand"]);
    }

    #[test]
    fn empty_chain_yields_nothing() {
        let chain = KeywordChain::standard(Vec::new());
        let it = item(vec![], None);
        assert!(chain.resolve(&it).is_empty());
    }

    #[test]
    fn result_is_bounded() {
        let many: Vec<&str> = vec!["a1", "b2", "c3", "d4", "e5", "f6", "g7", "h8"];
        let chain = KeywordChain::standard(Vec::new());
        let it = item(many, None);
        assert_eq!(chain.resolve(&it).len(), MAX_KEYWORDS);
    }
}
