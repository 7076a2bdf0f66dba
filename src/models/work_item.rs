//! Work item model.
//!
//! A work item is one image in the media library that may need descriptive
//! alt text. Items are owned by the datastore; this engine only ever writes
//! the annotation fields.

use serde::{Deserialize, Serialize};

/// One image eligible for annotation.
///
/// IDs are assigned monotonically by the datastore and serve as the cursor
/// boundary during batch traversal, so their ordering must remain stable for
/// the lifetime of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkItem {
    /// Datastore row ID, monotonically increasing.
    pub id: u64,
    /// Publicly fetchable URL, when the library exposes one.
    pub url: Option<String>,
    /// Raw image bytes, for libraries without fetchable URLs.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    /// Current alt text, empty or missing when not yet annotated.
    pub alt_text: Option<String>,
    /// Parent entity (post/product) this image is attached to.
    pub parent_id: Option<u64>,
    /// Title of the parent entity, used as a keyword fallback.
    pub parent_title: Option<String>,
    /// MIME type as recorded by the datastore.
    pub mime_type: String,
    /// Size in bytes, None when the backing storage cannot report it.
    pub file_size: Option<u64>,
    /// Pixel width, when known.
    pub width: Option<u32>,
    /// Pixel height, when known.
    pub height: Option<u32>,
    /// Language of the item's annotations (translation sites).
    pub language: Option<String>,
    /// Translation group shared by an item and its derivatives.
    pub link_group: Option<u64>,
    /// Categories of the parent entity.
    #[serde(default)]
    pub categories: Vec<String>,
    /// Keywords stored on the item itself (SEO metadata).
    #[serde(default)]
    pub keywords_meta: Vec<String>,
    /// Whether the item is attached to a parent entity.
    #[serde(default)]
    pub attached: bool,
}

impl WorkItem {
    /// Whether this item already carries non-empty alt text.
    pub fn has_alt_text(&self) -> bool {
        self.alt_text.as_deref().is_some_and(|t| !t.trim().is_empty())
    }

    /// File extension, lowercased, derived from the URL path or MIME type.
    pub fn extension(&self) -> Option<String> {
        if let Some(url) = &self.url {
            let path = url.split(['?', '#']).next().unwrap_or(url);
            if let Some((_, ext)) = path.rsplit_once('.') {
                if !ext.is_empty() && !ext.contains('/') {
                    return Some(ext.to_ascii_lowercase());
                }
            }
        }
        // Fall back to the MIME subtype
        self.mime_type
            .rsplit_once('/')
            .map(|(_, sub)| sub.trim_start_matches("x-").to_ascii_lowercase())
    }

    /// Vector formats are exempt from size and dimension policy.
    pub fn is_vector(&self) -> bool {
        self.mime_type == "image/svg+xml" || self.extension().as_deref() == Some("svg")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(url: Option<&str>, mime: &str) -> WorkItem {
        WorkItem {
            id: 1,
            url: url.map(String::from),
            payload: None,
            alt_text: None,
            parent_id: None,
            parent_title: None,
            mime_type: mime.to_string(),
            file_size: Some(1024),
            width: Some(640),
            height: Some(480),
            language: None,
            link_group: None,
            categories: Vec::new(),
            keywords_meta: Vec::new(),
            attached: false,
        }
    }

    #[test]
    fn extension_from_url_strips_query() {
        let it = item(Some("https://cdn.example/photo.JPG?w=300"), "image/jpeg");
        assert_eq!(it.extension().as_deref(), Some("jpg"));
    }

    #[test]
    fn extension_falls_back_to_mime() {
        let it = item(None, "image/png");
        assert_eq!(it.extension().as_deref(), Some("png"));
    }

    #[test]
    fn svg_is_vector() {
        let it = item(Some("https://cdn.example/logo.svg"), "image/svg+xml");
        assert!(it.is_vector());
        assert!(!item(None, "image/png").is_vector());
    }

    #[test]
    fn whitespace_alt_text_counts_as_missing() {
        let mut it = item(None, "image/png");
        it.alt_text = Some("   ".to_string());
        assert!(!it.has_alt_text());
        it.alt_text = Some("a red bicycle".to_string());
        assert!(it.has_alt_text());
    }
}
