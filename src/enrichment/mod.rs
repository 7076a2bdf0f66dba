//! Downstream enrichment: completion hooks and page-builder cache sync.
//!
//! Hooks can veto an item before submission and fire after it is
//! successfully annotated, so side-effect integrations (cache sync,
//! e-commerce feeds) stay out of the coordinator.

mod widgets;

pub use widgets::{sync_widget_alt_text, WidgetNode, MAX_WIDGET_DEPTH};

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tracing::debug;

use crate::models::WorkItem;

/// Listener invoked around item processing.
pub trait CompletionHook: Send + Sync {
    fn name(&self) -> &'static str;

    /// Inspect an item before it is submitted. Returning a cause rules the
    /// item out ahead of the eligibility policy.
    fn veto(&self, _item: &WorkItem) -> Option<String> {
        None
    }

    fn on_annotated(&self, item: &WorkItem, alt_text: &str);
}

/// Hook pushing fresh alt text into cached page-builder documents.
///
/// Documents are keyed by the parent entity id; only the parents of
/// annotated items are touched.
pub struct WidgetSyncHook {
    documents: Arc<Mutex<HashMap<u64, WidgetNode>>>,
}

impl WidgetSyncHook {
    pub fn new(documents: Arc<Mutex<HashMap<u64, WidgetNode>>>) -> Self {
        Self { documents }
    }
}

impl CompletionHook for WidgetSyncHook {
    fn name(&self) -> &'static str {
        "widget-sync"
    }

    fn on_annotated(&self, item: &WorkItem, alt_text: &str) {
        let Some(parent_id) = item.parent_id else {
            return;
        };
        let Ok(mut documents) = self.documents.lock() else {
            return;
        };
        if let Some(doc) = documents.get_mut(&parent_id) {
            let updated = sync_widget_alt_text(doc, item.id, alt_text);
            if updated > 0 {
                debug!(item_id = item.id, parent_id, updated, "widget cache synced");
            }
        }
    }
}

/// Default hook: structured log line per completion.
pub struct LoggingHook;

impl CompletionHook for LoggingHook {
    fn name(&self) -> &'static str {
        "logging"
    }

    fn on_annotated(&self, item: &WorkItem, alt_text: &str) {
        debug!(
            item_id = item.id,
            chars = alt_text.len(),
            "annotation completed"
        );
    }
}
