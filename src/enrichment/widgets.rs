//! Page-builder widget tree synchronization.
//!
//! Page builders cache widget settings separately from the media library, so
//! a freshly generated alt text must be pushed into any cached image widgets
//! referencing the item. The nested structure is modeled as a tagged-variant
//! tree walked by a depth-bounded visitor keyed on node kind.

use serde::{Deserialize, Serialize};

/// Recursion bound for pathological or cyclic widget payloads.
pub const MAX_WIDGET_DEPTH: usize = 32;

/// One node of a page-builder widget tree.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WidgetNode {
    /// An image widget, possibly referencing a media item.
    Image {
        #[serde(default)]
        item_id: Option<u64>,
        #[serde(default)]
        alt: Option<String>,
    },
    /// A container with nested children (sections, columns).
    Container {
        #[serde(default)]
        children: Vec<WidgetNode>,
    },
    /// A text widget; carries no image references.
    Text {
        #[serde(default)]
        content: String,
    },
    /// Anything this engine does not understand; left untouched.
    #[serde(other)]
    Unknown,
}

/// Push `alt_text` into every image widget referencing `item_id`.
///
/// Returns the number of widgets updated. Traversal stops descending at
/// `MAX_WIDGET_DEPTH`; nodes below the bound are left unmodified.
pub fn sync_widget_alt_text(node: &mut WidgetNode, item_id: u64, alt_text: &str) -> usize {
    sync_at_depth(node, item_id, alt_text, 0)
}

fn sync_at_depth(node: &mut WidgetNode, item_id: u64, alt_text: &str, depth: usize) -> usize {
    if depth > MAX_WIDGET_DEPTH {
        return 0;
    }
    match node {
        WidgetNode::Image { item_id: Some(id), alt } if *id == item_id => {
            *alt = Some(alt_text.to_string());
            1
        }
        WidgetNode::Image { .. } | WidgetNode::Text { .. } | WidgetNode::Unknown => 0,
        WidgetNode::Container { children } => children
            .iter_mut()
            .map(|child| sync_at_depth(child, item_id, alt_text, depth + 1))
            .sum(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(item_id: u64) -> WidgetNode {
        WidgetNode::Image {
            item_id: Some(item_id),
            alt: None,
        }
    }

    #[test]
    fn updates_matching_images_only() {
        let mut tree = WidgetNode::Container {
            children: vec![
                image(7),
                image(8),
                WidgetNode::Text {
                    content: "hello".into(),
                },
                WidgetNode::Container {
                    children: vec![image(7)],
                },
            ],
        };
        let updated = sync_widget_alt_text(&mut tree, 7, "a red bicycle");
        assert_eq!(updated, 2);

        if let WidgetNode::Container { children } = &tree {
            assert_eq!(
                children[0],
                WidgetNode::Image {
                    item_id: Some(7),
                    alt: Some("a red bicycle".into())
                }
            );
            // Non-matching image untouched
            assert_eq!(children[1], image(8));
        } else {
            unreachable!();
        }
    }

    #[test]
    fn unknown_nodes_are_preserved() {
        let json = r#"{"kind":"carousel","slides":[]}"#;
        let mut node: WidgetNode = serde_json::from_str(json).unwrap();
        assert_eq!(node, WidgetNode::Unknown);
        assert_eq!(sync_widget_alt_text(&mut node, 1, "alt"), 0);
    }

    #[test]
    fn depth_bound_stops_runaway_nesting() {
        let mut tree = image(1);
        for _ in 0..(MAX_WIDGET_DEPTH + 5) {
            tree = WidgetNode::Container {
                children: vec![tree],
            };
        }
        // Image sits below the bound, so nothing is updated.
        assert_eq!(sync_widget_alt_text(&mut tree, 1, "alt"), 0);
    }

    #[test]
    fn round_trips_through_json() {
        let tree = WidgetNode::Container {
            children: vec![image(3), WidgetNode::Text { content: "x".into() }],
        };
        let json = serde_json::to_string(&tree).unwrap();
        let parsed: WidgetNode = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, tree);
    }
}
