//! Batch filter configuration.
//!
//! A filter is captured once when a run starts and stays fixed for the whole
//! run; changing it client-side invalidates any resumable session.

use serde::{Deserialize, Serialize};

/// Hard upper bound on items per coordinator call.
pub const MAX_BATCH_SIZE: u32 = 5;

/// Maximum entries per keyword list.
pub const MAX_KEYWORDS: usize = 6;

/// Maximum combined characters per keyword list.
pub const MAX_KEYWORDS_CHARS: usize = 512;

/// Which items a run covers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GenerationMode {
    /// Every matching item, overwriting existing alt text.
    All,
    /// Only items with empty alt text.
    MissingOnly,
}

impl GenerationMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::All => "all",
            Self::MissingOnly => "missing_only",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "all" => Some(Self::All),
            "missing_only" => Some(Self::MissingOnly),
            _ => None,
        }
    }
}

/// Scope restriction for a run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Scope {
    /// Cursor traversal over the whole library.
    Library {
        /// Restrict to items attached to a parent entity.
        #[serde(default)]
        attached_only: bool,
        /// Restrict to items never charged before (no asset mapping).
        #[serde(default)]
        unprocessed_only: bool,
        /// Restrict to parents in this category.
        #[serde(default)]
        category: Option<String>,
    },
    /// Fixed explicit ID set identified by an opaque selection token.
    Selection { token: String },
}

impl Scope {
    pub fn is_selection(&self) -> bool {
        matches!(self, Scope::Selection { .. })
    }

    pub fn selection_token(&self) -> Option<&str> {
        match self {
            Scope::Selection { token } => Some(token),
            Scope::Library { .. } => None,
        }
    }
}

/// Immutable-per-run batch configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchFilter {
    pub mode: GenerationMode,
    pub scope: Scope,
    /// Keywords the generated text should favor.
    #[serde(default)]
    pub keywords: Vec<String>,
    /// Keywords the generated text should avoid.
    #[serde(default)]
    pub negative_keywords: Vec<String>,
    /// Requested slice size, clamped server-side to 1..=MAX_BATCH_SIZE.
    pub batch_size: u32,
}

impl BatchFilter {
    /// Library-wide missing-only filter with defaults.
    pub fn missing_only(batch_size: u32) -> Self {
        Self {
            mode: GenerationMode::MissingOnly,
            scope: Scope::Library {
                attached_only: false,
                unprocessed_only: false,
                category: None,
            },
            keywords: Vec::new(),
            negative_keywords: Vec::new(),
            batch_size,
        }
    }

    /// Clamp the batch size into the server-accepted range.
    pub fn clamped_batch_size(&self) -> u32 {
        self.batch_size.clamp(1, MAX_BATCH_SIZE)
    }

    /// Enforce keyword list bounds in place (entry count and combined length).
    pub fn normalize_keywords(&mut self) {
        normalize_list(&mut self.keywords);
        normalize_list(&mut self.negative_keywords);
    }
}

fn normalize_list(list: &mut Vec<String>) {
    list.retain(|k| !k.trim().is_empty());
    list.truncate(MAX_KEYWORDS);
    let mut total = 0usize;
    list.retain(|k| {
        total += k.chars().count();
        total <= MAX_KEYWORDS_CHARS
    });
}
