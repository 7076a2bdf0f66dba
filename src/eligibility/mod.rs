//! Eligibility filtering for work items.
//!
//! A pure, synchronous predicate over an item's metadata. Rejections are
//! logged for generation contexts but suppressed for speculative UI checks
//! to keep the error log free of probe noise.

use tracing::warn;

use crate::models::{SkipReason, WorkItem};

/// Hard cap on item size: 16 MiB.
pub const MAX_FILE_BYTES: u64 = 16 * 1024 * 1024;

/// Minimum pixel dimensions for raster images.
pub const MIN_DIMENSION: u32 = 50;

/// Extensions the external API accepts.
pub const SUPPORTED_EXTENSIONS: &[&str] = &[
    "jpg", "jpeg", "png", "gif", "webp", "avif", "bmp", "tiff", "svg",
];

/// Why an item was rejected by the eligibility filter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Rejection {
    pub reason: SkipReason,
    pub detail: String,
}

impl Rejection {
    fn new(reason: SkipReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Where an eligibility check originates. Controls whether rejection reasons
/// are recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityContext {
    /// Single-item generation.
    Generate,
    /// Bulk batch run.
    Bulk,
    /// Speculative UI probe; rejections are not logged.
    Check,
}

impl EligibilityContext {
    pub fn records_rejections(&self) -> bool {
        !matches!(self, EligibilityContext::Check)
    }
}

/// Operator-configured eligibility policy.
#[derive(Debug, Clone)]
pub struct EligibilityPolicy {
    /// Hard size cap in bytes.
    pub max_bytes: u64,
    pub min_width: u32,
    pub min_height: u32,
    /// Optional user whitelist narrowing the supported extension set.
    pub extension_whitelist: Option<Vec<String>>,
    /// Parent categories excluded from generation.
    pub excluded_categories: Vec<String>,
    /// Tolerate items whose byte size cannot be determined (offloaded or
    /// external storage may not expose size). Operator opt-in.
    pub skip_missing_size: bool,
}

impl Default for EligibilityPolicy {
    fn default() -> Self {
        Self {
            max_bytes: MAX_FILE_BYTES,
            min_width: MIN_DIMENSION,
            min_height: MIN_DIMENSION,
            extension_whitelist: None,
            excluded_categories: Vec::new(),
            skip_missing_size: false,
        }
    }
}

impl EligibilityPolicy {
    /// Evaluate one item. Deterministic given current metadata.
    ///
    /// `veto` is a caller-supplied override rejecting the item outright
    /// (enrichment hooks can rule items out before policy runs).
    pub fn evaluate(
        &self,
        item: &WorkItem,
        ctx: EligibilityContext,
        veto: Option<&str>,
    ) -> Result<(), Rejection> {
        let result = self.check(item, veto);
        if let Err(rejection) = &result {
            if ctx.records_rejections() {
                warn!(
                    item_id = item.id,
                    reason = rejection.reason.label(),
                    "item ineligible: {}",
                    rejection.detail
                );
            }
        }
        result
    }

    fn check(&self, item: &WorkItem, veto: Option<&str>) -> Result<(), Rejection> {
        if let Some(cause) = veto {
            return Err(Rejection::new(
                SkipReason::Vetoed,
                format!("vetoed by caller: {}", cause),
            ));
        }

        for category in &item.categories {
            if self
                .excluded_categories
                .iter()
                .any(|c| c.eq_ignore_ascii_case(category))
            {
                return Err(Rejection::new(
                    SkipReason::ExcludedCategory,
                    format!("parent in excluded category '{}'", category),
                ));
            }
        }

        let ext = item.extension().unwrap_or_default();
        if !SUPPORTED_EXTENSIONS.contains(&ext.as_str()) {
            return Err(Rejection::new(
                SkipReason::UnsupportedType,
                format!("extension '{}' not supported", ext),
            ));
        }
        if let Some(whitelist) = &self.extension_whitelist {
            if !whitelist.iter().any(|w| w.eq_ignore_ascii_case(&ext)) {
                return Err(Rejection::new(
                    SkipReason::UnsupportedType,
                    format!("extension '{}' not in configured whitelist", ext),
                ));
            }
        }

        // Vector formats are exempt from the size probe and dimension floor.
        if item.is_vector() {
            return Ok(());
        }

        match item.file_size {
            Some(size) if size > self.max_bytes => {
                return Err(Rejection::new(
                    SkipReason::TooLarge,
                    format!("{} bytes exceeds cap of {}", size, self.max_bytes),
                ));
            }
            Some(_) => {}
            None if self.skip_missing_size => {}
            None => {
                return Err(Rejection::new(
                    SkipReason::MissingSize,
                    "byte size could not be determined",
                ));
            }
        }

        if let (Some(w), Some(h)) = (item.width, item.height) {
            if w < self.min_width || h < self.min_height {
                return Err(Rejection::new(
                    SkipReason::TooSmall,
                    format!(
                        "{}x{} below minimum {}x{}",
                        w, h, self.min_width, self.min_height
                    ),
                ));
            }
        }

        Ok(())
    }
}
