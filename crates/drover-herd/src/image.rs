//! Image provider interface.
//!
//! An image is a named desired filesystem state: a required tree, a path
//! exclusion filter, and the triggers to pass through with every plan
//! built from it. How images are authored, stored, and versioned is an
//! external concern; the herd only looks them up by name.

use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use drover_types::{FileSystem, PathFilter, Trigger};

/// A named desired state for some population of nodes.
#[derive(Debug, Clone)]
pub struct Image {
    /// The required tree, read-only to reconciliation. Derived tables
    /// must be built before the image is served.
    pub file_system: Arc<FileSystem>,
    /// Paths excluded from all reconciliation consideration.
    pub filter: PathFilter,
    /// Post-apply actions, copied verbatim into every plan.
    pub triggers: Vec<Trigger>,
}

/// Image lookup failures.
#[derive(Debug, Clone, Error)]
pub enum ImageError {
    #[error("image not found: {0}")]
    NotFound(String),
}

/// Source of required trees, filters, and triggers by image name.
#[async_trait]
pub trait ImageProvider: Send + Sync {
    async fn get_image(&self, name: &str) -> Result<Arc<Image>, ImageError>;
}
