//! # Image Cache
//!
//! Parsed objects keyed by canonical path.
//!
//! Every capture re-reads the process's link map; the cache keeps the same
//! shared libraries from being parsed again each time. A failed load is not
//! cached so a transient I/O error can be retried.
//!
//! Objects are loaded best effort: unusable DWARF is logged once and the object
//! is cached with segments and symbols only.
//!
//! ```rust,no_run
//! use sonde_core::debuginfo::ImageCache;
//!
//! fn main() -> Result<(), Box<dyn std::error::Error>>
//! {
//!     let cache = ImageCache::new();
//!     let first = cache.load("/usr/lib/libc.so.6")?;
//!     let second = cache.load("/usr/lib/libc.so.6")?;
//!     assert!(std::sync::Arc::ptr_eq(&first, &second));
//!     Ok(())
//! }
//! ```

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, PoisonError, RwLock};

use tracing::{trace, warn};

use super::ObjectInformation;
use crate::error::SondeResult;

#[derive(Default)]
pub struct ImageCache
{
    images: RwLock<HashMap<PathBuf, Arc<ObjectInformation>>>,
}

impl ImageCache
{
    #[must_use]
    pub fn new() -> Self
    {
        Self::default()
    }

    /// Parsed object at `path`, loading it on first request.
    pub fn load(&self, path: impl AsRef<Path>) -> SondeResult<Arc<ObjectInformation>>
    {
        let path = path.as_ref();
        let canonical = path.canonicalize().unwrap_or_else(|_| path.to_path_buf());

        if let Some(existing) = self.images.read().unwrap_or_else(PoisonError::into_inner).get(&canonical) {
            return Ok(existing.clone());
        }

        trace!(path = %canonical.display(), "parsing object");
        let info = ObjectInformation::load_best_effort(&canonical)?;
        if let Some(error) = info.debug_error() {
            warn!(path = %canonical.display(), %error, "debug information unusable, continuing with symbols only");
        }
        let info = Arc::new(info);
        let mut images = self.images.write().unwrap_or_else(PoisonError::into_inner);
        Ok(images.entry(canonical).or_insert(info).clone())
    }

    /// Register an object parsed elsewhere (for example from memory).
    pub fn insert(&self, path: impl Into<PathBuf>, info: Arc<ObjectInformation>)
    {
        self.images
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.into(), info);
    }

    pub fn len(&self) -> usize
    {
        self.images.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool
    {
        self.len() == 0
    }
}
