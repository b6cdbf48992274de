//! Entity-salience annotations and the shared lookup cache.
//!
//! The services that produce annotations (SWAT-style APIs, index lookups)
//! live outside this tool; what arrives here is a pre-fetched file exposed
//! through the same black-box `lookup(paragraphID)` shape those services
//! have, plus a concurrent memoization layer shared by the query workers.

use std::collections::HashMap;
use std::fs::File;
use std::io::BufReader;
use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use dashmap::DashMap;

/// Salience annotations for a paragraph: entity -> score, or absent when
/// the paragraph was never annotated.
pub trait AnnotationSource: Sync {
    fn lookup(&self, paragraph_id: &str) -> Option<HashMap<String, f64>>;
}

/// Annotations pre-fetched into a JSON file shaped
/// `{ "paragraphID": { "entityID": score, ... }, ... }`.
pub struct FileAnnotations {
    annotations: HashMap<String, HashMap<String, f64>>,
}

impl FileAnnotations {
    pub fn load(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .with_context(|| format!("failed to open annotation file: {}", path.display()))?;
        let annotations = serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("failed to parse annotation file: {}", path.display()))?;
        Ok(Self { annotations })
    }

    pub fn len(&self) -> usize {
        self.annotations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.annotations.is_empty()
    }
}

impl AnnotationSource for FileAnnotations {
    fn lookup(&self, paragraph_id: &str) -> Option<HashMap<String, f64>> {
        self.annotations.get(paragraph_id).cloned()
    }
}

/// Strips the `enwiki:` qualifier so run-file entity IDs line up with the
/// annotation vocabulary.
pub fn process_entity_id(entity_id: &str) -> &str {
    entity_id.strip_prefix("enwiki:").unwrap_or(entity_id)
}

/// Memoizes annotation lookups across queries and worker threads.
///
/// Entries are idempotent given the same paragraph, so a race that
/// computes one twice is harmless; `None` results are cached too, since a
/// paragraph without annotations stays that way for the whole run.
pub struct SalienceCache<'a> {
    source: &'a dyn AnnotationSource,
    cache: DashMap<String, Option<Arc<HashMap<String, f64>>>>,
}

impl<'a> SalienceCache<'a> {
    pub fn new(source: &'a dyn AnnotationSource) -> Self {
        Self {
            source,
            cache: DashMap::new(),
        }
    }

    /// Salience of `entity_id` (already processed) for a paragraph.
    ///
    /// Returns `None` when the paragraph has no annotations at all, and
    /// `Some(0.0)` when it is annotated but the entity is not salient.
    pub fn entity_score(&self, paragraph_id: &str, entity_id: &str) -> Option<f64> {
        self.annotations_for(paragraph_id)
            .map(|map| map.get(entity_id).copied().unwrap_or(0.0))
    }

    fn annotations_for(&self, paragraph_id: &str) -> Option<Arc<HashMap<String, f64>>> {
        if let Some(cached) = self.cache.get(paragraph_id) {
            return cached.value().clone();
        }
        let fetched = self.source.lookup(paragraph_id).map(Arc::new);
        self.cache
            .insert(paragraph_id.to_string(), fetched.clone());
        fetched
    }

    pub fn cached_paragraphs(&self) -> usize {
        self.cache.len()
    }
}
