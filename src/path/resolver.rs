//! Path parsing and the process-wide path cache.

use super::types::{PropertyPath, Segment, COLLECTION_MARKER, WILDCARD};
use crate::error::ParseError;
use lru::LruCache;
use parking_lot::Mutex;
use std::num::NonZeroUsize;
use std::sync::{Arc, OnceLock};

/// Default number of resolved paths kept in the process-wide cache.
pub const DEFAULT_PATH_CACHE_CAPACITY: usize = 1024;

static GLOBAL_CACHE: OnceLock<PathCache> = OnceLock::new();

/// Resolve a path string through the process-wide cache.
///
/// Repeated calls with the same string return the same shared
/// [`PropertyPath`] while it remains cached.
pub fn resolve(path: &str) -> Result<Arc<PropertyPath>, ParseError> {
    PathCache::global().resolve(path)
}

/// LRU cache of resolved paths keyed by canonical string.
pub struct PathCache {
    cache: Mutex<LruCache<String, Arc<PropertyPath>>>,
}

impl PathCache {
    /// Create a standalone cache holding at most `capacity` paths.
    pub fn new(capacity: usize) -> Self {
        let capacity = NonZeroUsize::new(capacity.max(1)).unwrap_or(NonZeroUsize::MIN);
        Self {
            cache: Mutex::new(LruCache::new(capacity)),
        }
    }

    /// The cache shared by every engine in the process.
    pub fn global() -> &'static PathCache {
        GLOBAL_CACHE.get_or_init(|| PathCache::new(DEFAULT_PATH_CACHE_CAPACITY))
    }

    /// Resolve `path`, reusing the cached instance when present.
    pub fn resolve(&self, path: &str) -> Result<Arc<PropertyPath>, ParseError> {
        if let Some(hit) = self.cache.lock().get(path) {
            return Ok(Arc::clone(hit));
        }

        // Parse outside the lock; a racing insert of the same string is harmless.
        let parsed = Arc::new(parse(path)?);
        let mut cache = self.cache.lock();
        if let Some(hit) = cache.get(path) {
            return Ok(Arc::clone(hit));
        }
        cache.put(path.to_string(), Arc::clone(&parsed));
        Ok(parsed)
    }

    pub fn len(&self) -> usize {
        self.cache.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.cache.lock().is_empty()
    }

    pub fn clear(&self) {
        self.cache.lock().clear();
    }
}

/// Parse a path string without touching any cache.
pub(crate) fn parse(path: &str) -> Result<PropertyPath, ParseError> {
    if path.is_empty() {
        return Err(ParseError::Empty);
    }

    let mut segments = Vec::new();
    for component in path.split('.') {
        let segment = match component {
            WILDCARD => Segment::Wildcard,
            COLLECTION_MARKER => Segment::CollectionAny,
            name if is_identifier(name) => Segment::Named(name.to_string()),
            other => {
                return Err(ParseError::InvalidSegment {
                    path: path.to_string(),
                    segment: other.to_string(),
                })
            }
        };
        segments.push(segment);
    }

    // Terminal-only wildcards keep relinking deterministic.
    let last = segments.len() - 1;
    if segments[..last].iter().any(Segment::is_terminal_only) {
        return Err(ParseError::WildcardNotTerminal {
            path: path.to_string(),
        });
    }

    Ok(PropertyPath::from_parts(path.to_string(), segments))
}

fn is_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
