//! Tile storage keyed by (offset, zoom)
//!
//! Unbounded by default: every computed tile stays until the engine is
//! dropped or the cache is cleared. An LRU capacity can be configured.

use ordered_float::OrderedFloat;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, PoisonError, RwLock};

/// Identifies a tile of one source
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TileKey {
    pub offset: u64,
    zoom: OrderedFloat<f64>,
}

impl TileKey {
    pub fn new(offset: u64, zoom: f64) -> Self {
        Self {
            offset,
            zoom: OrderedFloat(zoom),
        }
    }

    pub fn zoom(&self) -> f64 {
        self.zoom.into_inner()
    }
}

/// Fixed-length run of normalized RMS values, cheap to clone
#[derive(Clone, Debug, PartialEq)]
pub struct Tile {
    values: Arc<[f32]>,
}

impl Tile {
    pub fn new(values: Vec<f32>) -> Self {
        Self {
            values: values.into(),
        }
    }

    pub fn values(&self) -> &[f32] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Whether both tiles share the same storage
    pub fn ptr_eq(&self, other: &Tile) -> bool {
        Arc::ptr_eq(&self.values, &other.values)
    }
}

impl AsRef<[f32]> for Tile {
    fn as_ref(&self) -> &[f32] {
        &self.values
    }
}

/// Eviction behaviour of a [`TileCache`]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CachePolicy {
    /// Never evict
    #[default]
    Unbounded,
    /// Keep at most `capacity` tiles, dropping the least recently used
    Lru { capacity: usize },
}

#[derive(Default)]
struct CacheInner {
    tiles: HashMap<TileKey, Tile>,
    /// LRU order: front = oldest. Only maintained for `CachePolicy::Lru`
    recency: VecDeque<TileKey>,
}

impl CacheInner {
    fn touch(&mut self, key: TileKey) {
        self.recency.retain(|k| k != &key);
        self.recency.push_back(key);
    }
}

/// Thread-safe tile map
pub struct TileCache {
    policy: CachePolicy,
    inner: RwLock<CacheInner>,
}

impl TileCache {
    pub fn new(policy: CachePolicy) -> Self {
        Self {
            policy,
            inner: RwLock::new(CacheInner::default()),
        }
    }

    pub fn policy(&self) -> CachePolicy {
        self.policy
    }

    pub fn get(&self, key: &TileKey) -> Option<Tile> {
        match self.policy {
            CachePolicy::Unbounded => {
                let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
                inner.tiles.get(key).cloned()
            }
            CachePolicy::Lru { .. } => {
                let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
                let tile = inner.tiles.get(key).cloned()?;
                inner.touch(*key);
                Some(tile)
            }
        }
    }

    /// Store a tile; a tile already cached under `key` is replaced
    pub fn insert(&self, key: TileKey, tile: Tile) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.tiles.insert(key, tile);

        if let CachePolicy::Lru { capacity } = self.policy {
            inner.touch(key);
            while inner.tiles.len() > capacity {
                let Some(oldest) = inner.recency.pop_front() else {
                    break;
                };
                inner.tiles.remove(&oldest);
            }
        }
    }

    pub fn contains(&self, key: &TileKey) -> bool {
        let inner = self.inner.read().unwrap_or_else(PoisonError::into_inner);
        inner.tiles.contains_key(key)
    }

    pub fn len(&self) -> usize {
        self.inner.read().unwrap_or_else(PoisonError::into_inner).tiles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        let mut inner = self.inner.write().unwrap_or_else(PoisonError::into_inner);
        inner.tiles.clear();
        inner.recency.clear();
    }
}

impl Default for TileCache {
    fn default() -> Self {
        Self::new(CachePolicy::default())
    }
}
