//! Flat L2 vector index.
//!
//! Corpora here are small (tens of thousands of thoughts) and recall matters
//! more than latency, so the index is an exact linear scan rather than an
//! approximate structure. Rows are append-only within a session; deletions
//! tombstone the row (the vector stays, skipped on read) and the index
//! compacts itself once tombstones exceed a fifth of the rows.
//!
//! Persistence is an opaque f32 little-endian blob plus a bincode companion
//! mapping row to thought id.

use std::collections::HashMap;
use std::path::Path;

use crate::storage::atomic_write;

/// Blob header magic
const MAGIC: &[u8; 4] = b"NSIX";
/// Blob format version
const FORMAT_VERSION: u8 = 1;
/// Tombstone share that triggers compaction
const COMPACT_THRESHOLD: f64 = 0.2;

// ============================================================================
// ERROR TYPES
// ============================================================================

/// Vector index error types
#[non_exhaustive]
#[derive(Debug, Clone)]
pub enum IndexError {
    /// Vector length does not match the index
    DimensionMismatch {
        /// Dimensions the index was built with
        expected: usize,
        /// Dimensions of the offered vector
        got: usize,
    },
    /// Failed to persist or load the index
    Persistence(String),
    /// Blob or companion file failed validation
    Corrupt(String),
}

impl std::fmt::Display for IndexError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            IndexError::DimensionMismatch { expected, got } => {
                write!(f, "dimension mismatch: expected {}, got {}", expected, got)
            }
            IndexError::Persistence(e) => write!(f, "index persistence failed: {}", e),
            IndexError::Corrupt(e) => write!(f, "index corrupt: {}", e),
        }
    }
}

impl std::error::Error for IndexError {}

// ============================================================================
// FLAT INDEX
// ============================================================================

/// Exact flat L2 index over unit vectors
pub struct FlatIndex {
    dims: usize,
    /// Row-major vector data, tombstoned rows included
    data: Vec<f32>,
    /// Row -> id; `None` marks a tombstone
    rows: Vec<Option<String>>,
    id_to_row: HashMap<String, usize>,
}

impl FlatIndex {
    /// Empty index with the given dimensions
    pub fn new(dims: usize) -> Self {
        Self {
            dims,
            data: Vec::new(),
            rows: Vec::new(),
            id_to_row: HashMap::new(),
        }
    }

    /// Vector dimensions
    pub fn dimensions(&self) -> usize {
        self.dims
    }

    /// Number of live (non-tombstoned) vectors
    pub fn len(&self) -> usize {
        self.id_to_row.len()
    }

    /// Whether the index holds no live vectors
    pub fn is_empty(&self) -> bool {
        self.id_to_row.is_empty()
    }

    /// Total rows including tombstones
    pub fn rows(&self) -> usize {
        self.rows.len()
    }

    /// Share of rows that are tombstoned
    pub fn tombstone_fraction(&self) -> f64 {
        if self.rows.is_empty() {
            return 0.0;
        }
        (self.rows.len() - self.id_to_row.len()) as f64 / self.rows.len() as f64
    }

    /// Whether `id` has a live row
    pub fn contains(&self, id: &str) -> bool {
        self.id_to_row.contains_key(id)
    }

    /// Live vector for `id`
    pub fn get(&self, id: &str) -> Option<&[f32]> {
        let row = *self.id_to_row.get(id)?;
        Some(&self.data[row * self.dims..(row + 1) * self.dims])
    }

    /// Live ids, in row order
    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.rows.iter().filter_map(|r| r.as_deref())
    }

    /// Insert a vector. Re-adding an existing id tombstones the old row.
    pub fn add(&mut self, id: &str, vector: &[f32]) -> Result<(), IndexError> {
        if vector.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: vector.len(),
            });
        }

        if let Some(old_row) = self.id_to_row.remove(id) {
            self.rows[old_row] = None;
        }

        let row = self.rows.len();
        self.data.extend_from_slice(vector);
        self.rows.push(Some(id.to_string()));
        self.id_to_row.insert(id.to_string(), row);
        Ok(())
    }

    /// Tombstone `id`. Returns whether it was present. Compacts when the
    /// tombstone share crosses the rebuild threshold.
    pub fn remove(&mut self, id: &str) -> bool {
        let Some(row) = self.id_to_row.remove(id) else {
            return false;
        };
        self.rows[row] = None;
        if self.tombstone_fraction() > COMPACT_THRESHOLD {
            self.compact();
        }
        true
    }

    /// Rewrite the index without tombstoned rows
    pub fn compact(&mut self) {
        let mut data = Vec::with_capacity(self.id_to_row.len() * self.dims);
        let mut rows = Vec::with_capacity(self.id_to_row.len());
        let mut id_to_row = HashMap::with_capacity(self.id_to_row.len());

        for (row, id) in self.rows.iter().enumerate() {
            if let Some(id) = id {
                id_to_row.insert(id.clone(), rows.len());
                rows.push(Some(id.clone()));
                data.extend_from_slice(&self.data[row * self.dims..(row + 1) * self.dims]);
            }
        }

        self.data = data;
        self.rows = rows;
        self.id_to_row = id_to_row;
    }

    /// Exact k-nearest-neighbour search, distances ascending
    pub fn search(&self, query: &[f32], k: usize) -> Result<Vec<(String, f32)>, IndexError> {
        if query.len() != self.dims {
            return Err(IndexError::DimensionMismatch {
                expected: self.dims,
                got: query.len(),
            });
        }

        let mut hits: Vec<(usize, f32)> = Vec::with_capacity(self.id_to_row.len());
        for (row, id) in self.rows.iter().enumerate() {
            if id.is_none() {
                continue;
            }
            let start = row * self.dims;
            let mut dist_sq = 0.0_f32;
            for (a, b) in self.data[start..start + self.dims].iter().zip(query.iter()) {
                let d = a - b;
                dist_sq += d * d;
            }
            hits.push((row, dist_sq));
        }

        hits.sort_by(|a, b| a.1.partial_cmp(&b.1).unwrap_or(std::cmp::Ordering::Equal));
        Ok(hits
            .into_iter()
            .take(k)
            .map(|(row, dist_sq)| {
                let id = self.rows[row].clone().unwrap_or_default();
                (id, dist_sq.sqrt())
            })
            .collect())
    }

    // ------------------------------------------------------------------
    // Persistence
    // ------------------------------------------------------------------

    /// Persist the blob and companion map atomically
    pub fn save(&self, blob_path: &Path, meta_path: &Path) -> Result<(), IndexError> {
        let mut blob =
            Vec::with_capacity(16 + self.data.len() * std::mem::size_of::<f32>());
        blob.extend_from_slice(MAGIC);
        blob.push(FORMAT_VERSION);
        blob.extend_from_slice(&(self.dims as u32).to_le_bytes());
        blob.extend_from_slice(&(self.rows.len() as u64).to_le_bytes());
        for value in &self.data {
            blob.extend_from_slice(&value.to_le_bytes());
        }
        atomic_write(blob_path, &blob).map_err(|e| IndexError::Persistence(e.to_string()))?;

        let meta = bincode::serialize(&self.rows)
            .map_err(|e| IndexError::Persistence(e.to_string()))?;
        atomic_write(meta_path, &meta).map_err(|e| IndexError::Persistence(e.to_string()))?;
        Ok(())
    }

    /// Load and validate a persisted index
    pub fn load(blob_path: &Path, meta_path: &Path) -> Result<Self, IndexError> {
        let blob =
            std::fs::read(blob_path).map_err(|e| IndexError::Persistence(e.to_string()))?;
        if blob.len() < 17 || &blob[..4] != MAGIC {
            return Err(IndexError::Corrupt("bad magic".to_string()));
        }
        if blob[4] != FORMAT_VERSION {
            return Err(IndexError::Corrupt(format!(
                "unsupported format version {}",
                blob[4]
            )));
        }
        let dims = u32::from_le_bytes(blob[5..9].try_into().unwrap()) as usize;
        let row_count = u64::from_le_bytes(blob[9..17].try_into().unwrap()) as usize;
        let expected = 17 + row_count * dims * std::mem::size_of::<f32>();
        if blob.len() != expected {
            return Err(IndexError::Corrupt(format!(
                "blob length {} does not match {} rows of {} dims",
                blob.len(),
                row_count,
                dims
            )));
        }

        let data: Vec<f32> = blob[17..]
            .chunks_exact(4)
            .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
            .collect();

        let meta =
            std::fs::read(meta_path).map_err(|e| IndexError::Persistence(e.to_string()))?;
        let rows: Vec<Option<String>> =
            bincode::deserialize(&meta).map_err(|e| IndexError::Corrupt(e.to_string()))?;
        if rows.len() != row_count {
            return Err(IndexError::Corrupt(format!(
                "companion map has {} rows, blob has {}",
                rows.len(),
                row_count
            )));
        }

        let mut id_to_row = HashMap::new();
        for (row, id) in rows.iter().enumerate() {
            if let Some(id) = id {
                if id_to_row.insert(id.clone(), row).is_some() {
                    return Err(IndexError::Corrupt(format!("duplicate id {}", id)));
                }
            }
        }

        Ok(Self {
            dims,
            data,
            rows,
            id_to_row,
        })
    }
}
