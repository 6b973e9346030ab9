pub mod wal;

use thiserror::Error;
use vecsearch_core::{NodeId, VecFloat};

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("vector size mismatch: {actual} vs {expected}")]
    SizeMismatch { expected: usize, actual: usize },
    #[error("store is full ({0} vectors)")]
    Full(usize),
}

/// Append-only vector storage addressed by [`NodeId`].
///
/// Backed by a `boxcar::Vec`, so appends never move existing vectors and reads
/// take no lock. Writers are expected to be serialised by the owning index;
/// concurrent appends are still safe, only the id order is then unspecified.
#[derive(Debug)]
pub struct VectorStore {
    vectors: boxcar::Vec<Box<[VecFloat]>>,
    dimension: usize,
}

impl VectorStore {
    pub fn new(dimension: usize) -> Self {
        Self {
            vectors: boxcar::Vec::new(),
            dimension,
        }
    }

    pub fn dimension(&self) -> usize {
        self.dimension
    }

    pub fn append(&self, vector: &[VecFloat]) -> Result<NodeId, StoreError> {
        if vector.len() != self.dimension {
            return Err(StoreError::SizeMismatch {
                expected: self.dimension,
                actual: vector.len(),
            });
        }
        let count = self.vectors.count();
        if count >= NodeId::MAX as usize {
            return Err(StoreError::Full(count));
        }
        let id = self.vectors.push(vector.into());
        Ok(id as NodeId)
    }

    #[inline]
    pub fn get(&self, id: NodeId) -> Option<&[VecFloat]> {
        self.vectors.get(id as usize).map(AsRef::as_ref)
    }

    pub fn count(&self) -> usize {
        self.vectors.count()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    /// Bytes held by vector payloads, excluding allocator overhead.
    pub fn total_size_bytes(&self) -> usize {
        self.count() * self.dimension * std::mem::size_of::<VecFloat>()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_store_append_get() {
        let store = VectorStore::new(3);
        assert!(store.is_empty());

        for i in 0..10 {
            let id = store.append(&[f64::from(i), 0.0, 1.0]).unwrap();
            assert_eq!(id, i);
        }
        assert_eq!(store.count(), 10);
        assert_eq!(store.get(4), Some(&[4.0, 0.0, 1.0][..]));
        assert_eq!(store.get(10), None);
        assert_eq!(store.total_size_bytes(), 10 * 3 * 8);
    }

    #[test]
    fn test_store_rejects_wrong_size() {
        let store = VectorStore::new(4);
        let err = store.append(&[1.0, 2.0]).unwrap_err();
        assert!(matches!(
            err,
            StoreError::SizeMismatch {
                expected: 4,
                actual: 2
            }
        ));
        assert_eq!(store.count(), 0);
    }

    #[test]
    fn test_store_concurrent_readers() {
        let store = std::sync::Arc::new(VectorStore::new(2));
        for i in 0..100 {
            store.append(&[f64::from(i), -f64::from(i)]).unwrap();
        }
        let handles: Vec<_> = (0..4)
            .map(|_| {
                let store = store.clone();
                std::thread::spawn(move || {
                    for i in 0..100u32 {
                        let v = store.get(i).unwrap();
                        assert!((v[0] + v[1]).abs() < f64::EPSILON);
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
    }
}
