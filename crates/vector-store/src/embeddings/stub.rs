use super::{normalize, EmbeddingProvider};
use crate::error::{Result, VectorStoreError};

const STUB_MODEL_ID: &str = "stub";

/// Degraded embedding backend for running without a model.
///
/// Each call seeds a fresh generator from the FNV-1a hash of the input text and
/// draws `dimension` values uniformly from `[-1, 1)`, then L2-normalizes them.
/// Identical text always yields the identical vector, independent of call order
/// or instance.
#[derive(Clone, Debug)]
pub struct HashEmbedder {
    dimension: usize,
}

impl HashEmbedder {
    pub fn new(dimension: usize) -> Result<Self> {
        if dimension == 0 {
            return Err(VectorStoreError::Validation(
                "embedding dimension must be positive".to_string(),
            ));
        }
        Ok(Self { dimension })
    }
}

impl EmbeddingProvider for HashEmbedder {
    fn model_id(&self) -> &str {
        STUB_MODEL_ID
    }

    fn dimension(&self) -> usize {
        self.dimension
    }

    fn is_degraded(&self) -> bool {
        true
    }

    fn encode(&self, text: &str) -> Result<Vec<f32>> {
        Ok(stub_embed(text, self.dimension))
    }
}

fn stub_embed(text: &str, dimension: usize) -> Vec<f32> {
    let mut state =
        fnv1a_64(text.as_bytes()) ^ (dimension as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15);
    let mut vec = Vec::with_capacity(dimension);
    for _ in 0..dimension {
        let bits = splitmix64(&mut state);
        let high = (bits >> 32) as u32;
        let mantissa = high >> 9;
        let unit = f32::from_bits(0x3f80_0000 | mantissa) - 1.0;
        vec.push(unit.mul_add(2.0, -1.0));
    }
    normalize(&mut vec);
    vec
}

fn fnv1a_64(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for byte in bytes {
        hash ^= u64::from(*byte);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

const fn splitmix64(state: &mut u64) -> u64 {
    *state = state.wrapping_add(0x9E37_79B9_7F4A_7C15);
    let mut z = *state;
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn reseeds_per_call() {
        let embedder = HashEmbedder::new(64).unwrap();
        let first = embedder.encode("The cat sat on the mat.").unwrap();
        let _ = embedder.encode("something else entirely").unwrap();
        let again = embedder.encode("The cat sat on the mat.").unwrap();
        assert_eq!(first, again);

        let fresh = HashEmbedder::new(64).unwrap();
        assert_eq!(fresh.encode("The cat sat on the mat.").unwrap(), first);
    }

    #[test]
    fn different_text_gives_different_vectors() {
        let embedder = HashEmbedder::new(16).unwrap();
        let a = embedder.encode("alpha").unwrap();
        let b = embedder.encode("beta").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn vectors_are_unit_length_and_bounded() {
        let embedder = HashEmbedder::new(384).unwrap();
        let v = embedder.encode("").unwrap();
        assert_eq!(v.len(), 384);
        let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
        assert!(v.iter().all(|x| x.is_finite() && x.abs() <= 1.0));
    }

    #[test]
    fn batch_matches_single_calls() {
        let embedder = HashEmbedder::new(8).unwrap();
        let batch = embedder.encode_batch(&["one", "two"]).unwrap();
        assert_eq!(batch[0], embedder.encode("one").unwrap());
        assert_eq!(batch[1], embedder.encode("two").unwrap());
    }

    #[test]
    fn rejects_zero_dimension() {
        assert!(HashEmbedder::new(0).is_err());
    }

    #[test]
    fn flags_degraded_mode() {
        assert!(HashEmbedder::new(4).unwrap().is_degraded());
    }
}
