use async_trait::async_trait;
use sync_core::{EmbeddingProvider, ProviderError};

/// Deterministic embeddings for offline runs and tests.
///
/// Each lowercase word is hashed into one of `dimensions` buckets and the
/// result is normalized, so texts that share words score as similar under
/// cosine similarity.
#[derive(Debug, Clone)]
pub struct FakeEmbeddings {
    dimensions: usize,
}

impl FakeEmbeddings {
    pub fn new(dimensions: usize) -> Self {
        Self {
            dimensions: dimensions.max(1),
        }
    }

    pub fn dimensions(&self) -> usize {
        self.dimensions
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let mut vec = vec![0.0f32; self.dimensions];
        for word in text
            .split(|c: char| !c.is_alphanumeric())
            .filter(|w| !w.is_empty())
        {
            let hash = fnv1a(word.to_lowercase().as_bytes());
            let bucket = (hash % self.dimensions as u64) as usize;
            let sign = if hash >> 63 == 0 { 1.0 } else { -1.0 };
            vec[bucket] += sign;
        }
        let magnitude: f32 = vec.iter().map(|x| x * x).sum::<f32>().sqrt();
        if magnitude > 0.0 {
            for x in &mut vec {
                *x /= magnitude;
            }
        }
        vec
    }
}

impl Default for FakeEmbeddings {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait]
impl EmbeddingProvider for FakeEmbeddings {
    fn provider_name(&self) -> &str {
        "fake"
    }

    async fn embed_batch(&self, inputs: &[String]) -> Result<Vec<Vec<f32>>, ProviderError> {
        Ok(inputs.iter().map(|t| self.embed_text(t)).collect())
    }
}

fn fnv1a(bytes: &[u8]) -> u64 {
    let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
    for b in bytes {
        hash ^= u64::from(*b);
        hash = hash.wrapping_mul(0x0000_0100_0000_01b3);
    }
    hash
}

#[cfg(test)]
mod tests {
    use super::*;

    fn dot(a: &[f32], b: &[f32]) -> f32 {
        a.iter().zip(b).map(|(x, y)| x * y).sum()
    }

    #[test]
    fn test_deterministic_and_normalized() {
        let fake = FakeEmbeddings::new(32);
        let a = fake.embed_text("Rust async runtime");
        assert_eq!(a, fake.embed_text("rust ASYNC runtime"));
        assert_eq!(a.len(), 32);
        assert!((dot(&a, &a) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn test_shared_words_score_higher() {
        let fake = FakeEmbeddings::default();
        let query = fake.embed_text("vector database");
        let close = fake.embed_text("a fast vector database engine");
        let far = fake.embed_text("banana bread recipe");
        assert!(dot(&query, &close) > dot(&query, &far));
    }

    #[test]
    fn test_empty_text_is_zero_vector() {
        let fake = FakeEmbeddings::new(8);
        assert!(fake.embed_text("  ").iter().all(|x| *x == 0.0));
    }

    #[tokio::test]
    async fn test_batch_preserves_order() {
        let fake = FakeEmbeddings::new(16);
        let inputs = vec!["one".to_string(), "two".to_string()];
        let vectors = fake.embed_batch(&inputs).await.unwrap();
        assert_eq!(vectors, vec![fake.embed_text("one"), fake.embed_text("two")]);
    }
}
