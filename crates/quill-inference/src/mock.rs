//! Mock inference backend for deterministic testing.
//!
//! Generates deterministic chunking results and embeddings, records every
//! call, and can be switched into failure modes while a test runs. It also
//! tracks how many calls for the same input overlap, which is how pipeline
//! tests check that one item is never processed twice at once.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use quill_inference::mock::MockInferenceBackend;
//! use quill_core::{ChunkingBackend, EmbeddingBackend};
//!
//! #[tokio::test]
//! async fn test_with_mock_backend() {
//!     let backend = MockInferenceBackend::new().with_dimension(8);
//!
//!     let result = backend.chunk("first part\n\nsecond part").await.unwrap();
//!     assert_eq!(result.chunks.len(), 2);
//!
//!     let embeddings = backend.embed_document(&result.title, &result.chunks).await.unwrap();
//!     assert_eq!(embeddings.vectors.len(), 2);
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;

use quill_core::{
    ChunkResult, ChunkingBackend, DocumentEmbeddings, EmbeddingBackend, Error, InferenceBackend,
    Result, TokenUsage, Vector,
};

const MOCK_MODEL: &str = "mock-model";

/// Deterministic provider for pipeline tests. Clones share call log and
/// failure switches.
#[derive(Clone)]
pub struct MockInferenceBackend {
    config: Arc<MockConfig>,
    state: Arc<MockState>,
}

#[derive(Debug, Clone)]
struct MockConfig {
    dimension: usize,
    chunk_result: Option<ChunkResult>,
    latency_ms: u64,
    failure_rate: f64,
}

#[derive(Debug, Default)]
struct MockState {
    call_log: Mutex<Vec<MockCall>>,
    fail_chunk: AtomicBool,
    fail_embed: AtomicBool,
    vector_count: Mutex<Option<usize>>,
    active: Mutex<HashMap<String, usize>>,
    max_concurrent: AtomicUsize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MockOp {
    Chunk,
    Embed,
}

/// One recorded provider call. Embed inputs are the texts joined by U+001F.
#[derive(Debug, Clone)]
pub struct MockCall {
    pub op: MockOp,
    pub input: String,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            dimension: 384,
            chunk_result: None,
            latency_ms: 0,
            failure_rate: 0.0,
        }
    }
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// Marks one in-progress call for `key`; released on drop.
struct ActiveCall<'a> {
    state: &'a MockState,
    key: String,
}

impl<'a> ActiveCall<'a> {
    fn enter(state: &'a MockState, key: String) -> Self {
        let mut active = lock(&state.active);
        let count = active.entry(key.clone()).or_insert(0);
        *count += 1;
        state.max_concurrent.fetch_max(*count, Ordering::SeqCst);
        drop(active);
        Self { state, key }
    }
}

impl Drop for ActiveCall<'_> {
    fn drop(&mut self) {
        let mut active = lock(&self.state.active);
        if let Some(count) = active.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                active.remove(&self.key);
            }
        }
    }
}

impl MockInferenceBackend {
    pub fn new() -> Self {
        Self {
            config: Arc::new(MockConfig::default()),
            state: Arc::new(MockState::default()),
        }
    }

    pub fn with_dimension(mut self, dimension: usize) -> Self {
        Arc::make_mut(&mut self.config).dimension = dimension;
        self
    }

    /// Return this result from every chunk call instead of splitting the input.
    pub fn with_chunk_result(mut self, result: ChunkResult) -> Self {
        Arc::make_mut(&mut self.config).chunk_result = Some(result);
        self
    }

    /// Sleep this long inside every call, before failure checks.
    pub fn with_latency_ms(mut self, latency_ms: u64) -> Self {
        Arc::make_mut(&mut self.config).latency_ms = latency_ms;
        self
    }

    /// Fail this fraction of calls at random, on top of the forced switches.
    pub fn with_failure_rate(mut self, rate: f64) -> Self {
        Arc::make_mut(&mut self.config).failure_rate = rate.clamp(0.0, 1.0);
        self
    }

    /// Make every chunk call fail until [`set_fail_chunk`](Self::set_fail_chunk) clears it.
    pub fn failing_chunk(self) -> Self {
        self.set_fail_chunk(true);
        self
    }

    /// Make every embed call fail until [`set_fail_embed`](Self::set_fail_embed) clears it.
    pub fn failing_embed(self) -> Self {
        self.set_fail_embed(true);
        self
    }

    /// Return exactly `n` vectors from every embed call, regardless of input.
    pub fn with_vector_count(self, n: usize) -> Self {
        self.set_vector_count(Some(n));
        self
    }

    pub fn set_fail_chunk(&self, fail: bool) {
        self.state.fail_chunk.store(fail, Ordering::SeqCst);
    }

    pub fn set_fail_embed(&self, fail: bool) {
        self.state.fail_embed.store(fail, Ordering::SeqCst);
    }

    pub fn set_vector_count(&self, n: Option<usize>) {
        *lock(&self.state.vector_count) = n;
    }

    pub fn calls(&self) -> Vec<MockCall> {
        lock(&self.state.call_log).clone()
    }

    pub fn chunk_call_count(&self) -> usize {
        self.count_calls(MockOp::Chunk)
    }

    pub fn embed_call_count(&self) -> usize {
        self.count_calls(MockOp::Embed)
    }

    /// Highest number of calls ever in progress at once for the same input.
    pub fn max_concurrent_per_input(&self) -> usize {
        self.state.max_concurrent.load(Ordering::SeqCst)
    }

    fn count_calls(&self, op: MockOp) -> usize {
        lock(&self.state.call_log)
            .iter()
            .filter(|c| c.op == op)
            .count()
    }

    fn record(&self, op: MockOp, input: &str) {
        lock(&self.state.call_log).push(MockCall {
            op,
            input: input.to_string(),
        });
    }

    fn should_fail(&self, forced: &AtomicBool) -> bool {
        use rand::Rng;
        forced.load(Ordering::SeqCst)
            || (self.config.failure_rate > 0.0
                && rand::thread_rng().gen_bool(self.config.failure_rate))
    }

    async fn delay(&self) {
        if self.config.latency_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(self.config.latency_ms)).await;
        }
    }

    /// Split on blank lines; the first line becomes the title.
    fn default_chunk_result(text: &str) -> ChunkResult {
        let chunks: Vec<String> = text
            .split("\n\n")
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(String::from)
            .collect();
        let title: String = text
            .lines()
            .next()
            .unwrap_or_default()
            .trim_start_matches('#')
            .trim()
            .chars()
            .take(40)
            .collect();

        ChunkResult {
            title,
            tags: Vec::new(),
            chunks,
            date_time: String::new(),
            model: MOCK_MODEL.to_string(),
            usage: None,
        }
    }
}

/// Whitespace-separated words stand in for tokens.
fn word_count<'a>(texts: impl IntoIterator<Item = &'a str>) -> i32 {
    let words: usize = texts.into_iter().map(|t| t.split_whitespace().count()).sum();
    i32::try_from(words).unwrap_or(i32::MAX)
}

impl Default for MockInferenceBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChunkingBackend for MockInferenceBackend {
    async fn chunk(&self, text: &str) -> Result<ChunkResult> {
        self.record(MockOp::Chunk, text);
        let _active = ActiveCall::enter(&self.state, format!("chunk:{}", text));
        self.delay().await;

        if self.should_fail(&self.state.fail_chunk) {
            return Err(Error::Inference("simulated chunk failure".to_string()));
        }

        let mut result = self
            .config
            .chunk_result
            .clone()
            .unwrap_or_else(|| Self::default_chunk_result(text));
        if result.model.is_empty() {
            result.model = MOCK_MODEL.to_string();
        }
        if result.usage.is_none() {
            result.usage = Some(TokenUsage {
                prompt_tokens: word_count([text]),
                completion_tokens: word_count(result.chunks.iter().map(String::as_str)),
            });
        }
        Ok(result)
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL
    }
}

#[async_trait]
impl EmbeddingBackend for MockInferenceBackend {
    async fn embed_document(&self, title: &str, texts: &[String]) -> Result<DocumentEmbeddings> {
        let joined = texts.join("\u{1f}");
        self.record(MockOp::Embed, &joined);
        let _active = ActiveCall::enter(&self.state, format!("embed:{}:{}", title, joined));
        self.delay().await;

        if self.should_fail(&self.state.fail_embed) {
            return Err(Error::Embedding("simulated embed failure".to_string()));
        }

        let count = lock(&self.state.vector_count).unwrap_or(texts.len());
        let vectors = (0..count)
            .map(|i| {
                let text = texts.get(i).map(String::as_str).unwrap_or(title);
                Vector::from(deterministic_vector(text, self.config.dimension))
            })
            .collect();
        Ok(DocumentEmbeddings {
            vectors,
            model: MOCK_MODEL.to_string(),
            usage: Some(TokenUsage {
                prompt_tokens: word_count(texts.iter().map(String::as_str)),
                completion_tokens: 0,
            }),
        })
    }

    fn dimension(&self) -> usize {
        self.config.dimension
    }

    fn model_name(&self) -> &str {
        MOCK_MODEL
    }
}

#[async_trait]
impl InferenceBackend for MockInferenceBackend {
    async fn health_check(&self) -> Result<bool> {
        Ok(true)
    }
}

/// Unit-length vector derived from character positions; equal text gives
/// equal vectors.
pub fn deterministic_vector(text: &str, dimension: usize) -> Vec<f32> {
    let dimension = dimension.max(1);
    let mut v = vec![0.0f32; dimension];
    for (i, c) in text.chars().enumerate() {
        v[(c as usize).wrapping_add(i) % dimension] += 1.0;
    }

    let norm = v.iter().map(|x| x * x).sum::<f32>().sqrt();
    if norm > 0.0 {
        for x in &mut v {
            *x /= norm;
        }
    }
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_default_chunking_splits_paragraphs() {
        let backend = MockInferenceBackend::new();
        let result = backend
            .chunk("# Docker\n\ndeployment notes\n\n")
            .await
            .unwrap();
        assert_eq!(result.title, "Docker");
        assert_eq!(result.chunks, vec!["# Docker", "deployment notes"]);
        assert!(result.date_time.is_empty());
    }

    #[tokio::test]
    async fn test_fixed_chunk_result() {
        let fixed = ChunkResult {
            title: "Docker".to_string(),
            chunks: vec!["...".to_string()],
            ..Default::default()
        };
        let backend = MockInferenceBackend::new().with_chunk_result(fixed.clone());
        let result = backend.chunk("anything").await.unwrap();
        assert_eq!(result.title, fixed.title);
        assert_eq!(result.chunks, fixed.chunks);
    }

    #[tokio::test]
    async fn test_embed_one_vector_per_text() {
        let backend = MockInferenceBackend::new().with_dimension(16);
        let texts = vec!["a".to_string(), "b".to_string(), "c".to_string()];
        let embeddings = backend.embed_document("t", &texts).await.unwrap();
        assert_eq!(embeddings.vectors.len(), 3);
        assert!(embeddings.vectors.iter().all(|v| v.as_slice().len() == 16));
    }

    #[tokio::test]
    async fn test_vector_count_override() {
        let backend = MockInferenceBackend::new().with_vector_count(1);
        let texts = vec!["a".to_string(), "b".to_string()];
        let embeddings = backend.embed_document("t", &texts).await.unwrap();
        assert_eq!(embeddings.vectors.len(), 1);

        backend.set_vector_count(None);
        let embeddings = backend.embed_document("t", &texts).await.unwrap();
        assert_eq!(embeddings.vectors.len(), 2);
    }

    #[tokio::test]
    async fn test_failure_toggles() {
        let backend = MockInferenceBackend::new().failing_chunk().failing_embed();
        assert!(matches!(
            backend.chunk("x").await.unwrap_err(),
            Error::Inference(_)
        ));
        assert!(matches!(
            backend.embed_document("t", &["x".to_string()]).await.unwrap_err(),
            Error::Embedding(_)
        ));

        backend.set_fail_chunk(false);
        assert!(backend.chunk("x").await.is_ok());
        assert_eq!(backend.chunk_call_count(), 2);
        assert_eq!(backend.embed_call_count(), 1);
    }

    #[tokio::test]
    async fn test_reports_word_counts_as_usage() {
        let backend = MockInferenceBackend::new();
        let result = backend.chunk("rollout plan\n\nfreeze window").await.unwrap();
        assert_eq!(result.model, "mock-model");
        assert_eq!(
            result.usage,
            Some(TokenUsage {
                prompt_tokens: 4,
                completion_tokens: 4
            })
        );

        let texts = vec!["one two".to_string(), "three".to_string()];
        let embeddings = backend.embed_document("t", &texts).await.unwrap();
        assert_eq!(embeddings.usage.map(|u| u.prompt_tokens), Some(3));
        assert_eq!(embeddings.usage.map(|u| u.completion_tokens), Some(0));
    }

    #[tokio::test]
    async fn test_failure_rate_one_always_fails() {
        let backend = MockInferenceBackend::new().with_failure_rate(1.0);
        assert!(backend.chunk("x").await.is_err());
    }

    #[tokio::test(start_paused = true)]
    async fn test_concurrency_tracking_per_input() {
        let backend = MockInferenceBackend::new().with_latency_ms(50);

        let (a, b, c) = tokio::join!(
            backend.chunk("same"),
            backend.chunk("same"),
            backend.chunk("other")
        );
        assert!(a.is_ok() && b.is_ok() && c.is_ok());
        assert_eq!(backend.max_concurrent_per_input(), 2);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sequential_calls_do_not_overlap() {
        let backend = MockInferenceBackend::new().with_latency_ms(50);
        backend.chunk("same").await.unwrap();
        backend.chunk("same").await.unwrap();
        assert_eq!(backend.max_concurrent_per_input(), 1);
    }

    #[test]
    fn test_deterministic_vector_is_stable_and_unit_length() {
        let a = deterministic_vector("rollout checklist", 32);
        assert_eq!(a, deterministic_vector("rollout checklist", 32));
        assert_ne!(a, deterministic_vector("incident review", 32));
        let norm: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!((norm - 1.0).abs() < 1e-4);
    }

    #[tokio::test]
    async fn test_calls_are_recorded_in_order() {
        let backend = MockInferenceBackend::new();
        backend.chunk("one").await.unwrap();
        backend
            .embed_document("t", &["a".to_string(), "b".to_string()])
            .await
            .unwrap();

        let calls = backend.calls();
        assert_eq!(calls[0].op, MockOp::Chunk);
        assert_eq!(calls[1].op, MockOp::Embed);
        assert_eq!(calls[1].input, "a\u{1f}b");
    }
}
