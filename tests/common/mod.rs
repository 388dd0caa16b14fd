//! Deterministic stand-ins for the hosted providers.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use campus_rag::embedding::EmbeddingProvider;
use campus_rag::error::{ProviderErrorKind, RagError, Result};
use campus_rag::generation::AnswerGenerator;

pub const DIMS: usize = 512;

/// Embeds text as hashed character unigram and bigram counts, so texts
/// sharing characters end up close.
#[derive(Default)]
pub struct HashEmbedder {
    pub calls: AtomicUsize,
    pub texts: AtomicUsize,
}

impl HashEmbedder {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

fn bucket(s: &str) -> usize {
    let mut hash: u64 = 0xcbf29ce484222325;
    for b in s.as_bytes() {
        hash ^= *b as u64;
        hash = hash.wrapping_mul(0x100000001b3);
    }
    (hash % DIMS as u64) as usize
}

pub fn hash_embed(text: &str) -> Vec<f32> {
    let chars: Vec<char> = text.chars().filter(|c| !c.is_whitespace()).collect();
    let mut v = vec![0.0f32; DIMS];
    for c in &chars {
        v[bucket(&c.to_string())] += 1.0;
    }
    for pair in chars.windows(2) {
        v[bucket(&pair.iter().collect::<String>())] += 1.0;
    }
    v
}

#[async_trait]
impl EmbeddingProvider for HashEmbedder {
    fn model_name(&self) -> &str {
        "hash-bigram"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.texts.fetch_add(texts.len(), Ordering::SeqCst);
        Ok(texts.iter().map(|t| hash_embed(t)).collect())
    }
}

/// Answers with the context section of the prompt, so anything retrieved
/// shows up in the answer.
#[derive(Default)]
pub struct EchoGenerator {
    pub calls: AtomicUsize,
}

impl EchoGenerator {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AnswerGenerator for EchoGenerator {
    fn model_name(&self) -> &str {
        "echo"
    }

    async fn generate(&self, prompt: &str) -> Result<String> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let context = prompt
            .split("上下文：\n")
            .nth(1)
            .and_then(|rest| rest.split("\n\n问题：").next())
            .unwrap_or("");
        Ok(format!("根据资料：{}", context))
    }
}

/// Always fails with the given provider error kind.
pub struct FailingGenerator(pub ProviderErrorKind);

#[async_trait]
impl AnswerGenerator for FailingGenerator {
    fn model_name(&self) -> &str {
        "failing"
    }

    async fn generate(&self, _prompt: &str) -> Result<String> {
        Err(RagError::provider("fake", self.0, "generation failed"))
    }
}

/// Embeds like [`HashEmbedder`] for the first `succeed` calls, then fails
/// every call with `kind`.
pub struct FailingEmbedder {
    pub kind: ProviderErrorKind,
    pub succeed: usize,
    pub calls: AtomicUsize,
}

impl FailingEmbedder {
    pub fn always(kind: ProviderErrorKind) -> Arc<Self> {
        Self::after(0, kind)
    }

    pub fn after(succeed: usize, kind: ProviderErrorKind) -> Arc<Self> {
        Arc::new(Self {
            kind,
            succeed,
            calls: AtomicUsize::new(0),
        })
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EmbeddingProvider for FailingEmbedder {
    fn model_name(&self) -> &str {
        "hash-bigram"
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst);
        if n < self.succeed {
            return Ok(texts.iter().map(|t| hash_embed(t)).collect());
        }
        Err(RagError::provider("fake", self.kind, "embedding failed"))
    }
}
