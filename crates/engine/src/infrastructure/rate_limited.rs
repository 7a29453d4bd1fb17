//! Rate-limited wrappers around the provider ports.
//!
//! Any concrete provider client can be wrapped so that every call first
//! claims a slot in a shared [`RateLimiter`] window. Stages stay unaware of
//! throttling; the wrapper is applied at wiring time.

use std::sync::Arc;

use async_trait::async_trait;

use super::ports::{
    ImageGenPort, ImageRequest, ImageResult, MusicGenPort, MusicResult, ProviderError,
    SpeechGenPort, SpeechRequest, SpeechResult, TextGenPort, TextGenRequest,
};
use super::rate_limit::RateLimiter;

pub struct RateLimited<P> {
    inner: P,
    limiter: Arc<RateLimiter>,
}

impl<P> RateLimited<P> {
    pub fn new(inner: P, limiter: Arc<RateLimiter>) -> Self {
        Self { inner, limiter }
    }
}

#[async_trait]
impl<P: TextGenPort> TextGenPort for RateLimited<P> {
    async fn generate(&self, request: TextGenRequest) -> Result<String, ProviderError> {
        self.limiter.acquire().await;
        self.inner.generate(request).await
    }
}

#[async_trait]
impl<P: ImageGenPort> ImageGenPort for RateLimited<P> {
    async fn generate(&self, request: ImageRequest) -> Result<ImageResult, ProviderError> {
        self.limiter.acquire().await;
        self.inner.generate(request).await
    }
}

#[async_trait]
impl<P: SpeechGenPort> SpeechGenPort for RateLimited<P> {
    async fn generate(&self, request: SpeechRequest) -> Result<SpeechResult, ProviderError> {
        self.limiter.acquire().await;
        self.inner.generate(request).await
    }
}

#[async_trait]
impl<P: MusicGenPort> MusicGenPort for RateLimited<P> {
    async fn generate(&self, prompt: String) -> Result<MusicResult, ProviderError> {
        self.limiter.acquire().await;
        self.inner.generate(prompt).await
    }
}
