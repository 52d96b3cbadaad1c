pub mod http;

pub use http::*;

use async_trait::async_trait;
use thiserror::Error;

/// Failures at the text-completion seam.
///
/// The protocol layer never retries these and never propagates them: every
/// scoring path degrades to its deterministic fallback instead.
#[derive(Debug, Error)]
pub enum CompletionError {
    #[error("completion request failed: {0}")]
    Transport(String),

    #[error("completion service returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("completion response was empty or not text")]
    Empty,
}

/// Narrow contract to the hosted text-completion service.
///
/// Takes a natural-language prompt, returns free-form text. Callers that
/// need structure (question lists, evaluations) parse the text themselves,
/// tolerating markdown code fences.
#[async_trait]
pub trait TextCompletion: Send + Sync {
    async fn complete(&self, prompt: &str) -> Result<String, CompletionError>;
}
