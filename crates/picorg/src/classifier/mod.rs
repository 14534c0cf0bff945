//! Image classification behind the narrow [`ModelClient`] capability.
//!
//! The pipeline only ever sees `classify(bytes) -> Classification`. The
//! concrete runtime (a local Ollama server) and the deadline wrapper live in
//! submodules.

pub mod deadline;
pub mod ollama;
pub mod response;

use serde::{Deserialize, Serialize};

use crate::error::ClassificationError;

pub use deadline::TimeoutClient;
pub use ollama::OllamaClient;

/// What the model said about one image.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub description: String,
    pub category: Option<String>,
    /// Always within `[0, 1]`.
    pub confidence: f32,
}

/// A vision model that can describe and categorize an image.
///
/// Implementations must be callable from several worker threads at once.
pub trait ModelClient: Send + Sync {
    /// Classifies raw image bytes. `format_hint` is a MIME type such as
    /// `image/jpeg` when known.
    fn classify(
        &self,
        image: &[u8],
        format_hint: Option<&str>,
    ) -> Result<Classification, ClassificationError>;

    /// Short name for logs.
    fn name(&self) -> &str {
        "model"
    }
}
