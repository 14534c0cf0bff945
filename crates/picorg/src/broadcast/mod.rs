//! Broadcasting of import events for real-time streaming.
//!
//! Any front end (CLI progress output, a UI) can subscribe; sending with no
//! subscribers is not an error.

pub mod import_progress;

pub use import_progress::{
    FileProgressTracker, ImportPhase, ImportProgressBroadcaster, ImportProgressEvent,
};
