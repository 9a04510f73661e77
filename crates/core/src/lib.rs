//! Pageflow Core Library
//!
//! The prefetch engine: the single context object a reader or gallery UI
//! holds to decode ahead of the user, show the best available image and
//! keep caches consistent across collection switches.

pub mod engine;
pub mod error;
pub mod events;

pub use engine::{Displayable, PrefetchEngine};
pub use error::EngineError;
pub use events::{EngineEvent, EngineEvents};

// The component crates, for callers that need their types directly
pub use pageflow_cache as cache;
pub use pageflow_scheduler as scheduler;
