//! Pageflow Scheduler Library
//!
//! Focus-driven render scheduling on top of the pageflow caches.
//!
//! The [`RenderQueue`] turns focus changes into staggered decode tiers around
//! the focus, serves them through a single worker in tier order and drops
//! anything scheduled for a focus the user has already left. The
//! [`ProgressiveLoader`] warms the blob pool further ahead once the user
//! dwells on one item, and the [`ThumbnailRequestor`] requests thumbnails for
//! whatever range a grid currently shows.
//!
//! # Example
//!
//! ```
//! use pageflow_scheduler::{TaskQueue, Tier};
//!
//! let mut queue = TaskQueue::new();
//! queue.push(7, Tier::Low, 1);
//! queue.push(5, Tier::Critical, 1);
//! queue.push(6, Tier::High, 1);
//!
//! // Served in tier order, focus first
//! assert_eq!(queue.pop().map(|t| t.index), Some(5));
//! assert_eq!(queue.pop().map(|t| t.index), Some(6));
//! assert_eq!(queue.pop().map(|t| t.index), Some(7));
//! ```

mod priority;
mod progressive;
mod queue;
mod tiers;
mod visibility;

// Re-export public API
pub use priority::{PushOutcome, QueueTask, TaskQueue, TaskStatus, Tier};
pub use progressive::{ProgressiveLoader, ProgressivePlan, ProgressiveState};
pub use queue::{QueueEvent, QueueStats, QueueStatus, RenderQueue};
pub use tiers::{TierPlan, TierRadii, TierStage};
pub use visibility::{
    order_by_center, RequestPriority, RequestorEvent, ThumbnailBatch, ThumbnailRequest,
    ThumbnailRequestor,
};
