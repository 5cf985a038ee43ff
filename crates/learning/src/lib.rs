//! # Conductor Learning
//!
//! The experience store (lessons and workflow templates), its JSON
//! snapshot persistence, and the approval gate that keeps a human between
//! proposed and approved lessons.

pub mod gate;
pub mod persistence;
pub mod store;

pub use gate::{ApprovalGate, ChannelReviewSurface, LogReviewSurface, ReviewItem};
pub use persistence::{Snapshot, SnapshotFile};
pub use store::{ExperienceStore, Proposal, RunOutcome, StoreSettings};
