//! Learning analytics: windowed per-child summaries, milestones, learning
//! progress and parent reviews.

pub mod aggregate;
pub mod handlers;
