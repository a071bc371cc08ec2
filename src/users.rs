//! Parent accounts and child profiles.

pub mod handlers;
