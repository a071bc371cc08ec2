//! Companion-device registry and session lifecycle.

pub mod handlers;
