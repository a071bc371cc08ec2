pub mod analytics;
pub mod auth;
pub mod chat;
pub mod configuration;
pub mod devices;
pub mod error_handling;
pub mod storage;
pub mod users;
pub mod web_interface;
