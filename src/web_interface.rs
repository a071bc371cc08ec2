pub mod filters;
pub mod types;
pub mod web_server;

pub use web_server::{AppState, WebServer};
