pub mod analytics;
pub mod chats;
pub mod database;
pub mod devices;
pub mod tokens;
pub mod types;
pub mod users;

pub use database::Database;
