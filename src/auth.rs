pub mod google;
pub mod handlers;
pub mod passwords;
pub mod tokens;

pub use google::GoogleVerifier;
pub use tokens::{TokenPair, TokenService};
