pub mod handlers;
pub mod inference;

pub use inference::InferenceClient;
