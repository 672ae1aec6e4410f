pub mod api;
pub mod error;

pub use api::LibraryClient;
pub use error::ApiError;
