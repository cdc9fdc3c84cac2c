pub mod config;
pub mod error;
pub mod registry;

pub use error::Error;
pub type Result<T> = std::result::Result<T, Error>;
