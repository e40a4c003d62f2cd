pub mod config;
pub mod error;

pub use config::KageConfig;
pub use error::{KageError, KageResult};
