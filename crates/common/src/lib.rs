pub mod error;
pub mod punch;
pub mod types;
