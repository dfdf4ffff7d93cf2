pub mod app;
pub mod cache;
pub mod chart;
pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod scheduler;
pub mod utils;

pub use error::{AppError, Result};
