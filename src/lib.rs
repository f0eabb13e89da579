pub mod config;
pub mod database;
pub mod entities;
pub mod error;
pub mod kick;
pub mod models;
pub mod services;
pub mod sessions;
pub mod tasks;

pub use config::Config;
pub use error::{AppError, AppResult};
