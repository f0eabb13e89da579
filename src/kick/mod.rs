pub mod api;
pub mod client;
pub mod frames;

pub use api::KickApi;
pub use client::ChatClient;
