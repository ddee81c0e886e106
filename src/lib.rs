pub mod config;
pub mod error;
pub mod fetch;
pub mod filter;
pub mod geocode;
pub mod pipeline;
pub mod reconcile;
pub mod store;
pub mod table;

pub use config::Config;
pub use error::{LicsyncError, Result};
