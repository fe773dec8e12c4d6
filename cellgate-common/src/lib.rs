mod config;
mod error;
pub mod helpers;
mod permissions;
mod types;

pub use config::*;
pub use error::*;
pub use permissions::*;
pub use types::*;
