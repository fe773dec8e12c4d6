pub mod check;
mod common;
pub mod daemon;
pub mod healthcheck;
pub mod proxy;
