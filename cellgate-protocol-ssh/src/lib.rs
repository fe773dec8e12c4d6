pub mod channels;
mod common;
mod compat;
mod daemon;
mod error;
pub mod forwarding;
mod idle;
mod keys;
mod proxy;
pub mod resolver;
mod server;

pub use common::*;
pub use daemon::DaemonConnectionHandler;
pub use error::*;
pub use idle::IdleTimeoutStream;
pub use keys::*;
pub use proxy::{
    connect_backend, BackendConnection, BackendHandler, ProxyChannelHandler,
    ProxyConnectionHandler, ProxyState,
};
pub use server::{ssh_server_config, ConnectionHandler, ConnectionServer, ServerStream};
