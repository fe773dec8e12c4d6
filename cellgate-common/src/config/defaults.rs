use std::net::{Ipv4Addr, SocketAddr};
use std::time::Duration;

use crate::ListenEndpoint;

pub(crate) const fn _default_true() -> bool {
    true
}

pub(crate) const fn _default_false() -> bool {
    false
}

#[inline]
pub(crate) fn _default_proxy_listen() -> ListenEndpoint {
    ListenEndpoint(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 2222)))
}

#[inline]
pub(crate) fn _default_daemon_listen() -> ListenEndpoint {
    ListenEndpoint(SocketAddr::from((Ipv4Addr::UNSPECIFIED, 2222)))
}

#[inline]
pub(crate) fn _default_health_check_listen() -> ListenEndpoint {
    ListenEndpoint(SocketAddr::from((Ipv4Addr::LOCALHOST, 2224)))
}

#[inline]
pub(crate) fn _default_idle_connection_timeout() -> Duration {
    Duration::from_secs(60 * 5)
}

#[inline]
pub(crate) fn _default_communication_timeout() -> Duration {
    Duration::from_secs(10)
}

#[inline]
pub(crate) fn _default_dial_timeout() -> Duration {
    Duration::from_secs(10)
}

#[inline]
pub(crate) fn _default_shutdown_grace() -> Duration {
    Duration::from_secs(10)
}
