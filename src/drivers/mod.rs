//! Role drivers: one module per connect/listen role, each responsible for
//! establishing its side of the relay and handing off to
//! [`crate::pipeline::forward`] (`SPEC_FULL.md` §5.2–§5.5).
//!
//! A connect driver owns a reconnect loop and runs on its own spawned
//! thread. A listen driver binds synchronously — so a bind failure at
//! startup can be reported back to the caller of [`crate::RelayEngine::start`]
//! as a fatal error — then spawns its own accept loop.

pub mod downstream_connect;
pub mod downstream_listen;
pub mod upstream_connect;
pub mod upstream_listen;

use std::net::TcpListener;

use crate::error::Result;

/// Bind a `TcpListener` with `SO_REUSEADDR` set before bind, so a relay can
/// be restarted immediately after a crash without waiting out `TIME_WAIT`.
/// Plain `std::net::TcpListener::bind` offers no way to set a socket option
/// pre-bind, hence the detour through `socket2`.
pub(crate) fn bind_reuseaddr(host: &str, port: u16, backlog: i32) -> Result<TcpListener> {
    use socket2::{Domain, Socket, Type};
    use std::net::{SocketAddr, ToSocketAddrs};

    let addr: SocketAddr = (host, port)
        .to_socket_addrs()?
        .next()
        .ok_or_else(|| crate::Error::Config(format!("`{host}:{port}` resolves to no address")))?;

    let domain = if addr.is_ipv6() { Domain::IPV6 } else { Domain::IPV4 };
    let socket = Socket::new(domain, Type::STREAM, None)?;
    socket.set_reuse_address(true)?;
    socket.bind(&addr.into())?;
    socket.listen(backlog)?;
    Ok(socket.into())
}
