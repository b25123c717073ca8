//! TCP socket setup for the listener and accepted connections.
//!
//! [`SocketConfig`] carries the options applied to every socket:
//! `SO_REUSEADDR` on the listener so a restarted server can rebind while old
//! connections linger in `TIME_WAIT`, and `TCP_NODELAY` plus keepalive on
//! each accepted stream so short protocol lines go out immediately and dead
//! peers are eventually noticed by the kernel.

use std::net::SocketAddr;
use std::time::Duration;

use socket2::{SockRef, TcpKeepalive};
use tokio::net::{TcpListener, TcpStream};

/// Socket options applied by [`create_listener`] and [`configure_stream`].
#[derive(Debug, Clone)]
pub struct SocketConfig {
    /// Disable Nagle's algorithm. Default: true.
    pub tcp_nodelay: bool,
    /// Enable TCP keepalive. Default: true.
    pub keepalive_enabled: bool,
    /// Idle time before the first keepalive probe. Default: 60s.
    pub keepalive_idle: Duration,
    /// Keepalive probe interval. Default: 10s.
    pub keepalive_interval: Duration,
    /// Probes before the kernel drops the connection. Default: 3.
    pub keepalive_retries: u32,
    /// Enable `SO_REUSEADDR` on the listener. Default: true on Linux/macOS, false on Windows.
    pub reuse_addr: bool,
    /// Pending-connection queue length passed to `listen`. Default: 10.
    pub backlog: i32,
}

impl Default for SocketConfig {
    fn default() -> Self {
        Self {
            tcp_nodelay: true,
            keepalive_enabled: true,
            keepalive_idle: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            keepalive_retries: 3,
            reuse_addr: !cfg!(target_os = "windows"),
            backlog: 10,
        }
    }
}

/// Apply socket configuration to an accepted [`TcpStream`].
pub fn configure_stream(stream: &TcpStream, config: &SocketConfig) -> std::io::Result<()> {
    stream.set_nodelay(config.tcp_nodelay)?;

    if config.keepalive_enabled {
        let sock_ref = SockRef::from(stream);
        let keepalive = TcpKeepalive::new()
            .with_time(config.keepalive_idle)
            .with_interval(config.keepalive_interval);

        // Retries are supported on Linux and Windows but not macOS.
        #[cfg(any(target_os = "linux", target_os = "windows"))]
        let keepalive = keepalive.with_retries(config.keepalive_retries);

        sock_ref.set_tcp_keepalive(&keepalive)?;
    }

    Ok(())
}

/// Create, bind and listen on a server socket.
pub async fn create_listener(addr: SocketAddr, config: &SocketConfig) -> std::io::Result<TcpListener> {
    let domain = if addr.is_ipv6() {
        socket2::Domain::IPV6
    } else {
        socket2::Domain::IPV4
    };
    let socket = socket2::Socket::new(domain, socket2::Type::STREAM, Some(socket2::Protocol::TCP))?;

    if config.reuse_addr {
        socket.set_reuse_address(true)?;
    }

    // Accept IPv4 clients too when bound to an IPv6 wildcard.
    if addr.is_ipv6() {
        socket.set_only_v6(false)?;
    }

    socket.set_nonblocking(true)?;
    socket.bind(&addr.into())?;
    socket.listen(config.backlog)?;
    tracing::debug!("Listening socket ready on {addr} (backlog {})", config.backlog);

    let std_listener: std::net::TcpListener = socket.into();
    TcpListener::from_std(std_listener)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn loopback() -> SocketAddr {
        "127.0.0.1:0".parse().unwrap()
    }

    #[tokio::test]
    async fn test_listener_accepts_connections() {
        let config = SocketConfig::default();
        let listener = create_listener(loopback(), &config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let _c1 = TcpStream::connect(addr).await.unwrap();
        let _c2 = TcpStream::connect(addr).await.unwrap();

        let (s1, _) = listener.accept().await.unwrap();
        let (s2, _) = listener.accept().await.unwrap();
        configure_stream(&s1, &config).unwrap();
        configure_stream(&s2, &config).unwrap();
        assert!(s1.nodelay().unwrap(), "TCP_NODELAY should be enabled");
    }

    #[tokio::test]
    async fn test_keepalive_is_configured() {
        let config = SocketConfig {
            keepalive_idle: Duration::from_secs(30),
            keepalive_interval: Duration::from_secs(5),
            ..Default::default()
        };
        let listener = create_listener(loopback(), &config).await.unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap())
            .await
            .unwrap();
        configure_stream(&client, &config).unwrap();

        let keepalive = SockRef::from(&client).keepalive().unwrap();
        assert!(keepalive, "Keepalive should be enabled");
    }

    #[tokio::test]
    async fn test_rebind_after_close() {
        let config = SocketConfig::default();
        let listener = create_listener(loopback(), &config).await.unwrap();
        let addr = listener.local_addr().unwrap();

        let client = TcpStream::connect(addr).await.unwrap();
        let (server_side, _) = listener.accept().await.unwrap();
        drop(server_side);
        drop(client);
        drop(listener);

        if config.reuse_addr {
            assert!(
                create_listener(addr, &config).await.is_ok(),
                "SO_REUSEADDR should allow rebinding the same port"
            );
        }
    }
}
