//! An `Endpoint`-bound UDP socket.

use std::io::ErrorKind;
use std::net::SocketAddr;

use knode_id::Endpoint;
use tokio::net::UdpSocket;

use crate::NetError;

/// Maximum safe UDP payload: Ethernet MTU 1500 − IPv6 header 40 − UDP header 8.
pub const SAFE_PAYLOAD_SIZE: usize = 1452;

/// A bound, receive-buffered UDP channel.
///
/// Two channels may exist per engine, one per address family; IPv6 is
/// optional. The receive buffer is reused between calls to [`Channel::receive`]
/// and must be fully overwritten before it is inspected again.
pub struct Channel {
    socket: UdpSocket,
    local_addr: Endpoint,
    recv_buf: [u8; SAFE_PAYLOAD_SIZE],
}

impl Channel {
    /// Bind a new channel to `bind_addr`.
    pub async fn bind(bind_addr: SocketAddr) -> Result<Self, NetError> {
        let socket = UdpSocket::bind(bind_addr)
            .await
            .map_err(|e| NetError::Io(e.to_string()))?;
        let local_addr = Endpoint::from(
            socket
                .local_addr()
                .map_err(|e| NetError::Io(e.to_string()))?,
        );

        tracing::info!(%local_addr, "UDP channel bound");

        Ok(Self {
            socket,
            local_addr,
            recv_buf: [0u8; SAFE_PAYLOAD_SIZE],
        })
    }

    /// Resolve `host` and bind an IPv4 channel at `port` (`0` for an
    /// ephemeral port).
    ///
    /// Fails with [`NetError::InvalidAddress`] if `host` resolves to no
    /// IPv4 endpoint.
    pub async fn ipv4(host: &str, port: u16) -> Result<Self, NetError> {
        let endpoint = resolve(host, port)?
            .into_iter()
            .find(|e| e.is_ipv4())
            .ok_or_else(|| NetError::InvalidAddress(format!("no IPv4 address for {host}")))?;
        Self::bind(endpoint.as_socket_addr()).await
    }

    /// Resolve `host` and bind an IPv6 channel at `port` (`0` for an
    /// ephemeral port).
    ///
    /// Fails with [`NetError::InvalidAddress`] if `host` resolves to no
    /// IPv6 endpoint.
    pub async fn ipv6(host: &str, port: u16) -> Result<Self, NetError> {
        let endpoint = resolve(host, port)?
            .into_iter()
            .find(|e| e.is_ipv6())
            .ok_or_else(|| NetError::InvalidAddress(format!("no IPv6 address for {host}")))?;
        Self::bind(endpoint.as_socket_addr()).await
    }

    /// The endpoint this channel is bound to.
    pub fn local_addr(&self) -> Endpoint {
        self.local_addr
    }

    /// Send `bytes` to `destination`.
    ///
    /// Fails with [`NetError::TooLarge`] if the payload exceeds
    /// [`SAFE_PAYLOAD_SIZE`].
    pub async fn send(&self, bytes: &[u8], destination: Endpoint) -> Result<(), NetError> {
        if bytes.len() > SAFE_PAYLOAD_SIZE {
            return Err(NetError::TooLarge {
                len: bytes.len(),
                max: SAFE_PAYLOAD_SIZE,
            });
        }
        self.socket
            .send_to(bytes, destination.as_socket_addr())
            .await
            .map_err(|e| NetError::Io(e.to_string()))?;
        Ok(())
    }

    /// Receive the next datagram, yielding its sender and bytes.
    ///
    /// On platforms where sending to a closed remote port surfaces as a
    /// `ConnectionReset`-style error on the *next* receive, that error is
    /// suppressed and another receive is scheduled transparently.
    pub async fn receive(&mut self) -> Result<(Endpoint, Vec<u8>), NetError> {
        loop {
            match self.socket.recv_from(&mut self.recv_buf).await {
                Ok((len, from)) => {
                    return Ok((Endpoint::from(from), self.recv_buf[..len].to_vec()));
                }
                Err(e) if is_connection_reset(&e) => {
                    tracing::debug!("suppressed connection-reset style error on receive");
                    continue;
                }
                Err(e) => return Err(NetError::Io(e.to_string())),
            }
        }
    }
}

fn is_connection_reset(e: &std::io::Error) -> bool {
    matches!(e.kind(), ErrorKind::ConnectionReset) || e.raw_os_error() == Some(10054)
}

/// Resolve `host:service` to a list of candidate endpoints.
pub fn resolve(host: &str, service: u16) -> Result<Vec<Endpoint>, NetError> {
    use std::net::ToSocketAddrs;
    let addrs = (host, service)
        .to_socket_addrs()
        .map_err(|e| NetError::InvalidAddress(e.to_string()))?
        .map(Endpoint::from)
        .collect::<Vec<_>>();
    if addrs.is_empty() {
        return Err(NetError::InvalidAddress(format!(
            "no addresses found for {host}:{service}"
        )));
    }
    Ok(addrs)
}
