use facecall_common::codec::MAX_DATAGRAM_PAYLOAD;
use facecall_common::frame::EncodedPacket;
use socket2::{Domain, Protocol, SockRef, Socket, Type};
use std::future::Future;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::watch;
use tracing::info;

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("failed to bind {addr}: {source}")]
    Bind {
        addr: SocketAddr,
        source: std::io::Error,
    },
    #[error("socket error: {0}")]
    Io(#[from] std::io::Error),
    #[error("packet of {len} bytes exceeds datagram limit of {max}")]
    Oversized { len: usize, max: usize },
    #[error("transport closed")]
    Closed,
}

/// One UDP flow per direction.
///
/// Inbound datagrams arrive on a socket bound to our receive port; outbound
/// datagrams leave from an ephemeral port towards the peer's receive port.
/// Nothing is acknowledged, ordered or retried.
#[derive(Debug)]
pub struct UdpTransport {
    inbound: UdpSocket,
    outbound: UdpSocket,
    peer: SocketAddr,
    closed: watch::Sender<bool>,
}

impl UdpTransport {
    /// Binds the inbound socket to `inbound_addr` and an ephemeral outbound
    /// socket. Both ask the kernel for `buffer_bytes` of send and receive
    /// buffer; the kernel may grant less. Must be called inside a tokio
    /// runtime.
    pub fn bind(
        inbound_addr: SocketAddr,
        peer: SocketAddr,
        buffer_bytes: usize,
    ) -> Result<Self, TransportError> {
        let inbound = bind_udp(inbound_addr, buffer_bytes)?;
        let outbound = bind_udp(SocketAddr::new(unspecified_like(peer.ip()), 0), buffer_bytes)?;

        let (closed, _) = watch::channel(false);
        let transport = Self {
            inbound,
            outbound,
            peer,
            closed,
        };
        let (recv_buffer, send_buffer) = transport.buffer_sizes()?;
        info!(
            inbound = %transport.inbound.local_addr()?,
            outbound = %transport.outbound.local_addr()?,
            peer = %peer,
            recv_buffer,
            send_buffer,
            "transport bound"
        );
        Ok(transport)
    }

    /// Effective kernel buffers: receive on the inbound socket, send on the
    /// outbound one.
    pub fn buffer_sizes(&self) -> Result<(usize, usize), TransportError> {
        let recv = SockRef::from(&self.inbound).recv_buffer_size()?;
        let send = SockRef::from(&self.outbound).send_buffer_size()?;
        Ok((recv, send))
    }

    pub fn inbound_addr(&self) -> Result<SocketAddr, TransportError> {
        Ok(self.inbound.local_addr()?)
    }

    pub fn peer(&self) -> SocketAddr {
        self.peer
    }

    /// Fire-and-forget send of one packet to the peer.
    pub async fn send(&self, packet: &EncodedPacket) -> Result<usize, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        if packet.len() > MAX_DATAGRAM_PAYLOAD {
            return Err(TransportError::Oversized {
                len: packet.len(),
                max: MAX_DATAGRAM_PAYLOAD,
            });
        }
        Ok(self.outbound.send_to(packet.as_bytes(), self.peer).await?)
    }

    /// Waits for the next datagram, or for [`close`](Self::close), which
    /// yields [`TransportError::Closed`].
    pub async fn receive(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), TransportError> {
        let mut closed = self.closed.subscribe();
        if *closed.borrow_and_update() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            _ = closed.wait_for(|c| *c) => Err(TransportError::Closed),
            received = self.inbound.recv_from(buf) => Ok(received?),
        }
    }

    /// Stops both directions and wakes any pending receive. Idempotent.
    pub fn close(&self) {
        if !self.closed.send_replace(true) {
            info!("transport closed");
        }
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }
}

/// Inbound side of a transport, as consumed by the receive loop.
pub trait DatagramReceiver: Send + Sync + 'static {
    /// Next datagram into `buf`, or [`TransportError::Closed`] once the
    /// transport is torn down.
    fn recv_datagram(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr), TransportError>> + Send;
}

impl DatagramReceiver for UdpTransport {
    fn recv_datagram(
        &self,
        buf: &mut [u8],
    ) -> impl Future<Output = Result<(usize, SocketAddr), TransportError>> + Send {
        self.receive(buf)
    }
}

fn bind_udp(addr: SocketAddr, buffer_bytes: usize) -> Result<UdpSocket, TransportError> {
    let bind_err = |source: std::io::Error| TransportError::Bind { addr, source };
    let socket =
        Socket::new(Domain::for_address(addr), Type::DGRAM, Some(Protocol::UDP)).map_err(bind_err)?;
    socket.set_recv_buffer_size(buffer_bytes).map_err(bind_err)?;
    socket.set_send_buffer_size(buffer_bytes).map_err(bind_err)?;
    socket.set_nonblocking(true).map_err(bind_err)?;
    socket.bind(&addr.into()).map_err(bind_err)?;
    UdpSocket::from_std(socket.into()).map_err(bind_err)
}

fn unspecified_like(ip: IpAddr) -> IpAddr {
    match ip {
        IpAddr::V4(_) => IpAddr::V4(Ipv4Addr::UNSPECIFIED),
        IpAddr::V6(_) => IpAddr::V6(Ipv6Addr::UNSPECIFIED),
    }
}
