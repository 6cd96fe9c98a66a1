//! The socket layer: a thin table mapping an id to `{stream | dgram,
//! protocol, bound address}`, layered directly over [`super::tcp`] and
//! [`super::udp`]. `listen`/`accept` delegate to the listening TCB's
//! backlog; `accept` wraps the dequeued connection TCB in a new
//! socket rather than managing its own queue.

use alloc::vec::Vec;

use super::{IpAddress, SocketAddr};
use crate::error::KernelError;

/// Socket domain (address family)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketDomain {
    /// IPv4 Internet protocols
    Inet,
    /// IPv6 Internet protocols
    Inet6,
    /// Unix domain sockets
    Unix,
}

/// Socket type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketType {
    /// Stream socket (TCP)
    Stream,
    /// Datagram socket (UDP)
    Dgram,
    /// Raw socket
    Raw,
}

/// Socket protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketProtocol {
    /// Default protocol for socket type
    Default,
    /// TCP
    Tcp,
    /// UDP
    Udp,
    /// ICMP
    Icmp,
}

/// Socket state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SocketState {
    Unbound,
    Bound,
    Listening,
    Connected,
    Closed,
}

/// Socket options
#[derive(Debug, Clone, Copy)]
pub struct SocketOptions {
    pub reuse_addr: bool,
    pub reuse_port: bool,
    pub broadcast: bool,
    pub keepalive: bool,
    pub recv_buffer_size: usize,
    pub send_buffer_size: usize,
    pub recv_timeout_ms: Option<u64>,
    pub send_timeout_ms: Option<u64>,
}

impl Default for SocketOptions {
    fn default() -> Self {
        Self {
            reuse_addr: false,
            reuse_port: false,
            broadcast: false,
            keepalive: false,
            recv_buffer_size: 65536,
            send_buffer_size: 65536,
            recv_timeout_ms: None,
            send_timeout_ms: None,
        }
    }
}

/// The transport handle a socket owns: a TCB index for `Stream`
/// sockets, a binding index for `Dgram` sockets, or none yet for a
/// freshly created socket that hasn't bound or connected.
#[derive(Debug, Clone, Copy)]
enum Transport {
    None,
    Tcp(usize),
    Udp(usize),
}

/// Generic socket handle
#[derive(Debug, Clone)]
pub struct Socket {
    pub id: usize,
    pub domain: SocketDomain,
    pub socket_type: SocketType,
    pub protocol: SocketProtocol,
    pub state: SocketState,
    pub local_addr: Option<SocketAddr>,
    pub remote_addr: Option<SocketAddr>,
    pub options: SocketOptions,
    transport: Transport,
}

impl Socket {
    /// Create a new socket
    pub fn new(
        domain: SocketDomain,
        socket_type: SocketType,
        protocol: SocketProtocol,
    ) -> Result<Self, KernelError> {
        // Validate domain/type/protocol combination
        match (domain, socket_type, protocol) {
            (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp)
            | (SocketDomain::Inet, SocketType::Stream, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp)
            | (SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Default)
            | (SocketDomain::Inet, SocketType::Raw, _) => {}
            _ => {
                return Err(KernelError::InvalidArgument {
                    name: "socket_combination",
                    value: "unsupported",
                })
            }
        }

        Ok(Self {
            id: 0, // assigned by the socket table on create_socket
            domain,
            socket_type,
            protocol,
            state: SocketState::Unbound,
            local_addr: None,
            remote_addr: None,
            options: SocketOptions::default(),
            transport: Transport::None,
        })
    }

    fn ensure_dgram_binding(&mut self, port: u16) -> Result<usize, KernelError> {
        if let Transport::Udp(binding) = self.transport {
            return Ok(binding);
        }
        let binding = super::udp::bind(port)?;
        self.transport = Transport::Udp(binding);
        Ok(binding)
    }

    /// Bind socket to local address
    pub fn bind(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        if self.state != SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "unbound",
                actual: "already_bound",
            });
        }

        if self.socket_type == SocketType::Dgram {
            self.ensure_dgram_binding(addr.port)?;
        }

        self.local_addr = Some(addr);
        self.state = SocketState::Bound;
        Ok(())
    }

    /// Listen for connections (TCP only)
    pub fn listen(&mut self, _backlog: usize) -> Result<(), KernelError> {
        if self.socket_type != SocketType::Stream {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_stream",
            });
        }
        if self.state != SocketState::Bound {
            return Err(KernelError::InvalidState {
                expected: "bound",
                actual: "not_bound",
            });
        }

        let port = self.local_addr.ok_or(KernelError::InvalidState {
            expected: "local_addr_set",
            actual: "no_local_addr",
        })?.port;
        let tcb = super::tcp::open()?;
        super::tcp::listen(tcb, port)?;
        self.transport = Transport::Tcp(tcb);
        self.state = SocketState::Listening;
        Ok(())
    }

    /// Connect to remote address
    pub fn connect(&mut self, addr: SocketAddr) -> Result<(), KernelError> {
        match self.state {
            SocketState::Unbound | SocketState::Bound => {}
            _ => {
                return Err(KernelError::InvalidState {
                    expected: "unbound_or_bound",
                    actual: "other",
                })
            }
        }

        match self.socket_type {
            SocketType::Stream => {
                let tcb = super::tcp::open()?;
                super::tcp::connect(tcb, addr)?;
                self.transport = Transport::Tcp(tcb);
            }
            SocketType::Dgram => {
                let binding = self.ensure_dgram_binding(0)?;
                super::udp::connect(binding, addr)?;
            }
            SocketType::Raw => {
                return Err(KernelError::NotImplemented { feature: "raw_socket_connect" })
            }
        }

        self.remote_addr = Some(addr);
        self.state = SocketState::Connected;
        Ok(())
    }

    /// Accept incoming connection (TCP only). `WouldBlock` means no
    /// connection is pending yet — the caller sleep-polls and retries.
    pub fn accept(&self) -> Result<(Socket, SocketAddr), KernelError> {
        if self.socket_type != SocketType::Stream {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_stream",
            });
        }
        if self.state != SocketState::Listening {
            return Err(KernelError::InvalidState {
                expected: "listening",
                actual: "not_listening",
            });
        }
        let Transport::Tcp(listener) = self.transport else {
            return Err(KernelError::InvalidState { expected: "tcp_listener", actual: "no_tcb" });
        };

        let tcb = super::tcp::accept(listener)?;
        let remote = super::tcp::peer_addr(tcb)
            .unwrap_or_else(|| SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0));
        let accepted = Socket {
            id: 0,
            domain: self.domain,
            socket_type: SocketType::Stream,
            protocol: SocketProtocol::Tcp,
            state: SocketState::Connected,
            local_addr: self.local_addr,
            remote_addr: Some(remote),
            options: self.options,
            transport: Transport::Tcp(tcb),
        };
        Ok((accepted, remote))
    }

    /// Send data
    pub fn send(&self, data: &[u8], _flags: u32) -> Result<usize, KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::InvalidState {
                expected: "connected",
                actual: "not_connected",
            });
        }

        match self.transport {
            Transport::Tcp(tcb) => super::tcp::send(tcb, data),
            Transport::Udp(binding) => super::udp::send(binding, data),
            Transport::None => Err(KernelError::InvalidState { expected: "bound", actual: "unbound" }),
        }
    }

    /// Send data to specific address (UDP)
    pub fn send_to(&mut self, data: &[u8], dest: SocketAddr, _flags: u32) -> Result<usize, KernelError> {
        if self.socket_type != SocketType::Dgram {
            return Err(KernelError::InvalidArgument {
                name: "socket_type",
                value: "not_dgram",
            });
        }
        let binding = self.ensure_dgram_binding(0)?;
        super::udp::send_to(binding, data, dest)
    }

    /// Receive data
    pub fn recv(&self, buffer: &mut [u8], _flags: u32) -> Result<usize, KernelError> {
        if self.state != SocketState::Connected {
            return Err(KernelError::InvalidState {
                expected: "connected",
                actual: "not_connected",
            });
        }

        match self.transport {
            Transport::Tcp(tcb) => super::tcp::recv(tcb, buffer),
            Transport::Udp(binding) => match super::udp::recv_from(binding)? {
                Some((data, _)) => {
                    let n = data.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&data[..n]);
                    Ok(n)
                }
                None => Ok(0),
            },
            Transport::None => Err(KernelError::InvalidState { expected: "bound", actual: "unbound" }),
        }
    }

    /// Receive data with source address
    pub fn recv_from(&self, buffer: &mut [u8], _flags: u32) -> Result<(usize, SocketAddr), KernelError> {
        if self.state == SocketState::Unbound {
            return Err(KernelError::InvalidState {
                expected: "bound",
                actual: "unbound",
            });
        }

        match self.transport {
            Transport::Udp(binding) => match super::udp::recv_from(binding)? {
                Some((data, src)) => {
                    let n = data.len().min(buffer.len());
                    buffer[..n].copy_from_slice(&data[..n]);
                    Ok((n, src))
                }
                None => Err(KernelError::WouldBlock),
            },
            Transport::Tcp(tcb) => {
                let n = super::tcp::recv(tcb, buffer)?;
                Ok((n, self.remote_addr.unwrap_or(SocketAddr::v4(super::Ipv4Address::UNSPECIFIED, 0))))
            }
            Transport::None => Err(KernelError::InvalidState { expected: "bound", actual: "unbound" }),
        }
    }

    /// Close socket
    pub fn close(&mut self) -> Result<(), KernelError> {
        match self.transport {
            Transport::Tcp(tcb) => super::tcp::close(tcb)?,
            Transport::Udp(binding) => super::udp::close(binding),
            Transport::None => {}
        }
        self.transport = Transport::None;
        self.state = SocketState::Closed;
        Ok(())
    }

    /// Set socket option
    pub fn set_option(&mut self, option: SocketOption) -> Result<(), KernelError> {
        match option {
            SocketOption::ReuseAddr(val) => self.options.reuse_addr = val,
            SocketOption::ReusePort(val) => self.options.reuse_port = val,
            SocketOption::Broadcast(val) => self.options.broadcast = val,
            SocketOption::KeepAlive(val) => self.options.keepalive = val,
            SocketOption::RecvBufferSize(val) => self.options.recv_buffer_size = val,
            SocketOption::SendBufferSize(val) => self.options.send_buffer_size = val,
            SocketOption::RecvTimeout(val) => self.options.recv_timeout_ms = val,
            SocketOption::SendTimeout(val) => self.options.send_timeout_ms = val,
        }
        Ok(())
    }
}

/// Socket option values
#[derive(Debug, Clone)]
pub enum SocketOption {
    ReuseAddr(bool),
    ReusePort(bool),
    Broadcast(bool),
    KeepAlive(bool),
    RecvBufferSize(usize),
    SendBufferSize(usize),
    RecvTimeout(Option<u64>),
    SendTimeout(Option<u64>),
}

/// Socket table for managing all sockets
static mut SOCKET_TABLE: Option<Vec<Socket>> = None;
static mut NEXT_SOCKET_ID: usize = 1;

/// Initialize socket subsystem
pub fn init() -> Result<(), KernelError> {
    println!("[SOCKET] Initializing socket subsystem...");

    unsafe {
        SOCKET_TABLE = Some(Vec::new());
    }

    println!("[SOCKET] Socket subsystem initialized");
    Ok(())
}

/// Create a new socket and return its ID
pub fn create_socket(
    domain: SocketDomain,
    socket_type: SocketType,
    protocol: SocketProtocol,
) -> Result<usize, KernelError> {
    let mut socket = Socket::new(domain, socket_type, protocol)?;

    unsafe {
        let id = NEXT_SOCKET_ID;
        NEXT_SOCKET_ID += 1;

        socket.id = id;

        if let Some(ref mut table) = SOCKET_TABLE {
            table.push(socket);
            Ok(id)
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

/// Get socket by ID
pub fn get_socket(id: usize) -> Result<&'static Socket, KernelError> {
    unsafe {
        if let Some(ref table) = SOCKET_TABLE {
            table
                .iter()
                .find(|s| s.id == id)
                .ok_or(KernelError::InvalidArgument {
                    name: "socket_id",
                    value: "not_found",
                })
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

/// Get mutable socket by ID
pub fn get_socket_mut(id: usize) -> Result<&'static mut Socket, KernelError> {
    unsafe {
        if let Some(ref mut table) = SOCKET_TABLE {
            table
                .iter_mut()
                .find(|s| s.id == id)
                .ok_or(KernelError::InvalidArgument {
                    name: "socket_id",
                    value: "not_found",
                })
        } else {
            Err(KernelError::InvalidState {
                expected: "initialized",
                actual: "not_initialized",
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::net::Ipv4Address;

    #[test]
    fn test_socket_creation() {
        let socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        assert_eq!(socket.state, SocketState::Unbound);
        assert_eq!(socket.socket_type, SocketType::Stream);
    }

    #[test]
    fn test_socket_bind() {
        let mut socket =
            Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        let addr = SocketAddr::v4(Ipv4Address::LOCALHOST, 8080);

        assert_eq!(socket.state, SocketState::Unbound);
        socket.bind(addr).unwrap();
        assert_eq!(socket.state, SocketState::Bound);
        assert_eq!(socket.local_addr, Some(addr));
    }

    #[test]
    fn dgram_socket_round_trips_through_udp() {
        let mut sender = Socket::new(SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp).unwrap();
        let mut receiver = Socket::new(SocketDomain::Inet, SocketType::Dgram, SocketProtocol::Udp).unwrap();
        receiver.bind(SocketAddr::v4(Ipv4Address::LOCALHOST, 6000)).unwrap();

        sender.send_to(b"ping", SocketAddr::v4(Ipv4Address::LOCALHOST, 6000), 0).unwrap();
        super::super::poll();

        let mut buf = [0u8; 16];
        let (n, _src) = receiver.recv_from(&mut buf, 0).unwrap();
        assert_eq!(&buf[..n], b"ping");
    }

    #[test]
    fn accept_before_any_connection_would_block() {
        let mut listener = Socket::new(SocketDomain::Inet, SocketType::Stream, SocketProtocol::Tcp).unwrap();
        listener.bind(SocketAddr::v4(Ipv4Address::LOCALHOST, 6100)).unwrap();
        listener.listen(1).unwrap();
        assert!(matches!(listener.accept(), Err(KernelError::WouldBlock)));
    }
}
