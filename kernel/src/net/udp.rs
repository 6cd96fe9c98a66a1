//! UDP (RFC 768), restricted to a fixed table of [`UDP_MAX_BINDINGS`]
//! port bindings, each with a ring of [`UDP_RING_SIZE`] received
//! datagrams capped at [`UDP_MAX_PAYLOAD`] bytes. A full ring drops
//! the newest arrival rather than overwriting an unread one — a
//! blocked reader keeps its backlog instead of losing the oldest
//! datagram to a burst.

use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use super::{IpAddress, Ipv4Address, SocketAddr};
use crate::error::KernelError;

pub const UDP_MAX_BINDINGS: usize = 8;
pub const UDP_RING_SIZE: usize = 4;
pub const UDP_MAX_PAYLOAD: usize = 1400;

const UDP_HEADER_SIZE: usize = 8;

/// UDP header (RFC 768): source port, destination port, length
/// (header + payload), checksum.
#[derive(Debug, Clone, Copy)]
pub struct UdpHeader {
    pub source_port: u16,
    pub dest_port: u16,
    pub length: u16,
    pub checksum: u16,
}

impl UdpHeader {
    pub fn new(src_port: u16, dst_port: u16, data_len: usize) -> Self {
        Self {
            source_port: src_port,
            dest_port: dst_port,
            length: (UDP_HEADER_SIZE + data_len) as u16,
            checksum: 0,
        }
    }

    pub fn to_bytes(&self) -> [u8; UDP_HEADER_SIZE] {
        let mut bytes = [0u8; UDP_HEADER_SIZE];
        bytes[0..2].copy_from_slice(&self.source_port.to_be_bytes());
        bytes[2..4].copy_from_slice(&self.dest_port.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.length.to_be_bytes());
        bytes[6..8].copy_from_slice(&self.checksum.to_be_bytes());
        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < UDP_HEADER_SIZE {
            return Err(KernelError::InvalidArgument { name: "udp_header", value: "too_short" });
        }
        Ok(Self {
            source_port: u16::from_be_bytes([bytes[0], bytes[1]]),
            dest_port: u16::from_be_bytes([bytes[2], bytes[3]]),
            length: u16::from_be_bytes([bytes[4], bytes[5]]),
            checksum: u16::from_be_bytes([bytes[6], bytes[7]]),
        })
    }

    /// RFC 768 checksum over the IPv4 pseudo-header, the UDP header
    /// (checksum field zeroed), and the payload.
    pub fn calculate_checksum(&mut self, src: IpAddress, dst: IpAddress, data: &[u8]) {
        self.checksum = 0;
        let (IpAddress::V4(src), IpAddress::V4(dst)) = (src, dst) else {
            return; // IPv6 pseudo-header unsupported; left at 0, which RFC 768 permits
        };

        let mut sum: u32 = 0;
        for chunk in src.0.chunks(2).chain(dst.0.chunks(2)) {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
        sum += 17u32; // protocol
        sum += self.length as u32;

        let header = self.to_bytes();
        for chunk in header.chunks(2) {
            sum += u16::from_be_bytes([chunk[0], chunk[1]]) as u32;
        }
        let mut i = 0;
        while i + 1 < data.len() {
            sum += u16::from_be_bytes([data[i], data[i + 1]]) as u32;
            i += 2;
        }
        if i < data.len() {
            sum += (data[i] as u32) << 8;
        }

        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }
        self.checksum = !(sum as u16);
    }
}

struct Datagram {
    data: Vec<u8>,
    src: SocketAddr,
}

struct Binding {
    port: u16,
    remote: Option<SocketAddr>,
    ring: Vec<Datagram>,
}

lazy_static! {
    static ref BINDINGS: Mutex<[Option<Binding>; UDP_MAX_BINDINGS]> =
        Mutex::new(core::array::from_fn(|_| None));
}

fn ephemeral_port(bindings: &[Option<Binding>; UDP_MAX_BINDINGS]) -> Result<u16, KernelError> {
    for port in 49152..=65535u16 {
        if !bindings.iter().flatten().any(|b| b.port == port) {
            return Ok(port);
        }
    }
    Err(KernelError::ResourceExhausted { resource: "udp_port" })
}

/// Reserve a binding slot on `port` (an ephemeral port if 0). Returns
/// the binding handle used by `send`/`recv`/`close`.
pub fn bind(port: u16) -> Result<usize, KernelError> {
    let mut bindings = BINDINGS.lock();
    let slot = bindings
        .iter()
        .position(Option::is_none)
        .ok_or(KernelError::ResourceExhausted { resource: "udp_binding" })?;
    let port = if port == 0 { ephemeral_port(&bindings)? } else { port };
    if bindings.iter().flatten().any(|b| b.port == port) {
        return Err(KernelError::AlreadyExists { resource: "udp_port", id: port as u64 });
    }
    bindings[slot] = Some(Binding { port, remote: None, ring: Vec::new() });
    Ok(slot)
}

pub fn close(binding: usize) {
    if let Some(slot) = BINDINGS.lock().get_mut(binding) {
        *slot = None;
    }
}

/// Fix the peer address so future `send` calls don't need one, mirroring
/// a connected UDP socket.
pub fn connect(binding: usize, remote: SocketAddr) -> Result<(), KernelError> {
    let mut bindings = BINDINGS.lock();
    let b = bindings
        .get_mut(binding)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "udp_binding", id: binding as u64 })?;
    b.remote = Some(remote);
    Ok(())
}

pub fn send_to(binding: usize, data: &[u8], dest: SocketAddr) -> Result<usize, KernelError> {
    if data.len() > UDP_MAX_PAYLOAD {
        return Err(KernelError::InvalidArgument { name: "udp_payload", value: "exceeds_max" });
    }
    let src_port = {
        let bindings = BINDINGS.lock();
        bindings
            .get(binding)
            .and_then(Option::as_ref)
            .ok_or(KernelError::NotFound { resource: "udp_binding", id: binding as u64 })?
            .port
    };

    let src = IpAddress::V4(super::ip::get_interface_ip());
    let mut header = UdpHeader::new(src_port, dest.port, data.len());
    header.calculate_checksum(src, dest.ip, data);

    let mut packet = Vec::with_capacity(UDP_HEADER_SIZE + data.len());
    packet.extend_from_slice(&header.to_bytes());
    packet.extend_from_slice(data);

    super::ip::send(dest.ip, super::ip::IpProtocol::Udp, &packet)?;
    Ok(data.len())
}

pub fn send(binding: usize, data: &[u8]) -> Result<usize, KernelError> {
    let remote = {
        let bindings = BINDINGS.lock();
        bindings
            .get(binding)
            .and_then(Option::as_ref)
            .ok_or(KernelError::NotFound { resource: "udp_binding", id: binding as u64 })?
            .remote
            .ok_or(KernelError::InvalidState { expected: "connected", actual: "unconnected" })?
    };
    send_to(binding, data, remote)
}

/// Pop the oldest queued datagram, or `Ok(None)` if the ring is empty.
/// Blocking-with-timeout is layered on top by the caller polling this.
pub fn recv_from(binding: usize) -> Result<Option<(Vec<u8>, SocketAddr)>, KernelError> {
    let mut bindings = BINDINGS.lock();
    let b = bindings
        .get_mut(binding)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "udp_binding", id: binding as u64 })?;
    Ok(if b.ring.is_empty() {
        None
    } else {
        let dgram = b.ring.remove(0);
        Some((dgram.data, dgram.src))
    })
}

/// Dispatch an incoming UDP datagram to the matching binding's ring.
/// Only called from [`super::poll`]'s drain.
pub fn process_packet(src: IpAddress, _dst: IpAddress, data: &[u8]) -> Result<(), KernelError> {
    let header = UdpHeader::from_bytes(data)?;
    let payload = &data[UDP_HEADER_SIZE..];

    let mut bindings = BINDINGS.lock();
    if let Some(b) = bindings.iter_mut().flatten().find(|b| b.port == header.dest_port) {
        if b.ring.len() < UDP_RING_SIZE {
            b.ring.push(Datagram {
                data: payload.to_vec(),
                src: SocketAddr::new(src, header.source_port),
            });
        }
        // Ring full: drop the newest arrival, matching the fixed-size
        // backlog's "don't evict an unread datagram" policy.
    }
    Ok(())
}

pub fn init() -> Result<(), KernelError> {
    println!("[UDP] Initializing UDP layer...");
    Ok(())
}

/// Handle used by callers that want a connected-socket-style object
/// instead of juggling a raw binding index.
pub struct UdpSocket(usize);

impl UdpSocket {
    pub fn bind(port: u16) -> Result<Self, KernelError> {
        Ok(Self(bind(port)?))
    }

    pub fn connect(&mut self, remote: SocketAddr) -> Result<(), KernelError> {
        connect(self.0, remote)
    }

    pub fn send(&self, data: &[u8]) -> Result<usize, KernelError> {
        send(self.0, data)
    }

    pub fn send_to(&self, data: &[u8], dest: SocketAddr) -> Result<usize, KernelError> {
        send_to(self.0, data, dest)
    }

    pub fn recv_from(&self, buf: &mut [u8]) -> Result<(usize, SocketAddr), KernelError> {
        match recv_from(self.0)? {
            Some((data, src)) => {
                let n = data.len().min(buf.len());
                buf[..n].copy_from_slice(&data[..n]);
                Ok((n, src))
            }
            None => Err(KernelError::WouldBlock),
        }
    }
}

impl Drop for UdpSocket {
    fn drop(&mut self) {
        close(self.0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let mut bindings = BINDINGS.lock();
        for slot in bindings.iter_mut() {
            *slot = None;
        }
    }

    #[test]
    fn bind_reserves_a_slot_and_rejects_a_duplicate_port() {
        reset();
        bind(7000).unwrap();
        assert!(matches!(bind(7000), Err(KernelError::AlreadyExists { .. })));
    }

    #[test]
    fn exhausting_bindings_is_resource_exhausted() {
        reset();
        for i in 0..UDP_MAX_BINDINGS as u16 {
            bind(8000 + i).unwrap();
        }
        assert!(matches!(bind(9000), Err(KernelError::ResourceExhausted { .. })));
    }

    #[test]
    fn process_packet_queues_into_the_matching_binding() {
        reset();
        let b = bind(5000).unwrap();
        let mut header = UdpHeader::new(4000, 5000, 5);
        header.calculate_checksum(
            IpAddress::V4(Ipv4Address::LOCALHOST),
            IpAddress::V4(Ipv4Address::LOCALHOST),
            b"hello",
        );
        let mut packet = header.to_bytes().to_vec();
        packet.extend_from_slice(b"hello");

        process_packet(IpAddress::V4(Ipv4Address::LOCALHOST), IpAddress::V4(Ipv4Address::LOCALHOST), &packet)
            .unwrap();

        let (data, src) = recv_from(b).unwrap().unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(src.port, 4000);
    }

    #[test]
    fn a_full_ring_drops_the_newest_arrival() {
        reset();
        let b = bind(5001).unwrap();
        for i in 0..(UDP_RING_SIZE + 1) {
            let mut header = UdpHeader::new(4000, 5001, 1);
            header.calculate_checksum(
                IpAddress::V4(Ipv4Address::LOCALHOST),
                IpAddress::V4(Ipv4Address::LOCALHOST),
                &[i as u8],
            );
            let mut packet = header.to_bytes().to_vec();
            packet.push(i as u8);
            process_packet(IpAddress::V4(Ipv4Address::LOCALHOST), IpAddress::V4(Ipv4Address::LOCALHOST), &packet)
                .unwrap();
        }

        let mut seen = Vec::new();
        while let Some((data, _)) = recv_from(b).unwrap() {
            seen.push(data[0]);
        }
        assert_eq!(seen, (0..UDP_RING_SIZE as u8).collect::<Vec<_>>());
    }

    #[test]
    fn send_without_connect_requires_a_peer() {
        reset();
        let b = bind(5002).unwrap();
        assert!(matches!(send(b, b"x"), Err(KernelError::InvalidState { .. })));
    }
}
