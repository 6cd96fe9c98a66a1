//! IPv4 send/receive (RFC 791), no fragmentation, dispatching received
//! payloads to ICMP/UDP/TCP by protocol number.
//!
//! `send` only ever hands the finished packet to a device's transmit
//! queue — it never calls into the transport layer directly. Delivery
//! back into TCP/UDP happens later, from [`super::poll`]'s drain of
//! that queue, so a handler replying to a just-received segment can
//! call `send` again without re-entering its own lock.

#![allow(static_mut_refs)]

use alloc::vec::Vec;

use super::{IpAddress, Ipv4Address};
use crate::error::KernelError;

/// IP protocol numbers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum IpProtocol {
    Icmp = 1,
    Tcp = 6,
    Udp = 17,
}

/// IPv4 header
#[derive(Debug, Clone)]
pub struct Ipv4Header {
    pub version: u8,
    pub ihl: u8,
    pub tos: u8,
    pub total_length: u16,
    pub identification: u16,
    pub flags: u8,
    pub fragment_offset: u16,
    pub ttl: u8,
    pub protocol: u8,
    pub checksum: u16,
    pub source: Ipv4Address,
    pub destination: Ipv4Address,
}

impl Ipv4Header {
    pub const MIN_SIZE: usize = 20;

    pub fn new(src: Ipv4Address, dst: Ipv4Address, protocol: IpProtocol) -> Self {
        Self {
            version: 4,
            ihl: 5, // 5 * 4 = 20 bytes
            tos: 0,
            total_length: 0,
            identification: 0,
            flags: 0,
            fragment_offset: 0,
            ttl: 64,
            protocol: protocol as u8,
            checksum: 0,
            source: src,
            destination: dst,
        }
    }

    pub fn to_bytes(&self) -> [u8; 20] {
        let mut bytes = [0u8; 20];

        bytes[0] = (self.version << 4) | self.ihl;
        bytes[1] = self.tos;
        bytes[2..4].copy_from_slice(&self.total_length.to_be_bytes());
        bytes[4..6].copy_from_slice(&self.identification.to_be_bytes());
        bytes[6] = (self.flags << 5) | ((self.fragment_offset >> 8) as u8);
        bytes[7] = (self.fragment_offset & 0xFF) as u8;
        bytes[8] = self.ttl;
        bytes[9] = self.protocol;
        bytes[10..12].copy_from_slice(&self.checksum.to_be_bytes());
        bytes[12..16].copy_from_slice(&self.source.0);
        bytes[16..20].copy_from_slice(&self.destination.0);

        bytes
    }

    pub fn from_bytes(bytes: &[u8]) -> Result<Self, KernelError> {
        if bytes.len() < Self::MIN_SIZE {
            return Err(KernelError::InvalidArgument {
                name: "ip_header",
                value: "too_short",
            });
        }

        let version = bytes[0] >> 4;
        if version != 4 {
            return Err(KernelError::InvalidArgument {
                name: "ip_version",
                value: "not_ipv4",
            });
        }

        Ok(Self {
            version,
            ihl: bytes[0] & 0x0F,
            tos: bytes[1],
            total_length: u16::from_be_bytes([bytes[2], bytes[3]]),
            identification: u16::from_be_bytes([bytes[4], bytes[5]]),
            flags: bytes[6] >> 5,
            fragment_offset: u16::from_be_bytes([bytes[6] & 0x1F, bytes[7]]),
            ttl: bytes[8],
            protocol: bytes[9],
            checksum: u16::from_be_bytes([bytes[10], bytes[11]]),
            source: Ipv4Address([bytes[12], bytes[13], bytes[14], bytes[15]]),
            destination: Ipv4Address([bytes[16], bytes[17], bytes[18], bytes[19]]),
        })
    }

    /// Calculate checksum
    pub fn calculate_checksum(&mut self) {
        self.checksum = 0;
        let bytes = self.to_bytes();

        let mut sum: u32 = 0;
        for i in 0..10 {
            sum += u16::from_be_bytes([bytes[i * 2], bytes[i * 2 + 1]]) as u32;
        }

        while sum >> 16 != 0 {
            sum = (sum & 0xFFFF) + (sum >> 16);
        }

        self.checksum = !(sum as u16);
    }
}

/// Routing table entry
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub destination: Ipv4Address,
    pub netmask: Ipv4Address,
    pub gateway: Option<Ipv4Address>,
    pub interface: usize,
}

/// Simple routing table
static mut ROUTES: Vec<RouteEntry> = Vec::new();

// Defaults to loopback: this kernel has no real NIC, so every interface
// address it ever sends from or matches incoming segments against is
// its own loopback address unless `set_interface_ip` configures a real
// one.
static INTERFACE_IP: spin::Mutex<Ipv4Address> = spin::Mutex::new(Ipv4Address::LOCALHOST);

/// Address of the primary interface, as seen by ARP/IP send paths.
pub fn get_interface_ip() -> Ipv4Address {
    *INTERFACE_IP.lock()
}

/// Configure the primary interface's address (e.g. once DHCP or static
/// config completes).
pub fn set_interface_ip(addr: Ipv4Address) {
    *INTERFACE_IP.lock() = addr;
}

/// Add a route
pub fn add_route(entry: RouteEntry) {
    // SAFETY: ROUTES is a static mut Vec modified during single-threaded kernel
    // init or controlled routing table updates. No concurrent access assumed.
    unsafe {
        ROUTES.push(entry);
    }
}

/// Lookup route for destination
pub fn lookup_route(dest: Ipv4Address) -> Option<RouteEntry> {
    // SAFETY: ROUTES is a static mut Vec read during route lookup. Read-only access
    // assumes no concurrent modification to the routing table.
    unsafe {
        for route in &ROUTES {
            let dest_masked = dest.to_u32() & route.netmask.to_u32();
            let route_masked = route.destination.to_u32() & route.netmask.to_u32();

            if dest_masked == route_masked {
                return Some(route.clone());
            }
        }
    }
    None
}

/// Build an IPv4 packet and hand it to the loopback device's transmit
/// queue. There is no real NIC driver in this kernel (out of scope),
/// so every destination — including non-loopback addresses, which
/// exist only for test traffic against a simulated peer — is carried
/// over "lo0". A real egress path would look up [`lookup_route`] and
/// ARP-resolve a link-layer address here instead.
pub fn send(dest: IpAddress, protocol: IpProtocol, data: &[u8]) -> Result<(), KernelError> {
    match dest {
        IpAddress::V4(dest_v4) => {
            let src = get_interface_ip();

            let mut header = Ipv4Header::new(src, dest_v4, protocol);
            header.total_length = (Ipv4Header::MIN_SIZE + data.len()) as u16;
            header.calculate_checksum();

            let mut packet = Vec::with_capacity(header.total_length as usize);
            packet.extend_from_slice(&header.to_bytes());
            packet.extend_from_slice(data);

            let dev = super::device::get_device_mut("lo0")
                .ok_or(KernelError::NotInitialized { subsystem: "net_device" })?;
            dev.transmit(&super::Packet::from_bytes(&packet))?;

            super::update_stats_tx(header.total_length as usize);
            Ok(())
        }
        IpAddress::V6(_) => Err(KernelError::NotImplemented {
            feature: "ipv6_send",
        }),
    }
}

/// Parse a received IPv4 packet and dispatch its payload to the
/// matching transport handler. Called only from [`super::poll`]'s
/// drain — never from within `send` or a transport handler — so there
/// is no re-entrant call back into a transport module's own lock.
pub fn receive_packet(data: &[u8]) -> Result<(), KernelError> {
    let header = Ipv4Header::from_bytes(data)?;
    let header_len = (header.ihl as usize) * 4;
    if data.len() < header_len {
        return Err(KernelError::InvalidArgument { name: "ip_packet", value: "truncated" });
    }
    let payload = &data[header_len..];
    super::update_stats_rx(data.len());

    let src = IpAddress::V4(header.source);
    let dst = IpAddress::V4(header.destination);
    match header.protocol {
        p if p == IpProtocol::Tcp as u8 => super::tcp::process_packet(src, dst, payload),
        p if p == IpProtocol::Udp as u8 => super::udp::process_packet(src, dst, payload),
        p if p == IpProtocol::Icmp as u8 => Ok(()), // ICMP echo is out of scope for the core
        _ => Ok(()),
    }
}

/// Initialize IP layer
pub fn init() -> Result<(), KernelError> {
    println!("[IP] Initializing IP layer...");

    // Add default loopback route
    add_route(RouteEntry {
        destination: Ipv4Address::new(127, 0, 0, 0),
        netmask: Ipv4Address::new(255, 0, 0, 0),
        gateway: None,
        interface: 0,
    });

    println!("[IP] IP layer initialized");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ipv4_header() {
        let src = Ipv4Address::new(192, 168, 1, 1);
        let dst = Ipv4Address::new(192, 168, 1, 2);
        let header = Ipv4Header::new(src, dst, IpProtocol::Tcp);

        assert_eq!(header.version, 4);
        assert_eq!(header.protocol, 6);
        assert_eq!(header.source, src);
        assert_eq!(header.destination, dst);
    }

    #[test]
    fn test_ipv4_header_roundtrip() {
        let src = Ipv4Address::new(10, 0, 0, 1);
        let dst = Ipv4Address::new(10, 0, 0, 2);
        let mut header = Ipv4Header::new(src, dst, IpProtocol::Udp);
        header.calculate_checksum();

        let bytes = header.to_bytes();
        let parsed = Ipv4Header::from_bytes(&bytes).unwrap();

        assert_eq!(parsed.source, src);
        assert_eq!(parsed.destination, dst);
        assert_eq!(parsed.protocol, 17);
    }

    #[test]
    fn send_enqueues_on_the_loopback_device() {
        super::super::device::init().unwrap();
        let before = super::super::device::get_device("lo0").unwrap().statistics().tx_packets;
        send(IpAddress::V4(Ipv4Address::LOCALHOST), IpProtocol::Udp, b"payload").unwrap();
        let after = super::super::device::get_device("lo0").unwrap().statistics().tx_packets;
        assert_eq!(after, before + 1);
    }

    #[test]
    fn receive_packet_rejects_a_truncated_header() {
        assert!(receive_packet(&[0u8; 4]).is_err());
    }
}
