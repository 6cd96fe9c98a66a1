//! ARP cache and request/reply processing (RFC 826), restricted to a
//! fixed-size table: at most [`ARP_CACHE_MAX`] entries, a 300-second
//! TTL, and "overwrite slot 0" as the eviction policy when the table
//! is full and the address being learned isn't already in it.

use crate::{
    error::KernelError,
    net::{Ipv4Address, MacAddress},
};

const ARP_HTYPE_ETHERNET: u16 = 1;
const ARP_PTYPE_IPV4: u16 = 0x0800;
const ARP_OP_REQUEST: u16 = 1;
const ARP_OP_REPLY: u16 = 2;
const ARP_PACKET_SIZE: usize = 28;

/// Upper bound on live ARP cache entries.
pub const ARP_CACHE_MAX: usize = 16;
/// Entry lifetime in seconds before it is treated as stale.
const ARP_ENTRY_TTL_SECS: u64 = 300;

#[derive(Debug, Clone, Copy)]
struct ArpEntry {
    ip: Ipv4Address,
    mac: MacAddress,
    /// Tick count when this entry was created/refreshed.
    timestamp: u64,
}

static ARP_CACHE: spin::Mutex<[Option<ArpEntry>; ARP_CACHE_MAX]> =
    spin::Mutex::new([None; ARP_CACHE_MAX]);

fn now_secs() -> u64 {
    crate::arch::x86::timer::ticks() / crate::arch::x86::timer::TARGET_HZ as u64
}

/// Resolve an IPv4 address to a MAC address from the cache. Returns
/// `None` if absent or stale, in which case the caller should broadcast
/// a request and treat resolution as in flight.
pub fn resolve(ip: Ipv4Address) -> Option<MacAddress> {
    let cache = ARP_CACHE.lock();
    cache.iter().flatten().find_map(|e| {
        if e.ip == ip && now_secs().wrapping_sub(e.timestamp) < ARP_ENTRY_TTL_SECS {
            Some(e.mac)
        } else {
            None
        }
    })
}

/// Insert or refresh an entry. If the table is full and `ip` is not
/// already present, slot 0 is overwritten. Deliberately not LRU.
pub fn update_cache(ip: Ipv4Address, mac: MacAddress) {
    let mut cache = ARP_CACHE.lock();
    let entry = ArpEntry { ip, mac, timestamp: now_secs() };

    if let Some(slot) = cache.iter_mut().find(|e| matches!(e, Some(e) if e.ip == ip)) {
        *slot = Some(entry);
        return;
    }
    if let Some(slot) = cache.iter_mut().find(|e| e.is_none()) {
        *slot = Some(entry);
        return;
    }
    cache[0] = Some(entry);
}

/// Process an incoming ARP packet: learn the sender, and if it's a
/// request addressed to us, queue a reply.
pub fn process_arp_packet(data: &[u8], our_mac: &MacAddress) -> Result<(), KernelError> {
    if data.len() < ARP_PACKET_SIZE {
        return Err(KernelError::InvalidArgument {
            name: "arp_packet",
            value: "too_short",
        });
    }

    let htype = u16::from_be_bytes([data[0], data[1]]);
    let ptype = u16::from_be_bytes([data[2], data[3]]);
    let hlen = data[4];
    let plen = data[5];
    let operation = u16::from_be_bytes([data[6], data[7]]);

    if htype != ARP_HTYPE_ETHERNET || ptype != ARP_PTYPE_IPV4 || hlen != 6 || plen != 4 {
        return Err(KernelError::InvalidArgument {
            name: "arp_format",
            value: "unsupported",
        });
    }

    let mut sender_mac_bytes = [0u8; 6];
    sender_mac_bytes.copy_from_slice(&data[8..14]);
    let sender_mac = MacAddress(sender_mac_bytes);
    let sender_ip = Ipv4Address([data[14], data[15], data[16], data[17]]);
    let target_ip = Ipv4Address([data[24], data[25], data[26], data[27]]);

    update_cache(sender_ip, sender_mac);

    if operation == ARP_OP_REQUEST {
        let our_ip = super::ip::get_interface_ip();
        if target_ip == our_ip {
            let reply = build_arp_reply(*our_mac, our_ip, sender_mac, sender_ip);
            send_arp_frame(&reply, *our_mac, sender_mac);
        }
    }

    Ok(())
}

/// Broadcast an ARP request for `target_ip`.
pub fn send_arp_request(target_ip: Ipv4Address) {
    let our_mac = super::device::get_device("eth0")
        .map(|dev| dev.mac_address())
        .unwrap_or(MacAddress::ZERO);
    let our_ip = super::ip::get_interface_ip();
    let packet = build_arp_request(our_mac, our_ip, target_ip);
    send_arp_frame(&packet, our_mac, MacAddress::BROADCAST);
}

fn build_arp_request(
    sender_mac: MacAddress,
    sender_ip: Ipv4Address,
    target_ip: Ipv4Address,
) -> alloc::vec::Vec<u8> {
    build_arp_packet(ARP_OP_REQUEST, sender_mac, sender_ip, MacAddress::ZERO, target_ip)
}

fn build_arp_reply(
    sender_mac: MacAddress,
    sender_ip: Ipv4Address,
    target_mac: MacAddress,
    target_ip: Ipv4Address,
) -> alloc::vec::Vec<u8> {
    build_arp_packet(ARP_OP_REPLY, sender_mac, sender_ip, target_mac, target_ip)
}

fn build_arp_packet(
    op: u16,
    sender_mac: MacAddress,
    sender_ip: Ipv4Address,
    target_mac: MacAddress,
    target_ip: Ipv4Address,
) -> alloc::vec::Vec<u8> {
    let mut pkt = alloc::vec::Vec::with_capacity(ARP_PACKET_SIZE);
    pkt.extend_from_slice(&ARP_HTYPE_ETHERNET.to_be_bytes());
    pkt.extend_from_slice(&ARP_PTYPE_IPV4.to_be_bytes());
    pkt.push(6);
    pkt.push(4);
    pkt.extend_from_slice(&op.to_be_bytes());
    pkt.extend_from_slice(&sender_mac.0);
    pkt.extend_from_slice(&sender_ip.0);
    pkt.extend_from_slice(&target_mac.0);
    pkt.extend_from_slice(&target_ip.0);
    pkt
}

fn send_arp_frame(arp_data: &[u8], src_mac: MacAddress, dst_mac: MacAddress) {
    let frame = super::ethernet::construct_frame(dst_mac, src_mac, super::ethernet::ETHERTYPE_ARP, arp_data);
    let pkt = super::Packet::from_bytes(&frame);
    if let Some(dev) = super::device::get_device_mut("eth0") {
        let _ = dev.transmit(&pkt);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn insert_and_resolve() {
        let ip = Ipv4Address::new(10, 0, 0, 1);
        let mac = MacAddress([0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0xFF]);
        update_cache(ip, mac);
        assert_eq!(resolve(ip), Some(mac));
    }

    #[test]
    fn overwrites_slot_zero_when_full() {
        for i in 0..ARP_CACHE_MAX as u8 {
            update_cache(Ipv4Address::new(10, 0, 0, i), MacAddress([i; 6]));
        }
        let overflow_ip = Ipv4Address::new(10, 0, 1, 0);
        update_cache(overflow_ip, MacAddress([0xFF; 6]));
        let cache = ARP_CACHE.lock();
        assert_eq!(cache[0].unwrap().ip, overflow_ip);
    }

    #[test]
    fn request_packet_has_correct_op() {
        let pkt = build_arp_request(
            MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]),
            Ipv4Address::new(10, 0, 2, 15),
            Ipv4Address::new(10, 0, 2, 1),
        );
        assert_eq!(pkt.len(), ARP_PACKET_SIZE);
        assert_eq!(u16::from_be_bytes([pkt[6], pkt[7]]), ARP_OP_REQUEST);
    }
}
