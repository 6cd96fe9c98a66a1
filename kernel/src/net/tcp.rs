//! TCP (RFC 793), restricted to a fixed table of [`TCP_MAX_CONNECTIONS`]
//! transmission control blocks, each with 4 KiB send/receive rings and
//! `MSS`-sized segments. Retransmission is stop-and-wait: one
//! unacknowledged segment in flight per TCB at a time, timed against
//! `rto_ticks`, doubling on each retry up to [`TCP_MAX_RETRIES`].
//!
//! Segments never leave this module synchronously: `transmit_segment`
//! hands the built packet to [`super::ip::send`], which only enqueues
//! it on a device's queue. Incoming segments only reach
//! [`process_packet`] via [`super::poll`]'s drain, so a handler that
//! sends a reply (e.g. SYN+ACK) never recurses back into this module's
//! own lock — the reply is processed on a later drain.

use alloc::vec::Vec;

use lazy_static::lazy_static;
use spin::Mutex;

use super::{IpAddress, Ipv4Address, SocketAddr};
use crate::error::KernelError;

pub const TCP_MAX_CONNECTIONS: usize = 8;
pub const TCP_RING_SIZE: usize = 4096;
pub const TCP_MSS: usize = 1400;
pub const TCP_MAX_RETRIES: u32 = 5;
pub const TCP_RTO_INIT: u64 = 100;

const TCP_HEADER_SIZE: usize = 20;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TcpFlags(pub u8);

impl TcpFlags {
    pub const FIN: u8 = 0x01;
    pub const SYN: u8 = 0x02;
    pub const RST: u8 = 0x04;
    pub const PSH: u8 = 0x08;
    pub const ACK: u8 = 0x10;
    pub const URG: u8 = 0x20;

    pub fn new(bits: u8) -> Self {
        Self(bits)
    }

    pub fn has(&self, bit: u8) -> bool {
        self.0 & bit != 0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TcpState {
    Closed,
    Listen,
    SynSent,
    SynReceived,
    Established,
    FinWait1,
    FinWait2,
    CloseWait,
    Closing,
    LastAck,
    TimeWait,
}

/// Fixed-capacity byte ring. `push` is capped by remaining free space;
/// the caller (send/receive paths) decides what to do with a partial
/// write, matching the rings' role as flow-control backpressure rather
/// than unbounded buffering.
struct TcpRing {
    buf: Vec<u8>,
    head: usize,
    len: usize,
}

impl TcpRing {
    fn new() -> Self {
        Self { buf: alloc::vec![0u8; TCP_RING_SIZE], head: 0, len: 0 }
    }

    fn free_space(&self) -> usize {
        TCP_RING_SIZE - self.len
    }

    fn push(&mut self, data: &[u8]) -> usize {
        let n = data.len().min(self.free_space());
        let tail = (self.head + self.len) % TCP_RING_SIZE;
        for (i, &b) in data[..n].iter().enumerate() {
            self.buf[(tail + i) % TCP_RING_SIZE] = b;
        }
        self.len += n;
        n
    }

    /// Copy out up to `max` bytes from the head without consuming them.
    fn peek(&self, max: usize) -> Vec<u8> {
        let n = max.min(self.len);
        (0..n).map(|i| self.buf[(self.head + i) % TCP_RING_SIZE]).collect()
    }

    fn pop_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.head = (self.head + n) % TCP_RING_SIZE;
        self.len -= n;
    }
}

struct Tcb {
    state: TcpState,
    local_port: u16,
    remote_ip: [u8; 4],
    remote_port: u16,

    snd_una: u32,
    snd_nxt: u32,
    rcv_nxt: u32,
    rcv_wnd: u16,

    tx_ring: TcpRing,
    rx_ring: TcpRing,
    /// Bytes at the head of `tx_ring` already transmitted, awaiting ACK.
    in_flight: usize,

    rto_ticks: u64,
    last_send_tick: u64,
    retries: u32,

    is_listen: bool,
    /// Listener only: the TCB index of a connection accepted out of
    /// the SYN backlog, waiting for `accept` to claim it. The backlog
    /// is a single slot, per the spec's single-pending-TCB listener.
    backlog_conn: Option<usize>,

    /// Set when the connection was torn down by a reset or by
    /// exhausting retransmission retries; `recv`/`send` surface it once
    /// and then clear it, matching a one-shot error report to the
    /// owning socket.
    error: Option<KernelError>,
}

impl Tcb {
    fn closed() -> Self {
        Self {
            state: TcpState::Closed,
            local_port: 0,
            remote_ip: [0; 4],
            remote_port: 0,
            snd_una: 0,
            snd_nxt: 0,
            rcv_nxt: 0,
            rcv_wnd: TCP_RING_SIZE as u16,
            tx_ring: TcpRing::new(),
            rx_ring: TcpRing::new(),
            in_flight: 0,
            rto_ticks: TCP_RTO_INIT,
            last_send_tick: 0,
            retries: 0,
            is_listen: false,
            backlog_conn: None,
            error: None,
        }
    }
}

lazy_static! {
    static ref TCBS: Mutex<[Option<Tcb>; TCP_MAX_CONNECTIONS]> =
        Mutex::new(core::array::from_fn(|_| None));
}

fn now_ticks() -> u64 {
    crate::arch::x86::timer::ticks()
}

/// A pseudo-random-enough initial sequence number. Real TCP stacks mix
/// in a clock and a per-connection secret; this kernel's crypto-grade
/// CSPRNG is overkill for an ISN and the network stack initializes
/// before it's seeded, so the tick counter plus a per-call counter is
/// used instead.
fn generate_initial_seq() -> u32 {
    static COUNTER: spin::Mutex<u32> = spin::Mutex::new(0);
    let mut c = COUNTER.lock();
    *c = c.wrapping_add(64000);
    now_ticks() as u32 ^ *c
}

fn build_segment(
    src_ip: Ipv4Address,
    dst_ip: Ipv4Address,
    local_port: u16,
    remote_port: u16,
    seq: u32,
    ack: u32,
    flags: u8,
    window: u16,
    payload: &[u8],
) -> Vec<u8> {
    let mut seg = Vec::with_capacity(TCP_HEADER_SIZE + payload.len());
    seg.extend_from_slice(&local_port.to_be_bytes());
    seg.extend_from_slice(&remote_port.to_be_bytes());
    seg.extend_from_slice(&seq.to_be_bytes());
    seg.extend_from_slice(&ack.to_be_bytes());
    seg.push(((TCP_HEADER_SIZE / 4) as u8) << 4); // data offset, no options
    seg.push(flags);
    seg.extend_from_slice(&window.to_be_bytes());
    seg.extend_from_slice(&0u16.to_be_bytes()); // checksum filled below
    seg.extend_from_slice(&0u16.to_be_bytes()); // urgent pointer, unused
    seg.extend_from_slice(payload);

    let checksum = segment_checksum(src_ip, dst_ip, &seg);
    seg[16..18].copy_from_slice(&checksum.to_be_bytes());
    seg
}

/// RFC 793 checksum over the segment plus the IPv4 pseudo-header
/// (source, destination, protocol, segment length) — a plain sum over
/// the segment bytes alone would accept corruption the real TCP
/// checksum catches.
fn segment_checksum(src_ip: Ipv4Address, dst_ip: Ipv4Address, seg: &[u8]) -> u16 {
    let mut sum: u32 = 0;

    let pseudo = [
        src_ip.0[0], src_ip.0[1], src_ip.0[2], src_ip.0[3],
        dst_ip.0[0], dst_ip.0[1], dst_ip.0[2], dst_ip.0[3],
        0, super::ip::IpProtocol::Tcp as u8,
    ];
    sum += u16::from_be_bytes([pseudo[0], pseudo[1]]) as u32;
    sum += u16::from_be_bytes([pseudo[2], pseudo[3]]) as u32;
    sum += u16::from_be_bytes([pseudo[4], pseudo[5]]) as u32;
    sum += u16::from_be_bytes([pseudo[6], pseudo[7]]) as u32;
    sum += u16::from_be_bytes([pseudo[8], pseudo[9]]) as u32;
    sum += seg.len() as u32;

    let mut i = 0;
    while i + 1 < seg.len() {
        sum += u16::from_be_bytes([seg[i], seg[i + 1]]) as u32;
        i += 2;
    }
    if i < seg.len() {
        sum += (seg[i] as u32) << 8;
    }
    while sum >> 16 != 0 {
        sum = (sum & 0xFFFF) + (sum >> 16);
    }
    !(sum as u16)
}

fn transmit_segment(tcb: &Tcb, flags: u8, seq: u32, payload: &[u8]) -> Result<(), KernelError> {
    let src_ip = super::ip::get_interface_ip();
    let dst_ip = Ipv4Address(tcb.remote_ip);
    let seg = build_segment(
        src_ip, dst_ip, tcb.local_port, tcb.remote_port, seq, tcb.rcv_nxt, flags, tcb.rcv_wnd, payload,
    );
    super::ip::send(IpAddress::V4(dst_ip), super::ip::IpProtocol::Tcp, &seg)
}

fn alloc_slot(tcbs: &mut [Option<Tcb>; TCP_MAX_CONNECTIONS]) -> Result<usize, KernelError> {
    tcbs.iter()
        .position(Option::is_none)
        .ok_or(KernelError::ResourceExhausted { resource: "tcp_connection" })
}

fn ephemeral_port(tcbs: &[Option<Tcb>; TCP_MAX_CONNECTIONS]) -> Result<u16, KernelError> {
    for port in 49152..=65535u16 {
        if !tcbs.iter().flatten().any(|t| t.local_port == port) {
            return Ok(port);
        }
    }
    Err(KernelError::ResourceExhausted { resource: "tcp_port" })
}

/// Allocate a fresh CLOSED TCB. Returns its handle for `listen`/`connect`.
pub fn open() -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let slot = alloc_slot(&mut tcbs)?;
    tcbs[slot] = Some(Tcb::closed());
    Ok(slot)
}

/// Passive open: bind `tcb` to `port` and start accepting connections.
pub fn listen(tcb: usize, port: u16) -> Result<(), KernelError> {
    let mut tcbs = TCBS.lock();
    let t = tcbs
        .get_mut(tcb)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "tcp_connection", id: tcb as u64 })?;
    t.local_port = port;
    t.state = TcpState::Listen;
    t.is_listen = true;
    Ok(())
}

/// Active open: send a SYN to `remote` and move to SYN_SENT. Completion
/// (the handshake finishing) only happens once the peer's segments are
/// drained by [`super::poll`]; callers poll [`get_state`] for
/// `Established`.
pub fn connect(tcb: usize, remote: SocketAddr) -> Result<(), KernelError> {
    let IpAddress::V4(remote_ip) = remote.ip else {
        return Err(KernelError::NotImplemented { feature: "tcp_connect_ipv6" });
    };

    let mut tcbs = TCBS.lock();
    let port = ephemeral_port(&tcbs)?;
    let t = tcbs
        .get_mut(tcb)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "tcp_connection", id: tcb as u64 })?;

    if t.state != TcpState::Closed {
        return Err(KernelError::InvalidState { expected: "closed", actual: "not_closed" });
    }

    let iss = generate_initial_seq();
    t.local_port = port;
    t.remote_ip = remote_ip.0;
    t.remote_port = remote.port;
    t.snd_una = iss;
    t.snd_nxt = iss.wrapping_add(1);
    t.state = TcpState::SynSent;
    t.last_send_tick = now_ticks();
    t.retries = 0;
    t.rto_ticks = TCP_RTO_INIT;

    transmit_segment(t, TcpFlags::SYN, iss, &[])
}

/// Claim a connection out of a listener's single-slot backlog. Returns
/// `WouldBlock` if none is pending yet.
pub fn accept(listener: usize) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let t = tcbs
        .get_mut(listener)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "tcp_connection", id: listener as u64 })?;

    if !t.is_listen {
        return Err(KernelError::InvalidState { expected: "listen", actual: "not_listen" });
    }

    t.backlog_conn.take().ok_or(KernelError::WouldBlock)
}

/// Queue `data` for transmission, returning the number of bytes
/// actually accepted (bounded by free ring space). Transmission itself
/// happens here if nothing is currently in flight, and via
/// [`timer_tick`] retries otherwise.
pub fn send(tcb: usize, data: &[u8]) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let t = tcbs
        .get_mut(tcb)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "tcp_connection", id: tcb as u64 })?;

    if let Some(err) = t.error.take() {
        return Err(err);
    }
    if t.state != TcpState::Established && t.state != TcpState::CloseWait {
        return Err(KernelError::InvalidState { expected: "established", actual: "not_established" });
    }

    let queued = t.tx_ring.push(data);
    try_send_next(t);
    Ok(queued)
}

/// Send the next unsent segment if nothing is currently in flight.
fn try_send_next(t: &mut Tcb) {
    if t.in_flight > 0 {
        return;
    }
    let queued = t.tx_ring.len - t.in_flight;
    if queued == 0 {
        return;
    }
    let chunk = t.tx_ring.peek(queued.min(TCP_MSS));
    let seq = t.snd_nxt;
    if transmit_segment(t, TcpFlags::ACK | TcpFlags::PSH, seq, &chunk).is_ok() {
        t.in_flight = chunk.len();
        t.snd_nxt = seq.wrapping_add(chunk.len() as u32);
        t.last_send_tick = now_ticks();
    }
}

/// Copy up to `buf.len()` already-received bytes out of the receive
/// ring. Returns `Ok(0)` immediately if nothing has arrived yet —
/// blocking is the caller's responsibility (poll-and-retry against the
/// scheduler's sleep primitive), matching the rest of this kernel's
/// sleep-poll blocking style.
pub fn recv(tcb: usize, buf: &mut [u8]) -> Result<usize, KernelError> {
    let mut tcbs = TCBS.lock();
    let t = tcbs
        .get_mut(tcb)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "tcp_connection", id: tcb as u64 })?;

    if let Some(err) = t.error.take() {
        return Err(err);
    }

    let n = buf.len().min(t.rx_ring.len);
    if n > 0 {
        let data = t.rx_ring.peek(n);
        buf[..n].copy_from_slice(&data);
        t.rx_ring.pop_front(n);
    }
    Ok(n)
}

/// Active close: send FIN and move through the FIN_WAIT path.
pub fn close(tcb: usize) -> Result<(), KernelError> {
    let mut tcbs = TCBS.lock();
    let t = tcbs
        .get_mut(tcb)
        .and_then(Option::as_mut)
        .ok_or(KernelError::NotFound { resource: "tcp_connection", id: tcb as u64 })?;

    match t.state {
        TcpState::Established => {
            let seq = t.snd_nxt;
            transmit_segment(t, TcpFlags::FIN | TcpFlags::ACK, seq, &[])?;
            t.snd_nxt = seq.wrapping_add(1);
            t.state = TcpState::FinWait1;
        }
        TcpState::CloseWait => {
            let seq = t.snd_nxt;
            transmit_segment(t, TcpFlags::FIN | TcpFlags::ACK, seq, &[])?;
            t.snd_nxt = seq.wrapping_add(1);
            t.state = TcpState::LastAck;
        }
        TcpState::Listen | TcpState::SynSent | TcpState::Closed => {
            *tcbs.get_mut(tcb).unwrap() = None;
        }
        _ => {}
    }
    Ok(())
}

pub fn get_state(tcb: usize) -> Option<TcpState> {
    TCBS.lock().get(tcb).and_then(Option::as_ref).map(|t| t.state)
}

/// The remote address a TCB is connected (or was last connected) to.
pub fn peer_addr(tcb: usize) -> Option<SocketAddr> {
    TCBS.lock().get(tcb).and_then(Option::as_ref).map(|t| {
        SocketAddr::v4(Ipv4Address(t.remote_ip), t.remote_port)
    })
}

fn find_by_remote(
    tcbs: &[Option<Tcb>; TCP_MAX_CONNECTIONS],
    local_port: u16,
    remote_ip: [u8; 4],
    remote_port: u16,
) -> Option<usize> {
    tcbs.iter().position(|slot| {
        slot.as_ref().is_some_and(|t| {
            t.local_port == local_port && t.remote_ip == remote_ip && t.remote_port == remote_port
        })
    })
}

fn find_listener(tcbs: &[Option<Tcb>; TCP_MAX_CONNECTIONS], local_port: u16) -> Option<usize> {
    tcbs.iter().position(|slot| slot.as_ref().is_some_and(|t| t.is_listen && t.local_port == local_port))
}

/// Handle a segment arriving for us. Only called from [`super::poll`]'s
/// drain, never re-entrantly from within this module, so locking
/// `TCBS` here and calling [`transmit_segment`] (which only enqueues,
/// never dispatches) is always safe.
pub fn process_packet(src: IpAddress, _dst: IpAddress, data: &[u8]) -> Result<(), KernelError> {
    let IpAddress::V4(src_ip) = src else {
        return Ok(()); // IPv6 peers unsupported, silently drop
    };
    if data.len() < TCP_HEADER_SIZE {
        return Err(KernelError::InvalidArgument { name: "tcp_segment", value: "too_short" });
    }

    let src_port = u16::from_be_bytes([data[0], data[1]]);
    let dst_port = u16::from_be_bytes([data[2], data[3]]);
    let seq = u32::from_be_bytes([data[4], data[5], data[6], data[7]]);
    let ack = u32::from_be_bytes([data[8], data[9], data[10], data[11]]);
    let flags = data[13];
    let data_offset = ((data[12] >> 4) as usize) * 4;
    let payload = if data.len() > data_offset { &data[data_offset..] } else { &[] };

    let mut tcbs = TCBS.lock();

    if let Some(idx) = find_by_remote(&tcbs, dst_port, src_ip.0, src_port) {
        handle_established_segment(&mut tcbs, idx, seq, ack, flags, payload);
        return Ok(());
    }

    if flags & TcpFlags::SYN != 0 && flags & TcpFlags::ACK == 0 {
        if let Some(listener) = find_listener(&tcbs, dst_port) {
            accept_new_connection(&mut tcbs, listener, src_ip, src_port, seq);
        }
        // No listener: the original stack would send RST here. Dropping
        // silently is acceptable for a kernel that never exposes raw
        // sockets to observe it.
    }

    Ok(())
}

fn accept_new_connection(
    tcbs: &mut [Option<Tcb>; TCP_MAX_CONNECTIONS],
    listener: usize,
    src_ip: Ipv4Address,
    src_port: u16,
    peer_seq: u32,
) {
    let Ok(slot) = alloc_slot(tcbs) else { return };
    let local_port = tcbs[listener].as_ref().unwrap().local_port;

    let iss = generate_initial_seq();
    let mut t = Tcb::closed();
    t.local_port = local_port;
    t.remote_ip = src_ip.0;
    t.remote_port = src_port;
    t.snd_una = iss;
    t.snd_nxt = iss.wrapping_add(1);
    t.rcv_nxt = peer_seq.wrapping_add(1);
    t.state = TcpState::SynReceived;
    t.last_send_tick = now_ticks();

    let _ = transmit_segment(&t, TcpFlags::SYN | TcpFlags::ACK, iss, &[]);
    tcbs[slot] = Some(t);
    tcbs[listener].as_mut().unwrap().backlog_conn = Some(slot);
}

fn handle_established_segment(
    tcbs: &mut [Option<Tcb>; TCP_MAX_CONNECTIONS],
    idx: usize,
    seq: u32,
    ack: u32,
    flags: u8,
    payload: &[u8],
) {
    let t = tcbs[idx].as_mut().unwrap();

    if flags & TcpFlags::RST != 0 {
        t.error = Some(KernelError::LegacyError { message: "connection reset by peer" });
        t.state = TcpState::Closed;
        return;
    }

    if flags & TcpFlags::ACK != 0 {
        apply_ack(t, ack);
    }

    match t.state {
        TcpState::SynSent => {
            if flags & TcpFlags::SYN != 0 && flags & TcpFlags::ACK != 0 {
                t.rcv_nxt = seq.wrapping_add(1);
                t.state = TcpState::Established;
                let ack_seq = t.snd_nxt;
                let _ = transmit_segment(t, TcpFlags::ACK, ack_seq, &[]);
            }
        }
        TcpState::SynReceived => {
            if flags & TcpFlags::ACK != 0 {
                t.state = TcpState::Established;
            }
        }
        TcpState::Established | TcpState::CloseWait => {
            if !payload.is_empty() && seq == t.rcv_nxt {
                let accepted = t.rx_ring.push(payload);
                t.rcv_nxt = t.rcv_nxt.wrapping_add(accepted as u32);
                let ack_seq = t.snd_nxt;
                let _ = transmit_segment(t, TcpFlags::ACK, ack_seq, &[]);
            }
            if flags & TcpFlags::FIN != 0 {
                t.rcv_nxt = t.rcv_nxt.wrapping_add(1);
                let ack_seq = t.snd_nxt;
                let _ = transmit_segment(t, TcpFlags::ACK, ack_seq, &[]);
                t.state = TcpState::CloseWait;
            }
        }
        TcpState::FinWait1 => {
            if flags & TcpFlags::FIN != 0 {
                t.rcv_nxt = t.rcv_nxt.wrapping_add(1);
                let ack_seq = t.snd_nxt;
                let _ = transmit_segment(t, TcpFlags::ACK, ack_seq, &[]);
                t.state = if ack == t.snd_nxt { TcpState::TimeWait } else { TcpState::Closing };
            } else if flags & TcpFlags::ACK != 0 && ack == t.snd_nxt {
                t.state = TcpState::FinWait2;
            }
        }
        TcpState::FinWait2 => {
            if flags & TcpFlags::FIN != 0 {
                t.rcv_nxt = t.rcv_nxt.wrapping_add(1);
                let ack_seq = t.snd_nxt;
                let _ = transmit_segment(t, TcpFlags::ACK, ack_seq, &[]);
                t.state = TcpState::TimeWait;
            }
        }
        TcpState::Closing | TcpState::LastAck => {
            if flags & TcpFlags::ACK != 0 && ack == t.snd_nxt {
                tcbs[idx] = None;
            }
        }
        _ => {}
    }
}

/// `ack` covering previously-sent bytes retires them from `tx_ring` and
/// clears the in-flight marker so [`try_send_next`] can send more.
fn apply_ack(t: &mut Tcb, ack: u32) {
    let acked = ack.wrapping_sub(t.snd_una) as usize;
    if acked == 0 || acked > t.in_flight {
        return;
    }
    t.tx_ring.pop_front(acked);
    t.in_flight -= acked;
    t.snd_una = ack;
    t.retries = 0;
    t.rto_ticks = TCP_RTO_INIT;
    if t.in_flight == 0 {
        try_send_next(t);
    }
}

/// Retransmission sweep, called once per [`super::poll`] drain. Never
/// re-entrant with [`process_packet`] — both run from the same
/// cooperative drain point.
pub fn timer_tick(now: u64) {
    let mut tcbs = TCBS.lock();
    for slot in tcbs.iter_mut() {
        let Some(t) = slot else { continue };
        if t.in_flight == 0 || now.wrapping_sub(t.last_send_tick) < t.rto_ticks {
            continue;
        }

        if t.retries >= TCP_MAX_RETRIES {
            t.error = Some(KernelError::Timeout { operation: "tcp_retransmit", duration_ms: 0 });
            t.state = TcpState::Closed;
            t.in_flight = 0;
            continue;
        }

        let chunk = t.tx_ring.peek(t.in_flight);
        let seq = t.snd_una;
        if transmit_segment(t, TcpFlags::ACK | TcpFlags::PSH, seq, &chunk).is_ok() {
            t.retries += 1;
            t.rto_ticks = t.rto_ticks.saturating_mul(2);
            t.last_send_tick = now;
        }
    }
}

/// Handle used by callers (e.g. the TLS client) that want a plain
/// byte-stream object rather than juggling a raw TCB index.
pub struct TcpConnection(usize);

impl TcpConnection {
    pub fn connect(remote: SocketAddr) -> Result<Self, KernelError> {
        let tcb = open()?;
        connect(tcb, remote)?;
        Ok(Self(tcb))
    }

    pub fn send(&mut self, data: &[u8]) -> Result<usize, KernelError> {
        send(self.0, data)
    }

    pub fn recv(&mut self, buf: &mut [u8]) -> Result<usize, KernelError> {
        recv(self.0, buf)
    }

    pub fn state(&self) -> Option<TcpState> {
        get_state(self.0)
    }
}

impl Drop for TcpConnection {
    fn drop(&mut self) {
        let _ = close(self.0);
    }
}

pub fn init() -> Result<(), KernelError> {
    println!("[TCP] Initializing TCP layer...");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reset() {
        let mut tcbs = TCBS.lock();
        for slot in tcbs.iter_mut() {
            *slot = None;
        }
    }

    #[test]
    fn open_allocates_a_closed_tcb() {
        reset();
        let tcb = open().unwrap();
        assert_eq!(get_state(tcb), Some(TcpState::Closed));
    }

    #[test]
    fn exhausting_connections_is_resource_exhausted() {
        reset();
        for _ in 0..TCP_MAX_CONNECTIONS {
            open().unwrap();
        }
        assert!(matches!(open(), Err(KernelError::ResourceExhausted { .. })));
    }

    #[test]
    fn connect_moves_to_syn_sent_and_enqueues_a_syn() {
        reset();
        let tcb = open().unwrap();
        let remote = SocketAddr::v4(Ipv4Address::LOCALHOST, 80);
        connect(tcb, remote).unwrap();
        assert_eq!(get_state(tcb), Some(TcpState::SynSent));
    }

    #[test]
    fn three_way_handshake_over_loopback_reaches_established() {
        reset();
        super::super::device::init().unwrap();

        let listener = open().unwrap();
        listen(listener, 9000).unwrap();

        let client = open().unwrap();
        connect(client, SocketAddr::v4(Ipv4Address::LOCALHOST, 9000)).unwrap();

        // SYN -> listener, generating SYN+ACK
        super::super::poll();
        let server = accept(listener).unwrap();
        assert_eq!(get_state(server), Some(TcpState::SynReceived));

        // SYN+ACK -> client, generating ACK; client reaches ESTABLISHED
        super::super::poll();
        assert_eq!(get_state(client), Some(TcpState::Established));

        // final ACK -> server; server reaches ESTABLISHED
        super::super::poll();
        assert_eq!(get_state(server), Some(TcpState::Established));
    }

    #[test]
    fn data_sent_on_one_side_arrives_on_the_other() {
        reset();
        super::super::device::init().unwrap();

        let listener = open().unwrap();
        listen(listener, 9001).unwrap();
        let client = open().unwrap();
        connect(client, SocketAddr::v4(Ipv4Address::LOCALHOST, 9001)).unwrap();
        super::super::poll();
        let server = accept(listener).unwrap();
        super::super::poll();
        super::super::poll();

        send(client, b"hello").unwrap();
        super::super::poll(); // segment -> server, generating ACK
        super::super::poll(); // ACK -> client

        let mut buf = [0u8; 16];
        let n = recv(server, &mut buf).unwrap();
        assert_eq!(&buf[..n], b"hello");
    }

    #[test]
    fn exhausted_retries_surface_a_timeout_error() {
        reset();
        let tcb = open().unwrap();
        {
            let mut tcbs = TCBS.lock();
            let t = tcbs[tcb].as_mut().unwrap();
            t.state = TcpState::Established;
            t.remote_ip = [10, 0, 0, 1]; // unreachable: nothing ever acks
            t.remote_port = 9999;
        }
        send(tcb, b"x").unwrap();
        for _ in 0..(TCP_MAX_RETRIES + 1) {
            let mut tcbs = TCBS.lock();
            if let Some(t) = tcbs[tcb].as_mut() {
                t.last_send_tick = 0;
            }
            drop(tcbs);
            timer_tick(1_000_000);
        }
        assert!(matches!(recv(tcb, &mut [0u8; 1]), Err(KernelError::Timeout { .. })));
    }
}
