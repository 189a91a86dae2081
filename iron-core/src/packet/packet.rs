//! The `Packet` type: a fixed-capacity buffer plus the metadata an IRON
//! node attaches to it as it moves through the bpf, path controller, and
//! udp proxy (spec.md §4.1).

use super::bin::{BinId, DstVec};
use super::checksum::{ipv4_checksum, tcp_checksum, udp_checksum};
use super::mgen::{self, MgenInfo};
use super::types::{CatHeaderType, LatencyClass, PacketOwner, PacketType};
use std::time::Instant;

/// Packets never exceed this size on the wire; the in-memory buffer is
/// sized with headroom for the largest CAT metadata stack a path
/// controller can prepend.
pub const MAX_PACKET_SIZE: usize = 66_000;

/// Depth of the packet history vector: the path controllers (bin, path
/// controller id, send time) this packet has visited, oldest first, used
/// to detect forwarding loops.
pub const HISTORY_DEPTH: usize = 11;

/// One recorded hop in a packet's forwarding history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct HistoryEntry {
    pub bin_id: u8,
    pub path_controller_id: u8,
}

/// A five-tuple extracted from an IPv4 + UDP/TCP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FiveTuple {
    pub src_addr: [u8; 4],
    pub dst_addr: [u8; 4],
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u8,
}

/// Per-packet boolean toggles carried alongside the buffer.
#[derive(Debug, Clone, Copy, Default)]
pub struct PacketFlags {
    /// Time-to-go has been stamped and is still meaningful.
    pub ttg_valid: bool,
    /// This packet is an in-order-delivery zombie rather than real data.
    pub is_zombie: bool,
    /// Admitted under Zombie Latency Reduction accounting rather than
    /// real queue occupancy.
    pub is_zlr_admitted: bool,
}

/// A packet buffer and the metadata an IRON node attaches to it.
///
/// `buf` holds up to [`MAX_PACKET_SIZE`] bytes; `start` and `len` describe
/// the live region within it so that header prepend/strip can be done
/// without copying the payload, as long as headroom remains.
#[derive(Debug, Clone)]
pub struct Packet {
    buf: Box<[u8; MAX_PACKET_SIZE]>,
    start: usize,
    len: usize,

    packet_type: PacketType,
    latency_class: LatencyClass,
    /// Length the packet counts as for queue-depth accounting, which can
    /// differ from `len` for zombie packets (virtual bytes only).
    virtual_len: u32,

    recv_time: Option<Instant>,
    origin_ts_ms: Option<u64>,
    ttg_usec: u32,
    order_time: Option<Instant>,

    src_bin_id: BinId,
    /// 20-bit packet identifier, unique per (src_bin_id, generation).
    packet_id: u32,

    flags: PacketFlags,
    history: [HistoryEntry; HISTORY_DEPTH],
    history_len: usize,
    dst_vec: DstVec,
    owner: PacketOwner,

    refcount: u32,
}

impl Packet {
    /// Build a packet by copying `data` into a freshly zeroed buffer,
    /// classifying its type from the leading bytes.
    pub fn new(data: &[u8], src_bin_id: BinId) -> Self {
        let mut buf = Box::new([0u8; MAX_PACKET_SIZE]);
        let start = MAX_PACKET_SIZE / 4;
        let len = data.len().min(MAX_PACKET_SIZE - start);
        buf[start..start + len].copy_from_slice(&data[..len]);
        let packet_type = PacketType::classify(&buf[start..start + len]);
        let dscp = if len >= 2 { buf[start + 1] >> 2 } else { 0 };
        Packet {
            buf,
            start,
            len,
            packet_type,
            latency_class: LatencyClass::classify(packet_type, dscp),
            virtual_len: len as u32,
            recv_time: None,
            origin_ts_ms: None,
            ttg_usec: 0,
            order_time: None,
            src_bin_id,
            packet_id: 0,
            flags: PacketFlags::default(),
            history: [HistoryEntry::default(); HISTORY_DEPTH],
            history_len: 0,
            dst_vec: DstVec::empty(),
            owner: PacketOwner::None,
            refcount: 1,
        }
    }

    /// Build a zero-length virtual (zombie) packet of `virtual_len` bytes,
    /// used by Zombie Latency Reduction to pad the effective queue depth
    /// without carrying real payload.
    pub fn new_zombie(virtual_len: u32, src_bin_id: BinId, latency_class: LatencyClass) -> Self {
        let buf = Box::new([0u8; MAX_PACKET_SIZE]);
        Packet {
            buf,
            start: MAX_PACKET_SIZE / 4,
            len: 0,
            packet_type: PacketType::Zombie,
            latency_class,
            virtual_len,
            recv_time: None,
            origin_ts_ms: None,
            ttg_usec: 0,
            order_time: None,
            src_bin_id,
            packet_id: 0,
            flags: PacketFlags {
                is_zombie: true,
                ..PacketFlags::default()
            },
            history: [HistoryEntry::default(); HISTORY_DEPTH],
            history_len: 0,
            dst_vec: DstVec::empty(),
            owner: PacketOwner::None,
            refcount: 1,
        }
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf[self.start..self.start + self.len]
    }

    pub fn as_bytes_mut(&mut self) -> &mut [u8] {
        &mut self.buf[self.start..self.start + self.len]
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn virtual_len(&self) -> u32 {
        self.virtual_len
    }

    pub fn set_virtual_len(&mut self, len: u32) {
        self.virtual_len = len;
    }

    pub fn packet_type(&self) -> PacketType {
        self.packet_type
    }

    pub fn latency_class(&self) -> LatencyClass {
        self.latency_class
    }

    pub fn set_latency_class(&mut self, class: LatencyClass) {
        self.latency_class = class;
    }

    pub fn src_bin_id(&self) -> BinId {
        self.src_bin_id
    }

    pub fn packet_id(&self) -> u32 {
        self.packet_id & 0x000F_FFFF
    }

    pub fn set_packet_id(&mut self, id: u32) {
        self.packet_id = id & 0x000F_FFFF;
    }

    pub fn dst_vec(&self) -> DstVec {
        self.dst_vec
    }

    pub fn set_dst_vec(&mut self, v: DstVec) {
        self.dst_vec = v;
    }

    pub fn owner(&self) -> PacketOwner {
        self.owner
    }

    pub fn set_owner(&mut self, owner: PacketOwner) {
        self.owner = owner;
    }

    /// Best-effort MGEN flow id / sequence, read from the UDP payload, for
    /// diagnostic logging only.
    pub fn mgen_info(&self) -> Option<MgenInfo> {
        let ihl = self.ip_header_len()?;
        let bytes = self.as_bytes();
        if bytes.get(9) != Some(&17) {
            return None;
        }
        mgen::parse(bytes.get(ihl + 8..)?)
    }

    pub fn flags(&self) -> PacketFlags {
        self.flags
    }

    pub fn flags_mut(&mut self) -> &mut PacketFlags {
        &mut self.flags
    }

    pub fn refcount(&self) -> u32 {
        self.refcount
    }

    pub fn set_refcount(&mut self, n: u32) {
        self.refcount = n;
    }

    /// Stamp the time this packet arrived at the node, for age/TTG
    /// computation downstream.
    pub fn set_recv_time(&mut self, now: Instant) {
        self.recv_time = Some(now);
    }

    pub fn set_recv_time_opt(&mut self, recv_time: Option<Instant>) {
        self.recv_time = recv_time;
    }

    pub fn recv_time(&self) -> Option<Instant> {
        self.recv_time
    }

    pub fn set_origin_timestamp_ms(&mut self, ts_ms: u64) {
        self.origin_ts_ms = Some(ts_ms);
    }

    pub fn origin_timestamp_ms(&self) -> Option<u64> {
        self.origin_ts_ms
    }

    /// Set the time-to-go budget (microseconds remaining before a
    /// latency-sensitive packet should be dropped as stale) and mark it
    /// valid.
    pub fn set_ttg_usec(&mut self, ttg_usec: u32) {
        self.ttg_usec = ttg_usec;
        self.flags.ttg_valid = true;
    }

    pub fn ttg_usec(&self) -> Option<u32> {
        self.flags.ttg_valid.then_some(self.ttg_usec)
    }

    pub fn set_order_time(&mut self, now: Instant) {
        self.order_time = Some(now);
    }

    pub fn order_time(&self) -> Option<Instant> {
        self.order_time
    }

    /// True if `now` is past this packet's TTG deadline from `recv_time`.
    /// A packet with no valid TTG or no recorded receive time never
    /// expires by this check.
    pub fn has_expired(&self, now: Instant) -> bool {
        match (self.recv_time, self.ttg_usec()) {
            (Some(recv), Some(ttg)) => {
                now.duration_since(recv).as_micros() as u64 > ttg as u64
            }
            _ => false,
        }
    }

    /// Time-to-go remaining at `now`, relative to `recv_time`. `None` if
    /// either the TTG or the receive time was never stamped.
    pub fn remaining_ttg_usec(&self, now: Instant) -> Option<u32> {
        let recv = self.recv_time?;
        let ttg = self.ttg_usec()?;
        let elapsed = now.duration_since(recv).as_micros() as u64;
        Some(ttg.saturating_sub(elapsed as u32))
    }

    /// Push a hop onto the front of the history vector (most-recent-first),
    /// dropping the oldest entry once full. `history()[0]` is always the
    /// most recently pushed hop, so after forwarding through bin `b`,
    /// `history()[0].bin_id == b`.
    pub fn push_history(&mut self, entry: HistoryEntry) {
        let used = self.history_len.min(HISTORY_DEPTH - 1);
        self.history.copy_within(0..used, 1);
        self.history[0] = entry;
        self.history_len = (self.history_len + 1).min(HISTORY_DEPTH);
    }

    pub fn history(&self) -> &[HistoryEntry] {
        &self.history[..self.history_len]
    }

    /// True if `entry` already appears in the history vector, i.e.
    /// forwarding this packet there again would create a loop.
    pub fn history_contains(&self, entry: HistoryEntry) -> bool {
        self.history().contains(&entry)
    }

    /// True if `bin_id` appears anywhere in the history vector, regardless
    /// of which path controller carried it there. Used by the forwarding
    /// algorithm's loop check: a neighbor bin the packet has already
    /// visited is never a valid next hop.
    pub fn history_contains_bin(&self, bin_id: u8) -> bool {
        self.history().iter().any(|h| h.bin_id == bin_id)
    }

    /// Remove `n` bytes from the front of the live region (e.g. stripping
    /// a consumed CAT header), shrinking `len` and advancing `start`.
    pub fn strip_front(&mut self, n: usize) {
        let n = n.min(self.len);
        self.start += n;
        self.len -= n;
    }

    /// Prepend `data` to the live region, using spare headroom before
    /// `start` if available. Returns `false` (and leaves the packet
    /// unmodified) if there isn't enough headroom.
    pub fn prepend(&mut self, data: &[u8]) -> bool {
        if data.len() > self.start {
            return false;
        }
        self.start -= data.len();
        self.buf[self.start..self.start + data.len()].copy_from_slice(data);
        self.len += data.len();
        true
    }

    /// Append `data` after the live region. Returns `false` if the buffer
    /// lacks tail room.
    pub fn append(&mut self, data: &[u8]) -> bool {
        let end = self.start + self.len;
        if end + data.len() > self.buf.len() {
            return false;
        }
        self.buf[end..end + data.len()].copy_from_slice(data);
        self.len += data.len();
        true
    }

    /// Remove `n` bytes from the tail of the live region.
    pub fn remove_tail(&mut self, n: usize) {
        self.len = self.len.saturating_sub(n);
    }

    /// Prepend a CAT metadata header with `tag` and `payload`, where
    /// `payload.len() + 1 == CatHeaderType::wire_len(tag)`.
    pub fn prepend_cat_header(&mut self, header: CatHeaderType, payload: &[u8]) -> bool {
        let mut buf = Vec::with_capacity(header.wire_len());
        buf.push(header as u8);
        buf.extend_from_slice(payload);
        self.prepend(&buf)
    }

    /// Parse the leading bytes as repeated CAT headers, stripping each one
    /// found and returning `(tag, payload)` pairs in wire order. Stops at
    /// the first byte that isn't a recognized CAT tag.
    pub fn strip_cat_headers(&mut self) -> Vec<(CatHeaderType, Vec<u8>)> {
        let mut out = Vec::new();
        loop {
            let bytes = self.as_bytes();
            let Some(&tag) = bytes.first() else { break };
            let Some(header) = CatHeaderType::from_tag(tag) else {
                break;
            };
            let wire_len = header.wire_len();
            if bytes.len() < wire_len {
                break;
            }
            let payload = bytes[1..wire_len].to_vec();
            out.push((header, payload));
            self.strip_front(wire_len);
        }
        out
    }

    /// The IPv4 header, if the live region begins with one.
    pub fn ip_hdr(&self) -> Option<&[u8]> {
        let bytes = self.as_bytes();
        if bytes.len() < 20 || (bytes[0] >> 4) != 4 {
            return None;
        }
        let ihl = ((bytes[0] & 0x0F) as usize) * 4;
        bytes.get(..ihl)
    }

    fn ip_header_len(&self) -> Option<usize> {
        let bytes = self.as_bytes();
        if bytes.len() < 20 || (bytes[0] >> 4) != 4 {
            return None;
        }
        Some(((bytes[0] & 0x0F) as usize) * 4)
    }

    pub fn get_udp_hdr(&self) -> Option<&[u8]> {
        let ihl = self.ip_header_len()?;
        let bytes = self.as_bytes();
        if bytes.get(9) != Some(&17) || bytes.len() < ihl + 8 {
            return None;
        }
        bytes.get(ihl..ihl + 8)
    }

    pub fn get_tcp_hdr(&self) -> Option<&[u8]> {
        let ihl = self.ip_header_len()?;
        let bytes = self.as_bytes();
        if bytes.get(9) != Some(&6) || bytes.len() < ihl + 20 {
            return None;
        }
        bytes.get(ihl..ihl + 20)
    }

    /// Extract the five-tuple from an IPv4 + UDP/TCP packet, if present.
    pub fn get_five_tuple(&self) -> Option<FiveTuple> {
        let ihl = self.ip_header_len()?;
        let bytes = self.as_bytes();
        let protocol = *bytes.get(9)?;
        let src_addr = [bytes[12], bytes[13], bytes[14], bytes[15]];
        let dst_addr = [bytes[16], bytes[17], bytes[18], bytes[19]];
        let (src_port, dst_port) = match protocol {
            17 | 6 => {
                let l4 = bytes.get(ihl..ihl + 4)?;
                (
                    u16::from_be_bytes([l4[0], l4[1]]),
                    u16::from_be_bytes([l4[2], l4[3]]),
                )
            }
            _ => return None,
        };
        Some(FiveTuple {
            src_addr,
            dst_addr,
            src_port,
            dst_port,
            protocol,
        })
    }

    /// Recompute IP and (UDP or TCP) checksums after an in-place header
    /// mutation such as a total-length change from CAT header surgery.
    pub fn update_checksums(&mut self) {
        let Some(ihl) = self.ip_header_len() else {
            return;
        };
        let protocol = self.as_bytes().get(9).copied();
        let addrs = {
            let bytes = self.as_bytes();
            if bytes.len() < 20 {
                return;
            }
            (
                [bytes[12], bytes[13], bytes[14], bytes[15]],
                [bytes[16], bytes[17], bytes[18], bytes[19]],
            )
        };
        {
            let bytes = self.as_bytes_mut();
            ipv4_checksum(&mut bytes[..ihl]);
        }
        match protocol {
            Some(17) => {
                let bytes = self.as_bytes_mut();
                if bytes.len() > ihl {
                    udp_checksum(addrs.0, addrs.1, &mut bytes[ihl..]);
                }
            }
            Some(6) => {
                let bytes = self.as_bytes_mut();
                if bytes.len() > ihl {
                    tcp_checksum(addrs.0, addrs.1, &mut bytes[ihl..]);
                }
            }
            _ => {}
        }
    }

    /// Convert this packet into a zombie in place: drop the real payload,
    /// keep `virtual_len` bytes of queue-depth weight, and mark it so it
    /// is never delivered to an application.
    pub fn make_zombie(&mut self, virtual_len: u32, latency_class: LatencyClass) {
        self.len = 0;
        self.start = MAX_PACKET_SIZE / 4;
        self.virtual_len = virtual_len;
        self.packet_type = PacketType::Zombie;
        self.latency_class = latency_class;
        self.flags.is_zombie = true;
    }
}
