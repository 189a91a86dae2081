//! Packet-type and latency-class enumerations, and the first-byte wire
//! ranges that distinguish them (spec.md §6).

/// The type recognized from the first byte of a packet's buffer (or, for
/// IPv4, the version nibble).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PacketType {
    /// Queue Length Advertisement Message, first byte 0x10.
    Qlam,
    /// Link State Advertisement, first byte 0x13.
    Lsa,
    /// A zombie packet: valid IPv4 header, protocol 63, DSCP 1 (tolerant).
    /// Never the literal first byte of the wire buffer.
    Zombie,
    /// An ordinary IPv4 datagram (version nibble 0x4).
    Ipv4,
    Unknown,
}

pub const QLAM_FIRST_BYTE: u8 = 0x10;
pub const LSA_FIRST_BYTE: u8 = 0x13;
/// "Any local network" IP protocol number, used to mark zombie packets.
pub const IPPROTO_ANY_LOCAL_NETWORK: u8 = 63;
pub const DSCP_EF: u8 = 46;
pub const DSCP_DEFAULT: u8 = 0;
pub const DSCP_TOLERANT: u8 = 1;

impl PacketType {
    /// Classify a packet from its leading buffer bytes, as IP protocol field
    /// and DSCP where needed. Does not allocate and never looks past what it
    /// needs.
    pub fn classify(buf: &[u8]) -> PacketType {
        let Some(&first) = buf.first() else {
            return PacketType::Unknown;
        };
        match first {
            QLAM_FIRST_BYTE => PacketType::Qlam,
            LSA_FIRST_BYTE => PacketType::Lsa,
            b if (b >> 4) == 0x4 => {
                if buf.len() >= 20 {
                    let protocol = buf[9];
                    let dscp = buf[1] >> 2;
                    if protocol == IPPROTO_ANY_LOCAL_NETWORK && dscp == DSCP_TOLERANT {
                        return PacketType::Zombie;
                    }
                }
                PacketType::Ipv4
            }
            _ => PacketType::Unknown,
        }
    }
}

/// Latency classes, ordered exactly as the bin queue manager dequeues them:
/// `CRITICAL` first, `NORMAL` near the end, non-LS zombies last. The
/// discriminant values double as dequeue priority (lower = served first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum LatencyClass {
    Critical = 0,
    Control = 1,
    LowLatency = 2,
    HighLatencyNplbLs = 3,
    HighLatencyZlrLs = 4,
    HighLatencyExp = 5,
    Normal = 6,
    HighLatencyRcvd = 7,
    HighLatencyNplb = 8,
    HighLatencyZlr = 9,
}

/// All latency classes, in dequeue priority order. Used by the bin queue
/// manager to walk its per-class FIFOs in the right order.
pub const LATENCY_CLASS_ORDER: [LatencyClass; 10] = [
    LatencyClass::Critical,
    LatencyClass::Control,
    LatencyClass::LowLatency,
    LatencyClass::HighLatencyNplbLs,
    LatencyClass::HighLatencyZlrLs,
    LatencyClass::HighLatencyExp,
    LatencyClass::Normal,
    LatencyClass::HighLatencyRcvd,
    LatencyClass::HighLatencyNplb,
    LatencyClass::HighLatencyZlr,
];

impl LatencyClass {
    /// Classify an unset packet from its cached type / DSCP.
    ///
    /// Zombies become `HIGH_LATENCY_RCVD` (received from the wire, not
    /// generated locally); DSCP-EF IPv4 becomes `LOW_LATENCY`; other IPv4
    /// becomes `NORMAL`; QLAM/LSA becomes `CONTROL`.
    pub fn classify(packet_type: PacketType, dscp: u8) -> LatencyClass {
        match packet_type {
            PacketType::Zombie => LatencyClass::HighLatencyRcvd,
            PacketType::Qlam | PacketType::Lsa => LatencyClass::Control,
            PacketType::Ipv4 => {
                if dscp == DSCP_EF {
                    LatencyClass::LowLatency
                } else {
                    LatencyClass::Normal
                }
            }
            PacketType::Unknown => LatencyClass::Normal,
        }
    }

    /// True for the five zombie classes (virtual, non-delivering packets).
    pub fn is_zombie(self) -> bool {
        matches!(
            self,
            LatencyClass::HighLatencyExp
                | LatencyClass::HighLatencyNplbLs
                | LatencyClass::HighLatencyZlrLs
                | LatencyClass::HighLatencyRcvd
                | LatencyClass::HighLatencyNplb
                | LatencyClass::HighLatencyZlr
        )
    }

    /// True for `LOW_LATENCY` and the three LS zombie classes.
    pub fn is_latency_sensitive(self) -> bool {
        matches!(
            self,
            LatencyClass::LowLatency
                | LatencyClass::HighLatencyNplbLs
                | LatencyClass::HighLatencyZlrLs
                | LatencyClass::HighLatencyExp
        )
    }
}

/// Which process-role component currently owns a packet. In the original
/// multi-process layout this guarded a real ownership handoff across an IPC
/// boundary; here it is a plain diagnostic field logged as a packet moves
/// conceptually between the udp proxy and the bpf within one process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PacketOwner {
    #[default]
    None,
    UdpProxy,
    TcpProxy,
    Bpf,
}

/// CAT (Cross-path Adaptive Transport) per-packet metadata header tags,
/// prepended by the path controller in this fixed order before the wire
/// payload (spec.md §6).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CatHeaderType {
    DstVec = 0x34,
    PacketId = 0x35,
    PacketHistory = 0x36,
    PacketLatency = 0x37,
}

impl CatHeaderType {
    /// Total on-wire size of this header, tag byte included.
    pub fn wire_len(self) -> usize {
        match self {
            CatHeaderType::DstVec => 4,
            CatHeaderType::PacketId => 4,
            CatHeaderType::PacketHistory => 12,
            CatHeaderType::PacketLatency => 8,
        }
    }

    pub fn from_tag(tag: u8) -> Option<CatHeaderType> {
        match tag {
            0x34 => Some(CatHeaderType::DstVec),
            0x35 => Some(CatHeaderType::PacketId),
            0x36 => Some(CatHeaderType::PacketHistory),
            0x37 => Some(CatHeaderType::PacketLatency),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classifies_qlam_and_ipv4() {
        assert_eq!(PacketType::classify(&[0x10, 0, 0]), PacketType::Qlam);
        let mut ip = vec![0x45u8, 0, 0, 0, 0, 0, 0, 0, 0, 17];
        ip.resize(20, 0);
        assert_eq!(PacketType::classify(&ip), PacketType::Ipv4);
    }

    #[test]
    fn classifies_zombie_by_protocol_and_dscp() {
        let mut buf = vec![0x45u8, (DSCP_TOLERANT << 2), 0, 0, 0, 0, 0, 0, 0, 63];
        buf.resize(20, 0);
        assert_eq!(PacketType::classify(&buf), PacketType::Zombie);
    }

    #[test]
    fn latency_class_order_matches_dequeue_priority() {
        assert!(LatencyClass::Critical < LatencyClass::Normal);
        assert!(LatencyClass::Normal < LatencyClass::HighLatencyZlr);
    }

    #[test]
    fn zombie_and_ls_flags() {
        assert!(LatencyClass::HighLatencyZlr.is_zombie());
        assert!(!LatencyClass::Normal.is_zombie());
        assert!(LatencyClass::LowLatency.is_latency_sensitive());
        assert!(LatencyClass::HighLatencyExp.is_latency_sensitive());
        assert!(!LatencyClass::HighLatencyZlr.is_latency_sensitive());
    }
}
