//! Packet and bin identifier model (spec.md §3, §4.1).

mod bin;
mod checksum;
mod mgen;
mod packet;
mod types;

pub use bin::{BinId, BinIndex, BinKind, BinMap, DstVec, GroupId, UNICAST_GROUP_ID};
pub use checksum::{internet_checksum, ipv4_checksum, tcp_checksum, udp_checksum};
pub use mgen::MgenInfo;
pub use packet::{FiveTuple, HistoryEntry, Packet, PacketFlags, HISTORY_DEPTH, MAX_PACKET_SIZE};
pub use types::{
    CatHeaderType, LatencyClass, PacketOwner, PacketType, DSCP_DEFAULT, DSCP_EF, DSCP_TOLERANT,
    LATENCY_CLASS_ORDER,
};
