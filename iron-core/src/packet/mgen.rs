//! Best-effort MGEN traffic-generator header recognition. Used only to
//! enrich diagnostic logging with a flow id / sequence number when test
//! traffic is flowing through a node; the bpf's forwarding decisions never
//! depend on this (`original_source` mentions MGEN only in passing, as test
//! traffic, never as something the forwarder parses for correctness).

/// Fields read from a classic MGEN binary message header, if present.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MgenInfo {
    pub flow_id: u32,
    pub sequence: u32,
}

const MGEN_HEADER_LEN: usize = 10;

/// Parse an MGEN header from a UDP payload, if the payload is long enough
/// and its leading message-size field is consistent with the payload's
/// actual length. MGEN has no magic byte, so this is heuristic and can
/// false-positive on payloads that merely happen to look like one.
pub fn parse(udp_payload: &[u8]) -> Option<MgenInfo> {
    if udp_payload.len() < MGEN_HEADER_LEN {
        return None;
    }
    let msg_size = u16::from_be_bytes([udp_payload[0], udp_payload[1]]) as usize;
    if msg_size == 0 || msg_size > udp_payload.len() {
        return None;
    }
    let flow_id = u32::from_be_bytes(udp_payload[2..6].try_into().ok()?);
    let sequence = u32::from_be_bytes(udp_payload[6..10].try_into().ok()?);
    Some(MgenInfo { flow_id, sequence })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(flow_id: u32, sequence: u32, extra: usize) -> Vec<u8> {
        let mut buf = Vec::new();
        buf.extend_from_slice(&((MGEN_HEADER_LEN + extra) as u16).to_be_bytes());
        buf.extend_from_slice(&flow_id.to_be_bytes());
        buf.extend_from_slice(&sequence.to_be_bytes());
        buf.extend(std::iter::repeat(0u8).take(extra));
        buf
    }

    #[test]
    fn parses_well_formed_header() {
        let buf = sample(7, 42, 4);
        let info = parse(&buf).expect("header recognized");
        assert_eq!(info.flow_id, 7);
        assert_eq!(info.sequence, 42);
    }

    #[test]
    fn rejects_too_short_or_inconsistent_size() {
        assert!(parse(&[0u8; 4]).is_none());
        let mut buf = sample(1, 1, 0);
        buf[0] = 0xFF;
        assert!(parse(&buf).is_none());
    }
}
