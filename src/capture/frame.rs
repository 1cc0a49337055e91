//! Manual Ethernet/IPv4/UDP frame decoding
//!
//! The capture callback hands us raw link-layer bytes straight off the wire,
//! so every field read is bounds-checked by hand. Anything malformed,
//! truncated, or simply not UDP-on-the-SIP-port decodes to `None` - the hot
//! path never panics and never reads past the buffer.

const ETHERNET_HEADER_LEN: usize = 14;
const ETHERTYPE_IPV4: u16 = 0x0800;
const IPV4_MIN_HEADER_LEN: usize = 20;
const IP_PROTO_UDP: u8 = 17;
const UDP_HEADER_LEN: usize = 8;

/// A UDP datagram on the SIP port, extracted from one captured frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipDatagram {
    pub source_ip: String,
    pub dest_ip: String,
    pub payload: Vec<u8>,
}

/// Decode an Ethernet frame down to a UDP payload on the given SIP port.
///
/// Returns `None` for anything that is not a well-formed IPv4/UDP datagram
/// with at least one port equal to `sip_port` and a non-empty payload.
pub fn decode_sip_datagram(frame: &[u8], sip_port: u16) -> Option<SipDatagram> {
    if frame.len() < ETHERNET_HEADER_LEN {
        return None;
    }
    let ethertype = u16::from_be_bytes([frame[12], frame[13]]);
    if ethertype != ETHERTYPE_IPV4 {
        return None;
    }

    let ip = &frame[ETHERNET_HEADER_LEN..];
    if ip.len() < IPV4_MIN_HEADER_LEN {
        return None;
    }
    if ip[0] >> 4 != 4 {
        return None;
    }
    let header_len = ((ip[0] & 0x0f) as usize) * 4;
    if header_len < IPV4_MIN_HEADER_LEN || ip.len() < header_len {
        return None;
    }
    if ip[9] != IP_PROTO_UDP {
        return None;
    }

    let source_ip = dotted_quad(&ip[12..16]);
    let dest_ip = dotted_quad(&ip[16..20]);

    let udp = &ip[header_len..];
    if udp.len() < UDP_HEADER_LEN {
        return None;
    }
    let source_port = u16::from_be_bytes([udp[0], udp[1]]);
    let dest_port = u16::from_be_bytes([udp[2], udp[3]]);
    let udp_len = u16::from_be_bytes([udp[4], udp[5]]) as usize;
    // A declared length below the header size or past the captured bytes
    // means a truncated or corrupt frame.
    if udp_len < UDP_HEADER_LEN || udp_len > udp.len() {
        return None;
    }

    if source_port != sip_port && dest_port != sip_port {
        return None;
    }

    let payload = &udp[UDP_HEADER_LEN..udp_len];
    if payload.is_empty() {
        return None;
    }

    Some(SipDatagram {
        source_ip,
        dest_ip,
        payload: payload.to_vec(),
    })
}

fn dotted_quad(octets: &[u8]) -> String {
    format!("{}.{}.{}.{}", octets[0], octets[1], octets[2], octets[3])
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Build an Ethernet+IPv4+UDP frame. `declared_udp_len` overrides the UDP
    /// length field when the test needs it to disagree with reality.
    fn build_frame(
        src_ip: [u8; 4],
        dst_ip: [u8; 4],
        src_port: u16,
        dst_port: u16,
        payload: &[u8],
        declared_udp_len: Option<u16>,
    ) -> Vec<u8> {
        let mut frame = Vec::new();
        // Ethernet: dst MAC, src MAC, EtherType
        frame.extend_from_slice(&[0u8; 6]);
        frame.extend_from_slice(&[0u8; 6]);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        // IPv4 header, 20 bytes, no options
        let total_len = (20 + 8 + payload.len()) as u16;
        frame.push(0x45); // version 4, IHL 5
        frame.push(0);
        frame.extend_from_slice(&total_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]); // id, flags, fragment offset
        frame.push(64); // TTL
        frame.push(IP_PROTO_UDP);
        frame.extend_from_slice(&[0, 0]); // checksum
        frame.extend_from_slice(&src_ip);
        frame.extend_from_slice(&dst_ip);
        // UDP header
        let udp_len = declared_udp_len.unwrap_or((8 + payload.len()) as u16);
        frame.extend_from_slice(&src_port.to_be_bytes());
        frame.extend_from_slice(&dst_port.to_be_bytes());
        frame.extend_from_slice(&udp_len.to_be_bytes());
        frame.extend_from_slice(&[0, 0]); // checksum
        frame.extend_from_slice(payload);
        frame
    }

    #[test]
    fn decodes_well_formed_sip_datagram() {
        let frame = build_frame(
            [192, 0, 2, 1],
            [192, 0, 2, 5],
            5060,
            5060,
            b"INVITE sip:100@192.0.2.5 SIP/2.0\r\n",
            None,
        );
        let datagram = decode_sip_datagram(&frame, 5060).unwrap();
        assert_eq!(datagram.source_ip, "192.0.2.1");
        assert_eq!(datagram.dest_ip, "192.0.2.5");
        assert_eq!(datagram.payload, b"INVITE sip:100@192.0.2.5 SIP/2.0\r\n");
    }

    #[test]
    fn rejects_frames_shorter_than_ethernet_header() {
        for len in 0..ETHERNET_HEADER_LEN {
            let frame = vec![0u8; len];
            assert_eq!(decode_sip_datagram(&frame, 5060), None, "length {}", len);
        }
    }

    #[test]
    fn rejects_non_ipv4_ethertype() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"x", None);
        // 0x86DD = IPv6
        frame[12] = 0x86;
        frame[13] = 0xDD;
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_wrong_ip_version_nibble() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"x", None);
        frame[14] = 0x65; // version 6, IHL 5
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_frame_shorter_than_declared_ip_header() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"x", None);
        frame[14] = 0x4f; // IHL 15 -> 60-byte header, longer than the frame
        frame.truncate(ETHERNET_HEADER_LEN + 40);
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_non_udp_protocol() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"x", None);
        frame[ETHERNET_HEADER_LEN + 9] = 6; // TCP
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_declared_udp_length_past_frame_end() {
        let frame = build_frame(
            [10, 0, 0, 1],
            [10, 0, 0, 2],
            5060,
            5060,
            b"hello",
            Some(200),
        );
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_declared_udp_length_below_header_size() {
        let frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"hello", Some(7));
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_truncated_udp_header() {
        let mut frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"x", None);
        frame.truncate(ETHERNET_HEADER_LEN + 20 + 4);
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn rejects_datagram_not_on_sip_port() {
        let frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 53, b"query", None);
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn accepts_sip_port_as_source_or_destination() {
        let from_pbx = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 40000, b"OK", None);
        assert!(decode_sip_datagram(&from_pbx, 5060).is_some());

        let to_pbx = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 40000, 5060, b"OK", None);
        assert!(decode_sip_datagram(&to_pbx, 5060).is_some());
    }

    #[test]
    fn rejects_empty_payload() {
        let frame = build_frame([10, 0, 0, 1], [10, 0, 0, 2], 5060, 5060, b"", None);
        assert_eq!(decode_sip_datagram(&frame, 5060), None);
    }

    #[test]
    fn honors_ip_header_options() {
        // IHL 6 -> 24-byte header with 4 bytes of options before the UDP part.
        let mut frame = Vec::new();
        frame.extend_from_slice(&[0u8; 12]);
        frame.extend_from_slice(&ETHERTYPE_IPV4.to_be_bytes());
        frame.push(0x46); // version 4, IHL 6
        frame.push(0);
        frame.extend_from_slice(&((24 + 8 + 2) as u16).to_be_bytes());
        frame.extend_from_slice(&[0, 0, 0, 0]);
        frame.push(64);
        frame.push(IP_PROTO_UDP);
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(&[172, 16, 0, 1]);
        frame.extend_from_slice(&[172, 16, 0, 2]);
        frame.extend_from_slice(&[0, 0, 0, 0]); // options
        frame.extend_from_slice(&5060u16.to_be_bytes());
        frame.extend_from_slice(&5060u16.to_be_bytes());
        frame.extend_from_slice(&10u16.to_be_bytes());
        frame.extend_from_slice(&[0, 0]);
        frame.extend_from_slice(b"hi");

        let datagram = decode_sip_datagram(&frame, 5060).unwrap();
        assert_eq!(datagram.source_ip, "172.16.0.1");
        assert_eq!(datagram.payload, b"hi");
    }

    #[test]
    fn arbitrary_garbage_never_panics() {
        for len in 0..128usize {
            let frame: Vec<u8> = (0..len).map(|i| (i * 37 % 256) as u8).collect();
            let _ = decode_sip_datagram(&frame, 5060);
        }
    }
}
