//! The immutable event record handed from the capture callback to the
//! dispatch worker.

use super::classify;

/// One qualifying SIP-port datagram, classified.
///
/// Constructed once in the capture callback, consumed exactly once by the
/// dispatch worker; fields never change in between.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SipEvent {
    /// Monotonically increasing per-daemon-run sequence number.
    pub seq: u64,
    pub source_ip: String,
    pub dest_ip: String,
    /// Raw SIP message text as captured.
    pub sip_text: String,
    /// Raw `From` header value.
    pub from_raw: String,
    /// Raw `CSeq` header value.
    pub cseq_raw: String,
    /// Extracted caller number, or `"Unknown"`.
    pub number: String,
    /// Extracted caller display name, or empty.
    pub display_name: String,
    /// Incoming-call invite verdict.
    pub invite: bool,
}

impl SipEvent {
    /// Classify a decoded datagram payload into an event.
    pub fn from_datagram(seq: u64, source_ip: String, dest_ip: String, sip_text: String) -> Self {
        let c = classify::classify(&sip_text, &dest_ip);
        Self {
            seq,
            source_ip,
            dest_ip,
            sip_text,
            from_raw: c.from_raw,
            cseq_raw: c.cseq_raw,
            number: c.number,
            display_name: c.display_name,
            invite: c.invite,
        }
    }
}
