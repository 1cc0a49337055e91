//! Header-value extraction and the incoming-invite verdict.
//!
//! Extraction is line-oriented: the first line whose name matches the wanted
//! header (case-insensitive, optional whitespace before the colon) supplies
//! the value, and the precompiled patterns below pick the URI user part or
//! display name out of that one line.

use once_cell::sync::Lazy;
use regex::Regex;

/// User part of a `<sip:user@host>` URI.
static SIP_URI_USER: Lazy<Regex> = Lazy::new(|| Regex::new(r"<sip:([^@>]+)").unwrap());

/// Quoted or bare display name preceding a `<sip:` URI.
static DISPLAY_NAME: Lazy<Regex> =
    Lazy::new(|| Regex::new(r#"^"?([^"<]+)"?\s*<sip:"#).unwrap());

/// Classifier output for one SIP message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub from_raw: String,
    pub cseq_raw: String,
    pub number: String,
    pub display_name: String,
    pub invite: bool,
}

/// Find the value of the first line matching `^<header>\s*:\s*(value)`.
///
/// Returns the value with leading whitespace stripped, or `None` when no such
/// header line exists or message/header text is blank.
fn find_header<'a>(sip: &'a str, header: &str) -> Option<&'a str> {
    if sip.trim().is_empty() || header.trim().is_empty() {
        return None;
    }
    sip.lines().find_map(|line| header_value(line, header))
}

fn header_value<'a>(line: &'a str, header: &str) -> Option<&'a str> {
    let name = line.get(..header.len())?;
    if !name.eq_ignore_ascii_case(header) {
        return None;
    }
    let rest = line.get(header.len()..)?;
    let rest = rest.trim_start().strip_prefix(':')?;
    Some(rest.trim_start())
}

/// Raw value of the first matching header line, trimmed, truncated at and
/// including the first `>` when present. Empty string when absent.
pub fn header_raw(sip: &str, header: &str) -> String {
    let Some(value) = find_header(sip, header) else {
        return String::new();
    };
    let value = value.trim();
    match value.find('>') {
        Some(end) => value[..=end].to_string(),
        None => value.to_string(),
    }
}

/// User part of the `sip:user@host` URI on the header line, or the literal
/// `"Unknown"` when the header or URI is absent.
pub fn caller_number(sip: &str, header: &str) -> String {
    find_header(sip, header)
        .and_then(|value| SIP_URI_USER.captures(value))
        .map(|caps| caps[1].to_string())
        .unwrap_or_else(|| "Unknown".to_string())
}

/// Display name preceding the `<sip:` URI on the header line, quotes stripped,
/// or empty string when absent.
pub fn display_name(sip: &str, header: &str) -> String {
    find_header(sip, header)
        .and_then(|value| DISPLAY_NAME.captures(value))
        .map(|caps| caps[1].trim().to_string())
        .unwrap_or_default()
}

/// Incoming-call invite verdict, three stages, all must hold:
///
/// 1. The first line starts with `INVITE` and the `CSeq` value names INVITE
///    (a response to an INVITE repeats the method in CSeq but starts with
///    `SIP/2.0`, so this pair distinguishes requests from responses).
/// 2. The request line contains the datagram's destination IP, filtering out
///    INVITEs merely transiting the link toward other hosts.
/// 3. A `Server:` header is present, signalling PBX rather than end-station
///    origin.
///
/// The destination-IP substring match and the `Server:` presence check are
/// deliberate heuristics carried over from the deployed behavior; they are
/// the contract here, not candidates for strengthening.
pub fn is_incoming_invite(sip: &str, dest_ip: &str) -> bool {
    let request_line = sip.lines().next().unwrap_or("");
    let starts_with_invite = request_line
        .get(..6)
        .is_some_and(|method| method.eq_ignore_ascii_case("INVITE"));
    let is_invite_request = starts_with_invite
        && header_raw(sip, "CSeq").to_ascii_uppercase().contains("INVITE");
    if !is_invite_request {
        return false;
    }
    if !request_line.contains(dest_ip) {
        return false;
    }
    find_header(sip, "Server").is_some()
}

/// Run the full classifier over one SIP message.
pub fn classify(sip: &str, dest_ip: &str) -> Classification {
    Classification {
        from_raw: header_raw(sip, "From"),
        cseq_raw: header_raw(sip, "CSeq"),
        number: caller_number(sip, "From"),
        display_name: display_name(sip, "From"),
        invite: is_incoming_invite(sip, dest_ip),
    }
}
