//! SIP message classification
//!
//! Narrow, header-extraction-only view of SIP. This is not a protocol
//! implementation: the daemon only needs the `From` and `CSeq` header values,
//! the caller number and display name, and a verdict on whether a message is
//! an incoming call invite targeting this host.

mod classify;
mod event;

pub use event::SipEvent;
