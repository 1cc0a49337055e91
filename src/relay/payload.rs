//! Outbound MQTT payload for an incoming-call event.

use chrono::{DateTime, Utc};
use serde::Serialize;
use uuid::Uuid;

use crate::sip::SipEvent;

/// Fixed line label carried in every notification.
pub const LINE_LABEL: &str = "Main Office";

/// Fixed system label identifying the capture appliance.
pub const PHONE_SYSTEM_LABEL: &str = "R-Pi";

/// JSON payload published for each incoming call. Field names are part of
/// the downstream contract.
#[derive(Debug, Clone, Serialize)]
pub struct CallNotification {
    #[serde(rename = "StartTime")]
    pub start_time: DateTime<Utc>,
    #[serde(rename = "EndTime")]
    pub end_time: DateTime<Utc>,
    #[serde(rename = "Guid")]
    pub guid: Uuid,
    #[serde(rename = "ClientID")]
    pub client_id: String,
    #[serde(rename = "Number")]
    pub number: String,
    #[serde(rename = "CallerID")]
    pub caller_id: String,
    #[serde(rename = "Line")]
    pub line: &'static str,
    #[serde(rename = "AtlasId")]
    pub atlas_id: &'static str,
    #[serde(rename = "PhoneSystem")]
    pub phone_system: &'static str,
    #[serde(rename = "PacketSeq")]
    pub packet_seq: u64,
}

impl CallNotification {
    /// Compose a notification for one event, stamped now, with a fresh
    /// correlation id.
    pub fn from_event(client_id: &str, event: &SipEvent) -> Self {
        let now = Utc::now();
        Self {
            start_time: now,
            end_time: now,
            guid: Uuid::new_v4(),
            client_id: client_id.to_string(),
            number: event.number.clone(),
            caller_id: event.display_name.clone(),
            line: LINE_LABEL,
            atlas_id: "",
            phone_system: PHONE_SYSTEM_LABEL,
            packet_seq: event.seq,
        }
    }
}
