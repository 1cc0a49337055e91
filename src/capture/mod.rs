//! Live packet capture
//!
//! Owns the pcap device: enumeration, selection, promiscuous open, kernel
//! filter, and the blocking read loop on a dedicated thread. The per-frame
//! path decodes, classifies, and enqueues without ever blocking or touching
//! the network.

pub mod frame;

use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;

use pcap::{Active, Capture, Linktype};
use thiserror::Error;

use crate::config::{CaptureConfig, DeviceMode};
use crate::queue::EventQueue;
use crate::sip::SipEvent;

/// Read timeout for the pcap handle; also bounds how long `stop` waits for
/// the capture thread to notice the flag.
const READ_TIMEOUT_MS: i32 = 1000;

/// Capture subsystem errors. All of these are fatal to startup; the daemon
/// relies on its supervisor for restarts.
#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no capture devices found")]
    NoDevices,

    #[error("no capture device matched mode {mode:?} (name filter: {name:?})")]
    NoMatch {
        mode: DeviceMode,
        name: Option<String>,
    },

    #[error("device selection mode 'by-name' requires a device name")]
    MissingDeviceName,

    #[error("pcap error: {0}")]
    Pcap(#[from] pcap::Error),

    #[error("failed to spawn capture thread: {0}")]
    Thread(#[from] std::io::Error),
}

/// Running totals for the periodic stats log.
#[derive(Debug, Default)]
pub struct CaptureStats {
    frames_total: AtomicU64,
    sip_frames: AtomicU64,
    /// Unix timestamp of the last frame, 0 when none seen yet.
    last_frame_at: AtomicI64,
}

impl CaptureStats {
    pub fn frames_total(&self) -> u64 {
        self.frames_total.load(Ordering::Relaxed)
    }

    pub fn sip_frames(&self) -> u64 {
        self.sip_frames.load(Ordering::Relaxed)
    }

    /// Seconds since the last captured frame, or `None` when nothing has
    /// been captured yet.
    pub fn seconds_since_last_frame(&self) -> Option<i64> {
        match self.last_frame_at.load(Ordering::Relaxed) {
            0 => None,
            at => Some((chrono::Utc::now().timestamp() - at).max(0)),
        }
    }

    fn record_frame(&self) {
        self.frames_total.fetch_add(1, Ordering::Relaxed);
        self.last_frame_at
            .store(chrono::Utc::now().timestamp(), Ordering::Relaxed);
    }
}

/// Name/description pair used for device selection.
struct DeviceInfo {
    name: String,
    desc: String,
}

impl DeviceInfo {
    fn contains(&self, fragment: &str) -> bool {
        let fragment = fragment.to_ascii_lowercase();
        self.name.to_ascii_lowercase().contains(&fragment)
            || self.desc.to_ascii_lowercase().contains(&fragment)
    }
}

/// Pick a device index per the configured selection mode.
fn select_device(devices: &[DeviceInfo], config: &CaptureConfig) -> Result<usize, CaptureError> {
    if devices.is_empty() {
        return Err(CaptureError::NoDevices);
    }
    let loopback = || devices.iter().position(|d| d.contains("loopback"));
    let selected = match config.mode {
        DeviceMode::Loopback => loopback(),
        DeviceMode::First => Some(0),
        DeviceMode::ByName => {
            let name = config
                .device_name
                .as_deref()
                .filter(|n| !n.is_empty())
                .ok_or(CaptureError::MissingDeviceName)?;
            devices.iter().position(|d| d.contains(name))
        }
        DeviceMode::Auto => loopback().or(Some(0)),
        DeviceMode::Any => devices
            .iter()
            .position(|d| d.name.eq_ignore_ascii_case("any"))
            .or(Some(0)),
    };
    selected.ok_or_else(|| CaptureError::NoMatch {
        mode: config.mode,
        name: config.device_name.clone(),
    })
}

/// The capture engine: selects and owns the live device and runs the
/// per-frame hot path on its own thread.
pub struct CaptureEngine {
    config: CaptureConfig,
    queue: EventQueue,
    stats: Arc<CaptureStats>,
    seq: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl CaptureEngine {
    pub fn new(config: CaptureConfig, queue: EventQueue) -> Self {
        Self {
            config,
            queue,
            stats: Arc::new(CaptureStats::default()),
            seq: Arc::new(AtomicU64::new(0)),
            stop: Arc::new(AtomicBool::new(false)),
            handle: None,
        }
    }

    pub fn stats(&self) -> Arc<CaptureStats> {
        self.stats.clone()
    }

    /// Enumerate devices, select one, open it promiscuous with the SIP-port
    /// filter installed, and start the capture thread.
    pub fn start(&mut self) -> Result<(), CaptureError> {
        let devices = pcap::Device::list()?;
        if devices.is_empty() {
            return Err(CaptureError::NoDevices);
        }

        tracing::info!("available capture devices ({}):", devices.len());
        for (index, device) in devices.iter().enumerate() {
            tracing::info!(
                "  [{}] {} - {}",
                index,
                device.name,
                device.desc.as_deref().unwrap_or("no description")
            );
        }

        let infos: Vec<DeviceInfo> = devices
            .iter()
            .map(|d| DeviceInfo {
                name: d.name.clone(),
                desc: d.desc.clone().unwrap_or_default(),
            })
            .collect();
        let index = select_device(&infos, &self.config)?;
        let device = devices.into_iter().nth(index).ok_or(CaptureError::NoDevices)?;
        tracing::info!(
            device = %device.name,
            mode = ?self.config.mode,
            "selected capture device"
        );

        let mut capture = Capture::from_device(device)?
            .promisc(true)
            .timeout(READ_TIMEOUT_MS)
            .open()?;
        capture.filter(&format!("udp port {}", self.config.sip_port), true)?;
        tracing::info!(
            sip_port = self.config.sip_port,
            "device opened promiscuous with SIP filter installed"
        );

        let datalink = capture.get_datalink();
        if datalink != Linktype::ETHERNET {
            tracing::warn!(
                datalink = ?datalink,
                "device datalink is not Ethernet; frames will not decode"
            );
        }

        let sip_port = self.config.sip_port;
        let queue = self.queue.clone();
        let stats = self.stats.clone();
        let seq = self.seq.clone();
        let stop = self.stop.clone();
        let handle = std::thread::Builder::new()
            .name("callwatch-capture".to_string())
            .spawn(move || capture_loop(capture, sip_port, queue, stats, seq, stop))
            .map_err(CaptureError::Thread)?;
        self.handle = Some(handle);
        tracing::info!("packet capture started");
        Ok(())
    }

    /// Stop capture and release the device. Idempotent: safe before `start`
    /// and safe to call twice.
    pub fn stop(&mut self) {
        self.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            if handle.join().is_err() {
                tracing::error!("capture thread panicked");
            }
            tracing::info!(
                frames = self.stats.frames_total(),
                sip_frames = self.stats.sip_frames(),
                "packet capture stopped"
            );
        }
    }
}

impl Drop for CaptureEngine {
    fn drop(&mut self) {
        self.stop();
    }
}

/// The blocking read loop. Dropping the capture handle on exit closes and
/// releases the device.
fn capture_loop(
    mut capture: Capture<Active>,
    sip_port: u16,
    queue: EventQueue,
    stats: Arc<CaptureStats>,
    seq: Arc<AtomicU64>,
    stop: Arc<AtomicBool>,
) {
    loop {
        if stop.load(Ordering::Relaxed) {
            break;
        }
        match capture.next_packet() {
            Ok(packet) => {
                stats.record_frame();
                let Some(datagram) = frame::decode_sip_datagram(packet.data, sip_port) else {
                    continue;
                };
                stats.sip_frames.fetch_add(1, Ordering::Relaxed);
                let seq = seq.fetch_add(1, Ordering::Relaxed) + 1;
                let sip_text = String::from_utf8_lossy(&datagram.payload).into_owned();
                tracing::debug!(
                    seq,
                    source = %datagram.source_ip,
                    dest = %datagram.dest_ip,
                    bytes = datagram.payload.len(),
                    "SIP datagram captured"
                );
                queue.push(SipEvent::from_datagram(
                    seq,
                    datagram.source_ip,
                    datagram.dest_ip,
                    sip_text,
                ));
            }
            // The read timeout is how the loop polls the stop flag.
            Err(pcap::Error::TimeoutExpired) => continue,
            Err(e) => {
                tracing::error!("capture read failed: {e}");
                break;
            }
        }
    }
    tracing::debug!("capture loop exited");
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo {
                name: "eth0".to_string(),
                desc: "Primary network adapter".to_string(),
            },
            DeviceInfo {
                name: "lo".to_string(),
                desc: "Loopback interface".to_string(),
            },
            DeviceInfo {
                name: "any".to_string(),
                desc: "Pseudo-device that captures on all interfaces".to_string(),
            },
        ]
    }

    fn config(mode: DeviceMode, name: Option<&str>) -> CaptureConfig {
        CaptureConfig {
            mode,
            device_name: name.map(str::to_string),
            sip_port: 5060,
        }
    }

    #[test]
    fn loopback_mode_matches_name_or_description() {
        let index = select_device(&devices(), &config(DeviceMode::Loopback, None)).unwrap();
        assert_eq!(index, 1);
    }

    #[test]
    fn loopback_mode_fails_without_a_loopback_device() {
        let devices = vec![DeviceInfo {
            name: "eth0".to_string(),
            desc: String::new(),
        }];
        let err = select_device(&devices, &config(DeviceMode::Loopback, None)).unwrap_err();
        assert!(matches!(err, CaptureError::NoMatch { .. }));
    }

    #[test]
    fn first_mode_takes_the_first_device() {
        let index = select_device(&devices(), &config(DeviceMode::First, None)).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn by_name_mode_matches_a_fragment_case_insensitively() {
        let index =
            select_device(&devices(), &config(DeviceMode::ByName, Some("ETH"))).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn by_name_mode_without_a_name_is_an_error() {
        let err = select_device(&devices(), &config(DeviceMode::ByName, None)).unwrap_err();
        assert!(matches!(err, CaptureError::MissingDeviceName));

        let err = select_device(&devices(), &config(DeviceMode::ByName, Some(""))).unwrap_err();
        assert!(matches!(err, CaptureError::MissingDeviceName));
    }

    #[test]
    fn auto_mode_prefers_loopback_then_first() {
        let index = select_device(&devices(), &config(DeviceMode::Auto, None)).unwrap();
        assert_eq!(index, 1);

        let no_loopback = vec![DeviceInfo {
            name: "eth0".to_string(),
            desc: String::new(),
        }];
        let index = select_device(&no_loopback, &config(DeviceMode::Auto, None)).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn any_mode_prefers_the_literal_any_device() {
        let index = select_device(&devices(), &config(DeviceMode::Any, None)).unwrap();
        assert_eq!(index, 2);

        let no_any = vec![DeviceInfo {
            name: "eth0".to_string(),
            desc: String::new(),
        }];
        let index = select_device(&no_any, &config(DeviceMode::Any, None)).unwrap();
        assert_eq!(index, 0);
    }

    #[test]
    fn empty_device_list_is_an_error() {
        let err = select_device(&[], &config(DeviceMode::Auto, None)).unwrap_err();
        assert!(matches!(err, CaptureError::NoDevices));
    }

    #[test]
    fn stop_before_start_is_a_no_op() {
        let mut engine = CaptureEngine::new(CaptureConfig::default(), EventQueue::new(16));
        engine.stop();
        engine.stop();
    }
}
