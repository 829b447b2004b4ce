use pcap::{Activated, Capture, Device, Error as PcapError, Precision};
use log::{info, debug};
use std::path::Path;
use crate::error::SourceError;
use crate::layer::LinkType;
use crate::packet::Timestamp;

/// Read timeout for live captures, so the run loop can breathe: close idle
/// windows and notice cancellation.
pub const READ_TIMEOUT_MS: i32 = 1000;

/// One read from an upstream source.
#[derive(Debug)]
pub enum SourceEvent<'a> {
    Packet(RawPacket<'a>),
    /// Nothing arrived within the read timeout.
    Timeout,
    /// Orderly end: end of file or closed stream.
    End,
}

/// A frame as captured.
#[derive(Debug, Clone, Copy)]
pub struct RawPacket<'a> {
    pub timestamp: Timestamp,
    /// Length on the wire, which may exceed `data.len()`.
    pub wire_len: u32,
    pub data: &'a [u8],
}

/// Blocking, timed packet reads.
pub trait PacketSource {
    fn link_type(&self) -> LinkType;

    fn next_event(&mut self) -> Result<SourceEvent<'_>, SourceError>;

    /// Human readable origin for log lines.
    fn describe(&self) -> String;
}

/// A live device or a capture file behind libpcap.
pub struct PcapSource {
    cap: Capture<dyn Activated>,
    name: String,
    nanosecond_precision: bool,
    link: LinkType,
}

impl PcapSource {
    /// Open a capture file, asking libpcap for nanosecond timestamps.
    pub fn open_file(path: &Path, filter: Option<&str>) -> Result<Self, SourceError> {
        let cap = Capture::from_file_with_precision(path, Precision::Nano)?;
        let mut source = Self::from_capture(cap.into(), path.display().to_string(), true);
        source.apply_filter(filter)?;
        Ok(source)
    }

    /// Open `iface` for live capture.
    pub fn open_device(iface: &str, filter: Option<&str>) -> Result<Self, SourceError> {
        // 1. List and log all interfaces
        let devices = Device::list()?;
        debug!(
            "Available interfaces: {:?}",
            devices.iter().map(|d| &d.name).collect::<Vec<_>>()
        );

        // 2. Select the named device
        let device = devices
            .into_iter()
            .find(|d| d.name == iface)
            .ok_or_else(|| SourceError::InterfaceNotFound(iface.to_string()))?;

        // 3. Open with immediate mode, a short timeout and a 16 MiB buffer
        let cap = Capture::from_device(device)?
            .promisc(true)
            .snaplen(65535)
            .timeout(READ_TIMEOUT_MS)
            .immediate_mode(true)
            .buffer_size(16 * 1024 * 1024)
            .open()?;
        info!("Started packet capture on interface '{}'", iface);

        let mut source = Self::from_capture(cap.into(), iface.to_string(), false);
        source.apply_filter(filter)?;
        Ok(source)
    }

    fn from_capture(cap: Capture<dyn Activated>, name: String, nanosecond_precision: bool) -> Self {
        let link = LinkType::from_dlt(cap.get_datalink().0);
        debug!("{name}: link type {link:?}");
        Self { cap, name, nanosecond_precision, link }
    }

    fn apply_filter(&mut self, filter: Option<&str>) -> Result<(), SourceError> {
        if let Some(expr) = filter {
            self.cap.filter(expr, true)?;
            debug!("{}: filter \"{}\"", self.name, expr);
        }
        Ok(())
    }
}

impl PacketSource for PcapSource {
    fn link_type(&self) -> LinkType {
        self.link
    }

    fn next_event(&mut self) -> Result<SourceEvent<'_>, SourceError> {
        match self.cap.next_packet() {
            Ok(pkt) => Ok(SourceEvent::Packet(RawPacket {
                timestamp: Timestamp::from_timeval(&pkt.header.ts, self.nanosecond_precision),
                wire_len: pkt.header.len,
                data: pkt.data,
            })),
            Err(PcapError::TimeoutExpired) => Ok(SourceEvent::Timeout),
            Err(PcapError::NoMorePackets) => Ok(SourceEvent::End),
            Err(e) => Err(e.into()),
        }
    }

    fn describe(&self) -> String {
        self.name.clone()
    }
}
