use crate::precise::Real;

/// Capture timestamp split the way pcap hands it over.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, PartialOrd, Ord)]
pub struct Timestamp {
    pub secs: i64,
    pub nanos: u32,
}

impl Timestamp {
    pub fn new(secs: i64, nanos: u32) -> Self {
        Self { secs, nanos }
    }

    /// From a `timeval` whose sub-second field is in microseconds or, for
    /// captures opened with nanosecond precision, in nanoseconds.
    pub fn from_timeval(tv: &libc::timeval, nanosecond_precision: bool) -> Self {
        let frac = tv.tv_usec as i64;
        let nanos = if nanosecond_precision { frac } else { frac * 1_000 };
        Self {
            secs: tv.tv_sec as i64,
            nanos: nanos.clamp(0, 999_999_999) as u32,
        }
    }

    pub fn from_secs_f64(secs: f64) -> Self {
        let whole = secs.floor();
        let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
        Self { secs: whole as i64, nanos }
    }

    pub fn as_real(&self) -> Real {
        Real::from_parts(self.secs, self.nanos)
    }
}

/// One captured packet, reduced to what the sampler needs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PacketEvent {
    pub timestamp: Timestamp,
    /// Payload size at the configured extraction level.
    pub bits: u64,
    /// Measurement marker or its ICMP reply; see [`crate::layer::is_control_packet`].
    pub control: bool,
}

impl PacketEvent {
    pub fn new(timestamp: Timestamp, bits: u64) -> Self {
        Self { timestamp, bits, control: false }
    }

    pub fn control(timestamp: Timestamp, bits: u64) -> Self {
        Self { timestamp, bits, control: true }
    }
}
