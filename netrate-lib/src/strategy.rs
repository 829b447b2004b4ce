//! What gets measured per window.

use crate::cascade::Cascade;
use crate::packet::PacketEvent;
use crate::precise::Real;

/// Rounds down after adding a bias of 0.0005.
pub fn my_round(value: f64) -> f64 {
    const BIAS: f64 = 0.0005;
    (value + BIAS).floor()
}

/// Quantity a strategy reports; drives column labels and number formatting.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Measure {
    Bitrate,
    Packets,
}

impl Measure {
    pub fn label(&self) -> &'static str {
        match self {
            Measure::Bitrate => "Bitrate (bps)",
            Measure::Packets => "Packets",
        }
    }

    pub fn key(&self) -> &'static str {
        match self {
            Measure::Bitrate => "bitrate",
            Measure::Packets => "packets",
        }
    }
}

/// Per-window accumulation driven by the [`Sampler`](crate::sampler::Sampler).
pub trait Accumulator {
    /// Attribute `fraction` of a packet of `bits` bits to the open window.
    /// `repetition` is 1 for the first share of a packet and counts up for each
    /// further window the same packet spills into.
    fn accumulate(&mut self, fraction: Real, bits: u64, packet: &PacketEvent, repetition: u32);

    /// Close the window of length `t_sample`, returning its value and
    /// clearing the accumulator.
    fn finalize(&mut self, t_sample: Real) -> f64;

    fn measure(&self) -> Measure;

    /// Called before each new stream.
    fn reset(&mut self) {}
}

/// Bits per second.
#[derive(Debug, Default, Clone)]
pub struct BitRate {
    bits: f64,
}

impl BitRate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for BitRate {
    fn accumulate(&mut self, fraction: Real, bits: u64, _packet: &PacketEvent, _repetition: u32) {
        self.bits += my_round(fraction.to_f64() * bits as f64);
    }

    fn finalize(&mut self, t_sample: Real) -> f64 {
        let rate = my_round((Real::from_f64(self.bits) / t_sample).to_f64());
        self.bits = 0.0;
        rate
    }

    fn measure(&self) -> Measure {
        Measure::Bitrate
    }

    fn reset(&mut self) {
        self.bits = 0.0;
    }
}

/// Packets started per window.
#[derive(Debug, Default, Clone)]
pub struct PacketRate {
    packets: u64,
}

impl PacketRate {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Accumulator for PacketRate {
    fn accumulate(&mut self, _fraction: Real, _bits: u64, _packet: &PacketEvent, repetition: u32) {
        if repetition == 1 {
            self.packets += 1;
        }
    }

    fn finalize(&mut self, _t_sample: Real) -> f64 {
        let packets = self.packets;
        self.packets = 0;
        packets as f64
    }

    fn measure(&self) -> Measure {
        Measure::Packets
    }

    fn reset(&mut self) {
        self.packets = 0;
    }
}

/// Bitrate windows fed straight into a [`Cascade`].
///
/// The cascade outlives stream resets so several capture files build one
/// hierarchy.
#[derive(Debug, Clone)]
pub struct CascadeFeed {
    rate: BitRate,
    cascade: Cascade,
}

impl CascadeFeed {
    pub fn new(cascade: Cascade) -> Self {
        Self { rate: BitRate::new(), cascade }
    }

    pub fn cascade(&self) -> &Cascade {
        &self.cascade
    }

    pub fn into_cascade(self) -> Cascade {
        self.cascade
    }
}

impl Accumulator for CascadeFeed {
    fn accumulate(&mut self, fraction: Real, bits: u64, packet: &PacketEvent, repetition: u32) {
        self.rate.accumulate(fraction, bits, packet, repetition);
    }

    fn finalize(&mut self, t_sample: Real) -> f64 {
        let rate = self.rate.finalize(t_sample);
        self.cascade.feed(rate);
        rate
    }

    fn measure(&self) -> Measure {
        Measure::Bitrate
    }

    fn reset(&mut self) {
        self.rate.reset();
    }
}

/// Strategy picked at configuration time.
#[derive(Debug, Clone)]
pub enum Strategy {
    BitRate(BitRate),
    PacketRate(PacketRate),
    Cascade(CascadeFeed),
}

impl Strategy {
    pub fn cascade(&self) -> Option<&Cascade> {
        match self {
            Strategy::Cascade(feed) => Some(feed.cascade()),
            _ => None,
        }
    }

    fn inner(&mut self) -> &mut dyn Accumulator {
        match self {
            Strategy::BitRate(a) => a,
            Strategy::PacketRate(a) => a,
            Strategy::Cascade(a) => a,
        }
    }
}

impl Accumulator for Strategy {
    fn accumulate(&mut self, fraction: Real, bits: u64, packet: &PacketEvent, repetition: u32) {
        self.inner().accumulate(fraction, bits, packet, repetition);
    }

    fn finalize(&mut self, t_sample: Real) -> f64 {
        self.inner().finalize(t_sample)
    }

    fn measure(&self) -> Measure {
        match self {
            Strategy::BitRate(a) => a.measure(),
            Strategy::PacketRate(a) => a.measure(),
            Strategy::Cascade(a) => a.measure(),
        }
    }

    fn reset(&mut self) {
        self.inner().reset();
    }
}
