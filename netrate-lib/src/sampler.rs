//! Time-window sampler.
//!
//! Turns irregular packet arrivals into one value per fixed window. A packet
//! is modelled as `bits / link_capacity` seconds of transmission and its bits
//! are spread over every window that transmission overlaps.
//!
//! Windows are numbered from the first accepted packet (the reference time);
//! window `k` covers `[ref + k*t, ref + (k+1)*t)` and its bounds are always
//! recomputed from `k`, so nothing accumulates drift over long runs.

use log::{debug, trace, warn};
use serde::Serialize;

use crate::cancel::CancelToken;
use crate::config::SamplerConfig;
use crate::error::Result;
use crate::packet::PacketEvent;
use crate::precise::Real;
use crate::strategy::{Accumulator, Measure};

/// One closed window.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Sample {
    pub index: u64,
    /// Absolute window start in seconds.
    pub start: Real,
    /// Start as displayed: absolute, or relative to the reference time.
    pub time: f64,
    pub value: f64,
}

/// Passed to a sink before the first window of a stream.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StreamInfo {
    /// Counts streams within one process, starting at 0.
    pub index: usize,
    pub sample_frequency: f64,
    pub t_sample: f64,
    pub measure: Measure,
}

/// Receives closed windows in order.
pub trait SampleSink {
    fn write_header(&mut self, _info: &StreamInfo) -> Result<()> {
        Ok(())
    }

    fn write_sample(&mut self, sample: &Sample) -> Result<()>;

    /// Not called for a stream that was cancelled.
    fn write_trailer(&mut self, _index: usize) -> Result<()> {
        Ok(())
    }
}

impl<S: SampleSink + ?Sized> SampleSink for &mut S {
    fn write_header(&mut self, info: &StreamInfo) -> Result<()> {
        (**self).write_header(info)
    }

    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        (**self).write_sample(sample)
    }

    fn write_trailer(&mut self, index: usize) -> Result<()> {
        (**self).write_trailer(index)
    }
}

impl<S: SampleSink + ?Sized> SampleSink for Box<S> {
    fn write_header(&mut self, info: &StreamInfo) -> Result<()> {
        (**self).write_header(info)
    }

    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        (**self).write_sample(sample)
    }

    fn write_trailer(&mut self, index: usize) -> Result<()> {
        (**self).write_trailer(index)
    }
}

impl SampleSink for Vec<Sample> {
    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        self.push(*sample);
        Ok(())
    }
}

/// Sink that drops everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct Discard;

impl SampleSink for Discard {
    fn write_sample(&mut self, _sample: &Sample) -> Result<()> {
        Ok(())
    }
}

/// Counters for one stream.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct SamplerStats {
    /// Packets that went through apportioning.
    pub packets: u64,
    /// Leading control packets dropped before the reference time was set.
    pub control_skipped: u64,
    /// Packets older than their predecessor.
    pub reordered: u64,
    /// Windows closed.
    pub windows: u64,
    /// Windows handed to the sink.
    pub emitted: u64,
}

#[derive(Clone, Copy, Debug)]
struct Window {
    reference: Real,
    index: u64,
    start: Real,
    end: Real,
}

impl Window {
    fn first(reference: Real, t_sample: Real) -> Self {
        Self {
            reference,
            index: 0,
            start: reference,
            end: reference + t_sample,
        }
    }

    fn advance(&mut self, t_sample: Real) {
        self.index += 1;
        self.start = self.reference + Real::from_u64(self.index) * t_sample;
        self.end = self.reference + Real::from_u64(self.index + 1) * t_sample;
    }
}

pub struct Sampler<A> {
    config: SamplerConfig,
    t_sample: Real,
    link_capacity: Real,
    accumulator: A,
    window: Option<Window>,
    last_timestamp: Real,
    cancel: CancelToken,
    stats: SamplerStats,
}

impl<A: Accumulator> Sampler<A> {
    pub fn new(config: SamplerConfig, accumulator: A, cancel: CancelToken) -> Self {
        let t_sample = config.t_sample();
        let link_capacity = Real::from_u64(config.link_capacity);
        Self {
            config,
            t_sample,
            link_capacity,
            accumulator,
            window: None,
            last_timestamp: Real::ZERO,
            cancel,
            stats: SamplerStats::default(),
        }
    }

    pub fn config(&self) -> &SamplerConfig {
        &self.config
    }

    pub fn t_sample(&self) -> Real {
        self.t_sample
    }

    pub fn accumulator(&self) -> &A {
        &self.accumulator
    }

    pub fn into_accumulator(self) -> A {
        self.accumulator
    }

    pub fn stats(&self) -> &SamplerStats {
        &self.stats
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Reference time, once a packet has been accepted.
    pub fn reference_time(&self) -> Option<Real> {
        self.window.map(|w| w.reference)
    }

    /// Index and bounds of the open window.
    pub fn current_window(&self) -> Option<(u64, Real, Real)> {
        self.window.map(|w| (w.index, w.start, w.end))
    }

    pub fn stream_info(&self, index: usize) -> StreamInfo {
        StreamInfo {
            index,
            sample_frequency: self.config.sample_frequency,
            t_sample: self.t_sample.to_f64(),
            measure: self.accumulator.measure(),
        }
    }

    /// Forget the reference time before a new stream. Returns the counters
    /// of the stream that just ended.
    pub fn reset(&mut self) -> SamplerStats {
        self.window = None;
        self.last_timestamp = Real::ZERO;
        self.accumulator.reset();
        std::mem::take(&mut self.stats)
    }

    /// Seconds `bits` occupy the link. A capacity of 0 means unlimited.
    pub fn transfer_time(&self, bits: u64) -> Real {
        if bits == 0 || self.link_capacity.is_zero() {
            Real::ZERO
        } else {
            Real::from_u64(bits) / self.link_capacity
        }
    }

    /// Apportion one packet, closing every window it reaches past.
    ///
    /// Returns `false` if the packet was a leading control packet and got
    /// dropped.
    pub fn process_packet<S: SampleSink + ?Sized>(
        &mut self,
        packet: &PacketEvent,
        sink: &mut S,
    ) -> Result<bool> {
        let timestamp = packet.timestamp.as_real();

        if self.window.is_none() {
            if self.config.ignore_marker && packet.control {
                self.stats.control_skipped += 1;
                trace!("skipping leading control packet at {timestamp:.9}");
                return Ok(false);
            }
            debug!("reference time latched at {timestamp:.9}");
            self.window = Some(Window::first(timestamp, self.t_sample));
            self.last_timestamp = timestamp;
        }
        self.stats.packets += 1;

        if timestamp < self.last_timestamp {
            self.stats.reordered += 1;
            if self.stats.reordered == 1 {
                warn!(
                    "packet at {timestamp:.9} is older than its predecessor at {:.9}, clamping",
                    self.last_timestamp
                );
            } else {
                debug!("reordered packet at {timestamp:.9}");
            }
        } else {
            self.last_timestamp = timestamp;
        }

        // idle catch-up
        while let Some(window) = self.window {
            if timestamp < window.end {
                break;
            }
            if self.cancel.is_cancelled() {
                return Ok(true);
            }
            self.close_window(sink)?;
        }

        let Some(window) = self.window else {
            return Ok(true);
        };

        // A packet that starts before the open window queues behind the
        // transmission that already pushed the window forward.
        let start = timestamp.max(window.start);
        let transfer = self.transfer_time(packet.bits);
        let mut remaining_transfer = transfer;
        let mut remaining_window = window.end - start;
        let mut repetition = 1;

        while !transfer.is_zero() && remaining_transfer >= remaining_window {
            if self.cancel.is_cancelled() {
                return Ok(true);
            }
            let fraction = remaining_window / transfer;
            self.accumulator
                .accumulate(fraction, packet.bits, packet, repetition);
            repetition += 1;
            remaining_transfer -= remaining_window;
            self.close_window(sink)?;
            remaining_window = self.t_sample;
        }

        if self.cancel.is_cancelled() {
            return Ok(true);
        }
        let fraction = if transfer.is_zero() {
            Real::ONE
        } else {
            remaining_transfer / transfer
        };
        self.accumulator
            .accumulate(fraction, packet.bits, packet, repetition);
        Ok(true)
    }

    /// A read timed out: keep the cadence alive by closing one window.
    pub fn idle<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.window.is_some() && !self.cancel.is_cancelled() {
            self.close_window(sink)?;
        }
        Ok(())
    }

    /// End of input: close the window in progress unless cancelled.
    pub fn flush<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        if self.window.is_some() && !self.cancel.is_cancelled() {
            self.close_window(sink)?;
        }
        Ok(())
    }

    fn close_window<S: SampleSink + ?Sized>(&mut self, sink: &mut S) -> Result<()> {
        let Some(window) = self.window.as_mut() else {
            return Ok(());
        };
        let value = self.accumulator.finalize(self.t_sample);
        let mut time = if self.config.relative_time {
            window.start - window.reference
        } else {
            window.start
        }
        .to_f64();
        if self.config.time_in_windows {
            time *= self.config.sample_frequency;
        }
        let sample = Sample {
            index: window.index,
            start: window.start,
            time,
            value,
        };
        window.advance(self.t_sample);
        self.stats.windows += 1;

        if self.config.show_zero || value > 0.0 {
            self.stats.emitted += 1;
            sink.write_sample(&sample)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::Timestamp;
    use crate::strategy::{BitRate, PacketRate};

    /// Records every share handed to the accumulator.
    #[derive(Default)]
    struct Recorder {
        shares: Vec<(Timestamp, f64, u32)>,
        open: f64,
    }

    impl Accumulator for Recorder {
        fn accumulate(&mut self, fraction: Real, _bits: u64, packet: &PacketEvent, repetition: u32) {
            self.shares.push((packet.timestamp, fraction.to_f64(), repetition));
            self.open += fraction.to_f64();
        }

        fn finalize(&mut self, _t_sample: Real) -> f64 {
            std::mem::take(&mut self.open)
        }

        fn measure(&self) -> Measure {
            Measure::Bitrate
        }
    }

    fn config(hz: f64, capacity: u64) -> SamplerConfig {
        SamplerConfig {
            sample_frequency: hz,
            link_capacity: capacity,
            show_zero: true,
            ..SamplerConfig::default()
        }
    }

    fn at(secs: f64, bits: u64) -> PacketEvent {
        PacketEvent::new(Timestamp::from_secs_f64(secs), bits)
    }

    #[test]
    fn straddling_packet_after_reference() {
        let mut sampler = Sampler::new(config(1.0, 8), BitRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(0.0, 0), &mut out).unwrap();
        sampler.process_packet(&at(2.5, 16), &mut out).unwrap();
        sampler.flush(&mut out).unwrap();

        let values: Vec<_> = out.iter().map(|s| (s.index, s.time, s.value)).collect();
        assert_eq!(
            values,
            vec![
                (0, 0.0, 0.0),
                (1, 1.0, 0.0),
                (2, 2.0, 4.0),
                (3, 3.0, 8.0),
                (4, 4.0, 4.0),
            ]
        );
    }

    #[test]
    fn first_packet_seeds_reference() {
        let mut sampler = Sampler::new(config(1.0, 8), Recorder::default(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(2.5, 16), &mut out).unwrap();
        sampler.flush(&mut out).unwrap();

        assert_eq!(sampler.reference_time().map(Real::to_f64), Some(2.5));
        let shares: Vec<_> = sampler.accumulator().shares.iter().map(|s| (s.1, s.2)).collect();
        assert_eq!(shares, vec![(0.5, 1), (0.5, 2), (0.0, 3)]);
        let values: Vec<_> = out.iter().map(|s| s.value).collect();
        assert_eq!(values, vec![0.5, 0.5, 0.0]);
        assert_eq!(out[0].time, 2.5);
    }

    #[test]
    fn zero_transfer_time_is_one_share() {
        let mut sampler = Sampler::new(config(1.0, 0), Recorder::default(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(0.2, 12_000), &mut out).unwrap();
        sampler.process_packet(&at(0.4, 0), &mut out).unwrap();
        assert!(out.is_empty());
        let shares: Vec<_> = sampler.accumulator().shares.iter().map(|s| (s.1, s.2)).collect();
        assert_eq!(shares, vec![(1.0, 1), (1.0, 1)]);
    }

    #[test]
    fn idle_gap_closes_floor_g_over_t_windows() {
        let mut sampler = Sampler::new(config(10.0, 1_000_000_000), PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(100.0, 8), &mut out).unwrap();
        sampler.process_packet(&at(101.05, 8), &mut out).unwrap();
        assert_eq!(out.len(), 10);
        assert_eq!(out[0].value, 1.0);
        assert!(out[1..].iter().all(|s| s.value == 0.0));
        assert_eq!(sampler.current_window().map(|w| w.0), Some(10));
    }

    #[test]
    fn zero_windows_are_suppressed_but_still_closed() {
        let mut cfg = config(10.0, 1_000_000_000);
        cfg.show_zero = false;
        let mut sampler = Sampler::new(cfg, PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(0.0, 8), &mut out).unwrap();
        sampler.process_packet(&at(1.05, 8), &mut out).unwrap();
        sampler.flush(&mut out).unwrap();
        assert_eq!(out.iter().map(|s| s.index).collect::<Vec<_>>(), vec![0, 10]);
        assert_eq!(sampler.stats().windows, 11);
        assert_eq!(sampler.stats().emitted, 2);
    }

    #[test]
    fn three_packets_in_one_window() {
        let mut sampler = Sampler::new(config(1.0, 1_000), PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        for secs in [0.1, 0.3, 0.5] {
            sampler.process_packet(&at(secs, 100), &mut out).unwrap();
        }
        sampler.flush(&mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].value, 3.0);
    }

    #[test]
    fn timeout_closes_exactly_one_window() {
        let mut sampler = Sampler::new(config(1.0, 1_000), PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.idle(&mut out).unwrap();
        assert!(out.is_empty());
        sampler.process_packet(&at(0.0, 8), &mut out).unwrap();
        sampler.idle(&mut out).unwrap();
        assert_eq!(out.len(), 1);
        assert_eq!(sampler.current_window().map(|w| w.0), Some(1));
    }

    #[test]
    fn relative_time() {
        let mut cfg = config(2.0, 1_000_000);
        cfg.relative_time = true;
        let mut sampler = Sampler::new(cfg, PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(1_000.25, 8), &mut out).unwrap();
        sampler.process_packet(&at(1_001.3, 8), &mut out).unwrap();
        assert_eq!(out.iter().map(|s| s.time).collect::<Vec<_>>(), vec![0.0, 0.5]);
    }

    #[test]
    fn time_in_window_units() {
        let mut cfg = config(4.0, 1_000_000);
        cfg.relative_time = true;
        cfg.time_in_windows = true;
        let mut sampler = Sampler::new(cfg, PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(10.0, 8), &mut out).unwrap();
        sampler.process_packet(&at(10.6, 8), &mut out).unwrap();
        sampler.flush(&mut out).unwrap();
        assert_eq!(out.iter().map(|s| s.time).collect::<Vec<_>>(), vec![0.0, 1.0, 2.0]);
    }

    #[test]
    fn cancellation_drops_partial_window() {
        let cancel = CancelToken::new();
        let mut sampler = Sampler::new(config(1.0, 8), Recorder::default(), cancel.clone());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(0.0, 4), &mut out).unwrap();
        cancel.cancel();
        sampler.process_packet(&at(0.5, 64), &mut out).unwrap();
        sampler.idle(&mut out).unwrap();
        sampler.flush(&mut out).unwrap();
        assert!(out.is_empty());
        assert_eq!(sampler.accumulator().shares.len(), 1);
    }

    #[test]
    fn leading_control_packets_are_skipped() {
        let mut cfg = config(1.0, 1_000);
        cfg.ignore_marker = true;
        let mut sampler = Sampler::new(cfg, PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        let marker = PacketEvent::control(Timestamp::from_secs_f64(0.0), 64);
        assert!(!sampler.process_packet(&marker, &mut out).unwrap());
        assert_eq!(sampler.reference_time(), None);
        assert!(sampler.process_packet(&at(5.0, 8), &mut out).unwrap());
        assert_eq!(sampler.reference_time().map(Real::to_f64), Some(5.0));
        // once latched, control packets are ordinary traffic
        let marker = PacketEvent::control(Timestamp::from_secs_f64(5.5), 64);
        assert!(sampler.process_packet(&marker, &mut out).unwrap());
        let stats = sampler.reset();
        assert_eq!(stats.control_skipped, 1);
        assert_eq!(stats.packets, 2);
    }

    #[test]
    fn reordered_packet_is_clamped_to_open_window() {
        let mut sampler = Sampler::new(config(1.0, 8), Recorder::default(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(0.5, 16), &mut out).unwrap();
        // the first packet pushed the open window to [2.5, 3.5)
        assert_eq!(sampler.current_window().map(|w| w.0), Some(2));
        sampler.process_packet(&at(0.25, 4), &mut out).unwrap();
        let last = sampler.accumulator().shares.last().copied().unwrap();
        assert_eq!((last.1, last.2), (1.0, 1));
        assert_eq!(sampler.stats().reordered, 1);
        assert_eq!(sampler.current_window().map(|w| w.0), Some(2));
    }

    #[test]
    fn long_transfer_spans_many_windows() {
        let mut sampler = Sampler::new(config(1000.0, 1_000), Recorder::default(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        sampler.process_packet(&at(0.0, 0), &mut out).unwrap();
        sampler.process_packet(&at(0.0004, 1_000), &mut out).unwrap();
        sampler.flush(&mut out).unwrap();
        let stamp = Timestamp::from_secs_f64(0.0004);
        let shares: Vec<_> = sampler
            .accumulator()
            .shares
            .iter()
            .filter(|s| s.0 == stamp)
            .copied()
            .collect();
        // 0.6 ms in window 0, 999 full windows, 0.4 ms left over
        assert_eq!(shares.len(), 1001);
        let total: f64 = shares.iter().map(|s| s.1).sum();
        assert!((total - 1.0).abs() < 1e-12);
        assert!(shares.windows(2).all(|w| w[1].2 == w[0].2 + 1));
    }

    #[test]
    fn ten_million_windows_without_drift() {
        let mut cfg = config(1e6, 1_000_000_000);
        cfg.show_zero = false;
        let mut sampler = Sampler::new(cfg, PacketRate::new(), CancelToken::new());
        let mut out: Vec<Sample> = Vec::new();
        let reference = PacketEvent::new(Timestamp::new(1_700_000_000, 0), 8);
        let later = PacketEvent::new(Timestamp::new(1_700_000_010, 500), 8);
        sampler.process_packet(&reference, &mut out).unwrap();
        sampler.process_packet(&later, &mut out).unwrap();

        assert_eq!(sampler.stats().windows, 10_000_000);
        let (index, start, end) = sampler.current_window().unwrap();
        assert_eq!(index, 10_000_000);
        let expected = Real::from_parts(1_700_000_010, 0);
        assert!((start - expected).abs().to_f64() < 1e-18);
        assert!((end - expected - sampler.t_sample()).abs().to_f64() < 1e-18);
    }
}
