//! Drives one stream: reads a [`PacketSource`] until it ends or the run is
//! cancelled, feeding a [`Sampler`] and its sink.

use log::{debug, error, info, warn};
use serde::Serialize;

use crate::capture::{PacketSource, SourceEvent};
use crate::error::Result;
use crate::layer::{is_control_packet, layer_size};
use crate::packet::PacketEvent;
use crate::sampler::{SampleSink, Sampler, SamplerStats};
use crate::strategy::Accumulator;

/// How a stream ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum StreamStatus {
    Completed,
    Cancelled,
}

/// Counters for one stream, logged when it ends.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct RunStats {
    /// Packets delivered by the source.
    pub read: u64,
    /// Packets whose size could not be resolved; counted as zero bits.
    pub decode_failures: u64,
    /// Read timeouts seen.
    pub timeouts: u64,
    pub sampler: SamplerStats,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StreamOutcome {
    pub status: StreamStatus,
    pub stats: RunStats,
}

/// Process `source` as stream number `index`.
///
/// The sampler is reset first, so its reference time comes from this
/// stream. A source fault closes the open window and is returned; the
/// trailer is skipped both then and on cancellation.
pub fn run_stream<P, A, S>(
    source: &mut P,
    sampler: &mut Sampler<A>,
    sink: &mut S,
    index: usize,
) -> Result<StreamOutcome>
where
    P: PacketSource + ?Sized,
    A: Accumulator,
    S: SampleSink + ?Sized,
{
    sampler.reset();
    let name = source.describe();
    let link = source.link_type();
    let level = sampler.config().level;
    let ignore_marker = sampler.config().ignore_marker;
    let marker_port = sampler.config().marker_port;
    let max_packets = sampler.config().max_packets;
    let mut stats = RunStats::default();

    info!("{name}: processing stream {index} at level {level}");
    sink.write_header(&sampler.stream_info(index))?;

    while !sampler.is_cancelled() {
        if max_packets.is_some_and(|max| stats.read >= max) {
            debug!("{name}: packet limit reached");
            break;
        }
        let event = match source.next_event() {
            Ok(event) => event,
            Err(e) => {
                error!("{name}: {e}");
                sampler.flush(sink)?;
                stats.sampler = sampler.stats().clone();
                log_stats(&name, &stats);
                return Err(e.into());
            }
        };
        match event {
            SourceEvent::Packet(raw) => {
                stats.read += 1;
                let bytes = match layer_size(level, link, raw.wire_len as usize, raw.data) {
                    Ok(bytes) => bytes,
                    Err(e) => {
                        stats.decode_failures += 1;
                        warn!("{name}: packet {}: {e}, counting zero bits", stats.read);
                        0
                    }
                };
                let bits = bytes as u64 * 8;
                let packet = if ignore_marker && is_control_packet(link, raw.data, marker_port) {
                    PacketEvent::control(raw.timestamp, bits)
                } else {
                    PacketEvent::new(raw.timestamp, bits)
                };
                sampler.process_packet(&packet, sink)?;
            }
            SourceEvent::Timeout => {
                stats.timeouts += 1;
                sampler.idle(sink)?;
            }
            SourceEvent::End => break,
        }
    }

    let status = if sampler.is_cancelled() {
        info!("{name}: cancelled");
        StreamStatus::Cancelled
    } else {
        sampler.flush(sink)?;
        sink.write_trailer(index)?;
        StreamStatus::Completed
    };
    stats.sampler = sampler.stats().clone();
    log_stats(&name, &stats);
    Ok(StreamOutcome { status, stats })
}

fn log_stats(name: &str, stats: &RunStats) {
    info!(
        "{name}: {} packets read, {} sampled, {} windows closed, {} emitted",
        stats.read, stats.sampler.packets, stats.sampler.windows, stats.sampler.emitted
    );
    if stats.decode_failures > 0 || stats.sampler.reordered > 0 {
        warn!(
            "{name}: {} undecodable packets, {} out of order",
            stats.decode_failures, stats.sampler.reordered
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cancel::CancelToken;
    use crate::config::SamplerConfig;
    use crate::error::SourceError;
    use crate::layer::LinkType;
    use crate::packet::Timestamp;
    use crate::sampler::Sample;
    use crate::strategy::PacketRate;
    use std::collections::VecDeque;

    enum Step {
        Packet(Timestamp, Vec<u8>),
        Timeout,
        Fail,
    }

    struct Scripted {
        steps: VecDeque<Step>,
        current: Vec<u8>,
    }

    impl Scripted {
        fn new(steps: Vec<Step>) -> Self {
            Self { steps: steps.into(), current: Vec::new() }
        }
    }

    impl PacketSource for Scripted {
        fn link_type(&self) -> LinkType {
            LinkType::Ethernet
        }

        fn next_event(&mut self) -> std::result::Result<SourceEvent<'_>, SourceError> {
            match self.steps.pop_front() {
                Some(Step::Packet(timestamp, data)) => {
                    self.current = data;
                    Ok(SourceEvent::Packet(crate::capture::RawPacket {
                        timestamp,
                        wire_len: self.current.len() as u32,
                        data: &self.current,
                    }))
                }
                Some(Step::Timeout) => Ok(SourceEvent::Timeout),
                Some(Step::Fail) => Err(SourceError::Other("link down".into())),
                None => Ok(SourceEvent::End),
            }
        }

        fn describe(&self) -> String {
            "scripted".into()
        }
    }

    fn frame(len: usize) -> Vec<u8> {
        vec![0u8; len]
    }

    fn at(secs: i64, nanos: u32) -> Timestamp {
        Timestamp::new(secs, nanos)
    }

    fn sampler(config: SamplerConfig) -> Sampler<PacketRate> {
        Sampler::new(config, PacketRate::new(), CancelToken::new())
    }

    #[test]
    fn completes_and_flushes() {
        let mut source = Scripted::new(vec![
            Step::Packet(at(10, 0), frame(100)),
            Step::Packet(at(10, 500_000_000), frame(100)),
            Step::Packet(at(11, 200_000_000), frame(100)),
        ]);
        let mut sampler = sampler(SamplerConfig::default());
        let mut out: Vec<Sample> = Vec::new();
        let outcome = run_stream(&mut source, &mut sampler, &mut out, 0).unwrap();

        assert_eq!(outcome.status, StreamStatus::Completed);
        assert_eq!(outcome.stats.read, 3);
        assert_eq!(out.iter().map(|s| s.value).collect::<Vec<_>>(), vec![2.0, 1.0]);
    }

    #[test]
    fn timeouts_close_windows() {
        let mut source = Scripted::new(vec![
            Step::Packet(at(0, 0), frame(60)),
            Step::Timeout,
            Step::Timeout,
        ]);
        let mut config = SamplerConfig::default();
        config.show_zero = true;
        let mut sampler = sampler(config);
        let mut out: Vec<Sample> = Vec::new();
        let outcome = run_stream(&mut source, &mut sampler, &mut out, 0).unwrap();

        assert_eq!(outcome.stats.timeouts, 2);
        // two idle closes plus the final flush
        assert_eq!(out.iter().map(|s| s.value).collect::<Vec<_>>(), vec![1.0, 0.0, 0.0]);
    }

    #[test]
    fn packet_limit_stops_reading() {
        let mut source = Scripted::new(
            (0..10).map(|i| Step::Packet(at(i, 0), frame(60))).collect(),
        );
        let mut config = SamplerConfig::default();
        config.max_packets = Some(4);
        let mut sampler = sampler(config);
        let mut out: Vec<Sample> = Vec::new();
        let outcome = run_stream(&mut source, &mut sampler, &mut out, 0).unwrap();

        assert_eq!(outcome.stats.read, 4);
        assert_eq!(out.len(), 4);
    }

    #[test]
    fn undecodable_packets_count_zero_bits() {
        let mut source = Scripted::new(vec![Step::Packet(at(0, 0), frame(6))]);
        let mut config = SamplerConfig::default();
        config.level = crate::layer::Level::Network;
        let mut sampler = sampler(config);
        let outcome = run_stream(&mut source, &mut sampler, &mut crate::sampler::Discard, 0).unwrap();

        assert_eq!(outcome.stats.decode_failures, 1);
        assert_eq!(outcome.stats.sampler.packets, 1);
    }

    #[test]
    fn source_fault_flushes_then_fails() {
        let mut source = Scripted::new(vec![Step::Packet(at(0, 0), frame(60)), Step::Fail]);
        let mut sampler = sampler(SamplerConfig::default());
        let mut out: Vec<Sample> = Vec::new();
        let err = run_stream(&mut source, &mut sampler, &mut out, 0).unwrap_err();

        assert!(matches!(err, crate::error::Error::Source(SourceError::Other(_))));
        assert_eq!(out.len(), 1);
    }

    #[test]
    fn cancelled_run_skips_flush() {
        let mut source = Scripted::new(vec![Step::Packet(at(0, 0), frame(60))]);
        let mut sampler = sampler(SamplerConfig::default());
        sampler.cancel_token().cancel();
        let mut out: Vec<Sample> = Vec::new();
        let outcome = run_stream(&mut source, &mut sampler, &mut out, 0).unwrap();

        assert_eq!(outcome.status, StreamStatus::Cancelled);
        assert_eq!(outcome.stats.read, 0);
        assert!(out.is_empty());
    }

    #[test]
    fn second_stream_gets_fresh_reference() {
        let mut sampler = sampler(SamplerConfig::default());
        let mut out: Vec<Sample> = Vec::new();
        let mut first = Scripted::new(vec![Step::Packet(at(100, 0), frame(60))]);
        run_stream(&mut first, &mut sampler, &mut out, 0).unwrap();
        let mut second = Scripted::new(vec![Step::Packet(at(5, 250_000_000), frame(60))]);
        run_stream(&mut second, &mut sampler, &mut out, 1).unwrap();

        assert_eq!(out.len(), 2);
        assert_eq!(out[1].index, 0);
        assert_eq!(out[1].time, 5.25);
    }
}
