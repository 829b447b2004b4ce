//! netrate-lib: time-window sampling of packet streams (bit-rate, packet-rate
//! and multi-resolution statistics), pcap sources and output adapters

pub mod precise;
pub mod error;
pub mod cancel;
pub mod packet;
pub mod layer;
pub mod config;
pub mod strategy;
pub mod cascade;
pub mod sampler;
pub mod wavelet;

// upstream and downstream adapters:
pub mod capture;
pub mod capture_stream;
pub mod record;
pub mod output;
pub mod db;

// re-exports for ergonomic imports:
pub use cancel::CancelToken;
pub use capture::{PacketSource, PcapSource, SourceEvent};
pub use capture_stream::{run_stream, RunStats, StreamOutcome, StreamStatus};
pub use cascade::{Cascade, CascadeReport, LevelSummary};
pub use config::{CascadeConfig, SamplerConfig};
pub use db::InfluxWriter;
pub use error::{Error, Result};
pub use layer::Level;
pub use output::{presenter, OutputFormat, Report};
pub use precise::Real;
pub use sampler::{Sample, SampleSink, Sampler};
pub use strategy::{Accumulator, BitRate, CascadeFeed, PacketRate, Strategy};
pub use wavelet::haar_spectrum;
