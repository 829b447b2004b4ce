use influxdb2::{ClientBuilder, BuildError};
use influxdb2::models::data_point::{DataPoint, DataPointError};
use futures::stream;
use log::{debug, error, info};
use std::env;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;

use crate::cascade::CascadeReport;
use crate::error::ConfigError;
use crate::output::Report;
use crate::precise::Real;
use crate::sampler::{Sample, SampleSink, StreamInfo};
use crate::strategy::Measure;
use crate::wavelet::SpectrumBand;

/// Points buffered before a write is spawned.
const BATCH_SIZE: usize = 1_000;
/// Longest a point waits in the buffer.
const BATCH_INTERVAL: Duration = Duration::from_millis(500);

/// Errors returned by InfluxWriter operations.
#[derive(Debug, Error)]
pub enum DbError {
    #[error("InfluxDB write error: {0}")]
    Api(#[from] influxdb2::RequestError),

    #[error("Point build error: {0}")]
    BuildPoint(#[from] DataPointError),

    #[error("InfluxDB client build error: {0}")]
    ClientBuild(#[from] BuildError),

    #[error("Timestamp precision overflow converting to nanoseconds")]
    TimestampOverflow,

    #[error("no tokio runtime to write from: {0}")]
    NoRuntime(#[from] tokio::runtime::TryCurrentError),

    #[error("write task failed: {0}")]
    Join(#[from] tokio::task::JoinError),
}

#[derive(Clone)]
pub struct InfluxWriter {
    client: influxdb2::Client,
    bucket: String,
}

impl InfluxWriter {
    /// Initialize with gzip-enabled client.
    pub fn new(
        host: String,
        org: String,
        bucket: String,
        token: String,
    ) -> Result<Self, DbError> {
        let client = ClientBuilder::new(host, org, token)
            .gzip(true)
            .build()?;
        Ok(Self { client, bucket })
    }

    /// Connection settings from `INFLUX_HOST`, `INFLUX_ORG`, `INFLUX_BUCKET`
    /// and `INFLUX_TOKEN`.
    pub fn from_env() -> crate::error::Result<Self> {
        fn var(name: &'static str) -> Result<String, ConfigError> {
            env::var(name).map_err(|_| ConfigError::MissingEnv(name))
        }
        let host = var("INFLUX_HOST")?;
        let bucket = var("INFLUX_BUCKET")?;
        info!("Influx: host={}, bucket={}", host, bucket);
        Ok(Self::new(host, var("INFLUX_ORG")?, bucket, var("INFLUX_TOKEN")?)?)
    }

    /// One closed window as a `netrate` point tagged by stream and measure.
    pub fn make_point(
        &self,
        stream: usize,
        measure: Measure,
        sample: &Sample,
    ) -> Result<DataPoint, DbError> {
        DataPoint::builder("netrate")
            .tag("measure", measure.key())
            .tag("stream", stream.to_string())
            .field("value", sample.value)
            .field("window", sample.index as i64)
            .timestamp(window_nanos(sample.start)?)
            .build()
            .map_err(DbError::BuildPoint)
    }

    /// Asynchronously write a batch of points via HTTP.
    pub async fn write_batch(&self, points: Vec<DataPoint>) -> Result<(), DbError> {
        self.client.write(&self.bucket, stream::iter(points)).await?;
        Ok(())
    }
}

/// Window start in Unix nanoseconds.
fn window_nanos(start: Real) -> Result<i64, DbError> {
    let secs = start.floor();
    let frac = ((start - secs).to_f64() * 1e9).round() as i64;
    let secs = secs.to_f64();
    if !secs.is_finite() || secs.abs() > i64::MAX as f64 {
        return Err(DbError::TimestampOverflow);
    }
    (secs as i64)
        .checked_mul(1_000_000_000)
        .and_then(|s| s.checked_add(frac))
        .ok_or(DbError::TimestampOverflow)
}

/// Batches window points and writes them on the tokio runtime the sink was
/// created in.
pub struct InfluxSink {
    writer: InfluxWriter,
    handle: Handle,
    buffer: Vec<DataPoint>,
    last_flush: Instant,
    pending: Vec<JoinHandle<Result<(), DbError>>>,
    stream: usize,
    measure: Measure,
}

impl InfluxSink {
    pub fn new(writer: InfluxWriter, handle: Handle) -> Self {
        Self {
            writer,
            handle,
            buffer: Vec::with_capacity(BATCH_SIZE),
            last_flush: Instant::now(),
            pending: Vec::new(),
            stream: 0,
            measure: Measure::Bitrate,
        }
    }

    /// Writer from the environment, runtime from the calling context.
    pub fn from_env() -> crate::error::Result<Self> {
        let writer = InfluxWriter::from_env()?;
        let handle = Handle::try_current().map_err(DbError::from)?;
        Ok(Self::new(writer, handle))
    }

    fn push(&mut self, point: DataPoint) {
        self.buffer.push(point);
        if self.buffer.len() >= BATCH_SIZE || self.last_flush.elapsed() > BATCH_INTERVAL {
            self.spawn_flush();
        }
    }

    fn spawn_flush(&mut self) {
        if self.buffer.is_empty() {
            return;
        }
        // Drain batch and record its size before moving
        let batch = self.buffer.drain(..).collect::<Vec<_>>();
        let count = batch.len();
        let writer = self.writer.clone();
        self.pending.push(self.handle.spawn(async move {
            writer.write_batch(batch).await.inspect_err(|e| error!("Batch write failed: {}", e))
        }));
        self.pending.retain(|task| !task.is_finished());
        debug!("Spawned async write of {} points", count);
        self.last_flush = Instant::now();
    }

    /// Wait for every spawned write; reports the first failure.
    fn drain(&mut self) -> Result<(), DbError> {
        let tasks = std::mem::take(&mut self.pending);
        let mut first = None;
        for task in tasks {
            let outcome = self.handle.block_on(task).map_err(DbError::from).and_then(|r| r);
            if let Err(e) = outcome {
                first.get_or_insert(e);
            }
        }
        first.map_or(Ok(()), Err)
    }
}

impl SampleSink for InfluxSink {
    fn write_header(&mut self, info: &StreamInfo) -> crate::error::Result<()> {
        self.stream = info.index;
        self.measure = info.measure;
        Ok(())
    }

    fn write_sample(&mut self, sample: &Sample) -> crate::error::Result<()> {
        let point = self.writer.make_point(self.stream, self.measure, sample)?;
        self.push(point);
        Ok(())
    }

    fn write_trailer(&mut self, _index: usize) -> crate::error::Result<()> {
        self.spawn_flush();
        Ok(())
    }
}

impl Report for InfluxSink {
    fn write_cascade(&mut self, report: &CascadeReport) -> crate::error::Result<()> {
        for level in &report.levels {
            let mut builder = DataPoint::builder("netrate_timescale")
                .tag("level", level.level.to_string())
                .field("resolution", level.resolution)
                .field("samples", level.samples as i64);
            for (i, moment) in level.moments.iter().enumerate() {
                if moment.is_finite() {
                    builder = builder.field(format!("m{}", i + 1), *moment);
                }
            }
            self.buffer.push(builder.build().map_err(DbError::from)?);
        }
        self.spawn_flush();
        Ok(())
    }

    fn write_spectrum(&mut self, _t_sample: f64, bands: &[SpectrumBand]) -> crate::error::Result<()> {
        for band in bands {
            let mut builder = DataPoint::builder("netrate_wavelet")
                .tag("band", band.band.to_string())
                .field("scale", band.scale);
            if band.detail.is_finite() {
                builder = builder.field("detail", band.detail);
            }
            if band.approximation.is_finite() {
                builder = builder.field("approximation", band.approximation);
            }
            self.buffer.push(builder.build().map_err(DbError::from)?);
        }
        self.spawn_flush();
        Ok(())
    }

    fn finish(&mut self) -> crate::error::Result<()> {
        self.spawn_flush();
        self.drain()?;
        Ok(())
    }
}
