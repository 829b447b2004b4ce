// src/main.rs

use clap::{Args, Parser, Subcommand};
use dotenv::dotenv;
use log::{error, info, warn};
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tokio::task;

use netrate_lib::{
    Accumulator, BitRate, CancelToken, Cascade, CascadeConfig, CascadeFeed, PacketRate, PcapSource, Report,
    Result, Sample, SampleSink, Sampler, SamplerConfig, Strategy, StreamStatus,
    config::{self, DEFAULT_MOMENTS, DEFAULT_TIMESCALE},
    error::SourceError,
    haar_spectrum,
    layer::DEFAULT_MARKER_PORT,
    output::OutputFormat,
    presenter, run_stream,
    sampler::Discard,
};

/* RUST_LOG=netrate_lib=debug netrate bitrate -m 10 trace.pcap */

#[derive(Parser)]
#[command(name = "netrate")]
#[command(version)]
#[command(about = "Fixed-window bit-rate, packet-rate and multi-resolution statistics for packet captures", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Bits per second in each window
    Bitrate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Packets started in each window
    Pktrate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// Moments of the bit-rate at geometrically growing resolutions
    Timescale {
        #[command(flatten)]
        run: RunArgs,

        /// Windows merged into one value of the next level, at least 2
        #[arg(long, default_value_t = i64::from(DEFAULT_TIMESCALE), allow_negative_numbers = true)]
        timescale: i64,

        /// Number of moments per level
        #[arg(short = 'n', long, default_value_t = DEFAULT_MOMENTS)]
        moments: usize,
    },

    /// Haar energy spectrum of the packet-rate series
    Wavelet {
        #[command(flatten)]
        run: RunArgs,
    },
}

#[derive(Args)]
struct RunArgs {
    /// Capture files, processed in order as separate streams
    inputs: Vec<PathBuf>,

    /// Capture live from this interface instead of reading files
    #[arg(short, long)]
    iface: Option<String>,

    /// Sampling frequency in Hz. Prefixes: k, m, g
    #[arg(short = 'm', long, default_value = "1")]
    sample_frequency: String,

    /// Link capacity in bits per second. Prefixes: k, m, g
    #[arg(short = 'l', long, default_value = "100m")]
    link_capacity: String,

    /// physical, link, network, transport or application
    #[arg(short = 'q', long, default_value = "link")]
    level: String,

    /// Stop each stream after N packets
    #[arg(short = 'p', long, value_name = "N")]
    packets: Option<u64>,

    /// default, csv, tsv, matlab, json or influx
    #[arg(short = 'f', long, default_value = "default")]
    format: String,

    /// Show timestamps relative to the first packet
    #[arg(short = 't', long, overrides_with = "absolute_time")]
    relative_time: bool,

    /// Show absolute timestamps [default]
    #[arg(short = 'T', long, overrides_with = "relative_time")]
    absolute_time: bool,

    /// Print window times in window units (time * sample frequency)
    #[arg(long)]
    viz_hack: bool,

    /// Emit windows whose value is zero
    #[arg(short = 'z', long, overrides_with = "no_show_zero")]
    show_zero: bool,

    /// Suppress windows whose value is zero [default]
    #[arg(short = 'x', long, overrides_with = "show_zero")]
    no_show_zero: bool,

    /// BPF capture filter
    #[arg(long)]
    filter: Option<String>,

    /// Skip leading measurement markers before the first real packet
    #[arg(long)]
    ignore_marker: bool,

    /// UDP port of the measurement markers
    #[arg(long, default_value_t = DEFAULT_MARKER_PORT)]
    marker_port: u16,
}

impl RunArgs {
    fn sampler_config(&self) -> SamplerConfig {
        SamplerConfig {
            sample_frequency: config::sample_frequency_or_default(&self.sample_frequency),
            link_capacity: config::link_capacity_or_default(&self.link_capacity),
            level: config::level_or_default(&self.level),
            max_packets: self.packets.filter(|&n| n > 0),
            relative_time: self.relative_time && !self.absolute_time,
            time_in_windows: self.viz_hack,
            show_zero: self.show_zero && !self.no_show_zero,
            ignore_marker: self.ignore_marker,
            marker_port: self.marker_port,
        }
    }

    fn output_format(&self) -> OutputFormat {
        self.format.parse().unwrap_or_else(|e| {
            warn!("{e}, using \"{}\"", OutputFormat::Default);
            OutputFormat::Default
        })
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    // optional .env with RUST_LOG and INFLUX_* settings
    dotenv().ok();

    // initialize logger and panic hook
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();
    std::panic::set_hook(Box::new(|info| {
        error!("Thread panic: {:?}", info);
    }));

    let cli = Cli::parse();
    let cancel = CancelToken::new();
    ctrlc_handler(cancel.clone());

    // capture and sampling block; keep them off the async workers
    match task::spawn_blocking(move || run(cli.command, cancel)).await {
        Ok(Ok(StreamStatus::Completed)) => ExitCode::SUCCESS,
        Ok(Ok(StreamStatus::Cancelled)) => ExitCode::from(1),
        Ok(Err(e)) => {
            error!("{}", e);
            eprintln!("netrate: {e}");
            ExitCode::from(2)
        }
        Err(e) => {
            error!("processing task failed: {}", e);
            ExitCode::from(2)
        }
    }
}

/// First Ctrl+C stops the run cleanly, a second one terminates.
fn ctrlc_handler(cancel: CancelToken) {
    let installed = ctrlc::set_handler(move || {
        if cancel.cancel() {
            eprintln!("\rAborting capture.");
        } else {
            eprintln!("\rGot SIGINT again, terminating.");
            std::process::exit(1);
        }
    });
    if let Err(e) = installed {
        warn!("Error setting Ctrl+C handler: {}", e);
    }
}

impl Commands {
    fn run_args(&self) -> &RunArgs {
        match self {
            Commands::Bitrate { run }
            | Commands::Pktrate { run }
            | Commands::Timescale { run, .. }
            | Commands::Wavelet { run } => run,
        }
    }
}

fn run(command: Commands, cancel: CancelToken) -> Result<StreamStatus> {
    let mut out = presenter(command.run_args().output_format(), io::stdout())?;
    let status = execute(&command, cancel, &mut *out);
    out.finish()?;
    status
}

/// Process every input of `command` and render its result into `out`.
/// Cascade and spectrum cover whatever was read, even when a source failed.
fn execute(command: &Commands, cancel: CancelToken, out: &mut dyn Report) -> Result<StreamStatus> {
    let (args, strategy) = match command {
        Commands::Bitrate { run: args } => (args, Strategy::BitRate(BitRate::new())),
        Commands::Pktrate { run: args } | Commands::Wavelet { run: args } => {
            (args, Strategy::PacketRate(PacketRate::new()))
        }
        Commands::Timescale { run: args, timescale, moments } => {
            let cascade = Cascade::try_from(CascadeConfig::lenient(*timescale, *moments))?;
            (args, Strategy::Cascade(CascadeFeed::new(cascade)))
        }
    };
    if args.iface.is_none() && args.inputs.is_empty() {
        return Err(SourceError::Other("no input files, see --help for usage".into()).into());
    }

    let mut config = args.sampler_config();
    if matches!(command, Commands::Wavelet { .. }) {
        // the spectrum needs every window, zeros included
        config.show_zero = true;
    }
    info!(
        "{} Hz, link {} bps, level {}",
        config.sample_frequency, config.link_capacity, config.level
    );
    let sample_frequency = config.sample_frequency;
    let mut sampler = Sampler::new(config, strategy, cancel);
    let t_sample = sampler.t_sample().to_f64();

    match command {
        Commands::Bitrate { .. } | Commands::Pktrate { .. } => process_inputs(args, &mut sampler, out),
        Commands::Timescale { .. } => {
            let status = process_inputs(args, &mut sampler, &mut Discard);
            if let Some(cascade) = sampler.accumulator().cascade() {
                out.write_cascade(&cascade.report(sample_frequency, t_sample))?;
            }
            status
        }
        Commands::Wavelet { .. } => {
            let mut series: Vec<Sample> = Vec::new();
            let status = process_inputs(args, &mut sampler, &mut series);
            let values: Vec<f64> = series.iter().map(|s| s.value).collect();
            out.write_spectrum(t_sample, &haar_spectrum(&values, t_sample))?;
            status
        }
    }
}

/// Run the live interface, or each capture file in turn.
fn process_inputs<A, S>(args: &RunArgs, sampler: &mut Sampler<A>, sink: &mut S) -> Result<StreamStatus>
where
    A: Accumulator,
    S: SampleSink + ?Sized,
{
    let filter = args.filter.as_deref();

    if let Some(iface) = &args.iface {
        let mut source = PcapSource::open_device(iface, filter)?;
        return Ok(run_stream(&mut source, sampler, sink, 0)?.status);
    }

    let mut opened = 0;
    for path in &args.inputs {
        if sampler.is_cancelled() {
            return Ok(StreamStatus::Cancelled);
        }
        let mut source = match PcapSource::open_file(path, filter) {
            Ok(source) => source,
            Err(e) => {
                error!("{}: {}", path.display(), e);
                continue;
            }
        };
        let outcome = run_stream(&mut source, sampler, sink, opened)?;
        opened += 1;
        if outcome.status == StreamStatus::Cancelled {
            return Ok(StreamStatus::Cancelled);
        }
    }

    if opened == 0 {
        return Err(SourceError::Other("none of the input files could be opened".into()).into());
    }
    Ok(StreamStatus::Completed)
}
