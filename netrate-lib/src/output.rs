//! Presentation adapters: where closed windows, cascade reports and
//! spectra end up.

use std::fmt;
use std::io::Write;
use std::str::FromStr;

use crate::cascade::CascadeReport;
use crate::error::{ConfigError, Result};
use crate::record::Record;
use crate::sampler::{Sample, SampleSink, StreamInfo};
use crate::strategy::Measure;
use crate::wavelet::SpectrumBand;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OutputFormat {
    #[default]
    Default,
    Csv,
    Tsv,
    Matlab,
    Json,
    Influx,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Default,
        OutputFormat::Csv,
        OutputFormat::Tsv,
        OutputFormat::Matlab,
        OutputFormat::Json,
        OutputFormat::Influx,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            OutputFormat::Default => "default",
            OutputFormat::Csv => "csv",
            OutputFormat::Tsv => "tsv",
            OutputFormat::Matlab => "matlab",
            OutputFormat::Json => "json",
            OutputFormat::Influx => "influx",
        }
    }

    /// Text layout for the text formats, `None` otherwise.
    pub fn text_style(&self) -> Option<TextStyle> {
        match self {
            OutputFormat::Default => Some(TextStyle::Table),
            OutputFormat::Csv => Some(TextStyle::Delimited { delimiter: ';', header: false }),
            OutputFormat::Tsv => Some(TextStyle::Delimited { delimiter: '\t', header: false }),
            OutputFormat::Matlab => Some(TextStyle::Delimited { delimiter: '\t', header: true }),
            OutputFormat::Json | OutputFormat::Influx => None,
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for OutputFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        OutputFormat::ALL
            .into_iter()
            .find(|format| format.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| ConfigError::UnknownFormat(s.to_string()))
    }
}

/// A sink that can also render the end-of-run results.
pub trait Report: SampleSink {
    fn write_cascade(&mut self, report: &CascadeReport) -> Result<()>;

    fn write_spectrum(&mut self, t_sample: f64, bands: &[SpectrumBand]) -> Result<()>;

    /// Push out anything still buffered. Called once, also after a cancel.
    fn finish(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Build the presenter for `format` writing to `out`. `influx` ignores `out`
/// and must be called from within a tokio runtime.
pub fn presenter<W>(format: OutputFormat, out: W) -> Result<Box<dyn Report + Send>>
where
    W: Write + Send + 'static,
{
    let presenter: Box<dyn Report + Send> = match format {
        OutputFormat::Json => Box::new(JsonLinesOutput::new(out)),
        OutputFormat::Influx => Box::new(crate::db::InfluxSink::from_env()?),
        text => Box::new(TextOutput::new(out, text.text_style().unwrap_or(TextStyle::Table))),
    };
    Ok(presenter)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextStyle {
    /// Human readable, with a parameter preamble.
    Table,
    /// One record per line; `header` adds a quoted column header row.
    Delimited { delimiter: char, header: bool },
}

/// `printf("%.*g")`: `precision` significant digits, trailing zeros dropped,
/// scientific notation outside `1e-4 ..= 10^precision`.
pub fn general(value: f64, precision: usize) -> String {
    if value.is_nan() {
        return "nan".into();
    }
    if value.is_infinite() {
        return if value < 0.0 { "-inf".into() } else { "inf".into() };
    }
    if value == 0.0 {
        return "0".into();
    }
    let precision = precision.max(1);
    let sci = format!("{:.*e}", precision - 1, value);
    let (mantissa, exponent) = sci.split_once('e').unwrap_or((&sci, "0"));
    let exponent: i32 = exponent.parse().unwrap_or(0);

    if exponent < -4 || exponent >= precision as i32 {
        let sign = if exponent < 0 { '-' } else { '+' };
        format!("{}e{}{:02}", trim_fraction(mantissa), sign, exponent.abs())
    } else {
        let decimals = (precision as i32 - 1 - exponent).max(0) as usize;
        trim_fraction(&format!("{value:.decimals$}")).to_string()
    }
}

fn trim_fraction(s: &str) -> &str {
    if s.contains('.') {
        s.trim_end_matches('0').trim_end_matches('.')
    } else {
        s
    }
}

/// Plain-text output in one of the [`TextStyle`]s.
pub struct TextOutput<W: Write> {
    out: W,
    style: TextStyle,
    measure: Measure,
}

impl<W: Write> TextOutput<W> {
    pub fn new(out: W, style: TextStyle) -> Self {
        Self { out, style, measure: Measure::Bitrate }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn write_value(&mut self, value: f64) -> std::io::Result<()> {
        match (self.measure, self.style) {
            (Measure::Bitrate, _) => write!(self.out, "{value:.15}"),
            (Measure::Packets, TextStyle::Table) => write!(self.out, "{:10}", value as u64),
            (Measure::Packets, TextStyle::Delimited { .. }) => write!(self.out, "{}", value as u64),
        }
    }
}

impl<W: Write> SampleSink for TextOutput<W> {
    fn write_header(&mut self, info: &StreamInfo) -> Result<()> {
        self.measure = info.measure;
        match self.style {
            TextStyle::Table => {
                writeln!(self.out, "sampleFrequency: {:.2}Hz", info.sample_frequency)?;
                writeln!(self.out, "tSample:         {:.6}s", info.t_sample)?;
                writeln!(self.out)?;
                writeln!(self.out, "Time                      \t   {}", info.measure.label())?;
            }
            TextStyle::Delimited { delimiter, header: true } => {
                writeln!(
                    self.out,
                    "\"Time (tSample: {:.6})\"{delimiter}\"{}\"",
                    info.t_sample,
                    info.measure.label()
                )?;
            }
            TextStyle::Delimited { header: false, .. } => {}
        }
        Ok(())
    }

    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        let separator = match self.style {
            TextStyle::Table => '\t',
            TextStyle::Delimited { delimiter, .. } => delimiter,
        };
        write!(self.out, "{:.15}{separator}", sample.time)?;
        self.write_value(sample.value)?;
        writeln!(self.out)?;
        Ok(())
    }

    fn write_trailer(&mut self, _index: usize) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Report for TextOutput<W> {
    fn write_cascade(&mut self, report: &CascadeReport) -> Result<()> {
        match self.style {
            TextStyle::Table => {
                let widths: Vec<usize> = (0..report.moments)
                    .map(|i| {
                        report
                            .levels
                            .iter()
                            .map(|level| general(level.moments[i], 6).len())
                            .max()
                            .unwrap_or(1)
                    })
                    .collect();

                writeln!(self.out, "sampleFrequency: {:.2}Hz", report.sample_frequency)?;
                writeln!(self.out, "tSample:         {:.6}s", report.t_sample)?;
                writeln!(self.out, "timescale:       {}", report.timescale)?;
                writeln!(self.out)?;
                write!(self.out, "Tscale   ")?;
                for (i, width) in widths.iter().enumerate() {
                    write!(self.out, "{:>width$}{} ", "M", i + 1)?;
                }
                writeln!(self.out, " Samples")?;

                for level in &report.levels {
                    write!(self.out, "{:<8} ", general(level.resolution, 6))?;
                    for (moment, width) in level.moments.iter().zip(&widths) {
                        write!(self.out, "{:>w$} ", general(*moment, 6), w = width + 1)?;
                    }
                    writeln!(self.out, " {}", level.samples)?;
                }
            }
            TextStyle::Delimited { delimiter, header } => {
                if header {
                    write!(
                        self.out,
                        "\"Tscale ({}x, {:.2}Hz)\"",
                        report.timescale, report.sample_frequency
                    )?;
                    for i in 0..report.moments {
                        write!(self.out, "{delimiter}\"M{}\"", i + 1)?;
                    }
                    writeln!(self.out, "{delimiter}\"Samples\"")?;
                }
                for level in &report.levels {
                    write!(self.out, "{}", general(level.resolution, 6))?;
                    for moment in &level.moments {
                        write!(self.out, "{delimiter}{moment:.6}")?;
                    }
                    writeln!(self.out, "{delimiter}{}", level.samples)?;
                }
            }
        }
        self.out.flush()?;
        Ok(())
    }

    fn write_spectrum(&mut self, _t_sample: f64, bands: &[SpectrumBand]) -> Result<()> {
        let (delimiter, header) = match self.style {
            TextStyle::Table => ('\t', true),
            TextStyle::Delimited { delimiter, header } => (delimiter, header),
        };
        if header {
            let columns = ["Ts", "Band", "D coeff", "C coeff"];
            let row = match self.style {
                TextStyle::Table => columns.join("\t"),
                TextStyle::Delimited { .. } => columns
                    .iter()
                    .map(|c| format!("\"{c}\""))
                    .collect::<Vec<_>>()
                    .join(&delimiter.to_string()),
            };
            writeln!(self.out, "{row}")?;
        }
        for band in bands {
            let scale = match self.style {
                TextStyle::Table => format!("{:>5}", general(band.scale, 5)),
                TextStyle::Delimited { .. } => general(band.scale, 5),
            };
            writeln!(
                self.out,
                "{scale}{delimiter}{}{delimiter}{:.6}{delimiter}{:.6}",
                band.band, band.detail, band.approximation
            )?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// One JSON [`Record`] per line.
pub struct JsonLinesOutput<W: Write> {
    out: W,
    stream: usize,
}

impl<W: Write> JsonLinesOutput<W> {
    pub fn new(out: W) -> Self {
        Self { out, stream: 0 }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    fn emit(&mut self, record: &Record) -> Result<()> {
        serde_json::to_writer(&mut self.out, record)?;
        self.out.write_all(b"\n")?;
        Ok(())
    }
}

impl<W: Write> SampleSink for JsonLinesOutput<W> {
    fn write_header(&mut self, info: &StreamInfo) -> Result<()> {
        self.stream = info.index;
        self.emit(&Record::from(info))
    }

    fn write_sample(&mut self, sample: &Sample) -> Result<()> {
        self.emit(&Record::sample(self.stream, sample))
    }

    fn write_trailer(&mut self, _index: usize) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

impl<W: Write> Report for JsonLinesOutput<W> {
    fn write_cascade(&mut self, report: &CascadeReport) -> Result<()> {
        for level in &report.levels {
            self.emit(&Record::from(level))?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn write_spectrum(&mut self, _t_sample: f64, bands: &[SpectrumBand]) -> Result<()> {
        for band in bands {
            self.emit(&Record::from(band))?;
        }
        self.out.flush()?;
        Ok(())
    }

    fn finish(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cascade::Cascade;
    use crate::precise::Real;

    fn info(measure: Measure) -> StreamInfo {
        StreamInfo { index: 0, sample_frequency: 2.0, t_sample: 0.5, measure }
    }

    fn sample(time: f64, value: f64) -> Sample {
        Sample { index: 0, start: Real::from_f64(time), time, value }
    }

    fn text(format: OutputFormat) -> TextOutput<Vec<u8>> {
        TextOutput::new(Vec::new(), format.text_style().unwrap())
    }

    fn rendered(out: TextOutput<Vec<u8>>) -> String {
        String::from_utf8(out.into_inner()).unwrap()
    }

    #[test]
    fn format_names() {
        assert_eq!("CSV".parse(), Ok(OutputFormat::Csv));
        assert_eq!(" matlab ".parse(), Ok(OutputFormat::Matlab));
        assert_eq!(
            "xml".parse::<OutputFormat>(),
            Err(ConfigError::UnknownFormat("xml".into()))
        );
        assert_eq!(OutputFormat::Json.text_style(), None);
    }

    #[test]
    fn general_matches_printf() {
        assert_eq!(general(100.0, 6), "100");
        assert_eq!(general(0.1, 6), "0.1");
        assert_eq!(general(1234567.0, 6), "1.23457e+06");
        assert_eq!(general(0.00001234, 6), "1.234e-05");
        assert_eq!(general(999999.5, 6), "1e+06");
        assert_eq!(general(2.5, 5), "2.5");
        assert_eq!(general(f64::NAN, 6), "nan");
    }

    #[test]
    fn default_table_for_bitrate() {
        let mut out = text(OutputFormat::Default);
        out.write_header(&info(Measure::Bitrate)).unwrap();
        out.write_sample(&sample(1.5, 800.0)).unwrap();
        assert_eq!(
            rendered(out),
            "sampleFrequency: 2.00Hz\n\
             tSample:         0.500000s\n\
             \n\
             Time                      \t   Bitrate (bps)\n\
             1.500000000000000\t800.000000000000000\n"
        );
    }

    #[test]
    fn default_table_pads_packet_counts() {
        let mut out = text(OutputFormat::Default);
        out.write_header(&info(Measure::Packets)).unwrap();
        out.write_sample(&sample(0.0, 3.0)).unwrap();
        assert!(rendered(out).ends_with("0.000000000000000\t         3\n"));
    }

    #[test]
    fn csv_has_no_header() {
        let mut out = text(OutputFormat::Csv);
        out.write_header(&info(Measure::Packets)).unwrap();
        out.write_sample(&sample(0.5, 7.0)).unwrap();
        assert_eq!(rendered(out), "0.500000000000000;7\n");
    }

    #[test]
    fn matlab_quotes_header() {
        let mut out = text(OutputFormat::Matlab);
        out.write_header(&info(Measure::Bitrate)).unwrap();
        assert_eq!(rendered(out), "\"Time (tSample: 0.500000)\"\t\"Bitrate (bps)\"\n");
    }

    #[test]
    fn cascade_delimited() {
        let mut cascade = Cascade::new(2, 1).unwrap();
        for value in [1.0, 3.0] {
            cascade.feed(value);
        }
        let mut out = text(OutputFormat::Matlab);
        out.write_cascade(&cascade.report(1.0, 1.0)).unwrap();
        assert_eq!(
            rendered(out),
            "\"Tscale (2x, 1.00Hz)\"\t\"M1\"\t\"Samples\"\n\
             1\t2.000000\t2\n\
             2\t2.000000\t1\n"
        );
    }

    #[test]
    fn cascade_table_aligns_columns() {
        let mut cascade = Cascade::new(2, 2).unwrap();
        for value in [10.0, 30.0] {
            cascade.feed(value);
        }
        let mut out = text(OutputFormat::Default);
        out.write_cascade(&cascade.report(1.0, 1.0)).unwrap();
        let text = rendered(out);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines[2], "timescale:       2");
        assert_eq!(lines[4], "Tscale    M1   M2  Samples");
        assert_eq!(lines[5], "1         20  500  2");
        assert_eq!(lines[6], "2         20  400  1");
    }

    #[test]
    fn json_lines() {
        let mut out = JsonLinesOutput::new(Vec::new());
        let mut stream = info(Measure::Packets);
        stream.index = 2;
        out.write_header(&stream).unwrap();
        out.write_sample(&sample(0.5, 4.0)).unwrap();
        let text = String::from_utf8(out.into_inner()).unwrap();
        let records: Vec<Record> = text
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect();
        assert_eq!(
            records[1],
            Record::Sample { stream: 2, index: 0, time: 0.5, value: 4.0 }
        );
    }
}
