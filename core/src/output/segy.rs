//! SEG-Y revision 1 writer and a small reader for checking written files.
//!
//! Layout: 3200-byte EBCDIC textual header, 400-byte binary header, then one
//! 240-byte trace header plus big-endian IEEE `f32` samples per trace. All
//! integers are big-endian.

use std::fs;
use std::io::{self, BufWriter, Write};
use std::path::Path;

use ndarray::{Array2, ArrayView2};
use serde::{Deserialize, Serialize};
use tempfile::NamedTempFile;

use crate::interface::BandpassCorners;
use crate::output::coordinates::TraceCoordinate;
use crate::prelude::{DigitizeError, DigitizeResult, RunContext};
use crate::telemetry::{LogManager, Step};

pub const TEXT_HEADER_LEN: usize = 3200;
pub const BINARY_HEADER_LEN: usize = 400;
pub const TRACE_HEADER_LEN: usize = 240;
/// Sample format code for 4-byte IEEE floating point.
pub const FORMAT_IEEE_FLOAT: i16 = 5;
/// Coordinates are stored in hundredths.
pub const COORDINATE_SCALAR: i16 = -100;

const TEXT_LINES: usize = 40;
const TEXT_LINE_LEN: usize = 80;

mod binary {
    pub const TRACES_PER_ENSEMBLE: usize = 12;
    pub const SAMPLE_INTERVAL: usize = 16;
    pub const SAMPLES: usize = 20;
    pub const FORMAT: usize = 24;
    pub const ENSEMBLE_FOLD: usize = 26;
    pub const SORTING: usize = 28;
    pub const MEASUREMENT: usize = 54;
    pub const REVISION: usize = 300;
    pub const FIXED_LENGTH: usize = 302;
    pub const EXTENDED_HEADERS: usize = 304;
    pub const TRACE_COUNT: usize = 320;
}

mod trace {
    pub const SEQ_LINE: usize = 0;
    pub const SEQ_FILE: usize = 4;
    pub const CDP: usize = 20;
    pub const TRACE_ID: usize = 28;
    pub const COORD_SCALAR: usize = 70;
    pub const SOURCE_X: usize = 72;
    pub const SOURCE_Y: usize = 76;
    pub const GROUP_X: usize = 80;
    pub const GROUP_Y: usize = 84;
    pub const COORD_UNITS: usize = 88;
    pub const DELAY: usize = 108;
    pub const SAMPLES: usize = 114;
    pub const SAMPLE_INTERVAL: usize = 116;
    pub const LOW_CUT: usize = 148;
    pub const HIGH_CUT: usize = 150;
    pub const CDP_X: usize = 180;
    pub const CDP_Y: usize = 184;
    pub const TIME_SCALAR: usize = 214;
}

/// File-level values recorded in the headers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SegyHeader {
    /// Free text naming the scanned source, written to the textual header.
    pub source: String,
    pub sample_interval_us: u16,
    /// Two-way time of the first sample; stored as its absolute value.
    pub first_time_ms: f64,
    pub band: BandpassCorners,
}

/// Maps ASCII to EBCDIC (code page 037); unmapped characters become a space.
pub fn ascii_to_ebcdic(c: u8) -> u8 {
    match c {
        b'0'..=b'9' => 0xF0 + (c - b'0'),
        b'A'..=b'I' => 0xC1 + (c - b'A'),
        b'J'..=b'R' => 0xD1 + (c - b'J'),
        b'S'..=b'Z' => 0xE2 + (c - b'S'),
        b'a'..=b'i' => 0x81 + (c - b'a'),
        b'j'..=b'r' => 0x91 + (c - b'j'),
        b's'..=b'z' => 0xA2 + (c - b's'),
        b'.' => 0x4B,
        b'<' => 0x4C,
        b'(' => 0x4D,
        b'+' => 0x4E,
        b'|' => 0x4F,
        b'&' => 0x50,
        b'!' => 0x5A,
        b'$' => 0x5B,
        b'*' => 0x5C,
        b')' => 0x5D,
        b';' => 0x5E,
        b'-' => 0x60,
        b'/' => 0x61,
        b',' => 0x6B,
        b'%' => 0x6C,
        b'_' => 0x6D,
        b'>' => 0x6E,
        b'?' => 0x6F,
        b':' => 0x7A,
        b'#' => 0x7B,
        b'@' => 0x7C,
        b'\'' => 0x7D,
        b'=' => 0x7E,
        b'"' => 0x7F,
        _ => 0x40,
    }
}

/// Inverse of [`ascii_to_ebcdic`] for the characters it maps.
pub fn ebcdic_to_ascii(code: u8) -> u8 {
    if code == 0x40 {
        return b' ';
    }
    (0x21u8..0x7F)
        .find(|&c| ascii_to_ebcdic(c) == code)
        .unwrap_or(b' ')
}

fn text_header(header: &SegyHeader, traces: usize, samples: usize) -> Vec<u8> {
    let band = &header.band;
    let cards = [
        "DIGITIZED SEISMIC SECTION".to_string(),
        format!("SOURCE IMAGE: {}", header.source),
        format!("TRACES: {}  SAMPLES PER TRACE: {}", traces, samples),
        format!(
            "SAMPLE INTERVAL: {} US  FORMAT: IEEE FLOAT",
            header.sample_interval_us
        ),
        format!(
            "BANDPASS: {}-{}-{}-{} HZ ZERO PHASE",
            band.f1, band.f2, band.f3, band.f4
        ),
        format!("FIRST SAMPLE TWT: {:.3} MS", header.first_time_ms),
        "DELAY TIME STORED AS ABSOLUTE VALUE OF FIRST SAMPLE TWT".to_string(),
        "COORDINATES: CDP X Y AT BYTES 181 185, SCALAR -100".to_string(),
        "AMPLITUDES RECONSTRUCTED FROM INK DENSITY, NOT TRUE AMPLITUDE".to_string(),
    ];

    let mut text = Vec::with_capacity(TEXT_HEADER_LEN);
    for line in 0..TEXT_LINES {
        let body = match line {
            l if l < cards.len() => cards[l].clone(),
            38 => "SEG Y REV1".to_string(),
            39 => "END TEXTUAL HEADER".to_string(),
            _ => String::new(),
        };
        let card = format!("C{:>2} {}", line + 1, body);
        let mut bytes: Vec<u8> = card
            .bytes()
            .take(TEXT_LINE_LEN)
            .map(|c| c.to_ascii_uppercase())
            .collect();
        bytes.resize(TEXT_LINE_LEN, b' ');
        text.extend(bytes.into_iter().map(ascii_to_ebcdic));
    }
    text
}

fn put_i16(buf: &mut [u8], offset: usize, value: i16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_u16(buf: &mut [u8], offset: usize, value: u16) {
    buf[offset..offset + 2].copy_from_slice(&value.to_be_bytes());
}

fn put_i32(buf: &mut [u8], offset: usize, value: i32) {
    buf[offset..offset + 4].copy_from_slice(&value.to_be_bytes());
}

fn get_i16(buf: &[u8], offset: usize) -> i16 {
    i16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn get_u16(buf: &[u8], offset: usize) -> u16 {
    u16::from_be_bytes([buf[offset], buf[offset + 1]])
}

fn get_i32(buf: &[u8], offset: usize) -> i32 {
    i32::from_be_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn binary_header(header: &SegyHeader, traces: usize, samples: u16) -> Vec<u8> {
    let mut buf = vec![0u8; BINARY_HEADER_LEN];
    put_i16(&mut buf, binary::TRACES_PER_ENSEMBLE, 1);
    put_u16(&mut buf, binary::SAMPLE_INTERVAL, header.sample_interval_us);
    put_u16(&mut buf, binary::SAMPLES, samples);
    put_i16(&mut buf, binary::FORMAT, FORMAT_IEEE_FLOAT);
    put_i16(&mut buf, binary::ENSEMBLE_FOLD, 1);
    // 4 = horizontally stacked
    put_i16(&mut buf, binary::SORTING, 4);
    put_i16(&mut buf, binary::MEASUREMENT, 1);
    put_u16(&mut buf, binary::REVISION, 0x0100);
    put_i16(&mut buf, binary::FIXED_LENGTH, 1);
    put_i16(&mut buf, binary::EXTENDED_HEADERS, 0);
    buf[binary::TRACE_COUNT..binary::TRACE_COUNT + 8]
        .copy_from_slice(&(traces as u64).to_be_bytes());
    buf
}

fn scaled(value: f64, what: &str) -> DigitizeResult<i32> {
    let scaled = (value * -(COORDINATE_SCALAR as f64)).round();
    if scaled.is_finite() && scaled >= i32::MIN as f64 && scaled <= i32::MAX as f64 {
        Ok(scaled as i32)
    } else {
        Err(DigitizeError::Geometry(format!(
            "{} coordinate {} does not fit the trace header",
            what, value
        )))
    }
}

fn saturating_i16(value: f64) -> i16 {
    value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16
}

fn trace_header(
    index: usize,
    coordinate: &TraceCoordinate,
    header: &SegyHeader,
    samples: u16,
) -> DigitizeResult<Vec<u8>> {
    let mut buf = vec![0u8; TRACE_HEADER_LEN];
    let seq = i32::try_from(index + 1).unwrap_or(i32::MAX);
    let cdp = i32::try_from(coordinate.cdp).map_err(|_| {
        DigitizeError::Geometry(format!("CDP {} does not fit the trace header", coordinate.cdp))
    })?;
    let x = scaled(coordinate.x, "X")?;
    let y = scaled(coordinate.y, "Y")?;

    put_i32(&mut buf, trace::SEQ_LINE, seq);
    put_i32(&mut buf, trace::SEQ_FILE, seq);
    put_i32(&mut buf, trace::CDP, cdp);
    put_i16(&mut buf, trace::TRACE_ID, 1);
    put_i16(&mut buf, trace::COORD_SCALAR, COORDINATE_SCALAR);
    for (x_at, y_at) in [
        (trace::SOURCE_X, trace::SOURCE_Y),
        (trace::GROUP_X, trace::GROUP_Y),
        (trace::CDP_X, trace::CDP_Y),
    ] {
        put_i32(&mut buf, x_at, x);
        put_i32(&mut buf, y_at, y);
    }
    put_i16(&mut buf, trace::COORD_UNITS, 1);
    put_i16(&mut buf, trace::DELAY, saturating_i16(header.first_time_ms.abs()));
    put_u16(&mut buf, trace::SAMPLES, samples);
    put_u16(&mut buf, trace::SAMPLE_INTERVAL, header.sample_interval_us);
    put_i16(&mut buf, trace::LOW_CUT, saturating_i16(header.band.f1 as f64));
    put_i16(&mut buf, trace::HIGH_CUT, saturating_i16(header.band.f4 as f64));
    put_i16(&mut buf, trace::TIME_SCALAR, 1);
    Ok(buf)
}

/// Writes `data` (`[trace][sample]`) to `path` as SEG-Y.
///
/// Trace `i` takes `coordinates[i]`. The file is assembled under a temporary
/// name in the target directory and renamed into place once every trace has
/// been written; on error or cancellation the target is left untouched.
pub fn write_segy(
    path: &Path,
    data: ArrayView2<f32>,
    coordinates: &[TraceCoordinate],
    header: &SegyHeader,
    ctx: &RunContext<'_>,
) -> DigitizeResult<()> {
    let logger = LogManager::new("segy");
    let (traces, samples) = data.dim();
    if coordinates.len() < traces {
        return Err(DigitizeError::Geometry(format!(
            "{} coordinates for {} traces",
            coordinates.len(),
            traces
        )));
    }
    let samples_u16 = u16::try_from(samples).map_err(|_| {
        DigitizeError::write(
            path,
            io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} samples per trace exceed the SEG-Y limit", samples),
            ),
        )
    })?;

    let parent = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => Path::new(".").to_path_buf(),
    };
    fs::create_dir_all(&parent).map_err(|err| DigitizeError::write(path, err))?;
    let mut temp = NamedTempFile::new_in(&parent).map_err(|err| DigitizeError::write(path, err))?;

    {
        let mut out = BufWriter::new(temp.as_file_mut());
        let io_err = |err| DigitizeError::write(path, err);
        out.write_all(&text_header(header, traces, samples))
            .map_err(io_err)?;
        out.write_all(&binary_header(header, traces, samples_u16))
            .map_err(io_err)?;

        let mut payload = Vec::with_capacity(samples * 4);
        for (index, row) in data.outer_iter().enumerate() {
            ctx.checkpoint()?;
            out.write_all(&trace_header(index, &coordinates[index], header, samples_u16)?)
                .map_err(io_err)?;
            payload.clear();
            for value in row.iter() {
                payload.extend_from_slice(&value.to_be_bytes());
            }
            out.write_all(&payload).map_err(io_err)?;
            ctx.reporter.progress(Step::Writing, index + 1, traces);
        }
        out.flush().map_err(io_err)?;
    }
    temp.as_file()
        .sync_all()
        .map_err(|err| DigitizeError::write(path, err))?;
    temp.persist(path)
        .map_err(|err| DigitizeError::write(path, err.error))?;

    logger.record(&format!(
        "wrote {} traces x {} samples to {}",
        traces,
        samples,
        path.display()
    ));
    Ok(())
}

/// Per-trace header values read back from a file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraceHeaderSummary {
    pub sequence: i32,
    pub cdp: i32,
    pub x: f64,
    pub y: f64,
    pub delay_ms: i16,
    pub samples: u16,
    pub sample_interval_us: u16,
}

/// Contents of a SEG-Y file as written by [`write_segy`].
#[derive(Debug, Clone)]
pub struct SegyInspection {
    pub text: String,
    pub sample_interval_us: u16,
    pub samples: u16,
    pub format: i16,
    pub revision: u16,
    pub trace_count: u64,
    pub traces: Vec<TraceHeaderSummary>,
    pub data: Array2<f32>,
}

/// Reads back a fixed-length IEEE-float SEG-Y file.
pub fn inspect_segy(path: &Path) -> DigitizeResult<SegyInspection> {
    let bytes = fs::read(path).map_err(|err| DigitizeError::write(path, err))?;
    let corrupt = |detail: String| {
        DigitizeError::write(path, io::Error::new(io::ErrorKind::InvalidData, detail))
    };
    let head = TEXT_HEADER_LEN + BINARY_HEADER_LEN;
    if bytes.len() < head {
        return Err(corrupt(format!("{} bytes is shorter than the headers", bytes.len())));
    }
    let text: String = bytes[..TEXT_HEADER_LEN]
        .iter()
        .map(|&b| ebcdic_to_ascii(b) as char)
        .collect();
    let bin = &bytes[TEXT_HEADER_LEN..head];
    let samples = get_u16(bin, binary::SAMPLES);
    let format = get_i16(bin, binary::FORMAT);
    if format != FORMAT_IEEE_FLOAT {
        return Err(corrupt(format!("unsupported sample format {}", format)));
    }
    let mut count = [0u8; 8];
    count.copy_from_slice(&bin[binary::TRACE_COUNT..binary::TRACE_COUNT + 8]);

    let trace_len = TRACE_HEADER_LEN + samples as usize * 4;
    let body = &bytes[head..];
    if body.len() % trace_len != 0 {
        return Err(corrupt(format!(
            "{} trailing bytes after the last trace",
            body.len() % trace_len
        )));
    }
    let trace_total = body.len() / trace_len;
    let mut traces = Vec::with_capacity(trace_total);
    let mut data = Array2::zeros((trace_total, samples as usize));
    for (index, chunk) in body.chunks_exact(trace_len).enumerate() {
        let (th, payload) = chunk.split_at(TRACE_HEADER_LEN);
        let scalar = get_i16(th, trace::COORD_SCALAR);
        let unscale = |raw: i32| match scalar {
            0 => raw as f64,
            s if s < 0 => raw as f64 / -(s as f64),
            s => raw as f64 * s as f64,
        };
        traces.push(TraceHeaderSummary {
            sequence: get_i32(th, trace::SEQ_LINE),
            cdp: get_i32(th, trace::CDP),
            x: unscale(get_i32(th, trace::CDP_X)),
            y: unscale(get_i32(th, trace::CDP_Y)),
            delay_ms: get_i16(th, trace::DELAY),
            samples: get_u16(th, trace::SAMPLES),
            sample_interval_us: get_u16(th, trace::SAMPLE_INTERVAL),
        });
        for (sample, raw) in payload.chunks_exact(4).enumerate() {
            data[[index, sample]] = f32::from_be_bytes([raw[0], raw[1], raw[2], raw[3]]);
        }
    }
    Ok(SegyInspection {
        text,
        sample_interval_us: get_u16(bin, binary::SAMPLE_INTERVAL),
        samples,
        format,
        revision: get_u16(bin, binary::REVISION),
        trace_count: u64::from_be_bytes(count),
        traces,
        data,
    })
}
