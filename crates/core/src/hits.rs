//! Hit record framing and window extraction.
//!
//! Hitspool files are a plain concatenation of records. Every record starts
//! with a 16-byte big-endian header: total length (header included), payload
//! type, and the hit time in ticks. Nothing past the header is interpreted.

use crate::error::{Error, Result};
use crate::ticks::Tick;
use std::fs::File;
use std::io::{BufReader, BufWriter, ErrorKind, Read, Write};
use std::path::Path;

pub const HEADER_LEN: usize = 16;

/// Largest record length a header may claim. Anything longer is a torn or
/// overwritten header.
pub const MAX_RECORD_LEN: usize = 1 << 20;

/// One framed hit.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct HitRecord {
    pub kind: u32,
    pub tick: Tick,
    pub payload: Vec<u8>,
}

impl HitRecord {
    pub fn new(kind: u32, tick: Tick, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            kind,
            tick,
            payload: payload.into(),
        }
    }

    /// Total framed length.
    pub fn len(&self) -> usize {
        HEADER_LEN + self.payload.len()
    }

    pub fn is_empty(&self) -> bool {
        self.payload.is_empty()
    }

    pub fn write_to<W: Write>(&self, out: &mut W) -> Result<()> {
        let len = u32::try_from(self.len())
            .map_err(|_| Error::BadRecord(format!("record of {} bytes", self.len())))?;
        out.write_all(&len.to_be_bytes())?;
        out.write_all(&self.kind.to_be_bytes())?;
        out.write_all(&self.tick.to_be_bytes())?;
        out.write_all(&self.payload)?;
        Ok(())
    }
}

/// Reads framed records until end of input.
///
/// A record cut short by end of file ends the stream quietly; the ring
/// file may still be in the middle of being written.
pub struct HitReader<R> {
    inner: R,
    truncated: bool,
}

impl<R: Read> HitReader<R> {
    pub fn new(inner: R) -> Self {
        Self {
            inner,
            truncated: false,
        }
    }

    /// Whether the stream ended inside a record.
    pub fn truncated(&self) -> bool {
        self.truncated
    }

    /// Read the next record as raw bytes with its decoded time.
    pub fn next_raw(&mut self) -> Result<Option<(Tick, Vec<u8>)>> {
        let mut header = [0u8; HEADER_LEN];
        let filled = read_full(&mut self.inner, &mut header)?;
        if filled == 0 {
            return Ok(None);
        }
        if filled < HEADER_LEN {
            self.truncated = true;
            return Ok(None);
        }

        let len = u32::from_be_bytes([header[0], header[1], header[2], header[3]]) as usize;
        if len < HEADER_LEN {
            return Err(Error::BadRecord(format!("record length {len} is shorter than its header")));
        }
        if len > MAX_RECORD_LEN {
            return Err(Error::BadRecord(format!(
                "record length {len} exceeds {MAX_RECORD_LEN} bytes"
            )));
        }
        let mut tick_bytes = [0u8; 8];
        tick_bytes.copy_from_slice(&header[8..16]);
        let tick = i64::from_be_bytes(tick_bytes);

        let mut raw = Vec::with_capacity(len);
        raw.extend_from_slice(&header);
        raw.resize(len, 0);
        let body = read_full(&mut self.inner, &mut raw[HEADER_LEN..])?;
        if body < len - HEADER_LEN {
            self.truncated = true;
            return Ok(None);
        }
        Ok(Some((tick, raw)))
    }

    /// Read and decode the next record.
    pub fn next_record(&mut self) -> Result<Option<HitRecord>> {
        Ok(self.next_raw()?.map(|(tick, raw)| {
            let kind = u32::from_be_bytes([raw[4], raw[5], raw[6], raw[7]]);
            HitRecord {
                kind,
                tick,
                payload: raw[HEADER_LEN..].to_vec(),
            }
        }))
    }
}

fn read_full<R: Read>(reader: &mut R, buf: &mut [u8]) -> Result<usize> {
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]) {
            Ok(0) => break,
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Ok(filled)
}

/// Name of the file holding hits extracted for `[start, stop]`.
pub fn extract_file_name(start: Tick, stop: Tick) -> String {
    format!("hits_{start}_{stop}.dat")
}

/// Outcome of an extraction.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ExtractSummary {
    pub records_read: u64,
    pub records_kept: u64,
    pub bytes_written: u64,
}

/// Copy every record with `start <= tick <= stop` from `sources`, in order,
/// into a new file at `output`.
///
/// The output depends only on the source bytes and the window.
pub fn extract_hits<P: AsRef<Path>>(
    sources: &[P],
    start: Tick,
    stop: Tick,
    output: &Path,
) -> Result<ExtractSummary> {
    let mut out = BufWriter::new(File::create(output)?);
    let mut summary = ExtractSummary::default();

    for source in sources {
        let source = source.as_ref();
        let mut reader = HitReader::new(BufReader::new(File::open(source)?));
        while let Some((tick, raw)) = reader.next_raw()? {
            summary.records_read += 1;
            if (start..=stop).contains(&tick) {
                out.write_all(&raw)?;
                summary.records_kept += 1;
                summary.bytes_written += raw.len() as u64;
            }
        }
        if reader.truncated() {
            tracing::warn!(file = %source.display(), "hitspool file ends inside a record");
        }
    }

    out.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn write_file(path: &Path, records: &[HitRecord]) {
        let mut f = File::create(path).unwrap();
        for r in records {
            r.write_to(&mut f).unwrap();
        }
    }

    #[test]
    fn reader_walks_records() {
        let mut buf = Vec::new();
        HitRecord::new(3, 100, vec![1, 2, 3]).write_to(&mut buf).unwrap();
        HitRecord::new(3, 200, Vec::new()).write_to(&mut buf).unwrap();

        let mut reader = HitReader::new(buf.as_slice());
        let first = reader.next_record().unwrap().unwrap();
        assert_eq!(first.tick, 100);
        assert_eq!(first.payload, vec![1, 2, 3]);
        assert_eq!(reader.next_record().unwrap().unwrap().tick, 200);
        assert!(reader.next_record().unwrap().is_none());
        assert!(!reader.truncated());
    }

    #[test]
    fn partial_trailing_record_is_dropped() {
        let mut buf = Vec::new();
        HitRecord::new(3, 100, vec![9; 8]).write_to(&mut buf).unwrap();
        HitRecord::new(3, 200, vec![9; 8]).write_to(&mut buf).unwrap();
        buf.truncate(buf.len() - 4);

        let mut reader = HitReader::new(buf.as_slice());
        assert!(reader.next_raw().unwrap().is_some());
        assert!(reader.next_raw().unwrap().is_none());
        assert!(reader.truncated());
    }

    #[test]
    fn short_length_is_rejected() {
        let mut buf = vec![0, 0, 0, 4];
        buf.extend_from_slice(&[0; 12]);
        let mut reader = HitReader::new(buf.as_slice());
        assert!(matches!(reader.next_raw(), Err(Error::BadRecord(_))));
    }

    #[test]
    fn oversize_length_is_rejected_before_reading_the_body() {
        let mut buf = u32::MAX.to_be_bytes().to_vec();
        buf.extend_from_slice(&[0; 12]);
        buf.extend_from_slice(&[7; 64]);
        let mut reader = HitReader::new(buf.as_slice());
        assert!(matches!(reader.next_raw(), Err(Error::BadRecord(_))));
        assert!(!reader.truncated());
    }

    #[test]
    fn extract_keeps_inclusive_window_across_files() {
        let dir = tempdir().unwrap();
        let a = dir.path().join("HitSpool-1.dat");
        let b = dir.path().join("HitSpool-2.dat");
        write_file(&a, &[HitRecord::new(3, 5, vec![1]), HitRecord::new(3, 10, vec![2])]);
        write_file(&b, &[HitRecord::new(3, 20, vec![3]), HitRecord::new(3, 21, vec![4])]);

        let out = dir.path().join(extract_file_name(10, 20));
        let summary = extract_hits(&[&a, &b], 10, 20, &out).unwrap();
        assert_eq!(summary.records_read, 4);
        assert_eq!(summary.records_kept, 2);

        let bytes = std::fs::read(&out).unwrap();
        let mut reader = HitReader::new(bytes.as_slice());
        let ticks: Vec<Tick> = std::iter::from_fn(|| reader.next_record().unwrap())
            .map(|r| r.tick)
            .collect();
        assert_eq!(ticks, vec![10, 20]);
    }

    #[test]
    fn extract_is_repeatable() {
        let dir = tempdir().unwrap();
        let src = dir.path().join("HitSpool-0.dat");
        let records: Vec<HitRecord> = (0..50).map(|i| HitRecord::new(3, i * 7, vec![i as u8; 5])).collect();
        write_file(&src, &records);

        let first = dir.path().join("one.dat");
        let second = dir.path().join("two.dat");
        extract_hits(&[&src], 30, 200, &first).unwrap();
        extract_hits(&[&src], 30, 200, &second).unwrap();
        assert_eq!(std::fs::read(first).unwrap(), std::fs::read(second).unwrap());
    }

    #[test]
    fn extract_file_naming() {
        assert_eq!(extract_file_name(1, 2), "hits_1_2.dat");
    }
}
