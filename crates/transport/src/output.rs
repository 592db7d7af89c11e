//! Line parsers for rsync and scp output.

use crate::traits::{FileReport, TransferSummary};

/// More unparseable lines than this are worth a warning.
pub const UNPARSED_WARN_THRESHOLD: usize = 5;

/// Prefix rsync is told to put on every transferred-file line.
pub const RSYNC_LOG_TOKEN: &str = "HSXFER";

/// Value for rsync's `--out-format`: file length, bytes actually sent,
/// then the name last so it may contain spaces.
pub fn rsync_out_format() -> String {
    format!("{RSYNC_LOG_TOKEN} %l %b %n")
}

fn number(s: &str) -> Option<u64> {
    s.trim_end_matches(',').replace(',', "").parse().ok()
}

fn rate(s: &str) -> Option<f64> {
    s.trim_end_matches(',').replace(',', "").parse().ok()
}

/// Feed rsync output one line at a time.
#[derive(Debug, Default)]
pub struct RsyncParser {
    summary: TransferSummary,
}

impl RsyncParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || is_rsync_noise(line) {
            return;
        }

        if let Some(rest) = line.strip_prefix(RSYNC_LOG_TOKEN) {
            // `<length> <sent> <name>`
            let mut parts = rest.trim().splitn(3, ' ');
            if let (Some(size), Some(sent), Some(name)) = (parts.next(), parts.next(), parts.next())
                && let (Some(size), Some(sent)) = (number(size), number(sent))
                && !name.is_empty()
            {
                self.summary.files.push(FileReport {
                    filename: name.to_string(),
                    size,
                    bytes_sent: sent,
                    ..FileReport::default()
                });
                return;
            }
        } else if line.starts_with("sent ") && self.parse_totals(line) {
            return;
        } else if let Some(rest) = line.strip_prefix("total size is ") {
            let size = rest.split_whitespace().next().and_then(number);
            if size.is_some() {
                self.summary.total_size = size;
                return;
            }
        }

        self.summary.unparsed_lines += 1;
        tracing::trace!(line, "unparsed rsync output");
    }

    /// `sent 1,234 bytes  received 56 bytes  2,580.00 bytes/sec`
    fn parse_totals(&mut self, line: &str) -> bool {
        let words: Vec<&str> = line.split_whitespace().collect();
        let (Some(sent), Some(received), Some(bps)) = (
            words.get(1).and_then(|w| number(w)),
            words.get(4).and_then(|w| number(w)),
            words.get(6).and_then(|w| rate(w)),
        ) else {
            return false;
        };
        if words.get(3) != Some(&"received") {
            return false;
        }
        self.summary.bytes_sent = sent;
        self.summary.bytes_received = received;
        self.summary.bytes_per_sec = bps;
        true
    }

    /// rsync reports received bytes and throughput only for the whole
    /// session. Each file gets the session rate and a share of the received
    /// bytes proportional to what it sent.
    pub fn finish(mut self) -> TransferSummary {
        let sent: u64 = self.summary.files.iter().map(|f| f.bytes_sent).sum();
        let (received, bps) = (self.summary.bytes_received, self.summary.bytes_per_sec);
        for file in &mut self.summary.files {
            if sent > 0 {
                file.bytes_received =
                    (u128::from(received) * u128::from(file.bytes_sent) / u128::from(sent)) as u64;
            }
            if file.bytes_sent > 0 {
                file.bytes_per_sec = bps;
            }
        }
        self.summary
    }
}

fn is_rsync_noise(line: &str) -> bool {
    line.starts_with("sending incremental file list")
        || line.starts_with("building file list")
        || line.starts_with("created directory")
        || line.starts_with("./")
}

/// Feed `scp -v` output one line at a time.
#[derive(Debug, Default)]
pub struct ScpParser {
    summary: TransferSummary,
}

impl ScpParser {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn feed(&mut self, line: &str) {
        let line = line.trim();
        if line.is_empty() || is_scp_noise(line) {
            return;
        }

        // Sending file modes: C0644 1048576 HitSpool-1.dat
        if let Some(rest) = line.strip_prefix("Sending file modes:") {
            let mut parts = rest.trim().splitn(3, ' ');
            if let (Some(_mode), Some(size), Some(name)) = (parts.next(), parts.next(), parts.next())
                && let Some(size) = number(size)
            {
                self.summary.files.push(FileReport {
                    filename: name.to_string(),
                    size,
                    bytes_sent: size,
                    ..FileReport::default()
                });
                return;
            }
        } else if let Some(rest) = line.strip_prefix("Transferred:") {
            // Transferred: sent 1052672, received 2380 bytes, in 0.4 seconds
            let words: Vec<&str> = rest.split_whitespace().collect();
            if let (Some(&"sent"), Some(sent), Some(&"received"), Some(received)) = (
                words.first(),
                words.get(1).and_then(|w| number(w)),
                words.get(2),
                words.get(3).and_then(|w| number(w)),
            ) {
                self.summary.bytes_sent = sent;
                self.summary.bytes_received = received;
                return;
            }
        } else if let Some(rest) = line.strip_prefix("Bytes per second:") {
            // Bytes per second: sent 2631680.0, received 5950.0
            let words: Vec<&str> = rest.split_whitespace().collect();
            if let Some(bps) = words.get(1).and_then(|w| rate(w)) {
                self.summary.bytes_per_sec = bps;
                return;
            }
        }

        self.summary.unparsed_lines += 1;
        tracing::trace!(line, "unparsed scp output");
    }

    pub fn finish(mut self) -> TransferSummary {
        let total: u64 = self.summary.files.iter().map(|f| f.bytes_sent).sum();
        if !self.summary.files.is_empty() {
            self.summary.total_size = Some(total);
        }
        let bps = self.summary.bytes_per_sec;
        for file in &mut self.summary.files {
            file.bytes_per_sec = bps;
        }
        self.summary
    }
}

fn is_scp_noise(line: &str) -> bool {
    line.starts_with("debug")
        || line.starts_with("Executing:")
        || line.starts_with("OpenSSH")
        || line.starts_with("Authenticated to")
        || line.starts_with("Sending command:")
        || line.starts_with("Entering directory:")
        || line.starts_with("Sink:")
        || line.starts_with("Warning: Permanently added")
}

/// Log a warning when too many lines could not be parsed.
pub fn warn_if_noisy(backend: &str, summary: &TransferSummary) {
    if summary.unparsed_lines > UNPARSED_WARN_THRESHOLD {
        tracing::warn!(
            backend,
            unparsed = summary.unparsed_lines,
            "transport produced unrecognised output"
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rsync_summary() {
        let mut p = RsyncParser::new();
        for line in [
            "sending incremental file list",
            "created directory /recv",
            "HSXFER 4096 0 SNALERT_20260101_000000_ichub01/",
            "HSXFER 1048576 1048576 SNALERT_20260101_000000_ichub01/HitSpool-1.dat",
            "",
            "sent 1,049,321 bytes  received 54 bytes  2,098,750.00 bytes/sec",
            "total size is 1,048,576  speedup is 1.00",
        ] {
            p.feed(line);
        }
        let s = p.finish();
        assert_eq!(s.file_count(), 2);
        assert_eq!(s.files[1].filename, "SNALERT_20260101_000000_ichub01/HitSpool-1.dat");
        assert_eq!(s.files[1].size, 1_048_576);
        assert_eq!(s.files[1].bytes_sent, 1_048_576);
        assert_eq!(s.files[1].bytes_received, 54);
        assert_eq!(s.files[0].bytes_sent, 0);
        assert_eq!(s.files[0].bytes_received, 0);
        assert_eq!(s.files[0].bytes_per_sec, 0.0);
        assert_eq!(s.bytes_sent, 1_049_321);
        assert_eq!(s.bytes_received, 54);
        assert_eq!(s.bytes_per_sec, 2_098_750.0);
        assert_eq!(s.total_size, Some(1_048_576));
        assert_eq!(s.files[1].bytes_per_sec, 2_098_750.0);
        assert_eq!(s.unparsed_lines, 0);
    }

    #[test]
    fn rsync_counts_garbage() {
        let mut p = RsyncParser::new();
        p.feed("rsync: connection unexpectedly closed");
        p.feed("HSXFER no-length-here");
        p.feed("HSXFER 12 twelve HitSpool-1.dat");
        p.feed("sent garbage");
        assert_eq!(p.finish().unparsed_lines, 4);
    }

    #[test]
    fn rsync_names_with_spaces() {
        let mut p = RsyncParser::new();
        p.feed("HSXFER 12 12 odd name.dat");
        assert_eq!(p.finish().files[0].filename, "odd name.dat");
    }

    #[test]
    fn rsync_unchanged_files_send_nothing() {
        let mut p = RsyncParser::new();
        for line in [
            "HSXFER 3000 3000 STAGE/HitSpool-1.dat",
            "HSXFER 1000 1000 STAGE/HitSpool-2.dat",
            "HSXFER 5000 0 STAGE/HitSpool-3.dat",
            "sent 4,100 bytes  received 400 bytes  9,000.00 bytes/sec",
        ] {
            p.feed(line);
        }
        let s = p.finish();
        let received: Vec<u64> = s.files.iter().map(|f| f.bytes_received).collect();
        assert_eq!(received, vec![300, 100, 0]);
        assert_eq!(s.files[2].size, 5000);
        assert_eq!(s.files[2].bytes_per_sec, 0.0);
        assert_eq!(s.files[0].bytes_per_sec, 9000.0);
    }

    #[test]
    fn scp_summary() {
        let mut p = ScpParser::new();
        for line in [
            "Executing: program /usr/bin/ssh host 2ndbuild, user pdaq, command scp -v -r -t /recv",
            "OpenSSH_8.0p1, OpenSSL 1.1.1k  FIPS 25 Mar 2021",
            "debug1: Reading configuration data /etc/ssh/ssh_config",
            "Authenticated to 2ndbuild ([10.2.2.12]:22).",
            "Entering directory: D0755 0 SNALERT_20260101_000000_ichub01",
            "Sending file modes: C0644 1048576 HitSpool-1.dat",
            "Sending file modes: C0644 2048 HitSpool-2.dat",
            "Transferred: sent 1052672, received 2380 bytes, in 0.4 seconds",
            "Bytes per second: sent 2631680.0, received 5950.0",
        ] {
            p.feed(line);
        }
        let s = p.finish();
        assert_eq!(s.file_count(), 2);
        assert_eq!(s.files[0].filename, "HitSpool-1.dat");
        assert_eq!(s.bytes_sent, 1_052_672);
        assert_eq!(s.bytes_received, 2380);
        assert_eq!(s.bytes_per_sec, 2_631_680.0);
        assert_eq!(s.total_size, Some(1_050_624));
        assert_eq!(s.unparsed_lines, 0);
    }

    #[test]
    fn scp_counts_garbage() {
        let mut p = ScpParser::new();
        p.feed("lost connection");
        p.feed("Sending file modes: C0644");
        assert_eq!(p.finish().unparsed_lines, 2);
    }
}
