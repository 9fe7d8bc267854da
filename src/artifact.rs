//! On-disk formats of backup artifacts
//!
//! The item archive is gzip-compressed JSON lines, one [`ArchiveEntry`] per
//! line. Logs are plain text, one `time=... level=... msg=...` line per event.

use std::fmt::Display;
use std::io::{BufRead, BufReader, Read, Write};

use chrono::{SecondsFormat, Utc};
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::Result;

/// One backed-up item
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    pub group_resource: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    pub name: String,
    pub object: Value,
}

/// Streaming writer for item archives
pub struct ArchiveWriter<W: Write> {
    encoder: GzEncoder<W>,
    entries: usize,
}

impl<W: Write> ArchiveWriter<W> {
    pub fn new(out: W) -> Self {
        Self {
            encoder: GzEncoder::new(out, Compression::default()),
            entries: 0,
        }
    }

    pub fn append(&mut self, entry: &ArchiveEntry) -> Result<()> {
        serde_json::to_writer(&mut self.encoder, entry)?;
        self.encoder.write_all(b"\n")?;
        self.entries += 1;
        Ok(())
    }

    /// Flush the gzip trailer; returns the number of entries written
    pub fn finish(self) -> Result<usize> {
        self.encoder.finish()?;
        Ok(self.entries)
    }
}

/// Read every entry of an item archive
pub fn read_archive<R: Read>(input: R) -> Result<Vec<ArchiveEntry>> {
    let reader = BufReader::new(GzDecoder::new(input));
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

/// Plain-text log stored alongside a backup or restore
///
/// Write failures are swallowed: a broken log must not fail the run it
/// describes.
pub struct RunLog<W: Write> {
    out: W,
}

impl<W: Write> RunLog<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn info(&mut self, msg: impl Display) {
        self.line("info", msg);
    }

    pub fn warn(&mut self, msg: impl Display) {
        self.line("warning", msg);
    }

    pub fn error(&mut self, msg: impl Display) {
        self.line("error", msg);
    }

    fn line(&mut self, level: &str, msg: impl Display) {
        let escaped = msg.to_string().replace('"', "\\\"");
        let _ = writeln!(
            self.out,
            "time=\"{}\" level={} msg=\"{}\"",
            Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            level,
            escaped
        );
    }
}
