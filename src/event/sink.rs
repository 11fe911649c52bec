//! NDJSON activity sink
//!
//! Appends one JSON object per line. Reading back tolerates a torn or
//! corrupt line (skipped), including one cut mid-codepoint.

use std::collections::VecDeque;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::error::Result;

use super::log::ActivityEvent;

pub struct NdjsonSink {
    writer: Mutex<BufWriter<File>>,
    path: PathBuf,
}

impl NdjsonSink {
    /// Open for appending (creates parent directories)
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        tracing::debug!(path = %path.display(), "Opened activity file");
        Ok(Self {
            writer: Mutex::new(BufWriter::new(file)),
            path: path.to_path_buf(),
        })
    }

    pub fn append(&self, event: &ActivityEvent) -> Result<()> {
        let json = serde_json::to_string(event)?;
        let mut writer = self.writer.lock();
        writeln!(writer, "{}", json)?;
        writer.flush()?;
        Ok(())
    }

    /// Drop every persisted entry
    pub fn truncate(&self) -> Result<()> {
        let mut writer = self.writer.lock();
        writer.flush()?;
        writer.get_ref().set_len(0)?;
        Ok(())
    }
}

impl std::fmt::Debug for NdjsonSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NdjsonSink").field("path", &self.path).finish()
    }
}

/// Last `capacity` events of an NDJSON file, oldest first (missing file is empty)
pub fn read_tail(path: &Path, capacity: usize) -> Result<Vec<ActivityEvent>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };

    let mut tail = VecDeque::with_capacity(capacity.min(1024));
    for line in BufReader::new(file).split(b'\n') {
        let line = line?;
        if line.iter().all(u8::is_ascii_whitespace) {
            continue;
        }
        match serde_json::from_slice::<ActivityEvent>(&line) {
            Ok(event) => {
                tail.push_back(event);
                if tail.len() > capacity {
                    tail.pop_front();
                }
            }
            Err(e) => tracing::warn!(path = %path.display(), error = %e, "Skipping corrupt activity line"),
        }
    }
    Ok(tail.into())
}

/// Rewrite the file to hold exactly `events` (temp file + rename)
pub fn compact(path: &Path, events: &[ActivityEvent]) -> Result<()> {
    let tmp = path.with_extension("ndjson.tmp");
    {
        let mut writer = BufWriter::new(File::create(&tmp)?);
        for event in events {
            serde_json::to_writer(&mut writer, event)?;
            writer.write_all(b"\n")?;
        }
        writer.flush()?;
    }
    fs::rename(&tmp, path)?;
    Ok(())
}
