//! Rotating per-stream file sink.
//!
//! Each stream writes to `<dir>/<stream>.log`. Before every write two
//! independent triggers are checked: the rotation period has ended, or the
//! record would bring the file to `max_bytes`. Either one rotates the file:
//!
//! ```text
//! logs/
//! ├── service-A.log                       # active file
//! ├── service-A.log.20261017-000000.1     # oldest backup
//! └── service-A.log.20261018-000000.2
//! ```
//!
//! Backups are tagged with the start of the period they cover and a
//! per-stream sequence number that keeps increasing across restarts.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};

use chrono::{DateTime, Duration, Local, NaiveDateTime, TimeZone, Timelike};
use serde::{Deserialize, Serialize};

/// Time boundary after which the active file is rotated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RotationInterval {
    /// Only size triggers rotation
    Never,
    Minutely,
    Hourly,
    /// Local midnight
    #[default]
    Daily,
    /// Fixed interval counted from the start of the period
    Seconds(u64),
}

impl RotationInterval {
    /// First boundary strictly after `from`, or `None` for [`RotationInterval::Never`].
    pub fn next_boundary(self, from: DateTime<Local>) -> Option<DateTime<Local>> {
        let naive = from.naive_local();
        match self {
            RotationInterval::Never => None,
            RotationInterval::Minutely => {
                let start = naive.date().and_hms_opt(naive.hour(), naive.minute(), 0)?;
                Some(localize(start + Duration::minutes(1), from + Duration::minutes(1)))
            }
            RotationInterval::Hourly => {
                let start = naive.date().and_hms_opt(naive.hour(), 0, 0)?;
                Some(localize(start + Duration::hours(1), from + Duration::hours(1)))
            }
            RotationInterval::Daily => {
                let midnight = naive.date().succ_opt()?.and_hms_opt(0, 0, 0)?;
                Some(localize(midnight, from + Duration::days(1)))
            }
            RotationInterval::Seconds(seconds) => {
                let step = i64::try_from(seconds).ok().and_then(Duration::try_seconds)?;
                from.checked_add_signed(step)
            }
        }
    }
}

/// Map a local wall-clock time to an instant, falling back when it does not
/// exist (DST gap).
fn localize(naive: NaiveDateTime, fallback: DateTime<Local>) -> DateTime<Local> {
    Local.from_local_datetime(&naive).earliest().unwrap_or(fallback)
}

/// The two rotation triggers. They are evaluated independently.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    pub interval: RotationInterval,
    /// 0 disables size-based rotation
    pub max_bytes: u64,
}

impl RotationPolicy {
    pub fn new(interval: RotationInterval, max_bytes: u64) -> Self {
        Self {
            interval,
            max_bytes,
        }
    }

    /// The period ending at `rollover_at` is over.
    pub fn time_elapsed(&self, rollover_at: Option<DateTime<Local>>, now: DateTime<Local>) -> bool {
        rollover_at.is_some_and(|at| now >= at)
    }

    /// Appending `incoming` bytes would bring a non-empty file to `max_bytes`.
    pub fn size_exceeded(&self, current: u64, incoming: u64) -> bool {
        self.max_bytes > 0 && current > 0 && current.saturating_add(incoming) >= self.max_bytes
    }
}

/// Replace characters that are not safe in a file name.
pub fn sanitize_stream_name(stream: &str) -> String {
    stream
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

#[derive(Debug)]
struct Backup {
    sequence: u64,
    path: PathBuf,
}

/// File writer for one stream with size and time based rotation.
///
/// Only the dispatcher writes to a sink, so it carries no locking itself.
pub struct RotatingFileSink {
    stream: String,
    dir: PathBuf,
    file_name: String,
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    bytes_written: u64,
    period_start: DateTime<Local>,
    rollover_at: Option<DateTime<Local>>,
    next_sequence: u64,
    policy: RotationPolicy,
    retention: usize,
}

impl RotatingFileSink {
    /// Open (or create) the active file for `stream` inside `dir`.
    ///
    /// `retention` is the number of backups kept; 0 keeps all of them.
    pub fn open(
        dir: impl AsRef<Path>,
        stream: &str,
        policy: RotationPolicy,
        retention: usize,
    ) -> io::Result<Self> {
        Self::open_at(dir, stream, policy, retention, Local::now())
    }

    /// Like [`RotatingFileSink::open`] with an explicit current time.
    ///
    /// A non-empty existing file keeps the period it was last written in, so
    /// it rotates on the first write after that period ended.
    pub fn open_at(
        dir: impl AsRef<Path>,
        stream: &str,
        policy: RotationPolicy,
        retention: usize,
        now: DateTime<Local>,
    ) -> io::Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        fs::create_dir_all(&dir)?;

        let file_name = format!("{}.log", sanitize_stream_name(stream));
        let path = dir.join(&file_name);
        let (writer, bytes_written) = open_append(&path)?;

        let period_start = if bytes_written > 0 {
            fs::metadata(&path)
                .and_then(|meta| meta.modified())
                .map(DateTime::<Local>::from)
                .map(|modified| modified.min(now))
                .unwrap_or(now)
        } else {
            now
        };

        let next_sequence = list_backups(&dir, &file_name)?
            .last()
            .map_or(1, |backup| backup.sequence + 1);

        Ok(Self {
            stream: stream.to_string(),
            dir,
            file_name,
            path,
            writer: Some(writer),
            bytes_written,
            period_start,
            rollover_at: policy.interval.next_boundary(period_start),
            next_sequence,
            policy,
            retention,
        })
    }

    /// Append one record line, rotating first if a trigger fires.
    ///
    /// Returns whether a rotation happened.
    pub fn write(&mut self, line: &str) -> io::Result<bool> {
        self.write_at(line, Local::now())
    }

    /// Like [`RotatingFileSink::write`] with an explicit current time.
    ///
    /// If pruning old backups fails the record is still written and the
    /// pruning error is returned.
    pub fn write_at(&mut self, line: &str, now: DateTime<Local>) -> io::Result<bool> {
        if self.writer.is_none() {
            self.reopen()?;
        }

        let incoming = line.len() as u64 + 1;
        let time_due = self.policy.time_elapsed(self.rollover_at, now);
        let size_due = self.policy.size_exceeded(self.bytes_written, incoming);

        let rotated = time_due || size_due;
        if rotated {
            self.roll_over(now)?;
        }

        let writer = match self.writer.as_mut() {
            Some(writer) => writer,
            None => return Err(io::Error::new(io::ErrorKind::NotConnected, "sink closed")),
        };
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
        self.bytes_written += incoming;

        if rotated {
            self.prune()?;
        }
        Ok(rotated)
    }

    /// Rotate now regardless of the triggers. Returns the backup path.
    pub fn rotate(&mut self, now: DateTime<Local>) -> io::Result<PathBuf> {
        let backup = self.roll_over(now)?;
        self.prune()?;
        Ok(backup)
    }

    /// Close the active file, move it to a backup slot and open a fresh one.
    fn roll_over(&mut self, now: DateTime<Local>) -> io::Result<PathBuf> {
        if let Some(mut writer) = self.writer.take() {
            if let Err(e) = writer.flush() {
                self.writer = Some(writer);
                return Err(e);
            }
        }

        let backup = self.dir.join(format!(
            "{}.{}.{}",
            self.file_name,
            self.period_start.format("%Y%m%d-%H%M%S"),
            self.next_sequence
        ));
        fs::rename(&self.path, &backup)?;
        self.next_sequence += 1;

        self.period_start = now;
        self.rollover_at = self.policy.interval.next_boundary(now);
        self.reopen()?;

        tracing::debug!(stream = %self.stream, backup = %backup.display(), "rotated stream file");
        Ok(backup)
    }

    fn reopen(&mut self) -> io::Result<()> {
        let (writer, len) = open_append(&self.path)?;
        self.writer = Some(writer);
        self.bytes_written = len;
        Ok(())
    }

    /// Delete the oldest backups beyond the retention count.
    fn prune(&self) -> io::Result<()> {
        if self.retention == 0 {
            return Ok(());
        }
        let backups = list_backups(&self.dir, &self.file_name)?;
        let excess = backups.len().saturating_sub(self.retention);
        for backup in backups.into_iter().take(excess) {
            fs::remove_file(&backup.path)?;
        }
        Ok(())
    }

    /// Backup files for this stream, oldest first.
    pub fn backups(&self) -> io::Result<Vec<PathBuf>> {
        Ok(list_backups(&self.dir, &self.file_name)?
            .into_iter()
            .map(|backup| backup.path)
            .collect())
    }

    pub fn flush(&mut self) -> io::Result<()> {
        match self.writer.as_mut() {
            Some(writer) => writer.flush(),
            None => Ok(()),
        }
    }

    /// Flush and close the active file. A later write reopens it.
    pub fn close(&mut self) -> io::Result<()> {
        match self.writer.take() {
            Some(mut writer) => writer.flush(),
            None => Ok(()),
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Path of the active file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Size of the active file as tracked by the sink.
    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    /// When the current period ends, if time rotation is enabled.
    pub fn rollover_at(&self) -> Option<DateTime<Local>> {
        self.rollover_at
    }

    pub fn policy(&self) -> RotationPolicy {
        self.policy
    }
}

impl Drop for RotatingFileSink {
    fn drop(&mut self) {
        let _ = self.flush();
    }
}

impl std::fmt::Debug for RotatingFileSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RotatingFileSink")
            .field("stream", &self.stream)
            .field("path", &self.path)
            .field("bytes_written", &self.bytes_written)
            .field("rollover_at", &self.rollover_at)
            .field("policy", &self.policy)
            .finish()
    }
}

fn open_append(path: &Path) -> io::Result<(BufWriter<File>, u64)> {
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    let len = file.metadata()?.len();
    Ok((BufWriter::new(file), len))
}

/// Backups of `file_name` in `dir`, ordered by sequence (oldest first).
fn list_backups(dir: &Path, file_name: &str) -> io::Result<Vec<Backup>> {
    let mut backups = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        if let Some(sequence) = backup_sequence(name, file_name) {
            backups.push(Backup {
                sequence,
                path: entry.path(),
            });
        }
    }
    backups.sort_by_key(|backup| backup.sequence);
    Ok(backups)
}

/// Parse `<file_name>.<YYYYmmdd-HHMMSS>.<seq>` and return `seq`.
fn backup_sequence(name: &str, file_name: &str) -> Option<u64> {
    let rest = name.strip_prefix(file_name)?.strip_prefix('.')?;
    let (stamp, sequence) = rest.split_once('.')?;
    let stamp = stamp.as_bytes();
    let stamp_ok = stamp.len() == 15
        && stamp
            .iter()
            .enumerate()
            .all(|(i, b)| if i == 8 { *b == b'-' } else { b.is_ascii_digit() });
    if !stamp_ok || sequence.is_empty() || !sequence.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    sequence.parse().ok()
}
