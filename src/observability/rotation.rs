//! Size-based log file rotation.
//!
//! # Responsibilities
//! - Roll the active file over before a write would exceed `max_size_mb`
//! - Name backups `<stem>-<timestamp>.<ext>`
//! - Optionally gzip backups
//! - Prune backups by count (`max_backups`) and age (`max_age_days`)
//!
//! # Design Decisions
//! - Zero means "unlimited" for backups and age, and 100 MB for size
//! - Rotation runs inline on the writing thread
//! - Backup timestamps sort lexically, so name order is age order

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::{Duration as ChronoDuration, Local, NaiveDateTime, Utc};
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::{Deserialize, Serialize};

const BACKUP_TIME_FORMAT: &str = "%Y-%m-%dT%H-%M-%S%.3f";
const DEFAULT_MAX_SIZE_MB: u64 = 100;
const MEGABYTE: u64 = 1024 * 1024;

/// Rotation policy for a file destination.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Rotation {
    pub max_size_mb: u64,
    pub max_backups: usize,
    pub max_age_days: u64,
    pub local_time: bool,
    pub compress: bool,
}

impl Default for Rotation {
    fn default() -> Self {
        Self {
            max_size_mb: 10,
            max_backups: 5,
            max_age_days: 28,
            local_time: false,
            compress: false,
        }
    }
}

impl Rotation {
    fn max_bytes(&self) -> u64 {
        let mb = if self.max_size_mb == 0 { DEFAULT_MAX_SIZE_MB } else { self.max_size_mb };
        mb.saturating_mul(MEGABYTE)
    }
}

/// An append-only file that rotates itself by size.
pub struct RotatingFile {
    path: PathBuf,
    policy: Rotation,
    max_bytes: u64,
    file: File,
    size: u64,
}

impl RotatingFile {
    pub fn open(path: &Path, policy: Rotation) -> io::Result<Self> {
        let file = OpenOptions::new().create(true).append(true).open(path)?;
        let size = file.metadata()?.len();
        let max_bytes = policy.max_bytes();
        Ok(Self { path: path.to_path_buf(), policy, max_bytes, file, size })
    }

    #[cfg(test)]
    fn with_max_bytes(mut self, max_bytes: u64) -> Self {
        self.max_bytes = max_bytes;
        self
    }

    fn now(&self) -> NaiveDateTime {
        if self.policy.local_time {
            Local::now().naive_local()
        } else {
            Utc::now().naive_utc()
        }
    }

    fn rotate(&mut self) -> io::Result<()> {
        self.file.flush()?;

        let backup = self.backup_path(self.now());
        fs::rename(&self.path, &backup)?;
        self.file = OpenOptions::new().create(true).append(true).open(&self.path)?;
        self.size = 0;

        if self.policy.compress {
            compress(&backup)?;
        }
        self.prune()
    }

    fn parts(&self) -> (String, String) {
        let stem = self
            .path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        let ext = self
            .path
            .extension()
            .map(|e| format!(".{}", e.to_string_lossy()))
            .unwrap_or_default();
        (stem, ext)
    }

    fn backup_path(&self, at: NaiveDateTime) -> PathBuf {
        let (stem, ext) = self.parts();
        let name = format!("{}-{}{}", stem, at.format(BACKUP_TIME_FORMAT), ext);
        self.path.with_file_name(name)
    }

    /// Existing backups, oldest first.
    fn backups(&self) -> io::Result<Vec<(NaiveDateTime, PathBuf)>> {
        let dir = match self.path.parent() {
            Some(d) if !d.as_os_str().is_empty() => d.to_path_buf(),
            _ => PathBuf::from("."),
        };
        let (stem, ext) = self.parts();
        let prefix = format!("{}-", stem);

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let name = entry.file_name().to_string_lossy().into_owned();
            let Some(rest) = name.strip_prefix(&prefix) else { continue };
            let rest = rest.strip_suffix(".gz").unwrap_or(rest);
            let Some(stamp) = rest.strip_suffix(ext.as_str()) else { continue };
            if let Ok(at) = NaiveDateTime::parse_from_str(stamp, BACKUP_TIME_FORMAT) {
                found.push((at, entry.path()));
            }
        }
        found.sort();
        Ok(found)
    }

    fn prune(&self) -> io::Result<()> {
        let mut backups = self.backups()?;

        if self.policy.max_age_days > 0 {
            let cutoff = self.now() - ChronoDuration::days(self.policy.max_age_days as i64);
            let (expired, kept): (Vec<_>, Vec<_>) = backups.into_iter().partition(|(at, _)| *at < cutoff);
            for (_, path) in expired {
                fs::remove_file(path)?;
            }
            backups = kept;
        }

        if self.policy.max_backups > 0 && backups.len() > self.policy.max_backups {
            let excess = backups.len() - self.policy.max_backups;
            for (_, path) in backups.drain(..excess) {
                fs::remove_file(path)?;
            }
        }
        Ok(())
    }
}

impl Write for RotatingFile {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let len = buf.len() as u64;
        if self.size > 0 && self.size + len > self.max_bytes {
            self.rotate()?;
        }
        self.file.write_all(buf)?;
        self.size += len;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

/// Replace `path` with `path.gz`.
fn compress(path: &Path) -> io::Result<()> {
    let mut gz_name = path.as_os_str().to_owned();
    gz_name.push(".gz");

    let mut input = File::open(path)?;
    let output = File::create(PathBuf::from(gz_name))?;
    let mut encoder = GzEncoder::new(output, Compression::default());
    io::copy(&mut input, &mut encoder)?;
    encoder.finish()?;
    fs::remove_file(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;

    fn policy() -> Rotation {
        Rotation { max_size_mb: 1, max_backups: 2, max_age_days: 0, local_time: false, compress: false }
    }

    fn file_names(dir: &Path) -> Vec<String> {
        let mut names: Vec<_> = fs::read_dir(dir)
            .unwrap()
            .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
            .collect();
        names.sort();
        names
    }

    #[test]
    fn test_rotates_when_size_exceeded() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let mut file = RotatingFile::open(&path, policy()).unwrap().with_max_bytes(16);

        file.write_all(b"0123456789\n").unwrap();
        file.write_all(b"abcdefghij\n").unwrap();
        file.flush().unwrap();

        let names = file_names(dir.path());
        assert_eq!(names.len(), 2);
        assert!(names.contains(&"app.log".to_string()));
        assert!(names.iter().any(|n| n.starts_with("app-") && n.ends_with(".log")));
        assert_eq!(fs::read_to_string(&path).unwrap(), "abcdefghij\n");
    }

    #[test]
    fn test_prunes_to_max_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let file = RotatingFile::open(&path, policy()).unwrap();

        for day in 1..=4 {
            let at = NaiveDateTime::parse_from_str(&format!("2026-01-0{}T00-00-00.000", day), BACKUP_TIME_FORMAT).unwrap();
            fs::write(file.backup_path(at), b"old").unwrap();
        }
        file.prune().unwrap();

        let backups: Vec<_> = file_names(dir.path()).into_iter().filter(|n| n != "app.log").collect();
        assert_eq!(backups, vec!["app-2026-01-03T00-00-00.000.log", "app-2026-01-04T00-00-00.000.log"]);
    }

    #[test]
    fn test_prunes_by_age() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let policy = Rotation { max_backups: 0, max_age_days: 7, ..policy() };
        let file = RotatingFile::open(&path, policy).unwrap();

        let fresh = Utc::now().naive_utc() - ChronoDuration::days(1);
        let stale = Utc::now().naive_utc() - ChronoDuration::days(30);
        fs::write(file.backup_path(fresh), b"fresh").unwrap();
        fs::write(file.backup_path(stale), b"stale").unwrap();
        file.prune().unwrap();

        let backups = file.backups().unwrap();
        assert_eq!(backups.len(), 1);
        assert_eq!(fs::read_to_string(&backups[0].1).unwrap(), "fresh");
    }

    #[test]
    fn test_compressed_backups() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("app.log");
        let policy = Rotation { compress: true, ..policy() };
        let mut file = RotatingFile::open(&path, policy).unwrap().with_max_bytes(8);

        file.write_all(b"first!\n").unwrap();
        file.write_all(b"second\n").unwrap();

        let gz = file_names(dir.path()).into_iter().find(|n| n.ends_with(".log.gz")).unwrap();
        let mut decoder = flate2::read::GzDecoder::new(File::open(dir.path().join(gz)).unwrap());
        let mut content = String::new();
        decoder.read_to_string(&mut content).unwrap();
        assert_eq!(content, "first!\n");
        assert_eq!(file.backups().unwrap().len(), 1);
    }

    #[test]
    fn test_zero_size_means_default() {
        let policy = Rotation { max_size_mb: 0, ..Rotation::default() };
        assert_eq!(policy.max_bytes(), 100 * MEGABYTE);
    }
}
