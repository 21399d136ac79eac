/// Flat-file snapshot store.
///
/// Each run leaves two files in a per-month folder:
///
///   {store_dir}/2024-05/20240501-213000.json   [{"author": "...", "seconds": 65.0}, ...]
///   {store_dir}/2024-05/20240501-213000.txt    rendered ranking
///
/// Files are created with `create_new` and never rewritten. Monthly totals
/// are rebuilt at read time by summing every snapshot in the month folder.

use crate::error::TallyError;
use crate::pairing::Totals;
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};
use std::fs::OpenOptions;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

const STAMP_FORMAT: &str = "%Y%m%d-%H%M%S";

/// One author line of a snapshot file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnapshotEntry {
    pub author: String,
    pub seconds: f64,
}

/// Paths written for one run.
#[derive(Debug, Clone)]
pub struct WrittenSnapshot {
    pub snapshot: PathBuf,
    pub report: PathBuf,
}

/// Month key (`YYYY-MM`) for a timestamp, in that timestamp's own offset.
pub fn month_key(at: &DateTime<FixedOffset>) -> String {
    at.format("%Y-%m").to_string()
}

pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn month_dir(&self, month_key: &str) -> PathBuf {
        self.root.join(month_key)
    }

    /// Sum every snapshot tagged inside `month_key`.
    ///
    /// Files are read in name order (= run order). A missing month folder is an
    /// empty month; unreadable or malformed snapshots are skipped with a warning.
    pub fn load_month(&self, month_key: &str) -> Result<Totals, TallyError> {
        let dir = self.month_dir(month_key);
        let mut totals = Totals::new();

        let entries = match std::fs::read_dir(&dir) {
            Ok(e) => e,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                log::info!("No snapshots yet for {month_key}");
                return Ok(totals);
            }
            Err(e) => return Err(e.into()),
        };

        let prefix = month_key.replace('-', "");
        let mut files: Vec<PathBuf> = entries
            .flatten()
            .map(|entry| entry.path())
            .filter(|path| {
                path.extension().is_some_and(|ext| ext == "json")
                    && path
                        .file_stem()
                        .and_then(|s| s.to_str())
                        .is_some_and(|stem| stem.starts_with(&prefix))
            })
            .collect();
        files.sort();

        for path in &files {
            match read_snapshot(path) {
                Ok(snapshot) => {
                    for entry in &snapshot {
                        totals.add(&entry.author, entry.seconds.max(0.0));
                    }
                }
                Err(e) => log::warn!("Skipping unreadable snapshot {}: {e}", path.display()),
            }
        }

        log::info!(
            "Loaded {} snapshot(s) for {month_key}: {} author(s)",
            files.len(),
            totals.len()
        );
        Ok(totals)
    }

    /// Write this run's totals and rendered report, tagged with `taken_at`.
    ///
    /// Both files share one stem. If either `{stem}.json` or `{stem}.txt` is
    /// already taken a numeric suffix is appended; existing files are never
    /// replaced. The report goes first and the snapshot last, so a failed write
    /// never leaves totals behind that the next run would count again.
    pub fn write(
        &self,
        taken_at: &DateTime<FixedOffset>,
        daily: &Totals,
        report: &str,
    ) -> Result<WrittenSnapshot, TallyError> {
        let dir = self.month_dir(&month_key(taken_at));
        std::fs::create_dir_all(&dir)?;

        let entries: Vec<SnapshotEntry> = daily
            .iter()
            .map(|(author, seconds)| SnapshotEntry {
                author: author.to_string(),
                seconds,
            })
            .collect();
        let json = serde_json::to_string_pretty(&entries)?;

        let stamp = taken_at.format(STAMP_FORMAT).to_string();
        let written = write_pair(&dir, &stamp, report.as_bytes(), json.as_bytes())?;

        log::info!("Wrote snapshot {}", written.snapshot.display());
        Ok(written)
    }
}

fn read_snapshot(path: &Path) -> Result<Vec<SnapshotEntry>, TallyError> {
    let contents = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&contents)?)
}

/// Claim the first free stem among `{stamp}`, `{stamp}-1`, `{stamp}-2`, …
/// and write `{stem}.txt` then `{stem}.json` into it.
fn write_pair(
    dir: &Path,
    stamp: &str,
    report: &[u8],
    snapshot: &[u8],
) -> Result<WrittenSnapshot, TallyError> {
    let mut n = 0u32;
    loop {
        let stem = if n == 0 {
            stamp.to_string()
        } else {
            format!("{stamp}-{n}")
        };
        n += 1;

        let snapshot_path = dir.join(format!("{stem}.json"));
        let report_path = dir.join(format!("{stem}.txt"));
        if snapshot_path.exists() {
            continue;
        }

        match create_new(&report_path, report) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::AlreadyExists => continue,
            Err(e) => {
                let _ = std::fs::remove_file(&report_path);
                return Err(e.into());
            }
        }

        match create_new(&snapshot_path, snapshot) {
            Ok(()) => {
                return Ok(WrittenSnapshot {
                    snapshot: snapshot_path,
                    report: report_path,
                });
            }
            Err(e) => {
                // Release the stem again; the report is useless without its snapshot.
                let _ = std::fs::remove_file(&report_path);
                if e.kind() == ErrorKind::AlreadyExists {
                    continue;
                }
                let _ = std::fs::remove_file(&snapshot_path);
                return Err(e.into());
            }
        }
    }
}

/// Create `path` (failing if it exists) and write `contents` to it.
fn create_new(path: &Path, contents: &[u8]) -> std::io::Result<()> {
    let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
    file.write_all(contents)
}
