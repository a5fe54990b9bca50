//! Stale runtime lock cleanup
//!
//! A runtime instance that crashed leaves lock files behind in the temp
//! directory, and those block the next instance from being created. Removal is
//! best-effort: each file gets a bounded number of attempts and whatever could
//! not be removed is reported back instead of failing the caller.

use globset::Glob;
use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::error::Result;

/// Where to look, what to match and how hard to try
#[derive(Debug, Clone)]
pub struct PurgePolicy {
    /// Glob matched against file names
    pub pattern: String,
    pub directory: PathBuf,
    /// Removal attempts per file
    pub retries: u32,
    pub retry_delay: Duration,
}

impl Default for PurgePolicy {
    fn default() -> Self {
        Self {
            pattern: "vsomeip*.lck".to_string(),
            directory: std::env::temp_dir(),
            retries: 3,
            retry_delay: Duration::from_secs(1),
        }
    }
}

/// File that survived every attempt
#[derive(Debug)]
pub struct PurgeFailure {
    pub path: PathBuf,
    pub error: std::io::Error,
}

#[derive(Debug, Default)]
pub struct PurgeReport {
    /// Matching files that are gone now
    pub removed: usize,
    pub failures: Vec<PurgeFailure>,
}

impl PurgeReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

/// Remove lock files matching `policy.pattern` from `policy.directory`.
///
/// Fails only when the pattern is invalid or the directory cannot be listed.
pub fn purge_stale_locks(policy: &PurgePolicy) -> Result<PurgeReport> {
    purge_stale_locks_with(policy, |path| fs::remove_file(path))
}

/// [`purge_stale_locks`] with the per-attempt removal supplied by the caller
pub fn purge_stale_locks_with<R>(policy: &PurgePolicy, mut remove: R) -> Result<PurgeReport>
where
    R: FnMut(&Path) -> std::io::Result<()>,
{
    let matcher = Glob::new(&policy.pattern)?.compile_matcher();
    let attempts = policy.retries.max(1);
    let mut report = PurgeReport::default();

    for entry in fs::read_dir(&policy.directory)? {
        let Ok(entry) = entry else {
            continue;
        };
        if entry.file_type().map(|t| t.is_dir()).unwrap_or(true) {
            continue;
        }
        if !matcher.is_match(entry.file_name()) {
            continue;
        }

        let path = entry.path();
        match remove_with_retries(&path, attempts, policy.retry_delay, &mut remove) {
            Ok(()) => {
                debug!("Removed stale lock {}", path.display());
                report.removed += 1;
            }
            Err(error) => report.failures.push(PurgeFailure { path, error }),
        }
    }

    Ok(report)
}

fn remove_with_retries<R>(
    path: &Path,
    attempts: u32,
    delay: Duration,
    remove: &mut R,
) -> std::io::Result<()>
where
    R: FnMut(&Path) -> std::io::Result<()>,
{
    let mut attempt = 1;
    loop {
        match remove(path) {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
            Err(e) if attempt >= attempts => return Err(e),
            Err(e) => {
                debug!(
                    "Attempt {}/{} to remove {} failed: {}",
                    attempt,
                    attempts,
                    path.display(),
                    e
                );
                attempt += 1;
                std::thread::sleep(delay);
            }
        }
    }
}
