//! Heuristic check for placeholder code left behind by an iteration.
//!
//! Runs only after an iteration completed a task. Findings become warnings;
//! nothing here can fail the loop.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use tracing::{debug, warn};

use crate::io::git::Git;

/// Supervisor artifacts (event logs, config) are never scanned.
const SUPERVISOR_DIR: &str = ".supervisor/";

/// Files larger than this are not scanned.
const MAX_SCAN_BYTES: u64 = 1024 * 1024;

static STUB_MARKER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(concat!(
        r"(?i)\b(TODO|FIXME|XXX)\b|\btodo!\(|\bunimplemented!\(",
        r"|not (yet )?implemented|raise NotImplementedError",
    ))
    .unwrap()
});

pub trait StubDetector {
    /// Paths (relative to `workdir`) that look like they contain stubs.
    fn detect(&self, workdir: &Path) -> Vec<PathBuf>;
}

/// Scans files changed by the last commit and the dirty worktree.
#[derive(Debug, Default, Clone, Copy)]
pub struct GitStubDetector;

impl StubDetector for GitStubDetector {
    fn detect(&self, workdir: &Path) -> Vec<PathBuf> {
        let changed = match Git::new(workdir).recently_changed_files() {
            Ok(paths) => paths,
            Err(err) => {
                warn!(err = %err, "stub detection skipped");
                return Vec::new();
            }
        };
        changed
            .into_iter()
            .filter(|rel| !rel.starts_with(SUPERVISOR_DIR))
            .map(PathBuf::from)
            .filter(|rel| file_has_stub(&workdir.join(rel)))
            .collect()
    }
}

/// True when the text contains a placeholder marker.
pub fn contains_stub_marker(text: &str) -> bool {
    STUB_MARKER.is_match(text)
}

fn file_has_stub(path: &Path) -> bool {
    match fs::metadata(path) {
        Ok(meta) if meta.is_file() && meta.len() <= MAX_SCAN_BYTES => {}
        _ => return false,
    }
    match fs::read(path) {
        // Binary content is not source.
        Ok(bytes) => match std::str::from_utf8(&bytes) {
            Ok(text) => contains_stub_marker(text),
            Err(_) => false,
        },
        Err(err) => {
            debug!(err = %err, path = %path.display(), "failed to read file for stub scan");
            false
        }
    }
}
