//! Output folder contents and ownership
//!
//! The output folder is a volume shared with the host. Files are created
//! before anything writes to them and handed to the `UID_GID` owner so the
//! host user can read and clean them up.

use std::fs::{self, OpenOptions, Permissions};
use std::io;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};

use nix::unistd::{chown, Gid, Uid};
use tracing::{debug, warn};

use crate::config::Ownership;

/// Driver log file name
pub const DRIVER_LOG: &str = "testdriver.log";

/// Mode applied to every output file
const OUTPUT_FILE_MODE: u32 = 0o664;

/// Pre-assigned output files of a run
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OutputFiles {
    /// Output folder
    pub dir: PathBuf,
    /// Driver log
    pub driver_log: PathBuf,
    /// Combined stdout/stderr of the test script
    pub test_output: PathBuf,
    /// One line per liveness ping
    pub ping_log: PathBuf,
    /// Ping statistics written when monitoring stops
    pub ping_summary: PathBuf,
    /// Pod watch, full YAML
    pub pod_changes: PathBuf,
    /// Pod watch, table
    pub pod_changes_short: PathBuf,
    /// Event watch, full YAML
    pub event_watch: PathBuf,
    /// Event watch, columns
    pub event_watch_short: PathBuf,
    /// Event list after the test window, full YAML
    pub event_list: PathBuf,
    /// Event list after the test window, columns
    pub event_list_short: PathBuf,
    /// Version sheet of the launched cluster
    pub stackable_versions: PathBuf,
}

impl OutputFiles {
    /// Output files inside `target_dir`
    pub fn new(target_dir: &Path) -> Self {
        let at = |name: &str| target_dir.join(name);
        Self {
            dir: target_dir.to_path_buf(),
            driver_log: at(DRIVER_LOG),
            test_output: at("test-output.log"),
            ping_log: at("k8s-ping.log"),
            ping_summary: at("k8s-summary.txt"),
            pod_changes: at("k8s-pod-change.log"),
            pod_changes_short: at("k8s-pod-change-short.log"),
            event_watch: at("k8s-event-watch.log"),
            event_watch_short: at("k8s-event-watch-short.log"),
            event_list: at("k8s-event-list.log"),
            event_list_short: at("k8s-event-list-short.log"),
            stackable_versions: at("stackable-versions.txt"),
        }
    }

    /// All files, in a stable order
    pub fn all(&self) -> [&Path; 11] {
        [
            &self.driver_log,
            &self.test_output,
            &self.ping_log,
            &self.ping_summary,
            &self.pod_changes,
            &self.pod_changes_short,
            &self.event_watch,
            &self.event_watch_short,
            &self.event_list,
            &self.event_list_short,
            &self.stackable_versions,
        ]
    }

    /// Replace leftovers of an earlier run with empty files.
    ///
    /// Each file is removed, recreated empty, handed to `owner` and set to
    /// mode 664. Ownership failures are logged; creation failures are not
    /// recoverable.
    pub fn reset(&self, owner: Option<Ownership>) -> io::Result<()> {
        fs::create_dir_all(&self.dir)?;
        for file in self.all() {
            match fs::remove_file(file) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e),
            }
            fs::File::create(file)?;
            fs::set_permissions(file, Permissions::from_mode(OUTPUT_FILE_MODE))?;
            if let Some(owner) = owner {
                set_owner(file, owner);
            }
        }
        Ok(())
    }

    /// Create any missing file without touching existing content
    pub fn ensure_exist(&self) -> io::Result<()> {
        for file in self.all() {
            OpenOptions::new().create(true).append(true).open(file)?;
        }
        Ok(())
    }
}

/// Hand `path` to `owner`, logging instead of failing
pub fn set_owner(path: &Path, owner: Ownership) {
    if let Err(e) = chown(
        path,
        Some(Uid::from_raw(owner.uid)),
        Some(Gid::from_raw(owner.gid)),
    ) {
        warn!(path = %path.display(), error = %e, "failed to change owner");
    }
}

/// Recursively hand `dir` and everything below it to `owner`.
///
/// Best effort: files added by the test script may be anything, so failures
/// are logged and skipped.
pub fn fix_ownership(dir: &Path, owner: Ownership) {
    set_owner(dir, owner);
    let entries = match fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(e) => {
            warn!(path = %dir.display(), error = %e, "failed to list directory");
            return;
        }
    };
    for entry in entries.flatten() {
        let path = entry.path();
        match entry.file_type() {
            Ok(kind) if kind.is_dir() => fix_ownership(&path, owner),
            Ok(_) => set_owner(&path, owner),
            Err(e) => debug!(path = %path.display(), error = %e, "skipping entry"),
        }
    }
}
