//! Polling the module file and deciding when a change is stable enough
//! to load.

use std::io;
use std::path::Path;
use std::time::{Duration, SystemTime};
use tracing::debug;

/// Filesystem metadata capability.
pub trait FileProbe {
    /// Last modification time of `path`.
    fn modified(&self, path: &Path) -> io::Result<SystemTime>;

    fn now(&self) -> SystemTime {
        SystemTime::now()
    }
}

/// Probe backed by `std::fs::metadata`.
#[derive(Debug, Default, Clone, Copy)]
pub struct FsProbe;

impl FileProbe for FsProbe {
    fn modified(&self, path: &Path) -> io::Result<SystemTime> {
        std::fs::metadata(path)?.modified()
    }
}

/// Debounced change detection.
///
/// A newer modification time alone is not enough: a build tool may still
/// be writing the file. A change is taken once the file is newer than the
/// last load and has then been quiet for longer than the debounce window.
/// Edits landing inside one window collapse into a single reload.
#[derive(Debug, Clone)]
pub struct ChangeDetector {
    debounce: Duration,
    loaded: Option<SystemTime>,
}

impl ChangeDetector {
    pub fn new(debounce: Duration) -> Self {
        Self {
            debounce,
            loaded: None,
        }
    }

    pub fn debounce(&self) -> Duration {
        self.debounce
    }

    /// Modification time of the image currently loaded.
    pub fn loaded(&self) -> Option<SystemTime> {
        self.loaded
    }

    pub fn should_load(&self, modified: SystemTime, now: SystemTime) -> bool {
        let Some(loaded) = self.loaded else {
            return true;
        };
        if modified <= loaded {
            return false;
        }
        match now.duration_since(modified) {
            Ok(quiet) if quiet > self.debounce => true,
            _ => {
                debug!(?modified, "module changed, waiting for it to settle");
                false
            }
        }
    }

    pub fn mark_loaded(&mut self, modified: SystemTime) {
        self.loaded = Some(modified);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    /// Invariant: nothing loaded yet means load now, regardless of times.
    #[test]
    fn first_poll_always_loads() {
        let d = ChangeDetector::new(Duration::from_secs(1));
        assert!(d.should_load(at(100), at(100)));
        assert!(d.should_load(at(100), at(50)));
    }

    /// Invariant: a change loads only once it is newer than the loaded
    /// image and older than the debounce window.
    #[test]
    fn change_waits_for_debounce_window() {
        let mut d = ChangeDetector::new(Duration::from_secs(1));
        d.mark_loaded(at(100));
        assert!(!d.should_load(at(100), at(500)), "unchanged file");
        assert!(!d.should_load(at(90), at(500)), "older file");
        assert!(!d.should_load(at(200), at(200)), "still being written");
        assert!(!d.should_load(at(200), at(201)), "exactly one window old");
        assert!(d.should_load(at(200), at(202)));
    }

    /// Invariant: two edits inside one window produce one load, of the
    /// later modification time.
    #[test]
    fn edits_within_window_collapse() {
        let mut d = ChangeDetector::new(Duration::from_secs(1));
        d.mark_loaded(at(100));
        let edit = SystemTime::UNIX_EPOCH + Duration::from_millis(200_000);
        assert!(!d.should_load(edit, edit + Duration::from_millis(400)));
        let second = edit + Duration::from_millis(500);
        assert!(!d.should_load(second, second + Duration::from_millis(600)));
        assert!(d.should_load(second, second + Duration::from_millis(1_100)));
        d.mark_loaded(second);
        assert!(!d.should_load(second, at(1_000)));
        assert_eq!(d.loaded(), Some(second));
    }

    #[test]
    fn fs_probe_reads_modification_time() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        file.write_all(b"image").expect("write");
        let modified = FsProbe.modified(file.path()).expect("stat");
        assert!(modified <= FsProbe.now());
        assert!(FsProbe.modified(Path::new("/nonexistent/module.so")).is_err());
    }
}
