//! Watch collaborator.
//!
//! A background `notify` watcher pushes modified paths into a queue; the
//! host thread drains it once per tick through [`Watchdog::think`]. Push and
//! drain share one mutex.

use notify::event::{EventKind, ModifyKind};
use notify::{Event, RecommendedWatcher, RecursiveMode, Watcher};
use rustc_hash::{FxHashMap, FxHashSet};
use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};
use tracing::{debug, warn};

use crate::fs::Vfs;

/// Registers files for change notification.
pub trait FileWatcher: Send + Sync {
    /// Start watching `logical_path` as resolved in `search_path`.
    /// Watching an already watched file does nothing.
    fn watch_file(&self, logical_path: &str, search_path: &str);
}

type ModifiedQueue = Arc<Mutex<VecDeque<PathBuf>>>;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

fn canonical(path: &Path) -> PathBuf {
    std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf())
}

#[derive(Default)]
struct Registry {
    /// Absolute file path -> logical path
    files: FxHashMap<PathBuf, String>,
    /// Directories handed to the OS watcher
    dirs: FxHashSet<PathBuf>,
    /// Logical path -> when its last modification was acted on
    last_action: FxHashMap<String, Instant>,
}

/// Debounced file watcher for hot reload.
pub struct Watchdog {
    vfs: Vfs,
    debounce: Duration,
    queue: ModifiedQueue,
    registry: Mutex<Registry>,
    watcher: Mutex<Option<RecommendedWatcher>>,
}

impl Watchdog {
    pub fn new(vfs: Vfs, debounce: Duration) -> Self {
        Self {
            vfs,
            debounce,
            queue: Arc::new(Mutex::new(VecDeque::new())),
            registry: Mutex::new(Registry::default()),
            watcher: Mutex::new(None),
        }
    }

    /// Queue a modification. Called from the watcher thread.
    pub fn on_file_modified(&self, absolute: &Path) {
        lock(&*self.queue).push_back(canonical(absolute));
    }

    pub fn watched_count(&self) -> usize {
        lock(&self.registry).files.len()
    }

    /// Drain queued modifications, returning the logical paths to reload.
    ///
    /// A path acted on less than the debounce window ago is skipped, as are
    /// paths that were never registered.
    pub fn think(&self, now: Instant) -> Vec<String> {
        let drained: Vec<PathBuf> = lock(&*self.queue).drain(..).collect();
        if drained.is_empty() {
            return Vec::new();
        }

        let mut registry = lock(&self.registry);
        let mut changed = Vec::new();
        for path in drained {
            let Some(logical) = registry.files.get(&path).cloned() else {
                continue;
            };
            if let Some(last) = registry.last_action.get(&logical) {
                if now.duration_since(*last) < self.debounce {
                    debug!("Debounced change of {}", logical);
                    continue;
                }
            }
            registry.last_action.insert(logical.clone(), now);
            if !changed.contains(&logical) {
                changed.push(logical);
            }
        }
        changed
    }

    fn watch_dir(&self, dir: &Path) -> notify::Result<()> {
        let mut watcher = lock(&self.watcher);
        if watcher.is_none() {
            let queue = Arc::clone(&self.queue);
            *watcher = Some(notify::recommended_watcher(
                move |res: Result<Event, notify::Error>| match res {
                    Ok(event) => {
                        let relevant = matches!(
                            event.kind,
                            EventKind::Modify(ModifyKind::Data(_))
                                | EventKind::Modify(ModifyKind::Any)
                                | EventKind::Create(_)
                        );
                        if relevant {
                            let mut queue = lock(&*queue);
                            queue.extend(event.paths.iter().map(|p| canonical(p)));
                        }
                    }
                    Err(e) => warn!("File watcher error: {}", e),
                },
            )?);
        }
        match watcher.as_mut() {
            Some(watcher) => watcher.watch(dir, RecursiveMode::NonRecursive),
            None => Ok(()),
        }
    }
}

impl FileWatcher for Watchdog {
    fn watch_file(&self, logical_path: &str, search_path: &str) {
        let Some(path) = self.vfs.resolve(logical_path, search_path) else {
            debug!("Not watching {}: not found in {}", logical_path, search_path);
            return;
        };
        let absolute = canonical(&self.vfs.absolute(&path));

        let dir = {
            let mut registry = lock(&self.registry);
            if registry.files.contains_key(&absolute) {
                return;
            }
            registry
                .files
                .insert(absolute.clone(), logical_path.to_string());
            let dir = absolute.parent().map(Path::to_path_buf).unwrap_or_default();
            if !registry.dirs.insert(dir.clone()) {
                return;
            }
            dir
        };

        debug!("Watching {} in {}", logical_path, dir.display());
        if let Err(e) = self.watch_dir(&dir) {
            warn!("Failed to watch {}: {}", dir.display(), e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fs::{MockFileSystem, SearchPaths};

    fn watchdog() -> Watchdog {
        let fs = Arc::new(MockFileSystem::new());
        fs.add_file("lua/autorun/init.moon", "print 1");
        fs.add_file("lua/lib/util.yue", "print 2");
        let vfs = Vfs::new(fs, SearchPaths::new().with("lsv", &["lua"]));
        Watchdog::new(vfs, Duration::from_millis(200))
    }

    #[test]
    fn test_watch_is_idempotent() {
        let watchdog = watchdog();
        watchdog.watch_file("autorun/init.moon", "lsv");
        watchdog.watch_file("autorun/init.moon", "lsv");
        watchdog.watch_file("missing.moon", "lsv");
        assert_eq!(watchdog.watched_count(), 1);
    }

    #[test]
    fn test_think_maps_back_to_logical_paths() {
        let watchdog = watchdog();
        watchdog.watch_file("autorun/init.moon", "lsv");
        watchdog.watch_file("lib/util.yue", "lsv");

        watchdog.on_file_modified(Path::new("/mock/lua/lib/util.yue"));
        watchdog.on_file_modified(Path::new("/mock/lua/lib/util.yue"));
        watchdog.on_file_modified(Path::new("/mock/lua/unrelated.txt"));

        assert_eq!(watchdog.think(Instant::now()), vec!["lib/util.yue".to_string()]);
        assert!(watchdog.think(Instant::now()).is_empty());
    }

    #[test]
    fn test_debounce_window() {
        let watchdog = watchdog();
        watchdog.watch_file("autorun/init.moon", "lsv");
        let start = Instant::now();

        watchdog.on_file_modified(Path::new("/mock/lua/autorun/init.moon"));
        assert_eq!(watchdog.think(start).len(), 1);

        watchdog.on_file_modified(Path::new("/mock/lua/autorun/init.moon"));
        assert!(watchdog.think(start + Duration::from_millis(50)).is_empty());

        watchdog.on_file_modified(Path::new("/mock/lua/autorun/init.moon"));
        assert_eq!(
            watchdog.think(start + Duration::from_millis(300)),
            vec!["autorun/init.moon".to_string()]
        );
    }
}
