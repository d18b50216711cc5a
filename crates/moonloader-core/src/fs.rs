//! Filesystem collaborator.
//!
//! [`FileSystem`] implementations deal only in paths relative to the host's
//! working root. [`Vfs`] layers search-path resolution on top so callers can
//! address scripts by logical path plus a search-path id, the way the host
//! resolves them.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::io;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, SystemTime};
use walkdir::WalkDir;

use crate::cache::UpdateSignal;

/// Storage primitives over root-relative, `/`-separated paths.
pub trait FileSystem: Send + Sync {
    fn read(&self, path: &str) -> io::Result<Vec<u8>>;
    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()>;
    fn exists(&self, path: &str) -> bool;
    fn is_dir(&self, path: &str) -> bool;
    fn modified(&self, path: &str) -> io::Result<SystemTime>;
    fn create_dir_all(&self, path: &str) -> io::Result<()>;
    /// Every file below a directory, as sorted root-relative paths.
    /// Directory links are not followed.
    fn walk_files(&self, path: &str) -> io::Result<Vec<String>>;
    /// Remove a directory tree, returning how many files were removed.
    fn remove_dir_all(&self, path: &str) -> io::Result<usize>;
    fn absolute(&self, path: &str) -> PathBuf;
    fn strip_root(&self, absolute: &Path) -> Option<String>;
}

// --- Path manipulation ---

/// Forward slashes, no duplicate or leading `./` segments, ASCII lowercase.
pub fn normalize_path(path: &str) -> String {
    let joined = path
        .split(['/', '\\'])
        .filter(|segment| !segment.is_empty() && *segment != ".")
        .collect::<Vec<_>>()
        .join("/");
    let normalized = if path.starts_with(['/', '\\']) {
        format!("/{}", joined)
    } else {
        joined
    };
    normalized.to_ascii_lowercase()
}

/// `dir` + `sub/file.ext` -> `dir/sub/file.ext`
pub fn join(path: &str, sub_path: &str) -> String {
    let sub_path = sub_path.trim_start_matches('/');
    if path.is_empty() {
        return sub_path.to_string();
    }
    if path.ends_with('/') {
        format!("{}{}", path, sub_path)
    } else {
        format!("{}/{}", path, sub_path)
    }
}

/// `dir/file.ext` -> `file.ext`
pub fn file_name(path: &str) -> &str {
    path.rsplit(['/', '\\']).next().unwrap_or(path)
}

/// `dir/file.ext` -> `ext`
pub fn file_extension(path: &str) -> Option<&str> {
    let name = file_name(path);
    name.rfind('.').map(|i| &name[i + 1..]).filter(|ext| !ext.is_empty())
}

/// `dir/file.ext` -> `dir`
pub fn parent_dir(path: &str) -> &str {
    path.rfind(['/', '\\']).map(|i| &path[..i]).unwrap_or("")
}

/// `dir/file.ext` + `bak` -> `dir/file.bak`
pub fn set_extension(path: &str, ext: &str) -> String {
    let name_start = path.len() - file_name(path).len();
    let stem_end = path[name_start..]
        .rfind('.')
        .map(|i| name_start + i)
        .unwrap_or(path.len());
    format!("{}.{}", &path[..stem_end], ext.trim_start_matches('.'))
}

/// Search-path id -> root-relative directories, in lookup order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SearchPaths {
    paths: BTreeMap<String, Vec<String>>,
}

impl SearchPaths {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, id: &str, dirs: &[&str]) -> Self {
        for dir in dirs {
            self.add(id, dir);
        }
        self
    }

    pub fn add(&mut self, id: &str, dir: &str) {
        let dirs = self.paths.entry(id.to_string()).or_default();
        if !dirs.iter().any(|d| d == dir) {
            dirs.push(dir.to_string());
        }
    }

    pub fn dirs(&self, id: &str) -> &[String] {
        self.paths.get(id).map(Vec::as_slice).unwrap_or(&[])
    }
}

/// Logical-path view of a [`FileSystem`].
#[derive(Clone)]
pub struct Vfs {
    fs: Arc<dyn FileSystem>,
    search_paths: SearchPaths,
}

impl Vfs {
    pub fn new(fs: Arc<dyn FileSystem>, search_paths: SearchPaths) -> Self {
        Self { fs, search_paths }
    }

    pub fn file_system(&self) -> &Arc<dyn FileSystem> {
        &self.fs
    }

    pub fn search_paths(&self) -> &SearchPaths {
        &self.search_paths
    }

    /// Root-relative path of the first match for `logical_path` in the
    /// directories of `search_path`.
    pub fn resolve(&self, logical_path: &str, search_path: &str) -> Option<String> {
        self.search_paths
            .dirs(search_path)
            .iter()
            .map(|dir| join(dir, logical_path))
            .find(|candidate| self.fs.exists(candidate))
    }

    fn resolve_or_not_found(&self, logical_path: &str, search_path: &str) -> io::Result<String> {
        self.resolve(logical_path, search_path).ok_or_else(|| {
            io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} not found in search path {}", logical_path, search_path),
            )
        })
    }

    pub fn read_bytes(&self, logical_path: &str, search_path: &str) -> io::Result<Vec<u8>> {
        let path = self.resolve_or_not_found(logical_path, search_path)?;
        self.fs.read(&path)
    }

    pub fn read_root_relative(&self, path: &str) -> io::Result<Vec<u8>> {
        self.fs.read(path)
    }

    pub fn write_bytes(&self, logical_path: &str, base_dir: &str, bytes: &[u8]) -> io::Result<()> {
        self.fs.write(&join(base_dir, logical_path), bytes)
    }

    pub fn exists(&self, logical_path: &str, search_path: &str) -> bool {
        self.resolve(logical_path, search_path).is_some()
    }

    pub fn modified_signal(
        &self,
        logical_path: &str,
        search_path: &str,
    ) -> io::Result<UpdateSignal> {
        let path = self.resolve_or_not_found(logical_path, search_path)?;
        self.fs.modified(&path).map(UpdateSignal::new)
    }

    pub fn create_directories(&self, path: &str, base_dir: &str) -> io::Result<()> {
        self.fs.create_dir_all(&join(base_dir, path))
    }

    /// Logical paths of every file below a logical directory, merged
    /// across the search path.
    pub fn walk(&self, logical_dir: &str, search_path: &str) -> Vec<String> {
        let logical_dir = logical_dir.trim_end_matches('/');
        let mut files = BTreeSet::new();
        for dir in self.search_paths.dirs(search_path) {
            let base = join(dir, logical_dir);
            let base = base.trim_end_matches('/');
            let Ok(entries) = self.fs.walk_files(base) else {
                continue;
            };
            files.extend(entries.iter().filter_map(|path| {
                let rest = if base.is_empty() {
                    Some(path.as_str())
                } else {
                    path.strip_prefix(base).and_then(|rest| rest.strip_prefix('/'))
                };
                rest.map(|rest| join(logical_dir, rest))
            }));
        }
        files.into_iter().collect()
    }

    pub fn absolute(&self, path: &str) -> PathBuf {
        self.fs.absolute(path)
    }

    pub fn path_relative_to_root(&self, absolute: &Path) -> Option<String> {
        self.fs.strip_root(absolute)
    }

    /// Remove everything under a root-relative directory.
    pub fn purge(&self, dir: &str) -> io::Result<usize> {
        if !self.fs.is_dir(dir) {
            return Ok(0);
        }
        self.fs.remove_dir_all(dir)
    }
}

/// Filesystem rooted at a real directory.
#[derive(Debug, Clone)]
pub struct RealFileSystem {
    root: PathBuf,
}

impl RealFileSystem {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }
}

impl FileSystem for RealFileSystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        std::fs::read(self.absolute(path))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        std::fs::write(self.absolute(path), bytes)
    }

    fn exists(&self, path: &str) -> bool {
        self.absolute(path).is_file()
    }

    fn is_dir(&self, path: &str) -> bool {
        self.absolute(path).is_dir()
    }

    fn modified(&self, path: &str) -> io::Result<SystemTime> {
        std::fs::metadata(self.absolute(path))?.modified()
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        std::fs::create_dir_all(self.absolute(path))
    }

    fn walk_files(&self, path: &str) -> io::Result<Vec<String>> {
        let absolute = self.absolute(path);
        if !absolute.is_dir() {
            return Err(io::Error::new(
                io::ErrorKind::NotFound,
                format!("{} is not a directory", absolute.display()),
            ));
        }

        let mut files = Vec::new();
        for entry in WalkDir::new(&absolute)
            .follow_links(false)
            .sort_by_file_name()
            .into_iter()
            .filter_map(|e| e.ok())
        {
            // Linked files are kept, linked directories are not entered
            let is_file = entry.file_type().is_file()
                || (entry.path_is_symlink() && entry.path().is_file());
            if !is_file {
                continue;
            }
            if let Ok(relative) = entry.path().strip_prefix(&absolute) {
                files.push(join(path, &relative.to_string_lossy().replace('\\', "/")));
            }
        }
        Ok(files)
    }

    fn remove_dir_all(&self, path: &str) -> io::Result<usize> {
        let removed = self.walk_files(path)?.len();
        std::fs::remove_dir_all(self.absolute(path))?;
        Ok(removed)
    }

    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }

    fn strip_root(&self, absolute: &Path) -> Option<String> {
        let relative = match absolute.strip_prefix(&self.root) {
            Ok(relative) => relative.to_path_buf(),
            Err(_) => {
                let root = self.root.canonicalize().ok()?;
                let absolute = absolute.canonicalize().ok()?;
                absolute.strip_prefix(&root).ok()?.to_path_buf()
            }
        };
        Some(relative.to_string_lossy().replace('\\', "/"))
    }
}

/// In-memory filesystem for tests.
#[derive(Debug, Default)]
pub struct MockFileSystem {
    state: Mutex<MockState>,
}

#[derive(Debug, Default)]
struct MockState {
    files: BTreeMap<String, (Vec<u8>, SystemTime)>,
    dirs: BTreeSet<String>,
    clock: u64,
    read_only: bool,
}

impl MockState {
    fn tick(&mut self) -> SystemTime {
        self.clock += 1;
        SystemTime::UNIX_EPOCH + Duration::from_secs(self.clock)
    }

    fn add_parents(&mut self, path: &str) {
        let mut dir = parent_dir(path);
        while !dir.is_empty() {
            self.dirs.insert(dir.to_string());
            dir = parent_dir(dir);
        }
    }
}

impl MockFileSystem {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Create or replace a file, advancing its modification time.
    pub fn add_file(&self, path: &str, contents: impl AsRef<[u8]>) {
        let mut state = self.state();
        let time = state.tick();
        state.add_parents(path);
        state
            .files
            .insert(path.to_string(), (contents.as_ref().to_vec(), time));
    }

    /// Advance a file's modification time without changing its contents.
    pub fn touch(&self, path: &str) {
        let mut state = self.state();
        let time = state.tick();
        if let Some(entry) = state.files.get_mut(path) {
            entry.1 = time;
        }
    }

    /// Make every subsequent write fail.
    pub fn set_read_only(&self, read_only: bool) {
        self.state().read_only = read_only;
    }

    pub fn contents(&self, path: &str) -> Option<String> {
        self.state()
            .files
            .get(path)
            .map(|(bytes, _)| String::from_utf8_lossy(bytes).into_owned())
    }

    pub fn file_count(&self) -> usize {
        self.state().files.len()
    }
}

fn not_found(path: &str) -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, path.to_string())
}

impl FileSystem for MockFileSystem {
    fn read(&self, path: &str) -> io::Result<Vec<u8>> {
        self.state()
            .files
            .get(path)
            .map(|(bytes, _)| bytes.clone())
            .ok_or_else(|| not_found(path))
    }

    fn write(&self, path: &str, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.state();
        if state.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, path.to_string()));
        }
        if !parent_dir(path).is_empty() && !state.dirs.contains(parent_dir(path)) {
            return Err(not_found(parent_dir(path)));
        }
        let time = state.tick();
        state.files.insert(path.to_string(), (bytes.to_vec(), time));
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        self.state().files.contains_key(path)
    }

    fn is_dir(&self, path: &str) -> bool {
        self.state().dirs.contains(path.trim_end_matches('/'))
    }

    fn modified(&self, path: &str) -> io::Result<SystemTime> {
        self.state()
            .files
            .get(path)
            .map(|(_, time)| *time)
            .ok_or_else(|| not_found(path))
    }

    fn create_dir_all(&self, path: &str) -> io::Result<()> {
        let mut state = self.state();
        if state.read_only {
            return Err(io::Error::new(io::ErrorKind::PermissionDenied, path.to_string()));
        }
        let path = path.trim_end_matches('/');
        state.add_parents(path);
        if !path.is_empty() {
            state.dirs.insert(path.to_string());
        }
        Ok(())
    }

    fn walk_files(&self, path: &str) -> io::Result<Vec<String>> {
        let state = self.state();
        let path = path.trim_end_matches('/');
        if !path.is_empty() && !state.dirs.contains(path) {
            return Err(not_found(path));
        }
        let prefix = format!("{}/", path);
        Ok(state
            .files
            .keys()
            .filter(|p| path.is_empty() || p.starts_with(&prefix))
            .cloned()
            .collect())
    }

    fn remove_dir_all(&self, path: &str) -> io::Result<usize> {
        let mut state = self.state();
        let prefix = format!("{}/", path.trim_end_matches('/'));
        let before = state.files.len();
        state.files.retain(|p, _| !p.starts_with(&prefix));
        state
            .dirs
            .retain(|d| !d.starts_with(&prefix) && d != prefix.trim_end_matches('/'));
        Ok(before - state.files.len())
    }

    fn absolute(&self, path: &str) -> PathBuf {
        Path::new("/mock").join(path)
    }

    fn strip_root(&self, absolute: &Path) -> Option<String> {
        absolute
            .strip_prefix("/mock")
            .ok()
            .map(|p| p.to_string_lossy().replace('\\', "/"))
    }
}
