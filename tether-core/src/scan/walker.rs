//! Candidate file discovery.
//!
//! Walks the configured roots lazily, pruning excluded directories before
//! descent and filtering files by extension, hidden-name policy, and size.
//! Per-entry failures are yielded as events; they never abort the walk.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use glob::Pattern;
use tracing::warn;
use walkdir::WalkDir;

use crate::config::ScanSection;
use tether_graphs::normalize_path;

/// A file the walker accepted as a scan candidate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WalkedFile {
    pub abs_path: PathBuf,
    /// Project-relative path, `/`-separated.
    pub rel_path: String,
    pub size: u64,
    pub mtime_ns: i64,
}

/// One walk outcome; errors and size-skips are data, not aborts.
#[derive(Debug)]
pub enum WalkEvent {
    File(WalkedFile),
    SkippedLarge { rel_path: String, size: u64 },
    Error { path: String, error: std::io::Error },
}

/// Lazily enumerates candidate files under the configured roots.
pub struct FileWalker {
    project_root: PathBuf,
    roots: Vec<PathBuf>,
    include_exts: HashSet<String>,
    exclude: Vec<Pattern>,
    /// Prefix patterns derived from `X/**` excludes, used to prune `X` itself.
    exclude_dirs: Vec<Pattern>,
    ignore_hidden: bool,
    follow_symlinks: bool,
    max_file_size: u64,
}

impl FileWalker {
    pub fn new(project_root: &Path, scan: &ScanSection) -> Self {
        let mut exclude = Vec::new();
        let mut exclude_dirs = Vec::new();
        for raw in &scan.exclude_paths {
            match Pattern::new(raw) {
                Ok(p) => {
                    if let Some(prefix) = raw.strip_suffix("/**") {
                        if let Ok(dir) = Pattern::new(prefix) {
                            exclude_dirs.push(dir);
                        }
                    }
                    exclude.push(p);
                }
                Err(e) => warn!(pattern = %raw, error = %e, "Invalid exclude pattern"),
            }
        }

        let roots = if scan.paths.is_empty() {
            vec![project_root.to_path_buf()]
        } else {
            scan.paths.iter().map(|p| project_root.join(p)).collect()
        };

        Self {
            project_root: project_root.to_path_buf(),
            roots,
            include_exts: scan
                .file_extensions
                .iter()
                .map(|e| e.trim_start_matches('.').to_ascii_lowercase())
                .collect(),
            exclude,
            exclude_dirs,
            ignore_hidden: scan.ignore_hidden_files,
            follow_symlinks: scan.follow_symlinks,
            max_file_size: scan.max_file_size_bytes(),
        }
    }

    fn rel(&self, path: &Path) -> String {
        let rel = path.strip_prefix(&self.project_root).unwrap_or(path);
        normalize_path(&rel.to_string_lossy())
    }

    fn dir_excluded(&self, rel: &str) -> bool {
        self.exclude.iter().any(|p| p.matches(rel))
            || self.exclude_dirs.iter().any(|p| p.matches(rel))
    }

    fn file_excluded(&self, rel: &str) -> bool {
        self.exclude.iter().any(|p| p.matches(rel))
    }

    fn hidden(name: &str) -> bool {
        name.starts_with('.')
    }

    /// Lazy walk over every configured root. Finite and non-restartable by
    /// contract; to restart, call again.
    pub fn walk(&self) -> impl Iterator<Item = WalkEvent> + '_ {
        self.roots.iter().flat_map(move |root| {
            WalkDir::new(root)
                .follow_links(self.follow_symlinks)
                .sort_by_file_name()
                .into_iter()
                .filter_entry(move |entry| {
                    let rel = self.rel(entry.path());
                    if rel.is_empty() {
                        return true; // the root itself
                    }
                    let name = entry.file_name().to_string_lossy();
                    if self.ignore_hidden && Self::hidden(&name) {
                        return false;
                    }
                    if entry.file_type().is_dir() {
                        !self.dir_excluded(&rel)
                    } else {
                        true
                    }
                })
                .filter_map(move |entry| self.accept(entry))
        })
    }

    fn accept(&self, entry: walkdir::Result<walkdir::DirEntry>) -> Option<WalkEvent> {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                let path = e
                    .path()
                    .map(|p| self.rel(p))
                    .unwrap_or_default();
                return Some(WalkEvent::Error {
                    path,
                    error: e.into(),
                });
            }
        };
        if !entry.file_type().is_file() {
            return None;
        }
        let rel = self.rel(entry.path());
        if self.file_excluded(&rel) {
            return None;
        }
        let ext = entry
            .path()
            .extension()
            .map(|e| e.to_string_lossy().to_ascii_lowercase())?;
        if !self.include_exts.contains(&ext) {
            return None;
        }

        let meta = match entry.metadata() {
            Ok(m) => m,
            Err(e) => {
                return Some(WalkEvent::Error {
                    path: rel,
                    error: e.into(),
                })
            }
        };
        let size = meta.len();
        if size > self.max_file_size {
            return Some(WalkEvent::SkippedLarge {
                rel_path: rel,
                size,
            });
        }
        let mtime_ns = meta
            .modified()
            .ok()
            .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
            .map_or(0, |d| d.as_nanos() as i64);

        Some(WalkEvent::File(WalkedFile {
            abs_path: entry.path().to_path_buf(),
            rel_path: rel,
            size,
            mtime_ns,
        }))
    }
}
