//! Parallel tree synchronisation with a staleness oracle.
//!
//! Source trees are mirrored onto a destination root by a fixed-size worker
//! pool; directory tasks fan out into per-child tasks on the same pool.
//! A file is copied only when the destination is missing or not a regular
//! file, the source is strictly newer, or `force` is set; after a copy the
//! destination's mtime is refreshed to now so later passes see a
//! consistent fence. Per-path errors are collected concurrently and
//! surfaced as one aggregated failure after the pool drains.

use std::cell::RefCell;
use std::collections::BTreeMap;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant, SystemTime};

use anyhow::{Context, Result};
use dashmap::DashMap;
use once_cell::sync::Lazy;
use rayon::ThreadPool;
use regex::Regex;
use tracing::info;

use crate::errors::RewriteError;

/// Worker count of the copy pool.
const COPY_WORKERS: usize = 100;
/// Reused per-worker copy buffer size.
const COPY_BUF_SIZE: usize = 4 * 1024 * 1024;
/// Minimum interval between progress reports.
const REPORT_INTERVAL: Duration = Duration::from_millis(200);

static COPY_POOL: Lazy<ThreadPool> = Lazy::new(|| {
    rayon::ThreadPoolBuilder::new()
        .num_threads(COPY_WORKERS)
        .thread_name(|i| format!("mockgraft-copy-{}", i))
        .build()
        .expect("copy pool")
});

thread_local! {
    static COPY_BUF: RefCell<Vec<u8>> = RefCell::new(Vec::new());
}

pub type StatsFn = Arc<dyn Fn(i64, i64, i64, bool) + Send + Sync>;

#[derive(Clone, Default)]
pub struct SyncOptions {
    /// Regex patterns; matching source paths are not synced.
    pub ignores: Vec<String>,
    /// Delete destination entries with no source counterpart.
    pub delete_not_found: bool,
    /// Copy regardless of staleness.
    pub force: bool,
    pub on_stats: Option<StatsFn>,
    /// Applied to every computed destination path.
    pub process_dest_path: Option<Arc<dyn Fn(&Path) -> PathBuf + Send + Sync>>,
    /// Called for every path actually copied.
    pub did_copy: Option<Arc<dyn Fn(&Path, &Path) + Send + Sync>>,
    /// Destinations delete-not-found must leave alone (overlaid content).
    pub preserve: Option<Arc<dyn Fn(&Path) -> bool + Send + Sync>>,
}

struct SyncState {
    matchers: Vec<Regex>,
    opts: SyncOptions,
    total: AtomicI64,
    finished: AtomicI64,
    copied: AtomicI64,
    errors: DashMap<PathBuf, String>,
}

impl SyncState {
    fn new(opts: SyncOptions) -> Result<Self> {
        let matchers = opts
            .ignores
            .iter()
            .map(|p| Regex::new(p).with_context(|| format!("bad ignore pattern {:?}", p)))
            .collect::<Result<Vec<_>>>()?;
        Ok(Self {
            matchers,
            opts,
            total: AtomicI64::new(0),
            finished: AtomicI64::new(0),
            copied: AtomicI64::new(0),
            errors: DashMap::new(),
        })
    }

    fn ignored(&self, path: &Path) -> bool {
        let s = path.to_string_lossy();
        self.matchers.iter().any(|m| m.is_match(&s))
    }

    fn dest_of(&self, dest: PathBuf) -> PathBuf {
        match &self.opts.process_dest_path {
            Some(f) => f(&dest),
            None => dest,
        }
    }

    fn report(&self, last: bool) {
        if let Some(stats) = &self.opts.on_stats {
            stats(
                self.total.load(Ordering::Relaxed),
                self.finished.load(Ordering::Relaxed),
                self.copied.load(Ordering::Relaxed),
                last,
            );
        }
    }

    fn record_err(&self, path: &Path, err: impl ToString) {
        self.errors.insert(path.to_path_buf(), err.to_string());
    }

    fn finish(&self) -> Result<()> {
        self.report(true);
        if self.errors.is_empty() {
            return Ok(());
        }
        let mut list: Vec<String> = self
            .errors
            .iter()
            .map(|e| format!("{}: {}", e.key().display(), e.value()))
            .collect();
        list.sort();
        Err(RewriteError::copy(
            PathBuf::from("<multiple>"),
            list.join("; "),
        )
        .into())
    }
}

/// Mirror each source path into `rebase_dir`, preserving absolute layout.
pub fn sync_rebase(init_paths: &[PathBuf], rebase_dir: &Path, opts: SyncOptions) -> Result<()> {
    let state = SyncState::new(opts)?;
    COPY_POOL.scope(|scope| {
        for path in init_paths {
            let state = &state;
            let rebase = rebase_dir;
            scope.spawn(move |scope| sync_path(scope, state, rebase, path.clone(), None));
        }
    });
    state.finish()
}

fn sync_path<'s>(
    scope: &rayon::Scope<'s>,
    state: &'s SyncState,
    rebase: &'s Path,
    src: PathBuf,
    meta: Option<fs::Metadata>,
) {
    if state.ignored(&src) {
        return;
    }
    let meta = match meta {
        Some(m) => m,
        None => match fs::symlink_metadata(&src) {
            Ok(m) if m.is_symlink() => return,
            Ok(m) => m,
            Err(e) => {
                state.record_err(&src, e);
                return;
            }
        },
    };
    let dest = state.dest_of(crate::fsutil::rebase_onto(rebase, &src));
    if meta.is_dir() {
        sync_dir(scope, state, rebase, &src, &dest);
    } else if meta.is_file() {
        sync_file(state, &src, &meta, &dest);
    }
}

fn sync_file(state: &SyncState, src: &Path, src_meta: &fs::Metadata, dest: &Path) {
    state.total.fetch_add(1, Ordering::Relaxed);
    state.report(false);
    let need_copy = match fs::metadata(dest) {
        Err(_) => true,
        Ok(dest_meta) if !dest_meta.is_file() => {
            if let Err(e) = remove_any(dest) {
                state.record_err(dest, e);
                return;
            }
            true
        }
        Ok(dest_meta) => state.opts.force || newer_than(src_meta, &dest_meta),
    };
    if !need_copy {
        state.finished.fetch_add(1, Ordering::Relaxed);
        state.report(false);
        return;
    }
    if let Some(hook) = &state.opts.did_copy {
        hook(src, dest);
    }
    if let Err(e) = copy_file(src, dest) {
        state.record_err(src, e);
        return;
    }
    state.copied.fetch_add(1, Ordering::Relaxed);
    state.finished.fetch_add(1, Ordering::Relaxed);
    state.report(false);
}

fn sync_dir<'s>(
    scope: &rayon::Scope<'s>,
    state: &'s SyncState,
    rebase: &'s Path,
    src: &Path,
    dest: &Path,
) {
    let mut dest_names: BTreeMap<std::ffi::OsString, bool> = BTreeMap::new();
    match fs::read_dir(dest) {
        Ok(entries) => {
            for entry in entries.flatten() {
                dest_names.insert(entry.file_name(), true);
            }
        }
        Err(_) => {
            // Missing is fine; a plain file in the way is replaced.
            if dest.is_file() {
                if let Err(e) = remove_any(dest) {
                    state.record_err(dest, e);
                    return;
                }
            }
        }
    }

    let children = match fs::read_dir(src) {
        Ok(entries) => entries,
        Err(e) => {
            state.record_err(src, e);
            return;
        }
    };
    for entry in children {
        let entry = match entry {
            Ok(e) => e,
            Err(e) => {
                state.record_err(src, e);
                return;
            }
        };
        let child = entry.path();
        if state.ignored(&child) {
            continue;
        }
        let meta = match fs::symlink_metadata(&child) {
            Ok(m) => m,
            Err(e) => {
                state.record_err(&child, e);
                continue;
            }
        };
        if meta.is_symlink() {
            continue;
        }
        dest_names.insert(entry.file_name(), false);
        if meta.is_dir() {
            let sub = child.clone();
            scope.spawn(move |scope| sync_path(scope, state, rebase, sub, Some(meta)));
        } else if meta.is_file() {
            let dest_child = state.dest_of(crate::fsutil::rebase_onto(rebase, &child));
            sync_file(state, &child, &meta, &dest_child);
        }
    }

    if state.opts.delete_not_found {
        for (name, needs_delete) in dest_names {
            if !needs_delete {
                continue;
            }
            let victim = dest.join(&name);
            if state
                .opts
                .preserve
                .as_ref()
                .is_some_and(|keep| keep(&victim))
            {
                continue;
            }
            if let Err(e) = remove_any(&victim) {
                state.record_err(&victim, e);
            }
        }
    }
}

fn newer_than(src: &fs::Metadata, dest: &fs::Metadata) -> bool {
    match (src.modified(), dest.modified()) {
        (Ok(s), Ok(d)) => s > d,
        _ => true,
    }
}

fn remove_any(path: &Path) -> std::io::Result<()> {
    if path.is_dir() {
        fs::remove_dir_all(path)
    } else {
        fs::remove_file(path)
    }
}

/// Stream one file through the worker's reused buffer, then refresh the
/// destination mtime to now.
fn copy_file(src: &Path, dest: &Path) -> Result<()> {
    if let Some(parent) = dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut reader =
        fs::File::open(src).with_context(|| format!("opening {}", src.display()))?;
    let mut writer = fs::File::create(dest)
        .with_context(|| format!("creating {}", dest.display()))?;
    COPY_BUF.with(|cell| -> Result<()> {
        let mut buf = cell.borrow_mut();
        if buf.len() < COPY_BUF_SIZE {
            buf.resize(COPY_BUF_SIZE, 0);
        }
        loop {
            let n = reader
                .read(&mut buf[..])
                .with_context(|| format!("reading {}", src.display()))?;
            if n == 0 {
                break;
            }
            writer
                .write_all(&buf[..n])
                .with_context(|| format!("writing {}", dest.display()))?;
        }
        Ok(())
    })?;
    touch_now(&writer)?;
    Ok(())
}

fn touch_now(file: &fs::File) -> Result<()> {
    file.set_modified(SystemTime::now())
        .context("refreshing destination mtime")
}

/// One generated entry: destination path plus content and the source it
/// derives from (for the staleness predicate).
#[derive(Debug, Clone)]
pub struct GeneratedFile {
    pub dest: PathBuf,
    pub content: Vec<u8>,
    /// Backing source path whose mtimes gate regeneration.
    pub src_ref: PathBuf,
}

/// Write generated contents; an entry is rewritten when the destination is
/// missing or `newer` says the backing source has moved past it.
pub fn sync_generated(
    entries: &[GeneratedFile],
    newer: impl Fn(&GeneratedFile, &Path, &fs::Metadata) -> bool + Sync,
    opts: SyncOptions,
) -> Result<()> {
    let state = SyncState::new(opts)?;
    COPY_POOL.scope(|scope| {
        for entry in entries {
            let state = &state;
            let newer = &newer;
            scope.spawn(move |_| {
                if state.ignored(&entry.dest) {
                    return;
                }
                state.total.fetch_add(1, Ordering::Relaxed);
                state.report(false);
                let need_write = match fs::metadata(&entry.dest) {
                    Err(_) => true,
                    Ok(meta) if !meta.is_file() => true,
                    Ok(meta) => state.opts.force || newer(entry, &entry.dest, &meta),
                };
                if !need_write {
                    state.finished.fetch_add(1, Ordering::Relaxed);
                    state.report(false);
                    return;
                }
                if let Some(hook) = &state.opts.did_copy {
                    hook(&entry.src_ref, &entry.dest);
                }
                if let Err(e) = write_generated(entry) {
                    state.record_err(&entry.dest, e);
                    return;
                }
                state.copied.fetch_add(1, Ordering::Relaxed);
                state.finished.fetch_add(1, Ordering::Relaxed);
                state.report(false);
            });
        }
    });
    state.finish()
}

fn write_generated(entry: &GeneratedFile) -> Result<()> {
    if let Some(parent) = entry.dest.parent() {
        fs::create_dir_all(parent)
            .with_context(|| format!("creating {}", parent.display()))?;
    }
    let mut file = fs::File::create(&entry.dest)
        .map_err(|e| RewriteError::write(&entry.dest, e.to_string()))?;
    file.write_all(&entry.content)
        .map_err(|e| RewriteError::write(&entry.dest, e.to_string()))?;
    touch_now(&file)
}

/// Throttled progress reporter in the copy log format.
///
/// Per-step lines need `detail`, the final line only `overall`.
pub fn progress_logger(detail: bool, overall: bool) -> StatsFn {
    let start = Instant::now();
    let last = Mutex::new(start.checked_sub(REPORT_INTERVAL).unwrap_or(start));
    Arc::new(move |total, finished, copied, last_stat| {
        if !detail && !(last_stat && overall) {
            return;
        }
        if !last_stat {
            let mut guard = last.lock().expect("progress lock");
            if guard.elapsed() < REPORT_INTERVAL {
                return;
            }
            *guard = Instant::now();
        }
        info!(
            "copy {:.2}%  total:{:4}, finished:{:4}, changed:{:4}",
            (finished + 1) as f64 / (total + 1) as f64 * 100.0,
            total,
            finished,
            copied
        );
        if last_stat {
            info!("copy finished");
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn rebase_sync_mirrors_tree() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join("sub")).unwrap();
        fs::write(src.path().join("a.rs"), "fn a() {}").unwrap();
        fs::write(src.path().join("sub/b.rs"), "fn b() {}").unwrap();

        sync_rebase(
            &[src.path().to_path_buf()],
            root.path(),
            SyncOptions::default(),
        )
        .unwrap();

        let mirrored = crate::fsutil::rebase_onto(root.path(), src.path());
        assert_eq!(fs::read_to_string(mirrored.join("a.rs")).unwrap(), "fn a() {}");
        assert_eq!(
            fs::read_to_string(mirrored.join("sub/b.rs")).unwrap(),
            "fn b() {}"
        );
    }

    #[test]
    fn second_sync_copies_nothing() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::write(src.path().join("a.rs"), "fn a() {}").unwrap();

        sync_rebase(&[src.path().to_path_buf()], root.path(), SyncOptions::default()).unwrap();

        let copied = Arc::new(AtomicI64::new(0));
        let counter = Arc::clone(&copied);
        let opts = SyncOptions {
            did_copy: Some(Arc::new(move |_, _| {
                counter.fetch_add(1, Ordering::Relaxed);
            })),
            ..Default::default()
        };
        sync_rebase(&[src.path().to_path_buf()], root.path(), opts).unwrap();
        assert_eq!(copied.load(Ordering::Relaxed), 0);
    }

    #[test]
    fn ignore_patterns_skip_sources() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::create_dir_all(src.path().join(".git")).unwrap();
        fs::write(src.path().join(".git/config"), "x").unwrap();
        fs::write(src.path().join("a.rs"), "fn a() {}").unwrap();

        let opts = SyncOptions {
            ignores: vec!["(.*/)?\\.git\\b".into()],
            ..Default::default()
        };
        sync_rebase(&[src.path().to_path_buf()], root.path(), opts).unwrap();

        let mirrored = crate::fsutil::rebase_onto(root.path(), src.path());
        assert!(mirrored.join("a.rs").exists());
        assert!(!mirrored.join(".git").exists());
    }

    #[test]
    fn delete_not_found_removes_orphans() {
        let src = tempfile::tempdir().unwrap();
        let root = tempfile::tempdir().unwrap();
        fs::write(src.path().join("keep.rs"), "k").unwrap();
        let mirrored = crate::fsutil::rebase_onto(root.path(), src.path());
        fs::create_dir_all(&mirrored).unwrap();
        fs::write(mirrored.join("orphan.rs"), "o").unwrap();

        let opts = SyncOptions {
            delete_not_found: true,
            ..Default::default()
        };
        sync_rebase(&[src.path().to_path_buf()], root.path(), opts).unwrap();
        assert!(mirrored.join("keep.rs").exists());
        assert!(!mirrored.join("orphan.rs").exists());
    }

    #[test]
    fn generated_sync_honours_staleness() {
        let root = tempfile::tempdir().unwrap();
        let backing = tempfile::tempdir().unwrap();
        fs::write(backing.path().join("src.rs"), "s").unwrap();
        let entry = GeneratedFile {
            dest: root.path().join("gen/mock.rs"),
            content: b"generated".to_vec(),
            src_ref: backing.path().to_path_buf(),
        };
        sync_generated(&[entry.clone()], |_, _, _| false, SyncOptions::default()).unwrap();
        assert_eq!(fs::read(root.path().join("gen/mock.rs")).unwrap(), b"generated");

        // Unchanged backing source: nothing rewritten.
        fs::write(root.path().join("gen/mock.rs"), b"edited").unwrap();
        sync_generated(&[entry], |_, _, _| false, SyncOptions::default()).unwrap();
        assert_eq!(fs::read(root.path().join("gen/mock.rs")).unwrap(), b"edited");
    }
}
