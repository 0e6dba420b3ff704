//! Dataset manifests
//!
//! Three line-oriented files sit next to the node store and must all be
//! reloaded before a dataset can be served:
//!
//! ```text
//! <data_dir>/<dataset>/
//!   attributes.dict   <key count>, then per key: "<key> <n>" and n values
//!   tracks.dict       <n>, then one track name per line
//!   roots.manifest    "mode <mode>", <n>, then one root id (or NULL) per line
//!   roots.<i>-of-<n>.manifest
//!                     same layout, written by task i of a partitioned build
//!   nodes.db          node store
//! ```
//!
//! A partitioned build leaves one root fragment per task instead of a single
//! root manifest; readers merge them, and refuse to serve until every task
//! of the build has written its fragment.
//!
//! Files are written to a uniquely named temporary sibling and renamed into
//! place.

use crate::config::IndexMode;
use crate::storage::error::{StorageError, StorageResult};
use crate::storage::node::NodeId;
use std::collections::BTreeMap;
use std::fmt::Write as _;
use std::path::{Path, PathBuf};

pub const ATTRIBUTES_FILE: &str = "attributes.dict";
pub const TRACKS_FILE: &str = "tracks.dict";
pub const ROOTS_FILE: &str = "roots.manifest";
pub const NODE_STORE_FILE: &str = "nodes.db";

/// Paths of one dataset's on-disk artifacts
#[derive(Debug, Clone)]
pub struct DatasetPaths {
    dir: PathBuf,
}

impl DatasetPaths {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn attributes(&self) -> PathBuf {
        self.dir.join(ATTRIBUTES_FILE)
    }

    pub fn tracks(&self) -> PathBuf {
        self.dir.join(TRACKS_FILE)
    }

    pub fn roots(&self) -> PathBuf {
        self.dir.join(ROOTS_FILE)
    }

    pub fn node_store(&self) -> PathBuf {
        self.dir.join(NODE_STORE_FILE)
    }

    /// Root fragment written by `task_id` of a `task_count`-way build
    pub fn root_fragment(&self, task_id: usize, task_count: usize) -> PathBuf {
        self.dir
            .join(format!("roots.{}-of-{}.manifest", task_id, task_count))
    }

    /// Root fragments present in the dataset directory
    pub fn root_fragments(&self) -> StorageResult<Vec<RootFragment>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut fragments = Vec::new();
        for entry in entries {
            let path = entry?.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            if let Some((task_id, task_count)) = parse_fragment_name(name) {
                fragments.push(RootFragment {
                    task_id,
                    task_count,
                    path,
                });
            }
        }
        fragments.sort_by_key(|f| (f.task_count, f.task_id));
        Ok(fragments)
    }
}

/// One task's root fragment on disk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RootFragment {
    pub task_id: usize,
    pub task_count: usize,
    pub path: PathBuf,
}

fn parse_fragment_name(name: &str) -> Option<(usize, usize)> {
    let (task_id, task_count) = name
        .strip_prefix("roots.")?
        .strip_suffix(".manifest")?
        .split_once("-of-")?;
    Some((task_id.parse().ok()?, task_count.parse().ok()?))
}

/// Roots a reader should serve
///
/// With root fragments present, every task of one build must have written
/// its fragment; their entries are overlaid. Otherwise `roots.manifest`.
pub fn load_roots(paths: &DatasetPaths) -> StorageResult<RootManifest> {
    let fragments = paths.root_fragments()?;
    let Some(first) = fragments.first() else {
        return RootManifest::read(&paths.roots());
    };

    let task_count = first.task_count;
    if let Some(other) = fragments.iter().find(|f| f.task_count != task_count) {
        return Err(StorageError::manifest(
            &other.path,
            format!(
                "fragments of a {}-task and a {}-task build side by side",
                task_count, other.task_count
            ),
        ));
    }
    for task_id in 0..task_count {
        if !fragments.iter().any(|f| f.task_id == task_id) {
            return Err(StorageError::manifest(
                paths.root_fragment(task_id, task_count),
                format!("task {} of {} has not finished", task_id, task_count),
            ));
        }
    }

    let mut merged: Option<RootManifest> = None;
    for fragment in &fragments {
        let part = RootManifest::read(&fragment.path)?;
        match &mut merged {
            None => merged = Some(part),
            Some(roots) => {
                if roots.mode != part.mode || roots.len() != part.len() {
                    return Err(StorageError::manifest(
                        &fragment.path,
                        "fragment disagrees with its peers on mode or track count",
                    ));
                }
                for (index, root) in part.roots.iter().enumerate() {
                    if root.is_some() {
                        roots.set(index, *root);
                    }
                }
            }
        }
    }
    merged.ok_or_else(|| StorageError::manifest(paths.roots(), "no root fragments"))
}

/// Persisted root ids: one per track, or a single global root in 2D mode
#[derive(Debug, Clone, PartialEq)]
pub struct RootManifest {
    pub mode: IndexMode,
    pub roots: Vec<Option<NodeId>>,
}

impl RootManifest {
    pub fn new(mode: IndexMode, len: usize) -> Self {
        Self {
            mode,
            roots: vec![None; len],
        }
    }

    pub fn root(&self, index: usize) -> Option<NodeId> {
        self.roots.get(index).copied().flatten()
    }

    pub fn set(&mut self, index: usize, root: Option<NodeId>) {
        if index >= self.roots.len() {
            self.roots.resize(index + 1, None);
        }
        self.roots[index] = root;
    }

    pub fn len(&self) -> usize {
        self.roots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }

    pub fn write(&self, path: &Path) -> StorageResult<()> {
        let mut out = String::new();
        let _ = writeln!(out, "mode {}", self.mode);
        let _ = writeln!(out, "{}", self.roots.len());
        for root in &self.roots {
            match root {
                Some(id) => {
                    let _ = writeln!(out, "{}", id);
                }
                None => out.push_str("NULL\n"),
            }
        }
        write_atomic(path, &out)
    }

    pub fn read(path: &Path) -> StorageResult<Self> {
        let content = read_manifest(path)?;
        let mut lines = content.lines();

        let mode_line = lines
            .next()
            .ok_or_else(|| StorageError::manifest(path, "empty file"))?;
        let mode = mode_line
            .strip_prefix("mode ")
            .ok_or_else(|| StorageError::manifest(path, "missing mode line"))?
            .parse::<IndexMode>()
            .map_err(|e| StorageError::manifest(path, e))?;

        let count = read_count(path, lines.next())?;
        let mut roots = Vec::new();
        for _ in 0..count {
            let line = lines
                .next()
                .ok_or_else(|| StorageError::manifest(path, "fewer roots than declared"))?;
            let line = line.trim();
            let root = NodeId::parse(line);
            if root.is_none() && line != "NULL" && !line.is_empty() {
                return Err(StorageError::manifest(path, format!("bad root id '{}'", line)));
            }
            roots.push(root);
        }

        Ok(Self { mode, roots })
    }
}

/// Write the track dictionary
pub fn write_tracks(path: &Path, tracks: &[String]) -> StorageResult<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{}", tracks.len());
    for track in tracks {
        let _ = writeln!(out, "{}", track);
    }
    write_atomic(path, &out)
}

/// Read the track dictionary in index order
pub fn read_tracks(path: &Path) -> StorageResult<Vec<String>> {
    let content = read_manifest(path)?;
    let mut lines = content.lines();
    let count = read_count(path, lines.next())?;
    read_values(path, &mut lines, count)
}

/// Write the attribute dictionary (per key, values in index order)
pub fn write_attributes(path: &Path, attributes: &BTreeMap<String, Vec<String>>) -> StorageResult<()> {
    let mut out = String::new();
    let _ = writeln!(out, "{}", attributes.len());
    for (key, values) in attributes {
        let _ = writeln!(out, "{} {}", key, values.len());
        for value in values {
            let _ = writeln!(out, "{}", value);
        }
    }
    write_atomic(path, &out)
}

pub fn read_attributes(path: &Path) -> StorageResult<BTreeMap<String, Vec<String>>> {
    let content = read_manifest(path)?;
    let mut lines = content.lines();
    let key_count = read_count(path, lines.next())?;

    let mut attributes = BTreeMap::new();
    for _ in 0..key_count {
        let header = lines
            .next()
            .ok_or_else(|| StorageError::manifest(path, "fewer keys than declared"))?;
        let (key, count) = header
            .trim()
            .rsplit_once(' ')
            .ok_or_else(|| StorageError::manifest(path, format!("bad key line '{}'", header)))?;
        let count: usize = count
            .parse()
            .map_err(|_| StorageError::manifest(path, format!("bad value count for '{}'", key)))?;
        let values = read_values(path, &mut lines, count)?;
        attributes.insert(key.to_string(), values);
    }
    Ok(attributes)
}

fn read_manifest(path: &Path) -> StorageResult<String> {
    std::fs::read_to_string(path).map_err(|e| StorageError::manifest(path, e.to_string()))
}

fn read_count(path: &Path, line: Option<&str>) -> StorageResult<usize> {
    line.and_then(|l| l.trim().parse().ok())
        .ok_or_else(|| StorageError::manifest(path, "missing or malformed count"))
}

fn read_values<'a>(
    path: &Path,
    lines: &mut impl Iterator<Item = &'a str>,
    count: usize,
) -> StorageResult<Vec<String>> {
    let mut values = Vec::with_capacity(count);
    for _ in 0..count {
        let value = lines
            .next()
            .ok_or_else(|| StorageError::manifest(path, "fewer values than declared"))?;
        values.push(value.to_string());
    }
    Ok(values)
}

fn write_atomic(path: &Path, content: &str) -> StorageResult<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    // Concurrent tasks write identical dictionaries; each needs its own temp file
    let tmp = path.with_extension(format!("{}.tmp", uuid::Uuid::new_v4().simple()));
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}
