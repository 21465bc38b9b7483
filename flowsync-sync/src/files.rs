//! Workflow file I/O inside the sync directory.
//!
//! ## `write_workflow`: atomic protocol
//!
//! 1. Render the document as pretty JSON (caller picked the projection).
//! 2. Write to `<path>.flowsync.tmp`.
//! 3. Rename to the final path (atomic on POSIX).
//! 4. On rename failure, remove the `.tmp` and leave the original intact.
//!
//! Also home to filename assignment and the two timestamp-prefixed side
//! directories: the archive (caller-initiated discards) and the backups
//! (automatic pre-deletion snapshots).

use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};

use flowsync_core::{EngineConfig, WorkflowDocument, WorkflowId};

use crate::error::{io_err, SyncError};

const TMP_SUFFIX: &str = ".flowsync.tmp";
const FALLBACK_STEM: &str = "workflow";

// ---------------------------------------------------------------------------
// Classification
// ---------------------------------------------------------------------------

/// Whether `filename` (a bare name inside the sync directory) can hold a
/// workflow. Hidden files, temp files, and the baseline file never do.
pub fn is_workflow_file(filename: &str, config: &EngineConfig) -> bool {
    !filename.is_empty()
        && !filename.starts_with('.')
        && !filename.contains('/')
        && !filename.contains('\\')
        && filename != config.state_file
        && filename.to_ascii_lowercase().ends_with(".json")
}

/// Bare filename of `path` if it sits directly in `dir` and is a workflow file.
pub fn workflow_filename(path: &Path, dir: &Path, config: &EngineConfig) -> Option<String> {
    if path.parent()? != dir {
        return None;
    }
    let name = path.file_name()?.to_str()?;
    is_workflow_file(name, config).then(|| name.to_string())
}

// ---------------------------------------------------------------------------
// Read / write
// ---------------------------------------------------------------------------

/// Read and parse one workflow file.
pub fn read_workflow(path: &Path) -> Result<WorkflowDocument, SyncError> {
    let contents = std::fs::read_to_string(path).map_err(|e| io_err(path, e))?;
    WorkflowDocument::parse(&contents).map_err(|source| SyncError::InvalidDocument {
        path: path.to_path_buf(),
        source,
    })
}

/// Read a workflow file, mapping "not there" to `Ok(None)`.
pub fn read_workflow_if_exists(path: &Path) -> Result<Option<WorkflowDocument>, SyncError> {
    match read_workflow(path) {
        Ok(doc) => Ok(Some(doc)),
        Err(SyncError::Io { source, .. }) if source.kind() == ErrorKind::NotFound => Ok(None),
        Err(err) => Err(err),
    }
}

/// Atomically write `doc` to `path`.
pub fn write_workflow(path: &Path, doc: &WorkflowDocument) -> Result<(), SyncError> {
    let tmp = PathBuf::from(format!("{}{TMP_SUFFIX}", path.display()));
    write_workflow_with_tmp(path, doc, &tmp)
}

fn write_workflow_with_tmp(
    path: &Path,
    doc: &WorkflowDocument,
    tmp: &Path,
) -> Result<(), SyncError> {
    let content = doc.to_pretty_json()?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent).map_err(|e| io_err(parent, e))?;
    }
    std::fs::write(tmp, content).map_err(|e| io_err(tmp, e))?;

    if let Err(e) = std::fs::rename(tmp, path) {
        let _ = std::fs::remove_file(tmp);
        return Err(io_err(path, e));
    }

    tracing::debug!("wrote: {}", path.display());
    Ok(())
}

pub fn modified_time(path: &Path) -> Option<SystemTime> {
    std::fs::metadata(path).ok()?.modified().ok()
}

// ---------------------------------------------------------------------------
// Directory scans
// ---------------------------------------------------------------------------

/// Every workflow filename directly inside `dir`, sorted.
pub fn list_workflow_files(dir: &Path, config: &EngineConfig) -> Result<Vec<String>, SyncError> {
    let entries = match std::fs::read_dir(dir) {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(io_err(dir, err)),
    };
    let mut names = Vec::new();
    for entry in entries {
        let entry = entry.map_err(|e| io_err(dir, e))?;
        let is_file = entry.file_type().map(|t| t.is_file()).unwrap_or(false);
        if !is_file {
            continue;
        }
        if let Some(name) = entry.file_name().to_str() {
            if is_workflow_file(name, config) {
                names.push(name.to_string());
            }
        }
    }
    names.sort();
    Ok(names)
}

/// First workflow file in `dir` whose embedded identity is `id`.
///
/// Unreadable files are skipped.
pub fn find_file_with_identity(
    dir: &Path,
    id: &WorkflowId,
    config: &EngineConfig,
) -> Result<Option<String>, SyncError> {
    for name in list_workflow_files(dir, config)? {
        match read_workflow(&dir.join(&name)) {
            Ok(doc) if doc.id().as_ref() == Some(id) => return Ok(Some(name)),
            Ok(_) => {}
            Err(err) => tracing::debug!("skipping {name} while scanning for {id}: {err}"),
        }
    }
    Ok(None)
}

// ---------------------------------------------------------------------------
// Filename assignment
// ---------------------------------------------------------------------------

/// Filesystem-safe `<stem>.json` from a remote display name.
pub fn filename_for_name(display_name: &str) -> String {
    format!("{}.json", sanitize_stem(display_name))
}

/// Name for a remote workflow that has no local file yet.
///
/// The plain name wins unless `is_taken` says another item already owns
/// it. After that come the first 8 characters of the identity, the whole
/// identity, and finally the whole identity with a counter. Never returns a
/// name `is_taken` rejects.
pub fn assign_filename(
    display_name: &str,
    id: &WorkflowId,
    is_taken: impl Fn(&str) -> bool,
) -> String {
    let stem = sanitize_stem(display_name);
    let short = sanitize_stem(id.prefix(8));
    let full = sanitize_stem(id.as_str());

    let mut candidates = vec![format!("{stem}.json"), format!("{stem}_{short}.json")];
    if full != short {
        candidates.push(format!("{stem}_{full}.json"));
    }
    for candidate in candidates {
        if !is_taken(&candidate) {
            return candidate;
        }
    }

    let mut counter: u64 = 2;
    loop {
        let candidate = format!("{stem}_{full}_{counter}.json");
        if !is_taken(&candidate) {
            return candidate;
        }
        counter += 1;
    }
}

fn sanitize_stem(display_name: &str) -> String {
    let cleaned: String = display_name
        .trim()
        .chars()
        .map(|c| match c {
            '/' | '\\' | ':' | '*' | '?' | '"' | '<' | '>' | '|' => '_',
            c if c.is_control() => '_',
            c => c,
        })
        .collect();
    let cleaned = cleaned.trim_start_matches('.').trim();
    if cleaned.is_empty() {
        FALLBACK_STEM.to_string()
    } else {
        cleaned.to_string()
    }
}

// ---------------------------------------------------------------------------
// Archive and backups
// ---------------------------------------------------------------------------

/// `<timestamp>_<filename>`, sortable and colon-free.
pub fn timestamped_name(at: DateTime<Utc>, filename: &str) -> String {
    format!("{}_{filename}", at.format("%Y%m%dT%H%M%S%.3fZ"))
}

/// Move `dir/filename` into the archive directory. Returns the new path.
pub fn archive_file(config: &EngineConfig, filename: &str) -> Result<PathBuf, SyncError> {
    let source = config.sync_dir.join(filename);
    let archive = config.archive_path();
    std::fs::create_dir_all(&archive).map_err(|e| io_err(&archive, e))?;
    let target = archive.join(timestamped_name(Utc::now(), filename));
    std::fs::rename(&source, &target).map_err(|e| io_err(&source, e))?;
    tracing::info!("archived {filename} to {}", target.display());
    Ok(target)
}

/// Snapshot `doc` into the backup directory. Returns the written path.
pub fn write_backup(
    config: &EngineConfig,
    filename: &str,
    doc: &WorkflowDocument,
) -> Result<PathBuf, SyncError> {
    let target = config
        .backup_path()
        .join(timestamped_name(Utc::now(), filename));
    write_workflow(&target, doc)?;
    tracing::info!("backed up remote copy of {filename} to {}", target.display());
    Ok(target)
}
