use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDate;
use tracing::debug;

use crate::domain::entities::DayFolder;
use crate::domain::ports::DayFolderStore;
use crate::domain::value_objects::DAY_FORMAT;

/// `Ok(None)` for entries that vanished mid-walk, e.g. an encoder
/// rotating segments
fn present<T>(result: io::Result<T>) -> io::Result<Option<T>> {
    match result {
        Ok(value) => Ok(Some(value)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

/// Total size of regular files below `path`. Symlinks are not followed;
/// files or directories deleted during the walk count as zero.
pub fn folder_size(path: &Path) -> io::Result<u64> {
    let mut total = 0;
    let mut pending = vec![path.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let Some(entries) = present(fs::read_dir(&dir))? else {
            continue;
        };
        for entry in entries {
            let Some(entry) = present(entry)? else {
                continue;
            };
            let Some(metadata) = present(entry.metadata())? else {
                continue;
            };
            if metadata.is_dir() {
                pending.push(entry.path());
            } else if metadata.is_file() {
                total += metadata.len();
            }
        }
    }
    Ok(total)
}

/// Date-named folders directly under `root`, oldest first.
/// A missing root has no folders.
pub fn scan_day_folders(root: &Path) -> io::Result<Vec<DayFolder>> {
    let entries = match fs::read_dir(root) {
        Ok(entries) => entries,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e),
    };

    let mut folders = Vec::new();
    for entry in entries {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let Some(date) = name
            .to_str()
            .and_then(|name| NaiveDate::parse_from_str(name, DAY_FORMAT).ok())
        else {
            debug!(path = %entry.path().display(), "Ignoring non-date folder");
            continue;
        };
        folders.push(DayFolder {
            size_bytes: folder_size(&entry.path())?,
            path: entry.path(),
            date,
        });
    }
    folders.sort_by_key(|folder| folder.date);
    Ok(folders)
}

pub struct FsDayFolderStore {
    root: PathBuf,
}

impl FsDayFolderStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }
}

impl DayFolderStore for FsDayFolderStore {
    fn list(&self) -> io::Result<Vec<DayFolder>> {
        scan_day_folders(&self.root)
    }

    fn remove(&self, folder: &DayFolder) -> io::Result<()> {
        present(fs::remove_dir_all(&folder.path)).map(|_| ())
    }
}
