use std::path::PathBuf;

use chrono::NaiveDate;

/// Date-named directory under the retention root, sized at scan time
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DayFolder {
    pub path: PathBuf,
    pub date: NaiveDate,
    pub size_bytes: u64,
}

impl DayFolder {
    pub fn name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Combined size of a set of folders
pub fn total_size(folders: &[DayFolder]) -> u64 {
    folders.iter().map(|folder| folder.size_bytes).sum()
}
