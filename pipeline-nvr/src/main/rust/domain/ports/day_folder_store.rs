use std::io;

use crate::domain::entities::DayFolder;

/// Port for the date-named folders under the recording root
pub trait DayFolderStore: Send + Sync {
    /// All day folders, oldest first, with their current sizes
    fn list(&self) -> io::Result<Vec<DayFolder>>;

    fn remove(&self, folder: &DayFolder) -> io::Result<()>;
}
