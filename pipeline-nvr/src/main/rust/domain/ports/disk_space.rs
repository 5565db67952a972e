use std::io;
use std::path::Path;

/// Port for free-space queries on the volume holding a path
pub trait DiskSpace: Send + Sync {
    fn free_bytes(&self, path: &Path) -> io::Result<u64>;
}
