use std::io;
use std::path::Path;

use sysinfo::Disks;

use crate::domain::ports::DiskSpace;

/// Free space of the mounted volume holding a path
#[derive(Debug, Default, Clone, Copy)]
pub struct SysinfoDiskSpace;

impl SysinfoDiskSpace {
    pub fn new() -> Self {
        Self
    }
}

impl DiskSpace for SysinfoDiskSpace {
    fn free_bytes(&self, path: &Path) -> io::Result<u64> {
        let path = path.canonicalize()?;
        let disks = Disks::new_with_refreshed_list();
        disks
            .list()
            .iter()
            .filter(|disk| path.starts_with(disk.mount_point()))
            .max_by_key(|disk| disk.mount_point().as_os_str().len())
            .map(|disk| disk.available_space())
            .ok_or_else(|| {
                io::Error::new(
                    io::ErrorKind::NotFound,
                    format!("no mounted volume holds {}", path.display()),
                )
            })
    }
}
