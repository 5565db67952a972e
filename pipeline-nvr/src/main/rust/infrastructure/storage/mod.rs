mod day_folders;
mod key_store;
mod sysinfo_disk;

pub use day_folders::{folder_size, scan_day_folders, FsDayFolderStore};
pub use key_store::{FileKeyStore, KEY_LEN};
pub use sysinfo_disk::SysinfoDiskSpace;
