use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use rand::rngs::OsRng;
use rand::RngCore;
use tracing::info;

use crate::domain::errors::{DomainError, Result};
use crate::domain::ports::KeyStore;
use crate::domain::value_objects::ChannelKey;

/// AES-128 key size
pub const KEY_LEN: usize = 16;

/// Keys and encoder key-info files under one directory:
/// `<dir>/<stream>_<channel>.key` and `<dir>/<stream>_<channel>.keyinfo`
pub struct FileKeyStore {
    dir: PathBuf,
    url_template: String,
}

impl FileKeyStore {
    /// `url_template` may use `{stream}` and `{channel}`
    pub fn new(dir: impl Into<PathBuf>, url_template: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            url_template: url_template.into(),
        }
    }

    pub fn key_path(&self, key: &ChannelKey) -> PathBuf {
        self.dir.join(format!("{}.key", key))
    }

    pub fn key_info_path(&self, key: &ChannelKey) -> PathBuf {
        self.dir.join(format!("{}.keyinfo", key))
    }

    fn key_url(&self, key: &ChannelKey) -> String {
        self.url_template
            .replace("{stream}", key.stream_id())
            .replace("{channel}", key.channel_id())
    }
}

fn random_block() -> [u8; KEY_LEN] {
    let mut block = [0u8; KEY_LEN];
    OsRng.fill_bytes(&mut block);
    block
}

fn write_secret(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let mut options = OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }
    let mut file = options.open(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}

impl KeyStore for FileKeyStore {
    fn key_info(&self, key: &ChannelKey) -> Result<PathBuf> {
        let key_path = self.key_path(key);
        let info_path = self.key_info_path(key);
        if key_path.is_file() && info_path.is_file() {
            return Ok(info_path);
        }

        fs::create_dir_all(&self.dir)?;
        if !key_path.is_file() {
            write_secret(&key_path, &random_block())?;
            info!(channel = %key, path = %key_path.display(), "Generated recording key");
        }
        let info = format!(
            "{}\n{}\n{}\n",
            self.key_url(key),
            key_path.display(),
            hex::encode(random_block())
        );
        fs::write(&info_path, info)?;
        Ok(info_path)
    }

    fn read_key(&self, key: &ChannelKey) -> Result<Vec<u8>> {
        let bytes = match fs::read(self.key_path(key)) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                return Err(DomainError::RecordingNotFound(format!("key for {}", key)));
            }
            Err(e) => return Err(e.into()),
        };
        if bytes.len() != KEY_LEN {
            return Err(DomainError::InvalidConfiguration(format!(
                "key file for {} holds {} bytes",
                key,
                bytes.len()
            )));
        }
        Ok(bytes)
    }
}
