use std::fs;
use std::io;
use std::path::PathBuf;

use crate::transport::{HostStore, TransportError};

/// Stores the strand host as the sole content of a small text file.
pub struct FileHostStore {
    path: PathBuf,
}

impl FileHostStore {
    pub fn new(path: PathBuf) -> FileHostStore {
        FileHostStore { path }
    }
}

impl HostStore for FileHostStore {
    fn load(&self) -> Result<Option<String>, TransportError> {
        match fs::read_to_string(&self.path) {
            Ok(content) => {
                let host = content.trim();
                if host.is_empty() {
                    Ok(None)
                } else {
                    Ok(Some(host.to_string()))
                }
            }
            Err(err) if err.kind() == io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    fn store(&self, host: &str) -> Result<(), TransportError> {
        fs::write(&self.path, host)?;
        Ok(())
    }
}
