//! Opaque blob persistence
//!
//! The GUI stores collections, history and TLS templates as JSON blobs the
//! engine never inspects. The whole contract is read-all / write-all of a
//! named file under the application's directory in the OS user config dir.

use std::fs;
use std::path::PathBuf;

use crate::error::{EngineError, Result};

pub const COLLECTIONS_FILE: &str = "collections.json";
pub const HISTORY_FILE: &str = "history.json";
pub const TLS_TEMPLATES_FILE: &str = "tls_templates.json";

const APP_DIR: &str = "httpcall";

fn storage_dir() -> Result<PathBuf> {
    let base = dirs::config_dir()
        .ok_or_else(|| EngineError::Config("no user config directory".to_string()))?;
    Ok(base.join(APP_DIR))
}

/// Read a blob; `None` when the file does not exist yet.
pub fn read_blob(name: &str) -> Result<Option<String>> {
    let path = storage_dir()?.join(name);
    match fs::read_to_string(&path) {
        Ok(contents) => Ok(Some(contents)),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Write a blob, creating the directory on first use.
pub fn write_blob(name: &str, contents: &str) -> Result<()> {
    let dir = storage_dir()?;
    fs::create_dir_all(&dir)?;
    fs::write(dir.join(name), contents)?;
    Ok(())
}
