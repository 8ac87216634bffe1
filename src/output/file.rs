//! File-backed output.
//!
//! The state lives in a single ASCII byte at offset 0: `'1'` for high,
//! anything else for low.  Every write rewinds and rewrites that byte in
//! place, so another process can poll the file (or a sysfs-style attribute
//! can be targeted directly).

use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use log::{debug, error};

use super::Output;
use crate::error::OutputError;

#[derive(Debug)]
pub struct FileOutput {
    name: String,
    path: PathBuf,
    file: Option<File>,
}

impl FileOutput {
    pub fn new(name: impl Into<String>, path: impl Into<PathBuf>) -> Self {
        Self {
            name: name.into(),
            path: path.into(),
            file: None,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_byte(mut file: &File, value: bool) -> std::io::Result<()> {
        file.seek(SeekFrom::Start(0))?;
        file.write_all(if value { b"1" } else { b"0" })?;
        file.flush()
    }

    fn read_byte(mut file: &File) -> std::io::Result<bool> {
        file.seek(SeekFrom::Start(0))?;
        let mut byte = [0u8; 1];
        let n = file.read(&mut byte)?;
        Ok(n == 1 && byte[0] == b'1')
    }
}

impl Output for FileOutput {
    fn name(&self) -> &str {
        &self.name
    }

    /// Create (or truncate) the file for reading and writing.
    fn set_up(&mut self) -> Result<(), OutputError> {
        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(true)
            .open(&self.path)?;
        debug!("Output {}: opened {}", self.name, self.path.display());
        self.file = Some(file);
        Ok(())
    }

    fn tear_down(&mut self) {
        if self.file.take().is_some() {
            debug!("Output {}: closed {}", self.name, self.path.display());
        }
    }

    fn value(&self) -> bool {
        let Some(file) = &self.file else {
            return false;
        };
        match Self::read_byte(file) {
            Ok(value) => value,
            Err(e) => {
                error!("Output {}: read failed: {e}", self.name);
                false
            }
        }
    }

    fn set_value(&mut self, value: bool) {
        let Some(file) = &self.file else {
            error!("Output {}: write before set up", self.name);
            return;
        };
        if let Err(e) = Self::write_byte(file, value) {
            error!("Output {}: write failed: {e}", self.name);
        }
    }
}
