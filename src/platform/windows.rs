use std::fs::{File, OpenOptions};
use std::io;
use std::path::{Path, PathBuf};

use super::{Platform, resolve_data_dir};

pub struct NativePlatform;

impl Platform for NativePlatform {
    fn restrict_dir_permissions(_path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn restrict_file_permissions(_path: &Path) -> io::Result<()> {
        Ok(())
    }

    fn create_private_file(path: &Path) -> io::Result<File> {
        OpenOptions::new().write(true).create_new(true).open(path)
    }

    fn data_dir() -> PathBuf {
        let base = dirs::data_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("."));
        resolve_data_dir(base.join("vieagent"))
    }
}
