use std::{
    fs,
    io::{Read, Seek, SeekFrom, Write},
    path::{Path, PathBuf},
};
use super::Result;

// A file of the torrent, opened for reading and writing.
#[derive(Debug)]
pub struct StoreFile {

    path: PathBuf,

    handle: fs::File,

}

impl StoreFile {

    // Opens the file at its declared length, creating it and any missing directories.
    // Existing data is kept so pieces already on disk are found by the scan.
    pub fn create(path: &Path, len: usize) -> Result<Self> {

        if let Some(dir) = path.parent() {
            if !dir.is_dir() {
                tracing::info!("creating directory: {:?}", dir);
                fs::create_dir_all(dir)?;
            }
        }

        tracing::info!("opening file: {:?}", path);
        let handle = fs::OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(path)?;

        if handle.metadata()?.len() != len as u64 {
            handle.set_len(len as u64)?;
        }

        Ok(Self {
            path: path.to_path_buf(),
            handle,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<()> {
        self.handle.seek(SeekFrom::Start(offset as u64))?;
        self.handle.read_exact(buf)?;
        Ok(())
    }

    pub fn write_at(&mut self, offset: usize, data: &[u8]) -> Result<()> {
        self.handle.seek(SeekFrom::Start(offset as u64))?;
        self.handle.write_all(data)?;
        Ok(())
    }

    pub fn sync(&mut self) -> Result<()> {
        self.handle.flush()?;
        self.handle.sync_all()?;
        Ok(())
    }
}
