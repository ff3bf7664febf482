use std::{fs, io::IoSlice, io::Seek, io::Write, path};

use crate::store::FileInfo;

use super::Result;

#[derive(Debug)]
pub struct TorrentFile {
    pub info: FileInfo,
    pub handle: fs::File,
}

impl TorrentFile {
    pub fn new(dir: &path::Path, info: FileInfo) -> Result<Self> {
        let path = dir.join(&info.path);
        tracing::info!("opening file: {:?}", &path);
        let handle = fs::OpenOptions::new()
            .create(true)
            .read(true)
            .write(true)
            .open(&path)?;
        handle.set_len(info.length as u64)?;

        Ok(Self { info, handle })
    }

    pub fn write_vectored_at(&mut self, offset: usize, bufs: &[IoSlice<'_>]) -> Result<usize> {
        self.handle.seek(std::io::SeekFrom::Start(offset as u64))?;
        Ok(self.handle.write_vectored(bufs)?)
    }

    pub fn read_at(&mut self, offset: usize, buf: &mut [u8]) -> Result<usize> {
        use std::io::Read;
        self.handle.seek(std::io::SeekFrom::Start(offset as u64))?;
        Ok(self.handle.read(buf)?)
    }
}
