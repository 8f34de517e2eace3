use msc::BlockDevice;

use super::chain;
use super::fs::{FileHandle, FileSystem, FsResult};
use crate::error::FatError;

const MAX_FILE_SIZE: u64 = u32::MAX as u64;

impl<B: BlockDevice> FileSystem<B> {
    fn file_entry(&self, file: FileHandle) -> FsResult<(u32, u64), B::Error> {
        self.check(file.fs)?;
        let (_, record) = self.record(file.entry)?;
        if record.short.is_directory() {
            return Err(FatError::IsDirectory);
        }
        Ok((record.short.start_cluster, record.short.file_size as u64))
    }

    pub fn length(&self, file: FileHandle) -> FsResult<u64, B::Error> {
        Ok(self.file_entry(file)?.1)
    }

    pub fn read(&mut self, file: FileHandle, offset: u64, buf: &mut [u8]) -> FsResult<usize, B::Error> {
        let (start, length) = self.file_entry(file)?;
        if offset >= length || buf.is_empty() {
            return Ok(0);
        }
        let n = (length - offset).min(buf.len() as u64) as usize;
        let clusters = self.fat.get_chain(&mut self.dev, start)?;
        chain::read(&mut self.dev, &self.boot, &clusters, offset, &mut buf[..n])?;

        let now = self.config.local_now();
        self.record_mut(file.entry)?.short.touch_accessed(now);
        Ok(n)
    }

    pub fn write(&mut self, file: FileHandle, offset: u64, data: &[u8]) -> FsResult<(), B::Error> {
        let (_, length) = self.file_entry(file)?;
        let end = offset.saturating_add(data.len() as u64);
        if end > MAX_FILE_SIZE {
            return Err(FatError::FileTooLarge(end));
        }
        if end > length {
            self.resize(file, end)?;
        }

        let (start, _) = self.file_entry(file)?;
        let clusters = self.fat.get_chain(&mut self.dev, start)?;
        chain::write(&mut self.dev, &self.boot, &clusters, offset, data)?;

        let now = self.config.local_now();
        self.record_mut(file.entry)?.short.touch_modified(now);
        Ok(())
    }

    /// Truncates or extends the file; extended bytes are unspecified until written.
    pub fn set_length(&mut self, file: FileHandle, length: u64) -> FsResult<(), B::Error> {
        self.file_entry(file)?;
        if length > MAX_FILE_SIZE {
            return Err(FatError::FileTooLarge(length));
        }
        self.resize(file, length)?;
        let now = self.config.local_now();
        self.record_mut(file.entry)?.short.touch_modified(now);
        Ok(())
    }

    fn resize(&mut self, file: FileHandle, length: u64) -> FsResult<(), B::Error> {
        let (start, old_length) = self.file_entry(file)?;
        let cluster_size = self.boot.cluster_size() as u64;
        let wanted = length.div_ceil(cluster_size) as usize;

        let mut clusters = self.fat.get_chain(&mut self.dev, start)?;
        if wanted > clusters.len() {
            let n = wanted - clusters.len();
            self.fat.alloc(&mut self.dev, &mut self.fs_info, &mut clusters, n)?;
        } else if wanted < clusters.len() {
            let n = clusters.len() - wanted;
            self.fat.free(&mut self.dev, &mut self.fs_info, &mut clusters, n)?;
        }

        let record = self.record_mut(file.entry)?;
        record.short.file_size = length as u32;
        record.short.start_cluster = clusters.first().copied().unwrap_or(0);
        log::debug!(
            "fat32: resize from={} to={} clusters={}",
            old_length,
            length,
            clusters.len()
        );
        Ok(())
    }

    /// Persists the file's entry (size, start cluster, timestamps) in its directory.
    pub fn flush(&mut self, file: FileHandle) -> FsResult<(), B::Error> {
        self.file_entry(file)?;
        let (parent, _) = self.record(file.entry)?;
        self.store_dir(parent)
    }

    pub fn close(&mut self, file: FileHandle) -> FsResult<(), B::Error> {
        self.flush(file)
    }
}
