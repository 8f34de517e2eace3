use std::cell::RefCell;
use std::fs::{File, OpenOptions};
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::path::Path;

use msc::BlockDevice;

/// Disk image file exposed as a block device.
pub struct FileBlockDevice {
    file: RefCell<File>,
    block_size: u32,
    block_count: u64,
}

impl FileBlockDevice {
    pub fn open(path: impl AsRef<Path>, block_size: u32) -> io::Result<Self> {
        let file = OpenOptions::new().read(true).write(true).open(path)?;
        Self::from_file(file, block_size)
    }

    pub fn from_file(file: File, block_size: u32) -> io::Result<Self> {
        if block_size == 0 {
            return Err(io::Error::new(io::ErrorKind::InvalidInput, "block size is zero"));
        }
        let len = file.metadata()?.len();
        Ok(Self {
            file: RefCell::new(file),
            block_size,
            block_count: len / block_size as u64,
        })
    }

    pub fn into_file(self) -> File {
        self.file.into_inner()
    }

    fn seek_to(&self, file: &mut File, block: u64, len: usize) -> io::Result<()> {
        if len % self.block_size as usize != 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "length is not a multiple of the block size",
            ));
        }
        let blocks = (len / self.block_size as usize) as u64;
        if block.saturating_add(blocks) > self.block_count {
            return Err(io::Error::new(io::ErrorKind::UnexpectedEof, "block out of range"));
        }
        file.seek(SeekFrom::Start(block * self.block_size as u64))?;
        Ok(())
    }
}

impl BlockDevice for FileBlockDevice {
    type Error = io::Error;

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, block: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let mut file = self
            .file
            .try_borrow_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "image busy"))?;
        self.seek_to(&mut file, block, buf.len())?;
        file.read_exact(buf)
    }

    fn write_blocks(&self, block: u64, buf: &[u8]) -> Result<(), Self::Error> {
        let mut file = self
            .file
            .try_borrow_mut()
            .map_err(|_| io::Error::new(io::ErrorKind::WouldBlock, "image busy"))?;
        self.seek_to(&mut file, block, buf.len())?;
        file.write_all(buf)
    }
}
