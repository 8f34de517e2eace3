use core::cell::{Cell, RefCell};

use alloc::vec;
use alloc::vec::Vec;

use msc::BlockDevice;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RamError {
    Misaligned { len: usize, block_size: u32 },
    OutOfRange { block: u64, blocks: u64 },
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RamStats {
    pub reads: u64,
    pub writes: u64,
    pub misaligned: u64,
}

/// Block device held in memory.
pub struct RamBlockDevice {
    block_size: u32,
    data: RefCell<Vec<u8>>,
    stats: Cell<RamStats>,
}

impl RamBlockDevice {
    pub fn new(block_size: u32, block_count: u64) -> Self {
        Self::from_vec(block_size, vec![0u8; (block_size as u64 * block_count) as usize])
    }

    /// `data` is truncated to a whole number of blocks.
    pub fn from_vec(block_size: u32, mut data: Vec<u8>) -> Self {
        let whole = data.len() / block_size as usize * block_size as usize;
        data.truncate(whole);
        Self {
            block_size,
            data: RefCell::new(data),
            stats: Cell::new(RamStats::default()),
        }
    }

    pub fn stats(&self) -> RamStats {
        self.stats.get()
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.data.into_inner()
    }

    fn range(&self, block: u64, len: usize) -> Result<core::ops::Range<usize>, RamError> {
        let mut stats = self.stats.get();
        if len % self.block_size as usize != 0 {
            stats.misaligned += 1;
            self.stats.set(stats);
            return Err(RamError::Misaligned {
                len,
                block_size: self.block_size,
            });
        }
        let blocks = (len / self.block_size as usize) as u64;
        if block.saturating_add(blocks) > self.block_count() {
            return Err(RamError::OutOfRange { block, blocks });
        }
        let start = (block * self.block_size as u64) as usize;
        Ok(start..start + len)
    }

    fn bump(&self, write: bool) {
        let mut stats = self.stats.get();
        if write {
            stats.writes += 1;
        } else {
            stats.reads += 1;
        }
        self.stats.set(stats);
    }
}

impl BlockDevice for RamBlockDevice {
    type Error = RamError;

    fn block_size(&self) -> u32 {
        self.block_size
    }

    fn block_count(&self) -> u64 {
        (self.data.borrow().len() / self.block_size as usize) as u64
    }

    fn read_blocks(&self, block: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let range = self.range(block, buf.len())?;
        buf.copy_from_slice(&self.data.borrow()[range]);
        self.bump(false);
        Ok(())
    }

    fn write_blocks(&self, block: u64, buf: &[u8]) -> Result<(), Self::Error> {
        let range = self.range(block, buf.len())?;
        self.data.borrow_mut()[range].copy_from_slice(buf);
        self.bump(true);
        Ok(())
    }
}
