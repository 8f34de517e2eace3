use alloc::vec;
use alloc::vec::Vec;

use msc::BlockDevice;

use super::boot::BootSector;
use super::fs_info::{FsInfo, UNKNOWN};
use crate::{byte_device::ByteDevice, error::FatError};

pub const ENTRY_MASK: u32 = 0x0FFF_FFFF;
pub const END_OF_CHAIN: u32 = 0x0FFF_FFF8;
pub const END_OF_CHAIN_WRITE: u32 = 0x0FFF_FFFF;
pub const FREE: u32 = 0;
pub const FIRST_CLUSTER: u32 = 2;

const ENTRY_BYTES: u64 = 4;

struct Window {
    sector: Option<u64>,
    bytes: Vec<u8>,
    dirty: bool,
}

/// FAT access through a single sector window, with a small LRU of resolved chains.
pub struct Fat {
    read_offset: u64,
    write_offsets: Vec<u64>,
    sector_size: u64,
    max_cluster: u32,
    window: Window,
    cache: Vec<(u32, Vec<u32>)>,
    cache_capacity: usize,
}

impl Fat {
    pub fn new(boot: &BootSector, cache_capacity: usize) -> Self {
        let sector_size = boot.bytes_per_sector as u64;
        Self {
            read_offset: boot.fat_offset(boot.fat_to_read()),
            write_offsets: boot.fats_to_write().map(|i| boot.fat_offset(i)).collect(),
            sector_size,
            max_cluster: boot.max_cluster(),
            window: Window {
                sector: None,
                bytes: vec![0u8; sector_size as usize],
                dirty: false,
            },
            cache: Vec::new(),
            cache_capacity,
        }
    }

    pub fn max_cluster(&self) -> u32 {
        self.max_cluster
    }

    pub fn is_valid_cluster(&self, cluster: u32) -> bool {
        (FIRST_CLUSTER..=self.max_cluster).contains(&cluster)
    }

    fn locate(&self, cluster: u32) -> (u64, usize) {
        let byte = cluster as u64 * ENTRY_BYTES;
        (byte / self.sector_size, (byte % self.sector_size) as usize)
    }

    fn load<B: BlockDevice>(&mut self, dev: &mut ByteDevice<B>, sector: u64) -> Result<(), B::Error> {
        if self.window.sector == Some(sector) {
            return Ok(());
        }
        // The window being replaced may hold entries not yet on disk.
        self.flush(dev)?;
        dev.read(self.read_offset + sector * self.sector_size, &mut self.window.bytes)?;
        self.window.sector = Some(sector);
        Ok(())
    }

    pub fn flush<B: BlockDevice>(&mut self, dev: &mut ByteDevice<B>) -> Result<(), B::Error> {
        if !self.window.dirty {
            return Ok(());
        }
        if let Some(sector) = self.window.sector {
            for offset in &self.write_offsets {
                dev.write(offset + sector * self.sector_size, &self.window.bytes)?;
            }
        }
        self.window.dirty = false;
        Ok(())
    }

    pub fn entry<B: BlockDevice>(
        &mut self,
        dev: &mut ByteDevice<B>,
        cluster: u32,
    ) -> Result<u32, FatError<B::Error>> {
        if cluster > self.max_cluster {
            return Err(FatError::BadCluster(cluster));
        }
        let (sector, index) = self.locate(cluster);
        self.load(dev, sector)?;
        let raw = &self.window.bytes[index..index + 4];
        Ok(u32::from_le_bytes([raw[0], raw[1], raw[2], raw[3]]) & ENTRY_MASK)
    }

    fn set_entry<B: BlockDevice>(
        &mut self,
        dev: &mut ByteDevice<B>,
        cluster: u32,
        value: u32,
    ) -> Result<(), FatError<B::Error>> {
        if !self.is_valid_cluster(cluster) {
            return Err(FatError::BadCluster(cluster));
        }
        let (sector, index) = self.locate(cluster);
        self.load(dev, sector)?;
        let slot = &mut self.window.bytes[index..index + 4];
        let old = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
        let new = (old & !ENTRY_MASK) | (value & ENTRY_MASK);
        slot.copy_from_slice(&new.to_le_bytes());
        self.window.dirty = true;
        Ok(())
    }

    pub fn get_chain<B: BlockDevice>(
        &mut self,
        dev: &mut ByteDevice<B>,
        start: u32,
    ) -> Result<Vec<u32>, FatError<B::Error>> {
        if start == 0 {
            return Ok(Vec::new());
        }
        if let Some(chain) = self.cached(start) {
            return Ok(chain);
        }

        let mut chain = Vec::new();
        let mut cluster = start;
        loop {
            if !self.is_valid_cluster(cluster) {
                return Err(FatError::BadCluster(cluster));
            }
            if chain.len() > self.max_cluster as usize {
                return Err(FatError::ClusterChainTooLong);
            }
            chain.push(cluster);
            let next = self.entry(dev, cluster)?;
            if next >= END_OF_CHAIN {
                break;
            }
            cluster = next;
        }
        self.remember(start, &chain);
        Ok(chain)
    }

    /// Appends `n` free clusters to `chain`.
    ///
    /// Nothing is written if fewer than `n` clusters are free.
    pub fn alloc<B: BlockDevice>(
        &mut self,
        dev: &mut ByteDevice<B>,
        fs_info: &mut FsInfo,
        chain: &mut Vec<u32>,
        n: usize,
    ) -> Result<(), FatError<B::Error>> {
        if n == 0 {
            return Ok(());
        }

        let hint = fs_info.next_free().filter(|c| self.is_valid_cluster(*c)).unwrap_or(FIRST_CLUSTER);
        let mut found = Vec::with_capacity(n);
        for cluster in (hint..=self.max_cluster).chain(FIRST_CLUSTER..hint) {
            if self.entry(dev, cluster)? == FREE {
                found.push(cluster);
                if found.len() == n {
                    break;
                }
            }
        }
        if found.len() < n {
            log::warn!("fat32: alloc_failed wanted={} free={}", n, found.len());
            return Err(FatError::NoFreeCluster);
        }

        let old_start = chain.first().copied();
        if let Some(&tail) = chain.last() {
            self.set_entry(dev, tail, found[0])?;
        }
        for pair in found.windows(2) {
            self.set_entry(dev, pair[0], pair[1])?;
        }
        let last = found[found.len() - 1];
        self.set_entry(dev, last, END_OF_CHAIN_WRITE)?;
        self.flush(dev)?;

        chain.extend_from_slice(&found);
        if let Some(start) = old_start {
            self.forget(start);
        }
        self.remember(chain[0], chain);

        fs_info.next_free = if last < self.max_cluster { last + 1 } else { FIRST_CLUSTER };
        if fs_info.free_count != UNKNOWN {
            fs_info.free_count = fs_info.free_count.saturating_sub(n as u32);
        }
        fs_info.write(dev)?;

        log::debug!(
            "fat32: alloc clusters={} first={} chain_len={}",
            n,
            found[0],
            chain.len()
        );
        Ok(())
    }

    /// Releases the last `n` clusters of `chain`.
    pub fn free<B: BlockDevice>(
        &mut self,
        dev: &mut ByteDevice<B>,
        fs_info: &mut FsInfo,
        chain: &mut Vec<u32>,
        n: usize,
    ) -> Result<(), FatError<B::Error>> {
        if n > chain.len() {
            return Err(FatError::FreeExceedsChain {
                requested: n,
                len: chain.len(),
            });
        }
        if n == 0 {
            return Ok(());
        }

        let start = chain[0];
        let released = chain.split_off(chain.len() - n);
        for &cluster in &released {
            self.set_entry(dev, cluster, FREE)?;
        }
        if let Some(&tail) = chain.last() {
            self.set_entry(dev, tail, END_OF_CHAIN_WRITE)?;
        }
        self.flush(dev)?;

        self.forget(start);
        if !chain.is_empty() {
            self.remember(start, chain);
        }

        if let Some(&lowest) = released.iter().min() {
            // Point the hint back at the lowest hole so allocations stay packed.
            match fs_info.next_free() {
                Some(hint) if hint <= lowest && self.is_valid_cluster(hint) => {}
                _ => fs_info.next_free = lowest,
            }
        }
        if fs_info.free_count != UNKNOWN {
            fs_info.free_count = fs_info.free_count.saturating_add(n as u32);
        }
        fs_info.write(dev)?;

        log::debug!("fat32: free clusters={} chain_len={}", n, chain.len());
        Ok(())
    }

    pub fn count_free<B: BlockDevice>(
        &mut self,
        dev: &mut ByteDevice<B>,
    ) -> Result<u32, FatError<B::Error>> {
        let mut free = 0u32;
        for cluster in FIRST_CLUSTER..=self.max_cluster {
            if self.entry(dev, cluster)? == FREE {
                free += 1;
            }
        }
        Ok(free)
    }

    fn cached(&mut self, start: u32) -> Option<Vec<u32>> {
        let index = self.cache.iter().position(|(key, _)| *key == start)?;
        let hit = self.cache.remove(index);
        let chain = hit.1.clone();
        self.cache.push(hit);
        Some(chain)
    }

    fn remember(&mut self, start: u32, chain: &[u32]) {
        if self.cache_capacity == 0 {
            return;
        }
        self.forget(start);
        if self.cache.len() >= self.cache_capacity {
            self.cache.remove(0);
        }
        self.cache.push((start, chain.to_vec()));
    }

    fn forget(&mut self, start: u32) {
        self.cache.retain(|(key, _)| *key != start);
    }
}
