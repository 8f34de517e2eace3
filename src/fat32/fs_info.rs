use msc::BlockDevice;

use crate::{byte_device::ByteDevice, error::FatError};

pub const LEAD_SIGNATURE: u32 = 0x4161_5252;
pub const STRUCT_SIGNATURE: u32 = 0x6141_7272;
pub const TRAIL_SIGNATURE: u32 = 0xAA55_0000;
pub const UNKNOWN: u32 = 0xFFFF_FFFF;

const STRUCT_OFFSET: usize = 484;
const FREE_COUNT_OFFSET: usize = 488;
const NEXT_FREE_OFFSET: usize = 492;
const TRAIL_OFFSET: usize = 508;
pub const FS_INFO_LEN: usize = 512;

fn u32_at(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

/// Free-space bookkeeping sector. Both counters may hold [`UNKNOWN`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FsInfo {
    offset: u64,
    pub free_count: u32,
    pub next_free: u32,
}

impl FsInfo {
    pub fn read<B: BlockDevice>(
        dev: &mut ByteDevice<B>,
        offset: u64,
    ) -> Result<Self, FatError<B::Error>> {
        let mut raw = [0u8; FS_INFO_LEN];
        dev.read(offset, &mut raw)?;
        Self::parse(offset, &raw)
    }

    pub fn parse<E>(offset: u64, raw: &[u8]) -> Result<Self, FatError<E>> {
        let lead = u32_at(raw, 0);
        let mid = u32_at(raw, STRUCT_OFFSET);
        let trail = u32_at(raw, TRAIL_OFFSET);
        if lead != LEAD_SIGNATURE || mid != STRUCT_SIGNATURE || trail != TRAIL_SIGNATURE {
            log::warn!(
                "fat32: fs_info_signature lead=0x{:08x} struct=0x{:08x} trail=0x{:08x}",
                lead,
                mid,
                trail
            );
            return Err(FatError::UnsupportedFileSystem);
        }
        Ok(Self {
            offset,
            free_count: u32_at(raw, FREE_COUNT_OFFSET),
            next_free: u32_at(raw, NEXT_FREE_OFFSET),
        })
    }

    /// Fresh sector contents with the given counters.
    pub fn encode(free_count: u32, next_free: u32) -> [u8; FS_INFO_LEN] {
        let mut raw = [0u8; FS_INFO_LEN];
        raw[..4].copy_from_slice(&LEAD_SIGNATURE.to_le_bytes());
        raw[STRUCT_OFFSET..STRUCT_OFFSET + 4].copy_from_slice(&STRUCT_SIGNATURE.to_le_bytes());
        raw[FREE_COUNT_OFFSET..FREE_COUNT_OFFSET + 4].copy_from_slice(&free_count.to_le_bytes());
        raw[NEXT_FREE_OFFSET..NEXT_FREE_OFFSET + 4].copy_from_slice(&next_free.to_le_bytes());
        raw[TRAIL_OFFSET..TRAIL_OFFSET + 4].copy_from_slice(&TRAIL_SIGNATURE.to_le_bytes());
        raw
    }

    pub fn free_count(&self) -> Option<u32> {
        (self.free_count != UNKNOWN).then_some(self.free_count)
    }

    pub fn next_free(&self) -> Option<u32> {
        (self.next_free != UNKNOWN).then_some(self.next_free)
    }

    pub fn write<B: BlockDevice>(&self, dev: &mut ByteDevice<B>) -> Result<(), B::Error> {
        let mut counters = [0u8; 8];
        counters[..4].copy_from_slice(&self.free_count.to_le_bytes());
        counters[4..].copy_from_slice(&self.next_free.to_le_bytes());
        dev.write(self.offset + FREE_COUNT_OFFSET as u64, &counters)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::RamBlockDevice;

    #[test]
    fn counters_persist() {
        let ram = RamBlockDevice::new(512, 4);
        ram.write_blocks(1, &FsInfo::encode(100, 7)).unwrap();
        let mut dev = ByteDevice::new(&ram).unwrap();

        let mut info = FsInfo::read(&mut dev, 512).unwrap();
        assert_eq!(info.free_count(), Some(100));
        assert_eq!(info.next_free(), Some(7));

        info.free_count = 99;
        info.next_free = 8;
        info.write(&mut dev).unwrap();
        assert_eq!(FsInfo::read(&mut dev, 512).unwrap(), info);
    }

    #[test]
    fn unknown_counters() {
        let info = FsInfo::parse::<()>(0, &FsInfo::encode(UNKNOWN, UNKNOWN)).unwrap();
        assert_eq!(info.free_count(), None);
        assert_eq!(info.next_free(), None);
    }

    #[test]
    fn bad_signature() {
        let mut raw = FsInfo::encode(1, 2);
        raw[0] = 0;
        assert!(matches!(
            FsInfo::parse::<()>(0, &raw),
            Err(FatError::UnsupportedFileSystem)
        ));
    }
}
