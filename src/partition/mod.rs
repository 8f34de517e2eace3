use alloc::vec::Vec;
use core::fmt;

use msc::BlockDevice;

use crate::{byte_device::ByteDevice, error::FatError};

pub mod gpt;
pub mod mbr;

const BOOT_SIGNATURE_OFFSET: usize = 510;
const FAT32_TYPE_OFFSET: usize = 82;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionKind {
    Fat12,
    Fat16,
    Fat32,
    NtfsExfat,
    Linux,
    Hfs,
    Other(u8),
    Gpt { type_guid: [u8; 16] },
    /// File system written directly at block 0, without a partition table.
    WholeDevice,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PartitionEntry {
    pub kind: PartitionKind,
    pub start_block: u64,
    pub block_count: u64,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PartitionScheme {
    Superfloppy,
    Gpt,
    Mbr,
}

impl PartitionScheme {
    fn read<B: BlockDevice>(
        self,
        bytes: &mut ByteDevice<B>,
    ) -> Result<Option<Vec<PartitionEntry>>, FatError<B::Error>> {
        match self {
            PartitionScheme::Superfloppy => read_superfloppy(bytes),
            PartitionScheme::Gpt => gpt::read(bytes),
            PartitionScheme::Mbr => {
                let mut sector = [0u8; 512];
                bytes.read(0, &mut sector)?;
                Ok(mbr::parse(&sector))
            }
        }
    }
}

/// Tries each scheme in order and returns the entries of the first that matches.
pub fn discover<B: BlockDevice>(
    device: &B,
    schemes: &[PartitionScheme],
) -> Result<Vec<PartitionEntry>, FatError<B::Error>> {
    let mut bytes = ByteDevice::new(device)?;
    for scheme in schemes {
        match scheme.read(&mut bytes)? {
            Some(entries) if !entries.is_empty() => {
                log::info!("partition: table scheme={:?} entries={}", scheme, entries.len());
                return Ok(entries);
            }
            _ => log::debug!("partition: no_match scheme={:?}", scheme),
        }
    }
    Err(FatError::NoPartitionTable)
}

fn read_superfloppy<B: BlockDevice>(
    bytes: &mut ByteDevice<B>,
) -> Result<Option<Vec<PartitionEntry>>, FatError<B::Error>> {
    let mut sector = [0u8; 512];
    bytes.read(0, &mut sector)?;
    if !has_boot_signature(&sector) || &sector[FAT32_TYPE_OFFSET..FAT32_TYPE_OFFSET + 8] != b"FAT32   " {
        return Ok(None);
    }
    let block_count = bytes.device().block_count();
    Ok(Some(alloc::vec![PartitionEntry {
        kind: PartitionKind::WholeDevice,
        start_block: 0,
        block_count,
    }]))
}

pub(crate) fn has_boot_signature(sector: &[u8]) -> bool {
    sector.len() >= 512 && sector[BOOT_SIGNATURE_OFFSET] == 0x55 && sector[BOOT_SIGNATURE_OFFSET + 1] == 0xAA
}

/// A window of a block device, addressed from the partition start.
pub struct PartitionDevice<B: BlockDevice> {
    inner: B,
    start_block: u64,
    block_count: u64,
}

impl<B: BlockDevice> PartitionDevice<B> {
    pub fn new(inner: B, entry: &PartitionEntry) -> Self {
        let available = inner.block_count().saturating_sub(entry.start_block);
        Self {
            inner,
            start_block: entry.start_block,
            block_count: entry.block_count.min(available),
        }
    }

    pub fn start_block(&self) -> u64 {
        self.start_block
    }

    pub fn into_inner(self) -> B {
        self.inner
    }
}

impl<B: BlockDevice> PartitionDevice<B> {
    fn check_range(&self, block: u64, len: usize) -> Result<u64, PartitionError<B::Error>> {
        let block_size = self.inner.block_size() as usize;
        if block_size == 0 || len % block_size != 0 {
            return Err(PartitionError::InvalidLength { len, block_size });
        }
        let blocks = (len / block_size) as u64;
        match block.checked_add(blocks) {
            Some(end) if end <= self.block_count => Ok(self.start_block + block),
            _ => Err(PartitionError::OutOfRange {
                block,
                blocks,
                block_count: self.block_count,
            }),
        }
    }
}

impl<B: BlockDevice> BlockDevice for PartitionDevice<B> {
    type Error = PartitionError<B::Error>;

    fn block_size(&self) -> u32 {
        self.inner.block_size()
    }

    fn block_count(&self) -> u64 {
        self.block_count
    }

    fn read_blocks(&self, block: u64, buf: &mut [u8]) -> Result<(), Self::Error> {
        let at = self.check_range(block, buf.len())?;
        Ok(self.inner.read_blocks(at, buf)?)
    }

    fn write_blocks(&self, block: u64, buf: &[u8]) -> Result<(), Self::Error> {
        let at = self.check_range(block, buf.len())?;
        Ok(self.inner.write_blocks(at, buf)?)
    }
}

#[derive(Debug)]
pub enum PartitionError<E> {
    Device(E),
    InvalidLength { len: usize, block_size: usize },
    /// Request would reach past the end of the partition.
    OutOfRange { block: u64, blocks: u64, block_count: u64 },
}

impl<E> From<E> for PartitionError<E> {
    fn from(value: E) -> Self {
        Self::Device(value)
    }
}

impl<E: fmt::Debug> fmt::Display for PartitionError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PartitionError::Device(err) => write!(f, "device error: {:?}", err),
            PartitionError::InvalidLength { len, block_size } => {
                write!(f, "length {} is not a multiple of block size {}", len, block_size)
            }
            PartitionError::OutOfRange {
                block,
                blocks,
                block_count,
            } => write!(
                f,
                "blocks {}..{} outside partition of {} blocks",
                block,
                block.saturating_add(*blocks),
                block_count
            ),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for PartitionError<E> {}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ram::RamBlockDevice;

    #[test]
    fn superfloppy_is_whole_device() {
        let ram = RamBlockDevice::new(512, 16);
        let mut sector = [0u8; 512];
        sector[82..90].copy_from_slice(b"FAT32   ");
        sector[510] = 0x55;
        sector[511] = 0xAA;
        ram.write_blocks(0, &sector).unwrap();

        let entries = discover(&ram, &[PartitionScheme::Superfloppy, PartitionScheme::Mbr]).unwrap();
        assert_eq!(
            entries,
            alloc::vec![PartitionEntry {
                kind: PartitionKind::WholeDevice,
                start_block: 0,
                block_count: 16,
            }]
        );
    }

    #[test]
    fn blank_device_has_no_table() {
        let ram = RamBlockDevice::new(512, 16);
        let err = discover(&ram, &[PartitionScheme::Superfloppy, PartitionScheme::Gpt, PartitionScheme::Mbr])
            .unwrap_err();
        assert!(matches!(err, FatError::NoPartitionTable));
    }

    #[test]
    fn partition_device_offsets_blocks() {
        let ram = RamBlockDevice::new(512, 16);
        let entry = PartitionEntry {
            kind: PartitionKind::Fat32,
            start_block: 4,
            block_count: 100,
        };
        let part = PartitionDevice::new(&ram, &entry);
        assert_eq!(part.block_count(), 12);
        part.write_blocks(1, &[9u8; 512]).unwrap();
        let mut raw = [0u8; 512];
        ram.read_blocks(5, &mut raw).unwrap();
        assert!(raw.iter().all(|&b| b == 9));
    }

    fn indexed_disk(blocks: u64) -> RamBlockDevice {
        let ram = RamBlockDevice::new(512, blocks);
        for block in 0..blocks {
            ram.write_blocks(block, &[block as u8; 512]).unwrap();
        }
        ram
    }

    #[test]
    fn partition_device_rejects_io_past_its_end() {
        let ram = indexed_disk(16);
        let entry = PartitionEntry {
            kind: PartitionKind::Fat32,
            start_block: 2,
            block_count: 4,
        };
        let part = PartitionDevice::new(&ram, &entry);

        let err = part.write_blocks(5, &[0xEEu8; 512]).unwrap_err();
        assert!(matches!(err, PartitionError::OutOfRange { block: 5, blocks: 1, block_count: 4 }));
        assert!(matches!(
            part.write_blocks(3, &[0xEEu8; 1024]),
            Err(PartitionError::OutOfRange { .. })
        ));
        let mut two = [0u8; 1024];
        assert!(matches!(part.read_blocks(3, &mut two), Err(PartitionError::OutOfRange { .. })));
        assert!(matches!(
            part.read_blocks(u64::MAX, &mut two),
            Err(PartitionError::OutOfRange { .. })
        ));
        assert!(matches!(
            part.read_blocks(0, &mut [0u8; 100]),
            Err(PartitionError::InvalidLength { len: 100, block_size: 512 })
        ));

        let mut raw = [0u8; 512];
        for block in 6..8 {
            ram.read_blocks(block, &mut raw).unwrap();
            assert!(raw.iter().all(|&b| b == block as u8));
        }

        part.read_blocks(3, &mut raw).unwrap();
        assert!(raw.iter().all(|&b| b == 5));
    }

    #[test]
    fn mbr_entry_past_device_end_is_clamped() {
        let ram = RamBlockDevice::new(512, 32);
        let mut sector = [0u8; 512];
        sector[446 + 4] = 0x0c;
        sector[446 + 8..446 + 12].copy_from_slice(&8u32.to_le_bytes());
        sector[446 + 12..446 + 16].copy_from_slice(&u32::MAX.to_le_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
        ram.write_blocks(0, &sector).unwrap();

        let entries = discover(&ram, &[PartitionScheme::Mbr]).unwrap();
        assert_eq!(entries[0].block_count, u32::MAX as u64);
        let part = PartitionDevice::new(&ram, &entries[0]);
        assert_eq!(part.block_count(), 24);
        assert!(part.write_blocks(23, &[1u8; 512]).is_ok());
        assert!(matches!(part.write_blocks(24, &[1u8; 512]), Err(PartitionError::OutOfRange { .. })));

        let beyond = PartitionEntry {
            kind: PartitionKind::Fat32,
            start_block: 100,
            block_count: 8,
        };
        let empty = PartitionDevice::new(&ram, &beyond);
        assert_eq!(empty.block_count(), 0);
        assert!(empty.read_blocks(0, &mut [0u8; 512]).is_err());
    }

    #[test]
    fn protective_mbr_alone_is_no_table() {
        let ram = RamBlockDevice::new(512, 64);
        let mut sector = [0u8; 512];
        sector[446 + 4] = 0xee;
        sector[446 + 8..446 + 12].copy_from_slice(&1u32.to_le_bytes());
        sector[446 + 12..446 + 16].copy_from_slice(&63u32.to_le_bytes());
        sector[510] = 0x55;
        sector[511] = 0xAA;
        ram.write_blocks(0, &sector).unwrap();

        let err = discover(&ram, &[PartitionScheme::Gpt, PartitionScheme::Mbr]).unwrap_err();
        assert!(matches!(err, FatError::NoPartitionTable));
    }

    #[test]
    fn bad_gpt_signature_falls_back_to_superfloppy() {
        let ram = RamBlockDevice::new(512, 64);
        let mut boot = [0u8; 512];
        boot[82..90].copy_from_slice(b"FAT32   ");
        boot[510] = 0x55;
        boot[511] = 0xAA;
        ram.write_blocks(0, &boot).unwrap();
        let mut header = [0u8; 512];
        header[..8].copy_from_slice(b"EFI PARX");
        header[72..80].copy_from_slice(&2u64.to_le_bytes());
        header[80..84].copy_from_slice(&4u32.to_le_bytes());
        header[84..88].copy_from_slice(&128u32.to_le_bytes());
        ram.write_blocks(1, &header).unwrap();

        let entries = discover(
            &ram,
            &[PartitionScheme::Gpt, PartitionScheme::Mbr, PartitionScheme::Superfloppy],
        )
        .unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].kind, PartitionKind::WholeDevice);
        assert_eq!(entries[0].block_count, 64);
    }
}
