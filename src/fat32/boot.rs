use heapless::String;

use crate::error::FatError;
use crate::partition::has_boot_signature;

pub const BOOT_SECTOR_LEN: usize = 512;
pub const FS_TYPE_OFFSET: usize = 82;
pub const FS_TYPE: &[u8; 8] = b"FAT32   ";
pub const LABEL_OFFSET: usize = 71;

const MIRROR_DISABLED: u16 = 0x80;
const ACTIVE_FAT_MASK: u16 = 0x07;

fn u16_at(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

fn u32_at(raw: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([raw[offset], raw[offset + 1], raw[offset + 2], raw[offset + 3]])
}

/// Geometry of a FAT32 volume as recorded in its boot sector.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BootSector {
    pub bytes_per_sector: u16,
    pub sectors_per_cluster: u8,
    pub reserved_sectors: u16,
    pub fat_count: u8,
    pub total_sectors: u32,
    pub sectors_per_fat: u32,
    pub flags: u16,
    pub root_cluster: u32,
    pub fs_info_sector: u16,
    pub volume_label: String<11>,
}

impl BootSector {
    pub fn parse<E>(raw: &[u8]) -> Result<Self, FatError<E>> {
        if raw.len() < BOOT_SECTOR_LEN {
            return Err(FatError::InvalidBootSector);
        }
        if &raw[FS_TYPE_OFFSET..FS_TYPE_OFFSET + 8] != FS_TYPE {
            return Err(FatError::UnsupportedFileSystem);
        }
        if !has_boot_signature(raw) {
            return Err(FatError::InvalidBootSector);
        }

        let bytes_per_sector = u16_at(raw, 11);
        if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
            return Err(FatError::UnsupportedSectorSize(bytes_per_sector));
        }

        let sectors_per_cluster = raw[13];
        if sectors_per_cluster == 0 || !sectors_per_cluster.is_power_of_two() {
            return Err(FatError::UnsupportedSectorsPerCluster(sectors_per_cluster));
        }

        let reserved_sectors = u16_at(raw, 14);
        let fat_count = raw[16];
        let total_16 = u16_at(raw, 19) as u32;
        let total_sectors = if total_16 != 0 { total_16 } else { u32_at(raw, 32) };
        let sectors_per_fat = u32_at(raw, 36);
        let flags = u16_at(raw, 40);
        let root_cluster = u32_at(raw, 44);
        let fs_info_sector = u16_at(raw, 48);

        if fat_count == 0 || sectors_per_fat == 0 || reserved_sectors == 0 || root_cluster < 2 {
            return Err(FatError::InvalidBootSector);
        }
        let used = reserved_sectors as u64 + fat_count as u64 * sectors_per_fat as u64;
        if total_sectors as u64 <= used {
            return Err(FatError::InvalidBootSector);
        }

        let mut volume_label = String::new();
        for &b in raw[LABEL_OFFSET..LABEL_OFFSET + 11].iter() {
            let _ = volume_label.push(if b.is_ascii_graphic() || b == b' ' { b as char } else { '_' });
        }
        while volume_label.ends_with(' ') {
            volume_label.pop();
        }

        let boot = Self {
            bytes_per_sector,
            sectors_per_cluster,
            reserved_sectors,
            fat_count,
            total_sectors,
            sectors_per_fat,
            flags,
            root_cluster,
            fs_info_sector,
            volume_label,
        };
        if boot.root_cluster > boot.max_cluster() {
            return Err(FatError::InvalidBootSector);
        }
        Ok(boot)
    }

    pub fn cluster_size(&self) -> u32 {
        self.sectors_per_cluster as u32 * self.bytes_per_sector as u32
    }

    pub fn fat_offset(&self, index: u8) -> u64 {
        (self.reserved_sectors as u64 + index as u64 * self.sectors_per_fat as u64)
            * self.bytes_per_sector as u64
    }

    pub fn fat_len(&self) -> u64 {
        self.sectors_per_fat as u64 * self.bytes_per_sector as u64
    }

    pub fn data_area_offset(&self) -> u64 {
        self.fat_offset(self.fat_count)
    }

    pub fn cluster_offset(&self, cluster: u32) -> u64 {
        self.data_area_offset() + (cluster as u64 - 2) * self.cluster_size() as u64
    }

    pub fn fs_info_offset(&self) -> u64 {
        self.fs_info_sector as u64 * self.bytes_per_sector as u64
    }

    /// Number of data clusters, bounded by what the FAT can address.
    pub fn cluster_count(&self) -> u32 {
        let data_sectors = self.total_sectors as u64
            - (self.reserved_sectors as u64 + self.fat_count as u64 * self.sectors_per_fat as u64);
        let by_data = data_sectors / self.sectors_per_cluster as u64;
        let by_fat = (self.fat_len() / 4).saturating_sub(2);
        by_data.min(by_fat).min(0x0FFF_FFF5) as u32
    }

    pub fn max_cluster(&self) -> u32 {
        self.cluster_count() + 1
    }

    pub fn volume_bytes(&self) -> u64 {
        self.total_sectors as u64 * self.bytes_per_sector as u64
    }

    pub fn is_fat_mirrored(&self) -> bool {
        self.flags & MIRROR_DISABLED == 0
    }

    pub fn active_fat(&self) -> u8 {
        (self.flags & ACTIVE_FAT_MASK) as u8
    }

    pub fn fats_to_write(&self) -> core::ops::Range<u8> {
        if self.is_fat_mirrored() {
            0..self.fat_count
        } else {
            let active = self.active_fat().min(self.fat_count - 1);
            active..active + 1
        }
    }

    pub fn fat_to_read(&self) -> u8 {
        if self.is_fat_mirrored() {
            0
        } else {
            self.active_fat().min(self.fat_count - 1)
        }
    }
}
