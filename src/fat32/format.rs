use alloc::vec;

use msc::BlockDevice;

use super::boot::{BOOT_SECTOR_LEN, FS_TYPE, FS_TYPE_OFFSET, LABEL_OFFSET};
use super::entry::ShortEntry;
use super::fs_info::FsInfo;
use super::short_name::{ShortName, SHORT_NAME_LEN};
use super::table::{END_OF_CHAIN_WRITE, ENTRY_MASK};
use crate::{byte_device::ByteDevice, error::FatError};

const BACKUP_BOOT_SECTOR: u16 = 6;
const FS_INFO_SECTOR: u16 = 1;
const ROOT_CLUSTER: u32 = 2;
const MEDIA_FIXED: u8 = 0xF8;

#[derive(Clone, Debug)]
pub struct FormatOptions {
    pub label: heapless::String<11>,
    pub volume_id: u32,
    /// Derived from the volume size when `None`.
    pub sectors_per_cluster: Option<u8>,
    pub reserved_sectors: u16,
    pub fat_count: u8,
}

impl Default for FormatOptions {
    fn default() -> Self {
        let mut label = heapless::String::new();
        let _ = label.push_str("USBFAT");
        Self {
            label,
            volume_id: 0x5553_4246,
            sectors_per_cluster: None,
            reserved_sectors: 32,
            fat_count: 2,
        }
    }
}

fn default_cluster_bytes(volume_bytes: u64) -> u32 {
    const MIB: u64 = 1024 * 1024;
    match volume_bytes {
        b if b < 260 * MIB => 512,
        b if b < 8 * 1024 * MIB => 4096,
        b if b < 16 * 1024 * MIB => 8192,
        b if b < 32 * 1024 * MIB => 16384,
        _ => 32768,
    }
}

fn label_name(label: &str) -> [u8; SHORT_NAME_LEN] {
    let mut raw = [b' '; SHORT_NAME_LEN];
    for (slot, c) in raw.iter_mut().zip(label.chars()) {
        *slot = if c.is_ascii_graphic() || c == ' ' { c.to_ascii_uppercase() as u8 } else { b'_' };
    }
    raw
}

pub fn format_fat32<B: BlockDevice>(device: B, options: &FormatOptions) -> Result<(), FatError<B::Error>> {
    let bytes_per_sector = device.block_size();
    if !matches!(bytes_per_sector, 512 | 1024 | 2048 | 4096) {
        return Err(FatError::UnsupportedSectorSize(bytes_per_sector.min(u16::MAX as u32) as u16));
    }
    let total_sectors = device.block_count().min(u32::MAX as u64) as u32;
    let volume_bytes = total_sectors as u64 * bytes_per_sector as u64;

    let sectors_per_cluster = match options.sectors_per_cluster {
        Some(n) if n != 0 && n.is_power_of_two() => n,
        Some(n) => return Err(FatError::UnsupportedSectorsPerCluster(n)),
        None => (default_cluster_bytes(volume_bytes) / bytes_per_sector).clamp(1, 128) as u8,
    };
    let reserved = options.reserved_sectors.max(BACKUP_BOOT_SECTOR + 2) as u32;
    let fats = options.fat_count.max(1) as u32;
    let spc = sectors_per_cluster as u32;

    // Grow the FAT until it covers every cluster left after it.
    let mut sectors_per_fat = 1u32;
    let clusters = loop {
        let used = reserved + fats * sectors_per_fat;
        if total_sectors <= used + spc {
            return Err(FatError::VolumeTooSmall);
        }
        let clusters = (total_sectors - used) / spc;
        let needed = ((clusters as u64 + 2) * 4).div_ceil(bytes_per_sector as u64) as u32;
        if needed <= sectors_per_fat {
            break clusters;
        }
        sectors_per_fat = needed;
    };

    let mut boot = [0u8; BOOT_SECTOR_LEN];
    boot[..3].copy_from_slice(&[0xEB, 0x58, 0x90]);
    boot[3..11].copy_from_slice(b"USBFAT  ");
    boot[11..13].copy_from_slice(&(bytes_per_sector as u16).to_le_bytes());
    boot[13] = sectors_per_cluster;
    boot[14..16].copy_from_slice(&(reserved as u16).to_le_bytes());
    boot[16] = fats as u8;
    boot[21] = MEDIA_FIXED;
    boot[24..26].copy_from_slice(&63u16.to_le_bytes());
    boot[26..28].copy_from_slice(&255u16.to_le_bytes());
    boot[32..36].copy_from_slice(&total_sectors.to_le_bytes());
    boot[36..40].copy_from_slice(&sectors_per_fat.to_le_bytes());
    boot[44..48].copy_from_slice(&ROOT_CLUSTER.to_le_bytes());
    boot[48..50].copy_from_slice(&FS_INFO_SECTOR.to_le_bytes());
    boot[50..52].copy_from_slice(&BACKUP_BOOT_SECTOR.to_le_bytes());
    boot[64] = 0x80;
    boot[66] = 0x29;
    boot[67..71].copy_from_slice(&options.volume_id.to_le_bytes());
    let label = if options.label.is_empty() { *b"NO NAME    " } else { label_name(&options.label) };
    boot[LABEL_OFFSET..LABEL_OFFSET + SHORT_NAME_LEN].copy_from_slice(&label);
    boot[FS_TYPE_OFFSET..FS_TYPE_OFFSET + 8].copy_from_slice(FS_TYPE);
    boot[510] = 0x55;
    boot[511] = 0xAA;

    let mut dev = ByteDevice::new(device)?;
    let ss = bytes_per_sector as u64;

    let zeros = vec![0u8; bytes_per_sector as usize];
    for sector in 0..reserved as u64 + fats as u64 * sectors_per_fat as u64 {
        dev.write(sector * ss, &zeros)?;
    }

    dev.write(0, &boot)?;
    dev.write(BACKUP_BOOT_SECTOR as u64 * ss, &boot)?;
    let fs_info = FsInfo::encode(clusters - 1, ROOT_CLUSTER + 1);
    dev.write(FS_INFO_SECTOR as u64 * ss, &fs_info)?;
    dev.write((BACKUP_BOOT_SECTOR + FS_INFO_SECTOR) as u64 * ss, &fs_info)?;

    let mut reserved_entries = [0u8; 12];
    reserved_entries[..4].copy_from_slice(&(ENTRY_MASK & (0x0FFF_FF00 | MEDIA_FIXED as u32)).to_le_bytes());
    reserved_entries[4..8].copy_from_slice(&0xFFFF_FFFFu32.to_le_bytes());
    reserved_entries[8..].copy_from_slice(&END_OF_CHAIN_WRITE.to_le_bytes());
    for fat in 0..fats as u64 {
        dev.write((reserved as u64 + fat * sectors_per_fat as u64) * ss, &reserved_entries)?;
    }

    let root_offset = (reserved as u64 + fats as u64 * sectors_per_fat as u64) * ss;
    let cluster_bytes = spc as u64 * ss;
    for sector in 0..spc as u64 {
        dev.write(root_offset + sector * ss, &zeros)?;
    }
    if !options.label.is_empty() {
        let entry = ShortEntry::volume_label(ShortName::from_raw(label), chrono::NaiveDateTime::default());
        let mut raw = entry.encode();
        raw[22..26].fill(0);
        dev.write(root_offset, &raw)?;
    }

    log::info!(
        "fat32: formatted sectors={} cluster_bytes={} clusters={} fat_sectors={}",
        total_sectors,
        cluster_bytes,
        clusters,
        sectors_per_fat
    );
    Ok(())
}
