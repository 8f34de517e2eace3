use alloc::vec::Vec;

use super::{has_boot_signature, PartitionEntry, PartitionKind};

const TABLE_OFFSET: usize = 446;
const ENTRY_LEN: usize = 16;

fn kind_for(code: u8) -> PartitionKind {
    match code {
        0x0b | 0x0c | 0x1b | 0x1c => PartitionKind::Fat32,
        0x01 => PartitionKind::Fat12,
        0x04 | 0x06 | 0x0e => PartitionKind::Fat16,
        0x83 => PartitionKind::Linux,
        0x07 => PartitionKind::NtfsExfat,
        0xaf => PartitionKind::Hfs,
        other => PartitionKind::Other(other),
    }
}

/// Returns `None` when the sector carries no boot signature.
pub fn parse(sector: &[u8]) -> Option<Vec<PartitionEntry>> {
    if !has_boot_signature(sector) {
        return None;
    }

    let mut entries = Vec::new();
    for slot in 0..4 {
        let raw = &sector[TABLE_OFFSET + slot * ENTRY_LEN..TABLE_OFFSET + (slot + 1) * ENTRY_LEN];
        let code = raw[4];
        match code {
            0x00 => continue,
            0x05 | 0x0f => {
                log::warn!("mbr: extended partition skipped slot={}", slot);
                continue;
            }
            0xee => {
                log::debug!("mbr: protective entry slot={}", slot);
                continue;
            }
            _ => {}
        }
        let start = u32::from_le_bytes([raw[8], raw[9], raw[10], raw[11]]);
        let count = u32::from_le_bytes([raw[12], raw[13], raw[14], raw[15]]);
        if count == 0 {
            continue;
        }
        entries.push(PartitionEntry {
            kind: kind_for(code),
            start_block: start as u64,
            block_count: count as u64,
        });
    }
    Some(entries)
}
