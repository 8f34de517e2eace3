use alloc::vec;
use alloc::vec::Vec;

use msc::BlockDevice;

use super::{PartitionEntry, PartitionKind};
use crate::{byte_device::ByteDevice, error::FatError};

const SIGNATURE: &[u8; 8] = b"EFI PART";
const HEADER_LEN: usize = 92;
const MAX_ENTRIES: u32 = 128;
const MIN_ENTRY_SIZE: u32 = 128;
const MAX_ENTRY_SIZE: u32 = 4096;

fn u32_at(buf: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([buf[offset], buf[offset + 1], buf[offset + 2], buf[offset + 3]])
}

fn u64_at(buf: &[u8], offset: usize) -> u64 {
    let mut raw = [0u8; 8];
    raw.copy_from_slice(&buf[offset..offset + 8]);
    u64::from_le_bytes(raw)
}

pub fn read<B: BlockDevice>(
    bytes: &mut ByteDevice<B>,
) -> Result<Option<Vec<PartitionEntry>>, FatError<B::Error>> {
    let block_size = bytes.block_size() as u64;
    if bytes.len() < block_size * 2 {
        return Ok(None);
    }

    let mut header = [0u8; HEADER_LEN];
    bytes.read(block_size, &mut header)?;
    if &header[..8] != SIGNATURE {
        return Ok(None);
    }

    let entries_lba = u64_at(&header, 72);
    let count = u32_at(&header, 80).min(MAX_ENTRIES);
    let entry_size = u32_at(&header, 84);
    if !(MIN_ENTRY_SIZE..=MAX_ENTRY_SIZE).contains(&entry_size) || entry_size % 8 != 0 {
        log::warn!("gpt: bad entry size={}", entry_size);
        return Ok(None);
    }

    // The whole table has to sit inside the device.
    let table = entries_lba
        .checked_mul(block_size)
        .and_then(|start| Some((start, start.checked_add(count as u64 * entry_size as u64)?)));
    let Some((table_start, table_end)) = table.filter(|&(_, end)| end <= bytes.len()) else {
        log::warn!("gpt: entry table out of range lba={} count={}", entries_lba, count);
        return Ok(None);
    };

    let mut raw = vec![0u8; entry_size as usize];
    let mut entries = Vec::new();
    let mut offset = table_start;
    while offset < table_end {
        bytes.read(offset, &mut raw)?;
        if let Some(entry) = parse_entry(&raw) {
            entries.push(entry);
        }
        offset += entry_size as u64;
    }
    Ok(Some(entries))
}

fn parse_entry(raw: &[u8]) -> Option<PartitionEntry> {
    let mut type_guid = [0u8; 16];
    type_guid.copy_from_slice(&raw[..16]);
    if type_guid.iter().all(|&b| b == 0) {
        return None;
    }
    let first = u64_at(raw, 32);
    let last = u64_at(raw, 40);
    let block_count = last.checked_sub(first)?.checked_add(1)?;
    Some(PartitionEntry {
        kind: PartitionKind::Gpt { type_guid },
        start_block: first,
        block_count,
    })
}
