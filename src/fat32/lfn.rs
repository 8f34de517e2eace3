use alloc::string::String;
use alloc::vec::Vec;

use super::entry::ENTRY_LEN;

pub const LFN_ATTRIBUTES: u8 = 0x0F;
pub const LAST_FRAGMENT: u8 = 0x40;
pub const UNITS_PER_FRAGMENT: usize = 13;
pub const MAX_UNITS: usize = 255;

const ORDINAL_MASK: u8 = 0x1F;
const ATTR_OFFSET: usize = 11;
const CHECKSUM_OFFSET: usize = 13;
const UNIT_OFFSETS: [usize; UNITS_PER_FRAGMENT] = [1, 3, 5, 7, 9, 14, 16, 18, 20, 22, 24, 28, 30];

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Fragment {
    pub ordinal: u8,
    pub last: bool,
    pub checksum: u8,
    pub units: [u16; UNITS_PER_FRAGMENT],
}

impl Fragment {
    pub fn decode(raw: &[u8]) -> Self {
        let mut units = [0u16; UNITS_PER_FRAGMENT];
        for (unit, &offset) in units.iter_mut().zip(UNIT_OFFSETS.iter()) {
            *unit = u16::from_le_bytes([raw[offset], raw[offset + 1]]);
        }
        Self {
            ordinal: raw[0] & ORDINAL_MASK,
            last: raw[0] & LAST_FRAGMENT != 0,
            checksum: raw[CHECKSUM_OFFSET],
            units,
        }
    }

    pub fn encode(&self) -> [u8; ENTRY_LEN] {
        let mut raw = [0u8; ENTRY_LEN];
        raw[0] = self.ordinal | if self.last { LAST_FRAGMENT } else { 0 };
        raw[ATTR_OFFSET] = LFN_ATTRIBUTES;
        raw[CHECKSUM_OFFSET] = self.checksum;
        for (unit, &offset) in self.units.iter().zip(UNIT_OFFSETS.iter()) {
            raw[offset..offset + 2].copy_from_slice(&unit.to_le_bytes());
        }
        raw
    }
}

pub fn unit_len(name: &str) -> usize {
    name.encode_utf16().count()
}

/// Fragments for `name` in on-disk order, highest ordinal first.
///
/// Returns `None` once the name is longer than [`MAX_UNITS`].
pub fn split(name: &str, checksum: u8) -> Option<Vec<Fragment>> {
    let units: Vec<u16> = name.encode_utf16().collect();
    if units.is_empty() || units.len() > MAX_UNITS {
        return None;
    }

    let count = units.len().div_ceil(UNITS_PER_FRAGMENT);
    let mut fragments = Vec::with_capacity(count);
    for (index, chunk) in units.chunks(UNITS_PER_FRAGMENT).enumerate() {
        let mut padded = [0xFFFFu16; UNITS_PER_FRAGMENT];
        padded[..chunk.len()].copy_from_slice(chunk);
        if chunk.len() < UNITS_PER_FRAGMENT {
            padded[chunk.len()] = 0x0000;
        }
        fragments.push(Fragment {
            ordinal: index as u8 + 1,
            last: index + 1 == count,
            checksum,
            units: padded,
        });
    }
    fragments.reverse();
    Some(fragments)
}

pub fn assemble(fragments: &[Fragment], checksum: u8) -> Option<String> {
    let first = fragments.first()?;
    if !first.last || first.ordinal as usize != fragments.len() {
        return None;
    }
    let mut units = Vec::with_capacity(fragments.len() * UNITS_PER_FRAGMENT);
    for (position, fragment) in fragments.iter().rev().enumerate() {
        if fragment.ordinal as usize != position + 1 || fragment.checksum != checksum {
            return None;
        }
        units.extend_from_slice(&fragment.units);
    }
    if let Some(end) = units.iter().position(|&u| u == 0) {
        units.truncate(end);
    }
    Some(
        char::decode_utf16(units.iter().copied())
            .map(|c| c.unwrap_or(char::REPLACEMENT_CHARACTER))
            .collect(),
    )
}
