use chrono::{NaiveDate, NaiveDateTime};

use super::lfn::{Fragment, LFN_ATTRIBUTES};
use super::short_name::{ShortName, SHORT_NAME_LEN};
use super::time;

pub const ENTRY_LEN: usize = 32;

pub const ATTR_READ_ONLY: u8 = 0x01;
pub const ATTR_HIDDEN: u8 = 0x02;
pub const ATTR_SYSTEM: u8 = 0x04;
pub const ATTR_VOLUME_ID: u8 = 0x08;
pub const ATTR_DIRECTORY: u8 = 0x10;
pub const ATTR_ARCHIVE: u8 = 0x20;

pub const LOWER_BASE: u8 = 0x08;
pub const LOWER_EXT: u8 = 0x10;

const END_MARKER: u8 = 0x00;
const DELETED_MARKER: u8 = 0xE5;
const KANJI_E5: u8 = 0x05;

fn u16_at(raw: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([raw[offset], raw[offset + 1]])
}

/// The 32-byte 8.3 directory entry.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ShortEntry {
    pub name: ShortName,
    pub attributes: u8,
    pub case_flags: u8,
    pub created_tenths: u8,
    pub created_time: u16,
    pub created_date: u16,
    pub accessed_date: u16,
    pub modified_time: u16,
    pub modified_date: u16,
    pub start_cluster: u32,
    pub file_size: u32,
}

impl ShortEntry {
    pub fn new(name: ShortName, attributes: u8, start_cluster: u32, now: NaiveDateTime) -> Self {
        let (date, time_of_day) = time::encode(now);
        Self {
            name,
            attributes,
            case_flags: 0,
            created_tenths: time::encode_tenths(now.time()),
            created_time: time_of_day,
            created_date: date,
            accessed_date: date,
            modified_time: time_of_day,
            modified_date: date,
            start_cluster,
            file_size: 0,
        }
    }

    pub fn volume_label(name: ShortName, now: NaiveDateTime) -> Self {
        let mut entry = Self::new(name, ATTR_VOLUME_ID, 0, now);
        entry.created_tenths = 0;
        entry.created_time = 0;
        entry.created_date = 0;
        entry.accessed_date = 0;
        entry
    }

    pub fn decode(raw: &[u8]) -> Self {
        let mut name = [0u8; SHORT_NAME_LEN];
        name.copy_from_slice(&raw[..SHORT_NAME_LEN]);
        if name[0] == KANJI_E5 {
            name[0] = DELETED_MARKER;
        }
        let high = u16_at(raw, 20) as u32;
        let low = u16_at(raw, 26) as u32;
        Self {
            name: ShortName::from_raw(name),
            attributes: raw[11],
            case_flags: raw[12],
            created_tenths: raw[13],
            created_time: u16_at(raw, 14),
            created_date: u16_at(raw, 16),
            accessed_date: u16_at(raw, 18),
            modified_time: u16_at(raw, 22),
            modified_date: u16_at(raw, 24),
            start_cluster: (high << 16) | low,
            file_size: u32::from_le_bytes([raw[28], raw[29], raw[30], raw[31]]),
        }
    }

    pub fn encode(&self) -> [u8; ENTRY_LEN] {
        let mut raw = [0u8; ENTRY_LEN];
        raw[..SHORT_NAME_LEN].copy_from_slice(self.name.raw());
        if raw[0] == DELETED_MARKER {
            raw[0] = KANJI_E5;
        }
        raw[11] = self.attributes;
        raw[12] = self.case_flags;
        raw[13] = self.created_tenths;
        raw[14..16].copy_from_slice(&self.created_time.to_le_bytes());
        raw[16..18].copy_from_slice(&self.created_date.to_le_bytes());
        raw[18..20].copy_from_slice(&self.accessed_date.to_le_bytes());
        raw[20..22].copy_from_slice(&((self.start_cluster >> 16) as u16).to_le_bytes());
        raw[22..24].copy_from_slice(&self.modified_time.to_le_bytes());
        raw[24..26].copy_from_slice(&self.modified_date.to_le_bytes());
        raw[26..28].copy_from_slice(&(self.start_cluster as u16).to_le_bytes());
        raw[28..32].copy_from_slice(&self.file_size.to_le_bytes());
        raw
    }

    pub fn is_directory(&self) -> bool {
        self.attributes & ATTR_DIRECTORY != 0
    }

    pub fn display_name(&self) -> alloc::string::String {
        self.name.to_text(
            self.case_flags & LOWER_BASE != 0,
            self.case_flags & LOWER_EXT != 0,
        )
    }

    pub fn created(&self) -> Option<NaiveDateTime> {
        time::decode(self.created_date, self.created_time, self.created_tenths)
    }

    pub fn modified(&self) -> Option<NaiveDateTime> {
        time::decode(self.modified_date, self.modified_time, 0)
    }

    pub fn accessed(&self) -> Option<NaiveDate> {
        time::decode_date(self.accessed_date)
    }

    pub fn touch_modified(&mut self, now: NaiveDateTime) {
        let (date, time_of_day) = time::encode(now);
        self.modified_date = date;
        self.modified_time = time_of_day;
        self.accessed_date = date;
        self.attributes |= ATTR_ARCHIVE;
    }

    pub fn touch_accessed(&mut self, now: NaiveDateTime) {
        self.accessed_date = time::encode_date(now.date());
    }

    /// Copies every timestamp of `other` into this entry.
    pub fn copy_times(&mut self, other: &ShortEntry) {
        self.created_tenths = other.created_tenths;
        self.created_time = other.created_time;
        self.created_date = other.created_date;
        self.accessed_date = other.accessed_date;
        self.modified_time = other.modified_time;
        self.modified_date = other.modified_date;
    }
}

/// What one 32-byte directory slot holds.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Slot {
    End,
    Deleted,
    Lfn(Fragment),
    VolumeLabel(ShortEntry),
    Short(ShortEntry),
}

impl Slot {
    pub fn classify(raw: &[u8]) -> Self {
        match raw[0] {
            END_MARKER => Slot::End,
            DELETED_MARKER => Slot::Deleted,
            _ if raw[11] & 0x3F == LFN_ATTRIBUTES => Slot::Lfn(Fragment::decode(raw)),
            _ if raw[11] & (ATTR_VOLUME_ID | ATTR_DIRECTORY) == ATTR_VOLUME_ID => {
                Slot::VolumeLabel(ShortEntry::decode(raw))
            }
            _ => Slot::Short(ShortEntry::decode(raw)),
        }
    }
}
