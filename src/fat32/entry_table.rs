use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::entry::{ShortEntry, Slot, ENTRY_LEN};
use super::lfn::{self, Fragment};
use super::short_name::ShortName;

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EntryId(pub(crate) u64);

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Record {
    pub id: EntryId,
    pub long_name: Option<String>,
    pub short: ShortEntry,
}

impl Record {
    pub fn name(&self) -> String {
        match &self.long_name {
            Some(name) => name.clone(),
            None => self.short.display_name(),
        }
    }

    pub fn is_dot_entry(&self) -> bool {
        self.short.name.is_dot_entry()
    }

    fn slot_count(&self) -> usize {
        1 + self
            .long_name
            .as_deref()
            .map_or(0, |name| lfn::unit_len(name).div_ceil(lfn::UNITS_PER_FRAGMENT))
    }
}

pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// Records of one directory in on-disk order, with name and short-name indices.
///
/// Every mutation goes through [`EntryTable::mutate`], which rebuilds both
/// indices from the record list.
#[derive(Debug, Default)]
pub struct EntryTable {
    label: Option<ShortEntry>,
    records: Vec<Record>,
    by_name: BTreeMap<String, usize>,
    by_short: BTreeMap<ShortName, usize>,
}

impl EntryTable {
    pub fn parse(bytes: &[u8], mut next_id: impl FnMut() -> EntryId) -> Self {
        let mut table = Self::default();
        let mut pending: Vec<Fragment> = Vec::new();

        for raw in bytes.chunks_exact(ENTRY_LEN) {
            match Slot::classify(raw) {
                Slot::End => break,
                Slot::Deleted => pending.clear(),
                Slot::Lfn(fragment) => {
                    if fragment.last {
                        pending.clear();
                    }
                    pending.push(fragment);
                }
                Slot::VolumeLabel(entry) => {
                    pending.clear();
                    if table.label.is_none() {
                        table.label = Some(entry);
                    }
                }
                Slot::Short(short) => {
                    let long_name = lfn::assemble(&pending, short.name.checksum());
                    if long_name.is_none() && !pending.is_empty() {
                        log::debug!("fat32: orphan_lfn short={:?}", short.name);
                    }
                    pending.clear();
                    table.records.push(Record {
                        id: next_id(),
                        long_name,
                        short,
                    });
                }
            }
        }
        table.reindex();
        table
    }

    /// Encoded entries: the volume label first, then each record's fragments and short entry.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        if let Some(label) = &self.label {
            out.extend_from_slice(&label.encode());
        }
        for record in &self.records {
            if let Some(fragments) = record
                .long_name
                .as_deref()
                .and_then(|name| lfn::split(name, record.short.name.checksum()))
            {
                for fragment in fragments {
                    out.extend_from_slice(&fragment.encode());
                }
            }
            out.extend_from_slice(&record.short.encode());
        }
        out
    }

    pub fn encoded_len(&self) -> usize {
        let slots: usize = self.records.iter().map(Record::slot_count).sum();
        (slots + usize::from(self.label.is_some())) * ENTRY_LEN
    }

    pub fn label(&self) -> Option<&ShortEntry> {
        self.label.as_ref()
    }

    pub fn set_label(&mut self, label: Option<ShortEntry>) {
        self.label = label;
    }

    pub fn records(&self) -> &[Record] {
        &self.records
    }

    pub fn visible(&self) -> impl Iterator<Item = &Record> {
        self.records.iter().filter(|r| !r.is_dot_entry())
    }

    pub fn find_name(&self, name: &str) -> Option<&Record> {
        self.by_name.get(&name_key(name)).map(|&i| &self.records[i])
    }

    pub fn contains_short(&self, name: &ShortName) -> bool {
        self.by_short.contains_key(name)
    }

    pub fn get(&self, id: EntryId) -> Option<&Record> {
        self.records.iter().find(|r| r.id == id)
    }

    pub fn get_mut(&mut self, id: EntryId) -> Option<&mut Record> {
        self.records.iter_mut().find(|r| r.id == id)
    }

    pub fn mutate<R>(&mut self, f: impl FnOnce(&mut Vec<Record>) -> R) -> R {
        let result = f(&mut self.records);
        self.reindex();
        result
    }

    pub fn insert(&mut self, record: Record) {
        self.mutate(|records| records.push(record));
    }

    pub fn remove(&mut self, id: EntryId) -> Option<Record> {
        self.mutate(|records| {
            let index = records.iter().position(|r| r.id == id)?;
            Some(records.remove(index))
        })
    }

    fn reindex(&mut self) {
        self.by_name.clear();
        self.by_short.clear();
        for (index, record) in self.records.iter().enumerate() {
            if !record.is_dot_entry() {
                self.by_name.insert(name_key(&record.name()), index);
            }
            self.by_short.insert(record.short.name, index);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fat32::entry::{ATTR_ARCHIVE, ATTR_DIRECTORY};
    use alloc::string::ToString;
    use chrono::NaiveDate;

    fn ids() -> impl FnMut() -> EntryId {
        let mut next = 0;
        move || {
            next += 1;
            EntryId(next)
        }
    }

    fn record(id: u64, long: &str, short: &[u8; 11], attributes: u8) -> Record {
        let now = NaiveDate::from_ymd_opt(2022, 2, 2)
            .unwrap()
            .and_hms_opt(2, 2, 2)
            .unwrap();
        Record {
            id: EntryId(id),
            long_name: Some(long.to_string()),
            short: ShortEntry::new(ShortName::from_raw(*short), attributes, 3, now),
        }
    }

    #[test]
    fn serialized_table_parses_back() {
        let mut table = EntryTable::default();
        table.insert(record(1, "Quarterly Report.xlsx", b"QU0000~0XLS", ATTR_ARCHIVE));
        table.insert(record(2, "photos", b"PH0000~0   ", ATTR_DIRECTORY));

        let bytes = table.serialize();
        assert_eq!(bytes.len(), table.encoded_len());
        assert_eq!(bytes.len(), (2 + 1 + 1 + 1) * ENTRY_LEN);

        let parsed = EntryTable::parse(&bytes, ids());
        let names: Vec<_> = parsed.records().iter().map(Record::name).collect();
        assert_eq!(names, ["Quarterly Report.xlsx", "photos"]);
        assert!(parsed.find_name("QUARTERLY report.XLSX").is_some());
        assert!(parsed.contains_short(&ShortName::from_raw(*b"PH0000~0   ")));
    }

    #[test]
    fn dot_entries_are_hidden_from_listing_and_names() {
        let mut table = EntryTable::default();
        let mut dot = record(1, "", b".          ", ATTR_DIRECTORY);
        dot.long_name = None;
        table.insert(dot);
        table.insert(record(2, "child", b"CH0000~0   ", ATTR_ARCHIVE));

        assert_eq!(table.visible().count(), 1);
        assert!(table.find_name(".").is_none());
        assert!(table.contains_short(&ShortName::DOT));
    }

    #[test]
    fn removal_keeps_indices_in_step() {
        let mut table = EntryTable::default();
        table.insert(record(1, "a.txt", b"A_0000~0TXT", ATTR_ARCHIVE));
        table.insert(record(2, "b.txt", b"B_0000~0TXT", ATTR_ARCHIVE));
        table.insert(record(3, "c.txt", b"C_0000~0TXT", ATTR_ARCHIVE));

        assert_eq!(table.remove(EntryId(1)).map(|r| r.id), Some(EntryId(1)));
        assert_eq!(table.find_name("c.txt").map(|r| r.id), Some(EntryId(3)));
        assert!(!table.contains_short(&ShortName::from_raw(*b"A_0000~0TXT")));
        assert!(table.remove(EntryId(1)).is_none());
    }

    #[test]
    fn deleted_slots_and_stale_fragments_are_skipped() {
        let mut table = EntryTable::default();
        table.insert(record(1, "kept name.txt", b"KE0000~0TXT", ATTR_ARCHIVE));
        let mut bytes = alloc::vec![0u8; ENTRY_LEN];
        bytes[0] = 0xE5;
        bytes.extend_from_slice(&table.serialize());

        let parsed = EntryTable::parse(&bytes, ids());
        assert_eq!(parsed.records().len(), 1);
        assert_eq!(parsed.records()[0].name(), "kept name.txt");

        // Fragments whose checksum does not match fall back to the short name.
        let mut corrupted = table.serialize();
        corrupted[13] ^= 0xFF;
        let parsed = EntryTable::parse(&corrupted, ids());
        assert_eq!(parsed.records()[0].long_name, None);
        assert_eq!(parsed.records()[0].name(), "KE0000~0.TXT");
    }
}
