use alloc::string::ToString;
use alloc::vec::Vec;

use msc::BlockDevice;

use super::entry::{ShortEntry, ATTR_ARCHIVE, ATTR_DIRECTORY};
use super::entry_table::{EntryId, EntryTable, Record};
use super::fs::{DirHandle, FileHandle, FileSystem, FsResult, Handle, NodeId};
use super::lfn;
use super::short_name::ShortName;
use crate::error::FatError;

const RESERVED_CHARS: &[char] = &['/', '\\', ':', '*', '?', '"', '<', '>', '|'];

fn validate_name<E>(name: &str) -> FsResult<(), E> {
    if name.is_empty() || name == "." || name == ".." || name.trim().is_empty() {
        return Err(FatError::InvalidName);
    }
    if name.chars().any(|c| c.is_control() || RESERVED_CHARS.contains(&c)) {
        return Err(FatError::InvalidName);
    }
    if lfn::unit_len(name) > lfn::MAX_UNITS {
        return Err(FatError::NameTooLong);
    }
    Ok(())
}

impl<B: BlockDevice> FileSystem<B> {
    pub fn create_file(&mut self, dir: DirHandle, name: &str) -> FsResult<FileHandle, B::Error> {
        let entry = self.create_entry(dir, name, false)?;
        Ok(FileHandle { fs: self.id, entry })
    }

    pub fn create_directory(&mut self, dir: DirHandle, name: &str) -> FsResult<DirHandle, B::Error> {
        let entry = self.create_entry(dir, name, true)?;
        Ok(DirHandle {
            fs: self.id,
            entry: Some(entry),
        })
    }

    fn create_entry(&mut self, dir: DirHandle, name: &str, directory: bool) -> FsResult<EntryId, B::Error> {
        validate_name(name)?;
        let parent = self.dir_node(dir)?;
        let short = {
            let table = &self.node(parent)?.table;
            if table.find_name(name).is_some() {
                return Err(FatError::AlreadyExists);
            }
            ShortName::generate(name, |s| table.contains_short(s))?
        };

        let mut clusters = Vec::new();
        self.fat.alloc(&mut self.dev, &mut self.fs_info, &mut clusters, 1)?;
        let start = clusters[0];
        let now = self.config.local_now();
        let attributes = if directory { ATTR_DIRECTORY } else { ATTR_ARCHIVE };
        let short_entry = ShortEntry::new(short, attributes, start, now);
        let id = self.next_id();

        if directory {
            let parent_cluster = self.dotdot_cluster(parent)?;
            let mut table = EntryTable::default();
            for (name, cluster) in [(ShortName::DOT, start), (ShortName::DOT_DOT, parent_cluster)] {
                let mut dot = ShortEntry::new(name, ATTR_DIRECTORY, cluster, now);
                dot.copy_times(&short_entry);
                let dot_id = self.next_id();
                table.insert(Record {
                    id: dot_id,
                    long_name: None,
                    short: dot,
                });
            }
            let child = self.push_node(Some(id), Some(parent), start, table);
            self.store_dir(child)?;
        } else {
            // Fresh clusters may hold a deleted file's bytes.
            super::chain::zero(&mut self.dev, &self.boot, &clusters, 0, self.boot.cluster_size() as usize)?;
        }

        self.node_mut(parent)?.table.insert(Record {
            id,
            long_name: Some(name.to_string()),
            short: short_entry,
        });
        self.owners.insert(id, parent);
        self.store_dir(parent)?;

        log::debug!(
            "fat32: create name={:?} dir={} cluster={} short={:?}",
            name,
            directory,
            start,
            short
        );
        Ok(id)
    }

    /// Cluster a child's `..` entry points at; the root is recorded as 0.
    fn dotdot_cluster(&self, parent: NodeId) -> FsResult<u32, B::Error> {
        let node = self.node(parent)?;
        Ok(if node.entry.is_none() { 0 } else { node.start_cluster })
    }

    pub fn rename(&mut self, item: Handle, new_name: &str) -> FsResult<(), B::Error> {
        self.check(item.fs())?;
        let id = item.entry().ok_or(FatError::RootDirectory)?;
        validate_name(new_name)?;
        let (parent, record) = self.record(id)?;
        let own_short = record.short.name;

        let short = {
            let table = &self.node(parent)?.table;
            if table.find_name(new_name).is_some_and(|other| other.id != id) {
                return Err(FatError::AlreadyExists);
            }
            ShortName::generate(new_name, |s| *s != own_short && table.contains_short(s))?
        };

        self.node_mut(parent)?.table.mutate(|records| {
            if let Some(record) = records.iter_mut().find(|r| r.id == id) {
                record.long_name = Some(new_name.to_string());
                record.short.name = short;
            }
        });
        self.store_dir(parent)
    }

    pub fn move_to(&mut self, item: Handle, dest: Handle) -> FsResult<(), B::Error> {
        self.check(item.fs())?;
        let dest = match dest {
            Handle::Dir(dir) => dir,
            Handle::File(_) => return Err(FatError::NotDirectory),
        };
        if dest.fs != self.id {
            return Err(FatError::CrossFileSystemMove);
        }
        let id = item.entry().ok_or(FatError::RootDirectory)?;
        let (source, record) = self.record(id)?;
        let is_directory = record.short.is_directory();
        let name = record.name();
        let current_short = record.short.name;

        let target = self.dir_node(dest)?;
        if source == target {
            return Ok(());
        }

        let moved = if is_directory {
            let moved = self.open_dir(id)?;
            let mut cursor = Some(target);
            while let Some(node) = cursor {
                if node == moved {
                    return Err(FatError::MoveIntoSelf);
                }
                cursor = self.node(node)?.parent;
            }
            Some(moved)
        } else {
            None
        };

        let short = {
            let table = &self.node(target)?.table;
            if table.find_name(&name).is_some() {
                return Err(FatError::AlreadyExists);
            }
            if table.contains_short(&current_short) {
                ShortName::generate(&name, |s| table.contains_short(s))?
            } else {
                current_short
            }
        };

        let mut record = self
            .node_mut(source)?
            .table
            .remove(id)
            .ok_or(FatError::StaleHandle)?;
        record.short.name = short;
        self.node_mut(target)?.table.insert(record);
        self.owners.insert(id, target);

        if let Some(moved) = moved {
            let parent_cluster = self.dotdot_cluster(target)?;
            let dir = self.node_mut(moved)?;
            dir.parent = Some(target);
            dir.table.mutate(|records| {
                for record in records.iter_mut().filter(|r| r.short.name == ShortName::DOT_DOT) {
                    record.short.start_cluster = parent_cluster;
                }
            });
            self.store_dir(moved)?;
        }

        self.store_dir(source)?;
        self.store_dir(target)?;
        log::debug!("fat32: move name={:?} dir={}", name, is_directory);
        Ok(())
    }

    pub fn delete(&mut self, item: Handle) -> FsResult<(), B::Error> {
        self.check(item.fs())?;
        let id = item.entry().ok_or(FatError::RootDirectory)?;
        let (parent, record) = self.record(id)?;
        let is_directory = record.short.is_directory();
        let start = record.short.start_cluster;

        if is_directory {
            let node = self.open_dir(id)?;
            self.release_dir(node)?;
        } else {
            self.release_chain(start)?;
        }

        self.node_mut(parent)?.table.remove(id);
        self.owners.remove(&id);
        self.store_dir(parent)
    }

    /// Frees every cluster reachable from a directory, children first.
    fn release_dir(&mut self, node: NodeId) -> FsResult<(), B::Error> {
        let children: Vec<(EntryId, bool, u32)> = self
            .node(node)?
            .table
            .visible()
            .map(|r| (r.id, r.short.is_directory(), r.short.start_cluster))
            .collect();

        for (child, is_directory, start) in children {
            if is_directory {
                let child_node = self.open_dir(child)?;
                self.release_dir(child_node)?;
            } else {
                self.release_chain(start)?;
            }
        }

        let start = self.node(node)?.start_cluster;
        self.release_chain(start)?;
        self.drop_node(node);
        Ok(())
    }

    pub(crate) fn release_chain(&mut self, start: u32) -> FsResult<(), B::Error> {
        let mut clusters = self.fat.get_chain(&mut self.dev, start)?;
        let n = clusters.len();
        self.fat.free(&mut self.dev, &mut self.fs_info, &mut clusters, n)
    }
}
