use core::sync::atomic::{AtomicU32, Ordering};

use alloc::collections::BTreeMap;
use alloc::string::{String, ToString};
use alloc::vec;
use alloc::vec::Vec;

use chrono::{DateTime, FixedOffset, NaiveDate, NaiveDateTime, TimeZone};
use msc::BlockDevice;

use super::boot::{BootSector, BOOT_SECTOR_LEN};
use super::chain;
use super::entry_table::{EntryId, EntryTable, Record};
use super::fs_info::FsInfo;
use super::table::Fat;
use crate::{byte_device::ByteDevice, config::MountConfig, error::FatError};

pub(crate) type FsResult<T, E> = Result<T, FatError<E>>;

static NEXT_FS_ID: AtomicU32 = AtomicU32::new(1);

pub(crate) const ROOT: NodeId = NodeId(0);

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord)]
pub(crate) struct NodeId(usize);

/// A loaded directory. `parent` indexes the arena and never owns.
pub(crate) struct DirNode {
    pub(crate) entry: Option<EntryId>,
    pub(crate) parent: Option<NodeId>,
    pub(crate) start_cluster: u32,
    pub(crate) table: EntryTable,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DirHandle {
    pub(crate) fs: u32,
    pub(crate) entry: Option<EntryId>,
}

impl DirHandle {
    pub fn is_root(&self) -> bool {
        self.entry.is_none()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FileHandle {
    pub(crate) fs: u32,
    pub(crate) entry: EntryId,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Handle {
    Dir(DirHandle),
    File(FileHandle),
}

impl Handle {
    pub fn is_directory(&self) -> bool {
        matches!(self, Handle::Dir(_))
    }

    pub fn as_dir(&self) -> Option<DirHandle> {
        match self {
            Handle::Dir(dir) => Some(*dir),
            Handle::File(_) => None,
        }
    }

    pub fn as_file(&self) -> Option<FileHandle> {
        match self {
            Handle::File(file) => Some(*file),
            Handle::Dir(_) => None,
        }
    }

    pub(crate) fn fs(&self) -> u32 {
        match self {
            Handle::Dir(dir) => dir.fs,
            Handle::File(file) => file.fs,
        }
    }

    pub(crate) fn entry(&self) -> Option<EntryId> {
        match self {
            Handle::Dir(dir) => dir.entry,
            Handle::File(file) => Some(file.entry),
        }
    }
}

impl From<DirHandle> for Handle {
    fn from(value: DirHandle) -> Self {
        Handle::Dir(value)
    }
}

impl From<FileHandle> for Handle {
    fn from(value: FileHandle) -> Self {
        Handle::File(value)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DirEntry {
    pub name: String,
    pub short_name: String,
    pub handle: Handle,
    pub length: u64,
    pub attributes: u8,
    pub created: Option<DateTime<FixedOffset>>,
    pub modified: Option<DateTime<FixedOffset>>,
    pub accessed: Option<NaiveDate>,
}

impl DirEntry {
    pub fn is_directory(&self) -> bool {
        self.handle.is_directory()
    }
}

/// A mounted FAT32 volume.
///
/// Directories are loaded on first use and stay in an arena for the life of
/// the mount, so every handle to the same directory sees the same entries.
/// Access is single threaded; callers sharing a volume serialize externally.
pub struct FileSystem<B: BlockDevice> {
    pub(crate) id: u32,
    pub(crate) dev: ByteDevice<B>,
    pub(crate) boot: BootSector,
    pub(crate) fs_info: FsInfo,
    pub(crate) fat: Fat,
    pub(crate) config: MountConfig,
    pub(crate) nodes: Vec<Option<DirNode>>,
    pub(crate) open_dirs: BTreeMap<EntryId, NodeId>,
    pub(crate) owners: BTreeMap<EntryId, NodeId>,
    next_entry: u64,
}

impl<B: BlockDevice> FileSystem<B> {
    pub fn mount(device: B, config: MountConfig) -> FsResult<Self, B::Error> {
        let mut dev = ByteDevice::new(device)?;
        let mut raw = [0u8; BOOT_SECTOR_LEN];
        dev.read(0, &mut raw)?;
        let boot = BootSector::parse(&raw)?;

        let device_bytes = dev.len();
        if boot.volume_bytes() > device_bytes {
            return Err(FatError::VolumeExceedsDevice {
                volume_bytes: boot.volume_bytes(),
                device_bytes,
            });
        }

        let mut fs_info = FsInfo::read(&mut dev, boot.fs_info_offset())?;
        let mut fat = Fat::new(&boot, config.chain_cache);
        if fs_info.free_count().is_none_or(|free| free > boot.cluster_count()) {
            let free = fat.count_free(&mut dev)?;
            log::info!("fat32: free_count_rebuilt stored=0x{:08x} counted={}", fs_info.free_count, free);
            fs_info.free_count = free;
        }

        let mut fs = Self {
            id: NEXT_FS_ID.fetch_add(1, Ordering::Relaxed),
            dev,
            fs_info,
            fat,
            config,
            nodes: Vec::new(),
            open_dirs: BTreeMap::new(),
            owners: BTreeMap::new(),
            next_entry: 0,
            boot,
        };
        let root_cluster = fs.boot.root_cluster;
        let table = fs.read_table(root_cluster)?;
        fs.push_node(None, None, root_cluster, table);

        log::info!(
            "fat32: mounted cluster_size={} clusters={} free={} fats={} mirrored={}",
            fs.boot.cluster_size(),
            fs.boot.cluster_count(),
            fs.fs_info.free_count,
            fs.boot.fat_count,
            fs.boot.is_fat_mirrored()
        );
        Ok(fs)
    }

    pub fn root(&self) -> DirHandle {
        DirHandle {
            fs: self.id,
            entry: None,
        }
    }

    pub fn config(&self) -> &MountConfig {
        &self.config
    }

    pub fn boot_sector(&self) -> &BootSector {
        &self.boot
    }

    pub fn cluster_size(&self) -> u32 {
        self.boot.cluster_size()
    }

    pub fn capacity(&self) -> u64 {
        self.boot.cluster_count() as u64 * self.cluster_size() as u64
    }

    pub fn free_space(&self) -> u64 {
        self.fs_info.free_count().unwrap_or(0) as u64 * self.cluster_size() as u64
    }

    pub fn occupied_space(&self) -> u64 {
        self.capacity().saturating_sub(self.free_space())
    }

    /// Label from the root directory, or the boot sector when the root has none.
    pub fn volume_label(&self) -> String {
        let from_root = self
            .nodes
            .first()
            .and_then(Option::as_ref)
            .and_then(|root| root.table.label())
            .map(|label| {
                let text: String = label.name.raw().iter().map(|&b| b as char).collect();
                text.trim_end().to_string()
            });
        from_root.unwrap_or_else(|| self.boot.volume_label.as_str().to_string())
    }

    pub fn list(&mut self, dir: DirHandle) -> FsResult<Vec<DirEntry>, B::Error> {
        let node = self.dir_node(dir)?;
        let (fs, zone) = (self.id, self.config.time_zone);
        Ok(self.node(node)?.table.visible().map(|r| snapshot(fs, zone, r)).collect())
    }

    /// Resolves a `/`-separated path relative to `dir`, ignoring case.
    pub fn search(&mut self, dir: DirHandle, path: &str) -> FsResult<Option<Handle>, B::Error> {
        let mut current = self.dir_node(dir)?;
        let components: Vec<&str> = path.split('/').filter(|c| !c.is_empty() && *c != ".").collect();
        let Some((last, parents)) = components.split_last() else {
            return Ok(Some(Handle::Dir(self.handle_for_node(current)?)));
        };

        for &component in parents {
            current = match self.step(current, component)? {
                Some(Handle::Dir(next)) => self.dir_node(next)?,
                _ => return Ok(None),
            };
        }
        self.step(current, last)
    }

    fn step(&mut self, node: NodeId, component: &str) -> FsResult<Option<Handle>, B::Error> {
        if component == ".." {
            let parent = self.node(node)?.parent.unwrap_or(ROOT);
            return Ok(Some(Handle::Dir(self.handle_for_node(parent)?)));
        }
        let fs = self.id;
        Ok(self
            .node(node)?
            .table
            .find_name(component)
            .map(|record| handle_for(fs, record)))
    }

    pub fn name(&self, item: Handle) -> FsResult<String, B::Error> {
        self.check(item.fs())?;
        match item.entry() {
            None => Ok(String::new()),
            Some(id) => Ok(self.record(id)?.1.name()),
        }
    }

    pub fn entry(&self, item: Handle) -> FsResult<DirEntry, B::Error> {
        self.check(item.fs())?;
        let id = item.entry().ok_or(FatError::RootDirectory)?;
        Ok(snapshot(self.id, self.config.time_zone, self.record(id)?.1))
    }

    pub fn parent(&self, item: Handle) -> FsResult<Option<DirHandle>, B::Error> {
        self.check(item.fs())?;
        match item.entry() {
            None => Ok(None),
            Some(id) => {
                let (parent, _) = self.record(id)?;
                Ok(Some(self.handle_for_node(parent)?))
            }
        }
    }

    pub fn absolute_path(&self, item: Handle) -> FsResult<String, B::Error> {
        self.check(item.fs())?;
        let mut names = Vec::new();
        let mut cursor = item.entry();
        while let Some(id) = cursor {
            let (parent, record) = self.record(id)?;
            names.push(record.name());
            cursor = self.node(parent)?.entry;
        }
        if names.is_empty() {
            return Ok(String::from("/"));
        }
        let mut path = String::new();
        for name in names.iter().rev() {
            path.push('/');
            path.push_str(name);
        }
        Ok(path)
    }

    pub fn into_device(mut self) -> FsResult<B, B::Error> {
        self.fat.flush(&mut self.dev)?;
        Ok(self.dev.into_inner())
    }

    pub(crate) fn check(&self, fs: u32) -> FsResult<(), B::Error> {
        if fs != self.id {
            return Err(FatError::ForeignHandle);
        }
        Ok(())
    }

    pub(crate) fn next_id(&mut self) -> EntryId {
        self.next_entry += 1;
        EntryId(self.next_entry)
    }

    pub(crate) fn node(&self, id: NodeId) -> FsResult<&DirNode, B::Error> {
        self.nodes
            .get(id.0)
            .and_then(Option::as_ref)
            .ok_or(FatError::StaleHandle)
    }

    pub(crate) fn node_mut(&mut self, id: NodeId) -> FsResult<&mut DirNode, B::Error> {
        self.nodes
            .get_mut(id.0)
            .and_then(Option::as_mut)
            .ok_or(FatError::StaleHandle)
    }

    pub(crate) fn record(&self, id: EntryId) -> FsResult<(NodeId, &Record), B::Error> {
        let parent = *self.owners.get(&id).ok_or(FatError::StaleHandle)?;
        let record = self.node(parent)?.table.get(id).ok_or(FatError::StaleHandle)?;
        Ok((parent, record))
    }

    pub(crate) fn record_mut(&mut self, id: EntryId) -> FsResult<&mut Record, B::Error> {
        let parent = *self.owners.get(&id).ok_or(FatError::StaleHandle)?;
        self.node_mut(parent)?
            .table
            .get_mut(id)
            .ok_or(FatError::StaleHandle)
    }

    pub(crate) fn handle_for_node(&self, node: NodeId) -> FsResult<DirHandle, B::Error> {
        Ok(DirHandle {
            fs: self.id,
            entry: self.node(node)?.entry,
        })
    }

    pub(crate) fn dir_node(&mut self, dir: DirHandle) -> FsResult<NodeId, B::Error> {
        self.check(dir.fs)?;
        match dir.entry {
            None => Ok(ROOT),
            Some(id) => self.open_dir(id),
        }
    }

    pub(crate) fn open_dir(&mut self, id: EntryId) -> FsResult<NodeId, B::Error> {
        if let Some(&node) = self.open_dirs.get(&id) {
            return Ok(node);
        }
        let (parent, record) = self.record(id)?;
        if !record.short.is_directory() {
            return Err(FatError::NotDirectory);
        }
        let start = record.short.start_cluster;
        let table = self.read_table(start)?;
        let node = self.push_node(Some(id), Some(parent), start, table);
        log::debug!("fat32: dir_open cluster={} node={}", start, node.0);
        Ok(node)
    }

    pub(crate) fn push_node(
        &mut self,
        entry: Option<EntryId>,
        parent: Option<NodeId>,
        start_cluster: u32,
        table: EntryTable,
    ) -> NodeId {
        let node = NodeId(self.nodes.len());
        for record in table.records() {
            self.owners.insert(record.id, node);
        }
        if let Some(id) = entry {
            self.open_dirs.insert(id, node);
        }
        self.nodes.push(Some(DirNode {
            entry,
            parent,
            start_cluster,
            table,
        }));
        node
    }

    pub(crate) fn drop_node(&mut self, node: NodeId) {
        let taken = self.nodes.get_mut(node.0).and_then(Option::take);
        if let Some(dir) = taken {
            for record in dir.table.records() {
                self.owners.remove(&record.id);
            }
            if let Some(id) = dir.entry {
                self.open_dirs.remove(&id);
            }
        }
    }

    fn read_table(&mut self, start: u32) -> FsResult<EntryTable, B::Error> {
        let chain = self.fat.get_chain(&mut self.dev, start)?;
        let mut bytes = vec![0u8; chain.len() * self.boot.cluster_size() as usize];
        chain::read(&mut self.dev, &self.boot, &chain, 0, &mut bytes)?;
        let mut next = self.next_entry;
        let table = EntryTable::parse(&bytes, || {
            next += 1;
            EntryId(next)
        });
        self.next_entry = next;
        Ok(table)
    }

    /// Rewrites the whole directory: entries, then zeros to the end of its chain.
    pub(crate) fn store_dir(&mut self, node: NodeId) -> FsResult<(), B::Error> {
        let (bytes, start, entry, parent) = {
            let dir = self.node(node)?;
            (dir.table.serialize(), dir.start_cluster, dir.entry, dir.parent)
        };
        let cluster_size = self.boot.cluster_size() as usize;
        let wanted = bytes.len().div_ceil(cluster_size).max(1);

        let mut clusters = self.fat.get_chain(&mut self.dev, start)?;
        if clusters.len() < wanted {
            let n = wanted - clusters.len();
            self.fat.alloc(&mut self.dev, &mut self.fs_info, &mut clusters, n)?;
        } else if clusters.len() > wanted {
            let n = clusters.len() - wanted;
            self.fat.free(&mut self.dev, &mut self.fs_info, &mut clusters, n)?;
        }

        chain::write(&mut self.dev, &self.boot, &clusters, 0, &bytes)?;
        let tail = clusters.len() * cluster_size - bytes.len();
        if tail > 0 {
            chain::zero(&mut self.dev, &self.boot, &clusters, bytes.len() as u64, tail)?;
        }

        if clusters[0] != start {
            // A directory recorded without clusters just received its first one.
            self.node_mut(node)?.start_cluster = clusters[0];
            if let (Some(id), Some(parent)) = (entry, parent) {
                self.record_mut(id)?.short.start_cluster = clusters[0];
                self.store_dir(parent)?;
            }
        }

        log::debug!(
            "fat32: dir_store cluster={} bytes={} clusters={}",
            clusters[0],
            bytes.len(),
            clusters.len()
        );
        Ok(())
    }
}

pub(crate) fn handle_for(fs: u32, record: &Record) -> Handle {
    if record.short.is_directory() {
        Handle::Dir(DirHandle {
            fs,
            entry: Some(record.id),
        })
    } else {
        Handle::File(FileHandle {
            fs,
            entry: record.id,
        })
    }
}

// On-disk stamps are local to the volume's zone.
fn in_zone(zone: FixedOffset, local: Option<NaiveDateTime>) -> Option<DateTime<FixedOffset>> {
    local.and_then(|at| zone.from_local_datetime(&at).single())
}

fn snapshot(fs: u32, zone: FixedOffset, record: &Record) -> DirEntry {
    DirEntry {
        name: record.name(),
        short_name: record.short.display_name(),
        handle: handle_for(fs, record),
        length: record.short.file_size as u64,
        attributes: record.short.attributes,
        created: in_zone(zone, record.short.created()),
        modified: in_zone(zone, record.short.modified()),
        accessed: record.short.accessed(),
    }
}
