pub mod boot;
pub mod chain;
pub mod directory;
pub mod entry;
pub mod entry_table;
pub mod file;
pub mod format;
pub mod fs;
pub mod fs_info;
pub mod lfn;
pub mod short_name;
pub mod table;
pub mod time;

pub use boot::BootSector;
pub use entry_table::EntryId;
pub use format::{format_fat32, FormatOptions};
pub use fs::{DirEntry, DirHandle, FileHandle, FileSystem, Handle};
pub use short_name::ShortName;
