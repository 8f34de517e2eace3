use core::fmt;

#[derive(Debug)]
pub enum FatError<E> {
    Device(E),
    UnsupportedFileSystem,
    InvalidBootSector,
    UnsupportedSectorSize(u16),
    UnsupportedSectorsPerCluster(u8),
    VolumeExceedsDevice { volume_bytes: u64, device_bytes: u64 },
    NoPartitionTable,
    InvalidName,
    NameTooLong,
    ShortNameExhausted,
    NotFound,
    NotDirectory,
    IsDirectory,
    AlreadyExists,
    CrossFileSystemMove,
    MoveIntoSelf,
    RootDirectory,
    StaleHandle,
    ForeignHandle,
    NoFreeCluster,
    BadCluster(u32),
    ClusterChainTooLong,
    FreeExceedsChain { requested: usize, len: usize },
    ChainTooShort { needed: u64, allocated: u64 },
    FileTooLarge(u64),
    VolumeTooSmall,
    ZeroBlockSize,
}

impl<E> FatError<E> {
    /// Converts the device error, keeping every other variant.
    pub fn map_device<F>(self, f: impl FnOnce(E) -> F) -> FatError<F> {
        match self {
            FatError::Device(err) => FatError::Device(f(err)),
            FatError::UnsupportedFileSystem => FatError::UnsupportedFileSystem,
            FatError::InvalidBootSector => FatError::InvalidBootSector,
            FatError::UnsupportedSectorSize(size) => FatError::UnsupportedSectorSize(size),
            FatError::UnsupportedSectorsPerCluster(n) => FatError::UnsupportedSectorsPerCluster(n),
            FatError::VolumeExceedsDevice {
                volume_bytes,
                device_bytes,
            } => FatError::VolumeExceedsDevice {
                volume_bytes,
                device_bytes,
            },
            FatError::NoPartitionTable => FatError::NoPartitionTable,
            FatError::InvalidName => FatError::InvalidName,
            FatError::NameTooLong => FatError::NameTooLong,
            FatError::ShortNameExhausted => FatError::ShortNameExhausted,
            FatError::NotFound => FatError::NotFound,
            FatError::NotDirectory => FatError::NotDirectory,
            FatError::IsDirectory => FatError::IsDirectory,
            FatError::AlreadyExists => FatError::AlreadyExists,
            FatError::CrossFileSystemMove => FatError::CrossFileSystemMove,
            FatError::MoveIntoSelf => FatError::MoveIntoSelf,
            FatError::RootDirectory => FatError::RootDirectory,
            FatError::StaleHandle => FatError::StaleHandle,
            FatError::ForeignHandle => FatError::ForeignHandle,
            FatError::NoFreeCluster => FatError::NoFreeCluster,
            FatError::BadCluster(cluster) => FatError::BadCluster(cluster),
            FatError::ClusterChainTooLong => FatError::ClusterChainTooLong,
            FatError::FreeExceedsChain { requested, len } => FatError::FreeExceedsChain { requested, len },
            FatError::ChainTooShort { needed, allocated } => FatError::ChainTooShort { needed, allocated },
            FatError::FileTooLarge(len) => FatError::FileTooLarge(len),
            FatError::VolumeTooSmall => FatError::VolumeTooSmall,
            FatError::ZeroBlockSize => FatError::ZeroBlockSize,
        }
    }
}

impl<E> From<E> for FatError<E> {
    fn from(value: E) -> Self {
        Self::Device(value)
    }
}

impl<E: fmt::Debug> fmt::Display for FatError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FatError::Device(err) => write!(f, "device error: {:?}", err),
            FatError::UnsupportedFileSystem => f.write_str("not a FAT32 volume"),
            FatError::InvalidBootSector => f.write_str("invalid boot sector"),
            FatError::UnsupportedSectorSize(size) => write!(f, "unsupported sector size {}", size),
            FatError::UnsupportedSectorsPerCluster(n) => {
                write!(f, "unsupported sectors per cluster {}", n)
            }
            FatError::VolumeExceedsDevice {
                volume_bytes,
                device_bytes,
            } => write!(
                f,
                "volume of {} bytes exceeds device of {} bytes",
                volume_bytes, device_bytes
            ),
            FatError::NoPartitionTable => f.write_str("no supported partition table"),
            FatError::InvalidName => f.write_str("invalid name"),
            FatError::NameTooLong => f.write_str("name too long"),
            FatError::ShortNameExhausted => f.write_str("no free short name"),
            FatError::NotFound => f.write_str("not found"),
            FatError::NotDirectory => f.write_str("not a directory"),
            FatError::IsDirectory => f.write_str("is a directory"),
            FatError::AlreadyExists => f.write_str("item already exists"),
            FatError::CrossFileSystemMove => f.write_str("cannot move between file systems"),
            FatError::MoveIntoSelf => f.write_str("cannot move a directory into itself"),
            FatError::RootDirectory => f.write_str("operation not allowed on root directory"),
            FatError::StaleHandle => f.write_str("handle refers to a deleted entry"),
            FatError::ForeignHandle => f.write_str("handle belongs to another file system"),
            FatError::NoFreeCluster => f.write_str("no free cluster"),
            FatError::BadCluster(cluster) => write!(f, "bad cluster {}", cluster),
            FatError::ClusterChainTooLong => f.write_str("cluster chain loops"),
            FatError::FreeExceedsChain { requested, len } => {
                write!(f, "cannot free {} clusters from chain of {}", requested, len)
            }
            FatError::ChainTooShort { needed, allocated } => {
                write!(f, "chain covers {} bytes, {} needed", allocated, needed)
            }
            FatError::FileTooLarge(len) => write!(f, "file length {} exceeds 4 GiB", len),
            FatError::VolumeTooSmall => f.write_str("device too small for FAT32"),
            FatError::ZeroBlockSize => f.write_str("device reports a block size of zero"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for FatError<E> {}
