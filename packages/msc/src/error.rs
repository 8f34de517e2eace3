use core::fmt;

use crate::csw::CswDecodeError;
use crate::sense::SenseError;

#[derive(Debug)]
pub enum ScsiError<E> {
    Transport(E),
    ShortTransfer { expected: usize, actual: usize },
    InvalidCswSignature(u32),
    InvalidCswStatus(u8),
    TagMismatch { expected: u32, actual: u32 },
    PhaseError,
    /// The device reported failure and no usable sense data came back.
    CommandFailed,
    Sense(SenseError),
    InvalidLength { len: usize, block_size: u32 },
    LbaOutOfRange(u64),
    UnsupportedDevice { qualifier: u8, device_type: u8 },
    InvalidResponse,
    NoMedia,
    Busy,
}

impl<E> ScsiError<E> {
    /// Faults of the transport framing, cleared by a reset recovery.
    pub fn is_transport_fault(&self) -> bool {
        matches!(
            self,
            ScsiError::Transport(_)
                | ScsiError::ShortTransfer { .. }
                | ScsiError::InvalidCswSignature(_)
                | ScsiError::InvalidCswStatus(_)
                | ScsiError::TagMismatch { .. }
        )
    }

    pub fn is_media_not_inserted(&self) -> bool {
        matches!(self, ScsiError::Sense(SenseError::MediaNotInserted(_)))
    }
}

impl<E> From<SenseError> for ScsiError<E> {
    fn from(value: SenseError) -> Self {
        Self::Sense(value)
    }
}

impl<E> From<CswDecodeError> for ScsiError<E> {
    fn from(value: CswDecodeError) -> Self {
        match value {
            CswDecodeError::BadLength(actual) => Self::ShortTransfer {
                expected: crate::csw::CSW_LEN,
                actual,
            },
            CswDecodeError::BadSignature(signature) => Self::InvalidCswSignature(signature),
            CswDecodeError::BadStatus(status) => Self::InvalidCswStatus(status),
        }
    }
}

impl<E: fmt::Debug> fmt::Display for ScsiError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScsiError::Transport(err) => write!(f, "usb transfer failed: {:?}", err),
            ScsiError::ShortTransfer { expected, actual } => {
                write!(f, "short transfer: expected {} bytes, got {}", expected, actual)
            }
            ScsiError::InvalidCswSignature(sig) => write!(f, "invalid csw signature 0x{:08x}", sig),
            ScsiError::InvalidCswStatus(status) => write!(f, "invalid csw status {}", status),
            ScsiError::TagMismatch { expected, actual } => {
                write!(f, "csw tag {} does not match cbw tag {}", actual, expected)
            }
            ScsiError::PhaseError => f.write_str("phase error"),
            ScsiError::CommandFailed => f.write_str("command failed without sense data"),
            ScsiError::Sense(sense) => write!(f, "sense: {}", sense),
            ScsiError::InvalidLength { len, block_size } => {
                write!(f, "length {} is not a multiple of block size {}", len, block_size)
            }
            ScsiError::LbaOutOfRange(lba) => write!(f, "lba {} out of range", lba),
            ScsiError::UnsupportedDevice {
                qualifier,
                device_type,
            } => write!(
                f,
                "unsupported peripheral qualifier {} device type {}",
                qualifier, device_type
            ),
            ScsiError::InvalidResponse => f.write_str("malformed command response"),
            ScsiError::NoMedia => f.write_str("no logical unit with media"),
            ScsiError::Busy => f.write_str("device already in a command"),
        }
    }
}

impl<E: fmt::Debug> core::error::Error for ScsiError<E> {}
