#![cfg_attr(not(test), no_std)]

pub mod block;
pub mod cbw;
pub mod commands;
pub mod csw;
pub mod device;
pub mod error;
pub mod sense;
pub mod transport;

pub use block::BlockDevice;
pub use cbw::{CommandBlockWrapper, Direction};
pub use commands::{Capacity, InquiryResponse, ScsiCommand};
pub use csw::{CommandStatus, CommandStatusWrapper};
pub use device::{ScsiBlockDevice, ScsiConfig};
pub use error::ScsiError;
pub use sense::{Disposition, SenseError, SenseKey, SenseNote, SenseResponse};
pub use transport::{ControlRequest, Endpoint, UsbTransport};
