//! A SCSI disk emulated behind the bulk-only transport trait.

#![allow(dead_code)]

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use embassy_sync::blocking_mutex::raw::NoopRawMutex;
use embedded_hal::delay::DelayNs;
use msc::commands::{OP_INQUIRY, OP_READ_10, OP_READ_CAPACITY_10, OP_REQUEST_SENSE, OP_TEST_UNIT_READY, OP_WRITE_10};
use msc::{
    CommandBlockWrapper, CommandStatus, CommandStatusWrapper, ControlRequest, Direction, Endpoint,
    ScsiBlockDevice, ScsiConfig, UsbTransport,
};

pub type Scsi = ScsiBlockDevice<NoopRawMutex, MockTransport, NoDelay>;

pub struct NoDelay;

impl DelayNs for NoDelay {
    fn delay_ns(&mut self, _ns: u32) {}
}

#[derive(Debug)]
pub struct MockError;

#[derive(Clone, Debug)]
pub struct Transfer {
    pub cbw: CommandBlockWrapper,
    pub data_in: usize,
    pub data_out: usize,
    pub status_read: bool,
}

enum Segment {
    Data(VecDeque<u8>),
    Status([u8; 13]),
}

struct PendingWrite {
    cbw: CommandBlockWrapper,
    lba: u64,
    buf: Vec<u8>,
    /// Sense to report once the data phase is drained.
    rejected: Option<[u8; 18]>,
}

pub struct DiskState {
    pub block_size: u32,
    pub data: Vec<u8>,
    pub max_lun: u8,
    pub luns_without_media: Vec<u8>,
    pub transfers: Vec<Transfer>,
    pub bulk_resets: usize,
    pub halts_cleared: usize,
    pub device_resets: usize,
    /// Corrupts the tag of this many upcoming status responses.
    pub corrupt_tags: usize,
    /// Answers this many upcoming media commands with "becoming ready".
    pub not_ready: usize,
    sense: [u8; 18],
    queue: VecDeque<Segment>,
    pending_write: Option<PendingWrite>,
}

impl DiskState {
    pub fn new(block_size: u32, blocks: u64) -> Self {
        Self {
            block_size,
            data: vec![0u8; (block_size as u64 * blocks) as usize],
            max_lun: 0,
            luns_without_media: Vec::new(),
            transfers: Vec::new(),
            bulk_resets: 0,
            halts_cleared: 0,
            device_resets: 0,
            corrupt_tags: 0,
            not_ready: 0,
            sense: sense(0, 0, 0),
            queue: VecDeque::new(),
            pending_write: None,
        }
    }

    fn blocks(&self) -> u64 {
        self.data.len() as u64 / self.block_size as u64
    }

    fn status(&mut self, cbw: &CommandBlockWrapper, status: CommandStatus, residue: u32) {
        let mut tag = cbw.tag;
        if self.corrupt_tags > 0 {
            self.corrupt_tags -= 1;
            tag = tag.wrapping_add(1000);
        }
        let csw = CommandStatusWrapper {
            tag,
            data_residue: residue,
            status,
        };
        self.queue.push_back(Segment::Status(csw.to_bytes()));
    }

    // A failing device still runs the data phase: zeros in, or data drained out.
    fn fail(&mut self, cbw: &CommandBlockWrapper, key: u8, asc: u8, ascq: u8) {
        let sense = sense(key, asc, ascq);
        let len = cbw.data_transfer_length;
        match cbw.direction {
            Direction::Out if len > 0 => {
                self.pending_write = Some(PendingWrite {
                    cbw: *cbw,
                    lba: 0,
                    buf: Vec::new(),
                    rejected: Some(sense),
                });
            }
            Direction::In if len > 0 => {
                self.queue.push_back(Segment::Data(vec![0u8; len as usize].into()));
                self.sense = sense;
                self.status(cbw, CommandStatus::Failed, len);
            }
            _ => {
                self.sense = sense;
                self.status(cbw, CommandStatus::Failed, len);
            }
        }
    }

    fn reply(&mut self, cbw: &CommandBlockWrapper, data: Vec<u8>) {
        let expected = cbw.data_transfer_length as usize;
        let mut data = data;
        data.resize(expected, 0);
        self.queue.push_back(Segment::Data(data.into()));
        self.status(cbw, CommandStatus::Passed, 0);
    }

    fn handle(&mut self, cbw: CommandBlockWrapper) {
        self.transfers.push(Transfer {
            cbw,
            data_in: 0,
            data_out: 0,
            status_read: false,
        });
        let cdb = cbw.cdb;
        let opcode = cdb.opcode();
        let has_media = !self.luns_without_media.contains(&cbw.lun);

        match opcode {
            OP_INQUIRY => {
                let mut data = vec![0u8; 36];
                data[1] = 0x80;
                data[2] = 0x04;
                data[3] = 0x02;
                data[4] = 31;
                data[8..16].copy_from_slice(b"USBFAT  ");
                data[16..32].copy_from_slice(b"Mock Disk       ");
                data[32..36].copy_from_slice(b"1.00");
                let len = (cdb.allocation_length() as usize).min(36);
                data.truncate(len);
                self.reply(&cbw, data);
            }
            OP_REQUEST_SENSE => {
                let data = self.sense.to_vec();
                self.sense = sense(0, 0, 0);
                self.reply(&cbw, data);
            }
            _ if !has_media => self.fail(&cbw, 0x02, 0x3A, 0x00),
            _ if self.not_ready > 0 && opcode != OP_READ_CAPACITY_10 => {
                self.not_ready -= 1;
                self.fail(&cbw, 0x02, 0x04, 0x01);
            }
            OP_TEST_UNIT_READY => self.status(&cbw, CommandStatus::Passed, 0),
            OP_READ_CAPACITY_10 => {
                let mut data = Vec::with_capacity(8);
                data.extend_from_slice(&((self.blocks() - 1) as u32).to_be_bytes());
                data.extend_from_slice(&self.block_size.to_be_bytes());
                self.reply(&cbw, data);
            }
            OP_READ_10 => {
                let lba = cdb.lba() as u64;
                let blocks = cdb.blocks() as u64;
                if lba + blocks > self.blocks() {
                    self.fail(&cbw, 0x05, 0x21, 0x00);
                    return;
                }
                let bs = self.block_size as u64;
                let data = self.data[(lba * bs) as usize..((lba + blocks) * bs) as usize].to_vec();
                self.reply(&cbw, data);
            }
            OP_WRITE_10 => {
                let lba = cdb.lba() as u64;
                self.pending_write = Some(PendingWrite {
                    cbw,
                    lba,
                    buf: Vec::new(),
                    rejected: None,
                });
            }
            _ => self.fail(&cbw, 0x05, 0x20, 0x00),
        }
    }

    fn accept_write_data(&mut self, data: &[u8]) -> usize {
        let Some(mut pending) = self.pending_write.take() else {
            return 0;
        };
        let expected = pending.cbw.data_transfer_length as usize;
        let n = data.len().min(expected - pending.buf.len());
        pending.buf.extend_from_slice(&data[..n]);
        if let Some(t) = self.transfers.last_mut() {
            t.data_out += n;
        }
        if pending.buf.len() < expected {
            self.pending_write = Some(pending);
            return n;
        }

        if let Some(rejected) = pending.rejected {
            self.sense = rejected;
            self.status(&pending.cbw, CommandStatus::Failed, expected as u32);
            return n;
        }
        let bs = self.block_size as u64;
        let end = pending.lba * bs + pending.buf.len() as u64;
        if end > self.data.len() as u64 {
            self.sense = sense(0x05, 0x21, 0x00);
            self.status(&pending.cbw, CommandStatus::Failed, expected as u32);
        } else {
            let start = (pending.lba * bs) as usize;
            self.data[start..end as usize].copy_from_slice(&pending.buf);
            self.status(&pending.cbw, CommandStatus::Passed, 0);
        }
        n
    }
}

pub fn sense(key: u8, asc: u8, ascq: u8) -> [u8; 18] {
    let mut raw = [0u8; 18];
    raw[0] = 0x70;
    raw[2] = key;
    raw[7] = 10;
    raw[12] = asc;
    raw[13] = ascq;
    raw
}

#[derive(Clone)]
pub struct MockTransport {
    pub state: Rc<RefCell<DiskState>>,
}

impl MockTransport {
    pub fn new(state: DiskState) -> Self {
        Self {
            state: Rc::new(RefCell::new(state)),
        }
    }
}

impl UsbTransport for MockTransport {
    type Error = MockError;

    fn interface_number(&self) -> u16 {
        0
    }

    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if state.pending_write.is_some() {
            return Ok(state.accept_write_data(data));
        }
        let cbw = CommandBlockWrapper::parse(data).ok_or(MockError)?;
        state.handle(cbw);
        Ok(data.len())
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut guard = self.state.borrow_mut();
        let state = &mut *guard;
        let Some(segment) = state.queue.front_mut() else {
            return Err(MockError);
        };
        match segment {
            Segment::Data(bytes) => {
                let n = buf.len().min(bytes.len());
                for slot in buf[..n].iter_mut() {
                    *slot = bytes.pop_front().unwrap_or(0);
                }
                if bytes.is_empty() {
                    state.queue.pop_front();
                }
                if let Some(t) = state.transfers.last_mut() {
                    t.data_in += n;
                }
                Ok(n)
            }
            Segment::Status(raw) => {
                let raw = *raw;
                state.queue.pop_front();
                let n = buf.len().min(raw.len());
                buf[..n].copy_from_slice(&raw[..n]);
                if let Some(t) = state.transfers.last_mut() {
                    t.status_read = true;
                }
                Ok(n)
            }
        }
    }

    fn control_transfer(&mut self, request: ControlRequest, buf: &mut [u8]) -> Result<usize, Self::Error> {
        let mut state = self.state.borrow_mut();
        if request == ControlRequest::get_max_lun(0) {
            if let Some(slot) = buf.first_mut() {
                *slot = state.max_lun;
                return Ok(1);
            }
            return Ok(0);
        }
        if request == ControlRequest::bulk_only_reset(0) {
            state.bulk_resets += 1;
            state.queue.clear();
            state.pending_write = None;
            return Ok(0);
        }
        Err(MockError)
    }

    fn clear_halt(&mut self, _endpoint: Endpoint) -> Result<(), Self::Error> {
        self.state.borrow_mut().halts_cleared += 1;
        Ok(())
    }

    fn reset_device(&mut self) -> Result<(), Self::Error> {
        let mut state = self.state.borrow_mut();
        state.device_resets += 1;
        state.queue.clear();
        state.pending_write = None;
        Ok(())
    }
}

pub fn scsi_disk(state: DiskState) -> (Scsi, Rc<RefCell<DiskState>>) {
    let transport = MockTransport::new(state);
    let shared = transport.state.clone();
    let device = ScsiBlockDevice::open(transport, NoDelay, ScsiConfig::default()).expect("scsi open");
    (device, shared)
}
