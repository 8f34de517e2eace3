use core::fmt::Debug;

const REQUEST_TYPE_CLASS_INTERFACE_OUT: u8 = 0x21;
const REQUEST_TYPE_CLASS_INTERFACE_IN: u8 = 0xA1;
const REQUEST_BULK_ONLY_RESET: u8 = 0xFF;
const REQUEST_GET_MAX_LUN: u8 = 0xFE;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Endpoint {
    BulkIn,
    BulkOut,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ControlRequest {
    pub request_type: u8,
    pub request: u8,
    pub value: u16,
    pub index: u16,
}

impl ControlRequest {
    pub fn bulk_only_reset(interface: u16) -> Self {
        Self {
            request_type: REQUEST_TYPE_CLASS_INTERFACE_OUT,
            request: REQUEST_BULK_ONLY_RESET,
            value: 0,
            index: interface,
        }
    }

    pub fn get_max_lun(interface: u16) -> Self {
        Self {
            request_type: REQUEST_TYPE_CLASS_INTERFACE_IN,
            request: REQUEST_GET_MAX_LUN,
            value: 0,
            index: interface,
        }
    }

    pub fn is_device_to_host(&self) -> bool {
        (self.request_type & 0x80) != 0
    }
}

/// Host-side USB primitives for one bulk-only mass-storage interface.
///
/// Each call blocks until the transfer completes or fails. A transfer that
/// moves fewer bytes than requested returns the short count, not an error.
pub trait UsbTransport {
    type Error: Debug;

    fn interface_number(&self) -> u16;

    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Self::Error>;

    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error>;

    fn control_transfer(
        &mut self,
        request: ControlRequest,
        data: &mut [u8],
    ) -> Result<usize, Self::Error>;

    fn clear_halt(&mut self, endpoint: Endpoint) -> Result<(), Self::Error>;

    fn reset_device(&mut self) -> Result<(), Self::Error>;
}

impl<T: UsbTransport + ?Sized> UsbTransport for &mut T {
    type Error = T::Error;

    fn interface_number(&self) -> u16 {
        (**self).interface_number()
    }

    fn bulk_out(&mut self, data: &[u8]) -> Result<usize, Self::Error> {
        (**self).bulk_out(data)
    }

    fn bulk_in(&mut self, buf: &mut [u8]) -> Result<usize, Self::Error> {
        (**self).bulk_in(buf)
    }

    fn control_transfer(
        &mut self,
        request: ControlRequest,
        data: &mut [u8],
    ) -> Result<usize, Self::Error> {
        (**self).control_transfer(request, data)
    }

    fn clear_halt(&mut self, endpoint: Endpoint) -> Result<(), Self::Error> {
        (**self).clear_halt(endpoint)
    }

    fn reset_device(&mut self) -> Result<(), Self::Error> {
        (**self).reset_device()
    }
}

/// Devices with a single logical unit may stall this request; that reads as LUN 0.
pub fn get_max_lun<T: UsbTransport + ?Sized>(transport: &mut T) -> u8 {
    let request = ControlRequest::get_max_lun(transport.interface_number());
    let mut buf = [0u8; 1];
    match transport.control_transfer(request, &mut buf) {
        Ok(1) => buf[0],
        Ok(n) => {
            log::debug!("msc: get_max_lun short={} assume=0", n);
            0
        }
        Err(err) => {
            log::debug!("msc: get_max_lun err={:?} assume=0", err);
            0
        }
    }
}

pub(crate) fn bulk_only_reset<T: UsbTransport + ?Sized>(transport: &mut T) -> Result<(), T::Error> {
    let request = ControlRequest::bulk_only_reset(transport.interface_number());
    let mut empty = [0u8; 0];
    transport.control_transfer(request, &mut empty)?;
    transport.clear_halt(Endpoint::BulkIn)?;
    transport.clear_halt(Endpoint::BulkOut)
}
