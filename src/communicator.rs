use std::time::Duration;

use log::{debug, info};
use rusb::{Context, Device, DeviceHandle};

use crate::config::Target;
use crate::device::find_device;
use crate::endpoint::{endpoints_of, select_bulk_pair, BulkPair, EndpointInfo};
use crate::error::Error;
use crate::runner::Connector;
use crate::session::BulkChannel;

/// An opened device with its interface claimed. The interface is released on drop.
pub struct UsbDeviceCommunicator {
    handle: DeviceHandle<Context>,
    interface: u8,
    endpoints: Vec<EndpointInfo>,
    pair: BulkPair,
    timeout: Duration,
}

impl UsbDeviceCommunicator {
    pub fn open(device: Device<Context>, interface: u8, timeout: Duration) -> Result<Self, Error> {
        let handle = device.open().map_err(Error::Open)?;

        match handle.set_auto_detach_kernel_driver(true) {
            Ok(()) | Err(rusb::Error::NotSupported) => {}
            Err(e) => debug!("cannot enable kernel driver auto-detach: {}", e),
        }

        let config_descriptor = device.config_descriptor(0).map_err(Error::Configure)?;
        let wanted = config_descriptor.number();
        if handle.active_configuration().map_err(Error::Configure)? != wanted {
            debug!("selecting configuration {}", wanted);
            handle.set_active_configuration(wanted).map_err(Error::Configure)?;
        }

        let endpoints = config_descriptor
            .interfaces()
            .find(|iface| iface.number() == interface)
            .and_then(|iface| iface.descriptors().find(|alt| alt.setting_number() == 0))
            .map(|alt| endpoints_of(&alt))
            .ok_or(Error::MissingInterface(interface))?;
        let pair = select_bulk_pair(interface, &endpoints)?;

        handle
            .claim_interface(interface)
            .map_err(|source| Error::Claim { interface, source })?;

        Ok(UsbDeviceCommunicator {
            handle,
            interface,
            endpoints,
            pair,
            timeout,
        })
    }

    pub fn get_endpoints(&self) -> &[EndpointInfo] {
        &self.endpoints
    }

    pub fn bulk_pair(&self) -> BulkPair {
        self.pair
    }
}

impl BulkChannel for UsbDeviceCommunicator {
    fn send(&mut self, data: &[u8]) -> Result<usize, Error> {
        let endpoint = self.pair.out.address;
        self.handle
            .write_bulk(endpoint, data, self.timeout)
            .map_err(|source| Error::Write { endpoint, source })
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<usize, Error> {
        let endpoint = self.pair.input.address;
        self.handle
            .read_bulk(endpoint, buf, self.timeout)
            .map_err(|source| Error::Read { endpoint, source })
    }
}

impl Drop for UsbDeviceCommunicator {
    fn drop(&mut self) {
        // fails harmlessly when the device is already gone
        let _ = self.handle.release_interface(self.interface);
    }
}

/// Connects to real hardware through a shared libusb context.
pub struct UsbConnector {
    context: Context,
    interface: u8,
    timeout: Duration,
}

impl UsbConnector {
    pub fn new(interface: u8, timeout: Duration) -> Result<Self, Error> {
        let context = Context::new().map_err(Error::Context)?;
        Ok(UsbConnector { context, interface, timeout })
    }
}

impl Connector for UsbConnector {
    type Channel = UsbDeviceCommunicator;

    fn connect(&mut self, target: &Target) -> Result<Option<UsbDeviceCommunicator>, Error> {
        let device = match find_device(&self.context, target)? {
            Some(device) => device,
            None => return Ok(None),
        };
        info!(
            "found {} at bus {} address {}",
            target,
            device.bus_number(),
            device.address()
        );

        let comm = UsbDeviceCommunicator::open(device, self.interface, self.timeout)?;
        for ep in comm.get_endpoints() {
            debug!("{}", ep);
        }
        let pair = comm.bulk_pair();
        info!(
            "using OUT endpoint 0x{:02X} and IN endpoint 0x{:02X} on interface {}",
            pair.out.address, pair.input.address, self.interface
        );

        Ok(Some(comm))
    }
}
