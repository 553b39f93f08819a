use log::debug;
use rusb::{Context, Device, DeviceHandle, UsbContext};

use crate::config::Target;
use crate::error::Error;

/// What `--list-all` prints for a device.
#[derive(Debug, Clone)]
pub struct UsbDeviceSummary {
    pub vendor_id: u16,
    pub product_id: u16,
    pub manufacturer: Option<String>,
    pub product: Option<String>,
    pub serial_number: Option<String>,
    pub bus_number: u8,
    pub device_address: u8,
}

impl UsbDeviceSummary {
    pub fn new(device: &Device<Context>) -> Result<Self, rusb::Error> {
        let descriptor = device.device_descriptor()?;

        // Strings need an open handle; devices we may not open are still listed.
        let (manufacturer, product, serial_number) = match device.open() {
            Ok(handle) => (
                read_string(&handle, descriptor.manufacturer_string_index()),
                read_string(&handle, descriptor.product_string_index()),
                read_string(&handle, descriptor.serial_number_string_index()),
            ),
            Err(e) => {
                debug!(
                    "cannot open {:04x}:{:04x} for string descriptors: {}",
                    descriptor.vendor_id(),
                    descriptor.product_id(),
                    e
                );
                (None, None, None)
            }
        };

        Ok(UsbDeviceSummary {
            vendor_id: descriptor.vendor_id(),
            product_id: descriptor.product_id(),
            manufacturer,
            product,
            serial_number,
            bus_number: device.bus_number(),
            device_address: device.address(),
        })
    }
}

impl std::fmt::Display for UsbDeviceSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Bus {:03} Device {:03}: VID: 0x{:04X}, PID: 0x{:04X}, Manufacturer: {}, Product: {}, Serial: {}",
            self.bus_number,
            self.device_address,
            self.vendor_id,
            self.product_id,
            self.manufacturer.as_deref().unwrap_or("-"),
            self.product.as_deref().unwrap_or("-"),
            self.serial_number.as_deref().unwrap_or("-"),
        )
    }
}

fn read_string(handle: &DeviceHandle<Context>, index: Option<u8>) -> Option<String> {
    index.and_then(|idx| handle.read_string_descriptor_ascii(idx).ok())
}

pub fn list_usb_devices(context: &Context) -> Result<Vec<UsbDeviceSummary>, Error> {
    let devices = context.devices().map_err(Error::Enumerate)?;

    let mut summaries = Vec::new();
    for device in devices.iter() {
        match UsbDeviceSummary::new(&device) {
            Ok(summary) => summaries.push(summary),
            Err(e) => debug!(
                "skipping device at bus {} address {}: {}",
                device.bus_number(),
                device.address(),
                e
            ),
        }
    }

    Ok(summaries)
}

/// Returns the first device matching `target`, or `None` when it is not plugged in.
pub fn find_device(context: &Context, target: &Target) -> Result<Option<Device<Context>>, Error> {
    let devices = context.devices().map_err(Error::Enumerate)?;

    for device in devices.iter() {
        let descriptor = match device.device_descriptor() {
            Ok(descriptor) => descriptor,
            Err(_) => continue,
        };
        if !target.matches_ids(descriptor.vendor_id(), descriptor.product_id()) {
            continue;
        }
        if target.serial.is_none() {
            return Ok(Some(device));
        }

        let serial = match device.open() {
            Ok(handle) => read_string(&handle, descriptor.serial_number_string_index()),
            Err(e) => {
                debug!("cannot open candidate {} to read its serial: {}", target, e);
                None
            }
        };
        if target.matches_serial(serial.as_deref()) {
            return Ok(Some(device));
        }
    }

    Ok(None)
}
