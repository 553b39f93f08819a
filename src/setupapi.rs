//! Windows view of present USB devices, as seen by SetupAPI rather than libusb.
//! Useful when a device enumerates but has no WinUSB driver bound, so libusb
//! cannot open it.

use windows::core::*;
use windows::Win32::Devices::DeviceAndDriverInstallation::*;
use windows::Win32::Foundation::*;

pub struct PresentUsbDevice {
    pub vendor_id: u16,
    pub product_id: u16,
    pub instance_id: String,
}

impl std::fmt::Display for PresentUsbDevice {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VID: 0x{:04X}, PID: 0x{:04X}, {}", self.vendor_id, self.product_id, self.instance_id)
    }
}

pub fn present_usb_devices() -> Result<Vec<PresentUsbDevice>> {
    let mut devices = Vec::new();

    unsafe {
        let info_set = SetupDiGetClassDevsW(None, w!("USB"), None, DIGCF_PRESENT | DIGCF_ALLCLASSES)?;

        for index in 0.. {
            let mut info = SP_DEVINFO_DATA {
                cbSize: std::mem::size_of::<SP_DEVINFO_DATA>() as u32,
                ..Default::default()
            };
            if let Err(e) = SetupDiEnumDeviceInfo(info_set, index, &mut info) {
                if e.code() != ERROR_NO_MORE_ITEMS.to_hresult() {
                    log::debug!("SetupAPI enumeration stopped early: {}", e);
                }
                break;
            }

            let mut buffer = [0u16; 512];
            let mut required = 0;
            if SetupDiGetDeviceInstanceIdW(info_set, &info, Some(&mut buffer), Some(&mut required)).is_err() {
                continue;
            }
            let instance_id = String::from_utf16_lossy(&buffer[..(required as usize).saturating_sub(1)]);
            if let Some((vendor_id, product_id)) = parse_instance_id(&instance_id) {
                devices.push(PresentUsbDevice { vendor_id, product_id, instance_id });
            }
        }

        let _ = SetupDiDestroyDeviceInfoList(info_set);
    }

    Ok(devices)
}

/// `USB\VID_C0DE&PID_CAFE\...` -> `(0xC0DE, 0xCAFE)`
fn parse_instance_id(id: &str) -> Option<(u16, u16)> {
    let rest = id.strip_prefix("USB\\")?;
    let vid_at = rest.find("VID_")? + 4;
    let pid_at = rest.find("PID_")? + 4;

    let vendor_id = u16::from_str_radix(rest.get(vid_at..vid_at + 4)?, 16).ok()?;
    let product_id = u16::from_str_radix(rest.get(pid_at..pid_at + 4)?, 16).ok()?;

    Some((vendor_id, product_id))
}
