use std::io::{Read, Write};
use std::time::Duration;

use serialport::SerialPortType;

use super::{Result, SerialDeviceInfo, SerialError};

// ESP32-S3 built-in USB-Serial/JTAG controller
pub const ESP32_VID: u16 = 0x303A; // Espressif
pub const ESP32_PID: u16 = 0x1001;
pub const BAUD_RATE: u32 = 460_800;
pub const READ_TIMEOUT: Duration = Duration::from_millis(1000);

/// Source of candidate serial ports.
pub trait PortEnumerator: Send + Sync {
    fn available_devices(&self) -> Result<Vec<SerialDeviceInfo>>;
}

/// Enumerates USB serial ports on this machine.
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemPorts;

impl PortEnumerator for SystemPorts {
    fn available_devices(&self) -> Result<Vec<SerialDeviceInfo>> {
        let ports = serialport::available_ports()?;
        let mut devices = Vec::new();

        for port in ports {
            if let SerialPortType::UsbPort(usb_info) = port.port_type {
                devices.push(SerialDeviceInfo {
                    port_name: port.port_name,
                    vid: usb_info.vid,
                    pid: usb_info.pid,
                    serial_number: usb_info.serial_number,
                    manufacturer: usb_info.manufacturer,
                    product: usb_info.product,
                });
            }
        }

        Ok(devices)
    }
}

/// All enumerated devices matching the given USB identifiers, in enumeration order.
pub fn discover_devices(enumerator: &dyn PortEnumerator, vid: u16, pid: u16) -> Result<Vec<SerialDeviceInfo>> {
    Ok(enumerator
        .available_devices()?
        .into_iter()
        .filter(|d| d.vid == vid && d.pid == pid)
        .collect())
}

/// Pick the device to talk to. With several matches the first one wins.
pub fn find_device(enumerator: &dyn PortEnumerator, vid: u16, pid: u16) -> Result<SerialDeviceInfo> {
    let mut devices = discover_devices(enumerator, vid, pid)?;
    if devices.len() > 1 {
        log::debug!(
            "{} devices match {:04x}:{:04x}, using {}",
            devices.len(),
            vid,
            pid,
            devices[0].port_name
        );
    }
    if devices.is_empty() {
        return Err(SerialError::DeviceNotFound { vid, pid });
    }
    let device = devices.swap_remove(0);
    log::debug!("ESP32 found at {}", device.port_name);
    Ok(device)
}

/// An opened device split into independently owned read and write halves.
pub struct SerialLink {
    pub reader: Box<dyn Read + Send>,
    pub writer: Box<dyn Write + Send>,
}

pub trait PortOpener: Send + Sync {
    fn open(&self, port_name: &str) -> Result<SerialLink>;
}

/// Opens real serial ports through `serialport`.
#[derive(Debug, Clone)]
pub struct SystemPortOpener {
    pub baud_rate: u32,
    pub read_timeout: Duration,
}

impl PortOpener for SystemPortOpener {
    fn open(&self, port_name: &str) -> Result<SerialLink> {
        let port = serialport::new(port_name, self.baud_rate)
            .timeout(self.read_timeout)
            .open()
            .map_err(|e| SerialError::ConnectionFailed(format!("{}: {}", port_name, e)))?;
        let reader = port.try_clone()?;

        log::info!("Connected to device on {}", port_name);
        Ok(SerialLink { reader: Box::new(reader), writer: Box::new(port) })
    }
}
