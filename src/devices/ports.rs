use serialport::{SerialPortInfo, SerialPortType};

use crate::errors::DeviceError;

/// USB vendor ids of the boards the rover firmware usually runs on.
///
/// Arduino (two ids), WCH CH340 and FTDI adapters.
pub const DEFAULT_VENDOR_IDS: [u16; 4] = [0x2341, 0x2A03, 0x1A86, 0x0403];

/// How well a serial port matches what the rover looks like.
/// Ordered from best to worst.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum RoverSerialClass {
    /// A USB port from a preferred vendor, or one that reports itself as an Arduino
    KnownVendor,
    /// Any other port whose name looks like a USB serial adapter
    UsbSerial,
}

/// Information about a serial port that could be the rover.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RoverSerialInfo {
    pub port_info: SerialPortInfo,
    pub class: RoverSerialClass,
}

impl RoverSerialInfo {
    pub fn name(&self) -> &str {
        &self.port_info.port_name
    }
}

/// Works out whether a port could be the rover, and how likely.
pub fn classify(port: &SerialPortInfo, vendor_ids: &[u16]) -> Option<RoverSerialClass> {
    if let SerialPortType::UsbPort(info) = &port.port_type {
        let arduino = info
            .manufacturer
            .as_deref()
            .map(|m| m.contains("Arduino"))
            .unwrap_or(false);
        if vendor_ids.contains(&info.vid) || arduino {
            return Some(RoverSerialClass::KnownVendor);
        }
    }

    // Typical names: ttyUSB* and ttyACM* on Linux, usbserial/usbmodem on macOS, COM* on Windows
    let name = &port.port_name;
    if ["USB", "ACM", "COM", "usbserial", "usbmodem"]
        .iter()
        .any(|pattern| name.contains(pattern))
    {
        return Some(RoverSerialClass::UsbSerial);
    }

    None
}

/// Filters `ports` down to rover candidates, best match first.
///
/// Ports of the same class keep the order the system listed them in.
pub fn rank_ports(ports: Vec<SerialPortInfo>, vendor_ids: &[u16]) -> Vec<RoverSerialInfo> {
    let mut candidates: Vec<RoverSerialInfo> = ports
        .into_iter()
        .filter_map(|port_info| {
            classify(&port_info, vendor_ids).map(|class| RoverSerialInfo { port_info, class })
        })
        .collect();

    // Stable, so the system order survives within a class
    candidates.sort_by_key(|c| c.class);
    candidates
}

/// Picks the best candidate out of `ports`.
pub fn select_port(
    ports: Vec<SerialPortInfo>,
    vendor_ids: &[u16],
) -> Result<RoverSerialInfo, DeviceError> {
    rank_ports(ports, vendor_ids)
        .into_iter()
        .next()
        .ok_or(DeviceError::NoPortFound)
}

/// Finds all serial ports on this computer that could be the rover.
pub fn discover_rover_ports(vendor_ids: &[u16]) -> Result<Vec<RoverSerialInfo>, DeviceError> {
    // Get all serial devices
    let available_ports = serialport::available_ports()?;

    Ok(rank_ports(available_ports, vendor_ids))
}

/// Finds the serial port the rover is most likely on.
pub fn find_rover_port(vendor_ids: &[u16]) -> Result<RoverSerialInfo, DeviceError> {
    select_port(serialport::available_ports()?, vendor_ids)
}
