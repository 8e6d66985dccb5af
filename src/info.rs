use crate::error::{AdbError, AdbResult};
use std::fmt;

/// State of a device as reported by `get-state`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DeviceState {
    /// Device is offline.
    Offline,
    /// Fully operational device.
    Device,
    /// No device is attached for the descriptor.
    NoDevice,
    /// Device requires USB debugging authorization.
    Unauthorized,
    /// The server does not know the state.
    Unknown,
}

impl DeviceState {
    /// Parse a state string. Strings outside the known set are a parse
    /// error rather than being folded into `Unknown`.
    pub fn parse(s: &str) -> AdbResult<Self> {
        match s.trim() {
            "offline" => Ok(DeviceState::Offline),
            "device" => Ok(DeviceState::Device),
            "no device" => Ok(DeviceState::NoDevice),
            "unauthorized" => Ok(DeviceState::Unauthorized),
            "unknown" => Ok(DeviceState::Unknown),
            other => Err(AdbError::parse(format!("invalid device state: {:?}", other))),
        }
    }
}

impl fmt::Display for DeviceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceState::Offline => write!(f, "offline"),
            DeviceState::Device => write!(f, "device"),
            DeviceState::NoDevice => write!(f, "no device"),
            DeviceState::Unauthorized => write!(f, "unauthorized"),
            DeviceState::Unknown => write!(f, "unknown"),
        }
    }
}

/// One row of the server's device listing. A snapshot; nothing caches it.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Device serial number (e.g., "emulator-5554", "R5CT200XXXX").
    pub serial: String,
    /// Raw state column ("device", "offline", ...).
    pub state: String,
    pub product: String,
    pub model: String,
    /// The `device:` field of the listing.
    pub device_name: String,
    /// USB port path, empty for TCP devices.
    pub usb: String,
    pub transport_id: Option<u64>,
}

impl DeviceInfo {
    /// Whether the device was connected over USB.
    pub fn is_usb(&self) -> bool {
        !self.usb.is_empty()
    }

    /// Parse the `serial\tstate\n` format returned by `host:devices`.
    ///
    /// Example input: `"emulator-5554\tdevice\nR5CT200XXXX\tunauthorized\n"`
    pub fn parse_device_list(data: &str) -> Vec<DeviceInfo> {
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .filter_map(|line| {
                let mut parts = line.split('\t');
                let serial = parts.next()?.trim().to_string();
                let state = parts.next()?.trim().to_string();
                Some(DeviceInfo {
                    serial,
                    state,
                    ..Default::default()
                })
            })
            .collect()
    }

    /// Parse the output of `host:devices-l`:
    ///
    /// `emulator-5554  device product:sdk_gphone model:Pixel device:generic transport_id:1`
    pub fn parse_device_list_long(data: &str) -> AdbResult<Vec<DeviceInfo>> {
        data.lines()
            .filter(|line| !line.trim().is_empty())
            .map(Self::parse_long_line)
            .collect()
    }

    fn parse_long_line(line: &str) -> AdbResult<DeviceInfo> {
        let mut fields = line.split_whitespace();
        let (Some(serial), Some(state)) = (fields.next(), fields.next()) else {
            return Err(AdbError::parse(format!("malformed device line: {:?}", line)));
        };
        let mut info = DeviceInfo {
            serial: serial.to_string(),
            state: state.to_string(),
            ..Default::default()
        };
        for field in fields {
            let Some((key, value)) = field.split_once(':') else {
                // Part of a multi-word state such as "no permissions (...)".
                continue;
            };
            match key {
                "usb" => info.usb = value.to_string(),
                "product" => info.product = value.to_string(),
                "model" => info.model = value.to_string(),
                "device" => info.device_name = value.to_string(),
                "transport_id" => {
                    let id = value.parse().map_err(|_| {
                        AdbError::parse(format!("invalid transport_id {:?} in {:?}", value, line))
                    })?;
                    info.transport_id = Some(id);
                }
                _ => {}
            }
        }
        Ok(info)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}\t{}", self.serial, self.state)
    }
}
