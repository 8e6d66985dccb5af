use std::fmt;

/// Selects which device a `Device` talks to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum DeviceDescriptor {
    /// The device with this serial number.
    Serial(String),
    /// The only connected device, whatever its transport.
    AnyDevice,
    /// The only device connected over USB.
    AnyUsb,
    /// The only device connected over TCP (emulators, `adb connect`).
    AnyTcp,
    /// The device the server assigned this transport id.
    TransportId(u64),
}

impl DeviceDescriptor {
    pub fn serial(serial: impl Into<String>) -> Self {
        DeviceDescriptor::Serial(serial.into())
    }

    /// Prefix for host-scoped requests about this device, e.g.
    /// `host-serial:<serial>` in `host-serial:<serial>:get-state`.
    pub fn host_prefix(&self) -> String {
        match self {
            DeviceDescriptor::Serial(serial) => format!("host-serial:{}", serial),
            DeviceDescriptor::AnyDevice => "host".to_string(),
            DeviceDescriptor::AnyUsb => "host-usb".to_string(),
            DeviceDescriptor::AnyTcp => "host-local".to_string(),
            DeviceDescriptor::TransportId(id) => format!("host-transport-id:{}", id),
        }
    }

    /// Service name that switches a connection into this device's scope,
    /// sent as `host:<transport descriptor>`.
    pub fn transport_descriptor(&self) -> String {
        match self {
            DeviceDescriptor::Serial(serial) => format!("transport:{}", serial),
            DeviceDescriptor::AnyDevice => "transport-any".to_string(),
            DeviceDescriptor::AnyUsb => "transport-usb".to_string(),
            DeviceDescriptor::AnyTcp => "transport-local".to_string(),
            DeviceDescriptor::TransportId(id) => format!("transport-id:{}", id),
        }
    }
}

impl fmt::Display for DeviceDescriptor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceDescriptor::Serial(serial) => write!(f, "serial:{}", serial),
            DeviceDescriptor::AnyDevice => write!(f, "any"),
            DeviceDescriptor::AnyUsb => write!(f, "any-usb"),
            DeviceDescriptor::AnyTcp => write!(f, "any-tcp"),
            DeviceDescriptor::TransportId(id) => write!(f, "transport-id:{}", id),
        }
    }
}
