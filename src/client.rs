use crate::config::AdbConfig;
use crate::conn::{Dialer, TcpDialer};
use crate::descriptor::DeviceDescriptor;
use crate::device::{Device, DeviceLister};
use crate::error::{AdbError, AdbResult};
use crate::info::DeviceInfo;
use crate::protocol::HostCommand;
use tracing::debug;

/// Client for the ADB server itself.
///
/// Each request opens a fresh connection to the server: the real ADB client
/// works the same way, since the server closes the socket after answering.
#[derive(Debug, Clone)]
pub struct Adb<D = TcpDialer> {
    dialer: D,
}

impl Adb<TcpDialer> {
    /// Client for the server at `127.0.0.1:5037`.
    pub fn new() -> Self {
        Self::from_config(AdbConfig::default())
    }

    pub fn with_address(host: &str, port: u16) -> Self {
        Self::from_config(AdbConfig::new(host, port))
    }

    pub fn from_config(config: AdbConfig) -> Self {
        Self::with_dialer(TcpDialer::new(config))
    }
}

impl Default for Adb<TcpDialer> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Dialer + Clone> Adb<D> {
    pub fn with_dialer(dialer: D) -> Self {
        Self { dialer }
    }

    pub fn dialer(&self) -> &D {
        &self.dialer
    }

    /// Protocol version of the running server.
    pub async fn server_version(&self) -> AdbResult<u32> {
        let resp = self.host_request(HostCommand::Version).await;
        resp.and_then(|resp| {
            let hex = String::from_utf8_lossy(&resp);
            u32::from_str_radix(hex.trim(), 16)
                .map_err(|_| AdbError::parse(format!("invalid server version: {:?}", hex)))
        })
        .map_err(|e| e.with_context("server", "ServerVersion"))
    }

    /// Serials of all devices the server knows about, in server order.
    pub async fn list_device_serials(&self) -> AdbResult<Vec<String>> {
        let resp = self
            .host_request(HostCommand::Devices)
            .await
            .map_err(|e| e.with_context("server", "ListDeviceSerials"))?;
        let text = String::from_utf8_lossy(&resp);
        Ok(DeviceInfo::parse_device_list(&text)
            .into_iter()
            .map(|d| d.serial)
            .collect())
    }

    /// Long device listing (`devices -l`).
    pub async fn list_devices(&self) -> AdbResult<Vec<DeviceInfo>> {
        let resp = self
            .host_request(HostCommand::DevicesLong)
            .await
            .map_err(|e| e.with_context("server", "ListDevices"))?;
        DeviceInfo::parse_device_list_long(&String::from_utf8_lossy(&resp))
            .map_err(|e| e.with_context("server", "ListDevices"))
    }

    /// A handle on the device matching `descriptor`. Nothing is dialed until
    /// the handle is used.
    pub fn device(&self, descriptor: DeviceDescriptor) -> Device<D, Adb<D>> {
        Device::new(self.dialer.clone(), descriptor, self.clone())
    }

    async fn host_request(&self, command: HostCommand) -> AdbResult<Vec<u8>> {
        let request = command.to_wire();
        debug!("Host request: {}", request);
        let mut conn = self.dialer.dial().await?;
        conn.round_trip(&request).await
    }
}

impl<D: Dialer + Clone> DeviceLister for Adb<D> {
    async fn list_devices(&self) -> AdbResult<Vec<DeviceInfo>> {
        Adb::list_devices(self).await
    }
}
