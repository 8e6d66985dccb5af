use crate::conn::Dialer;
use crate::device::{Device, DeviceLister};
use crate::error::{AdbError, AdbResult};
use std::fmt;
use std::str::FromStr;

pub const FORWARD_TCP: &str = "tcp";
pub const FORWARD_LOCAL_ABSTRACT: &str = "localabstract";
pub const FORWARD_LOCAL_RESERVED: &str = "localreserved";
pub const FORWARD_LOCAL_FILESYSTEM: &str = "localfilesystem";
pub const FORWARD_DEV: &str = "dev";
pub const FORWARD_JDWP: &str = "jdwp";

/// One end of a port forward, written `protocol:port-or-name`
/// (`tcp:8080`, `localabstract:chrome_devtools_remote`).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ForwardSpec {
    pub protocol: String,
    pub port_or_name: String,
}

impl ForwardSpec {
    pub fn new(protocol: impl Into<String>, port_or_name: impl Into<String>) -> Self {
        Self {
            protocol: protocol.into(),
            port_or_name: port_or_name.into(),
        }
    }

    pub fn tcp(port: u16) -> Self {
        Self::new(FORWARD_TCP, port.to_string())
    }

    pub fn local_abstract(name: impl Into<String>) -> Self {
        Self::new(FORWARD_LOCAL_ABSTRACT, name)
    }
}

impl fmt::Display for ForwardSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.protocol, self.port_or_name)
    }
}

impl FromStr for ForwardSpec {
    type Err = AdbError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let fields: Vec<&str> = s.split(':').collect();
        match fields.as_slice() {
            [protocol, port_or_name] => Ok(Self::new(*protocol, *port_or_name)),
            _ => Err(AdbError::parse(format!("invalid forward spec: {:?}", s))),
        }
    }
}

/// An active forward as reported by `list-forward`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForwardPair {
    pub serial: String,
    pub local: ForwardSpec,
    pub remote: ForwardSpec,
}

/// Parse `list-forward` output, keeping only rows for `serial`.
///
/// The server lists forwards for every device as whitespace separated
/// `serial local remote` triples, even on a device-scoped request.
pub fn parse_forward_list(data: &str, serial: &str) -> AdbResult<Vec<ForwardPair>> {
    let fields: Vec<&str> = data.split_whitespace().collect();
    if fields.len() % 3 != 0 {
        return Err(AdbError::parse(format!(
            "list forward parse error: {} fields is not a multiple of 3",
            fields.len()
        )));
    }

    let mut pairs = Vec::new();
    for row in fields.chunks(3) {
        if row[0] != serial {
            continue;
        }
        pairs.push(ForwardPair {
            serial: row[0].to_string(),
            local: row[1].parse()?,
            remote: row[2].parse()?,
        });
    }
    Ok(pairs)
}

impl<D: Dialer, L: DeviceLister> Device<D, L> {
    /// Forward connections to `local` on the host to `remote` on the device.
    pub async fn forward(&self, local: &ForwardSpec, remote: &ForwardSpec) -> AdbResult<()> {
        self.host_request(&format!("forward:{};{}", local, remote))
            .await
            .map_err(self.error_context("Forward"))
    }

    pub async fn forward_remove(&self, local: &ForwardSpec) -> AdbResult<()> {
        self.host_request(&format!("killforward:{}", local))
            .await
            .map_err(self.error_context("ForwardRemove"))
    }

    /// Remove every forward of this device. Succeeds when there are none.
    pub async fn forward_remove_all(&self) -> AdbResult<()> {
        self.host_request("killforward-all")
            .await
            .map_err(self.error_context("ForwardRemoveAll"))
    }

    pub async fn forward_list(&self) -> AdbResult<Vec<ForwardPair>> {
        let serial = self.serial().await?;
        let data = self
            .get_attribute("list-forward")
            .await
            .map_err(self.error_context("ForwardList"))?;
        parse_forward_list(&data, &serial).map_err(self.error_context("ForwardList"))
    }
}
