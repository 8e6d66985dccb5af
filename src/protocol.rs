use crate::error::{AdbError, AdbResult};

// Host framing:
//
//   request   <len:4 hex digits><payload>
//   response  OKAY[<len:4 hex digits><body>]
//             FAIL<len:4 hex digits><message>
//
// Whether an OKAY carries a body depends on the service. Shell output
// carries none and runs until the server closes the socket.

/// Largest payload a 4-hex-digit header can describe.
pub const MAX_MESSAGE_LEN: usize = 0xFFFF;

/// Frame `payload` with its byte length as four uppercase hex digits.
pub fn encode_request(payload: &str) -> AdbResult<Vec<u8>> {
    if payload.len() > MAX_MESSAGE_LEN {
        return Err(AdbError::assertion(format!(
            "request too long: {} bytes, max {}",
            payload.len(),
            MAX_MESSAGE_LEN
        )));
    }
    Ok(format!("{:04X}{}", payload.len(), payload).into_bytes())
}

/// Status token that starts every server response.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AdbStatus {
    Okay,
    Fail,
}

/// Parse a 4-byte status token (`OKAY` or `FAIL`).
///
/// Anything else means the stream is out of step with the protocol, which is
/// a network-level failure.
pub fn parse_status(buf: &[u8]) -> AdbResult<AdbStatus> {
    if buf.len() < 4 {
        return Err(AdbError::network(format!(
            "status too short: {} bytes, need 4",
            buf.len()
        )));
    }
    match &buf[..4] {
        b"OKAY" => Ok(AdbStatus::Okay),
        b"FAIL" => Ok(AdbStatus::Fail),
        other => Err(AdbError::network(format!(
            "invalid status: expected OKAY or FAIL, got {:?}",
            String::from_utf8_lossy(other)
        ))),
    }
}

/// Parse a 4-character hex length header into a `usize`.
pub fn parse_hex_length(buf: &[u8]) -> AdbResult<usize> {
    if buf.len() < 4 {
        return Err(AdbError::network(format!(
            "hex length too short: {} bytes, need 4",
            buf.len()
        )));
    }
    let hex_str = std::str::from_utf8(&buf[..4])
        .map_err(|_| AdbError::network(format!("invalid UTF-8 in hex length: {:?}", &buf[..4])))?;
    usize::from_str_radix(hex_str, 16)
        .map_err(|_| AdbError::network(format!("invalid hex length: {:?}", hex_str)))
}

/// Host services answered by the ADB server itself.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HostCommand {
    Version,
    /// `serial\tstate` per line.
    Devices,
    /// `devices -l`: state plus product, model and transport details.
    DevicesLong,
}

impl HostCommand {
    pub fn to_wire(&self) -> String {
        match self {
            HostCommand::Version => "host:version".to_string(),
            HostCommand::Devices => "host:devices".to_string(),
            HostCommand::DevicesLong => "host:devices-l".to_string(),
        }
    }
}

/// Services forwarded to the device once the connection is in device scope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LocalCommand {
    /// Execute a prepared command line on the device.
    Shell(String),
    /// Enter file sync mode.
    Sync,
    /// Ask adbd to remount the system partitions read-write.
    Remount,
}

impl LocalCommand {
    /// Request text sent after the transport has been selected.
    pub fn to_wire(&self) -> String {
        match self {
            LocalCommand::Shell(cmd) => format!("shell:{}", cmd),
            LocalCommand::Sync => "sync:".to_string(),
            LocalCommand::Remount => "remount:".to_string(),
        }
    }
}
