//! Client for the Android Debug Bridge server wire protocol.
//!
//! [`Adb`] talks to the server itself; [`Device`] runs shell commands,
//! manages port forwards and moves files on one device through the server.
//! Every operation opens its own connection and closes it before returning.

mod client;
mod config;
mod conn;
mod descriptor;
mod device;
mod error;
mod extra;
mod forward;
mod info;
#[cfg(test)]
mod mock;
mod progress;
mod protocol;
mod shell;
mod sync;
mod sync_conn;

pub use client::Adb;
pub use config::{AdbConfig, DEFAULT_HOST, DEFAULT_PORT, ENV_SERVER_ADDRESS, ENV_SERVER_PORT};
pub use conn::{AdbStream, Connection, Dialer, TcpDialer};
pub use descriptor::DeviceDescriptor;
pub use device::{Device, DeviceLister};
pub use error::{AdbError, AdbResult, ErrorContext, ErrorKind, ShellExit};
pub use extra::{PackageInfo, Process};
pub use forward::{
    ForwardPair, ForwardSpec, FORWARD_DEV, FORWARD_JDWP, FORWARD_LOCAL_ABSTRACT, FORWARD_LOCAL_FILESYSTEM,
    FORWARD_LOCAL_RESERVED, FORWARD_TCP,
};
pub use info::{DeviceInfo, DeviceState};
pub use progress::{Reporter, Transfer, TransferProgress};
pub use protocol::{HostCommand, LocalCommand};
pub use shell::prepare_command_line;
pub use sync::{DirEntry, SyncHeader, SyncId, SYNC_DATA_MAX};
pub use sync_conn::{DirEntries, FileReader, FileWriter, ModTime, SyncConnection};
