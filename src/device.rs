use crate::conn::{Connection, Dialer};
use crate::descriptor::DeviceDescriptor;
use crate::error::{AdbError, AdbResult, ErrorKind};
use crate::info::{DeviceInfo, DeviceState};
use crate::progress::{Reporter, Transfer};
use crate::protocol::LocalCommand;
use crate::shell;
use crate::sync::{DirEntry, SYNC_DATA_MAX};
use crate::sync_conn::{DirEntries, FileReader, FileWriter, ModTime, SyncConnection};
use once_cell::sync::Lazy;
use regex::Regex;
use std::fmt;
use std::future::Future;
use std::path::Path;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;

static DEVICE_NOT_FOUND_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^device( '.*')? not found").expect("valid device-not-found regex"));

/// Source of the server's device listing, used by `Device::device_info`.
///
/// Any `Fn() -> impl Future<Output = AdbResult<Vec<DeviceInfo>>>` closure
/// works as a lister.
pub trait DeviceLister: Send + Sync {
    fn list_devices(&self) -> impl Future<Output = AdbResult<Vec<DeviceInfo>>> + Send;
}

impl<F, Fut> DeviceLister for F
where
    F: Fn() -> Fut + Send + Sync,
    Fut: Future<Output = AdbResult<Vec<DeviceInfo>>> + Send,
{
    fn list_devices(&self) -> impl Future<Output = AdbResult<Vec<DeviceInfo>>> + Send {
        self()
    }
}

/// Talks to one device, selected by a `DeviceDescriptor`.
///
/// Holds no connection: every call dials the server, does its work and
/// closes the socket again, on success and on error.
pub struct Device<D, L> {
    dialer: D,
    descriptor: DeviceDescriptor,
    lister: L,
}

impl<D, L> fmt::Debug for Device<D, L> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("descriptor", &self.descriptor)
            .finish_non_exhaustive()
    }
}

impl<D: Dialer, L: DeviceLister> Device<D, L> {
    pub fn new(dialer: D, descriptor: DeviceDescriptor, lister: L) -> Self {
        Self {
            dialer,
            descriptor,
            lister,
        }
    }

    pub fn descriptor(&self) -> &DeviceDescriptor {
        &self.descriptor
    }

    pub(crate) fn error_context(&self, operation: &str) -> impl Fn(AdbError) -> AdbError + '_ {
        let operation = operation.to_string();
        move |e| e.with_context(&self.descriptor, operation.clone())
    }

    pub async fn serial(&self) -> AdbResult<String> {
        self.get_attribute("get-serialno")
            .await
            .map_err(self.error_context("Serial"))
    }

    pub async fn device_path(&self) -> AdbResult<String> {
        self.get_attribute("get-devpath")
            .await
            .map_err(self.error_context("DevicePath"))
    }

    pub async fn state(&self) -> AdbResult<DeviceState> {
        let attr = self
            .get_attribute("get-state")
            .await
            .map_err(self.error_context("State"))?;
        DeviceState::parse(&attr).map_err(self.error_context("State"))
    }

    /// `get-product` is documented but not implemented by most servers.
    pub async fn product(&self) -> AdbResult<String> {
        self.get_attribute("get-product")
            .await
            .map_err(self.error_context("Product"))
    }

    /// Look this device up in the server's device listing.
    pub async fn device_info(&self) -> AdbResult<DeviceInfo> {
        let serial = self
            .serial()
            .await
            .map_err(self.error_context("DeviceInfo(Serial)"))?;
        let devices = self
            .lister
            .list_devices()
            .await
            .map_err(self.error_context("DeviceInfo(ListDevices)"))?;
        devices
            .into_iter()
            .find(|d| d.serial == serial)
            .ok_or_else(|| {
                AdbError::device_not_found(format!("device list doesn't contain serial {}", serial))
            })
            .map_err(self.error_context("DeviceInfo"))
    }

    /// Run a shell command and return the connection streaming its output.
    ///
    /// Shell output has no length header; read it until the peer closes.
    pub async fn open_command<S: AsRef<str>>(&self, cmd: &str, args: &[S]) -> AdbResult<Connection> {
        let line = shell::prepare_command_line(cmd, args).map_err(self.error_context("RunCommand"))?;
        let mut conn = self.dial_device().await.map_err(self.error_context("RunCommand"))?;
        let request = LocalCommand::Shell(line).to_wire();
        if let Err(e) = conn.round_trip_no_response(&request).await {
            drop(conn);
            return Err(e.with_context(&self.descriptor, "RunCommand"));
        }
        Ok(conn)
    }

    /// Run a command and return everything it printed, untouched.
    pub async fn command_output<S: AsRef<str>>(&self, cmd: &str, args: &[S]) -> AdbResult<String> {
        let mut conn = self.open_command(cmd, args).await?;
        let output = conn
            .read_until_close()
            .await
            .map_err(self.error_context("RunCommand"))?;
        Ok(String::from_utf8_lossy(&output).to_string())
    }

    /// Run a command and return its output with `\r\n` turned into `\n`.
    ///
    /// A non-zero exit status is a `ShellExit` error that still carries the
    /// output. An exit status that cannot be parsed counts as 0.
    pub async fn run_command<S: AsRef<str>>(&self, cmd: &str, args: &[S]) -> AdbResult<String> {
        let (output, exit_code) = self.run_with_sentinel(cmd, args).await?;
        if exit_code != 0 {
            let command = args
                .iter()
                .fold(cmd.to_string(), |acc, a| format!("{} {}", acc, a.as_ref()));
            return Err(AdbError::shell_exit(command, exit_code, output)
                .with_context(&self.descriptor, "RunCommand"));
        }
        Ok(output)
    }

    /// Like `run_command`, but returns the exit status instead of turning a
    /// non-zero status into an error.
    pub async fn run_command_with_exit_code<S: AsRef<str>>(
        &self,
        cmd: &str,
        args: &[S],
    ) -> AdbResult<(String, i32)> {
        self.run_with_sentinel(cmd, args).await
    }

    async fn run_with_sentinel<S: AsRef<str>>(&self, cmd: &str, args: &[S]) -> AdbResult<(String, i32)> {
        let args = shell::with_exit_code_sentinel(args);
        let raw = self.command_output(cmd, &args).await?;
        shell::split_exit_code(&raw).map_err(self.error_context("RunCommand"))
    }

    /// Ask adbd to remount the system partitions read-write.
    pub async fn remount(&self) -> AdbResult<String> {
        let mut conn = self.dial_device().await.map_err(self.error_context("Remount"))?;
        let resp = conn
            .round_trip(&LocalCommand::Remount.to_wire())
            .await
            .map_err(self.error_context("Remount"))?;
        Ok(String::from_utf8_lossy(&resp).to_string())
    }

    /// Open a sync-mode connection to this device.
    pub async fn sync(&self) -> AdbResult<SyncConnection> {
        self.open_sync().await.map_err(self.error_context("Sync"))
    }

    pub async fn stat(&self, path: &str) -> AdbResult<DirEntry> {
        let op = format!("Stat({})", path);
        let mut sync = self.open_sync().await.map_err(self.error_context(&op))?;
        let entry = sync.stat(path).await.map_err(self.error_context(&op))?;
        if let Err(e) = sync.quit().await {
            debug!("QUIT after stat failed: {}", e);
        }
        Ok(entry)
    }

    pub async fn list_dir_entries(&self, path: &str) -> AdbResult<DirEntries> {
        let op = format!("ListDirEntries({})", path);
        let sync = self.open_sync().await.map_err(self.error_context(&op))?;
        sync.list(path).await.map_err(self.error_context(&op))
    }

    pub async fn open_read(&self, path: &str) -> AdbResult<FileReader> {
        let op = format!("OpenRead({})", path);
        let sync = self.open_sync().await.map_err(self.error_context(&op))?;
        sync.receive(path).await.map_err(self.error_context(&op))
    }

    /// Open `path` for writing, creating it with `permissions` if needed.
    /// The file gets `mtime` as its modification time when the writer is
    /// closed.
    pub async fn open_write(&self, path: &str, permissions: u32, mtime: ModTime) -> AdbResult<FileWriter> {
        let op = format!("OpenWrite({})", path);
        let sync = self.open_sync().await.map_err(self.error_context(&op))?;
        sync.send(path, permissions, mtime)
            .await
            .map_err(self.error_context(&op))
    }

    /// Push a local file in the background, reporting progress.
    ///
    /// The remote file keeps the local modification time. Progress counts
    /// bytes sent to the device, not bytes read from the local file.
    pub async fn push_file(&self, local: &Path, remote: &str, permissions: u32) -> AdbResult<Transfer> {
        let mut file = tokio::fs::File::open(local)
            .await
            .map_err(|e| AdbError::local_io(local, e))?;
        let metadata = file
            .metadata()
            .await
            .map_err(|e| AdbError::local_io(local, e))?;
        let mtime = metadata.modified().map(ModTime::At).unwrap_or_default();
        let mut writer = self.open_write(remote, permissions, mtime).await?;

        let local = local.to_path_buf();
        let context = format!("Push({})", remote);
        let descriptor = self.descriptor.clone();
        Ok(Transfer::spawn(metadata.len(), move |reporter| async move {
            let result: AdbResult<u64> = async {
                let mut buf = vec![0u8; SYNC_DATA_MAX];
                let mut reported = 0u64;
                loop {
                    let n = file
                        .read(&mut buf)
                        .await
                        .map_err(|e| AdbError::local_io(&local, e))?;
                    if n == 0 {
                        break;
                    }
                    writer.write(&buf[..n]).await?;
                    reported = report_sent(&reporter, &writer, reported);
                }
                writer.flush().await?;
                let copied = report_sent(&reporter, &writer, reported);
                reporter.copy_finished();
                writer.close().await?;
                Ok(copied)
            }
            .await;
            result.map_err(|e| e.with_context(&descriptor, context))
        }))
    }

    /// Pull a remote file to `local` in the background, reporting progress.
    pub async fn pull_file(&self, remote: &str, local: &Path) -> AdbResult<Transfer> {
        let total = self.stat(remote).await?.size;
        let mut reader = self.open_read(remote).await?;
        let mut file = tokio::fs::File::create(local)
            .await
            .map_err(|e| AdbError::local_io(local, e))?;

        let local = local.to_path_buf();
        let context = format!("Pull({})", remote);
        let descriptor = self.descriptor.clone();
        Ok(Transfer::spawn(u64::from(total), move |reporter| async move {
            let result: AdbResult<u64> = async {
                let mut copied = 0u64;
                while let Some(chunk) = reader.next_chunk().await? {
                    file.write_all(&chunk)
                        .await
                        .map_err(|e| AdbError::local_io(&local, e))?;
                    copied += chunk.len() as u64;
                    reporter.advance(chunk.len());
                }
                file.flush().await.map_err(|e| AdbError::local_io(&local, e))?;
                reporter.copy_finished();
                Ok(copied)
            }
            .await;
            result.map_err(|e| e.with_context(&descriptor, context))
        }))
    }

    /// Returns the first message from `<host-prefix>:<attr>`.
    pub(crate) async fn get_attribute(&self, attr: &str) -> AdbResult<String> {
        let request = format!("{}:{}", self.descriptor.host_prefix(), attr);
        let mut conn = self.dialer.dial().await?;
        let resp = conn.round_trip(&request).await?;
        Ok(String::from_utf8_lossy(&resp).to_string())
    }

    /// Send a host-scoped request that has no response body.
    pub(crate) async fn host_request(&self, service: &str) -> AdbResult<()> {
        let request = format!("{}:{}", self.descriptor.host_prefix(), service);
        let mut conn = self.dialer.dial().await?;
        conn.round_trip_no_response(&request).await
    }

    async fn open_sync(&self) -> AdbResult<SyncConnection> {
        let mut conn = self.dial_device().await?;
        conn.round_trip_no_response(&LocalCommand::Sync.to_wire())
            .await?;
        Ok(conn.into_sync())
    }

    /// Dial the server and switch the connection to this device's transport.
    async fn dial_device(&self) -> AdbResult<Connection> {
        let mut conn = self.dialer.dial().await?;
        let request = format!("host:{}", self.descriptor.transport_descriptor());
        match conn.round_trip_no_response(&request).await {
            Ok(()) => Ok(conn),
            Err(e) => {
                drop(conn);
                let message = format!("error connecting to device '{}'", self.descriptor);
                let e = match e.kind() {
                    ErrorKind::Adb if DEVICE_NOT_FOUND_RE.is_match(e.message()) => {
                        AdbError::device_not_found(message).with_source(e)
                    }
                    ErrorKind::Adb | ErrorKind::Network => e.wrap(message),
                    _ => e,
                };
                Err(e)
            }
        }
    }
}

/// Advance progress to the bytes `writer` has put on the wire.
fn report_sent(reporter: &Reporter, writer: &FileWriter, reported: u64) -> u64 {
    let sent = writer.bytes_sent();
    reporter.advance((sent - reported) as usize);
    sent
}
