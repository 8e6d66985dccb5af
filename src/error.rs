use std::fmt;
use std::io;
use thiserror::Error;

/// The closed set of failure categories every operation reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// The caller passed an invalid argument (e.g. an empty command).
    Assertion,
    /// A protocol response or an argument could not be parsed.
    Parse,
    /// Socket I/O failed, the peer closed early, or the framing was violated.
    Network,
    /// The peer reset or aborted the connection.
    ConnectionReset,
    /// Nothing is listening at the configured server address.
    ServerNotAvailable,
    /// The descriptor does not resolve to a live device.
    DeviceNotFound,
    /// The server answered `FAIL` with a message.
    Adb,
    /// The remote path (or package) does not exist.
    FileNotFound,
    /// A local filesystem operation failed.
    Io,
    /// A shell command ran but exited with a non-zero status.
    ShellExit,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ErrorKind::Assertion => "AssertionError",
            ErrorKind::Parse => "ParseError",
            ErrorKind::Network => "NetworkError",
            ErrorKind::ConnectionReset => "ConnectionResetError",
            ErrorKind::ServerNotAvailable => "ServerNotAvailable",
            ErrorKind::DeviceNotFound => "DeviceNotFound",
            ErrorKind::Adb => "AdbError",
            ErrorKind::FileNotFound => "FileNoExistError",
            ErrorKind::Io => "IoError",
            ErrorKind::ShellExit => "ShellExitError",
        };
        f.write_str(name)
    }
}

/// Where an error happened: the device it was scoped to and the public
/// operation that was running.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ErrorContext {
    pub device: Option<String>,
    pub operation: Option<String>,
}

impl fmt::Display for ErrorContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.operation, &self.device) {
            (Some(op), Some(device)) => write!(f, " (in {} on {})", op, device),
            (Some(op), None) => write!(f, " (in {})", op),
            (None, Some(device)) => write!(f, " (on {})", device),
            (None, None) => Ok(()),
        }
    }
}

/// Details of a shell command that exited with a non-zero status.
///
/// The captured output is kept so callers can still use it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellExit {
    pub command: String,
    pub exit_code: i32,
    pub output: String,
}

type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

#[derive(Error, Debug)]
#[error("{kind}: {message}{context}")]
pub struct AdbError {
    kind: ErrorKind,
    message: String,
    context: ErrorContext,
    shell_exit: Option<ShellExit>,
    #[source]
    source: Option<BoxError>,
}

pub type AdbResult<T> = Result<T, AdbError>;

impl AdbError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            context: ErrorContext::default(),
            shell_exit: None,
            source: None,
        }
    }

    pub fn assertion(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Assertion, message)
    }

    pub fn parse(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Parse, message)
    }

    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Network, message)
    }

    pub fn device_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::DeviceNotFound, message)
    }

    /// The server explicitly rejected a request with `FAIL`.
    pub fn server(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::Adb, message)
    }

    pub fn file_not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorKind::FileNotFound, message)
    }

    /// A failure touching the local filesystem at `path`.
    pub fn local_io(path: &std::path::Path, err: io::Error) -> Self {
        let kind = if err.kind() == io::ErrorKind::NotFound {
            ErrorKind::FileNotFound
        } else {
            ErrorKind::Io
        };
        Self::new(kind, format!("{}: {}", path.display(), err)).with_source(err)
    }

    pub fn shell_exit(command: impl Into<String>, exit_code: i32, output: String) -> Self {
        let command = command.into();
        let mut err = Self::new(
            ErrorKind::ShellExit,
            format!("shell {} exit code {}", command, exit_code),
        );
        err.shell_exit = Some(ShellExit {
            command,
            exit_code,
            output,
        });
        err
    }

    pub fn with_source(mut self, source: impl Into<BoxError>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Replace the message, keeping the kind and nesting the previous error
    /// as the source.
    pub fn wrap(self, message: impl Into<String>) -> Self {
        let kind = self.kind;
        let context = self.context.clone();
        let mut err = Self::new(kind, message).with_source(self);
        err.context = context;
        err
    }

    /// Attach the device and operation, unless an inner layer already did.
    pub fn with_context(mut self, device: impl fmt::Display, operation: impl Into<String>) -> Self {
        if self.context.device.is_none() {
            self.context.device = Some(device.to_string());
        }
        if self.context.operation.is_none() {
            self.context.operation = Some(operation.into());
        }
        self
    }

    pub fn kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn message(&self) -> &str {
        &self.message
    }

    pub fn context(&self) -> &ErrorContext {
        &self.context
    }

    pub fn shell_exit_detail(&self) -> Option<&ShellExit> {
        self.shell_exit.as_ref()
    }

    /// Exit status of a failed shell command.
    pub fn exit_code(&self) -> Option<i32> {
        self.shell_exit.as_ref().map(|s| s.exit_code)
    }

    /// Output captured from a shell command that exited non-zero.
    pub fn output(&self) -> Option<&str> {
        self.shell_exit.as_ref().map(|s| s.output.as_str())
    }

    pub fn is(&self, kind: ErrorKind) -> bool {
        self.kind == kind
    }
}

impl From<io::Error> for AdbError {
    fn from(err: io::Error) -> Self {
        let kind = match err.kind() {
            io::ErrorKind::ConnectionReset
            | io::ErrorKind::ConnectionAborted
            | io::ErrorKind::BrokenPipe => ErrorKind::ConnectionReset,
            io::ErrorKind::ConnectionRefused => ErrorKind::ServerNotAvailable,
            _ => ErrorKind::Network,
        };
        let message = match err.kind() {
            io::ErrorKind::UnexpectedEof => "connection closed by peer".to_string(),
            io::ErrorKind::ConnectionRefused => {
                "connection refused: is the ADB server running? (try 'adb start-server')".to_string()
            }
            _ => err.to_string(),
        };
        AdbError::new(kind, message).with_source(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        let err = AdbError::server("device not found");
        assert_eq!(err.to_string(), "AdbError: device not found");

        let err = AdbError::assertion("command cannot be empty").with_context("serial:abc", "RunCommand");
        assert_eq!(
            err.to_string(),
            "AssertionError: command cannot be empty (in RunCommand on serial:abc)"
        );
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::BrokenPipe, "broken");
        let adb_err: AdbError = io_err.into();
        assert_eq!(adb_err.kind(), ErrorKind::ConnectionReset);
        assert!(adb_err.to_string().contains("broken"));

        let eof: AdbError = io::Error::new(io::ErrorKind::UnexpectedEof, "eof").into();
        assert_eq!(eof.kind(), ErrorKind::Network);

        let refused: AdbError = io::Error::new(io::ErrorKind::ConnectionRefused, "no").into();
        assert_eq!(refused.kind(), ErrorKind::ServerNotAvailable);
        assert!(refused.to_string().contains("ADB server running"));
    }

    #[test]
    fn test_context_is_set_once() {
        let err = AdbError::network("short read")
            .with_context("serial:abc", "Serial")
            .with_context("serial:abc", "ForwardList");
        assert_eq!(err.context().operation.as_deref(), Some("Serial"));
        assert_eq!(err.context().device.as_deref(), Some("serial:abc"));
    }

    #[test]
    fn test_wrap_keeps_kind_and_source() {
        let inner = AdbError::server("device offline");
        let err = inner.wrap("error connecting to device 'serial:abc'");
        assert_eq!(err.kind(), ErrorKind::Adb);
        assert_eq!(err.message(), "error connecting to device 'serial:abc'");
        let source = err.source().map(|s| s.to_string());
        assert_eq!(source.as_deref(), Some("AdbError: device offline"));
    }

    #[test]
    fn test_shell_exit_keeps_output() {
        let err = AdbError::shell_exit("ls /nope", 1, "no such file".into());
        assert_eq!(err.kind(), ErrorKind::ShellExit);
        assert_eq!(err.exit_code(), Some(1));
        assert_eq!(err.output(), Some("no such file"));
        assert_eq!(err.message(), "shell ls /nope exit code 1");
    }
}
