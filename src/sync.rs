use crate::error::{AdbError, AdbResult};
use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Maximum chunk size for DATA packets in sync protocol (64 KB).
pub const SYNC_DATA_MAX: usize = 64 * 1024;

/// File type mask of a Unix mode.
pub const S_IFMT: u32 = 0o170000;
/// Regular file.
pub const S_IFREG: u32 = 0o100000;
/// Directory.
pub const S_IFDIR: u32 = 0o040000;
/// Symbolic link.
pub const S_IFLNK: u32 = 0o120000;

/// Sync protocol command IDs, 4 ASCII characters each.
///
/// Every sync message has an 8-byte header: a 4-byte ASCII command ID
/// followed by a 4-byte little-endian u32 length/value.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncId {
    /// Query file metadata.
    Stat,
    /// List directory contents.
    List,
    /// Send (push) a file to the device.
    Send,
    /// Receive (pull) a file from the device.
    Recv,
    /// Data chunk within a send/recv transfer.
    Data,
    /// Marks the end of a file transfer or listing.
    Done,
    /// Success acknowledgment.
    Okay,
    /// Error response.
    Fail,
    /// Directory entry (response to LIST).
    Dent,
    /// Quit sync mode.
    Quit,
}

impl SyncId {
    /// The 4-byte ASCII representation of this command ID.
    pub fn as_bytes(&self) -> &'static [u8; 4] {
        match self {
            SyncId::Stat => b"STAT",
            SyncId::List => b"LIST",
            SyncId::Send => b"SEND",
            SyncId::Recv => b"RECV",
            SyncId::Data => b"DATA",
            SyncId::Done => b"DONE",
            SyncId::Okay => b"OKAY",
            SyncId::Fail => b"FAIL",
            SyncId::Dent => b"DENT",
            SyncId::Quit => b"QUIT",
        }
    }

    /// Parse a 4-byte ASCII slice into a `SyncId`.
    ///
    /// An unknown id means the stream lost framing, so it is a network error.
    pub fn from_bytes(bytes: &[u8]) -> AdbResult<SyncId> {
        if bytes.len() < 4 {
            return Err(AdbError::network(format!(
                "sync id too short: {} bytes, need 4",
                bytes.len()
            )));
        }
        match &bytes[..4] {
            b"STAT" => Ok(SyncId::Stat),
            b"LIST" => Ok(SyncId::List),
            b"SEND" => Ok(SyncId::Send),
            b"RECV" => Ok(SyncId::Recv),
            b"DATA" => Ok(SyncId::Data),
            b"DONE" => Ok(SyncId::Done),
            b"OKAY" => Ok(SyncId::Okay),
            b"FAIL" => Ok(SyncId::Fail),
            b"DENT" => Ok(SyncId::Dent),
            b"QUIT" => Ok(SyncId::Quit),
            other => Err(AdbError::network(format!(
                "unknown sync id: {:?}",
                String::from_utf8_lossy(other)
            ))),
        }
    }
}

/// The 8-byte sync header: 4-byte command ID + 4-byte little-endian u32 length.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncHeader {
    pub id: SyncId,
    pub length: u32,
}

impl SyncHeader {
    pub fn new(id: SyncId, length: u32) -> Self {
        Self { id, length }
    }

    /// Serialize to exactly 8 bytes.
    pub fn to_bytes(&self) -> [u8; 8] {
        let mut buf = [0u8; 8];
        buf[0..4].copy_from_slice(self.id.as_bytes());
        buf[4..8].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    /// Parse from a byte slice (must be at least 8 bytes).
    pub fn from_bytes(buf: &[u8]) -> AdbResult<Self> {
        if buf.len() < 8 {
            return Err(AdbError::network(format!(
                "sync header too short: {} bytes, need 8",
                buf.len()
            )));
        }
        let id = SyncId::from_bytes(&buf[0..4])?;
        let length = u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]);
        Ok(Self { id, length })
    }
}

/// Metadata for one remote path, from STAT or a LIST entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirEntry {
    /// File name; for `stat` results this is the queried path.
    pub name: String,
    /// Unix file mode (type + permissions).
    pub mode: u32,
    /// File size in bytes.
    pub size: u32,
    /// Last modification time (Unix seconds).
    pub mtime: u32,
}

impl DirEntry {
    /// Parse the 12 bytes of mode, size and mtime that follow a STAT id.
    pub fn from_stat_bytes(name: &str, buf: &[u8]) -> AdbResult<Self> {
        if buf.len() < 12 {
            return Err(AdbError::network(format!(
                "STAT response too short: {} bytes, need 12",
                buf.len()
            )));
        }
        Ok(Self {
            name: name.to_string(),
            mode: read_le(buf, 0),
            size: read_le(buf, 4),
            mtime: read_le(buf, 8),
        })
    }

    /// The protocol reports a missing path as an all-zero record.
    pub fn is_missing(&self) -> bool {
        self.mode == 0 && self.size == 0 && self.mtime == 0
    }

    /// Whether this is a regular file.
    pub fn is_file(&self) -> bool {
        (self.mode & S_IFMT) == S_IFREG
    }

    /// Whether this is a directory.
    pub fn is_directory(&self) -> bool {
        (self.mode & S_IFMT) == S_IFDIR
    }

    pub fn is_symlink(&self) -> bool {
        (self.mode & S_IFMT) == S_IFLNK
    }

    /// Extract the permission bits (lower 12 bits).
    pub fn permissions(&self) -> u32 {
        self.mode & 0o7777
    }

    pub fn modified(&self) -> SystemTime {
        UNIX_EPOCH + Duration::from_secs(u64::from(self.mtime))
    }
}

/// The fixed part of a DENT record after its id: mode, size, mtime, namelen.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DentHeader {
    pub mode: u32,
    pub size: u32,
    pub mtime: u32,
    pub name_len: u32,
}

impl DentHeader {
    pub const SIZE: usize = 16;

    pub fn from_bytes(buf: &[u8]) -> AdbResult<Self> {
        if buf.len() < Self::SIZE {
            return Err(AdbError::network(format!(
                "DENT entry too short: {} bytes, need {}",
                buf.len(),
                Self::SIZE
            )));
        }
        Ok(Self {
            mode: read_le(buf, 0),
            size: read_le(buf, 4),
            mtime: read_le(buf, 8),
            name_len: read_le(buf, 12),
        })
    }

    pub fn into_entry(self, name: String) -> DirEntry {
        DirEntry {
            name,
            mode: self.mode,
            size: self.size,
            mtime: self.mtime,
        }
    }
}

fn read_le(buf: &[u8], at: usize) -> u32 {
    u32::from_le_bytes([buf[at], buf[at + 1], buf[at + 2], buf[at + 3]])
}

fn encode_path_request(id: SyncId, remote_path: &str) -> AdbResult<Vec<u8>> {
    let payload = remote_path.as_bytes();
    let len = u32::try_from(payload.len())
        .map_err(|_| AdbError::assertion(format!("path too long: {} bytes", payload.len())))?;
    let mut buf = Vec::with_capacity(8 + payload.len());
    buf.extend_from_slice(&SyncHeader::new(id, len).to_bytes());
    buf.extend_from_slice(payload);
    Ok(buf)
}

/// Encode a STAT request: `STAT` + LE path length + path bytes.
pub fn encode_stat_request(remote_path: &str) -> AdbResult<Vec<u8>> {
    encode_path_request(SyncId::Stat, remote_path)
}

/// Encode a LIST request: `LIST` + LE path length + path bytes.
pub fn encode_list_request(remote_path: &str) -> AdbResult<Vec<u8>> {
    encode_path_request(SyncId::List, remote_path)
}

/// Encode a RECV request: `RECV` + LE path length + path bytes.
pub fn encode_recv_request(remote_path: &str) -> AdbResult<Vec<u8>> {
    encode_path_request(SyncId::Recv, remote_path)
}

/// Encode a SEND request: `SEND` + LE length + `{remote_path},{mode}`.
///
/// `mode` is sent in decimal and always carries the regular-file type bits.
pub fn encode_send_request(remote_path: &str, permissions: u32) -> AdbResult<Vec<u8>> {
    let mode = S_IFREG | (permissions & 0o7777);
    encode_path_request(SyncId::Send, &format!("{},{}", remote_path, mode))
}

/// Encode a DATA chunk header: `DATA` + LE data length. The caller writes
/// the bytes after it.
pub fn encode_data_header(len: usize) -> AdbResult<[u8; 8]> {
    if len > SYNC_DATA_MAX {
        return Err(AdbError::assertion(format!(
            "data chunk of {} bytes exceeds max {}",
            len, SYNC_DATA_MAX
        )));
    }
    Ok(SyncHeader::new(SyncId::Data, len as u32).to_bytes())
}

/// Encode a DONE message with modification time: `DONE` + LE mtime.
pub fn encode_done(mtime: u32) -> [u8; 8] {
    SyncHeader::new(SyncId::Done, mtime).to_bytes()
}

/// Encode a QUIT message: `QUIT` + LE 0.
pub fn encode_quit() -> [u8; 8] {
    SyncHeader::new(SyncId::Quit, 0).to_bytes()
}
