use crate::conn::Connection;
use crate::error::{AdbError, AdbResult, ErrorKind};
use crate::sync::{self, DentHeader, DirEntry, SyncHeader, SyncId, SYNC_DATA_MAX};
use bytes::{Bytes, BytesMut};
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tracing::{debug, trace};

/// Modification time recorded when a pushed file is closed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ModTime {
    /// Use the time `FileWriter::close` is called.
    #[default]
    OnClose,
    /// Use this exact time.
    At(SystemTime),
}

impl ModTime {
    fn unix_secs(self) -> u32 {
        let time = match self {
            ModTime::OnClose => SystemTime::now(),
            ModTime::At(time) => time,
        };
        time.duration_since(UNIX_EPOCH)
            .map(|d| u32::try_from(d.as_secs()).unwrap_or(u32::MAX))
            .unwrap_or(0)
    }
}

/// A connection that has switched to the binary sync sub-protocol.
#[derive(Debug)]
pub struct SyncConnection {
    conn: Connection,
}

impl SyncConnection {
    pub(crate) fn new(conn: Connection) -> Self {
        Self { conn }
    }

    /// Query mode, size and mtime of `path`.
    ///
    /// A missing path comes back as an all-zero record, reported here as a
    /// `FileNotFound` error.
    pub async fn stat(&mut self, path: &str) -> AdbResult<DirEntry> {
        trace!("STAT {}", path);
        self.conn.write_all(&sync::encode_stat_request(path)?).await?;

        let mut id = [0u8; 4];
        self.conn.read_exact(&mut id).await?;
        match SyncId::from_bytes(&id)? {
            SyncId::Stat => {}
            SyncId::Fail => return Err(self.read_fail().await),
            other => {
                return Err(AdbError::network(format!(
                    "expected STAT response, got {:?}",
                    other
                )))
            }
        }

        let mut buf = [0u8; 12];
        self.conn.read_exact(&mut buf).await?;
        let entry = DirEntry::from_stat_bytes(path, &buf)?;
        if entry.is_missing() {
            return Err(AdbError::file_not_found(format!(
                "{}: no such file or directory",
                path
            )));
        }
        Ok(entry)
    }

    /// Start listing `path`. Entries are read lazily from the connection.
    pub async fn list(mut self, path: &str) -> AdbResult<DirEntries> {
        trace!("LIST {}", path);
        self.conn.write_all(&sync::encode_list_request(path)?).await?;
        Ok(DirEntries {
            sync: Some(self),
            path: path.to_string(),
        })
    }

    /// Start pulling `path`.
    ///
    /// The first response is read eagerly so a rejected path fails here
    /// rather than on the first read.
    pub async fn receive(mut self, path: &str) -> AdbResult<FileReader> {
        trace!("RECV {}", path);
        self.conn.write_all(&sync::encode_recv_request(path)?).await?;
        let mut reader = FileReader {
            sync: Some(self),
            pending: None,
            path: path.to_string(),
        };
        match reader.read_next().await? {
            Some(chunk) => reader.pending = Some(chunk),
            None => debug!("{} is empty", path),
        }
        Ok(reader)
    }

    /// Start pushing to `path`, created with `permissions` if needed.
    pub async fn send(mut self, path: &str, permissions: u32, mtime: ModTime) -> AdbResult<FileWriter> {
        trace!("SEND {} {:o}", path, permissions);
        self.conn
            .write_all(&sync::encode_send_request(path, permissions)?)
            .await?;
        Ok(FileWriter {
            sync: self,
            buf: BytesMut::with_capacity(SYNC_DATA_MAX),
            mtime,
            path: path.to_string(),
            written: 0,
        })
    }

    /// Leave sync mode and close the connection.
    pub async fn quit(mut self) -> AdbResult<()> {
        self.conn.write_all(&sync::encode_quit()).await?;
        self.conn.close().await
    }

    async fn quit_quietly(self, path: &str) {
        if let Err(e) = self.quit().await {
            debug!("QUIT after {} failed: {}", path, e);
        }
    }

    async fn read_header(&mut self) -> AdbResult<SyncHeader> {
        let mut buf = [0u8; 8];
        self.conn.read_exact(&mut buf).await?;
        SyncHeader::from_bytes(&buf)
    }

    /// Read the message after a FAIL id and turn it into an error.
    async fn read_fail(&mut self) -> AdbError {
        match self.conn.read_u32_le().await {
            Ok(len) => self.read_fail_body(len).await,
            Err(e) => e,
        }
    }

    async fn read_fail_body(&mut self, len: u32) -> AdbError {
        if len as usize > SYNC_DATA_MAX {
            return AdbError::network(format!("sync FAIL message of {} bytes is too long", len));
        }
        let mut msg = vec![0u8; len as usize];
        match self.conn.read_exact(&mut msg).await {
            Ok(()) => AdbError::server(String::from_utf8_lossy(&msg).to_string()),
            Err(e) => e,
        }
    }
}

/// Entries of a remote directory, read one at a time.
///
/// Once the end marker is seen (or an error occurs) the connection is
/// released and `next` keeps returning `None`.
#[derive(Debug)]
pub struct DirEntries {
    sync: Option<SyncConnection>,
    path: String,
}

impl DirEntries {
    pub async fn next(&mut self) -> AdbResult<Option<DirEntry>> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(None);
        };
        match Self::read_entry(sync).await {
            Ok(Some(entry)) => Ok(Some(entry)),
            Ok(None) => {
                if let Some(sync) = self.sync.take() {
                    sync.quit_quietly(&self.path).await;
                }
                Ok(None)
            }
            Err(e) => {
                self.sync = None;
                Err(e)
            }
        }
    }

    /// Drain the remaining entries.
    pub async fn collect_all(mut self) -> AdbResult<Vec<DirEntry>> {
        let mut entries = Vec::new();
        while let Some(entry) = self.next().await? {
            entries.push(entry);
        }
        Ok(entries)
    }

    async fn read_entry(sync: &mut SyncConnection) -> AdbResult<Option<DirEntry>> {
        let mut id = [0u8; 4];
        sync.conn.read_exact(&mut id).await?;
        match SyncId::from_bytes(&id)? {
            SyncId::Dent => {
                let mut buf = [0u8; DentHeader::SIZE];
                sync.conn.read_exact(&mut buf).await?;
                let header = DentHeader::from_bytes(&buf)?;
                if header.name_len as usize > SYNC_DATA_MAX {
                    return Err(AdbError::network(format!(
                        "DENT name of {} bytes is too long",
                        header.name_len
                    )));
                }
                let mut name = vec![0u8; header.name_len as usize];
                sync.conn.read_exact(&mut name).await?;
                let name = String::from_utf8_lossy(&name).to_string();
                Ok(Some(header.into_entry(name)))
            }
            SyncId::Done => {
                // DONE carries a zeroed dent body.
                let mut buf = [0u8; DentHeader::SIZE];
                sync.conn.read_exact(&mut buf).await?;
                Ok(None)
            }
            SyncId::Fail => Err(sync.read_fail().await),
            other => Err(AdbError::network(format!(
                "unexpected sync id in LIST response: {:?}",
                other
            ))),
        }
    }
}

/// Streams a remote file chunk by chunk.
///
/// The transfer ends at the DONE marker; a socket closing before it is a
/// network error.
#[derive(Debug)]
pub struct FileReader {
    sync: Option<SyncConnection>,
    pending: Option<Bytes>,
    path: String,
}

impl FileReader {
    /// Next chunk of file data, or `None` once the file is complete.
    pub async fn next_chunk(&mut self) -> AdbResult<Option<Bytes>> {
        if let Some(chunk) = self.pending.take() {
            return Ok(Some(chunk));
        }
        self.read_next().await
    }

    pub async fn read_to_end(mut self) -> AdbResult<Vec<u8>> {
        let mut data = Vec::new();
        while let Some(chunk) = self.next_chunk().await? {
            data.extend_from_slice(&chunk);
        }
        Ok(data)
    }

    /// Copy the rest of the file into `writer`, returning the bytes copied.
    ///
    /// Failures of `writer` are local and reported as `ErrorKind::Io`.
    pub async fn copy_to<W: AsyncWrite + Unpin>(&mut self, writer: &mut W) -> AdbResult<u64> {
        let path = self.path.clone();
        let local_err = |e: std::io::Error| {
            AdbError::new(ErrorKind::Io, format!("writing {} locally: {}", path, e)).with_source(e)
        };
        let mut copied = 0u64;
        while let Some(chunk) = self.next_chunk().await? {
            writer.write_all(&chunk).await.map_err(local_err)?;
            copied += chunk.len() as u64;
        }
        writer.flush().await.map_err(local_err)?;
        Ok(copied)
    }

    async fn read_next(&mut self) -> AdbResult<Option<Bytes>> {
        let Some(sync) = self.sync.as_mut() else {
            return Ok(None);
        };
        match Self::read_chunk(sync).await {
            Ok(Some(chunk)) => Ok(Some(chunk)),
            Ok(None) => {
                if let Some(sync) = self.sync.take() {
                    sync.quit_quietly(&self.path).await;
                }
                Ok(None)
            }
            Err(e) => {
                self.sync = None;
                Err(e)
            }
        }
    }

    async fn read_chunk(sync: &mut SyncConnection) -> AdbResult<Option<Bytes>> {
        let header = sync.read_header().await?;
        match header.id {
            SyncId::Data => {
                let len = header.length as usize;
                if len > SYNC_DATA_MAX {
                    return Err(AdbError::network(format!(
                        "DATA chunk of {} bytes exceeds max {}",
                        len, SYNC_DATA_MAX
                    )));
                }
                let mut chunk = BytesMut::zeroed(len);
                sync.conn.read_exact(&mut chunk).await?;
                trace!("RECV chunk of {} bytes", len);
                Ok(Some(chunk.freeze()))
            }
            SyncId::Done => Ok(None),
            SyncId::Fail => Err(sync.read_fail_body(header.length).await),
            other => Err(AdbError::network(format!(
                "expected DATA/DONE in RECV, got {:?}",
                other
            ))),
        }
    }
}

/// Buffers writes and sends them as DATA chunks of at most `SYNC_DATA_MAX`.
///
/// Nothing is committed on the device until `close` succeeds. Dropping the
/// writer without closing abandons the transfer and the connection.
#[derive(Debug)]
pub struct FileWriter {
    sync: SyncConnection,
    buf: BytesMut,
    mtime: ModTime,
    path: String,
    written: u64,
}

impl FileWriter {
    pub async fn write(&mut self, data: &[u8]) -> AdbResult<()> {
        self.buf.extend_from_slice(data);
        while self.buf.len() >= SYNC_DATA_MAX {
            let chunk = self.buf.split_to(SYNC_DATA_MAX);
            self.send_chunk(&chunk).await?;
        }
        Ok(())
    }

    /// Bytes handed to `write` so far.
    pub fn bytes_written(&self) -> u64 {
        self.written + self.buf.len() as u64
    }

    /// Bytes already sent to the device in DATA chunks.
    pub fn bytes_sent(&self) -> u64 {
        self.written
    }

    /// Send whatever is buffered as a final, possibly short, DATA chunk.
    pub async fn flush(&mut self) -> AdbResult<()> {
        if !self.buf.is_empty() {
            let chunk = self.buf.split();
            self.send_chunk(&chunk).await?;
        }
        Ok(())
    }

    /// Flush buffered data, send DONE with the modification time and wait
    /// for the device to acknowledge the file.
    pub async fn close(mut self) -> AdbResult<()> {
        self.flush().await?;
        let mtime = self.mtime.unix_secs();
        trace!("DONE {} mtime={}", self.path, mtime);
        self.sync.conn.write_all(&sync::encode_done(mtime)).await?;

        let header = self.sync.read_header().await?;
        match header.id {
            SyncId::Okay => {}
            SyncId::Fail => return Err(self.sync.read_fail_body(header.length).await),
            other => {
                return Err(AdbError::network(format!(
                    "expected OKAY after SEND, got {:?}",
                    other
                )))
            }
        }
        debug!("Pushed {} bytes to {}", self.written, self.path);
        self.sync.quit_quietly(&self.path).await;
        Ok(())
    }

    async fn send_chunk(&mut self, chunk: &[u8]) -> AdbResult<()> {
        let header = sync::encode_data_header(chunk.len())?;
        self.sync.conn.write_all(&header).await?;
        self.sync.conn.write_all(chunk).await?;
        self.written += chunk.len() as u64;
        trace!("SEND chunk of {} bytes", chunk.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tokio_test::io::Builder;

    fn sync_conn(mock: tokio_test::io::Mock) -> SyncConnection {
        Connection::new(mock).into_sync()
    }

    fn dent(mode: u32, size: u32, mtime: u32, name: &str) -> Vec<u8> {
        let mut buf = b"DENT".to_vec();
        for v in [mode, size, mtime, name.len() as u32] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf.extend_from_slice(name.as_bytes());
        buf
    }

    fn stat_reply(mode: u32, size: u32, mtime: u32) -> Vec<u8> {
        let mut buf = b"STAT".to_vec();
        for v in [mode, size, mtime] {
            buf.extend_from_slice(&v.to_le_bytes());
        }
        buf
    }

    #[tokio::test]
    async fn test_stat() {
        let mock = Builder::new()
            .write(&sync::encode_stat_request("/sdcard/a").unwrap())
            .read(&stat_reply(0o100644, 12, 1_700_000_000))
            .build();
        let mut sync = sync_conn(mock);
        let entry = sync.stat("/sdcard/a").await.unwrap();
        assert!(entry.is_file());
        assert_eq!(entry.size, 12);
    }

    #[tokio::test]
    async fn test_stat_missing_file_is_distinct_from_network_error() {
        let mock = Builder::new()
            .write(&sync::encode_stat_request("/nope").unwrap())
            .read(&stat_reply(0, 0, 0))
            .build();
        let err = sync_conn(mock).stat("/nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileNotFound);

        let mock = Builder::new()
            .write(&sync::encode_stat_request("/nope").unwrap())
            .read(b"STAT\x00\x00")
            .build();
        let err = sync_conn(mock).stat("/nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_list_reads_until_done() {
        let mut reply = dent(0o040755, 4096, 1, "dir");
        reply.extend(dent(0o100644, 3, 2, "file.txt"));
        reply.extend_from_slice(b"DONE");
        reply.extend_from_slice(&[0u8; 16]);
        let mock = Builder::new()
            .write(&sync::encode_list_request("/sdcard").unwrap())
            .read(&reply)
            .write(&sync::encode_quit())
            .build();

        let mut entries = sync_conn(mock).list("/sdcard").await.unwrap();
        let first = entries.next().await.unwrap().unwrap();
        assert_eq!(first.name, "dir");
        assert!(first.is_directory());
        let second = entries.next().await.unwrap().unwrap();
        assert_eq!(second.name, "file.txt");
        assert_eq!(second.size, 3);
        assert!(entries.next().await.unwrap().is_none());
        // Past the end: still nothing, and no error.
        assert!(entries.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_fail() {
        let mut reply = b"FAIL".to_vec();
        reply.extend_from_slice(&17u32.to_le_bytes());
        reply.extend_from_slice(b"permission denied");
        let mock = Builder::new()
            .write(&sync::encode_list_request("/data").unwrap())
            .read(&reply)
            .build();
        let mut entries = sync_conn(mock).list("/data").await.unwrap();
        let err = entries.next().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Adb);
        assert_eq!(err.message(), "permission denied");
        assert!(entries.next().await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_receive_chunks_until_done() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&SyncHeader::new(SyncId::Data, 6).to_bytes());
        reply.extend_from_slice(b"hello ");
        reply.extend_from_slice(&SyncHeader::new(SyncId::Data, 5).to_bytes());
        reply.extend_from_slice(b"world");
        reply.extend_from_slice(&SyncHeader::new(SyncId::Done, 0).to_bytes());
        let mock = Builder::new()
            .write(&sync::encode_recv_request("/sdcard/f").unwrap())
            .read(&reply)
            .write(&sync::encode_quit())
            .build();

        let reader = sync_conn(mock).receive("/sdcard/f").await.unwrap();
        assert_eq!(reader.read_to_end().await.unwrap(), b"hello world");
    }

    #[tokio::test]
    async fn test_copy_to_reports_local_write_failure_as_io() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&SyncHeader::new(SyncId::Data, 5).to_bytes());
        reply.extend_from_slice(b"hello");
        let remote = Builder::new()
            .write(&sync::encode_recv_request("/sdcard/f").unwrap())
            .read(&reply)
            .build();
        let mut local = Builder::new()
            .write_error(std::io::Error::new(std::io::ErrorKind::PermissionDenied, "disk full"))
            .build();

        let mut reader = sync_conn(remote).receive("/sdcard/f").await.unwrap();
        let err = reader.copy_to(&mut local).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
        assert_eq!(err.message(), "writing /sdcard/f locally: disk full");
    }

    #[tokio::test]
    async fn test_copy_to() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&SyncHeader::new(SyncId::Data, 5).to_bytes());
        reply.extend_from_slice(b"hello");
        reply.extend_from_slice(&SyncHeader::new(SyncId::Done, 0).to_bytes());
        let remote = Builder::new()
            .write(&sync::encode_recv_request("/sdcard/f").unwrap())
            .read(&reply)
            .write(&sync::encode_quit())
            .build();

        let mut reader = sync_conn(remote).receive("/sdcard/f").await.unwrap();
        let mut local = Vec::new();
        assert_eq!(reader.copy_to(&mut local).await.unwrap(), 5);
        assert_eq!(local, b"hello");
    }

    #[tokio::test]
    async fn test_receive_premature_close_is_network_error() {
        let mut reply = Vec::new();
        reply.extend_from_slice(&SyncHeader::new(SyncId::Data, 5).to_bytes());
        reply.extend_from_slice(b"hello");
        let mock = Builder::new()
            .write(&sync::encode_recv_request("/sdcard/f").unwrap())
            .read(&reply)
            .build();

        let reader = sync_conn(mock).receive("/sdcard/f").await.unwrap();
        let err = reader.read_to_end().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Network);
    }

    #[tokio::test]
    async fn test_receive_fail_surfaces_on_open() {
        let mut reply = SyncHeader::new(SyncId::Fail, 14).to_bytes().to_vec();
        reply.extend_from_slice(b"No such file!!");
        let mock = Builder::new()
            .write(&sync::encode_recv_request("/nope").unwrap())
            .read(&reply)
            .build();
        let err = sync_conn(mock).receive("/nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Adb);
        assert_eq!(err.message(), "No such file!!");
    }

    #[tokio::test]
    async fn test_send_chunks_large_writes_and_acknowledges() {
        let data = vec![7u8; SYNC_DATA_MAX + 10];
        let mtime = UNIX_EPOCH + std::time::Duration::from_secs(1_600_000_000);

        let mock = Builder::new()
            .write(&sync::encode_send_request("/sdcard/big", 0o644).unwrap())
            .write(&sync::encode_data_header(SYNC_DATA_MAX).unwrap())
            .write(&data[..SYNC_DATA_MAX])
            .write(&sync::encode_data_header(10).unwrap())
            .write(&data[SYNC_DATA_MAX..])
            .write(&sync::encode_done(1_600_000_000))
            .read(&SyncHeader::new(SyncId::Okay, 0).to_bytes())
            .write(&sync::encode_quit())
            .build();

        let mut writer = sync_conn(mock)
            .send("/sdcard/big", 0o644, ModTime::At(mtime))
            .await
            .unwrap();
        writer.write(&data).await.unwrap();
        assert_eq!(writer.bytes_written(), data.len() as u64);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_counts_bytes_on_the_wire() {
        let mtime = UNIX_EPOCH + std::time::Duration::from_secs(5);
        let mock = Builder::new()
            .write(&sync::encode_send_request("/sdcard/s", 0o644).unwrap())
            .write(&sync::encode_data_header(3).unwrap())
            .write(b"abc")
            .write(&sync::encode_done(5))
            .read(&SyncHeader::new(SyncId::Okay, 0).to_bytes())
            .write(&sync::encode_quit())
            .build();

        let mut writer = sync_conn(mock)
            .send("/sdcard/s", 0o644, ModTime::At(mtime))
            .await
            .unwrap();
        writer.write(b"abc").await.unwrap();
        assert_eq!(writer.bytes_written(), 3);
        assert_eq!(writer.bytes_sent(), 0);
        writer.flush().await.unwrap();
        assert_eq!(writer.bytes_sent(), 3);
        writer.close().await.unwrap();
    }

    #[tokio::test]
    async fn test_send_close_reports_device_rejection() {
        let mut reply = SyncHeader::new(SyncId::Fail, 9).to_bytes().to_vec();
        reply.extend_from_slice(b"read-only");
        let mtime = UNIX_EPOCH + std::time::Duration::from_secs(5);

        let mock = Builder::new()
            .write(&sync::encode_send_request("/system/x", 0o600).unwrap())
            .write(&sync::encode_data_header(3).unwrap())
            .write(b"abc")
            .write(&sync::encode_done(5))
            .read(&reply)
            .build();

        let mut writer = sync_conn(mock)
            .send("/system/x", 0o600, ModTime::At(mtime))
            .await
            .unwrap();
        writer.write(b"abc").await.unwrap();
        let err = writer.close().await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Adb);
        assert_eq!(err.message(), "read-only");
    }

    #[test]
    fn test_mod_time_on_close_uses_now() {
        let before = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap()
            .as_secs() as u32;
        assert!(ModTime::OnClose.unix_secs() >= before);
        assert_eq!(ModTime::At(UNIX_EPOCH).unix_secs(), 0);
    }
}
