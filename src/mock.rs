//! In-memory ADB server for unit tests.
//!
//! Each dial consumes one scripted session: the bytes the server will send,
//! in order. Everything the client writes is captured per session, and the
//! server keeps a trace of `Dial`/`Close` events so tests can check that no
//! connection outlives its operation.

use crate::conn::{Connection, Dialer};
use crate::error::{AdbError, AdbResult};
use std::collections::VecDeque;
use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use tokio::io::{AsyncRead, AsyncWrite, ReadBuf};

enum Script {
    Session(Vec<u8>),
    DialError(AdbError),
}

#[derive(Default)]
struct State {
    scripts: VecDeque<Script>,
    written: Vec<Vec<u8>>,
    trace: Vec<String>,
}

#[derive(Clone, Default)]
pub(crate) struct MockServer {
    state: Arc<Mutex<State>>,
}

impl MockServer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a session that replies with `reply` and then reports EOF.
    pub fn session(&self, reply: impl Into<Vec<u8>>) -> &Self {
        self.lock().scripts.push_back(Script::Session(reply.into()));
        self
    }

    /// Make the next dial fail with `err`.
    pub fn dial_error(&self, err: AdbError) -> &Self {
        self.lock().scripts.push_back(Script::DialError(err));
        self
    }

    /// Bytes written by the client, one entry per completed dial.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    /// Host-protocol requests sent across all sessions, decoded. Decoding
    /// of a session stops at the first bytes that are not a request, such
    /// as sync-mode traffic.
    pub fn requests(&self) -> Vec<String> {
        self.written().iter().flat_map(|w| decode_requests(w)).collect()
    }

    pub fn trace(&self) -> Vec<String> {
        self.lock().trace.clone()
    }

    /// Whether every dialed connection has been closed again.
    pub fn all_closed(&self) -> bool {
        let trace = self.trace();
        let dials = trace.iter().filter(|t| *t == "Dial").count();
        let closes = trace.iter().filter(|t| *t == "Close").count();
        dials == closes
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap()
    }
}

impl Dialer for MockServer {
    async fn dial(&self) -> AdbResult<Connection> {
        let mut state = self.lock();
        match state.scripts.pop_front() {
            Some(Script::Session(reply)) => {
                state.trace.push("Dial".to_string());
                let index = state.written.len();
                state.written.push(Vec::new());
                Ok(Connection::new(MockConn {
                    reply: reply.into(),
                    index,
                    state: self.state.clone(),
                }))
            }
            Some(Script::DialError(err)) => Err(err),
            None => Err(AdbError::network("mock server has no session left")),
        }
    }
}

struct MockConn {
    reply: VecDeque<u8>,
    index: usize,
    state: Arc<Mutex<State>>,
}

impl AsyncRead for MockConn {
    fn poll_read(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &mut ReadBuf<'_>,
    ) -> Poll<io::Result<()>> {
        let n = buf.remaining().min(self.reply.len());
        let chunk: Vec<u8> = self.reply.drain(..n).collect();
        buf.put_slice(&chunk);
        Poll::Ready(Ok(()))
    }
}

impl AsyncWrite for MockConn {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        data: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        state.written[self.index].extend_from_slice(data);
        Poll::Ready(Ok(data.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Drop for MockConn {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.lock() {
            state.trace.push("Close".to_string());
        }
    }
}

fn decode_requests(mut data: &[u8]) -> Vec<String> {
    let mut requests = Vec::new();
    while data.len() >= 4 {
        let Some(len) = std::str::from_utf8(&data[..4])
            .ok()
            .and_then(|s| usize::from_str_radix(s, 16).ok())
        else {
            break;
        };
        if data.len() < 4 + len {
            break;
        }
        requests.push(String::from_utf8_lossy(&data[4..4 + len]).to_string());
        data = &data[4 + len..];
    }
    requests
}

pub(crate) fn okay() -> Vec<u8> {
    b"OKAY".to_vec()
}

pub(crate) fn message(body: &str) -> Vec<u8> {
    format!("{:04X}{}", body.len(), body).into_bytes()
}

pub(crate) fn okay_message(body: &str) -> Vec<u8> {
    let mut reply = okay();
    reply.extend(message(body));
    reply
}

pub(crate) fn fail(msg: &str) -> Vec<u8> {
    let mut reply = b"FAIL".to_vec();
    reply.extend(message(msg));
    reply
}

/// Join reply fragments into one session script.
pub(crate) fn script(parts: &[&[u8]]) -> Vec<u8> {
    parts.concat()
}
