//! Response encoding.
//!
//! # Responsibilities
//! - Serialize status, headers and body into wire bytes
//! - Reflect the connection's keep-alive state in the `Connection` header
//! - Reuse scratch buffers across writes to bound allocation under load
//!
//! # Design Decisions
//! - Every response is `application/json` with an exact `Content-Length`
//! - The pool is owned by the server and shared by reference, never global
//! - Oversized buffers are dropped instead of pooled so one big reply cannot pin memory

use bytes::{Bytes, BytesMut};
use serde::Serialize;
use std::fmt::Write as _;
use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex, PoisonError};

/// A response ready to be encoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: u16,
    pub body: Bytes,
}

impl Response {
    pub fn new(status: u16, body: impl Into<Bytes>) -> Self {
        Self {
            status,
            body: body.into(),
        }
    }

    /// Status with an empty body.
    pub fn empty(status: u16) -> Self {
        Self::new(status, Bytes::new())
    }

    /// Status with `value` serialized as the body.
    pub fn json<T: Serialize>(status: u16, value: &T) -> Result<Self, serde_json::Error> {
        Ok(Self::new(status, serde_json::to_vec(value)?))
    }

    /// Status with `{"error": message}` as the body.
    pub fn error(status: u16, message: &str) -> Self {
        let body = serde_json::json!({ "error": message }).to_string();
        Self::new(status, body)
    }

    /// Append the wire form of this response to `out`.
    pub fn encode(&self, keep_alive: bool, out: &mut BytesMut) {
        out.reserve(128 + self.body.len());
        // Writing into a BytesMut cannot fail.
        let _ = write!(
            out,
            "HTTP/1.1 {} {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: {}\r\n\r\n",
            self.status,
            reason_phrase(self.status),
            self.body.len(),
            if keep_alive { "keep-alive" } else { "close" },
        );
        out.extend_from_slice(&self.body);
    }
}

/// Canonical reason phrase for the status codes the gateway emits.
pub fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        400 => "Bad Request",
        401 => "Unauthorized",
        404 => "Not Found",
        405 => "Method Not Allowed",
        413 => "Payload Too Large",
        431 => "Request Header Fields Too Large",
        500 => "Internal Server Error",
        503 => "Service Unavailable",
        _ => "Unknown",
    }
}

/// Pool of reusable write buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffers: Mutex<Vec<BytesMut>>,
    buffer_capacity: usize,
    max_pooled: usize,
}

impl BufferPool {
    pub fn new(max_pooled: usize, buffer_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            buffers: Mutex::new(Vec::with_capacity(max_pooled)),
            buffer_capacity,
            max_pooled,
        })
    }

    /// Take a cleared buffer, allocating if the pool is empty.
    pub fn acquire(self: &Arc<Self>) -> PooledBuffer {
        let buf = self
            .buffers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop()
            .unwrap_or_else(|| BytesMut::with_capacity(self.buffer_capacity));
        PooledBuffer {
            buf,
            pool: Arc::clone(self),
        }
    }

    /// Number of idle buffers.
    pub fn idle(&self) -> usize {
        self.buffers.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    fn release(&self, mut buf: BytesMut) {
        if buf.capacity() > self.buffer_capacity * 4 {
            return;
        }
        buf.clear();
        let mut buffers = self.buffers.lock().unwrap_or_else(PoisonError::into_inner);
        if buffers.len() < self.max_pooled {
            buffers.push(buf);
        }
    }
}

/// A buffer on loan from a [`BufferPool`]; returned on drop.
#[derive(Debug)]
pub struct PooledBuffer {
    buf: BytesMut,
    pool: Arc<BufferPool>,
}

impl Deref for PooledBuffer {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuffer {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}

impl Drop for PooledBuffer {
    fn drop(&mut self) {
        self.pool.release(std::mem::take(&mut self.buf));
    }
}
