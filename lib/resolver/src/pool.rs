use std::ops::{Deref, DerefMut};
use std::sync::Mutex;

use bytes::BytesMut;
use once_cell::sync::Lazy;

/// A minimal lock-guarded free list. Pools have no upper bound; callers
/// provide backpressure by bounding concurrent requests.
pub(crate) struct Pool<T> {
    items: Mutex<Vec<T>>,
}

impl<T> Pool<T> {
    pub(crate) fn new() -> Self {
        Pool {
            items: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn get_or(&self, init: impl FnOnce() -> T) -> T {
        // The lock is never poisoned: push/pop cannot panic.
        self.items.lock().unwrap().pop().unwrap_or_else(init)
    }

    pub(crate) fn put(&self, item: T) {
        self.items.lock().unwrap().push(item);
    }
}

static BYTE_BUFFERS: Lazy<Pool<BytesMut>> = Lazy::new(Pool::new);

const BYTE_BUFFER_CAPACITY: usize = 1024;

/// A byte buffer leased from the shared pool. Dropping the lease clears the
/// buffer and hands it back.
pub(crate) struct PooledBuf {
    buf: BytesMut,
}

pub(crate) fn acquire_buf() -> PooledBuf {
    PooledBuf {
        buf: BYTE_BUFFERS.get_or(|| BytesMut::with_capacity(BYTE_BUFFER_CAPACITY)),
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        let mut buf = std::mem::take(&mut self.buf);
        buf.clear();
        BYTE_BUFFERS.put(buf);
    }
}

impl Deref for PooledBuf {
    type Target = BytesMut;

    fn deref(&self) -> &BytesMut {
        &self.buf
    }
}

impl DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }
}
