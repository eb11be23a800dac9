use once_cell::sync::Lazy;
use std::sync::Mutex;

/// Default capacity for freshly acquired buffers.
pub const DEFAULT_BUFFER_LEN: usize = 64 * 1024;

/// Buffers larger than this are shrunk rather than kept in the pool, so one
/// oversized borrow does not pin its allocation for the life of the process.
const RETAIN_LIMIT: usize = 4 * 1024 * 1024;

static BUFFER_POOL: Lazy<BufferPool> = Lazy::new(BufferPool::new);

/// A shared pool of byte buffers, borrowed and returned per call.
///
/// Buffers are never shared between concurrent borrowers; each `acquire`
/// hands out an owned guard and `Drop` gives the buffer back.
#[derive(Debug)]
pub struct BufferPool {
    free: Mutex<Vec<Vec<u8>>>,
}

impl BufferPool {
    fn new() -> Self {
        Self {
            free: Mutex::new(Vec::new()),
        }
    }

    fn acquire_from(&'static self, min_len: usize) -> PooledBuf {
        let mut buf = self
            .free
            .lock()
            .expect("buffer pool poisoned")
            .pop()
            .unwrap_or_default();
        if buf.len() < min_len {
            buf.resize(min_len.max(DEFAULT_BUFFER_LEN), 0);
        }
        PooledBuf {
            pool: self,
            buf: Some(buf),
        }
    }

    fn release(&self, mut buf: Vec<u8>) {
        if buf.len() > RETAIN_LIMIT {
            buf.truncate(DEFAULT_BUFFER_LEN);
            buf.shrink_to_fit();
        }
        self.free.lock().expect("buffer pool poisoned").push(buf);
    }
}

/// Borrows a buffer of at least `min_len` bytes from the global pool.
/// Contents are unspecified. The buffer is returned on drop, on every
/// exit path.
pub fn acquire(min_len: usize) -> PooledBuf {
    BUFFER_POOL.acquire_from(min_len)
}

/// Guard over a pooled buffer; dereferences to the byte slice.
#[derive(Debug)]
pub struct PooledBuf {
    pool: &'static BufferPool,
    buf: Option<Vec<u8>>,
}

impl PooledBuf {
    pub fn as_slice(&self) -> &[u8] {
        self.buf.as_ref().expect("buffer taken")
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        self.buf.as_mut().expect("buffer taken")
    }

    pub fn len(&self) -> usize {
        self.as_slice().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Drop for PooledBuf {
    fn drop(&mut self) {
        if let Some(buf) = self.buf.take() {
            self.pool.release(buf);
        }
    }
}

impl std::ops::Deref for PooledBuf {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_slice()
    }
}

impl std::ops::DerefMut for PooledBuf {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.as_mut_slice()
    }
}
