//! Scratch buffer pool. Each operation leases the buffers it needs and the
//! lease hands them back on drop, so concurrent operations never share one.

use std::ops::{Deref, DerefMut};
use std::sync::{Arc, Mutex};

/// Pool of fixed-capacity byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    buffer_len: usize,
    max_idle: usize,
    idle: Mutex<Vec<Box<[u8]>>>,
}

impl BufferPool {
    pub fn new(buffer_len: usize, max_idle: usize) -> Arc<Self> {
        Arc::new(Self {
            buffer_len,
            max_idle,
            idle: Mutex::new(Vec::new()),
        })
    }

    /// Number of buffers currently parked in the pool.
    pub fn idle_count(&self) -> usize {
        self.idle.lock().map(|v| v.len()).unwrap_or(0)
    }

    /// Take a buffer for the duration of one operation.
    pub fn lease(self: &Arc<Self>) -> Lease {
        let reused = self.idle.lock().ok().and_then(|mut v| v.pop());
        let buf = reused.unwrap_or_else(|| vec![0u8; self.buffer_len].into_boxed_slice());
        Lease {
            buf,
            pool: Arc::clone(self),
        }
    }

    // Not zeroed: callers track filled lengths and write before they read.
    fn give_back(&self, buf: Box<[u8]>) {
        if let Ok(mut idle) = self.idle.lock() {
            if idle.len() < self.max_idle {
                idle.push(buf);
            }
        }
    }
}

/// Exclusive loan of one pool buffer. Derefs to the full-capacity slice.
#[derive(Debug)]
pub struct Lease {
    buf: Box<[u8]>,
    pool: Arc<BufferPool>,
}

impl Deref for Lease {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.buf
    }
}

impl DerefMut for Lease {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.buf
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        let buf = std::mem::take(&mut self.buf);
        self.pool.give_back(buf);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lease_has_full_capacity() {
        let pool = BufferPool::new(64, 2);
        let lease = pool.lease();
        assert_eq!(lease.len(), 64);
        assert_eq!(pool.idle_count(), 0);
        drop(lease);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn concurrent_leases_do_not_alias() {
        let pool = BufferPool::new(16, 4);
        let mut a = pool.lease();
        let mut b = pool.lease();
        a[0] = 1;
        b[0] = 2;
        assert_ne!(a.as_ptr(), b.as_ptr());
        assert_eq!((a[0], b[0]), (1, 2));
    }

    #[test]
    fn returned_buffers_are_reused_at_full_capacity() {
        let pool = BufferPool::new(8, 1);
        let ptr = {
            let mut a = pool.lease();
            a.copy_from_slice(b"record!!");
            a.as_ptr()
        };
        let b = pool.lease();
        assert_eq!(b.as_ptr(), ptr);
        assert_eq!(b.len(), 8);
        assert_eq!(pool.idle_count(), 0);
    }

    #[test]
    fn idle_is_capped() {
        let pool = BufferPool::new(8, 1);
        let a = pool.lease();
        let b = pool.lease();
        drop(a);
        drop(b);
        assert_eq!(pool.idle_count(), 1);
    }

    #[test]
    fn pool_shared_across_threads() {
        let pool = BufferPool::new(32, 4);
        let handles: Vec<_> = (0..4)
            .map(|i| {
                let pool = pool.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        let mut l = pool.lease();
                        l.fill(i);
                        assert!(l.iter().all(|&x| x == i));
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert!(pool.idle_count() <= 4);
    }
}
