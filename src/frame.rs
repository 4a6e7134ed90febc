//! Raw frames and the pool their pixel buffers are leased from
//!
//! Every [`RawFrame`] holds a [`FrameBuffer`] leased from a [`FramePool`].
//! The lease ends when the frame is released (explicitly through
//! [`RawFrame::release`] or by dropping it), at which point the buffer goes
//! back to the pool. [`FramePool::outstanding`] counts live leases, so a
//! pipeline that holds frames past their iteration shows up as a non-zero
//! count.

use std::collections::VecDeque;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Bytes per RGBA pixel
pub const BYTES_PER_PIXEL: usize = 4;

#[derive(Debug)]
struct PoolInner {
    buffers: Mutex<VecDeque<Vec<u8>>>,
    buffer_size: usize,
    max_buffers: usize,
    outstanding: AtomicUsize,
}

/// Reusable pool of equally sized pixel buffers
#[derive(Debug, Clone)]
pub struct FramePool {
    inner: Arc<PoolInner>,
}

impl FramePool {
    /// Pool of `buffer_size`-byte buffers keeping at most `max_buffers` idle
    pub fn new(buffer_size: usize, max_buffers: usize) -> Self {
        Self {
            inner: Arc::new(PoolInner {
                buffers: Mutex::new(VecDeque::with_capacity(max_buffers)),
                buffer_size,
                max_buffers,
                outstanding: AtomicUsize::new(0),
            }),
        }
    }

    /// Pool sized for RGBA frames of the given dimensions
    pub fn for_frames(width: u32, height: u32, max_buffers: usize) -> Self {
        Self::new(
            width as usize * height as usize * BYTES_PER_PIXEL,
            max_buffers,
        )
    }

    /// Lease a buffer, reusing an idle one when available
    pub fn lease(&self) -> FrameBuffer {
        let reused = self
            .inner
            .buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .pop_front();
        let data = reused.unwrap_or_else(|| vec![0u8; self.inner.buffer_size]);
        self.inner.outstanding.fetch_add(1, Ordering::AcqRel);

        FrameBuffer {
            data,
            pool: Some(Arc::clone(&self.inner)),
        }
    }

    pub fn buffer_size(&self) -> usize {
        self.inner.buffer_size
    }

    /// Number of buffers currently leased out
    pub fn outstanding(&self) -> usize {
        self.inner.outstanding.load(Ordering::Acquire)
    }

    /// Number of idle buffers ready for reuse
    pub fn idle(&self) -> usize {
        self.inner
            .buffers
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}

/// Pixel buffer leased from a [`FramePool`]
#[derive(Debug)]
pub struct FrameBuffer {
    data: Vec<u8>,
    pool: Option<Arc<PoolInner>>,
}

impl FrameBuffer {
    /// Buffer that does not belong to any pool
    pub fn detached(data: Vec<u8>) -> Self {
        Self { data, pool: None }
    }
}

impl Deref for FrameBuffer {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

impl DerefMut for FrameBuffer {
    fn deref_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }
}

impl Drop for FrameBuffer {
    fn drop(&mut self) {
        let Some(pool) = self.pool.take() else {
            return;
        };
        pool.outstanding.fetch_sub(1, Ordering::AcqRel);

        let data = std::mem::take(&mut self.data);
        if data.len() != pool.buffer_size {
            return;
        }
        let mut buffers = pool.buffers.lock().unwrap_or_else(|e| e.into_inner());
        if buffers.len() < pool.max_buffers {
            buffers.push_back(data);
        }
    }
}

/// One decoded picture in RGBA format
#[derive(Debug)]
pub struct RawFrame {
    /// Frame width in pixels
    pub width: u32,
    /// Frame height in pixels
    pub height: u32,
    /// Presentation timestamp in microseconds
    pub timestamp_us: i64,
    buffer: FrameBuffer,
}

impl RawFrame {
    pub fn new(width: u32, height: u32, timestamp_us: i64, buffer: FrameBuffer) -> Self {
        Self {
            width,
            height,
            timestamp_us,
            buffer,
        }
    }

    /// RGBA pixel data (width * height * 4 bytes)
    pub fn data(&self) -> &[u8] {
        &self.buffer
    }

    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.buffer
    }

    /// Return the pixel buffer to its pool
    pub fn release(self) {
        drop(self);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_lease_and_release() {
        let pool = FramePool::for_frames(4, 2, 2);
        assert_eq!(pool.buffer_size(), 32);

        let a = RawFrame::new(4, 2, 0, pool.lease());
        let b = RawFrame::new(4, 2, 1, pool.lease());
        assert_eq!(pool.outstanding(), 2);
        assert_eq!(a.data().len(), 32);

        a.release();
        drop(b);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 2);
    }

    #[test]
    fn test_pool_bounds_idle_buffers() {
        let pool = FramePool::new(16, 1);
        let leases: Vec<_> = (0..3).map(|_| pool.lease()).collect();
        assert_eq!(pool.outstanding(), 3);
        drop(leases);
        assert_eq!(pool.outstanding(), 0);
        assert_eq!(pool.idle(), 1);
    }

    #[test]
    fn test_detached_buffer() {
        let frame = RawFrame::new(1, 1, 0, FrameBuffer::detached(vec![1, 2, 3, 4]));
        assert_eq!(frame.data(), &[1, 2, 3, 4]);
    }
}
