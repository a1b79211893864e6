//! In-process channel pair with the same post/complete discipline as the
//! wire: data lands in the receiver's buffer before its completion becomes
//! observable, and a send blocks until the receiver has armed a receive.
//! Lets the transfer loop run without an RDMA device.

use crate::memory::Buffer;
use crate::transfer::Channel;
use std::cell::UnsafeCell;
use std::hint;
use std::io;
use std::ptr;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

struct Side {
    buf: UnsafeCell<Buffer>,
    /// Receives armed by the owning end.
    posted: AtomicUsize,
    /// Deliveries performed by the peer; a delivery consumes one armed
    /// receive.
    delivered: AtomicUsize,
}

// The owner mutates its buffer between operations; the peer writes it only
// through a delivery, which consumes an armed receive. Counters order the
// two.
unsafe impl Send for Side {}
unsafe impl Sync for Side {}

/// One end of a loopback pair.
pub struct Loopback {
    local: Arc<Side>,
    peer: Arc<Side>,
    sends_posted: usize,
    sends_done: usize,
    recvs_done: usize,
}

/// Builds a pair of connected ends over anonymous buffers of `size` bytes.
pub fn pair(size: usize) -> io::Result<(Loopback, Loopback)> {
    pair_with(Buffer::anonymous(size)?, Buffer::anonymous(size)?)
}

/// Builds a pair over caller-provided buffers (e.g. device-backed ones).
pub fn pair_with(a: Buffer, b: Buffer) -> io::Result<(Loopback, Loopback)> {
    if a.len() != b.len() {
        return Err(io::Error::new(
            io::ErrorKind::InvalidInput,
            "loopback ends need equally sized buffers",
        ));
    }
    let a = Arc::new(Side {
        buf: UnsafeCell::new(a),
        posted: AtomicUsize::new(0),
        delivered: AtomicUsize::new(0),
    });
    let b = Arc::new(Side {
        buf: UnsafeCell::new(b),
        posted: AtomicUsize::new(0),
        delivered: AtomicUsize::new(0),
    });
    Ok((
        Loopback {
            local: Arc::clone(&a),
            peer: Arc::clone(&b),
            sends_posted: 0,
            sends_done: 0,
            recvs_done: 0,
        },
        Loopback {
            local: b,
            peer: a,
            sends_posted: 0,
            sends_done: 0,
            recvs_done: 0,
        },
    ))
}

impl Channel for Loopback {
    fn buf(&mut self) -> &mut [u8] {
        unsafe { (*self.local.buf.get()).as_mut_slice() }
    }

    /// Copies the local buffer into the peer's, waiting until the peer has a
    /// receive armed — the reliable transport holds the data back the same
    /// way.
    fn post_send(&mut self) -> io::Result<()> {
        while self.peer.posted.load(Ordering::Acquire) <= self.peer.delivered.load(Ordering::Acquire)
        {
            hint::spin_loop();
        }
        unsafe {
            let src = (*self.local.buf.get()).as_ptr();
            let dst = (*self.peer.buf.get()).as_ptr();
            let len = (*self.peer.buf.get()).len();
            ptr::copy_nonoverlapping(src, dst, len);
        }
        self.peer.delivered.fetch_add(1, Ordering::Release);
        self.sends_posted += 1;
        Ok(())
    }

    fn post_recv(&mut self) -> io::Result<()> {
        self.local.posted.fetch_add(1, Ordering::Release);
        Ok(())
    }

    fn complete_send(&mut self) -> io::Result<()> {
        if self.sends_done == self.sends_posted {
            return Err(io::Error::other("no send outstanding"));
        }
        self.sends_done += 1;
        Ok(())
    }

    fn complete_recv(&mut self) -> io::Result<()> {
        if self.local.posted.load(Ordering::Acquire) <= self.recvs_done {
            return Err(io::Error::other("no receive outstanding"));
        }
        while self.local.delivered.load(Ordering::Acquire) <= self.recvs_done {
            hint::spin_loop();
        }
        self.recvs_done += 1;
        Ok(())
    }
}
