use std::ffi::CString;
use std::io;
use std::os::raw::c_void;
use std::os::unix::ffi::OsStrExt;
use std::path::Path;
use std::ptr::{self, NonNull};
use std::slice;

#[derive(Debug)]
enum Backing {
    /// Page-aligned anonymous allocation; released with `free`.
    Heap,
    /// `MAP_SHARED` mapping of a device resource; released with `munmap` and
    /// never passed to `free`.
    Device { fd: libc::c_int },
}

/// Fixed-size byte region used as the transfer buffer or as the mirror
/// target. The backing decides how it is released; either way each resource
/// is released exactly once, on drop.
#[derive(Debug)]
pub struct Buffer {
    ptr: NonNull<u8>,
    len: usize,
    backing: Backing,
}

// The owner hands out &mut access; the region itself carries no thread
// affinity.
unsafe impl Send for Buffer {}

impl Buffer {
    /// Allocates a zeroed, page-aligned anonymous region.
    pub fn anonymous(len: usize) -> io::Result<Buffer> {
        let align = page_size();
        let mut raw: *mut c_void = ptr::null_mut();
        let rc = unsafe { libc::posix_memalign(&mut raw, align, len) };
        if rc != 0 {
            return Err(io::Error::from_raw_os_error(rc));
        }
        unsafe { ptr::write_bytes(raw.cast::<u8>(), 0, len) };
        Ok(Buffer {
            ptr: NonNull::new(raw.cast()).ok_or(io::ErrorKind::OutOfMemory)?,
            len,
            backing: Backing::Heap,
        })
    }

    /// Maps `len` bytes of a device resource read-write and shared.
    pub fn device(path: &Path, len: usize) -> io::Result<Buffer> {
        let cpath = CString::new(path.as_os_str().as_bytes())
            .map_err(|_| io::Error::from(io::ErrorKind::InvalidInput))?;
        let fd = unsafe { libc::open(cpath.as_ptr(), libc::O_RDWR) };
        if fd < 0 {
            return Err(io::Error::last_os_error());
        }
        let raw = unsafe {
            libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_SHARED,
                fd,
                0,
            )
        };
        if raw == libc::MAP_FAILED {
            let err = io::Error::last_os_error();
            unsafe { libc::close(fd) };
            return Err(err);
        }
        Ok(Buffer {
            ptr: NonNull::new(raw.cast()).ok_or(io::ErrorKind::AddrNotAvailable)?,
            len,
            backing: Backing::Device { fd },
        })
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn as_slice(&self) -> &[u8] {
        unsafe { slice::from_raw_parts(self.ptr.as_ptr(), self.len) }
    }

    pub fn as_mut_slice(&mut self) -> &mut [u8] {
        unsafe { slice::from_raw_parts_mut(self.ptr.as_ptr(), self.len) }
    }
}

impl Drop for Buffer {
    fn drop(&mut self) {
        match self.backing {
            Backing::Heap => unsafe {
                libc::free(self.ptr.as_ptr().cast());
            },
            Backing::Device { fd } => unsafe {
                libc::munmap(self.ptr.as_ptr().cast(), self.len);
                libc::close(fd);
            },
        }
    }
}

pub fn page_size() -> usize {
    let sz = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if sz > 0 { sz as usize } else { 4096 }
}
