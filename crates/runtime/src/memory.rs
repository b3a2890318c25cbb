//! Executable memory for JIT-compiled code.
//!
//! `ExecutableMemory` owns one page-aligned mapping and walks it through the
//! write -> execute lifecycle under a strict W^X policy: the region is either
//! readable+writable or readable+executable, never both. Ownership is
//! move-only; dropping the region unmaps it.

use std::fmt;

/// Error type for executable-memory operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MemoryError {
    /// `allocate` called on a region that already holds a mapping.
    AlreadyAllocated,
    /// Zero-byte allocation request.
    ZeroSize,
    /// Operation on a region with no mapping.
    NotAllocated,
    /// Write attempted while the region is executable.
    NotWritable,
    /// The platform call failed (mmap/mprotect), with the OS error text.
    Platform(String),
    /// No page-protection support on this platform.
    Unsupported,
}

impl fmt::Display for MemoryError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MemoryError::AlreadyAllocated => {
                write!(f, "memory already allocated; deallocate first")
            }
            MemoryError::ZeroSize => write!(f, "cannot allocate zero bytes"),
            MemoryError::NotAllocated => write!(f, "no memory allocated"),
            MemoryError::NotWritable => write!(f, "region is executable, not writable"),
            MemoryError::Platform(msg) => write!(f, "platform error: {}", msg),
            MemoryError::Unsupported => write!(f, "executable memory unsupported on this platform"),
        }
    }
}

impl std::error::Error for MemoryError {}

/// A page-aligned memory region that can hold generated machine code.
#[derive(Debug)]
pub struct ExecutableMemory {
    ptr: *mut u8,
    size: usize,
    executable: bool,
}

// The region is owned by exactly one holder; raw pointer aside, moving it
// across threads is sound. Shared access is read-only through `as_ptr`.
unsafe impl Send for ExecutableMemory {}

impl ExecutableMemory {
    /// Create an empty manager with no mapping.
    pub fn new() -> Self {
        ExecutableMemory {
            ptr: std::ptr::null_mut(),
            size: 0,
            executable: false,
        }
    }

    /// Allocate a read+write region of at least `size` bytes, rounded up to
    /// the system page size.
    pub fn allocate(&mut self, size: usize) -> Result<(), MemoryError> {
        if !self.ptr.is_null() {
            return Err(MemoryError::AlreadyAllocated);
        }
        if size == 0 {
            return Err(MemoryError::ZeroSize);
        }
        let aligned = round_to_page_size(size)?;
        self.ptr = platform::allocate(aligned)?;
        self.size = aligned;
        self.executable = false;
        Ok(())
    }

    /// Convenience constructor: allocate in one step.
    pub fn with_size(size: usize) -> Result<Self, MemoryError> {
        let mut mem = ExecutableMemory::new();
        mem.allocate(size)?;
        Ok(mem)
    }

    /// Copy `bytes` into the region starting at `offset`. Requires the
    /// region to be writable.
    pub fn write(&mut self, offset: usize, bytes: &[u8]) -> Result<(), MemoryError> {
        if self.ptr.is_null() {
            return Err(MemoryError::NotAllocated);
        }
        if self.executable {
            return Err(MemoryError::NotWritable);
        }
        if offset + bytes.len() > self.size {
            return Err(MemoryError::Platform(format!(
                "write of {} bytes at offset {} exceeds region of {} bytes",
                bytes.len(),
                offset,
                self.size
            )));
        }
        unsafe {
            std::ptr::copy_nonoverlapping(bytes.as_ptr(), self.ptr.add(offset), bytes.len());
        }
        Ok(())
    }

    /// Drop write permission and add execute permission. On AArch64 the
    /// instruction cache is invalidated over the region, so freshly written
    /// code is visible to fetch.
    pub fn make_executable(&mut self) -> Result<(), MemoryError> {
        if self.ptr.is_null() {
            return Err(MemoryError::NotAllocated);
        }
        if self.executable {
            return Ok(());
        }
        platform::set_permissions(self.ptr, self.size, true)?;
        flush_instruction_cache(self.ptr, self.size);
        self.executable = true;
        Ok(())
    }

    /// Drop execute permission and restore write permission.
    pub fn make_writable(&mut self) -> Result<(), MemoryError> {
        if self.ptr.is_null() {
            return Err(MemoryError::NotAllocated);
        }
        if !self.executable {
            return Ok(());
        }
        platform::set_permissions(self.ptr, self.size, false)?;
        self.executable = false;
        Ok(())
    }

    /// Release the mapping. Safe to call repeatedly.
    pub fn deallocate(&mut self) {
        if !self.ptr.is_null() {
            // Teardown must not fail; a failed munmap leaks the pages.
            let _ = platform::deallocate(self.ptr, self.size);
            self.ptr = std::ptr::null_mut();
            self.size = 0;
            self.executable = false;
        }
    }

    pub fn is_allocated(&self) -> bool {
        !self.ptr.is_null()
    }

    pub fn is_executable(&self) -> bool {
        self.executable
    }

    /// Writable exactly when a mapping exists and it is not executable.
    pub fn is_writable(&self) -> bool {
        self.is_allocated() && !self.executable
    }

    /// Size of the mapping after page rounding; 0 when unallocated.
    pub fn len(&self) -> usize {
        self.size
    }

    pub fn is_empty(&self) -> bool {
        self.size == 0
    }

    pub fn as_ptr(&self) -> *const u8 {
        self.ptr
    }
}

impl Default for ExecutableMemory {
    fn default() -> Self {
        ExecutableMemory::new()
    }
}

impl Drop for ExecutableMemory {
    fn drop(&mut self) {
        self.deallocate();
    }
}

/// Query the system page size.
pub fn page_size() -> Result<usize, MemoryError> {
    platform::page_size()
}

/// Clean the data cache and invalidate the instruction cache over a range,
/// line by line, per the CTR_EL0 geometry.
#[cfg(target_arch = "aarch64")]
fn flush_instruction_cache(ptr: *const u8, len: usize) {
    unsafe {
        let ctr: u64;
        std::arch::asm!("mrs {}, ctr_el0", out(reg) ctr);
        let dline = 4usize << ((ctr >> 16) & 0xF);
        let iline = 4usize << (ctr & 0xF);
        let start = ptr as usize;
        let end = start + len;

        let mut addr = start & !(dline - 1);
        while addr < end {
            std::arch::asm!("dc cvau, {}", in(reg) addr);
            addr += dline;
        }
        std::arch::asm!("dsb ish");

        let mut addr = start & !(iline - 1);
        while addr < end {
            std::arch::asm!("ic ivau, {}", in(reg) addr);
            addr += iline;
        }
        std::arch::asm!("dsb ish", "isb");
    }
}

#[cfg(not(target_arch = "aarch64"))]
fn flush_instruction_cache(_ptr: *const u8, _len: usize) {}

/// Round `size` up to a whole number of pages.
pub fn round_to_page_size(size: usize) -> Result<usize, MemoryError> {
    let page = page_size()?;
    Ok(size.div_ceil(page) * page)
}

#[cfg(unix)]
mod platform {
    use super::MemoryError;

    pub fn page_size() -> Result<usize, MemoryError> {
        let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
        if size <= 0 {
            return Err(MemoryError::Platform("sysconf(_SC_PAGESIZE) failed".into()));
        }
        Ok(size as usize)
    }

    pub fn allocate(size: usize) -> Result<*mut u8, MemoryError> {
        let ptr = unsafe {
            libc::mmap(
                std::ptr::null_mut(),
                size,
                libc::PROT_READ | libc::PROT_WRITE,
                libc::MAP_PRIVATE | libc::MAP_ANONYMOUS,
                -1,
                0,
            )
        };
        if ptr == libc::MAP_FAILED {
            return Err(MemoryError::Platform(format!(
                "mmap failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(ptr as *mut u8)
    }

    pub fn deallocate(ptr: *mut u8, size: usize) -> Result<(), MemoryError> {
        let rc = unsafe { libc::munmap(ptr as *mut libc::c_void, size) };
        if rc != 0 {
            return Err(MemoryError::Platform(format!(
                "munmap failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }

    /// W^X: executable regions lose PROT_WRITE, writable regions lose
    /// PROT_EXEC.
    pub fn set_permissions(ptr: *mut u8, size: usize, executable: bool) -> Result<(), MemoryError> {
        let prot = if executable {
            libc::PROT_READ | libc::PROT_EXEC
        } else {
            libc::PROT_READ | libc::PROT_WRITE
        };
        let rc = unsafe { libc::mprotect(ptr as *mut libc::c_void, size, prot) };
        if rc != 0 {
            return Err(MemoryError::Platform(format!(
                "mprotect failed: {}",
                std::io::Error::last_os_error()
            )));
        }
        Ok(())
    }
}

#[cfg(not(unix))]
mod platform {
    use super::MemoryError;

    pub fn page_size() -> Result<usize, MemoryError> {
        Err(MemoryError::Unsupported)
    }

    pub fn allocate(_size: usize) -> Result<*mut u8, MemoryError> {
        Err(MemoryError::Unsupported)
    }

    pub fn deallocate(_ptr: *mut u8, _size: usize) -> Result<(), MemoryError> {
        Err(MemoryError::Unsupported)
    }

    pub fn set_permissions(
        _ptr: *mut u8,
        _size: usize,
        _executable: bool,
    ) -> Result<(), MemoryError> {
        Err(MemoryError::Unsupported)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_allocate_rounds_to_page_size() {
        let mem = ExecutableMemory::with_size(100).unwrap();
        let page = page_size().unwrap();
        assert_eq!(mem.len() % page, 0);
        assert!(mem.len() >= 100);
    }

    #[test]
    fn test_zero_size_allocation_fails() {
        let mut mem = ExecutableMemory::new();
        assert_eq!(mem.allocate(0), Err(MemoryError::ZeroSize));
    }

    #[test]
    fn test_double_allocation_fails() {
        let mut mem = ExecutableMemory::with_size(64).unwrap();
        assert_eq!(mem.allocate(64), Err(MemoryError::AlreadyAllocated));
    }

    #[test]
    fn test_operations_on_unallocated_region_fail() {
        let mut mem = ExecutableMemory::new();
        assert_eq!(mem.make_executable(), Err(MemoryError::NotAllocated));
        assert_eq!(mem.make_writable(), Err(MemoryError::NotAllocated));
        assert_eq!(mem.write(0, &[0]), Err(MemoryError::NotAllocated));
    }

    #[test]
    fn test_write_xor_execute_is_never_violated() {
        let mut mem = ExecutableMemory::with_size(64).unwrap();
        assert!(mem.is_writable());
        assert!(!mem.is_executable());

        mem.make_executable().unwrap();
        assert!(mem.is_executable());
        assert!(!mem.is_writable());
        assert_eq!(mem.write(0, &[0x1f, 0x20, 0x03, 0xd5]), Err(MemoryError::NotWritable));

        mem.make_writable().unwrap();
        assert!(mem.is_writable());
        assert!(!mem.is_executable());
        mem.write(0, &[0x1f, 0x20, 0x03, 0xd5]).unwrap();
    }

    #[test]
    fn test_permission_transitions_are_idempotent() {
        let mut mem = ExecutableMemory::with_size(64).unwrap();
        mem.make_writable().unwrap();
        mem.make_executable().unwrap();
        mem.make_executable().unwrap();
        assert!(mem.is_executable());
    }

    #[test]
    fn test_deallocate_resets_state() {
        let mut mem = ExecutableMemory::with_size(64).unwrap();
        mem.deallocate();
        assert!(!mem.is_allocated());
        assert_eq!(mem.len(), 0);
        // A fresh allocation is allowed afterwards.
        mem.allocate(32).unwrap();
        assert!(mem.is_allocated());
    }

    #[test]
    fn test_move_transfers_ownership() {
        let mem = ExecutableMemory::with_size(64).unwrap();
        let ptr = mem.as_ptr();
        let moved = mem;
        assert_eq!(moved.as_ptr(), ptr);
    }

    #[test]
    fn test_out_of_bounds_write_fails() {
        let mut mem = ExecutableMemory::with_size(8).unwrap();
        let len = mem.len();
        assert!(mem.write(len, &[0u8; 4]).is_err());
    }
}
