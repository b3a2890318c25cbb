//! Process-wide runtime context shared with generated code.
//!
//! The context bundles function-pointer thunks onto the C standard library
//! with two mutable stream holders (current input, current output). Built-in
//! entry points in `builtins.rs` reach it through [`global`], so generated
//! code passes only its natural arguments.

use std::ffi::CString;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicPtr, Ordering};

use libc::{FILE, c_char, c_int, c_void};

/// Thunks onto libc plus the current-stream holders.
pub struct RuntimeContext {
    pub c_fopen: unsafe extern "C" fn(*const c_char, *const c_char) -> *mut FILE,
    pub c_fgetc: unsafe extern "C" fn(*mut FILE) -> c_int,
    /// Byte-put primitive (fputc).
    pub c_putb: unsafe extern "C" fn(c_int, *mut FILE) -> c_int,
    pub c_fclose: unsafe extern "C" fn(*mut FILE) -> c_int,
    pub c_malloc: unsafe extern "C" fn(usize) -> *mut c_void,
    pub c_free: unsafe extern "C" fn(*mut c_void),
    pub c_exit: unsafe extern "C" fn(c_int) -> !,
    /// Stream generated code currently reads from.
    current_input: AtomicPtr<FILE>,
    /// Stream generated code currently writes to.
    current_output: AtomicPtr<FILE>,
    /// The process streams the holders reset to on `endread`/`endwrite`.
    stdin_stream: *mut FILE,
    stdout_stream: *mut FILE,
}

// The FILE pointers are process-global streams; the holders are atomics.
unsafe impl Send for RuntimeContext {}
unsafe impl Sync for RuntimeContext {}

impl RuntimeContext {
    fn init() -> Self {
        // Unbuffered streams keep JIT output ordered with host output.
        let (stdin_stream, stdout_stream) = unsafe {
            let read_mode = CString::new("r").unwrap();
            let write_mode = CString::new("w").unwrap();
            let input = libc::fdopen(0, read_mode.as_ptr());
            let output = libc::fdopen(1, write_mode.as_ptr());
            if !output.is_null() {
                libc::setvbuf(output, std::ptr::null_mut(), libc::_IONBF, 0);
            }
            (input, output)
        };
        RuntimeContext {
            c_fopen: libc::fopen,
            c_fgetc: libc::fgetc,
            c_putb: libc::fputc,
            c_fclose: libc::fclose,
            c_malloc: libc::malloc,
            c_free: libc::free,
            c_exit: libc::exit,
            current_input: AtomicPtr::new(stdin_stream),
            current_output: AtomicPtr::new(stdout_stream),
            stdin_stream,
            stdout_stream,
        }
    }

    pub fn current_input(&self) -> *mut FILE {
        self.current_input.load(Ordering::Acquire)
    }

    pub fn current_output(&self) -> *mut FILE {
        self.current_output.load(Ordering::Acquire)
    }

    pub fn select_input(&self, stream: *mut FILE) {
        if !stream.is_null() {
            self.current_input.store(stream, Ordering::Release);
        }
    }

    pub fn select_output(&self, stream: *mut FILE) {
        if !stream.is_null() {
            self.current_output.store(stream, Ordering::Release);
        }
    }

    /// Close the selected input unless it is the process stdin, then fall
    /// back to stdin.
    pub fn end_read(&self) {
        let stream = self.current_input();
        if !stream.is_null() && stream != self.stdin_stream {
            unsafe {
                (self.c_fclose)(stream);
            }
        }
        self.current_input.store(self.stdin_stream, Ordering::Release);
    }

    /// Close the selected output unless it is the process stdout, then fall
    /// back to stdout.
    pub fn end_write(&self) {
        let stream = self.current_output();
        if !stream.is_null() && stream != self.stdout_stream {
            unsafe {
                (self.c_fclose)(stream);
            }
        }
        self.current_output.store(self.stdout_stream, Ordering::Release);
    }

    pub fn stdout_stream(&self) -> *mut FILE {
        self.stdout_stream
    }

    pub fn stdin_stream(&self) -> *mut FILE {
        self.stdin_stream
    }

    /// Flush the currently selected output stream.
    pub fn flush_output(&self) {
        let stream = self.current_output();
        if !stream.is_null() {
            unsafe {
                libc::fflush(stream);
            }
        }
    }
}

static CONTEXT: OnceLock<RuntimeContext> = OnceLock::new();

/// The process-wide context record, created on first use.
pub fn global() -> &'static RuntimeContext {
    CONTEXT.get_or_init(RuntimeContext::init)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_global_context_has_streams() {
        let ctx = global();
        assert!(!ctx.current_input().is_null());
        assert!(!ctx.current_output().is_null());
    }

    #[test]
    #[serial]
    fn test_select_output_roundtrip() {
        let ctx = global();
        let original = ctx.current_output();
        // Null selections are ignored.
        ctx.select_output(std::ptr::null_mut());
        assert_eq!(ctx.current_output(), original);
        ctx.select_output(ctx.stdout_stream());
        assert_eq!(ctx.current_output(), ctx.stdout_stream());
        ctx.select_output(original);
    }
}
