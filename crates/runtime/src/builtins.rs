//! Built-in routines callable from generated code.
//!
//! These functions are exported with the C ABI and invoked by JIT-compiled
//! BCPL programs through the symbol table. Integer arguments and results
//! travel in x0..x7 per the AArch64 PCS; float values are carried as f64 bit
//! patterns in general registers (the code generator has no FP register
//! forms).
//!
//! # Safety Contract
//!
//! These entry points are called only by compiler-generated code. The
//! compiler guarantees that string arguments are addresses of 0-terminated
//! 32-bit code-point sequences and that stream handles were produced by
//! `bcpl_findinput`/`bcpl_findoutput`.

use libc::FILE;

use crate::context;

/// Write a 0-terminated 32-bit code-point string, one byte per point.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_writes(s: *const u32) {
    if s.is_null() {
        return;
    }
    let ctx = context::global();
    let out = ctx.current_output();
    let mut i = 0;
    loop {
        let ch = unsafe { *s.add(i) };
        if ch == 0 {
            break;
        }
        unsafe {
            (ctx.c_putb)(ch as libc::c_int, out);
        }
        i += 1;
    }
}

/// Write a signed 64-bit integer in decimal.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_writen(n: i64) {
    let ctx = context::global();
    let out = ctx.current_output();
    for byte in n.to_string().bytes() {
        unsafe {
            (ctx.c_putb)(byte as libc::c_int, out);
        }
    }
}

/// Formatted write. Directives: `%N` number, `%S` string, `%C` character,
/// `%%` literal percent. At most three data arguments are consumed.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_writef(fmt: *const u32, a1: i64, a2: i64, a3: i64) {
    if fmt.is_null() {
        return;
    }
    let ctx = context::global();
    let out = ctx.current_output();
    let args = [a1, a2, a3];
    let mut next_arg = 0;
    let mut take = || {
        let value = args.get(next_arg).copied().unwrap_or(0);
        next_arg += 1;
        value
    };

    let mut i = 0;
    loop {
        let ch = unsafe { *fmt.add(i) };
        if ch == 0 {
            break;
        }
        i += 1;
        if ch != u32::from(b'%') {
            unsafe {
                (ctx.c_putb)(ch as libc::c_int, out);
            }
            continue;
        }
        let directive = unsafe { *fmt.add(i) };
        if directive == 0 {
            break;
        }
        i += 1;
        match directive as u8 as char {
            'N' | 'n' => unsafe { bcpl_writen(take()) },
            'S' | 's' => unsafe { bcpl_writes(take() as usize as *const u32) },
            'C' | 'c' => unsafe {
                (ctx.c_putb)(take() as libc::c_int, out);
            },
            '%' => unsafe {
                (ctx.c_putb)(b'%' as libc::c_int, out);
            },
            other => unsafe {
                (ctx.c_putb)(other as libc::c_int, out);
            },
        }
    }
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_newline() {
    let ctx = context::global();
    unsafe {
        (ctx.c_putb)(b'\n' as libc::c_int, ctx.current_output());
    }
}

/// Terminate the program with status 0.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_finish() -> ! {
    let ctx = context::global();
    ctx.flush_output();
    unsafe { (ctx.c_exit)(0) }
}

/// Terminate the program with the given status.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_stop(n: i64) -> ! {
    let ctx = context::global();
    ctx.flush_output();
    unsafe { (ctx.c_exit)(n as libc::c_int) }
}

/// Read one byte from the current input; -1 at end of file.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_rdch() -> i64 {
    let ctx = context::global();
    i64::from(unsafe { (ctx.c_fgetc)(ctx.current_input()) })
}

/// Write one byte to the current output.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_wrch(ch: i64) {
    let ctx = context::global();
    unsafe {
        (ctx.c_putb)(ch as libc::c_int, ctx.current_output());
    }
}

/// Read a decimal integer from the current input, skipping leading spaces.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_readn() -> i64 {
    let ctx = context::global();
    let input = ctx.current_input();
    let mut ch = unsafe { (ctx.c_fgetc)(input) };
    while ch == i32::from(b' ') || ch == i32::from(b'\n') || ch == i32::from(b'\t') {
        ch = unsafe { (ctx.c_fgetc)(input) };
    }
    let negative = ch == i32::from(b'-');
    if negative || ch == i32::from(b'+') {
        ch = unsafe { (ctx.c_fgetc)(input) };
    }
    let mut value: i64 = 0;
    while (i32::from(b'0')..=i32::from(b'9')).contains(&ch) {
        value = value * 10 + i64::from(ch - i32::from(b'0'));
        ch = unsafe { (ctx.c_fgetc)(input) };
    }
    if negative { -value } else { value }
}

/// Open a file for reading. Returns the stream handle, or 0 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_findinput(name: *const u32) -> i64 {
    unsafe { open_stream(name, b"r\0") }
}

/// Open a file for writing. Returns the stream handle, or 0 on failure.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_findoutput(name: *const u32) -> i64 {
    unsafe { open_stream(name, b"w\0") }
}

unsafe fn open_stream(name: *const u32, mode: &[u8]) -> i64 {
    if name.is_null() {
        return 0;
    }
    // Narrow the 32-bit code points to a C path.
    let mut path = Vec::new();
    let mut i = 0;
    loop {
        let ch = unsafe { *name.add(i) };
        if ch == 0 {
            break;
        }
        path.push(ch as u8);
        i += 1;
    }
    path.push(0);
    let ctx = context::global();
    let stream = unsafe {
        (ctx.c_fopen)(
            path.as_ptr() as *const libc::c_char,
            mode.as_ptr() as *const libc::c_char,
        )
    };
    stream as i64
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_selectinput(stream: i64) {
    context::global().select_input(stream as usize as *mut FILE);
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_selectoutput(stream: i64) {
    context::global().select_output(stream as usize as *mut FILE);
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_endread() {
    context::global().end_read();
}

#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_endwrite() {
    context::global().end_write();
}

/// Allocate a zero-initialized vector of `words` 64-bit cells, 8-aligned.
/// Returns the base address, or 0 if allocation fails.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_vec(words: i64) -> i64 {
    if words <= 0 {
        return 0;
    }
    let bytes = (words as usize).saturating_mul(8);
    let ctx = context::global();
    let mem = unsafe { (ctx.c_malloc)(bytes) };
    if mem.is_null() {
        return 0;
    }
    unsafe {
        std::ptr::write_bytes(mem as *mut u8, 0, bytes);
    }
    mem as i64
}

/// Release a vector obtained from `bcpl_vec`.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_vec_free(address: i64) {
    if address != 0 {
        let ctx = context::global();
        unsafe {
            (ctx.c_free)(address as usize as *mut libc::c_void);
        }
    }
}

/// Widen a 0-terminated byte string to 32-bit code points.
/// Returns the address of the widened copy.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_unpack_string(s: *const libc::c_char) -> i64 {
    if s.is_null() {
        return 0;
    }
    let len = unsafe { libc::strlen(s) };
    let ctx = context::global();
    let wide = unsafe { (ctx.c_malloc)((len + 1) * 4) } as *mut u32;
    if wide.is_null() {
        return 0;
    }
    for i in 0..len {
        unsafe {
            *wide.add(i) = *s.add(i) as u8 as u32;
        }
    }
    unsafe {
        *wide.add(len) = 0;
    }
    wide as i64
}

/// Integer to float conversion; the result is the f64 bit pattern.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_float(n: i64) -> u64 {
    (n as f64).to_bits()
}

/// Float (as bit pattern) truncated toward zero.
#[unsafe(no_mangle)]
pub unsafe extern "C" fn bcpl_trunc(bits: u64) -> i64 {
    f64::from_bits(bits) as i64
}

macro_rules! float_binop {
    ($name:ident, $op:tt) => {
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(a: u64, b: u64) -> u64 {
            (f64::from_bits(a) $op f64::from_bits(b)).to_bits()
        }
    };
}

float_binop!(bcpl_fadd, +);
float_binop!(bcpl_fsub, -);
float_binop!(bcpl_fmul, *);
float_binop!(bcpl_fdiv, /);

macro_rules! float_cmp {
    ($name:ident, $op:tt) => {
        /// Float comparison; true is -1, false is 0.
        #[unsafe(no_mangle)]
        pub unsafe extern "C" fn $name(a: u64, b: u64) -> i64 {
            if f64::from_bits(a) $op f64::from_bits(b) { -1 } else { 0 }
        }
    };
}

float_cmp!(bcpl_feq, ==);
float_cmp!(bcpl_fne, !=);
float_cmp!(bcpl_flt, <);
float_cmp!(bcpl_fle, <=);
float_cmp!(bcpl_fgt, >);
float_cmp!(bcpl_fge, >=);
