//! # System call ABI
//!
//! User programs enter the kernel with `int 0x80`:
//!
//! | Register | Meaning                                   |
//! |----------|-------------------------------------------|
//! | `eax`    | system call number ([`Sysno`])            |
//! | `ebx`    | first argument                            |
//! | `ecx`    | second argument                           |
//! | `edx`    | third argument                            |
//! | `eax`    | on return: result, or `-errno` on failure |
//!
//! Results are plain `u32`s; failures are encoded as the two's complement
//! of an [`Errno`] value (see [`encode_result`]).

#![cfg_attr(not(any(test, doctest)), no_std)]
#![deny(unsafe_code)]

mod errno;
mod sysno;

pub use crate::errno::Errno;
pub use crate::sysno::Sysno;

/// Outcome of a system call before it is written back into `eax`.
pub type SysResult = Result<u32, Errno>;

/// Encode a result the way user space sees it in `eax`.
#[must_use]
pub const fn encode_result(result: SysResult) -> u32 {
    match result {
        Ok(value) => value,
        #[allow(clippy::cast_sign_loss)]
        Err(errno) => errno.as_negative() as u32,
    }
}

/// Decode a value returned in `eax`.
///
/// Values in `[-4095, -1]` are errors, as on other i386 kernels.
#[must_use]
pub fn decode_result(raw: u32) -> SysResult {
    #[allow(clippy::cast_possible_wrap)]
    let signed = raw as i32;
    if (-4095..0).contains(&signed) {
        Err(Errno::from_code(-signed).unwrap_or(Errno::EINVAL))
    } else {
        Ok(raw)
    }
}
