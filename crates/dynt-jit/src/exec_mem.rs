//! Executable memory for emitted code.
//!
//! A finished code buffer is copied into a fresh page-aligned mapping
//! which is then flipped from writable to executable. Mappings are never
//! unmapped: native entry points are cached on function values for the
//! process lifetime.

use dynt_error::{Error, Result};
use dynt_runtime::NativeFn;
use tracing::debug;

fn page_size() -> usize {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size <= 0 { 4096 } else { size as usize }
}

/// Map `code` into executable memory and return it as a native function
/// pointer to its first byte.
pub fn map_executable(code: &[u8]) -> Result<NativeFn> {
    let size = code.len().div_ceil(page_size()) * page_size();

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
        return Err(Error::code_map_failed("mmap of code buffer failed")
            .with_operation("exec_mem::map_executable")
            .with_context("bytes", size.to_string())
            .set_source(std::io::Error::last_os_error()));
    }

    unsafe {
        std::ptr::copy_nonoverlapping(code.as_ptr(), ptr as *mut u8, code.len());
        if libc::mprotect(ptr, size, libc::PROT_READ | libc::PROT_EXEC) != 0 {
            return Err(Error::code_map_failed("mprotect to executable failed")
                .with_operation("exec_mem::map_executable")
                .set_source(std::io::Error::last_os_error()));
        }
    }

    debug!(bytes = code.len(), mapped = size, "mapped native code");
    Ok(unsafe { std::mem::transmute::<*mut libc::c_void, NativeFn>(ptr) })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rounds_up_to_whole_pages() {
        assert_eq!(page_size() % 4096, 0);
    }

    #[cfg(target_arch = "x86_64")]
    #[test]
    fn mapped_code_is_callable() {
        // mov rax, 42; ret
        let code = [0x48, 0xC7, 0xC0, 0x2A, 0x00, 0x00, 0x00, 0xC3];
        let func = map_executable(&code).expect("mapping should succeed");
        let answer = unsafe {
            let raw: extern "C" fn() -> u64 = std::mem::transmute(func);
            raw()
        };
        assert_eq!(answer, 42);
    }
}
