// Host allocator shim handed to render-graph runtimes
//
// Runtimes allocate CPU memory through this table instead of a global
// allocator of their own. Blocks carry a small header with their layout so
// `free` and `realloc` only need the pointer back.

use std::alloc::{self, Layout};
use std::fmt;
use std::mem;
use std::ptr;

const HEADER: usize = 2 * mem::size_of::<usize>();

#[derive(Clone, Copy)]
pub struct HostAllocator {
    pub alloc: unsafe fn(size: usize, align: usize) -> *mut u8,
    pub realloc: unsafe fn(ptr: *mut u8, new_size: usize, align: usize) -> *mut u8,
    pub free: unsafe fn(ptr: *mut u8),
    pub print: fn(fmt::Arguments<'_>),
}

impl HostAllocator {
    /// Routes allocations to the Rust global allocator and prints to `log`.
    pub fn system() -> Self {
        Self {
            alloc: system_alloc,
            realloc: system_realloc,
            free: system_free,
            print: log_print,
        }
    }
}

impl Default for HostAllocator {
    fn default() -> Self {
        Self::system()
    }
}

impl fmt::Debug for HostAllocator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostAllocator").finish_non_exhaustive()
    }
}

fn block_layout(size: usize, align: usize) -> Option<(Layout, usize)> {
    if !align.is_power_of_two() {
        return None;
    }
    let align = align.max(mem::align_of::<usize>());
    let offset = HEADER.max(align);
    let layout = Layout::from_size_align(offset.checked_add(size)?, align).ok()?;
    Some((layout, offset))
}

/// Returns null for zero sizes, invalid alignments and exhausted memory.
unsafe fn system_alloc(size: usize, align: usize) -> *mut u8 {
    if size == 0 {
        return ptr::null_mut();
    }
    let Some((layout, offset)) = block_layout(size, align) else {
        return ptr::null_mut();
    };
    let base = alloc::alloc(layout);
    if base.is_null() {
        return base;
    }
    let user = base.add(offset);
    let header = user.cast::<usize>().sub(2);
    header.write(layout.size());
    header.add(1).write(layout.align());
    user
}

unsafe fn system_free(ptr: *mut u8) {
    if ptr.is_null() {
        return;
    }
    let header = ptr.cast::<usize>().sub(2);
    let size = header.read();
    let align = header.add(1).read();
    let offset = HEADER.max(align);
    alloc::dealloc(ptr.sub(offset), Layout::from_size_align_unchecked(size, align));
}

unsafe fn system_realloc(ptr: *mut u8, new_size: usize, align: usize) -> *mut u8 {
    if ptr.is_null() {
        return system_alloc(new_size, align);
    }
    if new_size == 0 {
        system_free(ptr);
        return ptr::null_mut();
    }
    let new = system_alloc(new_size, align);
    if new.is_null() {
        return new;
    }
    let header = ptr.cast::<usize>().sub(2);
    let old_size = header.read() - HEADER.max(header.add(1).read());
    ptr::copy_nonoverlapping(ptr, new, old_size.min(new_size));
    system_free(ptr);
    new
}

fn log_print(args: fmt::Arguments<'_>) {
    log::info!(target: "kiln::graph", "{}", args);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_respects_alignment() {
        let host = HostAllocator::system();
        for align in [1, 8, 16, 64, 256] {
            unsafe {
                let p = (host.alloc)(24, align);
                assert!(!p.is_null());
                assert_eq!(p as usize % align, 0);
                (host.free)(p);
            }
        }
    }

    #[test]
    fn realloc_preserves_contents() {
        let host = HostAllocator::system();
        unsafe {
            let p = (host.alloc)(16, 32);
            for i in 0..16 {
                p.add(i).write(i as u8);
            }
            let grown = (host.realloc)(p, 128, 32);
            assert!(!grown.is_null());
            assert_eq!(grown as usize % 32, 0);
            for i in 0..16 {
                assert_eq!(grown.add(i).read(), i as u8);
            }
            let shrunk = (host.realloc)(grown, 4, 8);
            for i in 0..4 {
                assert_eq!(shrunk.add(i).read(), i as u8);
            }
            (host.free)(shrunk);
        }
    }

    #[test]
    fn degenerate_requests() {
        let host = HostAllocator::system();
        unsafe {
            assert!((host.alloc)(0, 8).is_null());
            assert!((host.alloc)(8, 3).is_null());
            (host.free)(ptr::null_mut());

            let p = (host.realloc)(ptr::null_mut(), 8, 8);
            assert!(!p.is_null());
            assert!((host.realloc)(p, 0, 8).is_null());
        }
    }
}
