// Page cache handling around data moves: residency via mincore, release via
// sync_file_range and posix_fadvise

use std::fs::File;
use std::io;
use std::os::unix::io::AsRawFd;
use std::ptr;

use e4defrag_core::{CacheWindow, EngineError, EngineResult, LogicalBlock, PageCache, PageSnapshot};
use log::{trace, warn};

pub struct FilePageCache {
    file: File,
    block_size: u32,
    page_size: u64,
}

impl FilePageCache {
    pub fn new(file: File, block_size: u32) -> Self {
        Self {
            file,
            block_size,
            page_size: system_page_size(),
        }
    }

    pub fn page_size(&self) -> u64 {
        self.page_size
    }

    fn residency(&self, window: &CacheWindow) -> EngineResult<Vec<bool>> {
        let len = window.len as usize;
        let offset = libc::off_t::try_from(window.offset)
            .map_err(|_| EngineError::Rejected(format!("offset {} out of range", window.offset)))?;
        let mut vec = vec![0u8; window.page_count()];

        unsafe {
            let addr = libc::mmap(
                ptr::null_mut(),
                len,
                libc::PROT_READ,
                libc::MAP_SHARED,
                self.file.as_raw_fd(),
                offset,
            );
            if addr == libc::MAP_FAILED {
                return Err(io::Error::last_os_error().into());
            }
            let rc = libc::mincore(addr, len, vec.as_mut_ptr());
            let mincore_err = io::Error::last_os_error();
            if libc::munmap(addr, len) != 0 {
                return Err(io::Error::last_os_error().into());
            }
            if rc != 0 {
                return Err(mincore_err.into());
            }
        }
        Ok(vec.into_iter().map(|state| state & 1 == 1).collect())
    }
}

impl PageCache for FilePageCache {
    fn snapshot(&mut self, start: LogicalBlock, count: u32) -> EngineResult<PageSnapshot> {
        let window = CacheWindow::for_blocks(start, count, self.block_size, self.page_size);
        if window.len == 0 {
            return Ok(PageSnapshot { window, resident: Vec::new() });
        }
        let resident = self.residency(&window)?;
        trace!(
            "{} of {} pages resident at offset {}",
            resident.iter().filter(|r| **r).count(),
            resident.len(),
            window.offset
        );
        Ok(PageSnapshot { window, resident })
    }

    fn release(&mut self, snapshot: &PageSnapshot) -> EngineResult<()> {
        let window = snapshot.window;
        if snapshot.resident.is_empty() {
            return Ok(());
        }
        let fd = self.file.as_raw_fd();
        let offset = window.offset as libc::off64_t;
        let len = (window.page_size * snapshot.resident.len() as u64) as libc::off64_t;
        let flags = libc::SYNC_FILE_RANGE_WAIT_BEFORE
            | libc::SYNC_FILE_RANGE_WRITE
            | libc::SYNC_FILE_RANGE_WAIT_AFTER;
        if unsafe { libc::sync_file_range(fd, offset, len, flags) } != 0 {
            return Err(io::Error::last_os_error().into());
        }

        // A page that cannot be dropped only costs memory
        let mut failed = 0;
        for page in snapshot.resident_offsets() {
            let rc = unsafe {
                libc::posix_fadvise(
                    fd,
                    page as libc::off_t,
                    window.page_size as libc::off_t,
                    libc::POSIX_FADV_DONTNEED,
                )
            };
            if rc != 0 {
                failed += 1;
            }
        }
        if failed > 0 {
            warn!("could not drop {} cached pages at offset {}", failed, window.offset);
        }
        Ok(())
    }
}

fn system_page_size() -> u64 {
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    if size > 0 {
        size as u64
    } else {
        4096
    }
}
