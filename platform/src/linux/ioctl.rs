// Storage engine backed by the ext4 online defrag ioctls

use std::fs::{File, OpenOptions};
use std::io;
use std::os::unix::fs::MetadataExt;
use std::os::unix::io::{AsRawFd, RawFd};
use std::path::Path;

use e4defrag_core::{
    BlockNumber, DefragRequest, EngineError, EngineResult, ExtentRecord, FileInfo, GroupInfo,
    InodeNumber, Page, StorageEngine,
};
use libc::c_int;
use log::{debug, trace};
use nix::errno::Errno;

/// Extent records carried by one `ext4_extents_info`
pub const DEFRAG_MAX_ENT: usize = 32;

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawExtentData {
    pub block: u32,
    pub start: u64,
    pub len: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawDefragData {
    pub start_offset: u32,
    pub defrag_size: u32,
    pub goal: u64,
    pub flag: c_int,
    pub ext: RawExtentData,
}

#[repr(C)]
#[derive(Debug, Clone, Copy, Default)]
pub struct RawGroupInfo {
    pub blocks_per_group: c_int,
    pub inodes_per_group: c_int,
}

#[repr(C)]
#[derive(Debug, Clone, Copy)]
pub struct RawExtentsInfo {
    pub ino: u64,
    pub max_entries: c_int,
    pub entries: c_int,
    pub f_offset: u32,
    pub g_offset: i32,
    pub goal: u64,
    pub ext: [RawExtentData; DEFRAG_MAX_ENT],
}

impl RawExtentsInfo {
    fn new(ino: InodeNumber) -> Self {
        Self {
            ino,
            max_entries: DEFRAG_MAX_ENT as c_int,
            entries: 0,
            f_offset: 0,
            g_offset: 0,
            goal: 0,
            ext: [RawExtentData::default(); DEFRAG_MAX_ENT],
        }
    }

    /// A request carrying exactly one extent
    fn single(ino: InodeNumber, extent: &ExtentRecord) -> Self {
        let mut info = Self::new(ino);
        info.entries = 1;
        info.ext[0] = RawExtentData::from(extent);
        info
    }

    fn records(&self) -> impl Iterator<Item = ExtentRecord> + '_ {
        let count = (self.entries.max(0) as usize).min(DEFRAG_MAX_ENT);
        self.ext[..count].iter().map(ExtentRecord::from)
    }
}

impl From<&ExtentRecord> for RawExtentData {
    fn from(record: &ExtentRecord) -> Self {
        Self {
            block: record.logical,
            start: record.start,
            len: record.len as c_int,
        }
    }
}

impl From<&RawExtentData> for ExtentRecord {
    fn from(raw: &RawExtentData) -> Self {
        ExtentRecord::new(raw.block, raw.start, raw.len.max(0) as u32)
    }
}

impl From<&DefragRequest> for RawDefragData {
    fn from(request: &DefragRequest) -> Self {
        Self {
            start_offset: request.start_offset,
            defrag_size: request.defrag_size,
            goal: request.goal.unwrap_or(0),
            flag: request.mode.flag(),
            ext: RawExtentData::from(&request.dest),
        }
    }
}

// Every request below is declared write-only by the kernel headers even
// though the kernel fills in the results.
nix::ioctl_write_ptr!(ext4_ioc_defrag, b'f', 10, RawDefragData);
nix::ioctl_write_ptr!(ext4_ioc_group_info, b'f', 11, RawGroupInfo);
nix::ioctl_write_ptr!(ext4_ioc_free_blocks_info, b'f', 12, RawExtentsInfo);
nix::ioctl_write_ptr!(ext4_ioc_extents_info, b'f', 13, RawExtentsInfo);
nix::ioctl_write_ptr!(ext4_ioc_reserve_block, b'f', 14, RawExtentsInfo);
nix::ioctl_write_ptr!(ext4_ioc_move_victim, b'f', 15, RawExtentsInfo);
nix::ioctl_none!(ext4_ioc_block_release, b'f', 16);
// FIGETBSZ is _IO(0x00, 2)
nix::ioctl_read_bad!(figetbsz, 2, c_int);

/// Translate a failed request into the engine error vocabulary
pub fn map_errno(errno: Errno, inode: InodeNumber, region: Option<&ExtentRecord>) -> EngineError {
    match errno {
        Errno::ENOENT => EngineError::NoMapping(inode),
        Errno::ENOSPC => EngineError::NoSpace(errno.desc().to_string()),
        Errno::EBUSY => EngineError::Busy {
            start: region.map(|r| r.start).unwrap_or(0),
            len: region.map(|r| r.len as u64).unwrap_or(0),
        },
        Errno::EINVAL => EngineError::Rejected(errno.desc().to_string()),
        other => EngineError::Io(io::Error::from_raw_os_error(other as i32)),
    }
}

/// One open file on a mounted ext4 filesystem with online defrag support
pub struct Ext4IoctlEngine {
    file: File,
    inode: InodeNumber,
}

impl Ext4IoctlEngine {
    pub fn open<P: AsRef<Path>>(path: P) -> io::Result<Self> {
        let path = path.as_ref();
        let file = OpenOptions::new().read(true).open(path)?;
        let metadata = file.metadata()?;
        if !metadata.is_file() {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("{} is not a regular file", path.display()),
            ));
        }
        debug!("opened {} (inode {})", path.display(), metadata.ino());
        Ok(Self {
            file,
            inode: metadata.ino(),
        })
    }

    /// Inode, size and filesystem block size of the open file
    pub fn file_info(&self) -> io::Result<FileInfo> {
        let metadata = self.file.metadata()?;
        let mut block_size: c_int = 0;
        unsafe { figetbsz(self.fd(), &mut block_size) }.map_err(io::Error::from)?;
        if block_size <= 0 {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("invalid block size {block_size}"),
            ));
        }
        Ok(FileInfo::new(self.inode, metadata.len(), block_size as u32))
    }

    /// A second handle on the same file, for the page cache
    pub fn try_clone_file(&self) -> io::Result<File> {
        self.file.try_clone()
    }

    fn fd(&self) -> RawFd {
        self.file.as_raw_fd()
    }
}

impl StorageEngine for Ext4IoctlEngine {
    fn group_info(&mut self) -> EngineResult<GroupInfo> {
        let mut raw = RawGroupInfo::default();
        unsafe { ext4_ioc_group_info(self.fd(), &mut raw) }
            .map_err(|e| map_errno(e, self.inode, None))?;
        let blocks_per_group = u32::try_from(raw.blocks_per_group)
            .map_err(|_| EngineError::Rejected(format!("blocks per group {}", raw.blocks_per_group)))?;
        let inodes_per_group = u32::try_from(raw.inodes_per_group)
            .map_err(|_| EngineError::Rejected(format!("inodes per group {}", raw.inodes_per_group)))?;
        Ok(GroupInfo { blocks_per_group, inodes_per_group })
    }

    fn extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>> {
        let mut info = RawExtentsInfo::new(inode);
        // The kernel reads the starting extent index from `entries`
        info.entries = offset as c_int;
        unsafe { ext4_ioc_extents_info(self.fd(), &mut info) }
            .map_err(|e| map_errno(e, inode, None))?;

        let records: Vec<ExtentRecord> = info.records().collect();
        trace!("inode {}: {} extents from index {}", inode, records.len(), offset);
        if records.len() == DEFRAG_MAX_ENT {
            Ok(Page::more(records, offset + DEFRAG_MAX_ENT as u32))
        } else {
            Ok(Page::last(records))
        }
    }

    fn free_extents(&mut self, inode: InodeNumber, offset: u32) -> EngineResult<Page<ExtentRecord>> {
        let mut info = RawExtentsInfo::new(inode);
        info.g_offset = offset as i32;
        unsafe { ext4_ioc_free_blocks_info(self.fd(), &mut info) }
            .map_err(|e| map_errno(e, inode, None))?;

        let records: Vec<ExtentRecord> = info
            .ext
            .iter()
            .take_while(|raw| raw.len != 0)
            .map(ExtentRecord::from)
            .collect();
        Ok(free_page(records, offset, info.g_offset))
    }

    fn move_victim(
        &mut self,
        victim: InodeNumber,
        extent: &ExtentRecord,
        goal: Option<BlockNumber>,
    ) -> EngineResult<()> {
        let mut info = RawExtentsInfo::single(victim, extent);
        info.goal = goal.unwrap_or(0);
        unsafe { ext4_ioc_move_victim(self.fd(), &mut info) }
            .map_err(|e| map_errno(e, victim, Some(extent)))?;
        Ok(())
    }

    fn reserve_region(&mut self, inode: InodeNumber, region: &ExtentRecord) -> EngineResult<()> {
        let mut info = RawExtentsInfo::single(inode, region);
        unsafe { ext4_ioc_reserve_block(self.fd(), &mut info) }
            .map_err(|e| map_errno(e, inode, Some(region)))?;
        Ok(())
    }

    fn release_reservations(&mut self) -> EngineResult<()> {
        unsafe { ext4_ioc_block_release(self.fd()) }.map_err(|e| map_errno(e, self.inode, None))?;
        Ok(())
    }

    fn commit_defrag(&mut self, request: &DefragRequest) -> EngineResult<u32> {
        let mut raw = RawDefragData::from(request);
        let placed = unsafe { ext4_ioc_defrag(self.fd(), &mut raw) }
            .map_err(|e| map_errno(e, self.inode, Some(&request.dest)))?;
        Ok(placed.max(0) as u32)
    }

    fn sync(&mut self) -> EngineResult<()> {
        self.file.sync_all()?;
        Ok(())
    }
}

/// A short batch ends the scan; a full one continues from the kernel's cursor
fn free_page(records: Vec<ExtentRecord>, offset: u32, g_offset: i32) -> Page<ExtentRecord> {
    if records.len() < DEFRAG_MAX_ENT {
        return Page::last(records);
    }
    match u32::try_from(g_offset).ok().filter(|next| *next > offset) {
        Some(next) => Page::more(records, next),
        None => Page::last(records),
    }
}
