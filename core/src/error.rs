use std::fmt;

use thiserror::Error;

use crate::types::{BlockNumber, GroupNumber, InodeNumber};

/// Storage engine and page cache requests, used to label failures
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Request {
    GroupInfo,
    GetExtents,
    GetFreeExtents,
    MoveVictim,
    ReserveRegion,
    ReleaseReservations,
    CommitDefrag,
    Sync,
}

impl fmt::Display for Request {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Request::GroupInfo => "get-group-info",
            Request::GetExtents => "get-extents",
            Request::GetFreeExtents => "get-free-extents",
            Request::MoveVictim => "move-victim",
            Request::ReserveRegion => "reserve-region",
            Request::ReleaseReservations => "release-all-reservations",
            Request::CommitDefrag => "commit-defrag",
            Request::Sync => "sync",
        };
        f.write_str(name)
    }
}

/// Failure reported by a collaborator for a single request
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("No extent mapping for inode {0}")]
    NoMapping(InodeNumber),

    #[error("No space left: {0}")]
    NoSpace(String),

    #[error("Region {start}+{len} is already claimed")]
    Busy { start: BlockNumber, len: u64 },

    #[error("Request rejected: {0}")]
    Rejected(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for a single collaborator request
pub type EngineResult<T> = Result<T, EngineError>;

/// Errors a defrag attempt can end with
#[derive(Debug, Error)]
pub enum DefragError {
    #[error("Not enough space in the block group: need {needed} blocks, found {available}")]
    InsufficientSpace { needed: u64, available: u64 },

    #[error("No free extents in block group {group}")]
    NoFreeExtents { group: GroupNumber },

    #[error("No fragmentation improvement: {regions} regions for a file with {extents} extents")]
    NoImprovement { regions: usize, extents: usize },

    #[error("Extent {start}+{len} overlaps an existing extent")]
    Overlap { start: BlockNumber, len: u32 },

    #[error("Extent list is empty")]
    EmptyExtentList,

    #[error("Region of {len} blocks does not fit one request")]
    RegionTooLarge { len: u64 },

    #[error("Storage engine request {request} failed: {source}")]
    Engine {
        request: Request,
        #[source]
        source: EngineError,
    },

    #[error("Page cache error: {0}")]
    PageCache(#[source] EngineError),

    #[error("Rollback after \"{cause}\" failed: {source}")]
    RollbackFailed {
        cause: Box<DefragError>,
        #[source]
        source: EngineError,
    },

    #[error("Invalid options: {0}")]
    InvalidOptions(String),

    #[error("File size is 0")]
    EmptyFile,

    #[error("Not a regular file: {0}")]
    NotRegularFile(String),
}

impl DefragError {
    /// Wrap a collaborator failure with the request that produced it
    pub fn engine(request: Request, source: EngineError) -> Self {
        DefragError::Engine { request, source }
    }

    /// Declined attempts: not enough room or nothing to gain
    pub fn is_capacity(&self) -> bool {
        match self {
            DefragError::InsufficientSpace { .. }
            | DefragError::NoFreeExtents { .. }
            | DefragError::NoImprovement { .. } => true,
            DefragError::Engine { source: EngineError::NoSpace(_), .. } => true,
            _ => false,
        }
    }

    /// The request that failed, if this came from the storage engine
    pub fn request(&self) -> Option<Request> {
        match self {
            DefragError::Engine { request, .. } => Some(*request),
            DefragError::RollbackFailed { cause, .. } => cause.request(),
            _ => None,
        }
    }
}
