use log::debug;
use serde::{Deserialize, Serialize};

use crate::error::DefragError;
use crate::types::BlockNumber;

/// Size of one normal-mode defrag request
pub const DEFAULT_CHUNK_BYTES: u64 = 64 * 1024 * 1024;

/// Largest file the force path will take on
pub const DEFAULT_MAX_FORCE_BYTES: u64 = 128 * 1024 * 1024;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DefragOptions {
    /// Fall back to single block group defrag when the engine runs out of space
    pub force: bool,
    /// Preferred destination for relocated victim data
    pub victim_goal: Option<BlockNumber>,
    /// Count extents before and after each file
    pub verbose: bool,
    pub chunk_bytes: u64,
    pub max_force_bytes: u64,
}

impl Default for DefragOptions {
    fn default() -> Self {
        Self {
            force: false,
            victim_goal: None,
            verbose: false,
            chunk_bytes: DEFAULT_CHUNK_BYTES,
            max_force_bytes: DEFAULT_MAX_FORCE_BYTES,
        }
    }
}

impl DefragOptions {
    pub fn from_json(text: &str) -> Result<Self, DefragError> {
        let options: DefragOptions = serde_json::from_str(text)
            .map_err(|e| DefragError::InvalidOptions(e.to_string()))?;
        options.validate()?;
        debug!("loaded defrag options: {:?}", options);
        Ok(options)
    }

    pub fn validate(&self) -> Result<(), DefragError> {
        if self.chunk_bytes == 0 {
            return Err(DefragError::InvalidOptions("chunk_bytes must be non-zero".to_string()));
        }
        if self.max_force_bytes == 0 {
            return Err(DefragError::InvalidOptions("max_force_bytes must be non-zero".to_string()));
        }
        if self.victim_goal == Some(0) {
            return Err(DefragError::InvalidOptions(
                "victim_goal 0 is not a block; leave it unset for no goal".to_string(),
            ));
        }
        Ok(())
    }

    /// Whether a file of `size_bytes` may take the force path
    pub fn allows_force(&self, size_bytes: u64) -> bool {
        self.force && size_bytes <= self.max_force_bytes
    }
}
