pub mod attempt;
pub mod coalesce;
pub mod defrag;
pub mod displace;
pub mod driver;
pub mod extent;
pub mod frag;
pub mod group;
pub mod ring;
pub mod scanner;
pub mod selector;
pub mod wrap;

pub use attempt::Attempt;
pub use coalesce::{join_extents, Coalesced};
pub use defrag::{force_defrag, ForceReport};
pub use displace::{defrag_proc, do_defrag};
pub use driver::{Defragmenter, FileReport};
pub use extent::{Extent, ExtentId, ExtentList, ExtentStatus};
pub use frag::check_frag_count;
pub use group::{ExtentGroup, GroupId, GroupList};
pub use scanner::{get_free_extents, get_used_extents, BlockGroupContext};
pub use selector::find_exts_group;
pub use wrap::WrapList;
