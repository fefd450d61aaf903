/// 1-based id of a block within a paged file. Id 0 is never allocated.
pub type BlockId = u32;
/// 1-based id of a record within a slotted page. Id 0 addresses the page header.
pub type RecordId = u16;
/// Identifies a row within a relation for the lifetime of that relation.
pub type Handle = (BlockId, RecordId);

pub const BLOCK_SZ: usize = 4096;
