//! Value objects for relay depth limits.

/// Deepest block (blocks below the tip) still announced or served as a
/// compact block; anything deeper is answered with the full block.
pub const MAX_CMPCTBLOCK_DEPTH: u32 = 5;

/// Deepest block for which `getblocktxn` is answered with `blocktxn`.
pub const MAX_BLOCKTXN_DEPTH: u32 = 10;

/// How a block request is served.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ServeMode {
    /// Answer with the compact form (`cmpctblock` or `blocktxn`).
    Compact,
    /// Answer with the full `block` message.
    FullBlock,
}

/// Depth limits applied when serving compact block requests.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct RelayDepthPolicy {
    pub max_cmpctblock_depth: u32,
    pub max_blocktxn_depth: u32,
}

impl Default for RelayDepthPolicy {
    fn default() -> Self {
        Self {
            max_cmpctblock_depth: MAX_CMPCTBLOCK_DEPTH,
            max_blocktxn_depth: MAX_BLOCKTXN_DEPTH,
        }
    }
}

impl RelayDepthPolicy {
    /// `getdata(MSG_CMPCT_BLOCK)` for a block `depth` blocks below the tip.
    pub fn for_compact_getdata(&self, depth: u32) -> ServeMode {
        if depth <= self.max_cmpctblock_depth {
            ServeMode::Compact
        } else {
            ServeMode::FullBlock
        }
    }

    /// `getblocktxn` for a block `depth` blocks below the tip. Deeper blocks
    /// get no `blocktxn` at all; the full block is sent instead.
    pub fn for_getblocktxn(&self, depth: u32) -> ServeMode {
        if depth <= self.max_blocktxn_depth {
            ServeMode::Compact
        } else {
            ServeMode::FullBlock
        }
    }
}
