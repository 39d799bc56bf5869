//! Block allocation and the chain of blocks backing the memory pool.

use tracing::debug;

use crate::error::{FillerError, Result};

/// Width of a single buffer element in bytes.
pub const ELEMENT_WIDTH: usize = std::mem::size_of::<u64>();

/// One contiguous allocation unit with its fill bookkeeping.
#[derive(Debug)]
pub struct Block {
    data: Vec<u64>,
    cursor: usize,
}

impl Block {
    /// Allocate a zeroed block of `block_bytes` bytes. `index` is the
    /// block's position in the chain, reported on allocation failure.
    fn allocate(block_bytes: usize, index: usize) -> Result<Block> {
        // Truncation is fine, a partial trailing element stays unused.
        let capacity = block_bytes / ELEMENT_WIDTH;
        let mut data = Vec::new();
        data.try_reserve_exact(capacity)
            .map_err(|source| FillerError::Allocation { index, source })?;
        data.resize(capacity, 0);
        Ok(Block { data, cursor: 0 })
    }

    /// Number of elements the block holds.
    pub fn capacity(&self) -> usize {
        self.data.len()
    }

    /// Read access to the block's elements.
    pub fn elements(&self) -> &[u64] {
        &self.data
    }

    /// Reset the fill cursor for a new pass over the block.
    pub fn begin_pass(&mut self) {
        self.cursor = 0;
    }

    /// Whether the current pass has written every element.
    pub fn pass_complete(&self) -> bool {
        self.cursor >= self.data.len()
    }

    /// Write `value` at the cursor and advance it one element.
    #[inline]
    pub fn write_next(&mut self, value: u64) {
        self.data[self.cursor] = value;
        self.cursor += 1;
    }

    /// Write `value` into every element in one synchronous sweep.
    pub fn fill(&mut self, value: u64) {
        self.begin_pass();
        while !self.pass_complete() {
            self.write_next(value);
        }
    }
}

/// Ordered owning sequence of blocks covering the requested total size.
#[derive(Debug)]
pub struct BlockChain {
    blocks: Vec<Block>,
}

impl BlockChain {
    /// Allocate `units` blocks of `block_bytes` bytes each, in order.
    ///
    /// Fails without allocating anything when `units` is zero or the
    /// sizes do not fit the platform. An allocation failure partway
    /// through reports the failing block index; the blocks already
    /// built are dropped with the partial chain.
    pub fn build(units: u64, block_bytes: u64) -> Result<BlockChain> {
        if units == 0 {
            return Err(FillerError::Config(
                "size must be a positive number of blocks".into(),
            ));
        }
        let units = usize::try_from(units).map_err(|_| {
            FillerError::Config("requested size exceeds this platform's address width".into())
        })?;
        let block_bytes = usize::try_from(block_bytes).map_err(|_| {
            FillerError::Config("block size exceeds this platform's address width".into())
        })?;
        if block_bytes < ELEMENT_WIDTH {
            return Err(FillerError::Config(format!(
                "block size must be at least {ELEMENT_WIDTH} bytes"
            )));
        }

        let mut blocks = Vec::new();
        for index in 0..units {
            blocks.push(Block::allocate(block_bytes, index)?);
            debug!("Allocated block {} of {}", index + 1, units);
        }
        Ok(BlockChain { blocks })
    }

    /// One synchronous pass writing `value` into every element of every
    /// block, in block order. Forces physical page commitment for the
    /// whole chain.
    pub fn fill_once(&mut self, value: u64) {
        for block in &mut self.blocks {
            block.fill(value);
        }
    }

    /// Number of blocks in the chain.
    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// Whether the chain holds no blocks.
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty()
    }

    /// Total bytes held across all blocks, counting whole elements.
    pub fn total_bytes(&self) -> u64 {
        self.blocks
            .iter()
            .map(|block| (block.capacity() * ELEMENT_WIDTH) as u64)
            .sum()
    }

    /// Read access to the blocks, head to tail.
    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    /// Write access to the blocks, head to tail.
    pub fn blocks_mut(&mut self) -> &mut [Block] {
        &mut self.blocks
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_produces_requested_blocks_in_order() {
        let chain = BlockChain::build(3, 1024).unwrap();
        assert_eq!(chain.len(), 3);
        for block in chain.blocks() {
            assert_eq!(block.capacity(), 128);
        }
        assert_eq!(chain.total_bytes(), 3 * 1024);
    }

    #[test]
    fn capacity_truncates_a_partial_trailing_element() {
        let chain = BlockChain::build(1, 20).unwrap();
        assert_eq!(chain.blocks()[0].capacity(), 2);
        assert_eq!(chain.total_bytes(), 16);
    }

    #[test]
    fn zero_units_is_rejected_before_any_allocation() {
        let err = BlockChain::build(0, 1024).unwrap_err();
        assert!(matches!(err, FillerError::Config(_)));
    }

    #[test]
    fn undersized_blocks_are_rejected() {
        let err = BlockChain::build(1, ELEMENT_WIDTH as u64 - 1).unwrap_err();
        assert!(matches!(err, FillerError::Config(_)));
    }

    #[test]
    fn fill_once_writes_the_value_everywhere() {
        let mut chain = BlockChain::build(2, 64).unwrap();

        chain.fill_once(u64::MAX);
        assert!(chain
            .blocks()
            .iter()
            .flat_map(|block| block.elements())
            .all(|&v| v == u64::MAX));

        chain.fill_once(0x0123_4567_89AB_CDEF);
        assert!(chain
            .blocks()
            .iter()
            .flat_map(|block| block.elements())
            .all(|&v| v == 0x0123_4567_89AB_CDEF));
    }

    #[test]
    fn a_fill_pass_covers_exactly_the_advertised_range() {
        let mut block = Block::allocate(64, 0).unwrap();
        block.fill(9);
        assert!(block.pass_complete());
        assert_eq!(block.elements(), &[9u64; 8]);
    }

    #[test]
    fn allocation_failure_reports_the_failing_index() {
        // Larger than any allocator will grant; try_reserve fails
        // without touching memory.
        let err = BlockChain::build(2, u64::MAX).unwrap_err();
        match err {
            FillerError::Allocation { index, .. } => assert_eq!(index, 0),
            other => panic!("unexpected error: {other}"),
        }

        let err = Block::allocate(usize::MAX, 5).unwrap_err();
        match err {
            FillerError::Allocation { index, .. } => assert_eq!(index, 5),
            other => panic!("unexpected error: {other}"),
        }
    }
}
