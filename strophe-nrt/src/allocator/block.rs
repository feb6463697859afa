use std::collections::BTreeMap;

use crate::error::AllocationError;

/// First-fit allocator over a contiguous address space `[heap_minimum, heap_maximum)`.
///
/// Free ranges are kept coalesced: two free ranges never touch.
#[derive(Debug, Clone)]
pub struct BlockAllocator {
    heap_minimum: u32,
    heap_maximum: u32,
    /// start -> size
    free: BTreeMap<u32, u32>,
    /// start -> size
    used: BTreeMap<u32, u32>,
}

impl BlockAllocator {
    pub fn new(heap_minimum: u32) -> Self {
        Self::with_maximum(heap_minimum, u32::MAX)
    }

    pub fn with_maximum(heap_minimum: u32, heap_maximum: u32) -> Self {
        let mut free = BTreeMap::new();
        if heap_maximum > heap_minimum {
            free.insert(heap_minimum, heap_maximum - heap_minimum);
        }
        Self {
            heap_minimum,
            heap_maximum,
            free,
            used: BTreeMap::new(),
        }
    }

    pub fn heap_minimum(&self) -> u32 {
        self.heap_minimum
    }

    /// Reserve `size` addresses at the lowest address where they fit.
    pub fn allocate(&mut self, size: u32) -> Result<u32, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSize);
        }
        let (start, available) = self
            .free
            .iter()
            .find(|(_, &available)| available >= size)
            .map(|(&start, &available)| (start, available))
            .ok_or(AllocationError::Exhausted(size))?;
        self.free.remove(&start);
        if available > size {
            self.free.insert(start + size, available - size);
        }
        self.used.insert(start, size);
        Ok(start)
    }

    /// Reserve exactly `[address, address + size)`.
    pub fn allocate_at(&mut self, address: u32, size: u32) -> Result<u32, AllocationError> {
        if size == 0 {
            return Err(AllocationError::ZeroSize);
        }
        let end = address
            .checked_add(size)
            .filter(|&end| address >= self.heap_minimum && end <= self.heap_maximum)
            .ok_or(AllocationError::OutOfRange { address, size })?;
        let (block_start, block_size) = self
            .free
            .range(..=address)
            .next_back()
            .map(|(&start, &size)| (start, size))
            .filter(|&(start, size)| start + size >= end)
            .ok_or(AllocationError::Conflict { address, size })?;

        self.free.remove(&block_start);
        if address > block_start {
            self.free.insert(block_start, address - block_start);
        }
        let block_end = block_start + block_size;
        if block_end > end {
            self.free.insert(end, block_end - end);
        }
        self.used.insert(address, size);
        Ok(address)
    }

    /// Release the block starting at `address`, merging it with free neighbours.
    pub fn free(&mut self, address: u32) -> Result<(), AllocationError> {
        let size = self
            .used
            .remove(&address)
            .ok_or(AllocationError::NotAllocated(address))?;
        let end = address + size;
        let mut start = address;
        let mut merged = size;

        if let Some((&before, &before_size)) = self.free.range(..address).next_back() {
            if before + before_size == address {
                self.free.remove(&before);
                start = before;
                merged += before_size;
            }
        }
        if let Some(after_size) = self.free.remove(&end) {
            merged += after_size;
        }
        self.free.insert(start, merged);
        Ok(())
    }

    /// Live allocations as `(start, size)`, in address order.
    pub fn allocations(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.used.iter().map(|(&start, &size)| (start, size))
    }

    /// Free ranges as `(start, size)`, in address order.
    pub fn free_ranges(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.free.iter().map(|(&start, &size)| (start, size))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freed_block_is_reused_first_fit() {
        let mut allocator = BlockAllocator::new(0);
        let first = allocator.allocate(4).unwrap();
        let second = allocator.allocate(2).unwrap();
        assert_eq!((first, second), (0, 4));
        allocator.free(first).unwrap();
        assert_eq!(allocator.allocate(3).unwrap(), 0);
        assert_eq!(allocator.allocate(2).unwrap(), 6);
        // One address left over from the reused block.
        assert_eq!(allocator.allocate(1).unwrap(), 3);
    }

    #[test]
    fn larger_request_extends_past_live_blocks() {
        let mut allocator = BlockAllocator::new(0);
        let first = allocator.allocate(4).unwrap();
        allocator.allocate(2).unwrap();
        allocator.free(first).unwrap();
        assert_eq!(allocator.allocate(5).unwrap(), 6);
    }

    #[test]
    fn adjacent_free_ranges_coalesce() {
        let mut allocator = BlockAllocator::with_maximum(0, 10);
        let a = allocator.allocate(3).unwrap();
        let b = allocator.allocate(3).unwrap();
        let c = allocator.allocate(3).unwrap();
        allocator.free(a).unwrap();
        allocator.free(c).unwrap();
        assert_eq!(allocator.free_ranges().collect::<Vec<_>>(), vec![(0, 3), (6, 4)]);
        allocator.free(b).unwrap();
        assert_eq!(allocator.free_ranges().collect::<Vec<_>>(), vec![(0, 10)]);
        assert_eq!(allocator.allocations().count(), 0);
    }

    #[test]
    fn heap_minimum_is_respected() {
        let mut allocator = BlockAllocator::new(4);
        assert_eq!(allocator.allocate(1).unwrap(), 4);
        assert_eq!(
            allocator.allocate_at(2, 1),
            Err(AllocationError::OutOfRange { address: 2, size: 1 })
        );
    }

    #[test]
    fn explicit_reservations() {
        let mut allocator = BlockAllocator::with_maximum(0, 16);
        assert_eq!(allocator.allocate_at(4, 4).unwrap(), 4);
        assert_eq!(
            allocator.allocate_at(6, 4),
            Err(AllocationError::Conflict { address: 6, size: 4 })
        );
        assert_eq!(allocator.allocate(4).unwrap(), 0);
        assert_eq!(allocator.allocate(1).unwrap(), 8);
        assert_eq!(
            allocator.allocate_at(14, 4),
            Err(AllocationError::OutOfRange { address: 14, size: 4 })
        );
    }

    #[test]
    fn errors() {
        let mut allocator = BlockAllocator::with_maximum(0, 4);
        assert_eq!(allocator.allocate(0), Err(AllocationError::ZeroSize));
        assert_eq!(allocator.allocate(5), Err(AllocationError::Exhausted(5)));
        assert_eq!(allocator.free(1), Err(AllocationError::NotAllocated(1)));
        let block = allocator.allocate(4).unwrap();
        assert_eq!(allocator.allocate(1), Err(AllocationError::Exhausted(1)));
        allocator.free(block).unwrap();
        assert_eq!(allocator.free(block), Err(AllocationError::NotAllocated(block)));
    }

    #[test]
    fn live_blocks_never_overlap() {
        let mut allocator = BlockAllocator::with_maximum(0, 64);
        let mut live = Vec::new();
        for (step, size) in [3u32, 1, 4, 1, 5, 9, 2, 6].into_iter().enumerate() {
            live.push(allocator.allocate(size).unwrap());
            if step % 3 == 2 {
                allocator.free(live.remove(0)).unwrap();
            }
        }
        let blocks: Vec<(u32, u32)> = allocator.allocations().collect();
        for pair in blocks.windows(2) {
            assert!(pair[0].0 + pair[0].1 <= pair[1].0);
        }
        for (start, size) in allocator.free_ranges() {
            for &(used, used_size) in &blocks {
                assert!(start + size <= used || used + used_size <= start);
            }
        }
    }
}
