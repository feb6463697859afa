use crate::error::AllocationError;

/// IDs below this are left to the root node, default group and user allocations.
pub const FIRST_NODE_ID: i32 = 1000;

/// Hands out strictly increasing node IDs; nothing is ever reused.
#[derive(Debug, Clone)]
pub struct NodeIdAllocator {
    next: Option<i32>,
}

impl Default for NodeIdAllocator {
    fn default() -> Self {
        Self::new()
    }
}

impl NodeIdAllocator {
    pub fn new() -> Self {
        Self::with_initial(FIRST_NODE_ID)
    }

    pub fn with_initial(initial: i32) -> Self {
        Self {
            next: Some(initial),
        }
    }

    pub fn allocate(&mut self) -> Result<i32, AllocationError> {
        let id = self.next.ok_or(AllocationError::NodeIdsExhausted)?;
        self.next = id.checked_add(1);
        Ok(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_at_first_node_id() {
        let mut allocator = NodeIdAllocator::new();
        assert_eq!(allocator.allocate().unwrap(), 1000);
        assert_eq!(allocator.allocate().unwrap(), 1001);
    }

    #[test]
    fn exhaustion_is_an_error() {
        let mut allocator = NodeIdAllocator::with_initial(i32::MAX - 1);
        assert_eq!(allocator.allocate().unwrap(), i32::MAX - 1);
        assert_eq!(allocator.allocate().unwrap(), i32::MAX);
        assert_eq!(allocator.allocate(), Err(AllocationError::NodeIdsExhausted));
        assert_eq!(allocator.allocate(), Err(AllocationError::NodeIdsExhausted));
    }
}
