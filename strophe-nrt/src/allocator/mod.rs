//! Address and node ID allocation for a render.

mod block;
mod node_id;

pub use block::BlockAllocator;
pub use node_id::{NodeIdAllocator, FIRST_NODE_ID};
