#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BlockError {
    #[error("block {block_id} is out of range (device has {blocks} blocks)")]
    OutOfRange { block_id: usize, blocks: usize },

    #[error("buffer of {len} bytes does not match block size {block_size}")]
    BufferSize { len: usize, block_size: usize },

    #[error("device failure: {0}")]
    Device(&'static str),
}
