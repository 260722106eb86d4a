//! 块缓存
//!
//! 固定槽位池的 LRU 缓冲缓存：哈希链查找、引用计数、
//! 槽位级的异步装载/等待协调。所有数据块 I/O 都经由这里。

mod block_cache;
mod buffer;

pub use block_cache::{BlockCache, BlockHandle, CacheStats};
pub use buffer::{BlockPayload, BlockType, CachedBlock, PutPolicy, ReadMode};
