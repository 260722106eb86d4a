//! 位图基础操作
//!
//! 位图块是 u16 chunk 的数组（小端），bit 0 是 chunk 0 的最低位。
//! 这里只有纯函数；游标、跨块扫描等分配策略在 `alloc` 模块。

mod ops;

pub use ops::{clear_bit, count_free, find_free, set_bit, test_bit};
