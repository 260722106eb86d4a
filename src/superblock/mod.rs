//! Superblock 操作模块
//!
//! 这个模块提供 MINIX superblock 的读取、验证、写入功能，
//! 以及向 `DeviceInfo`（挂载期间不可变的设备几何信息）的转换。

mod read;
mod write;

pub use read::{parse_superblock, read_superblock, Superblock, Version};
pub use write::{encode_superblock, write_superblock};
