//! minix_core: Pure Rust MINIX V2/V3 filesystem storage engine
//!
//! 这是一个纯 Rust 实现的用户态 MINIX 文件系统存储引擎，提供：
//! - **零 unsafe 代码**
//! - **Rust 惯用风格**的 API
//! - **线程安全的块缓存**（固定槽位池 + LRU 回收）
//!
//! 引擎覆盖块缓存、zone/块地址翻译和位图分配三层；路径解析、
//! 打开文件表等 POSIX 层不在范围内。
//!
//! # 示例
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use minix_core::{read_superblock, BlockCache, MemDevice, Result};
//!
//! fn main() -> Result<()> {
//!     let device = Arc::new(MemDevice::from_image(std::fs::read("fs.img").unwrap()));
//!     let sb = read_superblock(&*device)?;
//!
//!     let cache = BlockCache::new(128);
//!     cache.mount(0, device, sb.device_info())?;
//!
//!     let ino = minix_core::read_inode(&cache, 0, 1)?; // 根目录
//!     println!("root inode: {} bytes", ino.size);
//!
//!     cache.shutdown()
//! }
//! ```
//!
//! # 模块结构
//!
//! - [`error`] - 错误类型定义
//! - [`block`] - 块设备抽象
//! - [`consts`] - 常量定义
//! - [`types`] - 磁盘结构和几何信息
//! - [`superblock`] - Superblock 读写
//! - [`cache`] - 块缓存
//! - [`bitmap`] - 位图基础操作
//! - [`alloc`] - inode / zone 分配
//! - [`zone`] - zone/块地址翻译
//! - [`inode`] - inode 表读写

#![deny(unsafe_code)]
#![warn(missing_docs)]

// ===== 核心模块 =====

/// 错误处理
pub mod error;

/// 块设备抽象
pub mod block;

/// 常量定义
pub mod consts;

/// 磁盘结构和几何信息
pub mod types;

/// Superblock 读写
pub mod superblock;

/// 块缓存
pub mod cache;

/// 位图基础操作
pub mod bitmap;

/// inode / zone 分配
pub mod alloc;

/// zone/块地址翻译
pub mod zone;

/// inode 表读写
pub mod inode;

// ===== 公共导出 =====

// 错误处理
pub use error::{Error, ErrorKind, Result};

// 块设备
pub use block::{BlockDevice, MemDevice};

// Superblock
pub use superblock::{read_superblock, write_superblock, Superblock, Version};

// 块缓存
pub use cache::{BlockCache, BlockHandle, BlockType, CacheStats, ReadMode};

// 分配器
pub use alloc::BitmapAlloc;

// 地址翻译
pub use zone::ZoneMapper;

// inode 表
pub use inode::{read_inode, write_inode};

// 基础类型
pub use types::{BlockNum, DeviceId, DeviceInfo, DirEntry, DiskInode, Inode, InodeNum, ZoneNum};
