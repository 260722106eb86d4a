//! MINIX 文件系统常量定义
//!
//! 这个模块包含了 MINIX V2/V3 文件系统的所有常量定义，包括：
//! - 磁盘布局相关常量
//! - inode 模式位
//! - 缓存默认参数

//=============================================================================
// Superblock 相关
//=============================================================================

/// Superblock 在设备上的字节偏移
pub const SUPERBLOCK_OFFSET: u64 = 1024;

/// Superblock 大小（字节，磁盘上的有效部分远小于此）
pub const SUPERBLOCK_SIZE: usize = 1024;

/// MINIX V2 魔数
pub const SUPER_MAGIC_V2: u16 = 0x2468;

/// MINIX V3 魔数
pub const SUPER_MAGIC_V3: u16 = 0x4d5a;

/// V2 文件系统的固定块大小
pub const V2_BLOCK_SIZE: u32 = 1024;

/// 位图区域的起始块（引导块 + superblock 之后）
pub const START_BLOCK: u32 = 2;

//=============================================================================
// Inode / zone 布局
//=============================================================================

/// inode 中的直接 zone 槽位数
pub const NR_DZONES: usize = 7;

/// inode 中的 zone 槽位总数（7 直接 + 1 一级间接 + 1 二级间接 + 1 保留）
pub const NR_TZONES: usize = 10;

/// 一级间接 zone 在 inode zone 数组中的下标
pub const SINGLE_INDIRECT: usize = 7;

/// 二级间接 zone 在 inode zone 数组中的下标
pub const DOUBLE_INDIRECT: usize = 8;

/// 磁盘上 inode 的大小（字节）
pub const INODE_SIZE: usize = 64;

/// 磁盘上目录项的大小（字节）
pub const DIR_ENTRY_SIZE: usize = 64;

/// 目录项中文件名的最大长度（NUL 填充）
pub const NAME_MAX: usize = 60;

/// zone 号的磁盘存储大小（u32）
pub const ZONE_NUM_SIZE: usize = 4;

/// "无 zone" 哨兵值（文件空洞）
pub const NO_ZONE: u32 = 0;

/// "无块" 哨兵值
pub const NO_BLOCK: u32 = 0;

//=============================================================================
// 位图
//=============================================================================

/// 位图块中每个 chunk 的位数（chunk 为 u16）
pub const BITCHUNK_BITS: u32 = 16;

/// 全部占用的 chunk（跳过扫描用）
pub const FULL_CHUNK: u16 = 0xFFFF;

//=============================================================================
// Inode 模式位
//=============================================================================

/// 文件类型掩码
pub const I_TYPE: u16 = 0o170000;

/// 普通文件
pub const I_REGULAR: u16 = 0o100000;

/// 目录
pub const I_DIRECTORY: u16 = 0o040000;

/// 块设备特殊文件
pub const I_BLOCK_SPECIAL: u16 = 0o060000;

/// 字符设备特殊文件
pub const I_CHAR_SPECIAL: u16 = 0o020000;

//=============================================================================
// 缓存默认参数
//=============================================================================

/// 默认缓存槽位数量
pub const DEFAULT_NR_BUFS: usize = 128;

/// 可同时挂载的设备数量
pub const NR_DEVICES: usize = 8;
