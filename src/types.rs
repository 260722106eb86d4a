//! MINIX 数据结构定义
//!
//! 这个模块包含了直接对应磁盘格式的数据结构（inode、目录项）以及
//! 每个已挂载设备的几何信息 `DeviceInfo`。
//!
//! ## 设计原则
//!
//! 1. **磁盘格式结构** - 字段顺序与磁盘布局一致，编解码统一小端序
//! 2. **内存表示** - 不依赖 `#[repr(C)]` 转写，全部走 byteorder 显式编解码
//! 3. **辅助方法** - 提供 Rust 风格的访问器和工具函数

use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};

//=============================================================================
// 基础类型别名
//=============================================================================

/// 已挂载设备的索引
pub type DeviceId = usize;

/// 物理块号
pub type BlockNum = u32;

/// zone 号
pub type ZoneNum = u32;

/// inode 号（从 1 开始，0 表示空目录项）
pub type InodeNum = u32;

//=============================================================================
// 设备几何信息
//=============================================================================

/// 每个已挂载设备的几何信息
///
/// 由 superblock 推导，挂载期间不可变。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeviceInfo {
    /// 块大小（字节）
    pub block_size: u32,
    /// zone 与块的换算（log2 每 zone 块数）
    pub log_zone_size: u32,
    /// 第一个数据 zone
    pub first_data_zone: u32,
    /// zone 总数
    pub zones: u32,
    /// inode 总数
    pub ninodes: u32,
    /// inode 位图占用的块数
    pub imap_blocks: u32,
    /// zone 位图占用的块数
    pub zmap_blocks: u32,
    /// 最大文件大小（字节）
    pub max_file_size: u64,
}

impl DeviceInfo {
    /// zone 大小（字节）
    pub fn zone_size(&self) -> u64 {
        (self.block_size as u64) << self.log_zone_size
    }

    /// zone 号换算成它的第一个块号
    pub fn zone_to_block(&self, zone: ZoneNum) -> BlockNum {
        zone << self.log_zone_size
    }

    /// 每个间接块容纳的 zone 号个数
    pub fn indirects_per_block(&self) -> u32 {
        self.block_size / ZONE_NUM_SIZE as u32
    }

    /// 每个 inode 块容纳的 inode 个数
    pub fn inodes_per_block(&self) -> u32 {
        self.block_size / INODE_SIZE as u32
    }

    /// 每个位图块的位数
    pub fn bits_per_block(&self) -> u32 {
        self.block_size * 8
    }

    /// inode 位图的起始块
    pub fn imap_start(&self) -> BlockNum {
        START_BLOCK
    }

    /// zone 位图的起始块
    pub fn zmap_start(&self) -> BlockNum {
        START_BLOCK + self.imap_blocks
    }

    /// inode 表的起始块
    pub fn inode_table_start(&self) -> BlockNum {
        START_BLOCK + self.imap_blocks + self.zmap_blocks
    }
}

//=============================================================================
// 磁盘格式结构定义
//=============================================================================

/// 磁盘上的 inode（64 字节，V2/V3 布局）
///
/// | 偏移 | 字段        | 类型      |
/// |------|-------------|-----------|
/// | 0    | mode        | u16       |
/// | 2    | nlinks      | u16       |
/// | 4    | uid         | i16       |
/// | 6    | gid         | u16       |
/// | 8    | size        | i32       |
/// | 12   | atime       | i32       |
/// | 16   | mtime       | i32       |
/// | 20   | ctime       | i32       |
/// | 24   | zones[10]   | u32 x 10  |
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct DiskInode {
    /// 文件类型和权限位
    pub mode: u16,
    /// 硬链接数
    pub nlinks: u16,
    /// 属主
    pub uid: i16,
    /// 属组
    pub gid: u16,
    /// 文件大小（字节）
    pub size: i32,
    /// 访问时间
    pub atime: i32,
    /// 修改时间
    pub mtime: i32,
    /// 状态变更时间
    pub ctime: i32,
    /// zone 指针：7 直接 + 1 一级间接 + 1 二级间接 + 1 保留
    pub zones: [ZoneNum; NR_TZONES],
}

impl DiskInode {
    /// 从 64 字节的磁盘表示解码
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < INODE_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "inode buffer too short"));
        }
        let mut zones = [NO_ZONE; NR_TZONES];
        for (i, z) in zones.iter_mut().enumerate() {
            *z = LittleEndian::read_u32(&buf[24 + i * 4..]);
        }
        Ok(Self {
            mode: LittleEndian::read_u16(&buf[0..]),
            nlinks: LittleEndian::read_u16(&buf[2..]),
            uid: LittleEndian::read_i16(&buf[4..]),
            gid: LittleEndian::read_u16(&buf[6..]),
            size: LittleEndian::read_i32(&buf[8..]),
            atime: LittleEndian::read_i32(&buf[12..]),
            mtime: LittleEndian::read_i32(&buf[16..]),
            ctime: LittleEndian::read_i32(&buf[20..]),
            zones,
        })
    }

    /// 编码成 64 字节的磁盘表示
    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= INODE_SIZE);
        LittleEndian::write_u16(&mut buf[0..], self.mode);
        LittleEndian::write_u16(&mut buf[2..], self.nlinks);
        LittleEndian::write_i16(&mut buf[4..], self.uid);
        LittleEndian::write_u16(&mut buf[6..], self.gid);
        LittleEndian::write_i32(&mut buf[8..], self.size);
        LittleEndian::write_i32(&mut buf[12..], self.atime);
        LittleEndian::write_i32(&mut buf[16..], self.mtime);
        LittleEndian::write_i32(&mut buf[20..], self.ctime);
        for (i, z) in self.zones.iter().enumerate() {
            LittleEndian::write_u32(&mut buf[24 + i * 4..], *z);
        }
    }
}

/// 磁盘上的目录项（64 字节）
///
/// inode 号（u32）+ 60 字节定长文件名（NUL 填充）。
/// inode 号为 0 表示空闲/已删除的槽位。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DirEntry {
    /// 目录项指向的 inode 号，0 为空槽
    pub inode: InodeNum,
    /// 定长文件名，NUL 填充
    pub name: [u8; NAME_MAX],
}

impl Default for DirEntry {
    fn default() -> Self {
        Self { inode: 0, name: [0u8; NAME_MAX] }
    }
}

impl DirEntry {
    /// 从 64 字节的磁盘表示解码
    pub fn decode(buf: &[u8]) -> Result<Self> {
        if buf.len() < DIR_ENTRY_SIZE {
            return Err(Error::new(ErrorKind::InvalidInput, "dir entry buffer too short"));
        }
        let mut name = [0u8; NAME_MAX];
        name.copy_from_slice(&buf[4..4 + NAME_MAX]);
        Ok(Self { inode: LittleEndian::read_u32(&buf[0..]), name })
    }

    /// 编码成 64 字节的磁盘表示
    pub fn encode(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= DIR_ENTRY_SIZE);
        LittleEndian::write_u32(&mut buf[0..], self.inode);
        buf[4..4 + NAME_MAX].copy_from_slice(&self.name);
    }

    /// 文件名（去掉 NUL 填充）
    pub fn name(&self) -> &[u8] {
        let end = self.name.iter().position(|&b| b == 0).unwrap_or(NAME_MAX);
        &self.name[..end]
    }

    /// 设置文件名，超长部分截断
    pub fn set_name(&mut self, name: &[u8]) {
        self.name = [0u8; NAME_MAX];
        let len = name.len().min(NAME_MAX);
        self.name[..len].copy_from_slice(&name[..len]);
    }

    /// 槽位是否空闲
    pub fn is_free(&self) -> bool {
        self.inode == 0
    }
}

//=============================================================================
// 内存中的 inode
//=============================================================================

/// 内存中的 inode
///
/// 除磁盘字段外，记录它属于哪个设备、自己的编号，以及是否需要写回。
#[derive(Debug, Clone)]
pub struct Inode {
    /// 所属设备
    pub device: DeviceId,
    /// inode 号
    pub number: InodeNum,
    /// 文件类型和权限位
    pub mode: u16,
    /// 硬链接数
    pub nlinks: u16,
    /// 属主
    pub uid: i16,
    /// 属组
    pub gid: u16,
    /// 文件大小（字节）
    pub size: u64,
    /// 访问时间
    pub atime: i32,
    /// 修改时间
    pub mtime: i32,
    /// 状态变更时间
    pub ctime: i32,
    /// zone 指针
    pub zones: [ZoneNum; NR_TZONES],
    /// 是否需要写回磁盘
    pub dirty: bool,
}

impl Inode {
    /// 从磁盘表示构造
    pub fn from_disk(device: DeviceId, number: InodeNum, d: &DiskInode) -> Self {
        Self {
            device,
            number,
            mode: d.mode,
            nlinks: d.nlinks,
            uid: d.uid,
            gid: d.gid,
            size: d.size.max(0) as u64,
            atime: d.atime,
            mtime: d.mtime,
            ctime: d.ctime,
            zones: d.zones,
            dirty: false,
        }
    }

    /// 转换回磁盘表示
    pub fn to_disk(&self) -> DiskInode {
        DiskInode {
            mode: self.mode,
            nlinks: self.nlinks,
            uid: self.uid,
            gid: self.gid,
            size: self.size as i32,
            atime: self.atime,
            mtime: self.mtime,
            ctime: self.ctime,
            zones: self.zones,
        }
    }

    /// 是否为普通文件
    pub fn is_regular(&self) -> bool {
        self.mode & I_TYPE == I_REGULAR
    }

    /// 是否为目录
    pub fn is_directory(&self) -> bool {
        self.mode & I_TYPE == I_DIRECTORY
    }

    /// 是否为设备特殊文件
    pub fn is_special(&self) -> bool {
        let t = self.mode & I_TYPE;
        t == I_BLOCK_SPECIAL || t == I_CHAR_SPECIAL
    }
}
