//! Superblock 读取和验证

use byteorder::{ByteOrder, LittleEndian};

use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::types::DeviceInfo;

/// 磁盘格式版本
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Version {
    /// MINIX V2（固定 1024 字节块）
    V2,
    /// MINIX V3（可变块大小）
    V3,
}

/// 解析后的 superblock
///
/// 字段宽度取内存友好的类型；磁盘宽度见 `parse_superblock` 中的布局注释。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Superblock {
    /// 磁盘格式版本
    pub version: Version,
    /// inode 总数
    pub ninodes: u32,
    /// inode 位图块数
    pub imap_blocks: u16,
    /// zone 位图块数
    pub zmap_blocks: u16,
    /// 第一个数据 zone
    pub first_data_zone: u16,
    /// log2 每 zone 块数
    pub log_zone_size: u16,
    /// 最大文件大小（字节）
    pub max_size: i32,
    /// zone 总数
    pub zones: u32,
    /// 块大小
    pub block_size: u16,
    /// 磁盘格式小版本（仅 V3）
    pub disk_version: u8,
}

/// 解析 superblock 字节内容
///
/// V3 布局（小端序）：
///
/// | 偏移 | 字段           | 类型 |
/// |------|----------------|------|
/// | 0    | ninodes        | u32  |
/// | 4    | nzones（遗留） | u16  |
/// | 6    | imap_blocks    | u16  |
/// | 8    | zmap_blocks    | u16  |
/// | 10   | firstdatazone  | u16  |
/// | 12   | log_zone_size  | u16  |
/// | 16   | max_size       | i32  |
/// | 20   | zones          | u32  |
/// | 24   | magic          | u16  |
/// | 28   | block_size     | u16  |
/// | 30   | disk_version   | u8   |
///
/// V2 布局：u16 的 ninodes/nzones 在前，magic 在偏移 16，zones(u32) 在
/// 偏移 20，块大小固定 1024。
pub fn parse_superblock(buf: &[u8]) -> Result<Superblock> {
    if buf.len() < 32 {
        return Err(Error::new(ErrorKind::InvalidInput, "superblock buffer too short"));
    }

    let magic_v3 = LittleEndian::read_u16(&buf[24..]);
    if magic_v3 == SUPER_MAGIC_V3 {
        return Ok(Superblock {
            version: Version::V3,
            ninodes: LittleEndian::read_u32(&buf[0..]),
            imap_blocks: LittleEndian::read_u16(&buf[6..]),
            zmap_blocks: LittleEndian::read_u16(&buf[8..]),
            first_data_zone: LittleEndian::read_u16(&buf[10..]),
            log_zone_size: LittleEndian::read_u16(&buf[12..]),
            max_size: LittleEndian::read_i32(&buf[16..]),
            zones: LittleEndian::read_u32(&buf[20..]),
            block_size: LittleEndian::read_u16(&buf[28..]),
            disk_version: buf[30],
        });
    }

    let magic_v2 = LittleEndian::read_u16(&buf[16..]);
    if magic_v2 == SUPER_MAGIC_V2 {
        return Ok(Superblock {
            version: Version::V2,
            ninodes: LittleEndian::read_u16(&buf[0..]) as u32,
            imap_blocks: LittleEndian::read_u16(&buf[4..]),
            zmap_blocks: LittleEndian::read_u16(&buf[6..]),
            first_data_zone: LittleEndian::read_u16(&buf[8..]),
            log_zone_size: LittleEndian::read_u16(&buf[10..]),
            max_size: LittleEndian::read_i32(&buf[12..]),
            zones: LittleEndian::read_u32(&buf[20..]),
            block_size: V2_BLOCK_SIZE as u16,
            disk_version: 0,
        });
    }

    Err(Error::new(ErrorKind::Corrupted, "bad superblock magic"))
}

/// 从设备读取 superblock（固定字节偏移 1024）
///
/// superblock 在挂载之前读取，因此直接访问设备而不经过块缓存。
pub fn read_superblock(device: &dyn BlockDevice) -> Result<Superblock> {
    let mut buf = vec![0u8; SUPERBLOCK_SIZE];
    device.read_at(&mut buf, SUPERBLOCK_OFFSET)?;
    let sb = parse_superblock(&buf)?;
    sb.validate()?;
    Ok(sb)
}

impl Superblock {
    /// 校验几何参数的一致性
    pub fn validate(&self) -> Result<()> {
        if self.block_size < 1024 || self.block_size % 512 != 0 {
            return Err(Error::new(ErrorKind::Corrupted, "bad block size"));
        }
        if self.ninodes == 0 || self.zones == 0 {
            return Err(Error::new(ErrorKind::Corrupted, "empty filesystem"));
        }
        if self.imap_blocks == 0 || self.zmap_blocks == 0 {
            return Err(Error::new(ErrorKind::Corrupted, "missing bitmap blocks"));
        }
        if self.first_data_zone == 0 || (self.first_data_zone as u32) >= self.zones {
            return Err(Error::new(ErrorKind::Corrupted, "bad first data zone"));
        }
        Ok(())
    }

    /// 推导挂载期间使用的设备几何信息
    pub fn device_info(&self) -> DeviceInfo {
        DeviceInfo {
            block_size: self.block_size as u32,
            log_zone_size: self.log_zone_size as u32,
            first_data_zone: self.first_data_zone as u32,
            zones: self.zones,
            ninodes: self.ninodes,
            imap_blocks: self.imap_blocks as u32,
            zmap_blocks: self.zmap_blocks as u32,
            max_file_size: self.max_size.max(0) as u64,
        }
    }
}
