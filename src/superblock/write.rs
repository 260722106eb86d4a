//! Superblock 编码和写入

use byteorder::{ByteOrder, LittleEndian};

use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::Result;

use super::read::{Superblock, Version};

/// 把 superblock 编码成磁盘字节表示
///
/// 布局见 `parse_superblock` 的注释。
pub fn encode_superblock(sb: &Superblock) -> Vec<u8> {
    let mut buf = vec![0u8; SUPERBLOCK_SIZE];
    match sb.version {
        Version::V3 => {
            LittleEndian::write_u32(&mut buf[0..], sb.ninodes);
            LittleEndian::write_u16(&mut buf[6..], sb.imap_blocks);
            LittleEndian::write_u16(&mut buf[8..], sb.zmap_blocks);
            LittleEndian::write_u16(&mut buf[10..], sb.first_data_zone);
            LittleEndian::write_u16(&mut buf[12..], sb.log_zone_size);
            LittleEndian::write_i32(&mut buf[16..], sb.max_size);
            LittleEndian::write_u32(&mut buf[20..], sb.zones);
            LittleEndian::write_u16(&mut buf[24..], SUPER_MAGIC_V3);
            LittleEndian::write_u16(&mut buf[28..], sb.block_size);
            buf[30] = sb.disk_version;
        }
        Version::V2 => {
            LittleEndian::write_u16(&mut buf[0..], sb.ninodes as u16);
            LittleEndian::write_u16(&mut buf[4..], sb.imap_blocks);
            LittleEndian::write_u16(&mut buf[6..], sb.zmap_blocks);
            LittleEndian::write_u16(&mut buf[8..], sb.first_data_zone);
            LittleEndian::write_u16(&mut buf[10..], sb.log_zone_size);
            LittleEndian::write_i32(&mut buf[12..], sb.max_size);
            LittleEndian::write_u16(&mut buf[16..], SUPER_MAGIC_V2);
            LittleEndian::write_u32(&mut buf[20..], sb.zones);
        }
    }
    buf
}

/// 把 superblock 写到设备的固定偏移 1024 处
///
/// 和读取一样绕过块缓存；格式化工具在挂载前使用。
pub fn write_superblock(device: &dyn BlockDevice, sb: &Superblock) -> Result<()> {
    let buf = encode_superblock(sb);
    device.write_at(&buf, SUPERBLOCK_OFFSET)
}
