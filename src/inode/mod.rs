//! inode 表读写
//!
//! 对应 MINIX 的 `rw_inode`（fs/inode.c）。inode 表紧跟在两张位图
//! 之后，每个磁盘 inode 占 64 字节。读写都走块缓存的 `Inode` 块类型，
//! 释放即写盘。完整的 inode 缓存和打开文件簿记不在这一层。

use crate::cache::{BlockCache, BlockType, ReadMode};
use crate::error::{Error, ErrorKind, Result};
use crate::types::{BlockNum, DeviceId, DeviceInfo, Inode, InodeNum};

/// inode 号对应的 inode 表块和块内下标
fn locate(info: &DeviceInfo, number: InodeNum) -> Result<(BlockNum, usize)> {
    if number == 0 || number > info.ninodes {
        return Err(Error::new(ErrorKind::InvalidInput, "inode number out of range"));
    }
    let per_block = info.inodes_per_block();
    let block = info.inode_table_start() + (number - 1) / per_block;
    let idx = ((number - 1) % per_block) as usize;
    Ok((block, idx))
}

/// 从 inode 表读出一个 inode
pub fn read_inode(cache: &BlockCache, dev: DeviceId, number: InodeNum) -> Result<Inode> {
    let info = cache.device_info(dev)?;
    let (block, idx) = locate(&info, number)?;
    let handle = cache.get_block(dev, block, BlockType::Inode, ReadMode::Normal)?;
    let disk = {
        let g = handle.lock();
        g.inodes().map(|v| v[idx])
    };
    let put = cache.put_block(handle, BlockType::Inode);
    let disk = disk?;
    put?;
    log::trace!("[INODE] dev={} inode {} read", dev, number);
    Ok(Inode::from_disk(dev, number, &disk))
}

/// 把一个 inode 写回 inode 表
///
/// inode 块是立即写盘的，返回时已落到设备上。
pub fn write_inode(cache: &BlockCache, inode: &mut Inode) -> Result<()> {
    let info = cache.device_info(inode.device)?;
    let (block, idx) = locate(&info, inode.number)?;
    let handle = cache.get_block(inode.device, block, BlockType::Inode, ReadMode::Normal)?;
    let res = {
        let mut g = handle.lock();
        g.inodes_mut().map(|v| v[idx] = inode.to_disk())
    };
    if res.is_ok() {
        handle.lock().mark_dirty();
    }
    let put = cache.put_block(handle, BlockType::Inode);
    res?;
    put?;
    inode.dirty = false;
    log::trace!("[INODE] dev={} inode {} written", inode.device, inode.number);
    Ok(())
}
