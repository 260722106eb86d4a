//! inode / zone 位图分配器
//!
//! 对应 MINIX 的 `alloc_bit`/`free_bit`（fs/super.c）和
//! `alloc_zone`/`free_zone`、`alloc_inode`/`free_inode` 的位图部分。
//!
//! 位图块一律通过块缓存访问（`BlockType::Map`，释放即写盘）。
//! 每个设备维护两个搜索游标（上次分配到的位），锁横跨整个分配过程，
//! 同一设备的分配天然串行。
//!
//! 位编号约定：
//! - inode 图：位号 == inode 号，位 0 保留。
//! - zone 图：位是相对编号，`zone = first_data_zone - 1 + bit`，位 0 保留。

use std::sync::{Arc, Mutex};

use crate::bitmap;
use crate::cache::{BlockCache, BlockType, CachedBlock, ReadMode};
use crate::consts::NR_DEVICES;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{BlockNum, DeviceId, DeviceInfo, InodeNum, ZoneNum};

/// 位图种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapKind {
    Inode,
    Zone,
}

/// 每设备搜索游标
#[derive(Debug, Clone, Copy, Default)]
struct Cursor {
    inode: u32,
    zone: u32,
}

/// 位图分配器
///
/// 只依赖 [`BlockCache`] 的公开接口，自己不碰设备。
pub struct BitmapAlloc {
    cache: Arc<BlockCache>,
    cursors: Mutex<[Cursor; NR_DEVICES]>,
}

impl BitmapAlloc {
    /// 创建分配器，游标从头开始
    pub fn new(cache: Arc<BlockCache>) -> Self {
        Self {
            cache,
            cursors: Mutex::new([Cursor::default(); NR_DEVICES]),
        }
    }

    /// 停机：复位游标，兜底刷一遍所有已挂载设备的脏块
    ///
    /// 位图块本就是释放即写盘的，这里只处理中途出错残留的脏块。
    pub fn shutdown(&self) -> Result<()> {
        let mut cur = self.cursors.lock().unwrap();
        *cur = [Cursor::default(); NR_DEVICES];
        drop(cur);
        for dev in 0..NR_DEVICES {
            match self.cache.flush(dev) {
                Ok(()) => {}
                Err(e) if e.kind() == ErrorKind::NoDevice => {}
                Err(e) => return Err(e),
            }
        }
        Ok(())
    }

    /// 分配一个空闲 inode 号
    ///
    /// 耗尽时返回 `NoInodes`。
    pub fn alloc_inode(&self, dev: DeviceId) -> Result<InodeNum> {
        check_dev(dev)?;
        let mut cur = self.cursors.lock().unwrap();
        let origin = cur[dev].inode.max(1);
        let bit = self.alloc_bit(dev, MapKind::Inode, origin)?;
        cur[dev].inode = bit;
        log::debug!("[ALLOC] dev={} inode {} allocated", dev, bit);
        Ok(bit)
    }

    /// 释放一个 inode 号
    ///
    /// 释放未分配的 inode 返回 `Corrupted`。
    pub fn free_inode(&self, dev: DeviceId, ino: InodeNum) -> Result<()> {
        check_dev(dev)?;
        let mut cur = self.cursors.lock().unwrap();
        self.free_bit(dev, MapKind::Inode, ino)?;
        // 游标回拨，低位号优先复用
        if ino < cur[dev].inode {
            cur[dev].inode = ino;
        }
        log::debug!("[ALLOC] dev={} inode {} freed", dev, ino);
        Ok(())
    }

    /// 分配一个空闲 zone
    ///
    /// `hint` 是期望的起始 zone（通常传文件的第一个 zone，让文件数据
    /// 聚在一起）；hint 无效时从游标继续。耗尽时返回 `NoSpace`。
    pub fn alloc_zone(&self, dev: DeviceId, hint: ZoneNum) -> Result<ZoneNum> {
        check_dev(dev)?;
        let info = self.cache.device_info(dev)?;
        let fdz = info.first_data_zone;
        let mut cur = self.cursors.lock().unwrap();
        let origin = if hint >= fdz && hint < info.zones {
            hint - (fdz - 1)
        } else {
            cur[dev].zone.max(1)
        };
        let bit = self.alloc_bit(dev, MapKind::Zone, origin)?;
        cur[dev].zone = bit;
        let zone = fdz - 1 + bit;
        log::trace!("[ALLOC] dev={} zone {} allocated", dev, zone);
        Ok(zone)
    }

    /// 释放一个 zone
    ///
    /// 释放未分配的 zone 返回 `Corrupted`。
    pub fn free_zone(&self, dev: DeviceId, zone: ZoneNum) -> Result<()> {
        check_dev(dev)?;
        let info = self.cache.device_info(dev)?;
        let fdz = info.first_data_zone;
        if zone < fdz {
            return Err(Error::new(ErrorKind::InvalidInput, "zone below first data zone"));
        }
        let bit = zone - (fdz - 1);
        let mut cur = self.cursors.lock().unwrap();
        self.free_bit(dev, MapKind::Zone, bit)?;
        if bit < cur[dev].zone {
            cur[dev].zone = bit;
        }
        log::trace!("[ALLOC] dev={} zone {} freed", dev, zone);
        Ok(())
    }

    /// 在位图里找一个空闲位并置位
    ///
    /// 从 `origin` 所在的块开始扫，块内按 chunk 跳过全满的字；
    /// 扫到尾部绕回一次（跳过保留位 0）。
    fn alloc_bit(&self, dev: DeviceId, kind: MapKind, origin: u32) -> Result<u32> {
        let info = self.cache.device_info(dev)?;
        let (start_block, map_blocks, map_bits) = geometry(&info, kind);
        let bits_per_block = info.bits_per_block();

        let origin = if origin >= map_bits { 1 } else { origin };
        let mut block = origin / bits_per_block;
        let mut within = origin % bits_per_block;

        for _ in 0..=map_blocks {
            let found = self.with_map_block(dev, start_block + block, |b| {
                let chunks = b.map_mut()?;
                if let Some(bit) = bitmap::find_free(chunks, within) {
                    let num = block * bits_per_block + bit;
                    if num < map_bits {
                        bitmap::set_bit(chunks, bit);
                        b.mark_dirty();
                        return Ok(Some(num));
                    }
                }
                Ok(None)
            })?;
            if let Some(num) = found {
                return Ok(num);
            }
            block = (block + 1) % map_blocks;
            within = if block == 0 { 1 } else { 0 };
        }

        match kind {
            MapKind::Inode => {
                log::warn!("[ALLOC] dev={} out of inodes", dev);
                Err(Error::new(ErrorKind::NoInodes, "inode bitmap is full"))
            }
            MapKind::Zone => {
                log::warn!("[ALLOC] dev={} out of zones", dev);
                Err(Error::new(ErrorKind::NoSpace, "zone bitmap is full"))
            }
        }
    }

    /// 清掉位图里的一个位
    fn free_bit(&self, dev: DeviceId, kind: MapKind, bit: u32) -> Result<()> {
        let info = self.cache.device_info(dev)?;
        let (start_block, _, map_bits) = geometry(&info, kind);
        if bit == 0 || bit >= map_bits {
            return Err(Error::new(ErrorKind::InvalidInput, "bit outside bitmap"));
        }
        let bits_per_block = info.bits_per_block();
        self.with_map_block(dev, start_block + bit / bits_per_block, |b| {
            let chunks = b.map_mut()?;
            if !bitmap::clear_bit(chunks, bit % bits_per_block) {
                return Err(Error::new(ErrorKind::Corrupted, "freeing a bit that is not set"));
            }
            b.mark_dirty();
            Ok(())
        })
    }

    /// 签出一个位图块，执行 `f`，无论成败都归还
    fn with_map_block<R>(
        &self,
        dev: DeviceId,
        block: BlockNum,
        f: impl FnOnce(&mut CachedBlock) -> Result<R>,
    ) -> Result<R> {
        let handle = self.cache.get_block(dev, block, BlockType::Map, ReadMode::Normal)?;
        let out = f(&mut handle.lock());
        let put = self.cache.put_block(handle, BlockType::Map);
        let out = out?;
        put?;
        Ok(out)
    }
}

fn check_dev(dev: DeviceId) -> Result<()> {
    if dev >= NR_DEVICES {
        return Err(Error::new(ErrorKind::InvalidInput, "device index out of range"));
    }
    Ok(())
}

/// 位图区几何：(起始块, 块数, 有效位数)
fn geometry(info: &DeviceInfo, kind: MapKind) -> (BlockNum, u32, u32) {
    match kind {
        MapKind::Inode => (
            info.imap_start(),
            info.imap_blocks,
            info.ninodes + 1,
        ),
        MapKind::Zone => (
            info.zmap_start(),
            info.zmap_blocks,
            info.zones - info.first_data_zone + 1,
        ),
    }
}
