//! 字节偏移 → 设备块号的翻译
//!
//! 对应 MINIX 的 `read_map`/`write_map`/`new_block`/`clear_zone`
//! （fs/inode.c 与 fs/write.c 的映射部分）。
//!
//! 一个 inode 有 10 个 zone 指针：7 个直接、1 个单重间接（槽位 7）、
//! 1 个双重间接（槽位 8）。所有间接块都经过块缓存读写，取来即还。

use std::sync::Arc;

use crate::alloc::BitmapAlloc;
use crate::cache::{BlockCache, BlockHandle, BlockType, CachedBlock, ReadMode};
use crate::consts::{DOUBLE_INDIRECT, NO_BLOCK, NO_ZONE, NR_DZONES, SINGLE_INDIRECT};
use crate::error::{Error, ErrorKind, Result};
use crate::types::{BlockNum, DeviceId, DeviceInfo, Inode, ZoneNum};

/// zone 地址翻译器
///
/// 只通过 [`BlockCache`] 和 [`BitmapAlloc`] 的公开接口工作。
pub struct ZoneMapper {
    pub(super) cache: Arc<BlockCache>,
    pub(super) alloc: Arc<BitmapAlloc>,
}

/// 间接块表项的范围校验
///
/// 合法表项要么是洞（`NO_ZONE`），要么落在数据 zone 区间内；
/// 其余一律按损坏处理。
pub(super) fn check_entry(info: &DeviceInfo, z: ZoneNum) -> Result<()> {
    if z != NO_ZONE && (z < info.first_data_zone || z >= info.zones) {
        log::error!(
            "[ZONE] zone number {} out of range ({}..{})",
            z, info.first_data_zone, info.zones
        );
        return Err(Error::new(ErrorKind::Corrupted, "zone number out of range"));
    }
    Ok(())
}

impl ZoneMapper {
    /// 创建变换器，zone 的分配与释放走给定的分配器
    pub fn new(cache: Arc<BlockCache>, alloc: Arc<BitmapAlloc>) -> Self {
        Self { cache, alloc }
    }

    /// 查询文件内字节偏移对应的设备块号
    ///
    /// 洞和超出可寻址范围的位置都返回 `NO_BLOCK`。
    pub fn read_map(&self, inode: &Inode, position: u64) -> Result<BlockNum> {
        let info = self.cache.device_info(inode.device)?;
        let scale = info.log_zone_size;
        let block_pos = position / u64::from(info.block_size);
        let zone_idx = block_pos >> scale;
        let boff = (block_pos - (zone_idx << scale)) as u32;
        let nr = u64::from(info.indirects_per_block());

        let z = if zone_idx < NR_DZONES as u64 {
            inode.zones[zone_idx as usize]
        } else {
            let mut excess = zone_idx - NR_DZONES as u64;
            let ind = if excess < nr {
                inode.zones[SINGLE_INDIRECT]
            } else {
                excess -= nr;
                if excess >= nr * nr {
                    return Ok(NO_BLOCK);
                }
                let dbl = inode.zones[DOUBLE_INDIRECT];
                if dbl == NO_ZONE {
                    return Ok(NO_BLOCK);
                }
                let idx = (excess / nr) as usize;
                excess %= nr;
                self.indirect_entry(inode.device, &info, dbl, idx)?
            };
            if ind == NO_ZONE {
                return Ok(NO_BLOCK);
            }
            self.indirect_entry(inode.device, &info, ind, excess as usize)?
        };
        if z == NO_ZONE {
            return Ok(NO_BLOCK);
        }
        Ok(info.zone_to_block(z) + boff)
    }

    /// 把 zone 安装到文件内字节偏移对应的映射槽位
    ///
    /// 路径上缺失的间接 zone 会就地分配并清零。超出双重间接可寻址
    /// 范围返回 `FileTooBig`。
    pub fn write_map(&self, inode: &mut Inode, position: u64, zone: ZoneNum) -> Result<()> {
        let info = self.cache.device_info(inode.device)?;
        let zone_idx = (position / u64::from(info.block_size)) >> info.log_zone_size;
        let nr = u64::from(info.indirects_per_block());

        if zone_idx < NR_DZONES as u64 {
            inode.zones[zone_idx as usize] = zone;
            inode.dirty = true;
            return Ok(());
        }

        let mut excess = zone_idx - NR_DZONES as u64;
        if excess < nr {
            let mut ind = inode.zones[SINGLE_INDIRECT];
            if ind == NO_ZONE {
                ind = self.alloc_indirect(inode, &info)?;
                inode.zones[SINGLE_INDIRECT] = ind;
                inode.dirty = true;
            }
            check_entry(&info, ind)?;
            return self.set_indirect_entry(inode.device, &info, ind, excess as usize, zone);
        }

        excess -= nr;
        if excess >= nr * nr {
            return Err(Error::new(ErrorKind::FileTooBig, "position beyond double indirect range"));
        }
        let mut dbl = inode.zones[DOUBLE_INDIRECT];
        if dbl == NO_ZONE {
            dbl = self.alloc_indirect(inode, &info)?;
            inode.zones[DOUBLE_INDIRECT] = dbl;
            inode.dirty = true;
        }
        check_entry(&info, dbl)?;
        let idx = (excess / nr) as usize;
        let off = (excess % nr) as usize;
        let mut single = self.indirect_entry(inode.device, &info, dbl, idx)?;
        if single == NO_ZONE {
            single = self.alloc_indirect(inode, &info)?;
            self.set_indirect_entry(inode.device, &info, dbl, idx, single)?;
        }
        self.set_indirect_entry(inode.device, &info, single, off, zone)
    }

    /// 取出文件内偏移处的块，没有映射时现场分配
    ///
    /// 已映射的块按 `Normal` 取回；新分配的块直接占槽清零（不读盘），
    /// 标脏后交给调用者。写入点不在文件末尾时先把整个新 zone 清干净。
    pub fn new_block(&self, inode: &mut Inode, position: u64, kind: BlockType) -> Result<BlockHandle> {
        let info = self.cache.device_info(inode.device)?;
        let b = self.read_map(inode, position)?;
        if b != NO_BLOCK {
            return self.cache.get_block(inode.device, b, kind, ReadMode::Normal);
        }

        let hint = if inode.zones[0] == NO_ZONE {
            info.first_data_zone
        } else {
            inode.zones[0]
        };
        let z = self.alloc.alloc_zone(inode.device, hint)?;
        if let Err(e) = self.write_map(inode, position, z) {
            let _ = self.alloc.free_zone(inode.device, z);
            return Err(e);
        }
        if position != inode.size {
            self.clear_zone(inode, position, true)?;
        }
        let zone_size = info.zone_size();
        let b = info.zone_to_block(z)
            + ((position % zone_size) / u64::from(info.block_size)) as u32;
        log::trace!("[ZONE] dev={} new block {} at position {}", inode.device, b, position);

        let handle = self.cache.get_block(inode.device, b, kind, ReadMode::NoRead)?;
        {
            let mut g = handle.lock();
            g.zero();
            g.mark_dirty();
        }
        Ok(handle)
    }

    /// 把 `position` 所在 zone 中该位置之后的块清零
    ///
    /// 只有多块 zone（scale > 0）才有清的必要；`position` 已经落在
    /// zone 的最后一个块里时无事可做。`whole_zone` 置位时从 zone 的
    /// 起始位置开始清（新分配的 zone 内容未知）。
    pub fn clear_zone(&self, inode: &Inode, position: u64, whole_zone: bool) -> Result<()> {
        let info = self.cache.device_info(inode.device)?;
        let scale = info.log_zone_size;
        if scale == 0 {
            return Ok(());
        }
        let bs = u64::from(info.block_size);
        let zone_size = info.zone_size();
        let pos = if whole_zone { (position / zone_size) * zone_size } else { position };
        let next = pos + bs - 1;
        if next / zone_size != pos / zone_size {
            return Ok(());
        }
        let blo = self.read_map(inode, next)?;
        if blo == NO_BLOCK {
            return Ok(());
        }
        let bhi = (((blo >> scale) + 1) << scale) - 1;
        for b in blo..=bhi {
            let handle = self.cache.get_block(inode.device, b, BlockType::FullData, ReadMode::NoRead)?;
            {
                let mut g = handle.lock();
                g.zero();
                g.mark_dirty();
            }
            self.cache.put_block(handle, BlockType::FullData)?;
        }
        log::trace!("[ZONE] dev={} cleared blocks {}..={}", inode.device, blo, bhi);
        Ok(())
    }

    /// 截断（或扩展）文件到 `new_size` 字节
    ///
    /// 见 [`super::truncate`]。
    pub fn truncate(&self, inode: &mut Inode, new_size: u64) -> Result<()> {
        super::truncate::truncate_inode(self, inode, new_size)
    }

    /// 分配并清零一个用作间接块的 zone
    fn alloc_indirect(&self, inode: &Inode, info: &DeviceInfo) -> Result<ZoneNum> {
        let hint = if inode.zones[0] == NO_ZONE {
            info.first_data_zone
        } else {
            inode.zones[0]
        };
        let z = self.alloc.alloc_zone(inode.device, hint)?;
        // 清零后立即落盘，磁盘上不会出现含垃圾的间接块
        let handle = self
            .cache
            .get_block(inode.device, info.zone_to_block(z), BlockType::Indirect, ReadMode::NoRead)?;
        {
            let mut g = handle.lock();
            g.zero();
            g.mark_dirty();
        }
        self.cache.put_block(handle, BlockType::Indirect)?;
        log::trace!("[ZONE] dev={} indirect zone {} allocated", inode.device, z);
        Ok(z)
    }

    /// 读一个间接块的表项，带范围校验
    fn indirect_entry(
        &self,
        dev: DeviceId,
        info: &DeviceInfo,
        ind_zone: ZoneNum,
        idx: usize,
    ) -> Result<ZoneNum> {
        check_entry(info, ind_zone)?;
        let z = self.with_indirect(dev, info.zone_to_block(ind_zone), |b| Ok(b.indirect()?[idx]))?;
        check_entry(info, z)?;
        Ok(z)
    }

    /// 写一个间接块的表项
    fn set_indirect_entry(
        &self,
        dev: DeviceId,
        info: &DeviceInfo,
        ind_zone: ZoneNum,
        idx: usize,
        value: ZoneNum,
    ) -> Result<()> {
        self.with_indirect(dev, info.zone_to_block(ind_zone), |b| {
            b.indirect_mut()?[idx] = value;
            b.mark_dirty();
            Ok(())
        })
    }

    /// 整块读出一个间接块的表项
    pub(super) fn read_indirect(
        &self,
        dev: DeviceId,
        info: &DeviceInfo,
        ind_zone: ZoneNum,
    ) -> Result<Vec<ZoneNum>> {
        check_entry(info, ind_zone)?;
        self.with_indirect(dev, info.zone_to_block(ind_zone), |b| Ok(b.indirect()?.to_vec()))
    }

    /// 把一个间接块的若干表项清成 `NO_ZONE`
    pub(super) fn clear_indirect_entries(
        &self,
        dev: DeviceId,
        info: &DeviceInfo,
        ind_zone: ZoneNum,
        indices: &[usize],
    ) -> Result<()> {
        self.with_indirect(dev, info.zone_to_block(ind_zone), |b| {
            let entries = b.indirect_mut()?;
            for &i in indices {
                entries[i] = NO_ZONE;
            }
            b.mark_dirty();
            Ok(())
        })
    }

    /// 签出一个间接块，执行 `f`，无论成败都归还
    fn with_indirect<R>(
        &self,
        dev: DeviceId,
        block: BlockNum,
        f: impl FnOnce(&mut CachedBlock) -> Result<R>,
    ) -> Result<R> {
        let handle = self.cache.get_block(dev, block, BlockType::Indirect, ReadMode::Normal)?;
        let out = f(&mut handle.lock());
        let put = self.cache.put_block(handle, BlockType::Indirect);
        let out = out?;
        put?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::{BlockDevice, MemDevice};
    use crate::consts::{I_REGULAR, NR_TZONES};

    const BS: u32 = 4096;

    fn test_info() -> DeviceInfo {
        DeviceInfo {
            block_size: BS,
            log_zone_size: 0,
            first_data_zone: 64,
            zones: 2048,
            ninodes: 16,
            imap_blocks: 1,
            zmap_blocks: 1,
            max_file_size: u32::MAX as u64,
        }
    }

    fn setup() -> (Arc<BlockCache>, ZoneMapper) {
        setup_with(test_info())
    }

    fn setup_with(info: DeviceInfo) -> (Arc<BlockCache>, ZoneMapper) {
        let cache = Arc::new(BlockCache::new(16));
        let dev = Arc::new(MemDevice::new(info.zones as usize * (BS as usize) << info.log_zone_size));
        cache.mount(0, dev, info).unwrap();
        let alloc = Arc::new(BitmapAlloc::new(cache.clone()));
        (cache.clone(), ZoneMapper::new(cache, alloc))
    }

    fn test_inode() -> Inode {
        Inode {
            device: 0,
            number: 1,
            mode: I_REGULAR | 0o644,
            nlinks: 1,
            uid: 0,
            gid: 0,
            size: 0,
            atime: 0,
            mtime: 0,
            ctime: 0,
            zones: [NO_ZONE; NR_TZONES],
            dirty: false,
        }
    }

    #[test]
    fn test_hole_reads_no_block() {
        let (_cache, mapper) = setup();
        let ino = test_inode();
        assert_eq!(mapper.read_map(&ino, 0).unwrap(), NO_BLOCK);
        assert_eq!(mapper.read_map(&ino, 45_000).unwrap(), NO_BLOCK);
        assert_eq!(mapper.read_map(&ino, 4_227_000).unwrap(), NO_BLOCK);
        // 超出双重间接可寻址范围也是 NO_BLOCK，不是错误
        let beyond = (7 + 1024 + 1024 * 1024) * u64::from(BS);
        assert_eq!(mapper.read_map(&ino, beyond).unwrap(), NO_BLOCK);
    }

    #[test]
    fn test_three_tier_round_trip() {
        // 4096 字节块、scale 0：20000 落在直接区，45000 落在单重间接，
        // 4227000 落在双重间接
        let (cache, mapper) = setup();
        let mut ino = test_inode();

        let mut blocks = Vec::new();
        for (i, pos) in [20_000u64, 45_000, 4_227_000].into_iter().enumerate() {
            let h = mapper.new_block(&mut ino, pos, BlockType::PartialData).unwrap();
            blocks.push(h.block());
            h.lock().data_mut().unwrap()[0] = 0xA0 + i as u8;
            h.lock().dirty = true;
            cache.put_block(h, BlockType::PartialData).unwrap();
        }

        assert_ne!(ino.zones[4], NO_ZONE); // 20000 / 4096 = 块 4
        assert_ne!(ino.zones[SINGLE_INDIRECT], NO_ZONE);
        assert_ne!(ino.zones[DOUBLE_INDIRECT], NO_ZONE);

        // 先查表再取块，读回写入的字节
        for (i, (pos, want)) in [20_000u64, 45_000, 4_227_000].into_iter().zip(&blocks).enumerate() {
            let blk = mapper.read_map(&ino, pos).unwrap();
            assert_eq!(blk, *want);
            let h = cache
                .get_block(0, blk, BlockType::PartialData, ReadMode::Normal)
                .unwrap();
            assert_eq!(h.lock().data().unwrap()[0], 0xA0 + i as u8);
            cache.put_block(h, BlockType::PartialData).unwrap();
        }
        // 相邻的洞不受影响
        assert_eq!(mapper.read_map(&ino, 0).unwrap(), NO_BLOCK);
        assert_eq!(mapper.read_map(&ino, 50_000).unwrap(), NO_BLOCK);
    }

    #[test]
    fn test_write_map_direct() {
        let (_cache, mapper) = setup();
        let mut ino = test_inode();
        mapper.write_map(&mut ino, 0, 70).unwrap();
        assert_eq!(ino.zones[0], 70);
        assert!(ino.dirty);
        assert_eq!(mapper.read_map(&ino, 0).unwrap(), 70);
        assert_eq!(mapper.read_map(&ino, 100).unwrap(), 70); // 同一块内
    }

    #[test]
    fn test_scale_block_offset() {
        // scale 1：每 zone 两个块，zone 内第二个块要加偏移
        let mut info = test_info();
        info.log_zone_size = 1;
        let (_cache, mapper) = setup_with(info);
        let mut ino = test_inode();

        // 块 3 属于 zone 槽位 1，zone 内偏移 1
        let pos = 3 * u64::from(BS);
        mapper.write_map(&mut ino, pos, 80).unwrap();
        assert_eq!(ino.zones[1], 80);
        assert_eq!(mapper.read_map(&ino, pos).unwrap(), (80 << 1) + 1);
        assert_eq!(mapper.read_map(&ino, pos - u64::from(BS)).unwrap(), 80 << 1);
    }

    #[test]
    fn test_new_block_reuses_existing_mapping() {
        let (cache, mapper) = setup();
        let mut ino = test_inode();

        let h = mapper.new_block(&mut ino, 0, BlockType::PartialData).unwrap();
        let first = h.block();
        {
            let mut g = h.lock();
            g.data_mut().unwrap()[0] = 0xAB;
            g.mark_dirty();
        }
        cache.put_block(h, BlockType::PartialData).unwrap();
        ino.size = 10;

        // 同一位置再取，拿到同一块和旧内容
        let h = mapper.new_block(&mut ino, 5, BlockType::PartialData).unwrap();
        assert_eq!(h.block(), first);
        assert_eq!(h.lock().data().unwrap()[0], 0xAB);
        cache.put_block(h, BlockType::PartialData).unwrap();
    }

    #[test]
    fn test_new_block_content_is_zeroed() {
        let (cache, mapper) = setup();
        // 设备上预先写入垃圾
        let raw = Arc::new(MemDevice::new(2048 * BS as usize));
        raw.write_at(&[0xFF; 4096], 64 * u64::from(BS)).unwrap();
        cache.unmount(0).unwrap();
        cache.mount(0, raw, test_info()).unwrap();

        let mut ino = test_inode();
        let h = mapper.new_block(&mut ino, 0, BlockType::FullData).unwrap();
        assert!(h.lock().data().unwrap().iter().all(|&b| b == 0));
        cache.put_block(h, BlockType::FullData).unwrap();
    }

    #[test]
    fn test_first_zone_is_allocation_hint() {
        let (cache, mapper) = setup();
        let mut ino = test_inode();

        let h = mapper.new_block(&mut ino, 0, BlockType::PartialData).unwrap();
        cache.put_block(h, BlockType::PartialData).unwrap();
        let first = ino.zones[0];

        // 后续块从第一个 zone 附近分出来
        let h = mapper.new_block(&mut ino, u64::from(BS), BlockType::PartialData).unwrap();
        cache.put_block(h, BlockType::PartialData).unwrap();
        assert_eq!(ino.zones[1], first + 1);
    }

    #[test]
    fn test_corrupted_indirect_entry_detected() {
        let (cache, mapper) = setup();
        let mut ino = test_inode();
        let pos = 45_000u64;
        let h = mapper.new_block(&mut ino, pos, BlockType::PartialData).unwrap();
        cache.put_block(h, BlockType::PartialData).unwrap();

        // 把间接块里的表项改成越界 zone 号
        let info = cache.device_info(0).unwrap();
        let ind_block = info.zone_to_block(ino.zones[SINGLE_INDIRECT]);
        let h = cache.get_block(0, ind_block, BlockType::Indirect, ReadMode::Normal).unwrap();
        {
            let mut g = h.lock();
            let entries = g.indirect_mut().unwrap();
            let idx = entries.iter().position(|&z| z != NO_ZONE).unwrap();
            entries[idx] = info.zones + 100;
            g.mark_dirty();
        }
        cache.put_block(h, BlockType::Indirect).unwrap();

        let err = mapper.read_map(&ino, pos).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Corrupted);
    }

    #[test]
    fn test_write_map_beyond_double_indirect() {
        let (_cache, mapper) = setup();
        let mut ino = test_inode();
        let beyond = (7 + 1024 + 1024 * 1024) * u64::from(BS);
        let err = mapper.write_map(&mut ino, beyond, 100).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::FileTooBig);
    }

    #[test]
    fn test_clear_zone_noop_without_scale() {
        let (cache, mapper) = setup();
        let mut ino = test_inode();
        let h = mapper.new_block(&mut ino, 0, BlockType::PartialData).unwrap();
        {
            let mut g = h.lock();
            g.data_mut().unwrap()[100] = 7;
            g.mark_dirty();
        }
        cache.put_block(h, BlockType::PartialData).unwrap();

        mapper.clear_zone(&ino, 0, false).unwrap();
        let h = cache.get_block(0, mapper.read_map(&ino, 0).unwrap(), BlockType::PartialData, ReadMode::Normal).unwrap();
        assert_eq!(h.lock().data().unwrap()[100], 7);
        cache.put_block(h, BlockType::PartialData).unwrap();
    }

    #[test]
    fn test_clear_zone_wipes_tail_blocks() {
        // scale 1：zone 有两个块，清第一个块之后的部分
        let mut info = test_info();
        info.log_zone_size = 1;
        let (cache, mapper) = setup_with(info);
        let mut ino = test_inode();
        ino.size = 2 * u64::from(BS);

        // 先把整个 zone 写满非零内容
        for blk in 0..2u64 {
            let h = mapper.new_block(&mut ino, blk * u64::from(BS), BlockType::FullData).unwrap();
            {
                let mut g = h.lock();
                g.data_mut().unwrap().fill(0xEE);
                g.mark_dirty();
            }
            cache.put_block(h, BlockType::FullData).unwrap();
        }

        // position 在第一个块里：第二个块被清零，第一个保留
        mapper.clear_zone(&ino, 10, false).unwrap();
        let b0 = mapper.read_map(&ino, 0).unwrap();
        let b1 = mapper.read_map(&ino, u64::from(BS)).unwrap();
        let h = cache.get_block(0, b0, BlockType::FullData, ReadMode::Normal).unwrap();
        assert_eq!(h.lock().data().unwrap()[0], 0xEE);
        cache.put_block(h, BlockType::FullData).unwrap();
        let h = cache.get_block(0, b1, BlockType::FullData, ReadMode::Normal).unwrap();
        assert!(h.lock().data().unwrap().iter().all(|&b| b == 0));
        cache.put_block(h, BlockType::FullData).unwrap();

        // position 已在 zone 的最后一个块里：什么都不清
        let h = cache.get_block(0, b0, BlockType::FullData, ReadMode::Normal).unwrap();
        {
            let mut g = h.lock();
            g.data_mut().unwrap().fill(0xDD);
            g.mark_dirty();
        }
        cache.put_block(h, BlockType::FullData).unwrap();
        mapper.clear_zone(&ino, u64::from(BS) + 10, false).unwrap();
        let h = cache.get_block(0, b0, BlockType::FullData, ReadMode::Normal).unwrap();
        assert_eq!(h.lock().data().unwrap()[0], 0xDD);
        cache.put_block(h, BlockType::FullData).unwrap();
    }
}
