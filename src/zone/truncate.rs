//! 文件截断：释放新大小之外的 zone
//!
//! 对应 MINIX 的 `truncate_inode`/`freesp_inode`（fs/link.c）。
//! 只释放完全落在新大小之外的 zone；新文件尾所在 zone 的松弛块
//! 由 `clear_zone` 清零。间接 zone 在表项清空后自己也被释放。

use crate::consts::{DOUBLE_INDIRECT, NO_ZONE, NR_DZONES, SINGLE_INDIRECT};
use crate::error::{Error, ErrorKind, Result};
use crate::types::{DeviceId, DeviceInfo, Inode, ZoneNum};

use super::mapper::{check_entry, ZoneMapper};

pub(super) fn truncate_inode(mapper: &ZoneMapper, inode: &mut Inode, new_size: u64) -> Result<()> {
    if !inode.is_regular() && !inode.is_directory() {
        return Err(Error::new(ErrorKind::InvalidInput, "not a regular file or directory"));
    }
    let info = mapper.cache.device_info(inode.device)?;
    if new_size > info.max_file_size {
        return Err(Error::new(ErrorKind::FileTooBig, "size beyond device maximum"));
    }

    if new_size < inode.size {
        free_tail(mapper, &info, inode, new_size)?;
        // 新文件尾所在 zone 的剩余块清零
        mapper.clear_zone(inode, new_size, false)?;
    } else if new_size > inode.size {
        // 扩展出来的区间是洞；旧文件尾所在 zone 的松弛块清零
        mapper.clear_zone(inode, inode.size, false)?;
    }

    inode.size = new_size;
    inode.dirty = true;
    log::debug!(
        "[ZONE] dev={} inode {} truncated to {} bytes",
        inode.device, inode.number, new_size
    );
    Ok(())
}

/// 释放第 `kept` 个 zone（按文件内序号）之后的所有 zone
fn free_tail(mapper: &ZoneMapper, info: &DeviceInfo, inode: &mut Inode, new_size: u64) -> Result<()> {
    let dev = inode.device;
    let zone_size = info.zone_size();
    let kept = (new_size + zone_size - 1) / zone_size;
    let nr = u64::from(info.indirects_per_block());

    // 直接 zone
    for i in 0..NR_DZONES {
        if (i as u64) < kept || inode.zones[i] == NO_ZONE {
            continue;
        }
        mapper.alloc.free_zone(dev, inode.zones[i])?;
        inode.zones[i] = NO_ZONE;
        inode.dirty = true;
    }

    // 单重间接
    let base1 = NR_DZONES as u64;
    let ind = inode.zones[SINGLE_INDIRECT];
    if ind != NO_ZONE && kept < base1 + nr {
        let keep = kept.saturating_sub(base1) as usize;
        free_indirect_tail(mapper, info, dev, ind, keep)?;
        if keep == 0 {
            mapper.alloc.free_zone(dev, ind)?;
            inode.zones[SINGLE_INDIRECT] = NO_ZONE;
            inode.dirty = true;
        }
    }

    // 双重间接
    let base2 = base1 + nr;
    let dbl = inode.zones[DOUBLE_INDIRECT];
    if dbl != NO_ZONE && kept < base2 + nr * nr {
        let keep2 = kept.saturating_sub(base2);
        let singles = mapper.read_indirect(dev, info, dbl)?;
        let mut cleared = Vec::new();
        for (k, &single) in singles.iter().enumerate() {
            if single == NO_ZONE {
                continue;
            }
            let start = k as u64 * nr;
            if start + nr <= keep2 {
                continue; // 这个单重间接完整保留
            }
            check_entry(info, single)?;
            let keep_in = keep2.saturating_sub(start) as usize;
            free_indirect_tail(mapper, info, dev, single, keep_in)?;
            if keep_in == 0 {
                mapper.alloc.free_zone(dev, single)?;
                cleared.push(k);
            }
        }
        if keep2 == 0 {
            mapper.alloc.free_zone(dev, dbl)?;
            inode.zones[DOUBLE_INDIRECT] = NO_ZONE;
            inode.dirty = true;
        } else if !cleared.is_empty() {
            mapper.clear_indirect_entries(dev, info, dbl, &cleared)?;
        }
    }

    Ok(())
}

/// 释放一个间接块里第 `keep` 个之后的所有表项
///
/// 块本身被保留时把释放掉的表项写回成 `NO_ZONE`。
fn free_indirect_tail(
    mapper: &ZoneMapper,
    info: &DeviceInfo,
    dev: DeviceId,
    ind_zone: ZoneNum,
    keep: usize,
) -> Result<()> {
    let entries = mapper.read_indirect(dev, info, ind_zone)?;
    let mut cleared = Vec::new();
    for (i, &z) in entries.iter().enumerate().skip(keep) {
        if z == NO_ZONE {
            continue;
        }
        check_entry(info, z)?;
        mapper.alloc.free_zone(dev, z)?;
        cleared.push(i);
    }
    if keep > 0 && !cleared.is_empty() {
        mapper.clear_indirect_entries(dev, info, ind_zone, &cleared)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;
    use crate::alloc::BitmapAlloc;
    use crate::block::MemDevice;
    use crate::cache::{BlockCache, BlockType, ReadMode};
    use crate::consts::{I_CHAR_SPECIAL, I_REGULAR, NO_BLOCK, NR_TZONES};

    const BS: u32 = 4096;

    fn test_info() -> DeviceInfo {
        DeviceInfo {
            block_size: BS,
            log_zone_size: 0,
            first_data_zone: 64,
            zones: 4096,
            ninodes: 16,
            imap_blocks: 1,
            zmap_blocks: 1,
            max_file_size: u32::MAX as u64,
        }
    }

    fn setup() -> (Arc<BlockCache>, Arc<BitmapAlloc>, ZoneMapper) {
        let cache = Arc::new(BlockCache::new(16));
        let dev = Arc::new(MemDevice::new(4096 * BS as usize));
        cache.mount(0, dev, test_info()).unwrap();
        let alloc = Arc::new(BitmapAlloc::new(cache.clone()));
        (cache.clone(), alloc.clone(), ZoneMapper::new(cache, alloc))
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

    /// 在 0..nblocks 的每个块位置都分配一个块
    fn grow(cache: &BlockCache, mapper: &ZoneMapper, ino: &mut Inode, nblocks: u64) {
        for b in 0..nblocks {
            let pos = b * u64::from(BS);
            ino.size = pos; // 在文件尾写入
            let h = mapper.new_block(ino, pos, BlockType::FullData).unwrap();
            cache.put_block(h, BlockType::FullData).unwrap();
            ino.size = pos + u64::from(BS);
        }
    }

    #[test]
    fn test_truncate_to_zero_frees_everything() {
        let (cache, alloc, mapper) = setup();
        let mut ino = test_inode();
        // 10 个块：7 直接 + 3 间接表项
        grow(&cache, &mapper, &mut ino, 10);
        assert_ne!(ino.zones[SINGLE_INDIRECT], NO_ZONE);

        mapper.truncate(&mut ino, 0).unwrap();
        assert_eq!(ino.size, 0);
        assert!(ino.dirty);
        assert!(ino.zones.iter().all(|&z| z == NO_ZONE));
        for b in 0..10u64 {
            assert_eq!(mapper.read_map(&ino, b * u64::from(BS)).unwrap(), NO_BLOCK);
        }
        // 释放回来的 zone 可以重新分出去，从最低位开始
        assert_eq!(alloc.alloc_zone(0, 0).unwrap(), 64);
    }

    #[test]
    fn test_partial_truncate_keeps_head() {
        let (cache, _alloc, mapper) = setup();
        let mut ino = test_inode();
        grow(&cache, &mapper, &mut ino, 10);
        let kept_block = mapper.read_map(&ino, 7 * u64::from(BS)).unwrap();

        // 留 8 个块：直接区全部 + 间接表项 0
        mapper.truncate(&mut ino, 8 * u64::from(BS)).unwrap();
        assert_eq!(ino.size, 8 * u64::from(BS));
        assert_ne!(ino.zones[SINGLE_INDIRECT], NO_ZONE); // 还有表项在用
        assert_eq!(mapper.read_map(&ino, 7 * u64::from(BS)).unwrap(), kept_block);
        assert_eq!(mapper.read_map(&ino, 8 * u64::from(BS)).unwrap(), NO_BLOCK);
        assert_eq!(mapper.read_map(&ino, 9 * u64::from(BS)).unwrap(), NO_BLOCK);

        // 缩到直接区以内：间接 zone 本身也释放
        mapper.truncate(&mut ino, 3 * u64::from(BS)).unwrap();
        assert_eq!(ino.zones[SINGLE_INDIRECT], NO_ZONE);
        assert_ne!(mapper.read_map(&ino, 2 * u64::from(BS)).unwrap(), NO_BLOCK);
        assert_eq!(mapper.read_map(&ino, 3 * u64::from(BS)).unwrap(), NO_BLOCK);
    }

    #[test]
    fn test_truncate_double_indirect() {
        let (cache, alloc, mapper) = setup();
        let mut ino = test_inode();

        // 稀疏文件：一个直接块 + 一个双重间接区的块
        let far = (7 + 1024 + 5) * u64::from(BS);
        let h = mapper.new_block(&mut ino, 0, BlockType::FullData).unwrap();
        cache.put_block(h, BlockType::FullData).unwrap();
        ino.size = u64::from(BS);
        let h = mapper.new_block(&mut ino, far, BlockType::FullData).unwrap();
        cache.put_block(h, BlockType::FullData).unwrap();
        ino.size = far + u64::from(BS);
        assert_ne!(ino.zones[DOUBLE_INDIRECT], NO_ZONE);

        // 双重间接的数据 zone、单重间接 zone、双重间接 zone 全部回收
        let before = count_allocated(&alloc);
        mapper.truncate(&mut ino, u64::from(BS)).unwrap();
        assert_eq!(ino.zones[DOUBLE_INDIRECT], NO_ZONE);
        assert_eq!(mapper.read_map(&ino, far).unwrap(), NO_BLOCK);
        assert_ne!(mapper.read_map(&ino, 0).unwrap(), NO_BLOCK);
        assert_eq!(count_allocated(&alloc), before - 3);
    }

    #[test]
    fn test_expand_is_a_hole() {
        let (cache, _alloc, mapper) = setup();
        let mut ino = test_inode();
        grow(&cache, &mapper, &mut ino, 1);

        mapper.truncate(&mut ino, 100_000).unwrap();
        assert_eq!(ino.size, 100_000);
        // 扩展出来的区间没有分配任何块
        assert_eq!(mapper.read_map(&ino, 50_000).unwrap(), NO_BLOCK);
    }

    #[test]
    fn test_truncate_special_file_rejected() {
        let (_cache, _alloc, mapper) = setup();
        let mut ino = test_inode();
        ino.mode = I_CHAR_SPECIAL;
        let err = mapper.truncate(&mut ino, 0).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::InvalidInput);
    }

    /// 数 zone 位图里已分配的位（不含保留位 0）
    fn count_allocated(alloc: &BitmapAlloc) -> u32 {
        // 分配到耗尽，再按数好的数目放回去，就知道还剩多少
        let mut got = Vec::new();
        loop {
            match alloc.alloc_zone(0, 0) {
                Ok(z) => got.push(z),
                Err(_) => break,
            }
        }
        let free = got.len() as u32;
        for z in got {
            alloc.free_zone(0, z).unwrap();
        }
        let info = test_info();
        let total = info.zones - info.first_data_zone + 1 - 1; // 位 0 保留
        total - free
    }
}
