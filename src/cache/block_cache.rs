//! 块缓存实现
//!
//! 对应 MINIX 的 `fs/cache.c`（get_block/put_block/rw_block 一族）。
//!
//! # 结构
//!
//! 固定数量的槽位同时挂在两套结构上：
//!
//! - **回收链**：双向链表，front 端是最久未用的（下一个牺牲者），
//!   rear 端是最近释放的。被引用（use_count > 0）的槽位不在链上。
//! - **哈希表**：按 `block & hash_mask` 分桶的单向链，查找用。
//!
//! 裸指针换成了槽位下标（`Option<usize>`），拼接/摘除仍是 O(1)。
//!
//! # 并发
//!
//! 槽位表、哈希链、回收链全部由一把 `Mutex<CacheInner>` 串行化
//! （单写者纪律）。未命中触发的设备读在放开锁之后进行，期间同一块的
//! 其他请求者挂到槽位的 FIFO 等待队列上，装载完成后按加入顺序唤醒；
//! 不相关块的请求完全不受影响。

use std::collections::VecDeque;
use std::sync::{mpsc, Arc, Mutex, MutexGuard};

use crate::block::BlockDevice;
use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{BlockNum, DeviceId, DeviceInfo};

use super::buffer::{BlockPayload, BlockType, CachedBlock, PutPolicy, ReadMode};

/// 缓存统计信息
#[derive(Debug, Clone, Default)]
pub struct CacheStats {
    /// 缓存命中次数
    pub hits: u64,
    /// 缓存未命中次数
    pub misses: u64,
    /// 设备读次数
    pub reads: u64,
    /// 设备写次数
    pub writes: u64,
}

type SlotId = usize;

/// 已挂载设备
struct Mounted {
    device: Arc<dyn BlockDevice>,
    info: DeviceInfo,
}

/// 缓存槽位：簿记部分
///
/// 块内容在 `buf` 里单独上锁，拿到 handle 之后访问载荷不需要碰缓存大锁。
struct Slot {
    /// 哈希身份 (device, block)；`None` 表示从未使用
    key: Option<(DeviceId, BlockNum)>,
    /// 是否与设备关联（Prefetch/invalidate 会解除关联）
    associated: bool,
    /// 是否有装载在途
    loading: bool,
    /// 引用计数；> 0 时槽位不在回收链上
    use_count: u32,
    /// 在途装载的等待队列（FIFO）
    waiters: VecDeque<mpsc::Sender<Result<()>>>,
    /// 块内容
    buf: Arc<Mutex<CachedBlock>>,
    /// 回收链
    prev: Option<SlotId>,
    next: Option<SlotId>,
    /// 哈希桶内的单向链
    hash_next: Option<SlotId>,
}

struct CacheInner {
    slots: Vec<Slot>,
    hash: Vec<Option<SlotId>>,
    hash_mask: usize,
    /// 回收链 front（下一个牺牲者）
    front: Option<SlotId>,
    /// 回收链 rear（最近释放）
    rear: Option<SlotId>,
    devices: Vec<Option<Mounted>>,
    stats: CacheStats,
}

/// 块缓存
///
/// 所有设备数据块的唯一通道。见模块级文档。
pub struct BlockCache {
    inner: Mutex<CacheInner>,
}

/// 已签出的缓存块引用
///
/// 持有期间槽位的 use_count > 0，不会被驱逐复用。
/// 用完必须通过 [`BlockCache::put_block`] 归还（按值消费，杜绝重复归还）。
pub struct BlockHandle {
    slot: SlotId,
    device: DeviceId,
    block: BlockNum,
    buf: Arc<Mutex<CachedBlock>>,
}

impl BlockHandle {
    /// 所属设备
    pub fn device(&self) -> DeviceId {
        self.device
    }

    /// 块号
    pub fn block(&self) -> BlockNum {
        self.block
    }

    /// 锁住块内容进行访问
    pub fn lock(&self) -> MutexGuard<'_, CachedBlock> {
        self.buf.lock().unwrap()
    }
}

impl CacheInner {
    fn mounted(&self, dev: DeviceId) -> Result<&Mounted> {
        self.devices
            .get(dev)
            .and_then(|m| m.as_ref())
            .ok_or(Error::new(ErrorKind::NoDevice, "device not mounted"))
    }

    fn bucket(&self, block: BlockNum) -> usize {
        block as usize & self.hash_mask
    }

    fn lookup(&self, dev: DeviceId, block: BlockNum) -> Option<SlotId> {
        let mut cur = self.hash[self.bucket(block)];
        while let Some(sid) = cur {
            let s = &self.slots[sid];
            if s.associated && s.key == Some((dev, block)) {
                return Some(sid);
            }
            cur = s.hash_next;
        }
        None
    }

    /// 从回收链上摘除
    fn unlink_lru(&mut self, sid: SlotId) {
        let (prev, next) = (self.slots[sid].prev, self.slots[sid].next);
        match prev {
            Some(p) => self.slots[p].next = next,
            None => self.front = next,
        }
        match next {
            Some(n) => self.slots[n].prev = prev,
            None => self.rear = prev,
        }
        self.slots[sid].prev = None;
        self.slots[sid].next = None;
    }

    /// 插到回收链 front 端（下一个被驱逐）
    fn push_front(&mut self, sid: SlotId) {
        self.slots[sid].prev = None;
        self.slots[sid].next = self.front;
        match self.front {
            Some(f) => self.slots[f].prev = Some(sid),
            None => self.rear = Some(sid),
        }
        self.front = Some(sid);
    }

    /// 插到回收链 rear 端（最后被驱逐）
    fn push_rear(&mut self, sid: SlotId) {
        self.slots[sid].next = None;
        self.slots[sid].prev = self.rear;
        match self.rear {
            Some(r) => self.slots[r].next = Some(sid),
            None => self.front = Some(sid),
        }
        self.rear = Some(sid);
    }

    /// 从旧哈希桶摘除
    fn unhash(&mut self, sid: SlotId) {
        if let Some((_, block)) = self.slots[sid].key {
            let b = self.bucket(block);
            if self.hash[b] == Some(sid) {
                self.hash[b] = self.slots[sid].hash_next;
            } else {
                let mut cur = self.hash[b];
                while let Some(c) = cur {
                    if self.slots[c].hash_next == Some(sid) {
                        self.slots[c].hash_next = self.slots[sid].hash_next;
                        break;
                    }
                    cur = self.slots[c].hash_next;
                }
            }
            self.slots[sid].hash_next = None;
            self.slots[sid].key = None;
        }
    }

    /// 以新身份插入哈希桶
    fn rehash(&mut self, sid: SlotId, dev: DeviceId, block: BlockNum) {
        let b = self.bucket(block);
        self.slots[sid].key = Some((dev, block));
        self.slots[sid].hash_next = self.hash[b];
        self.hash[b] = Some(sid);
    }

    /// 把一个设备的所有脏块写回（按块号排序，批量进行）
    fn flush_device(&mut self, dev: DeviceId) -> Result<()> {
        let (device, block_size) = {
            let m = self.mounted(dev)?;
            (m.device.clone(), m.info.block_size)
        };
        let mut dirty: Vec<(BlockNum, Arc<Mutex<CachedBlock>>)> = Vec::new();
        for slot in &self.slots {
            let b = slot.buf.lock().unwrap();
            if b.device == Some(dev) && b.dirty {
                dirty.push((b.block, slot.buf.clone()));
            }
        }
        dirty.sort_by_key(|(bn, _)| *bn);
        let count = dirty.len();
        for (bn, buf) in dirty {
            let mut b = buf.lock().unwrap();
            let bytes = b.payload.encode(block_size);
            device.write_at(&bytes, bn as u64 * block_size as u64)?;
            b.dirty = false;
            self.stats.writes += 1;
        }
        if count > 0 {
            log::debug!("[CACHE] flushed {} dirty blocks of dev={}", count, dev);
        }
        Ok(())
    }

    /// 把单个块写回设备
    fn write_block(&mut self, buf: &Arc<Mutex<CachedBlock>>) -> Result<()> {
        let mut b = buf.lock().unwrap();
        let dev = match b.device {
            Some(d) => d,
            None => return Ok(()),
        };
        let (device, block_size) = {
            let m = self.mounted(dev)?;
            (m.device.clone(), m.info.block_size)
        };
        let bytes = b.payload.encode(block_size);
        device.write_at(&bytes, b.block as u64 * block_size as u64)?;
        b.dirty = false;
        self.stats.writes += 1;
        Ok(())
    }

    /// 解除一个设备所有槽位的关联（内容保留）
    fn invalidate_device(&mut self, dev: DeviceId) {
        for slot in &mut self.slots {
            let mut b = slot.buf.lock().unwrap();
            if b.device == Some(dev) {
                slot.associated = false;
                b.device = None;
            }
        }
    }
}

impl BlockCache {
    /// 创建有 `nr_bufs` 个槽位的缓存
    ///
    /// 槽位内存固定，之后不再增长。哈希桶数取不小于槽位数的 2 的幂。
    pub fn new(nr_bufs: usize) -> Self {
        let nr_bufs = nr_bufs.max(1);
        let hash_size = nr_bufs.next_power_of_two();
        let mut slots = Vec::with_capacity(nr_bufs);
        for i in 0..nr_bufs {
            slots.push(Slot {
                key: None,
                associated: false,
                loading: false,
                use_count: 0,
                waiters: VecDeque::new(),
                buf: Arc::new(Mutex::new(CachedBlock::unbound())),
                prev: if i == 0 { None } else { Some(i - 1) },
                next: if i + 1 == nr_bufs { None } else { Some(i + 1) },
                hash_next: None,
            });
        }
        Self {
            inner: Mutex::new(CacheInner {
                slots,
                hash: vec![None; hash_size],
                hash_mask: hash_size - 1,
                front: Some(0),
                rear: Some(nr_bufs - 1),
                devices: (0..NR_DEVICES).map(|_| None).collect(),
                stats: CacheStats::default(),
            }),
        }
    }

    /// 挂载设备到给定索引
    ///
    /// 索引已被占用时返回 `Busy`。
    pub fn mount(
        &self,
        dev: DeviceId,
        device: Arc<dyn BlockDevice>,
        info: DeviceInfo,
    ) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        if dev >= inner.devices.len() {
            return Err(Error::new(ErrorKind::InvalidInput, "device index out of range"));
        }
        if inner.devices[dev].is_some() {
            return Err(Error::new(ErrorKind::Busy, "device index already mounted"));
        }
        log::debug!("[CACHE] mount dev={} block_size={}", dev, info.block_size);
        inner.devices[dev] = Some(Mounted { device, info });
        Ok(())
    }

    /// 卸载设备：刷脏块、解除关联、关闭设备
    ///
    /// 仍有块被签出时返回 `Busy`。
    pub fn unmount(&self, dev: DeviceId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.mounted(dev)?;
        for slot in &inner.slots {
            if slot.use_count > 0 {
                let b = slot.buf.lock().unwrap();
                if b.device == Some(dev) {
                    return Err(Error::new(ErrorKind::Busy, "device has blocks checked out"));
                }
            }
        }
        inner.flush_device(dev)?;
        inner.invalidate_device(dev);
        if let Some(m) = inner.devices[dev].take() {
            log::debug!("[CACHE] unmount dev={}", dev);
            m.device.close()?;
        }
        Ok(())
    }

    /// 已挂载设备的几何信息
    pub fn device_info(&self, dev: DeviceId) -> Result<DeviceInfo> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.mounted(dev)?.info)
    }

    /// 获取（签出）一个块
    ///
    /// 返回的 handle 已把槽位的 use_count 加一。
    ///
    /// - 命中且无在途装载：直接返回。
    /// - 命中且装载在途：加入该槽位的 FIFO 等待队列，装载完成后
    ///   以同一份内容被唤醒（同一块绝不重复读设备）。
    /// - 未命中：从回收链 front 取最冷的空闲槽位复用；牺牲者为脏块时
    ///   先把它所属设备的脏块全部刷下去（避免一块一块地写）；所有槽位
    ///   都被签出时返回 `AllSlotsBusy`，由调用者决定如何失败。
    pub fn get_block(
        &self,
        dev: DeviceId,
        block: BlockNum,
        kind: BlockType,
        mode: ReadMode,
    ) -> Result<BlockHandle> {
        let mut inner = self.inner.lock().unwrap();
        let (device, info) = {
            let m = inner.mounted(dev)?;
            (m.device.clone(), m.info)
        };

        if let Some(sid) = inner.lookup(dev, block) {
            inner.stats.hits += 1;
            if inner.slots[sid].loading {
                // 同一块的装载在途：排队等结果
                let (tx, rx) = mpsc::channel();
                let s = &mut inner.slots[sid];
                s.waiters.push_back(tx);
                s.use_count += 1;
                let buf = s.buf.clone();
                drop(inner);
                log::trace!("[CACHE] get dev={} block={} joins in-flight load", dev, block);
                return match rx.recv() {
                    Ok(Ok(())) => Ok(BlockHandle { slot: sid, device: dev, block, buf }),
                    Ok(Err(e)) => Err(e),
                    Err(_) => Err(Error::new(ErrorKind::Io, "block load abandoned")),
                };
            }
            let s = &mut inner.slots[sid];
            s.use_count += 1;
            let first_ref = s.use_count == 1;
            let buf = s.buf.clone();
            if first_ref {
                inner.unlink_lru(sid);
            }
            buf.lock().unwrap().reshape(kind, info.block_size)?;
            log::trace!("[CACHE] get dev={} block={} hit", dev, block);
            return Ok(BlockHandle { slot: sid, device: dev, block, buf });
        }

        // 未命中：取回收链 front 端最冷的空闲槽位
        inner.stats.misses += 1;
        let sid = match inner.front {
            Some(s) => s,
            None => {
                log::warn!("[CACHE] out of slots for dev={} block={}", dev, block);
                return Err(Error::new(ErrorKind::AllSlotsBusy, "all cache slots are checked out"));
            }
        };
        let (victim_dev, victim_dirty) = {
            let b = inner.slots[sid].buf.lock().unwrap();
            (b.device, b.dirty)
        };
        if victim_dirty {
            if let Some(vdev) = victim_dev {
                // 牺牲者是脏块：把该设备的脏块一并写回，避免反复单块刷写
                inner.flush_device(vdev)?;
            }
        }
        inner.unlink_lru(sid);
        inner.unhash(sid);
        inner.rehash(sid, dev, block);
        {
            let s = &mut inner.slots[sid];
            s.use_count = 1;
            s.associated = true;
        }
        {
            let mut b = inner.slots[sid].buf.lock().unwrap();
            b.device = Some(dev);
            b.block = block;
            b.payload = BlockPayload::zeroed(kind, info.block_size);
            b.dirty = false;
        }
        let buf = inner.slots[sid].buf.clone();

        match mode {
            ReadMode::NoRead => {
                log::trace!("[CACHE] get dev={} block={} allocated (no read)", dev, block);
                Ok(BlockHandle { slot: sid, device: dev, block, buf })
            }
            ReadMode::Prefetch => {
                // 占住槽位但立刻解除与设备的关联
                inner.slots[sid].associated = false;
                buf.lock().unwrap().device = None;
                log::trace!("[CACHE] get dev={} block={} prefetch", dev, block);
                Ok(BlockHandle { slot: sid, device: dev, block, buf })
            }
            ReadMode::Normal => {
                inner.slots[sid].loading = true;
                drop(inner);

                // 设备读不占缓存大锁，其他块的请求照常进行
                let res = Self::load_block(&*device, &info, &buf, block, kind);

                let mut inner = self.inner.lock().unwrap();
                inner.slots[sid].loading = false;
                let waiters = std::mem::take(&mut inner.slots[sid].waiters);
                match res {
                    Ok(()) => {
                        inner.stats.reads += 1;
                        for w in waiters {
                            let _ = w.send(Ok(()));
                        }
                        log::trace!("[CACHE] get dev={} block={} loaded", dev, block);
                        Ok(BlockHandle { slot: sid, device: dev, block, buf })
                    }
                    Err(e) => {
                        // 装载失败：解除关联，槽位回到回收链 front 端，
                        // 所有等待者收到同一个错误
                        log::error!(
                            "[CACHE] load dev={} block={} failed: {}",
                            dev, block, e
                        );
                        inner.unhash(sid);
                        inner.slots[sid].associated = false;
                        inner.slots[sid].use_count = 0;
                        inner.push_front(sid);
                        {
                            let mut b = buf.lock().unwrap();
                            b.device = None;
                            b.dirty = false;
                        }
                        for w in waiters {
                            let _ = w.send(Err(e.clone()));
                        }
                        Err(e)
                    }
                }
            }
        }
    }

    fn load_block(
        device: &dyn BlockDevice,
        info: &DeviceInfo,
        buf: &Arc<Mutex<CachedBlock>>,
        block: BlockNum,
        kind: BlockType,
    ) -> Result<()> {
        let mut bytes = vec![0u8; info.block_size as usize];
        device.read_at(&mut bytes, block as u64 * info.block_size as u64)?;
        let payload = BlockPayload::decode(kind, &bytes)?;
        buf.lock().unwrap().payload = payload;
        Ok(())
    }

    /// 归还（释放）一个块
    ///
    /// use_count 归零时把槽位接回回收链：块类型带 ONE_SHOT 提示的接到
    /// front 端（优先驱逐），其余接到 rear 端。块类型带 WRITE_IMMED 且
    /// 内容为脏时，同步写盘后才返回。
    pub fn put_block(&self, handle: BlockHandle, kind: BlockType) -> Result<()> {
        let BlockHandle { slot: sid, device: dev, block, buf } = handle;
        let mut inner = self.inner.lock().unwrap();
        let policy = kind.policy();
        debug_assert!(inner.slots[sid].use_count > 0, "put_block on an idle slot");
        inner.slots[sid].use_count = inner.slots[sid].use_count.saturating_sub(1);
        if inner.slots[sid].use_count == 0 {
            if policy.contains(PutPolicy::ONE_SHOT) {
                inner.push_front(sid);
            } else {
                inner.push_rear(sid);
            }
        }
        if policy.contains(PutPolicy::WRITE_IMMED) {
            let needs_write = {
                let b = buf.lock().unwrap();
                b.dirty && b.device.is_some()
            };
            if needs_write {
                log::trace!("[CACHE] put dev={} block={} write-immediate", dev, block);
                inner.write_block(&buf)?;
            }
        }
        Ok(())
    }

    /// 解除一个设备所有缓存块的关联（不丢内容）
    ///
    /// 在复用一个已释放的设备索引之前调用。
    pub fn invalidate(&self, dev: DeviceId) {
        let mut inner = self.inner.lock().unwrap();
        inner.invalidate_device(dev);
        log::debug!("[CACHE] invalidated dev={}", dev);
    }

    /// 把一个设备的全部脏块写回
    pub fn flush(&self, dev: DeviceId) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        inner.flush_device(dev)
    }

    /// 停机：刷掉并关闭所有已挂载设备
    ///
    /// 尽力而为地处理每个设备，返回遇到的最后一个错误。
    pub fn shutdown(&self) -> Result<()> {
        let mut inner = self.inner.lock().unwrap();
        let mut result = Ok(());
        for dev in 0..inner.devices.len() {
            if inner.devices[dev].is_none() {
                continue;
            }
            if let Err(e) = inner.flush_device(dev) {
                result = Err(e);
            }
            if let Some(m) = inner.devices[dev].take() {
                if let Err(e) = m.device.close() {
                    result = Err(e);
                }
            }
        }
        result
    }

    /// 统计信息快照
    pub fn stats(&self) -> CacheStats {
        self.inner.lock().unwrap().stats.clone()
    }
}

impl Default for BlockCache {
    fn default() -> Self {
        Self::new(DEFAULT_NR_BUFS)
    }
}
