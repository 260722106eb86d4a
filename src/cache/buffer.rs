//! 缓存块结构
//!
//! 对应 MINIX 的 `struct buf`：块载荷是六种形态的 tagged union，
//! 块类型标签只在 `put_block` 时影响回收策略。

use bitflags::bitflags;
use byteorder::{ByteOrder, LittleEndian};

use crate::consts::*;
use crate::error::{Error, ErrorKind, Result};
use crate::types::{BlockNum, DeviceId, DirEntry, DiskInode};

bitflags! {
    /// put_block 的回收策略位
    ///
    /// 对应 MINIX 的 `WRITE_IMMED` / `ONE_SHOT` 常量
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PutPolicy: u8 {
        /// 释放时若为脏块立即写盘（丢失会损坏指针树的块）
        const WRITE_IMMED = 0x01;
        /// 短期内大概率不再使用，插到回收队列前端
        const ONE_SHOT    = 0x02;
    }
}

/// 块类型标签
///
/// 决定载荷的形态，以及 `put_block` 时的回收策略。
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockType {
    /// inode 表块（blocksize / 64 个 inode）
    Inode,
    /// 目录块（blocksize / 64 个目录项）
    Directory,
    /// 间接块（blocksize / 4 个 u32 zone 号）
    Indirect,
    /// 位图块（blocksize / 2 个 u16 chunk）
    Map,
    /// 整块使用的数据块
    FullData,
    /// 部分使用的数据块
    PartialData,
}

impl BlockType {
    /// 该类型的回收策略
    ///
    /// inode/目录/间接/位图块丢了会损坏树结构，立即写盘；
    /// 整块读完的数据块短期不会再要，优先驱逐。
    pub fn policy(self) -> PutPolicy {
        match self {
            BlockType::Inode
            | BlockType::Directory
            | BlockType::Indirect
            | BlockType::Map => PutPolicy::WRITE_IMMED,
            BlockType::FullData => PutPolicy::ONE_SHOT,
            BlockType::PartialData => PutPolicy::empty(),
        }
    }
}

/// get_block 的读取模式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// 未命中时从设备读入
    Normal,
    /// 只分配槽位不读设备（调用者会整块覆写）
    NoRead,
    /// 分配槽位后立刻解除与设备的关联（预热哈希表，不做承诺）
    Prefetch,
}

/// 块载荷：六种形态的 tagged union
///
/// `FullData` 和 `PartialData` 的存储形式相同，区别只是回收提示。
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockPayload {
    /// inode 表块
    Inodes(Vec<DiskInode>),
    /// 目录块
    Directory(Vec<DirEntry>),
    /// 间接块
    Indirect(Vec<u32>),
    /// 位图块
    Map(Vec<u16>),
    /// 整块使用的数据块
    FullData(Vec<u8>),
    /// 部分使用的数据块
    PartialData(Vec<u8>),
}

impl BlockPayload {
    /// 为给定类型构造全零载荷
    pub fn zeroed(kind: BlockType, block_size: u32) -> Self {
        let bs = block_size as usize;
        match kind {
            BlockType::Inode => {
                BlockPayload::Inodes(vec![DiskInode::default(); bs / INODE_SIZE])
            }
            BlockType::Directory => {
                BlockPayload::Directory(vec![DirEntry::default(); bs / DIR_ENTRY_SIZE])
            }
            BlockType::Indirect => BlockPayload::Indirect(vec![0u32; bs / ZONE_NUM_SIZE]),
            BlockType::Map => BlockPayload::Map(vec![0u16; bs / 2]),
            BlockType::FullData => BlockPayload::FullData(vec![0u8; bs]),
            BlockType::PartialData => BlockPayload::PartialData(vec![0u8; bs]),
        }
    }

    /// 从磁盘字节内容解码成给定形态
    pub fn decode(kind: BlockType, bytes: &[u8]) -> Result<Self> {
        match kind {
            BlockType::Inode => {
                let mut v = Vec::with_capacity(bytes.len() / INODE_SIZE);
                for chunk in bytes.chunks_exact(INODE_SIZE) {
                    v.push(DiskInode::decode(chunk)?);
                }
                Ok(BlockPayload::Inodes(v))
            }
            BlockType::Directory => {
                let mut v = Vec::with_capacity(bytes.len() / DIR_ENTRY_SIZE);
                for chunk in bytes.chunks_exact(DIR_ENTRY_SIZE) {
                    v.push(DirEntry::decode(chunk)?);
                }
                Ok(BlockPayload::Directory(v))
            }
            BlockType::Indirect => {
                let mut v = vec![0u32; bytes.len() / ZONE_NUM_SIZE];
                LittleEndian::read_u32_into(&bytes[..v.len() * ZONE_NUM_SIZE], &mut v);
                Ok(BlockPayload::Indirect(v))
            }
            BlockType::Map => {
                let mut v = vec![0u16; bytes.len() / 2];
                LittleEndian::read_u16_into(&bytes[..v.len() * 2], &mut v);
                Ok(BlockPayload::Map(v))
            }
            BlockType::FullData => Ok(BlockPayload::FullData(bytes.to_vec())),
            BlockType::PartialData => Ok(BlockPayload::PartialData(bytes.to_vec())),
        }
    }

    /// 编码成磁盘字节内容
    pub fn encode(&self, block_size: u32) -> Vec<u8> {
        let mut buf = vec![0u8; block_size as usize];
        match self {
            BlockPayload::Inodes(v) => {
                for (i, ino) in v.iter().enumerate() {
                    ino.encode(&mut buf[i * INODE_SIZE..]);
                }
            }
            BlockPayload::Directory(v) => {
                for (i, de) in v.iter().enumerate() {
                    de.encode(&mut buf[i * DIR_ENTRY_SIZE..]);
                }
            }
            BlockPayload::Indirect(v) => {
                LittleEndian::write_u32_into(v, &mut buf[..v.len() * ZONE_NUM_SIZE]);
            }
            BlockPayload::Map(v) => {
                LittleEndian::write_u16_into(v, &mut buf[..v.len() * 2]);
            }
            BlockPayload::FullData(v) | BlockPayload::PartialData(v) => {
                buf[..v.len()].copy_from_slice(v);
            }
        }
        buf
    }

    /// 载荷当前的形态标签
    pub fn kind(&self) -> BlockType {
        match self {
            BlockPayload::Inodes(_) => BlockType::Inode,
            BlockPayload::Directory(_) => BlockType::Directory,
            BlockPayload::Indirect(_) => BlockType::Indirect,
            BlockPayload::Map(_) => BlockType::Map,
            BlockPayload::FullData(_) => BlockType::FullData,
            BlockPayload::PartialData(_) => BlockType::PartialData,
        }
    }

    /// 就地清零
    pub fn zero(&mut self) {
        match self {
            BlockPayload::Inodes(v) => v.fill(DiskInode::default()),
            BlockPayload::Directory(v) => v.fill(DirEntry::default()),
            BlockPayload::Indirect(v) => v.fill(0),
            BlockPayload::Map(v) => v.fill(0),
            BlockPayload::FullData(v) | BlockPayload::PartialData(v) => v.fill(0),
        }
    }
}

/// 缓存块
///
/// 对应 MINIX 的 `struct buf` 中随块内容走的部分；
/// 引用计数、LRU/哈希链等簿记在缓存自己的槽位表里。
#[derive(Debug)]
pub struct CachedBlock {
    /// 所属设备；`None` 表示未与任何设备关联（内容无效）
    pub device: Option<DeviceId>,
    /// 块号
    pub block: BlockNum,
    /// 块载荷
    pub payload: BlockPayload,
    /// 内容和设备不一致，复用前必须写回
    pub dirty: bool,
}

impl CachedBlock {
    pub(super) fn unbound() -> Self {
        Self {
            device: None,
            block: NO_BLOCK,
            payload: BlockPayload::FullData(Vec::new()),
            dirty: false,
        }
    }

    /// 标记为脏
    pub fn mark_dirty(&mut self) {
        self.dirty = true;
    }

    /// 是否为脏块
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// 载荷清零
    pub fn zero(&mut self) {
        self.payload.zero();
    }

    /// 命中时按请求的块类型无损转换载荷形态
    ///
    /// 磁盘字节是各形态的共同表示，先编码再按新形态解码。
    /// `FullData` 与 `PartialData` 互换不需要转换。
    pub(super) fn reshape(&mut self, kind: BlockType, block_size: u32) -> Result<()> {
        let cur = self.payload.kind();
        if cur == kind {
            return Ok(());
        }
        let both_data = matches!(cur, BlockType::FullData | BlockType::PartialData)
            && matches!(kind, BlockType::FullData | BlockType::PartialData);
        if both_data {
            return Ok(());
        }
        let bytes = self.payload.encode(block_size);
        self.payload = BlockPayload::decode(kind, &bytes)?;
        Ok(())
    }

    fn type_mismatch() -> Error {
        Error::new(ErrorKind::InvalidState, "block payload type mismatch")
    }

    /// 间接块载荷
    pub fn indirect(&self) -> Result<&[u32]> {
        match &self.payload {
            BlockPayload::Indirect(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 间接块载荷（可变）
    pub fn indirect_mut(&mut self) -> Result<&mut [u32]> {
        match &mut self.payload {
            BlockPayload::Indirect(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 位图块载荷
    pub fn map(&self) -> Result<&[u16]> {
        match &self.payload {
            BlockPayload::Map(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 位图块载荷（可变）
    pub fn map_mut(&mut self) -> Result<&mut [u16]> {
        match &mut self.payload {
            BlockPayload::Map(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// inode 表块载荷
    pub fn inodes(&self) -> Result<&[DiskInode]> {
        match &self.payload {
            BlockPayload::Inodes(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// inode 表块载荷（可变）
    pub fn inodes_mut(&mut self) -> Result<&mut [DiskInode]> {
        match &mut self.payload {
            BlockPayload::Inodes(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 目录块载荷
    pub fn dir_entries(&self) -> Result<&[DirEntry]> {
        match &self.payload {
            BlockPayload::Directory(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 目录块载荷（可变）
    pub fn dir_entries_mut(&mut self) -> Result<&mut [DirEntry]> {
        match &mut self.payload {
            BlockPayload::Directory(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 数据块载荷（Full 和 Partial 共用）
    pub fn data(&self) -> Result<&[u8]> {
        match &self.payload {
            BlockPayload::FullData(v) | BlockPayload::PartialData(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }

    /// 数据块载荷（可变）
    pub fn data_mut(&mut self) -> Result<&mut [u8]> {
        match &mut self.payload {
            BlockPayload::FullData(v) | BlockPayload::PartialData(v) => Ok(v),
            _ => Err(Self::type_mismatch()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zeroed_shapes() {
        let bs = 1024u32;
        assert!(matches!(
            BlockPayload::zeroed(BlockType::Inode, bs),
            BlockPayload::Inodes(v) if v.len() == 16
        ));
        assert!(matches!(
            BlockPayload::zeroed(BlockType::Directory, bs),
            BlockPayload::Directory(v) if v.len() == 16
        ));
        assert!(matches!(
            BlockPayload::zeroed(BlockType::Indirect, bs),
            BlockPayload::Indirect(v) if v.len() == 256
        ));
        assert!(matches!(
            BlockPayload::zeroed(BlockType::Map, bs),
            BlockPayload::Map(v) if v.len() == 512
        ));
        assert!(matches!(
            BlockPayload::zeroed(BlockType::FullData, bs),
            BlockPayload::FullData(v) if v.len() == 1024
        ));
    }

    #[test]
    fn test_indirect_codec() {
        let mut p = BlockPayload::zeroed(BlockType::Indirect, 1024);
        if let BlockPayload::Indirect(v) = &mut p {
            v[0] = 0xDEAD;
            v[255] = 42;
        }
        let bytes = p.encode(1024);
        let back = BlockPayload::decode(BlockType::Indirect, &bytes).unwrap();
        assert_eq!(p, back);
    }

    #[test]
    fn test_map_codec() {
        let mut p = BlockPayload::zeroed(BlockType::Map, 1024);
        if let BlockPayload::Map(v) = &mut p {
            v[3] = 0xFFFF;
            v[511] = 1;
        }
        let bytes = p.encode(1024);
        assert_eq!(BlockPayload::decode(BlockType::Map, &bytes).unwrap(), p);
    }

    #[test]
    fn test_policy_bits() {
        assert!(BlockType::Inode.policy().contains(PutPolicy::WRITE_IMMED));
        assert!(BlockType::Indirect.policy().contains(PutPolicy::WRITE_IMMED));
        assert!(BlockType::Map.policy().contains(PutPolicy::WRITE_IMMED));
        assert!(BlockType::Directory.policy().contains(PutPolicy::WRITE_IMMED));
        assert_eq!(BlockType::FullData.policy(), PutPolicy::ONE_SHOT);
        assert_eq!(BlockType::PartialData.policy(), PutPolicy::empty());
    }

    #[test]
    fn test_reshape_data_to_indirect() {
        let mut blk = CachedBlock::unbound();
        blk.payload = BlockPayload::zeroed(BlockType::FullData, 1024);
        {
            let data = blk.data_mut().unwrap();
            data[0..4].copy_from_slice(&77u32.to_le_bytes());
        }
        blk.reshape(BlockType::Indirect, 1024).unwrap();
        assert_eq!(blk.indirect().unwrap()[0], 77);
    }

    #[test]
    fn test_reshape_full_partial_is_free() {
        let mut blk = CachedBlock::unbound();
        blk.payload = BlockPayload::zeroed(BlockType::FullData, 512);
        blk.data_mut().unwrap()[9] = 0xEE;
        blk.reshape(BlockType::PartialData, 512).unwrap();
        // 变体不变，内容保留
        assert_eq!(blk.payload.kind(), BlockType::FullData);
        assert_eq!(blk.data().unwrap()[9], 0xEE);
    }

    #[test]
    fn test_accessor_mismatch() {
        let blk = CachedBlock::unbound();
        assert!(blk.indirect().is_err());
        assert!(blk.map().is_err());
        assert!(blk.inodes().is_err());
    }
}
