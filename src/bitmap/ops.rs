//! chunk 级位操作
//!
//! 所有函数都在单个位图块的 chunk 数组上工作，bit 编号是块内编号。
//! 越界 bit 由调用者保证不出现（分配器按 DeviceInfo 限制搜索范围）。

use crate::consts::{BITCHUNK_BITS, FULL_CHUNK};

/// 从 `from_bit`（含）开始找第一个空闲位
///
/// 整字全满（0xFFFF）的 chunk 直接跳过。找不到返回 `None`。
pub fn find_free(chunks: &[u16], from_bit: u32) -> Option<u32> {
    let mut word = (from_bit / BITCHUNK_BITS) as usize;
    let mut start = from_bit % BITCHUNK_BITS;
    while word < chunks.len() {
        let c = chunks[word];
        if c != FULL_CHUNK {
            // 把 start 之前的位当成已占用
            let masked = c | ((1u32 << start) - 1) as u16;
            if masked != FULL_CHUNK {
                let bit = masked.trailing_ones();
                return Some(word as u32 * BITCHUNK_BITS + bit);
            }
        }
        word += 1;
        start = 0;
    }
    None
}

/// 测试一个位
pub fn test_bit(chunks: &[u16], bit: u32) -> bool {
    let word = (bit / BITCHUNK_BITS) as usize;
    chunks[word] & (1 << (bit % BITCHUNK_BITS)) != 0
}

/// 置位，返回之前是否已置位
pub fn set_bit(chunks: &mut [u16], bit: u32) -> bool {
    let word = (bit / BITCHUNK_BITS) as usize;
    let mask = 1u16 << (bit % BITCHUNK_BITS);
    let was = chunks[word] & mask != 0;
    chunks[word] |= mask;
    was
}

/// 清位，返回之前是否已置位
pub fn clear_bit(chunks: &mut [u16], bit: u32) -> bool {
    let word = (bit / BITCHUNK_BITS) as usize;
    let mask = 1u16 << (bit % BITCHUNK_BITS);
    let was = chunks[word] & mask != 0;
    chunks[word] &= !mask;
    was
}

/// 统计前 `limit_bits` 位里的空闲位数
pub fn count_free(chunks: &[u16], limit_bits: u32) -> u32 {
    let mut free = 0;
    for bit in 0..limit_bits.min(chunks.len() as u32 * BITCHUNK_BITS) {
        if !test_bit(chunks, bit) {
            free += 1;
        }
    }
    free
}
