//! 块设备核心类型

use std::sync::Mutex;

use crate::error::{Error, ErrorKind, Result};

/// 块设备接口
///
/// 实现此 trait 以提供底层设备访问。设备是一个可随机寻址的字节存储，
/// 引擎不假定任何特定的后备介质。
///
/// 读写方法取 `&self`：缓存会在持有自身锁之外并发地发起设备读，
/// 实现者自行保证内部同步（文件、RAM 盘等通常天然满足）。
///
/// # 示例
///
/// ```rust,ignore
/// use minix_core::{BlockDevice, Result};
///
/// struct MyDevice {
///     // ...
/// }
///
/// impl BlockDevice for MyDevice {
///     fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
///         // 从 offset 读满 buf
///         Ok(())
///     }
///
///     fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
///         // 把 buf 写到 offset
///         Ok(())
///     }
/// }
/// ```
pub trait BlockDevice: Send + Sync {
    /// 从字节偏移 `offset` 读满 `buf`
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()>;

    /// 把 `buf` 写到字节偏移 `offset`
    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()>;

    /// 关闭设备
    ///
    /// 在卸载后调用，用于释放设备资源。默认实现什么都不做。
    fn close(&self) -> Result<()> {
        Ok(())
    }
}

/// 内存块设备（RAM 盘）
///
/// 用于测试和不需要持久化的场合。越界访问返回 `Io` 错误。
pub struct MemDevice {
    data: Mutex<Vec<u8>>,
}

impl MemDevice {
    /// 创建给定大小（字节）的全零设备
    pub fn new(size: usize) -> Self {
        Self { data: Mutex::new(vec![0u8; size]) }
    }

    /// 从已有镜像创建
    pub fn from_image(image: Vec<u8>) -> Self {
        Self { data: Mutex::new(image) }
    }

    /// 设备大小（字节）
    pub fn size(&self) -> usize {
        self.data.lock().unwrap().len()
    }
}

impl BlockDevice for MemDevice {
    fn read_at(&self, buf: &mut [u8], offset: u64) -> Result<()> {
        let data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(Error::new(
            ErrorKind::InvalidInput,
            "offset overflow",
        ))?;
        if end > data.len() {
            return Err(Error::new(ErrorKind::Io, "read past end of device"));
        }
        buf.copy_from_slice(&data[start..end]);
        Ok(())
    }

    fn write_at(&self, buf: &[u8], offset: u64) -> Result<()> {
        let mut data = self.data.lock().unwrap();
        let start = offset as usize;
        let end = start.checked_add(buf.len()).ok_or(Error::new(
            ErrorKind::InvalidInput,
            "offset overflow",
        ))?;
        if end > data.len() {
            return Err(Error::new(ErrorKind::Io, "write past end of device"));
        }
        data[start..end].copy_from_slice(buf);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mem_device_round_trip() {
        let dev = MemDevice::new(8192);
        let src = [0xA5u8; 512];
        dev.write_at(&src, 1024).unwrap();

        let mut dst = [0u8; 512];
        dev.read_at(&mut dst, 1024).unwrap();
        assert_eq!(src, dst);
    }

    #[test]
    fn test_mem_device_bounds() {
        let dev = MemDevice::new(1024);
        let mut buf = [0u8; 512];
        assert!(dev.read_at(&mut buf, 1000).is_err());
        assert!(dev.write_at(&buf, 4096).is_err());
    }

    #[test]
    fn test_mem_device_from_image() {
        let dev = MemDevice::from_image(vec![7u8; 100]);
        assert_eq!(dev.size(), 100);
        let mut b = [0u8; 4];
        dev.read_at(&mut b, 96).unwrap();
        assert_eq!(b, [7, 7, 7, 7]);
    }
}
