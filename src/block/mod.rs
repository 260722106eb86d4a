//! 块设备抽象
//!
//! 提供字节寻址的原始设备接口。引擎对数据块的所有读写都经由块缓存
//! （`cache` 模块），缓存再通过这里的 `BlockDevice` trait 落到设备上。

mod device;

pub use device::{BlockDevice, MemDevice};
