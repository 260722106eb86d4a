//! zone / 块地址翻译
//!
//! 文件内字节偏移到设备块号的三级映射：7 个直接 zone、1 个单重间接、
//! 1 个双重间接。zone 号 0（`NO_ZONE`）表示洞。

mod mapper;
mod truncate;

pub use mapper::ZoneMapper;
