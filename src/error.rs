//! 错误类型定义
//!
//! 提供 MINIX 文件系统存储引擎的错误类型。

use core::fmt;

/// 存储引擎操作错误
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    kind: ErrorKind,
    message: &'static str,
}

/// 错误类别
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[non_exhaustive]
pub enum ErrorKind {
    /// I/O 错误
    Io,
    /// 无效参数
    InvalidInput,
    /// 文件系统损坏（间接块中的非法 zone 号、位图重复释放等）
    Corrupted,
    /// 设备忙（设备号已被挂载 / 块仍被引用）
    Busy,
    /// 设备未挂载
    NoDevice,
    /// 空闲 zone 耗尽
    NoSpace,
    /// 空闲 inode 耗尽
    NoInodes,
    /// 文件超出可寻址范围（双重间接块也放不下）
    FileTooBig,
    /// 缓存槽位耗尽（所有块都被引用，无法驱逐）
    AllSlotsBusy,
    /// 无效状态
    InvalidState,
}

impl Error {
    /// 创建新错误
    pub const fn new(kind: ErrorKind, message: &'static str) -> Self {
        Self { kind, message }
    }

    /// 获取错误类型
    pub const fn kind(&self) -> ErrorKind {
        self.kind
    }

    /// 获取错误消息
    pub const fn message(&self) -> &'static str {
        self.message
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}: {}", self.kind, self.message)
    }
}

impl std::error::Error for Error {}

/// Result 类型别名
pub type Result<T> = core::result::Result<T, Error>;
