//! 内核层错误类型定义

use encos_driver::DriverError;
use thiserror::Error;

/// 内核层错误类型
#[derive(Error, Debug)]
pub enum KernelError {
    /// 驱动层错误
    #[error("Driver error: {0}")]
    Driver(#[from] DriverError),

    /// 配置文件读取失败
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 配置文件解析失败
    #[error("Config parse error: {0}")]
    Config(#[from] toml::de::Error),

    /// 归零配置引用了不存在的关节
    #[error("JointAutoZero: joint {0} not found")]
    UnknownJoint(String),

    /// 事件队列已满
    #[error("Kernel event queue is full")]
    ChannelFull,

    /// 内核已退出
    #[error("Kernel event queue is closed")]
    ChannelClosed,
}
