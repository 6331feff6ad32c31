//! 驱动层错误类型定义

use encos_ethercat::EcatError;
use encos_protocol::ProtocolError;
use thiserror::Error;

/// 驱动层错误类型
#[derive(Error, Debug)]
pub enum DriverError {
    /// EtherCAT 主站错误
    #[error("EtherCAT master error: {0}")]
    Ethercat(#[from] EcatError),

    /// 协议解析错误
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// 串口等 IO 错误
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// 设备配置无效
    #[error("Invalid configuration for device {device}: {reason}")]
    InvalidConfig { device: String, reason: String },

    /// 设备名重复
    #[error("Duplicate device name: {0}")]
    DuplicateName(String),

    /// 部分从站未进入 OPERATIONAL
    #[error("Not all slaves reached operational state")]
    NotOperational,

    /// EtherCAT 初始化重试耗尽
    #[error("EtherCAT initialization failed after {attempts} attempts")]
    InitFailed { attempts: u32 },
}

impl DriverError {
    pub(crate) fn invalid_config(device: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfig {
            device: device.into(),
            reason: reason.into(),
        }
    }
}
