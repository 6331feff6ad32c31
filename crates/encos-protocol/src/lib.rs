//! # Encos Protocol
//!
//! Encos 关节电机 CAN 协议、EtherCAT-CAN 转接板过程数据记录以及 Yesense IMU
//! 串口帧的编解码（无硬件依赖）。
//!
//! ## 模块
//!
//! - `ids`: CAN ID 与帧头常量
//! - `quant`: 线性量化编解码
//! - `control`: 控制帧构建
//! - `feedback`: 反馈帧与配置应答解析
//! - `ethercat`: 86 字节 EtherCAT 过程数据记录
//! - `yesense`: IMU 串口帧解析
//!
//! ## 字节序
//!
//! 电机协议的多字节字段使用大端字节序；EtherCAT 记录中的 CAN ID 与 IMU 帧使用小端字节序。

pub mod control;
pub mod ethercat;
pub mod feedback;
pub mod ids;
pub mod quant;
pub mod yesense;

// 重新导出常用类型
pub use control::*;
pub use ethercat::*;
pub use feedback::*;
pub use ids::*;
pub use quant::*;
pub use yesense::*;

/// EtherCAT 记录中的单个 CAN 设备槽
///
/// 与转接板固件的 `{id:u32, rtr:u8, dlc:u8, data:[u8;8]}` 布局一一对应，
/// 协议层与总线层之间只传递这一类型。
///
/// # 设计特性
///
/// - **Copy trait**：在 1kHz 周期内按值传递，无堆分配
/// - **固定 8 字节**：未使用部分为 0
///
/// # 示例
///
/// ```rust
/// use encos_protocol::CanFrame;
///
/// let frame = CanFrame::new(0x01, &[0x61, 0x00, 0x00]);
/// assert_eq!(frame.dlc, 3);
/// assert_eq!(frame.data_slice(), &[0x61, 0x00, 0x00]);
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct CanFrame {
    /// CAN ID
    pub id: u32,

    /// 帧类型（0 = 数据帧）
    pub rtr: u8,

    /// 有效数据长度 (0-8)
    pub dlc: u8,

    /// 帧数据（固定 8 字节）
    pub data: [u8; 8],
}

impl CanFrame {
    /// 创建数据帧，超过 8 字节的部分被截断
    pub fn new(id: u32, data: &[u8]) -> Self {
        let mut fixed_data = [0u8; 8];
        let len = data.len().min(8);
        fixed_data[..len].copy_from_slice(&data[..len]);

        Self {
            id,
            rtr: 0,
            dlc: len as u8,
            data: fixed_data,
        }
    }

    /// 空帧（dlc = 0，数据全 0），转接板不会将其发到 CAN 总线上
    pub fn empty(id: u32) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// 获取数据切片（只包含有效数据）
    pub fn data_slice(&self) -> &[u8] {
        &self.data[..(self.dlc as usize).min(8)]
    }

    /// 是否为空帧
    pub fn is_empty(&self) -> bool {
        self.dlc == 0
    }
}

use thiserror::Error;

/// 协议解析错误类型
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    #[error("Invalid frame length: expected {expected}, got {actual}")]
    InvalidLength { expected: usize, actual: usize },

    #[error("Buffer too small: need {needed} bytes, got {actual}")]
    BufferTooSmall { needed: usize, actual: usize },

    #[error("Too many devices in one record: {count} (max {max})")]
    TooManyDevices { count: usize, max: usize },
}

/// 字节序转换工具函数
///
/// 大端字节序转 i16
pub fn bytes_to_i16_be(bytes: [u8; 2]) -> i16 {
    i16::from_be_bytes(bytes)
}

/// i16 转大端字节序
pub fn i16_to_bytes_be(value: i16) -> [u8; 2] {
    value.to_be_bytes()
}

/// u16 转大端字节序
pub fn u16_to_bytes_be(value: u16) -> [u8; 2] {
    value.to_be_bytes()
}

/// 大端字节序转 f32（电机浮点字段按高字节在前传输）
pub fn bytes_to_f32_be(bytes: [u8; 4]) -> f32 {
    f32::from_be_bytes(bytes)
}
