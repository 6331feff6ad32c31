//! 反馈帧解析
//!
//! 电机应答的第一个字节由 3 位 ack 状态和 5 位错误码组成，ack 状态决定后续字节的布局：
//!
//! | ack | 内容 |
//! |-----|------|
//! | 1 | 16 位位置 + 12 位速度 + 12 位电流 + 两个温度字节（量化） |
//! | 2 | 角度制 f32 位置 + i16 电流 + 电机温度 |
//! | 3 | RPM f32 速度 + i16 电流 + 电机温度 |
//! | 4 | 参数设置应答（dlc = 3） |
//!
//! 从广播 ID 返回的帧为配置应答，见 [`ConfigReply`]。

use crate::control::{DEG_TO_RAD, RPM_TO_RADS};
use crate::quant::*;
use crate::{CanFrame, ProtocolError, bytes_to_f32_be, bytes_to_i16_be};
use bilge::prelude::*;

// ============================================================================
// 状态字节（使用 bilge）
// ============================================================================

/// 应答帧 Byte 0
///
/// bilge 默认使用 LSB first 位序：
/// - Bit 0-4: 错误码
/// - Bit 5-7: ack 状态
#[bitsize(8)]
#[derive(FromBits, DebugBits, Clone, Copy, Default)]
pub struct StatusByte {
    pub error_code: u5,
    pub ack_status: u3,
}

/// 电机错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::FromPrimitive)]
#[repr(u8)]
pub enum MotorErrorCode {
    /// 正常
    Ok = 0x00,
    /// 电机过温
    OverTemperature = 0x01,
    /// 过流
    OverCurrent = 0x02,
    /// 电压过低
    UnderVoltage = 0x03,
    /// 编码器故障
    EncoderFault = 0x04,
    /// 保留，忽略
    Reserved = 0x05,
    /// 刹车电压过高
    BrakeOverVoltage = 0x06,
    /// 驱动器故障
    DriverFault = 0x07,
    /// 未定义错误码
    #[num_enum(catch_all)]
    Unknown(u8),
}

impl MotorErrorCode {
    /// 需要上报的错误描述；`Ok` 与 `Reserved` 返回 `None`
    pub fn description(self) -> Option<&'static str> {
        match self {
            Self::Ok | Self::Reserved => None,
            Self::OverTemperature => Some("motor over temperature"),
            Self::OverCurrent => Some("motor over current"),
            Self::UnderVoltage => Some("motor voltage too low"),
            Self::EncoderFault => Some("motor encoder error"),
            Self::BrakeOverVoltage => Some("motor brake voltage too high"),
            Self::DriverFault => Some("motor driver error"),
            Self::Unknown(_) => Some("unknown error"),
        }
    }

    pub fn raw(self) -> u8 {
        match self {
            Self::Unknown(code) => code,
            Self::Ok => 0x00,
            Self::OverTemperature => 0x01,
            Self::OverCurrent => 0x02,
            Self::UnderVoltage => 0x03,
            Self::EncoderFault => 0x04,
            Self::Reserved => 0x05,
            Self::BrakeOverVoltage => 0x06,
            Self::DriverFault => 0x07,
        }
    }
}

// ============================================================================
// 电机应答（来自电机自身 ID）
// ============================================================================

/// 格式 1 的解码范围
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeedbackRanges {
    pub position: ValueRange,
    pub velocity: ValueRange,
    pub current: ValueRange,
}

/// 应答内容
///
/// 所有值均未乘电机方向，由驱动层处理。
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum MotorFeedback {
    /// 格式 1：量化的位置 / 速度 / 电流与温度
    Quantized {
        position: f32,
        velocity: f32,
        current: f32,
        motor_temperature: f32,
        driver_temperature: f32,
    },
    /// 格式 2：位置（rad）+ 电流 + 电机温度
    Position {
        position: f32,
        current: f32,
        motor_temperature: f32,
    },
    /// 格式 3：速度（rad/s）+ 电流 + 电机温度
    Velocity {
        velocity: f32,
        current: f32,
        motor_temperature: f32,
    },
    /// 格式 4：参数设置应答
    SettingsAck { command: u8, success: bool },
    /// 其他 ack 状态（包括格式 5），不处理
    Unsupported { ack_status: u8 },
}

/// 解析后的电机应答
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotorResponse {
    pub error_code: MotorErrorCode,
    pub feedback: MotorFeedback,
}

/// 温度字节：偏移 -50，分辨率 0.5 ℃
fn temperature(raw: u8) -> f32 {
    (raw as f32 - 50.0) / 2.0
}

fn require_len(frame: &CanFrame, expected: usize) -> Result<(), ProtocolError> {
    if (frame.dlc as usize) < expected {
        return Err(ProtocolError::InvalidLength {
            expected,
            actual: frame.dlc as usize,
        });
    }
    Ok(())
}

impl MotorResponse {
    /// 解析电机应答帧
    ///
    /// 调用方负责确认帧来自电机自身 ID。格式 1~3 要求 8 字节数据。
    pub fn parse(frame: &CanFrame, ranges: &FeedbackRanges) -> Result<Self, ProtocolError> {
        require_len(frame, 1)?;

        let d = &frame.data;
        let status = StatusByte::from(d[0]);
        let error_code = MotorErrorCode::from(status.error_code().value());
        let ack_status = status.ack_status().value();

        let feedback = match ack_status {
            1 => {
                require_len(frame, 8)?;
                let pos_int = ((d[1] as u32) << 8) | d[2] as u32;
                let spd_int = ((d[3] as u32) << 4) | ((d[4] as u32 & 0xF0) >> 4);
                let cur_int = ((d[4] as u32 & 0x0F) << 8) | d[5] as u32;
                MotorFeedback::Quantized {
                    position: ranges.position.decode(pos_int, POSITION_BITS),
                    velocity: ranges.velocity.decode(spd_int, VELOCITY_BITS),
                    current: ranges.current.decode(cur_int, CURRENT_BITS),
                    motor_temperature: temperature(d[6]),
                    driver_temperature: temperature(d[7]),
                }
            },
            2 => {
                require_len(frame, 8)?;
                let degrees = bytes_to_f32_be([d[1], d[2], d[3], d[4]]);
                MotorFeedback::Position {
                    position: degrees * DEG_TO_RAD,
                    current: bytes_to_i16_be([d[5], d[6]]) as f32 / 100.0,
                    motor_temperature: temperature(d[7]),
                }
            },
            3 => {
                require_len(frame, 8)?;
                let rpm = bytes_to_f32_be([d[1], d[2], d[3], d[4]]);
                MotorFeedback::Velocity {
                    velocity: rpm * RPM_TO_RADS,
                    current: bytes_to_i16_be([d[5], d[6]]) as f32 / 100.0,
                    motor_temperature: temperature(d[7]),
                }
            },
            4 if frame.dlc == 3 => MotorFeedback::SettingsAck {
                command: d[1],
                success: d[2] == 0x01,
            },
            other => MotorFeedback::Unsupported { ack_status: other },
        };

        Ok(Self {
            error_code,
            feedback,
        })
    }

    /// 构建格式 1 应答帧（仿真从站使用）
    ///
    /// 温度按 0.5 ℃ 分辨率、-50 偏移编码，超出字节范围时饱和。
    pub fn quantized_frame(
        motor_id: u32,
        ranges: &FeedbackRanges,
        position: f32,
        velocity: f32,
        current: f32,
        motor_temperature: f32,
    ) -> CanFrame {
        let pos = ranges.position.encode(position, POSITION_BITS);
        let spd = ranges.velocity.encode(velocity, VELOCITY_BITS);
        let cur = ranges.current.encode(current, CURRENT_BITS);
        let temp = (motor_temperature * 2.0 + 50.0).clamp(0.0, 255.0) as u8;

        let data = [
            1 << 5, // ack = 1，错误码 0
            (pos >> 8) as u8,
            (pos & 0xFF) as u8,
            (spd >> 4) as u8,
            (((spd & 0x0F) << 4) as u8) | (cur >> 8) as u8,
            (cur & 0xFF) as u8,
            temp,
            temp,
        ];
        CanFrame::new(motor_id, &data)
    }
}

// ============================================================================
// 配置应答（来自 BROADCAST_ID）
// ============================================================================

/// 配置应答状态码（Byte 3）
#[derive(Debug, Clone, Copy, PartialEq, Eq, num_enum::FromPrimitive)]
#[repr(u8)]
pub enum ConfigReplyCode {
    /// 指令执行失败
    CommandFailed = 0x00,
    /// 电机处于自动应答模式
    AutoReplyMode = 0x01,
    /// 电机处于问答模式
    QueryReplyMode = 0x02,
    /// 零点设置成功
    ZeroSet = 0x03,
    /// ID 修改成功
    IdUpdated = 0x04,
    /// 查询失败
    QueryFailed = 0x80,
    #[num_enum(catch_all)]
    Unknown(u8),
}

/// 配置应答
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigReply {
    /// ID 查询成功（0xFF 0xFF 0x01 id_hi id_lo）
    Online { motor_id: u16 },
    /// ID 查询失败（0x80 0x80 0x01）
    InquiryFailed,
    /// 电机 ID 被重置为 1（0x7F 0x7F 0x01）
    IdReset,
    /// 针对单个电机的应答（id_hi id_lo 0x01 code）
    Status { motor_id: u16, code: ConfigReplyCode },
}

impl ConfigReply {
    /// 解析配置应答；Byte 2 不为 0x01 的帧不是应答，返回 `None`
    pub fn parse(frame: &CanFrame) -> Option<Self> {
        if frame.dlc < 4 {
            return None;
        }
        let d = &frame.data;
        if d[2] != 0x01 {
            return None;
        }

        match (d[0], d[1]) {
            (0xFF, 0xFF) => {
                if frame.dlc < 5 {
                    return None;
                }
                Some(Self::Online {
                    motor_id: u16::from_be_bytes([d[3], d[4]]),
                })
            },
            (0x80, 0x80) => Some(Self::InquiryFailed),
            (0x7F, 0x7F) => Some(Self::IdReset),
            (hi, lo) => Some(Self::Status {
                motor_id: u16::from_be_bytes([hi, lo]),
                code: ConfigReplyCode::from(d[3]),
            }),
        }
    }
}
