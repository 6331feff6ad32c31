//! 控制帧构建
//!
//! 包含运控、伺服位置、伺服速度、电流、力矩五类控制帧，失能帧，
//! 以及发往广播 ID 的配置帧和参数设置帧。
//!
//! 电机方向由调用方（驱动层）在构建前乘入，本模块只负责位域打包。

use crate::ids::*;
use crate::quant::*;
use crate::{CanFrame, i16_to_bytes_be, u16_to_bytes_be};
use std::f32::consts::PI;

/// 弧度转角度
pub const RAD_TO_DEG: f32 = 180.0 / PI;

/// 角度转弧度
pub const DEG_TO_RAD: f32 = PI / 180.0;

/// rad/s 转 RPM
pub const RADS_TO_RPM: f32 = 60.0 / (2.0 * PI);

/// RPM 转 rad/s
pub const RPM_TO_RADS: f32 = 2.0 * PI / 60.0;

/// 控制帧 ack 位：要求电机按格式 1 应答
const ACK_FORMAT_1: u8 = 0x01;

// ============================================================================
// 运控模式（MIT）
// ============================================================================

/// 运控帧各字段的量化范围
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionLimits {
    pub kp: ValueRange,
    pub kd: ValueRange,
    pub position: ValueRange,
    pub velocity: ValueRange,
    pub torque: ValueRange,
}

/// 运控模式控制指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MotionControlCommand {
    pub motor_id: u32,
    pub kp: f32,
    pub kd: f32,
    /// 目标位置（rad，已乘方向）
    pub position: f32,
    /// 目标速度（rad/s，已乘方向）
    pub velocity: f32,
    /// 前馈力矩（N·m，已乘方向）
    pub torque: f32,
}

impl MotionControlCommand {
    /// 转换为 CAN 帧
    ///
    /// 协议位域布局（dlc = 8）：
    /// - Byte 0: 帧头 0x00 | Kp [bit11~bit7]
    /// - Byte 1: Kp [bit6~bit0] | Kd [bit8]
    /// - Byte 2: Kd [bit7~bit0]
    /// - Byte 3-4: Pos (16位)
    /// - Byte 5: Spd [bit11~bit4]
    /// - Byte 6: Spd [bit3~bit0] | Tor [bit11~bit8]
    /// - Byte 7: Tor [bit7~bit0]
    pub fn to_frame(&self, limits: &MotionLimits) -> CanFrame {
        let kp = limits.kp.encode(self.kp, KP_BITS);
        let kd = limits.kd.encode(self.kd, KD_BITS);
        let pos = limits.position.encode(self.position, POSITION_BITS);
        let spd = limits.velocity.encode(self.velocity, VELOCITY_BITS);
        let tor = limits.torque.encode(self.torque, TORQUE_BITS);

        let data = [
            HEADER_MOTION | (kp >> 7) as u8,
            (((kp & 0x7F) << 1) | ((kd & 0x100) >> 8)) as u8,
            (kd & 0xFF) as u8,
            (pos >> 8) as u8,
            (pos & 0xFF) as u8,
            (spd >> 4) as u8,
            (((spd & 0x0F) << 4) | (tor >> 8)) as u8,
            (tor & 0xFF) as u8,
        ];
        CanFrame::new(self.motor_id, &data)
    }
}

// ============================================================================
// 伺服位置控制
// ============================================================================

/// 伺服位置控制指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PositionControlCommand {
    pub motor_id: u32,
    /// 目标位置（rad，已乘方向）
    pub position: f32,
    /// 运动速度（rad/s，取绝对值）
    pub velocity: f32,
    /// 电流限幅（A）
    pub current_limit: f32,
}

impl PositionControlCommand {
    /// 速度字段：RPM × 10（15 位）
    fn speed_field(&self) -> u16 {
        (self.velocity.abs() * RADS_TO_RPM * 10.0) as u16
    }

    /// 电流字段：A × 10（12 位）
    fn current_field(&self) -> u16 {
        (self.current_limit * 10.0) as u16
    }

    /// 转换为 CAN 帧（电机原生格式，位置为角度制 IEEE-754 浮点）
    ///
    /// 协议位域布局（dlc = 8）：
    /// - Byte 0: 帧头 0x20 | f32 [bit31~bit27]
    /// - Byte 1-4: f32 余下 27 位，逐字节左移 5 位拼接
    /// - Byte 4: ... | Spd [bit14~bit10]
    /// - Byte 5: Spd [bit9~bit2]
    /// - Byte 6: Spd [bit1~bit0] | Cur [bit11~bit6]
    /// - Byte 7: Cur [bit5~bit0] | Ack (2位)
    pub fn to_frame(&self) -> CanFrame {
        let b = (self.position * RAD_TO_DEG).to_le_bytes();
        let spd = self.speed_field();
        let cur = self.current_field();

        let data = [
            HEADER_POSITION | (b[3] >> 3),
            (b[3] << 5) | (b[2] >> 3),
            (b[2] << 5) | (b[1] >> 3),
            (b[1] << 5) | (b[0] >> 3),
            (b[0] << 5) | (spd >> 10) as u8,
            ((spd & 0x3FC) >> 2) as u8,
            (((spd & 0x03) << 6) as u8) | (cur >> 6) as u8,
            (((cur & 0x3F) << 2) as u8) | ACK_FORMAT_1,
        ];
        CanFrame::new(self.motor_id, &data)
    }

    /// 转换为 CAN 帧（16 位量化位置）
    ///
    /// 与原生格式共用帧头、速度、电流与 ack 字段，位置字段换成按 `range` 量化的 16 位整数，
    /// 帧长缩短为 6 字节：
    /// - Byte 0: 帧头 0x20 | Pos [bit15~bit11]
    /// - Byte 1: Pos [bit10~bit3]
    /// - Byte 2: Pos [bit2~bit0] | Spd [bit14~bit10]
    /// - Byte 3: Spd [bit9~bit2]
    /// - Byte 4: Spd [bit1~bit0] | Cur [bit11~bit6]
    /// - Byte 5: Cur [bit5~bit0] | Ack (2位)
    pub fn to_quantized_frame(&self, range: &ValueRange) -> CanFrame {
        let pos = range.encode(self.position, POSITION_BITS);
        let spd = self.speed_field();
        let cur = self.current_field();

        let data = [
            HEADER_POSITION | (pos >> 11) as u8,
            ((pos >> 3) & 0xFF) as u8,
            (((pos & 0x07) << 5) as u8) | (spd >> 10) as u8,
            ((spd & 0x3FC) >> 2) as u8,
            (((spd & 0x03) << 6) as u8) | (cur >> 6) as u8,
            (((cur & 0x3F) << 2) as u8) | ACK_FORMAT_1,
        ];
        CanFrame::new(self.motor_id, &data)
    }
}

// ============================================================================
// 伺服速度 / 电流 / 力矩控制
// ============================================================================

/// 伺服速度控制指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct VelocityControlCommand {
    pub motor_id: u32,
    /// 目标速度（rad/s，已乘方向）
    pub velocity: f32,
    /// 电流限幅（A）
    pub current_limit: f32,
}

impl VelocityControlCommand {
    /// 转换为 CAN 帧（dlc = 7）
    ///
    /// - Byte 0: 帧头 0x40 | Ack
    /// - Byte 1-4: RPM（f32，大端）
    /// - Byte 5-6: 电流限幅 × 10（u16，大端）
    pub fn to_frame(&self) -> CanFrame {
        let rpm = (self.velocity * RADS_TO_RPM).to_be_bytes();
        let cur = u16_to_bytes_be((self.current_limit * 10.0) as u16);

        let data = [
            HEADER_VELOCITY | ACK_FORMAT_1,
            rpm[0],
            rpm[1],
            rpm[2],
            rpm[3],
            cur[0],
            cur[1],
        ];
        CanFrame::new(self.motor_id, &data)
    }
}

/// 电流 / 力矩控制帧的控制状态子字段（Byte 0 bit2~bit4）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CurrentTorqueMode {
    /// 电流控制
    Current = 0x00,
    /// 力矩控制
    Torque = 0x01,
}

/// 电流 / 力矩控制指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CurrentTorqueCommand {
    pub motor_id: u32,
    pub mode: CurrentTorqueMode,
    /// 电流（A）或力矩（N·m）
    pub value: f32,
}

impl CurrentTorqueCommand {
    pub fn current(motor_id: u32, current: f32) -> Self {
        Self {
            motor_id,
            mode: CurrentTorqueMode::Current,
            value: current,
        }
    }

    pub fn torque(motor_id: u32, torque: f32) -> Self {
        Self {
            motor_id,
            mode: CurrentTorqueMode::Torque,
            value: torque,
        }
    }

    /// 转换为 CAN 帧（dlc = 3）
    ///
    /// - Byte 0: 帧头 0x60 | 控制状态 << 2 | Ack
    /// - Byte 1-2: 值 × 100（i16，大端）
    pub fn to_frame(&self) -> CanFrame {
        let raw = i16_to_bytes_be((self.value * 100.0) as i16);
        let data = [
            HEADER_CURRENT_TORQUE | ((self.mode as u8) << 2) | ACK_FORMAT_1,
            raw[0],
            raw[1],
        ];
        CanFrame::new(self.motor_id, &data)
    }
}

/// 失能帧：零电流控制（0x61, 0x00, 0x00）
///
/// 电机未上电或未使能时，无论当前挂起的是哪种指令都发送此帧。
pub fn disabled_frame(motor_id: u32) -> CanFrame {
    CurrentTorqueCommand::current(motor_id, 0.0).to_frame()
}

// ============================================================================
// 配置帧（发往 BROADCAST_ID）
// ============================================================================

/// 配置指令
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigCommand {
    /// 设置当前位置为零点
    SetZero,
    /// 查询通信模式
    ReadCommMode,
    /// 查询 CAN ID（对总线上所有电机）
    ReadCanId,
}

impl ConfigCommand {
    /// 转换为 CAN 帧（dlc = 4，ID = 0x7FF）
    pub fn to_frame(self, motor_id: u32) -> CanFrame {
        let id_hi = ((motor_id >> 8) & 0xFF) as u8;
        let id_lo = (motor_id & 0xFF) as u8;
        let data = match self {
            Self::SetZero => [id_hi, id_lo, 0x00, CODE_SET_ZERO],
            Self::ReadCommMode => [id_hi, id_lo, 0x00, CODE_READ_COMM_MODE],
            Self::ReadCanId => [0xFF, 0xFF, 0x00, CODE_READ_CAN_ID],
        };
        CanFrame::new(BROADCAST_ID, &data)
    }
}

// ============================================================================
// 参数设置帧（发往电机自身 ID）
// ============================================================================

/// 参数设置指令
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SettingsCommand {
    /// 加速度（rad/s²，0~20）
    Acceleration(f32),
    /// 磁链补偿增益与速度环扰动补偿系数（0~1）
    LinkCompensation { linkage: f32, speed_ki: f32 },
    /// 反馈 Kp / Kd（0~1）
    FeedbackGains { kp: f32, kd: f32 },
}

impl SettingsCommand {
    /// 转换为 CAN 帧
    ///
    /// - Byte 0: 帧头 0xC0 | Ack
    /// - Byte 1: 子指令
    /// - Byte 2..: 参数（u16，大端）
    pub fn to_frame(self, motor_id: u32) -> CanFrame {
        let header = HEADER_SETTINGS | ACK_FORMAT_1;
        match self {
            Self::Acceleration(acc) => {
                let acc = u16_to_bytes_be((acc * 100.0) as u16);
                CanFrame::new(motor_id, &[header, SETTINGS_ACCELERATION, acc[0], acc[1]])
            },
            Self::LinkCompensation { linkage, speed_ki } => {
                let linkage = u16_to_bytes_be((linkage * 10000.0) as u16);
                let ki = u16_to_bytes_be((speed_ki * 10000.0) as u16);
                CanFrame::new(
                    motor_id,
                    &[header, SETTINGS_LINK_COMPENSATION, linkage[0], linkage[1], ki[0], ki[1]],
                )
            },
            Self::FeedbackGains { kp, kd } => {
                let kp = u16_to_bytes_be((kp * 10000.0) as u16);
                let kd = u16_to_bytes_be((kd * 10000.0) as u16);
                CanFrame::new(
                    motor_id,
                    &[header, SETTINGS_FEEDBACK_GAINS, kp[0], kp[1], kd[0], kd[1]],
                )
            },
        }
    }
}
