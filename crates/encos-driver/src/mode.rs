//! 关节工作模式与待发送指令类型
//!
//! 两者都以 `u8` 原子变量存储，宿主线程写、周期线程读。

use std::sync::atomic::{AtomicU8, Ordering};

/// 关节工作模式
///
/// 模式决定哪些目标量设置会被接受，以及一次性指令发送后回落到哪种控制帧。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum JointMode {
    /// 伺服位置控制
    Position = 0,
    /// 伺服速度控制
    Velocity = 1,
    /// 力矩控制
    Torque = 2,
    /// 运控模式（MIT），默认
    #[default]
    Motion = 3,
}

impl JointMode {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 Motion 模式。
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::Position,
            1 => Self::Velocity,
            2 => Self::Torque,
            _ => Self::Motion,
        }
    }

    /// 转换为 u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 配置文件中的模式名
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            "position" => Some(Self::Position),
            "velocity" => Some(Self::Velocity),
            "torque" => Some(Self::Torque),
            "motion" => Some(Self::Motion),
            _ => None,
        }
    }

    /// 该模式下周期性发送的控制帧
    pub fn control_command(self) -> CommandKind {
        match self {
            Self::Position => CommandKind::PositionControl,
            Self::Velocity => CommandKind::VelocityControl,
            Self::Torque => CommandKind::TorqueControl,
            Self::Motion => CommandKind::MotionControl,
        }
    }
}

/// 下一次 WriteBus 要发送的指令
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[repr(u8)]
pub enum CommandKind {
    SetZero = 0,
    ReadCommMode = 1,
    ReadCanId = 2,
    MotionControl = 3,
    PositionControl = 4,
    VelocityControl = 5,
    /// 配置模式应用之前的初始值
    #[default]
    TorqueControl = 6,
    CurrentControl = 7,
    SettingsAcceleration = 8,
    SettingsLinkCompensation = 9,
    SettingsFeedbackGains = 10,
}

impl CommandKind {
    /// 从 u8 转换
    ///
    /// 如果值无效，返回 TorqueControl。
    pub fn from_u8(value: u8) -> Self {
        match value {
            0 => Self::SetZero,
            1 => Self::ReadCommMode,
            2 => Self::ReadCanId,
            3 => Self::MotionControl,
            4 => Self::PositionControl,
            5 => Self::VelocityControl,
            7 => Self::CurrentControl,
            8 => Self::SettingsAcceleration,
            9 => Self::SettingsLinkCompensation,
            10 => Self::SettingsFeedbackGains,
            _ => Self::TorqueControl,
        }
    }

    /// 转换为 u8
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// 发送一次后回落到模式对应的控制帧
    pub fn is_one_shot(self) -> bool {
        matches!(
            self,
            Self::SetZero
                | Self::ReadCommMode
                | Self::ReadCanId
                | Self::SettingsAcceleration
                | Self::SettingsLinkCompensation
                | Self::SettingsFeedbackGains
        )
    }

    /// 闭环控制帧（发送后保持，不回落）
    pub fn is_control(self) -> bool {
        matches!(
            self,
            Self::MotionControl
                | Self::PositionControl
                | Self::VelocityControl
                | Self::TorqueControl
                | Self::CurrentControl
        )
    }
}

/// 关节模式（原子版本，用于线程间共享）
#[derive(Debug)]
pub struct AtomicJointMode {
    inner: AtomicU8,
}

impl AtomicJointMode {
    pub fn new(mode: JointMode) -> Self {
        Self {
            inner: AtomicU8::new(mode.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> JointMode {
        JointMode::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, mode: JointMode, ordering: Ordering) {
        self.inner.store(mode.as_u8(), ordering);
    }
}

impl Clone for AtomicJointMode {
    fn clone(&self) -> Self {
        Self::new(self.get(Ordering::Relaxed))
    }
}

/// 待发送指令（原子版本）
#[derive(Debug)]
pub struct AtomicCommandKind {
    inner: AtomicU8,
}

impl AtomicCommandKind {
    pub fn new(kind: CommandKind) -> Self {
        Self {
            inner: AtomicU8::new(kind.as_u8()),
        }
    }

    pub fn get(&self, ordering: Ordering) -> CommandKind {
        CommandKind::from_u8(self.inner.load(ordering))
    }

    pub fn set(&self, kind: CommandKind, ordering: Ordering) {
        self.inner.store(kind.as_u8(), ordering);
    }

    /// 比较并交换
    ///
    /// 如果当前值等于 `current`，则设置为 `new` 并返回 true
    pub fn compare_exchange(
        &self,
        current: CommandKind,
        new: CommandKind,
        success: Ordering,
        failure: Ordering,
    ) -> bool {
        self.inner
            .compare_exchange(current.as_u8(), new.as_u8(), success, failure)
            .is_ok()
    }
}

impl Clone for AtomicCommandKind {
    fn clone(&self) -> Self {
        Self::new(self.get(Ordering::Relaxed))
    }
}
