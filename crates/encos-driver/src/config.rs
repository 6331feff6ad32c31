//! 总线与设备配置
//!
//! 配置项与 TOML 文件中的 `[bus]`、`[[devices]]` 表一一对应，缺省字段取默认值。
//! [`ActuatorConfig`] 是由 [`JointConfig`] 校验、换算后的不可变参数。

use crate::error::DriverError;
use crate::mode::JointMode;
use encos_protocol::ValueRange;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::error;

/// Encos 关节设备类型名
pub const KIND_ENCOS_JOINT: &str = "encos_joint";

/// Yesense IMU 设备类型名
pub const KIND_YESENSE_IMU: &str = "yesense_imu";

/// `[bus]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// 网卡名
    pub interface: String,
    /// 控制周期频率
    pub frequency_hz: f64,
    /// 每隔多少个周期检查一次链路状态
    pub check_cycle: usize,
    /// EtherCAT 初始化尝试次数
    pub init_attempts: u32,
    pub init_retry_interval_ms: u64,
    /// 单次过程数据接收超时
    pub receive_timeout_us: u64,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            interface: "eth0".to_string(),
            frequency_hz: 1000.0,
            check_cycle: 100,
            init_attempts: 5,
            init_retry_interval_ms: 1000,
            receive_timeout_us: 2000,
        }
    }
}

impl BusConfig {
    /// 控制周期；频率非法时退回 1 kHz
    pub fn period(&self) -> Duration {
        if self.frequency_hz.is_finite() && self.frequency_hz > 0.0 {
            Duration::from_secs_f64(1.0 / self.frequency_hz)
        } else {
            Duration::from_millis(1)
        }
    }

    pub fn receive_timeout(&self) -> Duration {
        Duration::from_micros(self.receive_timeout_us)
    }

    pub fn init_retry_interval(&self) -> Duration {
        Duration::from_millis(self.init_retry_interval_ms)
    }
}

/// `[[devices]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 设备 ID（关节即 CAN ID）
    pub id: u32,
    pub name: String,
    /// `"encos_joint"` 或 `"yesense_imu"`
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub joint: Option<JointConfig>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub imu: Option<ImuConfig>,
}

/// 位置指令编码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PositionEncoding {
    /// 角度制 IEEE-754 浮点（8 字节帧）
    #[default]
    Native,
    /// 按位置范围量化的 16 位整数（6 字节帧）
    Quantized,
}

/// `[devices.joint]`
///
/// 范围均以单个幅值给出：Kp / Kd 为 `[0, r]`，其余为 `[-r, r]`。
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct JointConfig {
    /// `"position"` / `"velocity"` / `"torque"` / `"motion"`
    pub mode: String,
    pub enable: bool,
    /// 所在 EtherCAT 从站索引（从 0 开始）
    pub slave_id: usize,
    /// 任意非零整数，只取符号
    pub motor_direction: i32,
    pub kp_range: f32,
    pub kd_range: f32,
    pub vel_range: f32,
    pub pos_range: f32,
    pub torque_range: f32,
    pub current_range: f32,
    /// 力矩常数 KT（N·m/A）
    pub torque_constant: f32,
    pub kp: f32,
    pub kd: f32,
    pub position_encoding: PositionEncoding,
}

impl Default for JointConfig {
    fn default() -> Self {
        Self {
            mode: "motion".to_string(),
            enable: false,
            slave_id: 0,
            motor_direction: 1,
            kp_range: 500.0,
            kd_range: 5.0,
            vel_range: 18.0,
            pos_range: 12.5,
            torque_range: 30.0,
            current_range: 30.0,
            torque_constant: 1.0,
            kp: 0.0,
            kd: 0.0,
            position_encoding: PositionEncoding::Native,
        }
    }
}

/// `[devices.imu]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImuConfig {
    /// 串口设备路径
    pub dev: String,
    pub baud: u32,
}

impl Default for ImuConfig {
    fn default() -> Self {
        Self {
            dev: "/dev/ttyUSB0".to_string(),
            baud: 921_600,
        }
    }
}

/// 关节的不可变参数
#[derive(Debug, Clone, PartialEq)]
pub struct ActuatorConfig {
    pub id: u32,
    pub name: String,
    pub slave_id: usize,
    /// ±1
    pub direction: f32,
    pub kp: ValueRange,
    pub kd: ValueRange,
    pub velocity: ValueRange,
    pub position: ValueRange,
    pub torque: ValueRange,
    pub current: ValueRange,
    pub torque_constant: f32,
    pub enable: bool,
    pub mode: JointMode,
    pub initial_kp: f32,
    pub initial_kd: f32,
    pub position_encoding: PositionEncoding,
}

impl ActuatorConfig {
    /// 校验并换算关节配置
    ///
    /// 未知模式名记录错误并退回运控模式；方向为 0 或范围非有限值时返回错误。
    pub fn from_joint_config(id: u32, name: &str, cfg: &JointConfig) -> Result<Self, DriverError> {
        if cfg.motor_direction == 0 {
            return Err(DriverError::invalid_config(
                name,
                "motor_direction must be non-zero",
            ));
        }

        let ranges = [
            ("kp_range", cfg.kp_range),
            ("kd_range", cfg.kd_range),
            ("vel_range", cfg.vel_range),
            ("pos_range", cfg.pos_range),
            ("torque_range", cfg.torque_range),
            ("current_range", cfg.current_range),
            ("torque_constant", cfg.torque_constant),
        ];
        for (field, value) in ranges {
            if !value.is_finite() {
                return Err(DriverError::invalid_config(
                    name,
                    format!("{} must be finite", field),
                ));
            }
        }

        let mode = JointMode::parse(&cfg.mode).unwrap_or_else(|| {
            error!(
                "Unknown motor mode \"{}\" for {}, fallback to motion mode. Motor mode can only be \"position\", \"torque\", \"velocity\" or \"motion\".",
                cfg.mode, name
            );
            JointMode::Motion
        });

        Ok(Self {
            id,
            name: name.to_string(),
            slave_id: cfg.slave_id,
            direction: cfg.motor_direction.signum() as f32,
            kp: ValueRange::non_negative(cfg.kp_range),
            kd: ValueRange::non_negative(cfg.kd_range),
            velocity: ValueRange::symmetric(cfg.vel_range),
            position: ValueRange::symmetric(cfg.pos_range),
            torque: ValueRange::symmetric(cfg.torque_range),
            current: ValueRange::symmetric(cfg.current_range),
            torque_constant: cfg.torque_constant,
            enable: cfg.enable,
            mode,
            initial_kp: cfg.kp,
            initial_kd: cfg.kd,
            position_encoding: cfg.position_encoding,
        })
    }
}
