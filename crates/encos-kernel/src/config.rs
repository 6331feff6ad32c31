//! 内核配置文件
//!
//! ```toml
//! [bus]
//! interface = "enp3s0"
//! frequency_hz = 1000.0
//!
//! [[devices]]
//! id = 1
//! name = "left_hip"
//! kind = "encos_joint"
//! [devices.joint]
//! mode = "motion"
//! enable = true
//! slave_id = 0
//!
//! [[auto_zero.groups]]
//! duration_s = 3.0
//! [[auto_zero.groups.members]]
//! name = "left_hip"
//! lower_limit = -0.5
//! upper_limit = 1.2
//! reset_torque = 2.0
//! reset_velocity = 0.5
//! ```

use crate::error::KernelError;
use encos_driver::{BusConfig, DeviceConfig};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::str::FromStr;

/// 完整配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EncosConfig {
    pub bus: BusConfig,
    pub devices: Vec<DeviceConfig>,
    pub auto_zero: AutoZeroConfig,
}

/// `[auto_zero]`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AutoZeroConfig {
    /// 按顺序执行的归零组
    pub groups: Vec<ZeroGroupConfig>,
}

/// `[[auto_zero.groups]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroGroupConfig {
    /// 施加力矩阶段与归零阶段各自持续的时间
    pub duration_s: f64,
    #[serde(default)]
    pub members: Vec<ZeroMemberConfig>,
}

/// `[[auto_zero.groups.members]]`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZeroMemberConfig {
    /// 关节名
    pub name: String,
    /// 关节限位（rad）
    pub lower_limit: f32,
    pub upper_limit: f32,
    /// 寻找限位时施加的力矩，符号决定方向
    pub reset_torque: f32,
    /// 回零运动速度（rad/s）
    pub reset_velocity: f32,
}

impl EncosConfig {
    /// 从文件加载配置
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, KernelError> {
        let content = fs::read_to_string(path)?;
        content.parse()
    }
}

impl FromStr for EncosConfig {
    type Err = KernelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(toml::from_str(s)?)
    }
}
