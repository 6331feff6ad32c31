//! 内核层模块
//!
//! 在驱动层之上提供：
//! - 固定周期运行（`spin_sleep` 精确睡眠，可选实时优先级）
//! - 内核事件：上电、下电、开始/停止自动归零、停止
//! - 分组自动归零
//! - TOML 配置文件加载

pub mod auto_zero;
pub mod config;
mod error;
pub mod kernel;

pub use auto_zero::{AutoZero, ZeroState};
pub use config::{AutoZeroConfig, EncosConfig, ZeroGroupConfig, ZeroMemberConfig};
pub use error::KernelError;
pub use kernel::{CycleInfo, CycleOutcome, EncosKernel, KernelEvent, KernelHandle, KernelState};
