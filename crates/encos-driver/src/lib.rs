//! 驱动层模块
//!
//! 本模块提供 Encos 关节电机与 Yesense IMU 的设备模型，以及 EtherCAT-CAN 总线事务管理：
//! - 关节指令门控、一次性指令高优先级锁存、设零静默窗口
//! - 从站槽位映射与按 CAN ID 分发
//! - 链路健康检查与从站恢复
//! - 原子化的共享状态（宿主线程无锁读写）
//!
//! 周期调度由上层 `encos-kernel` 负责，本模块不启动任何线程。

mod builder;
pub mod bus;
pub mod config;
pub mod device;
mod error;
pub mod health;
pub mod imu;
pub mod joint;
pub mod metrics;
pub mod mode;
pub mod state;

pub use builder::{EncosBusBuilder, slot_plan};
pub use bus::{EncosBus, UnresolvedDevice};
pub use config::{
    ActuatorConfig, BusConfig, DeviceConfig, ImuConfig, JointConfig, KIND_ENCOS_JOINT,
    KIND_YESENSE_IMU, PositionEncoding,
};
pub use device::{Capabilities, CanBusDevice, Device, VirtualDevice};
pub use error::DriverError;
pub use health::{LinkHealth, LinkState};
pub use imu::{ImuReader, MemoryPort, SerialOpener, SerialPort, YesenseImu, open_serial};
pub use joint::{EncosJoint, ZERO_QUIESCENT_CYCLES};
pub use metrics::{BusMetrics, MetricsSnapshot};
pub use mode::{AtomicCommandKind, AtomicJointMode, CommandKind, JointMode};
