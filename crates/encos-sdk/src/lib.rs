//! Encos SDK
//!
//! Encos 关节电机与 Yesense IMU 的 EtherCAT-CAN 总线驱动栈，专用于固定周期（1 kHz）控制。
//!
//! # 架构设计
//!
//! 从底层到高层：
//!
//! - **协议层** (`protocol`): 电机 CAN 帧、86 字节 EtherCAT 记录与 IMU 串口帧的编解码
//! - **主站层** (`ethercat`): EtherCAT 主站抽象与 Mock 实现
//! - **驱动层** (`driver`): 关节 / IMU 设备模型与总线事务管理
//! - **内核层** (`kernel`): 固定周期运行、内核事件、自动归零、配置文件
//!
//! # 快速开始
//!
//! ```rust,no_run
//! use encos_sdk::prelude::*;
//!
//! fn run<M: EthercatMaster>(master: M) -> Result<(), KernelError> {
//!     let config = EncosConfig::load_from_file("encos.toml")?;
//!     let mut kernel = EncosKernel::new(&config, master)?;
//!     let handle = kernel.handle();
//!     handle.power_on()?;
//!
//!     kernel.run(|info, bus| {
//!         if let Some(hip) = bus.joint("left_hip") {
//!             hip.set_target_motion(0.0, 0.0, 0.0);
//!         }
//!         if info.cycle % 1000 == 0 {
//!             println!("metrics: {:?}", bus.metrics().snapshot());
//!         }
//!     });
//!     Ok(())
//! }
//! ```
//!
//! 库本身不安装日志订阅者，由可执行程序负责初始化 `tracing-subscriber`。

pub use encos_driver as driver;
pub use encos_ethercat as ethercat;
pub use encos_kernel as kernel;
pub use encos_protocol as protocol;

pub mod prelude;

// 协议层
pub use protocol::{CanFrame, EtherCatMsg, ProtocolError};

// 主站层
pub use ethercat::{AlState, EcatError, EthercatMaster, SlaveStatus};

// 驱动层
pub use driver::{
    BusConfig, DeviceConfig, DriverError, EncosBus, EncosBusBuilder, EncosJoint, ImuReader,
    JointConfig, JointMode, LinkState, MetricsSnapshot,
};

// 内核层（推荐入口）
pub use kernel::{
    CycleInfo, CycleOutcome, EncosConfig, EncosKernel, KernelError, KernelEvent, KernelHandle,
    KernelState, ZeroState,
};
