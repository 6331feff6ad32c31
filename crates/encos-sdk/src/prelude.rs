//! Prelude - 常用类型的便捷导入
//!
//! ```rust
//! use encos_sdk::prelude::*;
//! ```

// 内核层
pub use crate::kernel::{
    AutoZeroConfig, CycleInfo, CycleOutcome, EncosConfig, EncosKernel, KernelEvent, KernelHandle,
    KernelState, ZeroState,
};

// 驱动层
pub use crate::driver::{EncosBus, EncosJoint, ImuReader, JointMode, LinkState};

// 主站层（常用 Trait）
pub use crate::ethercat::EthercatMaster;

// 错误类型
pub use crate::driver::DriverError;
pub use crate::ethercat::EcatError;
pub use crate::kernel::KernelError;
pub use crate::protocol::ProtocolError;
