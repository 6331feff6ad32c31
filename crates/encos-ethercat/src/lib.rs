//! # Encos EtherCAT Master Layer
//!
//! EtherCAT 主站抽象层。总线管理器只通过 [`EthercatMaster`] 访问主站，
//! 真实实现（SOEM 绑定等）与测试用的 `MockMaster` 都实现该 trait。
//!
//! 从站索引统一从 0 开始。

use std::fmt;
use std::time::Duration;
use thiserror::Error;

#[cfg(feature = "mock")]
pub mod mock;

#[cfg(feature = "mock")]
pub use mock::{MockHandle, MockMaster};

/// 单次过程数据接收超时（与 SOEM `EC_TIMEOUTRET` 一致）
pub const TIMEOUT_RET: Duration = Duration::from_micros(2_000);

/// 状态切换超时（与 SOEM `EC_TIMEOUTSTATE` 一致）
pub const TIMEOUT_STATE: Duration = Duration::from_micros(2_000_000);

/// 从站重配置 / 恢复超时
pub const TIMEOUT_MON: Duration = Duration::from_micros(500);

/// EtherCAT 应用层（AL）状态
///
/// 低 4 位为状态，`0x10` 为错误 / 应答位，因此 `SAFE_OP | ERROR` 之类的组合可直接比较。
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
pub struct AlState(pub u16);

impl AlState {
    pub const NONE: Self = Self(0x00);
    pub const INIT: Self = Self(0x01);
    pub const PRE_OP: Self = Self(0x02);
    pub const BOOT: Self = Self(0x03);
    pub const SAFE_OP: Self = Self(0x04);
    pub const OPERATIONAL: Self = Self(0x08);
    pub const ERROR: Self = Self(0x10);
    /// 与 ERROR 同值，写入时表示应答错误
    pub const ACK: Self = Self(0x10);

    /// 按位组合，例如 `AlState::SAFE_OP.with(AlState::ERROR)`
    pub const fn with(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// 去掉错误位后的状态
    pub const fn base(self) -> Self {
        Self(self.0 & 0x0F)
    }

    pub const fn has_error(self) -> bool {
        self.0 & Self::ERROR.0 != 0
    }

    pub const fn is_operational(self) -> bool {
        self.0 == Self::OPERATIONAL.0
    }

    /// 从站无应答
    pub const fn is_none(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Display for AlState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self.base() {
            Self::NONE => "NONE",
            Self::INIT => "INIT",
            Self::PRE_OP => "PRE_OP",
            Self::BOOT => "BOOT",
            Self::SAFE_OP => "SAFE_OP",
            Self::OPERATIONAL => "OPERATIONAL",
            _ => return write!(f, "0x{:02x}", self.0),
        };
        if self.has_error() {
            write!(f, "{} + ERROR", name)
        } else {
            f.write_str(name)
        }
    }
}

/// 从站状态快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SlaveStatus {
    pub state: AlState,
    /// AL 状态码（0 = 无错误）
    pub al_status_code: u16,
    pub input_bytes: usize,
    pub output_bytes: usize,
}

/// AL 状态码描述（常见值）
pub fn al_status_code_description(code: u16) -> &'static str {
    match code {
        0x0000 => "No error",
        0x0001 => "Unspecified error",
        0x0002 => "No memory",
        0x0011 => "Invalid requested state change",
        0x0012 => "Unknown requested state",
        0x0013 => "Bootstrap not supported",
        0x0014 => "No valid firmware",
        0x0016 => "Invalid mailbox configuration",
        0x0017 => "Invalid sync manager configuration",
        0x0018 => "No valid inputs available",
        0x0019 => "No valid outputs",
        0x001A => "Synchronization error",
        0x001B => "Sync manager watchdog",
        0x001D => "Invalid output configuration",
        0x001E => "Invalid input configuration",
        0x0020 => "Slave needs cold start",
        0x0021 => "Slave needs INIT",
        0x0022 => "Slave needs PREOP",
        0x0023 => "Slave needs SAFEOP",
        0x002C => "Fatal sync error",
        0x0030 => "Invalid DC SYNC configuration",
        0x0032 => "PLL error",
        _ => "Unknown AL status code",
    }
}

/// 主站层统一错误类型
#[derive(Error, Debug)]
pub enum EcatError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("No socket connection on {ifname}")]
    NoSocket { ifname: String },
    #[error("No slaves found")]
    NoSlaves,
    #[error("Slave index {index} out of range (slave count {count})")]
    SlaveOutOfRange { index: usize, count: usize },
    #[error("Process data timeout")]
    Timeout,
    #[error("Link down")]
    LinkDown,
    #[error("Master not initialized")]
    NotInitialized,
}

impl EcatError {
    /// 致命错误：周期内出现时需要停止内核
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            EcatError::NoSocket { .. } | EcatError::LinkDown | EcatError::NotInitialized
        )
    }
}

/// EtherCAT 主站接口
///
/// 方法与 SOEM 的调用一一对应，`slave = None` 表示全部从站（SOEM 中的 slave 0）。
pub trait EthercatMaster {
    /// 绑定网卡
    fn init(&mut self, ifname: &str) -> Result<(), EcatError>;

    /// 扫描并配置从站，返回从站数量
    fn config_init(&mut self) -> Result<usize, EcatError>;

    /// 映射过程数据
    fn config_map(&mut self) -> Result<(), EcatError>;

    fn slave_count(&self) -> usize;

    /// 所有从站正常应答时的工作计数器
    fn expected_wkc(&self) -> i32;

    /// 从站输出映像（主站 → 从站）；未映射时为 `None`
    fn outputs_mut(&mut self, slave: usize) -> Option<&mut [u8]>;

    /// 从站输入映像（从站 → 主站）；未映射时为 `None`
    fn inputs(&self, slave: usize) -> Option<&[u8]>;

    fn send_process_data(&mut self) -> Result<(), EcatError>;

    /// 接收过程数据，返回工作计数器
    fn receive_process_data(&mut self, timeout: Duration) -> Result<i32, EcatError>;

    /// 等待从站到达 `expected` 状态，返回实际（最低）状态
    fn state_check(&mut self, slave: Option<usize>, expected: AlState, timeout: Duration)
    -> AlState;

    /// 刷新所有从站状态，返回最低状态
    fn read_state(&mut self) -> AlState;

    fn slave_status(&self, slave: usize) -> SlaveStatus;

    /// 请求状态切换
    fn write_state(&mut self, slave: Option<usize>, state: AlState) -> Result<(), EcatError>;

    /// 重新配置从站，成功返回 `true`
    fn reconfig_slave(&mut self, slave: usize, timeout: Duration) -> bool;

    /// 恢复丢失的从站，成功返回 `true`
    fn recover_slave(&mut self, slave: usize, timeout: Duration) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_al_state_combination() {
        let state = AlState::SAFE_OP.with(AlState::ERROR);
        assert_eq!(state, AlState(0x14));
        assert!(state.has_error());
        assert_eq!(state.base(), AlState::SAFE_OP);
        assert!(!state.is_operational());
        assert_eq!(AlState::SAFE_OP.with(AlState::ACK), state);
    }

    #[test]
    fn test_al_state_display() {
        assert_eq!(AlState::OPERATIONAL.to_string(), "OPERATIONAL");
        assert_eq!(
            AlState::SAFE_OP.with(AlState::ERROR).to_string(),
            "SAFE_OP + ERROR"
        );
        assert_eq!(AlState(0x07).to_string(), "0x07");
    }

    #[test]
    fn test_al_state_ordering() {
        assert!(AlState::NONE < AlState::INIT);
        assert!(AlState::SAFE_OP < AlState::OPERATIONAL);
    }

    #[test]
    fn test_ecat_error_fatal() {
        assert!(EcatError::LinkDown.is_fatal());
        assert!(
            EcatError::NoSocket {
                ifname: "eth0".to_string()
            }
            .is_fatal()
        );
        assert!(!EcatError::Timeout.is_fatal());
        assert!(!EcatError::NoSlaves.is_fatal());
    }

    #[test]
    fn test_ecat_error_display() {
        let e = EcatError::SlaveOutOfRange { index: 3, count: 2 };
        assert_eq!(e.to_string(), "Slave index 3 out of range (slave count 2)");
    }

    #[test]
    fn test_al_status_code_description() {
        assert_eq!(al_status_code_description(0x001B), "Sync manager watchdog");
        assert_eq!(al_status_code_description(0xBEEF), "Unknown AL status code");
    }
}
