//! EtherCAT 链路健康检查
//!
//! 每隔 `check_cycle` 个读周期运行一次 [`LinkHealth::check`]：工作计数器低于期望值
//! 或上一次检查仍有从站未恢复时，读取全部从站状态并逐个尝试恢复。

use crate::metrics::BusMetrics;
use encos_ethercat::{AlState, EthercatMaster, TIMEOUT_MON, TIMEOUT_RET};
use std::sync::atomic::Ordering;
use tracing::{error, info};

/// 错误计数窗口（检查次数）
pub const ERR_PERIOD: u32 = 100;

/// 窗口内错误数超过该值时报告链路退化
pub const ERR_MAX: u32 = 20;

/// 链路状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LinkState {
    /// 尚未进入 OPERATIONAL
    #[default]
    NotInitialized,
    /// 全部从站 OPERATIONAL
    Operational,
    /// 有从站正在恢复
    Degraded,
}

impl LinkState {
    /// 是否曾经进入过 OPERATIONAL
    pub fn is_up(self) -> bool {
        !matches!(self, Self::NotInitialized)
    }
}

/// 链路健康状态
#[derive(Debug, Default)]
pub struct LinkHealth {
    state: LinkState,
    lost: Vec<bool>,
    err_count: u32,
    err_iteration_count: u32,
    do_check_state: bool,
}

impl LinkHealth {
    pub fn state(&self) -> LinkState {
        self.state
    }

    /// 窗口内累计的错误数
    pub fn err_count(&self) -> u32 {
        self.err_count
    }

    pub fn is_lost(&self, slave: usize) -> bool {
        self.lost.get(slave).copied().unwrap_or(false)
    }

    /// 进入 OPERATIONAL
    pub(crate) fn mark_operational(&mut self, slave_count: usize) {
        self.state = LinkState::Operational;
        self.lost = vec![false; slave_count];
        self.err_count = 0;
        self.err_iteration_count = 0;
        self.do_check_state = false;
    }

    /// 检查并尝试恢复从站
    pub(crate) fn check<M: EthercatMaster>(
        &mut self,
        master: &mut M,
        wkc: i32,
        expected_wkc: i32,
        metrics: &BusMetrics,
    ) {
        if self.err_iteration_count > ERR_PERIOD {
            self.err_iteration_count = 0;
            self.err_count = 0;
        }
        if self.err_count > ERR_MAX {
            error!("EtherCAT connection degraded!");
        }
        self.err_iteration_count += 1;

        if !self.state.is_up() || !(wkc < expected_wkc || self.do_check_state) {
            return;
        }

        self.do_check_state = false;
        master.read_state();

        let slave_count = master.slave_count();
        if self.lost.len() < slave_count {
            self.lost.resize(slave_count, false);
        }

        for slave in 0..slave_count {
            let state = master.slave_status(slave).state;
            if !state.is_operational() {
                self.do_check_state = true;
                self.recover_not_operational(master, slave, state, metrics);
            }
            if self.lost[slave] {
                self.recover_lost(master, slave, metrics);
            }
        }

        if self.do_check_state {
            self.state = LinkState::Degraded;
        } else {
            info!("EtherCAT Status: All slaves resumed OPERATIONAL.");
            self.state = LinkState::Operational;
        }
    }

    fn recover_not_operational<M: EthercatMaster>(
        &mut self,
        master: &mut M,
        slave: usize,
        state: AlState,
        metrics: &BusMetrics,
    ) {
        if state == AlState::SAFE_OP.with(AlState::ERROR) {
            error!(
                "EtherCAT Error: Slave {} is in SAFE_OP + ERROR, attempting ack.",
                slave
            );
            if let Err(e) = master.write_state(Some(slave), AlState::SAFE_OP.with(AlState::ACK)) {
                error!("EtherCAT Error: Slave {} ack failed: {}", slave, e);
            }
            self.err_count += 1;
        } else if state == AlState::SAFE_OP {
            info!(
                "EtherCAT Status: Slave {} is in SAFE_OP, change to OPERATIONAL.",
                slave
            );
            if let Err(e) = master.write_state(Some(slave), AlState::OPERATIONAL) {
                error!("EtherCAT Error: Slave {} state request failed: {}", slave, e);
            }
            self.err_count += 1;
        } else if !state.is_none() {
            if master.reconfig_slave(slave, TIMEOUT_MON) {
                self.lost[slave] = false;
                metrics.recoveries.fetch_add(1, Ordering::Relaxed);
                info!("EtherCAT Status: Slave {} reconfigured", slave);
            }
        } else if !self.lost[slave] {
            let rechecked = master.state_check(Some(slave), AlState::OPERATIONAL, TIMEOUT_RET);
            if rechecked.is_none() {
                self.lost[slave] = true;
                error!("EtherCAT Error: Slave {} lost", slave);
                self.err_count += 1;
            }
        }
    }

    fn recover_lost<M: EthercatMaster>(&mut self, master: &mut M, slave: usize, metrics: &BusMetrics) {
        if master.slave_status(slave).state.is_none() {
            if master.recover_slave(slave, TIMEOUT_MON) {
                self.lost[slave] = false;
                metrics.recoveries.fetch_add(1, Ordering::Relaxed);
                info!("EtherCAT Status: Slave {} recovered", slave);
            }
        } else {
            self.lost[slave] = false;
            info!("EtherCAT Status: Slave {} found", slave);
        }
    }
}
