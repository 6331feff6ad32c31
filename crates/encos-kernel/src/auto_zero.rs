//! 关节自动归零
//!
//! 归零按组依次进行，每组经历两个等长阶段：
//!
//! 1. 施加力矩：组内关节切到力矩模式并施加小力矩，推到机械限位，同时记录当前位置为限位位置
//! 2. 回零：切到位置模式，目标为 `限位位置 - 对应一侧的限位值`，阶段结束时把当前位置设为零点
//!
//! 最后一组完成后进入 `Finished`，所有参与归零的关节保持在零点。

use crate::config::AutoZeroConfig;
use crate::error::KernelError;
use encos_driver::{EncosJoint, JointMode};
use encos_protocol::RAD_TO_DEG;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, warn};

/// 归零状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ZeroState {
    #[default]
    Waiting,
    ApplyingTorque,
    Resetting,
    Finished,
    Stopped,
}

#[derive(Debug)]
struct ZeroMember {
    joint: Arc<EncosJoint>,
    lower_limit: f32,
    upper_limit: f32,
    reset_torque: f32,
    reset_velocity: f32,
    /// 施加力矩阶段最后记录的位置
    edge_position: f32,
}

#[derive(Debug)]
struct ZeroGroup {
    /// 每个阶段的周期数
    cycles: u64,
    members: Vec<ZeroMember>,
}

/// 自动归零协调器
#[derive(Debug)]
pub struct AutoZero {
    /// 参与归零的全部关节（按配置顺序，可能重复）
    joints: Vec<Arc<EncosJoint>>,
    groups: Vec<ZeroGroup>,
    state: ZeroState,
    group: usize,
    deadline: u64,
}

impl AutoZero {
    /// 由配置构建；阶段周期数 = 持续时间 / 控制周期
    ///
    /// # Errors
    /// - `KernelError::UnknownJoint`: 成员名在 `joints` 中不存在
    pub fn new(
        config: &AutoZeroConfig,
        period: Duration,
        joints: &[Arc<EncosJoint>],
    ) -> Result<Self, KernelError> {
        let period_s = period.as_secs_f64();
        let mut all = Vec::new();
        let mut groups = Vec::with_capacity(config.groups.len());

        for group in &config.groups {
            let mut members = Vec::with_capacity(group.members.len());
            for member in &group.members {
                let Some(joint) = joints.iter().find(|j| j.name() == member.name) else {
                    error!("JointAutoZero: joint {} not found", member.name);
                    return Err(KernelError::UnknownJoint(member.name.clone()));
                };
                all.push(joint.clone());
                members.push(ZeroMember {
                    joint: joint.clone(),
                    lower_limit: member.lower_limit,
                    upper_limit: member.upper_limit,
                    reset_torque: member.reset_torque,
                    reset_velocity: member.reset_velocity,
                    edge_position: 0.0,
                });
            }

            let cycles = if period_s > 0.0 {
                (group.duration_s / period_s).round().max(0.0) as u64
            } else {
                0
            };
            groups.push(ZeroGroup { cycles, members });
        }

        Ok(Self {
            joints: all,
            groups,
            state: ZeroState::Waiting,
            group: 0,
            deadline: 0,
        })
    }

    pub fn state(&self) -> ZeroState {
        self.state
    }

    /// 当前组序号
    pub fn group(&self) -> usize {
        self.group
    }

    pub fn group_count(&self) -> usize {
        self.groups.len()
    }

    /// 开始归零，只能从 `Waiting` 或 `Stopped` 开始
    pub fn start_reset(&mut self, cycle: u64) -> bool {
        if !matches!(self.state, ZeroState::Waiting | ZeroState::Stopped) {
            return false;
        }
        let Some(first) = self.groups.first() else {
            warn!("JointAutoZero: no reset group configured");
            return false;
        };

        self.state = ZeroState::ApplyingTorque;
        self.group = 0;
        self.deadline = cycle + first.cycles;
        info!("JointAutoZero: Applying constant torque in group 0");
        self.release_all();
        true
    }

    /// 停止归零；未开始、已完成或已停止时返回 `false`
    pub fn stop_reset(&mut self) -> bool {
        match self.state {
            ZeroState::Waiting | ZeroState::Finished => {
                info!("JointAutoZero: reset not start or finished");
                false
            },
            ZeroState::Stopped => {
                info!("JointAutoZero: reset already stopped");
                false
            },
            ZeroState::ApplyingTorque | ZeroState::Resetting => {
                self.state = ZeroState::Stopped;
                info!("JointAutoZero: reset stopped!");
                self.release_all();
                true
            },
        }
    }

    /// 每个周期调用一次：先处理阶段切换，再执行当前状态的动作
    pub fn tick(&mut self, cycle: u64) {
        match self.state {
            ZeroState::ApplyingTorque if cycle >= self.deadline => {
                self.state = ZeroState::Resetting;
                self.deadline = cycle + self.groups[self.group].cycles;
                self.release_all();
                info!("JointAutoZero: resetting zero for group {}", self.group);
            },
            ZeroState::Resetting if cycle >= self.deadline => {
                self.set_zero();
                if self.group + 1 >= self.groups.len() {
                    self.state = ZeroState::Finished;
                    info!("JointAutoZero: resetting zero finished");
                } else {
                    self.group += 1;
                    self.state = ZeroState::ApplyingTorque;
                    self.deadline = cycle + self.groups[self.group].cycles;
                    info!(
                        "JointAutoZero: Applying constant torque in group {}",
                        self.group
                    );
                }
            },
            _ => {},
        }

        match self.state {
            ZeroState::ApplyingTorque => self.apply_torque(),
            ZeroState::Resetting => self.goto_zero(),
            ZeroState::Finished => self.keep_zero(),
            ZeroState::Waiting | ZeroState::Stopped => self.release_all(),
        }
    }

    fn apply_torque(&mut self) {
        for member in &mut self.groups[self.group].members {
            member.joint.set_mode(JointMode::Torque);
            member.joint.set_target_torque(member.reset_torque);
            member.edge_position = member.joint.actual_position();
        }
    }

    fn goto_zero(&self) {
        for member in &self.groups[self.group].members {
            member.joint.set_mode(JointMode::Position);
            let limit = if member.reset_torque > 0.0 {
                member.upper_limit
            } else {
                member.lower_limit
            };
            member.joint.set_target_position(
                member.edge_position - limit,
                member.reset_velocity,
                0.0,
            );
        }
    }

    fn set_zero(&self) {
        for member in &self.groups[self.group].members {
            info!(
                "JointAutoZero: joint {} zero point error= {}",
                member.joint.name(),
                member.joint.actual_position() * RAD_TO_DEG
            );
            member.joint.reset_motor_position();
        }
    }

    fn keep_zero(&self) {
        for joint in &self.joints {
            joint.set_mode(JointMode::Position);
            joint.set_target_position(0.0, 0.0, 0.0);
        }
    }

    fn release_all(&self) {
        for joint in &self.joints {
            joint.set_mode(JointMode::Torque);
            joint.set_target_torque(0.0);
        }
    }
}
