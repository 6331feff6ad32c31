//! Encos 关节电机
//!
//! [`EncosJoint`] 同时被宿主线程（设置目标量、读取反馈）与周期线程（`write_bus` / `read_bus`）
//! 访问，内部全部是原子变量，通过 `Arc` 共享。
//!
//! # 指令仲裁
//!
//! 每个关节同一时刻只挂起一种待发送指令（[`CommandKind`]）。零点设置与参数设置属于高优先级指令：
//! 它们会置位一个单周期锁存，锁存期间普通的目标量设置只更新数值，不会覆盖挂起的指令。
//! 锁存在每次 `write_bus` 开始时清除。

use crate::config::{ActuatorConfig, PositionEncoding};
use crate::device::CanBusDevice;
use crate::mode::{AtomicCommandKind, AtomicJointMode, CommandKind, JointMode};
use crate::state::{JointRuntime, LogThrottle};
use encos_protocol::{
    BROADCAST_ID, CanFrame, ConfigCommand, ConfigReply, ConfigReplyCode, CurrentTorqueCommand,
    FeedbackRanges, MotionControlCommand, MotionLimits, MotorErrorCode, MotorFeedback,
    MotorResponse, PositionControlCommand, SettingsCommand, ValueRange, VelocityControlCommand,
    disabled_frame,
};
use smallvec::{SmallVec, smallvec};
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 零点设置后保持静默的周期数
pub const ZERO_QUIESCENT_CYCLES: u32 = 500;

/// 加速度设置范围（rad/s²）
const SETTINGS_ACCELERATION_RANGE: ValueRange = ValueRange {
    min: 0.0,
    max: 20.0,
};

/// 补偿系数与反馈增益的设置范围
const SETTINGS_UNIT_RANGE: ValueRange = ValueRange { min: 0.0, max: 1.0 };

/// Encos 关节电机
#[derive(Debug)]
pub struct EncosJoint {
    config: ActuatorConfig,
    runtime: JointRuntime,
    mode: AtomicJointMode,
    command: AtomicCommandKind,
    /// 高优先级指令锁存
    high_priority_writing: AtomicBool,
    power_on: AtomicBool,
    /// 零点设置后剩余的静默周期
    config_wait: AtomicU32,
    zero_ack_log: LogThrottle,
}

impl EncosJoint {
    /// 按配置创建关节，并应用配置中的模式与 Kp / Kd
    pub fn new(config: ActuatorConfig) -> Self {
        let joint = Self {
            runtime: JointRuntime::default(),
            mode: AtomicJointMode::new(JointMode::default()),
            command: AtomicCommandKind::new(CommandKind::default()),
            high_priority_writing: AtomicBool::new(false),
            power_on: AtomicBool::new(false),
            config_wait: AtomicU32::new(0),
            zero_ack_log: LogThrottle::new(Duration::from_millis(1000)),
            config,
        };

        joint.runtime.current_limit.store(joint.config.current.max);
        joint.set_mode(joint.config.mode);
        joint.set_motion_kp(joint.config.initial_kp);
        joint.set_motion_kd(joint.config.initial_kd);
        joint
    }

    pub fn config(&self) -> &ActuatorConfig {
        &self.config
    }

    pub fn id(&self) -> u32 {
        self.config.id
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 当前挂起的指令
    pub fn pending_command(&self) -> CommandKind {
        self.command.get(Ordering::Acquire)
    }

    /// 剩余的零点静默周期
    pub fn quiescent_cycles(&self) -> u32 {
        self.config_wait.load(Ordering::Relaxed)
    }

    fn latched(&self) -> bool {
        self.high_priority_writing.load(Ordering::Acquire)
    }

    /// 锁存未置位时挂起 `kind`
    fn arm(&self, kind: CommandKind) {
        if !self.latched() {
            self.command.set(kind, Ordering::Release);
        }
    }

    /// 挂起高优先级指令并置位锁存
    fn arm_high_priority(&self, kind: CommandKind) {
        self.command.set(kind, Ordering::Release);
        self.high_priority_writing.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // 模式
    // ------------------------------------------------------------------------

    pub fn set_mode(&self, mode: JointMode) {
        self.mode.set(mode, Ordering::Release);
        self.arm(mode.control_command());
    }

    pub fn mode(&self) -> JointMode {
        self.mode.get(Ordering::Acquire)
    }

    // ------------------------------------------------------------------------
    // 目标量
    // ------------------------------------------------------------------------

    /// 设置目标位置（rad）
    ///
    /// 位置模式下同时设置运动速度与电流限幅（传 0 表示取上限）；运控模式下只更新位置。
    pub fn set_target_position(&self, position: f32, velocity: f32, current_limit: f32) {
        let cfg = &self.config;
        match self.mode() {
            JointMode::Position => {
                self.runtime.target_position.store(cfg.position.clamp(position));
                let velocity = if velocity == 0.0 {
                    cfg.velocity.max
                } else {
                    cfg.velocity.clamp(velocity)
                };
                self.runtime.target_velocity.store(velocity);
                self.store_current_limit(current_limit);
                self.arm(CommandKind::PositionControl);
            },
            JointMode::Motion => {
                self.runtime.target_position.store(cfg.position.clamp(position));
                self.arm(CommandKind::MotionControl);
            },
            _ => error!(
                "Motor ID: {} is not in position mode or motion mode, command will be ignored!",
                cfg.id
            ),
        }
    }

    /// 设置目标速度（rad/s）
    pub fn set_target_velocity(&self, velocity: f32, current_limit: f32) {
        let cfg = &self.config;
        match self.mode() {
            JointMode::Velocity => {
                self.runtime.target_velocity.store(cfg.velocity.clamp(velocity));
                self.store_current_limit(current_limit);
                self.arm(CommandKind::VelocityControl);
            },
            JointMode::Motion => {
                self.runtime.target_velocity.store(cfg.velocity.clamp(velocity));
                self.arm(CommandKind::MotionControl);
            },
            _ => error!(
                "Motor ID: {} is not in velocity mode or motion mode, command will be ignored!",
                cfg.id
            ),
        }
    }

    /// 设置目标力矩（N·m）
    pub fn set_target_torque(&self, torque: f32) {
        let cfg = &self.config;
        match self.mode() {
            mode @ (JointMode::Torque | JointMode::Motion) => {
                self.runtime.target_torque.store(cfg.torque.clamp(torque));
                self.arm(mode.control_command());
            },
            _ => error!(
                "Motor ID: {} is not in torque mode or motion mode, command will be ignored!",
                cfg.id
            ),
        }
    }

    /// 同时设置运控模式的位置、速度与前馈力矩
    pub fn set_target_motion(&self, position: f32, velocity: f32, torque: f32) {
        let cfg = &self.config;
        if self.mode() != JointMode::Motion {
            error!(
                "Motor ID: {} is not in motion mode, command will be ignored!",
                cfg.id
            );
            return;
        }
        self.runtime.target_position.store(cfg.position.clamp(position));
        self.runtime.target_velocity.store(cfg.velocity.clamp(velocity));
        self.runtime.target_torque.store(cfg.torque.clamp(torque));
        self.arm(CommandKind::MotionControl);
    }

    /// 设置目标电流（A），任何模式下都会切换到电流控制帧
    pub fn set_target_current(&self, current: f32) {
        self.runtime
            .target_current
            .store(self.config.current.clamp(current));
        self.arm(CommandKind::CurrentControl);
    }

    fn store_current_limit(&self, current_limit: f32) {
        let limit = if current_limit == 0.0 {
            self.config.current.max
        } else {
            self.config.current.clamp(current_limit)
        };
        self.runtime.current_limit.store(limit);
    }

    pub fn target_position(&self) -> f32 {
        self.runtime.target_position.load()
    }

    pub fn target_velocity(&self) -> f32 {
        self.runtime.target_velocity.load()
    }

    pub fn target_torque(&self) -> f32 {
        self.runtime.target_torque.load()
    }

    pub fn target_current(&self) -> f32 {
        self.runtime.target_current.load()
    }

    /// 位置 / 速度模式下生效的电流限幅
    pub fn current_limit(&self) -> f32 {
        self.runtime.current_limit.load()
    }

    pub fn set_motion_kp(&self, kp: f32) {
        self.runtime.kp.store(self.config.kp.clamp(kp));
    }

    pub fn set_motion_kd(&self, kd: f32) {
        self.runtime.kd.store(self.config.kd.clamp(kd));
    }

    pub fn motion_kp(&self) -> f32 {
        self.runtime.kp.load()
    }

    pub fn motion_kd(&self) -> f32 {
        self.runtime.kd.load()
    }

    // ------------------------------------------------------------------------
    // 反馈
    // ------------------------------------------------------------------------

    pub fn actual_position(&self) -> f32 {
        self.runtime.current_position.load()
    }

    pub fn actual_velocity(&self) -> f32 {
        self.runtime.current_velocity.load()
    }

    pub fn actual_current(&self) -> f32 {
        self.runtime.current_current.load()
    }

    /// 电流 × 力矩常数
    pub fn actual_torque(&self) -> f32 {
        self.runtime.current_current.load() * self.config.torque_constant
    }

    /// (电机温度, 驱动器温度)，单位 ℃
    pub fn motor_temperature(&self) -> (f32, f32) {
        (
            self.runtime.motor_temperature.load(),
            self.runtime.driver_temperature.load(),
        )
    }

    // ------------------------------------------------------------------------
    // 一次性指令
    // ------------------------------------------------------------------------

    /// 将当前位置设为零点
    pub fn reset_motor_position(&self) {
        self.arm_high_priority(CommandKind::SetZero);
    }

    /// 查询电机通信模式，应答由 `read_bus` 记录
    pub fn read_comm_mode(&self) {
        self.arm(CommandKind::ReadCommMode);
    }

    /// 查询总线上的电机 ID
    pub fn read_can_id(&self) {
        self.arm(CommandKind::ReadCanId);
    }

    /// 设置加速度（0~20 rad/s²）
    pub fn set_acceleration(&self, acceleration: f32) {
        self.runtime
            .settings_acceleration
            .store(SETTINGS_ACCELERATION_RANGE.clamp(acceleration));
        self.arm_high_priority(CommandKind::SettingsAcceleration);
    }

    /// 设置磁链补偿增益与速度环扰动补偿系数（0~1）
    pub fn set_link_compensation(&self, link_gain: f32, disturbance_comp: f32) {
        self.runtime
            .settings_link_gain
            .store(SETTINGS_UNIT_RANGE.clamp(link_gain));
        self.runtime
            .settings_disturbance_comp
            .store(SETTINGS_UNIT_RANGE.clamp(disturbance_comp));
        self.arm_high_priority(CommandKind::SettingsLinkCompensation);
    }

    /// 设置反馈 Kp / Kd（0~1）
    pub fn set_feedback_gains(&self, kp: f32, kd: f32) {
        self.runtime
            .settings_feedback_kp
            .store(SETTINGS_UNIT_RANGE.clamp(kp));
        self.runtime
            .settings_feedback_kd
            .store(SETTINGS_UNIT_RANGE.clamp(kd));
        self.arm_high_priority(CommandKind::SettingsFeedbackGains);
    }

    // ------------------------------------------------------------------------
    // 上电
    // ------------------------------------------------------------------------

    pub fn is_enable(&self) -> bool {
        self.config.enable
    }

    pub fn is_power_on(&self) -> bool {
        self.power_on.load(Ordering::Acquire)
    }

    /// 上电：目标位置取当前位置，其余目标量清零；返回是否已上电
    pub fn power_on(&self) -> bool {
        let powered = self.config.enable;
        self.power_on.store(powered, Ordering::Release);
        self.runtime
            .target_position
            .store(self.runtime.current_position.load());
        self.runtime.target_velocity.store(0.0);
        self.runtime.target_torque.store(0.0);
        self.runtime.target_current.store(0.0);
        powered
    }

    pub fn power_off(&self) -> bool {
        self.power_on.store(false, Ordering::Release);
        true
    }

    // ------------------------------------------------------------------------
    // 总线读写（周期线程）
    // ------------------------------------------------------------------------

    /// 生成本周期要发送的帧
    pub fn write_bus(&self) -> CanFrame {
        self.high_priority_writing.store(false, Ordering::Release);

        let remaining = self.config_wait.load(Ordering::Relaxed);
        if remaining > 0 {
            self.config_wait.store(remaining - 1, Ordering::Relaxed);
            return CanFrame::empty(self.config.id);
        }

        let kind = self.command.get(Ordering::Acquire);
        let energized = self.config.enable && self.is_power_on();
        let frame = if energized {
            self.encode(kind)
        } else {
            if kind.is_one_shot() {
                warn!(
                    "Motor ID: {} is powered off, dropped {:?} command",
                    self.config.id, kind
                );
            }
            disabled_frame(self.config.id)
        };

        if kind.is_one_shot() {
            let fallback = self.mode().control_command();
            // 发送期间宿主线程可能已挂起新指令，此时保留新指令
            self.command
                .compare_exchange(kind, fallback, Ordering::AcqRel, Ordering::Relaxed);
        }

        if energized && kind == CommandKind::SetZero {
            self.config_wait
                .store(ZERO_QUIESCENT_CYCLES, Ordering::Relaxed);
            self.runtime.target_torque.store(0.0);
            self.runtime.target_velocity.store(0.0);
            self.runtime.target_position.store(0.0);
            debug!("Motor ID: {} zero command sent", self.config.id);
        }

        frame
    }

    fn encode(&self, kind: CommandKind) -> CanFrame {
        let cfg = &self.config;
        let id = cfg.id;
        let rt = &self.runtime;

        match kind {
            CommandKind::MotionControl => MotionControlCommand {
                motor_id: id,
                kp: rt.kp.load(),
                kd: rt.kd.load(),
                position: rt.target_position.load() * cfg.direction,
                velocity: rt.target_velocity.load() * cfg.direction,
                torque: rt.target_torque.load() * cfg.direction,
            }
            .to_frame(&self.motion_limits()),
            CommandKind::PositionControl => {
                let command = PositionControlCommand {
                    motor_id: id,
                    position: rt.target_position.load() * cfg.direction,
                    velocity: rt.target_velocity.load(),
                    current_limit: rt.current_limit.load(),
                };
                match cfg.position_encoding {
                    PositionEncoding::Native => command.to_frame(),
                    PositionEncoding::Quantized => command.to_quantized_frame(&cfg.position),
                }
            },
            CommandKind::VelocityControl => VelocityControlCommand {
                motor_id: id,
                velocity: rt.target_velocity.load() * cfg.direction,
                current_limit: rt.current_limit.load(),
            }
            .to_frame(),
            CommandKind::TorqueControl => {
                CurrentTorqueCommand::torque(id, rt.target_torque.load()).to_frame()
            },
            CommandKind::CurrentControl => {
                CurrentTorqueCommand::current(id, rt.target_current.load()).to_frame()
            },
            CommandKind::SetZero => ConfigCommand::SetZero.to_frame(id),
            CommandKind::ReadCommMode => ConfigCommand::ReadCommMode.to_frame(id),
            CommandKind::ReadCanId => ConfigCommand::ReadCanId.to_frame(id),
            CommandKind::SettingsAcceleration => {
                SettingsCommand::Acceleration(rt.settings_acceleration.load()).to_frame(id)
            },
            CommandKind::SettingsLinkCompensation => SettingsCommand::LinkCompensation {
                linkage: rt.settings_link_gain.load(),
                speed_ki: rt.settings_disturbance_comp.load(),
            }
            .to_frame(id),
            CommandKind::SettingsFeedbackGains => SettingsCommand::FeedbackGains {
                kp: rt.settings_feedback_kp.load(),
                kd: rt.settings_feedback_kd.load(),
            }
            .to_frame(id),
        }
    }

    fn motion_limits(&self) -> MotionLimits {
        let cfg = &self.config;
        MotionLimits {
            kp: cfg.kp,
            kd: cfg.kd,
            position: cfg.position,
            velocity: cfg.velocity,
            torque: cfg.torque,
        }
    }

    /// 处理一帧来自总线的数据
    pub fn read_bus(&self, frame: &CanFrame) {
        if frame.dlc == 0 {
            return;
        }

        if frame.id == self.config.id {
            self.handle_response(frame);
        } else if frame.id == BROADCAST_ID {
            self.handle_config_reply(frame);
        } else {
            trace!(
                "Motor ID: {} ignored frame from CAN ID 0x{:X}",
                self.config.id, frame.id
            );
        }
    }

    fn handle_response(&self, frame: &CanFrame) {
        let cfg = &self.config;
        let ranges = FeedbackRanges {
            position: cfg.position,
            velocity: cfg.velocity,
            current: cfg.current,
        };
        let response = match MotorResponse::parse(frame, &ranges) {
            Ok(response) => response,
            Err(e) => {
                warn!("Motor ID: {} received malformed reply: {}", cfg.id, e);
                return;
            },
        };

        self.log_error_code(response.error_code);

        let rt = &self.runtime;
        match response.feedback {
            MotorFeedback::Quantized {
                position,
                velocity,
                current,
                motor_temperature,
                driver_temperature,
            } => {
                rt.current_position.store(position * cfg.direction);
                rt.current_velocity.store(velocity * cfg.direction);
                rt.current_current.store(current);
                rt.motor_temperature.store(motor_temperature);
                rt.driver_temperature.store(driver_temperature);
            },
            MotorFeedback::Position {
                position,
                current,
                motor_temperature,
            } => {
                rt.current_position.store(position * cfg.direction);
                rt.current_velocity.store(0.0);
                rt.current_current.store(current);
                rt.motor_temperature.store(motor_temperature);
                rt.driver_temperature.store(0.0);
            },
            MotorFeedback::Velocity {
                velocity,
                current,
                motor_temperature,
            } => {
                rt.current_position.store(0.0);
                rt.current_velocity.store(velocity * cfg.direction);
                rt.current_current.store(current);
                rt.motor_temperature.store(motor_temperature);
                rt.driver_temperature.store(0.0);
            },
            MotorFeedback::SettingsAck { command, success } => {
                if success {
                    info!("Motor ID: {} set command {} succeed.", cfg.id, command);
                } else {
                    error!("Motor ID: {} set command {} failed.", cfg.id, command);
                }
            },
            MotorFeedback::Unsupported { .. } => {},
        }
    }

    fn log_error_code(&self, code: MotorErrorCode) {
        if let Some(description) = code.description() {
            error!(
                "Motor ID: {} receive error code: 0x{:02X}, {}.",
                self.config.id,
                code.raw(),
                description
            );
        }
    }

    fn handle_config_reply(&self, frame: &CanFrame) {
        let Some(reply) = ConfigReply::parse(frame) else {
            return;
        };
        let own_id = self.config.id;

        match reply {
            ConfigReply::Online { motor_id } => {
                if u32::from(motor_id) == own_id {
                    info!("Motor ID: {} is online.", motor_id);
                }
            },
            ConfigReply::InquiryFailed => {},
            ConfigReply::IdReset => warn!(
                "Motor ID: {} is set to 1, resetting motor ids through this driver is strongly not recommended!",
                own_id
            ),
            ConfigReply::Status { motor_id, code } => {
                if u32::from(motor_id) != own_id {
                    return;
                }
                match code {
                    ConfigReplyCode::AutoReplyMode => warn!(
                        "Motor ID: {} is set in auto reply mode, however auto reply mode is strongly not recommended!",
                        motor_id
                    ),
                    ConfigReplyCode::QueryReplyMode => {
                        info!("Motor ID: {} is set in query reply mode.", motor_id)
                    },
                    ConfigReplyCode::QueryFailed => {
                        error!("Motor ID: {} receive code: 0x80, query failed.", motor_id)
                    },
                    ConfigReplyCode::ZeroSet => {
                        if self.zero_ack_log.hit() {
                            info!("Motor ID: {} sets current position as zero.", motor_id);
                        }
                    },
                    ConfigReplyCode::IdUpdated => info!(
                        "Motor ID: {} has been updated, remember to update the id in the configuration file!",
                        motor_id
                    ),
                    ConfigReplyCode::CommandFailed => {
                        error!("Motor ID: {} receive code: 0x00, command failed.", motor_id)
                    },
                    ConfigReplyCode::Unknown(raw) => error!(
                        "Motor ID: {} receive unknown command: {}",
                        motor_id, raw
                    ),
                }
            },
        }
    }
}

impl CanBusDevice for EncosJoint {
    fn id(&self) -> u32 {
        self.config.id
    }

    fn name(&self) -> &str {
        &self.config.name
    }

    fn slave_id(&self) -> usize {
        self.config.slave_id
    }

    fn can_ids(&self) -> SmallVec<[u32; 2]> {
        smallvec![self.config.id, BROADCAST_ID]
    }

    fn write_bus(&self) -> CanFrame {
        EncosJoint::write_bus(self)
    }

    fn read_bus(&self, frame: &CanFrame) {
        EncosJoint::read_bus(self, frame)
    }

    fn has_power_cfg(&self) -> bool {
        self.config.enable
    }

    fn power_on(&self) -> bool {
        EncosJoint::power_on(self)
    }

    fn power_off(&self) -> bool {
        EncosJoint::power_off(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::JointConfig;
    use encos_protocol::{HEADER_POSITION, RAD_TO_DEG};
    use parking_lot::Mutex;
    use proptest::prelude::*;
    use std::io;
    use std::sync::Arc;

    fn joint_with(mode: &str, direction: i32) -> EncosJoint {
        let cfg = JointConfig {
            mode: mode.to_string(),
            enable: true,
            motor_direction: direction,
            pos_range: 12.5,
            vel_range: 18.0,
            torque_range: 30.0,
            current_range: 20.0,
            torque_constant: 2.0,
            ..JointConfig::default()
        };
        EncosJoint::new(ActuatorConfig::from_joint_config(3, "knee", &cfg).unwrap())
    }

    fn powered(mode: &str) -> EncosJoint {
        let joint = joint_with(mode, 1);
        assert!(joint.power_on());
        joint
    }

    #[derive(Clone, Default)]
    struct LogCapture(Arc<Mutex<Vec<u8>>>);

    impl io::Write for LogCapture {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    fn capture_logs(f: impl FnOnce()) -> String {
        let capture = LogCapture::default();
        let writer = capture.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_ansi(false)
            .with_max_level(tracing::Level::TRACE)
            .finish();
        tracing::subscriber::with_default(subscriber, f);
        let bytes = capture.0.lock();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn targets(joint: &EncosJoint) -> [f32; 5] {
        [
            joint.target_position(),
            joint.target_velocity(),
            joint.target_torque(),
            joint.target_current(),
            joint.current_limit(),
        ]
    }

    #[test]
    fn test_initial_state_follows_config() {
        let joint = joint_with("velocity", 1);
        assert_eq!(joint.mode(), JointMode::Velocity);
        assert_eq!(joint.pending_command(), CommandKind::VelocityControl);
        assert_eq!(joint.current_limit(), 20.0);
        assert!(!joint.is_power_on());
    }

    #[test]
    fn test_position_gating() {
        let joint = joint_with("torque", 1);
        joint.set_target_position(1.0, 0.0, 0.0);
        assert_eq!(joint.target_position(), 0.0);
        assert_eq!(joint.pending_command(), CommandKind::TorqueControl);

        joint.set_mode(JointMode::Position);
        joint.set_target_position(100.0, 0.0, 0.0);
        assert_eq!(joint.target_position(), 12.5);
        // 0 表示取上限
        assert_eq!(joint.target_velocity(), 18.0);
        assert_eq!(joint.current_limit(), 20.0);

        joint.set_target_position(1.0, 2.0, 5.0);
        assert_eq!(joint.target_velocity(), 2.0);
        assert_eq!(joint.current_limit(), 5.0);
    }

    #[test]
    fn test_motion_mode_position_only() {
        let joint = joint_with("motion", 1);
        joint.set_target_position(1.0, 3.0, 4.0);
        assert_eq!(joint.target_position(), 1.0);
        assert_eq!(joint.target_velocity(), 0.0);
        assert_eq!(joint.current_limit(), 20.0);
        assert_eq!(joint.pending_command(), CommandKind::MotionControl);
    }

    #[test]
    fn test_velocity_and_torque_gating() {
        let joint = joint_with("position", 1);
        joint.set_target_velocity(1.0, 0.0);
        joint.set_target_torque(1.0);
        joint.set_target_motion(1.0, 1.0, 1.0);
        assert_eq!(joint.target_velocity(), 0.0);
        assert_eq!(joint.target_torque(), 0.0);
        assert_eq!(joint.pending_command(), CommandKind::PositionControl);

        joint.set_mode(JointMode::Torque);
        joint.set_target_torque(-99.0);
        assert_eq!(joint.target_torque(), -30.0);
        assert_eq!(joint.pending_command(), CommandKind::TorqueControl);
    }

    #[test]
    fn test_set_target_motion_stores_all() {
        let joint = joint_with("motion", 1);
        joint.set_target_motion(0.5, -1.5, f32::INFINITY);
        assert_eq!(joint.target_position(), 0.5);
        assert_eq!(joint.target_velocity(), -1.5);
        assert_eq!(joint.target_torque(), 30.0);
    }

    #[test]
    fn test_target_current_any_mode() {
        let joint = joint_with("position", 1);
        joint.set_target_current(-50.0);
        assert_eq!(joint.target_current(), -20.0);
        assert_eq!(joint.pending_command(), CommandKind::CurrentControl);
    }

    #[test]
    fn test_unpowered_control_frame_is_disabled() {
        let joint = joint_with("torque", 1);
        joint.set_target_torque(5.0);
        let frame = joint.write_bus();
        assert_eq!(frame.data_slice(), &[0x61, 0x00, 0x00]);

        joint.power_on();
        joint.set_target_torque(5.0);
        let frame = joint.write_bus();
        assert_eq!(frame.data_slice(), &[0x65, 0x01, 0xF4]);

        joint.power_off();
        assert_eq!(joint.write_bus().data_slice(), &[0x61, 0x00, 0x00]);
    }

    #[test]
    fn test_torque_and_current_frames_ignore_direction() {
        let joint = joint_with("torque", -1);
        assert!(joint.power_on());
        joint.set_target_torque(1.0);
        assert_eq!(joint.write_bus().data_slice(), &[0x65, 0x00, 0x64]);

        joint.set_target_current(1.0);
        assert_eq!(joint.write_bus().data_slice(), &[0x61, 0x00, 0x64]);
    }

    #[test]
    fn test_powered_off_set_zero_sends_disabled_frame() {
        let joint = joint_with("position", 1);
        joint.reset_motor_position();
        let frame = joint.write_bus();
        assert_eq!(frame.id, 3);
        assert_eq!(frame.data_slice(), &[0x61, 0x00, 0x00]);
        // 未发出的零点指令被丢弃，不进入静默窗口
        assert_eq!(joint.pending_command(), CommandKind::PositionControl);
        assert_eq!(joint.quiescent_cycles(), 0);

        joint.set_acceleration(5.0);
        joint.read_can_id();
        let frame = joint.write_bus();
        assert_eq!(frame.id, 3);
        assert_eq!(frame.data_slice(), &[0x61, 0x00, 0x00]);

        // 上电后不会补发
        assert!(joint.power_on());
        assert_eq!(joint.write_bus().data[0] & 0xE0, HEADER_POSITION);
    }

    #[test]
    fn test_gated_setters_leave_state_untouched() {
        let cases: [(&str, &[&str]); 3] = [
            ("position", &["velocity", "torque", "motion"]),
            ("velocity", &["position", "torque", "motion"]),
            ("torque", &["position", "velocity", "motion"]),
        ];
        for (mode, rejected) in cases {
            for setter in rejected {
                let joint = joint_with(mode, 1);
                let before = targets(&joint);
                let pending = joint.pending_command();
                let logs = capture_logs(|| match *setter {
                    "position" => joint.set_target_position(1.0, 1.0, 1.0),
                    "velocity" => joint.set_target_velocity(1.0, 1.0),
                    "torque" => joint.set_target_torque(1.0),
                    _ => joint.set_target_motion(1.0, 1.0, 1.0),
                });
                assert_eq!(targets(&joint), before, "{mode} mode, {setter} setter");
                assert_eq!(joint.pending_command(), pending);
                assert!(!joint.latched());
                assert!(logs.contains("ERROR"), "{mode}/{setter}: {logs}");
                assert!(logs.contains("command will be ignored"), "{logs}");
            }
        }

        // 锁存中的零点指令同样不受影响
        let joint = powered("torque");
        joint.reset_motor_position();
        joint.set_target_velocity(1.0, 1.0);
        assert_eq!(joint.pending_command(), CommandKind::SetZero);
        assert!(joint.latched());
    }

    #[test]
    fn test_disabled_joint_never_powers_on() {
        let cfg = JointConfig {
            enable: false,
            ..JointConfig::default()
        };
        let joint = EncosJoint::new(ActuatorConfig::from_joint_config(1, "hip", &cfg).unwrap());
        assert!(!joint.power_on());
        assert!(!joint.has_power_cfg());
        assert!(joint.power_off());
    }

    #[test]
    fn test_power_on_holds_current_position() {
        let joint = joint_with("position", 1);
        joint.runtime.current_position.store(0.75);
        joint.runtime.target_torque.store(3.0);
        assert!(joint.power_on());
        assert_eq!(joint.target_position(), 0.75);
        assert_eq!(joint.target_torque(), 0.0);
    }

    #[test]
    fn test_set_zero_latch_and_quiescent_window() {
        let joint = powered("position");
        joint.set_target_position(1.0, 0.0, 0.0);
        joint.reset_motor_position();
        // 锁存期间普通设置不会覆盖零点指令
        joint.set_target_position(2.0, 0.0, 0.0);
        assert_eq!(joint.pending_command(), CommandKind::SetZero);

        let frame = joint.write_bus();
        assert_eq!(frame.id, BROADCAST_ID);
        assert_eq!(frame.data_slice(), &[0x00, 0x03, 0x00, 0x03]);
        assert_eq!(joint.pending_command(), CommandKind::PositionControl);
        assert_eq!(joint.target_position(), 0.0);

        for _ in 0..ZERO_QUIESCENT_CYCLES {
            let frame = joint.write_bus();
            assert!(frame.is_empty());
            assert_eq!(frame.id, 3);
            assert_eq!(frame.data, [0u8; 8]);
        }
        assert_eq!(joint.quiescent_cycles(), 0);
        assert_eq!(joint.write_bus().data[0] & 0xE0, HEADER_POSITION);
    }

    #[test]
    fn test_settings_clamp_and_revert() {
        let joint = powered("torque");
        joint.set_acceleration(50.0);
        assert_eq!(joint.runtime.settings_acceleration.load(), 20.0);
        let frame = joint.write_bus();
        assert_eq!(frame.data_slice(), &[0xC1, 0x01, 0x07, 0xD0]);
        assert_eq!(joint.pending_command(), CommandKind::TorqueControl);

        joint.set_feedback_gains(-1.0, 2.0);
        let frame = joint.write_bus();
        assert_eq!(frame.data_slice(), &[0xC1, 0x03, 0x00, 0x00, 0x27, 0x10]);
    }

    #[test]
    fn test_read_can_id_fires_once() {
        let joint = powered("motion");
        joint.read_can_id();
        let frame = joint.write_bus();
        assert_eq!(frame.id, BROADCAST_ID);
        assert_eq!(frame.data_slice(), &[0xFF, 0xFF, 0x00, 0x82]);
        assert_eq!(joint.pending_command(), CommandKind::MotionControl);
    }

    #[test]
    fn test_quantized_position_frame() {
        let cfg = JointConfig {
            mode: "position".to_string(),
            enable: true,
            pos_range: 12.5,
            position_encoding: PositionEncoding::Quantized,
            ..JointConfig::default()
        };
        let joint = EncosJoint::new(ActuatorConfig::from_joint_config(2, "hip", &cfg).unwrap());
        joint.power_on();
        joint.set_target_position(0.0, 0.0, 0.0);
        let frame = joint.write_bus();
        assert_eq!(frame.dlc, 6);
        assert_eq!(frame.data[0] & 0xE0, HEADER_POSITION);
        assert_eq!(frame.data[5] & 0x03, 0x01);
    }

    #[test]
    fn test_read_bus_format_2_applies_direction() {
        let joint = joint_with("position", -1);
        let degrees = (90.0f32).to_be_bytes();
        let current = (-150i16).to_be_bytes();
        let frame = CanFrame::new(
            3,
            &[
                0x40, degrees[0], degrees[1], degrees[2], degrees[3], current[0], current[1], 90,
            ],
        );
        joint.read_bus(&frame);

        let expected = -90.0 / RAD_TO_DEG;
        assert!((joint.actual_position() - expected).abs() < 1e-5);
        assert_eq!(joint.actual_velocity(), 0.0);
        assert_eq!(joint.actual_current(), -1.5);
        assert_eq!(joint.actual_torque(), -3.0);
        assert_eq!(joint.motor_temperature(), (20.0, 0.0));
    }

    #[test]
    fn test_read_bus_ignores_empty_and_foreign_frames() {
        let joint = joint_with("motion", 1);
        joint.read_bus(&CanFrame::empty(3));
        joint.read_bus(&CanFrame::new(9, &[0x20, 0xFF, 0xFF, 0, 0, 0, 0, 0]));
        assert_eq!(joint.actual_position(), 0.0);
    }

    #[test]
    fn test_config_reply_does_not_touch_state() {
        let joint = joint_with("motion", 1);
        joint.read_bus(&CanFrame::new(BROADCAST_ID, &[0x00, 0x03, 0x01, 0x03]));
        joint.read_bus(&CanFrame::new(BROADCAST_ID, &[0x00, 0x03, 0x01, 0x03]));
        assert_eq!(joint.actual_position(), 0.0);
        assert_eq!(joint.pending_command(), CommandKind::MotionControl);
    }

    #[test]
    fn test_can_ids() {
        let joint = joint_with("motion", 1);
        assert_eq!(joint.can_ids().as_slice(), &[3, BROADCAST_ID]);
    }

    proptest! {
        // 运控模式下任意输入都被限幅到配置范围内
        #[test]
        fn prop_motion_targets_clamped(
            position in prop::num::f32::ANY,
            velocity in prop::num::f32::ANY,
            torque in prop::num::f32::ANY,
        ) {
            let joint = joint_with("motion", 1);
            joint.set_target_motion(position, velocity, torque);
            prop_assert!(joint.target_position().abs() <= 12.5);
            prop_assert!(joint.target_velocity().abs() <= 18.0);
            prop_assert!(joint.target_torque().abs() <= 30.0);
        }

        #[test]
        fn prop_settings_clamped(acceleration in -100.0f32..100.0, gain in -5.0f32..5.0) {
            let joint = joint_with("torque", 1);
            joint.set_acceleration(acceleration);
            joint.set_feedback_gains(gain, gain);
            prop_assert!((0.0..=20.0).contains(&joint.runtime.settings_acceleration.load()));
            prop_assert!((0.0..=1.0).contains(&joint.runtime.settings_feedback_kp.load()));
        }
    }
}
