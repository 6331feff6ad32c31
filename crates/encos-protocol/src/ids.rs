//! CAN ID 与帧头常量定义

/// 广播 / 配置 ID
///
/// 零位设置、通信模式查询、ID 查询均发往此 ID，电机的配置应答也从此 ID 返回。
pub const BROADCAST_ID: u32 = 0x7FF;

/// 每个 EtherCAT 从站最多承载的 CAN 设备数
pub const MAX_DEVICES_PER_SLAVE: usize = 6;

// ============================================================================
// 控制帧帧头（Byte 0 高 3 位）
// ============================================================================

/// 运控模式（MIT）
pub const HEADER_MOTION: u8 = 0x00;

/// 伺服位置控制
pub const HEADER_POSITION: u8 = 0x20;

/// 伺服速度控制
pub const HEADER_VELOCITY: u8 = 0x40;

/// 电流 / 力矩控制
pub const HEADER_CURRENT_TORQUE: u8 = 0x60;

/// 参数设置
pub const HEADER_SETTINGS: u8 = 0xC0;

// ============================================================================
// 配置指令码（Byte 3，发往 BROADCAST_ID）
// ============================================================================

/// 设置当前位置为零点
pub const CODE_SET_ZERO: u8 = 0x03;

/// 查询通信模式
pub const CODE_READ_COMM_MODE: u8 = 0x81;

/// 查询 CAN ID
pub const CODE_READ_CAN_ID: u8 = 0x82;

// ============================================================================
// 参数设置子指令（Byte 1）
// ============================================================================

/// 电机加速度
pub const SETTINGS_ACCELERATION: u8 = 0x01;

/// 磁链补偿增益 + 速度环扰动补偿系数
pub const SETTINGS_LINK_COMPENSATION: u8 = 0x02;

/// 反馈 Kp / Kd
pub const SETTINGS_FEEDBACK_GAINS: u8 = 0x03;
