//! 设备运行时状态
//!
//! 每个字段都是独立的原子变量：宿主线程随时读写目标量，周期线程写入反馈量，
//! 字段之间不保证一致性。

use std::sync::OnceLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// 单调时钟锚点（首次访问时设置）
static APP_START: OnceLock<Instant> = OnceLock::new();

/// 自程序启动以来的微秒数
pub(crate) fn monotonic_micros() -> u64 {
    let start = APP_START.get_or_init(Instant::now);
    start.elapsed().as_micros() as u64
}

/// 以位模式存储在 `AtomicU32` 中的 f32
#[derive(Debug, Default)]
pub struct AtomicF32 {
    bits: AtomicU32,
}

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self {
            bits: AtomicU32::new(value.to_bits()),
        }
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.bits.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.bits.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// 关节运行时数据
#[derive(Debug, Default)]
pub struct JointRuntime {
    // 反馈
    pub current_position: AtomicF32,
    pub current_velocity: AtomicF32,
    pub current_current: AtomicF32,
    pub motor_temperature: AtomicF32,
    pub driver_temperature: AtomicF32,

    // 目标
    pub target_position: AtomicF32,
    pub target_velocity: AtomicF32,
    pub target_torque: AtomicF32,
    pub target_current: AtomicF32,
    pub current_limit: AtomicF32,
    pub kp: AtomicF32,
    pub kd: AtomicF32,

    // 参数设置
    pub settings_acceleration: AtomicF32,
    pub settings_link_gain: AtomicF32,
    pub settings_disturbance_comp: AtomicF32,
    pub settings_feedback_kp: AtomicF32,
    pub settings_feedback_kd: AtomicF32,
}

/// IMU 运行时数据（传感器原始单位）
#[derive(Debug, Default)]
pub struct ImuRuntime {
    /// 欧拉角（deg）
    pub roll: AtomicF32,
    pub pitch: AtomicF32,
    pub yaw: AtomicF32,
    /// 加速度（m/s²）
    pub acc_x: AtomicF32,
    pub acc_y: AtomicF32,
    pub acc_z: AtomicF32,
    /// 角速度（deg/s）
    pub gyro_x: AtomicF32,
    pub gyro_y: AtomicF32,
    pub gyro_z: AtomicF32,
    pub temperature: AtomicF32,
    /// 已发布的完整帧数
    pub frames: AtomicU64,
}

/// 按时间间隔抑制重复日志
///
/// 与只看首次触发的节流不同，每次调用都会刷新时间戳：
/// 连续触发间隔都小于 `interval` 时只会放行第一次。
#[derive(Debug)]
pub struct LogThrottle {
    last_us: AtomicU64,
    interval: Duration,
}

const NEVER: u64 = u64::MAX;

impl LogThrottle {
    pub fn new(interval: Duration) -> Self {
        Self {
            last_us: AtomicU64::new(NEVER),
            interval,
        }
    }

    /// 记录一次触发，返回本次是否应输出
    pub fn hit(&self) -> bool {
        self.hit_at(monotonic_micros())
    }

    pub(crate) fn hit_at(&self, now_us: u64) -> bool {
        let last = self.last_us.swap(now_us, Ordering::Relaxed);
        last == NEVER || now_us.saturating_sub(last) > self.interval.as_micros() as u64
    }
}
