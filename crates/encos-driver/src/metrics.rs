//! 总线周期指标
//!
//! 全部为原子计数器，周期线程写入，任意线程读取快照。

use std::sync::atomic::{AtomicU64, Ordering};

/// 总线实时指标
///
/// ```rust
/// use encos_driver::BusMetrics;
/// use std::sync::atomic::Ordering;
///
/// let metrics = BusMetrics::default();
/// metrics.cycles.fetch_add(1, Ordering::Relaxed);
/// assert_eq!(metrics.snapshot().cycles, 1);
/// ```
#[derive(Debug, Default)]
pub struct BusMetrics {
    /// 完成的读周期数
    pub cycles: AtomicU64,

    /// 工作计数器低于期望值的周期数
    pub wkc_mismatches: AtomicU64,

    /// 分发给设备的 CAN 帧数
    pub frames_dispatched: AtomicU64,

    /// 没有设备注册的 CAN ID 帧数
    pub unknown_can_ids: AtomicU64,

    /// 从站恢复（重新配置或找回）次数
    pub recoveries: AtomicU64,

    /// 周期超时次数（由周期调度器累加）
    pub overruns: AtomicU64,

    /// 过程数据收发失败次数
    pub transport_errors: AtomicU64,
}

impl BusMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            cycles: self.cycles.load(Ordering::Relaxed),
            wkc_mismatches: self.wkc_mismatches.load(Ordering::Relaxed),
            frames_dispatched: self.frames_dispatched.load(Ordering::Relaxed),
            unknown_can_ids: self.unknown_can_ids.load(Ordering::Relaxed),
            recoveries: self.recoveries.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            transport_errors: self.transport_errors.load(Ordering::Relaxed),
        }
    }

    /// 将所有计数器清零
    pub fn reset(&self) {
        self.cycles.store(0, Ordering::Relaxed);
        self.wkc_mismatches.store(0, Ordering::Relaxed);
        self.frames_dispatched.store(0, Ordering::Relaxed);
        self.unknown_can_ids.store(0, Ordering::Relaxed);
        self.recoveries.store(0, Ordering::Relaxed);
        self.overruns.store(0, Ordering::Relaxed);
        self.transport_errors.store(0, Ordering::Relaxed);
    }
}

/// 指标快照
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MetricsSnapshot {
    pub cycles: u64,
    pub wkc_mismatches: u64,
    pub frames_dispatched: u64,
    pub unknown_can_ids: u64,
    pub recoveries: u64,
    pub overruns: u64,
    pub transport_errors: u64,
}

impl MetricsSnapshot {
    /// 工作计数器异常周期占比（百分比），没有周期时返回 0.0
    pub fn wkc_mismatch_rate(&self) -> f64 {
        if self.cycles == 0 {
            return 0.0;
        }
        (self.wkc_mismatches as f64 / self.cycles as f64) * 100.0
    }
}
