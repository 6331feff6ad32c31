//! 周期内核
//!
//! [`EncosKernel`] 在调用线程上按固定周期运行：
//!
//! ```text
//! 周期计数 +1 → 检查 ErrorFlag → 处理事件 → 自动归零 → 用户任务 → 写周期 → 读周期 → 睡眠到下个周期
//! ```
//!
//! 其他线程通过 [`KernelHandle`] 发送事件、读取关节与 IMU 数据。

use crate::auto_zero::{AutoZero, ZeroState};
use crate::config::EncosConfig;
use crate::error::KernelError;
use crossbeam_channel::{Receiver, Sender, TrySendError};
use encos_driver::{
    BusMetrics, EncosBus, EncosBusBuilder, EncosJoint, ImuReader, SerialOpener,
};
use encos_ethercat::EthercatMaster;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};
use tracing::{error, info, warn};

/// 事件队列容量
const EVENT_QUEUE_CAPACITY: usize = 32;

/// 每周期预留的睡眠误差
const SLEEP_MARGIN: Duration = Duration::from_micros(60);

/// 检测到 ErrorFlag 后退出前的等待时间
const ERROR_EXIT_DELAY: Duration = Duration::from_millis(500);

/// 内核事件
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KernelEvent {
    PowerOn,
    PowerOff,
    StartResetZero,
    StopResetZero,
    Stop,
}

/// 内核状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KernelState {
    #[default]
    Idle,
    PowerOnFinish,
    AutoZeroing,
}

/// 单周期结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    /// 正常完成
    Continue,
    /// 收到停止请求
    Stopped,
    /// ErrorFlag 已置位
    Error,
}

/// 传给用户任务的周期信息
#[derive(Debug, Clone, Copy)]
pub struct CycleInfo {
    /// 从 1 开始的周期序号
    pub cycle: u64,
    pub state: KernelState,
    /// 与上一周期开始时刻的间隔
    pub period: Duration,
    /// 上一周期的处理耗时
    pub process_time: Duration,
}

/// 内核句柄（可克隆，跨线程使用）
#[derive(Clone)]
pub struct KernelHandle {
    events: Sender<KernelEvent>,
    stop: Arc<AtomicBool>,
    error_flag: Arc<AtomicBool>,
    metrics: Arc<BusMetrics>,
    joints: Arc<HashMap<String, Arc<EncosJoint>>>,
    imus: Arc<HashMap<String, ImuReader>>,
}

impl KernelHandle {
    /// 发送事件（非阻塞）
    pub fn send(&self, event: KernelEvent) -> Result<(), KernelError> {
        self.events.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => KernelError::ChannelFull,
            TrySendError::Disconnected(_) => KernelError::ChannelClosed,
        })
    }

    pub fn power_on(&self) -> Result<(), KernelError> {
        self.send(KernelEvent::PowerOn)
    }

    pub fn power_off(&self) -> Result<(), KernelError> {
        self.send(KernelEvent::PowerOff)
    }

    pub fn start_reset_zero(&self) -> Result<(), KernelError> {
        self.send(KernelEvent::StartResetZero)
    }

    pub fn stop_reset_zero(&self) -> Result<(), KernelError> {
        self.send(KernelEvent::StopResetZero)
    }

    /// 请求停止
    ///
    /// 直接置位停止标志，事件队列已满时也能生效。
    pub fn stop(&self) {
        self.stop.store(true, Ordering::Release);
    }

    pub fn is_stopped(&self) -> bool {
        self.stop.load(Ordering::Acquire)
    }

    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> &BusMetrics {
        &self.metrics
    }

    pub fn joint(&self, name: &str) -> Option<Arc<EncosJoint>> {
        self.joints.get(name).cloned()
    }

    pub fn imu(&self, name: &str) -> Option<ImuReader> {
        self.imus.get(name).cloned()
    }
}

impl std::fmt::Debug for KernelHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KernelHandle")
            .field("stopped", &self.is_stopped())
            .field("error", &self.has_error())
            .field("joints", &self.joints.len())
            .finish()
    }
}

/// Encos 周期内核
pub struct EncosKernel<M: EthercatMaster> {
    bus: EncosBus<M>,
    auto_zero: AutoZero,
    state: KernelState,
    events_tx: Sender<KernelEvent>,
    events_rx: Receiver<KernelEvent>,
    stop: Arc<AtomicBool>,
    cycle_count: u64,
    period: Duration,
    last_start: Option<Instant>,
    process_time: Duration,
}

impl<M: EthercatMaster> EncosKernel<M> {
    /// 构建总线、启动 EtherCAT 并建立槽位映射
    ///
    /// EtherCAT 启动失败不会返回错误：ErrorFlag 已置位，[`EncosKernel::run`] 会立即退出。
    ///
    /// # Errors
    /// - `KernelError::Driver`: 设备配置无效
    /// - `KernelError::UnknownJoint`: 归零配置引用了不存在的关节
    pub fn new(config: &EncosConfig, master: M) -> Result<Self, KernelError> {
        let builder = EncosBusBuilder::new(config.bus.clone()).devices(&config.devices);
        Self::from_builder(config, builder, master)
    }

    /// 同 [`EncosKernel::new`]，使用指定的串口打开方式
    pub fn with_serial_opener(
        config: &EncosConfig,
        master: M,
        opener: SerialOpener,
    ) -> Result<Self, KernelError> {
        let builder = EncosBusBuilder::new(config.bus.clone())
            .devices(&config.devices)
            .serial_opener(opener);
        Self::from_builder(config, builder, master)
    }

    fn from_builder(
        config: &EncosConfig,
        builder: EncosBusBuilder,
        master: M,
    ) -> Result<Self, KernelError> {
        let mut bus = builder.build(master)?;

        match bus.init_ethercat_with_retry() {
            Ok(()) => {
                info!("EtherCAT init succeeded");
                bus.init();
            },
            Err(e) => {
                error!(
                    "EtherCAT init failed: {}, please check the network card name.",
                    e
                );
            },
        }

        let period = config.bus.period();
        let auto_zero = AutoZero::new(&config.auto_zero, period, &bus.joints())?;
        let (events_tx, events_rx) = crossbeam_channel::bounded(EVENT_QUEUE_CAPACITY);

        Ok(Self {
            bus,
            auto_zero,
            state: KernelState::Idle,
            events_tx,
            events_rx,
            stop: Arc::new(AtomicBool::new(false)),
            cycle_count: 0,
            period,
            last_start: None,
            process_time: Duration::ZERO,
        })
    }

    pub fn handle(&self) -> KernelHandle {
        let joints = self
            .bus
            .joints()
            .into_iter()
            .map(|joint| (joint.name().to_string(), joint))
            .collect();
        let imus = self
            .bus
            .devices()
            .iter()
            .filter_map(|device| {
                self.bus
                    .imu(device.name())
                    .map(|reader| (device.name().to_string(), reader))
            })
            .collect();

        KernelHandle {
            events: self.events_tx.clone(),
            stop: self.stop.clone(),
            error_flag: self.bus.error_flag(),
            metrics: self.bus.metrics(),
            joints: Arc::new(joints),
            imus: Arc::new(imus),
        }
    }

    pub fn state(&self) -> KernelState {
        self.state
    }

    pub fn zero_state(&self) -> ZeroState {
        self.auto_zero.state()
    }

    pub fn cycle_count(&self) -> u64 {
        self.cycle_count
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn bus(&self) -> &EncosBus<M> {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EncosBus<M> {
        &mut self.bus
    }

    /// 运行一个周期（不睡眠）
    pub fn step<F>(&mut self, task: &mut F) -> CycleOutcome
    where
        F: FnMut(&CycleInfo, &EncosBus<M>),
    {
        let start = Instant::now();
        self.cycle_count += 1;
        let period = self
            .last_start
            .map_or(Duration::ZERO, |last| start.duration_since(last));
        self.last_start = Some(start);

        if self.bus.has_error() {
            error!("Error occurred, Encos kernel is stopping!");
            self.stop.store(true, Ordering::Release);
            return CycleOutcome::Error;
        }

        self.handle_events();
        if self.stop.load(Ordering::Acquire) {
            return CycleOutcome::Stopped;
        }

        if self.state == KernelState::AutoZeroing {
            self.auto_zero.tick(self.cycle_count);
        }

        let info = CycleInfo {
            cycle: self.cycle_count,
            state: self.state,
            period,
            process_time: self.process_time,
        };
        task(&info, &self.bus);

        self.bus.write_cycle();
        self.bus.read_cycle();

        self.process_time = start.elapsed();
        CycleOutcome::Continue
    }

    /// 按固定周期运行，直到停止或出错
    pub fn run<F>(&mut self, task: F) -> CycleOutcome
    where
        F: FnMut(&CycleInfo, &EncosBus<M>),
    {
        self.run_cycles(None, task)
    }

    /// 按固定周期运行，最多 `limit` 个周期
    pub fn run_cycles<F>(&mut self, limit: Option<u64>, mut task: F) -> CycleOutcome
    where
        F: FnMut(&CycleInfo, &EncosBus<M>),
    {
        #[cfg(feature = "realtime")]
        {
            use thread_priority::*;

            match set_current_thread_priority(ThreadPriority::Max) {
                Ok(_) => info!("Kernel thread priority set to MAX (realtime)"),
                Err(e) => warn!(
                    "Failed to set kernel thread priority: {:?}. \
                    On Linux, you may need to run with CAP_SYS_NICE or use rtkit.",
                    e
                ),
            }
        }

        info!("Encos kernel start running!");
        let budget = self.period.saturating_sub(SLEEP_MARGIN);
        let metrics = self.bus.metrics();
        let mut executed = 0u64;

        loop {
            if limit.is_some_and(|limit| executed >= limit) {
                info!("Encos kernel finished {} cycles", executed);
                return CycleOutcome::Stopped;
            }

            let start = Instant::now();
            match self.step(&mut task) {
                CycleOutcome::Continue => {},
                CycleOutcome::Stopped => {
                    info!("Encos kernel stopped");
                    return CycleOutcome::Stopped;
                },
                CycleOutcome::Error => {
                    std::thread::sleep(ERROR_EXIT_DELAY);
                    return CycleOutcome::Error;
                },
            }
            executed += 1;

            let cost = start.elapsed();
            if cost < budget {
                spin_sleep::sleep(budget - cost);
            } else {
                metrics.overruns.fetch_add(1, Ordering::Relaxed);
                warn!("program time out!");
            }
        }
    }

    fn handle_events(&mut self) {
        while let Ok(event) = self.events_rx.try_recv() {
            self.dispatch(event);
        }
    }

    fn dispatch(&mut self, event: KernelEvent) {
        match (self.state, event) {
            (_, KernelEvent::Stop) => {
                info!("Kernel stop requested");
                self.stop.store(true, Ordering::Release);
            },
            (_, KernelEvent::PowerOff) => {
                if self.state == KernelState::AutoZeroing {
                    self.auto_zero.stop_reset();
                }
                info!("joints power off");
                self.bus.power_off_device(None);
                self.state = KernelState::Idle;
            },
            (KernelState::Idle, KernelEvent::PowerOn) => {
                info!("joints power on");
                self.bus.power_on_device(None);
                info!("joints power on finished");
                self.state = KernelState::PowerOnFinish;
            },
            (_, KernelEvent::StartResetZero) => {
                if self.auto_zero.start_reset(self.cycle_count) {
                    info!("JointAutoZero: start reset zero");
                    self.state = KernelState::AutoZeroing;
                } else {
                    error!("JointAutoZero: start reset zero failed");
                }
            },
            (KernelState::AutoZeroing, KernelEvent::StopResetZero) => {
                if self.auto_zero.stop_reset() {
                    info!("JointAutoZero: stop reset zero");
                    self.state = KernelState::Idle;
                } else if self.auto_zero.state() == ZeroState::Finished {
                    info!("JointAutoZero: reset zero already finished");
                    self.state = KernelState::Idle;
                } else {
                    error!("JointAutoZero: stop reset zero failed");
                }
            },
            (state, event) => {
                warn!("Event {:?} is not accepted in state {:?}", event, state);
            },
        }
    }
}

impl<M: EthercatMaster> std::fmt::Debug for EncosKernel<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncosKernel")
            .field("state", &self.state)
            .field("cycle_count", &self.cycle_count)
            .field("period", &self.period)
            .field("bus", &self.bus)
            .finish()
    }
}
