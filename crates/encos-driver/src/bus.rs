//! EtherCAT-CAN 总线事务管理
//!
//! [`EncosBus`] 持有 EtherCAT 主站与全部设备，每个控制周期依次调用
//! [`EncosBus::write_cycle`] 与 [`EncosBus::read_cycle`]：
//!
//! 1. 写周期：每个从站最多 6 个 CAN 设备按 ID 升序占用槽位，各自写出一帧，
//!    组成 86 字节记录写入输出映像后发送过程数据
//! 2. 读周期：接收过程数据，从输入映像解析记录，按 CAN ID 分发给注册的设备
//!
//! 配置错误不会让总线 panic，而是置位共享的 `ErrorFlag`，由周期调度器停止运行。

use crate::config::BusConfig;
use crate::device::Device;
use crate::error::DriverError;
use crate::health::{LinkHealth, LinkState};
use crate::imu::ImuReader;
use crate::joint::EncosJoint;
use crate::metrics::BusMetrics;
use encos_ethercat::{
    AlState, EcatError, EthercatMaster, TIMEOUT_RET, TIMEOUT_STATE, al_status_code_description,
};
use encos_protocol::{EtherCatMsg, MAX_DEVICES_PER_SLAVE, RECORD_SIZE};
use smallvec::SmallVec;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use tracing::{debug, error, info, trace, warn};

/// 进入 OPERATIONAL 的最大等待轮数
const OP_WAIT_ROUNDS: usize = 40;

/// 每轮等待 OPERATIONAL 的超时
const OP_WAIT_TIMEOUT: Duration = Duration::from_millis(50);

/// 单个从站上的设备（`devices` 中的下标，按 CAN ID 升序）
type SlotList = SmallVec<[usize; MAX_DEVICES_PER_SLAVE]>;

/// 配置中无法识别的设备
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnresolvedDevice {
    pub id: u32,
    pub name: String,
    pub kind: String,
}

/// EtherCAT-CAN 总线
pub struct EncosBus<M: EthercatMaster> {
    master: M,
    config: BusConfig,
    devices: Vec<Device>,
    unresolved: Vec<UnresolvedDevice>,
    imus: HashMap<String, ImuReader>,
    slots: Vec<SlotList>,
    virtual_devices: Vec<usize>,
    can_map: HashMap<u32, SmallVec<[usize; 2]>>,
    error_flag: Arc<AtomicBool>,
    health: LinkHealth,
    metrics: Arc<BusMetrics>,
    check_counter: usize,
    wkc: i32,
    expected_wkc: i32,
}

impl<M: EthercatMaster> EncosBus<M> {
    /// 由构建器调用
    pub(crate) fn new(
        master: M,
        config: BusConfig,
        devices: Vec<Device>,
        unresolved: Vec<UnresolvedDevice>,
        imus: HashMap<String, ImuReader>,
    ) -> Self {
        Self {
            master,
            config,
            devices,
            unresolved,
            imus,
            slots: Vec::new(),
            virtual_devices: Vec::new(),
            can_map: HashMap::new(),
            error_flag: Arc::new(AtomicBool::new(false)),
            health: LinkHealth::default(),
            metrics: Arc::new(BusMetrics::default()),
            check_counter: 1,
            wkc: 0,
            expected_wkc: 0,
        }
    }

    // ------------------------------------------------------------------------
    // EtherCAT 启动
    // ------------------------------------------------------------------------

    /// 启动 EtherCAT 主站并将全部从站切换到 OPERATIONAL
    pub fn init_ethercat(&mut self, ifname: &str) -> Result<(), DriverError> {
        if let Err(e) = self.master.init(ifname) {
            error!(
                "No socket connection on {} please set capability first or run in root.",
                ifname
            );
            return Err(e.into());
        }
        info!(
            "Launch EtherCAT interface {} succeeded, looking for slaves...",
            ifname
        );

        let slave_count = self.master.config_init()?;
        if slave_count == 0 {
            error!("No slaves found!");
            return Err(EcatError::NoSlaves.into());
        }
        info!("{} slaves found and configured.", slave_count);

        self.master.config_map()?;
        info!("Slaves mapped.");
        let safe_op_timeout = TIMEOUT_STATE * (slave_count as u32).saturating_mul(2);
        self.master
            .state_check(None, AlState::SAFE_OP, safe_op_timeout);

        for slave in 0..slave_count {
            let status = self.master.slave_status(slave);
            debug!(
                "[SLAVE {}]: IN {} bytes, OUT {} bytes.",
                slave, status.input_bytes, status.output_bytes
            );
        }

        debug!("Requesting operational state for all slaves...");
        self.expected_wkc = self.master.expected_wkc();
        debug!("Calculated workcounter {}", self.expected_wkc);

        // 先发一帧有效过程数据，从站输出才会就绪
        self.master.send_process_data()?;
        if let Err(e) = self.master.receive_process_data(TIMEOUT_RET) {
            debug!("First process data exchange failed: {}", e);
        }
        self.master.write_state(None, AlState::OPERATIONAL)?;

        let mut reached = false;
        for _ in 0..OP_WAIT_ROUNDS {
            self.master.send_process_data()?;
            if let Err(e) = self.master.receive_process_data(TIMEOUT_RET) {
                trace!("Process data exchange failed while waiting for OP: {}", e);
            }
            if self
                .master
                .state_check(None, AlState::OPERATIONAL, OP_WAIT_TIMEOUT)
                .is_operational()
            {
                reached = true;
                break;
            }
        }

        if reached {
            info!("Operational state reached for all slaves.");
            self.health.mark_operational(slave_count);
            return Ok(());
        }

        warn!("Not all slaves reached operational state.");
        self.master.read_state();
        for slave in 0..slave_count {
            let status = self.master.slave_status(slave);
            if !status.state.is_operational() {
                warn!(
                    "[EtherCAT Error] Slave {} State={} StatusCode=0x{:04x} : {}",
                    slave,
                    status.state,
                    status.al_status_code,
                    al_status_code_description(status.al_status_code)
                );
            }
        }
        Err(DriverError::NotOperational)
    }

    /// 按配置的次数与间隔重试 [`EncosBus::init_ethercat`]，全部失败时置位 ErrorFlag
    pub fn init_ethercat_with_retry(&mut self) -> Result<(), DriverError> {
        let attempts = self.config.init_attempts.max(1);
        let interface = self.config.interface.clone();

        for attempt in 1..=attempts {
            info!("Attempting to start EtherCAT, try {} of {}.", attempt, attempts);
            match self.init_ethercat(&interface) {
                Ok(()) => return Ok(()),
                Err(e) => {
                    warn!("EtherCAT start attempt {} failed: {}", attempt, e);
                    if attempt < attempts {
                        std::thread::sleep(self.config.init_retry_interval());
                    }
                },
            }
        }

        error!("EtherCAT initialization failed after {} attempts", attempts);
        self.error_flag.store(true, Ordering::Release);
        Err(DriverError::InitFailed { attempts })
    }

    // ------------------------------------------------------------------------
    // 槽位映射
    // ------------------------------------------------------------------------

    /// 建立从站槽位表与 CAN ID 分发表
    ///
    /// 配置问题只记录日志并置位 ErrorFlag，不返回错误。
    pub fn init(&mut self) {
        let slave_count = self.master.slave_count();

        for slave in 0..slave_count {
            if self
                .master
                .outputs_mut(slave)
                .is_none_or(|buf| buf.len() < RECORD_SIZE)
            {
                error!(
                    "Failed to get EtherCAT slave {} output buffer, check your connection",
                    slave
                );
                self.raise_error();
            }
            if self
                .master
                .inputs(slave)
                .is_none_or(|buf| buf.len() < RECORD_SIZE)
            {
                error!(
                    "Failed to get EtherCAT slave {} input buffer, check your connection",
                    slave
                );
                self.raise_error();
            }
        }

        for device in &self.unresolved {
            error!(
                "Unknown device type \"{}\" for device {} ({}), check your configuration.",
                device.kind, device.name, device.id
            );
        }
        if !self.unresolved.is_empty() {
            self.raise_error();
        }

        self.slots = vec![SlotList::new(); slave_count];
        self.virtual_devices.clear();
        self.can_map.clear();

        for (index, device) in self.devices.iter().enumerate() {
            let Some(slave) = device.slave_id() else {
                self.virtual_devices.push(index);
                continue;
            };
            let Some(slot) = self.slots.get_mut(slave) else {
                error!(
                    "Device {} is assigned to EtherCAT slave {}, but only {} slaves were found, check your configuration.",
                    device.name(),
                    slave,
                    slave_count
                );
                self.error_flag.store(true, Ordering::Release);
                continue;
            };
            slot.push(index);
            for id in device.can_ids() {
                self.can_map.entry(id).or_default().push(index);
            }
        }

        for (slave, slot) in self.slots.iter_mut().enumerate() {
            let devices = &self.devices;
            slot.sort_by_key(|&index| devices[index].id());
            if slot.len() > MAX_DEVICES_PER_SLAVE {
                error!(
                    "CAN devices for each EtherCAT slave can not be greater than {}, slave {} has {}, check your configuration.",
                    MAX_DEVICES_PER_SLAVE,
                    slave,
                    slot.len()
                );
                self.error_flag.store(true, Ordering::Release);
            }
        }

        debug!(
            "Bus slot map built: {} slaves, {} virtual devices, {} CAN ids",
            slave_count,
            self.virtual_devices.len(),
            self.can_map.len()
        );
    }

    // ------------------------------------------------------------------------
    // 周期读写
    // ------------------------------------------------------------------------

    /// 写周期：生成每个从站的输出记录并发送过程数据
    pub fn write_cycle(&mut self) {
        for &index in &self.virtual_devices {
            if let Device::Virtual(device) = &mut self.devices[index] {
                device.write_once();
            }
        }

        for (slave, slot) in self.slots.iter().enumerate() {
            let mut msg = EtherCatMsg::default();
            let count = slot.len().min(MAX_DEVICES_PER_SLAVE);
            for (j, &index) in slot.iter().take(count).enumerate() {
                if let Some(frame) = self.devices[index].slot_frame() {
                    msg.devices[j] = frame;
                }
            }
            msg.device_number = count as u8;
            msg.can_ide = 0;

            match self.master.outputs_mut(slave) {
                Some(buf) => {
                    if let Err(e) = msg.write_to(buf) {
                        trace!("Slave {} output record not written: {}", slave, e);
                    }
                },
                None => trace!("Slave {} has no output buffer", slave),
            }
        }

        if let Err(e) = self.master.send_process_data() {
            self.transport_error(e);
        }
    }

    /// 读周期：接收过程数据并分发到设备，按周期执行链路检查
    pub fn read_cycle(&mut self) {
        for &index in &self.virtual_devices {
            if let Device::Virtual(device) = &mut self.devices[index] {
                device.read_once();
            }
        }

        self.wkc = match self.master.receive_process_data(self.config.receive_timeout()) {
            Ok(wkc) => wkc,
            Err(e) => {
                self.transport_error(e);
                0
            },
        };
        if self.wkc < self.expected_wkc {
            self.metrics.wkc_mismatches.fetch_add(1, Ordering::Relaxed);
        }

        for slave in 0..self.slots.len() {
            let Some(input) = self.master.inputs(slave) else {
                continue;
            };
            let msg = match EtherCatMsg::read_from(input) {
                Ok(msg) => msg,
                Err(e) => {
                    trace!("Slave {} input record not readable: {}", slave, e);
                    continue;
                },
            };

            for frame in msg.active_frames() {
                match self.can_map.get(&frame.id) {
                    Some(targets) => {
                        for &index in targets {
                            self.devices[index].read_frame(frame);
                        }
                        self.metrics
                            .frames_dispatched
                            .fetch_add(targets.len() as u64, Ordering::Relaxed);
                    },
                    None => {
                        self.metrics.unknown_can_ids.fetch_add(1, Ordering::Relaxed);
                        trace!("Slave {} frame from unregistered CAN ID 0x{:X}", slave, frame.id);
                    },
                }
            }
        }

        if self.check_counter % self.config.check_cycle.max(1) == 0 {
            self.health.check(
                &mut self.master,
                self.wkc,
                self.expected_wkc,
                &self.metrics,
            );
        }
        self.check_counter += 1;
        self.metrics.cycles.fetch_add(1, Ordering::Relaxed);
    }

    fn transport_error(&self, e: EcatError) {
        self.metrics.transport_errors.fetch_add(1, Ordering::Relaxed);
        if e.is_fatal() {
            error!("EtherCAT transport failure: {}", e);
            self.raise_error();
        } else {
            debug!("EtherCAT process data error: {}", e);
        }
    }

    fn raise_error(&self) {
        self.error_flag.store(true, Ordering::Release);
    }

    // ------------------------------------------------------------------------
    // 上电 / 下电
    // ------------------------------------------------------------------------

    /// 上电：`None` 为全部带上电配置的设备，`Some(i)` 为第 i 个设备
    pub fn power_on_device(&self, index: Option<usize>) {
        let selected: Vec<&Device> = match index {
            None => self.devices.iter().collect(),
            Some(i) => match self.devices.get(i) {
                Some(device) => vec![device],
                None => {
                    warn!("Power on device index {} out of range", i);
                    return;
                },
            },
        };

        for device in selected.into_iter().filter(|d| d.has_power_cfg()) {
            if device.power_on() {
                info!("Power on device: {}", device.id());
            } else {
                error!("Power on device: {} failed", device.id());
            }
        }
    }

    /// 下电：`None` 为全部设备
    pub fn power_off_device(&self, index: Option<usize>) {
        let selected: Vec<&Device> = match index {
            None => self.devices.iter().collect(),
            Some(i) => match self.devices.get(i) {
                Some(device) => vec![device],
                None => {
                    warn!("Power off device index {} out of range", i);
                    return;
                },
            },
        };

        for device in selected {
            if device.power_off() {
                info!("Power off device: {}", device.id());
            } else {
                error!("Power off device: {} failed", device.id());
            }
        }
    }

    // ------------------------------------------------------------------------
    // 访问器
    // ------------------------------------------------------------------------

    /// 共享的错误标志（置位后不会自动清除）
    pub fn error_flag(&self) -> Arc<AtomicBool> {
        self.error_flag.clone()
    }

    pub fn has_error(&self) -> bool {
        self.error_flag.load(Ordering::Acquire)
    }

    pub fn metrics(&self) -> Arc<BusMetrics> {
        self.metrics.clone()
    }

    pub fn link_state(&self) -> LinkState {
        self.health.state()
    }

    pub fn health(&self) -> &LinkHealth {
        &self.health
    }

    /// 最近一次接收的工作计数器
    pub fn wkc(&self) -> i32 {
        self.wkc
    }

    pub fn expected_wkc(&self) -> i32 {
        self.expected_wkc
    }

    pub fn config(&self) -> &BusConfig {
        &self.config
    }

    pub fn devices(&self) -> &[Device] {
        &self.devices
    }

    /// 按名称查找关节
    pub fn joint(&self, name: &str) -> Option<Arc<EncosJoint>> {
        self.devices
            .iter()
            .filter_map(Device::as_joint)
            .find(|joint| joint.name() == name)
            .cloned()
    }

    pub fn joints(&self) -> Vec<Arc<EncosJoint>> {
        self.devices
            .iter()
            .filter_map(Device::as_joint)
            .cloned()
            .collect()
    }

    /// 按名称查找 IMU
    pub fn imu(&self, name: &str) -> Option<ImuReader> {
        self.imus.get(name).cloned()
    }

    /// 每个从站槽位上的 CAN ID（按槽位顺序）
    pub fn slot_ids(&self) -> Vec<Vec<u32>> {
        self.slots
            .iter()
            .map(|slot| slot.iter().map(|&index| self.devices[index].id()).collect())
            .collect()
    }

    /// 注册在 `can_id` 下的设备数
    pub fn listeners(&self, can_id: u32) -> usize {
        self.can_map.get(&can_id).map_or(0, |targets| targets.len())
    }

    pub fn master(&self) -> &M {
        &self.master
    }

    pub fn master_mut(&mut self) -> &mut M {
        &mut self.master
    }
}

impl<M: EthercatMaster> std::fmt::Debug for EncosBus<M> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EncosBus")
            .field("interface", &self.config.interface)
            .field("devices", &self.devices.len())
            .field("link_state", &self.health.state())
            .field("error_flag", &self.has_error())
            .finish()
    }
}
