//! Builder 模式实现
//!
//! 由 `[bus]` 与 `[[devices]]` 配置构造 [`EncosBus`]。

use crate::bus::{EncosBus, UnresolvedDevice};
use crate::config::{
    ActuatorConfig, BusConfig, DeviceConfig, KIND_ENCOS_JOINT, KIND_YESENSE_IMU,
};
use crate::device::Device;
use crate::error::DriverError;
use crate::imu::{SerialOpener, YesenseImu, open_serial};
use crate::joint::EncosJoint;
use encos_ethercat::EthercatMaster;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, warn};

/// EncosBus Builder（链式构造）
///
/// # Example
///
/// ```no_run
/// use encos_driver::{BusConfig, DeviceConfig, EncosBusBuilder};
/// use encos_ethercat::MockMaster;
///
/// let devices: Vec<DeviceConfig> = Vec::new();
/// let mut bus = EncosBusBuilder::new(BusConfig::default())
///     .devices(&devices)
///     .build(MockMaster::new(1))
///     .unwrap();
/// bus.init_ethercat_with_retry().unwrap();
/// bus.init();
/// ```
pub struct EncosBusBuilder {
    config: BusConfig,
    devices: Vec<DeviceConfig>,
    serial_opener: SerialOpener,
}

impl EncosBusBuilder {
    pub fn new(config: BusConfig) -> Self {
        Self {
            config,
            devices: Vec::new(),
            serial_opener: Box::new(open_serial),
        }
    }

    /// 追加设备配置
    pub fn devices(mut self, devices: &[DeviceConfig]) -> Self {
        self.devices.extend_from_slice(devices);
        self
    }

    pub fn device(mut self, device: DeviceConfig) -> Self {
        self.devices.push(device);
        self
    }

    /// 替换串口打开方式（测试中注入 `MemoryPort`）
    pub fn serial_opener(mut self, opener: SerialOpener) -> Self {
        self.serial_opener = opener;
        self
    }

    /// 构建总线
    ///
    /// # Errors
    /// - `DriverError::DuplicateName`: 设备名重复
    /// - `DriverError::InvalidConfig`: 关节参数非法
    /// - `DriverError::Io`: IMU 串口打开失败
    pub fn build<M: EthercatMaster>(self, master: M) -> Result<EncosBus<M>, DriverError> {
        let mut names = HashSet::new();
        let mut devices = Vec::with_capacity(self.devices.len());
        let mut unresolved = Vec::new();
        let mut imus = HashMap::new();

        for cfg in &self.devices {
            if !names.insert(cfg.name.clone()) {
                return Err(DriverError::DuplicateName(cfg.name.clone()));
            }

            match cfg.kind.as_str() {
                KIND_ENCOS_JOINT => {
                    let joint_cfg = cfg.joint.clone().unwrap_or_default();
                    let actuator = ActuatorConfig::from_joint_config(cfg.id, &cfg.name, &joint_cfg)?;
                    debug!(
                        "Joint {} (CAN ID {}) on slave {}, mode {:?}",
                        cfg.name, cfg.id, actuator.slave_id, actuator.mode
                    );
                    devices.push(Device::CanBusActuator(Arc::new(EncosJoint::new(actuator))));
                },
                KIND_YESENSE_IMU => {
                    let imu_cfg = cfg.imu.clone().unwrap_or_default();
                    let port = (self.serial_opener)(&imu_cfg).map_err(|e| {
                        warn!("Failed to open IMU {} on {}: {}", cfg.name, imu_cfg.dev, e);
                        e
                    })?;
                    let imu = YesenseImu::new(cfg.id, cfg.name.clone(), port);
                    imus.insert(cfg.name.clone(), imu.reader());
                    devices.push(Device::Virtual(Box::new(imu)));
                },
                other => unresolved.push(UnresolvedDevice {
                    id: cfg.id,
                    name: cfg.name.clone(),
                    kind: other.to_string(),
                }),
            }
        }

        Ok(EncosBus::new(master, self.config, devices, unresolved, imus))
    }
}

/// 关节在各从站上的槽位排布（从站索引 → 升序 CAN ID）
///
/// 不需要主站，供命令行工具检查配置。
pub fn slot_plan(devices: &[DeviceConfig]) -> BTreeMap<usize, Vec<u32>> {
    let mut plan: BTreeMap<usize, Vec<u32>> = BTreeMap::new();
    for cfg in devices.iter().filter(|d| d.kind == KIND_ENCOS_JOINT) {
        let slave = cfg.joint.as_ref().map_or(0, |j| j.slave_id);
        plan.entry(slave).or_default().push(cfg.id);
    }
    for ids in plan.values_mut() {
        ids.sort_unstable();
    }
    plan
}
