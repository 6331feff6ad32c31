//! 总线设备模型
//!
//! 总线上的设备分为两类：
//! - CAN 设备：挂在 EtherCAT 从站的 CAN 槽位上，每周期写一帧、按 CAN ID 收帧
//! - 虚拟设备：不经过 EtherCAT（如串口 IMU），在读写周期开头直接轮询

use encos_protocol::CanFrame;
use smallvec::SmallVec;
use std::sync::Arc;

use crate::joint::EncosJoint;

/// 挂在 EtherCAT-CAN 转接板上的设备
///
/// 方法都只取 `&self`：设备通过 `Arc` 在总线与宿主线程之间共享。
pub trait CanBusDevice: Send + Sync + std::fmt::Debug {
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    /// 所在从站索引（从 0 开始）
    fn slave_id(&self) -> usize;

    /// 需要分发给本设备的 CAN ID
    fn can_ids(&self) -> SmallVec<[u32; 2]>;

    /// 生成本周期要发送的帧
    fn write_bus(&self) -> CanFrame;

    /// 处理一帧接收数据
    fn read_bus(&self, frame: &CanFrame);

    fn has_power_cfg(&self) -> bool {
        false
    }

    fn power_on(&self) -> bool {
        false
    }

    fn power_off(&self) -> bool {
        true
    }
}

/// 不经过 EtherCAT 的设备，由总线独占
pub trait VirtualDevice: Send + std::fmt::Debug {
    fn id(&self) -> u32;

    fn name(&self) -> &str;

    /// 读周期开头调用一次
    fn read_once(&mut self);

    /// 写周期开头调用一次
    fn write_once(&mut self) {}
}

/// 设备在总线周期中的行为
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    /// 每周期占用一个 CAN 槽位写出帧
    pub produces_write_frame: bool,
    /// 接收按 CAN ID 分发的帧
    pub consumes_read_frame: bool,
    /// 在周期开头被直接轮询
    pub periodic_poll: bool,
}

/// 总线上的设备
#[derive(Debug)]
pub enum Device {
    /// 关节电机
    CanBusActuator(Arc<EncosJoint>),
    /// 只占用槽位收帧的 CAN 设备（写出空帧）
    CanBusSensorLike(Arc<dyn CanBusDevice>),
    /// 虚拟设备
    Virtual(Box<dyn VirtualDevice>),
}

impl Device {
    pub fn id(&self) -> u32 {
        match self {
            Self::CanBusActuator(joint) => joint.id(),
            Self::CanBusSensorLike(device) => device.id(),
            Self::Virtual(device) => device.id(),
        }
    }

    pub fn name(&self) -> &str {
        match self {
            Self::CanBusActuator(joint) => joint.name(),
            Self::CanBusSensorLike(device) => device.name(),
            Self::Virtual(device) => device.name(),
        }
    }

    /// 所在从站；虚拟设备返回 `None`
    pub fn slave_id(&self) -> Option<usize> {
        match self {
            Self::CanBusActuator(joint) => Some(joint.config().slave_id),
            Self::CanBusSensorLike(device) => Some(device.slave_id()),
            Self::Virtual(_) => None,
        }
    }

    pub fn can_ids(&self) -> SmallVec<[u32; 2]> {
        match self {
            Self::CanBusActuator(joint) => CanBusDevice::can_ids(joint.as_ref()),
            Self::CanBusSensorLike(device) => device.can_ids(),
            Self::Virtual(_) => SmallVec::new(),
        }
    }

    pub fn capabilities(&self) -> Capabilities {
        match self {
            Self::CanBusActuator(_) => Capabilities {
                produces_write_frame: true,
                consumes_read_frame: true,
                periodic_poll: false,
            },
            Self::CanBusSensorLike(_) => Capabilities {
                produces_write_frame: false,
                consumes_read_frame: true,
                periodic_poll: false,
            },
            Self::Virtual(_) => Capabilities {
                produces_write_frame: false,
                consumes_read_frame: false,
                periodic_poll: true,
            },
        }
    }

    /// CAN 设备的共享句柄；虚拟设备返回 `None`
    pub fn as_can(&self) -> Option<Arc<dyn CanBusDevice>> {
        match self {
            Self::CanBusActuator(joint) => Some(joint.clone() as Arc<dyn CanBusDevice>),
            Self::CanBusSensorLike(device) => Some(device.clone()),
            Self::Virtual(_) => None,
        }
    }

    pub fn as_joint(&self) -> Option<&Arc<EncosJoint>> {
        match self {
            Self::CanBusActuator(joint) => Some(joint),
            _ => None,
        }
    }

    /// 本周期写入槽位的帧
    pub fn slot_frame(&self) -> Option<CanFrame> {
        match self {
            Self::CanBusActuator(joint) => Some(joint.write_bus()),
            Self::CanBusSensorLike(device) => Some(CanFrame::empty(device.id())),
            Self::Virtual(_) => None,
        }
    }

    /// 分发一帧接收数据；虚拟设备忽略
    pub fn read_frame(&self, frame: &CanFrame) {
        match self {
            Self::CanBusActuator(joint) => joint.read_bus(frame),
            Self::CanBusSensorLike(device) => device.read_bus(frame),
            Self::Virtual(_) => {},
        }
    }

    pub fn has_power_cfg(&self) -> bool {
        match self {
            Self::CanBusActuator(joint) => joint.is_enable(),
            Self::CanBusSensorLike(device) => device.has_power_cfg(),
            Self::Virtual(_) => false,
        }
    }

    pub fn power_on(&self) -> bool {
        match self {
            Self::CanBusActuator(joint) => joint.power_on(),
            Self::CanBusSensorLike(device) => device.power_on(),
            Self::Virtual(_) => false,
        }
    }

    pub fn power_off(&self) -> bool {
        match self {
            Self::CanBusActuator(joint) => joint.power_off(),
            Self::CanBusSensorLike(device) => device.power_off(),
            Self::Virtual(_) => true,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ActuatorConfig, JointConfig};

    #[derive(Debug)]
    struct Probe;

    impl CanBusDevice for Probe {
        fn id(&self) -> u32 {
            0x20
        }

        fn name(&self) -> &str {
            "probe"
        }

        fn slave_id(&self) -> usize {
            0
        }

        fn can_ids(&self) -> SmallVec<[u32; 2]> {
            SmallVec::from_slice(&[0x20])
        }

        fn write_bus(&self) -> CanFrame {
            CanFrame::new(0x20, &[1, 2, 3])
        }

        fn read_bus(&self, _frame: &CanFrame) {}
    }

    #[test]
    fn test_sensor_like_writes_empty_frame() {
        let device = Device::CanBusSensorLike(Arc::new(Probe));
        let frame = device.slot_frame().unwrap();
        assert!(frame.is_empty());
        assert_eq!(frame.id, 0x20);
        assert!(!device.capabilities().produces_write_frame);
        assert!(device.capabilities().consumes_read_frame);
        assert!(!device.has_power_cfg());
    }

    #[test]
    fn test_actuator_capabilities() {
        let cfg = JointConfig {
            enable: true,
            ..JointConfig::default()
        };
        let joint = Arc::new(EncosJoint::new(
            ActuatorConfig::from_joint_config(5, "ankle", &cfg).unwrap(),
        ));
        let device = Device::CanBusActuator(joint.clone());
        assert_eq!(device.id(), 5);
        assert_eq!(device.name(), "ankle");
        assert!(device.capabilities().produces_write_frame);
        assert!(device.as_joint().is_some());
        assert!(device.as_can().is_some());
        assert!(device.power_on());
        assert!(joint.is_power_on());
    }
}
