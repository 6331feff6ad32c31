//! EtherCAT-CAN 转接板过程数据记录
//!
//! 每个从站的输入 / 输出映像前 86 字节为同一布局：
//!
//! ```text
//! offset 0     device_number: u8
//! offset 1     can_ide: u8
//! offset 2+14k id: u32 (LE) | rtr: u8 | dlc: u8 | data: [u8; 8]    (k = 0..6)
//! ```
//!
//! 显式按偏移读写，不依赖结构体内存布局。

use crate::ids::MAX_DEVICES_PER_SLAVE;
use crate::{CanFrame, ProtocolError};

/// 单个设备槽字节数
pub const SLOT_SIZE: usize = 14;

/// 记录头字节数（device_number + can_ide）
const RECORD_HEADER_SIZE: usize = 2;

/// 整条记录字节数
pub const RECORD_SIZE: usize = RECORD_HEADER_SIZE + SLOT_SIZE * MAX_DEVICES_PER_SLAVE;

/// 一个从站的过程数据记录
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EtherCatMsg {
    /// 有效槽数量
    pub device_number: u8,
    /// 0 = 标准帧
    pub can_ide: u8,
    pub devices: [CanFrame; MAX_DEVICES_PER_SLAVE],
}

impl EtherCatMsg {
    /// 由帧列表构建记录，多于 6 帧时报错
    pub fn from_frames(frames: &[CanFrame]) -> Result<Self, ProtocolError> {
        if frames.len() > MAX_DEVICES_PER_SLAVE {
            return Err(ProtocolError::TooManyDevices {
                count: frames.len(),
                max: MAX_DEVICES_PER_SLAVE,
            });
        }
        let mut msg = Self {
            device_number: frames.len() as u8,
            ..Self::default()
        };
        msg.devices[..frames.len()].copy_from_slice(frames);
        Ok(msg)
    }

    /// 有效帧（按 device_number 截断到 6）
    pub fn active_frames(&self) -> &[CanFrame] {
        let n = (self.device_number as usize).min(MAX_DEVICES_PER_SLAVE);
        &self.devices[..n]
    }

    /// 序列化到映像缓冲区前 [`RECORD_SIZE`] 字节
    pub fn write_to(&self, buf: &mut [u8]) -> Result<(), ProtocolError> {
        if buf.len() < RECORD_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: RECORD_SIZE,
                actual: buf.len(),
            });
        }

        buf[0] = self.device_number;
        buf[1] = self.can_ide;
        for (k, frame) in self.devices.iter().enumerate() {
            let off = RECORD_HEADER_SIZE + k * SLOT_SIZE;
            buf[off..off + 4].copy_from_slice(&frame.id.to_le_bytes());
            buf[off + 4] = frame.rtr;
            buf[off + 5] = frame.dlc;
            buf[off + 6..off + SLOT_SIZE].copy_from_slice(&frame.data);
        }
        Ok(())
    }

    /// 从映像缓冲区解析
    pub fn read_from(buf: &[u8]) -> Result<Self, ProtocolError> {
        if buf.len() < RECORD_SIZE {
            return Err(ProtocolError::BufferTooSmall {
                needed: RECORD_SIZE,
                actual: buf.len(),
            });
        }

        let mut msg = Self {
            device_number: buf[0],
            can_ide: buf[1],
            ..Self::default()
        };
        for (k, frame) in msg.devices.iter_mut().enumerate() {
            let off = RECORD_HEADER_SIZE + k * SLOT_SIZE;
            frame.id = u32::from_le_bytes([buf[off], buf[off + 1], buf[off + 2], buf[off + 3]]);
            frame.rtr = buf[off + 4];
            frame.dlc = buf[off + 5];
            frame.data.copy_from_slice(&buf[off + 6..off + SLOT_SIZE]);
        }
        Ok(msg)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_size() {
        assert_eq!(RECORD_SIZE, 86);
    }

    #[test]
    fn test_write_layout() {
        let frames = [
            CanFrame::new(0x01, &[0x61, 0x00, 0x00]),
            CanFrame::new(0x7FF, &[0x00, 0x02, 0x00, 0x03]),
        ];
        let msg = EtherCatMsg::from_frames(&frames).unwrap();

        let mut buf = [0xAAu8; 100];
        msg.write_to(&mut buf).unwrap();

        assert_eq!(buf[0], 2);
        assert_eq!(buf[1], 0);
        // 槽 0
        assert_eq!(&buf[2..6], &[0x01, 0x00, 0x00, 0x00]);
        assert_eq!(buf[6], 0);
        assert_eq!(buf[7], 3);
        assert_eq!(&buf[8..16], &[0x61, 0, 0, 0, 0, 0, 0, 0]);
        // 槽 1
        assert_eq!(&buf[16..20], &[0xFF, 0x07, 0x00, 0x00]);
        assert_eq!(buf[21], 4);
        // 未使用槽清零
        assert!(buf[30..RECORD_SIZE].iter().all(|&b| b == 0));
        // 记录之后的字节不被改写
        assert_eq!(buf[RECORD_SIZE], 0xAA);
    }

    #[test]
    fn test_read_truncates_device_number() {
        let mut buf = [0u8; RECORD_SIZE];
        buf[0] = 9;
        buf[2] = 0x05;
        buf[7] = 8;
        buf[8] = 0x20;

        let msg = EtherCatMsg::read_from(&buf).unwrap();
        assert_eq!(msg.active_frames().len(), 6);
        assert_eq!(msg.devices[0].id, 5);
        assert_eq!(msg.devices[0].dlc, 8);
        assert_eq!(msg.devices[0].data[0], 0x20);
    }

    #[test]
    fn test_too_many_frames() {
        let frames = [CanFrame::empty(1); 7];
        assert_eq!(
            EtherCatMsg::from_frames(&frames),
            Err(ProtocolError::TooManyDevices { count: 7, max: 6 })
        );
    }

    #[test]
    fn test_buffer_too_small() {
        let msg = EtherCatMsg::default();
        let mut small = [0u8; 40];
        assert_eq!(
            msg.write_to(&mut small),
            Err(ProtocolError::BufferTooSmall {
                needed: 86,
                actual: 40
            })
        );
        assert!(EtherCatMsg::read_from(&small).is_err());
    }
}
