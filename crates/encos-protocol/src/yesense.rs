//! Yesense IMU 串口输出帧解析
//!
//! 帧格式：`0x59 0x53 | tid: u16 | len: u8 | payload[len] | ck1 | ck2`，
//! 校验覆盖 tid 到 payload 末尾。payload 由若干 `(id, len, data)` 数据项组成，
//! 多字节字段为小端。

use std::fmt;

/// 帧头
pub const YESENSE_HEADER: [u8; 2] = [0x59, 0x53];

/// 最短帧长度：帧头 2 + tid 2 + len 1 + 校验 2
pub const YESENSE_MIN_FRAME_LEN: usize = 7;

const PAYLOAD_OFFSET: usize = 5;
const ITEM_HEADER_LEN: usize = 2;

// 数据项 ID
const ID_TEMPERATURE: u8 = 0x01;
const ID_ACCEL: u8 = 0x10;
const ID_ANGULAR_RATE: u8 = 0x20;
const ID_NORM_MAG: u8 = 0x30;
const ID_RAW_MAG: u8 = 0x31;
const ID_EULER: u8 = 0x40;
const ID_QUATERNION: u8 = 0x41;
const ID_UTC: u8 = 0x50;
const ID_SAMPLE_TIMESTAMP: u8 = 0x51;
const ID_DATA_READY_TIMESTAMP: u8 = 0x52;
const ID_LOCATION: u8 = 0x60;
const ID_HRES_LOCATION: u8 = 0x68;
const ID_SPEED: u8 = 0x70;
const ID_NAV_STATUS: u8 = 0x80;

const FACTOR_SENSOR: f32 = 0.000_001;
const FACTOR_RAW_MAG: f32 = 0.001;
const FACTOR_TEMPERATURE: f32 = 0.01;

/// 数据项 ID 对应的固定长度；未知 ID 返回 `None`
fn item_len(id: u8) -> Option<usize> {
    match id {
        ID_TEMPERATURE => Some(2),
        ID_ACCEL | ID_ANGULAR_RATE | ID_NORM_MAG | ID_RAW_MAG | ID_EULER => Some(12),
        ID_QUATERNION => Some(16),
        ID_UTC => Some(11),
        ID_SAMPLE_TIMESTAMP | ID_DATA_READY_TIMESTAMP => Some(4),
        ID_LOCATION | ID_SPEED => Some(12),
        ID_HRES_LOCATION => Some(20),
        ID_NAV_STATUS => Some(1),
        _ => None,
    }
}

/// 单帧解析结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnalysisStatus {
    /// 完整帧，遥测已更新
    Ok,
    /// 数据不足一帧，等待更多字节
    FrameIncomplete,
    /// 数据项越过 payload 末尾
    LengthError,
    /// 校验失败
    ChecksumError,
    /// 起始位置不是帧头
    NoSync,
}

impl fmt::Display for AnalysisStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Ok => "ok",
            Self::FrameIncomplete => "frame incomplete",
            Self::LengthError => "length error",
            Self::ChecksumError => "checksum error",
            Self::NoSync => "no sync",
        };
        f.write_str(s)
    }
}

/// 三轴量
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Axis3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

/// 姿态（欧拉角单位为度）
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Attitude {
    pub pitch: f32,
    pub roll: f32,
    pub yaw: f32,
    pub quaternion: [f32; 4],
}

/// IMU 遥测
///
/// 单位与传感器输出一致：加速度 m/s²，角速度 deg/s，欧拉角 deg，温度 ℃，时间戳 µs。
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct ImuTelemetry {
    pub temperature: f32,
    pub accel: Axis3,
    pub angular_rate: Axis3,
    pub norm_mag: Axis3,
    pub raw_mag: Axis3,
    pub attitude: Attitude,
    pub sample_timestamp: u32,
    pub data_ready_timestamp: u32,
}

/// Fletcher 风格校验：`a += byte; b += a`，结果为 `b << 8 | a`
pub fn checksum(data: &[u8]) -> u16 {
    let (mut a, mut b) = (0u8, 0u8);
    for &byte in data {
        a = a.wrapping_add(byte);
        b = b.wrapping_add(a);
    }
    ((b as u16) << 8) | a as u16
}

fn read_i32(data: &[u8], index: usize) -> i32 {
    let off = index * 4;
    i32::from_le_bytes([data[off], data[off + 1], data[off + 2], data[off + 3]])
}

fn read_axis3(data: &[u8], factor: f32) -> Axis3 {
    Axis3 {
        x: read_i32(data, 0) as f32 * factor,
        y: read_i32(data, 1) as f32 * factor,
        z: read_i32(data, 2) as f32 * factor,
    }
}

fn decode_item(id: u8, data: &[u8], out: &mut ImuTelemetry) {
    match id {
        ID_TEMPERATURE => {
            out.temperature = i16::from_le_bytes([data[0], data[1]]) as f32 * FACTOR_TEMPERATURE;
        },
        ID_ACCEL => out.accel = read_axis3(data, FACTOR_SENSOR),
        ID_ANGULAR_RATE => out.angular_rate = read_axis3(data, FACTOR_SENSOR),
        ID_NORM_MAG => out.norm_mag = read_axis3(data, FACTOR_SENSOR),
        ID_RAW_MAG => out.raw_mag = read_axis3(data, FACTOR_RAW_MAG),
        ID_EULER => {
            out.attitude.pitch = read_i32(data, 0) as f32 * FACTOR_SENSOR;
            out.attitude.roll = read_i32(data, 1) as f32 * FACTOR_SENSOR;
            out.attitude.yaw = read_i32(data, 2) as f32 * FACTOR_SENSOR;
        },
        ID_QUATERNION => {
            for (i, q) in out.attitude.quaternion.iter_mut().enumerate() {
                *q = read_i32(data, i) as f32 * FACTOR_SENSOR;
            }
        },
        ID_SAMPLE_TIMESTAMP => {
            out.sample_timestamp = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        },
        ID_DATA_READY_TIMESTAMP => {
            out.data_ready_timestamp = u32::from_le_bytes([data[0], data[1], data[2], data[3]]);
        },
        // UTC / 位置 / 速度 / 导航状态：只跳过
        _ => {},
    }
}

/// 解析 `buf` 起始处的一帧
///
/// 返回状态和帧长度。`Ok`、`ChecksumError`、`LengthError` 时帧长度为整帧字节数，
/// 调用方据此丢弃该帧；其他状态返回 0。只有 `Ok` 会写入 `out`。
pub fn analyze(buf: &[u8], out: &mut ImuTelemetry) -> (AnalysisStatus, usize) {
    if buf.len() < YESENSE_MIN_FRAME_LEN {
        return (AnalysisStatus::FrameIncomplete, 0);
    }
    if buf[..2] != YESENSE_HEADER {
        return (AnalysisStatus::NoSync, 0);
    }

    let payload_len = buf[4] as usize;
    let frame_len = payload_len + YESENSE_MIN_FRAME_LEN;
    if buf.len() < frame_len {
        return (AnalysisStatus::FrameIncomplete, 0);
    }

    let ck_pos = PAYLOAD_OFFSET + payload_len;
    let expected = u16::from_le_bytes([buf[ck_pos], buf[ck_pos + 1]]);
    if checksum(&buf[2..ck_pos]) != expected {
        return (AnalysisStatus::ChecksumError, frame_len);
    }

    let payload = &buf[PAYLOAD_OFFSET..ck_pos];
    let mut parsed = *out;
    let mut pos = 0;
    while pos < payload.len() {
        if payload.len() - pos < ITEM_HEADER_LEN {
            pos += 1;
            continue;
        }
        let id = payload[pos];
        let len = payload[pos + 1] as usize;
        match item_len(id) {
            Some(expected_len) if expected_len == len => {
                let start = pos + ITEM_HEADER_LEN;
                if start + len > payload.len() {
                    return (AnalysisStatus::LengthError, frame_len);
                }
                decode_item(id, &payload[start..start + len], &mut parsed);
                pos = start + len;
            },
            _ => pos += 1,
        }
    }

    *out = parsed;
    (AnalysisStatus::Ok, frame_len)
}

/// 组装一帧（payload 超过 255 字节时截断）
///
/// 用于测试与仿真串口。
pub fn encode_frame(tid: u16, payload: &[u8]) -> Vec<u8> {
    let payload = &payload[..payload.len().min(u8::MAX as usize)];
    let mut frame = Vec::with_capacity(payload.len() + YESENSE_MIN_FRAME_LEN);
    frame.extend_from_slice(&YESENSE_HEADER);
    frame.extend_from_slice(&tid.to_le_bytes());
    frame.push(payload.len() as u8);
    frame.extend_from_slice(payload);
    let ck = checksum(&frame[2..]);
    frame.extend_from_slice(&ck.to_le_bytes());
    frame
}

#[cfg(test)]
mod tests {
    use super::*;

    fn axis_item(id: u8, values: [i32; 3]) -> Vec<u8> {
        let mut item = vec![id, 12];
        for v in values {
            item.extend_from_slice(&v.to_le_bytes());
        }
        item
    }

    #[test]
    fn test_checksum() {
        // a = 1+2+3 = 6，b = 1+3+6 = 10
        assert_eq!(checksum(&[1, 2, 3]), (10 << 8) | 6);
        // 溢出回绕：a = 0xFF → 0x01，b = 0xFF → 0x00
        assert_eq!(checksum(&[0xFF, 0x02]), 0x0001);
    }

    #[test]
    fn test_analyze_full_frame() {
        let mut payload = vec![ID_TEMPERATURE, 2];
        payload.extend_from_slice(&2534i16.to_le_bytes());
        payload.extend(axis_item(ID_ACCEL, [0, 0, 9_806_650]));
        payload.extend(axis_item(ID_ANGULAR_RATE, [1_000_000, -2_000_000, 0]));
        payload.extend(axis_item(ID_EULER, [10_000_000, -5_000_000, 90_000_000]));
        payload.extend_from_slice(&[ID_SAMPLE_TIMESTAMP, 4]);
        payload.extend_from_slice(&123_456u32.to_le_bytes());

        let frame = encode_frame(7, &payload);
        let mut out = ImuTelemetry::default();
        let (status, len) = analyze(&frame, &mut out);

        assert_eq!(status, AnalysisStatus::Ok);
        assert_eq!(len, frame.len());
        assert!((out.temperature - 25.34).abs() < 1e-4);
        assert!((out.accel.z - 9.80665).abs() < 1e-5);
        assert!((out.angular_rate.x - 1.0).abs() < 1e-6);
        assert!((out.angular_rate.y + 2.0).abs() < 1e-6);
        assert!((out.attitude.pitch - 10.0).abs() < 1e-5);
        assert!((out.attitude.roll + 5.0).abs() < 1e-5);
        assert!((out.attitude.yaw - 90.0).abs() < 1e-4);
        assert_eq!(out.sample_timestamp, 123_456);
    }

    #[test]
    fn test_analyze_incomplete() {
        let frame = encode_frame(1, &axis_item(ID_ACCEL, [1, 2, 3]));
        let mut out = ImuTelemetry::default();

        assert_eq!(
            analyze(&frame[..5], &mut out),
            (AnalysisStatus::FrameIncomplete, 0)
        );
        assert_eq!(
            analyze(&frame[..frame.len() - 1], &mut out),
            (AnalysisStatus::FrameIncomplete, 0)
        );
    }

    #[test]
    fn test_analyze_no_sync() {
        let mut buf = vec![0x00];
        buf.extend(encode_frame(1, &[]));
        let mut out = ImuTelemetry::default();
        assert_eq!(analyze(&buf, &mut out), (AnalysisStatus::NoSync, 0));
        assert_eq!(analyze(&buf[1..], &mut out), (AnalysisStatus::Ok, 7));
    }

    #[test]
    fn test_analyze_checksum_error_leaves_output() {
        let mut frame = encode_frame(1, &axis_item(ID_ACCEL, [1_000_000, 0, 0]));
        let last = frame.len() - 1;
        frame[last] ^= 0xFF;

        let mut out = ImuTelemetry::default();
        let (status, len) = analyze(&frame, &mut out);
        assert_eq!(status, AnalysisStatus::ChecksumError);
        assert_eq!(len, frame.len());
        assert_eq!(out, ImuTelemetry::default());
    }

    #[test]
    fn test_analyze_length_error() {
        // 加速度项声明 12 字节，payload 只剩 4 字节
        let mut payload = vec![ID_ACCEL, 12];
        payload.extend_from_slice(&[0; 4]);
        let frame = encode_frame(1, &payload);

        let mut out = ImuTelemetry::default();
        assert_eq!(
            analyze(&frame, &mut out),
            (AnalysisStatus::LengthError, frame.len())
        );
    }

    #[test]
    fn test_analyze_skips_unknown_and_unused_items() {
        let mut payload = vec![0xEE];
        // UTC 项整体跳过
        payload.extend_from_slice(&[ID_UTC, 11]);
        payload.extend_from_slice(&[0x10; 11]);
        // 长度错误的已知项：逐字节跳过
        payload.extend_from_slice(&[ID_TEMPERATURE, 3]);
        payload.extend(axis_item(ID_ACCEL, [0, 2_000_000, 0]));

        let frame = encode_frame(1, &payload);
        let mut out = ImuTelemetry::default();
        let (status, _) = analyze(&frame, &mut out);
        assert_eq!(status, AnalysisStatus::Ok);
        assert!((out.accel.y - 2.0).abs() < 1e-6);
    }
}
