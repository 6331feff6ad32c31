//! 线性量化编解码
//!
//! 运控帧与格式 1 反馈帧中的物理量都按配置范围线性映射到固定位宽的无符号整数：
//!
//! - 编码：`round((x - min) * ((1 << bits) - 1) / (max - min))`，结果饱和到 `[0, 2^bits - 1]`
//! - 解码：`x_int * (max - min) / ((1 << bits) - 1) + min`

/// Kp 位宽
pub const KP_BITS: u32 = 12;
/// Kd 位宽
pub const KD_BITS: u32 = 9;
/// 位置位宽
pub const POSITION_BITS: u32 = 16;
/// 速度位宽
pub const VELOCITY_BITS: u32 = 12;
/// 力矩位宽
pub const TORQUE_BITS: u32 = 12;
/// 电流位宽
pub const CURRENT_BITS: u32 = 12;

/// 将浮点数量化为无符号整数
///
/// `span <= 0` 时返回 0；NaN 视为下限。
pub fn float_to_uint(x: f32, x_min: f32, x_max: f32, bits: u32) -> u32 {
    let span = x_max - x_min;
    if span <= 0.0 || x.is_nan() {
        return 0;
    }
    let max_int = ((1u32 << bits) - 1) as f32;
    let scaled = ((x - x_min) * max_int / span).round();
    scaled.clamp(0.0, max_int) as u32
}

/// 将无符号整数还原为浮点数
pub fn uint_to_float(x_int: u32, x_min: f32, x_max: f32, bits: u32) -> f32 {
    let span = x_max - x_min;
    (x_int as f32) * span / ((1u32 << bits) - 1) as f32 + x_min
}

/// 物理量取值范围 `[min, max]`
///
/// 构造时保证 `min <= max`，因此 [`ValueRange::clamp`] 永远不会 panic。
#[derive(Debug, Clone, Copy, PartialEq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct ValueRange {
    pub min: f32,
    pub max: f32,
}

impl ValueRange {
    /// 创建范围（上下限顺序颠倒时自动交换）
    pub fn new(min: f32, max: f32) -> Self {
        if min <= max {
            Self { min, max }
        } else {
            Self { min: max, max: min }
        }
    }

    /// 对称范围 `[-|r|, |r|]`
    pub fn symmetric(r: f32) -> Self {
        Self::new(-r.abs(), r.abs())
    }

    /// 非负范围 `[0, |r|]`（Kp / Kd）
    pub fn non_negative(r: f32) -> Self {
        Self::new(0.0, r.abs())
    }

    /// 区间宽度
    pub fn span(&self) -> f32 {
        self.max - self.min
    }

    /// 限幅；NaN 映射为最接近 0 的合法值
    pub fn clamp(&self, value: f32) -> f32 {
        if value.is_nan() {
            return 0.0f32.clamp(self.min, self.max);
        }
        value.clamp(self.min, self.max)
    }

    /// 按本范围量化
    pub fn encode(&self, value: f32, bits: u32) -> u32 {
        float_to_uint(value, self.min, self.max, bits)
    }

    /// 按本范围还原
    pub fn decode(&self, value: u32, bits: u32) -> f32 {
        uint_to_float(value, self.min, self.max, bits)
    }

    /// 一个量化步长
    pub fn step(&self, bits: u32) -> f32 {
        self.span() / ((1u32 << bits) - 1) as f32
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_float_to_uint_rounds() {
        // 5.0 / 10.0 * 4095 = 2047.5，四舍五入为 2048
        assert_eq!(float_to_uint(5.0, 0.0, 10.0, 12), 2048);
    }

    #[test]
    fn test_float_to_uint_boundary() {
        assert_eq!(float_to_uint(0.0, 0.0, 10.0, 12), 0);
        assert_eq!(float_to_uint(10.0, 0.0, 10.0, 12), 4095);
        // 超出范围时饱和
        assert_eq!(float_to_uint(-1.0, 0.0, 10.0, 12), 0);
        assert_eq!(float_to_uint(f32::INFINITY, 0.0, 10.0, 12), 4095);
        assert_eq!(float_to_uint(f32::NAN, 0.0, 10.0, 12), 0);
    }

    #[test]
    fn test_float_to_uint_degenerate_span() {
        assert_eq!(float_to_uint(1.0, 2.0, 2.0, 16), 0);
    }

    #[test]
    fn test_uint_to_float_boundary() {
        assert!((uint_to_float(0, -3.14, 3.14, 16) + 3.14).abs() < 1e-6);
        assert!((uint_to_float(65535, -3.14, 3.14, 16) - 3.14).abs() < 1e-5);
    }

    #[test]
    fn test_value_range_constructors() {
        let r = ValueRange::symmetric(-12.5);
        assert_eq!(r.min, -12.5);
        assert_eq!(r.max, 12.5);

        let kp = ValueRange::non_negative(500.0);
        assert_eq!(kp.min, 0.0);
        assert_eq!(kp.max, 500.0);

        // 上下限颠倒
        let swapped = ValueRange::new(1.0, -1.0);
        assert_eq!(swapped.min, -1.0);
    }

    #[test]
    fn test_value_range_clamp_extremes() {
        let r = ValueRange::symmetric(3.14);
        assert_eq!(r.clamp(f32::INFINITY), 3.14);
        assert_eq!(r.clamp(f32::NEG_INFINITY), -3.14);
        assert_eq!(r.clamp(f32::NAN), 0.0);

        let kp = ValueRange::non_negative(500.0);
        assert_eq!(kp.clamp(f32::NAN), 0.0);
        assert_eq!(kp.clamp(-3.0), 0.0);
    }

    proptest! {
        // 对所有位宽和范围内的值，编解码误差不超过一个量化步长
        #[test]
        fn prop_round_trip_within_one_step(
            bits in prop::sample::select(vec![9u32, 12, 16]),
            half_span in 0.1f32..100.0,
            ratio in 0.0f32..=1.0,
        ) {
            let range = ValueRange::symmetric(half_span);
            let value = range.min + ratio * range.span();
            let decoded = range.decode(range.encode(value, bits), bits);
            prop_assert!((decoded - value).abs() <= range.step(bits));
        }

        #[test]
        fn prop_encode_never_exceeds_bit_width(
            bits in prop::sample::select(vec![9u32, 12, 16]),
            value in prop::num::f32::ANY,
        ) {
            let range = ValueRange::symmetric(12.5);
            prop_assert!(range.encode(value, bits) <= (1u32 << bits) - 1);
        }

        #[test]
        fn prop_clamp_stays_in_range(value in prop::num::f32::ANY) {
            let range = ValueRange::symmetric(40.0);
            let clamped = range.clamp(value);
            prop_assert!(clamped >= range.min && clamped <= range.max);
        }
    }
}
