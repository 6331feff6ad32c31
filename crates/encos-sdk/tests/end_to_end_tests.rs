//! 全栈端到端测试
//!
//! TOML 配置 → 内核 → 总线 → MockMaster 应答 → 关节 / IMU 读数，
//! 内核在测试线程按实际周期运行，宿主线程通过 KernelHandle 控制。

use crossbeam_channel::{RecvTimeoutError, bounded};
use encos_ethercat::MockMaster;
use encos_sdk::driver::{ImuConfig, MemoryPort, SerialPort};
use encos_sdk::prelude::*;
use encos_sdk::protocol::{FeedbackRanges, MotorResponse, ValueRange, encode_frame};
use std::thread;
use std::time::Duration;

const CONFIG: &str = r#"
[bus]
interface = "mock0"
frequency_hz = 1000.0
init_retry_interval_ms = 0

[[devices]]
id = 1
name = "left_hip"
kind = "encos_joint"
[devices.joint]
mode = "motion"
enable = true
slave_id = 0

[[devices]]
id = 2
name = "left_knee"
kind = "encos_joint"
[devices.joint]
mode = "motion"
enable = true
slave_id = 0
motor_direction = -1

[[devices]]
id = 3
name = "right_hip"
kind = "encos_joint"
[devices.joint]
mode = "position"
enable = true
slave_id = 1

[[devices]]
id = 100
name = "imu"
kind = "yesense_imu"
[devices.imu]
dev = "/dev/null"

[[auto_zero.groups]]
duration_s = 0.01
[[auto_zero.groups.members]]
name = "left_hip"
lower_limit = -0.5
upper_limit = 1.0
reset_torque = 1.0
reset_velocity = 0.2
"#;

/// 每个电机应答位置 = id × 0.1 rad
fn responder_master(slaves: usize) -> MockMaster {
    MockMaster::new(slaves).with_responder(|_slave, outputs, inputs| {
        let Ok(sent) = encos_sdk::EtherCatMsg::read_from(outputs) else {
            return;
        };
        let ranges = FeedbackRanges {
            position: ValueRange::symmetric(12.5),
            velocity: ValueRange::symmetric(18.0),
            current: ValueRange::symmetric(30.0),
        };
        let replies: Vec<encos_sdk::CanFrame> = sent
            .active_frames()
            .iter()
            .map(|f| {
                MotorResponse::quantized_frame(f.id, &ranges, f.id as f32 * 0.1, 0.0, 0.0, 35.0)
            })
            .collect();
        if let Ok(msg) = encos_sdk::EtherCatMsg::from_frames(&replies) {
            let _ = msg.write_to(inputs);
        }
    })
}

fn kernel_with_port(master: MockMaster) -> (EncosKernel<MockMaster>, MemoryPort) {
    let config: EncosConfig = CONFIG.parse().unwrap();
    let port = MemoryPort::new();
    let opener_port = port.clone();
    let kernel = EncosKernel::with_serial_opener(
        &config,
        master,
        Box::new(move |_: &ImuConfig| -> std::io::Result<Box<dyn SerialPort>> {
            Ok(Box::new(opener_port.clone()))
        }),
    )
    .unwrap();
    (kernel, port)
}

#[test]
fn test_full_stack_from_config() {
    let (mut kernel, port) = kernel_with_port(responder_master(2));
    let handle = kernel.handle();
    assert!(!handle.has_error());
    assert_eq!(kernel.bus().link_state(), LinkState::Operational);
    assert_eq!(kernel.bus().slot_ids(), vec![vec![1, 2], vec![3]]);

    // 欧拉角 pitch / roll / yaw（1e-6 deg）
    let mut payload = vec![0x40, 12];
    for v in [0i32, 30_000_000, 0] {
        payload.extend_from_slice(&v.to_le_bytes());
    }
    port.push(&encode_frame(1, &payload));

    let (tx, rx) = bounded(1);
    let host = {
        let handle = handle.clone();
        thread::spawn(move || {
            handle.power_on().unwrap();
            let observed = rx.recv_timeout(Duration::from_secs(5));
            handle.stop();
            observed
        })
    };

    let outcome = kernel.run(|info, _bus| {
        if info.state == KernelState::PowerOnFinish {
            let _ = tx.try_send(info.cycle);
        }
    });
    assert_eq!(outcome, CycleOutcome::Stopped);
    let first_powered_cycle = host.join().unwrap().unwrap();
    assert!(first_powered_cycle >= 1);
    assert_eq!(kernel.state(), KernelState::PowerOnFinish);

    let hip = handle.joint("left_hip").unwrap();
    let knee = handle.joint("left_knee").unwrap();
    let right = handle.joint("right_hip").unwrap();
    assert!(hip.is_power_on());
    assert!((hip.actual_position() - 0.1).abs() < 1e-3);
    // 电机方向为 -1
    assert!((knee.actual_position() + 0.2).abs() < 1e-3);
    assert!((right.actual_position() - 0.3).abs() < 1e-3);
    assert_eq!(hip.motor_temperature().0, 35.0);

    let imu = handle.imu("imu").unwrap();
    assert_eq!(imu.frames(), 1);
    assert!((imu.roll() - 30f32.to_radians()).abs() < 1e-4);

    let metrics = handle.metrics().snapshot();
    assert!(metrics.cycles >= first_powered_cycle);
    assert_eq!(metrics.unknown_can_ids, 0);
}

#[test]
fn test_auto_zero_runs_to_finished() {
    let (mut kernel, _port) = kernel_with_port(MockMaster::new(2));
    let handle = kernel.handle();
    handle.start_reset_zero().unwrap();

    let (tx, rx) = bounded(1);
    let host = {
        let handle = handle.clone();
        thread::spawn(move || {
            let result = rx.recv_timeout(Duration::from_secs(5));
            handle.stop();
            result
        })
    };

    // 每个阶段 10 个周期，周期 21 完成
    let outcome = kernel.run(move |info, bus| {
        if info.cycle == 25 {
            let hip = bus.joint("left_hip").unwrap();
            let _ = tx.try_send(hip.mode());
        }
    });
    assert_eq!(outcome, CycleOutcome::Stopped);
    assert_eq!(host.join().unwrap(), Ok(JointMode::Position));
    assert_eq!(kernel.zero_state(), ZeroState::Finished);
    assert_eq!(kernel.state(), KernelState::AutoZeroing);
}

#[test]
fn test_host_timeout_without_power_on() {
    let (mut kernel, _port) = kernel_with_port(MockMaster::new(2));
    let handle = kernel.handle();
    let (tx, rx) = bounded::<u64>(1);

    let host = thread::spawn(move || {
        let result = rx.recv_timeout(Duration::from_millis(50));
        handle.stop();
        result
    });

    kernel.run(move |info, _| {
        if info.state == KernelState::PowerOnFinish {
            let _ = tx.try_send(info.cycle);
        }
    });
    assert_eq!(host.join().unwrap(), Err(RecvTimeoutError::Timeout));
    assert_eq!(kernel.state(), KernelState::Idle);
}
