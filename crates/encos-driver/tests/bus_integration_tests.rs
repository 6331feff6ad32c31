//! EncosBus 端到端集成测试
//!
//! 使用 MockMaster 模拟 EtherCAT 从站，验证槽位映射、周期读写与链路恢复。

use encos_driver::*;
use encos_ethercat::{AlState, EcatError, MockHandle, MockMaster};
use encos_protocol::{BROADCAST_ID, CanFrame, EtherCatMsg, MotorResponse, RECORD_SIZE};

fn bus_config() -> BusConfig {
    BusConfig {
        interface: "mock0".to_string(),
        init_retry_interval_ms: 0,
        ..BusConfig::default()
    }
}

fn joint(id: u32, name: &str, slave_id: usize, mode: &str) -> DeviceConfig {
    DeviceConfig {
        id,
        name: name.to_string(),
        kind: KIND_ENCOS_JOINT.to_string(),
        joint: Some(JointConfig {
            mode: mode.to_string(),
            enable: true,
            slave_id,
            ..JointConfig::default()
        }),
        imu: None,
    }
}

/// 构建总线并完成 EtherCAT 启动与槽位映射
fn start_bus(master: MockMaster, devices: &[DeviceConfig]) -> (EncosBus<MockMaster>, MockHandle) {
    let handle = master.handle();
    let mut bus = EncosBusBuilder::new(bus_config())
        .devices(devices)
        .build(master)
        .unwrap();
    bus.init_ethercat_with_retry().unwrap();
    bus.init();
    (bus, handle)
}

fn sent_record(handle: &MockHandle, slave: usize) -> EtherCatMsg {
    EtherCatMsg::read_from(&handle.last_outputs(slave).unwrap()).unwrap()
}

fn input_record(frames: &[CanFrame]) -> Vec<u8> {
    let mut buf = vec![0u8; RECORD_SIZE];
    EtherCatMsg::from_frames(frames)
        .unwrap()
        .write_to(&mut buf)
        .unwrap();
    buf
}

#[test]
fn test_bus_reaches_operational() {
    let (bus, handle) = start_bus(MockMaster::new(2), &[joint(1, "hip", 0, "motion")]);
    assert_eq!(bus.link_state(), LinkState::Operational);
    assert_eq!(bus.expected_wkc(), 6);
    assert!(!bus.has_error());
    assert_eq!(handle.slave_state(1), AlState::OPERATIONAL);
    assert_eq!(bus.listeners(1), 1);
    assert_eq!(bus.listeners(BROADCAST_ID), 1);
}

#[test]
fn test_zero_latch_then_quiescent_window() {
    let (mut bus, handle) = start_bus(MockMaster::new(1), &[joint(1, "hip", 0, "motion")]);
    let hip = bus.joint("hip").unwrap();
    bus.power_on_device(None);
    assert!(hip.is_power_on());

    hip.reset_motor_position();
    // 锁存期间的普通设置不会覆盖零点指令
    hip.set_target_motion(1.0, 0.5, 2.0);
    assert_eq!(hip.pending_command(), CommandKind::SetZero);

    bus.write_cycle();
    let record = sent_record(&handle, 0);
    assert_eq!(record.device_number, 1);
    assert_eq!(record.devices[0].id, BROADCAST_ID);
    assert_eq!(record.devices[0].data_slice(), &[0x00, 0x01, 0x00, 0x03]);
    assert_eq!(hip.target_position(), 0.0);

    for _ in 0..ZERO_QUIESCENT_CYCLES {
        bus.write_cycle();
        let frame = sent_record(&handle, 0).devices[0];
        assert_eq!(frame.id, 1);
        assert!(frame.is_empty());
    }

    bus.write_cycle();
    let frame = sent_record(&handle, 0).devices[0];
    assert_eq!(frame.id, 1);
    assert_eq!(frame.dlc, 8);
    assert_eq!(hip.pending_command(), CommandKind::MotionControl);
}

#[test]
fn test_slot_overflow_sets_error_flag() {
    let devices: Vec<DeviceConfig> = (1..=7)
        .rev()
        .map(|id| joint(id, &format!("j{}", id), 0, "motion"))
        .collect();
    let (mut bus, handle) = start_bus(MockMaster::new(1), &devices);
    assert!(bus.has_error());

    bus.write_cycle();
    let record = sent_record(&handle, 0);
    assert_eq!(record.device_number, 6);
    let ids: Vec<u32> = record.active_frames().iter().map(|f| f.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5, 6]);
}

#[test]
fn test_slots_sorted_per_slave() {
    let (bus, _handle) = start_bus(
        MockMaster::new(2),
        &[
            joint(9, "a", 1, "motion"),
            joint(2, "b", 0, "motion"),
            joint(4, "c", 1, "motion"),
        ],
    );
    assert_eq!(bus.slot_ids(), vec![vec![2], vec![4, 9]]);
}

#[test]
fn test_out_of_range_slave_sets_error_flag() {
    let (bus, _handle) = start_bus(MockMaster::new(1), &[joint(1, "hip", 3, "motion")]);
    assert!(bus.has_error());
    assert_eq!(bus.listeners(1), 0);
}

#[test]
fn test_unknown_kind_sets_error_flag() {
    let unknown = DeviceConfig {
        id: 42,
        name: "gripper".to_string(),
        kind: "robotiq".to_string(),
        joint: None,
        imu: None,
    };
    let (bus, _handle) = start_bus(MockMaster::new(1), &[joint(1, "hip", 0, "motion"), unknown]);
    assert!(bus.has_error());
    assert!(bus.joint("hip").is_some());
}

#[test]
fn test_missing_buffers_set_error_flag() {
    let (bus, _handle) = start_bus(MockMaster::new(2).without_outputs(1), &[]);
    assert!(bus.has_error());

    let (bus, _handle) = start_bus(MockMaster::with_io_bytes(1, 32), &[]);
    assert!(bus.has_error());
}

#[test]
fn test_format_2_dispatch_with_reversed_direction() {
    let mut device = joint(3, "knee", 0, "position");
    if let Some(j) = device.joint.as_mut() {
        j.motor_direction = -1;
    }
    let (mut bus, handle) = start_bus(MockMaster::new(1), &[device]);
    let knee = bus.joint("knee").unwrap();

    let deg = 90.0f32.to_be_bytes();
    // ack = 2；电流 1.5 A → 150；温度 100 → 25 ℃
    let reply = CanFrame::new(3, &[0x40, deg[0], deg[1], deg[2], deg[3], 0x00, 0x96, 100]);
    handle.queue_inputs(0, input_record(&[reply]));
    bus.read_cycle();

    assert!((knee.actual_position() + std::f32::consts::FRAC_PI_2).abs() < 1e-5);
    assert_eq!(knee.actual_velocity(), 0.0);
    assert!((knee.actual_current() - 1.5).abs() < 1e-6);
    assert_eq!(knee.motor_temperature(), (25.0, 0.0));
    assert_eq!(bus.metrics().snapshot().frames_dispatched, 1);
}

#[test]
fn test_unregistered_can_id_is_counted() {
    let (mut bus, handle) = start_bus(MockMaster::new(1), &[joint(1, "hip", 0, "motion")]);
    handle.queue_inputs(0, input_record(&[CanFrame::new(0x55, &[0x20; 8])]));
    bus.read_cycle();
    let snapshot = bus.metrics().snapshot();
    assert_eq!(snapshot.unknown_can_ids, 1);
    assert_eq!(snapshot.frames_dispatched, 0);
    assert_eq!(snapshot.cycles, 1);
}

#[test]
fn test_quantized_position_frame_end_to_end() {
    let mut device = joint(5, "ankle", 0, "position");
    if let Some(j) = device.joint.as_mut() {
        j.position_encoding = PositionEncoding::Quantized;
    }
    let (mut bus, handle) = start_bus(MockMaster::new(1), &[device]);
    let ankle = bus.joint("ankle").unwrap();
    bus.power_on_device(Some(0));

    ankle.set_target_position(12.5, 0.0, 0.0);
    bus.write_cycle();

    let frame = sent_record(&handle, 0).devices[0];
    assert_eq!(frame.id, 5);
    assert_eq!(frame.dlc, 6);
    // 位置取上限 → 0xFFFF
    assert_eq!(frame.data[0], 0x3F);
    assert_eq!(frame.data[1], 0xFF);
    assert_eq!(frame.data[2] & 0xE0, 0xE0);
}

#[test]
fn test_power_off_sends_disabled_frame() {
    let (mut bus, handle) = start_bus(MockMaster::new(1), &[joint(1, "hip", 0, "torque")]);
    let hip = bus.joint("hip").unwrap();
    bus.power_on_device(None);
    hip.set_target_torque(3.0);
    bus.write_cycle();
    assert_ne!(sent_record(&handle, 0).devices[0].data_slice(), &[0x61, 0x00, 0x00]);

    bus.power_off_device(None);
    bus.write_cycle();
    let frame = sent_record(&handle, 0).devices[0];
    assert_eq!(frame.id, 1);
    assert_eq!(frame.data_slice(), &[0x61, 0x00, 0x00]);
}

#[test]
fn test_format_1_responder_updates_feedback() {
    let master = MockMaster::new(1).with_responder(|_slave, outputs, inputs| {
        let Ok(sent) = EtherCatMsg::read_from(outputs) else {
            return;
        };
        let ranges = encos_protocol::FeedbackRanges {
            position: encos_protocol::ValueRange::symmetric(12.5),
            velocity: encos_protocol::ValueRange::symmetric(18.0),
            current: encos_protocol::ValueRange::symmetric(30.0),
        };
        let replies: Vec<CanFrame> = sent
            .active_frames()
            .iter()
            .map(|f| MotorResponse::quantized_frame(f.id, &ranges, 1.0, 0.0, 0.0, 30.0))
            .collect();
        if let Ok(msg) = EtherCatMsg::from_frames(&replies) {
            let _ = msg.write_to(inputs);
        }
    });
    let (mut bus, _handle) = start_bus(master, &[joint(1, "hip", 0, "motion")]);
    let hip = bus.joint("hip").unwrap();

    bus.write_cycle();
    bus.read_cycle();
    assert!((hip.actual_position() - 1.0).abs() < 1e-3);
    assert_eq!(hip.motor_temperature().0, 30.0);
}

#[test]
fn test_init_retry_exhaustion_sets_error_flag() {
    let master = MockMaster::new(1).fail_first_inits(10);
    let handle = master.handle();
    let mut bus = EncosBusBuilder::new(BusConfig {
        init_attempts: 3,
        ..bus_config()
    })
    .build(master)
    .unwrap();

    let result = bus.init_ethercat_with_retry();
    assert!(matches!(result, Err(DriverError::InitFailed { attempts: 3 })));
    assert_eq!(handle.init_calls(), 3);
    assert!(bus.has_error());
    assert_eq!(bus.link_state(), LinkState::NotInitialized);
}

#[test]
fn test_init_retry_recovers_after_failures() {
    let master = MockMaster::new(1).fail_first_inits(2);
    let handle = master.handle();
    let mut bus = EncosBusBuilder::new(bus_config()).build(master).unwrap();
    bus.init_ethercat_with_retry().unwrap();
    assert_eq!(handle.init_calls(), 3);
    assert!(!bus.has_error());
}

#[test]
fn test_slave_refusing_operational() {
    let master = MockMaster::new(2);
    let handle = master.handle();
    handle.refuse_operational(1, true);
    handle.set_al_status_code(1, 0x001B);
    let mut bus = EncosBusBuilder::new(bus_config()).build(master).unwrap();

    let result = bus.init_ethercat("mock0");
    assert!(matches!(result, Err(DriverError::NotOperational)));
    assert_eq!(bus.link_state(), LinkState::NotInitialized);
}

#[test]
fn test_state_check_recovers_safe_op_slave() {
    let master = MockMaster::new(1);
    let handle = master.handle();
    let mut bus = EncosBusBuilder::new(BusConfig {
        check_cycle: 1,
        ..bus_config()
    })
    .build(master)
    .unwrap();
    bus.init_ethercat_with_retry().unwrap();
    bus.init();

    handle.set_slave_state(0, AlState::SAFE_OP);
    bus.read_cycle();
    assert_eq!(bus.link_state(), LinkState::Degraded);
    assert_eq!(handle.slave_state(0), AlState::OPERATIONAL);

    bus.read_cycle();
    assert_eq!(bus.link_state(), LinkState::Operational);
    assert!(bus.metrics().snapshot().wkc_mismatches >= 1);
}

#[test]
fn test_transport_errors_are_counted() {
    let (mut bus, handle) = start_bus(MockMaster::new(1), &[]);
    handle.push_receive_error(EcatError::Timeout);
    bus.read_cycle();
    assert_eq!(bus.metrics().snapshot().transport_errors, 1);
    assert!(!bus.has_error());

    handle.push_receive_error(EcatError::LinkDown);
    bus.read_cycle();
    assert!(bus.has_error());
}

#[test]
fn test_imu_polled_in_read_cycle() {
    let port = MemoryPort::new();
    let opener_port = port.clone();
    let imu = DeviceConfig {
        id: 100,
        name: "imu".to_string(),
        kind: KIND_YESENSE_IMU.to_string(),
        joint: None,
        imu: None,
    };
    let master = MockMaster::new(1);
    let mut bus = EncosBusBuilder::new(bus_config())
        .device(imu)
        .serial_opener(Box::new(
            move |_: &ImuConfig| -> std::io::Result<Box<dyn SerialPort>> {
                Ok(Box::new(opener_port.clone()))
            },
        ))
        .build(master)
        .unwrap();
    bus.init_ethercat_with_retry().unwrap();
    bus.init();
    assert!(!bus.has_error());

    // 只有同步字节的残片：留在重组缓冲区，不发布数据
    port.push(&[0x59, 0x53]);
    bus.read_cycle();
    assert_eq!(port.pending(), 0);
    assert_eq!(bus.imu("imu").unwrap().frames(), 0);
}
