//! 仿真运行命令
//!
//! 用 MockMaster 代替真实主站运行完整周期，每个控制帧都以格式 1 应答。

use anyhow::{Context, Result};
use clap::Args;
use encos_ethercat::MockMaster;
use encos_sdk::driver::{ImuConfig, KIND_ENCOS_JOINT, MemoryPort, SerialPort, slot_plan};
use encos_sdk::prelude::*;
use encos_sdk::protocol::{
    BROADCAST_ID, CanFrame, EtherCatMsg, FeedbackRanges, MotorResponse, ValueRange,
};
use encos_sdk::{KernelHandle, MetricsSnapshot};
use std::collections::HashMap;
use std::path::PathBuf;
use tracing::info;

/// 仿真电机温度（℃）
const SIM_TEMPERATURE: f32 = 25.0;

/// 仿真参数
#[derive(Args, Debug)]
pub struct SimulateCommand {
    /// 配置文件路径
    pub config: PathBuf,

    /// 运行周期数（缺省时运行到 Ctrl-C）
    #[arg(short, long)]
    pub cycles: Option<u64>,

    /// 上电后开始自动归零
    #[arg(long)]
    pub auto_zero: bool,

    /// 仿真从站数（缺省按配置中最大的 slave_id 推算）
    #[arg(short, long)]
    pub slaves: Option<usize>,
}

/// 仿真结果
#[derive(Debug)]
pub struct SimulationSummary {
    pub outcome: CycleOutcome,
    pub cycles: u64,
    pub state: KernelState,
    pub zero_state: ZeroState,
    pub metrics: MetricsSnapshot,
    /// `(关节名, 位置 rad, 温度 ℃)`
    pub joints: Vec<(String, f32, f32)>,
}

impl SimulateCommand {
    pub fn execute(&self) -> Result<()> {
        let config = EncosConfig::load_from_file(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;

        let summary = run_simulation(&config, self.slaves, self.cycles, self.auto_zero, |handle| {
            let handle = handle.clone();
            ctrlc::set_handler(move || {
                println!("\n收到退出信号，正在关闭...");
                handle.stop();
            })
            .context("failed to install Ctrl-C handler")
        })?;

        println!("outcome: {:?} after {} cycles", summary.outcome, summary.cycles);
        println!("kernel state: {:?}, auto zero: {:?}", summary.state, summary.zero_state);
        println!(
            "frames dispatched: {}, wkc mismatches: {}, overruns: {}",
            summary.metrics.frames_dispatched,
            summary.metrics.wkc_mismatches,
            summary.metrics.overruns
        );
        for (name, position, temperature) in &summary.joints {
            println!("  {:<16} pos = {:>8.4} rad, temp = {:.1} ℃", name, position, temperature);
        }
        Ok(())
    }
}

/// 构建仿真主站并运行内核
///
/// `on_start` 在内核开始运行前调用，可用于注册停止信号。
pub fn run_simulation<F>(
    config: &EncosConfig,
    slaves: Option<usize>,
    cycles: Option<u64>,
    auto_zero: bool,
    on_start: F,
) -> Result<SimulationSummary>
where
    F: FnOnce(&KernelHandle) -> Result<()>,
{
    let slaves = slaves.unwrap_or_else(|| {
        slot_plan(&config.devices)
            .keys()
            .next_back()
            .map_or(1, |max| max + 1)
    });
    info!("Simulating {} EtherCAT slaves", slaves);

    let master = MockMaster::new(slaves).with_responder(responder(config));
    let mut kernel = EncosKernel::with_serial_opener(
        config,
        master,
        Box::new(|_: &ImuConfig| -> std::io::Result<Box<dyn SerialPort>> {
            Ok(Box::new(MemoryPort::new()))
        }),
    )?;

    let handle = kernel.handle();
    on_start(&handle)?;
    handle.power_on()?;
    if auto_zero {
        handle.start_reset_zero()?;
    }

    let outcome = kernel.run_cycles(cycles, |info, bus| {
        if info.cycle % 1000 == 0 {
            info!(
                "cycle {}: state {:?}, link {:?}, last process time {:?}",
                info.cycle,
                info.state,
                bus.link_state(),
                info.process_time
            );
        }
    });

    let joints = kernel
        .bus()
        .joints()
        .iter()
        .map(|joint| {
            (
                joint.name().to_string(),
                joint.actual_position(),
                joint.motor_temperature().0,
            )
        })
        .collect();

    Ok(SimulationSummary {
        outcome,
        cycles: kernel.cycle_count(),
        state: kernel.state(),
        zero_state: kernel.zero_state(),
        metrics: handle.metrics().snapshot(),
        joints,
    })
}

/// 仿真从站应答：电机停在零位，按各关节配置的量程编码
fn responder(config: &EncosConfig) -> impl FnMut(usize, &[u8], &mut [u8]) + Send + 'static {
    let ranges: HashMap<u32, FeedbackRanges> = config
        .devices
        .iter()
        .filter(|d| d.kind == KIND_ENCOS_JOINT)
        .map(|d| {
            let joint = d.joint.clone().unwrap_or_default();
            let ranges = FeedbackRanges {
                position: ValueRange::symmetric(joint.pos_range),
                velocity: ValueRange::symmetric(joint.vel_range),
                current: ValueRange::symmetric(joint.current_range),
            };
            (d.id, ranges)
        })
        .collect();

    move |_slave: usize, outputs: &[u8], inputs: &mut [u8]| {
        let Ok(sent) = EtherCatMsg::read_from(outputs) else {
            return;
        };
        let replies: Vec<CanFrame> = sent
            .active_frames()
            .iter()
            .filter(|f| f.id != BROADCAST_ID && !f.is_empty())
            .filter_map(|f| {
                let ranges = ranges.get(&f.id)?;
                Some(MotorResponse::quantized_frame(
                    f.id,
                    ranges,
                    0.0,
                    0.0,
                    0.0,
                    SIM_TEMPERATURE,
                ))
            })
            .collect();
        if let Ok(msg) = EtherCatMsg::from_frames(&replies) {
            let _ = msg.write_to(inputs);
        }
    }
}
