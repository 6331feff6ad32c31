//! Mock EtherCAT 主站
//!
//! 过程数据映像由 [`MockMaster`] 自身持有；从站状态、脚本化故障、发送记录等放在共享状态里，
//! 主站被总线拿走后测试仍可以通过 [`MockHandle`] 观察和操纵。
//!
//! 工作计数器按 SOEM 的约定计算：每个处于 OPERATIONAL 的从站贡献 3（输出 ×2 + 输入）。

use crate::{AlState, EcatError, EthercatMaster, SlaveStatus};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace};

/// 默认每个从站的输入 / 输出映像字节数（一条完整的转接板记录）
pub const DEFAULT_IO_BYTES: usize = 86;

const WKC_PER_SLAVE: i32 = 3;

/// 从站应答回调：`(slave, outputs, inputs)`，每次发送过程数据后调用
///
/// 回调在共享状态锁内执行，不能再访问 [`MockHandle`]。
pub type Responder = Box<dyn FnMut(usize, &[u8], &mut [u8]) + Send>;

#[derive(Debug, Clone, Copy)]
struct SlaveSim {
    state: AlState,
    al_status_code: u16,
    refuse_op: bool,
    recoverable: bool,
}

impl Default for SlaveSim {
    fn default() -> Self {
        Self {
            state: AlState::INIT,
            al_status_code: 0,
            refuse_op: false,
            recoverable: true,
        }
    }
}

#[derive(Default)]
struct Shared {
    slaves: Vec<SlaveSim>,
    initialized: bool,
    init_failures: usize,
    init_calls: usize,
    wkc_script: VecDeque<i32>,
    receive_errors: VecDeque<EcatError>,
    pending_inputs: Vec<Option<Vec<u8>>>,
    last_outputs: Vec<Vec<u8>>,
    send_count: usize,
    receive_count: usize,
    responder: Option<Responder>,
    write_log: Vec<(Option<usize>, AlState)>,
    reconfig_calls: usize,
    recover_calls: usize,
}

impl Shared {
    fn lowest_state(&self) -> AlState {
        self.slaves
            .iter()
            .map(|s| s.state)
            .min()
            .unwrap_or(AlState::NONE)
    }

    fn operational_wkc(&self) -> i32 {
        self.slaves.iter().filter(|s| s.state.is_operational()).count() as i32 * WKC_PER_SLAVE
    }
}

/// 无硬件的 EtherCAT 主站
pub struct MockMaster {
    outputs: Vec<Option<Vec<u8>>>,
    inputs: Vec<Option<Vec<u8>>>,
    shared: Arc<Mutex<Shared>>,
}

impl MockMaster {
    /// 创建带 `slave_count` 个从站的主站，每个从站映像为 [`DEFAULT_IO_BYTES`] 字节
    pub fn new(slave_count: usize) -> Self {
        Self::with_io_bytes(slave_count, DEFAULT_IO_BYTES)
    }

    pub fn with_io_bytes(slave_count: usize, io_bytes: usize) -> Self {
        let shared = Shared {
            slaves: vec![SlaveSim::default(); slave_count],
            pending_inputs: vec![None; slave_count],
            last_outputs: vec![Vec::new(); slave_count],
            ..Shared::default()
        };
        Self {
            outputs: vec![Some(vec![0; io_bytes]); slave_count],
            inputs: vec![Some(vec![0; io_bytes]); slave_count],
            shared: Arc::new(Mutex::new(shared)),
        }
    }

    /// 去掉某个从站的输出映像（模拟映射失败）
    pub fn without_outputs(mut self, slave: usize) -> Self {
        if let Some(out) = self.outputs.get_mut(slave) {
            *out = None;
        }
        self
    }

    /// 去掉某个从站的输入映像
    pub fn without_inputs(mut self, slave: usize) -> Self {
        if let Some(input) = self.inputs.get_mut(slave) {
            *input = None;
        }
        self
    }

    /// 前 `n` 次 `init` 调用失败
    pub fn fail_first_inits(self, n: usize) -> Self {
        self.shared.lock().init_failures = n;
        self
    }

    /// 设置应答回调
    pub fn with_responder<F>(self, responder: F) -> Self
    where
        F: FnMut(usize, &[u8], &mut [u8]) + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
        self
    }

    /// 获取观察 / 控制句柄
    pub fn handle(&self) -> MockHandle {
        MockHandle {
            shared: self.shared.clone(),
        }
    }
}

impl EthercatMaster for MockMaster {
    fn init(&mut self, ifname: &str) -> Result<(), EcatError> {
        let mut shared = self.shared.lock();
        shared.init_calls += 1;
        if shared.init_failures > 0 {
            shared.init_failures -= 1;
            debug!("mock master: scripted init failure on {}", ifname);
            return Err(EcatError::NoSocket {
                ifname: ifname.to_string(),
            });
        }
        shared.initialized = true;
        Ok(())
    }

    fn config_init(&mut self) -> Result<usize, EcatError> {
        let mut shared = self.shared.lock();
        if !shared.initialized {
            return Err(EcatError::NotInitialized);
        }
        for slave in shared.slaves.iter_mut() {
            slave.state = AlState::PRE_OP;
        }
        Ok(shared.slaves.len())
    }

    fn config_map(&mut self) -> Result<(), EcatError> {
        let mut shared = self.shared.lock();
        if !shared.initialized {
            return Err(EcatError::NotInitialized);
        }
        for slave in shared.slaves.iter_mut() {
            slave.state = AlState::SAFE_OP;
        }
        Ok(())
    }

    fn slave_count(&self) -> usize {
        self.outputs.len()
    }

    fn expected_wkc(&self) -> i32 {
        self.outputs.len() as i32 * WKC_PER_SLAVE
    }

    fn outputs_mut(&mut self, slave: usize) -> Option<&mut [u8]> {
        self.outputs.get_mut(slave)?.as_deref_mut()
    }

    fn inputs(&self, slave: usize) -> Option<&[u8]> {
        self.inputs.get(slave)?.as_deref()
    }

    fn send_process_data(&mut self) -> Result<(), EcatError> {
        let mut guard = self.shared.lock();
        let shared = &mut *guard;
        if !shared.initialized {
            return Err(EcatError::NotInitialized);
        }
        shared.send_count += 1;

        for (slave, out) in self.outputs.iter().enumerate() {
            let Some(out) = out else { continue };
            shared.last_outputs[slave].clear();
            shared.last_outputs[slave].extend_from_slice(out);

            if let (Some(responder), Some(Some(input))) =
                (shared.responder.as_mut(), self.inputs.get_mut(slave))
            {
                responder(slave, out.as_slice(), input.as_mut_slice());
            }
        }
        trace!("mock master: process data sent ({})", shared.send_count);
        Ok(())
    }

    fn receive_process_data(&mut self, _timeout: Duration) -> Result<i32, EcatError> {
        let mut shared = self.shared.lock();
        shared.receive_count += 1;
        if let Some(err) = shared.receive_errors.pop_front() {
            return Err(err);
        }

        for (slave, pending) in shared.pending_inputs.iter_mut().enumerate() {
            if let (Some(bytes), Some(Some(input))) = (pending.take(), self.inputs.get_mut(slave)) {
                let n = bytes.len().min(input.len());
                input[..n].copy_from_slice(&bytes[..n]);
            }
        }

        let wkc = match shared.wkc_script.pop_front() {
            Some(wkc) => wkc,
            None => shared.operational_wkc(),
        };
        Ok(wkc)
    }

    fn state_check(
        &mut self,
        slave: Option<usize>,
        _expected: AlState,
        _timeout: Duration,
    ) -> AlState {
        let shared = self.shared.lock();
        match slave {
            None => shared.lowest_state(),
            Some(i) => shared.slaves.get(i).map(|s| s.state).unwrap_or(AlState::NONE),
        }
    }

    fn read_state(&mut self) -> AlState {
        self.shared.lock().lowest_state()
    }

    fn slave_status(&self, slave: usize) -> SlaveStatus {
        let shared = self.shared.lock();
        let sim = shared.slaves.get(slave).copied().unwrap_or_default();
        SlaveStatus {
            state: sim.state,
            al_status_code: sim.al_status_code,
            input_bytes: self.inputs.get(slave).and_then(|b| b.as_ref()).map_or(0, |b| b.len()),
            output_bytes: self.outputs.get(slave).and_then(|b| b.as_ref()).map_or(0, |b| b.len()),
        }
    }

    fn write_state(&mut self, slave: Option<usize>, state: AlState) -> Result<(), EcatError> {
        let mut shared = self.shared.lock();
        let count = shared.slaves.len();
        shared.write_log.push((slave, state));

        let range = match slave {
            None => 0..count,
            Some(i) if i < count => i..i + 1,
            Some(i) => return Err(EcatError::SlaveOutOfRange { index: i, count }),
        };
        for sim in &mut shared.slaves[range] {
            if sim.state.is_none() {
                continue;
            }
            if state == AlState::SAFE_OP.with(AlState::ACK) {
                sim.state = AlState::SAFE_OP;
            } else if state.is_operational() && sim.refuse_op {
                continue;
            } else {
                sim.state = state;
            }
        }
        Ok(())
    }

    fn reconfig_slave(&mut self, slave: usize, _timeout: Duration) -> bool {
        let mut shared = self.shared.lock();
        shared.reconfig_calls += 1;
        match shared.slaves.get_mut(slave) {
            Some(sim) if !sim.state.is_none() && !sim.refuse_op => {
                sim.state = AlState::OPERATIONAL;
                true
            },
            _ => false,
        }
    }

    fn recover_slave(&mut self, slave: usize, _timeout: Duration) -> bool {
        let mut shared = self.shared.lock();
        shared.recover_calls += 1;
        match shared.slaves.get_mut(slave) {
            Some(sim) if sim.recoverable => {
                sim.state = AlState::INIT;
                true
            },
            _ => false,
        }
    }
}

/// [`MockMaster`] 的共享句柄
#[derive(Clone)]
pub struct MockHandle {
    shared: Arc<Mutex<Shared>>,
}

impl MockHandle {
    pub fn set_slave_state(&self, slave: usize, state: AlState) {
        if let Some(sim) = self.shared.lock().slaves.get_mut(slave) {
            sim.state = state;
        }
    }

    pub fn slave_state(&self, slave: usize) -> AlState {
        self.shared.lock().slaves.get(slave).map(|s| s.state).unwrap_or(AlState::NONE)
    }

    pub fn set_al_status_code(&self, slave: usize, code: u16) {
        if let Some(sim) = self.shared.lock().slaves.get_mut(slave) {
            sim.al_status_code = code;
        }
    }

    /// 从站拒绝进入 OPERATIONAL
    pub fn refuse_operational(&self, slave: usize, refuse: bool) {
        if let Some(sim) = self.shared.lock().slaves.get_mut(slave) {
            sim.refuse_op = refuse;
        }
    }

    pub fn set_recoverable(&self, slave: usize, recoverable: bool) {
        if let Some(sim) = self.shared.lock().slaves.get_mut(slave) {
            sim.recoverable = recoverable;
        }
    }

    /// 下一次接收返回指定工作计数器
    pub fn push_wkc(&self, wkc: i32) {
        self.shared.lock().wkc_script.push_back(wkc);
    }

    /// 下一次接收返回错误
    pub fn push_receive_error(&self, err: EcatError) {
        self.shared.lock().receive_errors.push_back(err);
    }

    /// 下一次接收时写入从站输入映像
    pub fn queue_inputs(&self, slave: usize, bytes: Vec<u8>) {
        if let Some(pending) = self.shared.lock().pending_inputs.get_mut(slave) {
            *pending = Some(bytes);
        }
    }

    pub fn set_responder<F>(&self, responder: F)
    where
        F: FnMut(usize, &[u8], &mut [u8]) + Send + 'static,
    {
        self.shared.lock().responder = Some(Box::new(responder));
    }

    pub fn clear_responder(&self) {
        self.shared.lock().responder = None;
    }

    /// 最近一次发送时的输出映像
    pub fn last_outputs(&self, slave: usize) -> Option<Vec<u8>> {
        self.shared.lock().last_outputs.get(slave).cloned()
    }

    pub fn send_count(&self) -> usize {
        self.shared.lock().send_count
    }

    pub fn receive_count(&self) -> usize {
        self.shared.lock().receive_count
    }

    pub fn init_calls(&self) -> usize {
        self.shared.lock().init_calls
    }

    /// 所有 `write_state` 调用记录
    pub fn write_log(&self) -> Vec<(Option<usize>, AlState)> {
        self.shared.lock().write_log.clone()
    }

    pub fn reconfig_calls(&self) -> usize {
        self.shared.lock().reconfig_calls
    }

    pub fn recover_calls(&self) -> usize {
        self.shared.lock().recover_calls
    }
}
