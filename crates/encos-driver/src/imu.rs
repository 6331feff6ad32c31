//! Yesense IMU（串口虚拟设备）
//!
//! IMU 不经过 EtherCAT，每个读周期开头非阻塞地读取一次串口，
//! 在重组缓冲区中查找完整帧并发布最新一帧的数据。

use crate::config::ImuConfig;
use crate::device::VirtualDevice;
use crate::state::ImuRuntime;
use encos_protocol::{AnalysisStatus, DEG_TO_RAD, ImuTelemetry, YESENSE_MIN_FRAME_LEN, analyze};
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use tracing::{debug, warn};

/// 单次串口读取的最大字节数
pub const READ_CHUNK: usize = 1024;

/// 重组缓冲区容量
pub const REASSEMBLY_CAPACITY: usize = 2 * READ_CHUNK;

/// 串口抽象
pub trait SerialPort: Send + std::fmt::Debug {
    /// 非阻塞读取；没有数据时返回 `Ok(0)` 或 `WouldBlock`
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize>;

    /// 丢弃内核中尚未读取的输入
    fn flush_input(&mut self) -> io::Result<()>;
}

/// 打开串口的函数，由总线构建器在创建 IMU 时调用
pub type SerialOpener = Box<dyn Fn(&ImuConfig) -> io::Result<Box<dyn SerialPort>> + Send + Sync>;

/// 默认的串口打开方式（Linux 上为 termios 终端设备）
pub fn open_serial(config: &ImuConfig) -> io::Result<Box<dyn SerialPort>> {
    #[cfg(target_os = "linux")]
    {
        Ok(Box::new(tty::TtyPort::open(&config.dev, config.baud)?))
    }
    #[cfg(not(target_os = "linux"))]
    {
        Err(io::Error::new(
            io::ErrorKind::Unsupported,
            format!("serial port {} is only supported on Linux", config.dev),
        ))
    }
}

#[cfg(target_os = "linux")]
pub use tty::TtyPort;

#[cfg(target_os = "linux")]
mod tty {
    use super::SerialPort;
    use nix::fcntl::OFlag;
    use nix::sys::termios::{
        self, BaudRate, ControlFlags, FlushArg, InputFlags, SetArg, SpecialCharacterIndices,
    };
    use std::fs::{File, OpenOptions};
    use std::io::{self, Read};
    use std::os::unix::fs::OpenOptionsExt;

    /// termios 终端设备（8N1、raw、非阻塞）
    #[derive(Debug)]
    pub struct TtyPort {
        file: File,
    }

    fn baud_rate(baud: u32) -> io::Result<BaudRate> {
        Ok(match baud {
            9600 => BaudRate::B9600,
            115_200 => BaudRate::B115200,
            230_400 => BaudRate::B230400,
            460_800 => BaudRate::B460800,
            921_600 => BaudRate::B921600,
            other => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    format!("unsupported baud rate {}", other),
                ));
            },
        })
    }

    impl TtyPort {
        pub fn open(path: &str, baud: u32) -> io::Result<Self> {
            let speed = baud_rate(baud)?;
            let file = OpenOptions::new()
                .read(true)
                .write(true)
                .custom_flags((OFlag::O_NONBLOCK | OFlag::O_NOCTTY).bits())
                .open(path)?;

            let mut tio = termios::tcgetattr(&file).map_err(io::Error::from)?;
            termios::cfmakeraw(&mut tio);
            termios::cfsetspeed(&mut tio, speed).map_err(io::Error::from)?;
            tio.control_flags |= ControlFlags::CS8 | ControlFlags::CLOCAL | ControlFlags::CREAD;
            tio.control_flags &= !(ControlFlags::CSTOPB | ControlFlags::PARENB);
            tio.input_flags = InputFlags::IGNPAR;
            tio.control_chars[SpecialCharacterIndices::VMIN as usize] = 0;
            tio.control_chars[SpecialCharacterIndices::VTIME as usize] = 0;

            termios::tcflush(&file, FlushArg::TCIFLUSH).map_err(io::Error::from)?;
            termios::tcsetattr(&file, SetArg::TCSAFLUSH, &tio).map_err(io::Error::from)?;
            Ok(Self { file })
        }
    }

    impl SerialPort for TtyPort {
        fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            self.file.read(buf)
        }

        fn flush_input(&mut self) -> io::Result<()> {
            termios::tcflush(&self.file, FlushArg::TCIFLUSH).map_err(io::Error::from)
        }
    }
}

/// 内存串口，用于测试与仿真
///
/// 克隆出的句柄共享同一个接收队列；`flush_input` 会清空队列。
#[derive(Debug, Clone, Default)]
pub struct MemoryPort {
    rx: Arc<Mutex<VecDeque<u8>>>,
}

impl MemoryPort {
    pub fn new() -> Self {
        Self::default()
    }

    /// 模拟串口收到数据
    pub fn push(&self, bytes: &[u8]) {
        self.rx.lock().extend(bytes.iter().copied());
    }

    pub fn pending(&self) -> usize {
        self.rx.lock().len()
    }
}

impl SerialPort for MemoryPort {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let mut rx = self.rx.lock();
        if rx.is_empty() {
            return Err(io::ErrorKind::WouldBlock.into());
        }
        let n = buf.len().min(rx.len());
        for (dst, src) in buf.iter_mut().zip(rx.drain(..n)) {
            *dst = src;
        }
        Ok(n)
    }

    fn flush_input(&mut self) -> io::Result<()> {
        self.rx.lock().clear();
        Ok(())
    }
}

/// Yesense IMU
#[derive(Debug)]
pub struct YesenseImu {
    id: u32,
    name: String,
    port: Box<dyn SerialPort>,
    buffer: Vec<u8>,
    telemetry: ImuTelemetry,
    runtime: Arc<ImuRuntime>,
}

impl YesenseImu {
    pub fn new(id: u32, name: impl Into<String>, port: Box<dyn SerialPort>) -> Self {
        Self {
            id,
            name: name.into(),
            port,
            buffer: Vec::with_capacity(REASSEMBLY_CAPACITY),
            telemetry: ImuTelemetry::default(),
            runtime: Arc::new(ImuRuntime::default()),
        }
    }

    /// 只读句柄，可在宿主线程中读取数据
    pub fn reader(&self) -> ImuReader {
        ImuReader {
            runtime: self.runtime.clone(),
        }
    }

    /// 重组缓冲区中尚未处理的字节数
    pub fn buffered(&self) -> usize {
        self.buffer.len()
    }

    fn fill_buffer(&mut self) {
        let mut chunk = [0u8; READ_CHUNK];
        let n = match self.port.read(&mut chunk) {
            Ok(n) => n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => 0,
            Err(e) => {
                debug!("IMU {} serial read failed: {}", self.name, e);
                0
            },
        };
        if n == 0 {
            return;
        }

        let room = REASSEMBLY_CAPACITY - self.buffer.len();
        if n > room {
            warn!(
                "IMU {} receive buffer overflow, {} bytes dropped",
                self.name,
                n - room
            );
        }
        self.buffer.extend_from_slice(&chunk[..n.min(room)]);
    }

    fn publish(&self) {
        let t = &self.telemetry;
        let rt = &self.runtime;
        rt.roll.store(t.attitude.roll);
        rt.pitch.store(t.attitude.pitch);
        rt.yaw.store(t.attitude.yaw);
        rt.acc_x.store(t.accel.x);
        rt.acc_y.store(t.accel.y);
        rt.acc_z.store(t.accel.z);
        rt.gyro_x.store(t.angular_rate.x);
        rt.gyro_y.store(t.angular_rate.y);
        rt.gyro_z.store(t.angular_rate.z);
        rt.temperature.store(t.temperature);
        rt.frames.fetch_add(1, Ordering::Relaxed);
    }
}

impl VirtualDevice for YesenseImu {
    fn id(&self) -> u32 {
        self.id
    }

    fn name(&self) -> &str {
        &self.name
    }

    fn read_once(&mut self) {
        self.fill_buffer();
        if self.buffer.len() < YESENSE_MIN_FRAME_LEN {
            return;
        }

        let mut pos = 0;
        while pos < self.buffer.len() {
            let (status, frame_len) = analyze(&self.buffer[pos..], &mut self.telemetry);
            match status {
                AnalysisStatus::NoSync => pos += 1,
                AnalysisStatus::FrameIncomplete => break,
                AnalysisStatus::ChecksumError | AnalysisStatus::LengthError => {
                    debug!("IMU {} dropped frame: {}", self.name, status);
                    pos += frame_len.max(1);
                },
                AnalysisStatus::Ok => {
                    pos += frame_len;
                    self.publish();
                },
            }
        }

        self.buffer.drain(..pos.min(self.buffer.len()));
        if let Err(e) = self.port.flush_input() {
            debug!("IMU {} serial flush failed: {}", self.name, e);
        }
    }
}

/// IMU 数据读取句柄（弧度制）
#[derive(Debug, Clone)]
pub struct ImuReader {
    runtime: Arc<ImuRuntime>,
}

impl ImuReader {
    pub fn roll(&self) -> f32 {
        self.runtime.roll.load() * DEG_TO_RAD
    }

    pub fn pitch(&self) -> f32 {
        self.runtime.pitch.load() * DEG_TO_RAD
    }

    pub fn yaw(&self) -> f32 {
        self.runtime.yaw.load() * DEG_TO_RAD
    }

    pub fn acc_x(&self) -> f32 {
        self.runtime.acc_x.load()
    }

    pub fn acc_y(&self) -> f32 {
        self.runtime.acc_y.load()
    }

    pub fn acc_z(&self) -> f32 {
        self.runtime.acc_z.load()
    }

    pub fn gyro_x(&self) -> f32 {
        self.runtime.gyro_x.load() * DEG_TO_RAD
    }

    pub fn gyro_y(&self) -> f32 {
        self.runtime.gyro_y.load() * DEG_TO_RAD
    }

    pub fn gyro_z(&self) -> f32 {
        self.runtime.gyro_z.load() * DEG_TO_RAD
    }

    /// 传感器温度（℃）
    pub fn temperature(&self) -> f32 {
        self.runtime.temperature.load()
    }

    /// 已发布的完整帧数
    pub fn frames(&self) -> u64 {
        self.runtime.frames.load(Ordering::Relaxed)
    }
}
