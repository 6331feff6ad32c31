//! 命令定义和实现

pub mod check;
pub mod simulate;

pub use check::CheckCommand;
pub use simulate::SimulateCommand;
