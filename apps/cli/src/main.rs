//! # Encos CLI
//!
//! Encos EtherCAT-CAN 总线的命令行工具。
//!
//! ```bash
//! # 检查配置文件，打印每个从站的槽位排布
//! encos-cli check encos.toml
//!
//! # 用仿真主站运行 5000 个周期，上电后自动归零
//! encos-cli simulate encos.toml --cycles 5000 --auto-zero
//! ```
//!
//! 日志级别通过 `RUST_LOG` 设置，缺省为 `encos=info`。

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;

use commands::{CheckCommand, SimulateCommand};

/// Encos CLI - 总线配置检查与仿真运行
#[derive(Parser, Debug)]
#[command(name = "encos-cli")]
#[command(about = "Command-line tool for the Encos EtherCAT-CAN bus", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// 检查配置文件
    Check {
        #[command(flatten)]
        args: CheckCommand,
    },

    /// 使用仿真主站运行内核
    Simulate {
        #[command(flatten)]
        args: SimulateCommand,
    },
}

fn init_logging() -> Result<()> {
    tracing_log::LogTracer::init()?;
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("encos=info"));
    let subscriber = tracing_subscriber::fmt().with_env_filter(filter).finish();
    tracing::subscriber::set_global_default(subscriber)?;
    Ok(())
}

fn main() -> Result<()> {
    init_logging()?;

    let cli = Cli::parse();

    match cli.command {
        Commands::Check { args } => args.execute(),
        Commands::Simulate { args } => args.execute(),
    }
}
