//! 配置检查命令
//!
//! 不连接硬件，只解析配置并打印每个从站的槽位排布。

use anyhow::{Context, Result};
use clap::Args;
use encos_sdk::EncosConfig;
use encos_sdk::driver::{KIND_ENCOS_JOINT, KIND_YESENSE_IMU, slot_plan};
use encos_sdk::protocol::MAX_DEVICES_PER_SLAVE;
use std::collections::HashSet;
use std::fmt::Write;
use std::path::PathBuf;

/// 配置检查参数
#[derive(Args, Debug)]
pub struct CheckCommand {
    /// 配置文件路径
    pub config: PathBuf,
}

/// 检查结果
#[derive(Debug, Default)]
pub struct CheckReport {
    pub text: String,
    pub warnings: usize,
}

impl CheckCommand {
    pub fn execute(&self) -> Result<()> {
        let config = EncosConfig::load_from_file(&self.config)
            .with_context(|| format!("failed to load {}", self.config.display()))?;
        let report = render(&config);
        print!("{}", report.text);

        if report.warnings > 0 {
            println!("⚠️  {} warning(s)", report.warnings);
        } else {
            println!("✅ 配置检查通过");
        }
        Ok(())
    }
}

/// 生成检查报告
pub fn render(config: &EncosConfig) -> CheckReport {
    let mut out = String::new();
    let mut warnings = 0;

    let _ = writeln!(
        out,
        "bus: {} @ {} Hz (period {:?})",
        config.bus.interface,
        config.bus.frequency_hz,
        config.bus.period()
    );

    let plan = slot_plan(&config.devices);
    for (slave, ids) in &plan {
        let _ = writeln!(out, "slave {}: {:?}", slave, ids);
        if ids.len() > MAX_DEVICES_PER_SLAVE {
            warnings += 1;
            let _ = writeln!(
                out,
                "  warning: {} devices on slave {}, only the first {} fit in the record",
                ids.len(),
                slave,
                MAX_DEVICES_PER_SLAVE
            );
        }
    }

    let mut names = HashSet::new();
    for device in &config.devices {
        if !names.insert(device.name.as_str()) {
            warnings += 1;
            let _ = writeln!(out, "warning: duplicate device name {}", device.name);
        }
        match device.kind.as_str() {
            KIND_ENCOS_JOINT => {},
            KIND_YESENSE_IMU => {
                let dev = device.imu.as_ref().map_or("<default>", |imu| imu.dev.as_str());
                let _ = writeln!(out, "imu {} ({}): {}", device.name, device.id, dev);
            },
            other => {
                warnings += 1;
                let _ = writeln!(
                    out,
                    "warning: device {} has unknown kind {}",
                    device.name, other
                );
            },
        }
    }

    for (index, group) in config.auto_zero.groups.iter().enumerate() {
        let members: Vec<&str> = group.members.iter().map(|m| m.name.as_str()).collect();
        let _ = writeln!(
            out,
            "auto zero group {}: {:?} ({} s per phase)",
            index, members, group.duration_s
        );
        for member in &members {
            if !names.contains(member) {
                warnings += 1;
                let _ = writeln!(out, "warning: auto zero joint {} not found", member);
            }
        }
    }

    CheckReport {
        text: out,
        warnings,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write as _;

    fn joints(n: u32) -> String {
        (1..=n)
            .map(|id| {
                format!(
                    "[[devices]]\nid = {id}\nname = \"j{id}\"\nkind = \"encos_joint\"\n\
                     [devices.joint]\nslave_id = {}\n",
                    id % 2
                )
            })
            .collect()
    }

    #[test]
    fn test_render_slot_plan() {
        let config: EncosConfig = joints(4).parse().unwrap();
        let report = render(&config);
        assert_eq!(report.warnings, 0);
        assert!(report.text.contains("slave 0: [2, 4]"), "{}", report.text);
        assert!(report.text.contains("slave 1: [1, 3]"), "{}", report.text);
    }

    #[test]
    fn test_render_overflow_warning() {
        // 14 个关节平分到 2 个从站，每个 7 个
        let config: EncosConfig = joints(14).parse().unwrap();
        let report = render(&config);
        assert_eq!(report.warnings, 2);
        assert!(report.text.contains("7 devices on slave 0"));
    }

    #[test]
    fn test_render_unknown_kind_and_missing_zero_joint() {
        let text = r#"
[[devices]]
id = 1
name = "hip"
kind = "encos_joint"

[[devices]]
id = 9
name = "lidar"
kind = "lidar"

[[auto_zero.groups]]
duration_s = 1.0
[[auto_zero.groups.members]]
name = "knee"
lower_limit = -0.5
upper_limit = 0.5
reset_torque = 1.0
reset_velocity = 0.1
"#;
        let config: EncosConfig = text.parse().unwrap();
        let report = render(&config);
        assert_eq!(report.warnings, 2);
        assert!(report.text.contains("unknown kind lidar"));
        assert!(report.text.contains("auto zero joint knee not found"));
    }

    #[test]
    fn test_execute_reads_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(joints(2).as_bytes()).unwrap();
        let cmd = CheckCommand {
            config: file.path().to_path_buf(),
        };
        assert!(cmd.execute().is_ok());

        let missing = CheckCommand {
            config: PathBuf::from("/nonexistent/encos.toml"),
        };
        assert!(missing.execute().is_err());
    }
}
