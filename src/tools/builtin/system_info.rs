//! `system_info` tool: OS, memory and CPU details of the local machine.

use async_trait::async_trait;
use serde_json::{json, Map, Value};
use strum::{Display, EnumString};
use sysinfo::System;

use crate::error::{DasiError, Result};
use crate::tools::arguments::ToolArguments;
use crate::tools::tool::{Tool, ToolExecutionContext};
use crate::tools::types::ToolParameters;

pub const NAME: &str = "system_info";

const GIB: f64 = 1024.0 * 1024.0 * 1024.0;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString)]
#[strum(serialize_all = "lowercase")]
pub enum InfoType {
    Basic,
    Memory,
    Cpu,
    All,
}

impl InfoType {
    fn includes(self, section: InfoType) -> bool {
        self == InfoType::All || self == section
    }
}

pub struct SystemInfoTool {
    parameters: ToolParameters,
}

impl SystemInfoTool {
    pub fn new() -> Self {
        Self {
            parameters: ToolParameters::object()
                .string_enum(
                    "info_type",
                    "Type of system information to retrieve",
                    &["basic", "memory", "cpu", "all"],
                    false,
                )
                .build(),
        }
    }
}

impl Default for SystemInfoTool {
    fn default() -> Self {
        Self::new()
    }
}

fn basic_info() -> Value {
    json!({
        "os": System::name().unwrap_or_else(|| "Unknown".to_string()),
        "version": System::os_version().unwrap_or_else(|| "Unknown".to_string()),
        "kernel": System::kernel_version().unwrap_or_else(|| "Unknown".to_string()),
        "architecture": std::env::consts::ARCH,
        "hostname": System::host_name().unwrap_or_else(|| "Unknown".to_string()),
    })
}

fn memory_info(sys: &mut System) -> Value {
    sys.refresh_memory();
    let total = sys.total_memory();
    let used = sys.used_memory();
    let percent = if total > 0 {
        used as f64 / total as f64 * 100.0
    } else {
        0.0
    };
    json!({
        "total": format!("{:.2} GB", total as f64 / GIB),
        "available": format!("{:.2} GB", sys.available_memory() as f64 / GIB),
        "used": format!("{:.2} GB", used as f64 / GIB),
        "percent": format!("{percent:.1}%"),
    })
}

fn cpu_info(sys: &mut System) -> Value {
    // Usage is a delta between two samples.
    sys.refresh_cpu_usage();
    std::thread::sleep(sysinfo::MINIMUM_CPU_UPDATE_INTERVAL);
    sys.refresh_cpu_usage();

    let cpus = sys.cpus();
    let frequency = cpus
        .first()
        .map(|cpu| json!(format!("{} MHz", cpu.frequency())))
        .unwrap_or_else(|| json!("N/A"));
    json!({
        "cores_physical": sys.physical_core_count(),
        "cores_logical": cpus.len(),
        "current_frequency": frequency,
        "usage_percent": format!("{:.1}%", sys.global_cpu_usage()),
    })
}

/// Collect the requested sections. Blocking: samples CPU usage over a short interval.
pub fn collect(info_type: InfoType) -> Value {
    let mut sys = System::new();
    let mut result = Map::new();
    if info_type.includes(InfoType::Basic) {
        result.insert("system".into(), basic_info());
    }
    if info_type.includes(InfoType::Memory) {
        result.insert("memory".into(), memory_info(&mut sys));
    }
    if info_type.includes(InfoType::Cpu) {
        result.insert("cpu".into(), cpu_info(&mut sys));
    }
    Value::Object(result)
}

#[async_trait]
impl Tool for SystemInfoTool {
    fn name(&self) -> &str {
        NAME
    }

    fn description(&self) -> &str {
        "Retrieves system information including OS details, memory usage, and CPU information"
    }

    fn parameters(&self) -> &ToolParameters {
        &self.parameters
    }

    async fn execute(&self, args: &ToolArguments, _ctx: &ToolExecutionContext) -> Result<Value> {
        let info_type = match args.get_str_opt("info_type") {
            Some(raw) => raw.parse::<InfoType>().map_err(|_| {
                DasiError::InvalidArgument(format!(
                    "Invalid info_type: {raw}. Must be one of basic, memory, cpu, all"
                ))
            })?,
            None => InfoType::Basic,
        };

        let info = tokio::task::spawn_blocking(move || collect(info_type))
            .await
            .map_err(|e| DasiError::tool(NAME, format!("collection task failed: {e}")))?;
        let formatted = serde_json::to_string_pretty(&info)?;

        Ok(json!({
            "status": "success",
            "data": format!("System Information:\n\n```json\n{formatted}\n```"),
        }))
    }
}
