// Copyright 2024-2025 Irreducible Inc.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use linear_map::LinearMap;

use crate::env_utils::{get_bool_env_var, get_env_var};
use crate::errors::err_msg;
use crate::record::{ApiCallRecord, DeviceSyncRecord, ViewKind, ViewKindSet};
use crate::sink::{DeviceOperation, EventSink};
use crate::symbols::SymbolTable;
use crate::view_kinds;

use super::log_tree::LogTree;

/// Summary sink config.
#[derive(Debug, Clone)]
pub struct Config {
    /// Display anything above this percentage of its group in bold red.
    /// Corresponds to the `GPU_VIEW_SUMMARY_ATTENTION_ABOVE` environment variable.
    pub attention_above_percent: f64,

    /// Display anything above this percentage in regular white, the rest in gray.
    /// Corresponds to the `GPU_VIEW_SUMMARY_RELEVANT_ABOVE` environment variable.
    pub relevant_above_percent: f64,

    /// Whether to disable color output.
    /// Corresponds to the `NO_COLOR` environment variable.
    pub no_color: bool,
}

impl Config {
    pub fn from_env() -> Self {
        Self {
            attention_above_percent: get_env_var("GPU_VIEW_SUMMARY_ATTENTION_ABOVE", 25.0),
            relevant_above_percent: get_env_var("GPU_VIEW_SUMMARY_RELEVANT_ABOVE", 2.5),
            no_color: get_bool_env_var("NO_COLOR", false),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
struct Entry {
    calls: u64,
    total_ns: u64,
    min_ns: u64,
    max_ns: u64,
    bytes: u64,
}

impl Entry {
    fn add(&mut self, duration_ns: u64, bytes: u64) {
        self.min_ns = if self.calls == 0 {
            duration_ns
        } else {
            self.min_ns.min(duration_ns)
        };
        self.max_ns = self.max_ns.max(duration_ns);
        self.calls += 1;
        self.total_ns += duration_ns;
        self.bytes += bytes;
    }
}

/// Per-name totals, grouped by what was measured.
#[derive(Debug, Default)]
struct Totals {
    groups: LinearMap<&'static str, HashMap<String, Entry>>,
}

impl Totals {
    fn add(&mut self, group: &'static str, name: String, duration_ns: u64, bytes: u64) {
        self.groups
            .entry(group)
            .or_insert_with(HashMap::new)
            .entry(name)
            .or_default()
            .add(duration_ns, bytes);
    }
}

/// SummarySink
/// Accumulates device time per kernel or memory operation, and host time per API function
/// and synchronization. The totals are printed as a tree when the guard is dropped.
///
/// example output:
/// ```bash
/// gpu-view summary
/// ├── Device operations [ 2.31ms ]
/// │   ├── gemm [ 2.10ms | 90.91% ] (12 calls, min 171.20µs, max 190.03µs)
/// │   └── H2D copy [ 210.00µs | 9.09% ] (4 calls, min 50.01µs, max 55.12µs, 16.00 MiB)
/// └── Driver API [ 301.12µs ]
///     └── zeCommandListAppendLaunchKernel [ 301.12µs | 100.00% ] (12 calls, ...)
/// ```
pub struct SummarySink {
    symbols: Arc<SymbolTable>,
    totals: Arc<Mutex<Totals>>,
}

const DEVICE: &str = "Device operations";
const DRIVER_API: &str = "Driver API";
const RUNTIME_API: &str = "Runtime API";
const SYNCHRONIZATION: &str = "Synchronization";

impl SummarySink {
    pub fn new(symbols: Arc<SymbolTable>, config: Config) -> (Self, SummaryGuard) {
        let totals = Arc::new(Mutex::new(Totals::default()));
        let sink = Self {
            symbols,
            totals: totals.clone(),
        };
        (sink, SummaryGuard { totals, config })
    }

    fn add(&self, group: &'static str, name: String, duration_ns: u64, bytes: u64) {
        let Ok(mut totals) = self.totals.lock() else {
            return err_msg!("failed to get mutex");
        };
        totals.add(group, name, duration_ns, bytes);
    }

    fn operation_name(&self, operation: &DeviceOperation) -> String {
        if let Some(name) = self.symbols.resolve(operation.name()) {
            return name.to_string();
        }
        match operation {
            DeviceOperation::Kernel(_) => "unknown kernel".to_string(),
            DeviceOperation::MemoryCopy(r) => format!("{} copy", r.memcpy_type),
            DeviceOperation::MemoryCopyP2p(r) => format!("{} p2p copy", r.memcpy_type),
            DeviceOperation::MemoryFill(_) => "fill".to_string(),
        }
    }
}

impl EventSink for SummarySink {
    fn wants(&self, kind: ViewKind) -> bool {
        const KINDS: ViewKindSet = view_kinds![
            Kernel,
            MemoryCopy,
            MemoryCopyP2p,
            MemoryFill,
            RuntimeApiCall,
            DriverApiCall,
            DeviceSynchronization,
        ];
        KINDS.contains(kind)
    }

    fn on_api_call(&self, call: &ApiCallRecord) {
        let group = if call.header.kind() == ViewKind::RuntimeApiCall {
            RUNTIME_API
        } else {
            DRIVER_API
        };
        let name = call.name().unwrap_or("unknown").to_string();
        let duration = call.end_timestamp.saturating_sub(call.start_timestamp);
        self.add(group, name, duration, 0);
    }

    fn on_device_operation(&self, operation: &DeviceOperation) {
        let [_, _, start, end] = operation.timestamps();
        self.add(
            DEVICE,
            self.operation_name(operation),
            end.saturating_sub(start),
            operation.bytes(),
        );
    }

    fn on_synchronization(&self, sync: &DeviceSyncRecord) {
        let duration = sync.end_timestamp.saturating_sub(sync.start_timestamp);
        self.add(SYNCHRONIZATION, format!("{:?}", sync.sync_type()), duration, 0);
    }
}

/// Prints the summary on drop.
pub struct SummaryGuard {
    totals: Arc<Mutex<Totals>>,
    config: Config,
}

impl SummaryGuard {
    /// The summary accumulated so far.
    pub fn render(&self) -> String {
        let Ok(totals) = self.totals.lock() else {
            err_msg!("failed to get mutex");
            return String::new();
        };
        render_tree(&totals, &self.config).to_string()
    }
}

impl Drop for SummaryGuard {
    fn drop(&mut self) {
        println!("{}", self.render());
    }
}

fn format_bytes(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.2} {}", UNITS[unit])
    }
}

fn label(name: &str, entry: &Entry, group_ns: u64, config: &Config) -> String {
    let total = Duration::from_nanos(entry.total_ns);
    let percent = if group_ns == 0 {
        0.0
    } else {
        100.0 * entry.total_ns as f64 / group_ns as f64
    };

    let mut info = vec![format!("{} calls", entry.calls)];
    if entry.calls > 1 {
        info.push(format!("min {:.2?}", Duration::from_nanos(entry.min_ns)));
        info.push(format!("max {:.2?}", Duration::from_nanos(entry.max_ns)));
    }
    if entry.bytes > 0 {
        info.push(format_bytes(entry.bytes));
    }
    let result = format!("{name} [ {total:.2?} | {percent:.2}% ] ({})", info.join(", "));

    if config.no_color {
        result
    } else {
        format!(
            "{}{}\x1b[0m",
            if percent > config.attention_above_percent {
                "\x1b[1;31m" // bold red
            } else if percent > config.relevant_above_percent {
                "\x1b[0m" // white
            } else {
                "\x1b[2m" // gray
            },
            result
        )
    }
}

fn render_tree(totals: &Totals, config: &Config) -> LogTree {
    let children = totals
        .groups
        .iter()
        .map(|(group, entries)| {
            let group_ns: u64 = entries.values().map(|e| e.total_ns).sum();
            let mut entries: Vec<_> = entries.iter().collect();
            // heaviest first, ties by name so the output is stable
            entries.sort_by(|a, b| b.1.total_ns.cmp(&a.1.total_ns).then(a.0.cmp(b.0)));

            LogTree {
                label: format!("{group} [ {:.2?} ]", Duration::from_nanos(group_ns)),
                children: entries
                    .into_iter()
                    .map(|(name, entry)| LogTree::leaf(label(name, entry, group_ns, config)))
                    .collect(),
            }
        })
        .collect();

    LogTree {
        label: "gpu-view summary".to_string(),
        children,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::{KernelRecord, MemcpyType, MemoryCopyRecord, MemoryType};

    fn config() -> Config {
        Config {
            attention_above_percent: 25.0,
            relevant_above_percent: 2.5,
            no_color: true,
        }
    }

    fn kernel(symbols: &SymbolTable, name: &str, duration: u64) -> DeviceOperation {
        let mut record = KernelRecord::new();
        record.name = symbols.intern(name);
        record.start_timestamp = 1_000;
        record.end_timestamp = 1_000 + duration;
        DeviceOperation::Kernel(record)
    }

    #[test]
    fn aggregates_per_name() {
        let symbols = Arc::new(SymbolTable::new());
        let (sink, guard) = SummarySink::new(symbols.clone(), config());

        sink.on_device_operation(&kernel(&symbols, "gemm", 3_000));
        sink.on_device_operation(&kernel(&symbols, "gemm", 5_000));
        sink.on_device_operation(&kernel(&symbols, "relu", 2_000));
        let mut copy = MemoryCopyRecord::new();
        copy.memcpy_type = MemcpyType::new(MemoryType::Host, MemoryType::Device);
        copy.bytes = 2048;
        sink.on_device_operation(&DeviceOperation::MemoryCopy(copy));

        let summary = guard.render();
        let lines: Vec<_> = summary.lines().collect();
        assert_eq!(lines[0], "gpu-view summary");
        assert_eq!(lines[1], "└── Device operations [ 10.00µs ]");
        assert_eq!(
            lines[2],
            "    ├── gemm [ 8.00µs | 80.00% ] (2 calls, min 3.00µs, max 5.00µs)"
        );
        assert_eq!(lines[3], "    ├── relu [ 2.00µs | 20.00% ] (1 calls)");
        assert_eq!(
            lines[4],
            "    └── H2D copy [ 0.00ns | 0.00% ] (1 calls, 2.00 KiB)"
        );
    }

    #[test]
    fn ignores_unsummarized_kinds() {
        let (sink, _guard) = SummarySink::new(Arc::new(SymbolTable::new()), config());
        assert!(sink.wants(ViewKind::DriverApiCall));
        assert!(!sink.wants(ViewKind::ExternalCorrelation));
        assert!(!sink.wants(ViewKind::CollectionOverhead));
    }

    #[test]
    fn byte_units() {
        assert_eq!(format_bytes(512), "512 B");
        assert_eq!(format_bytes(16 * 1024 * 1024), "16.00 MiB");
    }
}
