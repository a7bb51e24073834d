/*!
 * Accelerator memory probes.
 *
 * A probe returns the raw device figures; the resource manager turns them into
 * a `MemorySnapshot`. A probe that cannot read the device returns `None`,
 * which every capacity check treats as "cannot load".
 */

use log::debug;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::process::Command;

/// Raw memory figures of one accelerator, in GB
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeviceMemory {
    /// Physical memory on the device
    pub total_gb: f64,
    /// Memory held by live tensors/allocations
    pub allocated_gb: f64,
    /// Memory reserved by the allocator, at least `allocated_gb` in practice
    pub reserved_gb: f64,
}

impl DeviceMemory {
    pub fn new(total_gb: f64, allocated_gb: f64, reserved_gb: f64) -> Self {
        Self {
            total_gb,
            allocated_gb,
            reserved_gb,
        }
    }
}

/// Source of device memory figures
pub trait DeviceProbe: Send + Sync {
    /// Read the device; `None` when it cannot be queried
    fn query(&self) -> Option<DeviceMemory>;

    /// Short name for logs
    fn name(&self) -> &str;
}

/// Probe returning configured figures
///
/// Figures can be replaced at runtime or scripted as a queue, the last queued
/// value sticking once the queue drains.
pub struct StaticProbe {
    current: Mutex<Option<DeviceMemory>>,
    script: Mutex<VecDeque<Option<DeviceMemory>>>,
}

impl StaticProbe {
    /// Probe that always reports the given figures
    pub fn new(total_gb: f64, allocated_gb: f64, reserved_gb: f64) -> Self {
        Self::from_memory(Some(DeviceMemory::new(total_gb, allocated_gb, reserved_gb)))
    }

    /// Probe that never has a device, for CPU-only hosts
    pub fn unavailable() -> Self {
        Self::from_memory(None)
    }

    pub fn from_memory(memory: Option<DeviceMemory>) -> Self {
        Self {
            current: Mutex::new(memory),
            script: Mutex::new(VecDeque::new()),
        }
    }

    /// Probe that replays `readings` one per query
    pub fn scripted(readings: Vec<Option<DeviceMemory>>) -> Self {
        let probe = Self::unavailable();
        *probe.script.lock() = readings.into();
        probe
    }

    /// Replace the reported figures
    pub fn set(&self, memory: Option<DeviceMemory>) {
        let mut current = self.current.lock();
        self.script.lock().clear();
        *current = memory;
    }
}

impl DeviceProbe for StaticProbe {
    fn query(&self) -> Option<DeviceMemory> {
        let mut current = self.current.lock();
        if let Some(next) = self.script.lock().pop_front() {
            *current = next;
        }
        *current
    }

    fn name(&self) -> &str {
        "static"
    }
}

/// Probe backed by `nvidia-smi`
pub struct NvidiaSmiProbe {
    device_index: u32,
    binary: String,
}

impl NvidiaSmiProbe {
    pub fn new(device_index: u32) -> Self {
        Self {
            device_index,
            binary: "nvidia-smi".to_string(),
        }
    }

    /// Use a different executable, e.g. an absolute path
    pub fn with_binary(mut self, binary: impl Into<String>) -> Self {
        self.binary = binary.into();
        self
    }

    /// Parse one `memory.total, memory.used[, memory.reserved]` CSV row in MiB
    pub fn parse_output(output: &str) -> Option<DeviceMemory> {
        let line = output.lines().find(|l| !l.trim().is_empty())?;
        let values: Vec<f64> = line
            .split(',')
            .map(|v| v.trim().parse::<f64>())
            .collect::<Result<_, _>>()
            .ok()?;

        let (total, used, reserved) = match values.as_slice() {
            [total, used] => (*total, *used, *used),
            [total, used, reserved, ..] => (*total, *used, used.max(*reserved)),
            _ => return None,
        };
        if total <= 0.0 {
            return None;
        }

        Some(DeviceMemory::new(total / 1024.0, used / 1024.0, reserved / 1024.0))
    }
}

impl DeviceProbe for NvidiaSmiProbe {
    fn query(&self) -> Option<DeviceMemory> {
        let output = Command::new(&self.binary)
            .arg("--query-gpu=memory.total,memory.used")
            .arg("--format=csv,noheader,nounits")
            .arg("-i")
            .arg(self.device_index.to_string())
            .output();

        match output {
            Ok(out) if out.status.success() => {
                Self::parse_output(&String::from_utf8_lossy(&out.stdout))
            }
            Ok(out) => {
                debug!(
                    "nvidia-smi exited with {}: {}",
                    out.status,
                    String::from_utf8_lossy(&out.stderr).trim()
                );
                None
            }
            Err(e) => {
                debug!("nvidia-smi not available: {}", e);
                None
            }
        }
    }

    fn name(&self) -> &str {
        "nvidia-smi"
    }
}
