/*!
 * Accelerator memory accounting and the loaded-model registry.
 *
 * Every model load goes through `can_load`/`check_oom_risk` before its handle
 * is registered here. The registry holds at most one entry per model id and is
 * guarded by a single mutex; nothing in this module awaits or blocks on I/O
 * beyond the device probe itself.
 */

use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::collections::HashMap;
use std::sync::Arc;

use crate::app_config::{DeviceKind, ResourceConfig};
use crate::resources::device::{DeviceMemory, DeviceProbe, NvidiaSmiProbe, StaticProbe};

/// Point-in-time memory reading, in GB
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    pub total_gb: f64,
    pub allocated_gb: f64,
    pub reserved_gb: f64,
    pub free_gb: f64,
    pub utilization_pct: f64,
}

impl MemorySnapshot {
    /// Derive free memory and utilization from raw device figures
    pub fn from_device(memory: DeviceMemory) -> Self {
        let total = memory.total_gb.max(0.0);
        let used = memory.allocated_gb.max(memory.reserved_gb).max(0.0);
        let free_gb = (total - used).max(0.0);
        let utilization_pct = if total > 0.0 {
            (total - free_gb) / total * 100.0
        } else {
            0.0
        };

        Self {
            total_gb: total,
            allocated_gb: memory.allocated_gb,
            reserved_gb: memory.reserved_gb,
            free_gb,
            utilization_pct,
        }
    }
}

/// Outcome of an OOM risk check
#[derive(Debug, Clone, PartialEq)]
pub struct OomCheck {
    /// Whether the load may proceed
    pub safe: bool,
    /// Set when the load is refused or would run the device hot
    pub warning: Option<String>,
}

/// Handle type stored in the registry
pub type SharedHandle = Arc<dyn Any + Send + Sync>;

/// A registered model
#[derive(Clone)]
pub struct LoadedModel {
    pub handle: SharedHandle,
    pub estimated_gb: f64,
    pub loaded_at: DateTime<Utc>,
}

impl std::fmt::Debug for LoadedModel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadedModel")
            .field("estimated_gb", &self.estimated_gb)
            .field("loaded_at", &self.loaded_at)
            .finish()
    }
}

/// Summary row for listings
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LoadedModelInfo {
    pub model_id: String,
    pub estimated_gb: f64,
    pub loaded_at: String,
}

/// Tracks device memory and owns the loaded-model registry
pub struct ResourceManager {
    probe: Arc<dyn DeviceProbe>,
    safety_margin_gb: f64,
    warn_utilization_pct: f64,
    loaded: Mutex<HashMap<String, LoadedModel>>,
}

impl ResourceManager {
    pub fn new(probe: Arc<dyn DeviceProbe>, safety_margin_gb: f64) -> Self {
        Self {
            probe,
            safety_margin_gb: safety_margin_gb.max(0.0),
            warn_utilization_pct: 90.0,
            loaded: Mutex::new(HashMap::new()),
        }
    }

    /// Build the manager and its probe from configuration
    pub fn from_config(config: &ResourceConfig) -> Self {
        let probe: Arc<dyn DeviceProbe> = match config.device {
            DeviceKind::Nvidia => Arc::new(NvidiaSmiProbe::new(config.device_index)),
            DeviceKind::Static if config.static_total_gb > 0.0 => {
                Arc::new(StaticProbe::new(config.static_total_gb, 0.0, 0.0))
            }
            DeviceKind::Static => Arc::new(StaticProbe::unavailable()),
        };
        info!("Using {} accelerator probe", probe.name());
        Self::new(probe, config.safety_margin_gb).with_warn_threshold(config.warn_utilization_pct)
    }

    /// Utilization percentage above which `check_oom_risk` warns
    pub fn with_warn_threshold(mut self, pct: f64) -> Self {
        self.warn_utilization_pct = pct;
        self
    }

    pub fn safety_margin_gb(&self) -> f64 {
        self.safety_margin_gb
    }

    /// Fresh reading from the device, never cached
    pub fn snapshot(&self) -> Option<MemorySnapshot> {
        self.probe.query().map(MemorySnapshot::from_device)
    }

    /// Free memory minus the safety margin, zero without a device
    pub fn available_gb(&self) -> f64 {
        self.snapshot()
            .map(|s| (s.free_gb - self.safety_margin_gb).max(0.0))
            .unwrap_or(0.0)
    }

    /// Whether a load of `estimated_gb` fits
    pub fn can_load(&self, estimated_gb: f64) -> bool {
        match self.snapshot() {
            Some(snapshot) => estimated_gb <= snapshot.free_gb - self.safety_margin_gb,
            None => false,
        }
    }

    /// Projected risk of loading `additional_gb` more
    pub fn check_oom_risk(&self, additional_gb: f64) -> OomCheck {
        let Some(snapshot) = self.snapshot() else {
            return OomCheck {
                safe: false,
                warning: Some("Accelerator memory cannot be queried".to_string()),
            };
        };

        let available = (snapshot.free_gb - self.safety_margin_gb).max(0.0);
        if additional_gb > available {
            return OomCheck {
                safe: false,
                warning: Some(format!(
                    "Requested {:.2} GB exceeds {:.2} GB available",
                    additional_gb, available
                )),
            };
        }

        let projected_pct = if snapshot.total_gb > 0.0 {
            (snapshot.total_gb - snapshot.free_gb + additional_gb) / snapshot.total_gb * 100.0
        } else {
            100.0
        };
        if projected_pct > self.warn_utilization_pct {
            return OomCheck {
                safe: true,
                warning: Some(format!(
                    "Projected utilization {:.1}% exceeds {:.1}%",
                    projected_pct, self.warn_utilization_pct
                )),
            };
        }

        OomCheck {
            safe: true,
            warning: None,
        }
    }

    /// Batch size scaled to available memory, between `base` and `base * 4`
    pub fn optimal_batch_size(&self, base: usize, per_item_mb: f64) -> usize {
        if per_item_mb <= 0.0 || !per_item_mb.is_finite() {
            return base;
        }
        let Some(snapshot) = self.snapshot() else {
            return base;
        };

        let available_mb = (snapshot.free_gb - self.safety_margin_gb).max(0.0) * 1024.0;
        let fitting = (available_mb * 0.8 / per_item_mb).floor() as usize;
        base.max(fitting.min(base.saturating_mul(4)))
    }

    /// Register a loaded model, returning any entry it replaced
    pub fn register<T>(&self, model_id: &str, handle: Arc<T>, estimated_gb: f64) -> Option<LoadedModel>
    where
        T: Any + Send + Sync,
    {
        let entry = LoadedModel {
            handle,
            estimated_gb,
            loaded_at: Utc::now(),
        };
        let previous = self.loaded.lock().insert(model_id.to_string(), entry);
        if previous.is_some() {
            warn!("Model {} was already registered; replacing its handle", model_id);
        } else {
            debug!("Registered model {} ({:.2} GB)", model_id, estimated_gb);
        }
        previous
    }

    /// Drop a model from the registry
    pub fn unregister(&self, model_id: &str) -> Option<LoadedModel> {
        let removed = self.loaded.lock().remove(model_id);
        if removed.is_some() {
            debug!("Unregistered model {}", model_id);
        }
        removed
    }

    /// Typed handle of a registered model
    pub fn handle<T>(&self, model_id: &str) -> Option<Arc<T>>
    where
        T: Any + Send + Sync,
    {
        let handle = self.loaded.lock().get(model_id).map(|m| m.handle.clone())?;
        handle.downcast::<T>().ok()
    }

    pub fn is_loaded(&self, model_id: &str) -> bool {
        self.loaded.lock().contains_key(model_id)
    }

    /// Registered models, sorted by id
    pub fn loaded_models(&self) -> Vec<LoadedModelInfo> {
        let mut models: Vec<LoadedModelInfo> = self
            .loaded
            .lock()
            .iter()
            .map(|(id, m)| LoadedModelInfo {
                model_id: id.clone(),
                estimated_gb: m.estimated_gb,
                loaded_at: m.loaded_at.to_rfc3339(),
            })
            .collect();
        models.sort_by(|a, b| a.model_id.cmp(&b.model_id));
        models
    }

    /// Sum of estimated sizes of registered models
    pub fn registered_gb(&self) -> f64 {
        self.loaded.lock().values().map(|m| m.estimated_gb).sum()
    }
}
