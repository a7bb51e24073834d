/*!
 * Accelerator and model lifecycle management.
 *
 * - `device`: probes that read accelerator memory
 * - `manager`: memory accounting and the loaded-model registry
 * - `registry`: cached model artifacts and their metadata store
 * - `fetcher`: artifact download from a model hub
 */

pub mod device;
pub mod fetcher;
pub mod manager;
pub mod registry;

pub use device::{DeviceMemory, DeviceProbe, NvidiaSmiProbe, StaticProbe};
pub use fetcher::{ArtifactFetcher, HubFetcher};
pub use manager::{LoadedModelInfo, MemorySnapshot, OomCheck, ResourceManager};
pub use registry::{ModelDescriptor, ModelKind, ModelRegistry};
