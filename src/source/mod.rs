mod endpoint;
mod registry;
pub mod selector;
mod window;

pub use endpoint::{Bandwidth, Source, SourceConfig, SourceId};
pub use registry::SourceRegistry;
pub use window::{BandwidthSample, BandwidthSampleWindow};
