//! Domain Types

pub mod instance;
pub mod metrics;
pub mod policy;
pub mod server;
pub mod weights;

pub use instance::{InstanceHeartbeat, InstanceStatus};
pub use metrics::MetricSample;
pub use policy::ServerPolicy;
pub use server::{Pool, ServerDescriptor};
pub use weights::{WeightAllocation, WeightFactors};
