// Tracking: scanner-side registry of tags and fragment reassembly

pub mod collector;
pub mod registry;

pub use collector::{
    CollectEvent, CollectorConfig, FragmentCollector, DEFAULT_EVICTION_HORIZON,
    DEFAULT_STALE_WINDOW,
};
pub use registry::{TagRegistry, TrackedTag};
