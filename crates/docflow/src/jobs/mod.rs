//! Job lifecycle tracking: polling, classification, registry and events

pub mod classify;
mod events;
mod poller;
mod registry;
mod state;
mod watcher;

pub use events::{EventHub, JobEvent};
pub use poller::{
    poll_until, synthesized_progress, Classify, Observation, PollPolicy, PollUpdate, StatusSource,
    Terminal,
};
pub use registry::JobRegistry;
pub use state::{JobKind, JobSnapshot, JobState};
pub use watcher::{
    ArtifactSource, JobWatcher, ServiceStatusSource, StatusEndpoint, WatchPlan, WatchRequest,
};
