pub mod controller;
pub mod events;
pub mod feed;
pub mod heartbeat;
pub mod pipeline;
pub mod policy;
pub mod profile;
pub mod provider;
pub mod replay;
pub mod state;
pub mod watchdog;

#[cfg(test)]
mod testing;

pub use controller::TrackingController;
pub use events::{EventBus, TrackingEvent};
pub use pipeline::{AcceptancePipeline, FixOrigin};
pub use policy::{evaluate, Evaluation, PolicyInput};
pub use profile::{resolve, Priority, Profile, SamplingParams};
pub use provider::{
    BatterySource, Fix, NoBattery, PositionProvider, ProviderError, ProviderEvent,
    SatelliteStatus,
};
pub use replay::ReplayProvider;
pub use state::{SharedTrackingState, SignalQuality, SilenceLevel, TrackingState, TrackingStatus};
