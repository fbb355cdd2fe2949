pub mod commands;
pub mod config;
pub mod pipeline;

pub use config::Settings;
pub use pipeline::{DeviceSet, Pipeline, PipelineStatus};

/// Install the global tracing subscriber. `RUST_LOG` overrides the default
/// filter.
pub fn init_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
                "sr_autopilot=debug,sr_autopilot_lib=debug,sr_move=debug,sr_capture=info,sr_vision=info".into()
            }),
        )
        .init();
}
