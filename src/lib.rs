pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod monitoring;
pub mod profiler;
pub mod protocol;
pub mod proxy;

pub use config::ProfilerConfig;
pub use error::{ProfilerError, Result};
pub use profiler::{
    analyze_profile, format_profile, PerformanceThresholds, ProfileHistory, ProfileRegistry,
    ProfileScope, QueryContext, QueryProfile,
};
pub use proxy::start_proxy_server;
