use clap::Parser;
use std::net::SocketAddr;

#[derive(Parser, Debug, Clone)]
#[command(
    version = env!("CARGO_PKG_VERSION"),
    about = "PostgreSQL query profiler proxy",
    long_about = "Proxies PostgreSQL connections, profiles every statement per client session and flags N+1 query storms"
)]
pub struct CliArguments {
    /// PostgreSQL server address (upstream)
    ///
    /// Example: 127.0.0.1:5432
    #[arg(short = 'u', long, env = "PROFILER_UPSTREAM")]
    pub upstream: SocketAddr,

    /// Proxy listen address (downstream)
    ///
    /// Example: 127.0.0.1:6432
    #[arg(short = 'd', long, env = "PROFILER_DOWNSTREAM")]
    pub downstream: SocketAddr,

    /// Admin HTTP listen address
    #[arg(short = 'a', long, env = "PROFILER_ADMIN_ADDRESS", default_value = "127.0.0.1:8080")]
    pub admin_address: SocketAddr,

    /// A single query slower than this (ms) is reported as slow
    #[arg(long, env = "PROFILER_SLOW_QUERY_MS", default_value_t = 100.0)]
    pub slow_query_ms: f64,

    /// Repeats of one query pattern per session that flag an N+1 storm
    #[arg(long, env = "PROFILER_N1_THRESHOLD", default_value_t = 10)]
    pub n1_threshold: usize,

    /// Query count per session above which batching is recommended
    #[arg(long, env = "PROFILER_MAX_QUERIES_WARNING", default_value_t = 50)]
    pub max_queries_warning: usize,

    /// Cumulative query time (ms) per session above which caching is recommended
    #[arg(long, env = "PROFILER_SLOW_TOTAL_MS", default_value_t = 1000.0)]
    pub slow_total_ms: f64,

    /// Finished profiles kept for the admin API
    #[arg(long, env = "PROFILER_HISTORY_SIZE", default_value_t = 1000)]
    pub history_size: usize,

    /// Raw query text is truncated to this many characters
    #[arg(long, env = "PROFILER_MAX_RAW_QUERY_LEN", default_value_t = 500)]
    pub max_raw_query_len: usize,

    /// Fold inline string and numeric literals when grouping queries
    #[arg(long, env = "PROFILER_FOLD_LITERALS")]
    pub fold_literals: bool,
}
