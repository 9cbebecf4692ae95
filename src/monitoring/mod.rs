mod http_server;
mod report;

pub use http_server::{build_router, start_http_server, AdminState};
pub use report::LogSink;
