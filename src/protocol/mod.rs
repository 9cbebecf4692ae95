mod messages;
mod types;

pub use messages::{detect_query_type, parse_cstring};
pub use types::{ConnectionInfo, PendingStatement, QueryType, TrafficData, TrafficDirection};
