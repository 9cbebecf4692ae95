mod handler;
mod parser;

pub use handler::{session_request_id, start_proxy_server};
pub use parser::SessionParser;
