use std::fmt;
use std::net::SocketAddr;
use std::time::Instant;

use crate::profiler::QueryParam;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TrafficDirection {
    ClientToServer,
    ServerToClient,
}

/// A chunk of bytes copied off one side of a proxied connection.
#[derive(Debug)]
pub struct TrafficData {
    pub direction: TrafficDirection,
    pub client_addr: SocketAddr,
    pub data: Vec<u8>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ConnectionInfo {
    pub user_name: String,
    pub database: String,
    pub application_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueryType {
    Select,
    Insert,
    Update,
    Delete,
    Create,
    Drop,
    Alter,
    Transaction,
    Other(String),
}

impl QueryType {
    /// Short tag attached to recorded queries.
    pub fn label(&self) -> &'static str {
        match self {
            QueryType::Select => "SELECT",
            QueryType::Insert => "INSERT",
            QueryType::Update => "UPDATE",
            QueryType::Delete => "DELETE",
            QueryType::Create => "CREATE",
            QueryType::Drop => "DROP",
            QueryType::Alter => "ALTER",
            QueryType::Transaction => "TRANSACTION",
            QueryType::Other(_) => "OTHER",
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            QueryType::Other(word) if !word.is_empty() => write!(f, "{}", word.to_uppercase()),
            other => write!(f, "{}", other.label()),
        }
    }
}

/// A statement sent by the client whose completion has not been seen yet.
#[derive(Debug, Clone)]
pub struct PendingStatement {
    pub query: String,
    pub query_type: QueryType,
    pub params: Vec<QueryParam>,
    pub queued_at: Instant,
}
