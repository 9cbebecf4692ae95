mod client;

pub use client::{ProfiledClient, SqlParam};
