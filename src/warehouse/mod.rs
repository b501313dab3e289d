//! Warehouse Query Service
//!
//! HTTP access to the columnar log warehouse. The warehouse is an opaque
//! remote query service: SQL goes in over a POST, tabular JSON comes back.
//! The [`QueryTransport`] trait is the seam the search session depends on,
//! so tests can substitute a counting mock for the real client.

mod client;

pub use client::{
    ColumnMeta, QueryRequest, QueryResponse, QueryTransport, WarehouseClient, WarehouseConfig,
    WarehouseError,
};
