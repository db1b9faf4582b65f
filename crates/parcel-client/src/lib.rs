//! # parcel-client — Rectangle Query Client
//!
//! Sends one intersect-mode spatial query per [`QueryRectangle`] to the
//! remote map service and returns the raw encrypted payload string.
//!
//! ## Request Shape
//!
//! `POST {api_url}?returnContent=true&token={api_token}` with a JSON body
//! naming the target layer, attribute filter, field list, expected count,
//! and a closed five-point `REGION` boundary built from the rectangle.
//! See [`query::QueryRequest`].
//!
//! ## Transport
//!
//! One long-lived `reqwest::Client` per [`QueryClient`], optionally routed
//! through an authenticated forward proxy, with a 5s connect / 10s overall
//! timeout. At most 10 requests are in flight; 5 idle connections are kept.
//!
//! ## Retry
//!
//! Transport failures and non-2xx statuses are retried under a
//! [`RetryPolicy`] (3 attempts, 2s doubling backoff capped at 10s).
//! Application-level failures (undecodable body, service error object)
//! are returned immediately.
//!
//! [`QueryRectangle`]: parcel_core::QueryRectangle

pub mod config;
pub mod error;
pub mod query;
pub mod retry;

pub use config::{ClientConfig, ConfigError, ProxyConfig};
pub use error::QueryError;
pub use query::{build_query, extract_payload, QueryClient, QueryRequest};
pub use retry::{retry_with_backoff, RetryPolicy};
