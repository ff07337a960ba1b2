//! HTTP access to the generation API.

pub mod http;

pub use http::{extract_text, AuthStyle, HttpTransport, TransportConfig};
