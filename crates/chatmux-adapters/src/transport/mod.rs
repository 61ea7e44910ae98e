//! Transport layer: HTTP status handling and SSE stream decoding shared
//! by all provider adapters.

pub mod http;
pub mod sse;
