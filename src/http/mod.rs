//! HTTP transport layer (component A): a persistent HTTP client with retry,
//! 429 honoring, JSON encode/decode, bearer auth, timeouts, and proxy
//! support, on top of which the Matrix API façade (component B) is built.

mod error;
mod transport;

pub use error::TransportError;
pub use transport::{ConnectionMode, HttpResponse, HttpTransport, TransportConfig};
