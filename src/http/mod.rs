//! HTTP wire handling.
//!
//! # Data Flow
//! ```text
//! raw bytes from the client socket
//!     → codec.rs (request line, headers, body framing)
//!     → HttpRequest (immutable once parsed)
//!     → plugin pipeline / proxy engine
//!
//! synthesized responses (deny, errors, CONNECT established)
//!     → response.rs (canonical serialization)
//!     → raw bytes to the client socket
//! ```
//!
//! # Design Decisions
//! - Header order and name case are preserved; lookup is case-insensitive
//! - Body framing: Content-Length, chunked, or no body — nothing else
//! - One request per connection (no keep-alive)

pub mod codec;
pub mod request;
pub mod response;

pub use codec::{read_request, CodecError, CodecLimits};
pub use request::{HeaderMap, HttpRequest};
pub use response::HttpResponse;
