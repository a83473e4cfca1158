//! Transport Module
//!
//! Single-exchange HTTP execution, payload encoding, and response decoding.

pub mod http;
pub mod payload;
pub mod response;

pub use http::{HttpTransport, Transport, TransportRequest};
pub use payload::{FilePart, MultipartPayload, Payload};
pub use response::{Outcome, RateLimitInfo, Response, ResponseBody};
