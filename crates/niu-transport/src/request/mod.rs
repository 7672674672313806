//! Signed and encrypted request/response exchange with the API server.

pub mod client;
pub mod http;
pub mod pipeline;
pub mod single_flight;

pub use client::{login_redirect, RequestOptions, SecureClient};
#[cfg(feature = "http")]
pub use http::ReqwestTransport;
pub use http::{HttpRequest, HttpResponse, HttpTransport, Method};
pub use pipeline::{Pipeline, ResponseBody};
pub use single_flight::SingleFlight;
