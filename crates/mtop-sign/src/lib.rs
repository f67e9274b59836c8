//! Signing primitives for mtop-style gateway APIs.
//!
//! The gateway expects every call to carry a signature computed from a token
//! cookie, the request timestamp, the application key and the JSON payload.
//! This crate provides:
//!
//! - [`sign`]: the deterministic signature function
//! - [`extract_token`]: token derivation from the token cookie value
//! - [`MtopCall`]: the fixed call parameters and their rendering
//! - [`cookie`]: helpers for `name=value; name=value` cookie headers

pub mod cookie;
mod call;
mod signature;

pub use call::{DEFAULT_APP_KEY, MtopCall};
pub use signature::{SignedRequest, TOKEN_DELIMITER, Token, extract_token, md5_hex, sign};
