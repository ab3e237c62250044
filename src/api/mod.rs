//! S3 API implementation

pub mod admin;
pub mod auth;
mod errors;
pub mod handlers;
pub mod sig;
pub mod token;
mod xml;

pub use errors::S3Error;
