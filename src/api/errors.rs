//! S3 error types and XML responses

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use thiserror::Error;

/// S3 API errors
#[derive(Debug, Clone, Error)]
pub enum S3Error {
    #[error("The specified bucket does not exist.")]
    NoSuchBucket(String),

    #[error("The specified key does not exist.")]
    NoSuchKey(String),

    #[error("The specified multipart upload does not exist.")]
    NoSuchUpload(String),

    #[error("The requested bucket name is not available.")]
    BucketAlreadyExists(String),

    #[error("The bucket you tried to delete is not empty.")]
    BucketNotEmpty(String),

    #[error("The specified bucket is not valid.")]
    InvalidBucketName(String),

    #[error("{0}")]
    InvalidArgument(String),

    #[error("The list of parts was not in ascending order. Parts must be ordered by part number.")]
    InvalidPartOrder,

    #[error("One or more of the specified parts could not be found or did not match: {0}")]
    InvalidPart(String),

    #[error("The requested range is not satisfiable.")]
    InvalidRange,

    #[error("Your proposed upload exceeds the maximum allowed size.")]
    EntityTooLarge { size: u64, max: u64 },

    #[error("The specified method is not allowed against this resource.")]
    MethodNotAllowed,

    #[error("Access Denied")]
    AccessDenied,

    #[error("The request signature we calculated does not match the signature you provided.")]
    SignatureDoesNotMatch,

    #[error("Your request was missing a required header or authentication information.")]
    MissingSecurityHeader,

    #[error("The XML you provided was not well-formed or did not validate.")]
    MalformedXML,

    #[error("We encountered an internal error. Please try again.")]
    InternalError(String),
}

impl S3Error {
    /// Get the S3 error code
    pub fn code(&self) -> &'static str {
        match self {
            S3Error::NoSuchBucket(_) => "NoSuchBucket",
            S3Error::NoSuchKey(_) => "NoSuchKey",
            S3Error::NoSuchUpload(_) => "NoSuchUpload",
            S3Error::BucketAlreadyExists(_) => "BucketAlreadyExists",
            S3Error::BucketNotEmpty(_) => "BucketNotEmpty",
            S3Error::InvalidBucketName(_) => "InvalidBucketName",
            S3Error::InvalidArgument(_) => "InvalidArgument",
            S3Error::InvalidPartOrder => "InvalidPartOrder",
            S3Error::InvalidPart(_) => "InvalidPart",
            S3Error::InvalidRange => "InvalidRange",
            S3Error::EntityTooLarge { .. } => "EntityTooLarge",
            S3Error::MethodNotAllowed => "MethodNotAllowed",
            S3Error::AccessDenied => "AccessDenied",
            S3Error::SignatureDoesNotMatch => "SignatureDoesNotMatch",
            S3Error::MissingSecurityHeader => "MissingSecurityHeader",
            S3Error::MalformedXML => "MalformedXML",
            S3Error::InternalError(_) => "InternalError",
        }
    }

    /// Get the HTTP status code
    pub fn status_code(&self) -> StatusCode {
        match self {
            S3Error::NoSuchBucket(_) | S3Error::NoSuchKey(_) | S3Error::NoSuchUpload(_) => {
                StatusCode::NOT_FOUND
            }
            S3Error::BucketAlreadyExists(_) | S3Error::BucketNotEmpty(_) => StatusCode::CONFLICT,
            S3Error::InvalidBucketName(_)
            | S3Error::InvalidArgument(_)
            | S3Error::InvalidPartOrder
            | S3Error::InvalidPart(_)
            | S3Error::EntityTooLarge { .. }
            | S3Error::MissingSecurityHeader
            | S3Error::MalformedXML => StatusCode::BAD_REQUEST,
            S3Error::InvalidRange => StatusCode::RANGE_NOT_SATISFIABLE,
            S3Error::MethodNotAllowed => StatusCode::METHOD_NOT_ALLOWED,
            S3Error::AccessDenied | S3Error::SignatureDoesNotMatch => StatusCode::FORBIDDEN,
            S3Error::InternalError(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// The Resource element value, where the error names one.
    fn resource(&self) -> &str {
        match self {
            S3Error::NoSuchBucket(r)
            | S3Error::BucketAlreadyExists(r)
            | S3Error::BucketNotEmpty(r)
            | S3Error::InvalidBucketName(r)
            | S3Error::NoSuchKey(r)
            | S3Error::NoSuchUpload(r) => r,
            _ => "",
        }
    }

    /// Generate the XML error document.
    pub fn to_xml(&self) -> String {
        // Wrapped internal detail goes to logs only, never on the wire.
        let message = match self {
            S3Error::InternalError(detail) => {
                tracing::error!("internal error: {}", detail);
                self.to_string()
            }
            other => other.to_string(),
        };

        format!(
            r#"<?xml version="1.0" encoding="UTF-8"?>
<Error>
    <Code>{}</Code>
    <Message>{}</Message>
    <Resource>{}</Resource>
    <RequestId>{}</RequestId>
</Error>"#,
            self.code(),
            super::xml::escape_xml(&message),
            super::xml::escape_xml(self.resource()),
            uuid::Uuid::new_v4(),
        )
    }
}

impl IntoResponse for S3Error {
    fn into_response(self) -> Response {
        let status = self.status_code();
        let body = self.to_xml();

        (status, [("Content-Type", "application/xml")], body).into_response()
    }
}

impl From<crate::storage::StorageError> for S3Error {
    fn from(err: crate::storage::StorageError) -> Self {
        match err {
            crate::storage::StorageError::NotFound(key) => S3Error::NoSuchKey(key),
            other => S3Error::InternalError(other.to_string()),
        }
    }
}

impl From<crate::db::DbError> for S3Error {
    fn from(err: crate::db::DbError) -> Self {
        S3Error::InternalError(err.to_string())
    }
}
