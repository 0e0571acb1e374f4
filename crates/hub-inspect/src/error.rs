//! Location-tagged inspection errors.

#[derive(Debug, Clone, thiserror::Error)]
pub enum InspectError {
    #[error("{path}: NaN or infinite number is not representable in a document store")]
    NonFinite { path: String },
    #[error("document missing a string `_id` (doc index {index})")]
    MissingId { index: usize },
}
