//! Validation for records and query embeddings.
//!
//! Malformed input is the caller's fault and is rejected immediately, before
//! anything is cached or durably written.

use mneme_types::MemoryRecord;

use crate::error::{MemoryError, Result};

/// Specific validation error types for engine input.
#[derive(Debug, Clone, thiserror::Error)]
pub enum ValidationError {
    /// Record content is empty.
    #[error("record content is empty")]
    EmptyContent,

    /// Record has no user id.
    #[error("record user_id is empty")]
    EmptyUserId,

    /// Record has no bot namespace.
    #[error("record namespace is empty")]
    EmptyNamespace,

    /// Record has no channel id.
    #[error("record channel_id is empty")]
    EmptyChannelId,

    /// Embedding dimension mismatch.
    #[error("embedding dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Expected dimension.
        expected: usize,
        /// Actual dimension.
        actual: usize,
    },

    /// Embedding contains invalid values (NaN or Inf).
    #[error("embedding contains {count} invalid values (NaN or Inf)")]
    InvalidEmbeddingValues {
        /// Number of invalid values found.
        count: usize,
    },
}

impl From<ValidationError> for MemoryError {
    fn from(err: ValidationError) -> Self {
        MemoryError::InvalidData(err.to_string())
    }
}

/// Validate an embedding vector.
///
/// Checks the dimension against the configured size and scans for NaN/Inf
/// values, which would poison distance computations.
pub fn validate_embedding(
    embedding: &[f32],
    expected_dim: usize,
) -> std::result::Result<(), ValidationError> {
    if embedding.len() != expected_dim {
        return Err(ValidationError::DimensionMismatch {
            expected: expected_dim,
            actual: embedding.len(),
        });
    }

    let invalid_count = embedding
        .iter()
        .filter(|v| v.is_nan() || v.is_infinite())
        .count();

    if invalid_count > 0 {
        return Err(ValidationError::InvalidEmbeddingValues {
            count: invalid_count,
        });
    }

    Ok(())
}

/// Validate the identity and content fields of a record.
///
/// The embedding, if present, is validated separately against the index's
/// configured dimensions.
pub fn validate_record(record: &MemoryRecord) -> std::result::Result<(), ValidationError> {
    if record.user_id.is_empty() {
        return Err(ValidationError::EmptyUserId);
    }
    if record.namespace.is_empty() {
        return Err(ValidationError::EmptyNamespace);
    }
    if record.channel_id.is_empty() {
        return Err(ValidationError::EmptyChannelId);
    }
    if record.content.is_empty() {
        return Err(ValidationError::EmptyContent);
    }
    Ok(())
}

/// Convenience wrapper converting to `MemoryError`.
pub fn validate_record_result(record: &MemoryRecord) -> Result<()> {
    validate_record(record).map_err(MemoryError::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use mneme_types::Role;

    #[test]
    fn test_valid_embedding() {
        assert!(validate_embedding(&[0.1, 0.2, 0.3], 3).is_ok());
    }

    #[test]
    fn test_dimension_mismatch() {
        let err = validate_embedding(&[0.1, 0.2], 3).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::DimensionMismatch {
                expected: 3,
                actual: 2
            }
        ));
    }

    #[test]
    fn test_nan_rejected() {
        let err = validate_embedding(&[0.1, f32::NAN, f32::INFINITY], 3).unwrap_err();
        assert!(matches!(
            err,
            ValidationError::InvalidEmbeddingValues { count: 2 }
        ));
    }

    #[test]
    fn test_valid_record() {
        let record = MemoryRecord::turn("u1", "bot", "chan", Role::User, "hello");
        assert!(validate_record(&record).is_ok());
    }

    #[test]
    fn test_empty_fields_rejected() {
        let record = MemoryRecord::turn("", "bot", "chan", Role::User, "hello");
        assert!(matches!(
            validate_record(&record),
            Err(ValidationError::EmptyUserId)
        ));

        let record = MemoryRecord::turn("u1", "bot", "chan", Role::User, "");
        assert!(matches!(
            validate_record(&record),
            Err(ValidationError::EmptyContent)
        ));
    }
}
