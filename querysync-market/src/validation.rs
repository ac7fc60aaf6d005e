//! Input validation for write payloads.
//!
//! Failures are [`ValidationError`]s, raised before any remote call.

use querysync_core::{SyncResult, ValidationError};

fn invalid(reason: String) -> querysync_core::SyncError {
    ValidationError::InvalidPayload { reason }.into()
}

/// Non-empty after trimming.
pub trait ValidateNonEmpty {
    fn validate_non_empty(&self, field_name: &str) -> SyncResult<()>;
}

impl ValidateNonEmpty for str {
    fn validate_non_empty(&self, field_name: &str) -> SyncResult<()> {
        if self.trim().is_empty() {
            return Err(invalid(format!("{field_name} must not be empty")));
        }
        Ok(())
    }
}

impl ValidateNonEmpty for String {
    fn validate_non_empty(&self, field_name: &str) -> SyncResult<()> {
        self.as_str().validate_non_empty(field_name)
    }
}

impl<T: ValidateNonEmpty> ValidateNonEmpty for Option<T> {
    fn validate_non_empty(&self, field_name: &str) -> SyncResult<()> {
        match self {
            Some(value) => value.validate_non_empty(field_name),
            None => Err(invalid(format!("{field_name} is required"))),
        }
    }
}

/// Strictly greater than zero.
pub trait ValidatePositive {
    fn validate_positive(&self, field_name: &str) -> SyncResult<()>;
}

macro_rules! impl_validate_positive {
    ($($t:ty),*) => {
        $(
            impl ValidatePositive for $t {
                fn validate_positive(&self, field_name: &str) -> SyncResult<()> {
                    if *self <= 0 as $t {
                        return Err(invalid(format!("{field_name} must be positive, got {self}")));
                    }
                    Ok(())
                }
            }
        )*
    };
}

impl_validate_positive!(i32, i64, u32, u64);

/// Update inputs with all-optional fields.
pub trait HasUpdates {
    fn has_any_updates(&self) -> bool;

    fn validate_has_updates(&self) -> SyncResult<()> {
        if !self.has_any_updates() {
            return Err(invalid(
                "at least one field must be provided for update".to_string(),
            ));
        }
        Ok(())
    }
}
