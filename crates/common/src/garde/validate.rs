use garde::{Report, Validate};

use crate::domain::DomainError;

/// Runs garde validation and folds the report into a single `ValidationError`.
pub fn validate_struct<T>(value: &T) -> Result<(), DomainError>
where
    T: Validate,
    T::Context: Default,
{
    value
        .validate()
        .map_err(|report| DomainError::ValidationError(describe_report(&report)))
}

fn describe_report(report: &Report) -> String {
    let mut parts = Vec::new();
    for (path, error) in report.iter() {
        let path = path.to_string();
        if path.is_empty() {
            parts.push(error.message().to_string());
        } else {
            parts.push(format!("{}: {}", path, error.message()));
        }
    }
    parts.join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::ErrorKind;

    #[derive(Validate)]
    struct Assignment {
        #[garde(length(min = 1))]
        user: String,
        #[garde(length(min = 1))]
        role: String,
    }

    #[test]
    fn test_valid_assignment_passes() {
        let assignment = Assignment {
            user: "alice".to_string(),
            role: "Viewer".to_string(),
        };
        assert!(validate_struct(&assignment).is_ok());
    }

    #[test]
    fn test_every_failing_field_is_reported() {
        let assignment = Assignment {
            user: String::new(),
            role: String::new(),
        };
        let err = validate_struct(&assignment).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::BadRequest);

        let message = err.to_string();
        assert!(message.contains("user"));
        assert!(message.contains("role"));
    }
}
