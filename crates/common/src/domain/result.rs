use thiserror::Error;

pub type DomainResult<T> = Result<T, DomainError>;

/// Coarse error classification shared by every access-control operation.
///
/// Callers at an API edge translate these into transport status codes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    InvalidDomain,
    NotFound,
    Conflict,
    Forbidden,
    BadRequest,
    Internal,
}

#[derive(Error, Debug)]
pub enum DomainError {
    #[error("Invalid domain: {0}")]
    InvalidDomain(String),

    #[error("domain {0:?} does not exist")]
    DomainNotFound(String),

    #[error("role {0:?} does not exist")]
    RoleNotFound(String),

    #[error("role {0:?} already exists")]
    RoleAlreadyExists(String),

    #[error("Users assigned to the role {0:?}. You cannot delete a role that has users assigned")]
    RoleHasUsers(String),

    #[error("user {user} does not have {permission}")]
    Forbidden { user: String, permission: String },

    #[error("resource {0} does not require a permission or does not exist")]
    UnknownResource(String),

    #[error("resource {resource} does not require permission {permission}")]
    PermissionNotApplicable {
        permission: String,
        resource: String,
    },

    #[error("role {role} cannot be granted {permission} on immutable resource {resource}")]
    ImmutableResource {
        role: String,
        permission: String,
        resource: String,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Authorization error: {0}")]
    AuthorizationError(String),

    #[error("Repository error: {0}")]
    RepositoryError(#[from] anyhow::Error),
}

impl DomainError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            DomainError::InvalidDomain(_) => ErrorKind::InvalidDomain,
            DomainError::DomainNotFound(_) | DomainError::RoleNotFound(_) => ErrorKind::NotFound,
            DomainError::RoleAlreadyExists(_) => ErrorKind::Conflict,
            DomainError::Forbidden { .. } => ErrorKind::Forbidden,
            DomainError::RoleHasUsers(_)
            | DomainError::UnknownResource(_)
            | DomainError::PermissionNotApplicable { .. }
            | DomainError::ImmutableResource { .. }
            | DomainError::ValidationError(_) => ErrorKind::BadRequest,
            DomainError::AuthorizationError(_) | DomainError::RepositoryError(_) => {
                ErrorKind::Internal
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_kinds() {
        assert_eq!(
            DomainError::InvalidDomain("t9".to_string()).kind(),
            ErrorKind::InvalidDomain
        );
        assert_eq!(
            DomainError::DomainNotFound("t9".to_string()).kind(),
            ErrorKind::NotFound
        );
        assert_eq!(
            DomainError::RoleAlreadyExists("Viewer".to_string()).kind(),
            ErrorKind::Conflict
        );
        assert_eq!(
            DomainError::RoleHasUsers("Viewer".to_string()).kind(),
            ErrorKind::BadRequest
        );
        assert_eq!(
            DomainError::RepositoryError(anyhow::anyhow!("connection reset")).kind(),
            ErrorKind::Internal
        );
    }

    #[test]
    fn test_forbidden_message_names_user_and_permission() {
        let err = DomainError::Forbidden {
            user: "alice".to_string(),
            permission: "ViewUsers".to_string(),
        };
        assert_eq!(err.to_string(), "user alice does not have ViewUsers");
        assert_eq!(err.kind(), ErrorKind::Forbidden);
    }
}
