use crate::error::ExportError;

/// In-process caller identity used for outbound calls. Workers rebuild it
/// from the identity snapshot carried inside a task; all three fields are
/// mandatory.
#[derive(Debug, Clone)]
pub struct Session {
    user_id: i64,
    domain_id: i64,
    token: String,
}

impl Session {
    pub fn new(user_id: i64, domain_id: i64, token: impl Into<String>) -> Result<Self, ExportError> {
        let token = token.into();
        if user_id == 0 {
            return Err(ExportError::Unauthenticated("user_id is required".into()));
        }
        if domain_id == 0 {
            return Err(ExportError::Unauthenticated("domain_id is required".into()));
        }
        if token.is_empty() {
            return Err(ExportError::Unauthenticated("access token is required".into()));
        }
        Ok(Session {
            user_id,
            domain_id,
            token,
        })
    }

    pub fn user_id(&self) -> i64 {
        self.user_id
    }

    pub fn domain_id(&self) -> i64 {
        self.domain_id
    }

    pub fn token(&self) -> &str {
        &self.token
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_missing_identity_parts() {
        assert!(Session::new(0, 1, "tok").is_err());
        assert!(Session::new(1, 0, "tok").is_err());
        assert!(Session::new(1, 1, "").is_err());
    }

    #[test]
    fn accepts_complete_identity() {
        let session = Session::new(7, 3, "tok").unwrap();
        assert_eq!(session.user_id(), 7);
        assert_eq!(session.domain_id(), 3);
        assert_eq!(session.token(), "tok");
    }
}
