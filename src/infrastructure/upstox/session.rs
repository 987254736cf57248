use chrono::{DateTime, Utc};

/// Broker session state, owned by the gateway and mutated only by the
/// token-refresh path. No process-wide singletons; everything that needs
/// the session goes through the gateway.
#[derive(Debug, Clone, Default)]
pub struct SessionState {
    pub logged_in: bool,
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionState {
    pub fn authenticated(token: impl Into<String>, expires_at: Option<DateTime<Utc>>) -> Self {
        Self {
            logged_in: true,
            access_token: Some(token.into()),
            expires_at,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        if !self.logged_in || self.access_token.is_none() {
            return false;
        }
        self.expires_at.map(|at| now < at).unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn test_default_is_logged_out() {
        assert!(!SessionState::default().is_valid(Utc::now()));
    }

    #[test]
    fn test_expiry_invalidates() {
        let now = Utc::now();
        let s = SessionState::authenticated("tok", Some(now + Duration::hours(8)));
        assert!(s.is_valid(now));
        assert!(!s.is_valid(now + Duration::hours(9)));
    }

    #[test]
    fn test_no_expiry_stays_valid() {
        let s = SessionState::authenticated("tok", None);
        assert!(s.is_valid(Utc::now() + Duration::days(30)));
    }
}
