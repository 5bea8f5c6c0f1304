use crate::models::Principal;

/// Authentication disabled end to end: every caller is the administrator.
#[derive(Debug, Clone, Default)]
pub struct NoneAuthenticator;

impl NoneAuthenticator {
    pub fn new() -> Self {
        Self
    }

    pub fn authenticate(&self) -> Principal {
        Principal::admin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;

    #[test]
    fn test_always_returns_admin() {
        let principal = NoneAuthenticator::new().authenticate();
        assert_eq!(principal.role, Role::Admin);
        assert!(principal.is_authorized);
    }
}
