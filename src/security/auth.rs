use subtle::ConstantTimeEq;

use crate::{application::config::AuthMode, domain::error::DomainError};

/// Verifies the shared device token if one is configured. Comparison is
/// constant-time. Full per-device credentials are issued by the fleet
/// auth collaborator and are out of scope here.
pub fn authorize(mode: &AuthMode, bearer: Option<&str>) -> Result<(), DomainError> {
    match mode {
        AuthMode::None => Ok(()),
        AuthMode::Token(expected) => verify_secret(bearer, expected),
    }
}

fn verify_secret(provided: Option<&str>, expected: &str) -> Result<(), DomainError> {
    let Some(provided) = provided.map(str::trim).filter(|value| !value.is_empty()) else {
        return Err(DomainError::Unauthorized("missing credentials".to_owned()));
    };

    if provided.as_bytes().ct_eq(expected.as_bytes()).into() {
        Ok(())
    } else {
        Err(DomainError::Unauthorized("invalid credentials".to_owned()))
    }
}

#[cfg(test)]
mod tests {
    use super::authorize;
    use crate::{application::config::AuthMode, domain::error::DomainError};

    #[test]
    fn authorize_accepts_matching_token() {
        let mode = AuthMode::Token("abc".to_owned());
        assert!(authorize(&mode, Some("abc")).is_ok());
    }

    #[test]
    fn authorize_rejects_wrong_or_missing_token() {
        let mode = AuthMode::Token("abc".to_owned());
        assert!(matches!(
            authorize(&mode, Some("zzz")),
            Err(DomainError::Unauthorized(_))
        ));
        assert!(matches!(
            authorize(&mode, None),
            Err(DomainError::Unauthorized(_))
        ));
    }

    #[test]
    fn authorize_is_open_without_configured_token() {
        assert!(authorize(&AuthMode::None, None).is_ok());
    }
}
