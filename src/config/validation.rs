use super::models::{AuthConfig, BookieConfig, Config};
use std::collections::HashSet;
use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("No ledger directories configured")]
    NoLedgerDirs,

    #[error("Ledger directory listed twice: {0}")]
    DuplicateLedgerDir(PathBuf),

    #[error("Journal directory {0} is also a ledger directory")]
    JournalInLedgerDirs(PathBuf),

    #[error("{field} must be positive")]
    ZeroSize { field: &'static str },

    #[error("Bookie id must not be empty")]
    EmptyBookieId,

    #[error("Authorized role names must not be empty")]
    EmptyRole,
}

/// Validate the entire configuration
pub fn validate(config: &Config) -> Result<(), ValidationError> {
    validate_bookie(&config.bookie)?;
    validate_auth(&config.auth)?;
    Ok(())
}

fn validate_bookie(bookie: &BookieConfig) -> Result<(), ValidationError> {
    if bookie.bookie_id.trim().is_empty() {
        return Err(ValidationError::EmptyBookieId);
    }
    if bookie.ledger_dirs.is_empty() {
        return Err(ValidationError::NoLedgerDirs);
    }

    let mut seen = HashSet::new();
    for dir in &bookie.ledger_dirs {
        if !seen.insert(dir) {
            return Err(ValidationError::DuplicateLedgerDir(dir.clone()));
        }
    }
    if seen.contains(&bookie.journal_dir) {
        return Err(ValidationError::JournalInLedgerDirs(bookie.journal_dir.clone()));
    }

    if bookie.journal_queue_size == 0 {
        return Err(ValidationError::ZeroSize {
            field: "journal_queue_size",
        });
    }
    if bookie.journal_max_batch == 0 {
        return Err(ValidationError::ZeroSize {
            field: "journal_max_batch",
        });
    }
    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ValidationError> {
    if auth.authorized_roles.iter().any(|role| role.trim().is_empty()) {
        return Err(ValidationError::EmptyRole);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        assert!(validate(&Config::default()).is_ok());
    }

    #[test]
    fn test_no_ledger_dirs() {
        let mut config = Config::default();
        config.bookie.ledger_dirs.clear();
        assert!(matches!(validate(&config), Err(ValidationError::NoLedgerDirs)));
    }

    #[test]
    fn test_duplicate_ledger_dir() {
        let mut config = Config::default();
        config.bookie.ledger_dirs = vec![PathBuf::from("/a"), PathBuf::from("/a")];
        assert!(matches!(
            validate(&config),
            Err(ValidationError::DuplicateLedgerDir(_))
        ));
    }

    #[test]
    fn test_journal_shares_ledger_dir() {
        let mut config = Config::default();
        config.bookie.journal_dir = PathBuf::from("/data");
        config.bookie.ledger_dirs = vec![PathBuf::from("/data")];
        assert!(matches!(
            validate(&config),
            Err(ValidationError::JournalInLedgerDirs(_))
        ));
    }

    #[test]
    fn test_zero_queue() {
        let mut config = Config::default();
        config.bookie.journal_queue_size = 0;
        let err = validate(&config).unwrap_err();
        assert_eq!(err.to_string(), "journal_queue_size must be positive");
    }

    #[test]
    fn test_empty_role() {
        let mut config = Config::default();
        config.auth = AuthConfig::with_roles(["ok", " "]);
        assert!(matches!(validate(&config), Err(ValidationError::EmptyRole)));
    }
}
