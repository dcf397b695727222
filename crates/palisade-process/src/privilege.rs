//! Privilege-elevation prefix resolution for "become" requests.

use crate::error::ExecError;

const HELPERS: [&str; 2] = ["sudo", "doas"];

/// Resolve the command prefix that runs a child as `username`.
///
/// Returns an empty prefix when the current user already is `username`, so
/// callers can prepend the result unconditionally. Otherwise the first
/// available helper on PATH is used.
pub fn privilege_prefix(username: &str) -> Result<Vec<String>, ExecError> {
    if whoami::username() == username {
        return Ok(Vec::new());
    }

    for helper in HELPERS {
        if let Ok(path) = which::which(helper) {
            return Ok(vec![
                path.to_string_lossy().into_owned(),
                "-u".to_string(),
                username.to_string(),
            ]);
        }
    }

    Err(ExecError::MissingPrivilegeHelper)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn same_user_needs_no_prefix() {
        let current = whoami::username();
        assert_eq!(privilege_prefix(&current).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn different_user_resolves_helper_or_errors() {
        // Whichever of sudo/doas exists must be used with `-u USER`; on a
        // system with neither, the lookup must fail cleanly.
        match privilege_prefix("palisade-nobody") {
            Ok(prefix) => {
                assert_eq!(prefix.len(), 3);
                assert!(prefix[0].ends_with("sudo") || prefix[0].ends_with("doas"));
                assert_eq!(prefix[1], "-u");
                assert_eq!(prefix[2], "palisade-nobody");
            }
            Err(err) => assert!(matches!(err, ExecError::MissingPrivilegeHelper)),
        }
    }
}
