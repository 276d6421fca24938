//! Validation for server configs added to a profile.
//!
//! A `Subprocess` server's `command`/`args`/`env` values end up on the
//! argv/envp of a process we spawn ourselves, so we reject shell metacharacters
//! and path traversal up front rather than trying to escape them later.

use crate::error::GatewayError;

const FORBIDDEN_SUBSTRINGS: &[&str] = &[";", "&", "|", "`", "$", "(", ")", ">", "<", "\n"];

/// Rejects command/arg strings containing shell metacharacters or `..`
/// path traversal. Applied to `command`, every entry of `args`, and every
/// value (not key) of `env`.
pub fn validate_subprocess_config(command: &str, args: &[String]) -> Result<(), GatewayError> {
    if command.is_empty() {
        return Err(GatewayError::Validation("command must not be empty".to_string()));
    }
    check_str(command)?;
    for arg in args {
        check_str(arg)?;
    }
    Ok(())
}

fn check_str(value: &str) -> Result<(), GatewayError> {
    for needle in FORBIDDEN_SUBSTRINGS {
        if value.contains(needle) {
            return Err(GatewayError::Validation(format!(
                "value {value:?} contains forbidden character {needle:?}"
            )));
        }
    }
    if value.contains("..") {
        return Err(GatewayError::Validation(format!(
            "value {value:?} contains path traversal sequence \"..\""
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_ordinary_commands() {
        assert!(validate_subprocess_config("npx", &["-y".into(), "@scope/pkg".into()]).is_ok());
    }

    #[test]
    fn rejects_semicolon_injection() {
        let err = validate_subprocess_config("echo", &["hi; rm -rf /".into()]).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }

    #[test]
    fn rejects_command_substitution() {
        assert!(validate_subprocess_config("echo", &["$(whoami)".into()]).is_err());
        assert!(validate_subprocess_config("echo", &["`whoami`".into()]).is_err());
    }

    #[test]
    fn rejects_pipe_and_redirect() {
        assert!(validate_subprocess_config("cat", &["a | b".into()]).is_err());
        assert!(validate_subprocess_config("cat", &["a > /etc/passwd".into()]).is_err());
    }

    #[test]
    fn rejects_path_traversal() {
        assert!(validate_subprocess_config("../../bin/sh", &[]).is_err());
    }

    #[test]
    fn rejects_empty_command() {
        let err = validate_subprocess_config("", &[]).unwrap_err();
        assert!(matches!(err, GatewayError::Validation(_)));
    }
}
