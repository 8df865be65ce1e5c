//! HTTP Basic authentication.

use crate::config::Config;
use base64::Engine;

/// Check a request's `Authorization` header against the configured
/// credentials. Always passes when no credentials are configured.
pub fn authorized(config: &Config, header: Option<&str>) -> bool {
    if !config.auth_required() {
        return true;
    }
    let Some(header) = header else {
        return false;
    };
    let Some(encoded) = header.strip_prefix("Basic ") else {
        return false;
    };
    let Ok(decoded) = base64::engine::general_purpose::STANDARD.decode(encoded.trim()) else {
        return false;
    };
    let Ok(decoded) = String::from_utf8(decoded) else {
        return false;
    };
    let expected = format!(
        "{}:{}",
        config.username.as_deref().unwrap_or(""),
        config.password.as_deref().unwrap_or("")
    );
    decoded == expected
}

/// Encode credentials the way a client would send them. Test helper and
/// the basis for the startup hint log.
pub fn basic_header(username: &str, password: &str) -> String {
    format!(
        "Basic {}",
        base64::engine::general_purpose::STANDARD.encode(format!("{}:{}", username, password))
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn config(username: Option<&str>, password: Option<&str>) -> Config {
        Config {
            path: PathBuf::from("/tmp"),
            host: "localhost".into(),
            port: 7000,
            username: username.map(String::from),
            password: password.map(String::from),
            meta_touch: false,
            debug: false,
            open_in_editor: None,
            no_auth_warning: false,
        }
    }

    #[test]
    fn open_server_accepts_anything() {
        let config = config(None, None);
        assert!(authorized(&config, None));
        assert!(authorized(&config, Some("Basic garbage")));
    }

    #[test]
    fn matching_credentials_pass() {
        let config = config(Some("user"), Some("secret"));
        let header = basic_header("user", "secret");
        assert!(authorized(&config, Some(&header)));
    }

    #[test]
    fn wrong_or_missing_credentials_fail() {
        let config = config(Some("user"), Some("secret"));
        assert!(!authorized(&config, None));
        assert!(!authorized(&config, Some(&basic_header("user", "nope"))));
        assert!(!authorized(&config, Some("Bearer token")));
        assert!(!authorized(&config, Some("Basic not-base64!")));
    }

    #[test]
    fn username_only_still_enforces() {
        let config = config(Some("user"), None);
        assert!(!authorized(&config, None));
        assert!(authorized(&config, Some(&basic_header("user", ""))));
    }
}
