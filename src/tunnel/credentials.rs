// ABOUTME: Private key loading for hop authentication.
// ABOUTME: Expands ~/ and $VAR references before reading and parsing the key file.

use super::error::{KeyLoadError, KeyLoadReason};
use russh::keys::{PrivateKey, decode_secret_key};
use std::io::ErrorKind;
use std::path::PathBuf;
use std::sync::Arc;

/// Parsed signing key, shared between the hops that use it.
pub type KeyMaterial = Arc<PrivateKey>;

/// Load a private key from `path`, expanding `~/` and environment variables first.
///
/// Any key format russh understands is accepted (OpenSSH Ed25519, ECDSA, RSA and
/// legacy PEM). Encrypted keys are reported as unparseable.
pub fn load_key(path: &str) -> Result<KeyMaterial, KeyLoadError> {
    let expanded = expand_path(path);

    let bytes = std::fs::read(&expanded).map_err(|e| {
        let reason = match e.kind() {
            ErrorKind::NotFound => KeyLoadReason::NotFound,
            _ => KeyLoadReason::Unreadable,
        };
        KeyLoadError::new(&expanded, reason).with_detail(e)
    })?;

    let text = String::from_utf8(bytes)
        .map_err(|e| KeyLoadError::new(&expanded, KeyLoadReason::Unparseable).with_detail(e))?;

    let key = decode_secret_key(&text, None)
        .map_err(|e| KeyLoadError::new(&expanded, KeyLoadReason::Unparseable).with_detail(e))?;

    tracing::debug!(path = %expanded.display(), algorithm = ?key.algorithm(), "loaded private key");
    Ok(Arc::new(key))
}

/// Substitute `$VAR` / `${VAR}` references, then expand a leading `~/`.
///
/// Unset variables expand to the empty string.
pub fn expand_path(path: &str) -> PathBuf {
    let substituted = expand_env(path);

    if substituted == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    } else if let Some(rest) = substituted.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }

    PathBuf::from(substituted)
}

fn expand_env(input: &str) -> String {
    let mut out = String::with_capacity(input.len());
    let mut rest = input;

    while let Some(pos) = rest.find('$') {
        out.push_str(&rest[..pos]);
        let after = &rest[pos + 1..];

        if let Some(braced) = after.strip_prefix('{') {
            match braced.find('}') {
                Some(end) => {
                    out.push_str(&std::env::var(&braced[..end]).unwrap_or_default());
                    rest = &braced[end + 1..];
                }
                None => {
                    out.push_str(&rest[pos..]);
                    rest = "";
                }
            }
            continue;
        }

        let len = after
            .find(|c: char| !is_var_char(c))
            .unwrap_or(after.len());
        if len == 0 {
            out.push('$');
        } else {
            out.push_str(&std::env::var(&after[..len]).unwrap_or_default());
        }
        rest = &after[len..];
    }

    out.push_str(rest);
    out
}

fn is_var_char(c: char) -> bool {
    c == '_' || c.is_ascii_alphanumeric()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn plain_path_is_unchanged() {
        assert_eq!(expand_path("/etc/ssh/key"), PathBuf::from("/etc/ssh/key"));
    }

    #[test]
    fn single_character_path_does_not_panic() {
        assert_eq!(expand_path("k"), PathBuf::from("k"));
        assert_eq!(expand_path(""), PathBuf::from(""));
        assert_eq!(expand_path("$"), PathBuf::from("$"));
    }

    #[test]
    fn tilde_in_the_middle_is_literal() {
        assert_eq!(expand_path("keys/~/id"), PathBuf::from("keys/~/id"));
    }

    #[test]
    fn unterminated_brace_is_kept_literally() {
        assert_eq!(expand_env("/keys/${HOME"), "/keys/${HOME");
    }

    #[test]
    fn lone_dollar_before_separator_is_literal() {
        assert_eq!(expand_env("/a$/b"), "/a$/b");
    }
}
