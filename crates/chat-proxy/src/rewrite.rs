//! Credential rewriting for the gateway `connect` handshake.
//!
//! The web UI ships with a baked-in placeholder token. Before a `connect`
//! request reaches the gateway, the placeholder (or whatever token the
//! browser sent) is swapped for the token the relay was configured with.
//!
//! The rewrite is purely textual: the frame is never parsed as JSON, so every
//! byte outside the replaced span reaches the gateway untouched.

use std::borrow::Cow;
use std::sync::LazyLock;

use regex::{NoExpand, Regex};

/// Placeholder credential embedded in the bundled web UI.
pub const LEGACY_TOKEN: &str = "99a1282cff39ec6008916302302fe42dd769c6d1fdfc1";

/// Marker identifying a gateway `connect` request.
pub const CONNECT_MARKER: &str = r#""method":"connect""#;

/// Marker identifying the `auth` object inside a `connect` request.
pub const AUTH_MARKER: &str = r#""auth":{"#;

/// Number of leading token characters used to detect a successful rewrite.
const TOKEN_PROBE_CHARS: usize = 8;

static TOKEN_FIELD: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#""token"\s*:\s*"[^"]*""#).expect("token field pattern is valid")
});

/// Returns `true` if `payload` looks like a `connect` request carrying an
/// `auth` object.
pub fn is_connect_with_auth(payload: &str) -> bool {
    payload.contains(CONNECT_MARKER) && payload.contains(AUTH_MARKER)
}

/// Replace the credential inside a `connect` request with `token`.
///
/// 1. The legacy placeholder is replaced literally, in both the compact
///    (`"token":"X"`) and spaced (`"token": "X"`) spellings.
/// 2. If the payload still does not contain the first eight characters of
///    `token`, every `"token":"..."` pair is overwritten with `token`.
///
/// Payloads that are not a `connect` request with an `auth` object are
/// returned borrowed and unchanged.
///
/// Step 2 matches any `token` key in the frame, including ones outside the
/// `auth` object.
pub fn rewrite_connect_token<'a>(payload: &'a str, token: &str) -> Cow<'a, str> {
    if !is_connect_with_auth(payload) {
        return Cow::Borrowed(payload);
    }

    let compact = format!(r#""token":"{LEGACY_TOKEN}""#);
    let spaced = format!(r#""token": "{LEGACY_TOKEN}""#);

    let mut rewritten = payload
        .replace(&compact, &format!(r#""token":"{token}""#))
        .replace(&spaced, &format!(r#""token": "{token}""#));

    if !rewritten.contains(token_probe(token)) {
        let replacement = format!(r#""token":"{token}""#);
        rewritten = TOKEN_FIELD
            .replace_all(&rewritten, NoExpand(&replacement))
            .into_owned();
    }

    if rewritten == payload {
        Cow::Borrowed(payload)
    } else {
        Cow::Owned(rewritten)
    }
}

/// The leading characters of `token` used to check whether it is present.
fn token_probe(token: &str) -> &str {
    match token.char_indices().nth(TOKEN_PROBE_CHARS) {
        Some((idx, _)) => &token[..idx],
        None => token,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replaces_arbitrary_token_via_pattern() {
        let input = r#"{"method":"connect","auth":{"token":"OLD"}}"#;
        let out = rewrite_connect_token(input, "NEWTOK123");
        assert_eq!(out, r#"{"method":"connect","auth":{"token":"NEWTOK123"}}"#);
    }

    #[test]
    fn replaces_legacy_token_compact() {
        let input = format!(
            r#"{{"type":"req","id":"1","method":"connect","params":{{"auth":{{"token":"{LEGACY_TOKEN}"}}}}}}"#
        );
        let out = rewrite_connect_token(&input, "abcdef0123456789");
        assert_eq!(
            out,
            r#"{"type":"req","id":"1","method":"connect","params":{"auth":{"token":"abcdef0123456789"}}}"#
        );
    }

    #[test]
    fn legacy_spaced_variant_keeps_its_spacing() {
        let input =
            format!(r#"{{"method":"connect","auth":{{"token": "{LEGACY_TOKEN}"}}}}"#);
        let out = rewrite_connect_token(&input, "abcdef0123456789");
        assert_eq!(
            out,
            r#"{"method":"connect","auth":{"token": "abcdef0123456789"}}"#
        );
    }

    #[test]
    fn spaced_unknown_token_is_normalised_by_pattern() {
        let input = r#"{"method":"connect","auth":{"token" : "stale"}}"#;
        let out = rewrite_connect_token(input, "fresh-token-value");
        assert_eq!(
            out,
            r#"{"method":"connect","auth":{"token":"fresh-token-value"}}"#
        );
    }

    #[test]
    fn already_configured_token_is_left_alone() {
        let input = r#"{"method":"connect","auth":{"token":"NEWTOK123"}}"#;
        let out = rewrite_connect_token(input, "NEWTOK123");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, input);
    }

    #[test]
    fn non_connect_frames_pass_through() {
        let input = r#"{"method":"chat.send","params":{"token":"OLD","message":"hi"}}"#;
        let out = rewrite_connect_token(input, "NEWTOK123");
        assert!(matches!(out, Cow::Borrowed(_)));
        assert_eq!(out, input);
    }

    #[test]
    fn connect_without_auth_is_unchanged() {
        let input = r#"{"method":"connect","params":{"token":"OLD"}}"#;
        let out = rewrite_connect_token(input, "NEWTOK123");
        assert_eq!(out, input);
    }

    #[test]
    fn bytes_outside_token_are_preserved() {
        let input = r#"{"type":"req", "id":"7","method":"connect","params":{"client":{"id":"webchat-ui"},"auth":{"token":"x"}},"extra":"  spaced  "}"#;
        let out = rewrite_connect_token(input, "configured-token");
        assert_eq!(
            out,
            r#"{"type":"req", "id":"7","method":"connect","params":{"client":{"id":"webchat-ui"},"auth":{"token":"configured-token"}},"extra":"  spaced  "}"#
        );
    }

    #[test]
    fn fallback_rewrites_every_token_key() {
        // Known limitation: unrelated `token` keys in a connect frame are
        // rewritten as well.
        let input = r#"{"method":"connect","auth":{"token":"a"},"device":{"token":"b"}}"#;
        let out = rewrite_connect_token(input, "NEWTOK123");
        assert_eq!(
            out,
            r#"{"method":"connect","auth":{"token":"NEWTOK123"},"device":{"token":"NEWTOK123"}}"#
        );
    }

    #[test]
    fn dollar_signs_in_token_are_literal() {
        let input = r#"{"method":"connect","auth":{"token":"old"}}"#;
        let out = rewrite_connect_token(input, "$1$0abc");
        assert_eq!(out, r#"{"method":"connect","auth":{"token":"$1$0abc"}}"#);
    }

    #[test]
    fn short_tokens_probe_whole_value() {
        assert_eq!(token_probe("abc"), "abc");
        assert_eq!(token_probe("0123456789"), "01234567");
        assert_eq!(token_probe(""), "");
    }

    #[test]
    fn idempotent_on_second_pass() {
        let input = r#"{"method":"connect","auth":{"token":"OLD"}}"#;
        let once = rewrite_connect_token(input, "NEWTOK123").into_owned();
        let twice = rewrite_connect_token(&once, "NEWTOK123");
        assert_eq!(twice, once);
    }
}
