use once_cell::sync::Lazy;
use regex::Regex;
use url::Url;

static PUSH_TOKEN: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(ExponentPushToken|ExpoPushToken)\[[A-Za-z0-9_-]+\]$").expect("push token pattern is valid")
});

/// Returns `true` if the provided string parses as an `http` or `https` URL with a host.
pub fn is_valid_url(value: &str) -> bool {
    Url::parse(value)
        .map(|url| matches!(url.scheme(), "http" | "https") && url.host().is_some())
        .unwrap_or(false)
}

/// Returns `true` if the provided string has the shape of a push gateway device token
/// (`ExponentPushToken[...]`).
pub fn is_valid_push_token(value: &str) -> bool {
    PUSH_TOKEN.is_match(value)
}
