//! Host and origin handling around the gateway address.
//!
//! The gateway usually listens on a loopback address. Two things follow from
//! that: the relay presents a neutral localhost `Origin` when dialing it, and
//! the gateway URL handed to browsers must not point at *their* loopback
//! interface, so it is rewritten to the host the browser used to reach us.

/// `Origin` header sent on the gateway handshake.
pub const DIAL_ORIGIN: &str = "http://localhost";

/// Returns `true` if `host` is a loopback literal.
///
/// Accepts bare hosts as well as bracketed IPv6 (`[::1]`), with or without a
/// trailing port.
pub fn is_loopback_host(host: &str) -> bool {
    matches!(strip_port(host), "localhost" | "127.0.0.1" | "[::1]" | "::1")
}

/// Strip an optional `:port` suffix from a `Host` header value.
///
/// Bracketed IPv6 hosts keep their brackets (`[::1]:8080` -> `[::1]`). A bare
/// IPv6 address without brackets is returned unchanged.
pub fn strip_port(host: &str) -> &str {
    if host.starts_with('[') {
        return match host.find(']') {
            Some(end) => &host[..=end],
            None => host,
        };
    }

    match host.rfind(':') {
        Some(pos) if host[..pos].contains(':') => host,
        Some(pos) => {
            let after = &host[pos + 1..];
            if after.chars().all(|c| c.is_ascii_digit()) {
                &host[..pos]
            } else {
                host
            }
        }
        None => host,
    }
}

/// Adjust `gateway_url` for a browser that reached the relay via
/// `request_host`.
///
/// When the gateway host is a loopback literal it is replaced by the request's
/// host (without port). Otherwise, or when the URL cannot be parsed or the
/// request carried no usable `Host`, the URL is returned as configured.
pub fn gateway_url_for_request(gateway_url: &str, request_host: Option<&str>) -> String {
    let Some(request_host) = request_host.map(strip_port).filter(|h| !h.is_empty()) else {
        return gateway_url.to_string();
    };

    let Ok(mut parsed) = url::Url::parse(gateway_url) else {
        return gateway_url.to_string();
    };

    // host_str() is normalized, so swap on the parsed URL, not the raw text.
    if !parsed.host_str().is_some_and(is_loopback_host) {
        return gateway_url.to_string();
    }
    if parsed.set_host(Some(request_host)).is_err() {
        return gateway_url.to_string();
    }

    let bare_root =
        parsed.path() == "/" && parsed.query().is_none() && parsed.fragment().is_none();
    let mut adjusted = String::from(parsed);
    if bare_root && !gateway_url.ends_with('/') {
        adjusted.pop();
    }
    adjusted
}
