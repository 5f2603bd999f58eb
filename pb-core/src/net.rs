use lazy_static::lazy_static;
use regex::Regex;

lazy_static! {
    static ref IPV4_RE: Regex = Regex::new(r"\d{1,3}\.\d{1,3}\.\d{1,3}\.\d{1,3}").unwrap();
}

/// Rewrite a silo IP onto the data network: pods reach their home server
/// over the 10.2.0.0/16 interface, not the 10.0.0.0/16 one the silo
/// connects from.
pub fn data_net(silo_ip: &str) -> String {
    match silo_ip.strip_prefix("10.0.") {
        Some(rest) => format!("10.2.{rest}"),
        None => silo_ip.into(),
    }
}

/// Resolve the calling silo's address: the first `X-Forwarded-For` element
/// when present, otherwise the peer address.  Loopback (v4 or v6) maps to
/// the configured testing host so local test runs look like a real silo;
/// everything else is reduced to its first IPv4 dotted quad.
pub fn remote_ip(forwarded_for: Option<&str>, peer_addr: &str, testing_host: &str) -> String {
    let candidate = match forwarded_for.and_then(|h| h.split(',').next()) {
        Some(first) => first.trim().to_string(),
        None => peer_addr.to_string(),
    };

    if is_loopback(&candidate) {
        return testing_host.into();
    }

    match IPV4_RE.find(&candidate) {
        Some(m) => m.as_str().into(),
        None => candidate,
    }
}

fn is_loopback(addr: &str) -> bool {
    addr.contains("127.0.0.1") || addr == "::1" || addr.starts_with("[::1]")
}
