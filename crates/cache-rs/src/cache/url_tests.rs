use super::url::{CacheUrl, hex};

#[test]
fn default_ports_follow_the_scheme() {
    let u = CacheUrl::parse("http://example.com/index.html").unwrap();
    assert_eq!(u.text, "http://:@example.com/index.html");
    assert_eq!(u.port, 80);

    let u = CacheUrl::parse("https://example.com/").unwrap();
    assert_eq!(u.text, "https://:@example.com/");
    assert_eq!(u.port, 443);
}

#[test]
fn explicit_port_is_removed_from_the_text() {
    let u = CacheUrl::parse("http://example.com:8080/a/b").unwrap();
    assert_eq!(u.text, "http://:@example.com/a/b");
    assert_eq!(u.port, 8080);
}

#[test]
fn colon_in_the_path_is_not_a_port() {
    let u = CacheUrl::parse("http://example.com/a:99").unwrap();
    assert_eq!(u.text, "http://:@example.com/a:99");
    assert_eq!(u.port, 80);
}

#[test]
fn scheme_match_ignores_case() {
    let u = CacheUrl::parse("HTTPS://example.com:4443").unwrap();
    assert_eq!(u.text, "HTTPS://:@example.com");
    assert_eq!(u.port, 4443);
}

#[test]
fn missing_scheme_is_an_error() {
    let err = CacheUrl::parse("example.com/a").unwrap_err();
    assert_eq!(err, "No scheme provided for: example.com/a");
    assert!(CacheUrl::parse("ftp://example.com/").is_err());
}

#[test]
fn key_hashes_text_then_port() {
    let u = CacheUrl::parse("http://example.com:8080/a").unwrap();
    let mut raw = b"http://:@example.com/a".to_vec();
    raw.extend_from_slice(&8080u16.to_le_bytes());
    assert_eq!(u.key(), md5::compute(&raw).0);

    let other = CacheUrl::parse("http://example.com:8081/a").unwrap();
    assert_ne!(u.key(), other.key());
}

#[test]
fn hex_is_lowercase_and_padded() {
    let mut key = [0u8; 16];
    key[0] = 0x0a;
    key[15] = 0xff;
    let text = hex(&key);
    assert_eq!(text.len(), 32);
    assert!(text.starts_with("0a00"));
    assert!(text.ends_with("00ff"));
}
