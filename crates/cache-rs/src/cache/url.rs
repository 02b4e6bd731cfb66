//! Cache keys for URLs.
//!
//! The key text is the URL with an empty `user:password@` inserted after the scheme and
//! any explicit port removed. The port is hashed separately after the text.

use std::fmt;

#[derive(Clone, Debug, Eq, PartialEq, Hash)]
pub struct CacheUrl {
    /// URL as hashed, for example `http://:@example.com/a`.
    pub text: String,
    pub port: u16,
}

impl CacheUrl {
    /// Parse a URL with an `http` or `https` scheme.
    ///
    /// # Errors
    /// Returns a message if the scheme is missing or unsupported.
    pub fn parse(url: &str) -> Result<Self, String> {
        let (scheme, rest, default_port) = if let Some(rest) = strip_scheme(url, "https://") {
            (&url[..5], rest, 443)
        } else if let Some(rest) = strip_scheme(url, "http://") {
            (&url[..4], rest, 80)
        } else {
            return Err(format!("No scheme provided for: {url}"));
        };

        let authority_end = rest.find('/').unwrap_or(rest.len());
        let (authority, path) = rest.split_at(authority_end);
        let (host, port) = match authority.rsplit_once(':') {
            Some((host, port))
                if !port.is_empty() && port.bytes().all(|b| b.is_ascii_digit()) =>
            {
                match port.parse::<u16>() {
                    Ok(p) => (host, p),
                    Err(_) => (authority, default_port),
                }
            }
            _ => (authority, default_port),
        };

        Ok(Self {
            text: format!("{scheme}://:@{host}{path}"),
            port,
        })
    }

    /// `key` is the 128 bit content key of the URL.
    #[must_use]
    pub fn key(&self) -> [u8; 16] {
        let mut ctx = md5::Context::new();
        ctx.consume(self.text.as_bytes());
        ctx.consume(self.port.to_le_bytes());
        ctx.compute().0
    }
}

impl fmt::Display for CacheUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} (port {})", self.text, self.port)
    }
}

fn strip_scheme<'a>(url: &'a str, prefix: &str) -> Option<&'a str> {
    let head = url.get(..prefix.len())?;
    head.eq_ignore_ascii_case(prefix)
        .then(|| &url[prefix.len()..])
}

/// `hex` renders a key the way it is printed in reports.
#[must_use]
pub fn hex(key: &[u8; 16]) -> String {
    key.iter().map(|b| format!("{b:02x}")).collect()
}
