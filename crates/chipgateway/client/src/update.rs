//! Validation of client download addresses sent by the server

use url::Url;

/// Reasons a download address is rejected
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UpdateUrlError {
    /// Not a URL
    #[error("download address is not a valid URL: {0}")]
    Malformed(String),
    /// Any scheme but https
    #[error("download address uses scheme {0}, expected https")]
    InsecureScheme(String),
    /// Host not on the allow-list
    #[error("download host {0} is not allowed")]
    HostNotAllowed(String),
}

/// Which download addresses may be shown to the user
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UpdatePolicy {
    enforce: bool,
    allowed: Vec<String>,
}

impl UpdatePolicy {
    /// Create a policy; `allowed` holds exact hosts and `*.` wildcard patterns
    pub fn new(enforce: bool, allowed: Vec<String>) -> Self {
        let allowed = allowed
            .into_iter()
            .map(|pattern| pattern.trim().to_ascii_lowercase())
            .filter(|pattern| !pattern.is_empty())
            .collect();
        Self { enforce, allowed }
    }

    /// Validate `address` and return the parsed URL
    pub fn check(&self, address: &str) -> Result<Url, UpdateUrlError> {
        let url = Url::parse(address.trim()).map_err(|e| UpdateUrlError::Malformed(e.to_string()))?;
        if url.scheme() != "https" {
            return Err(UpdateUrlError::InsecureScheme(url.scheme().to_owned()));
        }
        if self.enforce {
            let host = url
                .host_str()
                .ok_or_else(|| UpdateUrlError::Malformed("address has no host".into()))?
                .to_ascii_lowercase();
            if !self.allowed.iter().any(|pattern| host_matches(pattern, &host)) {
                return Err(UpdateUrlError::HostNotAllowed(host));
            }
        }
        Ok(url)
    }
}

fn host_matches(pattern: &str, host: &str) -> bool {
    match pattern.strip_prefix("*.") {
        Some(domain) => host
            .strip_suffix(domain)
            .is_some_and(|prefix| prefix.len() > 1 && prefix.ends_with('.')),
        None => pattern == host,
    }
}
