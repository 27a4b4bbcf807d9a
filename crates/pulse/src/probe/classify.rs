use std::error::Error as StdError;
use std::fmt;
use std::io;

/// Short category recorded for probes that never got a response
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureCategory {
    ConnectionRefused,
    DnsResolution,
    Tls,
    Connect,
    Request,
}

impl FailureCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            FailureCategory::ConnectionRefused => "connection refused",
            FailureCategory::DnsResolution => "dns resolution failed",
            FailureCategory::Tls => "tls failure",
            FailureCategory::Connect => "connection failed",
            FailureCategory::Request => "request failed",
        }
    }

    /// Walk the error chain of a failed request and pick the most specific category.
    ///
    /// The walk starts below the reqwest error, whose message embeds the request url.
    pub(crate) fn of(err: &reqwest::Error) -> Self {
        let mut source = err.source();

        while let Some(current) = source {
            if let Some(io_err) = current.downcast_ref::<io::Error>() {
                if io_err.kind() == io::ErrorKind::ConnectionRefused {
                    return FailureCategory::ConnectionRefused;
                }
            }
            if let Some(category) = categorize_message(&current.to_string()) {
                return category;
            }
            source = current.source();
        }

        if err.is_connect() {
            FailureCategory::Connect
        } else {
            FailureCategory::Request
        }
    }
}

impl fmt::Display for FailureCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Match the wording hyper, the resolver and the TLS stacks use in their errors
fn categorize_message(message: &str) -> Option<FailureCategory> {
    let message = message.to_ascii_lowercase();

    if message.contains("connection refused") {
        Some(FailureCategory::ConnectionRefused)
    } else if message.contains("dns error")
        || message.contains("failed to lookup address")
        || message.contains("name or service not known")
        || message.contains("no such host")
        || message.contains("nodename nor servname")
    {
        Some(FailureCategory::DnsResolution)
    } else if message.contains("certificate")
        || message.contains("tls")
        || message.contains("ssl")
        || message.contains("handshake")
    {
        Some(FailureCategory::Tls)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_categorize_dns_messages() {
        assert_eq!(
            categorize_message("dns error: failed to lookup address information"),
            Some(FailureCategory::DnsResolution)
        );
        assert_eq!(
            categorize_message("Name or service not known"),
            Some(FailureCategory::DnsResolution)
        );
    }

    #[test]
    fn test_categorize_tls_messages() {
        assert_eq!(
            categorize_message("invalid peer certificate: UnknownIssuer"),
            Some(FailureCategory::Tls)
        );
        assert_eq!(categorize_message("received fatal alert: HandshakeFailure"), Some(FailureCategory::Tls));
    }

    #[test]
    fn test_categorize_refused() {
        assert_eq!(
            categorize_message("Connection refused (os error 111)"),
            Some(FailureCategory::ConnectionRefused)
        );
    }

    #[test]
    fn test_unknown_message_has_no_category() {
        assert_eq!(categorize_message("error sending request"), None);
    }
}
