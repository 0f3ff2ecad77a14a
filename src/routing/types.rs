//! Routing Types

use std::fmt;
use std::path::PathBuf;

/// Outcome of mapping a destination host to a dial strategy
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteDecision {
    /// Destination could not be resolved or does not look like a DNS name
    DnsError,
    /// Smart routing is off (or no backend is running): everything is dialed directly
    AllDirect,
    /// Smart routing is off and a backend is running: everything goes through it
    AllProxy,
    /// Classified as reachable directly
    SelectDirect,
    /// Classified as needing the backend
    SelectProxy,
}

impl RouteDecision {
    /// Build a decision from a `need_proxy` verdict
    pub fn from_verdict(verdict: Option<bool>) -> Self {
        match verdict {
            None => RouteDecision::DnsError,
            Some(true) => RouteDecision::SelectProxy,
            Some(false) => RouteDecision::SelectDirect,
        }
    }

    /// Whether the connection should be dialed through the backend
    pub fn via_backend(&self) -> bool {
        matches!(self, RouteDecision::AllProxy | RouteDecision::SelectProxy)
    }

    /// Whether a connection should be attempted at all
    pub fn is_reachable(&self) -> bool {
        !matches!(self, RouteDecision::DnsError)
    }

    /// Short label used in logs and statistics
    pub fn label(&self) -> &'static str {
        match self {
            RouteDecision::DnsError => "UNREACHABLE",
            RouteDecision::AllDirect | RouteDecision::SelectDirect => "DIRECT",
            RouteDecision::AllProxy | RouteDecision::SelectProxy => "PROXY",
        }
    }
}

impl fmt::Display for RouteDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Routing mode selected by the user
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Deserialize, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RoutingMode {
    /// Classify every destination
    Smart,
    /// Never use the backend
    Direct,
    /// Always use the backend when one is running
    Proxy,
}

impl std::str::FromStr for RoutingMode {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "smart" => Ok(RoutingMode::Smart),
            "direct" => Ok(RoutingMode::Direct),
            "proxy" => Ok(RoutingMode::Proxy),
            other => Err(anyhow::anyhow!(
                "unknown routing mode '{}', expected smart, direct or proxy",
                other
            )),
        }
    }
}

/// Failure to build a rule table from its source lines
#[derive(Debug)]
pub enum RuleError {
    /// No usable rule lines
    Empty { source: String },
    /// A line that is not a valid IPv4 CIDR literal
    MalformedCidr { line: String },
    /// Coarsest prefix length outside [1, 32]
    PrefixOutOfRange { prefix_len: u8 },
    /// Rule file could not be read
    Io { path: PathBuf, error: std::io::Error },
}

impl fmt::Display for RuleError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RuleError::Empty { source } => write!(f, "rule list '{}' is empty", source),
            RuleError::MalformedCidr { line } => write!(f, "malformed CIDR literal: '{}'", line),
            RuleError::PrefixOutOfRange { prefix_len } => {
                write!(f, "minimum prefix length {} is outside [1, 32]", prefix_len)
            }
            RuleError::Io { path, error } => {
                write!(f, "failed to read rule file {}: {}", path.display(), error)
            }
        }
    }
}

impl std::error::Error for RuleError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RuleError::Io { error, .. } => Some(error),
            _ => None,
        }
    }
}

/// Read a rule file into lines
pub(crate) fn read_rule_lines(path: &std::path::Path) -> Result<Vec<String>, RuleError> {
    std::fs::read_to_string(path)
        .map(|content| content.lines().map(str::to_string).collect())
        .map_err(|error| RuleError::Io {
            path: path.to_path_buf(),
            error,
        })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decision_from_verdict() {
        assert_eq!(RouteDecision::from_verdict(None), RouteDecision::DnsError);
        assert_eq!(RouteDecision::from_verdict(Some(true)), RouteDecision::SelectProxy);
        assert_eq!(RouteDecision::from_verdict(Some(false)), RouteDecision::SelectDirect);
    }

    #[test]
    fn test_decision_labels() {
        assert_eq!(RouteDecision::AllDirect.to_string(), "DIRECT");
        assert_eq!(RouteDecision::SelectProxy.to_string(), "PROXY");
        assert_eq!(RouteDecision::DnsError.to_string(), "UNREACHABLE");
        assert!(RouteDecision::AllProxy.via_backend());
        assert!(!RouteDecision::SelectDirect.via_backend());
        assert!(!RouteDecision::DnsError.is_reachable());
    }

    #[test]
    fn test_routing_mode_parse() {
        assert_eq!("SMART".parse::<RoutingMode>().unwrap(), RoutingMode::Smart);
        assert_eq!("direct".parse::<RoutingMode>().unwrap(), RoutingMode::Direct);
        assert!("auto".parse::<RoutingMode>().is_err());
    }
}
