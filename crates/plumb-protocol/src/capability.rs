//! Protocol capabilities exchanged in the ref advertisement and first `want`.

use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

/// A capability understood by the negotiator.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Capability {
    /// `multi_ack`
    MultiAck,
    /// `multi_ack_detailed`
    MultiAckDetailed,
    /// `no-done`
    NoDone,
    /// `thin-pack`
    ThinPack,
    /// `side-band` (1000 byte lines)
    SideBand,
    /// `side-band-64k` (65520 byte lines)
    SideBand64k,
    /// `ofs-delta`
    OfsDelta,
    /// `shallow`
    Shallow,
    /// `deepen-since`
    DeepenSince,
    /// `deepen-not`
    DeepenNot,
    /// `deepen-relative`
    DeepenRelative,
    /// `no-progress`
    NoProgress,
    /// `include-tag`
    IncludeTag,
    /// `symref=<name>:<target>`
    Symref {
        /// The symbolic ref, e.g. `HEAD`.
        name: String,
        /// What it points at, e.g. `refs/heads/main`.
        target: String,
    },
    /// `agent=<string>`
    Agent(String),
    /// Anything else, kept verbatim.
    Other(String),
}

impl Capability {
    /// Maximum pkt-line size (prefix included) for a side-band capability.
    pub fn side_band_limit(&self) -> Option<usize> {
        match self {
            Self::SideBand => Some(1000),
            Self::SideBand64k => Some(65520),
            _ => None,
        }
    }
}

impl FromStr for Capability {
    type Err = std::convert::Infallible;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "multi_ack" => Self::MultiAck,
            "multi_ack_detailed" => Self::MultiAckDetailed,
            "no-done" => Self::NoDone,
            "thin-pack" => Self::ThinPack,
            "side-band" => Self::SideBand,
            "side-band-64k" => Self::SideBand64k,
            "ofs-delta" => Self::OfsDelta,
            "shallow" => Self::Shallow,
            "deepen-since" => Self::DeepenSince,
            "deepen-not" => Self::DeepenNot,
            "deepen-relative" => Self::DeepenRelative,
            "no-progress" => Self::NoProgress,
            "include-tag" => Self::IncludeTag,
            other => {
                if let Some(agent) = other.strip_prefix("agent=") {
                    Self::Agent(agent.to_string())
                } else if let Some((name, target)) = other
                    .strip_prefix("symref=")
                    .and_then(|rest| rest.split_once(':'))
                {
                    Self::Symref {
                        name: name.to_string(),
                        target: target.to_string(),
                    }
                } else {
                    Self::Other(other.to_string())
                }
            }
        })
    }
}

impl fmt::Display for Capability {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MultiAck => f.write_str("multi_ack"),
            Self::MultiAckDetailed => f.write_str("multi_ack_detailed"),
            Self::NoDone => f.write_str("no-done"),
            Self::ThinPack => f.write_str("thin-pack"),
            Self::SideBand => f.write_str("side-band"),
            Self::SideBand64k => f.write_str("side-band-64k"),
            Self::OfsDelta => f.write_str("ofs-delta"),
            Self::Shallow => f.write_str("shallow"),
            Self::DeepenSince => f.write_str("deepen-since"),
            Self::DeepenNot => f.write_str("deepen-not"),
            Self::DeepenRelative => f.write_str("deepen-relative"),
            Self::NoProgress => f.write_str("no-progress"),
            Self::IncludeTag => f.write_str("include-tag"),
            Self::Symref { name, target } => write!(f, "symref={name}:{target}"),
            Self::Agent(agent) => write!(f, "agent={agent}"),
            Self::Other(other) => f.write_str(other),
        }
    }
}

/// Parses a capability set into typed capabilities.
pub fn parse_all(capabilities: &BTreeSet<String>) -> Vec<Capability> {
    capabilities
        .iter()
        .filter_map(|c| c.parse::<Capability>().ok())
        .collect()
}

/// Keeps the capabilities from `wanted` that the server advertised.
///
/// `side-band-64k` wins over `side-band` when both survive. An `agent` is
/// kept only when the server advertised one of its own.
pub fn select(server: &BTreeSet<String>, wanted: &[Capability]) -> Vec<Capability> {
    let server_agent = server
        .iter()
        .any(|cap| cap.split('=').next() == Some("agent"));
    let mut selected: Vec<Capability> = wanted
        .iter()
        .filter(|cap| match cap {
            Capability::Agent(_) => server_agent,
            _ => server.contains(&cap.to_string()),
        })
        .cloned()
        .collect();
    if selected.contains(&Capability::SideBand64k) {
        selected.retain(|cap| *cap != Capability::SideBand);
    }
    selected
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_display_roundtrip() {
        for text in [
            "multi_ack",
            "multi_ack_detailed",
            "no-done",
            "thin-pack",
            "side-band",
            "side-band-64k",
            "ofs-delta",
            "shallow",
            "deepen-since",
            "deepen-not",
            "deepen-relative",
            "no-progress",
            "include-tag",
            "symref=HEAD:refs/heads/main",
            "agent=git/2.43.0",
            "object-format=sha1",
        ] {
            let cap: Capability = text.parse().unwrap();
            assert_eq!(cap.to_string(), text);
        }
    }

    #[test]
    fn test_typed_variants() {
        assert_eq!(
            "symref=HEAD:refs/heads/main".parse::<Capability>().unwrap(),
            Capability::Symref {
                name: "HEAD".into(),
                target: "refs/heads/main".into()
            }
        );
        assert_eq!(
            "agent=git/2.43.0".parse::<Capability>().unwrap(),
            Capability::Agent("git/2.43.0".into())
        );
        assert_eq!(
            "symref=broken".parse::<Capability>().unwrap(),
            Capability::Other("symref=broken".into())
        );
    }

    #[test]
    fn test_select_prefers_64k() {
        let server: BTreeSet<String> = ["side-band", "side-band-64k", "ofs-delta", "agent=git/2"]
            .into_iter()
            .map(String::from)
            .collect();
        let selected = select(
            &server,
            &[
                Capability::SideBand64k,
                Capability::SideBand,
                Capability::ThinPack,
                Capability::Agent("plumb/0.1".into()),
            ],
        );
        assert_eq!(
            selected,
            vec![Capability::SideBand64k, Capability::Agent("plumb/0.1".into())]
        );
    }

    #[test]
    fn test_select_agent_needs_server_agent() {
        let wanted = [Capability::SideBand64k, Capability::Agent("plumb/0.1".into())];
        let server: BTreeSet<String> = ["side-band-64k".to_string()].into_iter().collect();
        assert_eq!(select(&server, &wanted), vec![Capability::SideBand64k]);

        let server: BTreeSet<String> = ["side-band-64k", "agent"]
            .into_iter()
            .map(String::from)
            .collect();
        assert_eq!(select(&server, &wanted).len(), 2);
    }

    #[test]
    fn test_side_band_limits() {
        assert_eq!(Capability::SideBand.side_band_limit(), Some(1000));
        assert_eq!(Capability::SideBand64k.side_band_limit(), Some(65520));
        assert_eq!(Capability::OfsDelta.side_band_limit(), None);
    }
}
