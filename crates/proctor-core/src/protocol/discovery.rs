//! UDP discovery announcement payload.
//!
//! While a round is being hosted the server broadcasts one datagram per
//! second.  The payload is a single text line of `key=value;` pairs:
//!
//! ```text
//! ipv4=192.168.0.12;name=Exam Server;desc=Classroom exam;tcp=5050;token=none;test=Networking;
//! ```
//!
//! Clients de-duplicate announcements by `(ipv4, tcp)`.  Values must not
//! contain `;`; the builder replaces it with `,` so a test name can never
//! break the framing.

use std::net::Ipv4Addr;

use crate::protocol::codec::ProtocolError;

/// Value sent in the `token` field.  Kept for older clients that expect it.
pub const LEGACY_TOKEN: &str = "none";

/// One discovery announcement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryAnnouncement {
    pub ipv4: Ipv4Addr,
    pub name: String,
    pub description: String,
    pub tcp_port: u16,
    pub token: String,
    pub test_name: String,
}

impl DiscoveryAnnouncement {
    /// Renders the `key=value;` payload.
    pub fn to_payload(&self) -> String {
        format!(
            "ipv4={};name={};desc={};tcp={};token={};test={};",
            self.ipv4,
            sanitize(&self.name),
            sanitize(&self.description),
            self.tcp_port,
            sanitize(&self.token),
            sanitize(&self.test_name),
        )
    }

    /// Parses a payload produced by [`DiscoveryAnnouncement::to_payload`].
    ///
    /// Unknown keys are ignored; `name`, `desc`, `token` and `test` default to
    /// empty strings when absent.
    ///
    /// # Errors
    ///
    /// Returns [`ProtocolError::MissingField`] when `ipv4` or `tcp` is missing or
    /// unparsable.
    pub fn parse(payload: &str) -> Result<Self, ProtocolError> {
        let mut ipv4 = None;
        let mut tcp_port = None;
        let mut name = String::new();
        let mut description = String::new();
        let mut token = String::new();
        let mut test_name = String::new();

        for field in payload.trim().split(';').filter(|f| !f.is_empty()) {
            let Some((key, value)) = field.split_once('=') else {
                continue;
            };
            match key.trim() {
                "ipv4" => ipv4 = value.trim().parse::<Ipv4Addr>().ok(),
                "tcp" => tcp_port = value.trim().parse::<u16>().ok(),
                "name" => name = value.to_string(),
                "desc" => description = value.to_string(),
                "token" => token = value.to_string(),
                "test" => test_name = value.to_string(),
                _ => {}
            }
        }

        Ok(Self {
            ipv4: ipv4.ok_or(ProtocolError::MissingField("ipv4"))?,
            tcp_port: tcp_port.ok_or(ProtocolError::MissingField("tcp"))?,
            name,
            description,
            token,
            test_name,
        })
    }
}

fn sanitize(value: &str) -> String {
    value.replace(';', ",")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn announcement() -> DiscoveryAnnouncement {
        DiscoveryAnnouncement {
            ipv4: Ipv4Addr::new(192, 168, 0, 12),
            name: "Exam Server".to_string(),
            description: "Classroom exam".to_string(),
            tcp_port: 5050,
            token: LEGACY_TOKEN.to_string(),
            test_name: "Networking".to_string(),
        }
    }

    #[test]
    fn test_payload_has_expected_field_order() {
        assert_eq!(
            announcement().to_payload(),
            "ipv4=192.168.0.12;name=Exam Server;desc=Classroom exam;tcp=5050;token=none;test=Networking;"
        );
    }

    #[test]
    fn test_parse_reads_back_rendered_payload() {
        let a = announcement();
        assert_eq!(DiscoveryAnnouncement::parse(&a.to_payload()).unwrap(), a);
    }

    #[test]
    fn test_semicolon_in_test_name_does_not_break_framing() {
        let mut a = announcement();
        a.test_name = "Part A; Part B".to_string();
        let parsed = DiscoveryAnnouncement::parse(&a.to_payload()).unwrap();
        assert_eq!(parsed.test_name, "Part A, Part B");
        assert_eq!(parsed.tcp_port, 5050);
    }

    #[test]
    fn test_parse_without_tcp_port_fails() {
        let err = DiscoveryAnnouncement::parse("ipv4=10.0.0.1;name=x;").unwrap_err();
        assert!(matches!(err, ProtocolError::MissingField("tcp")));
    }

    #[test]
    fn test_parse_ignores_unknown_keys_and_garbage_fields() {
        let parsed =
            DiscoveryAnnouncement::parse("ipv4=10.0.0.1;garbage;room=12;tcp=6000;").unwrap();
        assert_eq!(parsed.ipv4, Ipv4Addr::new(10, 0, 0, 1));
        assert_eq!(parsed.tcp_port, 6000);
        assert!(parsed.test_name.is_empty());
    }
}
