//! Line-oriented config codec shared by `tinc.conf` and `hosts/<name>` files.
//!
//! Both file kinds share the same grammar: `Key = Value` lines, `#` comments,
//! blank lines ignored. Host files additionally carry a trailing PEM block
//! (the public key) that the codec treats as an opaque *tail* rather than
//! parsing it as key/value pairs.

use crate::model::{Address, ConfigFile, HostDescription};
use std::collections::BTreeMap;

/// A decoded set of `Key = Value` entries plus whatever text followed the
/// last parseable line (the "tail").
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Document {
    pub entries: Vec<(String, String)>,
    pub tail: String,
}

impl Document {
    /// Split `text` at the first line that is neither blank, a comment, nor
    /// a `Key = Value` pair. Everything from that line onward becomes the
    /// tail, preserved byte-for-byte.
    pub fn parse(text: &str) -> Self {
        let mut entries = Vec::new();
        let mut tail_start = text.len();
        let mut offset = 0usize;

        for line in text.split_inclusive('\n') {
            let trimmed = line.trim_end_matches('\n').trim_end_matches('\r');
            let stripped = trimmed.trim();
            if stripped.is_empty() || stripped.starts_with('#') {
                offset += line.len();
                continue;
            }
            match stripped.split_once('=') {
                Some((k, v)) => {
                    entries.push((k.trim().to_string(), v.trim().to_string()));
                    offset += line.len();
                }
                None => {
                    tail_start = offset;
                    break;
                }
            }
        }
        if tail_start == text.len() && offset <= text.len() {
            tail_start = offset;
        }

        Document {
            entries,
            tail: text[tail_start.min(text.len())..].to_string(),
        }
    }

    /// Encode entries sorted ascending by key, one value per line, repeated
    /// keys on separate lines in their original relative order, followed by
    /// the tail unchanged.
    pub fn encode(&self) -> String {
        let mut grouped: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (k, v) in &self.entries {
            grouped.entry(k.as_str()).or_default().push(v.as_str());
        }
        let mut out = String::new();
        for (key, values) in grouped {
            for value in values {
                out.push_str(key);
                out.push_str(" = ");
                out.push_str(value);
                out.push('\n');
            }
        }
        out.push_str(&self.tail);
        out
    }

    fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
    }

    fn get_all<'a>(&'a self, key: &str) -> Vec<&'a str> {
        self.entries
            .iter()
            .filter(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v.as_str())
            .collect()
    }
}

/// Parse a `HOST` or `HOST PORT` address value.
pub fn parse_address(value: &str) -> Address {
    let mut parts = value.split_whitespace();
    let host = parts.next().unwrap_or_default().to_string();
    let port = parts.next().and_then(|p| p.parse().ok()).unwrap_or(0);
    Address { host, port }
}

/// Render an address as `HOST` or `HOST PORT`.
pub fn encode_address(addr: &Address) -> String {
    if addr.port == 0 {
        addr.host.clone()
    } else {
        format!("{} {}", addr.host, addr.port)
    }
}

fn parse_bool(value: &str) -> bool {
    matches!(value.to_ascii_lowercase().as_str(), "true" | "yes" | "on")
}

fn encode_bool(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}

/// Decode a `tinc.conf` document into a [`ConfigFile`].
pub fn decode_config(text: &str) -> ConfigFile {
    let doc = Document::parse(text);
    ConfigFile {
        name: doc.get("Name").unwrap_or_default().to_string(),
        port: doc.get("Port").and_then(|v| v.parse().ok()).unwrap_or(0),
        interface: doc.get("Interface").unwrap_or_default().to_string(),
        mode: doc
            .get("Mode")
            .map(|v| v.to_ascii_lowercase())
            .unwrap_or_else(|| "switch".to_string()),
        auto_start: doc.get("AutoStart").map(parse_bool).unwrap_or(false),
        device_type: doc.get("DeviceType").unwrap_or_default().to_string(),
        device: doc.get("Device").unwrap_or_default().to_string(),
        ip: doc.get("IP").unwrap_or_default().to_string(),
        mask: doc.get("Mask").and_then(|v| v.parse().ok()).unwrap_or(0),
        broadcast: doc.get("Broadcast").unwrap_or_default().to_string(),
        connect_to: doc
            .get_all("ConnectTo")
            .into_iter()
            .map(|s| s.to_string())
            .collect(),
    }
}

/// Encode a [`ConfigFile`] into `tinc.conf` text.
pub fn encode_config(config: &ConfigFile) -> String {
    let mut entries = vec![
        ("Name".to_string(), config.name.clone()),
        ("Port".to_string(), config.port.to_string()),
        ("Interface".to_string(), config.interface.clone()),
        ("Mode".to_string(), config.mode.clone()),
        (
            "AutoStart".to_string(),
            encode_bool(config.auto_start).to_string(),
        ),
        ("DeviceType".to_string(), config.device_type.clone()),
        ("Device".to_string(), config.device.clone()),
        ("IP".to_string(), config.ip.clone()),
        ("Mask".to_string(), config.mask.to_string()),
        ("Broadcast".to_string(), config.broadcast.clone()),
    ];
    for target in &config.connect_to {
        entries.push(("ConnectTo".to_string(), target.clone()));
    }
    Document {
        entries,
        tail: String::new(),
    }
    .encode()
}

/// Decode a `hosts/<name>` file into a [`HostDescription`]. `name_hint` is
/// the file's base name, used only when the content carries no `Name =`
/// line of its own (e.g. malformed input); the embedded `Name` field is
/// otherwise authoritative, since this is the same text a peer's control API
/// hands out over HTTP where no filename is available at all.
pub fn decode_host(name_hint: &str, text: &str) -> HostDescription {
    let doc = Document::parse(text);
    HostDescription {
        name: doc
            .get("Name")
            .filter(|n| !n.is_empty())
            .unwrap_or(name_hint)
            .to_string(),
        subnet: doc.get("Subnet").unwrap_or_default().to_string(),
        port: doc.get("Port").and_then(|v| v.parse().ok()).unwrap_or(0),
        address: doc
            .get_all("Address")
            .into_iter()
            .map(parse_address)
            .collect(),
        public_key: doc.tail,
        version: doc
            .get("Version")
            .and_then(|v| v.parse().ok())
            .unwrap_or(0),
    }
}

/// Encode a [`HostDescription`] into `hosts/<name>` text.
pub fn encode_host(host: &HostDescription) -> String {
    let mut entries = vec![
        ("Name".to_string(), host.name.clone()),
        ("Subnet".to_string(), host.subnet.clone()),
        ("Port".to_string(), host.port.to_string()),
        ("Version".to_string(), host.version.to_string()),
    ];
    for addr in &host.address {
        entries.push(("Address".to_string(), encode_address(addr)));
    }
    Document {
        entries,
        tail: host.public_key.clone(),
    }
    .encode()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_host() -> HostDescription {
        HostDescription {
            name: "TEST".to_string(),
            subnet: "1.2.3.4/32".to_string(),
            port: 0,
            address: vec![
                Address {
                    host: "127.0.0.1".to_string(),
                    port: 321,
                },
                Address {
                    host: "127.0.0.1".to_string(),
                    port: 1223,
                },
            ],
            public_key: "---\nXXX\n---\n".to_string(),
            version: 0,
        }
    }

    #[test]
    fn host_round_trip() {
        let host = sample_host();
        let encoded = encode_host(&host);
        let decoded = decode_host(&host.name, &encoded);
        assert_eq!(decoded, host);
    }

    #[test]
    fn config_round_trip() {
        let config = ConfigFile {
            name: "alice".to_string(),
            port: 655,
            interface: "tinc0".to_string(),
            mode: "switch".to_string(),
            auto_start: true,
            device_type: "tap".to_string(),
            device: "/dev/net/tun".to_string(),
            ip: "10.0.0.1".to_string(),
            mask: 16,
            broadcast: "direct".to_string(),
            connect_to: vec!["bob".to_string(), "carol".to_string()],
        };
        let encoded = encode_config(&config);
        let decoded = decode_config(&encoded);
        assert_eq!(decoded, config);
    }

    #[test]
    fn comments_and_blank_lines_are_ignored() {
        let text = "# a comment\n\nName = alice\n\n# another\nPort = 655\n";
        let doc = Document::parse(text);
        assert_eq!(
            doc.entries,
            vec![
                ("Name".to_string(), "alice".to_string()),
                ("Port".to_string(), "655".to_string())
            ]
        );
        assert!(doc.tail.is_empty());
    }

    #[test]
    fn tail_starts_at_first_unparseable_line() {
        let text = "Subnet = 10.0.0.1/32\nPort = 0\n-----BEGIN RSA PUBLIC KEY-----\nABC\n-----END RSA PUBLIC KEY-----\n";
        let doc = Document::parse(text);
        assert_eq!(doc.entries.len(), 2);
        assert!(doc.tail.starts_with("-----BEGIN RSA PUBLIC KEY-----"));
    }

    #[test]
    fn permissive_numeric_fallback() {
        let text = "Port = not-a-number\n";
        let config = decode_config(text);
        assert_eq!(config.port, 0);
    }

    #[test]
    fn boolean_accepts_yes_on_true_case_insensitive() {
        for value in ["true", "TRUE", "yes", "Yes", "on", "ON"] {
            let text = format!("AutoStart = {value}\n");
            assert!(decode_config(&text).auto_start, "failed for {value}");
        }
        assert!(!decode_config("AutoStart = no\n").auto_start);
    }

    #[test]
    fn address_without_port_round_trips_as_host_only() {
        let addr = Address {
            host: "203.0.113.5".to_string(),
            port: 0,
        };
        assert_eq!(encode_address(&addr), "203.0.113.5");
        assert_eq!(parse_address("203.0.113.5"), addr);
    }

    #[test]
    fn repeated_keys_preserved() {
        let config = ConfigFile {
            name: "n".to_string(),
            port: 1,
            interface: "tinc0".to_string(),
            mode: "switch".to_string(),
            auto_start: false,
            device_type: "tap".to_string(),
            device: "/dev/net/tun".to_string(),
            ip: "10.0.0.1".to_string(),
            mask: 24,
            broadcast: "direct".to_string(),
            connect_to: vec!["a".to_string(), "b".to_string(), "c".to_string()],
        };
        let encoded = encode_config(&config);
        assert_eq!(encoded.matches("ConnectTo").count(), 3);
    }
}
