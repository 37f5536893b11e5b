//! `web_browser` toolkit — fetch a URL with strict limits and extract
//! readable text for the model.
//!
//! Safety properties:
//! - http/https schemes only
//! - hostnames resolving to any non-public address (private, loopback,
//!   link-local, CGNAT, documentation, benchmarking, multicast,
//!   reserved, or a v4-mapped form of one) are rejected
//! - hard timeout, response-size and text-length caps (config-tunable)
//! - redirect limit (5 hops)

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;

use relay_domain::error::{Error, Result};

use crate::tool::{Tool, ToolInvocation, ToolOutput};
use crate::toolkit::Toolkit;

const DEFAULT_TIMEOUT_SECS: u64 = 20;
const DEFAULT_MAX_BYTES: usize = 5 * 1024 * 1024;
const DEFAULT_MAX_TEXT_CHARS: usize = 100_000;

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Target validation
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// IPv4 networks that never host public web content, from the IANA
/// special-purpose address registry: "this network", RFC 1918 private
/// space, CGNAT, loopback, link-local, protocol assignments, the three
/// TEST-NET documentation blocks, benchmarking, multicast, and the
/// reserved class-E space (which also covers the broadcast address).
const NON_PUBLIC_V4: &[(u32, u32)] = &[
    (0x0000_0000, 8),  // 0.0.0.0/8
    (0x0A00_0000, 8),  // 10.0.0.0/8
    (0x6440_0000, 10), // 100.64.0.0/10
    (0x7F00_0000, 8),  // 127.0.0.0/8
    (0xA9FE_0000, 16), // 169.254.0.0/16
    (0xAC10_0000, 12), // 172.16.0.0/12
    (0xC000_0000, 24), // 192.0.0.0/24
    (0xC000_0200, 24), // 192.0.2.0/24 (TEST-NET-1)
    (0xC0A8_0000, 16), // 192.168.0.0/16
    (0xC612_0000, 15), // 198.18.0.0/15
    (0xC633_6400, 24), // 198.51.100.0/24 (TEST-NET-2)
    (0xCB00_7100, 24), // 203.0.113.0/24 (TEST-NET-3)
    (0xE000_0000, 4),  // 224.0.0.0/4
    (0xF000_0000, 4),  // 240.0.0.0/4
];

fn v4_is_public(addr: Ipv4Addr) -> bool {
    let ip = u32::from(addr);
    !NON_PUBLIC_V4.iter().any(|&(network, prefix)| {
        let mask = u32::MAX << (32 - prefix);
        ip & mask == network
    })
}

fn v6_is_public(addr: Ipv6Addr) -> bool {
    // A v4-mapped address reaches the v4 host; judge the embedded v4.
    if let Some(v4) = addr.to_ipv4_mapped() {
        return v4_is_public(v4);
    }
    let head = addr.segments()[0];
    let non_public = addr.is_unspecified()
        || addr.is_loopback()
        || head & 0xFE00 == 0xFC00 // fc00::/7 unique-local
        || head & 0xFFC0 == 0xFE80 // fe80::/10 link-local
        || head & 0xFF00 == 0xFF00 // ff00::/8 multicast
        || (head == 0x2001 && addr.segments()[1] == 0x0DB8); // 2001:db8::/32 documentation
    !non_public
}

fn ip_is_public(ip: IpAddr) -> bool {
    match ip {
        IpAddr::V4(v4) => v4_is_public(v4),
        IpAddr::V6(v6) => v6_is_public(v6),
    }
}

/// Check a fetch target before any request goes out: http(s) only, and
/// every address the host resolves to must be publicly routable, so the
/// model cannot steer the tool at internal services.
fn check_target(raw: &str) -> Result<reqwest::Url> {
    let url = reqwest::Url::parse(raw)
        .map_err(|e| Error::Validation(format!("web_browser: bad url: {e}")))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(Error::Validation(format!(
            "web_browser: refusing {} url, only http and https are fetchable",
            url.scheme()
        )));
    }

    let host = url
        .host_str()
        .ok_or_else(|| Error::Validation("web_browser: url carries no host".into()))?;
    let port = url.port_or_known_default().unwrap_or(443);

    let resolved: Vec<_> = (host, port)
        .to_socket_addrs()
        .map_err(|e| Error::Validation(format!("web_browser: cannot resolve {host}: {e}")))?
        .collect();
    if resolved.is_empty() {
        return Err(Error::Validation(format!(
            "web_browser: {host} resolved to no addresses"
        )));
    }
    for addr in &resolved {
        if !ip_is_public(addr.ip()) {
            return Err(Error::Validation(format!(
                "web_browser: {host} maps to the non-public address {}",
                addr.ip()
            )));
        }
    }
    Ok(url)
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// HTML text extraction
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

fn starts_with_ci(bytes: &[u8], i: usize, pat: &[u8]) -> bool {
    bytes.len() >= i + pat.len() && bytes[i..i + pat.len()].eq_ignore_ascii_case(pat)
}

/// Strip tags, scripts, and styles; collapse whitespace.
fn html_to_text(html: &str) -> String {
    let bytes = html.as_bytes();
    let mut out = String::with_capacity(html.len() / 4);
    let mut in_tag = false;
    let mut skip_until: Option<&[u8]> = None;
    let mut i = 0;

    while i < bytes.len() {
        if let Some(end_tag) = skip_until {
            if starts_with_ci(bytes, i, end_tag) {
                i += end_tag.len();
                skip_until = None;
            } else {
                i += 1;
            }
            continue;
        }
        match bytes[i] {
            b'<' => {
                if starts_with_ci(bytes, i, b"<script") {
                    skip_until = Some(b"</script>");
                } else if starts_with_ci(bytes, i, b"<style") {
                    skip_until = Some(b"</style>");
                } else {
                    in_tag = true;
                }
                i += 1;
            }
            b'>' if in_tag => {
                in_tag = false;
                out.push(' ');
                i += 1;
            }
            _ if in_tag => i += 1,
            _ => {
                // Copy a full UTF-8 character.
                let ch_len = utf8_len(bytes[i]);
                if let Some(chunk) = html.get(i..i + ch_len) {
                    out.push_str(chunk);
                }
                i += ch_len;
            }
        }
    }

    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b >= 0xF0 => 4,
        b if b >= 0xE0 => 3,
        _ => 2,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tool
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub struct WebBrowserTool {
    client: reqwest::Client,
}

impl WebBrowserTool {
    pub fn new() -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(DEFAULT_TIMEOUT_SECS))
            .redirect(reqwest::redirect::Policy::limited(5))
            .user_agent("relay-web-browser/0.1")
            .build()
            .unwrap_or_default();
        Self { client }
    }
}

impl Default for WebBrowserTool {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Tool for WebBrowserTool {
    fn name(&self) -> &str {
        "web_browser"
    }

    fn description(&self) -> &str {
        "Fetch a web page and return its readable text content."
    }

    fn parameters(&self) -> Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "url": { "type": "string", "description": "The URL to fetch" }
            },
            "required": ["url"]
        })
    }

    async fn invoke(&self, invocation: ToolInvocation) -> Result<ToolOutput> {
        let merged = invocation.merged_args();
        let raw_url = merged
            .get("url")
            .and_then(|u| u.as_str())
            .ok_or_else(|| Error::Validation("web_browser: missing url".into()))?;

        let url = check_target(raw_url)?;

        let max_bytes = merged
            .get("max_bytes")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_BYTES);
        let max_text_chars = merged
            .get("max_text_chars")
            .and_then(|v| v.as_u64())
            .map(|v| v as usize)
            .unwrap_or(DEFAULT_MAX_TEXT_CHARS);

        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| Error::Http(e.to_string()))?;
        let status = resp.status().as_u16();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or("")
            .to_string();

        let bytes = resp.bytes().await.map_err(|e| Error::Http(e.to_string()))?;
        if bytes.len() > max_bytes {
            return Err(Error::Validation(format!(
                "response too large: {} bytes (limit {max_bytes})",
                bytes.len()
            )));
        }

        let raw = String::from_utf8_lossy(&bytes);
        let mut text = if content_type.contains("text/html") {
            html_to_text(&raw)
        } else {
            raw.into_owned()
        };
        if text.len() > max_text_chars {
            text.truncate(
                (0..=max_text_chars)
                    .rev()
                    .find(|&i| text.is_char_boundary(i))
                    .unwrap_or(0),
            );
        }

        let results_string = text.clone();
        Ok(ToolOutput::WithSummary {
            value: serde_json::json!({
                "url": url.as_str(),
                "status": status,
                "content_type": content_type,
                "content": text,
            }),
            results_string,
        })
    }
}

pub fn web_browser_toolkit() -> Toolkit {
    Toolkit {
        id: "web_browser".into(),
        name: "Web browser".into(),
        description: "Fetches public web pages.".into(),
        config_schema: Some(serde_json::json!({
            "type": "object",
            "properties": {
                "max_bytes": {"type": "integer"},
                "max_text_chars": {"type": "integer"}
            }
        })),
        tools: vec![Arc::new(WebBrowserTool::new())],
        remote_only: false,
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Tests
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
