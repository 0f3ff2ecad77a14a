//! HTTP Proxy Request Parsing
//!
//! Reads the client's header block and turns it into a [`ProxyRequest`].
//! Forward requests are rewritten to origin-form before they reach the peer.

use std::sync::OnceLock;

use anyhow::{anyhow, bail, Context};
use regex::Regex;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt};
use url::Url;

use super::ProxyRequest;
use crate::protocol::constants::*;
use crate::Result;

/// Read header lines up to and including the blank line.
///
/// Returns `Ok(None)` when the client closed before sending anything.
/// Bytes after the blank line stay in `reader`.
pub async fn read_header<R>(reader: &mut R, max_size: usize) -> Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    let mut raw = Vec::new();
    loop {
        let start = raw.len();
        // At most one byte past the cap, so an endless line is caught early
        let budget = (max_size + 1).saturating_sub(start) as u64;
        let n = (&mut *reader)
            .take(budget)
            .read_until(b'\n', &mut raw)
            .await
            .context("Failed to read request header")?;

        if raw.len() > max_size {
            bail!("Request header exceeds {} bytes", max_size);
        }

        if n == 0 {
            if raw.is_empty() {
                return Ok(None);
            }
            bail!("Connection closed inside request header");
        }

        if &raw[start..] == HTTP_LINE_END.as_bytes() {
            break;
        }
    }

    String::from_utf8(raw)
        .map(Some)
        .map_err(|_| anyhow!("Request header is not valid UTF-8"))
}

/// Parse a complete header block into a request
pub fn parse_request(header: &str) -> Result<ProxyRequest> {
    let (request_line, rest) = header.split_once(HTTP_LINE_END).unwrap_or((header, ""));

    let mut parts = request_line.split_whitespace();
    let (Some(method), Some(uri), Some(version)) = (parts.next(), parts.next(), parts.next())
    else {
        bail!("Malformed request line: {:?}", request_line);
    };

    if method.eq_ignore_ascii_case("CONNECT") {
        let (host, port) = parse_authority_form(uri)?;
        return Ok(ProxyRequest {
            tunnel: true,
            method: method.to_string(),
            host,
            port,
            path: String::new(),
            header: header.to_string(),
        });
    }

    let target = split_uri(uri)?;
    let mut lines = vec![format!("{} {} {}", method, target.path, version)];
    lines.extend(
        rest.split(HTTP_LINE_END)
            .filter(|line| !is_proxy_connection(line))
            .map(str::to_string),
    );

    Ok(ProxyRequest {
        tunnel: false,
        method: method.to_string(),
        host: target.host,
        port: target.port,
        path: target.path,
        header: lines.join(HTTP_LINE_END),
    })
}

fn is_proxy_connection(line: &str) -> bool {
    line.get(..PROXY_CONNECTION_PREFIX.len())
        .is_some_and(|prefix| prefix.eq_ignore_ascii_case(PROXY_CONNECTION_PREFIX))
}

/// `host:port` from a CONNECT request line
fn parse_authority_form(uri: &str) -> Result<(String, u16)> {
    static AUTHORITY: OnceLock<Regex> = OnceLock::new();
    let authority =
        AUTHORITY.get_or_init(|| Regex::new(r"^(.+):(\d+)$").expect("valid authority regex"));

    let caps = authority
        .captures(uri)
        .ok_or_else(|| anyhow!("CONNECT target without port: {}", uri))?;
    let port = caps[2]
        .parse::<u16>()
        .with_context(|| format!("Invalid CONNECT port: {}", uri))?;
    Ok((caps[1].to_string(), port))
}

/// Destination and origin-form path of a forward request URI
#[derive(Debug, PartialEq, Eq)]
struct UriTarget {
    host: String,
    port: u16,
    path: String,
}

fn split_uri(uri: &str) -> Result<UriTarget> {
    if !uri.contains("://") {
        // Origin-form: addressed to the proxy itself
        return Ok(UriTarget {
            host: String::new(),
            port: HTTP_DEFAULT_PORT,
            path: uri.to_string(),
        });
    }

    let url = Url::parse(uri).with_context(|| format!("Invalid request URI: {}", uri))?;
    let host = url
        .host_str()
        .filter(|host| !host.is_empty())
        .ok_or_else(|| anyhow!("Request URI has no host: {}", uri))?;

    let mut path = match url.path() {
        "" => "/".to_string(),
        path => path.to_string(),
    };
    if let Some(query) = url.query() {
        path.push('?');
        path.push_str(query);
    }

    Ok(UriTarget {
        host: host.to_ascii_lowercase(),
        port: url.port_or_known_default().unwrap_or(HTTP_DEFAULT_PORT),
        path,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use tokio::io::{AsyncReadExt, AsyncWriteExt, BufReader};
    use tokio_test::io::Builder;

    #[test]
    fn test_forward_request_rewrite() {
        let header = "GET http://example.com/a?x=1 HTTP/1.1\r\n\
                      Host: example.com\r\n\
                      Proxy-Connection: keep-alive\r\n\
                      User-Agent: test\r\n\r\n";
        let request = parse_request(header).unwrap();

        assert!(!request.tunnel);
        assert_eq!(request.host, "example.com");
        assert_eq!(request.port, 80);
        assert_eq!(request.path, "/a?x=1");
        assert_eq!(
            request.header,
            "GET /a?x=1 HTTP/1.1\r\nHost: example.com\r\nUser-Agent: test\r\n\r\n"
        );
    }

    #[test]
    fn test_proxy_connection_match_is_case_insensitive() {
        let header = "GET http://example.com HTTP/1.1\r\nPROXY-CONNECTION: close\r\n\r\n";
        let request = parse_request(header).unwrap();
        assert_eq!(request.header, "GET / HTTP/1.1\r\n\r\n");
    }

    #[test]
    fn test_connect_request() {
        let header = "CONNECT www.example.com:443 HTTP/1.1\r\nHost: www.example.com:443\r\n\r\n";
        let request = parse_request(header).unwrap();

        assert!(request.tunnel);
        assert_eq!(request.host, "www.example.com");
        assert_eq!(request.port, 443);
        assert_eq!(request.header, header);
    }

    #[test]
    fn test_connect_without_port_fails() {
        assert!(parse_request("CONNECT example.com HTTP/1.1\r\n\r\n").is_err());
        assert!(parse_request("CONNECT example.com:99999 HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_uri_authority_variants() {
        let request = parse_request("GET http://Example.COM:8080 HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!((request.host.as_str(), request.port), ("example.com", 8080));
        assert_eq!(request.path, "/");

        let request = parse_request("GET http://user:pw@10.0.0.1/x#frag HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!((request.host.as_str(), request.port), ("10.0.0.1", 80));
        assert_eq!(request.path, "/x");

        let request = parse_request("GET http://[::1]:8000/?q HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!((request.host.as_str(), request.port), ("[::1]", 8000));
        assert_eq!(request.path, "/?q");

        let request = parse_request("GET https://secure.example/p HTTP/1.1\r\n\r\n").unwrap();
        assert_eq!((request.host.as_str(), request.port), ("secure.example", 443));
        assert_eq!(request.path, "/p");
    }

    #[test]
    fn test_uri_without_host_fails() {
        assert!(parse_request("GET http:// HTTP/1.1\r\n\r\n").is_err());
        assert!(parse_request("GET http://example.com:70000/ HTTP/1.1\r\n\r\n").is_err());
    }

    #[test]
    fn test_origin_form_has_no_host() {
        let request = parse_request("GET /stats HTTP/1.1\r\nHost: 127.0.0.1:1080\r\n\r\n").unwrap();
        assert!(request.host.is_empty());
        assert_eq!(request.path, "/stats");
    }

    #[test]
    fn test_malformed_request_line() {
        assert!(parse_request("GARBAGE\r\n\r\n").is_err());
    }

    #[tokio::test]
    async fn test_read_header_keeps_pipelined_bytes() {
        let mock = Builder::new()
            .read(b"CONNECT example.com:443 HTTP/1.1\r\n")
            .read(b"Host: example.com:443\r\n\r\n\x16\x03\x01")
            .build();
        let mut reader = BufReader::new(mock);

        let header = read_header(&mut reader, 1024).await.unwrap().unwrap();
        assert!(header.ends_with("\r\n\r\n"));

        let mut rest = Vec::new();
        reader.read_to_end(&mut rest).await.unwrap();
        assert_eq!(rest, b"\x16\x03\x01");
    }

    #[tokio::test]
    async fn test_read_header_empty_and_truncated() {
        let mut reader = BufReader::new(Builder::new().build());
        assert!(read_header(&mut reader, 1024).await.unwrap().is_none());

        let mut reader = BufReader::new(Builder::new().read(b"GET / HTTP/1.1\r\n").build());
        assert!(read_header(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_read_header_size_cap() {
        let long_line = format!("X-Pad: {}\r\n", "a".repeat(2048));
        let mock = Builder::new()
            .read(b"GET / HTTP/1.1\r\n")
            .read(long_line.as_bytes())
            .build();
        let mut reader = BufReader::new(mock);
        assert!(read_header(&mut reader, 1024).await.is_err());
    }

    #[tokio::test]
    async fn test_read_header_rejects_line_without_newline() {
        let (mut client, server) = tokio::io::duplex(8 * 1024);
        let writer = tokio::spawn(async move {
            let chunk = vec![b'a'; 8 * 1024];
            for _ in 0..64 {
                if client.write_all(&chunk).await.is_err() {
                    break;
                }
            }
            client
        });

        let mut reader = BufReader::new(server);
        let result = tokio::time::timeout(
            Duration::from_secs(5),
            read_header(&mut reader, 16 * 1024),
        )
        .await
        .expect("header read must not wait for a newline");
        assert!(result.is_err());

        drop(reader);
        writer.await.unwrap();
    }
}
