//! Bare HTTP/1.0 `GET` used when the `http-health` feature is off.
//!
//! Only plain `http://` URLs are supported; the response body is never read.

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

use crate::error::{DiscoveryError, DiscoveryResult};

#[derive(Debug, PartialEq, Eq)]
struct HttpTarget {
    host: String,
    port: u16,
    path: String,
}

impl HttpTarget {
    fn connect_address(&self) -> String {
        if self.host.contains(':') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }
}

fn parse_url(url: &str) -> DiscoveryResult<HttpTarget> {
    let invalid = || DiscoveryError::InvalidUrl(url.to_string());

    let rest = url.strip_prefix("http://").ok_or_else(invalid)?;
    let (authority, path) = match rest.find('/') {
        Some(i) => (&rest[..i], &rest[i..]),
        None => (rest, "/"),
    };
    if authority.is_empty() {
        return Err(invalid());
    }

    let (host, port) = if let Some(bracketed) = authority.strip_prefix('[') {
        let end = bracketed.find(']').ok_or_else(invalid)?;
        let host = &bracketed[..end];
        let port = match bracketed[end + 1..].strip_prefix(':') {
            Some(p) => p.parse().map_err(|_| invalid())?,
            None => 80,
        };
        (host, port)
    } else {
        match authority.rsplit_once(':') {
            Some((host, port)) => (host, port.parse().map_err(|_| invalid())?),
            None => (authority, 80),
        }
    };

    Ok(HttpTarget {
        host: host.to_string(),
        port,
        path: path.to_string(),
    })
}

fn parse_status_line(line: &str) -> Option<u16> {
    let mut parts = line.split_whitespace();
    let version = parts.next()?;
    if !version.starts_with("HTTP/") {
        return None;
    }
    parts.next()?.parse().ok()
}

/// Send `GET` and return the response status code.
pub(crate) async fn get_status(url: &str) -> DiscoveryResult<u16> {
    let target = parse_url(url)?;

    let mut stream = TcpStream::connect(target.connect_address()).await?;
    let request = format!(
        "GET {} HTTP/1.0\r\nHost: {}\r\nUser-Agent: zihin-health\r\nConnection: close\r\n\r\n",
        target.path, target.host
    );
    stream.write_all(request.as_bytes()).await?;

    let mut reader = BufReader::new(stream);
    let mut status_line = String::new();
    reader.read_line(&mut status_line).await?;

    parse_status_line(&status_line).ok_or_else(|| DiscoveryError::HealthCheckFailed {
        target: url.to_string(),
        reason: format!("malformed status line: {:?}", status_line.trim_end()),
    })
}
