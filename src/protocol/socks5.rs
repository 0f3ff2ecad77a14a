//! SOCKS5 Client
//!
//! Opens CONNECT tunnels through the local backend. Domain names are sent
//! as-is so the backend resolves them on the far side.

use anyhow::{anyhow, bail, Context};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tracing::debug;

use super::{Socks5Reply, TargetAddr};
use crate::protocol::constants::*;
use crate::Result;

/// SOCKS5 client side of a single backend connection
pub struct Socks5Connector<S> {
    stream: S,
}

impl<S> Socks5Connector<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(stream: S) -> Self {
        Self { stream }
    }

    /// Run the no-auth handshake and CONNECT, returning the tunnelled stream
    pub async fn connect(mut self, target: &TargetAddr, port: u16) -> Result<S> {
        self.send_greeting(&[SOCKS5_AUTH_NONE]).await?;

        let method = self.receive_auth_method().await?;
        if method != SOCKS5_AUTH_NONE {
            bail!("Backend refused no-auth method (selected 0x{:02x})", method);
        }

        self.send_connect_request(target, port).await?;

        let reply = self.receive_connect_response().await?;
        if !reply.is_success() {
            bail!(
                "Backend CONNECT to {}:{} failed: {}",
                target,
                port,
                reply_description(reply.reply_code)
            );
        }

        debug!("SOCKS5 tunnel to {}:{} established", target, port);
        Ok(self.stream)
    }

    /// Send SOCKS5 greeting
    pub async fn send_greeting(&mut self, methods: &[u8]) -> Result<()> {
        let mut greeting = Vec::with_capacity(2 + methods.len());
        greeting.push(SOCKS5_VERSION);
        greeting.push(methods.len() as u8);
        greeting.extend_from_slice(methods);

        self.stream
            .write_all(&greeting)
            .await
            .context("Failed to send greeting")?;

        Ok(())
    }

    /// Receive authentication method selection
    pub async fn receive_auth_method(&mut self) -> Result<u8> {
        let mut response = [0u8; 2];
        self.stream
            .read_exact(&mut response)
            .await
            .context("Failed to read auth method response")?;

        if response[0] != SOCKS5_VERSION {
            return Err(anyhow!(
                "Invalid SOCKS version in auth response: {}",
                response[0]
            ));
        }

        Ok(response[1])
    }

    /// Send CONNECT request
    pub async fn send_connect_request(&mut self, target: &TargetAddr, port: u16) -> Result<()> {
        let mut request = vec![
            SOCKS5_VERSION,
            SOCKS5_CMD_CONNECT,
            SOCKS5_RESERVED,
            target.address_type(),
        ];

        match target {
            TargetAddr::Ipv4(ip) => request.extend_from_slice(&ip.octets()),
            TargetAddr::Ipv6(ip) => request.extend_from_slice(&ip.octets()),
            TargetAddr::Domain(domain) => {
                if domain.is_empty() || domain.len() > 255 {
                    return Err(anyhow!("Invalid domain name length: {}", domain.len()));
                }
                request.push(domain.len() as u8);
                request.extend_from_slice(domain.as_bytes());
            }
        }

        request.extend_from_slice(&port.to_be_bytes());

        self.stream
            .write_all(&request)
            .await
            .context("Failed to send connect request")?;

        Ok(())
    }

    /// Receive CONNECT response
    pub async fn receive_connect_response(&mut self) -> Result<Socks5Reply> {
        // VER REP RSV ATYP
        let mut header = [0u8; 4];
        self.stream
            .read_exact(&mut header)
            .await
            .context("Failed to read connect response header")?;

        let version = header[0];
        let reply_code = header[1];
        let address_type = header[3];

        if version != SOCKS5_VERSION {
            return Err(anyhow!("Invalid SOCKS version in response: {}", version));
        }

        let bind_addr = match address_type {
            SOCKS5_ADDR_IPV4 => {
                let mut addr_bytes = [0u8; 4];
                self.stream
                    .read_exact(&mut addr_bytes)
                    .await
                    .context("Failed to read IPv4 bind address")?;
                TargetAddr::Ipv4(addr_bytes.into())
            }
            SOCKS5_ADDR_IPV6 => {
                let mut addr_bytes = [0u8; 16];
                self.stream
                    .read_exact(&mut addr_bytes)
                    .await
                    .context("Failed to read IPv6 bind address")?;
                TargetAddr::Ipv6(addr_bytes.into())
            }
            SOCKS5_ADDR_DOMAIN => {
                let mut len_buf = [0u8; 1];
                self.stream
                    .read_exact(&mut len_buf)
                    .await
                    .context("Failed to read bind domain length")?;

                let mut domain_bytes = vec![0u8; len_buf[0] as usize];
                self.stream
                    .read_exact(&mut domain_bytes)
                    .await
                    .context("Failed to read bind domain name")?;

                let domain = String::from_utf8(domain_bytes)
                    .map_err(|e| anyhow!("Invalid UTF-8 in bind domain name: {}", e))?;
                TargetAddr::Domain(domain)
            }
            _ => return Err(anyhow!("Unsupported bind address type: {}", address_type)),
        };

        let mut port_bytes = [0u8; 2];
        self.stream
            .read_exact(&mut port_bytes)
            .await
            .context("Failed to read bind port")?;

        Ok(Socks5Reply {
            reply_code,
            bind_addr,
            bind_port: u16::from_be_bytes(port_bytes),
        })
    }
}

/// Dial the backend at `backend` and open a tunnel to `host:port`
pub async fn connect_via_socks5(backend: (&str, u16), host: &str, port: u16) -> Result<TcpStream> {
    let stream = TcpStream::connect(backend)
        .await
        .with_context(|| format!("Failed to connect to backend {}:{}", backend.0, backend.1))?;
    stream.set_nodelay(true).ok();

    Socks5Connector::new(stream)
        .connect(&TargetAddr::from_host(host), port)
        .await
}
