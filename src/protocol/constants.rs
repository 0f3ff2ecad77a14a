//! Wire Protocol Constants

// SOCKS5 Protocol Version
pub const SOCKS5_VERSION: u8 = 0x05;

// SOCKS5 Commands
pub const SOCKS5_CMD_CONNECT: u8 = 0x01;

// Address Types
pub const SOCKS5_ADDR_IPV4: u8 = 0x01;
pub const SOCKS5_ADDR_DOMAIN: u8 = 0x03;
pub const SOCKS5_ADDR_IPV6: u8 = 0x04;

// Authentication Methods
pub const SOCKS5_AUTH_NONE: u8 = 0x00;
pub const SOCKS5_AUTH_UNSUPPORTED: u8 = 0xFF;

// Response Codes
pub const SOCKS5_REPLY_SUCCESS: u8 = 0x00;
pub const SOCKS5_REPLY_GENERAL_FAILURE: u8 = 0x01;
pub const SOCKS5_REPLY_CONNECTION_NOT_ALLOWED: u8 = 0x02;
pub const SOCKS5_REPLY_NETWORK_UNREACHABLE: u8 = 0x03;
pub const SOCKS5_REPLY_HOST_UNREACHABLE: u8 = 0x04;
pub const SOCKS5_REPLY_CONNECTION_REFUSED: u8 = 0x05;
pub const SOCKS5_REPLY_TTL_EXPIRED: u8 = 0x06;
pub const SOCKS5_REPLY_COMMAND_NOT_SUPPORTED: u8 = 0x07;
pub const SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED: u8 = 0x08;

// Reserved field value
pub const SOCKS5_RESERVED: u8 = 0x00;

// HTTP proxy front-end
pub const HTTP_DEFAULT_PORT: u16 = 80;
pub const HTTP_TUNNEL_ESTABLISHED: &[u8] = b"HTTP/1.1 200 Connection established\r\n\r\n";
pub const HTTP_LINE_END: &str = "\r\n";
pub const PROXY_CONNECTION_PREFIX: &str = "proxy-connection:";

/// Human readable text for a SOCKS5 reply code
pub fn reply_description(code: u8) -> &'static str {
    match code {
        SOCKS5_REPLY_SUCCESS => "succeeded",
        SOCKS5_REPLY_GENERAL_FAILURE => "general SOCKS server failure",
        SOCKS5_REPLY_CONNECTION_NOT_ALLOWED => "connection not allowed by ruleset",
        SOCKS5_REPLY_NETWORK_UNREACHABLE => "network unreachable",
        SOCKS5_REPLY_HOST_UNREACHABLE => "host unreachable",
        SOCKS5_REPLY_CONNECTION_REFUSED => "connection refused",
        SOCKS5_REPLY_TTL_EXPIRED => "TTL expired",
        SOCKS5_REPLY_COMMAND_NOT_SUPPORTED => "command not supported",
        SOCKS5_REPLY_ADDRESS_TYPE_NOT_SUPPORTED => "address type not supported",
        _ => "unknown reply code",
    }
}
