//! Connection strings
//!
//! Service discovery clients and servers are parameterized entirely through
//! connection strings of the form
//! `scheme://address[:psm|:channel|:uuid][;param=value]*`:
//!
//! ```rust
//! use sdpbird::{ConnectionUrl, Protocol};
//!
//! let url: ConnectionUrl = "btspp://0050C000321B:12;encrypt=true".parse().unwrap();
//! assert_eq!(url.protocol(), Protocol::Rfcomm);
//! assert_eq!(url.port(), Some(12));
//! assert!(url.authenticate());
//! assert_eq!(
//!     url.to_string(),
//!     "btspp://0050C000321B:12;master=false;encrypt=true;authenticate=true"
//! );
//! ```

use crate::{BluetoothAddress, Uuid};
use core::fmt;
use core::str::FromStr;

/// Host name marking a server connection string
const LOCALHOST: &str = "localhost";

/// Highest RFCOMM server channel
const MAX_RFCOMM_CHANNEL: u16 = 30;

/// Errors raised while parsing a connection string
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum UrlError {
    /// Scheme is not one of `btl2cap`, `btspp`, `btgoep`
    #[error("unsupported protocol scheme")]
    UnknownScheme,
    /// Address part is missing or not followed by a port or UUID
    #[error("missing address or port")]
    MissingAddress,
    /// Client address is not 12 hex digits
    #[error("invalid Bluetooth address `{0}`")]
    InvalidAddress(String),
    /// L2CAP PSM is not exactly 4 hex digits
    #[error("invalid PSM `{0}`")]
    InvalidPsm(String),
    /// RFCOMM channel is not a decimal number in 1..=30
    #[error("invalid channel `{0}`")]
    InvalidChannel(String),
    /// Server UUID is not 1 to 32 hex digits
    #[error("invalid service UUID `{0}`")]
    InvalidUuid(String),
    /// Parameter list is not `;key=value` pairs
    #[error("malformed parameter `{0}`")]
    MalformedParameter(String),
    /// Parameter key is not recognized
    #[error("unknown parameter `{0}`")]
    UnknownParameter(String),
    /// Parameter given twice
    #[error("duplicate parameter `{0}`")]
    DuplicateParameter(String),
    /// Parameter not allowed for this role or protocol
    #[error("parameter `{0}` not allowed here")]
    ParameterNotAllowed(String),
    /// Boolean parameter is neither `true` nor `false`
    #[error("invalid boolean value `{0}`")]
    InvalidBoolean(String),
    /// MTU is not a positive 16-bit number
    #[error("invalid MTU `{0}`")]
    InvalidMtu(String),
    /// Service name contains characters outside `[A-Za-z0-9 _-]`
    #[error("invalid service name `{0}`")]
    InvalidName(String),
}

/// Protocol selected by the connection string scheme
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Protocol {
    /// `btl2cap://`
    L2cap,
    /// `btspp://`
    Rfcomm,
    /// `btgoep://`
    Obex,
}

impl Protocol {
    /// Scheme name without the `://` separator
    #[must_use]
    pub const fn scheme(self) -> &'static str {
        match self {
            Self::L2cap => "btl2cap",
            Self::Rfcomm => "btspp",
            Self::Obex => "btgoep",
        }
    }

    fn from_scheme(scheme: &str) -> Result<Self, UrlError> {
        match scheme {
            "btl2cap" => Ok(Self::L2cap),
            "btspp" => Ok(Self::Rfcomm),
            "btgoep" => Ok(Self::Obex),
            _ => Err(UrlError::UnknownScheme),
        }
    }
}

/// Who a connection string addresses
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Endpoint {
    /// `localhost` with the UUID of the offered service
    Server {
        /// 1 to 32 lower-case hex digits
        uuid: String,
    },
    /// Remote device and PSM or channel
    Client {
        /// Remote device address
        address: BluetoothAddress,
        /// L2CAP PSM or RFCOMM channel
        port: u16,
    },
}

/// Parsed connection string
///
/// Built once per connection attempt and immutable afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionUrl {
    protocol: Protocol,
    endpoint: Endpoint,
    master: bool,
    encrypt: bool,
    authenticate: bool,
    authorize: bool,
    receive_mtu: Option<u16>,
    transmit_mtu: Option<u16>,
    name: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Param {
    Master,
    Encrypt,
    Authenticate,
    Authorize,
    Name,
    ReceiveMtu,
    TransmitMtu,
}

impl Param {
    fn from_key(key: &str) -> Option<Self> {
        Some(match key {
            "master" => Self::Master,
            "encrypt" => Self::Encrypt,
            "authenticate" => Self::Authenticate,
            "authorize" => Self::Authorize,
            "name" => Self::Name,
            "receivemtu" => Self::ReceiveMtu,
            "transmitmtu" => Self::TransmitMtu,
            _ => return None,
        })
    }

    const fn bit(self) -> u8 {
        1 << self as u8
    }
}

impl ConnectionUrl {
    /// Client connection string with every flag cleared
    #[must_use]
    pub fn client(protocol: Protocol, address: BluetoothAddress, port: u16) -> Self {
        Self::with_endpoint(protocol, Endpoint::Client { address, port })
    }

    /// Server connection string for the given service UUID
    #[must_use]
    pub fn server(protocol: Protocol, uuid: Uuid) -> Self {
        let uuid = format!("{uuid}").to_ascii_lowercase();
        Self::with_endpoint(protocol, Endpoint::Server { uuid })
    }

    fn with_endpoint(protocol: Protocol, endpoint: Endpoint) -> Self {
        Self {
            protocol,
            endpoint,
            master: false,
            encrypt: false,
            authenticate: false,
            authorize: false,
            receive_mtu: None,
            transmit_mtu: None,
            name: None,
        }
    }

    /// Set the master role flag
    #[must_use]
    pub fn with_master(mut self, master: bool) -> Self {
        self.master = master;
        self
    }

    /// Set authentication and encryption; encryption implies authentication
    #[must_use]
    pub fn with_security(mut self, authenticate: bool, encrypt: bool) -> Self {
        self.authenticate = authenticate || encrypt;
        self.encrypt = encrypt;
        self
    }

    /// Parse a connection string
    ///
    /// Scheme and parameter keys are case-insensitive; the `name` value keeps
    /// its case.
    ///
    /// # Errors
    /// Returns the first rule the string violates
    pub fn parse(text: &str) -> Result<Self, UrlError> {
        let lower = text.to_ascii_lowercase();
        let (scheme, rest) = lower.split_once("://").ok_or(UrlError::UnknownScheme)?;
        let protocol = Protocol::from_scheme(scheme)?;
        let rest_offset = scheme.len() + 3;

        let colon = rest.find(':').filter(|&i| i > 0).ok_or(UrlError::MissingAddress)?;
        let host = &rest[..colon];
        let after_host = &rest[colon + 1..];
        let target_len = after_host.find(';').unwrap_or(after_host.len());
        let target = &after_host[..target_len];

        let endpoint = if host == LOCALHOST {
            if target.is_empty()
                || target.len() > 32
                || !target.bytes().all(|c| c.is_ascii_hexdigit())
            {
                return Err(UrlError::InvalidUuid(target.to_string()));
            }
            Endpoint::Server {
                uuid: target.to_string(),
            }
        } else {
            let address = BluetoothAddress::from_compact(host)
                .map_err(|_| UrlError::InvalidAddress(host.to_string()))?;
            let port = match protocol {
                Protocol::L2cap => parse_psm(target)?,
                Protocol::Rfcomm | Protocol::Obex => parse_channel(target)?,
            };
            Endpoint::Client { address, port }
        };

        let mut url = Self::with_endpoint(protocol, endpoint);
        let params_offset = rest_offset + colon + 1 + target_len;
        url.apply_parameters(&text[params_offset..])?;
        Ok(url)
    }

    fn apply_parameters(&mut self, params: &str) -> Result<(), UrlError> {
        if params.is_empty() {
            return Ok(());
        }
        let params = params
            .strip_prefix(';')
            .ok_or_else(|| UrlError::MalformedParameter(params.to_string()))?;

        let mut seen = 0u8;
        let mut explicit_authenticate = false;
        for segment in params.split(';') {
            let (key, value) = segment
                .split_once('=')
                .filter(|(key, value)| !key.is_empty() && !value.is_empty())
                .ok_or_else(|| UrlError::MalformedParameter(segment.to_string()))?;
            let key = key.to_ascii_lowercase();
            let param =
                Param::from_key(&key).ok_or_else(|| UrlError::UnknownParameter(key.clone()))?;
            if seen & param.bit() != 0 {
                return Err(UrlError::DuplicateParameter(key));
            }
            seen |= param.bit();

            match param {
                Param::Master => self.master = parse_bool(value)?,
                Param::Encrypt => self.encrypt = parse_bool(value)?,
                Param::Authenticate => {
                    self.authenticate = parse_bool(value)?;
                    explicit_authenticate = true;
                }
                Param::Authorize => {
                    if !self.is_server() {
                        return Err(UrlError::ParameterNotAllowed(key));
                    }
                    self.authorize = parse_bool(value)?;
                }
                Param::Name => {
                    if !self.is_server() {
                        return Err(UrlError::ParameterNotAllowed(key));
                    }
                    if !value
                        .bytes()
                        .all(|c| c.is_ascii_alphanumeric() || matches!(c, b' ' | b'-' | b'_'))
                    {
                        return Err(UrlError::InvalidName(value.to_string()));
                    }
                    self.name = Some(value.to_string());
                }
                Param::ReceiveMtu | Param::TransmitMtu => {
                    if self.protocol != Protocol::L2cap {
                        return Err(UrlError::ParameterNotAllowed(key));
                    }
                    let mtu = value
                        .parse::<u16>()
                        .ok()
                        .filter(|&mtu| mtu > 0 && value.bytes().all(|c| c.is_ascii_digit()))
                        .ok_or_else(|| UrlError::InvalidMtu(value.to_string()))?;
                    if param == Param::ReceiveMtu {
                        self.receive_mtu = Some(mtu);
                    } else {
                        self.transmit_mtu = Some(mtu);
                    }
                }
            }
        }

        if !explicit_authenticate && (self.encrypt || self.authorize) {
            self.authenticate = true;
        }
        Ok(())
    }

    /// Protocol selected by the scheme
    #[must_use]
    pub fn protocol(&self) -> Protocol {
        self.protocol
    }

    /// Server or client endpoint
    #[must_use]
    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Whether this is a `localhost` server string
    #[must_use]
    pub fn is_server(&self) -> bool {
        matches!(self.endpoint, Endpoint::Server { .. })
    }

    /// Remote address of a client string
    #[must_use]
    pub fn address(&self) -> Option<BluetoothAddress> {
        match self.endpoint {
            Endpoint::Client { address, .. } => Some(address),
            Endpoint::Server { .. } => None,
        }
    }

    /// PSM or channel of a client string
    #[must_use]
    pub fn port(&self) -> Option<u16> {
        match self.endpoint {
            Endpoint::Client { port, .. } => Some(port),
            Endpoint::Server { .. } => None,
        }
    }

    /// Service UUID of a server string
    #[must_use]
    pub fn uuid(&self) -> Option<Uuid> {
        match &self.endpoint {
            Endpoint::Server { uuid } => Uuid::parse(uuid, false).ok(),
            Endpoint::Client { .. } => None,
        }
    }

    /// `master` flag
    #[must_use]
    pub fn master(&self) -> bool {
        self.master
    }

    /// `encrypt` flag
    #[must_use]
    pub fn encrypt(&self) -> bool {
        self.encrypt
    }

    /// `authenticate` flag
    #[must_use]
    pub fn authenticate(&self) -> bool {
        self.authenticate
    }

    /// `authorize` flag, servers only
    #[must_use]
    pub fn authorize(&self) -> bool {
        self.authorize
    }

    /// `receivemtu`, L2CAP only
    #[must_use]
    pub fn receive_mtu(&self) -> Option<u16> {
        self.receive_mtu
    }

    /// `transmitmtu`, L2CAP only
    #[must_use]
    pub fn transmit_mtu(&self) -> Option<u16> {
        self.transmit_mtu
    }

    /// Service name, servers only
    #[must_use]
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }
}

fn parse_psm(text: &str) -> Result<u16, UrlError> {
    if text.len() != 4 || !text.bytes().all(|c| c.is_ascii_hexdigit()) {
        return Err(UrlError::InvalidPsm(text.to_string()));
    }
    u16::from_str_radix(text, 16).map_err(|_| UrlError::InvalidPsm(text.to_string()))
}

fn parse_channel(text: &str) -> Result<u16, UrlError> {
    if text.is_empty() || !text.bytes().all(|c| c.is_ascii_digit()) {
        return Err(UrlError::InvalidChannel(text.to_string()));
    }
    text.parse::<u16>()
        .ok()
        .filter(|channel| (1..=MAX_RFCOMM_CHANNEL).contains(channel))
        .ok_or_else(|| UrlError::InvalidChannel(text.to_string()))
}

fn parse_bool(value: &str) -> Result<bool, UrlError> {
    match value.to_ascii_lowercase().as_str() {
        "true" => Ok(true),
        "false" => Ok(false),
        _ => Err(UrlError::InvalidBoolean(value.to_string())),
    }
}

impl fmt::Display for ConnectionUrl {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}://", self.protocol.scheme())?;
        match &self.endpoint {
            Endpoint::Server { uuid } => {
                write!(f, "{LOCALHOST}:{uuid}")?;
                if let Some(name) = &self.name {
                    write!(f, ";name={name}")?;
                }
                write!(f, ";authorize={}", self.authorize)?;
            }
            Endpoint::Client { address, port } => {
                f.write_str(&address.format_compact())?;
                match self.protocol {
                    Protocol::L2cap => write!(f, ":{port:04X}")?,
                    Protocol::Rfcomm | Protocol::Obex => write!(f, ":{port}")?,
                }
            }
        }
        // peers expect every flag spelled out, including false ones
        write!(
            f,
            ";master={};encrypt={};authenticate={}",
            self.master, self.encrypt, self.authenticate
        )?;
        if let Some(mtu) = self.receive_mtu {
            write!(f, ";receivemtu={mtu}")?;
        }
        if let Some(mtu) = self.transmit_mtu {
            write!(f, ";transmitmtu={mtu}")?;
        }
        Ok(())
    }
}

impl FromStr for ConnectionUrl {
    type Err = UrlError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use core::fmt::Write;
    use quickcheck::{Arbitrary, Gen};
    use quickcheck_macros::quickcheck;

    /// A well-formed connection string
    #[derive(Debug, Clone)]
    struct UrlText(String);

    impl Arbitrary for UrlText {
        fn arbitrary(g: &mut Gen) -> Self {
            let scheme = *g.choose(&["btl2cap", "btspp", "btgoep"][..]).unwrap();
            let mut text = format!("{scheme}://");
            if bool::arbitrary(g) {
                write!(text, "localhost:{:X}", u128::arbitrary(g)).unwrap();
                if bool::arbitrary(g) {
                    let len = 1 + usize::arbitrary(g) % 8;
                    let name: String = (0..len)
                        .map(|_| char::from(*g.choose(&b"abzAZ09 -_"[..]).unwrap()))
                        .collect();
                    write!(text, ";name={name}").unwrap();
                }
                if bool::arbitrary(g) {
                    write!(text, ";authorize={}", bool::arbitrary(g)).unwrap();
                }
            } else {
                for _ in 0..6 {
                    write!(text, "{:02X}", u8::arbitrary(g)).unwrap();
                }
                if scheme == "btl2cap" {
                    write!(text, ":{:04x}", u16::arbitrary(g)).unwrap();
                } else {
                    write!(text, ":{}", 1 + u16::arbitrary(g) % MAX_RFCOMM_CHANNEL).unwrap();
                }
            }
            for key in ["master", "encrypt", "authenticate"] {
                if bool::arbitrary(g) {
                    write!(text, ";{key}={}", bool::arbitrary(g)).unwrap();
                }
            }
            if scheme == "btl2cap" {
                for key in ["receivemtu", "transmitmtu"] {
                    if bool::arbitrary(g) {
                        write!(text, ";{key}={}", u16::arbitrary(g).max(1)).unwrap();
                    }
                }
            }
            Self(text)
        }
    }

    #[quickcheck]
    fn prop_format_then_parse_keeps_url(text: UrlText) -> bool {
        let url = ConnectionUrl::parse(&text.0).unwrap();
        ConnectionUrl::parse(&url.to_string()) == Ok(url)
    }

    #[test]
    fn test_parse_l2cap_client() {
        let url = ConnectionUrl::parse("btl2cap://0050C000321B:1001;ReceiveMTU=512").unwrap();
        assert_eq!(url.protocol(), Protocol::L2cap);
        assert_eq!(
            url.address(),
            Some(BluetoothAddress::new([0x00, 0x50, 0xC0, 0x00, 0x32, 0x1B]))
        );
        assert_eq!(url.port(), Some(0x1001));
        assert_eq!(url.receive_mtu(), Some(512));
        assert!(!url.is_server());
    }

    #[test]
    fn test_parse_server_url_with_name() {
        let url = ConnectionUrl::parse(
            "btspp://localhost:3B9FA89520078C303355AAA694238F07;name=Chat Server_1;authorize=true",
        )
        .unwrap();
        assert!(url.is_server());
        assert_eq!(url.name(), Some("Chat Server_1"));
        assert!(url.authorize());
        assert!(url.authenticate());
        assert_eq!(
            url.uuid(),
            Some(Uuid::from_u128(0x3B9F_A895_2007_8C30_3355_AAA6_9423_8F07))
        );
    }

    #[test]
    fn test_encrypt_forces_authenticate_unless_explicit() {
        let url = ConnectionUrl::parse("btspp://0050C000321B:3;encrypt=true").unwrap();
        assert!(url.authenticate());

        let url =
            ConnectionUrl::parse("btspp://0050C000321B:3;authenticate=false;encrypt=true").unwrap();
        assert!(url.encrypt());
        assert!(!url.authenticate());
    }

    #[test]
    fn test_format_keeps_explicit_false_flags() {
        let text = "btl2cap://0050C000321B:0001;master=false;encrypt=false;authenticate=false";
        let url = ConnectionUrl::parse(text).unwrap();
        assert_eq!(url.to_string(), text);

        let server = "btgoep://localhost:1105;name=Push;authorize=false;master=true;encrypt=false;authenticate=false";
        let reparsed = ConnectionUrl::parse(server).unwrap();
        assert_eq!(reparsed.to_string(), server);
        assert_eq!(ConnectionUrl::parse(&reparsed.to_string()).unwrap(), reparsed);
    }

    #[test]
    fn test_rejects_malformed_urls() {
        let cases = [
            ("http://0050C000321B:1001", UrlError::UnknownScheme),
            ("btl2cap://:1001", UrlError::MissingAddress),
            ("btl2cap://0050C000321B", UrlError::MissingAddress),
            (
                "btl2cap://0050-000321B:1001",
                UrlError::InvalidAddress("0050-000321b".into()),
            ),
            ("btl2cap://0050C000321B:101", UrlError::InvalidPsm("101".into())),
            ("btspp://0050C000321B:31", UrlError::InvalidChannel("31".into())),
            ("btspp://0050C000321B:0", UrlError::InvalidChannel("0".into())),
            ("btspp://localhost:", UrlError::InvalidUuid(String::new())),
            (
                "btspp://0050C000321B:3;master=true;master=false",
                UrlError::DuplicateParameter("master".into()),
            ),
            (
                "btspp://0050C000321B:3;colour=blue",
                UrlError::UnknownParameter("colour".into()),
            ),
            (
                "btspp://0050C000321B:3;name=Chat",
                UrlError::ParameterNotAllowed("name".into()),
            ),
            (
                "btspp://0050C000321B:3;authorize=true",
                UrlError::ParameterNotAllowed("authorize".into()),
            ),
            (
                "btspp://localhost:1101;receivemtu=100",
                UrlError::ParameterNotAllowed("receivemtu".into()),
            ),
            (
                "btl2cap://0050C000321B:1001;transmitmtu=0",
                UrlError::InvalidMtu("0".into()),
            ),
            (
                "btspp://localhost:1101;name=bad!name",
                UrlError::InvalidName("bad!name".into()),
            ),
            (
                "btspp://0050C000321B:3;encrypt=yes",
                UrlError::InvalidBoolean("yes".into()),
            ),
            (
                "btspp://0050C000321B:3;encrypt",
                UrlError::MalformedParameter("encrypt".into()),
            ),
        ];

        for (text, expected) in cases {
            assert_eq!(ConnectionUrl::parse(text), Err(expected), "{text}");
        }
    }

    #[test]
    fn test_client_builder() {
        let addr = BluetoothAddress::new([0x00, 0x11, 0x22, 0x33, 0x44, 0x55]);
        let url = ConnectionUrl::client(Protocol::L2cap, addr, 1).with_security(false, true);
        assert_eq!(
            url.to_string(),
            "btl2cap://001122334455:0001;master=false;encrypt=true;authenticate=true"
        );
    }
}
