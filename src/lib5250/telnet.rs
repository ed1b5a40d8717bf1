/// Telnet transport for the 5250 data stream
///
/// Three layers live here:
///
/// * `TelnetParser` is the byte-level state machine. It strips Telnet
///   escapes, answers option negotiation, and cuts the payload into
///   `Record`s at every `IAC EOR`. It does no I/O, so it can be driven
///   from a socket, a test or a benchmark alike.
/// * `Stream` is the transport seam the session talks to. `TelnetStream`
///   runs the parser over a non-blocking TCP socket, optionally wrapped in
///   rustls. `DebugStream` replays a trace file and records what would
///   have been sent.
/// * Helpers for outbound framing (`StreamHeader`, `encode_packet`) and
///   host-string parsing.

use std::collections::VecDeque;
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use rustls::pki_types::{CertificateDer, ServerName};
use rustls::{ClientConfig, ClientConnection, RootCertStore, StreamOwned};

use super::record::Record;
use crate::config::SessionConfig;
use crate::error::{NetworkError, Result, TelnetError};

/// Telnet commands
pub const IAC: u8 = 255;
pub const DONT: u8 = 254;
pub const DO: u8 = 253;
pub const WONT: u8 = 252;
pub const WILL: u8 = 251;
pub const SB: u8 = 250;
pub const SE: u8 = 240;
pub const EOR: u8 = 239;

/// Telnet options
pub const TRANSMIT_BINARY: u8 = 0;
pub const TIMING_MARK: u8 = 6;
pub const TERMINAL_TYPE: u8 = 24;
pub const END_OF_RECORD: u8 = 25;
pub const NEW_ENVIRON: u8 = 39;
pub const TN3270E: u8 = 40;

/// Sub-negotiation qualifiers (TERMINAL-TYPE and NEW-ENVIRON)
pub const IS: u8 = 0;
pub const SEND: u8 = 1;
pub const INFO: u8 = 2;

/// NEW-ENVIRON variable tags
pub const VAR: u8 = 0;
pub const VALUE: u8 = 1;
pub const ENV_ESC: u8 = 2;
pub const USERVAR: u8 = 3;

/// TN3270E sub-negotiation codes (RFC 2355)
pub const TN3270E_ASSOCIATE: u8 = 0;
pub const TN3270E_CONNECT: u8 = 1;
pub const TN3270E_DEVICE_TYPE: u8 = 2;
pub const TN3270E_FUNCTIONS: u8 = 3;
pub const TN3270E_IS: u8 = 4;
pub const TN3270E_REASON: u8 = 5;
pub const TN3270E_REJECT: u8 = 6;
pub const TN3270E_REQUEST: u8 = 7;
pub const TN3270E_SEND: u8 = 8;

/// Default ports
pub const TELNET_PORT: u16 = 23;
pub const TELNET_TLS_PORT: u16 = 992;

/// Record type of the general data stream (bytes 2-3 of every record)
pub const GDS_RECORD_TYPE: u16 = 0x12A0;

const RECEIVE_CHUNK: usize = 4096;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ParseState {
    Data,
    HaveIac,
    HaveVerb(u8),
    HaveSb,
    HaveSbIac,
}

/// Byte-level Telnet state machine that assembles 5250 records
#[derive(Debug)]
pub struct TelnetParser {
    state: ParseState,
    sb_buf: Vec<u8>,
    current: Option<Record>,
    records: VecDeque<Record>,
    replies: Vec<u8>,
    terminal_type: String,
    environment: Vec<(String, String)>,
    tn3270e_device: Option<String>,
}

impl TelnetParser {
    pub fn new(terminal_type: &str) -> Self {
        Self {
            state: ParseState::Data,
            sb_buf: Vec::new(),
            current: None,
            records: VecDeque::new(),
            replies: Vec::new(),
            terminal_type: terminal_type.to_string(),
            environment: Vec::new(),
            tn3270e_device: None,
        }
    }

    /// Parser announcing `env.TERM` and the other `env.*` variables.
    pub fn from_config(config: &SessionConfig) -> Self {
        let mut parser = Self::new(&config.terminal_type());
        parser.environment = config.environment();
        parser
    }

    /// Accept TN3270E and answer its device negotiation with `device_type`.
    pub fn with_tn3270e(mut self, device_type: &str) -> Self {
        self.tn3270e_device = Some(device_type.to_string());
        self
    }

    pub fn set_environment(&mut self, environment: Vec<(String, String)>) {
        self.environment = environment;
    }

    pub fn terminal_type(&self) -> &str {
        &self.terminal_type
    }

    /// Feed raw bytes from the network.
    pub fn feed(&mut self, data: &[u8]) {
        for &b in data {
            self.process_byte(b);
        }
    }

    fn process_byte(&mut self, b: u8) {
        match self.state {
            ParseState::Data => {
                if b == IAC {
                    self.state = ParseState::HaveIac;
                } else {
                    self.push_payload(b);
                }
            }
            ParseState::HaveIac => match b {
                IAC => {
                    self.push_payload(IAC);
                    self.state = ParseState::Data;
                }
                DO | DONT | WILL | WONT => self.state = ParseState::HaveVerb(b),
                SB => {
                    self.sb_buf.clear();
                    self.state = ParseState::HaveSb;
                }
                EOR => {
                    self.end_of_record();
                    self.state = ParseState::Data;
                }
                other => {
                    log::warn!("unknown escape 0x{other:02x} in telnet stream");
                    self.state = ParseState::Data;
                }
            },
            ParseState::HaveVerb(verb) => {
                self.do_verb(verb, b);
                self.state = ParseState::Data;
            }
            ParseState::HaveSb => {
                if b == IAC {
                    self.state = ParseState::HaveSbIac;
                } else {
                    self.sb_buf.push(b);
                }
            }
            ParseState::HaveSbIac => match b {
                IAC => {
                    self.sb_buf.push(IAC);
                    self.state = ParseState::HaveSb;
                }
                SE => {
                    let sb = std::mem::take(&mut self.sb_buf);
                    self.do_sb(&sb);
                    self.state = ParseState::Data;
                }
                other => {
                    log::warn!("unexpected 0x{other:02x} after IAC in sub-negotiation");
                    self.state = ParseState::HaveSb;
                }
            },
        }
    }

    fn push_payload(&mut self, b: u8) {
        self.current.get_or_insert_with(Record::new).append_byte(b);
    }

    fn end_of_record(&mut self) {
        if let Some(record) = self.current.take() {
            log::trace!("received record:\n{}", record.dump());
            self.records.push_back(record);
        }
    }

    fn accepts(&self, option: u8) -> bool {
        match option {
            TERMINAL_TYPE | END_OF_RECORD | TRANSMIT_BINARY | NEW_ENVIRON => true,
            TN3270E => self.tn3270e_device.is_some(),
            _ => false,
        }
    }

    fn do_verb(&mut self, verb: u8, option: u8) {
        log::debug!("got {} {}", verb_name(verb), option);
        let reply = match verb {
            DO => if self.accepts(option) { WILL } else { WONT },
            WILL => {
                if option == TIMING_MARK {
                    log::debug!("IAC WILL TIMING-MARK received");
                }
                if self.accepts(option) { DO } else { DONT }
            }
            // DONT and WONT need no acknowledgement
            _ => return,
        };
        log::debug!("sent {} {}", verb_name(reply), option);
        self.replies.extend_from_slice(&[IAC, reply, option]);
    }

    fn do_sb(&mut self, sb: &[u8]) {
        let Some(&option) = sb.first() else {
            return;
        };
        match option {
            TERMINAL_TYPE => {
                if sb.get(1) != Some(&SEND) {
                    return;
                }
                let mut out = vec![IAC, SB, TERMINAL_TYPE, IS];
                out.extend(escape(self.terminal_type.as_bytes()));
                out.extend_from_slice(&[IAC, SE]);
                log::debug!("sent terminal type {}", self.terminal_type);
                self.replies.extend(out);
            }
            NEW_ENVIRON => {
                // IS and INFO from the host carry no request
                if sb.get(1) != Some(&SEND) {
                    log::debug!("ignoring NEW-ENVIRON sub-negotiation {:02x?}", &sb[1..]);
                    return;
                }
                let mut out = vec![IAC, SB, NEW_ENVIRON, IS];
                for (name, value) in &self.environment {
                    out.push(VAR);
                    out.extend(escape(name.as_bytes()));
                    out.push(VALUE);
                    out.extend(escape(value.as_bytes()));
                }
                out.extend_from_slice(&[IAC, SE]);
                log::debug!("sent {} environment variables", self.environment.len());
                self.replies.extend(out);
            }
            TN3270E => self.do_tn3270e_sb(&sb[1..]),
            other => log::debug!("ignoring sub-negotiation for option {other}"),
        }
    }

    fn do_tn3270e_sb(&mut self, sb: &[u8]) {
        let Some(device) = self.tn3270e_device.clone() else {
            return;
        };
        match (sb.first().copied(), sb.get(1).copied()) {
            (Some(TN3270E_SEND), Some(TN3270E_DEVICE_TYPE)) => {
                let mut out = vec![IAC, SB, TN3270E, TN3270E_DEVICE_TYPE, TN3270E_REQUEST];
                out.extend(escape(device.as_bytes()));
                out.extend_from_slice(&[IAC, SE]);
                self.replies.extend(out);
            }
            (Some(TN3270E_FUNCTIONS), Some(TN3270E_REQUEST)) => {
                let mut out = vec![IAC, SB, TN3270E, TN3270E_FUNCTIONS, TN3270E_IS];
                out.extend(escape(&sb[2..]));
                out.extend_from_slice(&[IAC, SE]);
                self.replies.extend(out);
            }
            (Some(TN3270E_DEVICE_TYPE), Some(TN3270E_IS)) => {
                log::debug!("TN3270E device type accepted");
            }
            (Some(TN3270E_DEVICE_TYPE), Some(TN3270E_REJECT)) => {
                log::warn!("TN3270E device type {device} rejected");
            }
            _ => log::debug!("ignoring TN3270E sub-negotiation {:02x?}", sb),
        }
    }

    /// Negotiation bytes that must be written back to the host.
    pub fn take_replies(&mut self) -> Vec<u8> {
        std::mem::take(&mut self.replies)
    }

    pub fn pop_record(&mut self) -> Option<Record> {
        self.records.pop_front()
    }

    pub fn record_count(&self) -> usize {
        self.records.len()
    }

    /// True while a sub-negotiation is open
    pub fn in_subnegotiation(&self) -> bool {
        matches!(self.state, ParseState::HaveSb | ParseState::HaveSbIac)
    }

    /// Error for a sub-negotiation still open when the stream ends.
    pub fn check_complete(&self) -> Result<()> {
        if self.in_subnegotiation() {
            let option = self.sb_buf.first().copied().unwrap_or(0);
            return Err(TelnetError::UnterminatedSubnegotiation { option }.into());
        }
        Ok(())
    }
}

fn verb_name(verb: u8) -> &'static str {
    match verb {
        DO => "DO",
        DONT => "DONT",
        WILL => "WILL",
        WONT => "WONT",
        _ => "?",
    }
}

/// Double every IAC byte.
pub fn escape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len() + 2);
    for &b in data {
        if b == IAC {
            out.push(IAC);
        }
        out.push(b);
    }
    out
}

/// Collapse every `IAC IAC` pair back to one byte.
pub fn unescape(data: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(data.len());
    let mut i = 0;
    while i < data.len() {
        out.push(data[i]);
        if data[i] == IAC && data.get(i + 1) == Some(&IAC) {
            i += 1;
        }
        i += 1;
    }
    out
}

/// The fields of an outbound record header that vary per packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamHeader {
    pub flow_type: u16,
    pub flags: u8,
    pub opcode: u8,
}

impl StreamHeader {
    pub fn new(flow_type: u16, flags: u8, opcode: u8) -> Self {
        Self { flow_type, flags, opcode }
    }
}

/// Header plus payload, before Telnet escaping.
pub fn build_record(header: StreamHeader, data: &[u8]) -> Vec<u8> {
    let length = (data.len() + 10) as u16;
    let mut out = Vec::with_capacity(data.len() + 10);
    out.extend_from_slice(&length.to_be_bytes());
    out.extend_from_slice(&GDS_RECORD_TYPE.to_be_bytes());
    out.extend_from_slice(&header.flow_type.to_be_bytes());
    out.push(4);
    out.push(header.flags);
    out.push(0);
    out.push(header.opcode);
    out.extend_from_slice(data);
    out
}

/// Complete wire form: escaped record followed by `IAC EOR`.
pub fn encode_packet(header: StreamHeader, data: &[u8]) -> Vec<u8> {
    let mut out = escape(&build_record(header, data));
    out.extend_from_slice(&[IAC, EOR]);
    out
}

/// What the event loop should do next
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamEvent {
    /// Bytes are waiting; call `handle_receive`
    Data,
    /// A keystroke injected by the stream (trace replay)
    Key(i32),
    /// Nothing happened before the timeout
    Idle,
    /// The peer is gone or the trace is exhausted
    Closed,
}

/// A transport carrying 5250 records
pub trait Stream {
    fn connect(&mut self) -> Result<()>;

    fn disconnect(&mut self);

    /// Block up to `timeout` for something to happen.
    fn wait_event(&mut self, timeout: Duration) -> Result<StreamEvent>;

    /// Consume whatever input is available without blocking.
    /// `Ok(false)` means no data was waiting.
    fn handle_receive(&mut self) -> Result<bool>;

    /// Frame `data` with a record header and send it.
    fn send_packet(&mut self, header: StreamHeader, data: &[u8]) -> Result<()>;

    /// Next complete inbound record
    fn get_record(&mut self) -> Option<Record>;

    fn record_count(&self) -> usize;
}

impl<S: Stream + ?Sized> Stream for Box<S> {
    fn connect(&mut self) -> Result<()> {
        (**self).connect()
    }

    fn disconnect(&mut self) {
        (**self).disconnect()
    }

    fn wait_event(&mut self, timeout: Duration) -> Result<StreamEvent> {
        (**self).wait_event(timeout)
    }

    fn handle_receive(&mut self) -> Result<bool> {
        (**self).handle_receive()
    }

    fn send_packet(&mut self, header: StreamHeader, data: &[u8]) -> Result<()> {
        (**self).send_packet(header, data)
    }

    fn get_record(&mut self) -> Option<Record> {
        (**self).get_record()
    }

    fn record_count(&self) -> usize {
        (**self).record_count()
    }
}

/// Parsed form of a host string such as `ssl:as400.example.com:992`
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamTarget {
    Telnet { host: String, port: u16 },
    Tls { host: String, port: u16 },
    Debug { path: String },
}

/// Parse `[telnet:|ssl:|telnets:|telnet-ssl:|debug:]host[:port]`.
/// IPv6 literals are written in brackets: `[::1]:2323`.
pub fn parse_host(target: &str) -> Result<StreamTarget> {
    let invalid = || NetworkError::InvalidAddress { address: target.to_string() };
    if let Some(path) = target.strip_prefix("debug:") {
        if path.is_empty() {
            return Err(invalid().into());
        }
        return Ok(StreamTarget::Debug { path: path.to_string() });
    }

    let (tls, rest) = if let Some(r) = target.strip_prefix("telnet-ssl:") {
        (true, r)
    } else if let Some(r) = target.strip_prefix("telnets:") {
        (true, r)
    } else if let Some(r) = target.strip_prefix("ssl:") {
        (true, r)
    } else if let Some(r) = target.strip_prefix("telnet:") {
        (false, r)
    } else {
        (false, target)
    };
    let rest = rest.trim_start_matches("//").trim_end_matches('/');
    let default_port = if tls { TELNET_TLS_PORT } else { TELNET_PORT };

    let (host, port) = if let Some(inner) = rest.strip_prefix('[') {
        let close = inner.find(']').ok_or_else(invalid)?;
        let host = &inner[..close];
        let port = match &inner[close + 1..] {
            "" => default_port,
            p => p.strip_prefix(':').and_then(|p| p.parse().ok()).ok_or_else(invalid)?,
        };
        (host, port)
    } else {
        match rest.rsplit_once(':') {
            Some((h, p)) if !h.contains(':') => (h, p.parse().map_err(|_| invalid())?),
            _ => (rest, default_port),
        }
    };
    if host.is_empty() {
        return Err(invalid().into());
    }

    let host = host.to_string();
    Ok(if tls { StreamTarget::Tls { host, port } } else { StreamTarget::Telnet { host, port } })
}

/// Build the right stream for a configured host string.
pub fn open_stream(target: &str, config: &SessionConfig) -> Result<Box<dyn Stream>> {
    Ok(match parse_host(target)? {
        StreamTarget::Debug { path } => Box::new(DebugStream::open(Path::new(&path))?),
        StreamTarget::Telnet { host, port } => Box::new(TelnetStream::new(host, port, false, config)),
        StreamTarget::Tls { host, port } => Box::new(TelnetStream::new(host, port, true, config)),
    })
}

enum Transport {
    Plain(TcpStream),
    Tls(Box<StreamOwned<ClientConnection, TcpStream>>),
}

impl Transport {
    fn socket(&self) -> &TcpStream {
        match self {
            Transport::Plain(s) => s,
            Transport::Tls(s) => &s.sock,
        }
    }

    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.read(buf),
            Transport::Tls(s) => s.read(buf),
        }
    }

    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Transport::Plain(s) => s.write(buf),
            Transport::Tls(s) => s.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Transport::Plain(s) => s.flush(),
            Transport::Tls(s) => s.flush(),
        }
    }
}

/// Telnet over TCP, optionally wrapped in TLS
pub struct TelnetStream {
    host: String,
    port: u16,
    use_tls: bool,
    ca_bundle: Option<String>,
    transport: Option<Transport>,
    parser: TelnetParser,
}

impl TelnetStream {
    pub fn new(host: String, port: u16, use_tls: bool, config: &SessionConfig) -> Self {
        Self {
            host,
            port,
            use_tls,
            ca_bundle: config.get_string("tls.ca_bundle").filter(|s| !s.is_empty()),
            transport: None,
            parser: TelnetParser::from_config(config),
        }
    }

    pub fn is_connected(&self) -> bool {
        self.transport.is_some()
    }

    pub fn is_tls(&self) -> bool {
        self.use_tls
    }

    fn transport(&mut self) -> Result<&mut Transport> {
        self.transport.as_mut().ok_or_else(|| NetworkError::NotConnected.into())
    }

    fn tls_config(&self) -> Result<ClientConfig> {
        let mut roots = RootCertStore::empty();
        roots.extend(webpki_roots::TLS_SERVER_ROOTS.iter().cloned());

        match rustls_native_certs::load_native_certs() {
            Ok(certs) => {
                let (added, ignored) = roots.add_parsable_certificates(certs);
                log::debug!("loaded {added} platform root certificates ({ignored} ignored)");
            }
            Err(e) => log::warn!("could not load platform root certificates: {e}"),
        }

        if let Some(path) = &self.ca_bundle {
            let pem = std::fs::read_to_string(path).map_err(|e| NetworkError::SslError {
                message: format!("cannot read CA bundle {path}: {e}"),
            })?;
            let certs = parse_pem_certificates(&pem)?;
            if certs.is_empty() {
                return Err(NetworkError::SslError {
                    message: format!("no certificates in CA bundle {path}"),
                }
                .into());
            }
            for cert in certs {
                roots.add(cert).map_err(|e| NetworkError::SslError { message: e.to_string() })?;
            }
        }

        Ok(ClientConfig::builder().with_root_certificates(roots).with_no_client_auth())
    }

    fn write_all(&mut self, data: &[u8]) -> Result<()> {
        let result = write_fully(self.transport()?, data);
        if let Err(e) = &result {
            log::error!("write to {}:{} failed: {e}", self.host, self.port);
            self.transport = None;
        }
        result
    }

    fn flush_replies(&mut self) -> Result<()> {
        let replies = self.parser.take_replies();
        if replies.is_empty() {
            return Ok(());
        }
        self.write_all(&replies)
    }
}

impl Stream for TelnetStream {
    fn connect(&mut self) -> Result<()> {
        let addr = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| NetworkError::DnsResolution { host: self.host.clone() })?
            .next()
            .ok_or_else(|| NetworkError::DnsResolution { host: self.host.clone() })?;

        log::debug!("connecting to {addr} (tls={})", self.use_tls);
        let tcp = TcpStream::connect(addr)?;
        tcp.set_nodelay(true)?;
        enable_tcp_keepalive(&tcp);

        let transport = if self.use_tls {
            let config = self.tls_config()?;
            let server_name = ServerName::try_from(self.host.as_str())
                .map(|n| n.to_owned())
                .map_err(|_| NetworkError::InvalidAddress { address: self.host.clone() })?;
            let mut conn = ClientConnection::new(Arc::new(config), server_name)
                .map_err(|e| NetworkError::SslError { message: e.to_string() })?;
            let mut tcp = tcp;
            while conn.is_handshaking() {
                conn.complete_io(&mut tcp).map_err(|e| NetworkError::SslError {
                    message: format!("handshake with {} failed: {e}", self.host),
                })?;
            }
            tcp.set_nonblocking(true)?;
            Transport::Tls(Box::new(StreamOwned::new(conn, tcp)))
        } else {
            tcp.set_nonblocking(true)?;
            Transport::Plain(tcp)
        };

        self.transport = Some(transport);
        Ok(())
    }

    fn disconnect(&mut self) {
        if let Some(transport) = self.transport.take() {
            if let Transport::Tls(mut s) = transport {
                s.conn.send_close_notify();
                let _ = s.flush();
            }
            log::debug!("disconnected from {}:{}", self.host, self.port);
        }
    }

    fn wait_event(&mut self, timeout: Duration) -> Result<StreamEvent> {
        let transport = match self.transport.as_ref() {
            Some(t) => t,
            None => return Ok(StreamEvent::Closed),
        };
        if poll_readable(transport.socket(), timeout)? {
            Ok(StreamEvent::Data)
        } else {
            Ok(StreamEvent::Idle)
        }
    }

    fn handle_receive(&mut self) -> Result<bool> {
        let mut buf = [0u8; RECEIVE_CHUNK];
        let mut got_data = false;
        loop {
            let n = match self.transport()?.read(&mut buf) {
                Ok(0) => {
                    self.transport = None;
                    self.parser.check_complete()?;
                    return Err(NetworkError::Disconnected.into());
                }
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    self.transport = None;
                    return Err(e.into());
                }
            };
            got_data = true;
            self.parser.feed(&buf[..n]);
        }
        self.flush_replies()?;
        Ok(got_data)
    }

    fn send_packet(&mut self, header: StreamHeader, data: &[u8]) -> Result<()> {
        let packet = encode_packet(header, data);
        if log::log_enabled!(log::Level::Trace) {
            log::trace!("sending record:\n{}", Record::from_bytes(build_record(header, data)).dump());
        }
        self.write_all(&packet)
    }

    fn get_record(&mut self) -> Option<Record> {
        self.parser.pop_record()
    }

    fn record_count(&self) -> usize {
        self.parser.record_count()
    }
}

impl Drop for TelnetStream {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Write every byte, waiting out transient would-block conditions.
fn write_fully(transport: &mut Transport, data: &[u8]) -> Result<()> {
    let mut written = 0;
    while written < data.len() {
        match transport.write(&data[written..]) {
            Ok(0) => return Err(NetworkError::Disconnected.into()),
            Ok(n) => written += n,
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                poll_writable(transport.socket(), Duration::from_millis(100))?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
    loop {
        match transport.flush() {
            Ok(()) => return Ok(()),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                poll_writable(transport.socket(), Duration::from_millis(100))?;
            }
            Err(e) if e.kind() == io::ErrorKind::Interrupted => {}
            Err(e) => return Err(e.into()),
        }
    }
}

/// Extract DER certificates from a PEM bundle.
fn parse_pem_certificates(pem: &str) -> Result<Vec<CertificateDer<'static>>> {
    use base64::Engine as _;

    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut certs = Vec::new();
    let mut rest = pem;
    while let Some(start) = rest.find(BEGIN) {
        let body_start = start + BEGIN.len();
        let Some(len) = rest[body_start..].find(END) else {
            break;
        };
        let body: String = rest[body_start..body_start + len]
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .collect();
        let der = base64::engine::general_purpose::STANDARD
            .decode(body.as_bytes())
            .map_err(|e| NetworkError::SslError { message: format!("bad certificate encoding: {e}") })?;
        certs.push(CertificateDer::from(der));
        rest = &rest[body_start + len + END.len()..];
    }
    Ok(certs)
}

#[cfg(unix)]
fn poll_fd(sock: &TcpStream, events: libc::c_short, timeout: Duration) -> io::Result<bool> {
    use std::os::unix::io::AsRawFd;

    let mut pfd = libc::pollfd { fd: sock.as_raw_fd(), events, revents: 0 };
    let ms = timeout.as_millis().min(libc::c_int::MAX as u128) as libc::c_int;
    let rc = unsafe { libc::poll(&mut pfd, 1, ms) };
    if rc < 0 {
        let err = io::Error::last_os_error();
        if err.kind() == io::ErrorKind::Interrupted {
            return Ok(false);
        }
        return Err(err);
    }
    Ok(rc > 0)
}

#[cfg(unix)]
fn poll_readable(sock: &TcpStream, timeout: Duration) -> io::Result<bool> {
    poll_fd(sock, libc::POLLIN, timeout)
}

#[cfg(unix)]
fn poll_writable(sock: &TcpStream, timeout: Duration) -> io::Result<bool> {
    poll_fd(sock, libc::POLLOUT, timeout)
}

#[cfg(not(unix))]
fn poll_readable(_sock: &TcpStream, timeout: Duration) -> io::Result<bool> {
    std::thread::sleep(timeout.min(Duration::from_millis(10)));
    Ok(true)
}

#[cfg(not(unix))]
fn poll_writable(_sock: &TcpStream, timeout: Duration) -> io::Result<bool> {
    std::thread::sleep(timeout.min(Duration::from_millis(10)));
    Ok(true)
}

#[cfg(unix)]
fn enable_tcp_keepalive(sock: &TcpStream) {
    use std::os::unix::io::AsRawFd;

    let optval: libc::c_int = 1;
    let ret = unsafe {
        libc::setsockopt(
            sock.as_raw_fd(),
            libc::SOL_SOCKET,
            libc::SO_KEEPALIVE,
            &optval as *const _ as *const libc::c_void,
            std::mem::size_of_val(&optval) as libc::socklen_t,
        )
    };
    if ret != 0 {
        log::warn!("could not enable TCP keepalive: {}", io::Error::last_os_error());
    }
}

#[cfg(not(unix))]
fn enable_tcp_keepalive(_sock: &TcpStream) {}

/// One entry of a debug trace
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TraceEvent {
    Record(Vec<u8>),
    Key(i32),
}

/// Parse a trace: `@record` hex lines, `@eor` and `@key N`.
pub fn parse_trace<R: BufRead>(reader: R) -> Result<Vec<TraceEvent>> {
    let mut events = Vec::new();
    let mut current: Vec<u8> = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        if !line.starts_with('@') {
            continue;
        }
        if line.starts_with("@record ") {
            parse_record_line(&line, &mut current).map_err(|_| TelnetError::MalformedTrace {
                line: index + 1,
                content: line.clone(),
            })?;
        } else if line.starts_with("@eor") {
            events.push(TraceEvent::Record(std::mem::take(&mut current)));
        } else if let Some(key) = line.strip_prefix("@key ") {
            let key = key.trim().parse().map_err(|_| TelnetError::MalformedTrace {
                line: index + 1,
                content: line.clone(),
            })?;
            events.push(TraceEvent::Key(key));
        }
    }
    Ok(events)
}

/// Hex starts at column 14; a single space separates byte groups and a
/// double space ends the hex part.
fn parse_record_line(line: &str, out: &mut Vec<u8>) -> std::result::Result<(), ()> {
    let bytes = line.as_bytes();
    let mut pos = 14;
    let mut count = 0;
    while count < 16 && pos < bytes.len() {
        if bytes[pos] == b' ' {
            pos += 1;
            if pos >= bytes.len() || bytes[pos] == b' ' {
                break;
            }
        }
        let pair = bytes.get(pos..pos + 2).ok_or(())?;
        let text = std::str::from_utf8(pair).map_err(|_| ())?;
        out.push(u8::from_str_radix(text, 16).map_err(|_| ())?);
        pos += 2;
        count += 1;
    }
    Ok(())
}

/// Replays a trace file; outbound packets are kept instead of sent
#[derive(Debug, Default)]
pub struct DebugStream {
    events: VecDeque<TraceEvent>,
    records: VecDeque<Record>,
    sent: Vec<Record>,
    connected: bool,
}

impl DebugStream {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_reader(BufReader::new(file))
    }

    pub fn from_reader<R: BufRead>(reader: R) -> Result<Self> {
        Ok(Self::from_events(parse_trace(reader)?))
    }

    pub fn from_events(events: Vec<TraceEvent>) -> Self {
        Self { events: events.into(), ..Self::default() }
    }

    pub fn push_record(&mut self, data: Vec<u8>) {
        self.events.push_back(TraceEvent::Record(data));
    }

    pub fn push_key(&mut self, key: i32) {
        self.events.push_back(TraceEvent::Key(key));
    }

    /// Every packet passed to `send_packet`, header included, unescaped.
    pub fn sent(&self) -> &[Record] {
        &self.sent
    }

    pub fn take_sent(&mut self) -> Vec<Record> {
        std::mem::take(&mut self.sent)
    }

    pub fn pending_events(&self) -> usize {
        self.events.len()
    }
}

impl Stream for DebugStream {
    fn connect(&mut self) -> Result<()> {
        self.connected = true;
        Ok(())
    }

    fn disconnect(&mut self) {
        self.connected = false;
    }

    fn wait_event(&mut self, _timeout: Duration) -> Result<StreamEvent> {
        match self.events.front() {
            None => Ok(StreamEvent::Closed),
            Some(TraceEvent::Record(_)) => Ok(StreamEvent::Data),
            Some(TraceEvent::Key(k)) => {
                let key = *k;
                self.events.pop_front();
                Ok(StreamEvent::Key(key))
            }
        }
    }

    /// Delivers one record per call so keys stay interleaved.
    fn handle_receive(&mut self) -> Result<bool> {
        match self.events.front() {
            Some(TraceEvent::Record(_)) => {
                if let Some(TraceEvent::Record(data)) = self.events.pop_front() {
                    self.records.push_back(Record::from_bytes(data));
                }
                Ok(true)
            }
            Some(TraceEvent::Key(_)) => Ok(false),
            None => Err(NetworkError::Disconnected.into()),
        }
    }

    fn send_packet(&mut self, header: StreamHeader, data: &[u8]) -> Result<()> {
        let record = Record::from_bytes(build_record(header, data));
        log::trace!("debug stream send:\n{}", record.dump());
        self.sent.push(record);
        Ok(())
    }

    fn get_record(&mut self) -> Option<Record> {
        self.records.pop_front()
    }

    fn record_count(&self) -> usize {
        self.records.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::TN5250Error;

    #[test]
    fn test_do_will_replies() {
        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.feed(&[IAC, DO, TERMINAL_TYPE, IAC, DO, 1, IAC, WILL, END_OF_RECORD, IAC, WILL, 3]);
        assert_eq!(
            parser.take_replies(),
            vec![IAC, WILL, TERMINAL_TYPE, IAC, WONT, 1, IAC, DO, END_OF_RECORD, IAC, DONT, 3]
        );
    }

    #[test]
    fn test_dont_and_wont_are_silent() {
        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.feed(&[IAC, DONT, TRANSMIT_BINARY, IAC, WONT, NEW_ENVIRON]);
        assert!(parser.take_replies().is_empty());
    }

    #[test]
    fn test_terminal_type_subnegotiation() {
        let mut parser = TelnetParser::new("IBM-3477-FC");
        parser.feed(&[IAC, SB, TERMINAL_TYPE, SEND, IAC, SE]);
        let mut expected = vec![IAC, SB, TERMINAL_TYPE, IS];
        expected.extend_from_slice(b"IBM-3477-FC");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(parser.take_replies(), expected);
    }

    #[test]
    fn test_new_environ_subnegotiation() {
        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.set_environment(vec![("DEVNAME".to_string(), "QPADEV01".to_string())]);
        parser.feed(&[IAC, SB, NEW_ENVIRON, SEND, VAR, USERVAR, IAC, SE]);
        let mut expected = vec![IAC, SB, NEW_ENVIRON, IS, VAR];
        expected.extend_from_slice(b"DEVNAME");
        expected.push(VALUE);
        expected.extend_from_slice(b"QPADEV01");
        expected.extend_from_slice(&[IAC, SE]);
        assert_eq!(parser.take_replies(), expected);
    }

    #[test]
    fn test_new_environ_is_and_info_get_no_reply() {
        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.set_environment(vec![("DEVNAME".to_string(), "QPADEV01".to_string())]);
        parser.feed(&[IAC, SB, NEW_ENVIRON, IS, VAR, IAC, SE]);
        assert!(parser.take_replies().is_empty());
        parser.feed(&[IAC, SB, NEW_ENVIRON, 2, VAR, IAC, SE]);
        assert!(parser.take_replies().is_empty());
        parser.feed(&[IAC, SB, NEW_ENVIRON, IAC, SE]);
        assert!(parser.take_replies().is_empty());
    }

    #[test]
    fn test_tn3270e_only_for_3270_devices() {
        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.feed(&[IAC, DO, TN3270E]);
        assert_eq!(parser.take_replies(), vec![IAC, WONT, TN3270E]);

        let mut parser = TelnetParser::new("IBM-3278-2").with_tn3270e("IBM-3278-2-E");
        parser.feed(&[IAC, DO, TN3270E]);
        assert_eq!(parser.take_replies(), vec![IAC, WILL, TN3270E]);
        parser.feed(&[IAC, SB, TN3270E, TN3270E_SEND, TN3270E_DEVICE_TYPE, IAC, SE]);
        let replies = parser.take_replies();
        assert_eq!(&replies[..5], &[IAC, SB, TN3270E, TN3270E_DEVICE_TYPE, TN3270E_REQUEST]);
        assert!(replies.ends_with(&[IAC, SE]));

        parser.feed(&[IAC, SB, TN3270E, TN3270E_FUNCTIONS, TN3270E_REQUEST, 0, 2, IAC, SE]);
        assert_eq!(
            parser.take_replies(),
            vec![IAC, SB, TN3270E, TN3270E_FUNCTIONS, TN3270E_IS, 0, 2, IAC, SE]
        );
    }

    #[test]
    fn test_records_split_on_eor() {
        let mut parser = TelnetParser::new("IBM-3179-2");
        parser.feed(&[0x01, 0x02, IAC, IAC, 0x03, IAC, EOR, IAC, EOR, 0x04]);
        assert_eq!(parser.record_count(), 1);
        let record = parser.pop_record().unwrap();
        assert_eq!(record.data(), &[0x01, 0x02, 0xFF, 0x03]);
        // the empty EOR produced nothing; 0x04 is still under assembly
        assert!(parser.pop_record().is_none());
        parser.feed(&[IAC, EOR]);
        assert_eq!(parser.pop_record().unwrap().data(), &[0x04]);
    }

    #[test]
    fn test_escaped_iac_inside_subnegotiation() {
        let mut parser = TelnetParser::new("X");
        parser.feed(&[IAC, SB, 99, IAC, IAC, 1, IAC, SE, 0x42, IAC, EOR]);
        assert!(parser.take_replies().is_empty());
        assert_eq!(parser.pop_record().unwrap().data(), &[0x42]);
    }

    #[test]
    fn test_unknown_escape_recovers() {
        let mut parser = TelnetParser::new("X");
        parser.feed(&[IAC, 0xF1, 0x10, IAC, EOR]);
        assert_eq!(parser.pop_record().unwrap().data(), &[0x10]);
    }

    #[test]
    fn test_unterminated_subnegotiation_reported() {
        let mut parser = TelnetParser::new("X");
        parser.feed(&[IAC, SB, TERMINAL_TYPE, SEND]);
        assert!(parser.check_complete().is_err());
    }

    #[test]
    fn test_encode_packet_layout() {
        let packet = encode_packet(StreamHeader::new(0, 0x80, 0), &[0x10, 0x05, 0x01, 0xFF]);
        assert_eq!(
            packet,
            vec![0x00, 0x0E, 0x12, 0xA0, 0x00, 0x00, 0x04, 0x80, 0x00, 0x00, 0x10, 0x05, 0x01, 0xFF, 0xFF, IAC, EOR]
        );
    }

    #[test]
    fn test_escape_unescape() {
        let data = [0x00, 0xFF, 0x10, 0xFF, 0xFF];
        let escaped = escape(&data);
        assert_eq!(escaped, vec![0x00, 0xFF, 0xFF, 0x10, 0xFF, 0xFF, 0xFF, 0xFF]);
        assert_eq!(unescape(&escaped), data.to_vec());
    }

    #[test]
    fn test_parse_host_forms() {
        assert_eq!(
            parse_host("as400.example.com").unwrap(),
            StreamTarget::Telnet { host: "as400.example.com".into(), port: 23 }
        );
        assert_eq!(
            parse_host("telnet:pub400.com:2323").unwrap(),
            StreamTarget::Telnet { host: "pub400.com".into(), port: 2323 }
        );
        assert_eq!(
            parse_host("ssl:pub400.com").unwrap(),
            StreamTarget::Tls { host: "pub400.com".into(), port: 992 }
        );
        assert_eq!(
            parse_host("telnets:[::1]:9920").unwrap(),
            StreamTarget::Tls { host: "::1".into(), port: 9920 }
        );
        assert_eq!(
            parse_host("debug:/tmp/trace.log").unwrap(),
            StreamTarget::Debug { path: "/tmp/trace.log".into() }
        );
        assert!(parse_host("telnet:host:notaport").is_err());
        assert!(parse_host("telnet:").is_err());
        assert!(parse_host("[::1").is_err());
    }

    #[test]
    fn test_parse_trace() {
        let trace = "\
@record +0000 000d12a0 00000408 00030411 00       ...\n\
noise line\n\
@eor\n\
@key 13\n";
        let events = parse_trace(trace.as_bytes()).unwrap();
        assert_eq!(
            events,
            vec![
                TraceEvent::Record(vec![0x00, 0x0D, 0x12, 0xA0, 0x00, 0x00, 0x04, 0x08, 0x00, 0x03, 0x04, 0x11, 0x00]),
                TraceEvent::Key(13),
            ]
        );
    }

    #[test]
    fn test_trace_reads_back_dump() {
        let data: Vec<u8> = (0u8..40).collect();
        let dump = Record::from_bytes(data.clone()).dump();
        let events = parse_trace(dump.as_bytes()).unwrap();
        assert_eq!(events, vec![TraceEvent::Record(data)]);
    }

    #[test]
    fn test_malformed_trace_line() {
        let err = parse_trace("@record +0000 zz\n@eor\n".as_bytes()).unwrap_err();
        assert!(matches!(err, TN5250Error::Telnet(TelnetError::MalformedTrace { line: 1, .. })));
    }

    #[test]
    fn test_debug_stream_events() {
        let mut stream = DebugStream::from_events(vec![
            TraceEvent::Record(vec![1, 2, 3]),
            TraceEvent::Key(0x41),
        ]);
        assert_eq!(stream.wait_event(Duration::ZERO).unwrap(), StreamEvent::Data);
        assert!(stream.handle_receive().unwrap());
        assert_eq!(stream.get_record().unwrap().data(), &[1, 2, 3]);
        assert_eq!(stream.wait_event(Duration::ZERO).unwrap(), StreamEvent::Key(0x41));
        assert_eq!(stream.wait_event(Duration::ZERO).unwrap(), StreamEvent::Closed);

        stream.send_packet(StreamHeader::new(0, 0, 3), &[0xF1]).unwrap();
        assert_eq!(stream.sent()[0].opcode(), 3);
        assert_eq!(stream.sent()[0].payload(), &[0xF1]);
    }
}
