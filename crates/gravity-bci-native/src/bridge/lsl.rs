//! Lab Streaming Layer (LSL) compatible streaming
//!
//! LSL-style network transport for EEG samples: multicast UDP discovery and
//! one TCP connection per consumer.
//!
//! # Wire format
//!
//! ```text
//! outlet ──► "LSL:streaminfo/<len>:" <stream info XML>
//!        ──► [timestamp: f64 LE][value: f32 LE] × channel_count   (repeated)
//! ```
//!
//! Discovery: a consumer sends `LSL:shortinfo` to the multicast group (and to
//! the loopback discovery port); each outlet answers
//! `LSL:shortinfo <json>` with its name, type, shape and data port.

use std::io::{ErrorKind, Read, Write};
use std::net::{IpAddr, Ipv4Addr, SocketAddr, TcpListener, TcpStream, UdpSocket};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use gravity_bci_core::Sample;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, info, warn};

use super::source::{SampleSource, SourceError, SourceRead, SourceResult};

/// LSL protocol version
pub const LSL_PROTOCOL_VERSION: u16 = 110;

/// Multicast group for discovery
pub const LSL_MULTICAST_ADDR: Ipv4Addr = Ipv4Addr::new(224, 0, 0, 183);

/// Discovery port
pub const LSL_MULTICAST_PORT: u16 = 16571;

/// Stream name published by the acquisition rig
pub const DEFAULT_STREAM_NAME: &str = "EEG_BCI";

/// Resolve timeout used by the live session
pub const DEFAULT_RESOLVE_TIMEOUT: Duration = Duration::from_secs(5);

const SHORTINFO_PREFIX: &str = "LSL:shortinfo";
const HEADER_PREFIX: &str = "LSL:streaminfo/";
const MAX_HEADER_BYTES: usize = 1 << 20;

/// LSL errors
#[derive(Debug, Error)]
pub enum LslError {
    /// Network I/O error
    #[error("Network error: {0}")]
    Network(#[from] std::io::Error),

    /// No streams found
    #[error("No LSL streams found matching {0}")]
    NoStreamsFound(String),

    /// Stream disconnected
    #[error("Stream disconnected")]
    Disconnected,

    /// Invalid stream info or header
    #[error("Invalid stream info: {0}")]
    InvalidInfo(String),

    /// Timeout
    #[error("Operation timed out")]
    Timeout,
}

/// LSL result type
pub type LslResult<T> = Result<T, LslError>;

impl From<LslError> for SourceError {
    fn from(err: LslError) -> Self {
        match err {
            LslError::Disconnected => Self::Disconnected { reason: "LSL outlet closed the connection".into() },
            LslError::Network(e) => Self::Io(e),
            other => Self::Protocol(other.to_string()),
        }
    }
}

// ============================================================================
// Stream Metadata
// ============================================================================

/// Stream content type
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamType {
    /// Electroencephalography
    Eeg,
    /// Markers/events
    Markers,
    /// Anything else
    Data,
}

impl StreamType {
    /// Type string used in stream info and discovery
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Eeg => "EEG",
            Self::Markers => "Markers",
            Self::Data => "Data",
        }
    }

    /// Parse a type string; unknown types map to [`StreamType::Data`]
    #[must_use]
    pub fn parse(s: &str) -> Self {
        match s {
            "EEG" => Self::Eeg,
            "Markers" => Self::Markers,
            _ => Self::Data,
        }
    }
}

/// Stream metadata
#[derive(Debug, Clone, PartialEq)]
pub struct StreamInfo {
    /// Stream name (e.g. `EEG_BCI`)
    pub name: String,
    /// Stream type
    pub stream_type: StreamType,
    /// Channel labels in stream order
    pub channel_labels: Vec<String>,
    /// Nominal sample rate (Hz)
    pub nominal_srate: f64,
    /// Unique source ID
    pub source_id: String,
    /// Hostname
    pub hostname: String,
    /// Creation timestamp (unix seconds)
    pub created_at: f64,
}

impl StreamInfo {
    /// Create stream info for a float32 stream
    #[must_use]
    pub fn new(name: &str, stream_type: StreamType, channel_labels: Vec<String>, nominal_srate: f64) -> Self {
        let hostname = std::env::var("HOSTNAME")
            .or_else(|_| std::env::var("COMPUTERNAME"))
            .unwrap_or_else(|_| "localhost".to_string());
        let created_at = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0);

        Self {
            name: name.to_string(),
            stream_type,
            channel_labels,
            nominal_srate,
            source_id: format!("gravity-{}-{}", name, std::process::id()),
            hostname,
            created_at,
        }
    }

    /// Number of channels
    pub fn channel_count(&self) -> usize {
        self.channel_labels.len()
    }

    /// Bytes of one data packet
    pub fn packet_len(&self) -> usize {
        8 + 4 * self.channel_count()
    }

    /// Generate the XML header sent to every consumer
    #[must_use]
    pub fn to_xml(&self) -> String {
        let mut xml = String::from("<?xml version=\"1.0\"?>\n<info>\n");
        push_tag(&mut xml, 1, "name", &self.name);
        push_tag(&mut xml, 1, "type", self.stream_type.as_str());
        push_tag(&mut xml, 1, "channel_count", &self.channel_count().to_string());
        push_tag(&mut xml, 1, "nominal_srate", &self.nominal_srate.to_string());
        push_tag(&mut xml, 1, "channel_format", "float32");
        push_tag(&mut xml, 1, "source_id", &self.source_id);
        push_tag(&mut xml, 1, "version", &LSL_PROTOCOL_VERSION.to_string());
        push_tag(&mut xml, 1, "created_at", &self.created_at.to_string());
        push_tag(&mut xml, 1, "hostname", &self.hostname);
        xml.push_str("  <desc>\n    <channels>\n");
        for label in &self.channel_labels {
            xml.push_str("      <channel>\n");
            push_tag(&mut xml, 4, "label", label);
            push_tag(&mut xml, 4, "unit", "microvolts");
            xml.push_str("      </channel>\n");
        }
        xml.push_str("    </channels>\n  </desc>\n</info>\n");
        xml
    }

    /// Parse the XML header written by [`StreamInfo::to_xml`] or another LSL
    /// outlet. Missing channel labels are filled with `Ch1..ChN`.
    pub fn from_xml(xml: &str) -> LslResult<Self> {
        let field = |name: &str| {
            tag_content(xml, name).ok_or_else(|| LslError::InvalidInfo(format!("missing <{name}>")))
        };
        let channel_count: usize = field("channel_count")?
            .trim()
            .parse()
            .map_err(|_| LslError::InvalidInfo("bad channel_count".into()))?;
        let nominal_srate: f64 = field("nominal_srate")?
            .trim()
            .parse()
            .map_err(|_| LslError::InvalidInfo("bad nominal_srate".into()))?;
        let format = tag_content(xml, "channel_format").unwrap_or("float32");
        if format != "float32" {
            return Err(LslError::InvalidInfo(format!("unsupported channel format {format}")));
        }

        let mut channel_labels: Vec<String> = all_tag_contents(xml, "label").map(unescape).collect();
        if channel_labels.len() != channel_count {
            channel_labels = (1..=channel_count).map(|i| format!("Ch{i}")).collect();
        }

        Ok(Self {
            name: unescape(field("name")?),
            stream_type: StreamType::parse(field("type")?),
            channel_labels,
            nominal_srate,
            source_id: tag_content(xml, "source_id").map(unescape).unwrap_or_default(),
            hostname: tag_content(xml, "hostname").map(unescape).unwrap_or_default(),
            created_at: tag_content(xml, "created_at").and_then(|s| s.parse().ok()).unwrap_or(0.0),
        })
    }
}

fn push_tag(xml: &mut String, depth: usize, name: &str, value: &str) {
    let escaped = value.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;");
    xml.push_str(&"  ".repeat(depth));
    xml.push_str(&format!("<{name}>{escaped}</{name}>\n"));
}

fn unescape(value: &str) -> String {
    value.replace("&lt;", "<").replace("&gt;", ">").replace("&amp;", "&")
}

fn tag_content<'a>(xml: &'a str, name: &str) -> Option<&'a str> {
    all_tag_contents(xml, name).next()
}

fn all_tag_contents<'a>(xml: &'a str, name: &str) -> impl Iterator<Item = &'a str> + 'a {
    let open = format!("<{name}>");
    let close = format!("</{name}>");
    let mut rest = xml;
    std::iter::from_fn(move || {
        let start = rest.find(&open)? + open.len();
        let len = rest[start..].find(&close)?;
        let content = &rest[start..start + len];
        rest = &rest[start + len + close.len()..];
        Some(content)
    })
}

/// Discovery answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShortInfo {
    /// Stream name
    pub name: String,
    /// Stream type string
    #[serde(rename = "type")]
    pub stream_type: String,
    /// Number of channels
    pub channel_count: usize,
    /// Nominal sample rate (Hz)
    pub nominal_srate: f64,
    /// Unique source ID
    pub source_id: String,
    /// Hostname
    pub hostname: String,
    /// TCP data port
    pub port: u16,
}

/// Which streams a resolve call is looking for
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamQuery {
    /// Exact stream name
    Name(String),
    /// Stream type string (e.g. `EEG`)
    Type(String),
}

impl StreamQuery {
    fn matches(&self, info: &ShortInfo) -> bool {
        match self {
            Self::Name(name) => info.name == *name,
            Self::Type(ty) => info.stream_type == *ty,
        }
    }
}

impl std::fmt::Display for StreamQuery {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Name(name) => write!(f, "name={name}"),
            Self::Type(ty) => write!(f, "type={ty}"),
        }
    }
}

/// A stream found on the network
#[derive(Debug, Clone, PartialEq)]
pub struct DiscoveredStream {
    /// Discovery answer
    pub info: ShortInfo,
    /// Data endpoint
    pub addr: SocketAddr,
}

// ============================================================================
// Outlet
// ============================================================================

/// LSL data outlet (data source)
pub struct LslOutlet {
    info: StreamInfo,
    listener: TcpListener,
    clients: Vec<TcpStream>,
    discovery_socket: Option<UdpSocket>,
    local_port: u16,
    sample_count: u64,
    start_time: Instant,
}

impl LslOutlet {
    /// Create an outlet on an ephemeral TCP port.
    ///
    /// Discovery is best effort: if the discovery port is taken, the outlet
    /// still serves consumers that know its address.
    pub fn new(info: &StreamInfo) -> LslResult<Self> {
        let listener = TcpListener::bind((Ipv4Addr::UNSPECIFIED, 0))?;
        listener.set_nonblocking(true)?;
        let local_port = listener.local_addr()?.port();

        let discovery_socket = match bind_discovery_socket() {
            Ok(socket) => Some(socket),
            Err(e) => {
                warn!("LSL discovery unavailable ({}); outlet reachable on port {} only", e, local_port);
                None
            }
        };

        info!(
            "LSL outlet '{}' ({} ch @ {} Hz) on port {}",
            info.name,
            info.channel_count(),
            info.nominal_srate,
            local_port
        );

        Ok(Self {
            info: info.clone(),
            listener,
            clients: Vec::new(),
            discovery_socket,
            local_port,
            sample_count: 0,
            start_time: Instant::now(),
        })
    }

    /// Get the data port
    #[must_use]
    pub fn port(&self) -> u16 {
        self.local_port
    }

    /// Get stream info
    #[must_use]
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Samples pushed so far
    pub fn sample_count(&self) -> u64 {
        self.sample_count
    }

    /// Get number of connected clients
    #[must_use]
    pub fn client_count(&self) -> usize {
        self.clients.len()
    }

    /// Get local clock time (seconds since outlet creation)
    #[must_use]
    pub fn local_clock(&self) -> f64 {
        self.start_time.elapsed().as_secs_f64()
    }

    /// Push one sample stamped with the local clock
    pub fn push_sample(&mut self, values: &[f64]) -> LslResult<()> {
        self.push_sample_with_timestamp(values, self.local_clock())
    }

    /// Push one sample with its own timestamp
    pub fn push(&mut self, sample: &Sample) -> LslResult<()> {
        self.push_sample_with_timestamp(&sample.values, sample.timestamp_s)
    }

    /// Push a sample with explicit timestamp
    #[allow(clippy::cast_possible_truncation)]
    pub fn push_sample_with_timestamp(&mut self, values: &[f64], timestamp: f64) -> LslResult<()> {
        if values.len() != self.info.channel_count() {
            return Err(LslError::InvalidInfo(format!(
                "Expected {} channels, got {}",
                self.info.channel_count(),
                values.len()
            )));
        }

        self.accept_connections()?;
        self.handle_discovery();

        let mut packet = Vec::with_capacity(self.info.packet_len());
        packet.extend_from_slice(&timestamp.to_le_bytes());
        for &value in values {
            packet.extend_from_slice(&(value as f32).to_le_bytes());
        }

        let before = self.clients.len();
        self.clients.retain_mut(|client| client.write_all(&packet).is_ok());
        if self.clients.len() < before {
            debug!("LSL outlet dropped {} client(s)", before - self.clients.len());
        }

        self.sample_count += 1;
        Ok(())
    }

    /// Answer pending discovery queries
    pub fn handle_discovery(&self) {
        let Some(socket) = &self.discovery_socket else {
            return;
        };
        let mut buf = [0u8; 1024];
        loop {
            match socket.recv_from(&mut buf) {
                Ok((len, addr)) => {
                    if let Some(response) = self.handle_query(&buf[..len]) {
                        if let Err(e) = socket.send_to(response.as_bytes(), addr) {
                            debug!("Discovery reply to {} failed: {}", addr, e);
                        }
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => {
                    debug!("Discovery socket error: {}", e);
                    break;
                }
            }
        }
    }

    fn accept_connections(&mut self) -> LslResult<()> {
        loop {
            match self.listener.accept() {
                Ok((stream, addr)) => {
                    stream.set_nonblocking(false)?;
                    stream.set_nodelay(true)?;
                    stream.set_write_timeout(Some(Duration::from_secs(1)))?;

                    let xml = self.info.to_xml();
                    let header = format!("{HEADER_PREFIX}{}:", xml.len());
                    let mut client = stream;
                    if client.write_all(header.as_bytes()).and_then(|()| client.write_all(xml.as_bytes())).is_ok() {
                        info!("LSL consumer connected from {}", addr);
                        self.clients.push(client);
                    }
                }
                Err(e) if e.kind() == ErrorKind::WouldBlock => break,
                Err(e) => return Err(e.into()),
            }
        }
        Ok(())
    }

    fn handle_query(&self, query: &[u8]) -> Option<String> {
        let query = std::str::from_utf8(query).ok()?;
        if !query.starts_with(SHORTINFO_PREFIX) {
            return None;
        }
        shortinfo_response(&self.info, self.local_port)
    }
}

fn shortinfo_response(info: &StreamInfo, port: u16) -> Option<String> {
    let short = ShortInfo {
        name: info.name.clone(),
        stream_type: info.stream_type.as_str().to_string(),
        channel_count: info.channel_count(),
        nominal_srate: info.nominal_srate,
        source_id: info.source_id.clone(),
        hostname: info.hostname.clone(),
        port,
    };
    let json = serde_json::to_string(&short).ok()?;
    Some(format!("{SHORTINFO_PREFIX} {json}"))
}

fn parse_shortinfo(response: &str) -> Option<ShortInfo> {
    let json = response.strip_prefix(SHORTINFO_PREFIX)?.trim_start();
    serde_json::from_str(json).ok()
}

fn bind_discovery_socket() -> std::io::Result<UdpSocket> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, LSL_MULTICAST_PORT))?;
    if let Err(e) = socket.join_multicast_v4(&LSL_MULTICAST_ADDR, &Ipv4Addr::UNSPECIFIED) {
        debug!("Multicast join failed ({}); answering unicast queries only", e);
    }
    socket.set_nonblocking(true)?;
    Ok(socket)
}

// ============================================================================
// Inlet
// ============================================================================

/// LSL data inlet (data receiver)
pub struct LslInlet {
    info: StreamInfo,
    stream: TcpStream,
    pending: Vec<u8>,
}

impl LslInlet {
    /// Connect to an outlet and read its stream info header
    pub fn connect(addr: SocketAddr) -> LslResult<Self> {
        let mut stream = TcpStream::connect_timeout(&addr, Duration::from_secs(5))?;
        stream.set_nodelay(true)?;
        stream.set_read_timeout(Some(Duration::from_secs(5)))?;

        let mut pending = Vec::new();
        let (header_end, xml_len) = loop {
            if let Some(parsed) = parse_header_prefix(&pending)? {
                break parsed;
            }
            read_more(&mut stream, &mut pending)?;
        };
        while pending.len() < header_end + xml_len {
            read_more(&mut stream, &mut pending)?;
        }

        let xml = std::str::from_utf8(&pending[header_end..header_end + xml_len])
            .map_err(|_| LslError::InvalidInfo("stream info is not UTF-8".into()))?;
        let info = StreamInfo::from_xml(xml)?;
        pending.drain(..header_end + xml_len);

        info!(
            "Connected to LSL stream '{}' ({} ch @ {} Hz) at {}",
            info.name,
            info.channel_count(),
            info.nominal_srate,
            addr
        );
        Ok(Self { info, stream, pending })
    }

    /// Connect to the first stream matching `query`
    pub fn resolve_and_connect(query: &StreamQuery, timeout: Duration) -> LslResult<Self> {
        let found = resolve(query, timeout)?;
        let first = found.first().ok_or_else(|| LslError::NoStreamsFound(query.to_string()))?;
        Self::connect(first.addr)
    }

    /// Get stream info
    #[must_use]
    pub fn info(&self) -> &StreamInfo {
        &self.info
    }

    /// Pull every complete sample available, waiting at most `timeout` when
    /// nothing is buffered. A partial packet stays buffered for the next call.
    pub fn pull_chunk(&mut self, timeout: Duration) -> LslResult<Vec<Sample>> {
        let packet_len = self.info.packet_len();
        if self.pending.len() < packet_len {
            self.stream.set_read_timeout(Some(timeout.max(Duration::from_millis(1))))?;
            match read_more(&mut self.stream, &mut self.pending) {
                Ok(()) => {}
                Err(LslError::Timeout) => {}
                Err(e) => return Err(e),
            }
        }

        let complete = self.pending.len() / packet_len;
        let mut samples = Vec::with_capacity(complete);
        for packet in self.pending.chunks_exact(packet_len) {
            samples.push(decode_packet(packet));
        }
        self.pending.drain(..complete * packet_len);
        Ok(samples)
    }
}

fn read_more(stream: &mut TcpStream, pending: &mut Vec<u8>) -> LslResult<()> {
    let mut buf = [0u8; 8192];
    match stream.read(&mut buf) {
        Ok(0) => Err(LslError::Disconnected),
        Ok(n) => {
            pending.extend_from_slice(&buf[..n]);
            Ok(())
        }
        Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => Err(LslError::Timeout),
        Err(e) if e.kind() == ErrorKind::Interrupted => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// `(offset of the XML, XML length)` once the `LSL:streaminfo/<len>:` prefix
/// is complete
fn parse_header_prefix(buf: &[u8]) -> LslResult<Option<(usize, usize)>> {
    let prefix = HEADER_PREFIX.as_bytes();
    let checked = buf.len().min(prefix.len());
    if buf[..checked] != prefix[..checked] {
        return Err(LslError::InvalidInfo("unexpected stream header".into()));
    }
    if buf.len() <= prefix.len() {
        return Ok(None);
    }
    let Some(colon) = buf[prefix.len()..].iter().position(|b| *b == b':') else {
        if buf.len() > prefix.len() + 20 {
            return Err(LslError::InvalidInfo("unterminated header length".into()));
        }
        return Ok(None);
    };
    let digits = std::str::from_utf8(&buf[prefix.len()..prefix.len() + colon])
        .map_err(|_| LslError::InvalidInfo("header length is not UTF-8".into()))?;
    let xml_len: usize = digits.parse().map_err(|_| LslError::InvalidInfo(format!("bad header length {digits:?}")))?;
    if xml_len > MAX_HEADER_BYTES {
        return Err(LslError::InvalidInfo(format!("header of {xml_len} bytes")));
    }
    Ok(Some((prefix.len() + colon + 1, xml_len)))
}

fn decode_packet(packet: &[u8]) -> Sample {
    let mut ts = [0u8; 8];
    ts.copy_from_slice(&packet[..8]);
    let values = packet[8..]
        .chunks_exact(4)
        .map(|b| f64::from(f32::from_le_bytes([b[0], b[1], b[2], b[3]])))
        .collect();
    Sample::new(f64::from_le_bytes(ts), values)
}

// ============================================================================
// Discovery
// ============================================================================

/// Find streams matching `query`, listening for answers until `timeout`.
pub fn resolve(query: &StreamQuery, timeout: Duration) -> LslResult<Vec<DiscoveredStream>> {
    let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0))?;
    socket.set_read_timeout(Some(Duration::from_millis(50)))?;

    let targets = [
        SocketAddr::from((LSL_MULTICAST_ADDR, LSL_MULTICAST_PORT)),
        SocketAddr::from((Ipv4Addr::LOCALHOST, LSL_MULTICAST_PORT)),
    ];
    let query_bytes = SHORTINFO_PREFIX.as_bytes();

    let mut found: Vec<DiscoveredStream> = Vec::new();
    let start = Instant::now();
    let mut last_query: Option<Instant> = None;
    let mut buf = [0u8; 4096];

    while start.elapsed() < timeout {
        if last_query.map_or(true, |t| t.elapsed() >= Duration::from_millis(500)) {
            for target in targets {
                if let Err(e) = socket.send_to(query_bytes, target) {
                    debug!("Discovery query to {} failed: {}", target, e);
                }
            }
            last_query = Some(Instant::now());
        }

        match socket.recv_from(&mut buf) {
            Ok((n, from)) => {
                let Some(info) = std::str::from_utf8(&buf[..n]).ok().and_then(parse_shortinfo) else {
                    continue;
                };
                if query.matches(&info) && !found.iter().any(|s| s.info.source_id == info.source_id) {
                    let ip = if from.ip().is_unspecified() { IpAddr::V4(Ipv4Addr::LOCALHOST) } else { from.ip() };
                    debug!("Discovered LSL stream '{}' at {}:{}", info.name, ip, info.port);
                    let addr = SocketAddr::new(ip, info.port);
                    found.push(DiscoveredStream { info, addr });
                }
                if !found.is_empty() {
                    break;
                }
            }
            Err(e) if matches!(e.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {}
            Err(e) => return Err(e.into()),
        }
    }

    if found.is_empty() {
        Err(LslError::NoStreamsFound(query.to_string()))
    } else {
        Ok(found)
    }
}

// ============================================================================
// Live Source
// ============================================================================

/// Live EEG source backed by an [`LslInlet`]
pub struct LslSource {
    inlet: LslInlet,
}

impl LslSource {
    /// Wrap a connected inlet
    pub fn new(inlet: LslInlet) -> Self {
        Self { inlet }
    }

    /// Resolve the acquisition stream by name, falling back to any EEG stream.
    pub fn resolve_default(timeout: Duration) -> LslResult<Self> {
        let by_name = StreamQuery::Name(DEFAULT_STREAM_NAME.to_string());
        match LslInlet::resolve_and_connect(&by_name, timeout) {
            Ok(inlet) => Ok(Self::new(inlet)),
            Err(LslError::NoStreamsFound(_)) => {
                warn!("No stream named {}; looking for any EEG stream", DEFAULT_STREAM_NAME);
                let by_type = StreamQuery::Type(StreamType::Eeg.as_str().to_string());
                LslInlet::resolve_and_connect(&by_type, timeout).map(Self::new)
            }
            Err(e) => Err(e),
        }
    }

    /// Stream metadata
    pub fn info(&self) -> &StreamInfo {
        self.inlet.info()
    }
}

impl SampleSource for LslSource {
    fn channel_count(&self) -> usize {
        self.inlet.info().channel_count()
    }

    fn channel_labels(&self) -> Option<Vec<String>> {
        Some(self.inlet.info().channel_labels.clone())
    }

    fn sample_rate_hz(&self) -> f64 {
        self.inlet.info().nominal_srate
    }

    fn read_chunk(&mut self, timeout: Duration) -> SourceResult<SourceRead> {
        let samples = self.inlet.pull_chunk(timeout)?;
        if samples.is_empty() {
            Ok(SourceRead::Timeout)
        } else {
            Ok(SourceRead::Samples(samples))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn labels() -> Vec<String> {
        ["C3", "C4", "Cz"].iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_stream_info_xml() {
        let info = StreamInfo::new("EEG_BCI", StreamType::Eeg, labels(), 250.0);
        let xml = info.to_xml();
        assert!(xml.contains("<name>EEG_BCI</name>"));
        assert!(xml.contains("<channel_count>3</channel_count>"));
        assert!(xml.contains("<label>Cz</label>"));

        let parsed = StreamInfo::from_xml(&xml).unwrap();
        assert_eq!(parsed.name, "EEG_BCI");
        assert_eq!(parsed.stream_type, StreamType::Eeg);
        assert_eq!(parsed.channel_labels, labels());
        assert!((parsed.nominal_srate - 250.0).abs() < 1e-12);
    }

    #[test]
    fn test_xml_without_labels_gets_default_names() {
        let xml = "<info><name>x</name><type>EEG</type><channel_count>2</channel_count>\
                   <nominal_srate>128</nominal_srate></info>";
        let info = StreamInfo::from_xml(xml).unwrap();
        assert_eq!(info.channel_labels, vec!["Ch1".to_string(), "Ch2".to_string()]);
    }

    #[test]
    fn test_shortinfo_round_trip_and_query() {
        let info = StreamInfo::new("EEG_BCI", StreamType::Eeg, labels(), 250.0);
        let response = shortinfo_response(&info, 4242).unwrap();
        let short = parse_shortinfo(&response).unwrap();
        assert_eq!(short.port, 4242);
        assert_eq!(short.channel_count, 3);
        assert!(StreamQuery::Name("EEG_BCI".into()).matches(&short));
        assert!(StreamQuery::Type("EEG".into()).matches(&short));
        assert!(!StreamQuery::Name("Other".into()).matches(&short));
    }

    #[test]
    fn test_header_prefix_parsing() {
        assert_eq!(parse_header_prefix(b"LSL:str").unwrap(), None);
        assert_eq!(parse_header_prefix(b"LSL:streaminfo/12").unwrap(), None);
        assert_eq!(parse_header_prefix(b"LSL:streaminfo/12:<info>").unwrap(), Some((18, 12)));
        assert!(parse_header_prefix(b"HTTP/1.1 200").is_err());
    }

    #[test]
    fn test_outlet_inlet_loopback() {
        let info = StreamInfo::new("LoopbackTest", StreamType::Eeg, labels(), 250.0);
        let mut outlet = LslOutlet::new(&info).unwrap();
        let addr = SocketAddr::from((Ipv4Addr::LOCALHOST, outlet.port()));

        let consumer = std::thread::spawn(move || LslInlet::connect(addr));

        let start = Instant::now();
        while outlet.client_count() == 0 && start.elapsed() < Duration::from_secs(5) {
            outlet.push_sample(&[-1.0, -1.0, -1.0]).unwrap();
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(outlet.client_count(), 1);

        for i in 0..20 {
            let v = f64::from(i);
            outlet.push(&Sample::new(v / 250.0, vec![v, v + 0.5, -v])).unwrap();
        }

        let mut inlet = consumer.join().unwrap().unwrap();
        assert_eq!(inlet.info().channel_labels, labels());

        let mut received = Vec::new();
        let start = Instant::now();
        while received.len() < 20 && start.elapsed() < Duration::from_secs(5) {
            let chunk = inlet.pull_chunk(Duration::from_millis(100)).unwrap();
            received.extend(chunk.into_iter().filter(|s| s.values[0] >= 0.0));
        }

        assert_eq!(received.len(), 20);
        for (i, sample) in received.iter().enumerate() {
            let v = i as f64;
            assert_eq!(sample.values, vec![v, v + 0.5, -v]);
            assert!((sample.timestamp_s - v / 250.0).abs() < 1e-12);
        }
    }
}
