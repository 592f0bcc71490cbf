//! Découverte multicast des équipements TR-64
//!
//! One task per qualifying network interface sends the M-SEARCH datagram and
//! waits for one answer, until the duplicate or iteration cap is reached.
//! Each new responder is resolved into a [`FritzDevice`]; results of all
//! interfaces are merged once every task has finished.

use std::collections::HashSet;
use std::io;
use std::net::{IpAddr, SocketAddr, SocketAddrV6};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use socket2::{Domain, Protocol, Socket, Type};
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use fritzutils::{DiscoveryAddress, discovery_addresses, list_interfaces};

use crate::broadcast::DiscoveryDatagram;
use crate::device::{FritzDevice, UNKNOWN_SCHEME};
use crate::error::Result;
use crate::services::{ConnectionSettings, DeviceInfoClient};
use crate::tr64;

/// Tuning of a discovery run
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    /// Local port bound on every interface address
    pub bind_port: u16,
    /// Consecutive empty or already-seen answers ending an interface loop
    pub max_duplicates: u32,
    /// Datagrams sent per interface at most
    pub max_iterations: u32,
    pub receive_timeout: Duration,
    pub enable_ipv6: bool,
    /// Timeout of the security-port probe
    pub probe_timeout: Duration,
    pub description_timeout: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            bind_port: fritzconfig::DEFAULT_BIND_PORT,
            max_duplicates: fritzconfig::DEFAULT_MAX_DUPLICATES as u32,
            max_iterations: fritzconfig::DEFAULT_MAX_ITERATIONS as u32,
            receive_timeout: Duration::from_millis(fritzconfig::DEFAULT_RECEIVE_TIMEOUT_MS),
            enable_ipv6: true,
            probe_timeout: Duration::from_millis(fritzconfig::DEFAULT_REQUEST_TIMEOUT_MS),
            description_timeout: tr64::DEFAULT_DESCRIPTION_TIMEOUT,
        }
    }
}

impl DiscoveryOptions {
    /// Options read from the `discovery`, `soap` and `description` sections.
    pub fn from_config(config: &fritzconfig::Config) -> Self {
        let defaults = Self::default();
        let count = |value: Option<u64>, default: u32| {
            value
                .and_then(|v| u32::try_from(v).ok())
                .filter(|v| *v > 0)
                .unwrap_or(default)
        };
        let millis = |value: Option<u64>, default: Duration| {
            value.map(Duration::from_millis).unwrap_or(default)
        };

        Self {
            bind_port: config.get_bind_port(),
            max_duplicates: count(config.get_max_duplicates().ok(), defaults.max_duplicates),
            max_iterations: count(config.get_max_iterations().ok(), defaults.max_iterations),
            receive_timeout: millis(config.get_receive_timeout_ms().ok(), defaults.receive_timeout),
            enable_ipv6: config.get_enable_ipv6().unwrap_or(defaults.enable_ipv6),
            probe_timeout: millis(config.get_soap_request_timeout_ms().ok(), defaults.probe_timeout),
            description_timeout: millis(
                config.get_description_timeout_ms().ok(),
                defaults.description_timeout,
            ),
        }
    }
}

/// One datagram received during discovery
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReceivedDatagram {
    pub from: IpAddr,
    pub payload: Vec<u8>,
}

/// Send/receive side of one interface loop
#[async_trait]
pub trait DiscoveryTransport: Send {
    async fn send(&mut self, datagram: &DiscoveryDatagram) -> io::Result<()>;

    async fn receive(&mut self) -> io::Result<ReceivedDatagram>;
}

/// UDP socket bound to one interface address and joined to the SSDP group
#[derive(Debug)]
pub struct UdpTransport {
    socket: UdpSocket,
    scope_id: u32,
}

impl UdpTransport {
    /// Binds `address:port`, selects the interface for outgoing multicast,
    /// joins the group of the address family and disables multicast loopback.
    ///
    /// Must be called from within a tokio runtime.
    pub fn bind(address: DiscoveryAddress, port: u16) -> io::Result<Self> {
        let datagram = DiscoveryDatagram::for_address(&address.ip);
        let local = match address.ip {
            IpAddr::V4(v4) => SocketAddr::new(IpAddr::V4(v4), port),
            IpAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(v6, port, 0, address.scope_id)),
        };

        let socket = Socket::new(Domain::for_address(local), Type::DGRAM, Some(Protocol::UDP))?;
        socket.set_reuse_address(true)?;

        match (address.ip, datagram.group()) {
            (IpAddr::V4(ip), IpAddr::V4(group)) => {
                socket.set_multicast_if_v4(&ip)?;
                socket.bind(&local.into())?;
                socket.join_multicast_v4(&group, &ip)?;
                socket.set_multicast_loop_v4(false)?;
            }
            (IpAddr::V6(_), IpAddr::V6(group)) => {
                socket.set_multicast_if_v6(address.scope_id)?;
                socket.bind(&local.into())?;
                socket.join_multicast_v6(&group, address.scope_id)?;
                socket.set_multicast_loop_v6(false)?;
            }
            _ => {
                return Err(io::Error::new(
                    io::ErrorKind::InvalidInput,
                    "address family mismatch",
                ));
            }
        }

        socket.set_nonblocking(true)?;
        let socket = UdpSocket::from_std(socket.into())?;
        debug!("✅ Discovery socket bound on {}", local);

        Ok(Self {
            socket,
            scope_id: address.scope_id,
        })
    }
}

#[async_trait]
impl DiscoveryTransport for UdpTransport {
    async fn send(&mut self, datagram: &DiscoveryDatagram) -> io::Result<()> {
        let destination = match datagram.destination() {
            SocketAddr::V6(v6) => SocketAddr::V6(SocketAddrV6::new(*v6.ip(), v6.port(), 0, self.scope_id)),
            v4 => v4,
        };
        self.socket.send_to(datagram.content(), destination).await?;
        trace!("📤 M-SEARCH sent to {}", destination);
        Ok(())
    }

    async fn receive(&mut self) -> io::Result<ReceivedDatagram> {
        let mut buf = vec![0u8; 8192];
        let (n, from) = self.socket.recv_from(&mut buf).await?;
        buf.truncate(n);
        Ok(ReceivedDatagram {
            from: from.ip(),
            payload: buf,
        })
    }
}

/// Opens the transport of one discovery address on the bind port
pub type TransportFactory =
    Arc<dyn Fn(DiscoveryAddress, u16) -> io::Result<Box<dyn DiscoveryTransport>> + Send + Sync>;

fn udp_transport_factory() -> TransportFactory {
    Arc::new(|address: DiscoveryAddress, port: u16| {
        let transport = UdpTransport::bind(address, port)?;
        Ok(Box::new(transport) as Box<dyn DiscoveryTransport>)
    })
}

/// Network checks run against a responder
#[async_trait]
pub trait DeviceProbe: Send + Sync {
    /// HTTPS port of the device, `None` when it does not speak TR-64.
    async fn security_port(&self, device: &FritzDevice) -> Option<u16>;

    /// Fetches and parses the description document.
    async fn read_description(&self, device: &mut FritzDevice) -> Result<()>;
}

/// Probe talking to the device over HTTP
#[derive(Debug, Clone)]
pub struct HttpDeviceProbe {
    probe_timeout: Duration,
    description_timeout: Duration,
}

impl HttpDeviceProbe {
    pub fn new(options: &DiscoveryOptions) -> Self {
        Self {
            probe_timeout: options.probe_timeout,
            description_timeout: options.description_timeout,
        }
    }
}

#[async_trait]
impl DeviceProbe for HttpDeviceProbe {
    async fn security_port(&self, device: &FritzDevice) -> Option<u16> {
        let url = device.insecure_url()?;
        let client = DeviceInfoClient::new(ConnectionSettings::new(url).with_timeout(self.probe_timeout));
        match client.get_security_port().await {
            Ok(port) => port,
            Err(e) => {
                debug!("Security port probe of {} failed: {}", device.ip_address(), e);
                None
            }
        }
    }

    async fn read_description(&self, device: &mut FritzDevice) -> Result<()> {
        tr64::read_device_info(device, self.description_timeout).await
    }
}

/// Why a responder did not become a device
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    MissingLocation,
    UnresolvableLocation,
    NoSecurityPort,
    DescriptionFailed(String),
}

/// Result of resolving one responder
#[derive(Debug, Clone)]
pub enum DeviceOutcome {
    Resolved(FritzDevice),
    Skipped { address: IpAddr, reason: SkipReason },
}

/// Counters of one interface loop
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoopStats {
    pub interface: String,
    pub iterations: u32,
    /// Empty or already-seen receives
    pub duplicates: u32,
    /// The socket could not be opened, nothing was sent
    pub bind_failed: bool,
    pub send_failed: bool,
    pub cancelled: bool,
}

/// Merged result of a discovery run
#[derive(Debug, Clone, Default)]
pub struct DiscoveryReport {
    pub devices: Vec<FritzDevice>,
    pub skipped: Vec<(IpAddr, SkipReason)>,
    pub interfaces: Vec<LoopStats>,
}

impl DiscoveryReport {
    /// Adds the outcomes of one interface; equal devices are kept once.
    pub fn absorb(&mut self, outcomes: Vec<DeviceOutcome>, stats: LoopStats) {
        for outcome in outcomes {
            match outcome {
                DeviceOutcome::Resolved(device) => {
                    if !self.devices.contains(&device) {
                        self.devices.push(device);
                    }
                }
                DeviceOutcome::Skipped { address, reason } => self.skipped.push((address, reason)),
            }
        }
        self.interfaces.push(stats);
    }
}

/// Waits for one datagram; errors, timeout and cancellation all yield `None`.
pub async fn safe_receive<T>(
    transport: &mut T,
    timeout: Duration,
    cancel: &CancellationToken,
) -> Option<ReceivedDatagram>
where
    T: DiscoveryTransport + ?Sized,
{
    tokio::select! {
        _ = cancel.cancelled() => None,
        result = tokio::time::timeout(timeout, transport.receive()) => match result {
            Ok(Ok(datagram)) => Some(datagram),
            Ok(Err(e)) => {
                debug!("Discovery receive failed: {}", e);
                None
            }
            Err(_) => {
                trace!("No discovery answer within {:?}", timeout);
                None
            }
        },
    }
}

/// Turns a discovery response into a device, or explains why not
///
/// Responses without a usable location are rejected before any HTTP traffic.
pub async fn resolve_device<P>(address: IpAddr, response: &str, probe: &P) -> DeviceOutcome
where
    P: DeviceProbe + ?Sized,
{
    let skip = |reason| DeviceOutcome::Skipped { address, reason };
    let mut device = FritzDevice::parse_response(address, response);

    match device.location() {
        None => {
            debug!("{} answered without LOCATION", address);
            return skip(SkipReason::MissingLocation);
        }
        Some(location) if !location.is_resolved() || location.scheme() == UNKNOWN_SCHEME => {
            debug!("{} reported an unusable LOCATION: {}", address, location.as_str());
            return skip(SkipReason::UnresolvableLocation);
        }
        Some(_) => {}
    }

    let Some(security_port) = probe.security_port(&device).await else {
        debug!("{} has no security port, not a TR-64 device", address);
        return skip(SkipReason::NoSecurityPort);
    };
    device.resolve_base_url(security_port);

    if let Err(e) = probe.read_description(&mut device).await {
        warn!("❌ {}", e);
        return skip(SkipReason::DescriptionFailed(e.to_string()));
    }

    info!(
        "✅ Found {} ({}) at {}",
        device.friendly_name(),
        device.model_name(),
        device.base_url().unwrap_or_default()
    );
    DeviceOutcome::Resolved(device)
}

/// Send/receive loop of one interface
///
/// Stops once `max_duplicates` consecutive receives brought nothing new, after
/// `max_iterations` datagrams, on the first send failure or on cancellation.
pub async fn run_discovery_loop<T, P>(
    interface: &str,
    transport: &mut T,
    datagram: &DiscoveryDatagram,
    probe: &P,
    options: &DiscoveryOptions,
    cancel: &CancellationToken,
) -> (Vec<DeviceOutcome>, LoopStats)
where
    T: DiscoveryTransport + ?Sized,
    P: DeviceProbe + ?Sized,
{
    let mut stats = LoopStats {
        interface: interface.to_string(),
        ..LoopStats::default()
    };
    let mut outcomes = Vec::new();
    let mut seen: HashSet<IpAddr> = HashSet::new();
    let mut duplicate_count = 0u32;

    loop {
        if cancel.is_cancelled() {
            debug!("Discovery on {} cancelled", interface);
            stats.cancelled = true;
            break;
        }

        if let Err(e) = transport.send(datagram).await {
            warn!("❌ Failed to send M-SEARCH on {}: {}", interface, e);
            stats.send_failed = true;
            break;
        }

        match safe_receive(transport, options.receive_timeout, cancel).await {
            Some(received) if !received.payload.is_empty() && !seen.contains(&received.from) => {
                duplicate_count = 0;
                seen.insert(received.from);
                let response = String::from_utf8_lossy(&received.payload);
                outcomes.push(resolve_device(received.from, &response, probe).await);
            }
            _ => {
                duplicate_count += 1;
                stats.duplicates += 1;
            }
        }

        stats.iterations += 1;
        if duplicate_count >= options.max_duplicates || stats.iterations >= options.max_iterations {
            break;
        }
    }

    debug!(
        "Discovery on {} finished after {} iterations ({} responders)",
        interface,
        stats.iterations,
        seen.len()
    );
    (outcomes, stats)
}

/// Finds TR-64 devices on every usable network interface
///
/// ```no_run
/// use fritzapi::DeviceLocator;
///
/// # async fn run() {
/// for device in DeviceLocator::new().discover().await {
///     println!("{} at {:?}", device.friendly_name(), device.base_url());
/// }
/// # }
/// ```
#[derive(Clone)]
pub struct DeviceLocator {
    options: DiscoveryOptions,
    cancel: CancellationToken,
    probe: Arc<dyn DeviceProbe>,
    /// Fixed interface addresses, the host interfaces when `None`
    addresses: Option<Vec<(String, DiscoveryAddress)>>,
    transports: TransportFactory,
}

impl Default for DeviceLocator {
    fn default() -> Self {
        Self::with_options(DiscoveryOptions::default())
    }
}

impl DeviceLocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_options(options: DiscoveryOptions) -> Self {
        let probe = Arc::new(HttpDeviceProbe::new(&options));
        Self {
            options,
            cancel: CancellationToken::new(),
            probe,
            addresses: None,
            transports: udp_transport_factory(),
        }
    }

    /// Cancelling `token` ends every interface loop; devices resolved so far
    /// are still returned.
    pub fn with_cancellation(mut self, token: CancellationToken) -> Self {
        self.cancel = token;
        self
    }

    pub fn with_probe(mut self, probe: Arc<dyn DeviceProbe>) -> Self {
        self.probe = probe;
        self
    }

    /// Searches on these `(interface, address)` pairs instead of the host interfaces.
    pub fn with_addresses(mut self, addresses: Vec<(String, DiscoveryAddress)>) -> Self {
        self.addresses = Some(addresses);
        self
    }

    pub fn with_transport_factory(mut self, transports: TransportFactory) -> Self {
        self.transports = transports;
        self
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub async fn discover(&self) -> Vec<FritzDevice> {
        self.discover_with_report().await.devices
    }

    /// Runs discovery and reports skipped responders and loop counters too.
    pub async fn discover_with_report(&self) -> DiscoveryReport {
        let addresses = match &self.addresses {
            Some(addresses) => addresses.clone(),
            None => match list_interfaces() {
                Ok(interfaces) => discovery_addresses(&interfaces, self.options.enable_ipv6),
                Err(e) => {
                    warn!("❌ Cannot list network interfaces: {}", e);
                    return DiscoveryReport::default();
                }
            },
        };
        info!("Starting discovery on {} interface(s)", addresses.len());

        let tasks = addresses.into_iter().map(|(name, address)| {
            let options = self.options.clone();
            let probe = Arc::clone(&self.probe);
            let cancel = self.cancel.clone();
            let transports = Arc::clone(&self.transports);

            tokio::spawn(async move {
                let mut transport = match transports(address, options.bind_port) {
                    Ok(transport) => transport,
                    Err(e) => {
                        warn!("❌ Cannot open discovery socket on {} ({}): {}", name, address.ip, e);
                        let stats = LoopStats {
                            interface: name,
                            bind_failed: true,
                            ..LoopStats::default()
                        };
                        return (Vec::new(), stats);
                    }
                };
                let datagram = DiscoveryDatagram::for_address(&address.ip);
                run_discovery_loop(
                    &name,
                    transport.as_mut(),
                    &datagram,
                    probe.as_ref(),
                    &options,
                    &cancel,
                )
                .await
            })
        });

        let mut report = DiscoveryReport::default();
        for result in join_all(tasks).await {
            match result {
                Ok((outcomes, stats)) => report.absorb(outcomes, stats),
                Err(e) => warn!("Discovery task failed: {}", e),
            }
        }

        info!(
            "Discovery finished: {} device(s), {} skipped responder(s)",
            report.devices.len(),
            report.skipped.len()
        );
        report
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::FritzError;
    use std::collections::{HashMap, VecDeque};
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[derive(Clone)]
    enum Step {
        Answer(&'static str, &'static str),
        Fail,
        Silence,
    }

    struct FakeTransport {
        steps: VecDeque<Step>,
        sent: usize,
        fail_send_at: Option<usize>,
    }

    impl FakeTransport {
        fn new(steps: Vec<Step>) -> Self {
            Self {
                steps: steps.into(),
                sent: 0,
                fail_send_at: None,
            }
        }
    }

    #[async_trait]
    impl DiscoveryTransport for FakeTransport {
        async fn send(&mut self, datagram: &DiscoveryDatagram) -> io::Result<()> {
            assert_eq!(datagram.content(), DiscoveryDatagram::ipv4().content());
            if self.fail_send_at == Some(self.sent) {
                return Err(io::Error::new(io::ErrorKind::NetworkUnreachable, "down"));
            }
            self.sent += 1;
            Ok(())
        }

        async fn receive(&mut self) -> io::Result<ReceivedDatagram> {
            match self.steps.pop_front() {
                Some(Step::Answer(ip, payload)) => Ok(ReceivedDatagram {
                    from: ip.parse().unwrap(),
                    payload: payload.as_bytes().to_vec(),
                }),
                Some(Step::Silence) => std::future::pending().await,
                Some(Step::Fail) | None => Err(io::Error::new(io::ErrorKind::ConnectionReset, "reset")),
            }
        }
    }

    #[derive(Default)]
    struct FakeProbe {
        ports: HashMap<IpAddr, u16>,
        /// UDN reported by every responder, one per address otherwise
        shared_udn: Option<&'static str>,
        broken_descriptions: HashSet<IpAddr>,
        port_calls: AtomicUsize,
        description_calls: AtomicUsize,
    }

    impl FakeProbe {
        fn with_port(mut self, ip: &str, port: u16) -> Self {
            self.ports.insert(ip.parse().unwrap(), port);
            self
        }
    }

    #[async_trait]
    impl DeviceProbe for FakeProbe {
        async fn security_port(&self, device: &FritzDevice) -> Option<u16> {
            self.port_calls.fetch_add(1, Ordering::SeqCst);
            self.ports.get(&device.ip_address()).copied()
        }

        async fn read_description(&self, device: &mut FritzDevice) -> Result<()> {
            self.description_calls.fetch_add(1, Ordering::SeqCst);
            if self.broken_descriptions.contains(&device.ip_address()) {
                return Err(FritzError::DeviceInfo {
                    host: device.ip_address().to_string(),
                    status: 404,
                });
            }
            let udn = match self.shared_udn {
                Some(udn) => udn.to_string(),
                None => format!("uuid:{}", device.ip_address()),
            };
            device.parse_description(&format!(
                r#"<root xmlns="urn:dslforum-org:device-1-0"><device><friendlyName>box</friendlyName><UDN>{}</UDN></device></root>"#,
                udn
            ))
        }
    }

    const BOX_1: &str = "HTTP/1.1 200 OK\r\nLOCATION: http://192.168.178.1:49000/tr64desc.xml\r\n\r\n";
    const BOX_2: &str = "HTTP/1.1 200 OK\r\nLOCATION: http://192.168.178.2:49000/tr64desc.xml\r\n\r\n";

    fn options() -> DiscoveryOptions {
        DiscoveryOptions {
            receive_timeout: Duration::from_millis(20),
            ..DiscoveryOptions::default()
        }
    }

    async fn run(transport: &mut FakeTransport, probe: &FakeProbe) -> (Vec<DeviceOutcome>, LoopStats) {
        run_discovery_loop(
            "eth0",
            transport,
            &DiscoveryDatagram::ipv4(),
            probe,
            &options(),
            &CancellationToken::new(),
        )
        .await
    }

    fn resolved(outcomes: &[DeviceOutcome]) -> Vec<&FritzDevice> {
        outcomes
            .iter()
            .filter_map(|o| match o {
                DeviceOutcome::Resolved(device) => Some(device),
                DeviceOutcome::Skipped { .. } => None,
            })
            .collect()
    }

    #[tokio::test]
    async fn test_silent_network_stops_on_duplicate_cap() {
        let mut transport = FakeTransport::new(vec![]);
        let (outcomes, stats) = run(&mut transport, &FakeProbe::default()).await;

        assert!(outcomes.is_empty());
        assert_eq!(stats.iterations, 5);
        assert_eq!(stats.duplicates, 5);
        assert_eq!(transport.sent, 5);
    }

    #[tokio::test]
    async fn test_receive_timeout_counts_as_duplicate() {
        let mut transport = FakeTransport::new((0..5).map(|_| Step::Silence).collect());
        let (outcomes, stats) = run(&mut transport, &FakeProbe::default()).await;

        assert!(outcomes.is_empty());
        assert_eq!(stats.iterations, 5);
    }

    #[tokio::test]
    async fn test_iteration_cap() {
        const IPS: [&str; 12] = [
            "10.0.0.1", "10.0.0.2", "10.0.0.3", "10.0.0.4", "10.0.0.5", "10.0.0.6", "10.0.0.7",
            "10.0.0.8", "10.0.0.9", "10.0.0.10", "10.0.0.11", "10.0.0.12",
        ];
        let mut transport = FakeTransport::new(IPS.iter().map(|ip| Step::Answer(*ip, BOX_1)).collect());
        let probe = FakeProbe::default();
        let (outcomes, stats) = run(&mut transport, &probe).await;

        assert_eq!(stats.iterations, 10);
        assert_eq!(stats.duplicates, 0);
        assert_eq!(outcomes.len(), 10);
        assert_eq!(probe.port_calls.load(Ordering::SeqCst), 10);
    }

    #[tokio::test]
    async fn test_repeated_responder_is_resolved_once() {
        let steps = (0..8).map(|_| Step::Answer("192.168.178.1", BOX_1)).collect();
        let mut transport = FakeTransport::new(steps);
        let probe = FakeProbe::default().with_port("192.168.178.1", 49443);
        let (outcomes, stats) = run(&mut transport, &probe).await;

        assert_eq!(stats.iterations, 6);
        assert_eq!(stats.duplicates, 5);
        let devices = resolved(&outcomes);
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].base_url(), Some("https://192.168.178.1:49443/"));
        assert_eq!(devices[0].udn(), "uuid:192.168.178.1");
    }

    #[tokio::test]
    async fn test_new_responder_resets_duplicate_counter() {
        let steps = vec![
            Step::Answer("192.168.178.1", BOX_1),
            Step::Fail,
            Step::Fail,
            Step::Fail,
            Step::Fail,
            Step::Answer("192.168.178.2", BOX_2),
        ];
        let mut transport = FakeTransport::new(steps);
        let probe = FakeProbe::default()
            .with_port("192.168.178.1", 49443)
            .with_port("192.168.178.2", 49443);
        let (outcomes, stats) = run(&mut transport, &probe).await;

        assert_eq!(resolved(&outcomes).len(), 2);
        assert_eq!(stats.iterations, 10);
    }

    #[tokio::test]
    async fn test_missing_location_skips_probe() {
        let mut transport = FakeTransport::new(vec![Step::Answer(
            "192.168.178.5",
            "HTTP/1.1 200 OK\r\nST: upnp:rootdevice\r\n\r\n",
        )]);
        let probe = FakeProbe::default().with_port("192.168.178.5", 49443);
        let (outcomes, _) = run(&mut transport, &probe).await;

        assert!(matches!(
            outcomes.as_slice(),
            [DeviceOutcome::Skipped { reason: SkipReason::MissingLocation, .. }]
        ));
        assert_eq!(probe.port_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_unknown_location_skips_probe() {
        let mut transport = FakeTransport::new(vec![Step::Answer(
            "192.168.178.5",
            "HTTP/1.1 200 OK\r\nLOCATION: 192.168.178.5\r\n\r\n",
        )]);
        let probe = FakeProbe::default().with_port("192.168.178.5", 49443);
        let (outcomes, _) = run(&mut transport, &probe).await;

        assert!(matches!(
            outcomes.as_slice(),
            [DeviceOutcome::Skipped { reason: SkipReason::UnresolvableLocation, .. }]
        ));
        assert_eq!(probe.port_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_no_security_port_skips_description() {
        let mut transport = FakeTransport::new(vec![Step::Answer("192.168.178.1", BOX_1)]);
        let probe = FakeProbe::default();
        let (outcomes, _) = run(&mut transport, &probe).await;

        assert!(matches!(
            outcomes.as_slice(),
            [DeviceOutcome::Skipped { reason: SkipReason::NoSecurityPort, .. }]
        ));
        assert_eq!(probe.port_calls.load(Ordering::SeqCst), 1);
        assert_eq!(probe.description_calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_description_failure_does_not_stop_loop() {
        let steps = vec![
            Step::Answer("192.168.178.1", BOX_1),
            Step::Answer("192.168.178.2", BOX_2),
        ];
        let mut transport = FakeTransport::new(steps);
        let mut probe = FakeProbe::default()
            .with_port("192.168.178.1", 49443)
            .with_port("192.168.178.2", 49443);
        probe.broken_descriptions.insert("192.168.178.1".parse().unwrap());
        let (outcomes, _) = run(&mut transport, &probe).await;

        assert_eq!(outcomes.len(), 2);
        assert!(matches!(
            &outcomes[0],
            DeviceOutcome::Skipped { reason: SkipReason::DescriptionFailed(_), .. }
        ));
        assert_eq!(resolved(&outcomes)[0].ip_address().to_string(), "192.168.178.2");
    }

    #[tokio::test]
    async fn test_send_failure_ends_loop() {
        let mut transport = FakeTransport::new(vec![Step::Answer("192.168.178.1", BOX_1)]);
        transport.fail_send_at = Some(1);
        let probe = FakeProbe::default().with_port("192.168.178.1", 49443);
        let (outcomes, stats) = run(&mut transport, &probe).await;

        assert!(stats.send_failed);
        assert_eq!(stats.iterations, 1);
        assert_eq!(resolved(&outcomes).len(), 1);
    }

    #[tokio::test]
    async fn test_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut transport = FakeTransport::new(vec![Step::Answer("192.168.178.1", BOX_1)]);

        let (outcomes, stats) = run_discovery_loop(
            "eth0",
            &mut transport,
            &DiscoveryDatagram::ipv4(),
            &FakeProbe::default(),
            &options(),
            &cancel,
        )
        .await;

        assert!(outcomes.is_empty());
        assert!(stats.cancelled);
        assert_eq!(transport.sent, 0);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_receive() {
        let cancel = CancellationToken::new();
        let mut transport = FakeTransport::new(vec![Step::Silence]);
        let long_wait = DiscoveryOptions {
            receive_timeout: Duration::from_secs(3600),
            ..DiscoveryOptions::default()
        };

        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let (_, stats) = run_discovery_loop(
            "eth0",
            &mut transport,
            &DiscoveryDatagram::ipv4(),
            &FakeProbe::default(),
            &long_wait,
            &cancel,
        )
        .await;

        assert!(stats.cancelled);
        assert_eq!(stats.iterations, 1);
    }

    #[tokio::test]
    async fn test_report_deduplicates_devices() {
        let probe = FakeProbe::default().with_port("192.168.178.1", 49443);
        let first = resolve_device("192.168.178.1".parse().unwrap(), BOX_1, &probe).await;
        let second = resolve_device("192.168.178.1".parse().unwrap(), BOX_1, &probe).await;

        let mut report = DiscoveryReport::default();
        report.absorb(vec![first], LoopStats::default());
        report.absorb(
            vec![
                second,
                DeviceOutcome::Skipped {
                    address: "192.168.178.9".parse().unwrap(),
                    reason: SkipReason::NoSecurityPort,
                },
            ],
            LoopStats::default(),
        );

        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(report.interfaces.len(), 2);
    }

    fn address(ip: &str) -> DiscoveryAddress {
        DiscoveryAddress {
            ip: ip.parse().unwrap(),
            scope_id: 0,
        }
    }

    /// Serves scripted transports per local address; unknown addresses fail to bind.
    fn scripted_transports(scripts: Vec<(&'static str, Vec<Step>)>) -> TransportFactory {
        let scripts: HashMap<IpAddr, Vec<Step>> = scripts
            .into_iter()
            .map(|(ip, steps)| (ip.parse().unwrap(), steps))
            .collect();
        Arc::new(move |address: DiscoveryAddress, port: u16| {
            assert_eq!(port, 1901);
            match scripts.get(&address.ip) {
                Some(steps) => Ok(Box::new(FakeTransport::new(steps.clone())) as Box<dyn DiscoveryTransport>),
                None => Err(io::Error::new(io::ErrorKind::AddrInUse, "address in use")),
            }
        })
    }

    #[tokio::test]
    async fn test_discover_merges_interfaces() {
        let probe = Arc::new(FakeProbe {
            shared_udn: Some("uuid:75802409-bccb-40e7-8e6c-E0286D000001"),
            ..FakeProbe::default()
                .with_port("192.168.178.1", 49443)
                .with_port("10.0.0.1", 49443)
        });
        let transports = scripted_transports(vec![
            ("192.168.178.20", vec![Step::Answer("192.168.178.1", BOX_1)]),
            (
                "10.0.0.20",
                vec![
                    Step::Answer("10.0.0.1", "HTTP/1.1 200 OK\r\nLOCATION: http://10.0.0.1:49000/tr64desc.xml\r\n\r\n"),
                    Step::Answer("10.0.0.7", BOX_2),
                ],
            ),
        ]);

        let report = DeviceLocator::with_options(options())
            .with_probe(probe.clone())
            .with_addresses(vec![
                ("eth0".to_string(), address("192.168.178.20")),
                ("wlan0".to_string(), address("10.0.0.20")),
                ("eth1".to_string(), address("172.16.0.20")),
            ])
            .with_transport_factory(transports)
            .discover_with_report()
            .await;

        assert_eq!(report.devices.len(), 1);
        assert_eq!(report.devices[0].udn(), "uuid:75802409-bccb-40e7-8e6c-E0286D000001");
        assert_eq!(
            report.skipped,
            vec![("10.0.0.7".parse::<IpAddr>().unwrap(), SkipReason::NoSecurityPort)]
        );
        assert_eq!(probe.description_calls.load(Ordering::SeqCst), 2);

        assert_eq!(report.interfaces.len(), 3);
        let stats: HashMap<&str, &LoopStats> = report
            .interfaces
            .iter()
            .map(|s| (s.interface.as_str(), s))
            .collect();
        assert_eq!(stats["eth0"].iterations, 6);
        assert_eq!(stats["wlan0"].iterations, 7);
        assert!(stats["eth1"].bind_failed);
        assert_eq!(stats["eth1"].iterations, 0);
        assert!(!stats["eth0"].bind_failed);
    }

    #[tokio::test]
    async fn test_discover_cancels_every_interface() {
        let transports = scripted_transports(vec![
            ("192.168.178.20", vec![Step::Silence]),
            ("10.0.0.20", vec![Step::Silence]),
        ]);
        let locator = DeviceLocator::with_options(DiscoveryOptions {
            receive_timeout: Duration::from_secs(3600),
            ..DiscoveryOptions::default()
        })
        .with_probe(Arc::new(FakeProbe::default()))
        .with_addresses(vec![
            ("eth0".to_string(), address("192.168.178.20")),
            ("wlan0".to_string(), address("10.0.0.20")),
        ])
        .with_transport_factory(transports);

        let trigger = locator.cancellation_token();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let report = locator.discover_with_report().await;

        assert!(report.devices.is_empty());
        assert_eq!(report.interfaces.len(), 2);
        assert!(report.interfaces.iter().all(|s| s.cancelled));
    }

    #[test]
    fn test_options_from_config_defaults() {
        let config = fritzconfig::Config::from_defaults().unwrap();
        assert_eq!(DiscoveryOptions::from_config(&config), DiscoveryOptions::default());
    }

    #[test]
    fn test_options_from_config_values() {
        let config = fritzconfig::Config::from_defaults().unwrap();
        config.set_value(&["discovery", "max_duplicates"], 2.into()).unwrap();
        config.set_value(&["discovery", "enable_ipv6"], false.into()).unwrap();

        let options = DiscoveryOptions::from_config(&config);
        assert_eq!(options.max_duplicates, 2);
        assert!(!options.enable_ipv6);
        assert_eq!(options.bind_port, 1901);
    }
}
