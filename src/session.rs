//! Logical host sessions and service connection establishment
//!
//! A session is an authenticated binding between a client principal and one
//! host, independent of which sockets currently carry its traffic. The
//! `HostSession` trait is the seam the connection pool works against; the
//! concrete `HostConnection` establishes TCP or TLS sockets to the host
//! servers and authenticates each one with a security check exchange.

use std::collections::HashMap;
use std::fs;
use std::io::ErrorKind;
use std::net::{SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use base64::Engine;
use log::{debug, warn};
use native_tls::{Certificate, TlsConnector};

use crate::auth::{parse_security_check_reply, AuthScheme, SecurityCheck, CODE_SECURITY_CHECK};
use crate::config::ConnectOptions;
use crate::error::{HostlinkError, HostlinkResult, TransportError, TransportResult};
use crate::frame::{reply_code, Frame, CODE_HEARTBEAT};
use crate::service::HostService;
use crate::transport::{DynStream, HostTransport, Transport};

/// Credentials a session authenticates with
#[derive(Debug, Clone)]
pub enum Credential {
    /// User profile plus pre-derived password bytes
    Password { user: String, secret: Vec<u8> },
    /// User profile plus a substitute password token
    SubstitutePassword { user: String, token: Vec<u8> },
    /// Profile token obtained from the host
    ProfileToken { token: Vec<u8> },
    /// Kerberos service ticket
    Kerberos { ticket: Vec<u8> },
}

impl Credential {
    /// Principal identifier this credential authenticates as
    pub fn principal(&self) -> String {
        match self {
            Credential::Password { user, .. } | Credential::SubstitutePassword { user, .. } => {
                user.trim().to_uppercase()
            }
            Credential::ProfileToken { .. } => "*PRFTKN".to_string(),
            Credential::Kerberos { .. } => "*KRBSVR".to_string(),
        }
    }

    /// Build the security check for this credential
    fn security_check(&self, local_addr: Option<SocketAddr>) -> SecurityCheck {
        match self {
            Credential::Password { user, secret } => {
                SecurityCheck::with_user(AuthScheme::Password, user, secret.clone())
            }
            Credential::SubstitutePassword { user, token } => {
                SecurityCheck::with_user(AuthScheme::SubstitutePassword, user, token.clone())
            }
            Credential::ProfileToken { token } => {
                let mut check = SecurityCheck::with_token(AuthScheme::ProfileToken, token.clone());
                attach_client_identity(&mut check, local_addr);
                check
            }
            Credential::Kerberos { ticket } => {
                let mut check = SecurityCheck::with_token(AuthScheme::Kerberos, ticket.clone());
                attach_client_identity(&mut check, local_addr);
                check
            }
        }
    }
}

/// Tag token-scheme checks with the requesting workstation and address
fn attach_client_identity(check: &mut SecurityCheck, local_addr: Option<SocketAddr>) {
    let workstation = hostname::get()
        .ok()
        .and_then(|name| name.into_string().ok())
        .unwrap_or_else(|| "UNKNOWN".to_string());
    check.set_verification_id(&format!("HOSTLINK400/{workstation}"));
    if let Some(addr) = local_addr {
        check.set_client_ip(&addr.ip().to_string());
    }
}

/// An authenticated logical session to one host under one principal
pub trait HostSession: Send + Sync + std::fmt::Debug {
    /// Host system name
    fn system(&self) -> &str;

    /// Authenticated principal identifier
    fn principal(&self) -> &str;

    /// True if this session uses TLS sockets
    fn is_secure(&self) -> bool;

    /// True if a live service connection exists for the given service
    fn is_connected(&self, service: HostService) -> bool;

    /// Establish and authenticate a connection to the given service
    fn connect_service(&self, service: HostService) -> HostlinkResult<()>;

    /// Inexpensive liveness probe; false means the session is unusable
    fn probe_alive(&self) -> bool;

    /// Tear down every service connection; safe to call more than once
    fn disconnect(&self);
}

/// Creates authenticated sessions for the pool's fallback creation path
pub trait SessionFactory: Send + Sync {
    fn create(
        &self,
        secure: bool,
        locale: Option<&str>,
        service: Option<HostService>,
    ) -> HostlinkResult<Arc<dyn HostSession>>;
}

/// Concrete session over TCP or TLS sockets to the host servers
pub struct HostConnection {
    system: String,
    principal: String,
    credential: Credential,
    options: ConnectOptions,
    transports: Mutex<HashMap<HostService, Arc<HostTransport>>>,
    torn_down: AtomicBool,
}

impl HostConnection {
    pub fn new(system: &str, credential: Credential, options: ConnectOptions) -> Self {
        Self {
            system: system.to_string(),
            principal: credential.principal(),
            credential,
            options,
            transports: Mutex::new(HashMap::new()),
            torn_down: AtomicBool::new(false),
        }
    }

    /// Transport for an already connected service
    pub fn transport(&self, service: HostService) -> Option<Arc<HostTransport>> {
        self.transports
            .lock()
            .ok()
            .and_then(|map| map.get(&service).cloned())
    }

    /// Open a socket to the given service, TLS wrapped when configured
    fn open_stream(&self, service: HostService) -> TransportResult<(DynStream, Option<SocketAddr>)> {
        let port = self.options.port_override.unwrap_or_else(|| {
            if self.options.use_tls {
                service.secure_port()
            } else {
                service.port()
            }
        });
        let address = format!("{}:{}", self.system, port);
        let timeout = Duration::from_secs(self.options.connect_timeout_secs);

        let mut addrs = address
            .to_socket_addrs()
            .map_err(|e| TransportError::ConnectionLost {
                reason: format!("address resolution failed for {address}: {e}"),
            })?;
        let addr = addrs.next().ok_or_else(|| TransportError::ConnectionLost {
            reason: format!("no socket addresses resolved for {address}"),
        })?;

        let tcp = TcpStream::connect_timeout(&addr, timeout).map_err(|e| match e.kind() {
            ErrorKind::TimedOut => TransportError::ConnectTimeout {
                host: self.system.clone(),
                port,
                timeout_secs: self.options.connect_timeout_secs,
            },
            ErrorKind::ConnectionRefused => TransportError::ConnectionRefused {
                host: self.system.clone(),
                port,
            },
            _ => TransportError::from(e),
        })?;

        tcp.set_read_timeout(read_timeout(self.options.read_timeout_secs))?;
        tcp.set_write_timeout(read_timeout(self.options.write_timeout_secs))?;
        let local_addr = tcp.local_addr().ok();

        if self.options.use_tls {
            let connector = build_tls_connector(&self.options)?;
            let tls = connector
                .connect(&self.system, tcp)
                .map_err(|e| TransportError::Tls {
                    message: e.to_string(),
                })?;
            Ok((Box::new(tls), local_addr))
        } else {
            Ok((Box::new(tcp), local_addr))
        }
    }
}

fn read_timeout(secs: u64) -> Option<Duration> {
    if secs == 0 {
        None
    } else {
        Some(Duration::from_secs(secs))
    }
}

impl std::fmt::Debug for HostConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HostConnection")
            .field("system", &self.system)
            .field("principal", &self.principal)
            .field("options", &self.options)
            .field("torn_down", &self.torn_down)
            .finish_non_exhaustive()
    }
}

impl HostSession for HostConnection {
    fn system(&self) -> &str {
        &self.system
    }

    fn principal(&self) -> &str {
        &self.principal
    }

    fn is_secure(&self) -> bool {
        self.options.use_tls
    }

    fn is_connected(&self, service: HostService) -> bool {
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }
        match self.transports.lock() {
            Ok(map) => map.get(&service).is_some_and(|t| !t.is_closed()),
            Err(_) => false,
        }
    }

    fn connect_service(&self, service: HostService) -> HostlinkResult<()> {
        if self.torn_down.load(Ordering::SeqCst) {
            return Err(TransportError::Closed.into());
        }

        // Per-session lock: other sessions stay connectable while this one
        // performs its handshake IO.
        let mut map = match self.transports.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        if map.get(&service).is_some_and(|t| !t.is_closed()) {
            return Ok(());
        }

        let (stream, local_addr) = self.open_stream(service)?;
        let transport = HostTransport::new(service, stream);

        let check = self.credential.security_check(local_addr);
        let request = check.into_frame(service)?;
        let reply = transport.send_and_receive(&request)?;
        if reply.code != reply_code(CODE_SECURITY_CHECK) {
            transport.disconnect();
            return Err(TransportError::UnrecognizedFrame {
                service: reply.service,
                code: reply.code,
                correlation: reply.correlation,
            }
            .into());
        }
        if let Err(e) = parse_security_check_reply(&reply.payload) {
            transport.disconnect();
            return Err(HostlinkError::Auth(e));
        }

        debug!(
            "authenticated {} for {} on {} ({})",
            service,
            self.principal,
            self.system,
            check.scheme().name()
        );
        map.insert(service, Arc::new(transport));
        Ok(())
    }

    fn probe_alive(&self) -> bool {
        if self.torn_down.load(Ordering::SeqCst) {
            return false;
        }
        let transport = {
            let map = match self.transports.lock() {
                Ok(map) => map,
                Err(_) => return false,
            };
            map.get(&HostService::SignOn)
                .or_else(|| map.values().next())
                .cloned()
        };
        let transport = match transport {
            Some(t) => t,
            None => return false,
        };

        let ping = Frame::new(transport.service().id(), CODE_HEARTBEAT, Vec::new());
        match transport.send_and_receive(&ping) {
            Ok(reply) => reply.code == reply_code(CODE_HEARTBEAT),
            Err(_) => false,
        }
    }

    fn disconnect(&self) {
        // Latch first so a second disconnect sends nothing at all
        if self.torn_down.swap(true, Ordering::SeqCst) {
            return;
        }
        let mut map = match self.transports.lock() {
            Ok(map) => map,
            Err(poisoned) => poisoned.into_inner(),
        };
        for transport in map.values() {
            transport.disconnect();
        }
        map.clear();
        debug!("session torn down for {} on {}", self.principal, self.system);
    }
}

/// Factory producing `HostConnection` sessions for one host and credential
pub struct HostConnectionFactory {
    system: String,
    credential: Credential,
    options: ConnectOptions,
}

impl HostConnectionFactory {
    pub fn new(system: &str, credential: Credential, options: ConnectOptions) -> Self {
        Self {
            system: system.to_string(),
            credential,
            options,
        }
    }
}

impl SessionFactory for HostConnectionFactory {
    fn create(
        &self,
        secure: bool,
        _locale: Option<&str>,
        service: Option<HostService>,
    ) -> HostlinkResult<Arc<dyn HostSession>> {
        let mut options = self.options.clone();
        options.use_tls = secure;

        let connection = HostConnection::new(&self.system, self.credential.clone(), options);
        // The sign-on connection doubles as the liveness probe channel
        connection.connect_service(HostService::SignOn)?;
        if let Some(service) = service {
            if service != HostService::SignOn {
                connection.connect_service(service)?;
            }
        }
        Ok(Arc::new(connection))
    }
}

/// Build a TLS connector, honoring a custom CA bundle when configured
fn build_tls_connector(options: &ConnectOptions) -> TransportResult<TlsConnector> {
    let mut builder = TlsConnector::builder();

    if let Some(ref path) = options.tls_ca_bundle_path {
        let certificates = load_ca_bundle(path)?;
        if certificates.is_empty() {
            return Err(TransportError::Tls {
                message: format!("no usable certificates in CA bundle {path}"),
            });
        }
        for certificate in certificates {
            builder.add_root_certificate(certificate);
        }
    }

    builder.build().map_err(|e| TransportError::Tls {
        message: e.to_string(),
    })
}

/// Load trusted certificates from a DER file or a PEM bundle
fn load_ca_bundle(path: &str) -> TransportResult<Vec<Certificate>> {
    let bytes = fs::read(path).map_err(|e| TransportError::Tls {
        message: format!("cannot read CA bundle {path}: {e}"),
    })?;

    if let Ok(certificate) = Certificate::from_der(&bytes) {
        return Ok(vec![certificate]);
    }

    let text = String::from_utf8(bytes).map_err(|_| TransportError::Tls {
        message: format!("CA bundle {path} is neither DER nor PEM text"),
    })?;

    const BEGIN: &str = "-----BEGIN CERTIFICATE-----";
    const END: &str = "-----END CERTIFICATE-----";

    let mut certificates = Vec::new();
    let mut rest = text.as_str();
    while let Some(start) = rest.find(BEGIN) {
        let body_start = start + BEGIN.len();
        let Some(end) = rest[body_start..].find(END) else {
            break;
        };
        let body: String = rest[body_start..body_start + end]
            .lines()
            .map(str::trim)
            .collect();
        match base64::engine::general_purpose::STANDARD.decode(&body) {
            Ok(der) => match Certificate::from_der(&der) {
                Ok(certificate) => certificates.push(certificate),
                Err(e) => warn!("skipping invalid certificate in {path}: {e}"),
            },
            Err(e) => warn!("skipping undecodable certificate in {path}: {e}"),
        }
        rest = &rest[body_start + end + END.len()..];
    }
    Ok(certificates)
}
