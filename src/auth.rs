//! Sign-on security check (SECCHK) frame construction
//!
//! Builds the binary security check request that authenticates a session
//! with the sign-on server. The frame is a length-prefixed object carrying
//! tagged parameter blocks; which blocks appear depends on the
//! authentication scheme. All integers are big-endian and the total length
//! is declared up front, so the builder sizes every optional block before
//! serializing.

use crate::ebcdic;
use crate::error::{AuthError, AuthResult};
use crate::frame::Frame;
use crate::service::HostService;

/// Request code for the security check exchange on the sign-on server
pub const CODE_SECURITY_CHECK: u16 = 0x7002;

/// Security check object code point
pub const CP_SECCHK: u16 = 0x106E;

/// User identifier block (fixed-width EBCDIC)
pub const CP_USRID: u16 = 0x11A0;

/// Password block (pre-derived authentication bytes)
pub const CP_PASSWORD: u16 = 0x11A1;

/// Security mechanism block (token schemes only)
pub const CP_SECMEC: u16 = 0x11A2;

/// Security check return code block, carried in the host's reply
pub const CP_SECCHKCD: u16 = 0x11A4;

/// Security token block (substitute password, profile token, Kerberos)
pub const CP_SECTKN: u16 = 0x11DC;

/// Additional authentication factor block
pub const CP_ADD_AUTH_FACTOR: u16 = 0x11E5;

/// Verification ID block (token schemes)
pub const CP_VERIFICATION_ID: u16 = 0x11E6;

/// Client IP address block (token schemes)
pub const CP_CLIENT_IP: u16 = 0x11E7;

/// Relational database name qualifier block
pub const CP_RDBNAM: u16 = 0x2110;

/// CCSID tag carried by the UTF-8 parameter blocks
pub const CCSID_UTF8: u16 = 1208;

/// Width of the RDB name field in bytes
const RDB_NAME_LEN: usize = 18;

/// Authentication schemes accepted by the sign-on server
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthScheme {
    /// User ID plus pre-derived password bytes
    Password,
    /// User ID plus a substitute password token
    SubstitutePassword,
    /// Profile token obtained from the host
    ProfileToken,
    /// Kerberos service ticket
    Kerberos,
}

impl AuthScheme {
    /// Security mechanism code carried in the SECMEC block
    pub fn mechanism(self) -> u8 {
        match self {
            AuthScheme::Password => 0x03,
            AuthScheme::SubstitutePassword => 0x06,
            AuthScheme::Kerberos => 0x0B,
            AuthScheme::ProfileToken => 0x0D,
        }
    }

    /// True for the schemes that carry a user identifier field
    pub fn carries_user_id(self) -> bool {
        matches!(self, AuthScheme::Password | AuthScheme::SubstitutePassword)
    }

    pub fn name(self) -> &'static str {
        match self {
            AuthScheme::Password => "password",
            AuthScheme::SubstitutePassword => "substitute-password",
            AuthScheme::ProfileToken => "profile-token",
            AuthScheme::Kerberos => "kerberos",
        }
    }
}

/// Builder for one security check request frame
///
/// The password and substitute-password schemes carry the fixed-width user
/// field and the authentication bytes, optionally qualified by an RDB name
/// and an additional authentication factor. The token schemes omit the user
/// and password fields entirely and instead carry the mechanism code, the
/// token, and optional CCSID-tagged verification ID and client IP blocks.
#[derive(Debug, Clone)]
pub struct SecurityCheck {
    scheme: AuthScheme,
    user: Option<String>,
    token: Vec<u8>,
    rdb_name: Option<String>,
    additional_factor: Option<Vec<u8>>,
    verification_id: Option<String>,
    client_ip: Option<String>,
}

impl SecurityCheck {
    /// Create a security check for a user-identified scheme
    pub fn with_user(scheme: AuthScheme, user: &str, token: Vec<u8>) -> Self {
        Self {
            scheme,
            user: Some(user.to_string()),
            token,
            rdb_name: None,
            additional_factor: None,
            verification_id: None,
            client_ip: None,
        }
    }

    /// Create a security check for a token scheme (profile token, Kerberos)
    pub fn with_token(scheme: AuthScheme, token: Vec<u8>) -> Self {
        Self {
            scheme,
            user: None,
            token,
            rdb_name: None,
            additional_factor: None,
            verification_id: None,
            client_ip: None,
        }
    }

    /// Qualify the check with a relational database (ASP group) name
    pub fn set_rdb_name(&mut self, rdb: &str) {
        self.rdb_name = if rdb.is_empty() { None } else { Some(rdb.to_string()) };
    }

    /// Attach an additional authentication factor (e.g. a TOTP code)
    pub fn set_additional_factor(&mut self, factor: Vec<u8>) {
        self.additional_factor = if factor.is_empty() { None } else { Some(factor) };
    }

    /// Attach the verification ID identifying the requesting client
    pub fn set_verification_id(&mut self, id: &str) {
        self.verification_id = if id.is_empty() { None } else { Some(id.to_string()) };
    }

    /// Attach the client IP address block
    pub fn set_client_ip(&mut self, addr: &str) {
        self.client_ip = if addr.is_empty() { None } else { Some(addr.to_string()) };
    }

    /// Serialize the security check object
    ///
    /// Layout: u16 total length, u16 code point 0x106E, then the parameter
    /// blocks, each a u16 length / u16 code point pair followed by data.
    pub fn build(&self) -> AuthResult<Vec<u8>> {
        if self.token.is_empty() {
            return Err(AuthError::InvalidToken {
                reason: "authentication token is empty".to_string(),
            });
        }
        if self.token.len() > u16::MAX as usize - 4 {
            return Err(AuthError::InvalidToken {
                reason: format!("authentication token of {} bytes exceeds block bounds", self.token.len()),
            });
        }

        let mut blocks: Vec<Vec<u8>> = Vec::new();

        if self.scheme.carries_user_id() {
            let user = self.user.as_deref().ok_or_else(|| AuthError::InvalidUserId {
                user: String::new(),
                reason: "scheme requires a user ID".to_string(),
            })?;
            blocks.push(data_block(CP_USRID, &ebcdic::encode_user_id(user)?));

            let token_cp = match self.scheme {
                AuthScheme::Password => CP_PASSWORD,
                _ => CP_SECTKN,
            };
            blocks.push(data_block(token_cp, &self.token));

            if let Some(ref rdb) = self.rdb_name {
                blocks.push(data_block(CP_RDBNAM, &encode_rdb_name(rdb)?));
            }
            if let Some(ref factor) = self.additional_factor {
                blocks.push(ccsid_block(CP_ADD_AUTH_FACTOR, factor));
            }
        } else {
            blocks.push(data_block(CP_SECMEC, &[self.scheme.mechanism()]));
            blocks.push(data_block(CP_SECTKN, &self.token));

            if let Some(ref id) = self.verification_id {
                blocks.push(ccsid_block(CP_VERIFICATION_ID, id.as_bytes()));
            }
            if let Some(ref addr) = self.client_ip {
                blocks.push(ccsid_block(CP_CLIENT_IP, addr.as_bytes()));
            }
        }

        // Total length is declared before any block contents
        let total = 4 + blocks.iter().map(Vec::len).sum::<usize>();
        let mut out = Vec::with_capacity(total);
        out.extend_from_slice(&(total as u16).to_be_bytes());
        out.extend_from_slice(&CP_SECCHK.to_be_bytes());
        for block in &blocks {
            out.extend_from_slice(block);
        }
        debug_assert_eq!(out.len(), total);
        Ok(out)
    }

    /// Build the frame carrying this security check for one host service
    ///
    /// Every service connection authenticates itself with its own security
    /// check exchange, so the frame is stamped with the target service ID.
    pub fn into_frame(&self, service: HostService) -> AuthResult<Frame> {
        Ok(Frame::new(service.id(), CODE_SECURITY_CHECK, self.build()?))
    }

    pub fn scheme(&self) -> AuthScheme {
        self.scheme
    }
}

/// Parse the host's security check reply payload
///
/// The reply carries a SECCHKCD block whose single code byte is zero on
/// success; any other value is the host's rejection code.
pub fn parse_security_check_reply(payload: &[u8]) -> AuthResult<()> {
    if payload.len() < 9 {
        return Err(AuthError::InvalidToken {
            reason: format!("security check reply truncated at {} bytes", payload.len()),
        });
    }
    let cp = u16::from_be_bytes([payload[6], payload[7]]);
    if cp != CP_SECCHKCD {
        return Err(AuthError::InvalidToken {
            reason: format!("security check reply carries code point 0x{cp:04X}"),
        });
    }
    match payload[8] {
        0 => Ok(()),
        code => Err(AuthError::Rejected { code }),
    }
}

/// Serialize the host's side of the reply (used by tests and tooling)
pub fn build_security_check_reply(code: u8) -> Vec<u8> {
    let mut out = Vec::with_capacity(9);
    out.extend_from_slice(&9u16.to_be_bytes());
    out.extend_from_slice(&CP_SECCHK.to_be_bytes());
    out.extend_from_slice(&5u16.to_be_bytes());
    out.extend_from_slice(&CP_SECCHKCD.to_be_bytes());
    out.push(code);
    out
}

fn data_block(code_point: u16, data: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(4 + data.len());
    block.extend_from_slice(&((4 + data.len()) as u16).to_be_bytes());
    block.extend_from_slice(&code_point.to_be_bytes());
    block.extend_from_slice(data);
    block
}

fn ccsid_block(code_point: u16, data: &[u8]) -> Vec<u8> {
    let mut block = Vec::with_capacity(6 + data.len());
    block.extend_from_slice(&((6 + data.len()) as u16).to_be_bytes());
    block.extend_from_slice(&code_point.to_be_bytes());
    block.extend_from_slice(&CCSID_UTF8.to_be_bytes());
    block.extend_from_slice(data);
    block
}

fn encode_rdb_name(rdb: &str) -> AuthResult<[u8; RDB_NAME_LEN]> {
    let folded = rdb.trim().to_uppercase();
    if folded.chars().count() > RDB_NAME_LEN {
        return Err(AuthError::InvalidToken {
            reason: format!("RDB name longer than {RDB_NAME_LEN} characters"),
        });
    }
    let mut field = [ebcdic::EBCDIC_SPACE; RDB_NAME_LEN];
    for (i, ch) in folded.chars().enumerate() {
        field[i] = ebcdic::char_to_ebcdic(ch).ok_or_else(|| AuthError::InvalidToken {
            reason: format!("RDB name character '{ch}' has no CP037 encoding"),
        })?;
    }
    Ok(field)
}
