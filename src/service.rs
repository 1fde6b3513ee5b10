//! IBM i host server identification
//!
//! Each host function (sign-on, database, remote command, ...) is served by a
//! dedicated server job listening on a well-known port, with a distinct
//! service ID carried in every datastream frame.

/// The IBM i host servers a client can connect to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum HostService {
    /// Central server (as-central): license and conversion-table services
    Central = 0xE000,
    /// File server (as-file): integrated file system access
    File = 0xE002,
    /// Network print server (as-netprt)
    Print = 0xE003,
    /// Database server (as-database): SQL and native database access
    Database = 0xE004,
    /// DDM / record-level access server
    RecordAccess = 0xE005,
    /// Data queue server (as-dtaq)
    DataQueue = 0xE007,
    /// Remote command and program call server (as-rmtcmd)
    RemoteCommand = 0xE008,
    /// Sign-on server (as-signon): authentication and password management
    SignOn = 0xE009,
}

impl HostService {
    /// Service ID carried in the frame header
    pub fn id(self) -> u16 {
        self as u16
    }

    /// Look up a service by its frame header ID
    pub fn from_u16(value: u16) -> Option<Self> {
        match value {
            0xE000 => Some(HostService::Central),
            0xE002 => Some(HostService::File),
            0xE003 => Some(HostService::Print),
            0xE004 => Some(HostService::Database),
            0xE005 => Some(HostService::RecordAccess),
            0xE007 => Some(HostService::DataQueue),
            0xE008 => Some(HostService::RemoteCommand),
            0xE009 => Some(HostService::SignOn),
            _ => None,
        }
    }

    /// Well-known port for unencrypted connections
    pub fn port(self) -> u16 {
        match self {
            HostService::Central => 8470,
            HostService::Database => 8471,
            HostService::DataQueue => 8472,
            HostService::File => 8473,
            HostService::Print => 8474,
            HostService::RemoteCommand => 8475,
            HostService::SignOn => 8476,
            HostService::RecordAccess => 446,
        }
    }

    /// Well-known port for TLS connections
    pub fn secure_port(self) -> u16 {
        match self {
            HostService::Central => 9470,
            HostService::Database => 9471,
            HostService::DataQueue => 9472,
            HostService::File => 9473,
            HostService::Print => 9474,
            HostService::RemoteCommand => 9475,
            HostService::SignOn => 9476,
            HostService::RecordAccess => 448,
        }
    }

    /// Service name as registered with the host's service table
    pub fn name(self) -> &'static str {
        match self {
            HostService::Central => "as-central",
            HostService::File => "as-file",
            HostService::Print => "as-netprt",
            HostService::Database => "as-database",
            HostService::RecordAccess => "as-ddm",
            HostService::DataQueue => "as-dtaq",
            HostService::RemoteCommand => "as-rmtcmd",
            HostService::SignOn => "as-signon",
        }
    }
}

impl std::fmt::Display for HostService {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_service_from_u16() {
        assert_eq!(HostService::from_u16(0xE009), Some(HostService::SignOn));
        assert_eq!(HostService::from_u16(0xE004), Some(HostService::Database));
        assert_eq!(HostService::from_u16(0xE001), None);
    }

    #[test]
    fn test_id_round_trip() {
        for service in [
            HostService::Central,
            HostService::File,
            HostService::Print,
            HostService::Database,
            HostService::RecordAccess,
            HostService::DataQueue,
            HostService::RemoteCommand,
            HostService::SignOn,
        ] {
            assert_eq!(HostService::from_u16(service.id()), Some(service));
        }
    }

    #[test]
    fn test_secure_ports_offset() {
        // TLS listeners sit 1000 above the plain ports, DDM excepted
        assert_eq!(HostService::SignOn.port(), 8476);
        assert_eq!(HostService::SignOn.secure_port(), 9476);
        assert_eq!(HostService::RecordAccess.port(), 446);
        assert_eq!(HostService::RecordAccess.secure_port(), 448);
    }
}
