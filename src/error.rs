use std::io;

use thiserror::Error;

/// How the discovery loop reacts to an [`Error`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Log it, drop the session and go back to discovery.
    Transient,
    /// Stop the process.
    Fatal,
}

#[derive(Debug, Error)]
pub enum Error {
    #[error("USB context unavailable: {0}")]
    Context(#[source] rusb::Error),
    #[error("failed to enumerate USB devices: {0}")]
    Enumerate(#[source] rusb::Error),
    #[error("failed to open device: {0}")]
    Open(#[source] rusb::Error),
    #[error("failed to select configuration: {0}")]
    Configure(#[source] rusb::Error),
    #[error("failed to claim interface {interface}: {source}")]
    Claim {
        interface: u8,
        #[source]
        source: rusb::Error,
    },
    #[error("interface {0} is not part of the active configuration")]
    MissingInterface(u8),
    #[error("interface {interface} has no bulk {direction} endpoint")]
    MissingEndpoint {
        interface: u8,
        direction: &'static str,
    },
    #[error("write to endpoint 0x{endpoint:02X} failed: {source}")]
    Write {
        endpoint: u8,
        #[source]
        source: rusb::Error,
    },
    #[error("read from endpoint 0x{endpoint:02X} failed: {source}")]
    Read {
        endpoint: u8,
        #[source]
        source: rusb::Error,
    },
    #[error("failed to write to the console: {0}")]
    Console(#[from] io::Error),
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("device {vendor_id:04x}:{product_id:04x} unavailable after {attempts} attempts")]
    GaveUp {
        vendor_id: u16,
        product_id: u16,
        attempts: u32,
    },
}

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match self {
            Error::Context(_) | Error::InvalidConfig(_) | Error::GaveUp { .. } | Error::Console(_) => {
                ErrorKind::Fatal
            }
            // Permissions and missing driver support do not fix themselves between scans.
            Error::Open(source) | Error::Claim { source, .. } => match source {
                rusb::Error::Access | rusb::Error::NotSupported => ErrorKind::Fatal,
                _ => ErrorKind::Transient,
            },
            _ => ErrorKind::Transient,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// A bulk transfer that ran out of time. The session survives these.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Error::Write { source: rusb::Error::Timeout, .. } | Error::Read { source: rusb::Error::Timeout, .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_errors_are_transient() {
        let err = Error::Read { endpoint: 0x81, source: rusb::Error::Pipe };
        assert_eq!(err.kind(), ErrorKind::Transient);
        assert!(!err.is_timeout());

        let err = Error::Write { endpoint: 0x01, source: rusb::Error::NoDevice };
        assert_eq!(err.kind(), ErrorKind::Transient);
    }

    #[test]
    fn test_missing_endpoint_is_transient() {
        let err = Error::MissingEndpoint { interface: 0, direction: "IN" };
        assert!(!err.is_fatal());
        assert_eq!(err.to_string(), "interface 0 has no bulk IN endpoint");
    }

    #[test]
    fn test_permission_errors_are_fatal() {
        assert!(Error::Open(rusb::Error::Access).is_fatal());
        assert!(Error::Claim { interface: 0, source: rusb::Error::NotSupported }.is_fatal());
        assert!(!Error::Open(rusb::Error::NoDevice).is_fatal());
        assert!(!Error::Claim { interface: 0, source: rusb::Error::Busy }.is_fatal());
    }

    #[test]
    fn test_timeouts() {
        assert!(Error::Read { endpoint: 0x81, source: rusb::Error::Timeout }.is_timeout());
        assert!(Error::Write { endpoint: 0x01, source: rusb::Error::Timeout }.is_timeout());
        assert!(!Error::Open(rusb::Error::Timeout).is_timeout());
    }

    #[test]
    fn test_gave_up_message() {
        let err = Error::GaveUp { vendor_id: 0xC0DE, product_id: 0xCAFE, attempts: 3 };
        assert!(err.is_fatal());
        assert_eq!(err.to_string(), "device c0de:cafe unavailable after 3 attempts");
    }
}
