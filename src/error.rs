//! Error types for the WPA/RSN authenticator

use thiserror::Error;

/// Main error type for the authenticator
#[derive(Error, Debug)]
pub enum AuthError {
    /// Configuration errors (fatal, rejected at BSS setup)
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Cryptographic errors
    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Malformed WPA/RSN information element
    #[error("IE error: {0}")]
    Ie(#[from] IeError),

    /// Rejected EAPOL-Key frame
    #[error("Frame error: {0}")]
    Frame(#[from] FrameError),

    /// Negotiated policy not acceptable
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyError),

    /// PMKSA cache errors
    #[error("PMKSA error: {0}")]
    Pmksa(#[from] PmksaError),

    /// System I/O errors
    #[error("System error: {0}")]
    System(#[from] std::io::Error),
}

/// Configuration parsing and validation errors
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("File not found: {path}")]
    FileNotFound { path: String },

    #[error("Invalid config format at line {line}: {message}")]
    ParseError { line: usize, message: String },

    #[error("Invalid key: {field}")]
    InvalidKey { field: String },

    #[error("Invalid MAC address: {value}")]
    InvalidAddress { value: String },

    #[error("Missing required field: {field}")]
    MissingField { field: String },

    #[error("Unsupported {field}: {value}")]
    Unsupported { field: String, value: String },

    #[error("Invalid security policy: {reason}")]
    InvalidPolicy { reason: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Cryptographic operation errors
#[derive(Error, Debug)]
pub enum CryptoError {
    #[error("Invalid key length: expected {expected}, got {got}")]
    InvalidKeyLength { expected: usize, got: usize },

    #[error("Key wrap failed")]
    KeyWrap,

    #[error("Key unwrap failed: integrity check did not match")]
    KeyUnwrap,

    #[error("Key data must be a multiple of 8 bytes, got {len}")]
    KeyDataAlignment { len: usize },

    #[error("Unknown key descriptor version: {version}")]
    UnknownDescriptorVersion { version: u16 },

    #[error("No valid PTK for MIC or key data encryption")]
    MissingPtk,
}

/// WPA/RSN information element decode/encode errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum IeError {
    #[error("IE shorter than the fixed header")]
    Truncated,

    #[error("IE header mismatch (element id, length, OUI or version)")]
    BadHeader,

    #[error("Suite count is zero or exceeds remaining bytes")]
    BadCount,

    #[error("Unexpected trailing bytes after IE body")]
    TrailingData,

    #[error("No encodable cipher suite")]
    InvalidCipher,

    #[error("No encodable AKM suite")]
    InvalidAkm,
}

/// EAPOL-Key frame rejection reasons
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameError {
    #[error("Frame shorter than EAPOL-Key header: expected {expected}, got {got}")]
    Truncated { expected: usize, got: usize },

    #[error("Key data length {declared} exceeds remaining {available} bytes")]
    BadKeyDataLen { declared: usize, available: usize },

    #[error("Not an EAPOL-Key frame (type {packet_type})")]
    NotEapolKey { packet_type: u8 },

    #[error("No key state for station")]
    UnknownStation,

    #[error("Request replay counter {counter} not above last accepted request")]
    ReplayedRequest { counter: u64 },

    #[error("Replay counter {counter} does not match expected value")]
    UnexpectedReplayCounter { counter: u64 },

    #[error("{message} received in wrong state")]
    WrongState { message: &'static str },

    #[error("Ack bit set on supplicant frame")]
    AckSet,

    #[error("MIC bit not set")]
    MicMissing,

    #[error("Unknown key descriptor version: {version}")]
    UnknownDescriptorVersion { version: u16 },

    #[error("MIC verification failed")]
    MicMismatch,

    #[error("Request received without a verified MIC")]
    RequestWithoutMic,

    #[error("Message 2 IE differs from association request IE")]
    IeMismatch,
}

/// Association policy mismatch, surfaced to the station as a status code
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyError {
    #[error("Invalid information element")]
    InvalidIe,

    #[error("Group cipher not acceptable")]
    InvalidGroupCipher,

    #[error("No acceptable pairwise cipher")]
    InvalidPairwiseCipher,

    #[error("No acceptable AKM suite")]
    InvalidAkmp,

    #[error("WPA version not enabled")]
    NotEnabled,
}

impl PolicyError {
    /// IEEE 802.11 status code for the (re)association response
    pub fn status_code(&self) -> u16 {
        match self {
            Self::InvalidIe | Self::NotEnabled => 40,
            Self::InvalidGroupCipher => 41,
            Self::InvalidPairwiseCipher => 42,
            Self::InvalidAkmp => 43,
        }
    }
}

/// PMKSA cache errors
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum PmksaError {
    #[error("Allocation failed; cache left unchanged")]
    AllocationFailed,

    #[error("PMKSA caching requires an RSN station")]
    NotRsn,

    #[error("No key state for station")]
    UnknownStation,

    #[error("PMK lifetime out of range")]
    LifetimeOutOfRange,
}

impl AuthError {
    /// Get a user-friendly error message with suggested action
    pub fn user_message(&self) -> String {
        match self {
            Self::Config(ConfigError::FileNotFound { path }) => {
                format!(
                    "Config file not found: {}\n  Check the path and try again.",
                    path
                )
            }

            Self::Config(ConfigError::InvalidKey { field }) => {
                format!(
                    "Invalid {} in config. Expected 64 hex characters or an 8..63 character passphrase.",
                    field
                )
            }

            Self::Config(ConfigError::InvalidPolicy { reason }) => {
                format!(
                    "Security policy rejected: {}\n  \
                    Check Wpa, WpaKeyMgmt and WpaPairwise.",
                    reason
                )
            }

            Self::Policy(e) => {
                format!("{} (status code {})", e, e.status_code())
            }

            _ => format!("{}", self),
        }
    }

    /// Check if this error is recoverable
    pub fn is_recoverable(&self) -> bool {
        match self {
            // Fatal errors
            Self::Config(_) => false,
            Self::System(_) => false,

            // Local rejects, at worst one station is refused
            Self::Frame(_) => true,
            Self::Ie(_) => true,
            Self::Policy(_) => true,
            Self::Pmksa(_) => true,
            Self::Crypto(CryptoError::KeyUnwrap) => true,

            _ => false,
        }
    }

    /// Get the exit code for this error
    pub fn exit_code(&self) -> i32 {
        match self {
            Self::Config(_) => 1,
            Self::Policy(_) => 2,
            Self::Frame(_) => 3,
            Self::Ie(_) => 4,
            Self::Crypto(_) => 5,
            Self::Pmksa(_) => 6,
            Self::System(_) => 7,
        }
    }
}

/// Result type alias for authenticator operations
pub type Result<T> = std::result::Result<T, AuthError>;
