//! Error types for the Bunkr wallet primitives.
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AddressError {
    #[error("invalid length")] InvalidLength,
    #[error("invalid checksum")] InvalidChecksum,
    #[error("invalid character: {0}")] InvalidCharacter(char),
    #[error("invalid version: {0:#04x}")] InvalidVersion(u8),
    #[error("unknown network: {0}")] UnknownNetwork(String),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("invalid public key bytes")] InvalidPublicKey,
    #[error("invalid signature bytes")] InvalidSignature,
    #[error("signature component out of range")] ScalarOutOfRange,
    #[error("signature verification failed")] VerificationFailed,
    #[error("malformed DER: {0}")] MalformedDer(&'static str),
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransactionError {
    #[error("input index out of bounds: {index} >= {len}")] InputIndexOutOfBounds { index: usize, len: usize },
    #[error("unsupported sighash type: {0:#x}")] UnsupportedSighash(u32),
    #[error("truncated transaction at byte {0}")] Truncated(usize),
    #[error("trailing bytes after transaction: {0}")] TrailingBytes(usize),
    #[error("invalid txid: {0}")] InvalidTxid(String),
}

/// Failures reported by, or while talking to, the signing vault.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum VaultError {
    /// The vault could not be reached or the connection broke mid-request.
    #[error("vault transport: {0}")] Transport(String),
    /// The vault answered with an error string.
    #[error("vault rejected command: {0}")] Operation(String),
    /// The vault answered but the payload could not be interpreted.
    #[error("malformed vault response: {0}")] MalformedResponse(String),
    /// The request could not be expressed as a vault command line.
    #[error("invalid vault request: {0}")] InvalidRequest(String),
}

impl VaultError {
    /// Whether the failure happened before the vault processed the command.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

/// Failures reported by the block explorer / broadcaster.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ExplorerError {
    #[error("explorer transport: {0}")] Transport(String),
    #[error("explorer rejected request: {0}")] Rejected(String),
    #[error("explorer response decode: {0}")] Decode(String),
}

impl ExplorerError {
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}
