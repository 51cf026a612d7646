//! secp256k1 keys, hashing and ECDSA signature encoding.
//!
//! Private keys exist here only for the moment between generation and hand-off
//! to the vault. Everything after that works on public material:
//!
//! - [`PublicKey`] keeps the exact SEC1 bytes it was created from (compressed
//!   or uncompressed), because the address commits to that exact encoding.
//! - [`Signature`] is the `(r, s)` pair returned by the vault. It can be
//!   normalized to low-s and encoded as strict DER for a scriptSig.

use k256::ecdsa::VerifyingKey;
use k256::ecdsa::signature::hazmat::PrehashVerifier;
use k256::elliptic_curve::sec1::ToEncodedPoint;
use rand::{CryptoRng, RngCore};
use ripemd::Ripemd160;
use sha2::{Digest, Sha256};
use std::fmt;
use zeroize::Zeroizing;

use crate::constants::{CURVE_ORDER, HALF_CURVE_ORDER};
use crate::error::CryptoError;

/// SHA-256 of `data`.
pub fn sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(data).into()
}

/// SHA-256 applied twice; the Bitcoin txid, checksum and sighash digest.
pub fn double_sha256(data: &[u8]) -> [u8; 32] {
    Sha256::digest(Sha256::digest(data)).into()
}

/// RIPEMD-160 of SHA-256; the 20-byte pubkey hash of a P2PKH address.
pub fn hash160(data: &[u8]) -> [u8; 20] {
    Ripemd160::digest(Sha256::digest(data)).into()
}

/// A freshly generated secp256k1 keypair.
///
/// The secret scalar is zeroized on drop by `k256`. `Debug` never prints it.
pub struct KeyPair {
    secret: k256::SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a keypair from the OS cryptographic RNG.
    pub fn generate(compressed: bool) -> Self {
        Self::generate_with(&mut rand::rngs::OsRng, compressed)
    }

    /// Generate a keypair from `rng`, rejecting candidates outside `[1, N-1]`.
    pub fn generate_with<R: RngCore + CryptoRng>(rng: &mut R, compressed: bool) -> Self {
        let mut candidate = Zeroizing::new([0u8; 32]);
        loop {
            rng.fill_bytes(&mut candidate[..]);
            if let Ok(secret) = k256::SecretKey::from_slice(&candidate[..]) {
                return Self::from_secret(secret, compressed);
            }
        }
    }

    /// Build a keypair from a 32-byte big-endian scalar.
    pub fn from_secret_bytes(bytes: &[u8; 32], compressed: bool) -> Result<Self, CryptoError> {
        let secret = k256::SecretKey::from_slice(bytes).map_err(|_| CryptoError::ScalarOutOfRange)?;
        Ok(Self::from_secret(secret, compressed))
    }

    fn from_secret(secret: k256::SecretKey, compressed: bool) -> Self {
        let point = secret.public_key().to_encoded_point(compressed);
        let public = PublicKey {
            bytes: point.as_bytes().to_vec(),
        };
        Self { secret, public }
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public
    }

    /// The secret scalar as big-endian bytes with leading zeros stripped.
    ///
    /// This is the form the vault expects in a `write` command.
    pub fn secret_bytes_minimal(&self) -> Zeroizing<Vec<u8>> {
        let mut full = Zeroizing::new([0u8; 32]);
        full.copy_from_slice(&self.secret.to_bytes());
        let start = full.iter().position(|&b| b != 0).unwrap_or(full.len() - 1);
        Zeroizing::new(full[start..].to_vec())
    }
}

impl fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyPair")
            .field("public_key", &self.public)
            .finish_non_exhaustive()
    }
}

/// A validated SEC1-encoded secp256k1 public key.
#[derive(Clone, PartialEq, Eq, Hash)]
pub struct PublicKey {
    bytes: Vec<u8>,
}

impl PublicKey {
    /// Accepts 33-byte compressed or 65-byte uncompressed encodings of a curve point.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self, CryptoError> {
        k256::PublicKey::from_sec1_bytes(bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        Ok(Self {
            bytes: bytes.to_vec(),
        })
    }

    pub fn from_hex(s: &str) -> Result<Self, CryptoError> {
        let bytes = hex::decode(s).map_err(|_| CryptoError::InvalidPublicKey)?;
        Self::from_bytes(&bytes)
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn to_hex(&self) -> String {
        hex::encode(&self.bytes)
    }

    pub fn is_compressed(&self) -> bool {
        self.bytes.len() == 33
    }

    /// HASH160 of the serialized key, as committed to by a P2PKH address.
    pub fn pubkey_hash(&self) -> [u8; 20] {
        hash160(&self.bytes)
    }

    /// Check an ECDSA signature over a 32-byte digest.
    pub fn verify_prehash(&self, hash: &[u8; 32], signature: &Signature) -> Result<(), CryptoError> {
        let key = VerifyingKey::from_sec1_bytes(&self.bytes).map_err(|_| CryptoError::InvalidPublicKey)?;
        let sig = k256::ecdsa::Signature::from_scalars(signature.r, signature.s)
            .map_err(|_| CryptoError::InvalidSignature)?;
        key.verify_prehash(hash, &sig)
            .map_err(|_| CryptoError::VerificationFailed)
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({})", self.to_hex())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

/// An ECDSA signature as two big-endian integers in `[1, N-1]`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature {
    r: [u8; 32],
    s: [u8; 32],
}

impl Signature {
    /// Build a signature, rejecting components that are zero or not below the curve order.
    pub fn from_scalars(r: [u8; 32], s: [u8; 32]) -> Result<Self, CryptoError> {
        if !in_scalar_range(&r) || !in_scalar_range(&s) {
            return Err(CryptoError::ScalarOutOfRange);
        }
        Ok(Self { r, s })
    }

    pub fn r(&self) -> &[u8; 32] {
        &self.r
    }

    pub fn s(&self) -> &[u8; 32] {
        &self.s
    }

    /// `s <= N/2`.
    pub fn is_low_s(&self) -> bool {
        self.s <= HALF_CURVE_ORDER
    }

    /// Replace a high `s` with `N - s`. Applying it twice changes nothing.
    pub fn normalize(self) -> Self {
        if self.is_low_s() {
            return self;
        }
        Self {
            r: self.r,
            s: order_minus(&self.s),
        }
    }

    /// Strict DER: `30 len 02 len r 02 len s`, minimal integers, sign-padded.
    pub fn to_der(&self) -> Vec<u8> {
        let r = der_integer(&self.r);
        let s = der_integer(&self.s);
        let mut out = Vec::with_capacity(6 + r.len() + s.len());
        out.push(0x30);
        out.push((4 + r.len() + s.len()) as u8);
        out.push(0x02);
        out.push(r.len() as u8);
        out.extend_from_slice(&r);
        out.push(0x02);
        out.push(s.len() as u8);
        out.extend_from_slice(&s);
        out
    }

    /// Inverse of [`Signature::to_der`]. Rejects non-minimal or negative integers.
    pub fn from_der(der: &[u8]) -> Result<Self, CryptoError> {
        let (&tag, rest) = der.split_first().ok_or(CryptoError::MalformedDer("empty"))?;
        if tag != 0x30 {
            return Err(CryptoError::MalformedDer("expected sequence"));
        }
        let (&len, body) = rest.split_first().ok_or(CryptoError::MalformedDer("missing length"))?;
        if len as usize != body.len() {
            return Err(CryptoError::MalformedDer("sequence length mismatch"));
        }
        let (r, body) = read_der_integer(body)?;
        let (s, body) = read_der_integer(body)?;
        if !body.is_empty() {
            return Err(CryptoError::MalformedDer("trailing bytes"));
        }
        Self::from_scalars(r, s)
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Signature")
            .field("r", &hex::encode(self.r))
            .field("s", &hex::encode(self.s))
            .finish()
    }
}

// --- Scalar helpers ---

fn in_scalar_range(v: &[u8; 32]) -> bool {
    v.iter().any(|&b| b != 0) && *v < CURVE_ORDER
}

/// `N - v` for `0 < v < N`.
fn order_minus(v: &[u8; 32]) -> [u8; 32] {
    let mut out = [0u8; 32];
    let mut borrow = 0i16;
    for i in (0..32).rev() {
        let mut d = CURVE_ORDER[i] as i16 - v[i] as i16 - borrow;
        borrow = if d < 0 {
            d += 256;
            1
        } else {
            0
        };
        out[i] = d as u8;
    }
    out
}

fn der_integer(v: &[u8; 32]) -> Vec<u8> {
    let start = v.iter().position(|&b| b != 0).unwrap_or(31);
    let digits = &v[start..];
    let mut out = Vec::with_capacity(33);
    if digits[0] & 0x80 != 0 {
        out.push(0x00);
    }
    out.extend_from_slice(digits);
    out
}

fn read_der_integer(input: &[u8]) -> Result<([u8; 32], &[u8]), CryptoError> {
    let [tag, len, rest @ ..] = input else {
        return Err(CryptoError::MalformedDer("truncated integer"));
    };
    if *tag != 0x02 {
        return Err(CryptoError::MalformedDer("expected integer"));
    }
    let len = *len as usize;
    if len == 0 || len > 33 || rest.len() < len {
        return Err(CryptoError::MalformedDer("bad integer length"));
    }
    let (digits, rest) = rest.split_at(len);
    if digits[0] & 0x80 != 0 {
        return Err(CryptoError::MalformedDer("negative integer"));
    }
    if len > 1 && digits[0] == 0 && digits[1] & 0x80 == 0 {
        return Err(CryptoError::MalformedDer("non-minimal integer"));
    }
    let digits = if digits[0] == 0 && len > 1 { &digits[1..] } else { digits };
    if digits.len() > 32 {
        return Err(CryptoError::MalformedDer("integer too large"));
    }
    let mut value = [0u8; 32];
    value[32 - digits.len()..].copy_from_slice(digits);
    Ok((value, rest))
}
