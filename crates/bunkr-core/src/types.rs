//! Legacy Bitcoin transaction model: outpoints, inputs, outputs, wire
//! serialization and the pre-segwit signature hash.
//!
//! All monetary values are in satoshis.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::str::FromStr;

use crate::constants::{SEQUENCE_FINAL, SIGHASH_ALL, TX_VERSION};
use crate::crypto::double_sha256;
use crate::error::TransactionError;

const OP_DUP: u8 = 0x76;
const OP_HASH160: u8 = 0xA9;
const OP_EQUALVERIFY: u8 = 0x88;
const OP_CHECKSIG: u8 = 0xAC;
const OP_PUSHDATA1: u8 = 0x4C;
const OP_PUSHDATA2: u8 = 0x4D;

/// A transaction id in internal (wire) byte order.
///
/// Displayed and parsed in the conventional reversed-hex form used by
/// explorers.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub struct Txid(pub [u8; 32]);

impl Txid {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for byte in self.0.iter().rev() {
            write!(f, "{byte:02x}")?;
        }
        Ok(())
    }
}

impl fmt::Debug for Txid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Txid({self})")
    }
}

impl FromStr for Txid {
    type Err = TransactionError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let bytes = hex::decode(s).map_err(|_| TransactionError::InvalidTxid(s.to_string()))?;
        let mut id: [u8; 32] = bytes
            .try_into()
            .map_err(|_| TransactionError::InvalidTxid(s.to_string()))?;
        id.reverse();
        Ok(Self(id))
    }
}

impl Serialize for Txid {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for Txid {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// An unspent output as reported by the explorer.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct Utxo {
    pub txid: Txid,
    pub output_index: u32,
    pub value: u64,
}

/// A previously received output that has since been spent.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Eq)]
pub struct SpentOutput {
    pub txid: Txid,
    pub value: u64,
    /// Confirmations of the transaction that created the output.
    pub confirmations: u64,
}

/// Reference to a specific output of a previous transaction.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub struct OutPoint {
    pub txid: Txid,
    pub vout: u32,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxIn {
    pub previous_output: OutPoint,
    /// Empty until the input is signed.
    pub script_sig: Vec<u8>,
    pub sequence: u32,
}

impl TxIn {
    pub fn unsigned(previous_output: OutPoint) -> Self {
        Self {
            previous_output,
            script_sig: Vec::new(),
            sequence: SEQUENCE_FINAL,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TxOut {
    pub value: u64,
    pub script_pubkey: Vec<u8>,
}

/// A pre-segwit transaction.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Transaction {
    pub version: i32,
    pub inputs: Vec<TxIn>,
    pub outputs: Vec<TxOut>,
    pub lock_time: u32,
}

impl Transaction {
    /// Version 1, lock time 0.
    pub fn new(inputs: Vec<TxIn>, outputs: Vec<TxOut>) -> Self {
        Self {
            version: TX_VERSION,
            inputs,
            outputs,
            lock_time: 0,
        }
    }

    /// Wire serialization.
    pub fn serialize(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(10 + self.inputs.len() * 150 + self.outputs.len() * 34);
        out.extend_from_slice(&self.version.to_le_bytes());
        write_varint(&mut out, self.inputs.len() as u64);
        for input in &self.inputs {
            out.extend_from_slice(input.previous_output.txid.as_bytes());
            out.extend_from_slice(&input.previous_output.vout.to_le_bytes());
            write_varint(&mut out, input.script_sig.len() as u64);
            out.extend_from_slice(&input.script_sig);
            out.extend_from_slice(&input.sequence.to_le_bytes());
        }
        write_varint(&mut out, self.outputs.len() as u64);
        for output in &self.outputs {
            out.extend_from_slice(&output.value.to_le_bytes());
            write_varint(&mut out, output.script_pubkey.len() as u64);
            out.extend_from_slice(&output.script_pubkey);
        }
        out.extend_from_slice(&self.lock_time.to_le_bytes());
        out
    }

    /// Parse a serialized transaction, rejecting trailing bytes.
    pub fn deserialize(bytes: &[u8]) -> Result<Self, TransactionError> {
        let mut r = Reader { bytes, pos: 0 };
        let version = i32::from_le_bytes(r.array()?);
        let input_count = r.varint()?;
        let mut inputs = Vec::new();
        for _ in 0..input_count {
            let txid = Txid(r.array()?);
            let vout = u32::from_le_bytes(r.array()?);
            let script_len = r.varint()? as usize;
            let script_sig = r.take(script_len)?.to_vec();
            let sequence = u32::from_le_bytes(r.array()?);
            inputs.push(TxIn {
                previous_output: OutPoint { txid, vout },
                script_sig,
                sequence,
            });
        }
        let output_count = r.varint()?;
        let mut outputs = Vec::new();
        for _ in 0..output_count {
            let value = u64::from_le_bytes(r.array()?);
            let script_len = r.varint()? as usize;
            let script_pubkey = r.take(script_len)?.to_vec();
            outputs.push(TxOut {
                value,
                script_pubkey,
            });
        }
        let lock_time = u32::from_le_bytes(r.array()?);
        if r.pos != bytes.len() {
            return Err(TransactionError::TrailingBytes(bytes.len() - r.pos));
        }
        Ok(Self {
            version,
            inputs,
            outputs,
            lock_time,
        })
    }

    pub fn txid(&self) -> Txid {
        Txid(double_sha256(&self.serialize()))
    }

    pub fn total_output_value(&self) -> Option<u64> {
        self.outputs
            .iter()
            .try_fold(0u64, |acc, o| acc.checked_add(o.value))
    }

    /// Legacy signature hash for input `index`.
    ///
    /// Every input script is emptied except input `index`, which is replaced
    /// by `script_code`; the 4-byte little-endian hash type is appended and
    /// the result double-SHA-256'd. Only `SIGHASH_ALL` is supported.
    pub fn legacy_sighash(
        &self,
        index: usize,
        script_code: &[u8],
        sighash_type: u32,
    ) -> Result<[u8; 32], TransactionError> {
        if index >= self.inputs.len() {
            return Err(TransactionError::InputIndexOutOfBounds {
                index,
                len: self.inputs.len(),
            });
        }
        if sighash_type != SIGHASH_ALL {
            return Err(TransactionError::UnsupportedSighash(sighash_type));
        }
        let mut copy = self.clone();
        for (i, input) in copy.inputs.iter_mut().enumerate() {
            input.script_sig = if i == index { script_code.to_vec() } else { Vec::new() };
        }
        let mut preimage = copy.serialize();
        preimage.extend_from_slice(&sighash_type.to_le_bytes());
        Ok(double_sha256(&preimage))
    }
}

// --- Scripts ---

/// `OP_DUP OP_HASH160 <20 bytes> OP_EQUALVERIFY OP_CHECKSIG`.
pub fn p2pkh_script(pubkey_hash: &[u8; 20]) -> Vec<u8> {
    let mut script = Vec::with_capacity(25);
    script.push(OP_DUP);
    script.push(OP_HASH160);
    script.push(20);
    script.extend_from_slice(pubkey_hash);
    script.push(OP_EQUALVERIFY);
    script.push(OP_CHECKSIG);
    script
}

/// `<sig ‖ hashtype> <pubkey>`.
pub fn p2pkh_script_sig(signature_with_hashtype: &[u8], public_key: &[u8]) -> Vec<u8> {
    let mut script = Vec::with_capacity(signature_with_hashtype.len() + public_key.len() + 2);
    push_data(&mut script, signature_with_hashtype);
    push_data(&mut script, public_key);
    script
}

/// Minimal data push.
pub fn push_data(script: &mut Vec<u8>, data: &[u8]) {
    let len = data.len();
    if len < OP_PUSHDATA1 as usize {
        script.push(len as u8);
    } else if len <= 0xFF {
        script.push(OP_PUSHDATA1);
        script.push(len as u8);
    } else {
        script.push(OP_PUSHDATA2);
        script.extend_from_slice(&(len as u16).to_le_bytes());
    }
    script.extend_from_slice(data);
}

// --- Wire helpers ---

/// Bitcoin CompactSize integer.
pub fn write_varint(out: &mut Vec<u8>, n: u64) {
    if n < 0xFD {
        out.push(n as u8);
    } else if n <= 0xFFFF {
        out.push(0xFD);
        out.extend_from_slice(&(n as u16).to_le_bytes());
    } else if n <= 0xFFFF_FFFF {
        out.push(0xFE);
        out.extend_from_slice(&(n as u32).to_le_bytes());
    } else {
        out.push(0xFF);
        out.extend_from_slice(&n.to_le_bytes());
    }
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], TransactionError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|&end| end <= self.bytes.len())
            .ok_or(TransactionError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn array<const N: usize>(&mut self) -> Result<[u8; N], TransactionError> {
        let pos = self.pos;
        self.take(N)?
            .try_into()
            .map_err(|_| TransactionError::Truncated(pos))
    }

    fn varint(&mut self) -> Result<u64, TransactionError> {
        let [prefix] = self.array::<1>()?;
        Ok(match prefix {
            0xFD => u16::from_le_bytes(self.array()?) as u64,
            0xFE => u32::from_le_bytes(self.array()?) as u64,
            0xFF => u64::from_le_bytes(self.array()?),
            n => n as u64,
        })
    }
}
