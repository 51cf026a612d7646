//! Transaction builder for vault-signed P2PKH spends.
//!
//! Building happens in three steps with the vault round-trip in the middle:
//! 1. [`TransactionBuilder::build_unsigned`] turns funding accounts, recipients
//!    and a change account into an unsigned transaction
//! 2. [`compute_sighashes`] produces the digest each input's key must sign
//! 3. [`assemble_signed`] embeds the returned signatures as scriptSigs

use std::fmt;

use bunkr_core::address::Address;
use bunkr_core::constants::SIGHASH_ALL;
use bunkr_core::crypto::{PublicKey, Signature};
use bunkr_core::types::{
    OutPoint, Transaction, TxIn, TxOut, Txid, p2pkh_script, p2pkh_script_sig,
};

use crate::coin_selection::FundingAccount;
use crate::error::WalletError;
use crate::wallet::Account;

/// A transaction recipient: address and amount.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Recipient {
    pub address: Address,
    /// Amount in satoshis.
    pub amount: u64,
}

/// An unsigned transaction ready for signing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnsignedTransaction {
    /// The transaction with empty scriptSigs.
    pub tx: Transaction,
    /// Address owning each input, in input order.
    pub input_addresses: Vec<String>,
    pub fee: u64,
    /// Value of the change output, zero when there is none.
    pub change: u64,
}

/// A fully signed transaction.
#[derive(Clone, PartialEq, Eq)]
pub struct SignedTransaction {
    tx: Transaction,
}

impl SignedTransaction {
    pub fn transaction(&self) -> &Transaction {
        &self.tx
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        self.tx.serialize()
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.tx.serialize())
    }

    pub fn txid(&self) -> Txid {
        self.tx.txid()
    }
}

impl fmt::Debug for SignedTransaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SignedTransaction")
            .field("txid", &self.txid())
            .field("inputs", &self.tx.inputs.len())
            .field("outputs", &self.tx.outputs.len())
            .finish()
    }
}

/// Builder for unsigned transactions.
///
/// # Example
/// ```ignore
/// let unsigned = TransactionBuilder::new()
///     .add_recipient(address, 50_000)
///     .set_fee(1_000)
///     .build_unsigned(&funding, &change_account)?;
/// ```
#[derive(Debug, Clone, Default)]
pub struct TransactionBuilder {
    recipients: Vec<Recipient>,
    fee: u64,
}

impl TransactionBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_recipient(&mut self, address: Address, amount: u64) -> &mut Self {
        self.recipients.push(Recipient { address, amount });
        self
    }

    pub fn set_fee(&mut self, fee: u64) -> &mut Self {
        self.fee = fee;
        self
    }

    pub fn recipients(&self) -> &[Recipient] {
        &self.recipients
    }

    /// Sum of recipient amounts plus the fee.
    ///
    /// Rejects an empty recipient list, zero amounts, and totals that
    /// overflow `u64`.
    pub fn target(&self) -> Result<u64, WalletError> {
        if self.recipients.is_empty() {
            return Err(WalletError::InvalidAmount("no recipients".into()));
        }
        let mut total = self.fee;
        for r in &self.recipients {
            if r.amount == 0 {
                return Err(WalletError::InvalidAmount(format!(
                    "zero amount to {}",
                    r.address
                )));
            }
            total = total
                .checked_add(r.amount)
                .ok_or_else(|| WalletError::InvalidAmount("total overflows".into()))?;
        }
        Ok(total)
    }

    /// Spend every UTXO of every funding account.
    ///
    /// Inputs follow funding account order, then explorer order within an
    /// account. Outputs are the recipients in order, then change to
    /// `change_account` when the inputs exceed recipients plus fee.
    pub fn build_unsigned(
        &self,
        funding: &[FundingAccount],
        change_account: &Account,
    ) -> Result<UnsignedTransaction, WalletError> {
        let target = self.target()?;

        let mut inputs = Vec::new();
        let mut input_addresses = Vec::new();
        let mut gross = 0u64;
        for account in funding {
            for utxo in &account.utxos {
                gross = gross
                    .checked_add(utxo.value)
                    .ok_or_else(|| WalletError::InvalidAmount("input total overflows".into()))?;
                inputs.push(TxIn::unsigned(OutPoint {
                    txid: utxo.txid,
                    vout: utxo.output_index,
                }));
                input_addresses.push(account.account.address.clone());
            }
        }
        if inputs.is_empty() {
            return Err(WalletError::ProtocolMismatch("no inputs to spend".into()));
        }
        if gross < target {
            return Err(WalletError::ProtocolMismatch(format!(
                "inputs total {gross}, outputs plus fee need {target}"
            )));
        }

        let mut outputs: Vec<TxOut> = self
            .recipients
            .iter()
            .map(|r| TxOut {
                value: r.amount,
                script_pubkey: r.address.script_pubkey(),
            })
            .collect();
        let change = gross - target;
        if change > 0 {
            let change_address: Address = change_account.address.parse()?;
            outputs.push(TxOut {
                value: change,
                script_pubkey: change_address.script_pubkey(),
            });
        }

        Ok(UnsignedTransaction {
            tx: Transaction::new(inputs, outputs),
            input_addresses,
            fee: self.fee,
            change,
        })
    }
}

/// The `SIGHASH_ALL` digest of every input, signed by the matching key.
///
/// Each key must hash to the address recorded for its input.
pub fn compute_sighashes(
    unsigned: &UnsignedTransaction,
    public_keys: &[PublicKey],
) -> Result<Vec<[u8; 32]>, WalletError> {
    let inputs = unsigned.tx.inputs.len();
    if public_keys.len() != inputs {
        return Err(WalletError::ProtocolMismatch(format!(
            "{} public keys for {inputs} inputs",
            public_keys.len()
        )));
    }
    check_input_owners(unsigned, public_keys)?;
    public_keys
        .iter()
        .enumerate()
        .map(|(i, pk)| -> Result<[u8; 32], WalletError> {
            let script_code = p2pkh_script(&pk.pubkey_hash());
            Ok(unsigned.tx.legacy_sighash(i, &script_code, SIGHASH_ALL)?)
        })
        .collect()
}

/// Embed `<DER(sig) ‖ 0x01> <pubkey>` into every input.
///
/// Every signature is checked against its input's digest first; nothing is
/// assembled if any of them fails.
pub fn assemble_signed(
    unsigned: &UnsignedTransaction,
    public_keys: &[PublicKey],
    signatures: &[Signature],
) -> Result<SignedTransaction, WalletError> {
    let inputs = unsigned.tx.inputs.len();
    if signatures.len() != inputs || public_keys.len() != inputs {
        return Err(WalletError::ProtocolMismatch(format!(
            "{} signatures and {} public keys for {inputs} inputs",
            signatures.len(),
            public_keys.len()
        )));
    }
    let sighashes = compute_sighashes(unsigned, public_keys)?;

    let mut tx = unsigned.tx.clone();
    for (i, ((input, pk), sig)) in tx
        .inputs
        .iter_mut()
        .zip(public_keys)
        .zip(signatures)
        .enumerate()
    {
        pk.verify_prehash(&sighashes[i], sig).map_err(|e| {
            WalletError::ProtocolMismatch(format!("signature for input {i}: {e}"))
        })?;
        let mut der = sig.to_der();
        der.push(SIGHASH_ALL as u8);
        input.script_sig = p2pkh_script_sig(&der, pk.as_bytes());
    }
    Ok(SignedTransaction { tx })
}

fn check_input_owners(
    unsigned: &UnsignedTransaction,
    public_keys: &[PublicKey],
) -> Result<(), WalletError> {
    if unsigned.input_addresses.len() != public_keys.len() {
        return Err(WalletError::ProtocolMismatch(format!(
            "{} input addresses for {} public keys",
            unsigned.input_addresses.len(),
            public_keys.len()
        )));
    }
    for (i, (address, pk)) in unsigned.input_addresses.iter().zip(public_keys).enumerate() {
        let address: Address = address.parse()?;
        if address.pubkey_hash() != &pk.pubkey_hash() {
            return Err(WalletError::ProtocolMismatch(format!(
                "public key for input {i} does not match {address}"
            )));
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use bunkr_core::address::Network;
    use bunkr_core::crypto::KeyPair;
    use bunkr_core::types::Utxo;
    use k256::ecdsa::SigningKey;
    use k256::ecdsa::signature::hazmat::PrehashSigner;

    use crate::wallet::AccountStatus;

    struct TestKey {
        secret: [u8; 32],
        keypair: KeyPair,
        address: Address,
    }

    fn test_key(seed: u8) -> TestKey {
        let mut secret = [0u8; 32];
        secret[0] = 0x01;
        secret[31] = seed;
        let keypair = KeyPair::from_secret_bytes(&secret, true).unwrap();
        let address = Address::from_public_key(keypair.public_key(), Network::Testnet);
        TestKey {
            secret,
            keypair,
            address,
        }
    }

    fn sign(key: &TestKey, hash: &[u8; 32]) -> Signature {
        let sk = SigningKey::from_slice(&key.secret).unwrap();
        let sig: k256::ecdsa::Signature = sk.sign_prehash(hash).unwrap();
        let (r, s) = sig.split_bytes();
        let mut rb = [0u8; 32];
        let mut sb = [0u8; 32];
        rb.copy_from_slice(&r);
        sb.copy_from_slice(&s);
        Signature::from_scalars(rb, sb).unwrap()
    }

    fn account_for(key: &TestKey) -> Account {
        Account {
            address: key.address.encode(),
            public_key_hex: key.keypair.public_key().to_hex(),
            secret_reference: key.address.encode(),
            status: AccountStatus::InUse,
        }
    }

    fn funding(key: &TestKey, values: &[u64]) -> FundingAccount {
        FundingAccount {
            account: account_for(key),
            utxos: values
                .iter()
                .enumerate()
                .map(|(i, &value)| Utxo {
                    txid: Txid([key.secret[31]; 32]),
                    output_index: i as u32,
                    value,
                })
                .collect(),
        }
    }

    fn recipient() -> Address {
        Address::from_pubkey_hash([0x5A; 20], Network::Testnet)
    }

    // --- build_unsigned ---

    #[test]
    fn change_output_when_inputs_exceed_target() {
        let (a, change) = (test_key(1), test_key(2));
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 50_000)
            .set_fee(1_000)
            .build_unsigned(&[funding(&a, &[60_000])], &account_for(&change))
            .unwrap();
        assert_eq!(unsigned.tx.inputs.len(), 1);
        assert_eq!(unsigned.tx.outputs.len(), 2);
        assert_eq!(unsigned.tx.outputs[0].value, 50_000);
        assert_eq!(unsigned.tx.outputs[0].script_pubkey, recipient().script_pubkey());
        assert_eq!(unsigned.tx.outputs[1].value, 9_000);
        assert_eq!(unsigned.tx.outputs[1].script_pubkey, change.address.script_pubkey());
        assert_eq!(unsigned.change, 9_000);
        assert_eq!(unsigned.input_addresses, vec![a.address.encode()]);
    }

    #[test]
    fn no_change_on_exact_match() {
        let (a, change) = (test_key(1), test_key(2));
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 99_000)
            .set_fee(1_000)
            .build_unsigned(&[funding(&a, &[40_000, 60_000])], &account_for(&change))
            .unwrap();
        assert_eq!(unsigned.tx.outputs.len(), 1);
        assert_eq!(unsigned.change, 0);
        assert_eq!(unsigned.tx.inputs.len(), 2);
    }

    #[test]
    fn inputs_follow_account_then_explorer_order() {
        let (a, b, change) = (test_key(1), test_key(3), test_key(2));
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 10)
            .build_unsigned(
                &[funding(&b, &[5, 6]), funding(&a, &[7])],
                &account_for(&change),
            )
            .unwrap();
        let outpoints: Vec<(u8, u32)> = unsigned
            .tx
            .inputs
            .iter()
            .map(|i| (i.previous_output.txid.0[0], i.previous_output.vout))
            .collect();
        assert_eq!(outpoints, vec![(3, 0), (3, 1), (1, 0)]);
        assert_eq!(
            unsigned.input_addresses,
            vec![b.address.encode(), b.address.encode(), a.address.encode()]
        );
    }

    #[test]
    fn short_inputs_are_a_protocol_mismatch() {
        let (a, change) = (test_key(1), test_key(2));
        let err = TransactionBuilder::new()
            .add_recipient(recipient(), 50_000)
            .set_fee(1_000)
            .build_unsigned(&[funding(&a, &[50_500])], &account_for(&change))
            .unwrap_err();
        assert!(matches!(err, WalletError::ProtocolMismatch(_)));
    }

    #[test]
    fn target_validation() {
        assert!(matches!(
            TransactionBuilder::new().target(),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            TransactionBuilder::new().add_recipient(recipient(), 0).target(),
            Err(WalletError::InvalidAmount(_))
        ));
        assert!(matches!(
            TransactionBuilder::new()
                .add_recipient(recipient(), u64::MAX)
                .set_fee(1)
                .target(),
            Err(WalletError::InvalidAmount(_))
        ));
        assert_eq!(
            TransactionBuilder::new()
                .add_recipient(recipient(), 10)
                .add_recipient(recipient(), 20)
                .set_fee(5)
                .target()
                .unwrap(),
            35
        );
    }

    // --- sighashes and assembly ---

    fn two_input_tx() -> (TestKey, TestKey, UnsignedTransaction) {
        let (a, b, change) = (test_key(1), test_key(3), test_key(2));
        let unsigned = TransactionBuilder::new()
            .add_recipient(recipient(), 70_000)
            .set_fee(500)
            .build_unsigned(
                &[funding(&a, &[50_000]), funding(&b, &[30_000])],
                &account_for(&change),
            )
            .unwrap();
        (a, b, unsigned)
    }

    #[test]
    fn sighash_count_mismatch() {
        let (a, _, unsigned) = two_input_tx();
        let err = compute_sighashes(&unsigned, &[a.keypair.public_key().clone()]).unwrap_err();
        assert!(matches!(err, WalletError::ProtocolMismatch(_)));
    }

    #[test]
    fn sighash_rejects_key_for_wrong_input() {
        let (a, b, unsigned) = two_input_tx();
        let swapped = [b.keypair.public_key().clone(), a.keypair.public_key().clone()];
        assert!(matches!(
            compute_sighashes(&unsigned, &swapped),
            Err(WalletError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn sighashes_are_per_input() {
        let (a, b, unsigned) = two_input_tx();
        let keys = [a.keypair.public_key().clone(), b.keypair.public_key().clone()];
        let hashes = compute_sighashes(&unsigned, &keys).unwrap();
        assert_eq!(hashes.len(), 2);
        assert_ne!(hashes[0], hashes[1]);
        let expected = unsigned
            .tx
            .legacy_sighash(1, &b.address.script_pubkey(), SIGHASH_ALL)
            .unwrap();
        assert_eq!(hashes[1], expected);
    }

    #[test]
    fn assemble_embeds_der_and_pubkey() {
        let (a, b, unsigned) = two_input_tx();
        let keys = [a.keypair.public_key().clone(), b.keypair.public_key().clone()];
        let hashes = compute_sighashes(&unsigned, &keys).unwrap();
        let sigs = [sign(&a, &hashes[0]), sign(&b, &hashes[1])];
        let signed = assemble_signed(&unsigned, &keys, &sigs).unwrap();

        let parsed = Transaction::deserialize(&signed.to_bytes()).unwrap();
        assert_eq!(parsed.inputs.len(), 2);
        for (i, input) in parsed.inputs.iter().enumerate() {
            let script = &input.script_sig;
            let sig_len = script[0] as usize;
            let der = &script[1..sig_len];
            assert_eq!(script[sig_len], 0x01);
            assert_eq!(Signature::from_der(der).unwrap(), sigs[i]);
            let pk_len = script[1 + sig_len] as usize;
            assert_eq!(&script[2 + sig_len..2 + sig_len + pk_len], keys[i].as_bytes());
        }
        assert_eq!(signed.to_hex(), hex::encode(signed.to_bytes()));
        // Signing does not change the outputs.
        assert_eq!(parsed.outputs, unsigned.tx.outputs);
    }

    #[test]
    fn assemble_length_check_runs_first() {
        let (a, b, unsigned) = two_input_tx();
        let keys = [a.keypair.public_key().clone(), b.keypair.public_key().clone()];
        let one = [sign(&a, &[0u8; 32])];
        assert!(matches!(
            assemble_signed(&unsigned, &keys, &one),
            Err(WalletError::ProtocolMismatch(_))
        ));
    }

    #[test]
    fn assemble_rejects_signature_over_wrong_digest() {
        let (a, b, unsigned) = two_input_tx();
        let keys = [a.keypair.public_key().clone(), b.keypair.public_key().clone()];
        let hashes = compute_sighashes(&unsigned, &keys).unwrap();
        // Input 1 signed with the right key but over input 0's digest.
        let sigs = [sign(&a, &hashes[0]), sign(&b, &hashes[0])];
        let err = assemble_signed(&unsigned, &keys, &sigs).unwrap_err();
        assert!(matches!(err, WalletError::ProtocolMismatch(ref m) if m.contains("input 1")));
    }
}
