//! Criterion benchmarks for bunkr-core hot paths.
//!
//! Covers: Base58Check address encoding/decoding, legacy sighash over a
//! many-input transaction, and DER signature encoding.

use criterion::{Criterion, black_box, criterion_group, criterion_main};

use bunkr_core::address::{Address, Network};
use bunkr_core::constants::{HALF_CURVE_ORDER, SIGHASH_ALL};
use bunkr_core::crypto::Signature;
use bunkr_core::types::{OutPoint, Transaction, TxIn, TxOut, Txid, p2pkh_script};

fn sample_transaction(inputs: usize) -> Transaction {
    Transaction::new(
        (0..inputs)
            .map(|i| {
                TxIn::unsigned(OutPoint {
                    txid: Txid([i as u8; 32]),
                    vout: i as u32,
                })
            })
            .collect(),
        vec![
            TxOut {
                value: 90_000,
                script_pubkey: p2pkh_script(&[0xAA; 20]),
            },
            TxOut {
                value: 5_000,
                script_pubkey: p2pkh_script(&[0xBB; 20]),
            },
        ],
    )
}

fn bench_address(c: &mut Criterion) {
    let addr = Address::from_pubkey_hash([0x42; 20], Network::Mainnet);
    let encoded = addr.encode();

    c.bench_function("address_encode", |b| b.iter(|| black_box(&addr).encode()));

    c.bench_function("address_decode", |b| {
        b.iter(|| Address::decode(black_box(&encoded)))
    });
}

fn bench_sighash(c: &mut Criterion) {
    let tx = sample_transaction(50);
    let code = p2pkh_script(&[0xCC; 20]);

    c.bench_function("legacy_sighash_50_inputs_all", |b| {
        b.iter(|| {
            (0..tx.inputs.len())
                .map(|i| tx.legacy_sighash(i, black_box(&code), SIGHASH_ALL))
                .collect::<Vec<_>>()
        })
    });
}

fn bench_der(c: &mut Criterion) {
    let sig = Signature::from_scalars(HALF_CURVE_ORDER, HALF_CURVE_ORDER).unwrap();
    let der = sig.to_der();

    c.bench_function("der_encode", |b| b.iter(|| black_box(&sig).to_der()));

    c.bench_function("der_parse", |b| {
        b.iter(|| Signature::from_der(black_box(&der)))
    });
}

criterion_group!(benches, bench_address, bench_sighash, bench_der);
criterion_main!(benches);
