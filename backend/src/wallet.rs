//! Local transaction signing.
//!
//! With a key configured, [`EvmRpcClient`](crate::rpc::EvmRpcClient) signs
//! every transaction itself and submits it with `eth_sendRawTransaction`,
//! so the node never needs an unlocked account.

use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_primitives::{Address, Bytes, TxKind, U256};
use alloy_signer::SignerSync;
use alloy_signer_local::{coins_bip39::English, MnemonicBuilder, PrivateKeySigner};
use std::fmt;

use crate::error::LedgerError;
use crate::ledger::TxRequest;

/// Where the signing key comes from.
#[derive(Clone, PartialEq, Eq)]
pub enum KeySource {
    /// Hex-encoded secp256k1 secret key.
    PrivateKey(String),
    /// BIP-39 phrase, derived along `m/44'/60'/0'/0/{index}`.
    Mnemonic { phrase: String, index: u32 },
}

impl fmt::Debug for KeySource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeySource::PrivateKey(_) => f.write_str("PrivateKey(<redacted>)"),
            KeySource::Mnemonic { index, .. } => {
                write!(f, "Mnemonic {{ phrase: <redacted>, index: {index} }}")
            }
        }
    }
}

/// Key plus the chain it signs for.
#[derive(Clone, Debug)]
pub struct Wallet {
    signer: PrivateKeySigner,
    chain_id: u64,
}

impl Wallet {
    pub fn from_source(source: &KeySource, chain_id: u64) -> Result<Self, LedgerError> {
        let signer = match source {
            KeySource::PrivateKey(key) => key
                .trim()
                .parse::<PrivateKeySigner>()
                .map_err(|e| LedgerError::Signer(format!("invalid private key: {e}")))?,
            KeySource::Mnemonic { phrase, index } => MnemonicBuilder::<English>::default()
                .phrase(phrase.trim())
                .index(*index)
                .and_then(|builder| builder.build())
                .map_err(|e| LedgerError::Signer(format!("invalid mnemonic: {e}")))?,
        };
        Ok(Self { signer, chain_id })
    }

    pub fn address(&self) -> Address {
        self.signer.address()
    }

    /// EIP-155 legacy transaction for `tx`, signed and 2718-encoded.
    pub fn sign(
        &self,
        tx: &TxRequest,
        nonce: u64,
        gas_limit: u64,
        gas_price: u128,
    ) -> Result<Bytes, LedgerError> {
        let legacy = TxLegacy {
            chain_id: Some(self.chain_id),
            nonce,
            gas_price,
            gas_limit,
            to: TxKind::Call(tx.to),
            value: U256::ZERO,
            input: tx.data.clone(),
        };
        let signature = self
            .signer
            .sign_hash_sync(&legacy.signature_hash())
            .map_err(|e| LedgerError::Signer(e.to_string()))?;
        let envelope = TxEnvelope::from(legacy.into_signed(signature));
        Ok(envelope.encoded_2718().into())
    }
}
