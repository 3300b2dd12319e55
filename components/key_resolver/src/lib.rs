//! Key material: private key → public key → account address.
//!
//! The private scalar stays inside [`KeyPair`]; callers get the address, the public key and a
//! signing operation, never the secret itself.

use common::{ChainError, ChainResult};
use ethers::core::k256::ecdsa::SigningKey;
use ethers::core::k256::elliptic_curve::sec1::ToEncodedPoint;
use ethers::signers::{LocalWallet, Signer};
use ethers::types::transaction::eip2718::TypedTransaction;
use ethers::types::{Address, Signature};
use ethers::utils::hex;

pub const PRIVATE_KEY_LEN: usize = 32;

pub struct KeyPair {
    wallet: LocalWallet,
}

impl KeyPair {
    pub fn address(&self) -> Address {
        self.wallet.address()
    }

    /// Uncompressed SEC1 encoding (`0x04 || x || y`).
    pub fn public_key(&self) -> Vec<u8> {
        self.wallet
            .signer()
            .verifying_key()
            .to_encoded_point(false)
            .as_bytes()
            .to_vec()
    }

    /// Signs `tx` for the chain ID set on it (EIP-155).
    pub fn sign_transaction(&self, tx: &TypedTransaction) -> ChainResult<Signature> {
        if tx.chain_id().is_none() {
            return Err(ChainError::Signing(
                "Transaction has no chain ID to bind the signature to".to_string(),
            ));
        }

        self.wallet
            .sign_transaction_sync(tx)
            .map_err(|e| ChainError::Signing(e.to_string()))
    }
}

impl std::fmt::Debug for KeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyPair")
            .field("address", &self.address())
            .finish_non_exhaustive()
    }
}

/// Derives the key pair for a raw 32-byte private scalar.
pub fn derive_key_pair(private_key: &[u8]) -> ChainResult<KeyPair> {
    if private_key.len() != PRIVATE_KEY_LEN {
        return Err(ChainError::InvalidKey(format!(
            "Expected {} bytes, got {}",
            PRIVATE_KEY_LEN,
            private_key.len()
        )));
    }

    // rejects zero and anything at or above the curve order
    let signing_key = SigningKey::from_slice(private_key).map_err(|_| {
        ChainError::InvalidKey("Not a valid secp256k1 private scalar".to_string())
    })?;

    let key_pair = KeyPair {
        wallet: LocalWallet::from(signing_key),
    };

    log::debug!("Derived key pair for {:?}", key_pair.address());

    Ok(key_pair)
}

/// Hex-encoded private key, with or without `0x`.
pub fn key_pair_from_hex(private_key_hex: &str) -> ChainResult<KeyPair> {
    let private_key_hex = private_key_hex.trim();
    let digits = private_key_hex
        .strip_prefix("0x")
        .unwrap_or(private_key_hex);

    let bytes = hex::decode(digits)
        .map_err(|_| ChainError::InvalidKey("Private key is not valid hex".to_string()))?;

    derive_key_pair(&bytes)
}

pub fn address_of(key_pair: &KeyPair) -> Address {
    key_pair.address()
}
