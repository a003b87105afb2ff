//! Deterministic wallet derivation from a BIP-39 seed phrase.
//!
//! Wallet `i` lives at `m/44'/60'/0'/25446/i`. Its address is the EIP-55
//! checksummed Keccak-256 address of the public key; its public identifier
//! is `indra` + base58check of the compressed public key.

use std::fmt;
use std::str::FromStr;

use bip32::{DerivationPath, XPrv};
use bip39::Mnemonic;
use k256::ecdsa::SigningKey;
use serde::{Deserialize, Serialize};
use sha3::{Digest, Keccak256};

use cg_domain::error::{Error, Result};

pub const DERIVATION_PREFIX: &str = "m/44'/60'/0'/25446";
pub const IDENTIFIER_PREFIX: &str = "indra";

/// A derived wallet and its signing material.
#[derive(Clone)]
pub struct Wallet {
    pub index: u32,
    pub address: String,
    pub public_identifier: String,
    pub derivation_path: String,
    signing_key: SigningKey,
}

/// What callers get back from wallet creation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletSummary {
    pub index: u32,
    pub address: String,
    pub public_identifier: String,
}

impl Wallet {
    /// Derive wallet `index` from `seed_phrase`.
    pub fn derive(seed_phrase: &str, index: u32) -> Result<Self> {
        Self::derive_at(seed_phrase, index, &format!("{DERIVATION_PREFIX}/{index}"))
    }

    pub(crate) fn derive_at(seed_phrase: &str, index: u32, path: &str) -> Result<Self> {
        let mnemonic = parse_seed_phrase(seed_phrase)?;
        let seed = mnemonic.to_seed_normalized("");

        let derivation_path = DerivationPath::from_str(path)
            .map_err(|e| Error::InvalidParam(format!("derivation path {path}: {e}")))?;
        let child = XPrv::derive_from_path(seed, &derivation_path)
            .map_err(|e| Error::Other(format!("deriving {path}: {e}")))?;

        let signing_key = child.private_key().clone();
        let verifying_key = signing_key.verifying_key();
        let uncompressed = verifying_key.to_encoded_point(false);
        let compressed = verifying_key.to_encoded_point(true);

        let hash = Keccak256::digest(&uncompressed.as_bytes()[1..]);
        let address = checksum_address(&hash[12..]);
        let public_identifier = format!(
            "{IDENTIFIER_PREFIX}{}",
            bs58::encode(compressed.as_bytes()).with_check().into_string()
        );

        Ok(Self {
            index,
            address,
            public_identifier,
            derivation_path: path.to_owned(),
            signing_key,
        })
    }

    pub fn signing_key(&self) -> &SigningKey {
        &self.signing_key
    }

    pub fn summary(&self) -> WalletSummary {
        WalletSummary {
            index: self.index,
            address: self.address.clone(),
            public_identifier: self.public_identifier.clone(),
        }
    }
}

impl PartialEq for Wallet {
    fn eq(&self, other: &Self) -> bool {
        self.index == other.index
            && self.address == other.address
            && self.public_identifier == other.public_identifier
            && self.derivation_path == other.derivation_path
    }
}

impl Eq for Wallet {}

impl fmt::Debug for Wallet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Wallet")
            .field("index", &self.index)
            .field("address", &self.address)
            .field("public_identifier", &self.public_identifier)
            .field("derivation_path", &self.derivation_path)
            .finish_non_exhaustive()
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Seed phrases
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Collapse whitespace and case so equal phrases compare equal.
pub fn normalize_seed_phrase(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

fn parse_seed_phrase(phrase: &str) -> Result<Mnemonic> {
    Mnemonic::parse_normalized(&normalize_seed_phrase(phrase))
        .map_err(|e| Error::InvalidParam(format!("seed phrase: {e}")))
}

/// Check that `phrase` is a valid BIP-39 English mnemonic.
pub fn validate_seed_phrase(phrase: &str) -> Result<()> {
    parse_seed_phrase(phrase).map(|_| ())
}

/// Generate a fresh 12-word seed phrase.
pub fn generate_seed_phrase() -> Result<String> {
    let entropy: [u8; 16] = rand::random();
    let mnemonic = Mnemonic::from_entropy(&entropy)
        .map_err(|e| Error::Other(format!("generating seed phrase: {e}")))?;
    Ok(mnemonic.to_string())
}

/// EIP-55 mixed-case checksum encoding of a 20-byte address.
fn checksum_address(address: &[u8]) -> String {
    let lower = hex::encode(address);
    let hash = Keccak256::digest(lower.as_bytes());

    let mut out = String::with_capacity(2 + lower.len());
    out.push_str("0x");
    for (i, c) in lower.chars().enumerate() {
        let nibble = if i % 2 == 0 {
            hash[i / 2] >> 4
        } else {
            hash[i / 2] & 0x0f
        };
        if c.is_ascii_alphabetic() && nibble >= 8 {
            out.push(c.to_ascii_uppercase());
        } else {
            out.push(c);
        }
    }
    out
}
