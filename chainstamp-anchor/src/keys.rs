//! Key material for the anchoring wallet.

use bitcoin::secp256k1::{All, Secp256k1};
use bitcoin::{Address, NetworkKind, PrivateKey, PublicKey, ScriptBuf};

use crate::config::Network;
use crate::errors::{AnchorError, Result};

/// A key pair and the pay-to-pubkey-hash address it controls.
pub struct KeyMaterial {
    private_key: PrivateKey,
    public_key: PublicKey,
    address: Address,
    secp: Secp256k1<All>,
}

impl KeyMaterial {
    /// Decode a WIF private key for the given network.
    pub fn from_wif(wif: &str, network: Network) -> Result<Self> {
        let private_key = PrivateKey::from_wif(wif.trim())
            .map_err(|e| AnchorError::InvalidKey(e.to_string()))?;

        let expected = NetworkKind::from(network.to_bitcoin_network());
        if private_key.network != expected {
            return Err(AnchorError::InvalidKey(format!(
                "key is not encoded for {}",
                network.name()
            )));
        }

        let secp = Secp256k1::new();
        let public_key = private_key.public_key(&secp);
        let address = Address::p2pkh(public_key.pubkey_hash(), expected);

        Ok(Self {
            private_key,
            public_key,
            address,
            secp,
        })
    }

    /// The anchoring address.
    pub fn address(&self) -> &Address {
        &self.address
    }

    /// Locking script of the anchoring address.
    pub fn script_pubkey(&self) -> ScriptBuf {
        self.address.script_pubkey()
    }

    /// The public key.
    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    pub(crate) fn private_key(&self) -> &PrivateKey {
        &self.private_key
    }

    pub(crate) fn secp(&self) -> &Secp256k1<All> {
        &self.secp
    }
}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("address", &self.address.to_string())
            .finish_non_exhaustive()
    }
}
