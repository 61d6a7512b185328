use std::fs;
use std::path::Path;

use error_stack::{Result, ResultExt};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use k256::SecretKey;
use rand::rngs::OsRng;
use sha3::{Digest, Keccak256};

use super::Error;

pub const KEYSTORE_FILE: &str = "keystore";

/// Fresh secp256k1 key material for one instance.
pub struct Keystore {
    secret: SecretKey,
}

impl Keystore {
    pub fn generate() -> Self {
        Self {
            secret: SecretKey::random(&mut OsRng),
        }
    }

    pub fn from_hex(hex_key: &str) -> Result<Self, Error> {
        let bytes = hex::decode(hex_key.trim().trim_start_matches("0x"))
            .change_context(Error::Keystore)?;
        let secret = SecretKey::from_slice(&bytes).change_context(Error::Keystore)?;

        Ok(Self { secret })
    }

    /// The EVM address of the key: the last 20 bytes of the keccak256 hash of the uncompressed public key.
    pub fn identity(&self) -> String {
        let point = self.secret.public_key().to_encoded_point(false);
        // skip the 0x04 prefix of the uncompressed encoding
        let hash = Keccak256::digest(&point.as_bytes()[1..]);

        format!("0x{}", hex::encode(&hash[12..]))
    }

    /// Writes the hex encoded private key into `dir` and returns the identity it belongs to.
    pub fn write_to(&self, dir: &Path) -> Result<String, Error> {
        let path = dir.join(KEYSTORE_FILE);

        fs::write(&path, hex::encode(self.secret.to_bytes()))
            .change_context(Error::Keystore)
            .attach_printable_lazy(|| path.display().to_string())?;

        Ok(self.identity())
    }
}
