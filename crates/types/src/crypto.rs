use num_bigint::BigUint;

use crate::{Error, Result};

/// The RFC-3526 2048-bit MODP prime, as a hex string.
///
/// Interoperating members must agree on this modulus and on [`GroupParams::modp_2048`]'s
/// generator, or negotiate a group out of band.
pub const MODP_2048_HEX: &str = "FFFFFFFFFFFFFFFFC90FDAA22168C234C4C6628B80DC1CD129024E088A67CC74020BBEA63B139B22514A08798E3404DDEF9519B3CD3A431B302B0A6DF25F14374FE1356D6D51C245E485B576625E7EC6F44C42E9A637ED6B0BFF5CB6F406B7EDEE386BFB5A899FA5AE9F24117C4B1FE649286651ECE45B3DC2007CB8A163BF0598DA48361C55D39A69163FA8FD24CF5F83655D23DCA3AD961C62F356208552BB9ED529077096966D670C354E4ABC9804F1746C08CA18217C32905E462E36CE3BE39E772C180E86039B2783A2EC07A28FB5C55DF06F4C52C9DE2BCBF6955817183995497CEA956AE515D2261898FA051015728E5A8AACAA68FFFFFFFFFFFFFFFF";

/// The multiplicative group all key material lives in.
///
/// Every exponentiation in the protocol is either a blinding (`g^key mod p`) or a
/// mixing (`bkey^key mod p`); both are provided here so callers never touch the
/// modulus directly.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupParams {
    g: BigUint,
    p: BigUint,
}

impl GroupParams {
    /// Creates a group from an explicit generator and modulus.
    pub fn new(g: BigUint, p: BigUint) -> Result<Self> {
        if p <= BigUint::from(3u32) {
            return Err(Error::Structure("group modulus is too small".into()));
        }

        if g <= BigUint::from(1u32) || g >= p {
            return Err(Error::Structure(
                "group generator is outside the modulus range".into(),
            ));
        }

        Ok(Self { g, p })
    }

    /// The production group: `g = 2` over the RFC-3526 2048-bit MODP prime.
    pub fn modp_2048() -> Self {
        let p = BigUint::parse_bytes(MODP_2048_HEX.as_bytes(), 16)
            .expect("fixed modulus constant parses");

        Self {
            g: BigUint::from(2u32),
            p,
        }
    }

    /// A hand-checkable group (`g = 5, p = 23`).
    ///
    /// Far too small for any real use; it exists so tests can verify derived
    /// values on paper.
    pub fn toy() -> Self {
        Self {
            g: BigUint::from(5u32),
            p: BigUint::from(23u32),
        }
    }

    /// The group generator.
    pub fn generator(&self) -> &BigUint {
        &self.g
    }

    /// The group modulus.
    pub fn modulus(&self) -> &BigUint {
        &self.p
    }

    /// Blinds a private key: `g^key mod p`.
    pub fn blind(&self, key: &BigUint) -> BigUint {
        self.g.modpow(key, &self.p)
    }

    /// Mixes a received blinded key with a private key: `bkey^key mod p`.
    ///
    /// This is the derivation step of the key recurrence; both children of a
    /// node arrive at the same value.
    pub fn mix(&self, bkey: &BigUint, key: &BigUint) -> BigUint {
        bkey.modpow(key, &self.p)
    }

    /// The largest scalar a source may yield, `p - 2`.
    pub fn max_scalar(&self) -> BigUint {
        &self.p - 2u32
    }
}

#[cfg(feature = "blake3")]
pub use digest::*;

#[cfg(feature = "blake3")]
mod digest {
    use num_bigint::BigUint;

    /// The byte-length of key fingerprints.
    pub const FINGERPRINT_LEN: usize = 32;

    /// A short commitment to a key, safe to log and compare.
    pub type Fingerprint = [u8; FINGERPRINT_LEN];

    /// Domain prefix for key fingerprints.
    pub const FINGERPRINT_PREFIX: &[u8] = b"tgdh-key";

    /// Computes the fingerprint of a key.
    ///
    /// Raw key material never reaches logs or rendered trees; only these
    /// digests do.
    pub fn fingerprint(value: &BigUint) -> Fingerprint {
        blake3::Hasher::new()
            .update(FINGERPRINT_PREFIX)
            .update(&value.to_bytes_be())
            .finalize()
            .into()
    }
}

#[test]
fn toy_group_blinds_and_mixes() {
    let params = GroupParams::toy();

    // 5^3 mod 23 and 5^4 mod 23
    let a = params.blind(&BigUint::from(3u32));
    let b = params.blind(&BigUint::from(4u32));

    assert_eq!(a, BigUint::from(10u32));
    assert_eq!(b, BigUint::from(4u32));

    // both sides of the exchange agree on 5^12 mod 23 = 18
    let left = params.mix(&a, &BigUint::from(4u32));
    let right = params.mix(&b, &BigUint::from(3u32));

    assert_eq!(left, BigUint::from(18u32));
    assert_eq!(left, right);
}

#[test]
fn group_validation_rejects_degenerate_parameters() {
    assert!(GroupParams::new(BigUint::from(2u32), BigUint::from(3u32)).is_err());
    assert!(GroupParams::new(BigUint::from(1u32), BigUint::from(23u32)).is_err());
    assert!(GroupParams::new(BigUint::from(23u32), BigUint::from(23u32)).is_err());
    assert!(GroupParams::new(BigUint::from(5u32), BigUint::from(23u32)).is_ok());
}
