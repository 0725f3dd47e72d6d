//! P-256 key agreement for the PIN/UV subprotocol
//!
//! The platform generates an ephemeral key pair, exchanges public keys with
//! the authenticator (COSE_Key, kty EC2 / crv P-256), and derives the shared
//! point. Per CTAP, the raw shared secret is the x-coordinate of the ECDH
//! result; protocol-specific key derivation happens in [`crate::pin_protocol`].

use crate::error::{CryptoError, Result};

use p256::elliptic_curve::generic_array::GenericArray;
use p256::elliptic_curve::sec1::{FromEncodedPoint, ToEncodedPoint};
use p256::{EncodedPoint, PublicKey, SecretKey};
use rand::rngs::OsRng;
use zeroize::Zeroizing;

/// Ephemeral platform key pair
pub struct KeyPair {
    secret: SecretKey,
    public: PublicKey,
}

impl KeyPair {
    /// Generate a fresh random key pair
    pub fn generate() -> Self {
        let secret = SecretKey::random(&mut OsRng);
        let public = secret.public_key();
        Self { secret, public }
    }

    /// Public key as COSE coordinates (x, y), 32 bytes each
    pub fn public_key_cose(&self) -> ([u8; 32], [u8; 32]) {
        let point = self.public.to_encoded_point(false);
        let mut x = [0u8; 32];
        let mut y = [0u8; 32];
        x.copy_from_slice(point.x().expect("uncompressed point has x"));
        y.copy_from_slice(point.y().expect("uncompressed point has y"));
        (x, y)
    }

    /// Derive the shared secret with a peer key given as COSE coordinates
    ///
    /// Returns the x-coordinate of the ECDH result, zeroized on drop.
    pub fn shared_secret(&self, peer_x: &[u8], peer_y: &[u8]) -> Result<Zeroizing<[u8; 32]>> {
        if peer_x.len() != 32 || peer_y.len() != 32 {
            return Err(CryptoError::InvalidPublicKey);
        }

        let point = EncodedPoint::from_affine_coordinates(
            GenericArray::from_slice(peer_x),
            GenericArray::from_slice(peer_y),
            false,
        );
        let peer: Option<PublicKey> = PublicKey::from_encoded_point(&point).into();
        let peer = peer.ok_or(CryptoError::InvalidPublicKey)?;

        let shared =
            p256::ecdh::diffie_hellman(self.secret.to_nonzero_scalar(), peer.as_affine());

        let mut z = Zeroizing::new([0u8; 32]);
        z.copy_from_slice(shared.raw_secret_bytes());
        Ok(z)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_key_agreement() {
        let platform = KeyPair::generate();
        let device = KeyPair::generate();

        let (px, py) = platform.public_key_cose();
        let (dx, dy) = device.public_key_cose();

        let a = platform.shared_secret(&dx, &dy).unwrap();
        let b = device.shared_secret(&px, &py).unwrap();
        assert_eq!(*a, *b);
        assert_ne!(*a, [0u8; 32]);
    }

    #[test]
    fn test_different_peers_differ() {
        let platform = KeyPair::generate();
        let (ax, ay) = KeyPair::generate().public_key_cose();
        let (bx, by) = KeyPair::generate().public_key_cose();

        let a = platform.shared_secret(&ax, &ay).unwrap();
        let b = platform.shared_secret(&bx, &by).unwrap();
        assert_ne!(*a, *b);
    }

    #[test]
    fn test_invalid_peer_rejected() {
        let platform = KeyPair::generate();
        assert!(platform.shared_secret(&[0u8; 32], &[0u8; 32]).is_err());
        assert!(platform.shared_secret(&[0u8; 16], &[0u8; 32]).is_err());
    }
}
