//! Public large-blob operations
//!
//! Each operation holds the device exclusively for its duration: fetch the
//! serialized array in fragments, apply the mutation in memory, write the
//! whole array back under a fresh authorization token. Writes are atomic at
//! the authenticator, so an aborted operation leaves the stored array
//! untouched.

use crate::blob::Blob;
use crate::credman;
use crate::device::{Device, NO_TIMEOUT};
use crate::entry::LargeBlobEntry;
use crate::error::{Error, Result};
use crate::transfer;

use zeroize::Zeroizing;

/// Length of a per-credential large-blob key
pub const KEY_LENGTH: usize = 32;

/// Client for the large-blob store of a FIDO2 authenticator
///
/// All methods are stateless and require exclusive access to a [`Device`].
pub struct Client;

impl Client {
    /// Read the blob stored under `key`
    ///
    /// Fails with [`Error::NotFound`] when no entry decrypts under `key`,
    /// including when the device-side array is missing or corrupt.
    pub fn get<D: Device + ?Sized>(dev: &mut D, key: &[u8]) -> Result<Blob> {
        let key = check_key(key)?;
        let array = transfer::read_array(dev, NO_TIMEOUT)?;
        array.find(&key)?.ok_or(Error::NotFound)
    }

    /// Store `plaintext` under `key`, replacing any existing entry
    ///
    /// A corrupt or missing device-side array is treated as empty, so the
    /// write repairs the store. `pin` authorizes the write where the
    /// authenticator requires it.
    pub fn put<D: Device + ?Sized>(
        dev: &mut D,
        key: &[u8],
        plaintext: &[u8],
        pin: Option<&str>,
    ) -> Result<()> {
        let key = check_key(key)?;
        if plaintext.is_empty() {
            return Err(Error::InvalidArgument);
        }

        let encoded = LargeBlobEntry::seal(&key, plaintext)?.encode()?;
        let mut array = transfer::read_array(dev, NO_TIMEOUT)?;
        array.insert(&key, encoded);
        transfer::write_array(dev, &array, pin, NO_TIMEOUT)
    }

    /// Remove the entry stored under `key`
    ///
    /// Removing a key that has no entry succeeds; the array is written back
    /// either way.
    pub fn remove<D: Device + ?Sized>(dev: &mut D, key: &[u8], pin: Option<&str>) -> Result<()> {
        let key = check_key(key)?;
        let mut array = transfer::read_array(dev, NO_TIMEOUT)?;
        array.remove(&key);
        transfer::write_array(dev, &array, pin, NO_TIMEOUT)
    }

    /// Drop entries that no resident credential can decrypt
    ///
    /// Collects the large-blob key of every resident credential, keeps the
    /// entries one of them decrypts, keeps entries that do not decode at
    /// all, and writes the filtered array back.
    pub fn trim<D: Device + ?Sized>(dev: &mut D, pin: Option<&str>) -> Result<()> {
        let keys = credman::largeblob_keys(dev, pin, NO_TIMEOUT)?;
        let key_refs: Vec<&[u8]> = keys.iter().map(|key| key.as_slice()).collect();

        let mut array = transfer::read_array(dev, NO_TIMEOUT)?;
        array.retain_decryptable(&key_refs);
        transfer::write_array(dev, &array, pin, NO_TIMEOUT)
    }
}

/// Copy the caller's key into an owned, zeroized buffer
fn check_key(key: &[u8]) -> Result<Zeroizing<[u8; KEY_LENGTH]>> {
    let key: [u8; KEY_LENGTH] = key.try_into().map_err(|_| Error::InvalidArgument)?;
    Ok(Zeroizing::new(key))
}
