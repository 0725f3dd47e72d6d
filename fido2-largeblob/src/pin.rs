//! PIN/UV auth token acquisition
//!
//! Writing the large-blob array and enumerating resident credentials both
//! require a permission-scoped PIN/UV auth token. Acquisition runs the
//! clientPin subprotocol: generate an ephemeral P-256 key pair, fetch the
//! authenticator's key-agreement key, derive the shared secret, then exchange
//! either an encrypted PIN hash or built-in user verification for a token.
//! The token lives for the duration of one public operation and MACs each
//! request made under it.

use crate::cbor::{self, MapBuilder, Value};
use crate::device::{self, CMD_CLIENT_PIN, Device};
use crate::error::{Error, Result};

use sha2::{Digest, Sha256};
use zeroize::Zeroizing;

use fido2_largeblob_crypto::PinUvAuthProtocol;
use fido2_largeblob_crypto::ecdh::KeyPair;

/// clientPin subcommand: getKeyAgreement
const SUBCMD_KEY_AGREEMENT: u8 = 0x02;

/// clientPin subcommand: getPinUvAuthTokenUsingUvWithPermissions
const SUBCMD_TOKEN_WITH_UV: u8 = 0x06;

/// clientPin subcommand: getPinUvAuthTokenUsingPinWithPermissions
const SUBCMD_TOKEN_WITH_PIN: u8 = 0x09;

/// Permission flags for scoped PIN/UV auth tokens
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Permission {
    /// authenticatorMakeCredential
    MakeCredential = 0x01,
    /// authenticatorGetAssertion
    GetAssertion = 0x02,
    /// authenticatorCredentialManagement
    CredentialManagement = 0x04,
    /// authenticatorBioEnrollment
    BioEnrollment = 0x08,
    /// authenticatorLargeBlobs writes
    LargeBlobWrite = 0x10,
    /// authenticatorConfig
    AuthenticatorConfiguration = 0x20,
}

/// A PIN/UV auth token bound to the protocol it was issued under
///
/// The token bytes are zeroized on drop.
pub struct UvToken {
    protocol: PinUvAuthProtocol,
    token: Zeroizing<Vec<u8>>,
}

impl UvToken {
    /// Protocol the token was issued under
    pub fn protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }

    /// Compute the pinUvAuthParam for `data`
    pub fn authenticate(&self, data: &[u8]) -> Vec<u8> {
        self.protocol.authenticate(&self.token, data)
    }
}

/// Whether a token can be obtained for this device and PIN combination
///
/// True when a PIN is supplied and the device has one set, or when the
/// device performs built-in user verification and issues scoped tokens.
/// When false, operations proceed without a token; the authenticator decides
/// whether to accept the unauthenticated request.
pub(crate) fn can_get_uv_token<D: Device + ?Sized>(dev: &D, pin: Option<&str>) -> bool {
    (pin.is_some() && dev.supports_pin()) || (dev.supports_uv() && dev.supports_uv_token())
}

/// Obtain a token scoped to `permission`
///
/// Performs key agreement and the PIN or UV token exchange. Called at most
/// once per public operation.
pub(crate) fn get_uv_token<D: Device + ?Sized>(
    dev: &mut D,
    permission: Permission,
    pin: Option<&str>,
    timeout_ms: i32,
) -> Result<UvToken> {
    let protocol = dev.pin_uv_auth_protocol();

    let platform = KeyPair::generate();
    let (device_x, device_y) = get_key_agreement(dev, protocol, timeout_ms)?;
    let z = platform
        .shared_secret(&device_x, &device_y)
        .map_err(|_| Error::Internal)?;

    let (platform_x, platform_y) = platform.public_key_cose();
    let builder = MapBuilder::new()
        .insert(1, protocol.id())?
        .insert_raw(3, cose_key(&platform_x, &platform_y)?)
        .insert(9, permission as u8)?;

    let request = match pin {
        Some(pin) => {
            let mut pin_hash = Zeroizing::new([0u8; 16]);
            pin_hash.copy_from_slice(&Sha256::digest(pin.as_bytes())[..16]);
            let pin_hash_enc = protocol.encrypt(&z, pin_hash.as_slice())?;
            builder
                .insert(2, SUBCMD_TOKEN_WITH_PIN)?
                .insert_bytes(6, &pin_hash_enc)?
                .build()?
        }
        None => builder.insert(2, SUBCMD_TOKEN_WITH_UV)?.build()?,
    };

    let reply = device::transact(dev, CMD_CLIENT_PIN, &request, timeout_ms)?;
    let value: Value = cbor::decode(&reply)?;
    let token_enc = cbor::map_value(&value, 2)
        .and_then(cbor::value_bytes)
        .ok_or(Error::Rx)?;

    let token = Zeroizing::new(protocol.decrypt(&z, token_enc)?);
    Ok(UvToken { protocol, token })
}

/// Fetch the authenticator's key-agreement key, returning its coordinates
fn get_key_agreement<D: Device + ?Sized>(
    dev: &mut D,
    protocol: PinUvAuthProtocol,
    timeout_ms: i32,
) -> Result<(Vec<u8>, Vec<u8>)> {
    let request = MapBuilder::new()
        .insert(1, protocol.id())?
        .insert(2, SUBCMD_KEY_AGREEMENT)?
        .build()?;

    let reply = device::transact(dev, CMD_CLIENT_PIN, &request, timeout_ms)?;
    let value: Value = cbor::decode(&reply)?;
    let cose = cbor::map_value(&value, 1).ok_or(Error::Rx)?;

    let x = cose_coordinate(cose, -2).ok_or(Error::Rx)?;
    let y = cose_coordinate(cose, -3).ok_or(Error::Rx)?;
    Ok((x.to_vec(), y.to_vec()))
}

/// Encode a platform public key as a COSE_Key
/// (kty EC2, alg ECDH-ES+HKDF-256, crv P-256)
fn cose_key(x: &[u8; 32], y: &[u8; 32]) -> Result<Vec<u8>> {
    let map = Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(2.into())),
        (Value::Integer(3.into()), Value::Integer((-25).into())),
        (Value::Integer((-1).into()), Value::Integer(1.into())),
        (Value::Integer((-2).into()), Value::Bytes(x.to_vec())),
        (Value::Integer((-3).into()), Value::Bytes(y.to_vec())),
    ]);
    cbor::encode(&map)
}

/// Look up a (possibly negative) integer key in a COSE map
fn cose_coordinate(value: &Value, key: i128) -> Option<&[u8]> {
    match value {
        Value::Map(entries) => entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if *i == key))
            .and_then(|(_, v)| cbor::value_bytes(v)),
        _ => None,
    }
}
