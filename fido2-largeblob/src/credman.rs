//! Resident-credential enumeration for large-blob trimming
//!
//! Trimming needs the large-blob key of every resident credential on the
//! device. This module walks authenticatorCredentialManagement far enough to
//! collect them: enumerate RPs, then each RP's resident credentials, keeping
//! the `largeBlobKey` field where present. Nothing else of credential
//! management is implemented here.

use crate::cbor::{self, MapBuilder, Value};
use crate::device::{self, CMD_CRED_MGMT, Device};
use crate::error::{Error, Result};
use crate::pin::{self, Permission, UvToken};

use log::debug;
use zeroize::Zeroizing;

const SUBCMD_RP_BEGIN: u8 = 0x02;
const SUBCMD_RP_NEXT: u8 = 0x03;
const SUBCMD_RK_BEGIN: u8 = 0x04;
const SUBCMD_RK_NEXT: u8 = 0x05;

/// Request parameter keys
const KEY_SUBCOMMAND: u8 = 0x01;
const KEY_SUBCOMMAND_PARAMS: u8 = 0x02;
const KEY_PIN_UV_AUTH_PROTOCOL: u8 = 0x03;
const KEY_PIN_UV_AUTH_PARAM: u8 = 0x04;

/// Subcommand parameter key: rpIDHash
const PARAM_RP_ID_HASH: u8 = 0x01;

/// Response keys
const KEY_RP_ID_HASH: u64 = 0x04;
const KEY_TOTAL_RPS: u64 = 0x05;
const KEY_TOTAL_CREDENTIALS: u64 = 0x09;
const KEY_LARGE_BLOB_KEY: u64 = 0x0b;

/// CTAP2_ERR_NO_CREDENTIALS: nothing resident in the queried scope
const CTAP_NO_CREDENTIALS: u8 = 0x2e;

/// Collect the large-blob key of every resident credential on the device
///
/// Acquires one credentialManagement-scoped token for the whole walk when
/// the device supports it. A device with no resident credentials yields an
/// empty list.
pub(crate) fn largeblob_keys<D: Device + ?Sized>(
    dev: &mut D,
    pin: Option<&str>,
    timeout_ms: i32,
) -> Result<Vec<Zeroizing<Vec<u8>>>> {
    let token = if pin::can_get_uv_token(dev, pin) {
        Some(pin::get_uv_token(
            dev,
            Permission::CredentialManagement,
            pin,
            timeout_ms,
        )?)
    } else {
        None
    };

    let mut keys = Vec::new();
    for rp_id_hash in enumerate_rp_hashes(dev, token.as_ref(), timeout_ms)? {
        keys.extend(enumerate_rk_blob_keys(
            dev,
            token.as_ref(),
            &rp_id_hash,
            timeout_ms,
        )?);
    }
    debug!("largeblob_keys: collected {} keys", keys.len());
    Ok(keys)
}

/// Build a credentialManagement request
///
/// The pinUvAuthParam covers the subcommand byte followed by the raw
/// subcommand parameter bytes. getNext subcommands are sent without auth.
fn request(subcommand: u8, params: Option<Vec<u8>>, token: Option<&UvToken>) -> Result<Vec<u8>> {
    let mut builder = MapBuilder::new().insert(KEY_SUBCOMMAND, subcommand)?;

    if let Some(token) = token {
        let mut message = vec![subcommand];
        if let Some(params) = &params {
            message.extend_from_slice(params);
        }
        builder = builder
            .insert(KEY_PIN_UV_AUTH_PROTOCOL, token.protocol().id())?
            .insert_bytes(KEY_PIN_UV_AUTH_PARAM, &token.authenticate(&message))?;
    }

    if let Some(params) = params {
        builder = builder.insert_raw(KEY_SUBCOMMAND_PARAMS, params);
    }
    builder.build()
}

/// Enumerate the rpIDHash of every RP with resident credentials
fn enumerate_rp_hashes<D: Device + ?Sized>(
    dev: &mut D,
    token: Option<&UvToken>,
    timeout_ms: i32,
) -> Result<Vec<Vec<u8>>> {
    let begin = request(SUBCMD_RP_BEGIN, None, token)?;
    let reply = match device::transact(dev, CMD_CRED_MGMT, &begin, timeout_ms) {
        Ok(reply) => reply,
        Err(Error::Ctap(CTAP_NO_CREDENTIALS)) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let value: Value = cbor::decode(&reply)?;
    let total = cbor::map_value(&value, KEY_TOTAL_RPS)
        .and_then(cbor::value_uint)
        .unwrap_or(1);

    let mut hashes = Vec::new();
    if let Some(hash) = cbor::map_value(&value, KEY_RP_ID_HASH).and_then(cbor::value_bytes) {
        hashes.push(hash.to_vec());
    }

    for _ in 1..total {
        let next = request(SUBCMD_RP_NEXT, None, None)?;
        let reply = device::transact(dev, CMD_CRED_MGMT, &next, timeout_ms)?;
        let value: Value = cbor::decode(&reply)?;
        if let Some(hash) = cbor::map_value(&value, KEY_RP_ID_HASH).and_then(cbor::value_bytes) {
            hashes.push(hash.to_vec());
        }
    }

    Ok(hashes)
}

/// Enumerate one RP's resident credentials, collecting large-blob keys
fn enumerate_rk_blob_keys<D: Device + ?Sized>(
    dev: &mut D,
    token: Option<&UvToken>,
    rp_id_hash: &[u8],
    timeout_ms: i32,
) -> Result<Vec<Zeroizing<Vec<u8>>>> {
    let params = MapBuilder::new()
        .insert_bytes(PARAM_RP_ID_HASH, rp_id_hash)?
        .build()?;

    let begin = request(SUBCMD_RK_BEGIN, Some(params), token)?;
    let reply = match device::transact(dev, CMD_CRED_MGMT, &begin, timeout_ms) {
        Ok(reply) => reply,
        Err(Error::Ctap(CTAP_NO_CREDENTIALS)) => return Ok(Vec::new()),
        Err(err) => return Err(err),
    };

    let value: Value = cbor::decode(&reply)?;
    let total = cbor::map_value(&value, KEY_TOTAL_CREDENTIALS)
        .and_then(cbor::value_uint)
        .unwrap_or(1);

    let mut keys = Vec::new();
    push_blob_key(&value, &mut keys);

    for _ in 1..total {
        let next = request(SUBCMD_RK_NEXT, None, None)?;
        let reply = device::transact(dev, CMD_CRED_MGMT, &next, timeout_ms)?;
        let value: Value = cbor::decode(&reply)?;
        push_blob_key(&value, &mut keys);
    }

    Ok(keys)
}

/// Credentials without a large-blob key are skipped
fn push_blob_key(value: &Value, keys: &mut Vec<Zeroizing<Vec<u8>>>) {
    if let Some(key) = cbor::map_value(value, KEY_LARGE_BLOB_KEY).and_then(cbor::value_bytes) {
        keys.push(Zeroizing::new(key.to_vec()));
    }
}
