//! Common test utilities: a virtual authenticator with a large-blob store
//!
//! Implements the authenticator side of the protocol subset this crate
//! speaks: fragmented large-blob reads and writes (including per-chunk
//! pinUvAuthParam verification and digest validation), clientPin token
//! issuance over real ECDH, and the credentialManagement enumeration used
//! by trim.

#![allow(dead_code)]

use fido2_largeblob::cbor::{self, MapBuilder, Value};
use fido2_largeblob::{Device, PinUvAuthProtocol, Result};

use fido2_largeblob_crypto::ecdh::KeyPair;

use rand::RngCore;
use sha2::{Digest, Sha256};

const CTAP_OK: u8 = 0x00;
const CTAP_ERR_INVALID_COMMAND: u8 = 0x01;
const CTAP_ERR_INVALID_PARAMETER: u8 = 0x02;
const CTAP_ERR_INVALID_LENGTH: u8 = 0x03;
const CTAP_ERR_INVALID_SEQ: u8 = 0x04;
const CTAP_ERR_NO_CREDENTIALS: u8 = 0x2e;
const CTAP_ERR_PIN_INVALID: u8 = 0x31;
const CTAP_ERR_PIN_AUTH_INVALID: u8 = 0x33;
const CTAP_ERR_PIN_REQUIRED: u8 = 0x36;
const CTAP_ERR_INTEGRITY_FAILURE: u8 = 0x3d;

const PERMISSION_CRED_MGMT: u8 = 0x04;
const PERMISSION_LARGE_BLOB_WRITE: u8 = 0x10;

/// One relying party with resident credentials
pub struct ResidentRp {
    pub rp_id_hash: [u8; 32],
    /// One element per resident credential; `None` models a credential
    /// created without a large-blob key
    pub largeblob_keys: Vec<Option<Vec<u8>>>,
}

/// In-memory authenticator double
pub struct VirtualAuthenticator {
    max_msg_size: u64,
    pin: Option<String>,
    uv: bool,
    protocol: PinUvAuthProtocol,
    keypair: KeyPair,

    /// Serialized large-blob array as persisted (body plus trailer)
    pub stored: Vec<u8>,

    token: Option<([u8; 32], u8)>,
    reply: Option<Vec<u8>>,

    pending_write: Vec<u8>,
    expected_total: usize,

    rps: Vec<ResidentRp>,
    rp_cursor: usize,
    rk_rp: usize,
    rk_cursor: usize,

    /// Large-blob read and write request counters
    pub get_count: usize,
    pub set_count: usize,
}

impl VirtualAuthenticator {
    pub fn new(max_msg_size: u64) -> Self {
        Self {
            max_msg_size,
            pin: None,
            uv: false,
            protocol: PinUvAuthProtocol::V2,
            keypair: KeyPair::generate(),
            stored: Vec::new(),
            token: None,
            reply: None,
            pending_write: Vec::new(),
            expected_total: 0,
            rps: Vec::new(),
            rp_cursor: 0,
            rk_rp: 0,
            rk_cursor: 0,
            get_count: 0,
            set_count: 0,
        }
    }

    pub fn with_pin(max_msg_size: u64, pin: &str) -> Self {
        let mut dev = Self::new(max_msg_size);
        dev.pin = Some(pin.to_string());
        dev
    }

    pub fn with_uv(max_msg_size: u64) -> Self {
        let mut dev = Self::new(max_msg_size);
        dev.uv = true;
        dev
    }

    pub fn with_protocol(mut self, protocol: PinUvAuthProtocol) -> Self {
        self.protocol = protocol;
        self
    }

    pub fn add_resident_rp(&mut self, rp: ResidentRp) {
        self.rps.push(rp);
    }

    fn requires_token(&self) -> bool {
        self.pin.is_some() || self.uv
    }

    fn handle(&mut self, ctap_cmd: u8, payload: &[u8]) -> Vec<u8> {
        match ctap_cmd {
            0x0c => self.handle_large_blobs(payload),
            0x06 => self.handle_client_pin(payload),
            0x0a => self.handle_cred_mgmt(payload),
            other => panic!("unexpected CTAP command 0x{other:02x}"),
        }
    }

    fn handle_large_blobs(&mut self, payload: &[u8]) -> Vec<u8> {
        let Ok(value) = cbor::decode::<Value>(payload) else {
            return status(CTAP_ERR_INVALID_PARAMETER);
        };
        match cbor::map_value(&value, 1) {
            Some(Value::Integer(_)) => self.handle_blob_get(&value),
            Some(Value::Bytes(_)) => self.handle_blob_set(&value),
            _ => status(CTAP_ERR_INVALID_PARAMETER),
        }
    }

    fn handle_blob_get(&mut self, value: &Value) -> Vec<u8> {
        self.get_count += 1;

        let Some(count) = cbor::map_value(value, 1).and_then(cbor::value_uint) else {
            return status(CTAP_ERR_INVALID_PARAMETER);
        };
        let Some(offset) = cbor::map_value(value, 3).and_then(cbor::value_uint) else {
            return status(CTAP_ERR_INVALID_PARAMETER);
        };

        let offset = (offset as usize).min(self.stored.len());
        let end = offset.saturating_add(count as usize).min(self.stored.len());
        let fragment = self.stored[offset..end].to_vec();

        ok_map(vec![(
            Value::Integer(1.into()),
            Value::Bytes(fragment),
        )])
    }

    fn handle_blob_set(&mut self, value: &Value) -> Vec<u8> {
        self.set_count += 1;

        let Some(chunk) = cbor::map_value(value, 1).and_then(cbor::value_bytes) else {
            return status(CTAP_ERR_INVALID_PARAMETER);
        };
        let Some(offset) = cbor::map_value(value, 2).and_then(cbor::value_uint) else {
            return status(CTAP_ERR_INVALID_PARAMETER);
        };
        let offset = offset as usize;

        if self.requires_token() {
            let Some(mac) = cbor::map_value(value, 4).and_then(cbor::value_bytes) else {
                return status(CTAP_ERR_PIN_REQUIRED);
            };
            let Some((token, permissions)) = self.token else {
                return status(CTAP_ERR_PIN_AUTH_INVALID);
            };
            if permissions & PERMISSION_LARGE_BLOB_WRITE == 0 {
                return status(CTAP_ERR_PIN_AUTH_INVALID);
            }
            let expected = self.protocol.authenticate(&token, &set_mac_input(offset, chunk));
            if mac != expected {
                return status(CTAP_ERR_PIN_AUTH_INVALID);
            }
        }

        if offset == 0 {
            let Some(total) = cbor::map_value(value, 3).and_then(cbor::value_uint) else {
                return status(CTAP_ERR_INVALID_PARAMETER);
            };
            self.expected_total = total as usize;
            self.pending_write.clear();
        } else if offset != self.pending_write.len() {
            return status(CTAP_ERR_INVALID_SEQ);
        }

        self.pending_write.extend_from_slice(chunk);
        if self.pending_write.len() > self.expected_total {
            return status(CTAP_ERR_INVALID_LENGTH);
        }

        if self.pending_write.len() == self.expected_total {
            if self.pending_write.len() <= 16 {
                return status(CTAP_ERR_INTEGRITY_FAILURE);
            }
            let (body, trailer) = self.pending_write.split_at(self.pending_write.len() - 16);
            if Sha256::digest(body)[..16] != *trailer {
                return status(CTAP_ERR_INTEGRITY_FAILURE);
            }
            self.stored = std::mem::take(&mut self.pending_write);
        }

        status(CTAP_OK)
    }

    fn handle_client_pin(&mut self, payload: &[u8]) -> Vec<u8> {
        let value: Value = cbor::decode(payload).expect("clientPin request CBOR");
        let sub = cbor::map_value(&value, 2).and_then(cbor::value_uint);

        match sub {
            Some(0x02) => {
                let (x, y) = self.keypair.public_key_cose();
                ok_map(vec![(Value::Integer(1.into()), cose_key(&x, &y))])
            }
            Some(sub @ (0x06 | 0x09)) => {
                let Some(platform) = cbor::map_value(&value, 3) else {
                    return status(CTAP_ERR_INVALID_PARAMETER);
                };
                let (x, y) = cose_coords(platform);
                let z = self
                    .keypair
                    .shared_secret(&x, &y)
                    .expect("platform key agreement key");

                if sub == 0x09 {
                    let Some(pin) = self.pin.clone() else {
                        return status(CTAP_ERR_PIN_INVALID);
                    };
                    let Some(enc) = cbor::map_value(&value, 6).and_then(cbor::value_bytes) else {
                        return status(CTAP_ERR_INVALID_PARAMETER);
                    };
                    let Ok(pin_hash) = self.protocol.decrypt(&z, enc) else {
                        return status(CTAP_ERR_PIN_INVALID);
                    };
                    if pin_hash[..16] != Sha256::digest(pin.as_bytes())[..16] {
                        return status(CTAP_ERR_PIN_INVALID);
                    }
                } else if !self.uv {
                    return status(CTAP_ERR_INVALID_COMMAND);
                }

                let permissions =
                    cbor::map_value(&value, 9).and_then(cbor::value_uint).unwrap_or(0) as u8;
                let mut token = [0u8; 32];
                rand::thread_rng().fill_bytes(&mut token);
                self.token = Some((token, permissions));

                let token_enc = self.protocol.encrypt(&z, &token).expect("token encryption");
                ok_map(vec![(Value::Integer(2.into()), Value::Bytes(token_enc))])
            }
            _ => status(CTAP_ERR_INVALID_COMMAND),
        }
    }

    fn handle_cred_mgmt(&mut self, payload: &[u8]) -> Vec<u8> {
        let value: Value = cbor::decode(payload).expect("credentialManagement request CBOR");
        let sub = cbor::map_value(&value, 1).and_then(cbor::value_uint);

        match sub {
            Some(0x02) => {
                if let Some(err) = self.check_cred_mgmt_auth(&value, 0x02, None) {
                    return err;
                }
                if self.rps.is_empty() {
                    return status(CTAP_ERR_NO_CREDENTIALS);
                }
                self.rp_cursor = 1;
                ok_map(vec![
                    (
                        Value::Integer(4.into()),
                        Value::Bytes(self.rps[0].rp_id_hash.to_vec()),
                    ),
                    (
                        Value::Integer(5.into()),
                        Value::Integer((self.rps.len() as i128).into()),
                    ),
                ])
            }
            Some(0x03) => {
                let rp = &self.rps[self.rp_cursor];
                self.rp_cursor += 1;
                ok_map(vec![(
                    Value::Integer(4.into()),
                    Value::Bytes(rp.rp_id_hash.to_vec()),
                )])
            }
            Some(0x04) => {
                let rp_id_hash = cbor::map_value(&value, 2)
                    .and_then(|params| cbor::map_value(params, 1))
                    .and_then(cbor::value_bytes)
                    .expect("rpIDHash parameter");

                if let Some(err) = self.check_cred_mgmt_auth(&value, 0x04, Some(rp_id_hash)) {
                    return err;
                }

                let Some(index) = self
                    .rps
                    .iter()
                    .position(|rp| rp.rp_id_hash.as_slice() == rp_id_hash)
                else {
                    return status(CTAP_ERR_NO_CREDENTIALS);
                };
                if self.rps[index].largeblob_keys.is_empty() {
                    return status(CTAP_ERR_NO_CREDENTIALS);
                }

                self.rk_rp = index;
                self.rk_cursor = 1;

                let mut entries = vec![(
                    Value::Integer(9.into()),
                    Value::Integer((self.rps[index].largeblob_keys.len() as i128).into()),
                )];
                if let Some(key) = &self.rps[index].largeblob_keys[0] {
                    entries.push((Value::Integer(11.into()), Value::Bytes(key.clone())));
                }
                ok_map(entries)
            }
            Some(0x05) => {
                let key = self.rps[self.rk_rp].largeblob_keys[self.rk_cursor].clone();
                self.rk_cursor += 1;

                let mut entries = Vec::new();
                if let Some(key) = key {
                    entries.push((Value::Integer(11.into()), Value::Bytes(key)));
                }
                ok_map(entries)
            }
            _ => status(CTAP_ERR_INVALID_COMMAND),
        }
    }

    /// Verify the pinUvAuthParam of an authenticated credman subcommand
    fn check_cred_mgmt_auth(
        &self,
        value: &Value,
        subcommand: u8,
        rp_id_hash: Option<&[u8]>,
    ) -> Option<Vec<u8>> {
        if !self.requires_token() {
            return None;
        }
        let Some(mac) = cbor::map_value(value, 4).and_then(cbor::value_bytes) else {
            return Some(status(CTAP_ERR_PIN_REQUIRED));
        };
        let Some((token, permissions)) = self.token else {
            return Some(status(CTAP_ERR_PIN_AUTH_INVALID));
        };
        if permissions & PERMISSION_CRED_MGMT == 0 {
            return Some(status(CTAP_ERR_PIN_AUTH_INVALID));
        }

        let mut message = vec![subcommand];
        if let Some(rp_id_hash) = rp_id_hash {
            let params = MapBuilder::new()
                .insert_bytes(1, rp_id_hash)
                .unwrap()
                .build()
                .unwrap();
            message.extend_from_slice(&params);
        }

        if mac != self.protocol.authenticate(&token, &message) {
            return Some(status(CTAP_ERR_PIN_AUTH_INVALID));
        }
        None
    }
}

impl Device for VirtualAuthenticator {
    fn tx(&mut self, cmd: u8, data: &[u8]) -> Result<()> {
        assert_eq!(cmd, 0x10, "only CBOR frames expected");
        assert!(self.reply.is_none(), "more than one request in flight");
        let reply = self.handle(data[0], &data[1..]);
        self.reply = Some(reply);
        Ok(())
    }

    fn rx(&mut self, _cmd: u8, buf: &mut [u8], _timeout_ms: i32) -> Result<usize> {
        let reply = self.reply.take().expect("rx without pending reply");
        buf[..reply.len()].copy_from_slice(&reply);
        Ok(reply.len())
    }

    fn max_msg_size(&self) -> u64 {
        self.max_msg_size
    }

    fn supports_pin(&self) -> bool {
        self.pin.is_some()
    }

    fn supports_uv(&self) -> bool {
        self.uv
    }

    fn supports_uv_token(&self) -> bool {
        self.uv
    }

    fn pin_uv_auth_protocol(&self) -> PinUvAuthProtocol {
        self.protocol
    }
}

fn status(code: u8) -> Vec<u8> {
    vec![code]
}

fn ok_map(entries: Vec<(Value, Value)>) -> Vec<u8> {
    let mut reply = vec![CTAP_OK];
    reply.extend_from_slice(&cbor::encode(&Value::Map(entries)).unwrap());
    reply
}

/// The 70-byte input a write chunk's MAC must cover
fn set_mac_input(offset: usize, chunk: &[u8]) -> [u8; 70] {
    let mut input = [0xffu8; 70];
    input[32] = 0x0c;
    input[33] = 0x00;
    input[34..38].copy_from_slice(&(offset as u32).to_le_bytes());
    input[38..].copy_from_slice(&Sha256::digest(chunk));
    input
}

fn cose_key(x: &[u8; 32], y: &[u8; 32]) -> Value {
    Value::Map(vec![
        (Value::Integer(1.into()), Value::Integer(2.into())),
        (Value::Integer(3.into()), Value::Integer((-25).into())),
        (Value::Integer((-1).into()), Value::Integer(1.into())),
        (Value::Integer((-2).into()), Value::Bytes(x.to_vec())),
        (Value::Integer((-3).into()), Value::Bytes(y.to_vec())),
    ])
}

fn cose_coords(value: &Value) -> (Vec<u8>, Vec<u8>) {
    let Value::Map(entries) = value else {
        panic!("COSE key is not a map");
    };
    let coord = |key: i128| {
        entries
            .iter()
            .find(|(k, _)| matches!(k, Value::Integer(i) if *i == key))
            .and_then(|(_, v)| match v {
                Value::Bytes(bytes) => Some(bytes.clone()),
                _ => None,
            })
            .expect("COSE coordinate")
    };
    (coord(-2), coord(-3))
}
