//! Authenticator device abstraction
//!
//! The subsystem talks to the authenticator through the [`Device`] trait: a
//! blocking, one-request-in-flight transport plus the handful of descriptor
//! fields the large-blob protocol needs. Transport framing (HID, NFC, ...)
//! lives behind the implementation.

use crate::error::{Error, Result};

use log::debug;
use smallvec::SmallVec;

use fido2_largeblob_crypto::PinUvAuthProtocol;

/// Transport-level command carrying a CBOR frame
pub const CTAP_CMD_CBOR: u8 = 0x10;

/// authenticatorClientPIN (0x06)
pub const CMD_CLIENT_PIN: u8 = 0x06;

/// authenticatorCredentialManagement (0x0A)
pub const CMD_CRED_MGMT: u8 = 0x0a;

/// authenticatorLargeBlobs (0x0C)
pub const CMD_LARGE_BLOBS: u8 = 0x0c;

/// Maximum reassembled CTAP message size in bytes
pub const MAX_CBOR_MESSAGE: usize = 7609;

/// Per-fragment protocol overhead subtracted from the message size
const FRAGMENT_OVERHEAD: u64 = 64;

/// Timeout value meaning "block until the authenticator answers"
pub const NO_TIMEOUT: i32 = -1;

/// Blocking transport to a FIDO2 authenticator
///
/// Implementations must preserve strict request/reply ordering: after `tx`,
/// exactly one `rx` completes the round trip, and no second request is issued
/// before the reply has been consumed.
pub trait Device {
    /// Send one frame. `cmd` is the transport-level command
    /// ([`CTAP_CMD_CBOR`]); `data` is `[ctap_cmd] || cbor`.
    fn tx(&mut self, cmd: u8, data: &[u8]) -> Result<()>;

    /// Receive one reply frame into `buf`, returning its length
    ///
    /// `timeout_ms` of [`NO_TIMEOUT`] blocks indefinitely. The reply is
    /// `[status] || cbor`.
    fn rx(&mut self, cmd: u8, buf: &mut [u8], timeout_ms: i32) -> Result<usize>;

    /// Maximum message size advertised by the authenticator (maxMsgSize)
    fn max_msg_size(&self) -> u64;

    /// True iff the authenticator has a PIN set (clientPin option)
    fn supports_pin(&self) -> bool;

    /// True iff the authenticator can perform built-in user verification
    fn supports_uv(&self) -> bool;

    /// True iff the authenticator supports permission-scoped tokens
    /// (pinUvAuthToken option)
    fn supports_uv_token(&self) -> bool;

    /// Negotiated PIN/UV auth protocol version
    fn pin_uv_auth_protocol(&self) -> PinUvAuthProtocol {
        PinUvAuthProtocol::V2
    }
}

/// Largest fragment the device can accept in one large-blob round trip
///
/// Derived from the advertised message size, capped at the transport maximum,
/// minus the framing overhead. A device whose message size cannot fit any
/// payload is unusable for this feature.
pub(crate) fn max_fragment_length<D: Device + ?Sized>(dev: &D) -> Result<usize> {
    let max = dev.max_msg_size().min(MAX_CBOR_MESSAGE as u64);
    if max <= FRAGMENT_OVERHEAD {
        debug!("max_fragment_length: maxMsgSize={} unusable", dev.max_msg_size());
        return Err(Error::InvalidArgument);
    }
    Ok((max - FRAGMENT_OVERHEAD) as usize)
}

/// Issue one CBOR command and return the reply payload
///
/// Sends `[ctap_cmd] || payload`, awaits the reply, checks the status byte
/// and returns the CBOR bytes that follow it (empty for status-only replies).
pub(crate) fn transact<D: Device + ?Sized>(
    dev: &mut D,
    ctap_cmd: u8,
    payload: &[u8],
    timeout_ms: i32,
) -> Result<Vec<u8>> {
    let mut frame: SmallVec<[u8; 256]> = SmallVec::with_capacity(1 + payload.len());
    frame.push(ctap_cmd);
    frame.extend_from_slice(payload);
    dev.tx(CTAP_CMD_CBOR, &frame)?;

    let mut reply = vec![0u8; MAX_CBOR_MESSAGE];
    let len = dev.rx(CTAP_CMD_CBOR, &mut reply, timeout_ms)?;
    if len == 0 {
        debug!("transact: empty reply to cmd 0x{:02x}", ctap_cmd);
        return Err(Error::Rx);
    }

    let status = reply[0];
    if status != 0 {
        debug!("transact: cmd 0x{:02x} status 0x{:02x}", ctap_cmd, status);
        return Err(Error::from_status(status));
    }

    reply.truncate(len);
    reply.remove(0);
    Ok(reply)
}
