//! Bluetooth Security Manager
//!
//! The Security Manager contains the algorithms and protocols for the pairing processes between two
//! connected devices.
//!
//! # The Algorithms
//! The names of each algorithm match the names as stated in the Security Manager section of the
//! Host Volume of the Bluetooth Specification (V 5.0 | Vol 3, Part H, Section 2.2). Unfortunately
//! these names are shortened, making them obtuse to understand going by their name.
//!
//! The security function *e* is built using the functions [`ah`], [`c1`], and [`s1`].
//!
//! The security function AES-CMAC is built using the functions ['f4'], ['f5'], ['f6'], and ['g2']
//!
//! # Pairing
//! [`pair_as_initiator`] and [`pair_as_responder`] run the full three-phase pairing procedure over
//! an already-connected `SecurityManagerProtocol` channel: feature exchange, key agreement (LE
//! Legacy or LE Secure Connections, chosen by `select_method` off both sides' IO capabilities and
//! bonding flags), and bonded-key distribution. Both block the calling thread for the duration of
//! the exchange; [`PHASE_TIMEOUT`] bounds every individual PDU wait so a silent peer can't wedge
//! the pairing thread forever.

pub mod pdu;
pub mod toolbox;

use crate::addr::Address;
use crate::error::Error;
use crate::l2cap::Channel;
use pdu::{AuthRequirements, IoCapability, KeyDistribution, OobDataFlag, PairingInfo, SmpError, SmpPdu};
use std::time::Duration;

/// How long a single phase waits for the peer's next PDU before giving up.
pub const PHASE_TIMEOUT: Duration = Duration::from_secs(30);

/// `Max_Encryption_Key_Size` this stack asks for and accepts; the Core Spec caps it at 16.
pub const MAX_ENCRYPTION_KEY_SIZE: u8 = 16;

/// The association model used for phase 2, chosen from both sides' IO capability and whether
/// either side requires protection against man-in-the-middle attacks (Core Spec Vol 3, Part H,
/// §2.3.5.1, Table 2.8). Out-of-band pairing is not implemented: a side advertising OOB data falls
/// back to whichever of these three the capability table would otherwise select.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairingMethod {
    JustWorks,
    NumericComparison,
    PasskeyEntry,
}

/// Supplies the user-facing half of passkey entry and numeric comparison. A headless device (no
/// display, no keyboard) never reaches these calls, since `select_method` only picks
/// [`PairingMethod::JustWorks`] for that combination.
pub trait PasskeyIo: Send + Sync {
    /// Called once by each side to settle on the shared 6-digit passkey: a device with a display
    /// generates one and shows it to the user, a device with only a keyboard prompts the user to
    /// type in the value shown on the peer. Both sides must return the same value for pairing to
    /// succeed.
    fn obtain_passkey(&self) -> Result<u32, Error>;

    /// Called once with the locally computed 6-digit comparison value; returns whether the user
    /// confirmed it matches what's displayed on the peer.
    fn confirm_numeric(&self, value: u32) -> Result<bool, Error>;
}

/// Starts link-layer encryption once phase 2 has derived a session key. Phase 3 key distribution
/// happens over the resulting encrypted link, so both pairing functions block on this before
/// attempting it.
pub trait LinkEncryptor: Send + Sync {
    /// `ediv`/`rand` are nonzero only for LE Legacy pairing's short term key; LE Secure
    /// Connections pairing derives the long term key directly and always passes zero for both.
    fn start_encryption(&self, key: u128, ediv: u16, rand: u64) -> Result<(), Error>;
}

/// What a pairing attempt needs to know about the two ends of the link.
#[derive(Debug, Clone)]
pub struct PairingParams {
    pub io_capability: IoCapability,
    /// Whether this device requires protection against man-in-the-middle attacks.
    pub mitm_required: bool,
    /// Whether this device wants the resulting keys to survive the connection (bonding) rather
    /// than being used for this session only.
    pub bonding: bool,
    pub local_address: Address,
    pub peer_address: Address,
    /// Which bonded keys this device offers to distribute; intersected against what the peer
    /// offers to determine what's actually exchanged in phase 3.
    pub local_key_distribution: KeyDistribution,
}

/// The key material a completed pairing (and subsequent bonding exchange) produced.
#[derive(Debug, Clone, Default)]
pub struct PairingKeys {
    /// The session key: the short term key for LE Legacy pairing, the long term key for LE Secure
    /// Connections pairing.
    pub ltk: Option<u128>,
    /// Set only when the peer distributed a separate bonded LTK (LE Legacy pairing only; LE
    /// Secure Connections reuses `ltk` directly and never sends `EncryptionInformation`).
    pub bonded_ltk: Option<u128>,
    pub ediv: Option<u16>,
    pub rand: Option<u64>,
    pub irk: Option<u128>,
    pub csrk: Option<u128>,
    pub peer_irk: Option<u128>,
    pub peer_csrk: Option<u128>,
    pub peer_identity_address: Option<Address>,
    /// The association model phase 2 actually negotiated, so a caller can report it without
    /// re-deriving `select_method`'s inputs itself.
    pub method: Option<PairingMethod>,
}

/// How strong the link's encryption is, ordered from weakest to strongest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum SecurityLevel {
    None,
    EncOnly,
    EncAuth,
    EncAuthFips,
}

impl SecurityLevel {
    pub fn to_raw(self) -> u8 {
        self as u8
    }

    pub fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            0 => Some(SecurityLevel::None),
            1 => Some(SecurityLevel::EncOnly),
            2 => Some(SecurityLevel::EncAuth),
            3 => Some(SecurityLevel::EncAuthFips),
            _ => None,
        }
    }
}

/// Bluetooth Core Spec Vol 3, Part H, §2.3.5.1, Table 2.8, collapsed: Out-Of-Band is not modeled,
/// so a side claiming OOB data falls through to whatever this table would otherwise pick.
fn select_method(local: IoCapability, remote: IoCapability, secure_connections: bool, mitm_required: bool) -> PairingMethod {
    if !mitm_required {
        return PairingMethod::JustWorks;
    }

    if local == IoCapability::NoInputNoOutput || remote == IoCapability::NoInputNoOutput {
        return PairingMethod::JustWorks;
    }

    if !secure_connections {
        // LE Legacy pairing only distinguishes Just Works from Passkey Entry; Numeric Comparison
        // is a Secure Connections concept. Passkey Entry round-trips aren't implemented for
        // Legacy pairing, so a device pair that would need it is stuck with Just Works.
        return PairingMethod::JustWorks;
    }

    match (local, remote) {
        (IoCapability::DisplayYesNo, IoCapability::DisplayYesNo) => PairingMethod::NumericComparison,
        (IoCapability::DisplayYesNo, IoCapability::KeyboardDisplay) | (IoCapability::KeyboardDisplay, IoCapability::DisplayYesNo) => {
            PairingMethod::NumericComparison
        }
        (IoCapability::KeyboardDisplay, IoCapability::KeyboardDisplay) => PairingMethod::NumericComparison,
        (IoCapability::KeyboardOnly, _) | (_, IoCapability::KeyboardOnly) => PairingMethod::PasskeyEntry,
        (IoCapability::DisplayOnly, IoCapability::KeyboardDisplay) | (IoCapability::KeyboardDisplay, IoCapability::DisplayOnly) => {
            PairingMethod::PasskeyEntry
        }
        _ => PairingMethod::JustWorks,
    }
}

fn build_local_info(params: &PairingParams) -> PairingInfo {
    PairingInfo {
        io_capability: params.io_capability,
        oob_data_flag: OobDataFlag::NotPresent,
        auth_requirements: AuthRequirements {
            bonding: params.bonding,
            mitm: params.mitm_required,
            secure_connections: true,
            keypress: false,
            ct2: false,
        },
        max_encryption_key_size: MAX_ENCRYPTION_KEY_SIZE,
        initiator_key_distribution: params.local_key_distribution,
        responder_key_distribution: params.local_key_distribution,
    }
}

fn send(channel: &Channel, pdu: &SmpPdu) -> Result<(), Error> {
    channel.send(pdu.encode())
}

/// Waits for the next PDU, surfacing a received `PairingFailed` as an error and answering a
/// malformed PDU with our own `PairingFailed` before propagating the decode error.
fn recv(channel: &Channel) -> Result<SmpPdu, Error> {
    let raw = channel.receive(PHASE_TIMEOUT)?;
    match SmpPdu::decode(&raw) {
        Ok(SmpPdu::PairingFailed(reason)) => Err(Error::from(reason)),
        Ok(pdu) => Ok(pdu),
        Err(reason) => {
            let _ = send(channel, &SmpPdu::PairingFailed(reason));
            Err(Error::from(reason))
        }
    }
}

/// Sends `PairingFailed(reason)` to the peer and returns the equivalent `Error`, for call sites
/// that detect the failure locally (bad confirm value, unsupported method, ...).
fn fail(channel: &Channel, reason: SmpError) -> Error {
    let _ = send(channel, &SmpPdu::PairingFailed(reason));
    Error::from(reason)
}

fn address_for_crypto(addr: &Address) -> [u8; 7] {
    let mut out = [0u8; 7];
    out[0] = addr.address_type.is_random() as u8;
    out[1..].copy_from_slice(&addr.bytes);
    out
}

fn addr_to_u128(addr: &Address) -> u128 {
    let mut buf = [0u8; 16];
    buf[10..16].copy_from_slice(&addr.bytes);
    u128::from_be_bytes(buf)
}

fn io_cap_bytes(info: &PairingInfo) -> [u8; 3] {
    [info.io_capability as u8, info.oob_data_flag as u8, info.auth_requirements.to_raw()]
}

/// `preq`/`pres` as `c1` wants them: the 7 octets of the Pairing Request/Response PDU, reversed so
/// the opcode lands in the least significant octet (Core Spec Vol 3, Part H, §2.2.3).
fn preq_pres_value(raw: &[u8]) -> u128 {
    let mut buf = [0u8; 16];
    for (i, b) in raw.iter().rev().enumerate() {
        buf[9 + i] = *b;
    }
    u128::from_be_bytes(buf)
}

/// Runs pairing as the device that initiated the connection (the GAP Central / link layer
/// master). Returns the negotiated keys once phase 3 key distribution completes.
pub fn pair_as_initiator(
    channel: &Channel,
    params: &PairingParams,
    passkey_io: &dyn PasskeyIo,
    encryptor: &dyn LinkEncryptor,
) -> Result<PairingKeys, Error> {
    let local_info = build_local_info(params);
    send(channel, &SmpPdu::PairingRequest(local_info))?;
    let preq_raw = SmpPdu::PairingRequest(local_info).encode();

    let remote_info = match recv(channel)? {
        SmpPdu::PairingResponse(info) => info,
        _ => return Err(fail(channel, SmpError::InvalidParameters)),
    };
    let pres_raw = SmpPdu::PairingResponse(remote_info).encode();

    run_pairing(channel, params, &local_info, &remote_info, preq_raw, pres_raw, passkey_io, encryptor, true)
}

/// Runs pairing as the device that accepted the connection (the GAP Peripheral / link layer
/// slave).
pub fn pair_as_responder(
    channel: &Channel,
    params: &PairingParams,
    passkey_io: &dyn PasskeyIo,
    encryptor: &dyn LinkEncryptor,
) -> Result<PairingKeys, Error> {
    let remote_info = match recv(channel)? {
        SmpPdu::PairingRequest(info) => info,
        _ => return Err(fail(channel, SmpError::InvalidParameters)),
    };
    let preq_raw = SmpPdu::PairingRequest(remote_info).encode();

    let local_info = build_local_info(params);
    send(channel, &SmpPdu::PairingResponse(local_info))?;
    let pres_raw = SmpPdu::PairingResponse(local_info).encode();

    run_pairing(channel, params, &local_info, &remote_info, preq_raw, pres_raw, passkey_io, encryptor, false)
}

#[allow(clippy::too_many_arguments)]
fn run_pairing(
    channel: &Channel,
    params: &PairingParams,
    local_info: &PairingInfo,
    remote_info: &PairingInfo,
    preq_raw: Vec<u8>,
    pres_raw: Vec<u8>,
    passkey_io: &dyn PasskeyIo,
    encryptor: &dyn LinkEncryptor,
    is_initiator: bool,
) -> Result<PairingKeys, Error> {
    let secure_connections = local_info.auth_requirements.secure_connections && remote_info.auth_requirements.secure_connections;
    let mitm = params.mitm_required || remote_info.auth_requirements.mitm;
    let method = select_method(local_info.io_capability, remote_info.io_capability, secure_connections, mitm);

    let (local_distribution, remote_distribution) = if is_initiator {
        (
            local_info.initiator_key_distribution.intersect(remote_info.initiator_key_distribution),
            local_info.responder_key_distribution.intersect(remote_info.responder_key_distribution),
        )
    } else {
        (
            local_info.responder_key_distribution.intersect(remote_info.responder_key_distribution),
            local_info.initiator_key_distribution.intersect(remote_info.initiator_key_distribution),
        )
    };

    let (session_key, ediv, rand) = if secure_connections {
        let ltk = secure_connections_phase2(channel, params, local_info, remote_info, method, passkey_io, is_initiator)?;
        (ltk, 0u16, 0u64)
    } else {
        legacy_phase2(channel, params, &preq_raw, &pres_raw, method, is_initiator)?
    };

    encryptor.start_encryption(session_key, ediv, rand)?;

    let mut keys = PairingKeys { ltk: Some(session_key), method: Some(method), ..PairingKeys::default() };
    exchange_phase3_keys(channel, params, local_distribution, remote_distribution, secure_connections, &mut keys)?;

    Ok(keys)
}

#[allow(clippy::too_many_arguments)]
fn secure_connections_phase2(
    channel: &Channel,
    params: &PairingParams,
    local_info: &PairingInfo,
    remote_info: &PairingInfo,
    method: PairingMethod,
    passkey_io: &dyn PasskeyIo,
    is_initiator: bool,
) -> Result<u128, Error> {
    let (private_key, public_key) = toolbox::ecc_gen()?;
    let local_raw = toolbox::encode_public_key(&public_key);

    let mut x = [0u8; 32];
    let mut y = [0u8; 32];
    x.copy_from_slice(&local_raw[..32]);
    y.copy_from_slice(&local_raw[32..]);

    send(channel, &SmpPdu::PairingPublicKey { x, y })?;
    let (peer_x_raw, peer_y_raw) = match recv(channel)? {
        SmpPdu::PairingPublicKey { x, y } => (x, y),
        _ => return Err(fail(channel, SmpError::InvalidParameters)),
    };

    let mut peer_raw = Vec::with_capacity(64);
    peer_raw.extend_from_slice(&peer_x_raw);
    peer_raw.extend_from_slice(&peer_y_raw);
    let peer_key = toolbox::decode_peer_key(&peer_raw)?;

    let dh_secret = toolbox::ecdh(private_key, &peer_key)?;
    let local_x = toolbox::x_coordinate(&public_key);
    let peer_x = toolbox::peer_x_coordinate(&peer_key);

    let (na, nb, check_value) = match method {
        PairingMethod::JustWorks | PairingMethod::NumericComparison => {
            let (na, nb) = just_works_or_numeric_comparison(channel, local_x, peer_x, method, passkey_io, is_initiator)?;
            (na, nb, 0u128)
        }
        PairingMethod::PasskeyEntry => {
            let passkey = passkey_io.obtain_passkey()?;
            let (na, nb) = passkey_entry_rounds(channel, local_x, peer_x, passkey, is_initiator)?;
            (na, nb, passkey as u128)
        }
    };

    let (initiator_addr, responder_addr) =
        if is_initiator { (&params.local_address, &params.peer_address) } else { (&params.peer_address, &params.local_address) };
    let a1 = address_for_crypto(initiator_addr);
    let a2 = address_for_crypto(responder_addr);

    let (mac_key, ltk) = toolbox::f5(dh_secret, na, nb, a1, a2);

    let local_iocap = io_cap_bytes(local_info);
    let peer_iocap = io_cap_bytes(remote_info);
    let (iocap_initiator, iocap_responder) = if is_initiator { (local_iocap, peer_iocap) } else { (peer_iocap, local_iocap) };

    if is_initiator {
        let ea = toolbox::f6(mac_key, na, nb, check_value, iocap_initiator, a1, a2);
        send(channel, &SmpPdu::PairingDHKeyCheck(ea.to_be_bytes()))?;

        let eb_bytes = match recv(channel)? {
            SmpPdu::PairingDHKeyCheck(v) => v,
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        let expected_eb = toolbox::f6(mac_key, nb, na, check_value, iocap_responder, a2, a1);
        if u128::from_be_bytes(eb_bytes) != expected_eb {
            return Err(fail(channel, SmpError::DhKeyCheckFailed));
        }
    } else {
        let ea_bytes = match recv(channel)? {
            SmpPdu::PairingDHKeyCheck(v) => v,
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        let expected_ea = toolbox::f6(mac_key, na, nb, check_value, iocap_initiator, a1, a2);
        if u128::from_be_bytes(ea_bytes) != expected_ea {
            return Err(fail(channel, SmpError::DhKeyCheckFailed));
        }

        let eb = toolbox::f6(mac_key, nb, na, check_value, iocap_responder, a2, a1);
        send(channel, &SmpPdu::PairingDHKeyCheck(eb.to_be_bytes()))?;
    }

    Ok(ltk)
}

/// The single confirm/random round Just Works and Numeric Comparison share; only the responder
/// commits to a value ahead of revealing its nonce, since the initiator has nothing to hide.
/// Returns `(Na, Nb)`.
fn just_works_or_numeric_comparison(
    channel: &Channel,
    local_x: [u8; 32],
    peer_x: [u8; 32],
    method: PairingMethod,
    passkey_io: &dyn PasskeyIo,
    is_initiator: bool,
) -> Result<(u128, u128), Error> {
    let my_nonce = toolbox::nonce();

    let (na, nb) = if is_initiator {
        let peer_confirm = match recv(channel)? {
            SmpPdu::PairingConfirm(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };

        send(channel, &SmpPdu::PairingRandom(my_nonce.to_be_bytes()))?;
        let peer_nonce = match recv(channel)? {
            SmpPdu::PairingRandom(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };

        if toolbox::f4(peer_x, local_x, peer_nonce, 0) != peer_confirm {
            return Err(fail(channel, SmpError::ConfirmValueFailed));
        }

        (my_nonce, peer_nonce)
    } else {
        let confirm = toolbox::f4(local_x, peer_x, my_nonce, 0);
        send(channel, &SmpPdu::PairingConfirm(confirm.to_be_bytes()))?;

        let peer_nonce = match recv(channel)? {
            SmpPdu::PairingRandom(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        send(channel, &SmpPdu::PairingRandom(my_nonce.to_be_bytes()))?;

        (peer_nonce, my_nonce)
    };

    if method == PairingMethod::NumericComparison {
        let (u, v) = if is_initiator { (local_x, peer_x) } else { (peer_x, local_x) };
        let value = toolbox::g2(u, v, na, nb) % 1_000_000;
        if !passkey_io.confirm_numeric(value)? {
            return Err(fail(channel, SmpError::NumericComparisonFailed));
        }
    }

    Ok((na, nb))
}

/// 20 rounds of confirm/random, one per passkey bit (Core Spec Vol 3, Part H, §2.3.5.6). Both
/// sides commit to a confirm value before either reveals its nonce for that round. Returns the
/// final round's `(Na, Nb)`, which is all `f5`/`f6` need.
fn passkey_entry_rounds(
    channel: &Channel,
    local_x: [u8; 32],
    peer_x: [u8; 32],
    passkey: u32,
    is_initiator: bool,
) -> Result<(u128, u128), Error> {
    let mut na = 0u128;
    let mut nb = 0u128;

    for round in 0..20u32 {
        let bit = (passkey >> round) & 1;
        let z = 0x80 | bit as u8;

        let my_nonce = toolbox::nonce();
        let my_confirm = toolbox::f4(local_x, peer_x, my_nonce, z);

        let peer_confirm = if is_initiator {
            send(channel, &SmpPdu::PairingConfirm(my_confirm.to_be_bytes()))?;
            match recv(channel)? {
                SmpPdu::PairingConfirm(v) => u128::from_be_bytes(v),
                _ => return Err(fail(channel, SmpError::InvalidParameters)),
            }
        } else {
            let pc = match recv(channel)? {
                SmpPdu::PairingConfirm(v) => u128::from_be_bytes(v),
                _ => return Err(fail(channel, SmpError::InvalidParameters)),
            };
            send(channel, &SmpPdu::PairingConfirm(my_confirm.to_be_bytes()))?;
            pc
        };

        let peer_nonce = if is_initiator {
            send(channel, &SmpPdu::PairingRandom(my_nonce.to_be_bytes()))?;
            match recv(channel)? {
                SmpPdu::PairingRandom(v) => u128::from_be_bytes(v),
                _ => return Err(fail(channel, SmpError::InvalidParameters)),
            }
        } else {
            let pn = match recv(channel)? {
                SmpPdu::PairingRandom(v) => u128::from_be_bytes(v),
                _ => return Err(fail(channel, SmpError::InvalidParameters)),
            };
            send(channel, &SmpPdu::PairingRandom(my_nonce.to_be_bytes()))?;
            pn
        };

        if toolbox::f4(peer_x, local_x, peer_nonce, z) != peer_confirm {
            return Err(fail(channel, SmpError::ConfirmValueFailed));
        }

        if is_initiator {
            na = my_nonce;
            nb = peer_nonce;
        } else {
            na = peer_nonce;
            nb = my_nonce;
        }
    }

    Ok((na, nb))
}

fn legacy_phase2(
    channel: &Channel,
    params: &PairingParams,
    preq_raw: &[u8],
    pres_raw: &[u8],
    method: PairingMethod,
    is_initiator: bool,
) -> Result<(u128, u16, u64), Error> {
    if method != PairingMethod::JustWorks {
        return Err(fail(channel, SmpError::AuthenticationRequirements));
    }

    // LE Legacy Just Works uses an all-zero temporary key; there is no out-of-band or passkey
    // contribution to mix in.
    let tk = 0u128;
    let preq = preq_pres_value(preq_raw);
    let pres = preq_pres_value(pres_raw);

    let (initiator_addr, responder_addr) =
        if is_initiator { (&params.local_address, &params.peer_address) } else { (&params.peer_address, &params.local_address) };
    let iat = initiator_addr.address_type.is_random();
    let rat = responder_addr.address_type.is_random();
    let ia = addr_to_u128(initiator_addr);
    let ra = addr_to_u128(responder_addr);

    let my_rand = toolbox::rand_u128();
    let my_confirm = toolbox::c1(tk, my_rand, pres, preq, iat, ia, rat, ra);

    let (initiator_rand, responder_rand) = if is_initiator {
        send(channel, &SmpPdu::PairingConfirm(my_confirm.to_be_bytes()))?;
        let peer_confirm = match recv(channel)? {
            SmpPdu::PairingConfirm(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };

        send(channel, &SmpPdu::PairingRandom(my_rand.to_be_bytes()))?;
        let peer_rand = match recv(channel)? {
            SmpPdu::PairingRandom(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };

        if toolbox::c1(tk, peer_rand, pres, preq, iat, ia, rat, ra) != peer_confirm {
            return Err(fail(channel, SmpError::ConfirmValueFailed));
        }

        (my_rand, peer_rand)
    } else {
        let peer_confirm = match recv(channel)? {
            SmpPdu::PairingConfirm(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        send(channel, &SmpPdu::PairingConfirm(my_confirm.to_be_bytes()))?;

        let peer_rand = match recv(channel)? {
            SmpPdu::PairingRandom(v) => u128::from_be_bytes(v),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        send(channel, &SmpPdu::PairingRandom(my_rand.to_be_bytes()))?;

        if toolbox::c1(tk, peer_rand, pres, preq, iat, ia, rat, ra) != peer_confirm {
            return Err(fail(channel, SmpError::ConfirmValueFailed));
        }

        (peer_rand, my_rand)
    };

    let stk = toolbox::s1(tk, initiator_rand, responder_rand);
    Ok((stk, 0, 0))
}

fn exchange_phase3_keys(
    channel: &Channel,
    params: &PairingParams,
    local_distribution: KeyDistribution,
    remote_distribution: KeyDistribution,
    secure_connections: bool,
    keys: &mut PairingKeys,
) -> Result<(), Error> {
    // LE Secure Connections reuses the session LTK directly and never distributes a separate one;
    // EncryptionInformation/MasterIdentification are Legacy-only (Core Spec Vol 3, Part H, §3.6.1).
    if local_distribution.enc_key && !secure_connections {
        let bonded_ltk = toolbox::rand_u128();
        let ediv = (toolbox::rand_u128() & 0xFFFF) as u16;
        let rand = (toolbox::rand_u128() & 0xFFFF_FFFF_FFFF_FFFF) as u64;
        send(channel, &SmpPdu::EncryptionInformation { ltk: bonded_ltk })?;
        send(channel, &SmpPdu::MasterIdentification { ediv, rand })?;
    }

    if local_distribution.id_key {
        let irk = toolbox::rand_u128();
        send(channel, &SmpPdu::IdentityInformation { irk })?;
        send(channel, &SmpPdu::IdentityAddressInformation { address: params.local_address })?;
        keys.irk = Some(irk);
    }

    if local_distribution.sign_key {
        let csrk = toolbox::rand_u128();
        send(channel, &SmpPdu::SigningInformation { csrk })?;
        keys.csrk = Some(csrk);
    }

    if remote_distribution.enc_key && !secure_connections {
        let bonded_ltk = match recv(channel)? {
            SmpPdu::EncryptionInformation { ltk } => ltk,
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        let (ediv, rand) = match recv(channel)? {
            SmpPdu::MasterIdentification { ediv, rand } => (ediv, rand),
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        keys.bonded_ltk = Some(bonded_ltk);
        keys.ediv = Some(ediv);
        keys.rand = Some(rand);
    }

    if remote_distribution.id_key {
        let irk = match recv(channel)? {
            SmpPdu::IdentityInformation { irk } => irk,
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        let address = match recv(channel)? {
            SmpPdu::IdentityAddressInformation { address } => address,
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        keys.peer_irk = Some(irk);
        keys.peer_identity_address = Some(address);
    }

    if remote_distribution.sign_key {
        let csrk = match recv(channel)? {
            SmpPdu::SigningInformation { csrk } => csrk,
            _ => return Err(fail(channel, SmpError::InvalidParameters)),
        };
        keys.peer_csrk = Some(csrk);
    }

    Ok(())
}

/// Resolves a resolvable private address against a peer's IRK: recomputes `ah(irk, prand)` and
/// checks it against the address's lower 24 bits, per Core Spec Vol 3, Part H, §2.3.5.2 mirrored
/// for resolution rather than generation.
pub fn resolve_private_address(address: &Address, irk: u128) -> bool {
    if !address.address_type.is_random() || !address.address_type.is_resolvable() {
        return false;
    }

    let prand = [address.bytes[3], address.bytes[4], address.bytes[5]];
    let hash = [address.bytes[0], address.bytes[1], address.bytes[2]];
    toolbox::ah(irk, prand) == hash
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addr::AddressType;

    fn addr(random: bool) -> Address {
        Address::from_raw([0x11, 0x22, 0x33, 0x44, 0x55, 0x66], random)
    }

    #[test]
    fn no_io_always_just_works() {
        assert_eq!(select_method(IoCapability::NoInputNoOutput, IoCapability::KeyboardDisplay, true, true), PairingMethod::JustWorks);
    }

    #[test]
    fn without_mitm_always_just_works() {
        assert_eq!(select_method(IoCapability::KeyboardOnly, IoCapability::DisplayOnly, true, false), PairingMethod::JustWorks);
    }

    #[test]
    fn legacy_never_picks_numeric_comparison() {
        assert_eq!(select_method(IoCapability::DisplayYesNo, IoCapability::DisplayYesNo, false, true), PairingMethod::JustWorks);
    }

    #[test]
    fn display_yes_no_both_sides_is_numeric_comparison() {
        assert_eq!(select_method(IoCapability::DisplayYesNo, IoCapability::DisplayYesNo, true, true), PairingMethod::NumericComparison);
    }

    #[test]
    fn keyboard_only_peer_is_passkey_entry() {
        assert_eq!(select_method(IoCapability::DisplayOnly, IoCapability::KeyboardOnly, true, true), PairingMethod::PasskeyEntry);
    }

    #[test]
    fn address_for_crypto_encodes_random_bit_then_address() {
        let a = addr(false);
        let encoded = address_for_crypto(&a);
        assert_eq!(encoded[0], 0);
        assert_eq!(&encoded[1..], &a.bytes);
    }

    #[test]
    fn resolve_private_address_rejects_public_address() {
        assert!(!resolve_private_address(&addr(false), 0x1234));
    }

    #[test]
    fn resolve_private_address_round_trips_with_ah() {
        let irk = 0x0123456789abcdef0123456789abcdefu128;
        let prand = [0x40, 0x12, 0x34];
        let hash = toolbox::ah(irk, prand);
        let bytes = [hash[0], hash[1], hash[2], prand[0], prand[1], prand[2]];
        let address = Address::new(bytes, AddressType::RandomResolvablePrivate);

        assert!(resolve_private_address(&address, irk));
        assert!(!resolve_private_address(&address, irk ^ 1));
    }
}
