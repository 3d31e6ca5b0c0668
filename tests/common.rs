//! In-process security provider used by the integration tests.
//!
//! The loopback package performs a single-leg handshake: the initiator sends its name
//! and a random nonce, the acceptor replies with its own, and both sides derive the
//! session key from the two nonces. Message protection is a keyed hash over the
//! payload plus a hash-derived XOR stream, which is enough to exercise tamper
//! detection end to end without a real cryptosystem.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use sha2::{Digest, Sha256};
use time::OffsetDateTime;

use secpkg::{
    AcquiredCredential, AuthIdentity, BufferSet, BufferType, ClientContext, ContextFlags,
    ContextSizes, ContextStringAttribute, Credential, CredentialUse, PackageCapabilities,
    PackageInfo, PackageResult, RawHandle, SecureBuffer, SecurityProvider, SecurityStatus,
    ServerContext, StepResult,
};

pub const PACKAGE_NAME: &str = "Loopback";
pub const AUTHORITY_NAME: &str = "LOOPBACK";

const CLIENT_TAG: &[u8; 5] = b"LOOP1";
const SERVER_TAG: &[u8; 5] = b"LOOP2";
const HANDLE_MARK: u64 = 0x10_0b;

const MAX_TOKEN: u32 = 512;
const TRAILER_LEN: usize = 32;
const SIGNATURE_LEN: usize = 32;

struct CredentialEntry {
    name: String,
}

struct ContextEntry {
    local_name: String,
    peer_name: Option<String>,
    nonce: [u8; 16],
    flags: ContextFlags,
    key: Option<[u8; 32]>,
}

#[derive(Default)]
struct State {
    next_id: u64,
    credentials: HashMap<u64, CredentialEntry>,
    contexts: HashMap<u64, ContextEntry>,
}

pub struct LoopbackProvider {
    state: Mutex<State>,
    impersonation_supported: bool,
    impersonate_calls: AtomicUsize,
    revert_calls: AtomicUsize,
}

impl LoopbackProvider {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            impersonation_supported: true,
            impersonate_calls: AtomicUsize::new(0),
            revert_calls: AtomicUsize::new(0),
        })
    }

    pub fn without_impersonation() -> Arc<Self> {
        Arc::new(Self {
            state: Mutex::new(State::default()),
            impersonation_supported: false,
            impersonate_calls: AtomicUsize::new(0),
            revert_calls: AtomicUsize::new(0),
        })
    }

    pub fn impersonate_calls(&self) -> usize {
        self.impersonate_calls.load(Ordering::SeqCst)
    }

    pub fn revert_calls(&self) -> usize {
        self.revert_calls.load(Ordering::SeqCst)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn allocate(state: &mut State) -> u64 {
        state.next_id += 1;
        state.next_id
    }

    fn capabilities(&self) -> PackageCapabilities {
        let mut caps = PackageCapabilities::INTEGRITY
            | PackageCapabilities::PRIVACY
            | PackageCapabilities::CONNECTION
            | PackageCapabilities::MUTUAL_AUTH;
        if self.impersonation_supported {
            caps |= PackageCapabilities::IMPERSONATION;
        }
        caps
    }
}

fn handle_for(id: u64) -> RawHandle {
    RawHandle::new(id, HANDLE_MARK)
}

fn build_token(tag: &[u8; 5], name: &str, nonce: &[u8; 16]) -> Vec<u8> {
    let mut token = Vec::with_capacity(5 + 1 + name.len() + 16);
    token.extend_from_slice(tag);
    token.push(name.len() as u8);
    token.extend_from_slice(name.as_bytes());
    token.extend_from_slice(nonce);
    token
}

fn parse_token(tag: &[u8; 5], token: &[u8]) -> Option<(String, [u8; 16])> {
    let rest = token.strip_prefix(tag.as_slice())?;
    let (&name_len, rest) = rest.split_first()?;
    let name_len = usize::from(name_len);
    if rest.len() != name_len + 16 {
        return None;
    }
    let name = String::from_utf8(rest[..name_len].to_vec()).ok()?;
    let mut nonce = [0u8; 16];
    nonce.copy_from_slice(&rest[name_len..]);
    Some((name, nonce))
}

fn derive_key(initiator_nonce: &[u8; 16], acceptor_nonce: &[u8; 16]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(initiator_nonce);
    hasher.update(acceptor_nonce);
    hasher.finalize().into()
}

fn keyed_hash(key: &[u8; 32], label: &[u8], payload: &[u8]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    hasher.update(key);
    hasher.update(label);
    hasher.update(payload);
    hasher.finalize().into()
}

fn keystream_xor(key: &[u8; 32], data: &mut [u8]) {
    for (block, chunk) in data.chunks_mut(32).enumerate() {
        let mut hasher = Sha256::new();
        hasher.update(key);
        hasher.update(b"stream");
        hasher.update((block as u64).to_be_bytes());
        let pad: [u8; 32] = hasher.finalize().into();
        for (byte, key_byte) in chunk.iter_mut().zip(pad.iter()) {
            *byte ^= key_byte;
        }
    }
}

fn write_token(output: &mut BufferSet<'_>, token: &[u8]) -> PackageResult<()> {
    let buffer = output
        .find_mut(BufferType::Token)
        .map_err(|_| SecurityStatus::InternalError)?;
    if token.len() > buffer.capacity() {
        return Err(SecurityStatus::BufferTooSmall);
    }
    buffer.full_mut()[..token.len()].copy_from_slice(token);
    buffer
        .set_used(token.len())
        .map_err(|_| SecurityStatus::InternalError)?;
    Ok(())
}

fn read_token(input: &mut BufferSet<'_>) -> PackageResult<Vec<u8>> {
    Ok(input
        .find(BufferType::Token)
        .map_err(|_| SecurityStatus::InvalidToken)?
        .data()
        .to_vec())
}

fn buffer_mut<'a>(
    set: &'a mut BufferSet<'_>,
    buffer_type: BufferType,
) -> PackageResult<&'a mut SecureBuffer> {
    set.find_mut(buffer_type)
        .map_err(|_| SecurityStatus::InternalError)
}

impl LoopbackProvider {
    fn with_established<T>(
        &self,
        context: RawHandle,
        f: impl FnOnce(&mut ContextEntry, [u8; 32]) -> PackageResult<T>,
    ) -> PackageResult<T> {
        let mut state = self.lock();
        let entry = state
            .contexts
            .get_mut(&context.low)
            .ok_or(SecurityStatus::InvalidHandle)?;
        let key = entry.key.ok_or(SecurityStatus::InvalidHandle)?;
        f(entry, key)
    }
}

impl SecurityProvider for LoopbackProvider {
    fn package_info(&self, package: &str) -> PackageResult<PackageInfo> {
        if package != PACKAGE_NAME {
            return Err(SecurityStatus::PackageNotFound);
        }
        Ok(PackageInfo {
            name: PACKAGE_NAME.to_owned(),
            capabilities: self.capabilities(),
            rpc_id: 0xFFFF,
            max_token_len: MAX_TOKEN,
            comment: "in-process loopback package".to_owned(),
        })
    }

    fn acquire_credential(
        &self,
        package: &str,
        _usage: CredentialUse,
        identity: Option<&AuthIdentity>,
    ) -> PackageResult<AcquiredCredential> {
        if package != PACKAGE_NAME {
            return Err(SecurityStatus::PackageNotFound);
        }
        let name = identity
            .map(|id| id.username.clone())
            .unwrap_or_else(|| "loopback-user".to_owned());

        let mut state = self.lock();
        let id = Self::allocate(&mut state);
        state.credentials.insert(id, CredentialEntry { name });
        Ok(AcquiredCredential {
            handle: handle_for(id),
            expiry: OffsetDateTime::now_utc() + time::Duration::days(1),
        })
    }

    fn initialize_context(
        &self,
        credential: RawHandle,
        context: Option<RawHandle>,
        _target: Option<&str>,
        requested: ContextFlags,
        input: Option<&mut BufferSet<'_>>,
        output: &mut BufferSet<'_>,
    ) -> PackageResult<StepResult> {
        match context {
            None => {
                let mut state = self.lock();
                let local_name = state
                    .credentials
                    .get(&credential.low)
                    .ok_or(SecurityStatus::InvalidHandle)?
                    .name
                    .clone();
                let nonce: [u8; 16] = rand::random();
                let id = Self::allocate(&mut state);
                state.contexts.insert(
                    id,
                    ContextEntry {
                        local_name: local_name.clone(),
                        peer_name: None,
                        nonce,
                        flags: requested,
                        key: None,
                    },
                );
                drop(state);

                write_token(output, &build_token(CLIENT_TAG, &local_name, &nonce))?;
                Ok(StepResult {
                    status: SecurityStatus::ContinueNeeded,
                    handle: handle_for(id),
                    flags: requested,
                    expiry: OffsetDateTime::now_utc(),
                })
            }
            Some(existing) => {
                let input = input.ok_or(SecurityStatus::InvalidToken)?;
                let token = read_token(input)?;
                let (server_name, server_nonce) =
                    parse_token(SERVER_TAG, &token).ok_or(SecurityStatus::InvalidToken)?;

                let mut state = self.lock();
                let entry = state
                    .contexts
                    .get_mut(&existing.low)
                    .ok_or(SecurityStatus::InvalidHandle)?;
                entry.key = Some(derive_key(&entry.nonce, &server_nonce));
                entry.peer_name = Some(server_name);
                let flags = entry.flags;
                drop(state);

                let token_buffer = buffer_mut(output, BufferType::Token)?;
                token_buffer
                    .set_used(0)
                    .map_err(|_| SecurityStatus::InternalError)?;
                Ok(StepResult {
                    status: SecurityStatus::Ok,
                    handle: existing,
                    flags,
                    expiry: OffsetDateTime::now_utc() + time::Duration::hours(8),
                })
            }
        }
    }

    fn accept_context(
        &self,
        credential: RawHandle,
        context: Option<RawHandle>,
        input: &mut BufferSet<'_>,
        requested: ContextFlags,
        output: &mut BufferSet<'_>,
    ) -> PackageResult<StepResult> {
        if context.is_some() {
            // The loopback handshake always finishes in one acceptor step.
            return Err(SecurityStatus::InvalidToken);
        }
        let token = read_token(input)?;
        let (client_name, client_nonce) =
            parse_token(CLIENT_TAG, &token).ok_or(SecurityStatus::InvalidToken)?;

        let mut state = self.lock();
        let local_name = state
            .credentials
            .get(&credential.low)
            .ok_or(SecurityStatus::InvalidHandle)?
            .name
            .clone();
        let nonce: [u8; 16] = rand::random();
        let id = Self::allocate(&mut state);
        state.contexts.insert(
            id,
            ContextEntry {
                local_name: local_name.clone(),
                peer_name: Some(client_name),
                nonce,
                flags: requested,
                key: Some(derive_key(&client_nonce, &nonce)),
            },
        );
        drop(state);

        write_token(output, &build_token(SERVER_TAG, &local_name, &nonce))?;
        Ok(StepResult {
            status: SecurityStatus::Ok,
            handle: handle_for(id),
            flags: requested,
            expiry: OffsetDateTime::now_utc() + time::Duration::hours(8),
        })
    }

    fn query_sizes(&self, context: RawHandle) -> PackageResult<ContextSizes> {
        self.with_established(context, |_, _| {
            Ok(ContextSizes {
                max_token: MAX_TOKEN,
                max_signature: SIGNATURE_LEN as u32,
                block: 16,
                security_trailer: TRAILER_LEN as u32,
            })
        })
    }

    fn query_string(
        &self,
        context: RawHandle,
        attribute: ContextStringAttribute,
    ) -> PackageResult<Option<String>> {
        self.with_established(context, |entry, _| match attribute {
            ContextStringAttribute::Authority => Ok(Some(AUTHORITY_NAME.to_owned())),
            ContextStringAttribute::Names => Ok(entry.peer_name.clone()),
        })
    }

    fn query_credential_name(&self, credential: RawHandle) -> PackageResult<Option<String>> {
        let state = self.lock();
        let entry = state
            .credentials
            .get(&credential.low)
            .ok_or(SecurityStatus::InvalidHandle)?;
        Ok(Some(entry.name.clone()))
    }

    fn query_session_key(&self, context: RawHandle) -> PackageResult<Vec<u8>> {
        self.with_established(context, |_, key| Ok(key.to_vec()))
    }

    fn encrypt_message(
        &self,
        context: RawHandle,
        message: &mut BufferSet<'_>,
    ) -> PackageResult<()> {
        let key = self.with_established(context, |_, key| Ok(key))?;

        let data = buffer_mut(message, BufferType::Data)?;
        keystream_xor(&key, data.full_mut());
        let trailer = keyed_hash(&key, b"seal", data.data());

        let trailer_buffer = buffer_mut(message, BufferType::Token)?;
        if trailer_buffer.capacity() < TRAILER_LEN {
            return Err(SecurityStatus::BufferTooSmall);
        }
        trailer_buffer.full_mut()[..TRAILER_LEN].copy_from_slice(&trailer);
        trailer_buffer
            .set_used(TRAILER_LEN)
            .map_err(|_| SecurityStatus::InternalError)?;

        // Stream cipher: no padding needed.
        buffer_mut(message, BufferType::Padding)?
            .set_used(0)
            .map_err(|_| SecurityStatus::InternalError)?;
        Ok(())
    }

    fn decrypt_message(
        &self,
        context: RawHandle,
        message: &mut BufferSet<'_>,
    ) -> PackageResult<()> {
        let key = self.with_established(context, |_, key| Ok(key))?;

        let expected = {
            let data = message
                .find(BufferType::Data)
                .map_err(|_| SecurityStatus::InternalError)?;
            keyed_hash(&key, b"seal", data.data())
        };
        let trailer = message
            .find(BufferType::Token)
            .map_err(|_| SecurityStatus::InternalError)?;
        if trailer.data() != expected.as_slice() {
            return Err(SecurityStatus::MessageAltered);
        }

        let data = buffer_mut(message, BufferType::Data)?;
        keystream_xor(&key, data.full_mut());
        Ok(())
    }

    fn make_signature(
        &self,
        context: RawHandle,
        message: &mut BufferSet<'_>,
    ) -> PackageResult<()> {
        let key = self.with_established(context, |_, key| Ok(key))?;

        let signature = {
            let data = message
                .find(BufferType::Data)
                .map_err(|_| SecurityStatus::InternalError)?;
            keyed_hash(&key, b"sign", data.data())
        };
        let signature_buffer = buffer_mut(message, BufferType::Token)?;
        if signature_buffer.capacity() < SIGNATURE_LEN {
            return Err(SecurityStatus::BufferTooSmall);
        }
        signature_buffer.full_mut()[..SIGNATURE_LEN].copy_from_slice(&signature);
        signature_buffer
            .set_used(SIGNATURE_LEN)
            .map_err(|_| SecurityStatus::InternalError)?;
        Ok(())
    }

    fn verify_signature(
        &self,
        context: RawHandle,
        message: &mut BufferSet<'_>,
    ) -> PackageResult<()> {
        let key = self.with_established(context, |_, key| Ok(key))?;

        let expected = {
            let data = message
                .find(BufferType::Data)
                .map_err(|_| SecurityStatus::InternalError)?;
            keyed_hash(&key, b"sign", data.data())
        };
        let signature = message
            .find(BufferType::Token)
            .map_err(|_| SecurityStatus::InternalError)?;
        if signature.data() != expected.as_slice() {
            return Err(SecurityStatus::MessageAltered);
        }
        Ok(())
    }

    fn impersonate(&self, context: RawHandle) -> PackageResult<()> {
        self.with_established(context, |_, _| Ok(()))?;
        if !self.impersonation_supported {
            return Err(SecurityStatus::NoImpersonation);
        }
        self.impersonate_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn revert(&self, context: RawHandle) -> PackageResult<()> {
        self.with_established(context, |_, _| Ok(()))?;
        self.revert_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn delete_context(&self, context: RawHandle) {
        self.lock().contexts.remove(&context.low);
    }

    fn free_credential(&self, credential: RawHandle) {
        self.lock().credentials.remove(&credential.low);
    }
}

pub fn outbound_credential(provider: &Arc<LoopbackProvider>, user: &str) -> Arc<Credential> {
    let identity = AuthIdentity {
        username: user.to_owned(),
        domain: None,
        password: "hunter2".to_owned().into(),
    };
    Arc::new(
        Credential::acquire(
            Arc::clone(provider) as Arc<dyn SecurityProvider>,
            PACKAGE_NAME,
            CredentialUse::Outbound,
            Some(identity),
        )
        .expect("outbound credential"),
    )
}

pub fn inbound_credential(provider: &Arc<LoopbackProvider>, user: &str) -> Arc<Credential> {
    let identity = AuthIdentity {
        username: user.to_owned(),
        domain: None,
        password: "hunter2".to_owned().into(),
    };
    Arc::new(
        Credential::acquire(
            Arc::clone(provider) as Arc<dyn SecurityProvider>,
            PACKAGE_NAME,
            CredentialUse::Inbound,
            Some(identity),
        )
        .expect("inbound credential"),
    )
}

pub fn default_flags() -> ContextFlags {
    ContextFlags::CONFIDENTIALITY
        | ContextFlags::INTEGRITY
        | ContextFlags::MUTUAL_AUTH
        | ContextFlags::CONNECTION
}

/// Runs the full loopback handshake and returns both established sides.
pub fn establish(provider: &Arc<LoopbackProvider>) -> (ClientContext, ServerContext) {
    let mut client = ClientContext::new(
        outbound_credential(provider, "alice"),
        Some("host/loopback"),
        default_flags(),
    );
    let mut server = ServerContext::new(inbound_credential(provider, "bob"), default_flags());

    let first = client.init(None).expect("first client step");
    assert!(!first.is_complete());
    let token = first.token.expect("initiator token");

    let reply = server.accept(&token).expect("server step");
    assert!(reply.is_complete());
    let token = reply.token.expect("acceptor token");

    let last = client.init(Some(&token)).expect("final client step");
    assert!(last.is_complete());
    assert!(last.token.is_none());

    assert!(client.is_established());
    assert!(server.is_established());
    (client, server)
}
