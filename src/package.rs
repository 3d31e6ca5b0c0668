use bitflags::bitflags;

bitflags! {
    /// Capabilities advertised by a security package.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct PackageCapabilities: u32 {
        const INTEGRITY = 0x1;
        const PRIVACY = 0x2;
        const TOKEN_ONLY = 0x4;
        const DATAGRAM = 0x8;
        const CONNECTION = 0x10;
        const MULTI_REQUIRED = 0x20;
        const CLIENT_ONLY = 0x40;
        const EXTENDED_ERROR = 0x80;
        const IMPERSONATION = 0x100;
        const ACCEPT_WIN32_NAME = 0x200;
        const STREAM = 0x400;
        const NEGOTIABLE = 0x800;
        const GSS_COMPATIBLE = 0x1000;
        const LOGON = 0x2000;
        const MUTUAL_AUTH = 0x1_0000;
        const DELEGATION = 0x2_0000;
    }
}

/// Metadata describing a security package, resolved once per credential.
///
/// `max_token_len` drives the sizing of handshake output buffers: the package promises
/// that no token it produces will ever exceed it.
#[derive(Debug, Clone)]
pub struct PackageInfo {
    pub name: String,
    pub capabilities: PackageCapabilities,
    pub rpc_id: u16,
    pub max_token_len: u32,
    pub comment: String,
}

/// Per-context buffer-size expectations, negotiated with the peer.
///
/// These may change over the life of a context (e.g. after renegotiation), which is
/// why message-protection operations query them per call instead of caching them.
#[derive(Debug, Clone, Default)]
pub struct ContextSizes {
    pub max_token: u32,
    pub max_signature: u32,
    pub block: u32,
    pub security_trailer: u32,
}
