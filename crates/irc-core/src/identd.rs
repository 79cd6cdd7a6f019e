//! Ident helper service (spec §6): a process-wide registry the engine registers/unregisters scoped
//! entries with. Its own listening socket loop is not specified here — only the registration
//! interface the connection engine drives.

/// One registered ident lookup, keyed the way RFC 1413 clients query: the remote peer's address/
/// port and the local port they connected to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct IdentKey {
    pub remote_addr: std::net::IpAddr,
    pub remote_port: u16,
    pub local_port: u16,
}

pub trait IdentServer: Send + Sync {
    /// Register a login name to answer with for this key. The connection engine calls
    /// `unregister` with the same key once the socket it was registered for goes down.
    fn register(&self, key: IdentKey, login: String);

    fn unregister(&self, key: IdentKey);
}
