//! Per-connection records.
//!
//! The transport stack hands the core a [`ConnectionStatus`] snapshot with
//! every event.  The handler keeps one [`ConnectionContext`] per live link
//! in a fixed-capacity [`ConnectionTable`]; a context exists exactly from
//! connect to disconnect.

use core::fmt;

use super::mode::Mode;

/// Maximum concurrent links tracked (power of two for `FnvIndexMap`).
pub const MAX_CONNECTIONS: usize = 4;

/// ATT default MTU before any exchange.
pub const DEFAULT_ATT_MTU: u16 = 23;

/// Opaque connection identifier assigned by the transport stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnHandle(pub u16);

impl fmt::Display for ConnHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AddrKind {
    Public,
    Random,
}

/// 48-bit Bluetooth device address, most significant byte first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BdAddr {
    pub bytes: [u8; 6],
    pub kind: AddrKind,
}

impl BdAddr {
    pub const fn new(bytes: [u8; 6], kind: AddrKind) -> Self {
        Self { bytes, kind }
    }

    /// Random address whose top two bits are `01` (resolvable private).
    pub fn is_resolvable_private(&self) -> bool {
        self.kind == AddrKind::Random && self.bytes[0] & 0xC0 == 0x40
    }
}

impl fmt::Display for BdAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let b = &self.bytes;
        write!(
            f,
            "{:02x}:{:02x}:{:02x}:{:02x}:{:02x}:{:02x}",
            b[0], b[1], b[2], b[3], b[4], b[5]
        )?;
        if self.kind == AddrKind::Random {
            write!(f, " (random)")?;
        }
        Ok(())
    }
}

/// Identity and security status of a link as reported by the stack.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionStatus {
    pub handle: ConnHandle,
    /// Address seen on the air for this connection.
    pub peer_addr: BdAddr,
    /// Resolved identity address; equals `peer_addr` until keys are shared.
    pub identity_addr: BdAddr,
    pub authenticated: bool,
    pub encrypted: bool,
    /// Encryption key size in bytes; 0 when unencrypted or not reported.
    pub key_size: u8,
}

/// Handler-owned record for one live connection.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectionContext {
    pub handle: ConnHandle,
    pub peer_addr: BdAddr,
    pub identity_addr: BdAddr,
    pub bonded: bool,
    pub authenticated: bool,
    pub encrypted: bool,
    pub key_size: u8,
    pub mtu: u16,
    /// Mode in force when the link was admitted.
    pub admitted_under: Mode,
}

impl ConnectionContext {
    pub fn new(status: &ConnectionStatus, bonded: bool, mode: Mode) -> Self {
        Self {
            handle: status.handle,
            peer_addr: status.peer_addr,
            identity_addr: status.identity_addr,
            bonded,
            authenticated: status.authenticated,
            encrypted: status.encrypted,
            key_size: status.key_size,
            mtu: DEFAULT_ATT_MTU,
            admitted_under: mode,
        }
    }

    /// Fold a fresh status snapshot (e.g. after pairing) into the record.
    pub fn refresh(&mut self, status: &ConnectionStatus, bonded: bool) {
        self.peer_addr = status.peer_addr;
        self.identity_addr = status.identity_addr;
        self.bonded = bonded;
        self.authenticated = status.authenticated;
        self.encrypted = status.encrypted;
        self.key_size = status.key_size;
    }
}

/// Live connection contexts keyed by handle.
pub struct ConnectionTable {
    entries: heapless::FnvIndexMap<ConnHandle, ConnectionContext, MAX_CONNECTIONS>,
}

impl ConnectionTable {
    pub fn new() -> Self {
        Self {
            entries: heapless::FnvIndexMap::new(),
        }
    }

    /// Insert a context.  Hands it back if the table is full.
    pub fn insert(&mut self, ctx: ConnectionContext) -> Result<(), ConnectionContext> {
        if self.entries.contains_key(&ctx.handle) || self.entries.len() < MAX_CONNECTIONS {
            self.entries
                .insert(ctx.handle, ctx)
                .map(|_| ())
                .map_err(|(_, ctx)| ctx)
        } else {
            Err(ctx)
        }
    }

    pub fn get(&self, handle: ConnHandle) -> Option<&ConnectionContext> {
        self.entries.get(&handle)
    }

    pub fn get_mut(&mut self, handle: ConnHandle) -> Option<&mut ConnectionContext> {
        self.entries.get_mut(&handle)
    }

    pub fn remove(&mut self, handle: ConnHandle) -> Option<ConnectionContext> {
        self.entries.remove(&handle)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Default for ConnectionTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn status(handle: u16) -> ConnectionStatus {
        let addr = BdAddr::new([0x4a, 0, 0, 0, 0, handle as u8], AddrKind::Random);
        ConnectionStatus {
            handle: ConnHandle(handle),
            peer_addr: addr,
            identity_addr: addr,
            authenticated: false,
            encrypted: false,
            key_size: 0,
        }
    }

    #[test]
    fn addr_display_is_msb_first() {
        let a = BdAddr::new([0xaa, 0xbb, 0xcc, 0x01, 0x02, 0x03], AddrKind::Public);
        assert_eq!(format!("{a}"), "aa:bb:cc:01:02:03");
        let r = BdAddr::new([0x4a, 0xbb, 0xcc, 0x01, 0x02, 0x03], AddrKind::Random);
        assert_eq!(format!("{r}"), "4a:bb:cc:01:02:03 (random)");
        assert!(r.is_resolvable_private());
        assert!(!a.is_resolvable_private());
    }

    #[test]
    fn table_rejects_when_full() {
        let mut t = ConnectionTable::new();
        for h in 0..MAX_CONNECTIONS as u16 {
            assert!(t.insert(ConnectionContext::new(&status(h), false, Mode::Open)).is_ok());
        }
        let extra = ConnectionContext::new(&status(99), false, Mode::Open);
        let back = t.insert(extra).unwrap_err();
        assert_eq!(back.handle, ConnHandle(99));
        assert_eq!(t.len(), MAX_CONNECTIONS);

        // Re-inserting an existing handle replaces in place.
        assert!(t.insert(ConnectionContext::new(&status(0), true, Mode::Open)).is_ok());
        assert!(t.get(ConnHandle(0)).unwrap().bonded);
    }

    #[test]
    fn refresh_updates_security_fields_only() {
        let mut ctx = ConnectionContext::new(&status(1), false, Mode::Open);
        ctx.mtu = 185;
        let mut s = status(1);
        s.encrypted = true;
        s.key_size = 16;
        ctx.refresh(&s, true);
        assert!(ctx.encrypted && ctx.bonded);
        assert_eq!(ctx.key_size, 16);
        assert_eq!(ctx.mtu, 185);
        assert_eq!(ctx.admitted_under, Mode::Open);
    }
}
