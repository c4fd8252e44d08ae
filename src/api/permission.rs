/// Runtime permissions the host grants the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Permission {
    Scan,
    /// Connecting and bonding.
    Connect,
}

/// The host's permission-status query. The gateway never requests permissions itself; it asks
/// before each scan, connect and pair and fails fast with
/// [`Error::PermissionDenied`](crate::Error::PermissionDenied) when denied.
pub trait PermissionCheck: Send + Sync {
    fn check(&self, permission: Permission) -> bool;
}

/// Grants everything. The default for hosts without a permission model.
#[derive(Debug, Clone, Copy, Default)]
pub struct AllowAll;

impl PermissionCheck for AllowAll {
    fn check(&self, _permission: Permission) -> bool {
        true
    }
}

impl<F> PermissionCheck for F
where
    F: Fn(Permission) -> bool + Send + Sync,
{
    fn check(&self, permission: Permission) -> bool {
        self(permission)
    }
}
