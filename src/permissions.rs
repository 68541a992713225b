//! Runtime permission and location-service checks.
//!
//! Some platforms gate BLE scanning behind runtime permissions, and older
//! Android releases additionally need the location service turned on. The
//! scanner asks a [`PermissionProvider`] before starting; it never tries to
//! obtain a permission itself.

#[cfg(test)]
use mockall::automock;

/// Supplies the current permission and location-service state.
#[cfg_attr(test, automock)]
pub trait PermissionProvider: Send + Sync {
    /// Whether the permissions needed for scanning and connecting are granted.
    fn is_permission_granted(&self) -> bool;

    /// Whether this platform needs the location service on to see results.
    fn is_location_required(&self) -> bool;

    /// Whether the location service is currently on.
    fn is_location_enabled(&self) -> bool;

    /// Record that results arrive even with location off, so location is
    /// not required on this device.
    fn mark_location_not_required(&self);

    /// Name of the missing permission, for error reporting.
    fn missing_permission(&self) -> String {
        "bluetooth".to_string()
    }
}

/// Provider for hosts without runtime permissions (Linux, Windows, macOS
/// command-line tools): everything is granted and location is never needed.
#[derive(Debug, Clone, Copy, Default)]
pub struct GrantedPermissions;

impl PermissionProvider for GrantedPermissions {
    fn is_permission_granted(&self) -> bool {
        true
    }

    fn is_location_required(&self) -> bool {
        false
    }

    fn is_location_enabled(&self) -> bool {
        true
    }

    fn mark_location_not_required(&self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_granted_permissions() {
        let provider = GrantedPermissions;
        assert!(provider.is_permission_granted());
        assert!(!provider.is_location_required());
        assert!(provider.is_location_enabled());
        assert_eq!(provider.missing_permission(), "bluetooth");
    }

    #[test]
    fn test_mock_provider() {
        let mut provider = MockPermissionProvider::new();
        provider.expect_is_permission_granted().return_const(false);
        provider
            .expect_missing_permission()
            .return_const("BLUETOOTH_SCAN".to_string());

        assert!(!provider.is_permission_granted());
        assert_eq!(provider.missing_permission(), "BLUETOOTH_SCAN");
    }
}
