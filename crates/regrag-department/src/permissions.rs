//! Department-level data access rules.

use std::collections::BTreeMap;

use regrag_core::DepartmentConfig;

#[derive(Debug, Clone)]
pub struct PermissionTable {
    general: String,
    admin_role: String,
    grants: BTreeMap<String, Vec<String>>,
}

impl PermissionTable {
    pub fn from_config(config: &DepartmentConfig) -> Self {
        Self {
            general: config.general.clone(),
            admin_role: config.admin_role.clone(),
            grants: config.grants.clone(),
        }
    }

    pub fn is_admin(&self, role: Option<&str>) -> bool {
        role.map(|r| r.trim().eq_ignore_ascii_case(&self.admin_role))
            .unwrap_or(false)
    }

    /// Whether a caller may read `target`.
    ///
    /// Admins read everything, including departments missing from the table.
    /// Everyone reads the general department. Otherwise the declared
    /// department must list `target` in its grants, or be `target` itself.
    pub fn is_granted(&self, role: Option<&str>, declared: Option<&str>, target: &str) -> bool {
        if self.is_admin(role) || target == self.general {
            return true;
        }
        let Some(declared) = declared else {
            return false;
        };
        declared == target
            || self
                .grants
                .get(declared)
                .map(|allowed| allowed.iter().any(|d| d == target))
                .unwrap_or(false)
    }

    pub fn grants(&self) -> &BTreeMap<String, Vec<String>> {
        &self.grants
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> PermissionTable {
        PermissionTable::from_config(&DepartmentConfig::default())
    }

    #[test]
    fn test_grants_follow_table() {
        let t = table();
        assert!(t.is_granted(Some("staff"), Some("personnel"), "finance"));
        assert!(!t.is_granted(Some("staff"), Some("finance"), "personnel"));
        assert!(t.is_granted(Some("staff"), Some("research"), "academic_affairs"));
        assert!(!t.is_granted(None, Some("research"), "student_affairs"));
    }

    #[test]
    fn test_general_open_to_all() {
        let t = table();
        assert!(t.is_granted(None, None, "general"));
        assert!(t.is_granted(Some("guest"), Some("finance"), "general"));
        assert!(!t.is_granted(None, None, "finance"));
    }

    #[test]
    fn test_admin_wildcard() {
        let t = table();
        assert!(t.is_granted(Some("admin"), None, "library"));
        assert!(t.is_granted(Some("Admin"), Some("finance"), "personnel"));
    }
}
