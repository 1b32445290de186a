use std::collections::HashMap;

use super::guard::RouteRequirement;

/// Requirements declared for each route path
///
/// Built once at startup and never mutated. Paths without a declaration are
/// treated as public.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    routes: HashMap<String, RouteRequirement>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach `requirement` to `path` (the router's matched path pattern)
    pub fn declare(mut self, path: impl Into<String>, requirement: RouteRequirement) -> Self {
        let path = path.into();
        if self.routes.insert(path.clone(), requirement).is_some() {
            tracing::warn!(path = %path, "Route requirement declared twice, keeping the last one");
        }
        self
    }

    pub fn requirement(&self, path: &str) -> RouteRequirement {
        self.routes.get(path).cloned().unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_undeclared_path_is_public() {
        let table = RouteTable::new().declare("/admin", RouteRequirement::with_roles(["app_admin"]));
        assert_eq!(table.requirement("/unknown"), RouteRequirement::public());
    }

    #[test]
    fn test_declared_requirement_returned() {
        let table = RouteTable::new()
            .declare("/", RouteRequirement::public())
            .declare("/admin", RouteRequirement::with_roles(["app_admin"]));

        let admin = table.requirement("/admin");
        assert!(admin.requires_auth());
        assert_eq!(admin.allowed_roles().collect::<Vec<_>>(), vec!["app_admin"]);
        assert!(!table.requirement("/").requires_auth());
    }
}
