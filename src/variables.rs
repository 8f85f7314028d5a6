//! Variable resolution for `$NAME` / `${NAME}` references in command text.
//!
//! Two modes, selected by which entry point the caller used (§4.A, §6):
//! an explicit map is strict (a missing name fails the parse), the process
//! environment is lenient (a missing name resolves to an empty string).

use std::collections::HashMap;

/// Resolves variable names to values, either from an explicit map (strict)
/// or from the process environment (lenient).
#[derive(Debug, Clone)]
pub enum VariableResolver {
    Explicit(HashMap<String, String>),
    Environment,
}

impl VariableResolver {
    #[must_use]
    pub fn explicit(vars: HashMap<String, String>) -> Self {
        Self::Explicit(vars)
    }

    #[must_use]
    pub const fn environment() -> Self {
        Self::Environment
    }

    #[must_use]
    pub const fn is_strict(&self) -> bool {
        matches!(self, Self::Explicit(_))
    }

    /// Resolves `name`, returning `None` on a miss.
    ///
    /// In `Environment` mode a miss is reported the same as `std::env::var`
    /// failing — callers in lenient mode should treat `None` as an empty
    /// string rather than a parse failure.
    #[must_use]
    pub fn resolve(&self, name: &str) -> Option<String> {
        match self {
            Self::Explicit(map) => map.get(name).cloned(),
            Self::Environment => std::env::var(name).ok(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_strict_miss() {
        let resolver = VariableResolver::explicit(HashMap::new());
        assert!(resolver.is_strict());
        assert_eq!(resolver.resolve("MISSING"), None);
    }

    #[test]
    fn explicit_hit() {
        let mut vars = HashMap::new();
        vars.insert("API_URL".to_string(), "https://api.example.com".to_string());
        let resolver = VariableResolver::explicit(vars);
        assert_eq!(
            resolver.resolve("API_URL").as_deref(),
            Some("https://api.example.com")
        );
    }

    #[test]
    fn environment_lenient_miss() {
        let resolver = VariableResolver::environment();
        assert!(!resolver.is_strict());
        assert_eq!(resolver.resolve("CURLKIT_DEFINITELY_UNSET_VAR_XYZ"), None);
    }
}
