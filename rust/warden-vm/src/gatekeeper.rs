//! Authorization policy seam for `ADDRESS` validation.
//!
//! The gatekeeper is supplied by the embedder and is purely advisory from
//! the VM's perspective: the VM forwards `(scope, token)` pairs and never
//! inspects token content, which keeps authorization policy decoupled
//! from execution.

use std::collections::BTreeMap;

pub trait Gatekeeper {
    fn validate(&self, scope: &str, token: &str) -> bool;
}

/// Reference gatekeeper holding an explicit `(scope, token)` allowlist.
#[derive(Debug, Default, Clone)]
pub struct AllowListGatekeeper {
    tokens: BTreeMap<String, Vec<String>>,
}

impl AllowListGatekeeper {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn allow(mut self, scope: &str, token: &str) -> Self {
        self.tokens
            .entry(scope.to_string())
            .or_default()
            .push(token.to_string());
        self
    }
}

impl Gatekeeper for AllowListGatekeeper {
    fn validate(&self, scope: &str, token: &str) -> bool {
        self.tokens
            .get(scope)
            .is_some_and(|ts| ts.iter().any(|t| t == token))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn allowlist_accepts_known_pairs() {
        let gk = AllowListGatekeeper::new()
            .allow("HTTP-ENV", "http-token")
            .allow("FS-ENV", "fs-token");
        assert!(gk.validate("HTTP-ENV", "http-token"));
        assert!(gk.validate("FS-ENV", "fs-token"));
    }

    #[test]
    fn allowlist_rejects_everything_else() {
        let gk = AllowListGatekeeper::new().allow("HTTP-ENV", "http-token");
        assert!(!gk.validate("HTTP-ENV", "wrong"));
        assert!(!gk.validate("FS-ENV", "http-token"));
        assert!(!gk.validate("", ""));
    }
}
