//! Global identifier to local interface name mapping
//!
//! Local names are derived from a digest of the global identifier so the
//! same device gets the same name across restarts. The durable mapping is
//! the alias the driver records on the device; lookups go back to the
//! backend, never to process memory.

use crate::error::{Error, Result};
use sha2::{Digest, Sha256};
use std::fmt::Debug;
use tracing::warn;

/// Longest kernel interface name (IFNAMSIZ - 1)
pub const MAX_NAME_LEN: usize = 15;

const DIGEST_CHARS: usize = 8;
const MAX_ATTEMPTS: u32 = 16;

/// Which kind of device a name is generated for
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceClass {
    Bridge,
    Tunnel,
}

impl DeviceClass {
    fn tag(self) -> char {
        match self {
            DeviceClass::Bridge => 'b',
            DeviceClass::Tunnel => 't',
        }
    }
}

/// Check a name against kernel interface naming rules
pub fn validate_local_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("empty interface name".into()));
    }
    if name.len() > MAX_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "interface name '{}' longer than {} bytes",
            name, MAX_NAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!("interface name '{}' is reserved", name)));
    }
    if name.chars().any(|c| c == '/' || c == ':' || c.is_whitespace() || c.is_control()) {
        return Err(Error::InvalidArgument(format!(
            "interface name '{}' contains an invalid character",
            name
        )));
    }
    Ok(())
}

/// Generates host-local names like `fabb1a2b3c4d`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NameGenerator {
    prefix: String,
}

impl Default for NameGenerator {
    fn default() -> Self {
        Self {
            prefix: "fab".into(),
        }
    }
}

impl NameGenerator {
    pub fn new(prefix: &str) -> Result<Self> {
        if prefix.is_empty()
            || prefix.len() + 1 + DIGEST_CHARS > MAX_NAME_LEN
            || !prefix.chars().all(|c| c.is_ascii_alphanumeric())
        {
            return Err(Error::ConfigValidation(format!(
                "name prefix '{}' must be 1-{} alphanumeric characters",
                prefix,
                MAX_NAME_LEN - 1 - DIGEST_CHARS
            )));
        }
        Ok(Self {
            prefix: prefix.to_string(),
        })
    }

    fn candidate(&self, class: DeviceClass, global_id: &str, attempt: u32) -> String {
        let mut hasher = Sha256::new();
        hasher.update(global_id.as_bytes());
        if attempt > 0 {
            hasher.update(attempt.to_be_bytes());
        }
        let digest = hex::encode(hasher.finalize());
        format!("{}{}{}", self.prefix, class.tag(), &digest[..DIGEST_CHARS])
    }

    /// First candidate name for `global_id` that `taken` reports free
    pub fn generate<F>(&self, class: DeviceClass, global_id: &str, mut taken: F) -> Result<String>
    where
        F: FnMut(&str) -> Result<bool>,
    {
        for attempt in 0..MAX_ATTEMPTS {
            let name = self.candidate(class, global_id, attempt);
            if !taken(&name)? {
                return Ok(name);
            }
        }
        Err(Error::AlreadyExists(format!(
            "no free interface name for '{}' after {} attempts",
            global_id, MAX_ATTEMPTS
        )))
    }
}

/// Pick the device to bind from an alias lookup
///
/// Several matches mean the caller broke global identifier uniqueness; the
/// first one reported by the backend wins.
pub fn first_match<T: Debug>(global_id: &str, mut candidates: Vec<T>) -> Option<T> {
    if candidates.len() > 1 {
        warn!(
            global_id,
            candidates = ?candidates,
            "alias matches more than one device, binding the first"
        );
    }
    if candidates.is_empty() {
        None
    } else {
        Some(candidates.swap_remove(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;

    #[test]
    fn test_generated_names_are_deterministic_and_valid() {
        let names = NameGenerator::default();
        let a = names.generate(DeviceClass::Bridge, "tenant-42-net-1", |_| Ok(false)).unwrap();
        let b = names.generate(DeviceClass::Bridge, "tenant-42-net-1", |_| Ok(false)).unwrap();
        assert_eq!(a, b);
        assert!(a.starts_with("fabb"));
        assert_eq!(a.len(), 12);
        validate_local_name(&a).unwrap();

        let t = names.generate(DeviceClass::Tunnel, "tenant-42-net-1", |_| Ok(false)).unwrap();
        assert!(t.starts_with("fabt"));
        assert_eq!(a[4..], t[4..]);
    }

    #[test]
    fn test_generate_skips_taken_names() {
        let names = NameGenerator::default();
        let first = names.generate(DeviceClass::Bridge, "x", |_| Ok(false)).unwrap();
        let second = names
            .generate(DeviceClass::Bridge, "x", |n| Ok(n == first))
            .unwrap();
        assert_ne!(first, second);
        assert!(second.starts_with("fabb"));
    }

    #[test]
    fn test_generate_gives_up() {
        let names = NameGenerator::default();
        let err = names.generate(DeviceClass::Bridge, "x", |_| Ok(true)).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::AlreadyExists);
    }

    #[test]
    fn test_prefix_rules() {
        assert!(NameGenerator::new("ciao").is_ok());
        assert!(NameGenerator::new("").is_err());
        assert!(NameGenerator::new("toolong").is_err());
        assert!(NameGenerator::new("a-b").is_err());
    }

    #[test]
    fn test_validate_local_name() {
        validate_local_name("vnic-a").unwrap();
        validate_local_name("eth0.100").unwrap();
        for bad in ["", "sixteen-chars-xx", "a/b", "a b", ".", "..", "a:b"] {
            assert_eq!(
                validate_local_name(bad).unwrap_err().kind(),
                ErrorKind::InvalidArgument,
                "{bad:?}"
            );
        }
    }

    #[test]
    fn test_first_match() {
        assert_eq!(first_match("g", vec!["a", "b"]), Some("a"));
        assert_eq!(first_match::<&str>("g", vec![]), None);
    }
}
