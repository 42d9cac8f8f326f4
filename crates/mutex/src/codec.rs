// Copyright 2024 RustFS Team
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Lock name encoding.
//!
//! Database lock primitives take short names from a limited character set, while
//! callers name their resources with anything they like. A name is therefore
//! hashed together with a variant tag and the digest is base64 encoded into an
//! [`InternalIdentifier`]:
//!
//! ```text
//! '$' + base64(sha256(variant_tag ++ 0x00 ++ name)) with '+' -> '-', '/' -> '_', '=' dropped
//! ```
//!
//! Distinct names that collide under SHA-256 share a lock. That risk is accepted.

use crate::error::{MutexError, Result};
use base64::{Engine, engine::general_purpose::STANDARD};
use sha2::{Digest, Sha256};
use std::fmt;
use std::sync::Arc;

/// Longest identifier accepted by the lock primitives
pub const MAX_IDENTIFIER_LEN: usize = 64;

/// First character of every identifier
pub const IDENTIFIER_MARKER: char = '$';

/// Separates the variant tag from the name in the digest input
const TAG_SEPARATOR: u8 = 0x00;

/// Caller supplied name of a logical resource.
///
/// Any byte sequence is accepted, including invalid UTF-8, as long as it is
/// not empty or made only of whitespace.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LockName(Arc<[u8]>);

impl LockName {
    /// Create a name, rejecting empty and whitespace-only input
    pub fn new(name: impl AsRef<[u8]>) -> Result<Self> {
        let bytes = name.as_ref();
        if bytes.iter().all(|b| b.is_ascii_whitespace()) {
            return Err(MutexError::invalid_argument("mutex requires a non-blank name"));
        }
        Ok(Self(Arc::from(bytes)))
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// Lossy UTF-8 view, for messages only
    pub fn to_string_lossy(&self) -> String {
        String::from_utf8_lossy(&self.0).into_owned()
    }
}

impl TryFrom<&str> for LockName {
    type Error = MutexError;

    fn try_from(name: &str) -> Result<Self> {
        Self::new(name)
    }
}

impl TryFrom<String> for LockName {
    type Error = MutexError;

    fn try_from(name: String) -> Result<Self> {
        Self::new(name)
    }
}

impl TryFrom<&[u8]> for LockName {
    type Error = MutexError;

    fn try_from(name: &[u8]) -> Result<Self> {
        Self::new(name)
    }
}

impl TryFrom<Vec<u8>> for LockName {
    type Error = MutexError;

    fn try_from(name: Vec<u8>) -> Result<Self> {
        Self::new(name)
    }
}

/// Name actually passed to the database lock primitives
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct InternalIdentifier(String);

impl InternalIdentifier {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for InternalIdentifier {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for InternalIdentifier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Derive the internal identifier for `name` under `variant_tag`.
///
/// Pure and deterministic; callers may memoize the result.
pub fn derive(variant_tag: &str, name: &LockName) -> Result<InternalIdentifier> {
    let mut hasher = Sha256::new();
    hasher.update(variant_tag.as_bytes());
    hasher.update([TAG_SEPARATOR]);
    hasher.update(name.as_bytes());
    let encoded = STANDARD.encode(hasher.finalize());

    let mut identifier = String::with_capacity(encoded.len() + 1);
    identifier.push(IDENTIFIER_MARKER);
    identifier.extend(encoded.chars().filter_map(|c| match c {
        'A'..='Z' | 'a'..='z' | '0'..='9' => Some(c),
        '+' => Some('-'),
        '/' => Some('_'),
        _ => None,
    }));

    bounded(identifier)
}

fn bounded(identifier: String) -> Result<InternalIdentifier> {
    if identifier.len() > MAX_IDENTIFIER_LEN {
        return Err(MutexError::invalid_state(format!(
            "internal identifier {identifier} is {} characters long, limit is {MAX_IDENTIFIER_LEN}",
            identifier.len()
        )));
    }
    Ok(InternalIdentifier(identifier))
}

/// Print-safe name used in logs and error messages.
///
/// Control characters are stripped from the name, the rest is cut to
/// `prefix_len` characters and followed by the identifier.
pub fn display_name(name: &LockName, identifier: &InternalIdentifier, prefix_len: usize) -> String {
    let prefix: String = name
        .to_string_lossy()
        .chars()
        .filter(|c| !c.is_control())
        .take(prefix_len)
        .collect();
    format!("{prefix}{identifier}")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn name(s: &str) -> LockName {
        LockName::new(s).unwrap()
    }

    #[test]
    fn test_known_identifiers() {
        assert_eq!(
            derive("dbmutex", &name("Lock")).unwrap().as_str(),
            "$2SkDAdiu9G9ORSwaEpRypm3rftj2V7XMONRefaQqmS0"
        );
        assert_eq!(
            derive("dbmutex", &name("my_mutex")).unwrap().as_str(),
            "$59nvZCr6ClzZOVgEjZH8ljreN3PlIU0Yk8hZZFeqJCc"
        );
    }

    #[test]
    fn test_binary_name() {
        let raw: Vec<u8> = (250..=255).collect();
        let identifier = derive("dbmutex", &LockName::new(raw).unwrap()).unwrap();
        assert_eq!(identifier.as_str(), "$JgqFNTUsv-BW-Y1-UA8YvFZWek7OYwJcf2zPTQok9dI");
    }

    #[test]
    fn test_variant_tag_changes_identifier() {
        let a = derive("dbmutex", &name("Lock")).unwrap();
        let b = derive("other", &name("Lock")).unwrap();
        assert_ne!(a, b);
        assert_eq!(b.as_str(), "$RPUCJ8KNPBwdeuMuSTRQYtowlsanxMmXqLHeUyGZrs8");
    }

    #[test]
    fn test_deterministic() {
        let first = derive("dbmutex", &name("Foo")).unwrap();
        let second = derive("dbmutex", &name("Foo")).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn test_alphabet_and_length() {
        let long = "x".repeat(10_000);
        let names = ["a", "Lock", " padded ", "名前", "\u{7}\u{1b}[0m", long.as_str()];
        for n in names {
            let identifier = derive("dbmutex", &name(n)).unwrap();
            assert!(identifier.as_str().len() <= MAX_IDENTIFIER_LEN);
            assert!(identifier.as_str().starts_with(IDENTIFIER_MARKER));
            assert!(
                identifier.as_str()[1..]
                    .chars()
                    .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
            );
        }
    }

    #[test]
    fn test_blank_names_rejected() {
        for blank in ["", " ", "\t\n  "] {
            let err = LockName::new(blank).unwrap_err();
            assert!(matches!(err, MutexError::InvalidArgument { .. }));
        }
        assert!(LockName::new(" a ").is_ok());
    }

    #[test]
    fn test_length_bound_enforced() {
        assert!(bounded("$".repeat(MAX_IDENTIFIER_LEN)).is_ok());
        let err = bounded("$".repeat(MAX_IDENTIFIER_LEN + 1)).unwrap_err();
        assert!(matches!(err, MutexError::InvalidState { .. }));
    }

    #[test]
    fn test_display_name() {
        let n = name("queue\n\tworker-with-a-rather-long-name");
        let identifier = derive("dbmutex", &n).unwrap();
        let display = display_name(&n, &identifier, 12);
        assert_eq!(display, format!("queueworker-{identifier}"));

        let raw = LockName::new(vec![0xff, b'a', 0x00]).unwrap();
        let identifier = derive("dbmutex", &raw).unwrap();
        assert_eq!(display_name(&raw, &identifier, 32), format!("\u{fffd}a{identifier}"));
    }
}
