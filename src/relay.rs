//! File payload hand-off between the operator CLI and the automation daemon.
//!
//! The two sides share no memory, only the state directory. A payload is
//! encoded as a data URL, written under a freshly generated key in the
//! spool directory, and the key is named in a control message. The reader
//! decodes and deletes in one step — the spool is a single-use hand-off,
//! not a cache.

use base64::Engine;
use base64::engine::general_purpose::STANDARD as BASE64;
use std::fs;
use std::path::{Path, PathBuf};

/// Prefix shared by every spool key.
pub const KEY_PREFIX: &str = "whatsblitz_file";

/// Transport failures surfaced to the operator.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    #[error("failed to write spooled payload: {0}")]
    StoreWrite(std::io::Error),
    #[error("no spooled payload under key {0}")]
    KeyNotFound(String),
    #[error("spooled payload under key {key} is not a data URL")]
    MalformedPayload { key: String },
    #[error("failed to decode spooled payload: {0}")]
    Decode(#[from] base64::DecodeError),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// Spool directory holding in-flight file payloads.
#[derive(Debug, Clone)]
pub struct SpoolStore {
    dir: PathBuf,
}

impl SpoolStore {
    /// Spool under `<state_dir>/spool`.
    pub fn new(state_dir: &Path) -> Self {
        Self { dir: state_dir.join("spool") }
    }

    /// Encode `bytes` as a data URL and store them under a fresh unique
    /// key derived from the current time and the sanitized file name.
    /// Returns the key to name in the control message.
    pub fn put(&self, file_name: &str, mime: &str, bytes: &[u8]) -> Result<String, RelayError> {
        fs::create_dir_all(&self.dir).map_err(RelayError::StoreWrite)?;

        let stamp = chrono::Utc::now().timestamp_millis();
        let base = format!("{KEY_PREFIX}_{stamp}_{}", sanitize_file_name(file_name));
        let key = self.unique_key(base);

        let payload = format!("data:{mime};base64,{}", BASE64.encode(bytes));
        fs::write(self.dir.join(&key), payload).map_err(RelayError::StoreWrite)?;
        tracing::debug!(key = %key, size = bytes.len(), "spooled file payload");
        Ok(key)
    }

    /// Read, decode, and delete the payload under `key`.
    ///
    /// Deleting before returning keeps the spool free of stale payloads;
    /// a second `take` of the same key fails with [`RelayError::KeyNotFound`].
    pub fn take(&self, key: &str) -> Result<Vec<u8>, RelayError> {
        let path = self.dir.join(key);
        let payload = match fs::read_to_string(&path) {
            Ok(p) => p,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(RelayError::KeyNotFound(key.to_string()));
            }
            Err(err) => return Err(err.into()),
        };

        let encoded = payload
            .split_once(";base64,")
            .filter(|(head, _)| head.starts_with("data:"))
            .map(|(_, tail)| tail)
            .ok_or_else(|| RelayError::MalformedPayload { key: key.to_string() })?;
        let bytes = BASE64.decode(encoded.trim())?;

        fs::remove_file(&path)?;
        tracing::debug!(key = %key, size = bytes.len(), "consumed spooled payload");
        Ok(bytes)
    }

    /// Millisecond timestamps can collide under rapid puts; suffix with a
    /// counter until the key is free.
    fn unique_key(&self, base: String) -> String {
        if !self.dir.join(&base).exists() {
            return base;
        }
        let mut n = 1;
        loop {
            let candidate = format!("{base}_{n}");
            if !self.dir.join(&candidate).exists() {
                return candidate;
            }
            n += 1;
        }
    }
}

/// Replace every character outside `[A-Za-z0-9._-]` so the key is safe as
/// a file name on every platform.
pub fn sanitize_file_name(name: &str) -> String {
    name.chars()
        .map(|c| if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') { c } else { '_' })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spool() -> (tempfile::TempDir, SpoolStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = SpoolStore::new(dir.path());
        (dir, store)
    }

    #[test]
    fn put_take_roundtrips_bytes() {
        let (_dir, store) = spool();
        let key = store.put("contacts.csv", "text/csv", b"a,b\n1,2\n").unwrap();
        assert!(key.starts_with("whatsblitz_file_"));
        assert!(key.ends_with("_contacts.csv"));
        assert_eq!(store.take(&key).unwrap(), b"a,b\n1,2\n");
    }

    #[test]
    fn take_is_single_use() {
        let (_dir, store) = spool();
        let key = store.put("a.csv", "text/csv", b"x").unwrap();
        store.take(&key).unwrap();
        assert!(matches!(store.take(&key), Err(RelayError::KeyNotFound(_))));
    }

    #[test]
    fn missing_key_is_reported() {
        let (_dir, store) = spool();
        match store.take("whatsblitz_file_0_gone.csv") {
            Err(RelayError::KeyNotFound(key)) => assert!(key.contains("gone")),
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn malformed_payload_is_rejected() {
        let (dir, store) = spool();
        fs::create_dir_all(dir.path().join("spool")).unwrap();
        fs::write(dir.path().join("spool").join("bad"), "not a data url").unwrap();
        assert!(matches!(
            store.take("bad"),
            Err(RelayError::MalformedPayload { .. })
        ));
    }

    #[test]
    fn file_names_are_sanitized() {
        assert_eq!(sanitize_file_name("my contacts (v2).xlsx"), "my_contacts__v2_.xlsx");
        assert_eq!(sanitize_file_name("../../etc/passwd"), ".._.._etc_passwd");
    }

    #[test]
    fn colliding_keys_get_a_suffix() {
        let (_dir, store) = spool();
        let first = store.put("same.csv", "text/csv", b"1").unwrap();
        // The first key is still on disk, so an identical base must not
        // clobber it.
        let second = store.unique_key(first.clone());
        assert_ne!(first, second);
        assert!(second.starts_with(&first));
    }
}
