//! Opaque, single-use, time-expiring tokens required for mutating actions.
//!
//! Translated from `util.TokenHandler`: each token is a file whose contents
//! are the decimal absolute expiry epoch. A lazy sweep runs at most once per
//! `PURGE_INTERVAL`, triggered from `acquire`.

use parking_lot::Mutex;
use rand::RngCore;
use std::path::PathBuf;
use std::time::{SystemTime, UNIX_EPOCH};
use wsb_domain::error::{Error, Result};

const PURGE_INTERVAL: u64 = 3600;
const DEFAULT_EXPIRY: u64 = 1800;

pub struct TokenStore {
    root: PathBuf,
    last_purge: Mutex<u64>,
}

fn now_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}

impl TokenStore {
    pub fn new(root: PathBuf) -> Self {
        TokenStore {
            root,
            last_purge: Mutex::new(0),
        }
    }

    fn path_for(&self, token: &str) -> PathBuf {
        self.root.join(token)
    }

    pub fn acquire(&self) -> Result<String> {
        self.check_sweep();
        std::fs::create_dir_all(&self.root)?;

        loop {
            let token = random_token();
            let path = self.path_for(&token);
            if path.symlink_metadata().is_ok() {
                continue;
            }
            let expire = now_epoch() + DEFAULT_EXPIRY;
            std::fs::write(&path, expire.to_string())?;
            return Ok(token);
        }
    }

    /// Validates and consumes `token` in one step, matching the spec's
    /// "accepted before the mutation begins" ordering for advanced actions.
    pub fn validate_and_consume(&self, token: &str) -> Result<()> {
        let path = self.path_for(token);
        let contents = match std::fs::read_to_string(&path) {
            Ok(c) => c,
            Err(_) => return Err(Error::BadRequest("invalid or expired token".into())),
        };
        let expire: u64 = contents
            .trim()
            .parse()
            .map_err(|_| Error::BadRequest("invalid token record".into()))?;

        let valid = now_epoch() < expire;
        // One-shot regardless of outcome: a token is spent the moment it's presented.
        let _ = std::fs::remove_file(&path);
        if valid {
            Ok(())
        } else {
            Err(Error::BadRequest("invalid or expired token".into()))
        }
    }

    fn check_sweep(&self) {
        let now = now_epoch();
        let mut last = self.last_purge.lock();
        if now >= *last + PURGE_INTERVAL {
            self.sweep(now);
            *last = now;
        }
    }

    fn sweep(&self, now: u64) {
        let Ok(entries) = std::fs::read_dir(&self.root) else {
            return;
        };
        for entry in entries.flatten() {
            let path = entry.path();
            let Ok(contents) = std::fs::read_to_string(&path) else {
                continue;
            };
            let Ok(expire) = contents.trim().parse::<u64>() else {
                continue;
            };
            if expire <= now {
                let _ = std::fs::remove_file(&path);
            }
        }
    }
}

fn random_token() -> String {
    let mut bytes = [0u8; 18]; // 144 bits, well above the 128-bit floor
    rand::thread_rng().fill_bytes(&mut bytes);
    base64::Engine::encode(&base64::engine::general_purpose::URL_SAFE_NO_PAD, bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn acquired_token_validates_once_then_fails() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());
        let token = store.acquire().unwrap();
        store.validate_and_consume(&token).unwrap();
        assert!(store.validate_and_consume(&token).is_err());
    }

    #[test]
    fn unknown_token_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());
        assert!(store.validate_and_consume("does-not-exist").is_err());
    }

    #[test]
    fn expired_token_is_rejected_and_removed() {
        let dir = tempfile::tempdir().unwrap();
        let store = TokenStore::new(dir.path().to_path_buf());
        std::fs::create_dir_all(&dir.path()).unwrap();
        let path = dir.path().join("expired-token");
        std::fs::write(&path, (now_epoch().saturating_sub(10)).to_string()).unwrap();
        assert!(store.validate_and_consume("expired-token").is_err());
        assert!(!path.exists());
    }
}
