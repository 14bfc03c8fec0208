use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Top-level configuration, assembled by layering built-in defaults, a
/// user-level file, and a repository-level file (highest precedence last).
/// See `wsb-gateway`'s `cli::config` for the loader that performs the merge.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub app: AppConfig,
    pub server: ServerConfig,
    pub browser: BrowserConfig,
    /// `None` means no `[auth]` section was configured at all, which grants
    /// every request `all` permission (single-user local deployment). `Some`
    /// with an empty record list means the section exists but matches no one,
    /// which denies every credential-bearing request. See `wsb-engine`'s
    /// `permissions` module for the distinction this enables.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub auth: Option<AuthConfig>,
    /// Opaque passthrough table, echoed verbatim by the `config` action.
    pub book: serde_json::Map<String, serde_json::Value>,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            app: AppConfig::default(),
            server: ServerConfig::default(),
            browser: BrowserConfig::default(),
            auth: None,
            book: serde_json::Map::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub name: String,
    pub theme: String,
    /// Physical root directory, relative to the repository directory.
    pub root: String,
    /// URL base prefix the app is mounted under.
    pub base: String,
    pub allowed_x_for: u32,
    pub allowed_x_proto: u32,
    pub allowed_x_host: u32,
    pub allowed_x_port: u32,
    pub allowed_x_prefix: u32,
}

impl Default for AppConfig {
    fn default() -> Self {
        AppConfig {
            name: d_app_name(),
            theme: d_theme(),
            root: d_root(),
            base: String::new(),
            allowed_x_for: 0,
            allowed_x_proto: 0,
            allowed_x_host: 0,
            allowed_x_port: 0,
            allowed_x_prefix: 0,
        }
    }
}

fn d_app_name() -> String {
    "scrapbook".into()
}
fn d_theme() -> String {
    "default".into()
}
fn d_root() -> String {
    ".".into()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub cors: CorsConfig,
    pub max_concurrent_requests: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".into(),
            port: 8080,
            cors: CorsConfig::default(),
            max_concurrent_requests: 64,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CorsConfig {
    pub allowed_origins: Vec<String>,
}

impl Default for CorsConfig {
    fn default() -> Self {
        CorsConfig {
            allowed_origins: vec!["http://localhost:*".into()],
        }
    }
}

/// Settings for the out-of-scope local-viewer launcher. Accepted and
/// round-tripped by the `config` action; this service never invokes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrowserConfig {
    pub cache_prefix: String,
    pub cache_expire: u64,
    pub use_jar: bool,
    pub command: String,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        BrowserConfig {
            cache_prefix: "webscrapbook.".into(),
            cache_expire: 120,
            use_jar: false,
            command: String::new(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AuthConfig {
    pub records: Vec<AuthRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuthRecord {
    pub user: String,
    pub pw: String,
    pub pw_salt: String,
    pub pw_type: String,
    pub permission: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigSeverity {
    Warning,
    Error,
}

#[derive(Debug, Clone)]
pub struct ConfigIssue {
    pub severity: ConfigSeverity,
    pub field: String,
    pub message: String,
}

impl std::fmt::Display for ConfigIssue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tag = match self.severity {
            ConfigSeverity::Warning => "WARN",
            ConfigSeverity::Error => "ERROR",
        };
        write!(f, "[{tag}] {}: {}", self.field, self.message)
    }
}

const KNOWN_PERMISSIONS: &[&str] = &["", "view", "read", "all"];
const KNOWN_HASH_METHODS: &[&str] = &[
    "plain", "md5", "sha1", "sha224", "sha256", "sha384", "sha512", "sha3_224", "sha3_256",
    "sha3_384", "sha3_512",
];

impl Config {
    /// Field-by-field validation. Returns every issue found rather than
    /// failing on the first one, so `config validate` can report everything
    /// at once.
    pub fn validate(&self) -> Vec<ConfigIssue> {
        let mut issues = Vec::new();

        if self.app.root.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "app.root".into(),
                message: "must not be empty".into(),
            });
        }
        if self.app.name.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "app.name".into(),
                message: "empty site name".into(),
            });
        }
        if self.server.port == 0 {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.port".into(),
                message: "port must be nonzero".into(),
            });
        }
        if self.server.host.trim().is_empty() {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Error,
                field: "server.host".into(),
                message: "host must not be empty".into(),
            });
        }
        if self.server.cors.allowed_origins.iter().any(|o| o == "*") {
            issues.push(ConfigIssue {
                severity: ConfigSeverity::Warning,
                field: "server.cors.allowed_origins".into(),
                message: "wildcard origin disables CORS protection".into(),
            });
        }

        let mut seen_users = HashSet::new();
        let records = self.auth.iter().flat_map(|a| a.records.iter());
        for (i, rec) in records.enumerate() {
            if !seen_users.insert(rec.user.clone()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("auth.records[{i}].user"),
                    message: format!("duplicate user '{}' shadows an earlier record", rec.user),
                });
            }
            if !KNOWN_PERMISSIONS.contains(&rec.permission.as_str()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Error,
                    field: format!("auth.records[{i}].permission"),
                    message: format!(
                        "unknown permission '{}', expected one of {:?}",
                        rec.permission, KNOWN_PERMISSIONS
                    ),
                });
            }
            if !KNOWN_HASH_METHODS.contains(&rec.pw_type.as_str()) {
                issues.push(ConfigIssue {
                    severity: ConfigSeverity::Warning,
                    field: format!("auth.records[{i}].pw_type"),
                    message: format!(
                        "unknown hash method '{}', falls back to 'plain' at runtime",
                        rec.pw_type
                    ),
                });
            }
        }

        issues
    }

    pub fn has_errors(&self) -> bool {
        self.validate()
            .iter()
            .any(|i| i.severity == ConfigSeverity::Error)
    }
}

/// Merge `overlay` on top of `base`, field group by field group. Used to
/// apply a user-level file and then a repository-level file in sequence.
pub fn merge(base: Config, overlay: toml::Value) -> Result<Config, toml::de::Error> {
    let mut base_value = toml::Value::try_from(&base).expect("Config always serializes");
    merge_toml(&mut base_value, overlay);
    base_value.try_into()
}

fn merge_toml(base: &mut toml::Value, overlay: toml::Value) {
    match (base, overlay) {
        (toml::Value::Table(base_table), toml::Value::Table(overlay_table)) => {
            for (k, v) in overlay_table {
                match base_table.get_mut(&k) {
                    Some(existing) => merge_toml(existing, v),
                    None => {
                        base_table.insert(k, v);
                    }
                }
            }
        }
        (slot, v) => *slot = v,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> Config {
        Config::default()
    }

    fn find_issue<'a>(issues: &'a [ConfigIssue], field: &str) -> Option<&'a ConfigIssue> {
        issues.iter().find(|i| i.field == field)
    }

    #[test]
    fn default_config_has_no_errors() {
        assert!(!valid_config().has_errors());
    }

    #[test]
    fn empty_root_is_an_error() {
        let mut cfg = valid_config();
        cfg.app.root = String::new();
        let issues = cfg.validate();
        let issue = find_issue(&issues, "app.root").expect("expected an issue");
        assert_eq!(issue.severity, ConfigSeverity::Error);
    }

    #[test]
    fn zero_port_is_an_error() {
        let mut cfg = valid_config();
        cfg.server.port = 0;
        assert!(cfg.has_errors());
    }

    #[test]
    fn wildcard_cors_is_a_warning_not_an_error() {
        let mut cfg = valid_config();
        cfg.server.cors.allowed_origins = vec!["*".into()];
        let issues = cfg.validate();
        assert_eq!(
            find_issue(&issues, "server.cors.allowed_origins")
                .unwrap()
                .severity,
            ConfigSeverity::Warning
        );
        assert!(!cfg.has_errors());
    }

    #[test]
    fn unknown_permission_is_an_error() {
        let mut cfg = valid_config();
        cfg.auth.get_or_insert_with(AuthConfig::default).records.push(AuthRecord {
            user: "a".into(),
            pw: "x".into(),
            pw_salt: String::new(),
            pw_type: "plain".into(),
            permission: "superadmin".into(),
        });
        assert!(cfg.has_errors());
    }

    #[test]
    fn duplicate_user_is_a_warning() {
        let mut cfg = valid_config();
        let auth = cfg.auth.get_or_insert_with(AuthConfig::default);
        for _ in 0..2 {
            auth.records.push(AuthRecord {
                user: "a".into(),
                pw: "x".into(),
                pw_salt: String::new(),
                pw_type: "plain".into(),
                permission: "view".into(),
            });
        }
        let issues = cfg.validate();
        assert!(find_issue(&issues, "auth.records[1].user").is_some());
        assert!(!cfg.has_errors());
    }

    #[test]
    fn no_auth_section_grants_open_access_distinct_from_empty_section() {
        let open = valid_config();
        assert!(open.auth.is_none());

        let mut locked = valid_config();
        locked.auth = Some(AuthConfig::default());
        assert!(locked.auth.is_some());
        assert!(locked.auth.unwrap().records.is_empty());
    }

    #[test]
    fn merge_overrides_leaf_fields_without_clobbering_siblings() {
        let base = Config::default();
        let overlay: toml::Value = toml::from_str("[app]\nname = \"mybook\"\n").unwrap();
        let merged = merge(base, overlay).unwrap();
        assert_eq!(merged.app.name, "mybook");
        assert_eq!(merged.app.theme, "default");
    }
}
