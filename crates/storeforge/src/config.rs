// Copyright 2025 Storeforge Project
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

use anyhow::Result;
use std::fs;
use std::time::Duration;

/// Process-wide configuration, read once per request by the gatekeeper and
/// the pipeline. Credentials are optional at load time; components that need
/// them fail closed at use time.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Shared secret expected from callers. `None` means every request is
    /// rejected as misconfigured.
    pub auth_secret: Option<String>,
    /// Repository owners allowed as destinations for mutating operations.
    pub allowed_owners: Vec<String>,
    pub rate_limit_max: u32,
    pub rate_limit_window: Duration,
    /// Server-held source-host credential; never caller-supplied.
    pub github_token: Option<String>,
    /// Server-held hosting-provider credential.
    pub vercel_token: Option<String>,
    pub template_owner: String,
    pub template_base_repo: String,
    pub template_ext_repo: String,
    pub template_ref: String,
    pub host: String,
    pub port: u16,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            auth_secret: None,
            allowed_owners: Vec::new(),
            rate_limit_max: 30,
            rate_limit_window: Duration::from_secs(60),
            github_token: None,
            vercel_token: None,
            template_owner: "storeforge".into(),
            template_base_repo: "storefront-template".into(),
            template_ext_repo: "storefront-template-extended".into(),
            template_ref: "main".into(),
            host: "127.0.0.1".into(),
            port: 8090,
        }
    }
}

/// CLI-level options the binary passes to `load_app_config`. Keep this small
/// and explicit.
#[derive(Clone, Debug, Default)]
pub struct MergeOpts {
    pub config_path: Option<std::path::PathBuf>,
    pub cli_host: Option<String>,
    pub cli_port: Option<u16>,
    pub cli_rate_limit_max: Option<u32>,
    pub cli_rate_limit_window_seconds: Option<u64>,
}

fn parse_owner_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim())
        .filter(|s| !s.is_empty())
        .map(|s| s.to_string())
        .collect()
}

/// Load and merge AppConfig from: defaults <- config file <- env vars <- CLI.
/// Unparseable numeric env values are ignored rather than fatal.
pub fn load_app_config(mut base: AppConfig, opts: MergeOpts) -> Result<AppConfig> {
    if let Some(path) = opts.config_path.as_ref() {
        if path.exists() {
            let s = fs::read_to_string(path)?;
            let v: toml::Value = toml::from_str(&s)?;
            if let Some(x) = v.get("auth_secret").and_then(|x| x.as_str()) {
                base.auth_secret = Some(x.to_string());
            }
            if let Some(x) = v.get("allowed_owners").and_then(|x| x.as_str()) {
                base.allowed_owners = parse_owner_list(x);
            }
            if let Some(x) = v.get("rate_limit_max").and_then(|x| x.as_integer()) {
                base.rate_limit_max = x as u32;
            }
            if let Some(x) = v
                .get("rate_limit_window_seconds")
                .and_then(|x| x.as_integer())
            {
                base.rate_limit_window = Duration::from_secs(x as u64);
            }
            if let Some(x) = v.get("github_token").and_then(|x| x.as_str()) {
                base.github_token = Some(x.to_string());
            }
            if let Some(x) = v.get("vercel_token").and_then(|x| x.as_str()) {
                base.vercel_token = Some(x.to_string());
            }
            if let Some(x) = v.get("template_owner").and_then(|x| x.as_str()) {
                base.template_owner = x.to_string();
            }
            if let Some(x) = v.get("template_base_repo").and_then(|x| x.as_str()) {
                base.template_base_repo = x.to_string();
            }
            if let Some(x) = v.get("template_ext_repo").and_then(|x| x.as_str()) {
                base.template_ext_repo = x.to_string();
            }
            if let Some(x) = v.get("template_ref").and_then(|x| x.as_str()) {
                base.template_ref = x.to_string();
            }
            if let Some(x) = v.get("host").and_then(|x| x.as_str()) {
                base.host = x.to_string();
            }
            if let Some(x) = v.get("port").and_then(|x| x.as_integer()) {
                base.port = x as u16;
            }
        }
    }

    // env vars override file
    if let Ok(x) = std::env::var("STOREFORGE_AUTH_SECRET") {
        base.auth_secret = Some(x);
    }
    if let Ok(x) = std::env::var("STOREFORGE_ALLOWED_OWNERS") {
        base.allowed_owners = parse_owner_list(&x);
    }
    if let Ok(x) = std::env::var("STOREFORGE_RATE_LIMIT_MAX") {
        if let Ok(v) = x.parse::<u32>() {
            base.rate_limit_max = v;
        }
    }
    if let Ok(x) = std::env::var("STOREFORGE_RATE_LIMIT_WINDOW_SECONDS") {
        if let Ok(v) = x.parse::<u64>() {
            base.rate_limit_window = Duration::from_secs(v);
        }
    }
    if let Ok(x) = std::env::var("GITHUB_TOKEN") {
        base.github_token = Some(x);
    }
    if let Ok(x) = std::env::var("VERCEL_TOKEN") {
        base.vercel_token = Some(x);
    }
    if let Ok(x) = std::env::var("STOREFORGE_TEMPLATE_OWNER") {
        base.template_owner = x;
    }
    if let Ok(x) = std::env::var("STOREFORGE_TEMPLATE_BASE_REPO") {
        base.template_base_repo = x;
    }
    if let Ok(x) = std::env::var("STOREFORGE_TEMPLATE_EXT_REPO") {
        base.template_ext_repo = x;
    }
    if let Ok(x) = std::env::var("STOREFORGE_TEMPLATE_REF") {
        base.template_ref = x;
    }
    if let Ok(x) = std::env::var("STOREFORGE_HOST") {
        base.host = x;
    }
    if let Ok(x) = std::env::var("STOREFORGE_PORT") {
        if let Ok(v) = x.parse::<u16>() {
            base.port = v;
        }
    }

    // CLI overrides everything
    if let Some(x) = opts.cli_host {
        base.host = x;
    }
    if let Some(x) = opts.cli_port {
        base.port = x;
    }
    if let Some(x) = opts.cli_rate_limit_max {
        base.rate_limit_max = x;
    }
    if let Some(x) = opts.cli_rate_limit_window_seconds {
        base.rate_limit_window = Duration::from_secs(x);
    }

    Ok(base)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, EnvGuard};

    const ENV_VARS: &[&str] = &[
        "STOREFORGE_AUTH_SECRET",
        "STOREFORGE_ALLOWED_OWNERS",
        "STOREFORGE_RATE_LIMIT_MAX",
        "STOREFORGE_RATE_LIMIT_WINDOW_SECONDS",
        "GITHUB_TOKEN",
        "VERCEL_TOKEN",
        "STOREFORGE_TEMPLATE_OWNER",
        "STOREFORGE_TEMPLATE_BASE_REPO",
        "STOREFORGE_TEMPLATE_EXT_REPO",
        "STOREFORGE_TEMPLATE_REF",
        "STOREFORGE_HOST",
        "STOREFORGE_PORT",
    ];

    #[test]
    #[serial_test::serial]
    fn test_merge_file_env_cli_precedence() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(ENV_VARS);

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        let toml = r#"
auth_secret = "file-secret"
allowed_owners = "acme, beta"
rate_limit_max = 5
rate_limit_window_seconds = 10
host = "0.0.0.0"
"#;
        fs::write(tmp.path(), toml).unwrap();

        guard.set("STOREFORGE_AUTH_SECRET", "env-secret");
        guard.set("STOREFORGE_RATE_LIMIT_MAX", "7");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            cli_host: Some("10.0.0.1".into()),
            cli_port: None,
            cli_rate_limit_max: Some(9),
            cli_rate_limit_window_seconds: None,
        };

        let got = load_app_config(AppConfig::default(), opts).expect("load");
        // env over file for the secret, CLI over env for the limit
        assert_eq!(got.auth_secret.as_deref(), Some("env-secret"));
        assert_eq!(got.rate_limit_max, 9);
        assert_eq!(got.rate_limit_window.as_secs(), 10);
        assert_eq!(got.allowed_owners, vec!["acme", "beta"]);
        assert_eq!(got.host, "10.0.0.1");
    }

    #[test]
    #[serial_test::serial]
    fn test_invalid_env_is_ignored() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(ENV_VARS);

        let tmp = tempfile::NamedTempFile::new().expect("tempfile");
        fs::write(tmp.path(), "rate_limit_max = 4\nrate_limit_window_seconds = 12\n").unwrap();

        guard.set("STOREFORGE_RATE_LIMIT_MAX", "not-a-number");
        guard.set("STOREFORGE_RATE_LIMIT_WINDOW_SECONDS", "also-bad");

        let opts = MergeOpts {
            config_path: Some(tmp.path().to_path_buf()),
            ..Default::default()
        };
        let got = load_app_config(AppConfig::default(), opts).expect("load");
        assert_eq!(got.rate_limit_max, 4);
        assert_eq!(got.rate_limit_window.as_secs(), 12);
    }

    #[test]
    #[serial_test::serial]
    fn test_defaults_without_file_or_env() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(ENV_VARS);

        let got = load_app_config(AppConfig::default(), MergeOpts::default()).expect("load");
        assert!(got.auth_secret.is_none());
        assert!(got.allowed_owners.is_empty());
        assert_eq!(got.rate_limit_max, 30);
        assert_eq!(got.rate_limit_window.as_secs(), 60);
        assert_eq!(got.port, 8090);
    }

    #[test]
    #[serial_test::serial]
    fn test_owner_list_parsing_skips_empty_entries() {
        init_test_logging();
        let mut guard = EnvGuard::new();
        guard.save_and_clear(ENV_VARS);
        guard.set("STOREFORGE_ALLOWED_OWNERS", " acme,, beta ,");

        let got = load_app_config(AppConfig::default(), MergeOpts::default()).expect("load");
        assert_eq!(got.allowed_owners, vec!["acme", "beta"]);
    }
}
