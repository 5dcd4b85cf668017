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

//! Storefront provisioning MCP server over HTTP.

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use storeforge::config::{load_app_config, AppConfig, MergeOpts};
use storeforge::deploy::VercelClient;
use storeforge::gatekeeper::Gatekeeper;
use storeforge::github::GitHubClient;
use storeforge::mcp::{build_router, AppState};
use storeforge::pipeline::Pipeline;
use storeforge::resolver::TemplateSource;

#[derive(Debug, Parser)]
#[command(name = "storeforge-mcp", about = "MCP server for storefront provisioning")]
struct Opts {
    /// Optional TOML config file.
    #[arg(long, env = "STOREFORGE_CONFIG")]
    config: Option<std::path::PathBuf>,

    /// Bind host.
    #[arg(long)]
    host: Option<String>,

    /// Bind port.
    #[arg(long)]
    port: Option<u16>,

    /// Per-caller request cap inside one window.
    #[arg(long)]
    rate_limit_max: Option<u32>,

    /// Rate-limit window length in seconds.
    #[arg(long)]
    rate_limit_window_seconds: Option<u64>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new("info,hyper_util=warn,hyper=warn,h2=warn,reqwest=warn")
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let opts = Opts::parse();
    let cfg = load_app_config(
        AppConfig::default(),
        MergeOpts {
            config_path: opts.config,
            cli_host: opts.host,
            cli_port: opts.port,
            cli_rate_limit_max: opts.rate_limit_max,
            cli_rate_limit_window_seconds: opts.rate_limit_window_seconds,
        },
    )?;

    if cfg.auth_secret.is_none() {
        tracing::warn!("no auth secret configured; every request will be rejected");
    }
    let github_token = cfg
        .github_token
        .clone()
        .context("GITHUB_TOKEN (or config github_token) is required")?;
    let vercel_token = cfg
        .vercel_token
        .clone()
        .context("VERCEL_TOKEN (or config vercel_token) is required")?;

    let host = Arc::new(GitHubClient::new(github_token));
    let provider = Arc::new(VercelClient::new(vercel_token));
    let source = TemplateSource {
        owner: cfg.template_owner.clone(),
        base_repo: cfg.template_base_repo.clone(),
        ext_repo: cfg.template_ext_repo.clone(),
    };
    let state = AppState {
        gatekeeper: Arc::new(Gatekeeper::new(&cfg)),
        pipeline: Arc::new(Pipeline::new(host, provider, source, cfg.template_ref.clone())),
    };

    let addr = format!("{}:{}", cfg.host, cfg.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("bind {}", addr))?;
    tracing::info!(addr = %addr, "storeforge-mcp listening");
    axum::serve(
        listener,
        build_router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .context("server error")?;
    Ok(())
}
