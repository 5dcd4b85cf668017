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

//! End-to-end store provisioning: resolve templates, apply branding,
//! publish to the destination repository and provision hosting. The tool
//! layer calls into this module only; all remote seams are trait objects so
//! the whole pipeline runs against in-memory fakes in tests.

use std::sync::Arc;

use anyhow::Context;
use serde::{Deserialize, Serialize};

use crate::branding;
use crate::deploy::{self, HostingProvider, ProjectSpec, Provisioned};
use crate::github::GitHost;
use crate::inspect;
use crate::publisher::{self, Published};
use crate::resolver::{self, TemplateKind, TemplateSource};
use crate::{BrandingSpec, RepoTarget};

fn default_branch() -> String {
    "main".to_string()
}

/// One store-creation request, as decoded from the tool arguments.
#[derive(Clone, Debug, Deserialize)]
pub struct StoreRequest {
    pub target: RepoTarget,
    #[serde(default)]
    pub branding: BrandingSpec,
    pub kind: TemplateKind,
    #[serde(default = "default_branch")]
    pub branch: String,
    #[serde(default)]
    pub commit_message: Option<String>,
    /// Hosting project name; defaults to the destination repo name.
    #[serde(default)]
    pub project_name: Option<String>,
}

/// Dry-run output: what a create call would publish, without touching the
/// destination repository or the hosting provider.
#[derive(Debug, Serialize)]
pub struct StorePlan {
    pub kind: TemplateKind,
    pub file_count: usize,
    pub fetch_failures: Vec<String>,
    pub top_level: Vec<String>,
    pub readme_title: Option<String>,
    pub package: Option<inspect::PackageSummary>,
    pub nuxt_modules: Vec<String>,
    pub theme_tokens: Vec<String>,
    pub branded_paths: Vec<String>,
    pub warnings: Vec<String>,
}

/// Result of a full create-and-deploy run.
#[derive(Debug, Serialize)]
pub struct StoreOutcome {
    pub repo: String,
    pub branch: String,
    pub commit_sha: String,
    pub commit_url: String,
    pub files_committed: usize,
    pub created_repo: bool,
    pub project_id: String,
    pub project_name: String,
    pub created_project: bool,
    pub deployment_id: Option<String>,
    pub deployment_url: Option<String>,
    pub warnings: Vec<String>,
}

pub struct Pipeline {
    pub host: Arc<dyn GitHost>,
    pub provider: Arc<dyn HostingProvider>,
    pub source: TemplateSource,
    pub template_ref: String,
}

impl Pipeline {
    pub fn new(
        host: Arc<dyn GitHost>,
        provider: Arc<dyn HostingProvider>,
        source: TemplateSource,
        template_ref: impl Into<String>,
    ) -> Self {
        Self {
            host,
            provider,
            source,
            template_ref: template_ref.into(),
        }
    }

    /// Resolve and brand without publishing. The branded file set is
    /// inspected and discarded.
    pub async fn plan(&self, kind: TemplateKind, spec: &BrandingSpec) -> anyhow::Result<StorePlan> {
        let resolved = resolver::resolve(self.host.as_ref(), &self.source, &self.template_ref, kind)
            .await
            .context("template resolution failed")?;

        let mut files = resolved.files;
        let outcome = branding::apply(&mut files, spec);
        let tree = inspect::tree_summary(&files);

        Ok(StorePlan {
            kind,
            file_count: tree.files,
            fetch_failures: resolved.fetch_failures,
            top_level: tree.top_level,
            readme_title: inspect::readme_title(&files),
            package: inspect::package_summary(&files),
            nuxt_modules: inspect::nuxt_modules(&files),
            theme_tokens: inspect::theme_tokens(&files),
            branded_paths: outcome.modified_paths.into_iter().collect(),
            warnings: outcome.warnings,
        })
    }

    /// The whole provisioning flow: resolve, brand, publish, deploy.
    ///
    /// Policy (auth, allowlist, rate limit) is checked by the caller before
    /// this runs; by the time we are here the request is authorized.
    pub async fn create_store_and_deploy(&self, req: &StoreRequest) -> anyhow::Result<StoreOutcome> {
        let resolved =
            resolver::resolve(self.host.as_ref(), &self.source, &self.template_ref, req.kind)
                .await
                .context("template resolution failed")?;
        if resolved.files.is_empty() {
            anyhow::bail!("template resolved to an empty file set, refusing to publish");
        }

        let mut files = resolved.files;
        let branding_outcome = branding::apply(&mut files, &req.branding);
        let mut warnings = branding_outcome.warnings;
        for path in &resolved.fetch_failures {
            warnings.push(format!("template file skipped (download failed): {}", path));
        }

        let message = req
            .commit_message
            .clone()
            .unwrap_or_else(|| format!("Provision storefront from {} template", kind_name(req.kind)));
        let published: Published = publisher::publish(
            self.host.as_ref(),
            &req.target,
            &files,
            &message,
            &req.branch,
        )
        .await
        .with_context(|| format!("publish to {} failed", req.target.full_name()))?;

        let project_name = req
            .project_name
            .clone()
            .unwrap_or_else(|| req.target.repo.clone());
        let spec = ProjectSpec {
            name: project_name,
            env: Vec::new(),
        };
        let provisioned: Provisioned =
            deploy::ensure_and_deploy(self.provider.as_ref(), &spec, &req.target, &req.branch)
                .await
                .context("hosting provisioning failed")?;
        if provisioned.deployment.is_none() {
            warnings.push("deployment was not triggered; retry once the repository is indexed".into());
        }

        Ok(StoreOutcome {
            repo: req.target.full_name(),
            branch: req.branch.clone(),
            commit_sha: published.commit_sha,
            commit_url: published.commit_url,
            files_committed: published.files_committed,
            created_repo: published.created_repo,
            project_id: provisioned.project.id,
            project_name: provisioned.project.name,
            created_project: provisioned.created_project,
            deployment_id: provisioned.deployment.as_ref().map(|d| d.id.clone()),
            deployment_url: provisioned.deployment.as_ref().and_then(|d| d.url.clone()),
            warnings,
        })
    }
}

fn kind_name(kind: TemplateKind) -> &'static str {
    match kind {
        TemplateKind::Base => "base",
        TemplateKind::Extended => "extended",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, InMemoryHost, InMemoryProvider};
    use std::collections::BTreeMap;

    fn seeded_pipeline() -> (Arc<InMemoryHost>, Arc<InMemoryProvider>, Pipeline) {
        let host = Arc::new(InMemoryHost::new());
        host.add_source_file("storeforge", "tpl-base", "package.json", br#"{"name":"storefront","scripts":{"dev":"nuxt dev"}}"#);
        host.add_source_file(
            "storeforge",
            "tpl-base",
            "uno.config.ts",
            b"export default defineConfig({\n  theme: {\n    colors: {\n      accent: '#f59e0b',\n    },\n  },\n})\n",
        );
        host.add_source_file("storeforge", "tpl-base", "app.vue", b"<template/>");
        let provider = Arc::new(InMemoryProvider::new());
        let pipeline = Pipeline::new(
            host.clone(),
            provider.clone(),
            TemplateSource {
                owner: "storeforge".into(),
                base_repo: "tpl-base".into(),
                ext_repo: "tpl-ext".into(),
            },
            "main",
        );
        (host, provider, pipeline)
    }

    #[tokio::test]
    async fn plan_is_read_only() {
        init_test_logging();
        let (host, provider, pipeline) = seeded_pipeline();
        let spec = BrandingSpec {
            colors: BTreeMap::from([("accent".to_string(), "#ff0000".to_string())]),
            logo_svg: None,
        };
        let plan = pipeline
            .plan(TemplateKind::Base, &spec)
            .await
            .expect("plan");
        assert_eq!(plan.file_count, 3);
        assert_eq!(plan.branded_paths, vec!["uno.config.ts"]);
        assert_eq!(plan.theme_tokens, vec!["accent"]);
        assert_eq!(plan.package.as_ref().unwrap().name.as_deref(), Some("storefront"));
        // read-only: nothing was written to the host or the provider
        assert_eq!(host.mutating_calls(), 0);
        assert_eq!(provider.create_calls(), 0);
        assert_eq!(provider.deploy_calls(), 0);
    }

    #[tokio::test]
    async fn create_publishes_branded_files_and_deploys() {
        init_test_logging();
        let (host, provider, pipeline) = seeded_pipeline();
        let req = StoreRequest {
            target: RepoTarget {
                owner: "acme".into(),
                repo: "store-1".into(),
                private: true,
            },
            branding: BrandingSpec {
                colors: BTreeMap::from([("accent".to_string(), "#ff0000".to_string())]),
                logo_svg: Some("<svg>acme</svg>".into()),
            },
            kind: TemplateKind::Base,
            branch: "main".into(),
            commit_message: None,
            project_name: None,
        };
        let out = pipeline.create_store_and_deploy(&req).await.expect("create");
        assert!(out.created_repo);
        // 3 template files plus the appended logo
        assert_eq!(out.files_committed, 4);
        assert_eq!(out.project_name, "store-1");
        assert!(out.deployment_id.is_some());
        assert_eq!(provider.deploy_calls(), 1);

        // the published tree carries the branded theme, not the original
        let tip = host.tip_of("acme", "store-1", "main").unwrap();
        let tree = host.tree_of_commit("acme", "store-1", &tip);
        let theme_sha = tree.get("uno.config.ts").unwrap();
        let theme = host.blob_content("acme", "store-1", theme_sha).unwrap();
        assert!(theme.contains("accent: '#ff0000'"));
        assert!(tree.contains_key("public/logo.svg"));
    }

    #[tokio::test]
    async fn failed_deploy_trigger_is_a_warning_not_an_error() {
        init_test_logging();
        let (host, provider, pipeline) = seeded_pipeline();
        provider.fail_next_trigger();
        let req = StoreRequest {
            target: RepoTarget {
                owner: "acme".into(),
                repo: "store-2".into(),
                private: false,
            },
            branding: BrandingSpec::default(),
            kind: TemplateKind::Base,
            branch: "main".into(),
            commit_message: Some("initial".into()),
            project_name: Some("acme-store".into()),
        };
        let out = pipeline.create_store_and_deploy(&req).await.expect("create");
        // the commit landed even though the deploy did not
        assert!(host.tip_of("acme", "store-2", "main").is_some());
        assert!(out.created_project);
        assert!(out.deployment_id.is_none());
        assert!(out.warnings.iter().any(|w| w.contains("deployment")));
        assert_eq!(out.project_name, "acme-store");
    }
}
