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

//! Deployment provisioner: ensure a hosting project exists for the
//! destination repository, then trigger a single deployment. Project
//! creation is the durable side effect; a failed deploy trigger is
//! downgraded to a warning so the caller can retry it later.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;

use crate::RepoTarget;

#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("{context}: provider returned {status}")]
    Status { context: String, status: u16 },
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("{context}: malformed response: {detail}")]
    Malformed { context: String, detail: String },
}

/// A hosting project bound to a source repository.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Project {
    pub id: String,
    pub name: String,
    /// `owner/repo` of the linked git source, when one is configured.
    pub linked_repo: Option<String>,
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Deployment {
    pub id: String,
    pub url: Option<String>,
    pub state: Option<String>,
}

/// Desired project shape. Environment variables are only applied on
/// creation; an existing project is never mutated.
#[derive(Clone, Debug, Default)]
pub struct ProjectSpec {
    pub name: String,
    pub env: Vec<(String, String)>,
}

#[derive(Clone, Debug)]
pub struct Provisioned {
    pub project: Project,
    /// `None` when the deploy trigger failed or no git source was linked.
    pub deployment: Option<Deployment>,
    pub created_project: bool,
}

/// Hosting-provider seam; the in-memory fake in `test_utils` implements it.
#[async_trait]
pub trait HostingProvider: Send + Sync {
    async fn find_project(&self, name: &str) -> Result<Option<Project>, ProviderError>;

    async fn create_project(
        &self,
        spec: &ProjectSpec,
        link: &RepoTarget,
    ) -> Result<Project, ProviderError>;

    async fn trigger_deployment(
        &self,
        project: &Project,
        branch: &str,
    ) -> Result<Deployment, ProviderError>;
}

/// Ensure the project exists (create-if-absent, reuse otherwise), then
/// trigger one deployment when a git source is configured. The trigger is
/// best-effort: a failure — common right after repository creation, before
/// the host has indexed it — is logged and reported as `deployment: None`.
pub async fn ensure_and_deploy(
    provider: &dyn HostingProvider,
    spec: &ProjectSpec,
    target: &RepoTarget,
    branch: &str,
) -> Result<Provisioned, ProviderError> {
    let (project, created) = match provider.find_project(&spec.name).await? {
        Some(existing) => {
            tracing::debug!(project = %existing.name, "reusing existing hosting project");
            (existing, false)
        }
        None => {
            let created = provider.create_project(spec, target).await?;
            tracing::info!(project = %created.name, repo = %target.full_name(), "created hosting project");
            (created, true)
        }
    };

    let deployment = if project.linked_repo.is_some() {
        match provider.trigger_deployment(&project, branch).await {
            Ok(d) => Some(d),
            Err(e) => {
                tracing::warn!(
                    project = %project.name,
                    error = %e,
                    "deployment trigger failed; project creation stands, caller may retry"
                );
                None
            }
        }
    } else {
        tracing::warn!(project = %project.name, "project has no git source configured, skipping deploy");
        None
    };

    Ok(Provisioned {
        project,
        deployment,
        created_project: created,
    })
}

/// Vercel REST implementation. Base URL overridable for tests.
pub struct VercelClient {
    http: reqwest::Client,
    base: String,
    token: String,
}

impl VercelClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, "https://api.vercel.com")
    }

    pub fn with_base_url(token: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http.request(method, url).bearer_auth(&self.token)
    }

    async fn send_json(
        &self,
        context: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, ProviderError> {
        let resp = builder.send().await.map_err(|e| ProviderError::Transport {
            context: context.to_string(),
            source: e,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(ProviderError::Status {
                context: context.to_string(),
                status: status.as_u16(),
            });
        }
        resp.json().await.map_err(|e| ProviderError::Transport {
            context: context.to_string(),
            source: e,
        })
    }

    fn project_from(&self, context: &str, v: &serde_json::Value) -> Result<Project, ProviderError> {
        let id = v
            .get("id")
            .and_then(|x| x.as_str())
            .ok_or_else(|| ProviderError::Malformed {
                context: context.to_string(),
                detail: "missing id".into(),
            })?
            .to_string();
        let name = v
            .get("name")
            .and_then(|x| x.as_str())
            .unwrap_or_default()
            .to_string();
        let linked_repo = v
            .get("link")
            .and_then(|l| l.get("repo"))
            .and_then(|x| x.as_str())
            .map(|s| s.to_string());
        Ok(Project {
            id,
            name,
            linked_repo,
        })
    }
}

#[async_trait]
impl HostingProvider for VercelClient {
    async fn find_project(&self, name: &str) -> Result<Option<Project>, ProviderError> {
        let context = format!("find project {}", name);
        let url = format!("{}/v9/projects/{}", self.base, name);
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| ProviderError::Transport {
                context: context.clone(),
                source: e,
            })?;
        match resp.status().as_u16() {
            200 => {
                let body: serde_json::Value =
                    resp.json().await.map_err(|e| ProviderError::Transport {
                        context: context.clone(),
                        source: e,
                    })?;
                Ok(Some(self.project_from(&context, &body)?))
            }
            404 => Ok(None),
            status => Err(ProviderError::Status { context, status }),
        }
    }

    async fn create_project(
        &self,
        spec: &ProjectSpec,
        link: &RepoTarget,
    ) -> Result<Project, ProviderError> {
        let context = format!("create project {}", spec.name);
        let url = format!("{}/v10/projects", self.base);
        let env: Vec<serde_json::Value> = spec
            .env
            .iter()
            .map(|(k, v)| {
                json!({
                    "key": k,
                    "value": v,
                    "target": ["production", "preview"],
                    "type": "encrypted",
                })
            })
            .collect();
        let body = json!({
            "name": spec.name,
            "framework": "nuxtjs",
            "gitRepository": { "type": "github", "repo": link.full_name() },
            "environmentVariables": env,
        });
        let resp = self
            .send_json(&context, self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        let mut project = self.project_from(&context, &resp)?;
        // The create response does not always echo the link back.
        if project.linked_repo.is_none() {
            project.linked_repo = Some(link.full_name());
        }
        Ok(project)
    }

    async fn trigger_deployment(
        &self,
        project: &Project,
        branch: &str,
    ) -> Result<Deployment, ProviderError> {
        let context = format!("deploy project {}", project.name);
        let repo = project
            .linked_repo
            .as_deref()
            .ok_or_else(|| ProviderError::Malformed {
                context: context.clone(),
                detail: "no git source linked".into(),
            })?;
        let url = format!("{}/v13/deployments", self.base);
        let body = json!({
            "name": project.name,
            "gitSource": {
                "type": "github",
                "repo": repo,
                "ref": branch,
            },
        });
        let resp = self
            .send_json(&context, self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        let id = resp
            .get("id")
            .and_then(|x| x.as_str())
            .ok_or_else(|| ProviderError::Malformed {
                context,
                detail: "missing deployment id".into(),
            })?
            .to_string();
        Ok(Deployment {
            id,
            url: resp
                .get("url")
                .and_then(|x| x.as_str())
                .map(|s| s.to_string()),
            state: resp
                .get("readyState")
                .and_then(|x| x.as_str())
                .map(|s| s.to_string()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, InMemoryProvider};

    fn target() -> RepoTarget {
        RepoTarget {
            owner: "acme".into(),
            repo: "store-1".into(),
            private: true,
        }
    }

    fn spec() -> ProjectSpec {
        ProjectSpec {
            name: "store-1".into(),
            env: vec![("NUXT_PUBLIC_API".into(), "https://api.acme.test".into())],
        }
    }

    #[tokio::test]
    async fn creates_project_and_triggers_one_deployment() {
        init_test_logging();
        let provider = InMemoryProvider::new();
        let out = ensure_and_deploy(&provider, &spec(), &target(), "main")
            .await
            .expect("provision");
        assert!(out.created_project);
        assert!(out.deployment.is_some());
        assert_eq!(provider.deploy_calls(), 1);
    }

    #[tokio::test]
    async fn existing_project_is_reused_never_mutated() {
        init_test_logging();
        let provider = InMemoryProvider::new();
        let first = ensure_and_deploy(&provider, &spec(), &target(), "main")
            .await
            .unwrap();
        let second = ensure_and_deploy(&provider, &spec(), &target(), "main")
            .await
            .unwrap();
        assert!(!second.created_project);
        assert_eq!(second.project.id, first.project.id);
        assert_eq!(provider.create_calls(), 1);
    }

    #[tokio::test]
    async fn failed_trigger_downgrades_to_missing_deployment() {
        init_test_logging();
        let provider = InMemoryProvider::new();
        provider.fail_next_trigger();
        let out = ensure_and_deploy(&provider, &spec(), &target(), "main")
            .await
            .expect("provision must still succeed");
        assert!(out.created_project);
        assert!(out.deployment.is_none());
    }
}
