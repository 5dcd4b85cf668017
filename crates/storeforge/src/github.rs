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

//! Source-host access: the [`GitHost`] seam plus the GitHub REST
//! implementation. The publisher and resolver only ever talk to the trait so
//! tests run against the in-memory host in `test_utils`.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use thiserror::Error;

use crate::RepoTarget;

#[derive(Debug, Error)]
pub enum HostError {
    #[error("{context}: host returned {status}")]
    Status { context: String, status: u16 },
    #[error("{context}: {source}")]
    Transport {
        context: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("expected a {expected} at {path}")]
    Shape {
        expected: &'static str,
        path: String,
    },
    #[error("{context}: malformed response: {detail}")]
    Malformed { context: String, detail: String },
}

/// One entry of a directory listing.
#[derive(Clone, Debug, Deserialize)]
pub struct DirEntry {
    pub path: String,
    pub name: String,
    /// `file` or `dir`.
    #[serde(rename = "type")]
    pub kind: String,
}

/// Tip of an existing branch: its commit and that commit's tree.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BranchTip {
    pub commit_sha: String,
    pub tree_sha: String,
}

/// A path -> blob pairing for tree construction.
#[derive(Clone, Debug)]
pub struct TreeFileEntry {
    pub path: String,
    pub blob_sha: String,
}

/// Everything the resolver and publisher need from the source host.
///
/// Read operations: directory listing and raw content fetch. Mutating
/// operations: repository ensure plus the low-level git-data pipeline
/// (blob/tree/commit/ref). All calls are authenticated with the server-held
/// credential, never a caller-supplied one.
#[async_trait]
pub trait GitHost: Send + Sync {
    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<DirEntry>, HostError>;

    async fn fetch_raw(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>, HostError>;

    async fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, HostError>;

    /// Create the repository auto-initialized, so the git-data API is usable
    /// against it immediately.
    async fn create_repo(&self, target: &RepoTarget) -> Result<(), HostError>;

    /// Read the branch tip. `None` (not an error) when the branch or the
    /// repository's history does not exist yet.
    async fn get_branch_tip(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchTip>, HostError>;

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
        encoding: &str,
    ) -> Result<String, HostError>;

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: Option<&str>,
        entries: &[TreeFileEntry],
    ) -> Result<String, HostError>;

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String, HostError>;

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError>;

    /// Fast-forward the existing branch ref. Never forces.
    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError>;

    fn commit_url(&self, owner: &str, repo: &str, sha: &str) -> String;
}

/// GitHub REST implementation. The base URL is overridable so tests or
/// GitHub Enterprise deployments can point it elsewhere.
pub struct GitHubClient {
    http: reqwest::Client,
    base: String,
    web_base: String,
    token: String,
}

impl GitHubClient {
    pub fn new(token: impl Into<String>) -> Self {
        Self::with_base_url(token, "https://api.github.com")
    }

    pub fn with_base_url(token: impl Into<String>, base: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base: base.into().trim_end_matches('/').to_string(),
            web_base: "https://github.com".to_string(),
            token: token.into(),
        }
    }

    fn request(&self, method: reqwest::Method, url: String) -> reqwest::RequestBuilder {
        self.http
            .request(method, url)
            .bearer_auth(&self.token)
            .header(reqwest::header::USER_AGENT, "storeforge")
            .header(reqwest::header::ACCEPT, "application/vnd.github+json")
    }

    async fn send_json(
        &self,
        context: &str,
        builder: reqwest::RequestBuilder,
    ) -> Result<serde_json::Value, HostError> {
        let resp = builder.send().await.map_err(|e| HostError::Transport {
            context: context.to_string(),
            source: e,
        })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HostError::Status {
                context: context.to_string(),
                status: status.as_u16(),
            });
        }
        resp.json().await.map_err(|e| HostError::Transport {
            context: context.to_string(),
            source: e,
        })
    }

    fn sha_from(&self, context: &str, v: &serde_json::Value) -> Result<String, HostError> {
        v.get("sha")
            .and_then(|s| s.as_str())
            .map(|s| s.to_string())
            .ok_or_else(|| HostError::Malformed {
                context: context.to_string(),
                detail: "missing sha".into(),
            })
    }
}

#[async_trait]
impl GitHost for GitHubClient {
    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<DirEntry>, HostError> {
        let context = format!("list {}/{}/{}", owner, repo, path);
        let url = format!("{}/repos/{}/{}/contents/{}", self.base, owner, repo, path);
        let body = self
            .send_json(
                &context,
                self.request(reqwest::Method::GET, url).query(&[("ref", git_ref)]),
            )
            .await?;
        if body.is_object() {
            // The contents API returns an object when the path is a file.
            return Err(HostError::Shape {
                expected: "directory",
                path: path.to_string(),
            });
        }
        serde_json::from_value(body).map_err(|e| HostError::Malformed {
            context,
            detail: e.to_string(),
        })
    }

    async fn fetch_raw(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        git_ref: &str,
    ) -> Result<Vec<u8>, HostError> {
        let context = format!("fetch {}/{}/{}", owner, repo, path);
        let url = format!("{}/repos/{}/{}/contents/{}", self.base, owner, repo, path);
        let resp = self
            .request(reqwest::Method::GET, url)
            .query(&[("ref", git_ref)])
            .header(reqwest::header::ACCEPT, "application/vnd.github.raw")
            .send()
            .await
            .map_err(|e| HostError::Transport {
                context: context.clone(),
                source: e,
            })?;
        let status = resp.status();
        if !status.is_success() {
            return Err(HostError::Status {
                context,
                status: status.as_u16(),
            });
        }
        let bytes = resp.bytes().await.map_err(|e| HostError::Transport {
            context,
            source: e,
        })?;
        Ok(bytes.to_vec())
    }

    async fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, HostError> {
        let context = format!("stat {}/{}", owner, repo);
        let url = format!("{}/repos/{}/{}", self.base, owner, repo);
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| HostError::Transport {
                context: context.clone(),
                source: e,
            })?;
        match resp.status().as_u16() {
            200 => Ok(true),
            404 => Ok(false),
            status => Err(HostError::Status { context, status }),
        }
    }

    async fn create_repo(&self, target: &RepoTarget) -> Result<(), HostError> {
        let context = format!("create repo {}", target.full_name());
        let body = json!({
            "name": target.repo,
            "private": target.private,
            "auto_init": true,
        });
        // Try the org endpoint first; fall back to the authenticated user's
        // namespace when the owner is not an organization.
        let org_url = format!("{}/orgs/{}/repos", self.base, target.owner);
        let resp = self
            .request(reqwest::Method::POST, org_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| HostError::Transport {
                context: context.clone(),
                source: e,
            })?;
        if resp.status().is_success() {
            return Ok(());
        }
        if resp.status().as_u16() != 404 {
            return Err(HostError::Status {
                context,
                status: resp.status().as_u16(),
            });
        }
        let user_url = format!("{}/user/repos", self.base);
        self.send_json(&context, self.request(reqwest::Method::POST, user_url).json(&body))
            .await?;
        Ok(())
    }

    async fn get_branch_tip(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchTip>, HostError> {
        let context = format!("read ref {}/{}@{}", owner, repo, branch);
        let url = format!(
            "{}/repos/{}/{}/git/ref/heads/{}",
            self.base, owner, repo, branch
        );
        let resp = self
            .request(reqwest::Method::GET, url)
            .send()
            .await
            .map_err(|e| HostError::Transport {
                context: context.clone(),
                source: e,
            })?;
        // 404: branch absent; 409: repository has no history yet.
        match resp.status().as_u16() {
            200 => {}
            404 | 409 => return Ok(None),
            status => return Err(HostError::Status { context, status }),
        }
        let body: serde_json::Value = resp.json().await.map_err(|e| HostError::Transport {
            context: context.clone(),
            source: e,
        })?;
        let commit_sha = body
            .get("object")
            .and_then(|o| o.get("sha"))
            .and_then(|s| s.as_str())
            .ok_or_else(|| HostError::Malformed {
                context: context.clone(),
                detail: "missing object.sha".into(),
            })?
            .to_string();

        let commit_url = format!(
            "{}/repos/{}/{}/git/commits/{}",
            self.base, owner, repo, commit_sha
        );
        let commit = self
            .send_json(&context, self.request(reqwest::Method::GET, commit_url))
            .await?;
        let tree_sha = commit
            .get("tree")
            .and_then(|t| t.get("sha"))
            .and_then(|s| s.as_str())
            .ok_or_else(|| HostError::Malformed {
                context,
                detail: "missing tree.sha".into(),
            })?
            .to_string();
        Ok(Some(BranchTip {
            commit_sha,
            tree_sha,
        }))
    }

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
        encoding: &str,
    ) -> Result<String, HostError> {
        let context = format!("create blob in {}/{}", owner, repo);
        let url = format!("{}/repos/{}/{}/git/blobs", self.base, owner, repo);
        let body = self
            .send_json(
                &context,
                self.request(reqwest::Method::POST, url)
                    .json(&json!({ "content": content, "encoding": encoding })),
            )
            .await?;
        self.sha_from(&context, &body)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: Option<&str>,
        entries: &[TreeFileEntry],
    ) -> Result<String, HostError> {
        let context = format!("create tree in {}/{}", owner, repo);
        let url = format!("{}/repos/{}/{}/git/trees", self.base, owner, repo);
        let tree: Vec<serde_json::Value> = entries
            .iter()
            .map(|e| {
                json!({
                    "path": e.path,
                    "mode": "100644",
                    "type": "blob",
                    "sha": e.blob_sha,
                })
            })
            .collect();
        let mut body = json!({ "tree": tree });
        if let Some(base) = base_tree {
            body["base_tree"] = json!(base);
        }
        let resp = self
            .send_json(&context, self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        self.sha_from(&context, &resp)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String, HostError> {
        let context = format!("create commit in {}/{}", owner, repo);
        let url = format!("{}/repos/{}/{}/git/commits", self.base, owner, repo);
        let body = json!({
            "message": message,
            "tree": tree_sha,
            "parents": parents,
        });
        let resp = self
            .send_json(&context, self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        self.sha_from(&context, &resp)
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        let context = format!("create ref {}/{}@{}", owner, repo, branch);
        let url = format!("{}/repos/{}/{}/git/refs", self.base, owner, repo);
        let body = json!({
            "ref": format!("refs/heads/{}", branch),
            "sha": sha,
        });
        self.send_json(&context, self.request(reqwest::Method::POST, url).json(&body))
            .await?;
        Ok(())
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        let context = format!("update ref {}/{}@{}", owner, repo, branch);
        let url = format!(
            "{}/repos/{}/{}/git/refs/heads/{}",
            self.base, owner, repo, branch
        );
        // force: false — the host rejects non-fast-forward updates.
        let body = json!({ "sha": sha, "force": false });
        self.send_json(
            &context,
            self.request(reqwest::Method::PATCH, url).json(&body),
        )
        .await?;
        Ok(())
    }

    fn commit_url(&self, owner: &str, repo: &str, sha: &str) -> String {
        format!("{}/{}/{}/commit/{}", self.web_base, owner, repo, sha)
    }
}
