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

//! Test utilities: environment-variable guard, test logging setup and
//! in-memory fakes for the source host and the hosting provider. The fakes
//! are content-addressed like the real host so idempotence and atomicity
//! properties can be asserted without a network.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Once;

use async_trait::async_trait;
use parking_lot::RwLock;
use sha2::{Digest, Sha256};
use tracing_subscriber::EnvFilter;

use crate::deploy::{Deployment, HostingProvider, Project, ProjectSpec, ProviderError};
use crate::github::{BranchTip, DirEntry, GitHost, HostError, TreeFileEntry};
use crate::RepoTarget;

/// Initialize tracing once for tests, honoring RUST_LOG when set.
pub fn init_test_logging() {
    static INIT: Once = Once::new();
    INIT.call_once(|| {
        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
            EnvFilter::new("info,hyper_util=warn,hyper=warn,h2=warn,reqwest=warn")
        });
        let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
    });
}

/// Test helper to manage environment variables and ensure proper cleanup.
pub struct EnvGuard {
    original_values: HashMap<String, Option<String>>,
}

impl EnvGuard {
    pub fn new() -> Self {
        Self {
            original_values: HashMap::new(),
        }
    }

    pub fn save_and_clear(&mut self, vars: &[&str]) {
        for &var in vars {
            let original = std::env::var(var).ok();
            self.original_values.insert(var.to_string(), original);
            std::env::remove_var(var);
        }
    }

    pub fn set(&self, var: &str, value: &str) {
        std::env::set_var(var, value);
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (var, original_value) in &self.original_values {
            match original_value {
                Some(value) => std::env::set_var(var, value),
                None => std::env::remove_var(var),
            }
        }
    }
}

impl Default for EnvGuard {
    fn default() -> Self {
        Self::new()
    }
}

fn sha_hex(parts: &[&[u8]]) -> String {
    let mut hasher = Sha256::new();
    for p in parts {
        hasher.update(p);
        hasher.update([0u8]);
    }
    let digest = hasher.finalize();
    digest.iter().map(|b| format!("{:02x}", b)).collect()
}

#[derive(Clone, Debug)]
struct CommitObj {
    tree: String,
    parents: Vec<String>,
}

#[derive(Default)]
struct RepoState {
    branches: HashMap<String, String>,
    commits: HashMap<String, CommitObj>,
    trees: HashMap<String, BTreeMap<String, String>>,
    blobs: HashMap<String, String>,
}

#[derive(Default)]
struct HostState {
    repos: HashMap<String, RepoState>,
    /// Template source trees served to the resolver: "owner/repo" -> path -> bytes.
    sources: HashMap<String, BTreeMap<String, Vec<u8>>>,
}

/// In-memory [`GitHost`]: content-addressed blob/tree/commit storage, call
/// counters for "no call was made" assertions, and injectable failures for
/// the atomicity scenarios.
#[derive(Default)]
pub struct InMemoryHost {
    state: RwLock<HostState>,
    calls: AtomicUsize,
    mutating_calls: AtomicUsize,
    blob_calls: AtomicUsize,
    fail_blob_call: AtomicUsize,
    fail_ref_update: AtomicBool,
    fail_tip_read: AtomicBool,
    fail_fetch_paths: RwLock<BTreeSet<String>>,
    dir_as_file: RwLock<BTreeSet<String>>,
}

impl InMemoryHost {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed one file of a template source tree.
    pub fn add_source_file(&self, owner: &str, repo: &str, path: &str, content: &[u8]) {
        let mut state = self.state.write();
        state
            .sources
            .entry(format!("{}/{}", owner, repo))
            .or_default()
            .insert(path.to_string(), content.to_vec());
    }

    /// Make the next ref update fail once.
    pub fn fail_next_ref_update(&self) {
        self.fail_ref_update.store(true, Ordering::SeqCst);
    }

    /// Make the n-th blob creation (1-based, counted from now) fail.
    pub fn fail_blob_call(&self, nth: usize) {
        self.blob_calls.store(0, Ordering::SeqCst);
        self.fail_blob_call.store(nth, Ordering::SeqCst);
    }

    /// Make the next branch-tip read fail once.
    pub fn fail_next_tip_read(&self) {
        self.fail_tip_read.store(true, Ordering::SeqCst);
    }

    /// Make fetches of one source path fail, for best-effort resolve tests.
    pub fn fail_fetch_for(&self, path: &str) {
        self.fail_fetch_paths.write().insert(path.to_string());
    }

    /// Answer listings of `path` as if the host found a file there, the way
    /// a misreporting host would.
    pub fn report_dir_as_file(&self, path: &str) {
        self.dir_as_file.write().insert(path.to_string());
    }

    pub fn total_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    pub fn mutating_calls(&self) -> usize {
        self.mutating_calls.load(Ordering::SeqCst)
    }

    pub fn tip_of(&self, owner: &str, repo: &str, branch: &str) -> Option<String> {
        self.state
            .read()
            .repos
            .get(&format!("{}/{}", owner, repo))?
            .branches
            .get(branch)
            .cloned()
    }

    pub fn commit_parents(&self, owner: &str, repo: &str, sha: &str) -> Vec<String> {
        self.state
            .read()
            .repos
            .get(&format!("{}/{}", owner, repo))
            .and_then(|r| r.commits.get(sha))
            .map(|c| c.parents.clone())
            .unwrap_or_default()
    }

    pub fn tree_of_commit(&self, owner: &str, repo: &str, sha: &str) -> BTreeMap<String, String> {
        let state = self.state.read();
        let repo_state = state
            .repos
            .get(&format!("{}/{}", owner, repo))
            .expect("repo exists");
        let commit = repo_state.commits.get(sha).expect("commit exists");
        repo_state
            .trees
            .get(&commit.tree)
            .cloned()
            .expect("tree exists")
    }

    pub fn blob_content(&self, owner: &str, repo: &str, sha: &str) -> Option<String> {
        self.state
            .read()
            .repos
            .get(&format!("{}/{}", owner, repo))
            .and_then(|r| r.blobs.get(sha).cloned())
    }

    pub fn tree_count(&self, owner: &str, repo: &str) -> usize {
        self.state
            .read()
            .repos
            .get(&format!("{}/{}", owner, repo))
            .map(|r| r.trees.len())
            .unwrap_or(0)
    }

    pub fn commit_count(&self, owner: &str, repo: &str) -> usize {
        self.state
            .read()
            .repos
            .get(&format!("{}/{}", owner, repo))
            .map(|r| r.commits.len())
            .unwrap_or(0)
    }

    fn tick(&self, mutating: bool) {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if mutating {
            self.mutating_calls.fetch_add(1, Ordering::SeqCst);
        }
    }
}

#[async_trait]
impl GitHost for InMemoryHost {
    async fn list_dir(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        _git_ref: &str,
    ) -> Result<Vec<DirEntry>, HostError> {
        self.tick(false);
        if self.dir_as_file.read().contains(path) {
            return Err(HostError::Shape {
                expected: "directory",
                path: path.to_string(),
            });
        }
        let state = self.state.read();
        let Some(tree) = state.sources.get(&format!("{}/{}", owner, repo)) else {
            return Err(HostError::Status {
                context: format!("list {}/{}/{}", owner, repo, path),
                status: 404,
            });
        };
        if !path.is_empty() && tree.contains_key(path) {
            return Err(HostError::Shape {
                expected: "directory",
                path: path.to_string(),
            });
        }
        let prefix = if path.is_empty() {
            String::new()
        } else {
            format!("{}/", path)
        };
        let mut seen: BTreeSet<(String, String, String)> = BTreeSet::new();
        for key in tree.keys() {
            let Some(rest) = key.strip_prefix(&prefix) else {
                continue;
            };
            let Some(head) = rest.split('/').next() else {
                continue;
            };
            let entry_path = format!("{}{}", prefix, head);
            let kind = if rest == head { "file" } else { "dir" };
            seen.insert((entry_path, head.to_string(), kind.to_string()));
        }
        if seen.is_empty() && !path.is_empty() {
            return Err(HostError::Status {
                context: format!("list {}/{}/{}", owner, repo, path),
                status: 404,
            });
        }
        Ok(seen
            .into_iter()
            .map(|(path, name, kind)| DirEntry { path, name, kind })
            .collect())
    }

    async fn fetch_raw(
        &self,
        owner: &str,
        repo: &str,
        path: &str,
        _git_ref: &str,
    ) -> Result<Vec<u8>, HostError> {
        self.tick(false);
        if self.fail_fetch_paths.read().contains(path) {
            return Err(HostError::Status {
                context: format!("fetch {}/{}/{}", owner, repo, path),
                status: 500,
            });
        }
        let state = self.state.read();
        state
            .sources
            .get(&format!("{}/{}", owner, repo))
            .and_then(|t| t.get(path).cloned())
            .ok_or_else(|| HostError::Status {
                context: format!("fetch {}/{}/{}", owner, repo, path),
                status: 404,
            })
    }

    async fn repo_exists(&self, owner: &str, repo: &str) -> Result<bool, HostError> {
        self.tick(false);
        Ok(self
            .state
            .read()
            .repos
            .contains_key(&format!("{}/{}", owner, repo)))
    }

    async fn create_repo(&self, target: &RepoTarget) -> Result<(), HostError> {
        self.tick(true);
        self.state
            .write()
            .repos
            .insert(target.full_name(), RepoState::default());
        Ok(())
    }

    async fn get_branch_tip(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
    ) -> Result<Option<BranchTip>, HostError> {
        self.tick(false);
        if self.fail_tip_read.swap(false, Ordering::SeqCst) {
            return Err(HostError::Status {
                context: format!("read ref {}/{}@{}", owner, repo, branch),
                status: 500,
            });
        }
        let state = self.state.read();
        let Some(repo_state) = state.repos.get(&format!("{}/{}", owner, repo)) else {
            return Ok(None);
        };
        let Some(commit_sha) = repo_state.branches.get(branch) else {
            return Ok(None);
        };
        let commit = repo_state
            .commits
            .get(commit_sha)
            .ok_or_else(|| HostError::Malformed {
                context: format!("read ref {}/{}@{}", owner, repo, branch),
                detail: "dangling branch".into(),
            })?;
        Ok(Some(BranchTip {
            commit_sha: commit_sha.clone(),
            tree_sha: commit.tree.clone(),
        }))
    }

    async fn create_blob(
        &self,
        owner: &str,
        repo: &str,
        content: &str,
        encoding: &str,
    ) -> Result<String, HostError> {
        self.tick(true);
        let nth = self.blob_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let target = self.fail_blob_call.load(Ordering::SeqCst);
        if target != 0 && nth == target {
            return Err(HostError::Status {
                context: format!("create blob in {}/{}", owner, repo),
                status: 500,
            });
        }
        let sha = sha_hex(&[b"blob", encoding.as_bytes(), content.as_bytes()]);
        let mut state = self.state.write();
        let repo_state = state
            .repos
            .get_mut(&format!("{}/{}", owner, repo))
            .ok_or_else(|| HostError::Status {
                context: format!("create blob in {}/{}", owner, repo),
                status: 404,
            })?;
        repo_state.blobs.insert(sha.clone(), content.to_string());
        Ok(sha)
    }

    async fn create_tree(
        &self,
        owner: &str,
        repo: &str,
        base_tree: Option<&str>,
        entries: &[TreeFileEntry],
    ) -> Result<String, HostError> {
        self.tick(true);
        let mut state = self.state.write();
        let repo_state = state
            .repos
            .get_mut(&format!("{}/{}", owner, repo))
            .ok_or_else(|| HostError::Status {
                context: format!("create tree in {}/{}", owner, repo),
                status: 404,
            })?;
        let mut map = match base_tree {
            Some(base) => repo_state
                .trees
                .get(base)
                .cloned()
                .ok_or_else(|| HostError::Status {
                    context: format!("create tree in {}/{}", owner, repo),
                    status: 422,
                })?,
            None => BTreeMap::new(),
        };
        for e in entries {
            map.insert(e.path.clone(), e.blob_sha.clone());
        }
        let mut parts: Vec<Vec<u8>> = vec![b"tree".to_vec()];
        for (p, s) in &map {
            parts.push(format!("{}={}", p, s).into_bytes());
        }
        let refs: Vec<&[u8]> = parts.iter().map(|v| v.as_slice()).collect();
        let sha = sha_hex(&refs);
        repo_state.trees.insert(sha.clone(), map);
        Ok(sha)
    }

    async fn create_commit(
        &self,
        owner: &str,
        repo: &str,
        message: &str,
        tree_sha: &str,
        parents: &[String],
    ) -> Result<String, HostError> {
        self.tick(true);
        let mut state = self.state.write();
        let repo_state = state
            .repos
            .get_mut(&format!("{}/{}", owner, repo))
            .ok_or_else(|| HostError::Status {
                context: format!("create commit in {}/{}", owner, repo),
                status: 404,
            })?;
        let sha = sha_hex(&[
            b"commit",
            tree_sha.as_bytes(),
            parents.join(",").as_bytes(),
            message.as_bytes(),
        ]);
        repo_state.commits.insert(
            sha.clone(),
            CommitObj {
                tree: tree_sha.to_string(),
                parents: parents.to_vec(),
            },
        );
        Ok(sha)
    }

    async fn create_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        self.tick(true);
        if self.fail_ref_update.swap(false, Ordering::SeqCst) {
            return Err(HostError::Status {
                context: format!("create ref {}/{}@{}", owner, repo, branch),
                status: 500,
            });
        }
        let mut state = self.state.write();
        let repo_state = state
            .repos
            .get_mut(&format!("{}/{}", owner, repo))
            .ok_or_else(|| HostError::Status {
                context: format!("create ref {}/{}@{}", owner, repo, branch),
                status: 404,
            })?;
        if repo_state.branches.contains_key(branch) {
            return Err(HostError::Status {
                context: format!("create ref {}/{}@{}", owner, repo, branch),
                status: 422,
            });
        }
        repo_state.branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    async fn update_ref(
        &self,
        owner: &str,
        repo: &str,
        branch: &str,
        sha: &str,
    ) -> Result<(), HostError> {
        self.tick(true);
        if self.fail_ref_update.swap(false, Ordering::SeqCst) {
            return Err(HostError::Status {
                context: format!("update ref {}/{}@{}", owner, repo, branch),
                status: 500,
            });
        }
        let mut state = self.state.write();
        let repo_state = state
            .repos
            .get_mut(&format!("{}/{}", owner, repo))
            .ok_or_else(|| HostError::Status {
                context: format!("update ref {}/{}@{}", owner, repo, branch),
                status: 404,
            })?;
        let current = repo_state.branches.get(branch).cloned().ok_or_else(|| {
            HostError::Status {
                context: format!("update ref {}/{}@{}", owner, repo, branch),
                status: 422,
            }
        })?;
        // fast-forward only: the new commit must descend from the current tip
        let new_commit = repo_state
            .commits
            .get(sha)
            .ok_or_else(|| HostError::Status {
                context: format!("update ref {}/{}@{}", owner, repo, branch),
                status: 422,
            })?;
        if !new_commit.parents.contains(&current) {
            return Err(HostError::Status {
                context: format!("update ref {}/{}@{}", owner, repo, branch),
                status: 422,
            });
        }
        repo_state.branches.insert(branch.to_string(), sha.to_string());
        Ok(())
    }

    fn commit_url(&self, owner: &str, repo: &str, sha: &str) -> String {
        format!("https://git.local/{}/{}/commit/{}", owner, repo, sha)
    }
}

/// In-memory [`HostingProvider`] with call counters and a one-shot trigger
/// failure switch.
#[derive(Default)]
pub struct InMemoryProvider {
    projects: RwLock<HashMap<String, Project>>,
    find_calls: AtomicUsize,
    create_count: AtomicUsize,
    deploy_count: AtomicUsize,
    fail_trigger: AtomicBool,
}

impl InMemoryProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail_next_trigger(&self) {
        self.fail_trigger.store(true, Ordering::SeqCst);
    }

    pub fn find_calls(&self) -> usize {
        self.find_calls.load(Ordering::SeqCst)
    }

    pub fn create_calls(&self) -> usize {
        self.create_count.load(Ordering::SeqCst)
    }

    pub fn deploy_calls(&self) -> usize {
        self.deploy_count.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl HostingProvider for InMemoryProvider {
    async fn find_project(&self, name: &str) -> Result<Option<Project>, ProviderError> {
        self.find_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.projects.read().get(name).cloned())
    }

    async fn create_project(
        &self,
        spec: &ProjectSpec,
        link: &RepoTarget,
    ) -> Result<Project, ProviderError> {
        let n = self.create_count.fetch_add(1, Ordering::SeqCst) + 1;
        let project = Project {
            id: format!("prj_{}", n),
            name: spec.name.clone(),
            linked_repo: Some(link.full_name()),
        };
        self.projects
            .write()
            .insert(spec.name.clone(), project.clone());
        Ok(project)
    }

    async fn trigger_deployment(
        &self,
        project: &Project,
        _branch: &str,
    ) -> Result<Deployment, ProviderError> {
        if self.fail_trigger.swap(false, Ordering::SeqCst) {
            return Err(ProviderError::Status {
                context: format!("deploy project {}", project.name),
                status: 500,
            });
        }
        let n = self.deploy_count.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Deployment {
            id: format!("dpl_{}", n),
            url: Some(format!("https://{}.deploy.local", project.name)),
            state: Some("QUEUED".into()),
        })
    }
}
