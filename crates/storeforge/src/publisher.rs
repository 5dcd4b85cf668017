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

//! Transactional repository publisher.
//!
//! Materializes a file set as exactly one commit on a destination branch via
//! the low-level git-data pipeline: ensure repo, resolve base tip, blobs,
//! tree, commit, then the branch-ref write. Only the final ref write makes
//! anything reachable; every earlier stage creates content-addressed,
//! unreferenced objects, so a failure at any stage leaves the branch exactly
//! where it was and nothing needs rolling back.

use thiserror::Error;

use crate::github::{GitHost, HostError, TreeFileEntry};
use crate::{FileSet, RepoTarget};

/// Stage-named failure. `Ref` covers both reading the base tip and the
/// final ref write, so it does not imply a write was attempted. Whatever the
/// stage, a failed publish leaves the branch exactly where it was; visible
/// state changes only on `Ok`.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("repository create failed: {0}")]
    Repo(#[source] HostError),
    #[error("blob create failed for '{path}': {source}")]
    Blob {
        path: String,
        #[source]
        source: HostError,
    },
    #[error("tree create failed: {0}")]
    Tree(#[source] HostError),
    #[error("commit create failed: {0}")]
    Commit(#[source] HostError),
    #[error("ref update failed: {0}")]
    Ref(#[source] HostError),
}

#[derive(Clone, Debug)]
pub struct Published {
    pub commit_sha: String,
    pub commit_url: String,
    pub files_committed: usize,
    /// Whether the destination repository was created by this publish.
    pub created_repo: bool,
}

/// Publish `files` as a single commit on `branch` of `target`.
///
/// Bootstrap cases are first-class: an absent repository is created
/// (auto-initialized), and an absent branch yields a parentless commit plus
/// a ref create instead of a ref update. An existing branch is only ever
/// fast-forwarded; a tip that moved concurrently surfaces as
/// [`PublishError::Ref`], never a force push.
pub async fn publish(
    host: &dyn GitHost,
    target: &RepoTarget,
    files: &FileSet,
    message: &str,
    branch: &str,
) -> Result<Published, PublishError> {
    // Stage 1: ensure the repository exists.
    let existed = host
        .repo_exists(&target.owner, &target.repo)
        .await
        .map_err(PublishError::Repo)?;
    if !existed {
        tracing::info!(repo = %target.full_name(), "destination repository absent, creating");
        host.create_repo(target).await.map_err(PublishError::Repo)?;
    }

    // Stage 2: resolve the base tip. Absence is a valid outcome, not an error.
    let base = host
        .get_branch_tip(&target.owner, &target.repo, branch)
        .await
        .map_err(PublishError::Ref)?;
    tracing::debug!(
        repo = %target.full_name(),
        branch = %branch,
        base_commit = base.as_ref().map(|t| t.commit_sha.as_str()).unwrap_or("<none>"),
        "resolved publish base"
    );

    // Stage 3: one content-addressed blob per file, in path order.
    let mut entries = Vec::with_capacity(files.len());
    for file in files.iter() {
        let sha = host
            .create_blob(
                &target.owner,
                &target.repo,
                &file.content,
                file.encoding.blob_encoding(),
            )
            .await
            .map_err(|e| PublishError::Blob {
                path: file.path.clone(),
                source: e,
            })?;
        entries.push(TreeFileEntry {
            path: file.path.clone(),
            blob_sha: sha,
        });
    }

    // Stage 4: one tree overlaying the new blobs on the base tree, so
    // unrelated pre-existing paths on the branch are preserved.
    let tree_sha = host
        .create_tree(
            &target.owner,
            &target.repo,
            base.as_ref().map(|t| t.tree_sha.as_str()),
            &entries,
        )
        .await
        .map_err(PublishError::Tree)?;

    // Stage 5: one commit with the base tip (if any) as sole parent.
    let parents: Vec<String> = base
        .as_ref()
        .map(|t| vec![t.commit_sha.clone()])
        .unwrap_or_default();
    let commit_sha = host
        .create_commit(&target.owner, &target.repo, message, &tree_sha, &parents)
        .await
        .map_err(PublishError::Commit)?;

    // Stage 6: the commit point. Create the ref for a new branch, otherwise
    // fast-forward it.
    match base {
        Some(_) => host
            .update_ref(&target.owner, &target.repo, branch, &commit_sha)
            .await
            .map_err(PublishError::Ref)?,
        None => host
            .create_ref(&target.owner, &target.repo, branch, &commit_sha)
            .await
            .map_err(PublishError::Ref)?,
    }

    let commit_url = host.commit_url(&target.owner, &target.repo, &commit_sha);
    tracing::info!(
        repo = %target.full_name(),
        branch = %branch,
        commit = %commit_sha,
        files = files.len(),
        created_repo = !existed,
        "published"
    );
    Ok(Published {
        commit_sha,
        commit_url,
        files_committed: files.len(),
        created_repo: !existed,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{init_test_logging, InMemoryHost};
    use crate::TemplateFile;

    fn two_files() -> FileSet {
        vec![
            TemplateFile::text("app.vue", "<template>hi</template>"),
            TemplateFile::text("nuxt.config.ts", "export default {}"),
        ]
        .into_iter()
        .collect()
    }

    fn target() -> RepoTarget {
        RepoTarget {
            owner: "acme".into(),
            repo: "store-1".into(),
            private: true,
        }
    }

    #[tokio::test]
    async fn bootstrap_publish_creates_repo_and_ref() {
        init_test_logging();
        let host = InMemoryHost::new();
        let files = two_files();

        let out = publish(&host, &target(), &files, "init storefront", "main")
            .await
            .expect("publish");
        assert!(out.created_repo);
        assert_eq!(out.files_committed, 2);

        let tip = host
            .tip_of("acme", "store-1", "main")
            .expect("branch created");
        assert_eq!(tip, out.commit_sha);
        // a bootstrap commit has no parent
        assert!(host.commit_parents("acme", "store-1", &tip).is_empty());
        let tree = host.tree_of_commit("acme", "store-1", &tip);
        assert_eq!(tree.len(), 2);
        assert!(tree.contains_key("app.vue"));
    }

    #[tokio::test]
    async fn publish_onto_existing_branch_preserves_unrelated_paths() {
        init_test_logging();
        let host = InMemoryHost::new();
        // seed an existing branch with an unrelated file
        let seed: FileSet = vec![TemplateFile::text("LICENSE", "MIT")].into_iter().collect();
        let first = publish(&host, &target(), &seed, "seed", "main")
            .await
            .expect("seed publish");

        let out = publish(&host, &target(), &two_files(), "storefront", "main")
            .await
            .expect("publish");
        assert!(!out.created_repo);

        let tip = host.tip_of("acme", "store-1", "main").unwrap();
        assert_eq!(tip, out.commit_sha);
        assert_eq!(
            host.commit_parents("acme", "store-1", &tip),
            vec![first.commit_sha.clone()]
        );
        let tree = host.tree_of_commit("acme", "store-1", &tip);
        // unrelated path from the base tree survives the overlay
        assert_eq!(tree.len(), 3);
        assert!(tree.contains_key("LICENSE"));
        assert!(tree.contains_key("app.vue"));
        assert!(tree.contains_key("nuxt.config.ts"));
    }

    #[tokio::test]
    async fn failed_ref_update_leaves_branch_untouched() {
        init_test_logging();
        let host = InMemoryHost::new();
        let first = publish(&host, &target(), &two_files(), "one", "main")
            .await
            .expect("first publish");

        host.fail_next_ref_update();
        let err = publish(&host, &target(), &two_files(), "two", "main")
            .await
            .expect_err("ref update should fail");
        assert!(matches!(err, PublishError::Ref(_)));
        // no partial visible state: the branch still points at the old tip
        assert_eq!(
            host.tip_of("acme", "store-1", "main").unwrap(),
            first.commit_sha
        );
    }

    #[tokio::test]
    async fn base_tip_read_failure_aborts_before_creating_anything() {
        init_test_logging();
        let host = InMemoryHost::new();
        let first = publish(&host, &target(), &two_files(), "one", "main")
            .await
            .expect("first publish");

        host.fail_next_tip_read();
        let err = publish(&host, &target(), &two_files(), "two", "main")
            .await
            .expect_err("tip read should fail");
        assert!(matches!(err, PublishError::Ref(_)));
        // no objects were created and the branch is where it was
        assert_eq!(host.commit_count("acme", "store-1"), 1);
        assert_eq!(host.tree_count("acme", "store-1"), 1);
        assert_eq!(
            host.tip_of("acme", "store-1", "main").unwrap(),
            first.commit_sha
        );
    }

    #[tokio::test]
    async fn blob_failure_aborts_before_any_tree_or_commit() {
        init_test_logging();
        let host = InMemoryHost::new();
        publish(&host, &target(), &two_files(), "one", "main")
            .await
            .expect("first publish");

        let trees_before = host.tree_count("acme", "store-1");
        let commits_before = host.commit_count("acme", "store-1");
        // files upload in path order, so the second blob is nuxt.config.ts
        host.fail_blob_call(2);

        let err = publish(&host, &target(), &two_files(), "two", "main")
            .await
            .expect_err("blob create should fail");
        match err {
            PublishError::Blob { path, .. } => assert_eq!(path, "nuxt.config.ts"),
            other => panic!("expected Blob error, got {other:?}"),
        }
        assert_eq!(host.tree_count("acme", "store-1"), trees_before);
        assert_eq!(host.commit_count("acme", "store-1"), commits_before);
    }

    #[tokio::test]
    async fn republish_is_content_idempotent() {
        init_test_logging();
        let host = InMemoryHost::new();
        let files = two_files();
        let first = publish(&host, &target(), &files, "one", "main")
            .await
            .expect("first");
        let second = publish(&host, &target(), &files, "two", "main")
            .await
            .expect("second");

        // distinct commits, identical tree content (same blob set)
        assert_ne!(first.commit_sha, second.commit_sha);
        let t1 = host.tree_of_commit("acme", "store-1", &first.commit_sha);
        let t2 = host.tree_of_commit("acme", "store-1", &second.commit_sha);
        assert_eq!(t1, t2);
    }
}
