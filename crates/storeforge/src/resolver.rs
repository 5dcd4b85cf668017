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

//! Template resolution: walk a template tree on the source host, fetch leaf
//! contents (binary files as base64), optionally merge an extension tree
//! over the base, and fix up the merged set so it is self-contained.

use base64::Engine;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::github::{GitHost, HostError};
use crate::{FileSet, TemplateFile};

/// Which template tree(s) to resolve.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TemplateKind {
    Base,
    Extended,
}

#[derive(Debug, Error)]
pub enum ResolveError {
    #[error("source fetch failed: {0}")]
    Fetch(#[source] HostError),
    #[error("source tree shape error: expected a {expected} at {path}")]
    Shape {
        expected: &'static str,
        path: String,
    },
}

impl From<HostError> for ResolveError {
    fn from(e: HostError) -> Self {
        match e {
            HostError::Shape { expected, path } => ResolveError::Shape { expected, path },
            other => ResolveError::Fetch(other),
        }
    }
}

/// Where the templates live on the source host.
#[derive(Clone, Debug)]
pub struct TemplateSource {
    pub owner: String,
    pub base_repo: String,
    pub ext_repo: String,
}

/// Resolve result. `fetch_failures` lists leaf paths that could not be
/// downloaded; the caller can distinguish complete from best-effort output.
#[derive(Debug, Default)]
pub struct Resolved {
    pub files: FileSet,
    pub fetched: usize,
    pub fetch_failures: Vec<String>,
}

/// Extensions stored as base64 rather than text.
const BINARY_EXTENSIONS: &[&str] = &[
    "png", "jpg", "jpeg", "gif", "ico", "woff", "woff2", "ttf", "eot", "webp", "avif",
];

fn is_binary_path(path: &str) -> bool {
    path.rsplit('.')
        .next()
        .map(|ext| BINARY_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}

/// Walk one repository tree and fetch every leaf. A leaf that fails to
/// download is skipped and recorded, not fatal; a directory that cannot be
/// listed is.
async fn fetch_tree(
    host: &dyn GitHost,
    owner: &str,
    repo: &str,
    git_ref: &str,
) -> Result<Resolved, ResolveError> {
    let mut out = Resolved::default();
    let mut pending: Vec<String> = vec![String::new()];

    while let Some(dir) = pending.pop() {
        let entries = host.list_dir(owner, repo, &dir, git_ref).await?;
        for entry in entries {
            match entry.kind.as_str() {
                "dir" => pending.push(entry.path),
                "file" => match host.fetch_raw(owner, repo, &entry.path, git_ref).await {
                    Ok(bytes) => {
                        let file = if is_binary_path(&entry.path) {
                            TemplateFile::base64(
                                entry.path,
                                base64::engine::general_purpose::STANDARD.encode(&bytes),
                            )
                        } else {
                            TemplateFile::text(
                                entry.path,
                                String::from_utf8_lossy(&bytes).into_owned(),
                            )
                        };
                        out.files.insert(file);
                        out.fetched += 1;
                    }
                    Err(e) => {
                        tracing::warn!(
                            repo = %format!("{}/{}", owner, repo),
                            path = %entry.path,
                            error = %e,
                            "skipping file that failed to download"
                        );
                        out.fetch_failures.push(entry.path);
                    }
                },
                other => {
                    tracing::debug!(path = %entry.path, kind = %other, "ignoring tree entry");
                }
            }
        }
    }
    Ok(out)
}

/// Merge `overlay` over `base`: the result contains every path from either
/// set; on collision the overlay's content wins.
pub fn merge_filesets(base: FileSet, overlay: FileSet) -> FileSet {
    let mut merged = base;
    for file in overlay.iter() {
        merged.insert(file.clone());
    }
    merged
}

/// Strip a local relative `extends` reference to the sibling base template
/// from `nuxt.config.ts`. The extension tree is written to layer atop a
/// checkout of the base during development; the merged set must build
/// standalone. Returns true when something was removed.
pub fn strip_base_extends(files: &mut FileSet) -> bool {
    let Some(path) = files.find_by_name("nuxt.config.ts").map(|p| p.to_string()) else {
        return false;
    };
    let Some(file) = files.get_mut(&path) else {
        return false;
    };
    // Both the array form `extends: ['../storefront']` and the single-string
    // form `extends: '../storefront'` appear in the wild.
    let re = regex::Regex::new(
        r#"(?m)^\s*extends:\s*(\[[^\]]*\.\./[^\]]*\]|['"]\.\./[^'"]*['"]),?\s*\r?\n"#,
    )
    .expect("static regex");
    if re.is_match(&file.content) {
        file.content = re.replace_all(&file.content, "").into_owned();
        tracing::debug!(path = %path, "stripped local extends reference from nuxt config");
        true
    } else {
        false
    }
}

/// Resolve a template file set. For [`TemplateKind::Extended`] the base and
/// extension trees are fetched concurrently and merged extension-wins.
pub async fn resolve(
    host: &dyn GitHost,
    source: &TemplateSource,
    git_ref: &str,
    kind: TemplateKind,
) -> Result<Resolved, ResolveError> {
    match kind {
        TemplateKind::Base => {
            let resolved = fetch_tree(host, &source.owner, &source.base_repo, git_ref).await?;
            tracing::info!(
                repo = %source.base_repo,
                files = resolved.files.len(),
                failures = resolved.fetch_failures.len(),
                "resolved base template"
            );
            Ok(resolved)
        }
        TemplateKind::Extended => {
            let (base, ext) = tokio::join!(
                fetch_tree(host, &source.owner, &source.base_repo, git_ref),
                fetch_tree(host, &source.owner, &source.ext_repo, git_ref),
            );
            let base = base?;
            let ext = ext?;
            let fetched = base.fetched + ext.fetched;
            let mut fetch_failures = base.fetch_failures;
            fetch_failures.extend(ext.fetch_failures);
            let mut files = merge_filesets(base.files, ext.files);
            strip_base_extends(&mut files);
            tracing::info!(
                base = %source.base_repo,
                ext = %source.ext_repo,
                files = files.len(),
                failures = fetch_failures.len(),
                "resolved extended template"
            );
            Ok(Resolved {
                files,
                fetched,
                fetch_failures,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(path: &str, content: &str) -> TemplateFile {
        TemplateFile::text(path, content)
    }

    #[test]
    fn merge_is_union_with_extension_winning() {
        let base: FileSet = vec![
            text("a.txt", "base-a"),
            text("b.txt", "base-b"),
            text("c.txt", "base-c"),
        ]
        .into_iter()
        .collect();
        let overlay: FileSet = vec![text("b.txt", "ext-b"), text("d.txt", "ext-d")]
            .into_iter()
            .collect();

        let merged = merge_filesets(base, overlay);
        let paths: Vec<&str> = merged.paths().collect();
        assert_eq!(paths, vec!["a.txt", "b.txt", "c.txt", "d.txt"]);
        assert_eq!(merged.get("b.txt").unwrap().content, "ext-b");
        assert_eq!(merged.get("a.txt").unwrap().content, "base-a");
    }

    #[test]
    fn strip_extends_removes_array_form_only() {
        let mut files: FileSet = vec![text(
            "nuxt.config.ts",
            "export default defineNuxtConfig({\n  extends: ['../storefront'],\n  modules: ['@unocss/nuxt'],\n})\n",
        )]
        .into_iter()
        .collect();

        assert!(strip_base_extends(&mut files));
        let content = &files.get("nuxt.config.ts").unwrap().content;
        assert!(!content.contains("extends"));
        assert!(content.contains("modules: ['@unocss/nuxt']"));
    }

    #[test]
    fn strip_extends_removes_string_form() {
        let mut files: FileSet = vec![text(
            "nuxt.config.ts",
            "export default defineNuxtConfig({\n  extends: '../storefront',\n})\n",
        )]
        .into_iter()
        .collect();
        assert!(strip_base_extends(&mut files));
        assert!(!files.get("nuxt.config.ts").unwrap().content.contains("extends"));
    }

    #[test]
    fn strip_extends_leaves_remote_extends_alone() {
        let src = "export default defineNuxtConfig({\n  extends: ['github:org/layer'],\n})\n";
        let mut files: FileSet = vec![text("nuxt.config.ts", src)].into_iter().collect();
        assert!(!strip_base_extends(&mut files));
        assert_eq!(files.get("nuxt.config.ts").unwrap().content, src);
    }

    #[tokio::test]
    async fn extended_resolve_merges_and_strips_extends() {
        use crate::test_utils::{init_test_logging, InMemoryHost};
        init_test_logging();
        let host = InMemoryHost::new();
        host.add_source_file("storeforge", "tpl-base", "app.vue", b"<template>base</template>");
        host.add_source_file("storeforge", "tpl-base", "uno.config.ts", b"colors: {}");
        host.add_source_file("storeforge", "tpl-base", "public/logo.png", &[0x89, 0x50, 0x4e, 0x47]);
        host.add_source_file(
            "storeforge",
            "tpl-ext",
            "nuxt.config.ts",
            b"export default defineNuxtConfig({\n  extends: ['../tpl-base'],\n})\n",
        );
        host.add_source_file("storeforge", "tpl-ext", "app.vue", b"<template>ext</template>");

        let source = TemplateSource {
            owner: "storeforge".into(),
            base_repo: "tpl-base".into(),
            ext_repo: "tpl-ext".into(),
        };
        let out = resolve(&host, &source, "main", TemplateKind::Extended)
            .await
            .expect("resolve");
        assert_eq!(out.fetched, 5);
        assert!(out.fetch_failures.is_empty());
        // extension wins the collision
        assert_eq!(out.files.get("app.vue").unwrap().content, "<template>ext</template>");
        // binary leaf carried as base64
        assert_eq!(
            out.files.get("public/logo.png").unwrap().encoding,
            crate::FileEncoding::Base64
        );
        assert!(!out
            .files
            .get("nuxt.config.ts")
            .unwrap()
            .content
            .contains("extends"));
    }

    #[tokio::test]
    async fn directory_listed_as_file_is_a_shape_error() {
        use crate::test_utils::{init_test_logging, InMemoryHost};
        init_test_logging();
        let host = InMemoryHost::new();
        host.add_source_file("storeforge", "tpl-base", "app.vue", b"<template/>");
        host.add_source_file("storeforge", "tpl-base", "assets/logo.png", &[0x89, 0x50]);
        host.report_dir_as_file("assets");

        let source = TemplateSource {
            owner: "storeforge".into(),
            base_repo: "tpl-base".into(),
            ext_repo: "tpl-ext".into(),
        };
        let err = resolve(&host, &source, "main", TemplateKind::Base)
            .await
            .expect_err("a misreported directory is fatal, not best-effort");
        match err {
            ResolveError::Shape { expected, path } => {
                assert_eq!(expected, "directory");
                assert_eq!(path, "assets");
            }
            other => panic!("expected Shape error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn failed_leaf_download_is_best_effort() {
        use crate::test_utils::{init_test_logging, InMemoryHost};
        init_test_logging();
        let host = InMemoryHost::new();
        host.add_source_file("storeforge", "tpl-base", "app.vue", b"<template/>");
        host.add_source_file("storeforge", "tpl-base", "pages/index.vue", b"<template/>");
        host.fail_fetch_for("pages/index.vue");

        let source = TemplateSource {
            owner: "storeforge".into(),
            base_repo: "tpl-base".into(),
            ext_repo: "tpl-ext".into(),
        };
        let out = resolve(&host, &source, "main", TemplateKind::Base)
            .await
            .expect("resolve is best-effort for leaves");
        assert_eq!(out.fetched, 1);
        assert_eq!(out.fetch_failures, vec!["pages/index.vue"]);
        assert!(out.files.get("app.vue").is_some());
    }

    #[test]
    fn binary_detection_is_extension_based() {
        assert!(is_binary_path("public/logo.png"));
        assert!(is_binary_path("fonts/Inter.WOFF2"));
        assert!(!is_binary_path("src/app.vue"));
        assert!(!is_binary_path("README"));
    }
}
