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

//! Storefront provisioning service.
//!
//! Fetches a base storefront template plus an "extended" overlay from a
//! source host, merges them, rewrites branding tokens, publishes the result
//! as a single commit to a destination repository and wires up a hosting
//! project for it. The MCP boundary lives in `mcp` and the
//! `storeforge-mcp` binary; everything request-gating lives in `gatekeeper`.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

pub mod branding;
pub mod config;
pub mod deploy;
pub mod gatekeeper;
pub mod github;
pub mod inspect;
pub mod mcp;
pub mod pipeline;
pub mod publisher;
pub mod resolver;
pub mod test_utils;

/// How a fetched file's `content` is stored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileEncoding {
    Text,
    Base64,
}

impl FileEncoding {
    /// Wire name used by the git-data blob API.
    pub fn blob_encoding(self) -> &'static str {
        match self {
            FileEncoding::Text => "utf-8",
            FileEncoding::Base64 => "base64",
        }
    }
}

/// One file inside a [`FileSet`]. `path` is relative, posix-separated and
/// unique within the set.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TemplateFile {
    pub path: String,
    pub content: String,
    pub encoding: FileEncoding,
}

impl TemplateFile {
    pub fn text(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            encoding: FileEncoding::Text,
        }
    }

    pub fn base64(path: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            encoding: FileEncoding::Base64,
        }
    }
}

/// A path-unique snapshot of one directory tree. Iteration is in path order
/// so downstream blob creation is deterministic.
#[derive(Clone, Debug, Default)]
pub struct FileSet {
    files: BTreeMap<String, TemplateFile>,
}

impl FileSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a file; the last write for a given path wins.
    pub fn insert(&mut self, file: TemplateFile) {
        self.files.insert(file.path.clone(), file);
    }

    pub fn get(&self, path: &str) -> Option<&TemplateFile> {
        self.files.get(path)
    }

    pub fn get_mut(&mut self, path: &str) -> Option<&mut TemplateFile> {
        self.files.get_mut(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.files.contains_key(path)
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TemplateFile> {
        self.files.values()
    }

    pub fn paths(&self) -> impl Iterator<Item = &str> {
        self.files.keys().map(|s| s.as_str())
    }

    /// Find a file by exact name, else by `*/name` suffix.
    pub fn find_by_name(&self, name: &str) -> Option<&str> {
        if let Some((p, _)) = self.files.get_key_value(name) {
            return Some(p.as_str());
        }
        let suffix = format!("/{}", name);
        self.files
            .keys()
            .find(|p| p.ends_with(&suffix))
            .map(|p| p.as_str())
    }
}

impl FromIterator<TemplateFile> for FileSet {
    fn from_iter<I: IntoIterator<Item = TemplateFile>>(iter: I) -> Self {
        let mut set = FileSet::new();
        for f in iter {
            set.insert(f);
        }
        set
    }
}

/// Destination repository on the source host. The owner is subject to the
/// gatekeeper allowlist before any mutating operation.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoTarget {
    pub owner: String,
    pub repo: String,
    #[serde(default)]
    pub private: bool,
}

impl RepoTarget {
    pub fn full_name(&self) -> String {
        format!("{}/{}", self.owner, self.repo)
    }
}

/// Branding input for the transformer: token name -> CSS color string, plus
/// an optional logo asset.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BrandingSpec {
    #[serde(default)]
    pub colors: BTreeMap<String, String>,
    #[serde(default)]
    pub logo_svg: Option<String>,
}

impl BrandingSpec {
    pub fn is_empty(&self) -> bool {
        self.colors.is_empty() && self.logo_svg.is_none()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fileset_last_write_wins_and_orders_by_path() {
        let mut set = FileSet::new();
        set.insert(TemplateFile::text("b.txt", "one"));
        set.insert(TemplateFile::text("a.txt", "two"));
        set.insert(TemplateFile::text("b.txt", "three"));

        assert_eq!(set.len(), 2);
        assert_eq!(set.get("b.txt").unwrap().content, "three");
        let paths: Vec<&str> = set.paths().collect();
        assert_eq!(paths, vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn fileset_find_by_name_matches_exact_and_suffix() {
        let mut set = FileSet::new();
        set.insert(TemplateFile::text("apps/shop/uno.config.ts", "x"));
        assert_eq!(
            set.find_by_name("uno.config.ts"),
            Some("apps/shop/uno.config.ts")
        );
        set.insert(TemplateFile::text("uno.config.ts", "y"));
        assert_eq!(set.find_by_name("uno.config.ts"), Some("uno.config.ts"));
        assert_eq!(set.find_by_name("nuxt.config.ts"), None);
    }
}
