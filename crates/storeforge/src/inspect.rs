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

//! Read-only inspection helpers over a resolved file set: package and
//! README summaries, Nuxt module scan, UnoCSS theme token extraction.
//! Stateless regex scans, composed by the plan/describe tools.

use regex::Regex;
use serde::Serialize;

use crate::branding::THEME_FILE;
use crate::FileSet;

#[derive(Clone, Debug, Serialize)]
pub struct TreeSummary {
    pub files: usize,
    pub top_level: Vec<String>,
}

/// Top-level names (file or first path segment) plus total file count.
pub fn tree_summary(files: &FileSet) -> TreeSummary {
    let mut top: Vec<String> = Vec::new();
    for path in files.paths() {
        let head = path.split('/').next().unwrap_or(path).to_string();
        if !top.contains(&head) {
            top.push(head);
        }
    }
    TreeSummary {
        files: files.len(),
        top_level: top,
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct PackageSummary {
    pub name: Option<String>,
    pub scripts: Vec<String>,
}

/// Name and script names from `package.json`, when present and parseable.
pub fn package_summary(files: &FileSet) -> Option<PackageSummary> {
    let path = files.find_by_name("package.json")?;
    let content = &files.get(path)?.content;
    let v: serde_json::Value = serde_json::from_str(content).ok()?;
    let name = v.get("name").and_then(|x| x.as_str()).map(|s| s.to_string());
    let scripts = v
        .get("scripts")
        .and_then(|s| s.as_object())
        .map(|m| m.keys().cloned().collect())
        .unwrap_or_default();
    Some(PackageSummary { name, scripts })
}

/// First markdown heading of the README, when one exists.
pub fn readme_title(files: &FileSet) -> Option<String> {
    let path = files
        .find_by_name("README.md")
        .or_else(|| files.find_by_name("readme.md"))?;
    let content = &files.get(path)?.content;
    content
        .lines()
        .find_map(|l| l.strip_prefix('#').map(|rest| rest.trim_start_matches('#').trim().to_string()))
        .filter(|t| !t.is_empty())
}

/// Module ids referenced by the `modules: [...]` array of `nuxt.config.ts`.
pub fn nuxt_modules(files: &FileSet) -> Vec<String> {
    let Some(path) = files.find_by_name("nuxt.config.ts") else {
        return Vec::new();
    };
    let Some(file) = files.get(path) else {
        return Vec::new();
    };
    let block = Regex::new(r"modules\s*:\s*\[([^\]]*)\]").expect("static regex");
    let item = Regex::new(r#"['"]([^'"]+)['"]"#).expect("static regex");
    let Some(caps) = block.captures(&file.content) else {
        return Vec::new();
    };
    item.captures_iter(&caps[1])
        .map(|c| c[1].to_string())
        .collect()
}

/// Color token names declared in the theme file's `colors` block. Both flat
/// assignments and nested objects count; the `DEFAULT` shade key does not.
pub fn theme_tokens(files: &FileSet) -> Vec<String> {
    let Some(path) = files.find_by_name(THEME_FILE) else {
        return Vec::new();
    };
    let Some(file) = files.get(path) else {
        return Vec::new();
    };
    let content = &file.content;
    let Some(start) = content.find("colors") else {
        return Vec::new();
    };
    // Take the brace-balanced block following `colors:`.
    let rest = &content[start..];
    let Some(open) = rest.find('{') else {
        return Vec::new();
    };
    let mut depth = 0usize;
    let mut end = open;
    for (i, ch) in rest[open..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    end = open + i;
                    break;
                }
            }
            _ => {}
        }
    }
    let block = &rest[open..=end];
    let key = Regex::new(r"(?m)^\s*([A-Za-z][A-Za-z0-9_-]*)\s*:").expect("static regex");
    key.captures_iter(block)
        .map(|c| c[1].to_string())
        .filter(|k| k != "DEFAULT")
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TemplateFile;

    fn set(files: &[(&str, &str)]) -> FileSet {
        files
            .iter()
            .map(|(p, c)| TemplateFile::text(*p, *c))
            .collect()
    }

    #[test]
    fn package_summary_reads_name_and_scripts() {
        let files = set(&[(
            "package.json",
            r#"{"name":"storefront","scripts":{"dev":"nuxt dev","build":"nuxt build"}}"#,
        )]);
        let s = package_summary(&files).expect("summary");
        assert_eq!(s.name.as_deref(), Some("storefront"));
        assert_eq!(s.scripts, vec!["build", "dev"]);
    }

    #[test]
    fn readme_title_is_first_heading() {
        let files = set(&[("README.md", "intro\n\n## Storefront Template\nbody\n")]);
        assert_eq!(readme_title(&files).as_deref(), Some("Storefront Template"));
        assert_eq!(readme_title(&set(&[("README.md", "no heading")])), None);
    }

    #[test]
    fn nuxt_modules_are_extracted() {
        let files = set(&[(
            "nuxt.config.ts",
            "export default defineNuxtConfig({\n  modules: ['@unocss/nuxt', '@pinia/nuxt'],\n})\n",
        )]);
        assert_eq!(nuxt_modules(&files), vec!["@unocss/nuxt", "@pinia/nuxt"]);
    }

    #[test]
    fn theme_tokens_skip_shade_keys() {
        let files = set(&[(
            "uno.config.ts",
            "export default defineConfig({\n  theme: {\n    colors: {\n      primary: { DEFAULT: '#111', dark: '#000' },\n      accent: '#f59e0b',\n    },\n  },\n})\n",
        )]);
        let tokens = theme_tokens(&files);
        assert!(tokens.contains(&"primary".to_string()));
        assert!(tokens.contains(&"accent".to_string()));
        assert!(!tokens.contains(&"DEFAULT".to_string()));
    }

    #[test]
    fn tree_summary_groups_top_level() {
        let files = set(&[
            ("package.json", "{}"),
            ("src/app.vue", ""),
            ("src/pages/index.vue", ""),
        ]);
        let s = tree_summary(&files);
        assert_eq!(s.files, 3);
        assert_eq!(s.top_level, vec!["package.json", "src"]);
    }
}
