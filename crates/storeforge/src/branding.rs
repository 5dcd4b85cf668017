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

//! Branding transformer: rewrites theme color tokens and the logo asset
//! inside a resolved file set. Deliberately textual — the theme config is a
//! source file and everything outside the touched assignments must survive
//! byte-for-byte. Cannot fail; degraded cases surface as warnings.

use std::collections::BTreeSet;

use regex::Regex;

use crate::{BrandingSpec, FileSet, TemplateFile};

/// Conventional path of the logo asset inside the storefront template.
pub const LOGO_PATH: &str = "public/logo.svg";

/// Theme configuration file the color tokens live in.
pub const THEME_FILE: &str = "uno.config.ts";

#[derive(Debug, Default)]
pub struct BrandingOutcome {
    pub modified_paths: BTreeSet<String>,
    pub warnings: Vec<String>,
}

/// Rewrite one token's bound value inside the theme source. The flat
/// `token: "value"` form is tried first; only when absent is the nested
/// `token: { DEFAULT: "value", ... }` form rewritten. Returns the new
/// content when a substitution happened.
fn rewrite_token(content: &str, token: &str, value: &str) -> Option<String> {
    let escaped = regex::escape(token);

    let flat = Regex::new(&format!(r#"(\b{escaped}\s*:\s*)(['"])[^'"]*(['"])"#))
        .expect("static-shaped regex");
    if flat.is_match(content) {
        let replaced = flat
            .replacen(content, 1, |caps: &regex::Captures| {
                format!("{}{}{}{}", &caps[1], &caps[2], value, &caps[3])
            })
            .into_owned();
        return Some(replaced);
    }

    let nested = Regex::new(&format!(
        r#"(\b{escaped}\s*:\s*\{{\s*DEFAULT\s*:\s*)(['"])[^'"]*(['"])"#
    ))
    .expect("static-shaped regex");
    if nested.is_match(content) {
        let replaced = nested
            .replacen(content, 1, |caps: &regex::Captures| {
                format!("{}{}{}{}", &caps[1], &caps[2], value, &caps[3])
            })
            .into_owned();
        return Some(replaced);
    }

    None
}

/// Apply a branding spec to a file set in place. Pure, no external calls.
pub fn apply(files: &mut FileSet, spec: &BrandingSpec) -> BrandingOutcome {
    let mut outcome = BrandingOutcome::default();

    if !spec.colors.is_empty() {
        match files.find_by_name(THEME_FILE).map(|p| p.to_string()) {
            Some(theme_path) => {
                let mut matched_any = false;
                for (token, value) in &spec.colors {
                    let file = files.get_mut(&theme_path).expect("theme path resolved");
                    match rewrite_token(&file.content, token, value) {
                        Some(next) => {
                            if next != file.content {
                                file.content = next;
                                outcome.modified_paths.insert(theme_path.clone());
                            }
                            matched_any = true;
                        }
                        None => {
                            // unmatched token is a no-op, not an error
                            tracing::debug!(token = %token, "branding token not present in theme file");
                        }
                    }
                }
                if !matched_any {
                    outcome.warnings.push(format!(
                        "none of the requested color tokens matched anything in {}",
                        theme_path
                    ));
                }
            }
            None => {
                outcome
                    .warnings
                    .push(format!("theme file {} not found in template", THEME_FILE));
            }
        }
    }

    if let Some(logo) = &spec.logo_svg {
        match files.get_mut(LOGO_PATH) {
            Some(existing) => {
                existing.content = logo.clone();
                existing.encoding = crate::FileEncoding::Text;
            }
            None => files.insert(TemplateFile::text(LOGO_PATH, logo.clone())),
        }
        outcome.modified_paths.insert(LOGO_PATH.to_string());
    }

    outcome
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::BTreeMap;

    const THEME: &str = r#"import { defineConfig } from 'unocss'

export default defineConfig({
  theme: {
    colors: {
      primary: {
        DEFAULT: '#0ea5e9',
        dark: '#0369a1',
      },
      accent: '#f59e0b',
      muted: '#64748b',
    },
  },
})
"#;

    fn theme_set() -> FileSet {
        vec![TemplateFile::text(THEME_FILE, THEME)]
            .into_iter()
            .collect()
    }

    fn colors(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn flat_token_is_rewritten_in_place() {
        let mut files = theme_set();
        let spec = BrandingSpec {
            colors: colors(&[("accent", "#ff0000")]),
            logo_svg: None,
        };
        let out = apply(&mut files, &spec);
        assert!(out.warnings.is_empty());
        assert_eq!(out.modified_paths.len(), 1);
        let content = &files.get(THEME_FILE).unwrap().content;
        assert!(content.contains("accent: '#ff0000'"));
        // untouched structure survives byte-for-byte
        assert!(content.contains("DEFAULT: '#0ea5e9'"));
        assert!(content.contains("dark: '#0369a1'"));
    }

    #[test]
    fn nested_default_is_fallback_when_flat_absent() {
        let mut files = theme_set();
        let spec = BrandingSpec {
            colors: colors(&[("primary", "#123456")]),
            logo_svg: None,
        };
        let out = apply(&mut files, &spec);
        assert!(out.warnings.is_empty());
        let content = &files.get(THEME_FILE).unwrap().content;
        assert!(content.contains("DEFAULT: '#123456'"));
        // only the DEFAULT binding changes, not the dark shade
        assert!(content.contains("dark: '#0369a1'"));
    }

    #[test]
    fn absent_token_warns_without_touching_anything() {
        let mut files = theme_set();
        let before = files.get(THEME_FILE).unwrap().content.clone();
        let spec = BrandingSpec {
            colors: colors(&[("nonexistent", "#000000")]),
            logo_svg: None,
        };
        let out = apply(&mut files, &spec);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.modified_paths.is_empty());
        assert_eq!(files.get(THEME_FILE).unwrap().content, before);
        assert_eq!(files.len(), 1);
    }

    #[test]
    fn mixed_tokens_do_not_warn_when_some_match() {
        let mut files = theme_set();
        let spec = BrandingSpec {
            colors: colors(&[("accent", "#111111"), ("nonexistent", "#222222")]),
            logo_svg: None,
        };
        let out = apply(&mut files, &spec);
        assert!(out.warnings.is_empty());
        assert!(files
            .get(THEME_FILE)
            .unwrap()
            .content
            .contains("accent: '#111111'"));
    }

    #[test]
    fn missing_theme_file_is_a_warning() {
        let mut files: FileSet = vec![TemplateFile::text("app.vue", "<template/>")]
            .into_iter()
            .collect();
        let spec = BrandingSpec {
            colors: colors(&[("accent", "#111111")]),
            logo_svg: None,
        };
        let out = apply(&mut files, &spec);
        assert_eq!(out.warnings.len(), 1);
        assert!(out.modified_paths.is_empty());
    }

    #[test]
    fn empty_spec_is_a_clean_no_op() {
        let mut files = theme_set();
        let out = apply(&mut files, &BrandingSpec::default());
        assert!(out.modified_paths.is_empty());
        assert!(out.warnings.is_empty());
    }

    #[test]
    fn logo_overwrites_existing_or_appends() {
        let mut files = theme_set();
        files.insert(TemplateFile::text(LOGO_PATH, "<svg>old</svg>"));
        let spec = BrandingSpec {
            colors: BTreeMap::new(),
            logo_svg: Some("<svg>new</svg>".into()),
        };
        let out = apply(&mut files, &spec);
        assert!(out.modified_paths.contains(LOGO_PATH));
        assert_eq!(files.get(LOGO_PATH).unwrap().content, "<svg>new</svg>");

        let mut bare = theme_set();
        let out2 = apply(&mut bare, &spec);
        assert!(out2.modified_paths.contains(LOGO_PATH));
        assert_eq!(bare.get(LOGO_PATH).unwrap().content, "<svg>new</svg>");
        assert_eq!(bare.len(), 2);
    }

    #[test]
    fn theme_file_is_found_by_suffix() {
        let mut files: FileSet = vec![TemplateFile::text("apps/shop/uno.config.ts", THEME)]
            .into_iter()
            .collect();
        let spec = BrandingSpec {
            colors: colors(&[("muted", "#999999")]),
            logo_svg: None,
        };
        let out = apply(&mut files, &spec);
        assert!(out.warnings.is_empty());
        assert!(out.modified_paths.contains("apps/shop/uno.config.ts"));
    }
}
