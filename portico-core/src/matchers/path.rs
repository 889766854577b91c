//! Path matcher.

use std::any::Any;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::context::RequestCtx;
use crate::error::Result;
use crate::module::Registry;

use super::RequestMatcher;

/// Case-folded path matching with four wildcard forms: suffix (`*x`),
/// prefix (`x*`), substring (`*x*`), and segment globs (`/x/*/y`, where
/// `*` does not cross `/`). A lone `*` matches every path.
///
/// Trailing dots and spaces are stripped from the request path before
/// matching; some file systems ignore them, so `/index.php . .` must not
/// slip past a `*.php` rule.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MatchPath {
    patterns: Vec<String>,
}

impl MatchPath {
    pub fn new(patterns: Vec<String>) -> Self {
        Self { patterns }
    }

    pub fn provision(&mut self) -> Result<()> {
        for p in &mut self.patterns {
            *p = p.to_ascii_lowercase();
        }
        Ok(())
    }

    fn pattern_matches(pattern: &str, path: &str) -> bool {
        if pattern == "*" {
            return true;
        }
        let starts = pattern.starts_with('*');
        let ends = pattern.ends_with('*');
        let inner_star = pattern[1..pattern.len().saturating_sub(1)].contains('*');
        if !inner_star {
            if starts && ends && pattern.len() > 1 {
                return path.contains(&pattern[1..pattern.len() - 1]);
            }
            if ends {
                return path.starts_with(&pattern[..pattern.len() - 1]);
            }
            if starts {
                return path.ends_with(&pattern[1..]);
            }
            return path == pattern;
        }
        glob_match(pattern.as_bytes(), path.as_bytes())
    }
}

/// Glob over a path: `*` matches any run of non-separator characters.
fn glob_match(pattern: &[u8], s: &[u8]) -> bool {
    let (mut pi, mut si) = (0usize, 0usize);
    let mut star: Option<usize> = None;
    let mut mark = 0usize;
    while si < s.len() {
        if pi < pattern.len() && pattern[pi] == b'*' {
            star = Some(pi);
            mark = si;
            pi += 1;
        } else if pi < pattern.len() && pattern[pi] == s[si] {
            pi += 1;
            si += 1;
        } else if let Some(sp) = star {
            if s[mark] == b'/' {
                return false;
            }
            pi = sp + 1;
            mark += 1;
            si = mark;
        } else {
            return false;
        }
    }
    while pi < pattern.len() && pattern[pi] == b'*' {
        pi += 1;
    }
    pi == pattern.len()
}

impl RequestMatcher for MatchPath {
    fn is_match(&self, r: &mut RequestCtx) -> bool {
        let path = r.parts.uri.path().to_ascii_lowercase();
        let path = path.trim_end_matches(['.', ' ']);
        self.patterns.iter().any(|pattern| {
            if pattern.contains('{') {
                Self::pattern_matches(&r.replace_all(pattern, ""), path)
            } else {
                Self::pattern_matches(pattern, path)
            }
        })
    }

    fn as_any(&self) -> &dyn Any {
        self
    }
}

pub(crate) fn ctor(
    config: serde_json::Value,
    _registry: &Registry,
) -> Result<Arc<dyn RequestMatcher>> {
    let mut m: MatchPath = super::decode("path", config)?;
    m.provision()?;
    Ok(Arc::new(m))
}
