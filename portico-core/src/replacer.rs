//! Placeholder substitution.
//!
//! A [`Replacer`] holds static key/value entries (regexp captures, error
//! facts, user vars) plus a stack of provider callbacks consulted in order.
//! Callers that can answer request-scoped keys lazily pass a fallback
//! closure to [`Replacer::replace_with`], which is how the HTTP variable
//! namespace is resolved without the replacer borrowing the request.

use std::collections::HashMap;
use std::sync::Arc;

/// A provider answers `key → Some(value)` for the namespace it owns.
pub type Provider = Arc<dyn Fn(&str) -> Option<String> + Send + Sync>;

#[derive(Clone, Default)]
pub struct Replacer {
    statics: HashMap<String, String>,
    providers: Vec<Provider>,
}

impl Replacer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a static entry, overriding providers for this key.
    pub fn set(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.statics.insert(key.into(), value.into());
    }

    pub fn push_provider(&mut self, provider: Provider) {
        self.providers.push(provider);
    }

    /// Look a key up through statics, then providers in push order.
    pub fn get(&self, key: &str) -> Option<String> {
        if let Some(v) = self.statics.get(key) {
            return Some(v.clone());
        }
        self.providers.iter().find_map(|p| p(key))
    }

    /// Substitute every `{name}` placeholder in `input`. Unknown keys are
    /// replaced with `empty`.
    pub fn replace_all(&self, input: &str, empty: &str) -> String {
        self.replace_with(input, empty, |_| None)
    }

    /// Like [`Self::replace_all`], but consults `fallback` for keys the
    /// replacer itself cannot answer.
    pub fn replace_with(
        &self,
        input: &str,
        empty: &str,
        fallback: impl Fn(&str) -> Option<String>,
    ) -> String {
        if !input.contains('{') {
            return input.to_string();
        }
        let mut out = String::with_capacity(input.len());
        let mut rest = input;
        while let Some(open) = rest.find('{') {
            out.push_str(&rest[..open]);
            let after = &rest[open + 1..];
            match after.find('}') {
                Some(close) => {
                    let key = &after[..close];
                    match self.get(key).or_else(|| fallback(key)) {
                        Some(value) => out.push_str(&value),
                        None => out.push_str(empty),
                    }
                    rest = &after[close + 1..];
                }
                None => {
                    // unterminated brace, keep literally
                    out.push_str(&rest[open..]);
                    return out;
                }
            }
        }
        out.push_str(rest);
        out
    }
}

impl std::fmt::Debug for Replacer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Replacer")
            .field("statics", &self.statics)
            .field("providers", &self.providers.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn statics_and_unknowns() {
        let mut r = Replacer::new();
        r.set("name", "world");
        assert_eq!(r.replace_all("hello {name}!", ""), "hello world!");
        assert_eq!(r.replace_all("hello {missing}!", ""), "hello !");
        assert_eq!(r.replace_all("hello {missing}!", "-"), "hello -!");
        assert_eq!(r.replace_all("no placeholders", ""), "no placeholders");
    }

    #[test]
    fn providers_consulted_in_order() {
        let mut r = Replacer::new();
        r.push_provider(Arc::new(|key| {
            (key == "a").then(|| "first".to_string())
        }));
        r.push_provider(Arc::new(|key| {
            (key == "a" || key == "b").then(|| "second".to_string())
        }));
        assert_eq!(r.replace_all("{a} {b}", ""), "first second");
    }

    #[test]
    fn statics_override_providers() {
        let mut r = Replacer::new();
        r.push_provider(Arc::new(|_| Some("provided".to_string())));
        r.set("k", "static");
        assert_eq!(r.replace_all("{k}", ""), "static");
    }

    #[test]
    fn fallback_answers_last() {
        let r = Replacer::new();
        let out = r.replace_with("{http.request.method}", "", |key| {
            (key == "http.request.method").then(|| "GET".to_string())
        });
        assert_eq!(out, "GET");
    }

    #[test]
    fn unterminated_brace_is_literal() {
        let r = Replacer::new();
        assert_eq!(r.replace_all("open {brace", ""), "open {brace");
    }
}
