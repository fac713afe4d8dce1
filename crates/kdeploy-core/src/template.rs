//! Strict `{{ TOKEN }}` substitution for tenant manifests.
//!
//! A template is parsed once into literal text and placeholder spans. Parsing
//! rejects anything that opens with `{{` but is not a well-formed placeholder,
//! so a typo never slips through as literal YAML. Rendering fails unless every
//! placeholder has a value.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;
use std::sync::OnceLock;

use crate::error::{DeployError, Result};

/// Token name to replacement text.
pub type Substitutions = BTreeMap<String, String>;

static PLACEHOLDER_RE: OnceLock<Regex> = OnceLock::new();

fn placeholder_re() -> &'static Regex {
    PLACEHOLDER_RE.get_or_init(|| Regex::new(r"^\{\{\s*([A-Z][A-Z0-9_]*)\s*\}\}").unwrap())
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Placeholder {
    start: usize,
    end: usize,
    token: String,
}

#[derive(Debug, Clone)]
pub struct Template {
    name: String,
    source: String,
    placeholders: Vec<Placeholder>,
}

impl Template {
    pub fn parse(name: impl Into<String>, source: impl Into<String>) -> Result<Self> {
        let name = name.into();
        let source = source.into();
        let mut placeholders = Vec::new();
        let mut cursor = 0;

        while let Some(found) = source[cursor..].find("{{") {
            let start = cursor + found;
            let rest = &source[start..];
            if let Some(caps) = placeholder_re().captures(rest) {
                let end = start + caps[0].len();
                placeholders.push(Placeholder {
                    start,
                    end,
                    token: caps[1].to_string(),
                });
                cursor = end;
                continue;
            }
            let reason = match rest.find("}}") {
                Some(close) => format!("invalid placeholder '{}'", &rest[..close + 2]),
                None => "unterminated '{{'".to_string(),
            };
            return Err(DeployError::TemplateParse {
                file: name,
                offset: start,
                reason,
            });
        }

        Ok(Self {
            name,
            source,
            placeholders,
        })
    }

    pub fn load(path: &Path) -> Result<Self> {
        let source = std::fs::read_to_string(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self::parse(name, source)
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Distinct tokens referenced by this template, sorted.
    pub fn tokens(&self) -> BTreeSet<&str> {
        self.placeholders.iter().map(|p| p.token.as_str()).collect()
    }

    /// Tokens referenced here that `values` does not supply.
    pub fn missing(&self, values: &Substitutions) -> Vec<String> {
        self.tokens()
            .into_iter()
            .filter(|t| !values.contains_key(*t))
            .map(str::to_string)
            .collect()
    }

    pub fn render(&self, values: &Substitutions) -> Result<String> {
        let missing = self.missing(values);
        if !missing.is_empty() {
            return Err(DeployError::UnresolvedPlaceholders {
                file: self.name.clone(),
                tokens: missing,
            });
        }

        let mut out = String::with_capacity(self.source.len());
        let mut cursor = 0;
        for p in &self.placeholders {
            out.push_str(&self.source[cursor..p.start]);
            // presence checked above
            if let Some(value) = values.get(&p.token) {
                out.push_str(value);
            }
            cursor = p.end;
        }
        out.push_str(&self.source[cursor..]);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn values(pairs: &[(&str, &str)]) -> Substitutions {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn renders_with_and_without_inner_whitespace() {
        let t = Template::parse(
            "ns.yaml",
            "name: {{TENANT_NAMESPACE}}\nlabels:\n  plan: {{ PLAN_VALUE }}\n",
        )
        .unwrap();
        let out = t
            .render(&values(&[("TENANT_NAMESPACE", "tenant-acme"), ("PLAN_VALUE", "pro")]))
            .unwrap();
        assert_eq!(out, "name: tenant-acme\nlabels:\n  plan: pro\n");
    }

    #[test]
    fn enumerates_distinct_tokens() {
        let t = Template::parse("x", "{{ A }} {{ B_2 }} {{ A }}").unwrap();
        assert_eq!(t.tokens().into_iter().collect::<Vec<_>>(), ["A", "B_2"]);
    }

    #[test]
    fn unresolved_placeholder_names_file_and_tokens() {
        let t = Template::parse("quota.yaml", "cpu: {{ REQ_CPU_VALUE }}\npods: {{ MAX_PODS }}").unwrap();
        let err = t.render(&values(&[("REQ_CPU_VALUE", "2")])).unwrap_err();
        match err {
            DeployError::UnresolvedPlaceholders { file, tokens } => {
                assert_eq!(file, "quota.yaml");
                assert_eq!(tokens, ["MAX_PODS"]);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn unterminated_placeholder_is_a_parse_error() {
        let err = Template::parse("bad.yaml", "a: b\nname: {{ TENANT_SLUG\n").unwrap_err();
        assert!(matches!(err, DeployError::TemplateParse { offset: 11, .. }));
    }

    #[test]
    fn malformed_token_is_a_parse_error() {
        let err = Template::parse("bad.yaml", "name: {{ tenant_slug }}").unwrap_err();
        assert!(err.to_string().contains("invalid placeholder '{{ tenant_slug }}'"));
    }

    #[test]
    fn text_without_placeholders_passes_through() {
        let source = "kind: ConfigMap\ndata:\n  json: '{\"a\": {\"b\": 1}}'\n";
        let t = Template::parse("cm.yaml", source).unwrap();
        assert!(t.tokens().is_empty());
        assert_eq!(t.render(&Substitutions::new()).unwrap(), source);
    }

    #[test]
    fn values_are_not_rescanned() {
        let t = Template::parse("x", "{{ A }}").unwrap();
        assert_eq!(t.render(&values(&[("A", "{{ B }}")])).unwrap(), "{{ B }}");
    }
}
