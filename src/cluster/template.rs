use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, bail};
use indexmap::IndexMap;
use itertools::Itertools;
use once_cell::sync::Lazy;
use regex::Regex;
use tempfile::NamedTempFile;

use crate::app;

/// Ordered parameter map substituted into a manifest template.
pub type TemplateParams = IndexMap<String, String>;

/// Build a parameter map from `("KEY", value)` pairs.
pub fn params<const N: usize>(pairs: [(&str, &str); N]) -> TemplateParams {
    pairs
        .into_iter()
        .map(|(key, value)| (key.to_string(), value.to_string()))
        .collect()
}

static PLACEHOLDER: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\$\{([A-Z][A-Z0-9_]*)\}").expect("placeholder regex"));

/// A YAML manifest with `${NAME}`-style placeholders.
pub struct Template {
    path: PathBuf,
    source: String,
}

impl Template {
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        let source = fs::read_to_string(&path)
            .with_context(|| format!("failed to read template {}", path.display()))?;
        Ok(Self { path, source })
    }

    /// Load a template from the configured fixtures directory,
    /// e.g. `Template::fixture("networking/egressip-config2.yaml")`.
    pub fn fixture(name: &str) -> Result<Self> {
        Self::load(app::fixtures().join(name))
    }

    /// Substitute parameters into the template.
    ///
    /// Every placeholder must be supplied or rendering fails listing the
    /// missing keys; parameters without a matching placeholder are ignored,
    /// so one parameter set can serve several template variants.
    pub fn render(&self, params: &TemplateParams) -> Result<String> {
        let mut missing = Vec::new();
        let rendered = PLACEHOLDER.replace_all(&self.source, |caps: &regex::Captures<'_>| {
            let key = &caps[1];
            match params.get(key) {
                Some(value) => value.clone(),
                None => {
                    missing.push(key.to_string());
                    String::new()
                }
            }
        });

        if !missing.is_empty() {
            bail!(
                "template {} has unset parameters: {}",
                self.path.display(),
                missing.iter().unique().sorted().join(", ")
            );
        }

        Ok(rendered.into_owned())
    }

    /// Render to a temp file suitable for `oc apply -f`, validating that
    /// the rendered text is well-formed YAML before it ever reaches the
    /// cluster.
    pub fn render_to_file(&self, params: &TemplateParams) -> Result<NamedTempFile> {
        let rendered = self.render(params)?;
        serde_yaml::from_str::<serde_yaml::Value>(&rendered).with_context(|| {
            format!("rendered template {} is not valid YAML", self.path.display())
        })?;

        let mut file = tempfile::Builder::new()
            .prefix("e2edev-")
            .suffix(".yaml")
            .tempfile()
            .context("failed to create rendered manifest file")?;
        file.write_all(rendered.as_bytes())
            .context("failed to write rendered manifest")?;
        Ok(file)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn template(source: &str) -> Template {
        Template {
            path: PathBuf::from("test.yaml"),
            source: source.to_string(),
        }
    }

    #[test]
    fn renders_all_placeholders() {
        let template = template("name: ${NAME}\nnamespace: ${NAMESPACE}\n");
        let rendered = template
            .render(&params([("NAME", "pod-1"), ("NAMESPACE", "e2e-x")]))
            .unwrap();
        assert_eq!(rendered, "name: pod-1\nnamespace: e2e-x\n");
    }

    #[test]
    fn missing_parameter_fails_loudly() {
        let template = template("name: ${NAME}\nip: ${EGRESSIP1}\nagain: ${EGRESSIP1}\n");
        let error = template.render(&params([("NAME", "x")])).unwrap_err();
        let message = error.to_string();
        assert!(message.contains("EGRESSIP1"), "message: {message}");
        // deduplicated
        assert_eq!(message.matches("EGRESSIP1").count(), 1);
    }

    #[test]
    fn unknown_parameters_are_ignored() {
        let template = template("name: ${NAME}\n");
        let rendered = template
            .render(&params([("NAME", "x"), ("NODENAME", "unused")]))
            .unwrap();
        assert_eq!(rendered, "name: x\n");
    }

    #[test]
    fn lowercase_dollar_braces_are_not_placeholders() {
        let template = template("cmd: echo ${lowercase} $HOME\n");
        let rendered = template.render(&params([])).unwrap();
        assert_eq!(rendered, "cmd: echo ${lowercase} $HOME\n");
    }
}
