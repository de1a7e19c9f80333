//! Reply templates
//!
//! Templates are plain text files using `$name` / `${name}` placeholders and
//! `$$` for a literal dollar sign.

use regex::{Captures, Regex};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use crate::karma::KarmaError;

static PLACEHOLDER: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\$(?:(?P<escaped>\$)|(?P<named>[_A-Za-z][_A-Za-z0-9]*)|\{(?P<braced>[_A-Za-z][_A-Za-z0-9]*)\}|(?P<invalid>))")
        .expect("PLACEHOLDER is a valid regex pattern")
});

/// Substitute `vars` into `source`. Unknown variables and stray `$` are errors.
pub fn render_template(
    name: &str,
    source: &str,
    vars: &BTreeMap<&str, &str>,
) -> Result<String, KarmaError> {
    let mut out = String::with_capacity(source.len());
    let mut last = 0;

    for caps in PLACEHOLDER.captures_iter(source) {
        let Some(whole) = caps.get(0) else {
            continue;
        };
        out.push_str(&source[last..whole.start()]);
        out.push_str(&substitute(name, &caps, whole.start(), vars)?);
        last = whole.end();
    }

    out.push_str(&source[last..]);
    Ok(out)
}

fn substitute(
    template: &str,
    caps: &Captures<'_>,
    offset: usize,
    vars: &BTreeMap<&str, &str>,
) -> Result<String, KarmaError> {
    if caps.name("escaped").is_some() {
        return Ok("$".to_string());
    }

    let Some(variable) = caps.name("named").or_else(|| caps.name("braced")) else {
        return Err(KarmaError::InvalidPlaceholder {
            template: template.to_string(),
            offset,
        });
    };

    vars.get(variable.as_str())
        .map(|value| value.to_string())
        .ok_or_else(|| KarmaError::MissingVariable {
            template: template.to_string(),
            variable: variable.as_str().to_string(),
        })
}

/// Loads `{dir}/{name}.tpl` on demand
#[derive(Debug, Clone)]
pub struct ReplyTemplates {
    dir: PathBuf,
}

impl ReplyTemplates {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn path_for(&self, name: &str) -> PathBuf {
        self.dir.join(format!("{}.tpl", name))
    }

    pub async fn render(
        &self,
        name: &str,
        vars: &BTreeMap<&str, &str>,
    ) -> Result<String, KarmaError> {
        let path = self.path_for(name);
        let source = tokio::fs::read_to_string(&path)
            .await
            .map_err(|source| KarmaError::TemplateIo { path, source })?;
        render_template(name, &source, vars)
    }
}
