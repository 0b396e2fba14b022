//! Document templates with `{{key}}` placeholders

use crate::{Result, TexboxError};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

/// Directory of template files, looked up by plain file name
#[derive(Debug, Clone)]
pub struct TemplateStore {
    dir: PathBuf,
}

impl TemplateStore {
    #[must_use]
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Read a template; `Ok(None)` if it does not exist
    ///
    /// # Errors
    /// Returns `TexboxError::Template` for names that are not a plain file
    /// name, and io errors other than "not found".
    pub async fn load(&self, name: &str) -> Result<Option<String>> {
        validate_name(name)?;

        let path = self.dir.join(name);
        // only regular files; a symlink could point outside the directory
        match tokio::fs::symlink_metadata(&path).await {
            Ok(meta) if meta.file_type().is_file() => {}
            Ok(_) => return Ok(None),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let bytes = tokio::fs::read(&path).await?;
        String::from_utf8(bytes)
            .map(Some)
            .map_err(|_| TexboxError::Template(format!("{name} is not valid UTF-8")))
    }
}

fn validate_name(name: &str) -> Result<()> {
    let valid = !name.is_empty()
        && !name.starts_with('.')
        && name
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-'));

    if valid {
        Ok(())
    } else {
        Err(TexboxError::Template(format!("invalid template name: {name:?}")))
    }
}

/// Replace every `{{key}}` with its patch value
///
/// Strings are inserted as-is, `null` as nothing, anything else as JSON.
/// Placeholders without a patch are left untouched.
#[must_use]
pub fn render(template: &str, patches: &BTreeMap<String, serde_json::Value>) -> String {
    let mut out = template.to_string();
    for (key, value) in patches {
        let placeholder = format!("{{{{{key}}}}}");
        let replacement = match value {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => String::new(),
            other => other.to_string(),
        };
        out = out.replace(&placeholder, &replacement);
    }
    out
}
