//! Loads, validates, and renders the LLM prompt templates used by the
//! assembler. Process-lifetime state: reads take a shared lock (cheap,
//! effectively lock-free under read concurrency), `reload` takes the
//! exclusive lock the same way `Config` is reloaded from disk.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use serde::Deserialize;

use crate::error::AnalysisError;

/// Minimal fallback used only when a caller explicitly opts in to surviving
/// a template failure — never invoked automatically by this module.
pub const FALLBACK_PROMPT: &str = "Analyze N-1 vs N for the provided PEGs.";

#[derive(Debug, Clone, Deserialize)]
struct TemplateVariable {
    #[allow(dead_code)]
    name: String,
    #[serde(rename = "type")]
    #[allow(dead_code)]
    var_type: String,
}

#[derive(Debug, Clone, Deserialize)]
struct TemplateMetadata {
    #[allow(dead_code)]
    version: String,
    #[allow(dead_code)]
    description: String,
    #[allow(dead_code)]
    format_type: String,
    #[allow(dead_code)]
    variables: Vec<TemplateVariable>,
}

#[derive(Debug, Clone, Deserialize)]
struct TemplateDocument {
    #[allow(dead_code)]
    metadata: TemplateMetadata,
    prompts: BTreeMap<String, String>,
}

impl TemplateDocument {
    fn validate(&self) -> Result<(), AnalysisError> {
        if self.prompts.is_empty() {
            return Err(AnalysisError::TemplateLoad("prompts map is empty".to_string()));
        }
        if self.prompts.values().any(|v| v.trim().is_empty()) {
            return Err(AnalysisError::TemplateLoad("a prompt template is empty".to_string()));
        }
        Ok(())
    }
}

pub struct PromptTemplateStore {
    path: PathBuf,
    doc: RwLock<Option<Arc<TemplateDocument>>>,
}

impl PromptTemplateStore {
    /// Loads `path` eagerly. Returns a loader error if no document could be
    /// loaded at all (there is nothing to keep as "previous" on first load).
    pub fn load(path: impl AsRef<Path>) -> Result<Self, AnalysisError> {
        let path = path.as_ref().to_path_buf();
        let doc = Self::read_document(&path)?;
        Ok(Self { path, doc: RwLock::new(Some(Arc::new(doc))) })
    }

    fn read_document(path: &Path) -> Result<TemplateDocument, AnalysisError> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| AnalysisError::TemplateLoad(format!("reading {}: {e}", path.display())))?;
        let doc: TemplateDocument = toml::from_str(&content)
            .map_err(|e| AnalysisError::TemplateLoad(format!("parsing {}: {e}", path.display())))?;
        doc.validate()?;
        Ok(doc)
    }

    /// The set of prompt types currently loaded.
    pub fn available(&self) -> Vec<String> {
        let guard = self.doc.read().expect("prompt template lock poisoned");
        guard
            .as_ref()
            .map(|d| d.prompts.keys().cloned().collect())
            .unwrap_or_default()
    }

    /// Re-reads the template file from disk. On failure, the previously
    /// loaded document (if any) is kept and the error is returned.
    pub fn reload(&self) -> Result<(), AnalysisError> {
        let doc = Self::read_document(&self.path)?;
        let mut guard = self.doc.write().expect("prompt template lock poisoned");
        *guard = Some(Arc::new(doc));
        Ok(())
    }

    /// Renders `prompt_type` against `vars`, substituting `{name}`
    /// placeholders (`{{`/`}}` escape a literal brace, as in `format!`). A
    /// missing placeholder is a hard error — callers that want to degrade
    /// gracefully must catch it and use `FALLBACK_PROMPT` themselves; this
    /// function never substitutes it automatically.
    pub fn render(&self, prompt_type: &str, vars: &HashMap<String, String>) -> Result<String, AnalysisError> {
        let guard = self.doc.read().expect("prompt template lock poisoned");
        let doc = guard
            .as_ref()
            .ok_or_else(|| AnalysisError::TemplateLoad("no template document loaded".to_string()))?;
        let template = doc
            .prompts
            .get(prompt_type)
            .ok_or_else(|| AnalysisError::TemplateLoad(format!("unknown prompt type '{prompt_type}'")))?;
        render_placeholders(template, vars)
    }
}

fn render_placeholders(template: &str, vars: &HashMap<String, String>) -> Result<String, AnalysisError> {
    let mut out = String::with_capacity(template.len());
    let mut chars = template.char_indices().peekable();
    while let Some((_, c)) = chars.next() {
        if c == '{' && chars.peek().map(|&(_, c2)| c2) == Some('{') {
            chars.next();
            out.push('{');
            continue;
        }
        if c == '}' && chars.peek().map(|&(_, c2)| c2) == Some('}') {
            chars.next();
            out.push('}');
            continue;
        }
        if c != '{' {
            out.push(c);
            continue;
        }
        let mut name = String::new();
        let mut closed = false;
        for (_, c2) in chars.by_ref() {
            if c2 == '}' {
                closed = true;
                break;
            }
            name.push(c2);
        }
        if !closed {
            return Err(AnalysisError::TemplateVarMissing(name));
        }
        match vars.get(&name) {
            Some(value) => out.push_str(value),
            None => return Err(AnalysisError::TemplateVarMissing(name)),
        }
    }
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_temp(contents: &str) -> tempfile_shim::TempFile {
        tempfile_shim::TempFile::new(contents)
    }

    /// Tiny local stand-in for a temp-file helper so this module's tests
    /// don't need an extra dev-dependency just to write one scratch file.
    mod tempfile_shim {
        use super::*;

        pub struct TempFile {
            pub path: std::path::PathBuf,
        }

        impl TempFile {
            pub fn new(contents: &str) -> Self {
                let mut path = std::env::temp_dir();
                path.push(format!("peg_analysis_test_{}.toml", uuid::Uuid::new_v4()));
                let mut f = std::fs::File::create(&path).unwrap();
                f.write_all(contents.as_bytes()).unwrap();
                Self { path }
            }
        }

        impl Drop for TempFile {
            fn drop(&mut self) {
                let _ = std::fs::remove_file(&self.path);
            }
        }
    }

    const DOC: &str = r#"
[metadata]
version = "1"
description = "test"
format_type = "text"
variables = []

[prompts]
overall = "Summarize {peg_name} for {window}"
enhanced = "Detailed analysis of {peg_name}"
"#;

    #[test]
    fn render_substitutes_placeholders() {
        let file = write_temp(DOC);
        let store = PromptTemplateStore::load(&file.path).unwrap();
        let mut vars = HashMap::new();
        vars.insert("peg_name".to_string(), "RRC_Success".to_string());
        vars.insert("window".to_string(), "N".to_string());
        let rendered = store.render("overall", &vars).unwrap();
        assert_eq!(rendered, "Summarize RRC_Success for N");
    }

    #[test]
    fn double_braces_escape_a_literal_brace() {
        let rendered = render_placeholders("{{\"summary\": \"{peg_name}\"}}", &HashMap::from([
            ("peg_name".to_string(), "A".to_string()),
        ]))
        .unwrap();
        assert_eq!(rendered, "{\"summary\": \"A\"}");
    }

    #[test]
    fn missing_placeholder_errors() {
        let file = write_temp(DOC);
        let store = PromptTemplateStore::load(&file.path).unwrap();
        let vars = HashMap::new();
        let err = store.render("overall", &vars).unwrap_err();
        assert!(matches!(err, AnalysisError::TemplateVarMissing(_)));
    }

    #[test]
    fn reload_keeps_previous_on_failure() {
        let file = write_temp(DOC);
        let store = PromptTemplateStore::load(&file.path).unwrap();
        std::fs::write(&file.path, "not valid toml {{{").unwrap();
        assert!(store.reload().is_err());
        // Previous document (valid) is still usable.
        let vars = HashMap::from([
            ("peg_name".to_string(), "X".to_string()),
            ("window".to_string(), "N".to_string()),
        ]);
        assert!(store.render("overall", &vars).is_ok());
    }

    #[test]
    fn empty_prompts_map_fails_to_load() {
        let file = write_temp(
            r#"
[metadata]
version = "1"
description = "test"
format_type = "text"
variables = []

[prompts]
"#,
        );
        assert!(PromptTemplateStore::load(&file.path).is_err());
    }
}
