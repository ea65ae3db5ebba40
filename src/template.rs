//! pt-online-schema-change command template.
//!
//! The template is loaded once at startup so a bad file stops the service
//! before it serves anything. Placeholders use the `{{.Name}}` form; only the
//! names in [`PLACEHOLDERS`] are accepted.

use std::fs;
use std::path::{Path, PathBuf};

use crate::{Error, Result};

/// Path used when no override is given.
pub const DEFAULT_TEMPLATE_PATH: &str = "./scripts/pt-online-schema-change.template";

/// Placeholder names a template may reference.
pub const PLACEHOLDERS: &[&str] = &["Schema", "Table", "Alter", "Host", "Port", "User"];

#[derive(Debug, Clone, PartialEq, Eq)]
enum Segment {
    Text(String),
    Field(&'static str),
}

/// A parsed pt-online-schema-change template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PtTemplate {
    source: PathBuf,
    segments: Vec<Segment>,
}

/// Values substituted into a [`PtTemplate`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PtOscArgs {
    pub schema: String,
    pub table: String,
    pub alter: String,
    pub host: String,
    pub port: String,
    pub user: String,
}

impl PtOscArgs {
    fn field(&self, name: &str) -> &str {
        match name {
            "Schema" => &self.schema,
            "Table" => &self.table,
            "Alter" => &self.alter,
            "Host" => &self.host,
            "Port" => &self.port,
            "User" => &self.user,
            _ => "",
        }
    }
}

impl PtTemplate {
    /// Read and parse the template at `path`.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = fs::read_to_string(path).map_err(|e| Error::TemplateLoad {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;

        let segments = Self::parse(&contents).map_err(|reason| Error::TemplateLoad {
            path: path.to_path_buf(),
            reason,
        })?;

        Ok(Self {
            source: path.to_path_buf(),
            segments,
        })
    }

    fn parse(contents: &str) -> std::result::Result<Vec<Segment>, String> {
        if contents.trim().is_empty() {
            return Err("template is empty".to_string());
        }

        let mut segments = Vec::new();
        let mut rest = contents;
        while let Some(open) = rest.find("{{") {
            let (text, tail) = rest.split_at(open);
            if text.contains("}}") {
                return Err("unbalanced '}}'".to_string());
            }
            if !text.is_empty() {
                segments.push(Segment::Text(text.to_string()));
            }

            let tail = &tail[2..];
            let close = tail
                .find("}}")
                .ok_or_else(|| "unterminated '{{'".to_string())?;
            let action = tail[..close].trim();
            if action.contains("{{") {
                return Err("nested '{{'".to_string());
            }
            let name = action
                .strip_prefix('.')
                .ok_or_else(|| format!("unsupported action '{{{{{}}}}}'", action))?;
            let field = PLACEHOLDERS
                .iter()
                .find(|known| **known == name)
                .ok_or_else(|| format!("unknown placeholder '{}'", name))?;
            segments.push(Segment::Field(field));

            rest = &tail[close + 2..];
        }

        if rest.contains("}}") {
            return Err("unbalanced '}}'".to_string());
        }
        if !rest.is_empty() {
            segments.push(Segment::Text(rest.to_string()));
        }
        Ok(segments)
    }

    /// File the template was loaded from.
    pub fn source(&self) -> &Path {
        &self.source
    }

    /// Placeholders referenced by the template, with how often each appears.
    #[cfg(test)]
    fn fields(&self) -> std::collections::HashMap<&'static str, usize> {
        let mut counts = std::collections::HashMap::new();
        for segment in &self.segments {
            if let Segment::Field(name) = segment {
                *counts.entry(*name).or_insert(0) += 1;
            }
        }
        counts
    }

    /// Substitute every placeholder.
    pub fn render(&self, args: &PtOscArgs) -> String {
        let mut out = String::new();
        for segment in &self.segments {
            match segment {
                Segment::Text(text) => out.push_str(text),
                Segment::Field(name) => out.push_str(args.field(name)),
            }
        }
        out.trim_end().to_string()
    }
}
