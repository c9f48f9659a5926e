//! Documentation and front matter handling for bundle files.

use std::sync::LazyLock;

use pulldown_cmark::{html, Options, Parser};
use regex::Regex;

use tether_script::ast::{Block, StmtKind};

static MARKDOWN_FRONT_MATTER: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\n.*?\n---\n").unwrap());
static MARKDOWN_YAML: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?s)\A---\s*\n(.*?)\n---").unwrap());
static PYTHON_YAML: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r#"(?s)\A"""(.*?)""""#).unwrap());
static BREAKS: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(?i)<br\s*/?>|</(p|div|h[1-6]|li|tr)>").unwrap());
static TAGS: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"<[^>]*>").unwrap());
static BLANK_LINES: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"\n{3,}").unwrap());

/// Markdown without its leading `---` front matter block.
pub fn remove_front_matter(markdown: &str) -> &str {
    match MARKDOWN_FRONT_MATTER.find(markdown) {
        Some(m) => &markdown[m.end()..],
        None => markdown,
    }
}

/// Render Markdown to HTML, dropping any front matter.
pub fn markdown_to_html(markdown: &str) -> String {
    let parser = Parser::new_ext(remove_front_matter(markdown), Options::ENABLE_TABLES);
    let mut out = String::new();
    html::push_html(&mut out, parser);
    out
}

pub fn missing_doc_placeholder(file_name: &str) -> String {
    format!(
        "<h1>Please add {} file to place some documentation here</h1>",
        file_name
    )
}

/// Plain text of an HTML fragment: block ends become line breaks, tags are
/// dropped, common entities decoded.
pub fn html_to_plaintext(html: &str) -> String {
    let text = BREAKS.replace_all(html, "\n");
    let text = TAGS.replace_all(&text, "");
    let text = text
        .replace("&nbsp;", " ")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&");
    let text = BLANK_LINES.replace_all(&text, "\n\n");
    text.trim().to_string()
}

/// Why a front matter block could not be read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FrontMatterError {
    Missing,
    Yaml(String),
}

impl std::fmt::Display for FrontMatterError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FrontMatterError::Missing => f.write_str("No YAML front matter found."),
            FrontMatterError::Yaml(e) => write!(f, "Error parsing YAML: {}", e),
        }
    }
}

fn extract(content: &str, re: &Regex) -> Result<serde_yaml::Value, FrontMatterError> {
    let yaml = re
        .captures(content)
        .and_then(|c| c.get(1))
        .ok_or(FrontMatterError::Missing)?;
    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml.as_str()).map_err(|e| FrontMatterError::Yaml(e.to_string()))?;
    // An empty block reads as null
    Ok(if value.is_null() {
        serde_yaml::Value::Mapping(Default::default())
    } else {
        value
    })
}

/// YAML between `---` lines at the top of a Markdown file.
pub fn markdown_front_matter(content: &str) -> Result<serde_yaml::Value, FrontMatterError> {
    extract(content, &MARKDOWN_YAML)
}

/// YAML in a `"""` block at the top of a script file.
pub fn script_front_matter(content: &str) -> Result<serde_yaml::Value, FrontMatterError> {
    extract(content, &PYTHON_YAML)
}

/// Rewrite the leading `"""` front matter block as `#` comments so the
/// script runs without a front matter parse step.
pub fn front_matter_to_comments(content: &str) -> String {
    let Some(m) = PYTHON_YAML.find(content) else {
        return content.to_string();
    };
    let commented = m
        .as_str()
        .split('\n')
        .map(|line| {
            if line.trim().is_empty() {
                "#".to_string()
            } else {
                format!("# {}", line)
            }
        })
        .collect::<Vec<_>>()
        .join("\n");
    format!("{}{}", commented, &content[m.end()..])
}

/// Whether `source` defines a function called `name` anywhere.
pub fn defines_function(source: &str, name: &str) -> bool {
    match tether_script::parse(source) {
        Ok(program) => block_defines(&program.body, name),
        Err(_) => false,
    }
}

fn block_defines(block: &Block, name: &str) -> bool {
    block.iter().any(|stmt| match &stmt.kind {
        StmtKind::Def(def) => def.name == name || block_defines(&def.body, name),
        StmtKind::If { branches, orelse } => {
            branches.iter().any(|(_, b)| block_defines(b, name))
                || orelse.as_ref().is_some_and(|b| block_defines(b, name))
        }
        StmtKind::For { body, .. } | StmtKind::While { body, .. } => block_defines(body, name),
        StmtKind::Try {
            body,
            handlers,
            finally,
        } => {
            block_defines(body, name)
                || handlers.iter().any(|h| block_defines(&h.body, name))
                || finally.as_ref().is_some_and(|b| block_defines(b, name))
        }
        _ => false,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn markdown_front_matter_is_parsed_and_stripped() {
        let md = "---\nTOKEN: abc\nLIMIT: 3\n---\n# Settings\n";
        let meta = markdown_front_matter(md).unwrap();
        assert_eq!(meta["TOKEN"].as_str(), Some("abc"));
        assert_eq!(remove_front_matter(md), "# Settings\n");
        assert_eq!(markdown_to_html(md).trim(), "<h1>Settings</h1>");
    }

    #[test]
    fn missing_front_matter_is_reported() {
        assert_eq!(
            markdown_front_matter("# No meta").unwrap_err(),
            FrontMatterError::Missing
        );
    }

    #[test]
    fn script_front_matter_becomes_comments() {
        let src = "\"\"\"\nTITLE: Setup\n\nCRON: []\n\"\"\"\nx = 1\n";
        let meta = script_front_matter(src).unwrap();
        assert_eq!(meta["TITLE"].as_str(), Some("Setup"));
        let rewritten = front_matter_to_comments(src);
        assert_eq!(rewritten, "# \"\"\"\n# TITLE: Setup\n#\n# CRON: []\n# \"\"\"\nx = 1\n");
    }

    #[test]
    fn nested_function_definitions_are_found() {
        let src = "if True:\n    def handle_button():\n        pass\n";
        assert!(defines_function(src, "handle_button"));
        assert!(!defines_function("handle_button = 1\n", "handle_button"));
    }

    #[test]
    fn html_becomes_plain_text() {
        let html = "<p>Hello &amp; <b>welcome</b></p><p>Bye<br/>now</p>";
        assert_eq!(html_to_plaintext(html), "Hello & welcome\nBye\nnow");
    }
}
