//! Grammar-polymorphic symbol extraction.
//!
//! Each language is a [`LanguageGrammar`] registered in a [`GrammarRegistry`].
//! A grammar only delimits symbol boundaries and kinds; [`SymbolExtractor`]
//! turns those into [`Symbol`] records with stable ids and parent links, so
//! adding a language never touches the extractor or anything downstream.

use super::languages::{DocStyle, LanguageConfig};
use super::symbols::{Symbol, SymbolKind, spans_strictly_contain, symbol_id};
use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tracing::debug;
use tree_sitter::{Node, Parser, Query, QueryCursor, StreamingIterator};

/// Errors raised while extracting symbols from one file.
#[derive(Error, Debug)]
pub enum ExtractError {
    #[error("unsupported language: {0}")]
    UnsupportedLanguage(String),

    #[error("failed to parse {file_path}: {reason}")]
    Parse { file_path: String, reason: String },

    #[error("invalid grammar for {language}: {reason}")]
    Grammar { language: String, reason: String },
}

/// A symbol boundary as delimited by a grammar, before ids and parents are assigned.
#[derive(Debug, Clone, PartialEq)]
pub struct SymbolNode {
    pub kind: SymbolKind,
    pub name: String,
    pub byte_span: (usize, usize),
    pub line_span: (usize, usize),
    pub signature: String,
    pub doc: Option<String>,
}

/// Result of running a grammar over one source text.
#[derive(Debug, Default)]
pub struct Delimited {
    pub nodes: Vec<SymbolNode>,
    /// The grammar had to recover from syntax errors.
    pub recovered: bool,
}

/// Uniform capability every supported language provides.
pub trait LanguageGrammar: Send + Sync {
    fn name(&self) -> &str;

    fn extensions(&self) -> &[&'static str];

    /// Parse `source` and delimit its symbols.
    ///
    /// Returns `Err` only when no syntax tree could be produced at all.
    fn delimit(&self, source: &str) -> Result<Delimited, String>;
}

/// Tree-sitter backed grammar driven by a [`LanguageConfig`] query.
pub struct TreeSitterGrammar {
    config: LanguageConfig,
    query: Query,
}

impl TreeSitterGrammar {
    pub fn new(config: LanguageConfig) -> Result<Self, ExtractError> {
        let query = Query::new(&config.language, config.query).map_err(|e| ExtractError::Grammar {
            language: config.name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(Self { config, query })
    }
}

impl LanguageGrammar for TreeSitterGrammar {
    fn name(&self) -> &str {
        self.config.name
    }

    fn extensions(&self) -> &[&'static str] {
        self.config.extensions
    }

    fn delimit(&self, source: &str) -> Result<Delimited, String> {
        let mut parser = Parser::new();
        parser
            .set_language(&self.config.language)
            .map_err(|e| format!("grammar rejected: {e}"))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| "parser produced no tree".to_string())?;
        let root = tree.root_node();
        let bytes = source.as_bytes();

        let mut nodes = Vec::new();
        let mut seen = HashSet::new();
        let mut cursor = QueryCursor::new();
        let capture_names = self.query.capture_names();

        let mut matches = cursor.matches(&self.query, root, bytes);
        while let Some(m) = matches.next() {
            let mut main_node = None;
            let mut kind = None;
            let mut name = None;

            for cap in m.captures {
                let capture_name = capture_names[cap.index as usize];
                if capture_name == "name" {
                    name = cap.node.utf8_text(bytes).ok();
                } else if let Some(k) = SymbolKind::from_capture(capture_name) {
                    main_node = Some(cap.node);
                    kind = Some(k);
                }
            }

            let (Some(node), Some(kind), Some(name)) = (main_node, kind, name) else {
                continue;
            };
            let span = (node.start_byte(), node.end_byte());
            if span.0 >= span.1 || name.is_empty() || !seen.insert(span) {
                continue;
            }

            let text = &source[span.0..span.1];
            nodes.push(SymbolNode {
                kind,
                name: name.to_string(),
                byte_span: span,
                line_span: (node.start_position().row + 1, node.end_position().row + 1),
                signature: extract_signature(text, self.config.name),
                doc: leading_doc(node, source, self.config.doc_style),
            });
        }

        Ok(Delimited {
            nodes,
            recovered: root.has_error(),
        })
    }
}

/// Registry of language name → grammar.
#[derive(Clone, Default)]
pub struct GrammarRegistry {
    grammars: HashMap<String, Arc<dyn LanguageGrammar>>,
}

impl GrammarRegistry {
    /// Registry with every built-in tree-sitter grammar.
    pub fn with_builtin() -> Result<Self, ExtractError> {
        let mut registry = Self::default();
        for config in LanguageConfig::get_all() {
            registry.register(Arc::new(TreeSitterGrammar::new(config)?));
        }
        Ok(registry)
    }

    /// Add or replace the grammar for `grammar.name()`.
    pub fn register(&mut self, grammar: Arc<dyn LanguageGrammar>) {
        self.grammars.insert(grammar.name().to_string(), grammar);
    }

    pub fn get(&self, language: &str) -> Option<&Arc<dyn LanguageGrammar>> {
        self.grammars.get(language)
    }

    /// Language name for a path, by file extension.
    pub fn language_for_path(&self, path: &Path) -> Option<&str> {
        let ext = path.extension()?.to_str()?;
        self.grammars
            .values()
            .find(|g| g.extensions().contains(&ext))
            .map(|g| g.name())
    }

    pub fn languages(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.grammars.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

/// Turns source text into an ordered symbol table for one file.
#[derive(Clone)]
pub struct SymbolExtractor {
    registry: GrammarRegistry,
}

impl SymbolExtractor {
    pub fn new(registry: GrammarRegistry) -> Self {
        Self { registry }
    }

    pub fn with_builtin() -> Result<Self, ExtractError> {
        Ok(Self::new(GrammarRegistry::with_builtin()?))
    }

    pub fn registry(&self) -> &GrammarRegistry {
        &self.registry
    }

    /// Extract symbols in source order with parent links set.
    ///
    /// Syntax errors the grammar can recover from still yield every symbol
    /// that was delimited; only a file with no usable tree fails.
    pub fn extract(
        &self,
        file_path: &str,
        source: &str,
        language: &str,
    ) -> Result<Vec<Symbol>, ExtractError> {
        let grammar = self
            .registry
            .get(language)
            .ok_or_else(|| ExtractError::UnsupportedLanguage(language.to_string()))?;

        let delimited = grammar.delimit(source).map_err(|reason| ExtractError::Parse {
            file_path: file_path.to_string(),
            reason,
        })?;

        if delimited.recovered {
            if delimited.nodes.is_empty() && !source.trim().is_empty() {
                return Err(ExtractError::Parse {
                    file_path: file_path.to_string(),
                    reason: "syntax errors left no recoverable symbols".to_string(),
                });
            }
            debug!(
                "{file_path}: recovered from syntax errors, {} symbols delimited",
                delimited.nodes.len()
            );
        }

        Ok(link_symbols(file_path, grammar.name(), source, delimited.nodes))
    }
}

/// Assign parents, promote class-scoped functions to methods, and derive ids.
fn link_symbols(file_path: &str, language: &str, source: &str, mut nodes: Vec<SymbolNode>) -> Vec<Symbol> {
    nodes.retain(|n| n.byte_span.0 < n.byte_span.1 && n.byte_span.1 <= source.len());
    nodes.sort_by(|a, b| {
        a.byte_span
            .0
            .cmp(&b.byte_span.0)
            .then(b.byte_span.1.cmp(&a.byte_span.1))
    });

    let mut symbols: Vec<Symbol> = Vec::with_capacity(nodes.len());
    let mut qualified: Vec<String> = Vec::with_capacity(nodes.len());
    let mut ordinals: HashMap<(String, SymbolKind), usize> = HashMap::new();
    // Indices of the currently open enclosing symbols.
    let mut stack: Vec<usize> = Vec::new();

    for node in nodes {
        while let Some(&top) = stack.last() {
            if spans_strictly_contain(symbols[top].byte_span, node.byte_span) {
                break;
            }
            stack.pop();
        }
        let parent = stack.last().copied();

        let mut kind = node.kind;
        if kind == SymbolKind::Function
            && parent.is_some_and(|p| symbols[p].kind == SymbolKind::Class)
        {
            kind = SymbolKind::Method;
        }

        let qualified_name = match parent {
            Some(p) => format!("{}.{}", qualified[p], node.name),
            None => node.name.clone(),
        };
        let ordinal = ordinals.entry((qualified_name.clone(), kind)).or_insert(0);
        let id = symbol_id(file_path, &qualified_name, kind, *ordinal);
        *ordinal += 1;

        symbols.push(Symbol {
            id,
            file_path: file_path.to_string(),
            language: language.to_string(),
            kind,
            name: node.name,
            byte_span: node.byte_span,
            line_span: node.line_span,
            signature_text: node.signature,
            leading_comment_text: node.doc,
            parent_id: parent.map(|p| symbols[p].id.clone()),
            text: source[node.byte_span.0..node.byte_span.1].to_string(),
        });
        qualified.push(qualified_name);
        stack.push(symbols.len() - 1);
    }

    symbols
}

fn collapse_whitespace(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn extract_signature(content: &str, lang: &str) -> String {
    let content = content.trim();
    let first_line = content.lines().next().unwrap_or("").trim();
    match lang {
        "python" => {
            if let Some(stripped) = first_line.strip_suffix(':') {
                return stripped.to_string();
            }
            if let Some(idx) = content.find("):") {
                collapse_whitespace(&content[..idx + 1])
            } else {
                first_line.to_string()
            }
        }
        "typescript" | "javascript" => {
            if let Some(idx) = content.find("=>") {
                collapse_whitespace(&content[..idx + 2])
            } else if let Some(idx) = content.find('{') {
                collapse_whitespace(&content[..idx])
            } else {
                first_line.to_string()
            }
        }
        _ => {
            if let Some(idx) = content.find('{') {
                collapse_whitespace(&content[..idx])
            } else {
                first_line.trim_end_matches(';').to_string()
            }
        }
    }
}

/// Nodes that wrap a declaration without adding a symbol of their own;
/// documentation is attached to the wrapper.
const WRAPPER_KINDS: &[&str] = &[
    "export_statement",
    "decorated_definition",
    "type_declaration",
    "var_declaration",
    "const_declaration",
];

/// Sibling kinds allowed between a doc comment and its declaration.
const ATTRIBUTE_KINDS: &[&str] = &["attribute_item", "decorator"];

fn leading_doc(node: Node, source: &str, style: DocStyle) -> Option<String> {
    match style {
        DocStyle::BodyDocstring => body_docstring(node, source).or_else(|| leading_comments(node, source)),
        DocStyle::LeadingComments => leading_comments(node, source),
    }
}

fn leading_comments(node: Node, source: &str) -> Option<String> {
    let mut anchor = node;
    while let Some(parent) = anchor.parent() {
        if WRAPPER_KINDS.contains(&parent.kind()) && anchor.prev_named_sibling().is_none() {
            anchor = parent;
        } else {
            break;
        }
    }

    let mut pieces = Vec::new();
    let mut next_row = anchor.start_position().row;
    let mut current = anchor.prev_sibling();
    while let Some(sibling) = current {
        let kind = sibling.kind();
        if ATTRIBUTE_KINDS.contains(&kind) {
            next_row = sibling.start_position().row;
        } else if kind.contains("comment") && sibling.end_position().row + 1 >= next_row {
            pieces.push(&source[sibling.byte_range()]);
            next_row = sibling.start_position().row;
        } else {
            break;
        }
        current = sibling.prev_sibling();
    }

    pieces.reverse();
    clean_comment(&pieces.join("\n"))
}

fn body_docstring(node: Node, source: &str) -> Option<String> {
    let body = node.child_by_field_name("body")?;
    let first = body.named_child(0)?;
    if first.kind() != "expression_statement" {
        return None;
    }
    let literal = first.named_child(0)?;
    if literal.kind() != "string" {
        return None;
    }
    let raw = &source[literal.byte_range()];
    let stripped = strip_string_literal(raw);
    let cleaned = stripped
        .lines()
        .map(str::trim)
        .collect::<Vec<_>>()
        .join("\n");
    let cleaned = cleaned.trim();
    (!cleaned.is_empty()).then(|| cleaned.to_string())
}

fn strip_string_literal(raw: &str) -> &str {
    let s = raw.trim_start_matches(|c: char| c.is_ascii_alphabetic());
    for quote in ["\"\"\"", "'''", "\"", "'"] {
        if s.len() >= 2 * quote.len() && s.starts_with(quote) && s.ends_with(quote) {
            return &s[quote.len()..s.len() - quote.len()];
        }
    }
    s
}

const COMMENT_MARKERS: &[&str] = &["///", "//!", "//", "/**", "/*!", "/*", "*/", "*", "#"];

fn clean_comment(raw: &str) -> Option<String> {
    let mut lines = Vec::new();
    for line in raw.lines() {
        let mut line = line.trim();
        if let Some(marker) = COMMENT_MARKERS.iter().find(|m| line.starts_with(**m)) {
            line = &line[marker.len()..];
        }
        line = line.trim_end_matches("*/").trim();
        lines.push(line);
    }
    while lines.first().is_some_and(|l| l.is_empty()) {
        lines.remove(0);
    }
    while lines.last().is_some_and(|l| l.is_empty()) {
        lines.pop();
    }
    (!lines.is_empty()).then(|| lines.join("\n"))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn extractor() -> SymbolExtractor {
        SymbolExtractor::with_builtin().expect("built-in grammars should compile")
    }

    fn find<'a>(symbols: &'a [Symbol], name: &str) -> &'a Symbol {
        symbols
            .iter()
            .find(|s| s.name == name)
            .unwrap_or_else(|| panic!("symbol {name} not found in {symbols:?}"))
    }

    #[test]
    fn test_all_builtin_queries_compile() {
        let registry = GrammarRegistry::with_builtin().unwrap();
        assert_eq!(
            registry.languages(),
            vec!["go", "javascript", "python", "rust", "typescript"]
        );
    }

    #[test]
    fn test_parse_rust_code() {
        let source = r#"
/// A point in space.
#[derive(Debug)]
struct MyStruct {
    field: i32,
}

impl MyStruct {
    fn my_method(&self) {
        println!("Hello");
    }
}

const LIMIT: usize = 10;

mod inner {
    fn helper() {}
}

struct Wrapper<T>(T);

impl<T> Wrapper<T> {
    fn get(&self) {}
}

impl std::fmt::Display for Wrapper<u8> {
    fn fmt(&self) {}
}

impl inner::Config {
    fn load() {}
}

fn my_function() {}
"#;
        let symbols = extractor().extract("src/lib.rs", source, "rust").unwrap();

        let strukt = symbols
            .iter()
            .find(|s| s.name == "MyStruct" && s.text.starts_with("struct"))
            .unwrap();
        assert_eq!(strukt.kind, SymbolKind::Class);
        assert_eq!(strukt.leading_comment_text.as_deref(), Some("A point in space."));

        let imp = symbols
            .iter()
            .find(|s| s.name == "MyStruct" && s.text.starts_with("impl"))
            .unwrap();
        assert_ne!(imp.id, strukt.id);

        let method = find(&symbols, "my_method");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent_id.as_deref(), Some(imp.id.as_str()));
        assert_eq!(method.signature_text, "fn my_method(&self)");

        assert_eq!(find(&symbols, "LIMIT").kind, SymbolKind::Variable);
        assert_eq!(find(&symbols, "inner").kind, SymbolKind::Module);

        let helper = find(&symbols, "helper");
        assert_eq!(helper.kind, SymbolKind::Function);
        assert_eq!(helper.parent_id.as_deref(), Some(find(&symbols, "inner").id.as_str()));

        let top = find(&symbols, "my_function");
        assert_eq!(top.kind, SymbolKind::Function);
        assert!(top.parent_id.is_none());

        // Generic, trait and path-qualified impls each own their methods.
        let wrapper_impls: Vec<&Symbol> = symbols
            .iter()
            .filter(|s| s.name == "Wrapper" && s.text.starts_with("impl"))
            .collect();
        assert_eq!(wrapper_impls.len(), 2);
        assert_ne!(wrapper_impls[0].id, wrapper_impls[1].id);
        for (method, owner) in [("get", wrapper_impls[0]), ("fmt", wrapper_impls[1])] {
            let method = find(&symbols, method);
            assert_eq!(method.kind, SymbolKind::Method);
            assert_eq!(method.parent_id.as_deref(), Some(owner.id.as_str()));
        }
        let config_impl = find(&symbols, "Config");
        assert_eq!(config_impl.kind, SymbolKind::Class);
        let load = find(&symbols, "load");
        assert_eq!(load.kind, SymbolKind::Method);
        assert_eq!(load.parent_id.as_deref(), Some(config_impl.id.as_str()));
    }

    #[test]
    fn test_parse_python_code() {
        let source = r#"
MAX_RETRIES = 3

class MyClass:
    """Greets people."""

    def my_method(self):
        print("Hello")

def my_function():
    pass
"#;
        let symbols = extractor().extract("app.py", source, "python").unwrap();
        let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, vec!["MAX_RETRIES", "MyClass", "my_method", "my_function"]);

        let class = find(&symbols, "MyClass");
        assert_eq!(class.kind, SymbolKind::Class);
        assert_eq!(class.signature_text, "class MyClass");
        assert_eq!(class.leading_comment_text.as_deref(), Some("Greets people."));

        let method = find(&symbols, "my_method");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent_id.as_deref(), Some(class.id.as_str()));

        assert_eq!(find(&symbols, "MAX_RETRIES").kind, SymbolKind::Variable);
        assert_eq!(find(&symbols, "my_function").kind, SymbolKind::Function);
    }

    #[test]
    fn test_parse_go_code() {
        let source = r#"
package main

// Server handles requests.
type Server struct {
    addr string
}

func (s *Server) Start() error {
    return nil
}

var defaultAddr = ":8080"

func main() {}
"#;
        let symbols = extractor().extract("main.go", source, "go").unwrap();
        let server = find(&symbols, "Server");
        assert_eq!(server.kind, SymbolKind::Class);
        assert_eq!(server.leading_comment_text.as_deref(), Some("Server handles requests."));
        assert_eq!(find(&symbols, "Start").kind, SymbolKind::Method);
        assert_eq!(find(&symbols, "defaultAddr").kind, SymbolKind::Variable);
        assert_eq!(find(&symbols, "main").kind, SymbolKind::Function);
    }

    #[test]
    fn test_parse_typescript_code() {
        let source = r#"
/** Shape of a user. */
interface User {
  name: string;
}

export class UserService {
  find(id: string): User {
    return { name: id };
  }
}

const toUpper = (s: string) => s.toUpperCase();
"#;
        let symbols = extractor().extract("user.ts", source, "typescript").unwrap();
        let user = find(&symbols, "User");
        assert_eq!(user.kind, SymbolKind::Class);
        assert_eq!(user.leading_comment_text.as_deref(), Some("Shape of a user."));

        let service = find(&symbols, "UserService");
        let method = find(&symbols, "find");
        assert_eq!(method.kind, SymbolKind::Method);
        assert_eq!(method.parent_id.as_deref(), Some(service.id.as_str()));
        assert_eq!(find(&symbols, "toUpper").kind, SymbolKind::Function);
    }

    #[test]
    fn test_exported_constants_are_variables() {
        let source = "// Upper bound.\nexport const LIMIT = 5;\nexport function f() {}\n";
        for language in ["typescript", "javascript"] {
            let symbols = extractor().extract("limits.ts", source, language).unwrap();
            let names: Vec<&str> = symbols.iter().map(|s| s.name.as_str()).collect();
            assert_eq!(names, vec!["LIMIT", "f"], "{language}");
            let limit = find(&symbols, "LIMIT");
            assert_eq!(limit.kind, SymbolKind::Variable);
            assert_eq!(limit.leading_comment_text.as_deref(), Some("Upper bound."));
            assert_eq!(find(&symbols, "f").kind, SymbolKind::Function);
        }
    }

    #[test]
    fn test_spans_within_bounds_and_parents_contain_children() {
        let source = r#"
class Outer:
    class Inner:
        def deep(self):
            def closure():
                return 1
            return closure
"#;
        let symbols = extractor().extract("nested.py", source, "python").unwrap();
        assert_eq!(symbols.len(), 4);
        let by_id: HashMap<&str, &Symbol> = symbols.iter().map(|s| (s.id.as_str(), s)).collect();
        for symbol in &symbols {
            assert!(symbol.byte_span.0 < symbol.byte_span.1);
            assert!(symbol.byte_span.1 <= source.len());
            if let Some(parent_id) = &symbol.parent_id {
                let parent = by_id[parent_id.as_str()];
                assert_eq!(parent.file_path, symbol.file_path);
                assert!(parent.strictly_contains(symbol));
            }
        }
        assert_eq!(find(&symbols, "closure").kind, SymbolKind::Function);
    }

    #[test]
    fn test_ids_stable_across_extractions() {
        let source = "def a():\n    pass\n\ndef b():\n    pass\n";
        let first = extractor().extract("m.py", source, "python").unwrap();
        let edited = "import os\n\ndef a():\n    return 1\n\ndef b():\n    pass\n";
        let second = extractor().extract("m.py", edited, "python").unwrap();
        let ids = |s: &[Symbol]| s.iter().map(|x| x.id.clone()).collect::<Vec<_>>();
        assert_eq!(ids(&first), ids(&second));
    }

    #[test]
    fn test_unsupported_language() {
        let err = extractor().extract("x.cob", "IDENTIFICATION DIVISION.", "cobol");
        assert!(matches!(err, Err(ExtractError::UnsupportedLanguage(lang)) if lang == "cobol"));
    }

    #[test]
    fn test_recoverable_syntax_errors_keep_symbols() {
        let source = "def good():\n    return 1\n\ndef broken(:\n    pass\n";
        let symbols = extractor().extract("bad.py", source, "python").unwrap();
        assert!(symbols.iter().any(|s| s.name == "good"));
    }

    #[test]
    fn test_garbage_is_parse_error() {
        let err = extractor().extract("junk.rs", "}}}} ((( @@@ !!!", "rust");
        assert!(matches!(err, Err(ExtractError::Parse { .. })));
    }

    #[test]
    fn test_language_for_path() {
        let registry = GrammarRegistry::with_builtin().unwrap();
        assert_eq!(registry.language_for_path(Path::new("src/main.rs")), Some("rust"));
        assert_eq!(registry.language_for_path(Path::new("a/b.py")), Some("python"));
        assert_eq!(registry.language_for_path(Path::new("README.md")), None);
    }

    #[test]
    fn test_clean_comment_strips_markers() {
        assert_eq!(clean_comment("/// one\n/// two").as_deref(), Some("one\ntwo"));
        assert_eq!(clean_comment("/**\n * Doc.\n */").as_deref(), Some("Doc."));
        assert_eq!(clean_comment("# note").as_deref(), Some("note"));
        assert_eq!(clean_comment("//"), None);
    }

    #[test]
    fn test_strip_string_literal() {
        assert_eq!(strip_string_literal("\"\"\"Doc.\"\"\""), "Doc.");
        assert_eq!(strip_string_literal("r'''raw'''"), "raw");
        assert_eq!(strip_string_literal("'x'"), "x");
    }
}
