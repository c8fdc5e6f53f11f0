use tree_sitter::Language;

/// Where a language keeps the documentation of a symbol.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DocStyle {
    /// Contiguous comments directly above the declaration.
    LeadingComments,
    /// A string literal as the first statement of the body, falling back to
    /// leading comments.
    BodyDocstring,
}

/// Static description of a built-in tree-sitter grammar.
///
/// `query` captures the symbol node as `@function`, `@class`, `@method`,
/// `@variable` or `@module`, and its identifier as `@name`.
pub struct LanguageConfig {
    pub name: &'static str,
    pub language: Language,
    pub extensions: &'static [&'static str],
    pub query: &'static str,
    pub doc_style: DocStyle,
}

impl LanguageConfig {
    pub fn get_all() -> Vec<LanguageConfig> {
        vec![
            go_config(),
            python_config(),
            typescript_config(),
            javascript_config(),
            rust_config(),
        ]
    }
}

fn go_config() -> LanguageConfig {
    LanguageConfig {
        name: "go",
        language: tree_sitter_go::LANGUAGE.into(),
        extensions: &["go"],
        query: r#"
(function_declaration
  name: (identifier) @name) @function

(method_declaration
  name: (field_identifier) @name) @method

(type_declaration
  (type_spec
    name: (type_identifier) @name) @class)

(source_file
  (var_declaration
    (var_spec
      name: (identifier) @name) @variable))

(source_file
  (const_declaration
    (const_spec
      name: (identifier) @name) @variable))
"#,
        doc_style: DocStyle::LeadingComments,
    }
}

fn python_config() -> LanguageConfig {
    LanguageConfig {
        name: "python",
        language: tree_sitter_python::LANGUAGE.into(),
        extensions: &["py", "pyi"],
        query: r#"
(function_definition
  name: (identifier) @name) @function

(class_definition
  name: (identifier) @name) @class

(module
  (expression_statement
    (assignment
      left: (identifier) @name)) @variable)
"#,
        doc_style: DocStyle::BodyDocstring,
    }
}

fn typescript_config() -> LanguageConfig {
    LanguageConfig {
        name: "typescript",
        language: tree_sitter_typescript::LANGUAGE_TYPESCRIPT.into(),
        extensions: &["ts", "tsx"],
        query: r#"
(function_declaration
  name: (identifier) @name) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(class_declaration
  name: (type_identifier) @name) @class

(interface_declaration
  name: (type_identifier) @name) @class

(type_alias_declaration
  name: (type_identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method

(program
  (lexical_declaration
    (variable_declarator
      name: (identifier) @name
      value: [(number) (string) (object) (array) (call_expression) (new_expression)])) @variable)

(export_statement
  (lexical_declaration
    (variable_declarator
      name: (identifier) @name
      value: [(number) (string) (object) (array) (call_expression) (new_expression)])) @variable)
"#,
        doc_style: DocStyle::LeadingComments,
    }
}

fn javascript_config() -> LanguageConfig {
    LanguageConfig {
        name: "javascript",
        language: tree_sitter_javascript::LANGUAGE.into(),
        extensions: &["js", "jsx", "mjs", "cjs"],
        query: r#"
(function_declaration
  name: (identifier) @name) @function

(lexical_declaration
  (variable_declarator
    name: (identifier) @name
    value: (arrow_function))) @function

(class_declaration
  name: (identifier) @name) @class

(method_definition
  name: (property_identifier) @name) @method

(program
  (lexical_declaration
    (variable_declarator
      name: (identifier) @name
      value: [(number) (string) (object) (array) (call_expression) (new_expression)])) @variable)

(export_statement
  (lexical_declaration
    (variable_declarator
      name: (identifier) @name
      value: [(number) (string) (object) (array) (call_expression) (new_expression)])) @variable)
"#,
        doc_style: DocStyle::LeadingComments,
    }
}

fn rust_config() -> LanguageConfig {
    LanguageConfig {
        name: "rust",
        language: tree_sitter_rust::LANGUAGE.into(),
        extensions: &["rs"],
        query: r#"
(function_item
  name: (identifier) @name) @function

(function_signature_item
  name: (identifier) @name) @function

(impl_item
  type: (type_identifier) @name) @class

(impl_item
  type: (generic_type
    type: (type_identifier) @name)) @class

(impl_item
  type: (scoped_type_identifier
    name: (type_identifier) @name)) @class

(impl_item
  type: (generic_type
    type: (scoped_type_identifier
      name: (type_identifier) @name))) @class

(struct_item
  name: (type_identifier) @name) @class

(enum_item
  name: (type_identifier) @name) @class

(trait_item
  name: (type_identifier) @name) @class

(type_item
  name: (type_identifier) @name) @class

(mod_item
  name: (identifier) @name) @module

(const_item
  name: (identifier) @name) @variable

(static_item
  name: (identifier) @name) @variable
"#,
        doc_style: DocStyle::LeadingComments,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(name: &str) -> LanguageConfig {
        LanguageConfig::get_all()
            .into_iter()
            .find(|c| c.name == name)
            .unwrap()
    }

    #[test]
    fn test_extensions_do_not_overlap() {
        let mut seen = std::collections::HashSet::new();
        for config in LanguageConfig::get_all() {
            for ext in config.extensions {
                assert!(seen.insert(*ext), "extension {ext} claimed twice");
            }
        }
        assert!(seen.contains("tsx"));
        assert!(seen.contains("mjs"));
    }

    #[test]
    fn test_python_uses_body_docstrings() {
        assert_eq!(config("python").doc_style, DocStyle::BodyDocstring);
        assert_eq!(config("go").doc_style, DocStyle::LeadingComments);
    }
}
