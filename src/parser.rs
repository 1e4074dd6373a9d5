//! Python source analysis shared by the safety validator and the function
//! repository.

use crate::errors::{Result, WorkbenchError};
use std::ops::Range;
use tree_sitter::{Node, Parser, Tree};

/// Statement kinds that bring a module into scope
const IMPORT_KINDS: &[&str] = &[
    "import_statement",
    "import_from_statement",
    "future_import_statement",
];

/// A module reference found in an import statement
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImportRef {
    pub module: String,
    pub line: usize,
}

/// A call whose callee is a bare identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallRef {
    pub name: String,
    pub line: usize,
}

/// A top-level statement located by byte range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceSpan {
    pub range: Range<usize>,
    pub text: String,
}

/// Python source together with its syntax tree
pub struct ParsedSource {
    source: String,
    tree: Tree,
}

impl std::fmt::Debug for ParsedSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ParsedSource")
            .field("bytes", &self.source.len())
            .finish()
    }
}

impl ParsedSource {
    /// Parse `source`, failing with `SyntaxError` on the first invalid construct.
    pub fn parse(source: &str) -> Result<Self> {
        let parsed = Self::parse_lenient(source)?;
        if let Some(err) = parsed.first_syntax_error() {
            return Err(err);
        }
        Ok(parsed)
    }

    /// Parse `source` keeping whatever the error-tolerant grammar recovers.
    pub fn parse_lenient(source: &str) -> Result<Self> {
        let mut parser = Parser::new();
        parser
            .set_language(&tree_sitter_python::LANGUAGE.into())
            .map_err(|e| WorkbenchError::Validation(format!("python grammar unavailable: {e}")))?;
        let tree = parser
            .parse(source, None)
            .ok_or_else(|| WorkbenchError::Validation("python parse was cancelled".to_string()))?;
        Ok(Self {
            source: source.to_string(),
            tree,
        })
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    fn text(&self, node: Node<'_>) -> &str {
        self.source.get(node.byte_range()).unwrap_or_default()
    }

    fn first_syntax_error(&self) -> Option<WorkbenchError> {
        for node in descendants(self.tree.root_node()) {
            let message = if node.is_missing() {
                format!("missing '{}'", node.kind())
            } else if node.is_error() {
                let snippet: String = self.text(node).chars().take(24).collect();
                let snippet = snippet.split_whitespace().collect::<Vec<_>>().join(" ");
                if snippet.is_empty() {
                    "invalid syntax".to_string()
                } else {
                    format!("invalid syntax near '{snippet}'")
                }
            } else if node.kind() == "print_statement" {
                "Missing parentheses in call to 'print'".to_string()
            } else if node.kind() == "exec_statement" {
                "Missing parentheses in call to 'exec'".to_string()
            } else {
                continue;
            };

            let position = node.start_position();
            return Some(WorkbenchError::SyntaxError {
                line: position.row + 1,
                column: position.column + 1,
                message,
            });
        }
        None
    }

    /// Every imported module, in document order, at any nesting depth
    pub fn imports(&self) -> Vec<ImportRef> {
        let mut imports = Vec::new();
        for node in descendants(self.tree.root_node()) {
            let line = node.start_position().row + 1;
            match node.kind() {
                "import_statement" => {
                    let mut cursor = node.walk();
                    let names: Vec<Node<'_>> =
                        node.children_by_field_name("name", &mut cursor).collect();
                    for name in names {
                        let dotted = if name.kind() == "aliased_import" {
                            name.child_by_field_name("name")
                        } else {
                            Some(name)
                        };
                        if let Some(dotted) = dotted {
                            imports.push(ImportRef {
                                module: squash(self.text(dotted)),
                                line,
                            });
                        }
                    }
                }
                "import_from_statement" => {
                    let module = node
                        .child_by_field_name("module_name")
                        .map(|m| squash(self.text(m)))
                        .unwrap_or_default();
                    imports.push(ImportRef { module, line });
                }
                "future_import_statement" => imports.push(ImportRef {
                    module: "__future__".to_string(),
                    line,
                }),
                _ => {}
            }
        }
        imports
    }

    /// Calls whose callee is a bare name (`f(x)`, not `obj.f(x)`)
    pub fn bare_calls(&self) -> Vec<CallRef> {
        descendants(self.tree.root_node())
            .into_iter()
            .filter(|node| node.kind() == "call")
            .filter_map(|node| {
                let callee = node.child_by_field_name("function")?;
                (callee.kind() == "identifier").then(|| CallRef {
                    name: self.text(callee).to_string(),
                    line: node.start_position().row + 1,
                })
            })
            .collect()
    }

    /// Names of all function definitions, including methods and nested ones
    pub fn function_definitions(&self) -> Vec<String> {
        descendants(self.tree.root_node())
            .into_iter()
            .filter(|node| node.kind() == "function_definition")
            .filter_map(|node| node.child_by_field_name("name"))
            .map(|name| self.text(name).to_string())
            .collect()
    }

    /// Import statements that are direct children of the module
    pub fn top_level_imports(&self) -> Vec<SourceSpan> {
        let root = self.tree.root_node();
        let mut cursor = root.walk();
        let children: Vec<Node<'_>> = root.named_children(&mut cursor).collect();
        children
            .into_iter()
            .filter(|node| IMPORT_KINDS.contains(&node.kind()))
            .map(|node| SourceSpan {
                range: node.byte_range(),
                text: self.text(node).trim().to_string(),
            })
            .collect()
    }

    /// Comments starting in the first column, anywhere in the tree
    pub fn column_zero_comments(&self) -> Vec<SourceSpan> {
        descendants(self.tree.root_node())
            .into_iter()
            .filter(|node| node.kind() == "comment" && node.start_position().column == 0)
            .map(|node| SourceSpan {
                range: node.byte_range(),
                text: self.text(node).to_string(),
            })
            .collect()
    }
}

/// Pre-order traversal in document order
fn descendants<'t>(root: Node<'t>) -> Vec<Node<'t>> {
    let mut nodes = Vec::new();
    let mut stack: Vec<Node<'t>> = vec![root];
    while let Some(node) = stack.pop() {
        nodes.push(node);
        let mut cursor = node.walk();
        let mut children: Vec<Node<'t>> = node.children(&mut cursor).collect();
        children.reverse();
        stack.extend(children);
    }
    nodes
}

fn squash(text: &str) -> String {
    text.split_whitespace().collect()
}
