use std::path::{Path, PathBuf};

use tree_sitter::{Node, Parser};

use crate::analyzer::{FileAnalyzer, Memo, read_file, require_extension};
use crate::construct::{ConstructMap, TypeKind, record};
use crate::error::{AnalysisError, ResolveError};
use crate::resolver::{JavaEvent, JavaResolver};

/// Analyzer for one `.java` compilation unit.
#[derive(Debug)]
pub struct JavaSourceAnalyzer {
    path: PathBuf,
    constructs: Memo<ConstructMap>,
}

impl JavaSourceAnalyzer {
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, AnalysisError> {
        Ok(Self {
            path: require_extension(path.into(), "java")?,
            constructs: Memo::default(),
        })
    }
}

impl FileAnalyzer for JavaSourceAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn constructs(&self) -> Result<&ConstructMap, AnalysisError> {
        self.constructs.get_or_try_init(|| {
            let bytes = read_file(&self.path)?;
            analyze_java_source(&String::from_utf8_lossy(&bytes), &self.path)
        })
    }
}

/// Parses `source` and returns every package, class, enum, constructor and
/// method it declares. `path` is only used for error reporting.
pub fn analyze_java_source(source: &str, path: &Path) -> Result<ConstructMap, AnalysisError> {
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_java::LANGUAGE.into())
        .map_err(|e| AnalysisError::grammar(path, e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AnalysisError::grammar(path, "parser produced no tree"))?;
    let root = tree.root_node();
    if let Some(bad) = first_error(root) {
        let pos = bad.start_position();
        return Err(AnalysisError::grammar(
            path,
            format!("syntax error at {}:{}", pos.row + 1, pos.column + 1),
        ));
    }

    let mut walker = DeclarationWalker {
        source,
        resolver: JavaResolver::new(),
        constructs: ConstructMap::new(),
    };
    walker
        .walk(root)
        .map_err(|e| AnalysisError::resolver(path, e))?;
    Ok(walker.constructs)
}

struct DeclarationWalker<'s> {
    source: &'s str,
    resolver: JavaResolver,
    constructs: ConstructMap,
}

impl<'s> DeclarationWalker<'s> {
    fn walk(&mut self, node: Node<'_>) -> Result<(), ResolveError> {
        match node.kind() {
            "package_declaration" => {
                if let Some(name) = package_name(&node, self.source) {
                    self.emit(JavaEvent::Package(name), self.source)?;
                }
                Ok(())
            }
            "class_declaration" | "record_declaration" => {
                let name = field_text(&node, "name", self.source);
                self.resolver.apply(JavaEvent::ClassDeclaration(name))?;
                self.walk_children(node)
            }
            "class_body" => {
                self.emit(JavaEvent::ClassBodyEnter, node_text(&node, self.source))?;
                self.walk_children(node)?;
                self.resolver.apply(JavaEvent::ClassBodyExit)?;
                Ok(())
            }
            "interface_declaration" | "annotation_type_declaration" => {
                let name = field_text(&node, "name", self.source);
                self.resolver.apply(JavaEvent::TypeEnter {
                    kind: TypeKind::Interface,
                    name,
                })?;
                self.walk_children(node)?;
                self.resolver.apply(JavaEvent::TypeExit(TypeKind::Interface))?;
                Ok(())
            }
            "enum_declaration" => {
                let name = field_text(&node, "name", self.source);
                let body = text_from_child(&node, "enum", self.source);
                self.emit(
                    JavaEvent::TypeEnter {
                        kind: TypeKind::Enum,
                        name,
                    },
                    body,
                )?;
                self.walk_children(node)?;
                self.resolver.apply(JavaEvent::TypeExit(TypeKind::Enum))?;
                Ok(())
            }
            "method_declaration" => {
                // Interface methods are walked for nested classes only.
                if node.parent().is_some_and(|p| p.kind() == "interface_body") {
                    return self.walk_children(node);
                }
                let name = field_text(&node, "name", self.source);
                let params = parameter_types(&node, self.source);
                let body = text_from_field(&node, "type", self.source);
                self.emit(JavaEvent::MethodEnter { name, params }, body)?;
                self.walk_children(node)?;
                self.resolver.apply(JavaEvent::CallableExit)?;
                Ok(())
            }
            "constructor_declaration" => {
                let params = parameter_types(&node, self.source);
                let body = text_from_field(&node, "name", self.source);
                self.emit(JavaEvent::ConstructorEnter { params }, body)?;
                self.walk_children(node)?;
                self.resolver.apply(JavaEvent::CallableExit)?;
                Ok(())
            }
            _ => self.walk_children(node),
        }
    }

    fn walk_children(&mut self, node: Node<'_>) -> Result<(), ResolveError> {
        let mut cursor = node.walk();
        for child in node.named_children(&mut cursor) {
            self.walk(child)?;
        }
        Ok(())
    }

    fn emit(&mut self, event: JavaEvent<'_>, body: &str) -> Result<(), ResolveError> {
        if let Some(id) = self.resolver.apply(event)? {
            record(&mut self.constructs, id, body);
        }
        Ok(())
    }
}

fn first_error(node: Node<'_>) -> Option<Node<'_>> {
    if !node.has_error() {
        return None;
    }
    if node.is_error() || node.is_missing() {
        return Some(node);
    }
    let mut cursor = node.walk();
    let children: Vec<Node<'_>> = node.children(&mut cursor).collect();
    children.into_iter().find_map(first_error).or(Some(node))
}

fn package_name<'s>(node: &Node, source: &'s str) -> Option<&'s str> {
    let mut cursor = node.walk();
    for child in node.named_children(&mut cursor) {
        if child.kind() == "scoped_identifier" || child.kind() == "identifier" {
            return Some(node_text(&child, source));
        }
    }
    None
}

/// Declared parameter types of a method or constructor, in order.
/// Receiver parameters are not part of the signature.
fn parameter_types(node: &Node, source: &str) -> Vec<String> {
    let Some(params) = node.child_by_field_name("parameters") else {
        return Vec::new();
    };
    let mut types = Vec::new();
    let mut cursor = params.walk();
    for param in params.named_children(&mut cursor) {
        match param.kind() {
            "formal_parameter" => {
                let ty = field_text(&param, "type", source);
                let dims = field_text(&param, "dimensions", source);
                types.push(format!("{ty}{dims}"));
            }
            "spread_parameter" => {
                let mut inner = param.walk();
                let ty = param
                    .named_children(&mut inner)
                    .find(|c| !matches!(c.kind(), "modifiers" | "variable_declarator"))
                    .map(|c| node_text(&c, source))
                    .unwrap_or_default();
                types.push(format!("{ty}..."));
            }
            _ => {}
        }
    }
    types
}

fn node_text<'s>(node: &Node, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_text<'s>(node: &Node, field: &str, source: &'s str) -> &'s str {
    node.child_by_field_name(field)
        .map(|c| node_text(&c, source))
        .unwrap_or("")
}

/// Text of `node` starting at its `field` child, so leading modifiers and
/// annotations are not part of the body.
fn text_from_field<'s>(node: &Node, field: &str, source: &'s str) -> &'s str {
    let start = node
        .child_by_field_name(field)
        .map(|c| c.start_byte())
        .unwrap_or_else(|| node.start_byte());
    source.get(start..node.end_byte()).unwrap_or("")
}

fn text_from_child<'s>(node: &Node, kind: &str, source: &'s str) -> &'s str {
    let mut cursor = node.walk();
    let start = node
        .children(&mut cursor)
        .find(|c| c.kind() == kind)
        .map(|c| c.start_byte())
        .unwrap_or_else(|| node.start_byte());
    source.get(start..node.end_byte()).unwrap_or("")
}
