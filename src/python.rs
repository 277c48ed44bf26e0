use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::sync::{Arc, LazyLock};

use regex::Regex;
use tree_sitter::{Node, Parser};

use crate::analyzer::{FileAnalyzer, Memo, read_file, require_extension};
use crate::construct::{ConstructId, ConstructKind, ConstructMap, record};
use crate::error::AnalysisError;
use crate::resolver::{PythonEvent, PythonResolver};

static COMMENT_LINE: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"^\s*#").expect("valid regex"));
static PY2_MARKERS: LazyLock<[Regex; 2]> = LazyLock::new(|| {
    [
        Regex::new(r#"^\s*print\s+".*"#).expect("valid regex"),
        Regex::new(r"raw_input\s*\(").expect("valid regex"),
    ]
});
static ASYNC_DEF: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"async\s+def\b").expect("valid regex"));

/// Grammar flavor a Python source is parsed with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GrammarVariant {
    /// Before 3.5: `async def` is not valid syntax.
    Legacy,
    Modern,
}

/// Picks the grammar from the first version-specific line, skipping comments.
pub fn select_grammar(source: &str) -> GrammarVariant {
    for line in source.lines() {
        if COMMENT_LINE.is_match(line) {
            continue;
        }
        if PY2_MARKERS.iter().any(|re| re.is_match(line)) {
            return GrammarVariant::Legacy;
        }
        if ASYNC_DEF.is_match(line) {
            return GrammarVariant::Modern;
        }
    }
    GrammarVariant::Modern
}

/// Where a module sits in its package hierarchy.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ModuleLocation {
    pub package: Option<String>,
    pub module: String,
}

impl ModuleLocation {
    /// Location of a file on disk: the package is made of every enclosing
    /// directory that has an `__init__.py`, outermost first.
    pub fn on_disk(path: &Path) -> Self {
        let mut segments = Vec::new();
        let mut dir = path.parent();
        while let Some(d) = dir {
            if !d.join("__init__.py").is_file() {
                break;
            }
            match d.file_name().and_then(|n| n.to_str()) {
                Some(name) => segments.push(name.to_string()),
                None => break,
            }
            dir = d.parent();
        }
        Self::from_parts(segments, path)
    }

    /// Same rule for an archive entry, given the `__init__.py` entries found
    /// while pre-scanning the archive.
    pub fn in_archive(entry: &str, inits: &BTreeSet<String>) -> Self {
        let path = Path::new(entry);
        let mut segments = Vec::new();
        let mut dir = path.parent();
        while let Some(d) = dir {
            let Some(name) = d.file_name().and_then(|n| n.to_str()) else {
                break;
            };
            let marker = format!("{}/__init__.py", d.to_string_lossy().replace('\\', "/"));
            if !inits.contains(&marker) {
                break;
            }
            segments.push(name.to_string());
            dir = d.parent();
        }
        Self::from_parts(segments, path)
    }

    fn from_parts(mut segments: Vec<String>, path: &Path) -> Self {
        segments.reverse();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let module = file_name.split('.').next().unwrap_or_default().to_string();
        Self {
            package: (!segments.is_empty()).then(|| segments.join(".")),
            module,
        }
    }
}

#[derive(Debug)]
pub struct PythonFileAnalyzer {
    path: PathBuf,
    constructs: Memo<ConstructMap>,
}

impl PythonFileAnalyzer {
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, AnalysisError> {
        Ok(Self {
            path: require_extension(path.into(), "py")?,
            constructs: Memo::default(),
        })
    }
}

impl FileAnalyzer for PythonFileAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn constructs(&self) -> Result<&ConstructMap, AnalysisError> {
        self.constructs.get_or_try_init(|| {
            let bytes = read_file(&self.path)?;
            let location = ModuleLocation::on_disk(&self.path);
            analyze_python_source(&String::from_utf8_lossy(&bytes), &location, &self.path)
        })
    }
}

/// Parses one module. The module construct's body is the concatenation of
/// its top-level statements other than class and function definitions.
pub fn analyze_python_source(
    source: &str,
    location: &ModuleLocation,
    path: &Path,
) -> Result<ConstructMap, AnalysisError> {
    let variant = select_grammar(source);
    let mut parser = Parser::new();
    parser
        .set_language(&tree_sitter_python::LANGUAGE.into())
        .map_err(|e| AnalysisError::grammar(path, e.to_string()))?;
    let tree = parser
        .parse(source, None)
        .ok_or_else(|| AnalysisError::grammar(path, "parser produced no tree"))?;
    let root = tree.root_node();
    if root.has_error() {
        return Err(AnalysisError::grammar(path, "syntax error"));
    }

    let mut walker = ModuleWalker {
        source,
        path,
        variant,
        resolver: PythonResolver::new(),
        constructs: ConstructMap::new(),
        emitted: Vec::new(),
    };
    walker.emit(
        PythonEvent::Module {
            package: location.package.as_deref(),
            name: &location.module,
        },
        "",
    )?;

    let mut statements = Vec::new();
    let mut cursor = root.walk();
    for child in root.named_children(&mut cursor) {
        match child.kind() {
            "function_definition" | "class_definition" | "decorated_definition" | "comment" => {}
            _ => statements.push(node_text(&child, source)),
        }
        walker.walk(child)?;
    }

    if let Some(module) = walker.resolver.module() {
        record(&mut walker.constructs, Arc::clone(module), statements.join("\n"));
    }
    Ok(walker.constructs)
}

struct ModuleWalker<'s, 'p> {
    source: &'s str,
    path: &'p Path,
    variant: GrammarVariant,
    resolver: PythonResolver,
    constructs: ConstructMap,
    emitted: Vec<Arc<ConstructId>>,
}

impl<'s> ModuleWalker<'s, '_> {
    fn walk(&mut self, node: Node<'_>) -> Result<(), AnalysisError> {
        match node.kind() {
            "class_definition" => {
                let name = field_text(&node, "name", self.source);
                let bases = node
                    .child_by_field_name("superclasses")
                    .map(|n| compact(node_text(&n, self.source)))
                    .unwrap_or_default();
                let bases = bases
                    .strip_prefix('(')
                    .and_then(|b| b.strip_suffix(')'))
                    .unwrap_or(&bases);
                self.emit(PythonEvent::ClassEnter { name, bases }, node_text(&node, self.source))?;
                self.walk_field(&node, "body")?;
                self.apply(PythonEvent::ClassExit)
            }
            "function_definition" => {
                let is_async = node.child(0).is_some_and(|c| c.kind() == "async");
                if is_async && self.variant == GrammarVariant::Legacy {
                    let line = node.start_position().row + 1;
                    return Err(AnalysisError::grammar(
                        self.path,
                        format!("async def at line {line} in a pre-3.5 module"),
                    ));
                }
                let name = field_text(&node, "name", self.source);
                let params = node
                    .child_by_field_name("parameters")
                    .map(|n| compact(node_text(&n, self.source)))
                    .unwrap_or_else(|| "()".to_string());
                self.emit(
                    PythonEvent::FunctionEnter {
                        name,
                        params: &params,
                    },
                    node_text(&node, self.source),
                )?;
                self.walk_field(&node, "body")?;
                self.apply(PythonEvent::FunctionExit)
            }
            _ => {
                let mut cursor = node.walk();
                let children: Vec<Node<'_>> = node.named_children(&mut cursor).collect();
                for child in children {
                    self.walk(child)?;
                }
                Ok(())
            }
        }
    }

    fn walk_field(&mut self, node: &Node<'_>, field: &str) -> Result<(), AnalysisError> {
        match node.child_by_field_name(field) {
            Some(body) => self.walk(body),
            None => Ok(()),
        }
    }

    fn apply(&mut self, event: PythonEvent<'_>) -> Result<(), AnalysisError> {
        self.resolver
            .apply(event, &mut self.emitted)
            .map_err(|e| AnalysisError::resolver(self.path, e))
    }

    /// Applies `event` and records every id it produced. Packages and the
    /// module get empty bodies here; the module body is filled in last.
    fn emit(&mut self, event: PythonEvent<'_>, body: &str) -> Result<(), AnalysisError> {
        self.apply(event)?;
        for id in std::mem::take(&mut self.emitted) {
            let text = match id.kind() {
                ConstructKind::Package | ConstructKind::Module => "",
                _ => body,
            };
            record(&mut self.constructs, id, text);
        }
        Ok(())
    }
}

fn node_text<'s>(node: &Node, source: &'s str) -> &'s str {
    node.utf8_text(source.as_bytes()).unwrap_or("")
}

fn field_text<'s>(node: &Node, field: &str, source: &'s str) -> &'s str {
    node.child_by_field_name(field)
        .map(|c| node_text(&c, source))
        .unwrap_or("")
}

/// Removes whitespace outside string literals: `(self, x = 1)` becomes
/// `(self,x=1)` while `(sep=" ")` keeps its space.
fn compact(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut quote: Option<char> = None;
    let mut escaped = false;
    for c in text.chars() {
        match quote {
            Some(q) => {
                out.push(c);
                if escaped {
                    escaped = false;
                } else if c == '\\' {
                    escaped = true;
                } else if c == q {
                    quote = None;
                }
            }
            None => match c {
                '"' | '\'' => {
                    quote = Some(c);
                    out.push(c);
                }
                c if c.is_whitespace() => {}
                c => out.push(c),
            },
        }
    }
    out
}
