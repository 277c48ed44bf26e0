//! Nested-declaration resolver.
//!
//! Parsers do not talk to the resolver through a visitor. They translate their
//! tree into a flat stream of [`JavaEvent`]s (or [`PythonEvent`]s) and feed
//! them one by one; the resolver owns the context stack and the per-file
//! counters and answers each event with the id it assigned, if any.
//!
//! Naming follows what `javac` emits for class files:
//!
//! - anonymous classes are numbered `1`, `2`, ... per enclosing type
//! - method-local classes get a counter prefix per (enclosing type, name),
//!   so `Foo` declared in two methods becomes `1Foo` and `2Foo`
//! - the enclosing type, never the method, is the definition context

use std::collections::HashMap;
use std::sync::Arc;

use crate::construct::{ConstructId, ConstructKind, TypeKind};
use crate::error::ResolveError;

/// Open declarations, innermost last.
#[derive(Debug, Default)]
pub struct ContextStack {
    frames: Vec<Arc<ConstructId>>,
}

impl ContextStack {
    pub fn push(&mut self, id: Arc<ConstructId>) {
        self.frames.push(id);
    }

    /// Pops the top frame, requiring it to be one of `kinds`.
    pub fn pop_expecting(
        &mut self,
        kinds: &[ConstructKind],
        expected: &'static str,
    ) -> Result<Arc<ConstructId>, ResolveError> {
        let top = self
            .frames
            .last()
            .ok_or(ResolveError::StackUnderflow(expected))?;
        if !kinds.contains(&top.kind()) {
            return Err(ResolveError::UnexpectedContext {
                expected,
                found: top.to_string(),
            });
        }
        self.frames.pop().ok_or(ResolveError::StackUnderflow(expected))
    }

    pub fn top(&self) -> Option<&Arc<ConstructId>> {
        self.frames.last()
    }

    pub fn top_kind(&self) -> Option<ConstructKind> {
        self.top().map(|id| id.kind())
    }

    /// Innermost frame whose kind is one of `kinds`.
    pub fn nearest(&self, kinds: &[ConstructKind]) -> Option<&Arc<ConstructId>> {
        self.frames.iter().rev().find(|id| kinds.contains(&id.kind()))
    }

    pub fn depth(&self) -> usize {
        self.frames.len()
    }
}

/// Per-file naming counters, dropped with the resolver.
#[derive(Debug, Default)]
pub struct NameCounters {
    anonymous: HashMap<Arc<ConstructId>, u32>,
    named: HashMap<(Arc<ConstructId>, String), u32>,
}

impl NameCounters {
    /// Returns the next anonymous class number for `context`, starting at 1.
    pub fn next_anonymous(&mut self, context: &Arc<ConstructId>) -> u32 {
        let slot = self.anonymous.entry(Arc::clone(context)).or_insert(1);
        let value = *slot;
        *slot += 1;
        value
    }

    /// Returns the next occurrence number of `name` within `context`,
    /// starting at 1.
    pub fn next_named(&mut self, context: &Arc<ConstructId>, name: &str) -> u32 {
        let slot = self
            .named
            .entry((Arc::clone(context), name.to_string()))
            .or_insert(1);
        let value = *slot;
        *slot += 1;
        value
    }
}

const TYPE_KINDS: &[ConstructKind] = &[
    ConstructKind::Class,
    ConstructKind::Interface,
    ConstructKind::Enum,
];

const SCOPE_KINDS: &[ConstructKind] = &[
    ConstructKind::Package,
    ConstructKind::Class,
    ConstructKind::Interface,
    ConstructKind::Enum,
];

const CALLABLE_KINDS: &[ConstructKind] = &[ConstructKind::Method, ConstructKind::Constructor];

/// Declaration events of a Java compilation unit, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JavaEvent<'a> {
    Package(&'a str),
    /// A class (or record) declaration with an explicit name; its body
    /// follows as `ClassBodyEnter`.
    ClassDeclaration(&'a str),
    /// Any class body, named or anonymous.
    ClassBodyEnter,
    ClassBodyExit,
    TypeEnter { kind: TypeKind, name: &'a str },
    TypeExit(TypeKind),
    MethodEnter { name: &'a str, params: Vec<String> },
    ConstructorEnter { params: Vec<String> },
    CallableExit,
}

/// State machine assigning ids to Java declarations.
#[derive(Debug, Default)]
pub struct JavaResolver {
    stack: ContextStack,
    counters: NameCounters,
    declared_name: Option<String>,
    package_seen: bool,
}

impl JavaResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. Returns the id of a declaration that should be
    /// materialized as a construct; interfaces and exits return `None`.
    pub fn apply(&mut self, event: JavaEvent<'_>) -> Result<Option<Arc<ConstructId>>, ResolveError> {
        match event {
            JavaEvent::Package(name) => {
                if self.package_seen {
                    return Err(ResolveError::DuplicatePackage(name.to_string()));
                }
                self.package_seen = true;
                let id = Arc::new(ConstructId::java_package(name));
                self.stack.push(Arc::clone(&id));
                Ok(Some(id))
            }
            JavaEvent::ClassDeclaration(name) => {
                self.declared_name = Some(name.to_string());
                Ok(None)
            }
            JavaEvent::ClassBodyEnter => {
                let declared = self.declared_name.take();
                let id = match declared {
                    None => self.anonymous_class()?,
                    Some(name) => self.named_type(TypeKind::Class, &name)?,
                };
                let id = Arc::new(id);
                self.stack.push(Arc::clone(&id));
                Ok(Some(id))
            }
            JavaEvent::ClassBodyExit => {
                self.declared_name = None;
                self.stack
                    .pop_expecting(&[ConstructKind::Class], "CLASS")?;
                Ok(None)
            }
            JavaEvent::TypeEnter { kind, name } => {
                let id = Arc::new(self.named_type(kind, name)?);
                self.stack.push(Arc::clone(&id));
                match kind {
                    TypeKind::Interface => Ok(None),
                    TypeKind::Class | TypeKind::Enum => Ok(Some(id)),
                }
            }
            JavaEvent::TypeExit(kind) => {
                let (kinds, expected): (&[ConstructKind], &'static str) = match kind {
                    TypeKind::Interface => (&[ConstructKind::Interface], "INTERFACE"),
                    TypeKind::Enum => (&[ConstructKind::Enum], "ENUM"),
                    TypeKind::Class => (&[ConstructKind::Class], "CLASS"),
                };
                self.stack.pop_expecting(kinds, expected)?;
                Ok(None)
            }
            JavaEvent::MethodEnter { name, params } => {
                let class = self.enclosing_class_or_enum()?;
                let id = Arc::new(ConstructId::java_method(class, name, &params)?);
                self.stack.push(Arc::clone(&id));
                Ok(Some(id))
            }
            JavaEvent::ConstructorEnter { params } => {
                let class = self.enclosing_class_or_enum()?;
                let id = Arc::new(ConstructId::java_constructor(class, &params)?);
                self.stack.push(Arc::clone(&id));
                Ok(Some(id))
            }
            JavaEvent::CallableExit => {
                self.stack
                    .pop_expecting(CALLABLE_KINDS, "METHOD or CONSTRUCTOR")?;
                Ok(None)
            }
        }
    }

    pub fn depth(&self) -> usize {
        self.stack.depth()
    }

    fn anonymous_class(&mut self) -> Result<ConstructId, ResolveError> {
        let context = self
            .stack
            .nearest(TYPE_KINDS)
            .cloned()
            .ok_or_else(|| ResolveError::NoEnclosingType("anonymous class".to_string()))?;
        let n = self.counters.next_anonymous(&context);
        Ok(ConstructId::java_type(TypeKind::Class, Some(context), &n.to_string())?)
    }

    fn named_type(&mut self, kind: TypeKind, name: &str) -> Result<ConstructId, ResolveError> {
        if self.stack.top_kind().is_some_and(|k| CALLABLE_KINDS.contains(&k)) {
            let context = self
                .stack
                .nearest(TYPE_KINDS)
                .cloned()
                .ok_or_else(|| ResolveError::NoEnclosingType(name.to_string()))?;
            let n = self.counters.next_named(&context, name);
            return Ok(ConstructId::java_type(kind, Some(context), &format!("{n}{name}"))?);
        }
        let context = self.stack.nearest(SCOPE_KINDS).cloned();
        Ok(ConstructId::java_type(kind, context, name)?)
    }

    fn enclosing_class_or_enum(&self) -> Result<Arc<ConstructId>, ResolveError> {
        match self.stack.top() {
            Some(top) if matches!(top.kind(), ConstructKind::Class | ConstructKind::Enum) => {
                Ok(Arc::clone(top))
            }
            Some(top) => Err(ResolveError::UnexpectedContext {
                expected: "CLASS or ENUM",
                found: top.to_string(),
            }),
            None => Err(ResolveError::UnexpectedContext {
                expected: "CLASS or ENUM",
                found: "empty stack".to_string(),
            }),
        }
    }
}

/// Declaration events of a Python module, in source order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PythonEvent<'a> {
    /// Opens the module; `package` is absent for top-level modules.
    Module {
        package: Option<&'a str>,
        name: &'a str,
    },
    ClassEnter { name: &'a str, bases: &'a str },
    ClassExit,
    FunctionEnter { name: &'a str, params: &'a str },
    FunctionExit,
}

/// Python counterpart of [`JavaResolver`]. The module stands in for both the
/// package and the outer class; repeated function names in one context get a
/// `$n` suffix from the second occurrence on.
#[derive(Debug, Default)]
pub struct PythonResolver {
    stack: ContextStack,
    counters: NameCounters,
    module: Option<Arc<ConstructId>>,
}

impl PythonResolver {
    pub fn new() -> Self {
        Self::default()
    }

    /// Applies one event. `Module` may yield two ids (package and module);
    /// they are returned through `emitted`.
    pub fn apply(
        &mut self,
        event: PythonEvent<'_>,
        emitted: &mut Vec<Arc<ConstructId>>,
    ) -> Result<(), ResolveError> {
        match event {
            PythonEvent::Module { package, name } => {
                if let Some(module) = &self.module {
                    return Err(ResolveError::DuplicatePackage(module.qualified_name()));
                }
                let package = match package.filter(|p| !p.is_empty()) {
                    Some(p) => {
                        let id = Arc::new(ConstructId::python(ConstructKind::Package, None, p)?);
                        self.stack.push(Arc::clone(&id));
                        emitted.push(Arc::clone(&id));
                        Some(id)
                    }
                    None => None,
                };
                let module = Arc::new(ConstructId::python(ConstructKind::Module, package, name)?);
                self.stack.push(Arc::clone(&module));
                self.module = Some(Arc::clone(&module));
                emitted.push(module);
            }
            PythonEvent::ClassEnter { name, bases } => {
                let context = self.innermost_open()?;
                let id = Arc::new(ConstructId::python(
                    ConstructKind::Class,
                    Some(context),
                    &format!("{name}({bases})"),
                )?);
                self.stack.push(Arc::clone(&id));
                emitted.push(id);
            }
            PythonEvent::ClassExit => {
                self.stack.pop_expecting(&[ConstructKind::Class], "CLASS")?;
            }
            PythonEvent::FunctionEnter { name, params } => {
                let context = self.innermost_open()?;
                let n = self.counters.next_named(&context, name);
                let unique = if n > 1 {
                    format!("{name}${n}")
                } else {
                    name.to_string()
                };
                let kind = match context.kind() {
                    ConstructKind::Class if unique == "__init__" => ConstructKind::Constructor,
                    ConstructKind::Class => ConstructKind::Method,
                    _ => ConstructKind::Function,
                };
                let id = Arc::new(ConstructId::python(
                    kind,
                    Some(context),
                    &format!("{unique}{params}"),
                )?);
                self.stack.push(Arc::clone(&id));
                emitted.push(id);
            }
            PythonEvent::FunctionExit => {
                self.stack.pop_expecting(
                    &[
                        ConstructKind::Function,
                        ConstructKind::Method,
                        ConstructKind::Constructor,
                    ],
                    "FUNCTION",
                )?;
            }
        }
        Ok(())
    }

    /// The module id, once the `Module` event has been applied.
    pub fn module(&self) -> Option<&Arc<ConstructId>> {
        self.module.as_ref()
    }

    /// True while no class or function is open.
    pub fn at_module_level(&self) -> bool {
        self.stack.top_kind() == Some(ConstructKind::Module)
    }

    fn innermost_open(&self) -> Result<Arc<ConstructId>, ResolveError> {
        match self.stack.top() {
            Some(top) if top.kind() != ConstructKind::Package => Ok(Arc::clone(top)),
            Some(top) => Err(ResolveError::UnexpectedContext {
                expected: "MODULE, CLASS or FUNCTION",
                found: top.to_string(),
            }),
            None => Err(ResolveError::UnexpectedContext {
                expected: "MODULE",
                found: "empty stack".to_string(),
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn qnames(ids: &[Option<Arc<ConstructId>>]) -> Vec<String> {
        ids.iter().flatten().map(|id| id.qualified_name()).collect()
    }

    fn run(events: Vec<JavaEvent<'_>>) -> Result<Vec<String>, ResolveError> {
        let mut resolver = JavaResolver::new();
        let mut out = Vec::new();
        for event in events {
            out.push(resolver.apply(event)?);
        }
        Ok(qnames(&out))
    }

    fn method(name: &str) -> JavaEvent<'_> {
        JavaEvent::MethodEnter {
            name,
            params: vec!["String".to_string()],
        }
    }

    #[test]
    fn anonymous_classes_are_numbered_per_enclosing_class() {
        use JavaEvent::*;
        let names = run(vec![
            Package("p"),
            ClassDeclaration("Outer"),
            ClassBodyEnter,
            ClassBodyEnter,
            method("run"),
            CallableExit,
            ClassBodyExit,
            ClassBodyEnter,
            ClassBodyExit,
            ClassDeclaration("Inner"),
            ClassBodyEnter,
            ClassBodyEnter,
            ClassBodyExit,
            ClassBodyExit,
            ClassBodyExit,
        ])
        .unwrap();
        assert_eq!(
            names,
            vec![
                "p",
                "p.Outer",
                "p.Outer$1",
                "p.Outer$1.run(String)",
                "p.Outer$2",
                "p.Outer$Inner",
                "p.Outer$Inner$1",
            ]
        );
    }

    #[test]
    fn method_local_classes_use_separate_counter() {
        use JavaEvent::*;
        let names = run(vec![
            Package("p"),
            ClassDeclaration("Outer"),
            ClassBodyEnter,
            method("a"),
            ClassDeclaration("Foo"),
            ClassBodyEnter,
            ClassBodyExit,
            ClassBodyEnter,
            ClassBodyExit,
            CallableExit,
            method("b"),
            ClassDeclaration("Foo"),
            ClassBodyEnter,
            ClassBodyEnter,
            ClassBodyExit,
            ClassBodyExit,
            CallableExit,
            ClassBodyExit,
        ])
        .unwrap();
        assert_eq!(
            names,
            vec![
                "p",
                "p.Outer",
                "p.Outer.a(String)",
                "p.Outer$1Foo",
                "p.Outer$1",
                "p.Outer.b(String)",
                "p.Outer$2Foo",
                "p.Outer$2Foo$1",
            ]
        );
    }

    #[test]
    fn enum_constant_bodies_are_anonymous_classes_of_the_enum() {
        use JavaEvent::*;
        let names = run(vec![
            TypeEnter {
                kind: TypeKind::Enum,
                name: "Color",
            },
            ClassBodyEnter,
            method("label"),
            CallableExit,
            ClassBodyExit,
            ConstructorEnter { params: vec!["int".to_string()] },
            CallableExit,
            TypeExit(TypeKind::Enum),
        ])
        .unwrap();
        assert_eq!(
            names,
            vec!["Color", "Color$1", "Color$1.label(String)", "Color(int)"]
        );
    }

    #[test]
    fn interfaces_are_pushed_but_not_materialized() {
        use JavaEvent::*;
        let mut resolver = JavaResolver::new();
        resolver.apply(Package("p")).unwrap();
        let iface = resolver
            .apply(TypeEnter {
                kind: TypeKind::Interface,
                name: "Api",
            })
            .unwrap();
        assert!(iface.is_none());
        let nested = resolver.apply(ClassDeclaration("Impl")).unwrap();
        assert!(nested.is_none());
        let nested = resolver.apply(ClassBodyEnter).unwrap().unwrap();
        assert_eq!(nested.qualified_name(), "p.Api$Impl");
        resolver.apply(ClassBodyExit).unwrap();

        let err = resolver.apply(method("call")).unwrap_err();
        assert!(matches!(err, ResolveError::UnexpectedContext { .. }));
    }

    #[test]
    fn mismatched_exit_is_fatal() {
        use JavaEvent::*;
        let err = run(vec![
            ClassDeclaration("A"),
            ClassBodyEnter,
            method("m"),
            ClassBodyExit,
        ])
        .unwrap_err();
        assert!(matches!(err, ResolveError::UnexpectedContext { .. }));

        let err = run(vec![ClassBodyExit]).unwrap_err();
        assert!(matches!(err, ResolveError::StackUnderflow(_)));
    }

    #[test]
    fn anonymous_class_without_enclosing_type_is_fatal() {
        let err = run(vec![JavaEvent::Package("p"), JavaEvent::ClassBodyEnter]).unwrap_err();
        assert!(matches!(err, ResolveError::NoEnclosingType(_)));
    }

    #[test]
    fn second_package_is_rejected() {
        let err = run(vec![JavaEvent::Package("a"), JavaEvent::Package("b")]).unwrap_err();
        assert!(matches!(err, ResolveError::DuplicatePackage(_)));
    }

    #[test]
    fn default_package_top_level_class() {
        let names = run(vec![
            JavaEvent::ClassDeclaration("Main"),
            JavaEvent::ClassBodyEnter,
            JavaEvent::ConstructorEnter { params: vec![] },
            JavaEvent::CallableExit,
            JavaEvent::ClassBodyExit,
        ])
        .unwrap();
        assert_eq!(names, vec!["Main", "Main()"]);
    }

    #[test]
    fn name_counters_start_at_one_and_are_independent() {
        let mut counters = NameCounters::default();
        let a = Arc::new(ConstructId::java_type(TypeKind::Class, None, "A").unwrap());
        let b = Arc::new(ConstructId::java_type(TypeKind::Class, None, "B").unwrap());
        assert_eq!(counters.next_anonymous(&a), 1);
        assert_eq!(counters.next_anonymous(&a), 2);
        assert_eq!(counters.next_anonymous(&b), 1);
        assert_eq!(counters.next_named(&a, "Foo"), 1);
        assert_eq!(counters.next_named(&a, "Bar"), 1);
        assert_eq!(counters.next_named(&a, "Foo"), 2);
        assert_eq!(counters.next_anonymous(&a), 3);
    }

    #[test]
    fn python_functions_methods_and_constructors() {
        use PythonEvent::*;
        let mut resolver = PythonResolver::new();
        let mut out = Vec::new();
        let events = vec![
            Module {
                package: Some("pkg"),
                name: "mod",
            },
            FunctionEnter {
                name: "helper",
                params: "(x)",
            },
            FunctionExit,
            FunctionEnter {
                name: "helper",
                params: "(x,y)",
            },
            FunctionExit,
            ClassEnter {
                name: "Foo",
                bases: "Base",
            },
            FunctionEnter {
                name: "__init__",
                params: "(self)",
            },
            FunctionEnter {
                name: "inner",
                params: "()",
            },
            FunctionExit,
            FunctionExit,
            FunctionEnter {
                name: "run",
                params: "(self)",
            },
            FunctionExit,
            ClassExit,
        ];
        for event in events {
            resolver.apply(event, &mut out).unwrap();
        }
        let names: Vec<(String, &str)> = out
            .iter()
            .map(|id| (id.qualified_name(), id.kind().tag()))
            .collect();
        assert_eq!(
            names,
            vec![
                ("pkg".to_string(), "PACK"),
                ("pkg.mod".to_string(), "MODU"),
                ("pkg.mod.helper(x)".to_string(), "FUNC"),
                ("pkg.mod.helper$2(x,y)".to_string(), "FUNC"),
                ("pkg.mod.Foo(Base)".to_string(), "CLAS"),
                ("pkg.mod.Foo(Base).__init__(self)".to_string(), "CONS"),
                ("pkg.mod.Foo(Base).__init__(self).inner()".to_string(), "FUNC"),
                ("pkg.mod.Foo(Base).run(self)".to_string(), "METH"),
            ]
        );
        assert!(resolver.at_module_level());
    }

    #[test]
    fn python_exit_mismatch_is_fatal() {
        let mut resolver = PythonResolver::new();
        let mut out = Vec::new();
        resolver
            .apply(
                PythonEvent::Module {
                    package: None,
                    name: "m",
                },
                &mut out,
            )
            .unwrap();
        let err = resolver.apply(PythonEvent::ClassExit, &mut out).unwrap_err();
        assert!(matches!(err, ResolveError::UnexpectedContext { .. }));
    }
}
