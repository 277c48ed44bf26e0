//! Construct identifiers and constructs.
//!
//! A [`ConstructId`] is a tagged union over the kinds of program element the
//! analyzers know about. Definition contexts are shared through [`Arc`], so a
//! method id and the class id it hangs off point at the same allocation.
//!
//! Qualified names are always derived from the context chain:
//!
//! - Java classes join an enclosing type with `$` and a package with `.`
//! - Java constructors render as `C(params)`, methods as `C.m(params)`
//! - Python names always join with `.`
//!
//! Equality and hashing use `(language, kind, qualified name)`. Ordering is by
//! qualified name first so that [`ConstructMap`] iterates in name order.

use std::cmp::Ordering;
use std::collections::BTreeMap;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::error::IdError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Language {
    Java,
    Python,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Java => f.write_str("JAVA"),
            Language::Python => f.write_str("PY"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ConstructKind {
    Package,
    Module,
    Class,
    Interface,
    Enum,
    ClassInit,
    Constructor,
    Method,
    Function,
}

impl ConstructKind {
    pub fn tag(self) -> &'static str {
        match self {
            ConstructKind::Package => "PACK",
            ConstructKind::Module => "MODU",
            ConstructKind::Class => "CLAS",
            ConstructKind::Interface => "INTF",
            ConstructKind::Enum => "ENUM",
            ConstructKind::ClassInit => "INIT",
            ConstructKind::Constructor => "CONS",
            ConstructKind::Method => "METH",
            ConstructKind::Function => "FUNC",
        }
    }

    /// Resolves a kind tag within the tag set of `lang`.
    pub fn from_tag(lang: Language, tag: &str) -> Result<Self, IdError> {
        let kind = match (lang, tag) {
            (_, "PACK") => ConstructKind::Package,
            (_, "CLAS") => ConstructKind::Class,
            (_, "CONS") => ConstructKind::Constructor,
            (_, "METH") => ConstructKind::Method,
            (Language::Java, "INTF") => ConstructKind::Interface,
            (Language::Java, "ENUM") => ConstructKind::Enum,
            (Language::Java, "INIT") => ConstructKind::ClassInit,
            (Language::Python, "MODU") => ConstructKind::Module,
            (Language::Python, "FUNC") => ConstructKind::Function,
            _ => return Err(IdError::UnknownKindTag(tag.to_string())),
        };
        Ok(kind)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TypeKind {
    Class,
    Interface,
    Enum,
}

impl From<TypeKind> for ConstructKind {
    fn from(kind: TypeKind) -> Self {
        match kind {
            TypeKind::Class => ConstructKind::Class,
            TypeKind::Interface => ConstructKind::Interface,
            TypeKind::Enum => ConstructKind::Enum,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CallableKind {
    Constructor,
    Method,
    Function,
    ClassInit,
}

impl From<CallableKind> for ConstructKind {
    fn from(kind: CallableKind) -> Self {
        match kind {
            CallableKind::Constructor => ConstructKind::Constructor,
            CallableKind::Method => ConstructKind::Method,
            CallableKind::Function => ConstructKind::Function,
            CallableKind::ClassInit => ConstructKind::ClassInit,
        }
    }
}

#[derive(Debug, Clone)]
pub enum ConstructId {
    Package {
        lang: Language,
        name: String,
    },
    /// Python only.
    Module {
        context: Option<Arc<ConstructId>>,
        name: String,
    },
    Type {
        lang: Language,
        kind: TypeKind,
        context: Option<Arc<ConstructId>>,
        name: String,
    },
    /// Java callables keep their normalized parameter types in `params`.
    /// Python callables carry the literal signature inside `name`.
    Callable {
        lang: Language,
        kind: CallableKind,
        context: Arc<ConstructId>,
        name: String,
        params: Vec<String>,
    },
}

impl ConstructId {
    pub fn java_package(name: &str) -> Self {
        ConstructId::Package {
            lang: Language::Java,
            name: name.to_string(),
        }
    }

    pub fn java_type(
        kind: TypeKind,
        context: Option<Arc<ConstructId>>,
        name: &str,
    ) -> Result<Self, IdError> {
        if let Some(ctx) = &context {
            let valid = ctx.language() == Language::Java
                && matches!(**ctx, ConstructId::Package { .. } | ConstructId::Type { .. });
            if !valid {
                return Err(IdError::InvalidContext {
                    kind: kind.into(),
                    name: name.to_string(),
                });
            }
        }
        Ok(ConstructId::Type {
            lang: Language::Java,
            kind,
            context,
            name: name.to_string(),
        })
    }

    pub fn java_constructor<S: AsRef<str>>(
        class: Arc<ConstructId>,
        params: &[S],
    ) -> Result<Self, IdError> {
        let name = class.simple_name().to_string();
        Self::java_callable(CallableKind::Constructor, class, name, params)
    }

    pub fn java_method<S: AsRef<str>>(
        class: Arc<ConstructId>,
        name: &str,
        params: &[S],
    ) -> Result<Self, IdError> {
        Self::java_callable(CallableKind::Method, class, name.to_string(), params)
    }

    pub fn java_class_init(class: Arc<ConstructId>) -> Result<Self, IdError> {
        Self::java_callable::<&str>(CallableKind::ClassInit, class, "<clinit>".to_string(), &[])
    }

    fn java_callable<S: AsRef<str>>(
        kind: CallableKind,
        class: Arc<ConstructId>,
        name: String,
        params: &[S],
    ) -> Result<Self, IdError> {
        if kind == CallableKind::Function {
            return Err(IdError::KindNotSupported {
                lang: "Java",
                kind: kind.into(),
            });
        }
        let valid =
            class.language() == Language::Java && matches!(*class, ConstructId::Type { .. });
        if !valid {
            return Err(IdError::InvalidContext {
                kind: kind.into(),
                name,
            });
        }
        Ok(ConstructId::Callable {
            lang: Language::Java,
            kind,
            context: class,
            name,
            params: params
                .iter()
                .map(|p| normalize_param_type(p.as_ref()))
                .collect(),
        })
    }

    /// Builds a Python id. `name` is the full simple name, signature included
    /// for classes and functions.
    pub fn python(
        kind: ConstructKind,
        context: Option<Arc<ConstructId>>,
        name: &str,
    ) -> Result<Self, IdError> {
        let invalid = || IdError::InvalidContext {
            kind,
            name: name.to_string(),
        };
        if let Some(ctx) = &context
            && ctx.language() != Language::Python
        {
            return Err(invalid());
        }
        let name = name.to_string();
        match kind {
            ConstructKind::Package => match context {
                None => Ok(ConstructId::Package {
                    lang: Language::Python,
                    name,
                }),
                Some(_) => Err(IdError::PackageWithContext(name)),
            },
            ConstructKind::Module => match &context {
                None => Ok(ConstructId::Module { context, name }),
                Some(ctx) if matches!(**ctx, ConstructId::Package { .. }) => {
                    Ok(ConstructId::Module { context, name })
                }
                Some(_) => Err(invalid()),
            },
            ConstructKind::Class => match &context {
                Some(ctx) if !matches!(**ctx, ConstructId::Package { .. }) => {
                    Ok(ConstructId::Type {
                        lang: Language::Python,
                        kind: TypeKind::Class,
                        context,
                        name,
                    })
                }
                _ => Err(invalid()),
            },
            ConstructKind::Constructor | ConstructKind::Method | ConstructKind::Function => {
                let callable = match kind {
                    ConstructKind::Constructor => CallableKind::Constructor,
                    ConstructKind::Method => CallableKind::Method,
                    _ => CallableKind::Function,
                };
                match context {
                    Some(ctx) if !matches!(*ctx, ConstructId::Package { .. }) => {
                        Ok(ConstructId::Callable {
                            lang: Language::Python,
                            kind: callable,
                            context: ctx,
                            name,
                            params: Vec::new(),
                        })
                    }
                    _ => Err(invalid()),
                }
            }
            ConstructKind::Interface | ConstructKind::Enum | ConstructKind::ClassInit => {
                Err(IdError::KindNotSupported {
                    lang: "Python",
                    kind,
                })
            }
        }
    }

    /// Rebuilds a Java id from its kind tag and qualified name.
    pub fn parse_java(tag: &str, qname: &str) -> Result<Self, IdError> {
        let kind = ConstructKind::from_tag(Language::Java, tag)?;
        let malformed = |reason| IdError::Malformed {
            qname: qname.to_string(),
            reason,
        };
        match kind {
            ConstructKind::Package => Ok(Self::java_package(qname)),
            ConstructKind::Class => parse_java_type(qname, TypeKind::Class),
            ConstructKind::Interface => parse_java_type(qname, TypeKind::Interface),
            ConstructKind::Enum => parse_java_type(qname, TypeKind::Enum),
            ConstructKind::ClassInit => {
                let class = qname
                    .strip_suffix(".<clinit>")
                    .ok_or_else(|| malformed("missing .<clinit> suffix"))?;
                Self::java_class_init(Arc::new(parse_java_type(class, TypeKind::Class)?))
            }
            ConstructKind::Constructor => {
                let (head, params) = split_signature(qname)?;
                let class = Arc::new(parse_java_type(head, TypeKind::Class)?);
                Self::java_constructor(class, &params)
            }
            ConstructKind::Method => {
                let (head, params) = split_signature(qname)?;
                let dot = head.rfind('.').ok_or_else(|| malformed("method without class"))?;
                let name = &head[dot + 1..];
                if name.is_empty() {
                    return Err(malformed("empty method name"));
                }
                let class = Arc::new(parse_java_type(&head[..dot], TypeKind::Class)?);
                Self::java_method(class, name, &params)
            }
            ConstructKind::Module | ConstructKind::Function => Err(IdError::KindNotSupported {
                lang: "Java",
                kind,
            }),
        }
    }

    pub fn language(&self) -> Language {
        match self {
            ConstructId::Package { lang, .. }
            | ConstructId::Type { lang, .. }
            | ConstructId::Callable { lang, .. } => *lang,
            ConstructId::Module { .. } => Language::Python,
        }
    }

    pub fn kind(&self) -> ConstructKind {
        match self {
            ConstructId::Package { .. } => ConstructKind::Package,
            ConstructId::Module { .. } => ConstructKind::Module,
            ConstructId::Type { kind, .. } => (*kind).into(),
            ConstructId::Callable { kind, .. } => (*kind).into(),
        }
    }

    pub fn simple_name(&self) -> &str {
        match self {
            ConstructId::Package { name, .. }
            | ConstructId::Module { name, .. }
            | ConstructId::Type { name, .. }
            | ConstructId::Callable { name, .. } => name,
        }
    }

    pub fn context(&self) -> Option<&Arc<ConstructId>> {
        match self {
            ConstructId::Package { .. } => None,
            ConstructId::Module { context, .. } | ConstructId::Type { context, .. } => {
                context.as_ref()
            }
            ConstructId::Callable { context, .. } => Some(context),
        }
    }

    /// Java callables only; empty otherwise.
    pub fn params(&self) -> &[String] {
        match self {
            ConstructId::Callable { params, .. } => params,
            _ => &[],
        }
    }

    pub fn is_type(&self) -> bool {
        matches!(self, ConstructId::Type { .. })
    }

    pub fn qualified_name(&self) -> String {
        match self {
            ConstructId::Package { name, .. } => name.clone(),
            ConstructId::Module { context, name } => dotted(context.as_deref(), name),
            ConstructId::Type {
                lang: Language::Python,
                context,
                name,
                ..
            } => dotted(context.as_deref(), name),
            ConstructId::Type {
                lang: Language::Java,
                context,
                name,
                ..
            } => match context.as_deref() {
                Some(ctx @ ConstructId::Type { .. }) => {
                    format!("{}${name}", ctx.qualified_name())
                }
                other => dotted(other, name),
            },
            ConstructId::Callable {
                lang: Language::Python,
                context,
                name,
                ..
            } => format!("{}.{name}", context.qualified_name()),
            ConstructId::Callable {
                lang: Language::Java,
                kind,
                context,
                name,
                params,
            } => match kind {
                CallableKind::Constructor => {
                    format!("{}({})", context.qualified_name(), params.join(","))
                }
                CallableKind::ClassInit => format!("{}.<clinit>", context.qualified_name()),
                CallableKind::Method | CallableKind::Function => {
                    format!("{}.{name}({})", context.qualified_name(), params.join(","))
                }
            },
        }
    }

    /// The Java package this id lives in, following the context chain.
    pub fn enclosing_package(&self) -> Option<&ConstructId> {
        match self {
            ConstructId::Package {
                lang: Language::Java,
                ..
            } => Some(self),
            other => other.context().and_then(|ctx| ctx.enclosing_package()),
        }
    }
}

fn dotted(context: Option<&ConstructId>, name: &str) -> String {
    match context {
        Some(ctx) => {
            let prefix = ctx.qualified_name();
            if prefix.is_empty() {
                name.to_string()
            } else {
                format!("{prefix}.{name}")
            }
        }
        None => name.to_string(),
    }
}

fn parse_java_type(qname: &str, kind: TypeKind) -> Result<ConstructId, IdError> {
    let malformed = |reason| IdError::Malformed {
        qname: qname.to_string(),
        reason,
    };
    let (package, class) = match qname.rfind('.') {
        Some(dot) => (&qname[..dot], &qname[dot + 1..]),
        None => ("", qname),
    };
    let mut context = if package.is_empty() {
        None
    } else {
        Some(Arc::new(ConstructId::java_package(package)))
    };
    let segments: Vec<&str> = class.split('$').collect();
    if segments.iter().any(|s| s.is_empty()) {
        return Err(malformed("empty class name segment"));
    }
    let last = segments.len() - 1;
    for (i, segment) in segments.iter().enumerate() {
        let segment_kind = if i == last { kind } else { TypeKind::Class };
        let id = ConstructId::java_type(segment_kind, context.take(), segment)?;
        if i == last {
            return Ok(id);
        }
        context = Some(Arc::new(id));
    }
    Err(malformed("empty class name"))
}

fn split_signature(qname: &str) -> Result<(&str, Vec<String>), IdError> {
    let malformed = |reason| IdError::Malformed {
        qname: qname.to_string(),
        reason,
    };
    let open = qname.find('(').ok_or_else(|| malformed("missing parameter list"))?;
    let inner = qname[open + 1..]
        .strip_suffix(')')
        .ok_or_else(|| malformed("unterminated parameter list"))?;
    Ok((&qname[..open], split_params(inner)))
}

/// Splits a comma separated parameter list, ignoring commas nested inside
/// generic brackets.
pub fn split_params(list: &str) -> Vec<String> {
    let mut params = Vec::new();
    let mut depth = 0usize;
    let mut current = String::new();
    for c in list.chars() {
        match c {
            '<' => {
                depth += 1;
                current.push(c);
            }
            '>' => {
                depth = depth.saturating_sub(1);
                current.push(c);
            }
            ',' if depth == 0 => {
                params.push(std::mem::take(&mut current));
            }
            c if c.is_whitespace() => {}
            _ => current.push(c),
        }
    }
    if !current.is_empty() || !params.is_empty() {
        params.push(current);
    }
    params
}

/// Canonical form of a Java parameter type: generic arguments and package
/// qualification removed, varargs written as an array.
///
/// `java.util.Map$Entry<K,V>` and `Map.Entry` both become `Entry`;
/// `int[]` stays `int[]`.
pub fn normalize_param_type(raw: &str) -> String {
    let mut erased = String::with_capacity(raw.len());
    let mut depth = 0usize;
    for c in raw.chars() {
        match c {
            '<' => depth += 1,
            '>' => depth = depth.saturating_sub(1),
            c if c.is_whitespace() => {}
            c if depth == 0 => erased.push(c),
            _ => {}
        }
    }
    let erased = match erased.strip_suffix("...") {
        Some(base) => format!("{base}[]"),
        None => erased,
    };
    let simple = erased.rsplit('.').next().unwrap_or(&erased);
    let simple = simple.rsplit('$').next().unwrap_or(simple);
    simple.to_string()
}

impl PartialEq for ConstructId {
    fn eq(&self, other: &Self) -> bool {
        self.language() == other.language()
            && self.kind() == other.kind()
            && self.qualified_name() == other.qualified_name()
    }
}

impl Eq for ConstructId {}

impl Hash for ConstructId {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.language().hash(state);
        self.kind().hash(state);
        self.qualified_name().hash(state);
    }
}

impl PartialOrd for ConstructId {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ConstructId {
    fn cmp(&self, other: &Self) -> Ordering {
        self.qualified_name()
            .cmp(&other.qualified_name())
            .then_with(|| self.language().cmp(&other.language()))
            .then_with(|| self.kind().cmp(&other.kind()))
    }
}

impl fmt::Display for ConstructId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}|{}|{}]",
            self.language(),
            self.kind().tag(),
            self.qualified_name()
        )
    }
}

impl Serialize for ConstructId {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("ConstructId", 3)?;
        s.serialize_field("lang", &self.language())?;
        s.serialize_field("type", self.kind().tag())?;
        s.serialize_field("qname", &self.qualified_name())?;
        s.end()
    }
}

/// A construct id paired with the literal text of its declaration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Construct {
    pub id: Arc<ConstructId>,
    pub body: String,
}

pub type ConstructMap = BTreeMap<Arc<ConstructId>, Construct>;

/// Inserts a construct, replacing any earlier construct with the same id.
///
/// Overloads that differ only in generic arguments collapse to one id after
/// normalization; the later declaration wins.
pub fn record(map: &mut ConstructMap, id: Arc<ConstructId>, body: impl Into<String>) {
    let construct = Construct {
        id: Arc::clone(&id),
        body: body.into(),
    };
    if let Some(previous) = map.insert(id, construct) {
        tracing::debug!(construct = %previous.id, "construct overwritten by a later declaration");
    }
}
