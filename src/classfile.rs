//! Compiled class analysis.
//!
//! Only the parts of the class-file format needed to name constructs are
//! decoded: the constant pool, access flags, method names and descriptors,
//! and the `InnerClasses` and `EnclosingMethod` attributes. Bodies of bytecode constructs are empty.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::analyzer::{FileAnalyzer, Memo, read_file, require_extension};
use crate::construct::{ConstructId, ConstructMap, record};
use crate::error::{AnalysisError, ClassFormatError, IdError, ResolveError};

const MAGIC: u32 = 0xCAFE_BABE;

pub const ACC_STATIC: u16 = 0x0008;
pub const ACC_INTERFACE: u16 = 0x0200;
pub const ACC_SYNTHETIC: u16 = 0x1000;
pub const ACC_ENUM: u16 = 0x4000;

/// Name and ordinal that javac prepends to every enum constructor.
const ENUM_CONSTRUCTOR_PREFIX: [&str; 2] = ["java.lang.String", "int"];

#[derive(Debug)]
pub struct ClassFileAnalyzer {
    path: PathBuf,
    constructs: Memo<ConstructMap>,
}

impl ClassFileAnalyzer {
    pub fn bind(path: impl Into<PathBuf>) -> Result<Self, AnalysisError> {
        Ok(Self {
            path: require_extension(path.into(), "class")?,
            constructs: Memo::default(),
        })
    }
}

impl FileAnalyzer for ClassFileAnalyzer {
    fn path(&self) -> &Path {
        &self.path
    }

    fn constructs(&self) -> Result<&ConstructMap, AnalysisError> {
        self.constructs
            .get_or_try_init(|| analyze_class_bytes(&read_file(&self.path)?, &self.path))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MethodInfo {
    pub access: u16,
    pub name: String,
    pub descriptor: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InnerClassInfo {
    pub inner: String,
    pub outer: Option<String>,
    pub access: u16,
}

/// Decoded view of a class file. Class names use the internal `/` form.
#[derive(Debug, Clone)]
pub struct ClassFile {
    pub access: u16,
    pub this_class: String,
    pub methods: Vec<MethodInfo>,
    pub inner_classes: Vec<InnerClassInfo>,
    /// Class named by `EnclosingMethod`, set for local and anonymous classes.
    pub enclosing_class: Option<String>,
}

impl ClassFile {
    pub fn is_interface(&self) -> bool {
        self.access & ACC_INTERFACE != 0
    }

    pub fn is_enum(&self) -> bool {
        self.access & ACC_ENUM != 0
    }

    /// Declaring class of a nested class, with its effective access flags.
    ///
    /// Member classes name it in `InnerClasses`; local and anonymous classes
    /// leave that slot empty and name it in `EnclosingMethod` instead.
    pub fn declaring_class(&self) -> Option<(&str, u16)> {
        let entry = self.inner_classes.iter().find(|ic| ic.inner == self.this_class);
        if let Some(member) = entry.and_then(|ic| ic.outer.as_deref().map(|outer| (outer, ic.access))) {
            return Some(member);
        }
        self.enclosing_class
            .as_deref()
            .map(|outer| (outer, entry.map_or(0, |ic| ic.access)))
    }
}

/// Builds the construct map of one compiled class.
///
/// Interfaces yield nothing. Classes and enums yield their package, the type
/// itself, `<clinit>` when a class has a static initializer, constructors and
/// non-synthetic methods.
pub fn analyze_class_bytes(bytes: &[u8], path: &Path) -> Result<ConstructMap, AnalysisError> {
    let class = parse_class_file(bytes).map_err(|source| AnalysisError::ClassFormat {
        path: path.to_path_buf(),
        source,
    })?;
    let mut map = ConstructMap::new();
    if class.is_interface() {
        return Ok(map);
    }
    build_constructs(&class, &mut map, path)?;
    Ok(map)
}

fn build_constructs(
    class: &ClassFile,
    map: &mut ConstructMap,
    path: &Path,
) -> Result<(), AnalysisError> {
    let id_error = |e: IdError| AnalysisError::resolver(path, ResolveError::Id(e));
    let format_error = |source| AnalysisError::ClassFormat {
        path: path.to_path_buf(),
        source,
    };
    let binary_name = class.this_class.replace('/', ".");
    let tag = if class.is_enum() { "ENUM" } else { "CLAS" };
    let class_id = Arc::new(ConstructId::parse_java(tag, &binary_name).map_err(id_error)?);

    if let Some(package) = class_id.enclosing_package()
        && !package.simple_name().is_empty()
    {
        record(map, Arc::new(package.clone()), "");
    }
    record(map, Arc::clone(&class_id), "");

    let outer_param = match class.declaring_class() {
        Some((outer, access)) if access & ACC_STATIC == 0 => Some(simple_type_name(outer)),
        _ => None,
    };

    for method in &class.methods {
        if method.access & ACC_SYNTHETIC != 0 {
            continue;
        }
        match method.name.as_str() {
            "<clinit>" => {
                if !class.is_enum() {
                    let id =
                        ConstructId::java_class_init(Arc::clone(&class_id)).map_err(id_error)?;
                    record(map, Arc::new(id), "");
                }
            }
            "<init>" => {
                let mut params = descriptor_params(&method.descriptor).map_err(format_error)?;
                if let Some(outer) = &outer_param
                    && params.first().is_some_and(|p| simple_type_name(p) == *outer)
                {
                    params.remove(0);
                }
                if class.is_enum()
                    && params.len() >= 2
                    && params[..2] == ENUM_CONSTRUCTOR_PREFIX
                {
                    params.drain(..2);
                }
                let id = ConstructId::java_constructor(Arc::clone(&class_id), &params)
                    .map_err(id_error)?;
                record(map, Arc::new(id), "");
            }
            name => {
                let params = descriptor_params(&method.descriptor).map_err(format_error)?;
                let id = ConstructId::java_method(Arc::clone(&class_id), name, &params)
                    .map_err(id_error)?;
                record(map, Arc::new(id), "");
            }
        }
    }
    Ok(())
}

/// `java/util/Map$Entry` and `java.util.Map$Entry` both give `Entry`.
fn simple_type_name(name: &str) -> String {
    let last = name.rsplit(['/', '.']).next().unwrap_or(name);
    last.rsplit('$').next().unwrap_or(last).to_string()
}

/// Parameter types of a method descriptor in source notation,
/// e.g. `(Ljava/lang/String;[I)V` gives `java.lang.String`, `int[]`.
pub fn descriptor_params(descriptor: &str) -> Result<Vec<String>, ClassFormatError> {
    let bad = || ClassFormatError::BadDescriptor(descriptor.to_string());
    let inner = descriptor
        .strip_prefix('(')
        .and_then(|rest| rest.split_once(')'))
        .map(|(params, _)| params)
        .ok_or_else(bad)?;

    let mut params = Vec::new();
    let mut chars = inner.chars().peekable();
    while chars.peek().is_some() {
        let mut dims = 0;
        while chars.peek() == Some(&'[') {
            chars.next();
            dims += 1;
        }
        let base = match chars.next().ok_or_else(bad)? {
            'B' => "byte".to_string(),
            'C' => "char".to_string(),
            'D' => "double".to_string(),
            'F' => "float".to_string(),
            'I' => "int".to_string(),
            'J' => "long".to_string(),
            'S' => "short".to_string(),
            'Z' => "boolean".to_string(),
            'L' => {
                let name: String = chars.by_ref().take_while(|c| *c != ';').collect();
                if name.is_empty() {
                    return Err(bad());
                }
                name.replace('/', ".")
            }
            _ => return Err(bad()),
        };
        params.push(format!("{base}{}", "[]".repeat(dims)));
    }
    Ok(params)
}

enum Constant {
    Utf8(String),
    Class(u16),
    Other,
    /// Second slot of a long or double.
    Unusable,
}

struct Reader<'a> {
    bytes: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], ClassFormatError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.bytes.len())
            .ok_or(ClassFormatError::Truncated(self.pos))?;
        let slice = &self.bytes[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, ClassFormatError> {
        Ok(self.take(1)?[0])
    }

    fn u16(&mut self) -> Result<u16, ClassFormatError> {
        let b = self.take(2)?;
        Ok(u16::from_be_bytes([b[0], b[1]]))
    }

    fn u32(&mut self) -> Result<u32, ClassFormatError> {
        let b = self.take(4)?;
        Ok(u32::from_be_bytes([b[0], b[1], b[2], b[3]]))
    }

    fn skip_attributes(&mut self) -> Result<(), ClassFormatError> {
        let count = self.u16()?;
        for _ in 0..count {
            self.u16()?;
            let len = self.u32()? as usize;
            self.take(len)?;
        }
        Ok(())
    }
}

struct ConstantPool(Vec<Constant>);

impl ConstantPool {
    fn utf8(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.0.get(index as usize) {
            Some(Constant::Utf8(s)) => Ok(s),
            _ => Err(ClassFormatError::BadConstantIndex(index)),
        }
    }

    fn class_name(&self, index: u16) -> Result<&str, ClassFormatError> {
        match self.0.get(index as usize) {
            Some(Constant::Class(name)) => self.utf8(*name),
            _ => Err(ClassFormatError::BadConstantIndex(index)),
        }
    }
}

pub fn parse_class_file(bytes: &[u8]) -> Result<ClassFile, ClassFormatError> {
    let mut r = Reader { bytes, pos: 0 };
    let magic = r.u32()?;
    if magic != MAGIC {
        return Err(ClassFormatError::BadMagic(magic));
    }
    r.u16()?;
    r.u16()?;

    let pool = read_constant_pool(&mut r)?;

    let access = r.u16()?;
    let this_class = pool.class_name(r.u16()?)?.to_string();
    r.u16()?;
    let interfaces = r.u16()?;
    r.take(interfaces as usize * 2)?;

    let fields = r.u16()?;
    for _ in 0..fields {
        r.take(6)?;
        r.skip_attributes()?;
    }

    let method_count = r.u16()?;
    let mut methods = Vec::with_capacity(method_count as usize);
    for _ in 0..method_count {
        let access = r.u16()?;
        let name = pool.utf8(r.u16()?)?.to_string();
        let descriptor = pool.utf8(r.u16()?)?.to_string();
        r.skip_attributes()?;
        methods.push(MethodInfo {
            access,
            name,
            descriptor,
        });
    }

    let mut inner_classes = Vec::new();
    let mut enclosing_class = None;
    let attributes = r.u16()?;
    for _ in 0..attributes {
        let name = pool.utf8(r.u16()?)?;
        let len = r.u32()? as usize;
        let data = r.take(len)?;
        if name == "InnerClasses" {
            inner_classes = read_inner_classes(data, &pool)?;
        } else if name == "EnclosingMethod" {
            let mut attr = Reader { bytes: data, pos: 0 };
            enclosing_class = Some(pool.class_name(attr.u16()?)?.to_string());
        }
    }

    Ok(ClassFile {
        access,
        this_class,
        methods,
        inner_classes,
        enclosing_class,
    })
}

fn read_constant_pool(r: &mut Reader<'_>) -> Result<ConstantPool, ClassFormatError> {
    let count = u32::from(r.u16()?);
    let mut entries = Vec::with_capacity(count as usize);
    entries.push(Constant::Unusable);
    let mut index = 1u32;
    while index < count {
        let tag = r.u8()?;
        let (constant, slots) = match tag {
            1 => {
                let len = r.u16()? as usize;
                let raw = r.take(len)?;
                (Constant::Utf8(String::from_utf8_lossy(raw).into_owned()), 1)
            }
            7 => (Constant::Class(r.u16()?), 1),
            3 | 4 => {
                r.take(4)?;
                (Constant::Other, 1)
            }
            5 | 6 => {
                r.take(8)?;
                (Constant::Other, 2)
            }
            8 | 16 | 19 | 20 => {
                r.take(2)?;
                (Constant::Other, 1)
            }
            9 | 10 | 11 | 12 | 17 | 18 => {
                r.take(4)?;
                (Constant::Other, 1)
            }
            15 => {
                r.take(3)?;
                (Constant::Other, 1)
            }
            _ => {
                return Err(ClassFormatError::UnknownConstantTag {
                    tag,
                    index: index as u16,
                });
            }
        };
        // A long or double in the last slot has no room for its second half.
        if index + slots > count {
            return Err(ClassFormatError::BadConstantIndex(index as u16));
        }
        entries.push(constant);
        if slots == 2 {
            entries.push(Constant::Unusable);
        }
        index += slots;
    }
    Ok(ConstantPool(entries))
}

fn read_inner_classes(
    data: &[u8],
    pool: &ConstantPool,
) -> Result<Vec<InnerClassInfo>, ClassFormatError> {
    let mut r = Reader { bytes: data, pos: 0 };
    let count = r.u16()?;
    let mut out = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let inner = r.u16()?;
        let outer = r.u16()?;
        r.u16()?;
        let access = r.u16()?;
        out.push(InnerClassInfo {
            inner: pool.class_name(inner)?.to_string(),
            outer: match outer {
                0 => None,
                i => Some(pool.class_name(i)?.to_string()),
            },
            access,
        });
    }
    Ok(out)
}


#[cfg(test)]
mod tests {
    use super::testing::{ClassSpec, build};
    use super::*;

    fn qnames(map: &ConstructMap) -> Vec<String> {
        map.keys().map(|k| k.qualified_name()).collect()
    }

    #[test]
    fn descriptor_params_converts_to_source_notation() {
        assert_eq!(
            descriptor_params("(Ljava/lang/String;I[J[[Ljava/util/Map$Entry;)V").unwrap(),
            vec!["java.lang.String", "int", "long[]", "java.util.Map$Entry[][]"]
        );
        assert!(descriptor_params("()V").unwrap().is_empty());
        assert!(descriptor_params("(Q)V").is_err());
        assert!(descriptor_params("I").is_err());
    }

    #[test]
    fn class_with_constructor_methods_and_clinit() {
        let bytes = build(
            &ClassSpec::new("p/C")
                .method(0x0001, "<init>", "(Ljava/lang/String;)V")
                .method(0x0001, "m", "(Ljava/lang/String;)V")
                .method(0x0008, "<clinit>", "()V")
                .method(0x1009, "lambda$m$0", "()V"),
        );
        let map = analyze_class_bytes(&bytes, Path::new("p/C.class")).unwrap();
        assert_eq!(
            qnames(&map),
            vec!["p", "p.C", "p.C(String)", "p.C.<clinit>", "p.C.m(String)"]
        );
        assert!(map.values().all(|c| c.body.is_empty()));
    }

    #[test]
    fn bytecode_and_source_ids_agree() {
        let bytes = build(
            &ClassSpec::new("p/C")
                .method(0x0001, "<init>", "(Ljava/lang/String;)V")
                .method(0x0001, "m", "(Ljava/lang/String;)V"),
        );
        let from_bytes = analyze_class_bytes(&bytes, Path::new("C.class")).unwrap();
        let from_source = crate::java_source::analyze_java_source(
            "package p; public class C { public C(String s) {} public void m(String s) {} }",
            Path::new("C.java"),
        )
        .unwrap();
        let a: Vec<_> = from_bytes.keys().collect();
        let b: Vec<_> = from_source.keys().collect();
        assert_eq!(a, b);
    }

    #[test]
    fn non_static_inner_class_drops_outer_instance_parameter() {
        let mut spec = ClassSpec::new("p/Outer$Inner")
            .method(0x0000, "<init>", "(Lp/Outer;I)V");
        spec.inner_classes.push(("p/Outer$Inner", Some("p/Outer"), 0x0000));
        let map = analyze_class_bytes(&build(&spec), Path::new("x.class")).unwrap();
        assert!(qnames(&map).contains(&"p.Outer$Inner(int)".to_string()));

        let mut spec = ClassSpec::new("p/Outer$Nested")
            .method(0x0000, "<init>", "(Lp/Outer;I)V");
        spec.inner_classes.push(("p/Outer$Nested", Some("p/Outer"), ACC_STATIC));
        let map = analyze_class_bytes(&build(&spec), Path::new("x.class")).unwrap();
        assert!(qnames(&map).contains(&"p.Outer$Nested(Outer,int)".to_string()));
    }

    #[test]
    fn local_class_matches_its_source_form() {
        let mut spec = ClassSpec::new("p/Outer$1Foo").method(0x0000, "<init>", "(Lp/Outer;I)V");
        spec.inner_classes.push(("p/Outer$1Foo", None, 0x0000));
        spec.enclosing_class = Some("p/Outer");
        let bytecode = analyze_class_bytes(&build(&spec), Path::new("Outer$1Foo.class")).unwrap();

        let source = "package p;\npublic class Outer {\n  void run() {\n    class Foo {\n      Foo(int n) {}\n    }\n  }\n}\n";
        let from_source =
            crate::java_source::analyze_java_source(source, Path::new("Outer.java")).unwrap();

        assert!(qnames(&bytecode).contains(&"p.Outer$1Foo(int)".to_string()));
        for id in bytecode.keys() {
            assert!(from_source.contains_key(id), "{id} missing from source constructs");
        }
    }

    #[test]
    fn long_constant_in_the_last_pool_slot_is_rejected() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
        bytes.extend_from_slice(&[0, 0, 0, 52]);
        bytes.extend_from_slice(&u16::MAX.to_be_bytes());
        for _ in 1..65534 {
            bytes.extend_from_slice(&[1, 0, 0]);
        }
        bytes.push(5);
        bytes.extend_from_slice(&7u64.to_be_bytes());

        let err = analyze_class_bytes(&bytes, Path::new("Big.class")).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ClassFormat {
                source: ClassFormatError::BadConstantIndex(65534),
                ..
            }
        ));
    }

    #[test]
    fn enum_drops_synthetic_constructor_parameters_and_clinit() {
        let mut spec = ClassSpec::new("p/Color")
            .method(0x0002, "<init>", "(Ljava/lang/String;II)V")
            .method(0x0008, "<clinit>", "()V")
            .method(0x0009, "values", "()[Lp/Color;");
        spec.access |= ACC_ENUM;
        let map = analyze_class_bytes(&build(&spec), Path::new("Color.class")).unwrap();
        assert_eq!(qnames(&map), vec!["p", "p.Color", "p.Color(int)", "p.Color.values()"]);
        let color = ConstructId::parse_java("ENUM", "p.Color").unwrap();
        assert!(map.contains_key(&color));
    }

    #[test]
    fn interfaces_yield_no_constructs() {
        let mut spec = ClassSpec::new("p/Api").method(0x0401, "call", "()V");
        spec.access = ACC_INTERFACE | 0x0400;
        let map = analyze_class_bytes(&build(&spec), Path::new("Api.class")).unwrap();
        assert!(map.is_empty());
    }

    #[test]
    fn default_package_has_no_package_construct() {
        let bytes = build(&ClassSpec::new("Main").method(0x0009, "main", "([Ljava/lang/String;)V"));
        let map = analyze_class_bytes(&bytes, Path::new("Main.class")).unwrap();
        assert_eq!(qnames(&map), vec!["Main", "Main.main(String[])"]);
    }

    #[test]
    fn malformed_input_is_a_class_format_error() {
        let err = analyze_class_bytes(b"not a class", Path::new("bad.class")).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::ClassFormat {
                source: ClassFormatError::BadMagic(_),
                ..
            }
        ));

        let bytes = build(&ClassSpec::new("p/C"));
        let err = analyze_class_bytes(&bytes[..bytes.len() - 4], Path::new("t.class")).unwrap_err();
        assert!(matches!(err, AnalysisError::ClassFormat { .. }));
    }

    #[test]
    fn analyzer_reads_file_once() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let file = dir.path().join("Main.class");
        std::fs::write(&file, build(&ClassSpec::new("Main")))?;
        let analyzer = ClassFileAnalyzer::bind(&file)?;
        assert_eq!(analyzer.constructs()?.len(), 1);
        std::fs::remove_file(&file)?;
        assert_eq!(analyzer.constructs()?.len(), 1);
        Ok(())
    }
}
