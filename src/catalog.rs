//! Classification of archive entries by name.

use crate::library::{is_maven_descriptor, is_python_metadata};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    Class,
    JavaSource,
    PythonSource,
    NestedArchive,
    MavenDescriptor,
    PythonMetadata,
    Other,
}

const NESTED_ARCHIVE_SUFFIXES: &[&str] = &[".jar", ".war", ".aar", ".whl", ".egg", ".gz", ".tgz"];

pub fn classify(entry: &str) -> EntryKind {
    if entry.ends_with('/') {
        return EntryKind::Other;
    }
    if entry.ends_with(".class") {
        EntryKind::Class
    } else if entry.ends_with(".java") {
        EntryKind::JavaSource
    } else if entry.ends_with(".py") {
        EntryKind::PythonSource
    } else if is_maven_descriptor(entry) {
        EntryKind::MavenDescriptor
    } else if is_python_metadata(entry) {
        EntryKind::PythonMetadata
    } else if NESTED_ARCHIVE_SUFFIXES.iter().any(|s| entry.ends_with(s)) {
        EntryKind::NestedArchive
    } else {
        EntryKind::Other
    }
}

/// `package-info` and `module-info` carry no constructs.
pub fn is_descriptor_class(entry: &str) -> bool {
    let name = entry.rsplit('/').next().unwrap_or(entry);
    name == "package-info.class" || name == "module-info.class"
}

/// Dotted class name of a `.class` entry, or `None` when a path segment is
/// not a Java identifier (resources, `META-INF/versions/..` copies).
pub fn class_name_from_entry(entry: &str) -> Option<String> {
    let stem = entry.strip_suffix(".class")?;
    let segments: Vec<&str> = stem.split(['/', '\\']).collect();
    if !segments.iter().all(|s| is_java_identifier(s)) {
        return None;
    }
    Some(segments.join("."))
}

pub fn is_java_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    let Some(first) = chars.next() else {
        return false;
    };
    (first.is_alphabetic() || first == '_' || first == '$')
        && chars.all(|c| c.is_alphanumeric() || c == '_' || c == '$')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn classify_entry_names() {
        assert_eq!(classify("com/acme/A.class"), EntryKind::Class);
        assert_eq!(classify("com/acme/A.java"), EntryKind::JavaSource);
        assert_eq!(classify("pkg/mod.py"), EntryKind::PythonSource);
        assert_eq!(classify("WEB-INF/lib/x.jar"), EntryKind::NestedArchive);
        assert_eq!(classify("deps/x-1.0.tar.gz"), EntryKind::NestedArchive);
        assert_eq!(classify("deps/x-1.0.gz"), EntryKind::NestedArchive);
        assert_eq!(classify("META-INF/maven/g/a/pom.xml"), EntryKind::MavenDescriptor);
        assert_eq!(classify("x-1.0.dist-info/METADATA"), EntryKind::PythonMetadata);
        assert_eq!(classify("META-INF/MANIFEST.MF"), EntryKind::Other);
        assert_eq!(classify("com/acme/"), EntryKind::Other);
    }

    #[test]
    fn class_name_from_entry_validates_segments() {
        assert_eq!(
            class_name_from_entry("com/acme/Outer$Inner.class").as_deref(),
            Some("com.acme.Outer$Inner")
        );
        assert_eq!(class_name_from_entry("Top.class").as_deref(), Some("Top"));
        assert_eq!(class_name_from_entry("META-INF/versions/9/a/A.class"), None);
        assert_eq!(class_name_from_entry("com/acme/A.txt"), None);
        assert_eq!(class_name_from_entry("com//A.class"), None);
    }

    #[test]
    fn descriptor_classes_are_recognized() {
        assert!(is_descriptor_class("com/acme/package-info.class"));
        assert!(is_descriptor_class("module-info.class"));
        assert!(!is_descriptor_class("com/acme/Info.class"));
    }

    #[test]
    fn java_identifiers() {
        assert!(is_java_identifier("_x$1"));
        assert!(is_java_identifier("Ünïcode"));
        assert!(!is_java_identifier("1abc"));
        assert!(!is_java_identifier("a-b"));
        assert!(!is_java_identifier(""));
    }
}
