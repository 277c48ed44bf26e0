//! Library identities and the manifest formats they are read from.

use std::fmt;

use quick_xml::Reader;
use quick_xml::events::Event;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Ecosystem {
    Maven,
    Pypi,
}

/// Coordinates of a released library. Python distributions have no group;
/// theirs is left empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct LibraryId {
    pub ecosystem: Ecosystem,
    pub group: String,
    pub artifact: String,
    pub version: String,
}

impl LibraryId {
    pub fn maven(group: &str, artifact: &str, version: &str) -> Self {
        Self {
            ecosystem: Ecosystem::Maven,
            group: group.to_string(),
            artifact: artifact.to_string(),
            version: version.to_string(),
        }
    }

    pub fn pypi(name: &str, version: &str) -> Self {
        Self {
            ecosystem: Ecosystem::Pypi,
            group: String::new(),
            artifact: name.to_string(),
            version: version.to_string(),
        }
    }
}

impl fmt::Display for LibraryId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.ecosystem {
            Ecosystem::Maven => write!(f, "{}:{}:{}", self.group, self.artifact, self.version),
            Ecosystem::Pypi => write!(f, "{}=={}", self.artifact, self.version),
        }
    }
}

/// Maven descriptors embedded by the build under `META-INF/maven/`.
pub fn is_maven_descriptor(entry: &str) -> bool {
    entry.starts_with("META-INF/maven/")
        && (entry.ends_with("/pom.xml") || entry.ends_with("/pom.properties"))
}

/// Python distribution metadata: `*.dist-info/METADATA`, `*.egg-info/PKG-INFO`,
/// `EGG-INFO/PKG-INFO` or an sdist's `PKG-INFO`.
pub fn is_python_metadata(entry: &str) -> bool {
    let name = entry.rsplit('/').next().unwrap_or(entry);
    let parent = entry
        .strip_suffix(name)
        .map(|p| p.trim_end_matches('/'))
        .unwrap_or("");
    let parent_name = parent.rsplit('/').next().unwrap_or(parent);
    match name {
        "METADATA" => parent_name.ends_with(".dist-info"),
        "PKG-INFO" => {
            parent_name.is_empty()
                || parent_name == "EGG-INFO"
                || parent_name.ends_with(".egg-info")
                || !parent.contains('/')
        }
        _ => false,
    }
}

/// Reads a Maven descriptor entry, dispatching on its file name.
pub fn parse_maven_descriptor(entry: &str, content: &[u8]) -> Option<LibraryId> {
    if entry.ends_with("pom.xml") {
        parse_pom_xml(content)
    } else {
        parse_pom_properties(&String::from_utf8_lossy(content))
    }
}

/// Project coordinates of a `pom.xml`. `groupId` and `version` fall back to
/// the `<parent>` section when the project does not declare them.
pub fn parse_pom_xml(content: &[u8]) -> Option<LibraryId> {
    let mut reader = Reader::from_reader(content);
    reader.config_mut().trim_text(true);

    let mut path: Vec<String> = Vec::new();
    let mut group = None;
    let mut artifact = None;
    let mut version = None;
    let mut parent_group = None;
    let mut parent_version = None;
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => {
                path.push(String::from_utf8_lossy(e.local_name().as_ref()).into_owned());
            }
            Ok(Event::End(_)) => {
                path.pop();
            }
            Ok(Event::Text(t)) => {
                let Ok(text) = t.unescape() else {
                    continue;
                };
                let text = text.trim().to_string();
                let segments: Vec<&str> = path.iter().map(String::as_str).collect();
                match segments.as_slice() {
                    ["project", "groupId"] => group = Some(text),
                    ["project", "artifactId"] => artifact = Some(text),
                    ["project", "version"] => version = Some(text),
                    ["project", "parent", "groupId"] => parent_group = Some(text),
                    ["project", "parent", "version"] => parent_version = Some(text),
                    _ => {}
                }
            }
            Ok(Event::Eof) => break,
            Err(e) => {
                tracing::debug!(error = %e, "unreadable pom.xml");
                return None;
            }
            _ => {}
        }
        buf.clear();
    }

    Some(LibraryId::maven(
        &group.or(parent_group)?,
        &artifact?,
        &version.or(parent_version)?,
    ))
}

pub fn parse_pom_properties(content: &str) -> Option<LibraryId> {
    let mut group = None;
    let mut artifact = None;
    let mut version = None;
    for line in content.lines().map(str::trim) {
        if line.starts_with('#') {
            continue;
        }
        let Some((key, value)) = line.split_once('=') else {
            continue;
        };
        match key.trim() {
            "groupId" => group = Some(value.trim()),
            "artifactId" => artifact = Some(value.trim()),
            "version" => version = Some(value.trim()),
            _ => {}
        }
    }
    Some(LibraryId::maven(group?, artifact?, version?))
}

/// `Name` and `Version` headers of a `PKG-INFO` or `METADATA` file.
pub fn parse_python_metadata(content: &str) -> Option<LibraryId> {
    let mut name = None;
    let mut version = None;
    for line in content.lines() {
        if line.trim().is_empty() {
            break;
        }
        if let Some(v) = line.strip_prefix("Name:") {
            name = Some(v.trim());
        } else if let Some(v) = line.strip_prefix("Version:") {
            version = Some(v.trim());
        }
    }
    Some(LibraryId::pypi(name?, version?))
}
