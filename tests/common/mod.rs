#![allow(dead_code)]

use std::io::Write;
use std::path::Path;

pub fn write_jar(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    use zip::write::FileOptions;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::File::create(path)?;
    let mut zip = zip::ZipWriter::new(file);
    let options = FileOptions::default().compression_method(zip::CompressionMethod::Deflated);

    for (name, content) in entries {
        zip.start_file(*name, options)?;
        zip.write_all(content)?;
    }
    zip.finish()?;
    Ok(())
}

pub fn write_sdist(path: &Path, entries: &[(&str, &[u8])]) -> anyhow::Result<()> {
    use flate2::Compression;
    use flate2::write::GzEncoder;

    let encoder = GzEncoder::new(std::fs::File::create(path)?, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (name, content) in entries {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_cksum();
        builder.append_data(&mut header, name, *content)?;
    }
    builder.into_inner()?.finish()?;
    Ok(())
}

/// A class file with the given `(access, name, descriptor)` methods and no
/// code attributes.
pub fn class_bytes(name: &str, methods: &[(u16, &str, &str)]) -> Vec<u8> {
    let mut pool: Vec<u8> = Vec::new();
    let mut count: u16 = 0;
    let mut utf8 = |pool: &mut Vec<u8>, s: &str| {
        pool.push(1);
        pool.extend_from_slice(&(s.len() as u16).to_be_bytes());
        pool.extend_from_slice(s.as_bytes());
        count += 1;
        count
    };

    let this_name = utf8(&mut pool, name);
    let super_name = utf8(&mut pool, "java/lang/Object");
    let method_refs: Vec<(u16, u16, u16)> = methods
        .iter()
        .map(|(access, n, d)| (*access, utf8(&mut pool, n), utf8(&mut pool, d)))
        .collect();
    let this_class = count + 1;
    pool.push(7);
    pool.extend_from_slice(&this_name.to_be_bytes());
    let super_class = count + 2;
    pool.push(7);
    pool.extend_from_slice(&super_name.to_be_bytes());
    let pool_count = count + 2;

    let mut out = Vec::new();
    out.extend_from_slice(&0xCAFE_BABEu32.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&52u16.to_be_bytes());
    out.extend_from_slice(&(pool_count + 1).to_be_bytes());
    out.extend_from_slice(&pool);
    out.extend_from_slice(&0x0021u16.to_be_bytes());
    out.extend_from_slice(&this_class.to_be_bytes());
    out.extend_from_slice(&super_class.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&0u16.to_be_bytes());
    out.extend_from_slice(&(method_refs.len() as u16).to_be_bytes());
    for (access, name, desc) in method_refs {
        out.extend_from_slice(&access.to_be_bytes());
        out.extend_from_slice(&name.to_be_bytes());
        out.extend_from_slice(&desc.to_be_bytes());
        out.extend_from_slice(&0u16.to_be_bytes());
    }
    out.extend_from_slice(&0u16.to_be_bytes());
    out
}

/// Bytes of a jar holding one class `<package>/<Name>` with a constructor
/// and one method.
pub fn library_jar(dir: &Path, package: &str, name: &str) -> anyhow::Result<Vec<u8>> {
    let internal = format!("{package}/{name}");
    let class = class_bytes(
        &internal,
        &[(0x0001, "<init>", "()V"), (0x0001, "call", "(Ljava/lang/String;)I")],
    );
    let path = dir.join(format!("{name}.jar"));
    let entry = format!("{internal}.class");
    write_jar(&path, &[(entry.as_str(), class.as_slice())])?;
    Ok(std::fs::read(path)?)
}
