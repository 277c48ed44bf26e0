mod common;

use common::{class_bytes, write_jar};
use serde_json::Value;
use std::collections::BTreeSet;
use std::process::Command;

fn run_json(bin: &str, args: &[&str], envs: &[(&str, &str)]) -> anyhow::Result<Value> {
    let mut cmd = Command::new(bin);
    cmd.args(args);
    for (k, v) in envs {
        cmd.env(k, v);
    }
    let out = cmd.output()?;
    if !out.status.success() {
        return Err(anyhow::anyhow!(
            "command failed: status={:?}, stderr={}",
            out.status.code(),
            String::from_utf8_lossy(&out.stderr)
        ));
    }
    Ok(serde_json::from_slice(&out.stdout)?)
}

#[test]
fn file_command_prints_constructs_of_a_java_source() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let source = base.path().join("C.java");
    std::fs::write(
        &source,
        "package p;\npublic class C {\n  public C(String s) {}\n  void m(String s) {}\n}\n",
    )?;

    let bin = env!("CARGO_BIN_EXE_construct-scan");
    let json = run_json(bin, &["file", source.to_str().unwrap_or_default()], &[])?;

    let constructs = json["constructs"].as_array().cloned().unwrap_or_default();
    let tagged: BTreeSet<(String, String)> = constructs
        .iter()
        .map(|c| {
            (
                c["type"].as_str().unwrap_or_default().to_string(),
                c["qname"].as_str().unwrap_or_default().to_string(),
            )
        })
        .collect();
    for expected in [("PACK", "p"), ("CLAS", "p.C"), ("CONS", "p.C(String)"), ("METH", "p.C.m(String)")] {
        assert!(
            tagged.contains(&(expected.0.to_string(), expected.1.to_string())),
            "missing {expected:?} in {tagged:?}"
        );
    }
    assert!(constructs.iter().all(|c| c["lang"] == "JAVA"));
    Ok(())
}

#[test]
fn analyze_command_reports_archives() -> anyhow::Result<()> {
    let base = tempfile::tempdir()?;
    let jar = base.path().join("demo-1.0.jar");
    let class = class_bytes("org/example/Demo", &[(0x0001, "<init>", "()V")]);
    write_jar(
        &jar,
        &[
            ("org/example/Demo.class", class.as_slice()),
            (
                "META-INF/maven/org.example/demo/pom.properties",
                b"groupId=org.example\nartifactId=demo\nversion=1.0\n",
            ),
        ],
    )?;
    let work = base.path().join("work");

    let bin = env!("CARGO_BIN_EXE_construct-scan");
    let json = run_json(
        bin,
        &[
            "analyze",
            jar.to_str().unwrap_or_default(),
            "--constructs",
            "--timeout-ms",
            "-1",
        ],
        &[("CONSTRUCT_SCAN_WORK_DIR", work.to_str().unwrap_or_default())],
    )?;

    let archive = &json["archives"][0];
    assert_eq!(archive["kind"], "jar");
    assert_eq!(archive["construct_count"], 3);
    assert_eq!(archive["digest"].as_str().map(str::len), Some(64));
    assert_eq!(archive["bundled"][0]["artifact"], "demo");
    assert_eq!(json["tasks"][0]["state"], "completed");
    Ok(())
}
