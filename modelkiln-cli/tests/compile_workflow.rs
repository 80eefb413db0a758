//! Integration tests for the compile/inspect CLI workflow.
//!
//! These run the actual binary against temporary directories: a source graph
//! goes in, a packaged artifact and its streamed-data files come out, and
//! `inspect` reads the result back.

use std::fs;
use std::path::Path;
use std::process::Command;

use tempfile::TempDir;

fn binary() -> Command {
    Command::new(env!("CARGO_BIN_EXE_modelkiln"))
}

/// A small graph with one streamed texture payload.
fn write_graph(path: &Path) {
    let graph = serde_json::json!({
        "version": 1,
        "nodes": [
            {
                "id": 1,
                "kind": "Mesh",
                "name": "base",
                "params": [
                    { "name": "vertex_count", "value": { "Int": 64 } }
                ],
                "inputs": []
            },
            {
                "id": 2,
                "kind": "Texture",
                "name": "skin",
                "params": [
                    { "name": "width", "value": { "Int": 128 } },
                    { "name": "height", "value": { "Int": 128 } }
                ],
                "inputs": []
            },
            {
                "id": 3,
                "kind": "Blend",
                "name": "blend",
                "params": [],
                "inputs": [1, 2]
            },
            {
                "id": 4,
                "kind": "Output",
                "name": "out",
                "params": [],
                "inputs": [3]
            }
        ]
    });
    fs::write(path, serde_json::to_string_pretty(&graph).unwrap()).unwrap();
}

#[test]
fn test_compile_writes_package_and_bulk_files() {
    let dir = TempDir::new().unwrap();
    let graph_path = dir.path().join("hero.json");
    let output_dir = dir.path().join("cooked");
    write_graph(&graph_path);

    let output = binary()
        .arg("compile")
        .arg(&graph_path)
        .arg("--output")
        .arg(&output_dir)
        .output()
        .expect("binary runs");

    assert!(
        output.status.success(),
        "stdout: {}\nstderr: {}",
        String::from_utf8_lossy(&output.stdout),
        String::from_utf8_lossy(&output.stderr)
    );

    let package = output_dir.join("hero.mkpkg");
    assert!(package.exists());

    // The 128x128 texture streams, so at least one bulk file exists.
    let bulk_files: Vec<_> = fs::read_dir(&output_dir)
        .unwrap()
        .filter_map(Result::ok)
        .filter(|entry| {
            entry
                .path()
                .extension()
                .is_some_and(|extension| extension == "mkbulk")
        })
        .collect();
    assert!(!bulk_files.is_empty());
}

#[test]
fn test_inspect_reads_package_back() {
    let dir = TempDir::new().unwrap();
    let graph_path = dir.path().join("hero.json");
    let output_dir = dir.path().join("cooked");
    write_graph(&graph_path);

    let compile = binary()
        .arg("compile")
        .arg(&graph_path)
        .arg("--output")
        .arg(&output_dir)
        .output()
        .expect("binary runs");
    assert!(compile.status.success());

    let inspect = binary()
        .arg("inspect")
        .arg(output_dir.join("hero.mkpkg"))
        .output()
        .expect("binary runs");

    assert!(inspect.status.success());
    let stdout = String::from_utf8_lossy(&inspect.stdout);
    assert!(stdout.contains("format version"));
    assert!(stdout.contains("streamed files"));
}

#[test]
fn test_compile_missing_graph_fails() {
    let output = binary()
        .arg("compile")
        .arg("/nonexistent/graph.json")
        .output()
        .expect("binary runs");

    assert!(!output.status.success());
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("Failed to read"));
}
