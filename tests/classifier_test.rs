// Framework classification over real zip archives built in memory.

use std::io::{Cursor, Write as _};

use berthd::classifier::{classify, Framework};
use zip::write::FileOptions;
use zip::ZipWriter;

fn build_zip(entries: &[(&str, &str)]) -> Vec<u8> {
    let mut zip = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, contents) in entries {
        zip.start_file(*name, FileOptions::default()).unwrap();
        zip.write_all(contents.as_bytes()).unwrap();
    }
    zip.finish().unwrap().into_inner()
}

#[test]
fn streamlit_requirements_wins() {
    let bytes = build_zip(&[
        ("requirements.txt", "streamlit==1.30\npandas\n"),
        ("app.py", "import streamlit as st\n"),
    ]);
    let analysis = classify(&bytes, None).unwrap();
    assert_eq!(analysis.framework, Framework::Streamlit);
    assert!(analysis.has_dependency_manifest);
    assert!(!analysis.has_node_manifest);
    assert_eq!(analysis.detected_entrypoint, "app.py");
    assert_eq!(analysis.file_list.len(), 2);
}

#[test]
fn python_manifest_priority_order() {
    // First match wins in streamlit > gradio > fastapi > flask order.
    let bytes = build_zip(&[("requirements.txt", "flask\nfastapi\n"), ("main.py", "")]);
    let analysis = classify(&bytes, None).unwrap();
    assert_eq!(analysis.framework, Framework::Fastapi);

    let bytes = build_zip(&[("requirements.txt", "gradio\nflask\n"), ("app.py", "")]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::Gradio);
}

#[test]
fn nextjs_beats_react_and_express() {
    let bytes = build_zip(&[(
        "package.json",
        r#"{"dependencies": {"next": "14.0.0", "react": "18.0.0", "express": "4.0.0"}}"#,
    )]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::Nextjs);
}

#[test]
fn react_requires_the_build_tool_pair() {
    let bytes = build_zip(&[(
        "package.json",
        r#"{"dependencies": {"react": "18.0.0"}, "devDependencies": {"vite": "5.0.0"}}"#,
    )]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::React);
}

#[test]
fn express_detected_from_node_manifest() {
    let bytes = build_zip(&[
        ("package.json", r#"{"dependencies": {"express": "^4.18.0"}}"#),
        ("index.js", "const app = require('express')();\n"),
    ]);
    let analysis = classify(&bytes, None).unwrap();
    assert_eq!(analysis.framework, Framework::Express);
    assert_eq!(analysis.detected_entrypoint, "index.js");
    assert!(analysis.has_node_manifest);
}

#[test]
fn unrecognized_node_manifest_defaults_to_react() {
    let bytes = build_zip(&[("package.json", r#"{"dependencies": {"left-pad": "1.0.0"}}"#)]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::React);
}

#[test]
fn bare_python_file_defaults_to_streamlit() {
    let bytes = build_zip(&[("app.py", "print('hi')\n")]);
    let analysis = classify(&bytes, None).unwrap();
    assert_eq!(analysis.framework, Framework::Streamlit);
    assert!(!analysis.has_dependency_manifest);
}

#[test]
fn index_html_only_is_static() {
    let bytes = build_zip(&[("index.html", "<h1>hi</h1>"), ("style.css", "body{}")]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::Static);
}

#[test]
fn empty_archive_falls_back_to_streamlit() {
    let bytes = build_zip(&[("README.md", "nothing to see")]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::Streamlit);
}

#[test]
fn caller_hint_short_circuits_detection() {
    let bytes = build_zip(&[("app.py", "")]);
    let analysis = classify(&bytes, Some(Framework::Gradio)).unwrap();
    assert_eq!(analysis.framework, Framework::Gradio);
    assert_eq!(analysis.detected_entrypoint, "app.py");
}

#[test]
fn nested_manifest_is_found_at_the_shallowest_depth() {
    let bytes = build_zip(&[
        ("myapp/requirements.txt", "flask\n"),
        ("myapp/vendor/requirements.txt", "streamlit\n"),
        ("myapp/app.py", ""),
    ]);
    let analysis = classify(&bytes, None).unwrap();
    assert_eq!(analysis.framework, Framework::Flask);
}

#[test]
fn node_modules_never_drives_detection() {
    let bytes = build_zip(&[
        ("node_modules/express/package.json", r#"{"name":"express"}"#),
        ("index.html", "<h1>static site</h1>"),
    ]);
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::Static);
}

#[test]
fn rejects_traversal_entry_names() {
    let bytes = build_zip(&[("../escape.py", "nope")]);
    assert!(classify(&bytes, None).is_err());
}

#[test]
fn rejects_absolute_entry_names() {
    let bytes = build_zip(&[("/etc/passwd", "nope")]);
    assert!(classify(&bytes, None).is_err());
}

#[test]
fn rejects_non_zip_payloads() {
    assert!(classify(b"this is not a zip", None).is_err());
}

#[test]
fn malformed_package_json_downgrades_gracefully() {
    let bytes = build_zip(&[("package.json", "{not json"), ("index.html", "<p>x</p>")]);
    // Manifest present but unreadable: rule 6 (node manifest present).
    assert_eq!(classify(&bytes, None).unwrap().framework, Framework::React);
}
