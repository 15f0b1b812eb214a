// classifier.rs — framework detection over an uploaded archive.
//
// Walks the zip central directory (end-of-central-directory record, never
// a payload scan), enforces the archive bounds, decodes the dependency
// manifests when small enough, and labels the archive with one of a closed
// set of framework kinds.

use anyhow::{anyhow, bail, Result};
use serde::{Deserialize, Serialize};
use std::io::{Cursor, Read};
use zip::ZipArchive;

pub const MAX_COMPRESSED_BYTES: u64 = 50 * 1024 * 1024;
pub const MAX_UNCOMPRESSED_BYTES: u64 = 200 * 1024 * 1024;
pub const MAX_ENTRIES: usize = 1000;
pub const MAX_ENTRY_BYTES: u64 = 100 * 1024 * 1024;
const MAX_MANIFEST_BYTES: u64 = 1024 * 1024;

// ─── Framework labels ─────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Framework {
    Streamlit,
    Gradio,
    Flask,
    Fastapi,
    React,
    Nextjs,
    Express,
    Static,
    Unknown,
}

impl Framework {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Streamlit => "streamlit",
            Self::Gradio => "gradio",
            Self::Flask => "flask",
            Self::Fastapi => "fastapi",
            Self::React => "react",
            Self::Nextjs => "nextjs",
            Self::Express => "express",
            Self::Static => "static",
            Self::Unknown => "unknown",
        }
    }

    /// Default entry point for the label.
    pub fn entrypoint(&self) -> &'static str {
        match self {
            Self::Streamlit | Self::Gradio | Self::Flask => "app.py",
            Self::Fastapi => "main.py",
            Self::Express => "index.js",
            Self::React | Self::Static => "index.html",
            Self::Nextjs => "pages/index.tsx",
            Self::Unknown => "app.py",
        }
    }

    pub fn language(&self) -> &'static str {
        match self {
            Self::Streamlit | Self::Gradio | Self::Flask | Self::Fastapi => "python",
            Self::React | Self::Nextjs | Self::Express => "node",
            Self::Static => "static",
            Self::Unknown => "unknown",
        }
    }

    pub fn is_python(&self) -> bool {
        self.language() == "python"
    }
}

impl std::str::FromStr for Framework {
    type Err = String;
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "streamlit" => Ok(Self::Streamlit),
            "gradio" => Ok(Self::Gradio),
            "flask" => Ok(Self::Flask),
            "fastapi" => Ok(Self::Fastapi),
            "react" => Ok(Self::React),
            "nextjs" => Ok(Self::Nextjs),
            "express" => Ok(Self::Express),
            "static" => Ok(Self::Static),
            "unknown" => Ok(Self::Unknown),
            other => Err(format!("unknown framework '{other}'")),
        }
    }
}

impl std::fmt::Display for Framework {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ─── Analysis result ──────────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize)]
pub struct Analysis {
    pub framework: Framework,
    pub detected_entrypoint: String,
    /// A python dependency manifest (requirements.txt) is present.
    pub has_dependency_manifest: bool,
    /// A node manifest (package.json) is present.
    pub has_node_manifest: bool,
    pub file_list: Vec<String>,
}

struct Listing {
    names: Vec<String>,
    requirements_path: Option<String>,
    package_json_path: Option<String>,
    has_index_html: bool,
    has_py_file: bool,
}

/// Classify an archive, honoring an optional caller-supplied hint.
///
/// A hinted archive is still bounds-checked; only the detection rules are
/// short-circuited.
pub fn classify(bytes: &[u8], hint: Option<Framework>) -> Result<Analysis> {
    if bytes.len() as u64 > MAX_COMPRESSED_BYTES {
        bail!(
            "archive exceeds {} MiB compressed",
            MAX_COMPRESSED_BYTES / (1024 * 1024)
        );
    }

    let mut archive =
        ZipArchive::new(Cursor::new(bytes)).map_err(|e| anyhow!("invalid zip archive: {e}"))?;
    let listing = walk_central_directory(&mut archive)?;

    if let Some(fw) = hint.filter(|f| *f != Framework::Unknown) {
        return Ok(Analysis {
            framework: fw,
            detected_entrypoint: fw.entrypoint().to_string(),
            has_dependency_manifest: listing.requirements_path.is_some(),
            has_node_manifest: listing.package_json_path.is_some(),
            file_list: listing.names,
        });
    }

    let requirements = match &listing.requirements_path {
        Some(path) => Some(read_text_entry(&mut archive, path)?.to_lowercase()),
        None => None,
    };
    let node_manifest = match &listing.package_json_path {
        Some(path) => {
            let text = read_text_entry(&mut archive, path)?;
            // A malformed package.json downgrades to "manifest present, no
            // recognized framework" rather than failing the deployment.
            serde_json::from_str::<serde_json::Value>(&text).ok()
        }
        None => None,
    };

    let framework = decide(&listing, requirements.as_deref(), node_manifest.as_ref());
    Ok(Analysis {
        framework,
        detected_entrypoint: framework.entrypoint().to_string(),
        has_dependency_manifest: listing.requirements_path.is_some(),
        has_node_manifest: listing.package_json_path.is_some(),
        file_list: listing.names,
    })
}

/// Enumerate entries via the central directory, enforcing bounds and name
/// hygiene, and locate the key manifests.
fn walk_central_directory(archive: &mut ZipArchive<Cursor<&[u8]>>) -> Result<Listing> {
    if archive.len() > MAX_ENTRIES {
        bail!("archive has more than {MAX_ENTRIES} entries");
    }

    let mut listing = Listing {
        names: Vec::with_capacity(archive.len()),
        requirements_path: None,
        package_json_path: None,
        has_index_html: false,
        has_py_file: false,
    };
    let mut total_uncompressed: u64 = 0;

    for i in 0..archive.len() {
        let entry = archive
            .by_index(i)
            .map_err(|e| anyhow!("unreadable archive entry: {e}"))?;
        let name = entry.name().to_string();

        if name.contains('\0') {
            bail!("archive entry name contains a null byte");
        }
        if name.starts_with('/') || name.split('/').any(|seg| seg == "..") {
            bail!("archive entry '{name}' escapes the extraction root");
        }

        if entry.size() > MAX_ENTRY_BYTES {
            bail!(
                "archive entry '{name}' expands past {} MiB",
                MAX_ENTRY_BYTES / (1024 * 1024)
            );
        }
        total_uncompressed = total_uncompressed.saturating_add(entry.size());
        if total_uncompressed > MAX_UNCOMPRESSED_BYTES {
            bail!(
                "archive exceeds {} MiB uncompressed",
                MAX_UNCOMPRESSED_BYTES / (1024 * 1024)
            );
        }

        if entry.is_dir() {
            continue;
        }

        // Vendor/junk directories never drive detection.
        let in_vendor_dir = name
            .split('/')
            .any(|seg| seg == "node_modules" || seg == "__MACOSX" || seg == ".git");
        if !in_vendor_dir {
            track_manifest(&name, "requirements.txt", &mut listing.requirements_path);
            track_manifest(&name, "package.json", &mut listing.package_json_path);
            let base = name.rsplit('/').next().unwrap_or(&name);
            if base == "index.html" {
                listing.has_index_html = true;
            }
            if base.ends_with(".py") {
                listing.has_py_file = true;
            }
        }

        listing.names.push(name);
    }

    Ok(listing)
}

/// Remember the shallowest path whose basename matches `manifest`.
fn track_manifest(name: &str, manifest: &str, slot: &mut Option<String>) {
    let base = name.rsplit('/').next().unwrap_or(name);
    if base != manifest {
        return;
    }
    let depth = name.matches('/').count();
    let replace = match slot.as_deref() {
        None => true,
        Some(existing) => depth < existing.matches('/').count(),
    };
    if replace {
        *slot = Some(name.to_string());
    }
}

/// Decode a size-bounded text entry, replacing invalid UTF-8.
fn read_text_entry(archive: &mut ZipArchive<Cursor<&[u8]>>, path: &str) -> Result<String> {
    let entry = archive
        .by_name(path)
        .map_err(|e| anyhow!("cannot open archive entry '{path}': {e}"))?;
    if entry.size() > MAX_MANIFEST_BYTES {
        bail!("manifest '{path}' exceeds 1 MiB");
    }
    let mut buf = Vec::with_capacity(entry.size() as usize);
    entry
        .take(MAX_MANIFEST_BYTES)
        .read_to_end(&mut buf)
        .map_err(|e| anyhow!("cannot read archive entry '{path}': {e}"))?;
    Ok(String::from_utf8_lossy(&buf).into_owned())
}

/// Prioritized detection rules.
fn decide(
    listing: &Listing,
    requirements: Option<&str>,
    node_manifest: Option<&serde_json::Value>,
) -> Framework {
    if let Some(pkg) = node_manifest {
        if node_dep(pkg, "next") {
            return Framework::Nextjs;
        }
        if node_dep(pkg, "react") && node_dep(pkg, "vite") {
            return Framework::React;
        }
        if node_dep(pkg, "express") {
            return Framework::Express;
        }
    }
    if let Some(reqs) = requirements {
        for (needle, fw) in [
            ("streamlit", Framework::Streamlit),
            ("gradio", Framework::Gradio),
            ("fastapi", Framework::Fastapi),
            ("flask", Framework::Flask),
        ] {
            if reqs.contains(needle) {
                return fw;
            }
        }
    }
    if listing.has_py_file {
        return Framework::Streamlit;
    }
    // A node manifest that matched no framework rule (or failed to parse)
    // still marks a node project.
    if listing.package_json_path.is_some() {
        return Framework::React;
    }
    if listing.has_index_html {
        return Framework::Static;
    }
    Framework::Streamlit
}

fn node_dep(pkg: &serde_json::Value, name: &str) -> bool {
    ["dependencies", "devDependencies"]
        .iter()
        .any(|section| pkg.get(section).and_then(|d| d.get(name)).is_some())
}
