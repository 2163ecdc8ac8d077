//! Framework detection.
//!
//! Detection runs an ordered list of detectors over the app manifests
//! found in the source tree. The first detector whose marker appears
//! wins; when nothing matches the result is [`Framework::Generic`].

use std::path::Path;

use tracing::debug;

use berth_core::Framework;

/// Manifest files inspected for dependency markers.
const MANIFEST_FILES: &[&str] = &["requirements.txt", "pyproject.toml", "package.json"];

/// A single detection rule: a framework and the dependency markers
/// that imply it.
#[derive(Debug, Clone, Copy)]
pub struct FrameworkDetector {
    /// Framework reported on a marker hit.
    pub framework: Framework,
    /// Substrings searched for in the manifests, lower-case.
    pub markers: &'static [&'static str],
}

/// Detectors in priority order. Order is part of the contract: the
/// first hit wins, so more specific rules come first.
pub const DETECTORS: &[FrameworkDetector] = &[
    FrameworkDetector {
        framework: Framework::StaticSite,
        markers: &["mkdocs", "pelican", "@11ty/eleventy", "astro"],
    },
    FrameworkDetector {
        framework: Framework::BackendService,
        markers: &["flask", "fastapi", "django", "express", "fastify"],
    },
];

/// Detect the framework of a materialized source tree.
#[must_use]
pub fn detect(source_dir: &Path) -> Framework {
    let mut manifest = String::new();
    let mut found_any = false;

    for name in MANIFEST_FILES {
        if let Ok(content) = std::fs::read_to_string(source_dir.join(name)) {
            manifest.push_str(&content.to_lowercase());
            manifest.push('\n');
            found_any = true;
        }
    }

    if found_any {
        for detector in DETECTORS {
            if detector.markers.iter().any(|m| manifest.contains(m)) {
                debug!(framework = %detector.framework, "framework detected");
                return detector.framework;
            }
        }
    } else if source_dir.join("index.html").exists() {
        // No manifest at all but a root index page: plain static site.
        debug!("no manifest found, treating root index.html as a static site");
        return Framework::StaticSite;
    }

    debug!("no marker matched, using generic framework");
    Framework::Generic
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tree_with(files: &[(&str, &str)]) -> tempfile::TempDir {
        let dir = tempfile::tempdir().expect("tempdir");
        for (name, content) in files {
            std::fs::write(dir.path().join(name), content).expect("write");
        }
        dir
    }

    #[test]
    fn backend_marker_in_requirements() {
        let dir = tree_with(&[("requirements.txt", "Flask==3.0.0\ngunicorn\n")]);
        assert_eq!(detect(dir.path()), Framework::BackendService);
    }

    #[test]
    fn static_marker_in_package_json() {
        let dir = tree_with(&[(
            "package.json",
            r#"{"devDependencies": {"@11ty/eleventy": "^2.0"}}"#,
        )]);
        assert_eq!(detect(dir.path()), Framework::StaticSite);
    }

    #[test]
    fn static_markers_take_priority_over_backend() {
        // Both marker classes present; first detector in the list wins.
        let dir = tree_with(&[("requirements.txt", "mkdocs\nflask\n")]);
        assert_eq!(detect(dir.path()), Framework::StaticSite);
    }

    #[test]
    fn manifest_without_markers_is_generic() {
        let dir = tree_with(&[("requirements.txt", "requests==2.31\n")]);
        assert_eq!(detect(dir.path()), Framework::Generic);
    }

    #[test]
    fn bare_index_html_is_a_static_site() {
        let dir = tree_with(&[("index.html", "<html></html>")]);
        assert_eq!(detect(dir.path()), Framework::StaticSite);
    }

    #[test]
    fn empty_tree_is_generic() {
        let dir = tree_with(&[]);
        assert_eq!(detect(dir.path()), Framework::Generic);
    }
}
