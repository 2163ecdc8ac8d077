//! Image building.

use tracing::{info, instrument};

use berth_core::{DeploymentId, Framework, ImageHandle, ProjectId};
use berth_runtime::{DockerCli, RuntimeError};

use crate::detect;
use crate::error::{BuildError, BuildResult};
use crate::recipe;
use crate::source::{SourceManager, SourceTree};

/// Result of a successful build.
#[derive(Debug)]
pub struct BuildOutput {
    /// Handle of the built image, unique to this deployment.
    pub image: ImageHandle,
    /// Framework detected from the source tree.
    pub framework: Framework,
    /// Fully resolved commit SHA that was built.
    pub commit_sha: String,
    /// First line of the commit message, when present.
    pub commit_summary: Option<String>,
}

/// Turns a source revision into a runnable container image.
pub struct ImageBuilder {
    sources: SourceManager,
    cli: DockerCli,
}

impl ImageBuilder {
    /// Create a builder over a source manager and a docker CLI handle.
    #[must_use]
    pub fn new(sources: SourceManager, cli: DockerCli) -> Self {
        Self { sources, cli }
    }

    /// Build an image for a deployment.
    ///
    /// Materializes the revision, detects the framework, writes the
    /// build recipe, and runs `docker build`. The working directory is
    /// removed whether the build succeeds or fails.
    #[instrument(skip(self), fields(project = %project_id, deployment = %deployment_id))]
    pub async fn build(
        &self,
        project_id: &ProjectId,
        deployment_id: &DeploymentId,
        repo_url: &str,
        revision: Option<&str>,
    ) -> BuildResult<BuildOutput> {
        let tree = self
            .sources
            .materialize(project_id, repo_url, revision)
            .await?;

        let result = self.build_tree(project_id, deployment_id, &tree).await;
        self.sources.remove(&tree).await;

        let (image, framework) = result?;
        info!(image = %image, framework = %framework, "image built");

        Ok(BuildOutput {
            image,
            framework,
            commit_sha: tree.commit_sha,
            commit_summary: tree.commit_summary,
        })
    }

    async fn build_tree(
        &self,
        project_id: &ProjectId,
        deployment_id: &DeploymentId,
        tree: &SourceTree,
    ) -> BuildResult<(ImageHandle, Framework)> {
        let framework = detect::detect(&tree.path);
        recipe::write_recipe(&tree.path, framework)?;

        let tag = image_tag(project_id, deployment_id);
        let build = self
            .cli
            .run(["build", "-t", &tag, "."], Some(&tree.path))
            .await;

        match build {
            Ok(_) => Ok((ImageHandle::new(tag), framework)),
            Err(RuntimeError::CommandFailed {
                exit_code, stderr, ..
            }) => Err(BuildError::ImageBuild { exit_code, stderr }),
            Err(e) => Err(e.into()),
        }
    }
}

/// Image tag for a build, unique per deployment.
#[must_use]
pub fn image_tag(project_id: &ProjectId, deployment_id: &DeploymentId) -> String {
    format!(
        "berth/{}:{}",
        sanitise_for_tag(project_id.as_str()),
        sanitise_for_tag(deployment_id.as_str())
    )
}

/// Lower-case and restrict to the character set docker tags accept.
fn sanitise_for_tag(s: &str) -> String {
    s.chars()
        .map(|c| {
            let c = c.to_ascii_lowercase();
            if c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.' {
                c
            } else {
                '_'
            }
        })
        .collect()
}
