//! Synthesized artifacts on disk

use anyhow::{Context, Result};
use stack_core::render::{fingerprint, render_manifests, render_releases, render_template};
use stack_core::StackPlan;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

pub const TEMPLATE_FILE: &str = "template.json";
pub const MANIFESTS_FILE: &str = "manifests.yaml";
pub const RELEASES_FILE: &str = "releases.yaml";

/// Write the template, manifests and releases for `plan` into `dir`
pub fn write_artifacts(plan: &StackPlan, dir: &Path) -> Result<Vec<PathBuf>> {
    fs::create_dir_all(dir)
        .with_context(|| format!("creating output directory {}", dir.display()))?;

    let template = render_template(plan).context("rendering template")?;
    let artifacts = [
        (TEMPLATE_FILE, serde_json::to_string_pretty(&template)?),
        (MANIFESTS_FILE, render_manifests(plan).context("rendering manifests")?),
        (RELEASES_FILE, render_releases(plan).context("rendering releases")?),
    ];

    let mut written = Vec::with_capacity(artifacts.len());
    for (name, contents) in artifacts {
        let path = dir.join(name);
        fs::write(&path, contents).with_context(|| format!("writing {}", path.display()))?;
        written.push(path);
    }

    info!(
        dir = %dir.display(),
        fingerprint = %fingerprint(plan)?,
        "Wrote stack artifacts"
    );
    Ok(written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use stack_core::StackConfig;

    #[test]
    fn test_writes_all_artifacts() {
        let dir = std::env::temp_dir().join(format!("eks-stack-synth-{}", std::process::id()));
        let plan = stack_provision::compose(&StackConfig::default()).unwrap();

        let written = write_artifacts(&plan, &dir).unwrap();
        assert_eq!(written.len(), 3);

        let template: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(dir.join(TEMPLATE_FILE)).unwrap()).unwrap();
        assert_eq!(template["Resources"]["EksCluster"]["Type"], "AWS::EKS::Cluster");
        assert!(fs::read_to_string(dir.join(MANIFESTS_FILE)).unwrap().contains("kind: ClusterRole"));
        assert!(fs::read_to_string(dir.join(RELEASES_FILE)).unwrap().contains("cluster-autoscaler"));

        fs::remove_dir_all(&dir).unwrap();
    }
}
