//! Build descriptor templating.
//!
//! The registry channel deploys each platform with its own artifact id and
//! version, so the checked-in descriptors are materialized per deployment
//! and removed again afterwards.

use std::path::{Path, PathBuf};

use aprel_schema::{DeploymentIdentity, Platform};
use regex::{NoExpand, Regex};
use tracing::{debug, warn};

/// Values substituted into a descriptor template.
#[derive(Debug, Clone)]
pub struct DescriptorParams<'a> {
    pub identity: &'a DeploymentIdentity,
    pub platform: &'a Platform,
    pub artifact_name: &'a str,
}

fn replace_first_element(content: &str, tag: &str, value: &str) -> String {
    let tag_re = regex::escape(tag);
    let pattern = format!("<{tag_re}>.*?</{tag_re}>");
    match Regex::new(&pattern) {
        Ok(re) => re
            .replacen(content, 1, NoExpand(&format!("<{tag}>{value}</{tag}>")))
            .into_owned(),
        Err(_) => content.to_string(),
    }
}

/// Substitute version, platform, artifact id and snapshot suffix into a
/// descriptor template. Only the first occurrence of each element is
/// replaced; the first `<version>` is the project's own.
pub fn materialize(template: &str, params: &DescriptorParams<'_>) -> String {
    let id = params.identity;
    let platform = params.platform.as_str();

    let content = replace_first_element(template, "version", &id.to_string());
    let content = content
        .replace("${project.platform}", platform)
        .replace(
            "${project.artifactId}",
            &format!("{}-{platform}", params.artifact_name),
        );
    let content = replace_first_element(&content, "project.vversion", &id.version);
    let content = replace_first_element(&content, "project.subversion", &id.subversion.to_string());
    let content = replace_first_element(&content, "project.platform", platform);
    replace_first_element(&content, "project.suffix", id.suffix())
}

/// Materialized descriptors for one deployment, deleted on drop.
#[derive(Debug)]
pub struct PreparedDescriptors {
    pub descriptor: PathBuf,
    pub descriptor_all: PathBuf,
}

impl PreparedDescriptors {
    /// Write `{stem}-{identity}.xml` next to each template in `root`.
    pub fn prepare(
        root: &Path,
        templates: [&str; 2],
        params: &DescriptorParams<'_>,
    ) -> std::io::Result<Self> {
        let [single, all] = templates;
        let descriptor = Self::write_one(root, single, params)?;
        let descriptor_all = match Self::write_one(root, all, params) {
            Ok(path) => path,
            Err(e) => {
                std::fs::remove_file(&descriptor).ok();
                return Err(e);
            }
        };
        Ok(Self {
            descriptor,
            descriptor_all,
        })
    }

    fn write_one(root: &Path, template: &str, params: &DescriptorParams<'_>) -> std::io::Result<PathBuf> {
        let source = root.join(template);
        let stem = Path::new(template)
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_else(|| template.to_string());
        let dest = root.join(format!("{stem}-{}.xml", params.identity));

        let content = std::fs::read_to_string(&source)?;
        std::fs::write(&dest, materialize(&content, params))?;
        debug!("Prepared {}", dest.display());
        Ok(dest)
    }

    /// Descriptor to build `platform` with.
    pub fn for_platform(&self, platform: &Platform) -> &Path {
        if platform.is_all() {
            &self.descriptor_all
        } else {
            &self.descriptor
        }
    }
}

impl Drop for PreparedDescriptors {
    fn drop(&mut self) {
        for path in [&self.descriptor, &self.descriptor_all] {
            if let Err(e) = std::fs::remove_file(path) {
                warn!("Failed to remove {}: {e}", path.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE: &str = r#"<project>
  <artifactId>${project.artifactId}</artifactId>
  <version>2.8.3-7</version>
  <properties>
    <project.vversion>2.8.3</project.vversion>
    <project.subversion>7</project.subversion>
    <project.platform>linux-x64</project.platform>
    <project.suffix></project.suffix>
  </properties>
  <dependencies>
    <dependency><version>1.0</version></dependency>
  </dependencies>
  <finalName>ap-loader-${project.platform}</finalName>
</project>"#;

    #[test]
    fn test_materialize_snapshot() {
        let identity = DeploymentIdentity::new("2.9", 8, true);
        let platform = Platform::new("macos").unwrap();
        let params = DescriptorParams {
            identity: &identity,
            platform: &platform,
            artifact_name: "ap-loader",
        };

        let out = materialize(TEMPLATE, &params);

        assert!(out.contains("<artifactId>ap-loader-macos</artifactId>"));
        assert!(out.contains("<version>2.9-8-SNAPSHOT</version>"));
        assert!(out.contains("<dependency><version>1.0</version></dependency>"));
        assert!(out.contains("<project.vversion>2.9</project.vversion>"));
        assert!(out.contains("<project.subversion>8</project.subversion>"));
        assert!(out.contains("<project.platform>macos</project.platform>"));
        assert!(out.contains("<project.suffix>-SNAPSHOT</project.suffix>"));
        assert!(out.contains("<finalName>ap-loader-macos</finalName>"));
    }

    #[test]
    fn test_prepared_descriptors_are_removed() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), TEMPLATE).unwrap();
        std::fs::write(dir.path().join("pom_all.xml"), TEMPLATE).unwrap();

        let identity = DeploymentIdentity::new("2.9", 8, false);
        let platform = Platform::all();
        let params = DescriptorParams {
            identity: &identity,
            platform: &platform,
            artifact_name: "ap-loader",
        };

        let prepared =
            PreparedDescriptors::prepare(dir.path(), ["pom.xml", "pom_all.xml"], &params).unwrap();
        let all = prepared.for_platform(&platform).to_path_buf();
        assert_eq!(all, dir.path().join("pom_all-2.9-8.xml"));
        assert!(
            std::fs::read_to_string(&all)
                .unwrap()
                .contains("<project.suffix></project.suffix>")
        );

        drop(prepared);
        assert!(!all.exists());
        assert!(!dir.path().join("pom-2.9-8.xml").exists());
        assert!(dir.path().join("pom.xml").exists());
    }

    #[test]
    fn test_missing_template_leaves_nothing_behind() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("pom.xml"), TEMPLATE).unwrap();

        let identity = DeploymentIdentity::new("2.9", 8, true);
        let platform = Platform::new("macos").unwrap();
        let params = DescriptorParams {
            identity: &identity,
            platform: &platform,
            artifact_name: "ap-loader",
        };

        assert!(PreparedDescriptors::prepare(dir.path(), ["pom.xml", "pom_all.xml"], &params).is_err());
        assert!(!dir.path().join("pom-2.9-8-SNAPSHOT.xml").exists());
    }
}
