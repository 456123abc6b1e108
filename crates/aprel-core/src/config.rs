//! Process-wide configuration.
//!
//! Layered: compiled defaults, then an optional `aprel.toml` in the project
//! root, then `APREL_*` environment variables. The CLI applies its flags on
//! top. Every directory the pipeline touches derives from [`Config::root`],
//! which lets tests point a whole pipeline at a temporary directory.

use std::path::{Path, PathBuf};
use std::time::Duration;

use aprel_schema::{ArchiveFormat, Platform};
use serde::Deserialize;
use thiserror::Error;

/// Name of the optional configuration file in the project root.
pub const CONFIG_FILE: &str = "aprel.toml";

/// Default lifetime of cached release metadata (one day).
pub const DEFAULT_CACHE_TTL: Duration = Duration::from_secs(60 * 60 * 24);

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    Env { key: &'static str, value: String },
}

/// Where the upstream project lives and which of its releases are supported.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct UpstreamConfig {
    /// Upstream project name, used in archive and directory names.
    pub project: String,
    /// Release list endpoint (GitHub releases API).
    pub releases_url: String,
    /// Source snapshot URL; `{version}` is replaced with the release version.
    pub source_archive_url: String,
    /// Versions starting with this prefix are supported.
    pub supported_major: String,
    /// Versions starting with this prefix are never offered.
    pub legacy_major: String,
    /// Attribution appended to the copied upstream changelog.
    pub attribution: String,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            project: "async-profiler".to_string(),
            releases_url: "https://api.github.com/repos/jvm-profiling-tools/async-profiler/releases"
                .to_string(),
            source_archive_url:
                "https://github.com/jvm-profiling-tools/async-profiler/archive/refs/tags/v{version}.zip"
                    .to_string(),
            supported_major: "2.".to_string(),
            legacy_major: "1.".to_string(),
            attribution: "by [Andrei Pangin](https://github.com/apangin)".to_string(),
        }
    }
}

/// How the loader itself is named, versioned and described.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct PackagingConfig {
    /// Artifact name of the loader (`ap-loader`).
    pub artifact_name: String,
    /// Local packaging revision, independent of the upstream version.
    pub subversion: u32,
    /// Release notes of this packaging revision, prepended to the changelog.
    pub release_notes: String,
    /// Build descriptor for single-platform bundles.
    pub descriptor: String,
    /// Build descriptor for the combined bundle.
    pub descriptor_all: String,
}

impl Default for PackagingConfig {
    fn default() -> Self {
        Self {
            artifact_name: "ap-loader".to_string(),
            subversion: 7,
            release_notes: "- Drop dev.dirs:directories dependency #13 (thanks to @jsjant for \
                            spotting the potential licensing issue and fixing it in #14)\n"
                .to_string(),
            descriptor: "pom.xml".to_string(),
            descriptor_all: "pom_all.xml".to_string(),
        }
    }
}

/// External programs and how the verification harness drives them.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ToolConfig {
    pub build_tool: String,
    pub java: String,
    pub javac: String,
    pub shell: String,
    pub code_host_cli: String,
    /// Extension the embedded agent library must have (`.so`).
    pub native_lib_extension: String,
    /// Main class run under the agent during the basic execution check.
    pub smoke_target: String,
    /// Also convert the recorded profile to a flame graph.
    pub convert_profile: bool,
    /// Shell template selecting a runtime version. `{version}` is the
    /// selector and `{command}` the quoted command line to run.
    pub runtime_wrapper: String,
}

impl Default for ToolConfig {
    fn default() -> Self {
        Self {
            build_tool: "mvn".to_string(),
            java: "java".to_string(),
            javac: "javac".to_string(),
            shell: "bash".to_string(),
            code_host_cli: "gh".to_string(),
            native_lib_extension: ".so".to_string(),
            smoke_target: "ThreadsTarget".to_string(),
            convert_profile: true,
            runtime_wrapper: "source \"$HOME/.sdkman/bin/sdkman-init.sh\" && \
                              sdk use java {version} > /dev/null && {command}"
                .to_string(),
        }
    }
}

#[derive(Debug, Default, Deserialize)]
#[serde(default, deny_unknown_fields)]
struct FileConfig {
    cache_ttl_secs: Option<u64>,
    serve_stale_on_error: Option<bool>,
    upstream: Option<UpstreamConfig>,
    packaging: Option<PackagingConfig>,
    tools: Option<ToolConfig>,
}

/// Explicit configuration passed to every pipeline component.
#[derive(Debug, Clone)]
pub struct Config {
    pub root: PathBuf,
    pub cache_dir: PathBuf,
    pub artifacts_dir: PathBuf,
    pub output_dir: PathBuf,
    pub target_dir: PathBuf,
    pub tests_dir: PathBuf,
    pub tests_code_dir: PathBuf,
    pub cache_ttl: Duration,
    /// Return a stale cache entry instead of failing when a refresh fails.
    pub serve_stale_on_error: bool,
    pub upstream: UpstreamConfig,
    pub packaging: PackagingConfig,
    pub tools: ToolConfig,
}

impl Config {
    /// Defaults rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        Self {
            cache_dir: root.join(".cache"),
            artifacts_dir: root.join("ap-releases"),
            output_dir: root.join("releases"),
            target_dir: root.join("target"),
            tests_dir: root.join(".tests"),
            tests_code_dir: root.join(".tests_code"),
            cache_ttl: DEFAULT_CACHE_TTL,
            serve_stale_on_error: false,
            upstream: UpstreamConfig::default(),
            packaging: PackagingConfig::default(),
            tools: ToolConfig::default(),
            root,
        }
    }

    /// Defaults, overlaid with `aprel.toml` (if present) and the process
    /// environment.
    pub fn load(root: impl Into<PathBuf>) -> Result<Self, ConfigError> {
        let mut config = Self::new(root);
        let file = config.root.join(CONFIG_FILE);
        if file.exists() {
            let content = std::fs::read_to_string(&file).map_err(|source| ConfigError::Read {
                path: file.clone(),
                source,
            })?;
            config.apply_file(&content).map_err(|source| ConfigError::Parse {
                path: file.clone(),
                source,
            })?;
            tracing::debug!("Loaded {}", file.display());
        }
        config.apply_env(|key| std::env::var(key).ok())?;
        Ok(config)
    }

    fn apply_file(&mut self, content: &str) -> Result<(), toml::de::Error> {
        let file: FileConfig = toml::from_str(content)?;
        if let Some(secs) = file.cache_ttl_secs {
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(stale) = file.serve_stale_on_error {
            self.serve_stale_on_error = stale;
        }
        if let Some(upstream) = file.upstream {
            self.upstream = upstream;
        }
        if let Some(packaging) = file.packaging {
            self.packaging = packaging;
        }
        if let Some(tools) = file.tools {
            self.tools = tools;
        }
        Ok(())
    }

    /// Apply `APREL_CACHE_TTL_SECS` and `APREL_SUBVERSION` from `lookup`.
    pub fn apply_env(
        &mut self,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<(), ConfigError> {
        if let Some(value) = lookup("APREL_CACHE_TTL_SECS") {
            let secs = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "APREL_CACHE_TTL_SECS",
                value: value.clone(),
            })?;
            self.cache_ttl = Duration::from_secs(secs);
        }
        if let Some(value) = lookup("APREL_SUBVERSION") {
            self.packaging.subversion = value.trim().parse().map_err(|_| ConfigError::Env {
                key: "APREL_SUBVERSION",
                value: value.clone(),
            })?;
        }
        Ok(())
    }

    /// Cache file for a metadata key.
    pub fn cache_file(&self, key: &str) -> PathBuf {
        self.cache_dir.join(key)
    }

    /// Downloaded platform archive: `ap-releases/{project}-{version}-{platform}{ext}`.
    pub fn archive_path(&self, version: &str, platform: &Platform, format: ArchiveFormat) -> PathBuf {
        self.artifacts_dir.join(format!(
            "{}-{version}-{platform}{}",
            self.upstream.project,
            format.extension()
        ))
    }

    /// Downloaded source snapshot archive.
    pub fn source_archive_path(&self, version: &str) -> PathBuf {
        self.artifacts_dir
            .join(format!("{}-{version}-code.zip", self.upstream.project))
    }

    /// Unpacked source snapshot.
    pub fn source_dir(&self, version: &str) -> PathBuf {
        self.artifacts_dir
            .join(format!("{}-{version}-code", self.upstream.project))
    }

    /// Source snapshot URL for a version.
    pub fn source_archive_url(&self, version: &str) -> String {
        self.upstream.source_archive_url.replace("{version}", version)
    }

    /// Stable output path of a built loader.
    pub fn artifact_path(&self, version: &str, platform: &Platform) -> PathBuf {
        self.output_dir.join(format!(
            "{}-{platform}-{version}-{}.jar",
            self.packaging.artifact_name, self.packaging.subversion
        ))
    }

    /// Where the build tool leaves a freshly built loader.
    pub fn build_output_path(&self, version: &str, platform: &Platform) -> PathBuf {
        self.target_dir.join(format!(
            "{}-{platform}-{version}-{}-full.jar",
            self.packaging.artifact_name, self.packaging.subversion
        ))
    }

    /// Channel-neutral file name used when attaching a loader to a release.
    pub fn staged_artifact_name(&self, platform: &Platform) -> String {
        format!("{}-{platform}.jar", self.packaging.artifact_name)
    }

    /// Persisted verification report of a version.
    pub fn report_path(&self, version: &str) -> PathBuf {
        self.output_dir.join(format!(
            "verification-{version}-{}.json",
            self.packaging.subversion
        ))
    }

    /// Directory holding the replayed upstream test scripts.
    pub fn test_scripts_dir(&self) -> PathBuf {
        self.tests_code_dir.join("test")
    }

    /// Directories removed by `clear`.
    pub fn clearable_dirs(&self) -> [&Path; 5] {
        [
            &self.artifacts_dir,
            &self.output_dir,
            &self.target_dir,
            &self.tests_dir,
            &self.tests_code_dir,
        ]
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_paths_derive_from_root() {
        let config = Config::new("/work");
        let linux = Platform::new("linux-x64").unwrap();

        assert_eq!(config.cache_dir, Path::new("/work/.cache"));
        assert_eq!(
            config.archive_path("2.8.3", &linux, ArchiveFormat::TarGz),
            Path::new("/work/ap-releases/async-profiler-2.8.3-linux-x64.tar.gz")
        );
        assert_eq!(
            config.artifact_path("2.8.3", &Platform::all()),
            Path::new("/work/releases/ap-loader-all-2.8.3-7.jar")
        );
        assert_eq!(
            config.build_output_path("2.8.3", &linux),
            Path::new("/work/target/ap-loader-linux-x64-2.8.3-7-full.jar")
        );
        assert_eq!(
            config.source_archive_url("2.8.3"),
            "https://github.com/jvm-profiling-tools/async-profiler/archive/refs/tags/v2.8.3.zip"
        );
    }

    #[test]
    fn test_file_overrides_partial_sections() {
        let mut config = Config::new("/work");
        config
            .apply_file(
                r#"
                cache_ttl_secs = 5

                [packaging]
                subversion = 9

                [tools]
                java = "/opt/jdk/bin/java"
                "#,
            )
            .unwrap();

        assert_eq!(config.cache_ttl, Duration::from_secs(5));
        assert_eq!(config.packaging.subversion, 9);
        assert_eq!(config.packaging.artifact_name, "ap-loader");
        assert_eq!(config.tools.java, "/opt/jdk/bin/java");
        assert_eq!(config.tools.build_tool, "mvn");
    }

    #[test]
    fn test_file_rejects_unknown_keys() {
        let mut config = Config::new("/work");
        assert!(config.apply_file("cache_ttl = 5").is_err());
    }

    #[test]
    fn test_env_overrides() {
        let mut config = Config::new("/work");
        config
            .apply_env(|key| match key {
                "APREL_SUBVERSION" => Some("12".to_string()),
                "APREL_CACHE_TTL_SECS" => Some("0".to_string()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.packaging.subversion, 12);
        assert_eq!(config.cache_ttl, Duration::ZERO);

        let err = config
            .apply_env(|key| (key == "APREL_SUBVERSION").then(|| "seven".to_string()))
            .unwrap_err();
        assert!(matches!(err, ConfigError::Env { key: "APREL_SUBVERSION", .. }));
    }

    #[test]
    fn test_load_reads_config_file() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(
            dir.path().join(CONFIG_FILE),
            "[upstream]\nsupported_major = \"3.\"\n",
        )
        .unwrap();

        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.upstream.supported_major, "3.");
        assert_eq!(config.upstream.project, "async-profiler");
        assert_eq!(config.output_dir, dir.path().join("releases"));
    }
}
