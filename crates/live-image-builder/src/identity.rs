use serde::Serialize;

use crate::assemble::EffectiveConfig;
use crate::config::ConfigValue;
use crate::version::VersionInfo;

pub const ISO_FORMAT: &str = "iso";

/// An image produced by converting the raw disk image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecondaryImage {
    pub format: String,
    pub ext: String,
    pub opts: Vec<String>,
    pub file_name: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactNames {
    pub stem: String,
    /// File name for the first declared image format.
    pub primary: String,
    /// File name of the live ISO, always produced.
    pub iso: String,
    pub secondary: Vec<SecondaryImage>,
}

pub fn artifact_stem(cfg: &EffectiveConfig, version: &str) -> String {
    format!(
        "{}-{}-{}-{}",
        cfg.product_name(),
        version,
        cfg.flavor(),
        cfg.architecture()
    )
}

// `image_ext` / `image_opts` may be a single value for every format or a
// table keyed by format name. The target format is not checked against what
// the converter supports.
fn per_format<'c>(cfg: &'c EffectiveConfig, key: &str, format: &str) -> Option<&'c ConfigValue> {
    match cfg.get(key)? {
        ConfigValue::Map(m) => m.get(format),
        other => Some(other),
    }
}

pub fn image_extension(cfg: &EffectiveConfig, format: &str) -> String {
    if format == ISO_FORMAT {
        return ISO_FORMAT.to_string();
    }
    per_format(cfg, "image_ext", format)
        .and_then(ConfigValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .unwrap_or(format)
        .to_string()
}

pub fn image_options(cfg: &EffectiveConfig, format: &str) -> Vec<String> {
    match per_format(cfg, "image_opts", format) {
        Some(ConfigValue::String(s)) => s.split_whitespace().map(ToOwned::to_owned).collect(),
        Some(ConfigValue::List(items)) => items.iter().filter_map(ConfigValue::scalar_repr).collect(),
        _ => Vec::new(),
    }
}

pub fn artifact_names_for_stem(cfg: &EffectiveConfig, stem: &str) -> ArtifactNames {
    let formats = cfg.image_formats();
    let primary_format = formats.first().map(String::as_str).unwrap_or(ISO_FORMAT);
    let secondary = formats
        .iter()
        .filter(|f| f.as_str() != ISO_FORMAT)
        .map(|format| {
            let ext = image_extension(cfg, format);
            SecondaryImage {
                format: format.clone(),
                opts: image_options(cfg, format),
                file_name: format!("{stem}.{ext}"),
                ext,
            }
        })
        .collect();
    ArtifactNames {
        stem: stem.to_string(),
        primary: format!("{stem}.{}", image_extension(cfg, primary_format)),
        iso: format!("{stem}.{ISO_FORMAT}"),
        secondary,
    }
}

pub fn artifact_names(cfg: &EffectiveConfig, version: &str) -> ArtifactNames {
    artifact_names_for_stem(cfg, &artifact_stem(cfg, version))
}

/// Contents of `version.json`.
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct BuildMetadata {
    pub version: String,
    pub flavor: String,
    pub architecture: String,
    pub build_type: String,
    pub built_by: String,
    pub built_on: String,
    pub build_uuid: String,
    pub build_timestamp: String,
    pub git_commit: String,
    pub git_branch: String,
    pub release_train: String,
    pub lts_build: bool,
    pub build_comment: String,
    pub bugtracker_url: String,
    pub documentation_url: String,
    pub project_news_url: String,
}

fn owned(cfg: &EffectiveConfig, key: &str) -> String {
    cfg.str(key).unwrap_or_default().to_string()
}

impl BuildMetadata {
    pub fn new(cfg: &EffectiveConfig, info: &VersionInfo) -> Self {
        Self {
            version: info.version.clone(),
            flavor: cfg.flavor().to_string(),
            architecture: cfg.architecture().to_string(),
            build_type: cfg.build_type().to_string(),
            built_by: owned(cfg, "build_by"),
            built_on: info.build_date.clone(),
            build_uuid: info.build_uuid.clone(),
            build_timestamp: info.build_timestamp.clone(),
            git_commit: info.git_commit.clone(),
            git_branch: info.git_branch.clone(),
            release_train: owned(cfg, "release_train"),
            lts_build: info.lts_build,
            build_comment: owned(cfg, "build_comment"),
            bugtracker_url: owned(cfg, "bugtracker_url"),
            documentation_url: owned(cfg, "documentation_url"),
            project_news_url: owned(cfg, "project_news_url"),
        }
    }
}

pub fn legacy_version_file(info: &VersionInfo) -> String {
    format!("Version: {}\n", info.version)
}

pub fn os_release(cfg: &EffectiveConfig, info: &VersionInfo) -> String {
    let name = cfg
        .str("product_pretty_name")
        .unwrap_or_else(|| cfg.product_name());
    let train = cfg.str("release_train").unwrap_or(&info.version);
    let lines = [
        format!("PRETTY_NAME=\"{name} {} ({train})\"", info.version),
        format!("NAME=\"{name}\""),
        format!("VERSION_ID=\"{}\"", info.version),
        format!("VERSION=\"{} ({train})\"", info.version),
        format!(
            "VERSION_CODENAME={}",
            cfg.str("debian_distribution").unwrap_or_default()
        ),
        format!("ID={}", cfg.product_name()),
        format!("BUILD_ID=\"{}\"", info.git_commit),
        format!("HOME_URL=\"{}\"", cfg.str("website_url").unwrap_or_default()),
        format!("SUPPORT_URL=\"{}\"", cfg.str("support_url").unwrap_or_default()),
        format!(
            "BUG_REPORT_URL=\"{}\"",
            cfg.str("bugtracker_url").unwrap_or_default()
        ),
        format!(
            "DOCUMENTATION_URL=\"{}\"",
            cfg.str("documentation_url").unwrap_or_default()
        ),
    ];
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
