//! Effective configuration assembly.
//!
//! Layers are folded lowest to highest: built-in defaults, `defaults.toml`,
//! the build-type profile, the architecture profile, the flavor and finally
//! the command-line overrides (nulls skipped). A fixed sequence of
//! fixups then turns the merged document into an [`EffectiveConfig`].

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::OnceLock;

use regex::Regex;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, info};

use crate::config::{ConfigDoc, ConfigValue, Map, ProfileStore, string_list_value};
use crate::error::{Error, Result};
use crate::merge::{NullMode, merge, merge_maps};
use crate::options::{self, BuildOverrides};

pub const DEFAULT_PRODUCT_NAME: &str = "orbit";
pub const DEFAULT_DISK_SIZE_GB: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildType {
    Release,
    Development,
}

impl FromStr for BuildType {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim() {
            "release" => Ok(BuildType::Release),
            "development" => Ok(BuildType::Development),
            other => Err(Error::validation(format!(
                "unknown build type '{other}' (expected release or development)"
            ))),
        }
    }
}

impl fmt::Display for BuildType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildType::Release => write!(f, "release"),
            BuildType::Development => write!(f, "development"),
        }
    }
}

/// Everything the command line contributes to one build.
#[derive(Debug, Clone, Default)]
pub struct BuildRequest {
    pub flavor: String,
    pub overrides: BuildOverrides,
    pub custom_packages: Vec<String>,
    pub custom_apt_entries: Vec<String>,
    pub custom_apt_keys: Vec<String>,
    pub disk_size: Option<u64>,
}

impl BuildRequest {
    pub fn new(flavor: impl Into<String>) -> Self {
        Self {
            flavor: flavor.into(),
            ..Self::default()
        }
    }

    fn override_layer(&self) -> Result<ConfigValue> {
        let mut layer = self.overrides.to_layer();
        for (key, items) in [
            ("custom_packages", &self.custom_packages),
            ("custom_apt_entry", &self.custom_apt_entries),
            ("custom_apt_key", &self.custom_apt_keys),
        ] {
            let v = if items.is_empty() {
                ConfigValue::Null
            } else {
                ConfigValue::from(items.clone())
            };
            layer.insert(key.to_string(), v);
        }
        let disk_size = match self.disk_size {
            None => ConfigValue::Null,
            Some(gb) => i64::try_from(gb).map(ConfigValue::Integer).map_err(|_| {
                Error::validation(format!("{gb} is an invalid value for --disk-size"))
            })?,
        };
        layer.insert("disk_size".into(), disk_size);
        Ok(ConfigValue::Map(layer))
    }
}

/// Built-in defaults with `defaults.toml` merged over them. Constructed once
/// and handed to every [`Assembler`].
#[derive(Debug, Clone)]
pub struct Defaults {
    value: ConfigValue,
}

impl Defaults {
    pub fn builtin() -> Map {
        let mut m = options::registry_defaults();
        m.insert("product_name".into(), DEFAULT_PRODUCT_NAME.into());
        m.insert("build_dir".into(), "build".into());
        m.insert("disk_size".into(), ConfigValue::Integer(DEFAULT_DISK_SIZE_GB));
        m.insert("packages".into(), ConfigValue::List(Vec::new()));
        m
    }

    pub fn new(global: &ConfigDoc) -> Self {
        let builtin = ConfigValue::Map(Self::builtin());
        Self {
            value: merge(&global.value, &builtin, NullMode::Replace),
        }
    }

    pub fn load(store: &ProfileStore) -> Result<Self> {
        Ok(Self::new(&store.load_defaults()?))
    }

    pub fn value(&self) -> &ConfigValue {
        &self.value
    }
}

pub fn builtin_boot_settings() -> Map {
    let mut m = Map::new();
    m.insert("timeout".into(), ConfigValue::Integer(5));
    m.insert("console_type".into(), "tty".into());
    m.insert("console_num".into(), ConfigValue::Integer(0));
    m.insert("console_speed".into(), "115200".into());
    m.insert("bootmode".into(), "normal".into());
    m
}

/// Console and boot menu settings handed to the bootloader configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BootSettings {
    pub timeout: i64,
    pub console_type: String,
    pub console_num: i64,
    pub console_speed: String,
    pub bootmode: String,
}

impl BootSettings {
    /// Kernel `console=` argument; serial consoles carry their speed.
    pub fn kernel_console(&self) -> String {
        if self.console_type == "ttyS" {
            format!(
                "console={}{},{}",
                self.console_type, self.console_num, self.console_speed
            )
        } else {
            format!("console={}{}", self.console_type, self.console_num)
        }
    }
}

/// The merged, fixed-up configuration for one build. Read-only.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    doc: ConfigDoc,
}

impl EffectiveConfig {
    /// Run the fixups over an already-merged document.
    pub fn from_merged(path: impl Into<PathBuf>, mut map: Map) -> Result<Self> {
        apply_fixups(&mut map)?;
        Ok(Self {
            doc: ConfigDoc::new(path, ConfigValue::Map(map)),
        })
    }

    pub fn doc(&self) -> &ConfigDoc {
        &self.doc
    }

    pub fn str(&self, key: &str) -> Option<&str> {
        self.doc.str(key)
    }

    pub fn get(&self, key: &str) -> Option<&ConfigValue> {
        self.doc.get(key)
    }

    pub fn architecture(&self) -> &str {
        self.str("architecture").unwrap_or_default()
    }

    pub fn flavor(&self) -> &str {
        self.str("build_flavor").unwrap_or_default()
    }

    pub fn product_name(&self) -> &str {
        self.str("product_name").unwrap_or(DEFAULT_PRODUCT_NAME)
    }

    pub fn build_dir(&self) -> &str {
        self.str("build_dir").unwrap_or("build")
    }

    pub fn build_type(&self) -> BuildType {
        self.str("build_type")
            .and_then(|s| s.parse().ok())
            .unwrap_or(BuildType::Development)
    }

    pub fn version(&self) -> Option<&str> {
        self.str("version")
    }

    pub fn disk_size_gb(&self) -> i64 {
        self.get("disk_size")
            .and_then(ConfigValue::as_integer)
            .unwrap_or(DEFAULT_DISK_SIZE_GB)
    }

    pub fn image_formats(&self) -> Vec<String> {
        self.doc.string_list("image_format").unwrap_or_default()
    }

    pub fn packages(&self) -> Vec<String> {
        self.doc.string_list("packages").unwrap_or_default()
    }

    pub fn string_list(&self, key: &str) -> Vec<String> {
        self.doc.string_list(key).unwrap_or_default()
    }

    pub fn table(&self, key: &str) -> Option<&Map> {
        self.doc.table_path(key)
    }

    pub fn deserialize_path<T: DeserializeOwned>(&self, path: &str) -> Result<Option<T>> {
        self.doc.deserialize_path(path)
    }

    pub fn boot_settings(&self) -> Option<&Map> {
        self.table("boot_settings")
    }

    pub fn boot(&self) -> Result<BootSettings> {
        self.deserialize_path("boot_settings")?
            .ok_or_else(|| Error::validation("boot_settings is missing from the configuration"))
    }
}

pub struct Assembler<'a> {
    store: &'a ProfileStore,
    defaults: &'a Defaults,
}

impl<'a> Assembler<'a> {
    pub fn new(store: &'a ProfileStore, defaults: &'a Defaults) -> Self {
        Self { store, defaults }
    }

    pub fn assemble(&self, req: &BuildRequest) -> Result<EffectiveConfig> {
        req.overrides.validate()?;

        let mut cfg = self.defaults.value().clone();

        let build_type = selector(req, &cfg, "build_type")?;
        let bt_doc = self.store.load_build_type(&build_type)?;
        debug!("merging build type profile {}", bt_doc.path.display());
        cfg = merge(&bt_doc.value, &cfg, NullMode::Replace);

        let arch = selector(req, &cfg, "architecture")?;
        let arch_doc = self.store.load_architecture(&arch)?;
        debug!("merging architecture profile {}", arch_doc.path.display());
        cfg = merge(&arch_doc.value, &cfg, NullMode::Replace);

        let flavor_doc = self.store.load_flavor(&req.flavor)?;
        debug!("merging flavor {}", flavor_doc.path.display());
        cfg = merge(&flavor_doc.value, &cfg, NullMode::Replace);

        cfg = merge(&req.override_layer()?, &cfg, NullMode::Skip);

        let ConfigValue::Map(mut map) = cfg else {
            return Err(Error::validation("merged configuration is not a table"));
        };
        map.insert("build_flavor".into(), req.flavor.trim().into());

        let effective = EffectiveConfig::from_merged(flavor_doc.path, map)?;
        info!(
            "assembled configuration: flavor={} architecture={} build_type={}",
            effective.flavor(),
            effective.architecture(),
            effective.build_type()
        );
        Ok(effective)
    }
}

/// Value of a profile-selecting field: CLI first, then the layers so far.
fn selector(req: &BuildRequest, cfg: &ConfigValue, key: &str) -> Result<String> {
    let raw = req
        .overrides
        .get(key)
        .or_else(|| cfg.get(key).and_then(ConfigValue::as_str))
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| Error::validation(format!("'{key}' is not set in any configuration layer")))?;
    validate_field(key, raw)?;
    Ok(raw.to_string())
}

fn validate_field(key: &str, raw: &str) -> Result<()> {
    let Some(spec) = options::lookup(key) else {
        return Ok(());
    };
    match spec.validator {
        Some(check) if !check(raw) => Err(Error::validation(format!(
            "{} is an invalid value for --{}",
            raw, spec.flag
        ))),
        _ => Ok(()),
    }
}

pub fn apply_fixups(cfg: &mut Map) -> Result<()> {
    apply_mirror_fallback(cfg)?;
    check_version(cfg)?;
    fold_custom_packages(cfg)?;
    inject_architecture_packages(cfg)?;
    require_image_format(cfg)?;
    default_boot_settings(cfg)?;
    normalize_image_format(cfg)?;
    for key in ["architecture", "build_type"] {
        let raw = str_field(cfg, key)
            .ok_or_else(|| Error::validation(format!("'{key}' is not set")))?;
        validate_field(key, raw)?;
    }
    Ok(())
}

fn str_field<'m>(cfg: &'m Map, key: &str) -> Option<&'m str> {
    cfg.get(key)
        .and_then(ConfigValue::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
}

fn take_string_list(cfg: &mut Map, key: &str) -> Result<Vec<String>> {
    string_list_value(key, cfg.remove(key).as_ref())
}

fn append_packages(cfg: &mut Map, extra: Vec<String>) -> Result<()> {
    if extra.is_empty() {
        return Ok(());
    }
    let mut packages = take_string_list(cfg, "packages")?;
    packages.extend(extra);
    cfg.insert("packages".into(), ConfigValue::from(packages));
    Ok(())
}

pub fn apply_mirror_fallback(cfg: &mut Map) -> Result<()> {
    let Some(mirror) = str_field(cfg, "debian_mirror").map(ToOwned::to_owned) else {
        return Err(Error::validation(
            "debian_mirror is not set in any configuration layer; a package mirror is required",
        ));
    };
    if str_field(cfg, "debian_security_mirror").is_none() {
        return Err(Error::validation(
            "debian_security_mirror is not set in any configuration layer; a security mirror is required",
        ));
    }
    if str_field(cfg, "pbuilder_debian_mirror").is_none() {
        cfg.insert("pbuilder_debian_mirror".into(), mirror.into());
    }
    Ok(())
}

fn version_charset() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^[A-Za-z0-9.+-]+$").expect("static regex"))
}

pub fn check_version(cfg: &Map) -> Result<()> {
    let Some(version) = str_field(cfg, "version") else {
        return Ok(());
    };
    let build_type = str_field(cfg, "build_type").unwrap_or("development");
    if build_type != "release" {
        return Err(Error::validation(format!(
            "a version ('{version}') may only be set for release builds (build type is '{build_type}')"
        )));
    }
    if !version_charset().is_match(version) {
        return Err(Error::validation(format!(
            "version '{version}' contains illegal characters (allowed: letters, digits, '.', '-', '+')"
        )));
    }
    Ok(())
}

pub fn fold_custom_packages(cfg: &mut Map) -> Result<()> {
    let custom = take_string_list(cfg, "custom_packages")?;
    append_packages(cfg, custom)
}

pub fn inject_architecture_packages(cfg: &mut Map) -> Result<()> {
    let Some(arch) = str_field(cfg, "architecture").map(ToOwned::to_owned) else {
        return Ok(());
    };
    let Some(per_arch) = cfg.remove("architectures") else {
        return Ok(());
    };
    let Some(entry) = per_arch.get(&arch) else {
        return Ok(());
    };
    let extra = string_list_value("packages", entry.get("packages"))?;
    debug!("adding {} {}-specific packages", extra.len(), arch);
    append_packages(cfg, extra)
}

pub fn require_image_format(cfg: &Map) -> Result<()> {
    match cfg.get("image_format") {
        None | Some(ConfigValue::Null) => Err(Error::validation(
            "image_format is not set; the flavor must declare at least one image format",
        )),
        Some(ConfigValue::List(items)) if items.is_empty() => Err(Error::validation(
            "image_format is empty; the flavor must declare at least one image format",
        )),
        Some(v) => {
            let formats = string_list_value("image_format", Some(v))?;
            if formats.iter().any(|f| f.trim().is_empty()) {
                return Err(Error::validation("image_format entries must not be empty"));
            }
            Ok(())
        }
    }
}

pub fn default_boot_settings(cfg: &mut Map) -> Result<()> {
    let builtin = builtin_boot_settings();
    let merged = match cfg.get("boot_settings") {
        None | Some(ConfigValue::Null) => builtin,
        Some(ConfigValue::Map(declared)) => merge_maps(declared, &builtin, NullMode::Replace),
        Some(other) => {
            return Err(Error::validation(format!(
                "boot_settings must be a table, got {}",
                other.type_str()
            )));
        }
    };
    cfg.insert("boot_settings".into(), ConfigValue::Map(merged));
    Ok(())
}

pub fn normalize_image_format(cfg: &mut Map) -> Result<()> {
    let formats = take_string_list(cfg, "image_format")?;
    cfg.insert("image_format".into(), ConfigValue::from(formats));
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(src: &str) -> Map {
        let tbl: toml::Table = toml::from_str(src).expect("valid toml");
        match ConfigValue::from(tbl) {
            ConfigValue::Map(m) => m,
            _ => unreachable!(),
        }
    }

    #[test]
    fn pbuilder_mirror_falls_back_to_debian_mirror() {
        let mut cfg = map(
            r#"
debian_mirror = "http://deb.debian.org/debian"
debian_security_mirror = "http://deb.debian.org/debian-security"
"#,
        );
        apply_mirror_fallback(&mut cfg).expect("fallback");
        assert_eq!(
            str_field(&cfg, "pbuilder_debian_mirror"),
            Some("http://deb.debian.org/debian")
        );
    }

    #[test]
    fn explicit_pbuilder_mirror_is_kept() {
        let mut cfg = map(
            r#"
debian_mirror = "http://a/debian"
debian_security_mirror = "http://a/debian-security"
pbuilder_debian_mirror = "http://b/debian"
"#,
        );
        apply_mirror_fallback(&mut cfg).expect("fallback");
        assert_eq!(str_field(&cfg, "pbuilder_debian_mirror"), Some("http://b/debian"));
    }

    #[test]
    fn missing_mirrors_are_fatal() {
        let mut cfg = map(r#"debian_security_mirror = "http://a/sec""#);
        let err = apply_mirror_fallback(&mut cfg).expect_err("must fail");
        assert!(err.to_string().contains("debian_mirror"), "{err}");

        let mut cfg = map(r#"debian_mirror = "http://a/debian""#);
        let err = apply_mirror_fallback(&mut cfg).expect_err("must fail");
        assert!(err.to_string().contains("debian_security_mirror"), "{err}");
    }

    #[test]
    fn version_requires_release_build() {
        let cfg = map(
            r#"
build_type = "development"
version = "1.4.0"
"#,
        );
        let err = check_version(&cfg).expect_err("must fail");
        assert!(err.to_string().contains("release builds"), "{err}");

        let cfg = map(
            r#"
build_type = "release"
version = "1.4.0"
"#,
        );
        check_version(&cfg).expect("release may carry a version");
    }

    #[test]
    fn version_charset_is_restricted() {
        for bad in ["1.4 0", "1.4;rm", "1/4", "1.4_0"] {
            let mut cfg = map(r#"build_type = "release""#);
            cfg.insert("version".into(), bad.into());
            assert!(check_version(&cfg).is_err(), "accepted {bad}");
        }
        let mut cfg = map(r#"build_type = "release""#);
        cfg.insert("version".into(), "1.4.0-rc1+deb12".into());
        check_version(&cfg).expect("valid charset");
    }

    #[test]
    fn custom_packages_fold_into_packages() {
        let mut cfg = map(
            r#"
packages = ["vim"]
custom_packages = ["htop", "vim"]
"#,
        );
        fold_custom_packages(&mut cfg).expect("fold");
        assert!(!cfg.contains_key("custom_packages"));
        assert_eq!(
            cfg.get("packages"),
            Some(&ConfigValue::from(vec![
                "vim".to_string(),
                "htop".to_string(),
                "vim".to_string()
            ]))
        );
        fold_custom_packages(&mut cfg).expect("idempotent");
        assert_eq!(cfg.get("packages").and_then(ConfigValue::as_list).map(<[_]>::len), Some(3));
    }

    #[test]
    fn architecture_packages_are_injected_once() {
        let mut cfg = map(
            r#"
architecture = "arm64"
packages = ["base"]

[architectures.arm64]
packages = ["u-boot-tools"]

[architectures.amd64]
packages = ["grub-pc"]
"#,
        );
        inject_architecture_packages(&mut cfg).expect("inject");
        inject_architecture_packages(&mut cfg).expect("idempotent");
        assert_eq!(
            cfg.get("packages"),
            Some(&ConfigValue::from(vec![
                "base".to_string(),
                "u-boot-tools".to_string()
            ]))
        );
    }

    #[test]
    fn scalar_image_format_becomes_list() {
        let mut cfg = map(r#"image_format = "iso""#);
        normalize_image_format(&mut cfg).expect("normalize");
        assert_eq!(cfg.get("image_format"), Some(&ConfigValue::from(vec!["iso".to_string()])));

        let mut cfg = map(r#"image_format = ["iso", "raw"]"#);
        normalize_image_format(&mut cfg).expect("normalize");
        assert_eq!(
            cfg.get("image_format"),
            Some(&ConfigValue::from(vec!["iso".to_string(), "raw".to_string()]))
        );
    }

    #[test]
    fn oversized_disk_size_is_rejected() {
        let mut req = BuildRequest::new("generic");
        req.disk_size = Some(u64::MAX);
        let err = req.override_layer().expect_err("must fail");
        assert_eq!(err.kind(), crate::error::ErrorKind::Validation);
        assert!(err.to_string().contains("--disk-size"), "{err}");

        req.disk_size = Some(20);
        let layer = req.override_layer().expect("layer");
        assert_eq!(layer.get("disk_size"), Some(&ConfigValue::Integer(20)));
    }

    #[test]
    fn missing_image_format_is_fatal() {
        assert!(require_image_format(&map("")).is_err());
        assert!(require_image_format(&map("image_format = []")).is_err());
        for blank in [r#"image_format = """#, r#"image_format = ["iso", " "]"#] {
            let err = require_image_format(&map(blank)).expect_err("blank format");
            assert!(err.to_string().contains("must not be empty"), "{err}");
        }
        require_image_format(&map(r#"image_format = "iso""#)).expect("present");
    }

    #[test]
    fn boot_settings_merge_over_builtin() {
        let mut cfg = map(
            r#"
[boot_settings]
console_type = "ttyS"
console_num = 1
"#,
        );
        default_boot_settings(&mut cfg).expect("defaults");
        let bs = cfg.get("boot_settings").expect("present");
        assert_eq!(bs.get("console_type").and_then(ConfigValue::as_str), Some("ttyS"));
        assert_eq!(bs.get("console_num").and_then(ConfigValue::as_integer), Some(1));
        assert_eq!(bs.get("timeout").and_then(ConfigValue::as_integer), Some(5));

        let mut cfg = map("");
        default_boot_settings(&mut cfg).expect("defaults");
        assert_eq!(
            cfg.get("boot_settings"),
            Some(&ConfigValue::Map(builtin_boot_settings()))
        );
    }

    #[test]
    fn build_type_parses() {
        assert_eq!("release".parse::<BuildType>().expect("parse"), BuildType::Release);
        assert!("nightly".parse::<BuildType>().is_err());
    }
}
