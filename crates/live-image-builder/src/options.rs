use std::collections::BTreeMap;

use clap::{Arg, ArgMatches, Args, Command, FromArgMatches};

use crate::config::{ConfigValue, Map};
use crate::error::{Error, Result};

pub type Validator = fn(&str) -> bool;

/// A build field that may be overridden from the command line.
#[derive(Debug)]
pub struct OptionSpec {
    /// Key in the configuration documents.
    pub name: &'static str,
    /// Command-line flag, without the leading `--`.
    pub flag: &'static str,
    pub description: &'static str,
    pub validator: Option<Validator>,
    pub default: Option<fn() -> ConfigValue>,
}

pub const SUPPORTED_ARCHITECTURES: &[&str] = &["amd64", "arm64"];
pub const BUILD_TYPES: &[&str] = &["release", "development"];

pub static BUILD_OPTIONS: &[OptionSpec] = &[
    OptionSpec {
        name: "architecture",
        flag: "architecture",
        description: "Image target architecture (amd64 or arm64)",
        validator: Some(is_supported_architecture),
        default: None,
    },
    OptionSpec {
        name: "build_by",
        flag: "build-by",
        description: "Builder identifier (e.g. jrandomhacker@example.net)",
        validator: None,
        default: Some(default_build_by),
    },
    OptionSpec {
        name: "debian_mirror",
        flag: "debian-mirror",
        description: "Debian repository mirror",
        validator: None,
        default: None,
    },
    OptionSpec {
        name: "debian_security_mirror",
        flag: "debian-security-mirror",
        description: "Debian security updates mirror",
        validator: None,
        default: None,
    },
    OptionSpec {
        name: "pbuilder_debian_mirror",
        flag: "pbuilder-debian-mirror",
        description: "Debian repository mirror for pbuilder env bootstrap",
        validator: None,
        default: None,
    },
    OptionSpec {
        name: "package_mirror",
        flag: "package-mirror",
        description: "Product package repository mirror",
        validator: None,
        default: None,
    },
    OptionSpec {
        name: "build_type",
        flag: "build-type",
        description: "Build type, release or development",
        validator: Some(is_build_type),
        default: Some(default_build_type),
    },
    OptionSpec {
        name: "version",
        flag: "version",
        description: "Version string (release builds only)",
        validator: None,
        default: None,
    },
    OptionSpec {
        name: "build_comment",
        flag: "build-comment",
        description: "Optional build comment",
        validator: None,
        default: Some(default_build_comment),
    },
    OptionSpec {
        name: "bootloaders",
        flag: "bootloaders",
        description: "Bootloaders to include in the image",
        validator: None,
        default: None,
    },
];

fn is_supported_architecture(v: &str) -> bool {
    SUPPORTED_ARCHITECTURES.contains(&v)
}

fn is_build_type(v: &str) -> bool {
    BUILD_TYPES.contains(&v)
}

fn default_build_type() -> ConfigValue {
    "development".into()
}

fn default_build_comment() -> ConfigValue {
    "".into()
}

fn default_build_by() -> ConfigValue {
    let user = ["USER", "LOGNAME"]
        .iter()
        .find_map(|k| std::env::var(k).ok().filter(|s| !s.trim().is_empty()))
        .unwrap_or_else(|| "builder".to_string());
    let host = std::fs::read_to_string("/proc/sys/kernel/hostname")
        .or_else(|_| std::fs::read_to_string("/etc/hostname"))
        .map(|s| s.trim().to_string())
        .ok()
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{user}@{host}").into()
}

pub fn lookup(name: &str) -> Option<&'static OptionSpec> {
    BUILD_OPTIONS.iter().find(|o| o.name == name)
}

/// Defaults produced by the registry's default generators.
pub fn registry_defaults() -> Map {
    BUILD_OPTIONS
        .iter()
        .filter_map(|o| o.default.map(|f| (o.name.to_string(), f())))
        .collect()
}

/// Raw command-line values for every registered option; `None` when the flag
/// was not given.
#[derive(Debug, Clone, Default)]
pub struct BuildOverrides {
    values: BTreeMap<&'static str, Option<String>>,
}

impl BuildOverrides {
    pub fn get(&self, name: &str) -> Option<&str> {
        self.values.get(name).and_then(|v| v.as_deref())
    }

    pub fn set(&mut self, name: &str, value: impl Into<String>) -> Result<()> {
        let spec = lookup(name)
            .ok_or_else(|| Error::validation(format!("unknown build option '{name}'")))?;
        self.values.insert(spec.name, Some(value.into()));
        Ok(())
    }

    /// Run every validator over the supplied values; the first failure wins.
    pub fn validate(&self) -> Result<()> {
        for spec in BUILD_OPTIONS {
            let (Some(check), Some(raw)) = (spec.validator, self.get(spec.name)) else {
                continue;
            };
            if !check(raw) {
                return Err(Error::validation(format!(
                    "{} is an invalid value for --{}",
                    raw, spec.flag
                )));
            }
        }
        Ok(())
    }

    /// The override layer: every option present, unset ones as null.
    pub fn to_layer(&self) -> Map {
        BUILD_OPTIONS
            .iter()
            .map(|o| {
                let v = self.get(o.name).map(ConfigValue::from).unwrap_or(ConfigValue::Null);
                (o.name.to_string(), v)
            })
            .collect()
    }
}

impl FromArgMatches for BuildOverrides {
    fn from_arg_matches(matches: &ArgMatches) -> std::result::Result<Self, clap::Error> {
        let values = BUILD_OPTIONS
            .iter()
            .map(|o| (o.name, matches.get_one::<String>(o.name).cloned()))
            .collect();
        Ok(Self { values })
    }

    fn update_from_arg_matches(&mut self, matches: &ArgMatches) -> std::result::Result<(), clap::Error> {
        *self = Self::from_arg_matches(matches)?;
        Ok(())
    }
}

impl Args for BuildOverrides {
    fn augment_args(cmd: Command) -> Command {
        BUILD_OPTIONS.iter().fold(cmd, |cmd, o| {
            cmd.arg(
                Arg::new(o.name)
                    .long(o.flag)
                    .value_name("VALUE")
                    .help(o.description),
            )
        })
    }

    fn augment_args_for_update(cmd: Command) -> Command {
        Self::augment_args(cmd)
    }
}
