//! Downstream build steps driven by the effective configuration: derived
//! metadata files, live-build, ISO collection and secondary image formats.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::{info, warn};

use crate::assemble::EffectiveConfig;
use crate::error::{Error, Result};
use crate::executor::{ExecCtx, find_on_path};
use crate::identity::{self, ArtifactNames, BuildMetadata, SecondaryImage};
use crate::version::VersionInfo;

pub const LIVE_BUILD_TOOL: &str = "lb";
pub const IMAGE_CONVERT_TOOL: &str = "qemu-img";
pub const DEFAULT_RAW_IMAGE_TOOL: &str = "scripts/raw-image";

/// Paths inside the build directory.
#[derive(Debug, Clone)]
pub struct BuildLayout {
    pub build_dir: PathBuf,
}

impl BuildLayout {
    pub fn new(build_dir: impl Into<PathBuf>) -> Self {
        Self {
            build_dir: build_dir.into(),
        }
    }

    pub fn chroot_includes(&self) -> PathBuf {
        self.build_dir.join("chroot_includes")
    }

    pub fn archives_dir(&self) -> PathBuf {
        self.build_dir.join("config").join("archives")
    }

    pub fn package_lists_dir(&self) -> PathBuf {
        self.build_dir.join("config").join("package-lists")
    }

    pub fn version_json(&self) -> PathBuf {
        self.build_dir.join("version.json")
    }

    pub fn image_version_json(&self, product: &str) -> PathBuf {
        self.chroot_includes()
            .join("usr/share")
            .join(product)
            .join("version.json")
    }

    pub fn legacy_version_file(&self, product: &str) -> PathBuf {
        self.chroot_includes()
            .join("opt")
            .join(product)
            .join("etc/version")
    }

    pub fn os_release(&self) -> PathBuf {
        self.chroot_includes().join("usr/lib/os-release")
    }

    /// Where live-build leaves the finished ISO.
    pub fn live_build_iso(&self, arch: &str) -> PathBuf {
        self.build_dir.join(format!("live-image-{arch}.hybrid.iso"))
    }
}

pub struct Pipeline<'a> {
    pub cfg: &'a EffectiveConfig,
    pub ctx: &'a ExecCtx,
    pub layout: BuildLayout,
}

impl<'a> Pipeline<'a> {
    pub fn new(cfg: &'a EffectiveConfig, ctx: &'a ExecCtx) -> Self {
        Self {
            cfg,
            ctx,
            layout: BuildLayout::new(cfg.build_dir()),
        }
    }

    /// Host tools this build needs.
    pub fn required_tools(&self, build_iso: bool) -> Vec<String> {
        let mut tools = Vec::new();
        if build_iso {
            tools.push(LIVE_BUILD_TOOL.to_string());
        }
        if self.cfg.image_formats().iter().any(|f| f != identity::ISO_FORMAT) {
            tools.push(IMAGE_CONVERT_TOOL.to_string());
        }
        tools
    }

    pub fn check_host_tools(&self, build_iso: bool) -> Result<()> {
        let missing: Vec<String> = self
            .required_tools(build_iso)
            .into_iter()
            .filter(|t| find_on_path(t).is_none())
            .collect();
        if missing.is_empty() {
            return Ok(());
        }
        let msg = format!("required tools not found on PATH: {}", missing.join(", "));
        if self.ctx.dry_run {
            warn!("{msg}");
            return Ok(());
        }
        Err(Error::external(msg))
    }

    /// Write every file derived from the configuration and version info.
    pub fn write_derived_files(&self, info: &VersionInfo) -> Result<()> {
        let product = self.cfg.product_name();
        let metadata = BuildMetadata::new(self.cfg, info);
        self.ctx
            .write_json_pretty(&self.layout.version_json(), &metadata)?;
        self.ctx
            .write_json_pretty(&self.layout.image_version_json(product), &metadata)?;
        self.ctx.write_text(
            &self.layout.legacy_version_file(product),
            &identity::legacy_version_file(info),
        )?;
        self.ctx
            .write_text(&self.layout.os_release(), &identity::os_release(self.cfg, info))?;
        self.write_apt_sources()?;
        self.ctx.write_text(
            &self.layout.package_lists_dir().join("custom.list.chroot"),
            &package_list(&self.cfg.packages()),
        )?;
        info!("derived build files written to {}", self.layout.build_dir.display());
        Ok(())
    }

    fn write_apt_sources(&self) -> Result<()> {
        let archives = self.layout.archives_dir();
        let mut sources = String::new();
        if let Some(mirror) = self.cfg.str("package_mirror") {
            let suite = self.cfg.str("release_train").unwrap_or("current");
            sources.push_str(&format!("deb {mirror} {suite} main\n"));
        }
        for entry in self.cfg.string_list("custom_apt_entry") {
            sources.push_str(entry.trim());
            sources.push('\n');
        }
        for entry in self.cfg.string_list("additional_repositories") {
            sources.push_str(entry.trim());
            sources.push('\n');
        }
        if !sources.is_empty() {
            self.ctx
                .write_text(&archives.join("custom.list.chroot"), &sources)?;
        }
        for (i, key) in self.cfg.string_list("custom_apt_key").iter().enumerate() {
            self.ctx.copy_file(
                Path::new(key),
                &archives.join(format!("custom-{i}.key.chroot")),
            )?;
        }
        Ok(())
    }

    pub fn live_build_config_args(&self, info: &VersionInfo) -> Result<Vec<String>> {
        let cfg = self.cfg;
        let boot = cfg.boot()?;
        let mirror = cfg.str("debian_mirror").unwrap_or_default();
        let security = cfg.str("debian_security_mirror").unwrap_or_default();
        let mut args = vec![
            "config".to_string(),
            "--architectures".into(),
            cfg.architecture().into(),
            "--mirror-bootstrap".into(),
            mirror.into(),
            "--mirror-chroot".into(),
            mirror.into(),
            "--mirror-chroot-security".into(),
            security.into(),
            "--mirror-binary".into(),
            mirror.into(),
            "--mirror-binary-security".into(),
            security.into(),
            "--iso-application".into(),
            cfg.product_name().into(),
            "--iso-volume".into(),
            format!("{}-{}", cfg.product_name(), info.version),
            "--bootappend-live".into(),
            format!(
                "boot=live components hostname={} {}",
                cfg.product_name(),
                boot.kernel_console()
            ),
        ];
        if let Some(dist) = cfg.str("debian_distribution") {
            args.push("--distribution".into());
            args.push(dist.into());
        }
        if let Some(bootloaders) = cfg.str("bootloaders") {
            args.push("--bootloaders".into());
            args.push(bootloaders.into());
        }
        if let Some(flavour) = cfg.str("kernel_flavor") {
            args.push("--linux-flavours".into());
            args.push(flavour.into());
        }
        Ok(args)
    }

    pub fn run_live_build(&self, info: &VersionInfo) -> Result<()> {
        self.ctx.ensure_dir(&self.layout.build_dir)?;
        let mut config = Command::new(LIVE_BUILD_TOOL);
        config
            .current_dir(&self.layout.build_dir)
            .args(self.live_build_config_args(info)?);
        self.ctx.run_cmd("lb config", config)?;

        let mut build = Command::new(LIVE_BUILD_TOOL);
        build.current_dir(&self.layout.build_dir).arg("build");
        self.ctx.run_cmd("lb build", build)
    }

    /// Move the live-build ISO to its canonical name; returns the new path.
    pub fn collect_iso(&self, names: &ArtifactNames) -> Result<PathBuf> {
        let src = self.layout.live_build_iso(self.cfg.architecture());
        let dst = self.layout.build_dir.join(&names.iso);
        self.ctx.rename(&src, &dst)?;
        info!("ISO image: {}", dst.display());
        Ok(dst)
    }

    /// Produce every non-ISO format from `iso` via a raw disk image.
    pub fn build_secondary_images(&self, iso: &Path, names: &ArtifactNames) -> Result<()> {
        if names.secondary.is_empty() {
            return Ok(());
        }
        let raw = self.layout.build_dir.join(format!("{}.raw", names.stem));
        self.create_raw_image(iso, &raw)?;
        for image in &names.secondary {
            self.convert(&raw, image)?;
        }
        Ok(())
    }

    fn create_raw_image(&self, iso: &Path, raw: &Path) -> Result<()> {
        let tool = self
            .cfg
            .str("raw_image_tool")
            .unwrap_or(DEFAULT_RAW_IMAGE_TOOL);
        let mut cmd = Command::new(tool);
        cmd.arg("--iso")
            .arg(iso)
            .arg("--output")
            .arg(raw)
            .arg("--disk-size")
            .arg(self.cfg.disk_size_gb().to_string());
        self.ctx.run_cmd("raw-image", cmd)
    }

    fn convert(&self, raw: &Path, image: &SecondaryImage) -> Result<()> {
        let out = self.layout.build_dir.join(&image.file_name);
        if image.format == "raw" {
            return self.ctx.copy_file(raw, &out);
        }
        let mut cmd = Command::new(IMAGE_CONVERT_TOOL);
        cmd.arg("convert")
            .arg("-f")
            .arg("raw")
            .arg("-O")
            .arg(&image.format)
            .args(&image.opts)
            .arg(raw)
            .arg(&out);
        self.ctx.run_cmd(IMAGE_CONVERT_TOOL, cmd)?;
        info!("{} image: {}", image.format, out.display());
        Ok(())
    }
}

pub fn package_list(packages: &[String]) -> String {
    let mut out = String::new();
    for p in packages {
        out.push_str(p);
        out.push('\n');
    }
    out
}
