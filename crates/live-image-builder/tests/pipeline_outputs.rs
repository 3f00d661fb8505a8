use std::fs;
use std::path::Path;

use live_image_builder::assemble::EffectiveConfig;
use live_image_builder::config::ConfigValue;
use live_image_builder::executor::ExecCtx;
use live_image_builder::identity;
use live_image_builder::pipeline::{IMAGE_CONVERT_TOOL, LIVE_BUILD_TOOL, Pipeline, package_list};
use live_image_builder::version::VersionInfo;

fn config(build_dir: &Path, extra: &str) -> EffectiveConfig {
    let src = format!(
        r#"
product_name = "orbit"
architecture = "amd64"
build_type = "development"
build_flavor = "generic"
build_dir = "{}"
debian_mirror = "http://deb.debian.org/debian"
debian_security_mirror = "http://deb.debian.org/debian-security"
debian_distribution = "bookworm"
package_mirror = "https://packages.example.org/repositories/current"
release_train = "current"
kernel_flavor = "amd64-orbit"
packages = ["sudo", "vim-tiny"]
{extra}
"#,
        build_dir.display()
    );
    let tbl: toml::Table = toml::from_str(&src).expect("valid toml");
    let ConfigValue::Map(map) = ConfigValue::from(tbl) else {
        unreachable!()
    };
    EffectiveConfig::from_merged("inline.toml", map).expect("fixups")
}

fn info() -> VersionInfo {
    VersionInfo {
        version: "1.5-rolling-202401011200".into(),
        build_uuid: "6f1c9a4e-8f52-4a53-9a55-3f1f0c9e2b11".into(),
        build_timestamp: "202401011200".into(),
        build_date: "Mon 01 Jan 2024 12:00 UTC".into(),
        git_commit: "0123456789ab".into(),
        git_branch: "current".into(),
        lts_build: false,
    }
}

#[test]
fn derived_files_land_in_build_tree() {
    let dir = tempfile::tempdir().expect("tempdir");
    let key = dir.path().join("extra.gpg");
    fs::write(&key, "key material").expect("write key");
    let build_dir = dir.path().join("build");
    let cfg = config(
        &build_dir,
        &format!(
            r#"
image_format = "iso"
custom_apt_entry = ["deb http://extra.example.net/ stable main"]
custom_apt_key = ["{}"]
"#,
            key.display()
        ),
    );
    let ctx = ExecCtx::new(false);
    let pipeline = Pipeline::new(&cfg, &ctx);
    pipeline.write_derived_files(&info()).expect("write");

    let version: serde_json::Value = serde_json::from_str(
        &fs::read_to_string(build_dir.join("version.json")).expect("version.json"),
    )
    .expect("json");
    assert_eq!(version["version"], "1.5-rolling-202401011200");
    assert_eq!(version["architecture"], "amd64");

    let in_image = build_dir.join("chroot_includes/usr/share/orbit/version.json");
    assert!(in_image.is_file());
    assert_eq!(
        fs::read_to_string(build_dir.join("chroot_includes/opt/orbit/etc/version")).expect("legacy"),
        "Version: 1.5-rolling-202401011200\n"
    );
    let os_release =
        fs::read_to_string(build_dir.join("chroot_includes/usr/lib/os-release")).expect("os-release");
    assert!(os_release.contains("ID=orbit\n"));

    let sources = fs::read_to_string(build_dir.join("config/archives/custom.list.chroot"))
        .expect("sources");
    assert_eq!(
        sources,
        "deb https://packages.example.org/repositories/current current main\n\
         deb http://extra.example.net/ stable main\n"
    );
    assert_eq!(
        fs::read_to_string(build_dir.join("config/archives/custom-0.key.chroot")).expect("key"),
        "key material"
    );
    assert_eq!(
        fs::read_to_string(build_dir.join("config/package-lists/custom.list.chroot"))
            .expect("packages"),
        "sudo\nvim-tiny\n"
    );
}

#[test]
fn dry_run_writes_nothing() {
    let dir = tempfile::tempdir().expect("tempdir");
    let build_dir = dir.path().join("build");
    let cfg = config(&build_dir, r#"image_format = ["iso", "qcow2"]"#);
    let ctx = ExecCtx::new(true);
    let pipeline = Pipeline::new(&cfg, &ctx);

    pipeline.check_host_tools(true).expect("dry-run only warns");
    pipeline.write_derived_files(&info()).expect("write");
    pipeline.run_live_build(&info()).expect("live-build");
    let names = identity::artifact_names(&cfg, &info().version);
    let iso = pipeline.collect_iso(&names).expect("collect");
    pipeline.build_secondary_images(&iso, &names).expect("convert");

    assert!(!build_dir.exists());
}

#[test]
fn tools_follow_requested_formats() {
    let dir = tempfile::tempdir().expect("tempdir");
    let ctx = ExecCtx::new(true);

    let iso_only = config(dir.path(), r#"image_format = "iso""#);
    assert_eq!(
        Pipeline::new(&iso_only, &ctx).required_tools(true),
        vec![LIVE_BUILD_TOOL.to_string()]
    );

    let converted = config(dir.path(), r#"image_format = ["iso", "qcow2"]"#);
    let pipeline = Pipeline::new(&converted, &ctx);
    assert_eq!(
        pipeline.required_tools(true),
        vec![LIVE_BUILD_TOOL.to_string(), IMAGE_CONVERT_TOOL.to_string()]
    );
    assert_eq!(
        pipeline.required_tools(false),
        vec![IMAGE_CONVERT_TOOL.to_string()]
    );
}

#[test]
fn live_build_config_uses_mirrors_and_identity() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(
        dir.path(),
        r#"
image_format = "iso"
bootloaders = "grub-efi"
"#,
    );
    let ctx = ExecCtx::new(true);
    let args = Pipeline::new(&cfg, &ctx)
        .live_build_config_args(&info())
        .expect("args");

    let pair = |flag: &str| {
        let i = args.iter().position(|a| a == flag).expect(flag);
        args[i + 1].clone()
    };
    assert_eq!(args[0], "config");
    assert_eq!(pair("--architectures"), "amd64");
    assert_eq!(pair("--mirror-chroot"), "http://deb.debian.org/debian");
    assert_eq!(
        pair("--mirror-binary-security"),
        "http://deb.debian.org/debian-security"
    );
    assert_eq!(pair("--distribution"), "bookworm");
    assert_eq!(pair("--bootloaders"), "grub-efi");
    assert_eq!(pair("--linux-flavours"), "amd64-orbit");
    assert_eq!(pair("--iso-volume"), "orbit-1.5-rolling-202401011200");
    assert_eq!(
        pair("--bootappend-live"),
        "boot=live components hostname=orbit console=tty0"
    );
}

#[test]
fn serial_console_reaches_kernel_command_line() {
    let dir = tempfile::tempdir().expect("tempdir");
    let cfg = config(
        dir.path(),
        r#"
image_format = "iso"

[boot_settings]
console_type = "ttyS"
console_speed = "9600"
"#,
    );
    let ctx = ExecCtx::new(true);
    let args = Pipeline::new(&cfg, &ctx)
        .live_build_config_args(&info())
        .expect("args");
    assert!(args.iter().any(|a| a.ends_with("console=ttyS0,9600")), "{args:?}");
}

#[test]
fn package_list_is_one_per_line() {
    assert_eq!(package_list(&[]), "");
    assert_eq!(
        package_list(&["a".to_string(), "b".to_string()]),
        "a\nb\n"
    );
}
