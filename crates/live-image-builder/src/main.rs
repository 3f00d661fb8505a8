use std::path::PathBuf;
use std::process::ExitCode;

use chrono::Utc;
use clap::Parser;
use tracing::{error, info};

use live_image_builder::assemble::{Assembler, BuildRequest, Defaults};
use live_image_builder::config::ProfileStore;
use live_image_builder::executor::ExecCtx;
use live_image_builder::identity;
use live_image_builder::options::BuildOverrides;
use live_image_builder::pipeline::Pipeline;
use live_image_builder::version::{GitCheckout, VersionResolver};
use live_image_builder::{Error, Result, logging};

#[derive(Debug, Parser)]
#[command(author, about)]
struct Args {
    /// Build flavor (name of a TOML file in the flavor directory)
    flavor: Option<String>,

    #[command(flatten)]
    overrides: BuildOverrides,

    /// Enable debug output
    #[arg(long)]
    debug: bool,
    /// Assemble the configuration and show what would run, without building
    #[arg(long)]
    dry_run: bool,
    /// Extra APT source line (repeatable)
    #[arg(long, value_name = "LINE")]
    custom_apt_entry: Vec<String>,
    /// APT signing key file for the custom entries (repeatable)
    #[arg(long, value_name = "FILE")]
    custom_apt_key: Vec<String>,
    /// Extra package to install into the image (repeatable)
    #[arg(long, value_name = "PACKAGE")]
    custom_package: Vec<String>,
    /// Convert an existing ISO instead of building a new one
    #[arg(long, value_name = "ISO")]
    reuse_iso: Option<PathBuf>,
    /// Disk size in GB for raw and converted images
    #[arg(long, value_name = "GB")]
    disk_size: Option<u64>,
    /// Directory holding defaults.toml, build-types/, architectures/ and build-flavors/
    #[arg(long, default_value = "data")]
    data_dir: PathBuf,
    /// Checkout whose branch or tag selects the development version
    #[arg(long, default_value = ".")]
    repo_dir: PathBuf,
}

fn main() -> ExitCode {
    dotenv::dotenv().ok();
    let args = Args::parse();
    logging::init(args.debug);
    match run(args) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e}");
            ExitCode::FAILURE
        }
    }
}

fn run(args: Args) -> Result<()> {
    let store = ProfileStore::from_env(&args.data_dir);
    let Some(flavor) = args.flavor.clone() else {
        let flavors = store.flavor_names()?;
        info!("available build flavors:");
        for f in &flavors {
            info!("  {f}");
        }
        return Err(Error::validation("no build flavor specified"));
    };

    args.overrides.validate()?;
    let defaults = Defaults::load(&store)?;
    let req = BuildRequest {
        flavor,
        overrides: args.overrides.clone(),
        custom_packages: args.custom_package.clone(),
        custom_apt_entries: args.custom_apt_entry.clone(),
        custom_apt_keys: args.custom_apt_key.clone(),
        disk_size: args.disk_size,
    };
    let cfg = Assembler::new(&store, &defaults).assemble(&req)?;

    let ctx = ExecCtx::new(args.dry_run);
    let pipeline = Pipeline::new(&cfg, &ctx);

    if let Some(iso) = args.reuse_iso.as_deref() {
        if !args.dry_run && !iso.is_file() {
            return Err(Error::not_found(format!(
                "ISO {} does not exist",
                iso.display()
            )));
        }
        let stem = iso
            .file_stem()
            .and_then(|s| s.to_str())
            .ok_or_else(|| Error::validation(format!("invalid ISO path {}", iso.display())))?;
        info!("reusing ISO {}", iso.display());
        pipeline.check_host_tools(false)?;
        let names = identity::artifact_names_for_stem(&cfg, stem);
        return pipeline.build_secondary_images(iso, &names);
    }

    let scm = GitCheckout::new(&args.repo_dir);
    let info = VersionResolver::new(&scm, store.version_map_path()).resolve(&cfg, Utc::now())?;
    let names = identity::artifact_names(&cfg, &info.version);
    info!("version: {}", info.version);
    info!("build UUID: {}", info.build_uuid);
    info!("image: {}", names.primary);

    if args.dry_run {
        let resolved = cfg
            .doc()
            .value
            .to_toml()
            .and_then(|v| toml::to_string_pretty(&v).ok())
            .unwrap_or_else(|| format!("{:?}", cfg.doc().value));
        print!("{resolved}");
    }

    pipeline.check_host_tools(true)?;
    pipeline.write_derived_files(&info)?;
    pipeline.run_live_build(&info)?;
    let iso = pipeline.collect_iso(&names)?;
    pipeline.build_secondary_images(&iso, &names)?;
    info!("build complete: {}", names.primary);
    Ok(())
}
