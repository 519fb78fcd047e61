//! sysupgrade - staged in-place OS upgrade from a binary disk-image release.
//!
//! The upgrade is an ordered pipeline of individually re-runnable steps;
//! after a failure at step k, fix the cause and resume with `-s k`. A prior
//! mount is reused when resuming past step 0.

use std::path::PathBuf;
use std::process::exit;
use std::rc::Rc;

use anyhow::Result;
use clap::Parser;

use sysupgrade::config::Config;
use sysupgrade::errors::{exit_code_for, UpgradeError};
use sysupgrade::steps::{StepRange, StepRegistry};
use sysupgrade::{accounts, backup, fetch, install, kernel, mount, postinstall, process, reconcile, sweep};

#[derive(Parser)]
#[command(name = "sysupgrade")]
#[command(about = "Upgrade the installed system from a release disk image")]
#[command(
    after_help = "STEPS:\n  0 mount  1 backup  2 kernel  3 world  4 accounts\n  5 etc  6 obsolete  7 unmount  8 postinstall\n\nResume a failed run with -s <failed step>. The image file is only\nrequired when starting from step 0; later steps reuse the active mount."
)]
struct Cli {
    /// Configuration file (KEY=value, overrides built-in defaults)
    #[arg(short = 'c', value_name = "FILE")]
    config: Option<PathBuf>,

    /// Echo external commands as they run
    #[arg(short = 'd')]
    debug: bool,

    /// First step to execute
    #[arg(short = 's', value_name = "STEP", default_value_t = 0)]
    start_step: usize,

    /// Last step to execute (default: the final step)
    #[arg(short = 'S', value_name = "STEP")]
    stop_step: Option<usize>,

    /// Release image: local file or http(s) URL
    image: Option<String>,
}

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            use clap::error::ErrorKind;
            let code = match e.kind() {
                ErrorKind::DisplayHelp | ErrorKind::DisplayVersion => 0,
                _ => UpgradeError::Usage(String::new()).exit_code(),
            };
            let _ = e.print();
            exit(code);
        }
    };

    if let Err(err) = run(cli) {
        eprintln!("sysupgrade: {:#}", err);
        exit(exit_code_for(&err));
    }
}

fn run(cli: Cli) -> Result<()> {
    process::set_debug(cli.debug);
    let config = Rc::new(Config::load(cli.config.as_deref())?);
    if cli.debug {
        config.print();
    }

    if cli.start_step == 0 && cli.image.is_none() {
        return Err(UpgradeError::Argument(
            "an image file is required when starting from step 0".into(),
        )
        .into());
    }

    // Everything mutates the live root; refusing outright would block
    // DESTDIR-based testing, so warn instead.
    if unsafe { libc::geteuid() } != 0 && config.destdir == PathBuf::from("/") {
        eprintln!("WARNING: not running as root; most steps will fail");
    }

    let mut registry = build_registry(&config, cli.image.clone());

    let stop = cli.stop_step.unwrap_or(registry.len() - 1);
    registry.run(StepRange::new(cli.start_step, stop))?;

    println!("Upgrade complete. Resolve any pending merges, then reboot.");
    println!("Package-level upgrades are the package manager's job after reboot.");
    Ok(())
}

fn build_registry(config: &Rc<Config>, image: Option<String>) -> StepRegistry {
    let mut registry = StepRegistry::new();

    {
        let config = Rc::clone(config);
        registry.register("mount", move || {
            let image = image.as_deref().ok_or_else(|| {
                UpgradeError::Argument("no image file given for the mount step".into())
            })?;
            let image = fetch::resolve_image(&config, image)?;
            mount::mount(&config, &image)?;
            Ok(())
        });
    }
    {
        let config = Rc::clone(config);
        registry.register("backup", move || backup::backup(&config));
    }
    {
        let config = Rc::clone(config);
        registry.register("kernel", move || kernel::install_kernel(&config));
    }
    {
        let config = Rc::clone(config);
        registry.register("world", move || install::install(&config));
    }
    {
        let config = Rc::clone(config);
        registry.register("accounts", move || accounts::provision(&config));
    }
    {
        let config = Rc::clone(config);
        registry.register("etc", move || {
            reconcile::reconcile(&config)?;
            Ok(())
        });
    }
    {
        let config = Rc::clone(config);
        registry.register("obsolete", move || sweep::sweep(&config));
    }
    {
        let config = Rc::clone(config);
        registry.register("unmount", move || mount::unmount(&config));
    }
    {
        let config = Rc::clone(config);
        registry.register("postinstall", move || postinstall::rebuild_databases(&config));
    }

    registry
}
