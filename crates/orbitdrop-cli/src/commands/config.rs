//! `orbitdrop config` - show the effective configuration.

use anyhow::{Context, Result};
use orbitdrop_core::config::Config;

use super::{load_config, ConfigArgs};

pub fn run(args: ConfigArgs) -> Result<()> {
    let path = Config::config_path().context("cannot determine config path")?;
    if args.path {
        println!("{}", path.display());
        return Ok(());
    }

    let config = load_config();
    println!("# {}", path.display());
    print!(
        "{}",
        toml::to_string_pretty(&config).context("cannot render config")?
    );
    Ok(())
}
