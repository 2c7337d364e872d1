//! `flowly config` -- inspect and initialize the configuration file.

use flowly_config::{Config, config_path, save_config};

use crate::cli::{ConfigAction, ConfigArgs, GlobalOpts};
use crate::error::CliError;

pub fn handle(args: &ConfigArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let path = global.config.clone().unwrap_or_else(config_path);

    match args.action {
        ConfigAction::Path => {
            println!("{}", path.display());
            Ok(())
        }

        ConfigAction::Init { force } => {
            if path.exists() && !force {
                return Err(CliError::ConfigExists {
                    path: path.display().to_string(),
                });
            }
            save_config(&Config::default(), &path)?;
            if !global.quiet {
                println!("wrote {}", path.display());
            }
            Ok(())
        }
    }
}
