use guardian::GuardianConfig;

pub(crate) fn cmd_config(config: &GuardianConfig) -> anyhow::Result<()> {
    println!("# {}", GuardianConfig::config_path().display());
    println!("# launcher: {:?}", config.launcher_kind());
    println!("# default environment: {}", config.default_environment().join(", "));
    println!();
    print!("{}", config.to_toml()?);
    Ok(())
}
