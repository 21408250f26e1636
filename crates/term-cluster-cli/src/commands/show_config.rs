//! `show-config` command.

use clap::Args;
use tracing::error;

use term_cluster_core::Config;

/// Arguments for the show-config command.
#[derive(Args)]
pub struct ShowConfigArgs {
    /// Output as JSON instead of TOML
    #[arg(long)]
    pub json: bool,
}

/// Print `config`. Returns the process exit code.
pub fn handle_show_config(args: ShowConfigArgs, config: &Config) -> i32 {
    match render(config, args.json) {
        Ok(text) => {
            println!("{}", text);
            0
        }
        Err(e) => {
            error!("Failed to render configuration: {}", e);
            eprintln!("Error: {}", e);
            1
        }
    }
}

fn render(config: &Config, json: bool) -> anyhow::Result<String> {
    if json {
        Ok(serde_json::to_string_pretty(config)?)
    } else {
        Ok(config.to_toml()?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_render_toml_parses_back() {
        let config = Config::default();
        let text = render(&config, false).unwrap();
        assert!(text.contains("[clustering]"));
        let parsed: Config = toml::from_str(&text).unwrap();
        assert_eq!(parsed, config);
    }

    #[test]
    fn test_render_json() {
        let text = render(&Config::default(), true).unwrap();
        let value: serde_json::Value = serde_json::from_str(&text).unwrap();
        assert_eq!(value["clustering"]["method"], "agglomerative");
        assert_eq!(value["logging"]["level"], "info");
    }
}
