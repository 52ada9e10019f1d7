//! Daemon CLI arguments, following the teacher's `args/cli.rs` shape
//! (`clap::Parser` derive, short+long flags, doc-comment help text) but
//! scoped down to what a long-running control-surface process needs:
//! where to listen, where to keep its data, and how loudly to log.

use clap::Parser;

/// `loadcore` is the headless load-testing daemon described by spec.md:
/// it owns no terminal UI, driving load tests and exposing their
/// progress and results exclusively through its loopback control
/// surface (spec.md §6).
#[derive(Debug, Parser, Clone)]
#[clap(version, about = "Headless HTTP load-testing daemon with a loopback control surface.")]
pub struct DaemonArgs {
    /// TCP port the control surface listens on (loopback only).
    #[arg(long, short, default_value = "7878")]
    pub port: u16,

    /// Directory holding the SQLite store and the PID lock file.
    #[arg(long = "data-dir", default_value = "./loadcore-data")]
    pub data_dir: String,

    /// Path to a config file (TOML/JSON). Defaults to ./loadcore.toml or
    /// ./loadcore.json if present.
    #[arg(long)]
    pub config: Option<String>,

    /// Enable verbose logging (sets log level to debug unless overridden
    /// by LOADCORE_LOG/RUST_LOG).
    #[arg(long, short)]
    pub verbose: bool,
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn command_is_well_formed() {
        DaemonArgs::command().debug_assert();
    }

    #[test]
    fn defaults_apply_with_no_flags() -> Result<(), String> {
        let args = DaemonArgs::try_parse_from(["loadcore"]).map_err(|e| e.to_string())?;
        assert_eq!(args.port, 7878);
        assert_eq!(args.data_dir, "./loadcore-data");
        assert!(!args.verbose);
        Ok(())
    }
}
