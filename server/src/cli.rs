//! Command-line surface.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Run a sandboxed Lua or JS application as an HTTP service.
#[derive(Debug, Parser)]
#[command(name = "hull", version, args_conflicts_with_subcommands = true)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// With no subcommand, run the application server.
    #[command(flatten)]
    pub serve: ServeArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Generate an Ed25519 developer keypair.
    Keygen {
        /// Output prefix: writes `<out>.key` (secret) and `<out>.pub`.
        #[arg(short, long, default_value = "hull")]
        out: PathBuf,
    },

    /// Hash the application sources and emit a signed `hull.sig`.
    Build {
        /// Application directory.
        #[arg(default_value = ".")]
        app: PathBuf,
        /// Developer secret key file (hex).
        #[arg(short, long)]
        key: PathBuf,
        /// Interpreter-host archive to hash into the record.
        #[arg(long)]
        platform: Option<PathBuf>,
        /// Final binary to hash into the record.
        #[arg(long)]
        binary: Option<PathBuf>,
        /// Launcher shim to hash into the record.
        #[arg(long)]
        trampoline: Option<PathBuf>,
    },

    /// Verify `hull.sig` against the sources on disk.
    Verify {
        /// Application directory.
        #[arg(default_value = ".")]
        app: PathBuf,
        /// Expected developer public key (hex).
        #[arg(short = 'k', long)]
        pubkey: String,
    },

    /// Print the contents of `hull.sig`.
    Inspect {
        /// Application directory.
        #[arg(default_value = ".")]
        app: PathBuf,
    },

    /// Load the application and print its extracted manifest.
    Manifest {
        /// Application directory.
        #[arg(default_value = ".")]
        app: PathBuf,
    },

    /// Run the application server (the default when no subcommand is
    /// given).
    Serve(ServeArgs),
}

#[derive(Debug, Clone, Args)]
pub struct ServeArgs {
    /// Listen port.
    #[arg(short = 'p', long = "port", default_value_t = 3000,
          value_parser = clap::value_parser!(u16).range(1..))]
    pub port: u16,

    /// Bind address.
    #[arg(short = 'b', long = "bind", default_value = "127.0.0.1")]
    pub bind: String,

    /// Storage engine database file.
    #[arg(short = 'd', long = "db", default_value = "data.db")]
    pub db: PathBuf,

    /// Interpreter heap cap (suffixes: k, m, g).
    #[arg(short = 'm', long = "memory", value_parser = parse_size)]
    pub memory: Option<u64>,

    /// Interpreter stack cap (suffixes: k, m, g).
    #[arg(short = 's', long = "stack", value_parser = parse_size)]
    pub stack: Option<u64>,

    /// Log level / filter.
    #[arg(short = 'l', long = "log", default_value = "info")]
    pub log: String,

    /// Refuse to start unless `hull.sig` verifies with this public key.
    #[arg(long = "verify-sig", value_name = "PUBKEY")]
    pub verify_sig: Option<String>,

    /// Application directory.
    #[arg(default_value = ".")]
    pub app: PathBuf,
}

/// Parse a byte size with optional `k`/`m`/`g` suffix.
pub fn parse_size(s: &str) -> Result<u64, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size".into());
    }
    let (digits, multiplier) = match s.as_bytes()[s.len() - 1].to_ascii_lowercase() {
        b'k' => (&s[..s.len() - 1], 1024u64),
        b'm' => (&s[..s.len() - 1], 1024 * 1024),
        b'g' => (&s[..s.len() - 1], 1024 * 1024 * 1024),
        _ => (s, 1),
    };
    let n: u64 = digits
        .parse()
        .map_err(|_| format!("bad size {s:?}"))?;
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("size {s:?} overflows"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_size_suffixes() {
        assert_eq!(parse_size("512").unwrap(), 512);
        assert_eq!(parse_size("4k").unwrap(), 4096);
        assert_eq!(parse_size("64M").unwrap(), 64 * 1024 * 1024);
        assert_eq!(parse_size("1g").unwrap(), 1024 * 1024 * 1024);
    }

    #[test]
    fn test_parse_size_rejects_garbage() {
        assert!(parse_size("").is_err());
        assert!(parse_size("k").is_err());
        assert!(parse_size("12q").is_err());
        assert!(parse_size("999999999999999g").is_err());
    }

    #[test]
    fn test_cli_defaults_to_serve() {
        let cli = Cli::parse_from(["hull"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, 3000);
        assert_eq!(cli.serve.bind, "127.0.0.1");
        assert_eq!(cli.serve.db, PathBuf::from("data.db"));
    }

    #[test]
    fn test_cli_serve_flags() {
        let cli = Cli::parse_from(["hull", "-p", "8080", "-m", "32m", "-l", "debug", "./app"]);
        assert!(cli.command.is_none());
        assert_eq!(cli.serve.port, 8080);
        assert_eq!(cli.serve.memory, Some(32 * 1024 * 1024));
        assert_eq!(cli.serve.log, "debug");
        assert_eq!(cli.serve.app, PathBuf::from("./app"));
    }

    #[test]
    fn test_cli_rejects_port_zero() {
        assert!(Cli::try_parse_from(["hull", "-p", "0"]).is_err());
    }

    #[test]
    fn test_cli_subcommands_parse() {
        assert!(matches!(
            Cli::parse_from(["hull", "keygen"]).command,
            Some(Command::Keygen { .. })
        ));
        assert!(matches!(
            Cli::parse_from(["hull", "verify", "--pubkey", "aa"]).command,
            Some(Command::Verify { .. })
        ));
        assert!(matches!(
            Cli::parse_from(["hull", "build", "--key", "hull.key"]).command,
            Some(Command::Build { .. })
        ));
    }
}
