//! The `hull` binary.

use clap::Parser;
use tracing_subscriber::EnvFilter;

use hull_server::cli::{Cli, Command};
use hull_server::{bundle, serve, StartupError};

fn main() {
    let cli = Cli::parse();

    let log = match &cli.command {
        Some(Command::Serve(args)) => args.log.clone(),
        None => cli.serve.log.clone(),
        _ => "info".to_string(),
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_new(&log).unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    if let Err(e) = run(cli) {
        tracing::error!("{e}");
        eprintln!("hull: {e}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<(), StartupError> {
    match cli.command {
        Some(Command::Keygen { out }) => {
            let (key_path, pub_path) = bundle::keygen(&out)?;
            println!("wrote {} (secret, keep private)", key_path.display());
            println!("wrote {}", pub_path.display());
            Ok(())
        }
        Some(Command::Build {
            app,
            key,
            platform,
            binary,
            trampoline,
        }) => {
            let out = bundle::sign_bundle(
                &app,
                &key,
                platform.as_deref(),
                binary.as_deref(),
                trampoline.as_deref(),
            )?;
            println!("wrote {}", out.display());
            Ok(())
        }
        Some(Command::Verify { app, pubkey }) => {
            let record = bundle::verify_bundle(&app, &pubkey)?;
            println!("ok: {} files verified", record.files.len());
            Ok(())
        }
        Some(Command::Inspect { app }) => {
            print!("{}", bundle::inspect_bundle(&app)?);
            Ok(())
        }
        Some(Command::Manifest { app }) => {
            let manifest = bundle::load_manifest(&app)?;
            let text = serde_json::to_string_pretty(&manifest).map_err(StartupError::fatal)?;
            println!("{text}");
            Ok(())
        }
        Some(Command::Serve(args)) => serve::run(args),
        None => serve::run(cli.serve),
    }
}
