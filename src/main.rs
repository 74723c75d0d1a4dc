use clap::{Arg, Command};

mod commands;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() {
    // Load .env before anything reads the environment.
    dotenvy::dotenv().ok();

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,tower_http=warn".into()),
        )
        .init();

    let matches = Command::new("voxmail")
        .version(VERSION)
        .about("Voxmail - voice-driven email assistant runtime")
        .subcommand(
            Command::new("up")
                .about("Start the HTTP API, delta timer, and ingestion workers")
                .arg(
                    Arg::new("port")
                        .short('p')
                        .long("port")
                        .value_name("PORT")
                        .help("HTTP API port (overrides VOXMAIL_PORT)"),
                )
                .arg(
                    Arg::new("bind")
                        .long("bind")
                        .value_name("ADDR")
                        .help("Bind address (overrides VOXMAIL_BIND)"),
                ),
        )
        .subcommand(
            Command::new("backfill")
                .about("Run a mailbox backfill in the foreground")
                .arg(
                    Arg::new("grant-id")
                        .long("grant-id")
                        .value_name("GRANT")
                        .help("Tenant to backfill (defaults to MAIL_GRANT_ID)"),
                )
                .arg(
                    Arg::new("months")
                        .long("months")
                        .value_name("N")
                        .help("How many months back to fetch"),
                )
                .arg(
                    Arg::new("max")
                        .long("max")
                        .value_name("N")
                        .help("Message cap for the job (at most 10000)"),
                ),
        )
        .subcommand(
            Command::new("delta")
                .about("Run a delta sync from the stored checkpoint")
                .arg(
                    Arg::new("grant-id")
                        .long("grant-id")
                        .value_name("GRANT")
                        .help("Tenant to sync (defaults to MAIL_GRANT_ID)"),
                )
                .arg(
                    Arg::new("max")
                        .long("max")
                        .value_name("N")
                        .help("Message cap for the job"),
                ),
        )
        .get_matches();

    let result = match matches.subcommand() {
        Some(("up", sub)) => {
            commands::up::run(
                sub.get_one::<String>("port").cloned(),
                sub.get_one::<String>("bind").cloned(),
            )
            .await
        }
        Some(("backfill", sub)) => {
            commands::sync::run_backfill(
                sub.get_one::<String>("grant-id").cloned(),
                sub.get_one::<String>("months").cloned(),
                sub.get_one::<String>("max").cloned(),
            )
            .await
        }
        Some(("delta", sub)) => {
            commands::sync::run_delta(
                sub.get_one::<String>("grant-id").cloned(),
                sub.get_one::<String>("max").cloned(),
            )
            .await
        }
        _ => {
            eprintln!("No subcommand given. Try 'voxmail up' or 'voxmail --help'.");
            std::process::exit(2);
        }
    };

    if let Err(e) = result {
        tracing::error!(error = %e, "command failed");
        std::process::exit(1);
    }
}
