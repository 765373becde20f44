use clap::{value_parser, Arg, ArgAction, Command};

pub fn build_cli() -> Command {
    Command::new("gh-pager")
        .about("Resilient paginated GitHub REST client")
        .version(env!("CARGO_PKG_VERSION"))
        .subcommand_required(true)
        .arg(
            Arg::new("log-level")
                .long("log-level")
                .global(true)
                .num_args(1)
                .help("Override RUST_LOG level (e.g., info, debug)"),
        )
        .subcommand(
            Command::new("get")
                .about("Fetch a single resource")
                .arg(Arg::new("path").required(true).help("API path, e.g. /repos/o/r")),
        )
        .subcommand(
            Command::new("list")
                .about("Fetch every item of a paginated collection")
                .arg(Arg::new("path").required(true).help("API path, e.g. /repos/o/r/issues"))
                .arg(
                    Arg::new("per-page")
                        .long("per-page")
                        .value_parser(value_parser!(u32))
                        .help("Page size (clamped to the server maximum)"),
                )
                .arg(
                    Arg::new("max-items")
                        .long("max-items")
                        .value_parser(value_parser!(usize))
                        .help("Stop after this many items"),
                )
                .arg(
                    Arg::new("items-field")
                        .long("items-field")
                        .help("Field holding the item array, e.g. workflow_runs"),
                )
                .arg(
                    Arg::new("page-number")
                        .long("page-number")
                        .action(ArgAction::SetTrue)
                        .help("Advance by page number when the endpoint sends no Link header"),
                )
                .arg(Arg::new("pool").long("pool").help("Rate-limit pool (default: inferred)")),
        )
        .subcommand(
            Command::new("quota")
                .about("Show the remaining quota of a pool")
                .arg(Arg::new("pool").long("pool").default_value("core")),
        )
}

pub fn init_logging(level: Option<&str>) {
    // Respect explicit level, else RUST_LOG, else info
    let env = env_logger::Env::default().default_filter_or(level.unwrap_or("info"));
    let mut builder = env_logger::Builder::from_env(env);
    if let Some(lvl) = level {
        builder.parse_filters(lvl);
    }
    builder.init();
}
