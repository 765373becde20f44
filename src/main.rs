mod cli;

use gh_pager::http::quota::now_millis;
use gh_pager::{ApiError, CancelToken, Config, ErrorKind, PaginationStyle, RequestSpec, RestClient};
use log::{info, warn};
use serde_json::Value;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let matches = cli::build_cli().get_matches();
    cli::init_logging(matches.get_one::<String>("log-level").map(String::as_str));

    let cfg = Config::from_env()?;
    let client = RestClient::new(cfg)?;

    let cancel = CancelToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling in-flight request");
            on_signal.cancel();
        }
    });

    let result = match matches.subcommand() {
        Some(("get", sub)) => {
            let path = sub.get_one::<String>("path").cloned().unwrap_or_default();
            client
                .execute(&RequestSpec::get(path), &cancel)
                .await
                .map(|env| env.body)
        }
        Some(("list", sub)) => {
            let path = sub.get_one::<String>("path").cloned().unwrap_or_default();
            let mut spec = RequestSpec::get(path);
            if let Some(n) = sub.get_one::<u32>("per-page") {
                spec = spec.per_page(*n);
            }
            if let Some(field) = sub.get_one::<String>("items-field") {
                spec = spec.items_field(field.clone());
            }
            if let Some(pool) = sub.get_one::<String>("pool") {
                spec = spec.pool(pool.clone());
            }
            if sub.get_flag("page-number") {
                spec = spec.pagination(PaginationStyle::PageNumber);
            }
            let max = sub.get_one::<usize>("max-items").copied();
            client
                .collect_all::<Value>(&spec, max, &cancel)
                .await
                .map(|items| {
                    info!("fetched {} item(s)", items.len());
                    Value::Array(items)
                })
        }
        Some(("quota", sub)) => {
            let pool = sub
                .get_one::<String>("pool")
                .cloned()
                .unwrap_or_else(|| "core".to_string());
            client
                .execute(&RequestSpec::get("/rate_limit"), &cancel)
                .await
                .map(|env| {
                    let reported = env.body["resources"][pool.as_str()].clone();
                    if !reported.is_null() {
                        return reported;
                    }
                    client
                        .quota(&pool)
                        .and_then(|q| serde_json::to_value(q).ok())
                        .unwrap_or(Value::Null)
                })
        }
        _ => unreachable!("subcommand_required"),
    };

    match result {
        Ok(value) => {
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(())
        }
        Err(err) => {
            report(&err);
            std::process::exit(err.exit_code());
        }
    }
}

fn report(err: &ApiError) {
    eprintln!("error: {}", err);
    for field in err.field_errors() {
        eprintln!("  - {}", field);
    }
    if err.kind() == Some(ErrorKind::RateLimited) {
        if let Some(wait) = err.rate_limit_wait(now_millis() / 1000) {
            eprintln!("rate limit resets in {}s", wait.as_secs());
        }
    }
}
