use assert_cmd::Command;
use httpmock::{Method::GET, MockServer};
use predicates::prelude::*;

fn cmd_for(server: &MockServer) -> anyhow::Result<Command> {
    let mut cmd = Command::cargo_bin("gh-pager")?;
    cmd.env("GITHUB_TOKEN", "t")
        .env("GITHUB_API_URL", server.base_url())
        .env("GITHUB_BACKOFF_BASE_MS", "1")
        .arg("--log-level")
        .arg("warn");
    Ok(cmd)
}

#[test]
fn list_prints_every_item() -> anyhow::Result<()> {
    let server = MockServer::start();
    let next = server.url("/repos/o/r/issues?per_page=2&page=2");
    let _p1 = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/o/r/issues")
            .query_param("page", "1")
            .header("authorization", "Bearer t");
        then.status(200)
            .header("link", format!(r#"<{}>; rel="next""#, next))
            .json_body(serde_json::json!([{"number": 1}, {"number": 2}]));
    });
    let _p2 = server.mock(|when, then| {
        when.method(GET)
            .path("/repos/o/r/issues")
            .query_param("page", "2");
        then.status(200).json_body(serde_json::json!([{"number": 3}]));
    });

    cmd_for(&server)?
        .args(["list", "/repos/o/r/issues", "--per-page", "2"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"number\": 3"));
    Ok(())
}

#[test]
fn not_found_maps_to_exit_code() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/repos/o/nope");
        then.status(404).json_body(serde_json::json!({"message": "Not Found"}));
    });

    cmd_for(&server)?
        .args(["get", "/repos/o/nope"])
        .assert()
        .code(44)
        .stderr(predicate::str::contains("not_found error on /repos/o/nope"));
    Ok(())
}

#[test]
fn quota_reports_pool() -> anyhow::Result<()> {
    let server = MockServer::start();
    let _m = server.mock(|when, then| {
        when.method(GET).path("/rate_limit");
        then.status(200).json_body(serde_json::json!({
            "resources": {
                "core": {"limit": 5000, "remaining": 4990, "reset": 0, "used": 10},
                "search": {"limit": 30, "remaining": 28, "reset": 0, "used": 2}
            }
        }));
    });

    cmd_for(&server)?
        .args(["quota", "--pool", "search"])
        .assert()
        .success()
        .stdout(predicate::str::contains("\"remaining\": 28"));
    Ok(())
}

#[test]
fn missing_token_fails() -> anyhow::Result<()> {
    let mut cmd = Command::cargo_bin("gh-pager")?;
    cmd.env_remove("GITHUB_TOKEN")
        .env_remove("GH_TOKEN")
        .args(["get", "/user"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("Missing GITHUB_TOKEN"));
    Ok(())
}
