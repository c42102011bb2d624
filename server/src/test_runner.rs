#![cfg(test)]

//! Runs the health server with real HTTP and checks each of its routes.
//!
//! Two servers are started on unused ports: one backed by the in-memory store, and one pointed at
//! a Supabase URL where nothing is listening, so that its storage check fails.

use super::health;
use ansi_term::Color;
use anyhow::Error;
use async_std::task::sleep;
use chef_model::store;
use futures::future::{join_all, select, select_all, Either, FutureExt};
use portpicker::pick_unused_port;
use serde_json::Value;
use std::fmt::{self, Display, Formatter};
use std::time::Duration;
use surf::{http::StatusCode, Client};

#[async_std::test]
async fn health_server_test_cases() -> Result<(), Error> {
    chef_model::init_logging();

    let healthy_port = pick_unused_port().unwrap();
    let unhealthy_port = pick_unused_port().unwrap();
    let dead_port = pick_unused_port().unwrap();
    let unhealthy_store = store::Options {
        supabase_url: Some(format!("http://localhost:{dead_port}").parse().unwrap()),
        supabase_key: Some("key".into()),
    }
    .connect()?;

    // The servers run on this task alongside the test cases.
    let servers = select_all([
        health::serve(healthy_port, store::Options::default().connect()?).boxed_local(),
        health::serve(unhealthy_port, unhealthy_store).boxed_local(),
    ]);
    let tests = run_test_cases(healthy_port, unhealthy_port).boxed_local();
    match select(tests, servers).await {
        Either::Left((result, _)) => result,
        Either::Right(((result, _, _), _)) => {
            Err(Error::msg(format!("server exited: {result:?}")))
        }
    }
}

async fn run_test_cases(healthy_port: u16, unhealthy_port: u16) -> Result<(), Error> {
    let healthy = connect(healthy_port).await?;
    let unhealthy = connect(unhealthy_port).await?;

    let test_cases = [
        TestCase::text("root", &healthy, "/", health::RUNNING),
        TestCase::text("health", &healthy, "/health", health::RUNNING),
        TestCase::json(
            "db-health",
            &healthy,
            "/db-health",
            StatusCode::Ok,
            &[
                ("/status", "healthy"),
                ("/database", "connected"),
                ("/stats/total_users", "0"),
            ],
        ),
        TestCase::json(
            "db-health unhealthy",
            &unhealthy,
            "/db-health",
            StatusCode::InternalServerError,
            &[("/status", "unhealthy"), ("/database", "disconnected")],
        ),
        TestCase::text("health without storage", &unhealthy, "/health", health::RUNNING),
    ];

    let results = join_all(test_cases.into_iter().map(TestCase::run)).await;
    for result in &results {
        println!("{}", result);
    }
    if results.iter().any(TestResult::failed) {
        Err(Error::msg(format!("{}", Color::Red.paint("tests failed"))))
    } else {
        println!("All test cases passed.");
        Ok(())
    }
}

async fn connect(port: u16) -> Result<Client, Error> {
    let client: Client = surf::Config::default()
        .set_base_url(format!("http://localhost:{port}").parse().unwrap())
        .try_into()
        .unwrap();
    wait_for_server(&client).await?;
    Ok(client)
}

#[derive(Clone, Debug)]
enum Expected {
    Text(&'static str),
    /// JSON pointers and the string form of the values they should point to.
    Json(Vec<(&'static str, &'static str)>),
}

struct TestCase {
    name: &'static str,
    client: Client,
    path: &'static str,
    status: StatusCode,
    expected: Expected,
}

impl TestCase {
    fn text(name: &'static str, client: &Client, path: &'static str, body: &'static str) -> Self {
        Self {
            name,
            client: client.clone(),
            path,
            status: StatusCode::Ok,
            expected: Expected::Text(body),
        }
    }

    fn json(
        name: &'static str,
        client: &Client,
        path: &'static str,
        status: StatusCode,
        fields: &[(&'static str, &'static str)],
    ) -> Self {
        Self {
            name,
            client: client.clone(),
            path,
            status,
            expected: Expected::Json(fields.to_vec()),
        }
    }

    async fn run(self) -> TestResult {
        TestResult {
            name: self.name,
            failure: self.do_test().await.err(),
        }
    }

    async fn do_test(&self) -> Result<(), Error> {
        let mut res = self.client.get(self.path).await.map_err(Error::msg)?;
        if res.status() != self.status {
            return Err(Error::msg(format!(
                "expected status {}, got {}",
                self.status,
                res.status()
            )));
        }

        match &self.expected {
            Expected::Text(expected) => {
                let body = res.body_string().await.map_err(Error::msg)?;
                if body != *expected {
                    return Err(Error::msg(format!(
                        "expected response:\n{expected}\nactual response:\n{body}"
                    )));
                }
            }
            Expected::Json(fields) => {
                let body: Value = res
                    .body_json()
                    .await
                    .map_err(|err| Error::msg(format!("cannot parse response body as JSON: {err}")))?;
                for (pointer, expected) in fields {
                    let actual = match body.pointer(pointer) {
                        Some(Value::String(s)) => s.clone(),
                        Some(value) => value.to_string(),
                        None => return Err(Error::msg(format!("response is missing {pointer}: {body}"))),
                    };
                    if actual != *expected {
                        return Err(Error::msg(format!(
                            "expected {pointer} to be {expected}, got {actual}"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

struct TestResult {
    name: &'static str,
    failure: Option<Error>,
}

impl TestResult {
    fn failed(&self) -> bool {
        self.failure.is_some()
    }
}

impl Display for TestResult {
    fn fmt(&self, f: &mut Formatter) -> fmt::Result {
        write!(f, "{}...", self.name)?;
        if let Some(err) = &self.failure {
            writeln!(f, "{}", Color::Red.paint("FAILED"))?;
            write!(f, "{err}")?;
        } else {
            write!(f, "{}", Color::Green.paint("OK"))?;
        }
        Ok(())
    }
}

async fn wait_for_server(client: &Client) -> Result<(), Error> {
    const MAX_CONNECT_RETRIES: usize = 60;

    for _ in 0..MAX_CONNECT_RETRIES {
        match client.get("/health").await {
            Ok(_) => return Ok(()),
            Err(err) => {
                tracing::warn!("waiting for server to start: {err}");
                sleep(Duration::from_secs(1)).await;
            }
        }
    }

    Err(Error::msg("timed out waiting for server"))
}
