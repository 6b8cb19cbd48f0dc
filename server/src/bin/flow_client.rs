//! Walks a running server through the full credential lifecycle:
//! code issuance, verification, the protected route, refresh and sign-out.

use std::time::Duration;

use anyhow::{anyhow, bail, Context};
use base64::{engine::general_purpose::STANDARD, Engine};
use reqwest::{RequestBuilder, StatusCode};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;

#[derive(Debug, Clone)]
struct FlowConfig {
    http_base: String,
    email: String,
    api_key: Option<String>,
    timeout_ms: u64,
}

#[derive(Debug, Deserialize)]
struct CodeResponse {
    auth_code: String,
    access_token: String,
}

#[derive(Debug, Deserialize)]
struct SessionResponse {
    access_token: String,
    refresh_token: String,
    token_type: String,
    expires_in: u64,
}

#[derive(Debug, Deserialize)]
struct UserResponse {
    id: String,
    email: String,
    role: String,
}

struct FlowClient {
    http: reqwest::Client,
    base: String,
    api_key_header: String,
}

impl FlowClient {
    fn new(cfg: &FlowConfig) -> anyhow::Result<Self> {
        let api_key = cfg
            .api_key
            .as_deref()
            .ok_or_else(|| anyhow!("--api-key is required (or set API_KEY_PUBLIC)"))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.timeout_ms))
            .build()
            .context("failed to build HTTP client")?;

        Ok(Self {
            http,
            base: cfg.http_base.trim_end_matches('/').to_string(),
            api_key_header: STANDARD.encode(api_key.as_bytes()),
        })
    }

    fn post(&self, path: &str, body: serde_json::Value) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        println!("[flow-client] POST {}", url);
        self.http
            .post(url)
            .header("X-API-KEY", &self.api_key_header)
            .json(&body)
    }

    fn get(&self, path: &str) -> RequestBuilder {
        let url = format!("{}{}", self.base, path);
        println!("[flow-client] GET {}", url);
        self.http.get(url).header("X-API-KEY", &self.api_key_header)
    }

    async fn expect_json<T: DeserializeOwned>(
        request: RequestBuilder,
        expected: StatusCode,
        label: &str,
    ) -> anyhow::Result<T> {
        let response = request
            .send()
            .await
            .with_context(|| format!("network failure calling {}", label))?;

        if response.status() != expected {
            let status = response.status();
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "<no body>".to_string());
            bail!("{} returned {} (expected {}): {}", label, status, expected, body);
        }

        response
            .json()
            .await
            .with_context(|| format!("failed to decode {} response", label))
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cfg = parse_args()?;
    let client = FlowClient::new(&cfg)?;

    println!("[flow-client] HTTP base: {}", cfg.http_base);

    let health = client
        .http
        .get(format!("{}/healthz", client.base))
        .send()
        .await
        .context("network failure calling /healthz")?;
    if health.status() != StatusCode::OK {
        bail!("/healthz returned {}", health.status());
    }

    let code: CodeResponse = FlowClient::expect_json(
        client.post(
            "/api/oauth/token",
            json!({ "grant_type": "authorization_code", "email": cfg.email }),
        ),
        StatusCode::OK,
        "authorization_code grant",
    )
    .await?;
    println!(
        "[flow-client] code issued: {} (handle {} bytes)",
        code.auth_code,
        code.access_token.len()
    );

    let session: SessionResponse = FlowClient::expect_json(
        client.post(
            "/api/oauth/token",
            json!({ "grant_type": "verification_code", "auth_code": code.auth_code }),
        ),
        StatusCode::OK,
        "verification_code grant",
    )
    .await?;
    println!(
        "[flow-client] session issued: {} expires in {}s",
        session.token_type, session.expires_in
    );

    let replay = client
        .post(
            "/api/oauth/token",
            json!({ "grant_type": "verification_code", "auth_code": code.auth_code }),
        )
        .send()
        .await
        .context("network failure replaying code")?;
    if replay.status() != StatusCode::UNAUTHORIZED {
        bail!("code replay returned {} instead of 401", replay.status());
    }
    println!("[flow-client] code replay rejected");

    let me: UserResponse = FlowClient::expect_json(
        client
            .get("/api/users")
            .bearer_auth(&session.access_token),
        StatusCode::OK,
        "current user",
    )
    .await?;
    println!("[flow-client] authenticated as {} <{}> ({})", me.id, me.email, me.role);

    let renewed: SessionResponse = FlowClient::expect_json(
        client.post(
            "/api/oauth/token",
            json!({ "grant_type": "refresh_token", "refresh_token": session.refresh_token }),
        ),
        StatusCode::OK,
        "refresh_token grant",
    )
    .await?;
    println!("[flow-client] session refreshed");

    let _: serde_json::Value = FlowClient::expect_json(
        client.post("/api/oauth/sign-out", json!({ "token": renewed.access_token })),
        StatusCode::OK,
        "sign-out",
    )
    .await?;

    let second = client
        .post("/api/oauth/sign-out", json!({ "token": renewed.access_token }))
        .send()
        .await
        .context("network failure on second sign-out")?;
    if second.status() != StatusCode::UNAUTHORIZED {
        bail!("second sign-out returned {} instead of 401", second.status());
    }

    println!("[flow-client] flow completed successfully");
    Ok(())
}

fn parse_args() -> anyhow::Result<FlowConfig> {
    let mut cfg = FlowConfig {
        http_base: "http://127.0.0.1:8080".to_string(),
        email: "flow-client@example.com".to_string(),
        api_key: std::env::var("API_KEY_PUBLIC").ok(),
        timeout_ms: 5_000,
    };

    let mut args = std::env::args().skip(1).peekable();
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--http-base" => cfg.http_base = next_arg_value(&mut args, &arg)?,
            "--email" => cfg.email = next_arg_value(&mut args, &arg)?,
            "--api-key" => cfg.api_key = Some(next_arg_value(&mut args, &arg)?),
            "--timeout-ms" => {
                let value = next_arg_value(&mut args, &arg)?;
                cfg.timeout_ms = value
                    .parse::<u64>()
                    .with_context(|| format!("invalid --timeout-ms: {}", value))?;
            }
            "--help" | "-h" => {
                print_help();
                std::process::exit(0);
            }
            other => {
                bail!("unknown argument: {}\nUse --help to list options.", other);
            }
        }
    }

    Ok(cfg)
}

fn next_arg_value<I>(args: &mut std::iter::Peekable<I>, flag: &str) -> anyhow::Result<String>
where
    I: Iterator<Item = String>,
{
    args.next()
        .ok_or_else(|| anyhow!("missing value for {}", flag))
}

fn print_help() {
    println!(
        "flow-client - exercises the credential flow against a running auth server\n\n\
Usage:\n\
  cargo run --manifest-path server/Cargo.toml --bin flow-client -- [options]\n\n\
Options:\n\
  --http-base <url>     HTTP base (default: http://127.0.0.1:8080)\n\
  --email <email>       Email used for the authorization_code grant\n\
  --api-key <key>       Raw public API key (default: $API_KEY_PUBLIC)\n\
  --timeout-ms <ms>     HTTP timeout (default: 5000)\n\
  --help                Show this help\n"
    );
}
