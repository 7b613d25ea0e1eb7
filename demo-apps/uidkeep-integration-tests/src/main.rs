use anyhow::{ensure, Context, Result};
use futures::future::join_all;
use reqwest::{Client, StatusCode};
use serde_json::Value;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

const DEFAULT_SERVER_URL: &str = "http://127.0.0.1:5000";

/// Connection details for the server under test
#[derive(Clone)]
struct Target {
    client: Client,
    base_url: String,
    admin_key: String,
}

impl Target {
    fn from_env() -> Result<Self> {
        let base_url =
            std::env::var("UIDKEEP_URL").unwrap_or_else(|_| DEFAULT_SERVER_URL.to_string());
        let admin_key = std::env::var("UIDKEEP_ADMIN_KEY")
            .context("UIDKEEP_ADMIN_KEY must match the server's admin key")?;
        let client = Client::builder().timeout(Duration::from_secs(10)).build()?;
        Ok(Self {
            client,
            base_url,
            admin_key,
        })
    }

    async fn get(&self, path: &str, params: &[(&str, &str)]) -> Result<(StatusCode, Value)> {
        let response = self
            .client
            .get(format!("{}{}", self.base_url, path))
            .query(params)
            .query(&[("key", self.admin_key.as_str())])
            .send()
            .await?;
        let status = response.status();
        let body = response.json().await?;
        Ok((status, body))
    }

    async fn add(&self, uid: &str, time: u64, unit: &str) -> Result<(StatusCode, Value)> {
        let time = time.to_string();
        self.get("/add_uid", &[("uid", uid), ("time", &time), ("type", unit)])
            .await
    }

    async fn add_permanent(&self, uid: &str) -> Result<(StatusCode, Value)> {
        self.get("/add_uid", &[("uid", uid), ("permanent", "true")])
            .await
    }

    async fn remove(&self, uid: &str) -> Result<(StatusCode, Value)> {
        self.get("/remove", &[("uid", uid)]).await
    }

    async fn time_left(&self, uid: &str) -> Result<(StatusCode, Value)> {
        self.get(&format!("/get_time/{uid}"), &[]).await
    }
}

fn unique_uid(label: &str) -> String {
    format!("{}-{}", label, uuid::Uuid::new_v4().simple())
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "uidkeep_integration_tests=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let target = Target::from_env()?;
    let sweep_wait: u64 = std::env::var("UIDKEEP_SWEEP_WAIT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(65);

    tracing::info!("🧪 uidkeep integration tests");
    tracing::info!("   Server: {}", target.base_url);
    println!();

    test_basic_operations(&target).await?;
    test_auth_required(&target).await?;
    test_parallel_adds(&target).await?;
    test_permanent_and_temporary_isolation(&target).await?;
    test_expiration(&target, sweep_wait).await?;

    println!();
    tracing::info!("✅ All tests passed!");

    Ok(())
}

/// Add, query and remove a single UID
async fn test_basic_operations(target: &Target) -> Result<()> {
    tracing::info!("Test: Basic Operations");

    let uid = unique_uid("basic");

    let (status, body) = target.add(&uid, 2, "minutes").await?;
    ensure!(status == StatusCode::OK, "add failed: {status} {body}");
    ensure!(body["status"] == "added", "unexpected add body: {body}");

    let (status, body) = target.time_left(&uid).await?;
    ensure!(status == StatusCode::OK, "get_time failed: {status} {body}");
    let minutes = body["remaining"]["minutes"].as_i64().unwrap_or(-1);
    let seconds = body["remaining"]["seconds"].as_i64().unwrap_or(-1);
    ensure!(
        (1..=2).contains(&minutes) && (0..60).contains(&seconds),
        "remaining should be about 2 minutes, got {body}"
    );

    let (status, _) = target.remove(&uid).await?;
    ensure!(status == StatusCode::OK, "remove failed: {status}");

    let (status, _) = target.time_left(&uid).await?;
    ensure!(
        status == StatusCode::NOT_FOUND,
        "UID should not be found after remove"
    );

    let (status, _) = target.remove(&uid).await?;
    ensure!(
        status == StatusCode::NOT_FOUND,
        "second remove should report not found"
    );

    tracing::info!("   ✓ Basic operations work correctly");
    Ok(())
}

/// Requests without the admin key must be refused
async fn test_auth_required(target: &Target) -> Result<()> {
    tracing::info!("Test: Admin key enforcement");

    let uid = unique_uid("auth");
    let response = target
        .client
        .get(format!("{}/add_uid", target.base_url))
        .query(&[("uid", uid.as_str()), ("permanent", "true"), ("key", "wrong")])
        .send()
        .await?;
    ensure!(
        response.status() == StatusCode::FORBIDDEN,
        "wrong key should be rejected, got {}",
        response.status()
    );

    let (status, _) = target.time_left(&uid).await?;
    ensure!(status == StatusCode::NOT_FOUND, "rejected add must not be stored");

    tracing::info!("   ✓ Requests without the admin key are rejected");
    Ok(())
}

/// Concurrent adds of distinct UIDs must all be persisted
async fn test_parallel_adds(target: &Target) -> Result<()> {
    let num_operations = 200;
    tracing::info!("Test: Parallel adds ({} concurrent requests)", num_operations);

    let semaphore = Arc::new(Semaphore::new(50));
    let uids: Vec<String> = (0..num_operations)
        .map(|i| unique_uid(&format!("parallel{i}")))
        .collect();

    let start = Instant::now();
    let add_futures: Vec<_> = uids
        .iter()
        .map(|uid| {
            let target = target.clone();
            let semaphore = Arc::clone(&semaphore);
            let uid = uid.clone();
            async move {
                let _permit = semaphore.acquire().await?;
                let (status, body) = target.add(&uid, 10, "minutes").await?;
                ensure!(status == StatusCode::OK, "add {uid} failed: {status} {body}");
                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    join_all(add_futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;
    let elapsed = start.elapsed();
    tracing::info!("   ADD {} UIDs in {:?}", num_operations, elapsed);

    let missing = Arc::new(AtomicUsize::new(0));
    let check_futures: Vec<_> = uids
        .iter()
        .map(|uid| {
            let target = target.clone();
            let missing = Arc::clone(&missing);
            let uid = uid.clone();
            async move {
                let (status, _) = target.time_left(&uid).await?;
                if status != StatusCode::OK {
                    tracing::error!("Lost update: {} returned {}", uid, status);
                    missing.fetch_add(1, Ordering::SeqCst);
                }
                Ok::<_, anyhow::Error>(())
            }
        })
        .collect();

    join_all(check_futures)
        .await
        .into_iter()
        .collect::<Result<Vec<_>>>()?;

    let missing = missing.load(Ordering::SeqCst);
    ensure!(missing == 0, "{missing} UIDs were lost");

    for uid in &uids {
        target.remove(uid).await?;
    }

    tracing::info!("   ✓ All {} UIDs persisted", num_operations);
    Ok(())
}

/// Permanent and temporary UIDs added side by side keep their own policy
async fn test_permanent_and_temporary_isolation(target: &Target) -> Result<()> {
    tracing::info!("Test: Policy isolation");

    let permanent = unique_uid("perm");
    let temporary = unique_uid("temp");

    let (p, t) = tokio::join!(
        target.add_permanent(&permanent),
        target.add(&temporary, 3, "days")
    );
    ensure!(p?.0 == StatusCode::OK && t?.0 == StatusCode::OK, "adds failed");

    let (_, body) = target.time_left(&permanent).await?;
    ensure!(body["status"] == "permanent", "expected permanent, got {body}");

    let (_, body) = target.time_left(&temporary).await?;
    let days = body["remaining"]["days"].as_i64().unwrap_or(-1);
    ensure!((2..=3).contains(&days), "expected about 3 days, got {body}");

    target.remove(&permanent).await?;
    target.remove(&temporary).await?;

    tracing::info!("   ✓ Policies are kept per UID");
    Ok(())
}

/// A short-lived UID is reported expired, then evicted by the sweep
async fn test_expiration(target: &Target, sweep_wait: u64) -> Result<()> {
    tracing::info!("Test: Expiration");

    let uid = unique_uid("expire");
    let (status, _) = target.add(&uid, 1, "seconds").await?;
    ensure!(status == StatusCode::OK, "add failed");

    tokio::time::sleep(Duration::from_secs(2)).await;
    let (status, body) = target.time_left(&uid).await?;
    ensure!(
        status == StatusCode::BAD_REQUEST || status == StatusCode::NOT_FOUND,
        "UID should be expired, got {status} {body}"
    );

    tracing::info!("   Waiting {} seconds for the sweep...", sweep_wait);
    tokio::time::sleep(Duration::from_secs(sweep_wait)).await;

    let (status, _) = target.time_left(&uid).await?;
    ensure!(
        status == StatusCode::NOT_FOUND,
        "UID should be evicted by the sweep"
    );

    tracing::info!("   ✓ Expired UIDs are evicted");
    Ok(())
}
