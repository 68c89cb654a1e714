use std::sync::Arc;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use scriptor::{MemoryStore, ScriptStore, Scriptor, ScriptorConfig};

const HELLO: &str = "
    return 'Hello, World!'
";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    // --- Tracing ---
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "scriptor=debug,scriptor_db=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // --- Configuration ---
    let config = ScriptorConfig::from_env()?;
    tracing::info!(
        namespace = %config.namespace,
        partition = config.partition,
        "Loaded scriptor configuration"
    );

    // --- Engine ---
    let store: Arc<dyn ScriptStore> = Arc::new(MemoryStore::new());

    // --- Scriptor ---
    let scriptor = Scriptor::builder()
        .store(Some(store))
        .namespace(config.namespace.clone())
        .partition(config.partition)
        .script("hello", HELLO)
        .build()
        .await?;

    for run in 1..=3 {
        let reply = scriptor.exec_sha("hello", &[], &[]).await?;
        println!(
            "{}",
            serde_json::json!({ "run": run, "script": "hello", "reply": reply.to_json() })
        );
    }

    Ok(())
}
