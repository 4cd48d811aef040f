use std::path::Path;

use vgn_pipeline::PipelineConfig;
use vgn_store::{RedisStore, StoreConfig};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = PipelineConfig::from_env();

    println!(
        "pipeline-selfcheck: starting with data_dir={}",
        config.data_dir.display()
    );
    ensure_data_dir(&config.data_dir).await?;
    ensure_env_present(&["REDIS_URL"])?;
    ensure_redis().await?;

    println!("pipeline-selfcheck: ok");
    Ok(())
}

async fn ensure_data_dir<P: AsRef<Path>>(path: P) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path.as_ref()).await?;
    Ok(())
}

async fn ensure_redis() -> anyhow::Result<()> {
    let store = RedisStore::new(StoreConfig::from_env())?;
    store
        .ping()
        .await
        .map_err(|e| anyhow::anyhow!("redis not reachable: {}", e))?;
    Ok(())
}

fn ensure_env_present(vars: &[&str]) -> anyhow::Result<()> {
    for var in vars {
        if std::env::var(var).is_err() {
            return Err(anyhow::anyhow!("missing required env var {}", var));
        }
    }
    Ok(())
}
