use std::path::Path;

use pvgen_queue::{check_connectivity, RedisBackend};
use pvgen_render::check_renderer;
use pvgen_worker::WorkerConfig;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = WorkerConfig::from_env();

    println!(
        "worker-selfcheck: starting with videos_dir={} scratch_dir={}",
        config.render.videos_dir.display(),
        config.render.scratch_dir.display()
    );
    ensure_dir_writable(&config.render.videos_dir).await?;
    ensure_dir_writable(&config.render.scratch_dir).await?;
    ensure_renderer(&config.render.renderer_bin)?;
    ensure_any_env_present(&["REDIS_URL", "REDIS_HOST"])?;
    ensure_store(&config.queue.redis_url).await?;

    println!("worker-selfcheck: ok");
    Ok(())
}

async fn ensure_dir_writable(path: &Path) -> anyhow::Result<()> {
    tokio::fs::create_dir_all(path)
        .await
        .map_err(|e| anyhow::anyhow!("cannot create {}: {}", path.display(), e))?;

    let marker = path.join(".selfcheck");
    tokio::fs::write(&marker, b"ok")
        .await
        .map_err(|e| anyhow::anyhow!("{} is not writable: {}", path.display(), e))?;
    tokio::fs::remove_file(&marker).await?;
    Ok(())
}

fn ensure_renderer(program: &str) -> anyhow::Result<()> {
    let path = check_renderer(program).map_err(|e| anyhow::anyhow!("{}", e))?;
    println!("worker-selfcheck: renderer at {}", path.display());
    Ok(())
}

fn ensure_any_env_present(vars: &[&str]) -> anyhow::Result<()> {
    if !vars.iter().any(|var| std::env::var(var).is_ok()) {
        return Err(anyhow::anyhow!(
            "missing required env var (one of {})",
            vars.join(", ")
        ));
    }
    Ok(())
}

async fn ensure_store(redis_url: &str) -> anyhow::Result<()> {
    let backend = RedisBackend::new(redis_url)?;
    check_connectivity(&backend)
        .await
        .map_err(|e| anyhow::anyhow!("store at {} unreachable: {}", redis_url, e))?;
    Ok(())
}
