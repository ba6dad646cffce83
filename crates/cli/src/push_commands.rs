use {
    anyhow::{Context, Result},
    courier_config::ConnectionConfig,
    courier_push::Connection,
    serde::Serialize,
};

async fn open(config: ConnectionConfig) -> Result<Connection> {
    let app = config.application_id.clone();
    Connection::open(config)
        .await
        .with_context(|| format!("failed to open push connection for `{app}`"))
}

/// Run `op` on a fresh connection and always close it afterwards.
async fn with_connection<T, F>(config: ConnectionConfig, op: F) -> Result<T>
where
    F: AsyncFnOnce(&Connection) -> courier_push::Result<T>,
{
    let conn = open(config).await?;
    let result = op(&conn).await;
    let closed = conn.close().await;
    settle(result, closed)
}

/// The operation's own failure wins over a failure to close.
fn settle<T>(result: courier_push::Result<T>, closed: courier_push::Result<()>) -> Result<T> {
    let value = result.map_err(|e| {
        let kind = e.kind();
        anyhow::Error::new(e).context(kind)
    })?;
    closed.context("failed to close push connection")?;
    Ok(value)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

pub async fn subscribe(
    config: ConnectionConfig,
    channel_id: &str,
    app_server_key: Option<&str>,
) -> Result<()> {
    let info = with_connection(config, async |conn| {
        conn.subscribe(channel_id, app_server_key).await
    })
    .await?;
    print_json(&serde_json::json!({
        "channel_id": channel_id,
        "subscription": info,
    }))
}

pub async fn unsubscribe(config: ConnectionConfig, channel_id: &str) -> Result<()> {
    let removed = with_connection(config, async |conn| conn.unsubscribe(channel_id).await).await?;
    if removed {
        println!("unsubscribed {channel_id}");
    } else {
        println!("{channel_id} was not subscribed");
    }
    Ok(())
}

pub async fn unsubscribe_all(config: ConnectionConfig) -> Result<()> {
    let removed = with_connection(config, async |conn| conn.unsubscribe_all().await).await?;
    println!("unsubscribed {removed} channel(s)");
    Ok(())
}

pub async fn update(config: ConnectionConfig, token: &str) -> Result<()> {
    let report = with_connection(config, async |conn| conn.update_report(token).await).await?;
    print_json(&report)?;
    if let Some(kind) = report.failure_kind() {
        anyhow::bail!("{kind}: {} channel(s) failed to update", report.failed.len());
    }
    Ok(())
}

pub async fn verify(config: ConnectionConfig) -> Result<()> {
    let endpoints = with_connection(config, async |conn| conn.verify_connection().await).await?;
    if endpoints.is_empty() {
        println!("connection ok");
        Ok(())
    } else {
        print_json(&endpoints)
    }
}

pub async fn list(config: ConnectionConfig) -> Result<()> {
    let channels = with_connection(config, async |conn| conn.channels().await).await?;
    for channel_id in channels {
        println!("{channel_id}");
    }
    Ok(())
}
