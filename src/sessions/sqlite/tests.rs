use super::*;
use crate::memory::{Message, Role};
use chrono::TimeDelta;
use tempfile::TempDir;

async fn create_test_store() -> anyhow::Result<(TempDir, SqliteSessionStore)> {
    let temp_dir = TempDir::new()?;
    let store = SqliteSessionStore::initialize_from_config_dir(temp_dir.path()).await?;
    Ok((temp_dir, store))
}

#[tokio::test]
async fn integration_schema_migration() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_test_store().await?;

    let tables: Vec<String> = sqlx::query_scalar(
        "SELECT name FROM sqlite_master WHERE type='table' AND name NOT LIKE 'sqlite_%' AND name NOT LIKE '_sqlx%'",
    )
    .fetch_all(store.pool())
    .await?;

    assert_eq!(tables, vec!["sessions".to_string()]);
    Ok(())
}

#[tokio::test]
async fn save_and_load_round_trip() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_test_store().await?;

    let mut session = Session::new();
    session.memory.summary = "The user runs a sales team.".to_string();
    session
        .memory
        .recent
        .push(Message::new(Role::User, "How do I qualify leads?"));
    store.save(&session).await?;

    let loaded = store.load(&session.id).await?.expect("session should exist");
    assert_eq!(loaded.id, session.id);
    assert_eq!(loaded.memory, session.memory);
    assert_eq!(loaded.created_at, session.created_at);
    assert_eq!(loaded.last_active, session.last_active);

    Ok(())
}

#[tokio::test]
async fn save_overwrites_memory() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_test_store().await?;

    let mut session = Session::new();
    store.save(&session).await?;

    session
        .memory
        .recent
        .push(Message::new(Role::Assistant, "Qualify on budget first."));
    session.touch();
    store.save(&session).await?;

    let loaded = store.load(&session.id).await?.expect("session should exist");
    assert_eq!(loaded.memory.recent.len(), 1);

    let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM sessions")
        .fetch_one(store.pool())
        .await?;
    assert_eq!(count, 1);

    Ok(())
}

#[tokio::test]
async fn delete_and_missing() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_test_store().await?;

    assert!(store.load("nope").await?.is_none());

    let session = Session::new();
    store.save(&session).await?;
    store.delete(&session.id).await?;
    assert!(store.load(&session.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn purge_idle_sessions() -> anyhow::Result<()> {
    let (_temp_dir, store) = create_test_store().await?;

    let fresh = Session::new();
    let mut stale = Session::new();
    stale.last_active = Utc::now() - TimeDelta::hours(2);
    store.save(&fresh).await?;
    store.save(&stale).await?;

    let purged = store
        .purge_idle(Utc::now() - TimeDelta::minutes(30))
        .await?;
    assert_eq!(purged, 1);
    assert!(store.load(&fresh.id).await?.is_some());
    assert!(store.load(&stale.id).await?.is_none());

    Ok(())
}

#[tokio::test]
async fn sessions_survive_reopen() -> anyhow::Result<()> {
    let temp_dir = TempDir::new()?;

    let session = Session::new();
    {
        let store = SqliteSessionStore::initialize_from_config_dir(temp_dir.path()).await?;
        store.save(&session).await?;
        store.pool().close().await;
    }

    let reopened = SqliteSessionStore::initialize_from_config_dir(temp_dir.path()).await?;
    assert!(reopened.load(&session.id).await?.is_some());

    Ok(())
}
