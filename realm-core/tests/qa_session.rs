//! QA tests for the async session and chapter flow.
//!
//! Run with: `cargo test -p realm-core --test qa_session`

use realm_core::persist::list_saves;
use realm_core::testing::{key, sample_catalog, sample_config};
use realm_core::{Entity, Module, ModuleError, Session};
use tempfile::TempDir;

fn session(save_dir: &std::path::Path) -> Session {
    let config = sample_config().with_save_dir(save_dir);
    let module = Module::new(config, sample_catalog()).expect("Failed to start module");
    Session::new(module)
}

#[tokio::test]
async fn test_ticks_and_saves_interleave_safely() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let session = session(temp_dir.path());

    let ticker = {
        let session = session.clone();
        tokio::spawn(async move {
            for _ in 0..20 {
                session.tick(16).await;
            }
        })
    };
    let saver = {
        let session = session.clone();
        tokio::spawn(async move {
            for slot in ["a", "b", "c"] {
                session.save(slot).await.unwrap();
            }
        })
    };
    ticker.await.unwrap();
    saver.await.unwrap();

    assert_eq!(session.read(|m| m.elapsed()).await, 320);
    let saves = list_saves(temp_dir.path()).await.unwrap();
    assert_eq!(saves.len(), 3);
}

#[tokio::test]
async fn test_load_restores_positions() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let session = session(temp_dir.path());
    let goblin = key("goblin", "0");

    session.save("before").await.unwrap();
    session
        .write(|m| {
            m.chapter_mut()
                .character_mut("goblin", "0")
                .map(|g| g.set_area_id("cave"))
        })
        .await;
    session.tick(16).await;
    assert_eq!(
        session
            .read(|m| m.chapter().object_area(&goblin).map(|a| a.id().to_string()))
            .await
            .as_deref(),
        Some("cave")
    );

    session.load("before").await.unwrap();

    assert_eq!(
        session
            .read(|m| m.chapter().object_area(&goblin).map(|a| a.id().to_string()))
            .await
            .as_deref(),
        Some("forest")
    );
}

#[tokio::test]
async fn test_chapter_change_through_session() {
    let temp_dir = TempDir::new().expect("Failed to create temp directory");
    let session = session(temp_dir.path());
    let hero = key("hero", "0");

    session.write(|m| m.next_chapter()).await.unwrap();

    let (chapter, area) = session
        .read(|m| {
            (
                m.chapter().id().to_string(),
                m.chapter().object_area(&hero).map(|a| a.id().to_string()),
            )
        })
        .await;
    assert_eq!(chapter, "act_one");
    assert_eq!(area.as_deref(), Some("city"));

    // Serials are never reissued across chapters
    let spawned = session
        .write(|m| m.spawn_character("goblin", "city"))
        .await
        .unwrap();
    assert_eq!(spawned, key("goblin", "2"));

    assert!(matches!(
        session.write(|m| m.next_chapter()).await,
        Err(ModuleError::NoNextChapter(_))
    ));
}
