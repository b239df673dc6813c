mod support;

use crate::support::{setup_test_environment, MemoryArchiveReader, TestEnv, TestModel};
use hoard::events::ModelEvent;
use hoard::import::{CancellationToken, NotificationState, ProgressNotification};
use hoard::Importable;

async fn import_item(env: &TestEnv, name: &str, entries: &[(&str, &str)]) -> TestModel {
    let mut reader = MemoryArchiveReader::new(name, entries);
    env.importer
        .import(&mut reader, &CancellationToken::new())
        .await
        .unwrap()
        .unwrap()
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_then_undelete_restores_reference_counts() {
    let env = setup_test_environment().await;
    let model = import_item(&env, "one.zip", &[("a.txt", "a"), ("b.png", "b")]).await;
    let before = env.store.counts();

    assert!(env.library().delete(&model).await.unwrap());
    let deleted = env.library().get(model.id().unwrap()).await.unwrap().unwrap();
    assert!(deleted.delete_pending());
    assert!(env.store.live_counts().is_empty());
    assert!(env.library().all().await.unwrap().is_empty());

    assert!(env.library().undelete(&model).await.unwrap());
    let restored = env.library().get(model.id().unwrap()).await.unwrap().unwrap();
    assert!(!restored.delete_pending());
    assert_eq!(env.store.counts(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_and_undelete_are_idempotent() {
    let env = setup_test_environment().await;
    let model = import_item(&env, "one.zip", &[("a.txt", "a")]).await;

    assert!(!env.library().undelete(&model).await.unwrap());
    assert!(env.library().delete(&model).await.unwrap());
    assert!(!env.library().delete(&model).await.unwrap());

    let unsaved = TestModel::new("never stored");
    assert!(!env.library().delete(&unsaved).await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_delete_raises_removed_and_undelete_raises_updated() {
    let env = setup_test_environment().await;
    let model = import_item(&env, "one.zip", &[("a.txt", "a")]).await;
    let mut events = env.importer.subscribe();

    env.library().delete(&model).await.unwrap();
    env.library().undelete(&model).await.unwrap();

    match events.try_recv().unwrap() {
        ModelEvent::Removed { id, model: payload } => {
            assert_eq!(Some(id), model.id());
            assert!(payload.delete_pending());
        }
        other => panic!("Unexpected event {:?}", other),
    }
    assert!(matches!(events.try_recv().unwrap(), ModelEvent::Updated { .. }));
    assert!(events.try_recv().is_err());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cleanup_purges_pending_rows_and_releases_files() {
    let env = setup_test_environment().await;
    let doomed = import_item(&env, "doomed.zip", &[("a.txt", "a")]).await;
    let kept = import_item(&env, "kept.zip", &[("b.txt", "b")]).await;

    env.library().delete(&doomed).await.unwrap();
    assert_eq!(env.store.object_count(), 2);

    let purged = env.library().cleanup().await.unwrap();

    assert_eq!(purged, 1);
    assert!(env.library().get(doomed.id().unwrap()).await.unwrap().is_none());
    assert!(env.library().get(kept.id().unwrap()).await.unwrap().is_some());
    assert_eq!(env.store.object_count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_purge_never_removes_protected_or_live_rows() {
    let env = setup_test_environment().await;
    let mut protected = TestModel::new("protected");
    protected.info.protected = true;
    let protected = env
        .importer
        .import_model(protected, CancellationToken::new())
        .await
        .unwrap()
        .unwrap();
    let live = import_item(&env, "live.zip", &[("a.txt", "a")]).await;

    env.library().delete(&protected).await.unwrap();
    let purged = env.library().purge(|_| true).await.unwrap();

    assert_eq!(purged, 0);
    assert!(env.library().get(protected.id().unwrap()).await.unwrap().is_some());
    assert!(env.library().get(live.id().unwrap()).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_protected_model_stays_restorable_after_cleanup() {
    let env = setup_test_environment().await;
    let mut model = import_item(&env, "kept.zip", &[("a.txt", "a"), ("b.png", "b")]).await;
    model.info.protected = true;
    env.library().update(&model).await.unwrap();
    let before = env.store.counts();

    env.library().delete(&model).await.unwrap();
    env.library().cleanup().await.unwrap();
    assert_eq!(env.store.object_count(), 2);

    assert!(env.library().undelete(&model).await.unwrap());
    let restored = env.library().get(model.id().unwrap()).await.unwrap().unwrap();
    assert!(!restored.delete_pending());
    for file in restored.files() {
        assert!(env.files.open_read(&file.handle).await.is_ok());
    }
    assert_eq!(env.store.counts(), before);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_purge_respects_predicate() {
    let env = setup_test_environment().await;
    let first = import_item(&env, "first.zip", &[("a.txt", "a")]).await;
    let second = import_item(&env, "second.zip", &[("b.txt", "b")]).await;
    env.library().delete(&first).await.unwrap();
    env.library().delete(&second).await.unwrap();

    let purged = env
        .library()
        .purge(|m: &TestModel| m.title == "first")
        .await
        .unwrap();

    assert_eq!(purged, 1);
    assert!(env.library().get(first.id().unwrap()).await.unwrap().is_none());
    assert!(env.library().get(second.id().unwrap()).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_batch_delete_and_restore_report_progress() {
    let env = setup_test_environment().await;
    let mut models = Vec::new();
    for name in ["a.zip", "b.zip", "c.zip"] {
        models.push(import_item(&env, name, &[(name, name)]).await);
    }

    let notification = ProgressNotification::new();
    let deleted = env.library().delete_many(&models, &notification).await.unwrap();
    assert_eq!(deleted, 3);
    let snapshot = notification.snapshot();
    assert_eq!(snapshot.state, NotificationState::Completed);
    assert_eq!(snapshot.completion_text, "Deleted all items!");
    assert!(env.library().all().await.unwrap().is_empty());

    let restored = env.importer.undelete_all(&models).await.unwrap();
    assert_eq!(restored, 3);
    assert_eq!(env.library().all().await.unwrap().len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_cancelled_batch_stops_before_next_item() {
    let env = setup_test_environment().await;
    let first = import_item(&env, "a.zip", &[("a.txt", "a")]).await;
    let second = import_item(&env, "b.zip", &[("b.txt", "b")]).await;

    let notification = ProgressNotification::new();
    notification.cancel();
    let deleted = env
        .library()
        .delete_many(&[first, second], &notification)
        .await
        .unwrap();

    assert_eq!(deleted, 0);
    assert_eq!(env.library().all().await.unwrap().len(), 2);
    assert_eq!(notification.state(), NotificationState::Cancelled);
}
