mod helpers;

use std::sync::Arc;
use std::time::Duration;

use linestage::config::Config;
use linestage::error::StageError;
use linestage::session::RepositorySession;
use linestage::types::{DiffResult, DiffTarget, Hunk, LineKind, PathChange, RefreshType, ViewMode};
use tokio::time::timeout;

async fn unstaged_hunks(session: &RepositorySession, path: &str) -> (PathChange, Vec<Hunk>) {
    let change = session
        .unstaged_changes()
        .await
        .unwrap()
        .into_iter()
        .find(|c| c.path().to_str() == Some(path))
        .unwrap_or_else(|| panic!("no unstaged change for {path}"));
    let diff = session
        .compute_diff(&change, DiffTarget::Unstaged, ViewMode::Unified)
        .await
        .unwrap();
    let DiffResult::Text { hunks, .. } = diff else {
        panic!("expected a text diff for {path}");
    };
    (change, hunks)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stage_calls_all_land() {
    const N: usize = 8;
    let (dir, repo) = helpers::create_temp_repo();
    for i in 0..N {
        helpers::commit_file(&repo, &format!("f{i}.txt"), "a\nb\nc\n");
        helpers::modify_file(&repo, &format!("f{i}.txt"), &format!("a\nb{i}\nc\n"));
    }

    let session = Arc::new(RepositorySession::open(dir.path(), Config::default()).unwrap());
    let mut refresh = session.subscribe();

    let mut targets = Vec::new();
    for i in 0..N {
        targets.push(unstaged_hunks(&session, &format!("f{i}.txt")).await);
    }

    let mut tasks = Vec::new();
    for (change, hunks) in targets {
        let session = Arc::clone(&session);
        tasks.push(tokio::spawn(async move {
            session.stage_hunk(&change, &hunks[0]).await
        }));
    }
    for task in tasks {
        assert_eq!(
            task.await.unwrap().unwrap(),
            RefreshType::UncommittedChanges
        );
    }

    for i in 0..N {
        assert_eq!(
            helpers::index_content(&repo, &format!("f{i}.txt")).unwrap(),
            format!("a\nb{i}\nc\n")
        );
        assert_eq!(refresh.recv().await.unwrap(), RefreshType::UncommittedChanges);
    }
    assert!(session.unstaged_changes().await.unwrap().is_empty());
    assert!(!repo.path().join("index.lock").exists());
    session.close().await;
}

#[tokio::test]
async fn test_stage_line_broadcasts_refresh() {
    let (dir, repo) = helpers::create_temp_repo();
    helpers::commit_file(&repo, "f.txt", "a\nb\nc\n");
    helpers::modify_file(&repo, "f.txt", "a\nX\nc\n");

    let session = RepositorySession::open(dir.path(), Config::default()).unwrap();
    let mut refresh = session.subscribe();
    let (change, hunks) = unstaged_hunks(&session, "f.txt").await;
    let x = hunks[0]
        .lines
        .iter()
        .find(|l| l.kind == LineKind::Added)
        .unwrap()
        .clone();

    session.stage_line(&change, &hunks[0], &x).await.unwrap();

    assert_eq!(refresh.recv().await.unwrap(), RefreshType::UncommittedChanges);
    assert_eq!(helpers::index_content(&repo, "f.txt").unwrap(), "a\nX\nb\nc\n");
    assert!(!session.state().busy);
    session.close().await;
}

#[tokio::test]
async fn test_invalid_selection_is_reported_without_refresh() {
    let (dir, repo) = helpers::create_temp_repo();
    helpers::commit_file(&repo, "f.txt", "a\nb\nc\n");
    helpers::modify_file(&repo, "f.txt", "a\nX\nc\n");

    let session = RepositorySession::open(dir.path(), Config::default()).unwrap();
    let mut refresh = session.subscribe();
    let mut failures = session.failures();
    let (change, hunks) = unstaged_hunks(&session, "f.txt").await;
    let context = hunks[0].lines[0].clone();
    assert_eq!(context.kind, LineKind::Context);

    let err = session
        .stage_line(&change, &hunks[0], &context)
        .await
        .unwrap_err();

    assert!(matches!(err, StageError::InvalidSelection(_)));
    assert!(failures.recv().await.unwrap().contract_violation);
    assert!(refresh.try_recv().is_err());
    assert_eq!(helpers::index_content(&repo, "f.txt").unwrap(), "a\nb\nc\n");
    session.close().await;
}

#[tokio::test]
async fn test_submitted_stage_reports_failure() {
    let (dir, repo) = helpers::create_temp_repo();
    helpers::commit_file(&repo, "f.txt", "a\nb\nc\n");
    helpers::modify_file(&repo, "f.txt", "a\nX\nc\n");

    let session = RepositorySession::open(dir.path(), Config::default()).unwrap();
    let mut failures = session.failures();
    let (change, hunks) = unstaged_hunks(&session, "f.txt").await;
    std::fs::write(repo.path().join("index.lock"), b"").unwrap();

    session.submit_stage_hunk(&change, &hunks[0]).unwrap();

    let failure = failures.recv().await.unwrap();
    assert!(!failure.contract_violation);
    assert!(failure.message.contains("Another git process"));
    session.close().await;
}

#[tokio::test]
async fn test_closed_session_rejects_operations() {
    let (dir, repo) = helpers::create_temp_repo();
    helpers::commit_file(&repo, "f.txt", "a\n");
    helpers::modify_file(&repo, "f.txt", "b\n");

    let session = RepositorySession::open(dir.path(), Config::default()).unwrap();
    let (change, hunks) = unstaged_hunks(&session, "f.txt").await;
    session.close().await;

    assert!(session.scheduler().is_closed());
    assert!(matches!(
        session.stage_hunk(&change, &hunks[0]).await,
        Err(StageError::SessionClosed)
    ));
    assert_eq!(helpers::index_content(&repo, "f.txt").unwrap(), "a\n");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_watcher_reports_work_tree_changes() {
    let (dir, repo) = helpers::create_temp_repo();
    helpers::commit_file(&repo, "f.txt", "a\n");

    let config = Config {
        watch_debounce: Duration::from_millis(50),
        ..Config::default()
    };
    let session = RepositorySession::open(dir.path(), config).unwrap();
    let mut refresh = session.subscribe();
    session.watch_changes().unwrap();

    helpers::modify_file(&repo, "f.txt", "a\nb\n");

    let signal = timeout(Duration::from_secs(10), async {
        loop {
            match refresh.recv().await {
                Ok(RefreshType::UncommittedChanges) => return RefreshType::UncommittedChanges,
                Ok(_) => continue,
                Err(e) => panic!("refresh channel failed: {e}"),
            }
        }
    })
    .await
    .expect("no refresh after a work tree change");
    assert_eq!(signal, RefreshType::UncommittedChanges);
    session.close().await;
}
