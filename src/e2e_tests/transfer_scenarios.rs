//! Transfer tasks end to end: downloads, uploads, cancellation, suspension
//! and the remote file operations

use super::test_context::{pattern, wait_for_progress, TestContext, REPORT_SIZE};
use crate::client::SessionState;
use crate::error::{ErrorCode, NtStatus};
use crate::protocol::smb2_constants::Smb2Command;
use crate::transfer::{
    PartialPolicy, TransferOutcome, TransferRequest, TransferTask, TransferTaskState,
};
use std::time::Duration;

#[tokio::test]
async fn test_download_report_with_increasing_progress() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;
    let local = ctx.local("report.pdf");

    let task = tree.download_task("/docs/report.pdf", &local);
    let mut progress = task.subscribe_progress();
    let observer = tokio::spawn(async move {
        let mut seen = Vec::new();
        while progress.changed().await.is_ok() {
            let snapshot = *progress.borrow_and_update();
            if snapshot.total_bytes.is_some() {
                seen.push(snapshot.bytes_transferred);
            }
        }
        seen
    });

    task.start().unwrap();
    let outcome = task.wait().await.unwrap();
    assert_eq!(
        outcome,
        TransferOutcome::Completed {
            bytes: REPORT_SIZE as u64
        }
    );
    assert_eq!(task.state(), TransferTaskState::Completed);
    assert_eq!(std::fs::read(&local).unwrap(), pattern(REPORT_SIZE));

    let final_progress = task.progress();
    assert_eq!(final_progress.bytes_transferred, REPORT_SIZE as u64);
    assert_eq!(final_progress.total_bytes, Some(REPORT_SIZE as u64));
    assert_eq!(final_progress.fraction(), Some(1.0));

    drop(task);
    let seen = observer.await.unwrap();
    assert!(!seen.is_empty());
    assert!(seen.windows(2).all(|w| w[0] < w[1]), "progress went backwards: {:?}", seen);
    assert_eq!(seen.last().copied(), Some(REPORT_SIZE as u64));
}

#[tokio::test]
async fn test_directory_download_guard() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;
    let local = ctx.local("docs.bin");

    let task = tree.download_task("/docs", &local);
    task.start().unwrap();
    let err = task.wait().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::DirectoryDownloaded);
    assert_eq!(task.state(), TransferTaskState::Cancelled);
    assert_eq!(task.progress().bytes_transferred, 0);
    assert!(!local.exists());
}

#[tokio::test]
async fn test_download_missing_file() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let task = tree.download_task("/docs/missing.pdf", ctx.local("missing.pdf"));
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap_err().code(), ErrorCode::FileNotFound);
}

#[tokio::test]
async fn test_cancel_never_completes() {
    let ctx = TestContext::new().await;
    ctx.server.faults().read_delay = Duration::from_millis(20);
    let tree = ctx.share().await;
    let local = ctx.local("report.pdf");

    let task = tree.download_task("/docs/report.pdf", &local);
    task.start().unwrap();
    wait_for_progress(&task, 1).await;
    task.cancel().unwrap();

    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Cancelled);
    assert_eq!(task.state(), TransferTaskState::Cancelled);

    // Nothing is written once the cancellation has been observed
    let written = std::fs::metadata(&local).unwrap().len();
    let reads = ctx.server.state().reads();
    tokio::time::sleep(Duration::from_millis(150)).await;
    assert_eq!(std::fs::metadata(&local).unwrap().len(), written);
    assert_eq!(ctx.server.state().reads(), reads);
    assert!(written < REPORT_SIZE as u64);
    assert_eq!(task.progress().bytes_transferred, written);

    for refused in [task.cancel(), task.start(), task.resume()] {
        assert_eq!(refused.unwrap_err().code(), ErrorCode::Unknown);
    }
}

#[tokio::test]
async fn test_cancel_before_start() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;
    let task = tree.download_task("/docs/report.pdf", ctx.local("report.pdf"));

    assert!(task.wait().await.is_err());
    assert!(task.suspend().is_err());
    task.cancel().unwrap();
    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Cancelled);
    assert_eq!(ctx.server.state().reads(), 0);
}

#[tokio::test]
async fn test_suspend_resume_is_byte_identical() {
    let ctx = TestContext::new().await;
    ctx.server.faults().read_delay = Duration::from_millis(10);
    let tree = ctx.share().await;
    let local = ctx.local("report.pdf");

    let task = tree.download_task("/docs/report.pdf", &local);
    task.start().unwrap();
    wait_for_progress(&task, 1).await;
    task.suspend().unwrap();
    assert_eq!(task.state(), TransferTaskState::Suspended);
    assert!(task.suspend().is_err());

    // A read in flight may still land; after that the worker stays parked
    tokio::time::sleep(Duration::from_millis(100)).await;
    let parked = task.progress();
    let reads = ctx.server.state().reads();
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(task.progress(), parked);
    assert_eq!(ctx.server.state().reads(), reads);
    assert!(parked.bytes_transferred < REPORT_SIZE as u64);

    let point = task.resume_point().unwrap();
    assert_eq!(point.offset, parked.bytes_transferred);

    task.resume().unwrap();
    assert_eq!(
        task.wait().await.unwrap(),
        TransferOutcome::Completed {
            bytes: REPORT_SIZE as u64
        }
    );
    assert_eq!(std::fs::read(&local).unwrap(), pattern(REPORT_SIZE));
}

#[tokio::test]
async fn test_partial_download_removed_on_cancel() {
    let ctx = TestContext::new().await;
    ctx.server.faults().read_delay = Duration::from_millis(20);
    let tree = ctx.share().await;
    let local = ctx.local("report.pdf");

    let task = tree
        .download_task("/docs/report.pdf", &local)
        .with_partial_policy(PartialPolicy::Delete);
    task.start().unwrap();
    wait_for_progress(&task, 1).await;
    task.cancel().unwrap();
    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Cancelled);
    assert!(!local.exists());
}

#[tokio::test]
async fn test_download_resumes_from_local_length() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;
    let local = ctx.local("report.pdf");
    let content = pattern(REPORT_SIZE);
    std::fs::write(&local, &content[..500_000]).unwrap();

    let task = TransferTask::new(
        tree.clone(),
        TransferRequest::Download {
            remote: "docs/report.pdf".into(),
            local: local.clone(),
            resume: true,
        },
    );
    task.start().unwrap();
    task.wait().await.unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), content);
    // Only the missing tail was fetched
    let chunk = 64 * 1024;
    let expected_reads = (REPORT_SIZE - 500_000).div_ceil(chunk) as u64;
    assert_eq!(ctx.server.state().reads(), expected_reads);
}

#[tokio::test]
async fn test_transient_read_failures_are_retried() {
    let ctx = TestContext::new().await;
    {
        let mut faults = ctx.server.faults();
        faults.fail_next.push_back((Smb2Command::Read, NtStatus::InsufficientResources));
        faults.fail_next.push_back((Smb2Command::Read, NtStatus::IoTimeout));
    }
    let tree = ctx.share().await;
    let local = ctx.local("report.pdf");

    let task = tree.download_task("docs/report.pdf", &local);
    task.start().unwrap();
    task.wait().await.unwrap();
    assert_eq!(std::fs::read(&local).unwrap(), pattern(REPORT_SIZE));
}

#[tokio::test]
async fn test_stalled_read_fails_with_unable_to_connect() {
    let ctx = TestContext::new().await;
    let config = crate::client::ClientConfig {
        io_timeout: Duration::from_millis(300),
        ..ctx.client_config()
    };
    let session = crate::client::Session::open(ctx.endpoint(), config)
        .await
        .unwrap();
    let tree = session.connect_share("public").await.unwrap();
    ctx.server.faults().stall_on = Some(Smb2Command::Read);

    let task = tree.download_task("docs/report.pdf", ctx.local("report.pdf"));
    task.start().unwrap();
    let err = task.wait().await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToConnect);
    assert_eq!(task.state(), TransferTaskState::Cancelled);
    assert_eq!(session.state(), SessionState::Error(ErrorCode::UnableToConnect));
}

#[tokio::test]
async fn test_directory_download() {
    let ctx = TestContext::new().await;
    {
        let mut fs = ctx.server.fs();
        fs.add_file("docs/notes.txt", b"notes".to_vec());
        fs.add_file("docs/2024/q1.csv", pattern(70_000));
        fs.add_dir("docs/empty");
    }
    let tree = ctx.share().await;
    let local = ctx.local("docs");

    let task = tree.download_directory_task("/docs", &local);
    task.start().unwrap();
    let total = (REPORT_SIZE + 5 + 70_000) as u64;
    assert_eq!(
        task.wait().await.unwrap(),
        TransferOutcome::Completed { bytes: total }
    );
    assert_eq!(task.progress().total_bytes, Some(total));
    assert_eq!(std::fs::read(local.join("notes.txt")).unwrap(), b"notes");
    assert_eq!(std::fs::read(local.join("2024").join("q1.csv")).unwrap(), pattern(70_000));
    assert_eq!(std::fs::read(local.join("report.pdf")).unwrap(), pattern(REPORT_SIZE));
    assert!(local.join("empty").is_dir());
}

#[tokio::test]
async fn test_upload_and_verify() {
    let ctx = TestContext::new().await;
    ctx.server.fs().add_dir("incoming");
    let tree = ctx.share().await;
    let local = ctx.local("data.bin");
    let content = pattern(300_000);
    std::fs::write(&local, &content).unwrap();

    let task = tree.upload_task(&local, "/incoming/data.bin");
    task.start().unwrap();
    assert_eq!(
        task.wait().await.unwrap(),
        TransferOutcome::Completed { bytes: 300_000 }
    );
    assert_eq!(ctx.server.fs().file("incoming/data.bin"), Some(&content[..]));
    assert_eq!(task.progress().bytes_transferred, 300_000);
}

#[tokio::test]
async fn test_upload_resumes_at_offset() {
    let ctx = TestContext::new().await;
    let content = pattern(300_000);
    ctx.server.fs().add_file("data.bin", content[..100_000].to_vec());
    let tree = ctx.share().await;
    let local = ctx.local("data.bin");
    std::fs::write(&local, &content).unwrap();

    let task = TransferTask::new(
        tree.clone(),
        TransferRequest::Upload {
            local,
            remote: "data.bin".into(),
            offset: 100_000,
        },
    );
    task.start().unwrap();
    task.wait().await.unwrap();
    assert_eq!(ctx.server.fs().file("data.bin"), Some(&content[..]));
}

#[tokio::test]
async fn test_upload_rejects_directories_and_missing_files() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let task = tree.upload_task(ctx.local_dir.path(), "folder");
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap_err().code(), ErrorCode::DirectoryUploaded);
    assert!(!ctx.server.fs().exists("folder"));

    let task = tree.upload_task(ctx.local("absent.bin"), "absent.bin");
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap_err().code(), ErrorCode::FileNotFound);
}

#[tokio::test]
async fn test_upload_write_failure() {
    let ctx = TestContext::new().await;
    ctx.server
        .faults()
        .fail_next
        .push_back((Smb2Command::Write, NtStatus::AccessDenied));
    let tree = ctx.share().await;
    let local = ctx.local("data.bin");
    std::fs::write(&local, pattern(1000)).unwrap();

    let task = tree.upload_task(&local, "data.bin");
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap_err().code(), ErrorCode::FailToUpload);
}

#[tokio::test]
async fn test_create_directory_task() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let task = tree.create_directory_task("/projects/2024/q1");
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Completed { bytes: 1 });
    assert!(ctx.server.fs().get("projects/2024/q1").is_some());

    let task = tree.create_directory_task("/projects/2024/q1");
    task.start().unwrap();
    assert_eq!(
        task.wait().await.unwrap_err().code(),
        ErrorCode::UnableToCreateDirectory
    );
}

#[tokio::test]
async fn test_move_task() {
    let ctx = TestContext::new().await;
    ctx.server.fs().add_dir("archive");
    let tree = ctx.share().await;

    let task = tree.move_task("docs/report.pdf", "archive/report-2024.pdf");
    task.start().unwrap();
    task.wait().await.unwrap();
    assert!(!ctx.server.fs().exists("docs/report.pdf"));
    assert_eq!(
        ctx.server.fs().file("archive/report-2024.pdf").map(<[u8]>::len),
        Some(REPORT_SIZE)
    );

    let task = tree.move_task("docs/report.pdf", "archive/again.pdf");
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap_err().code(), ErrorCode::FileNotFound);
}

#[tokio::test]
async fn test_delete_task_is_recursive() {
    let ctx = TestContext::new().await;
    {
        let mut fs = ctx.server.fs();
        fs.add_file("docs/2024/q1.csv", b"a".to_vec());
        fs.add_file("docs/2024/q2.csv", b"b".to_vec());
        fs.add_dir("docs/empty");
    }
    let tree = ctx.share().await;

    let task = tree.delete_task("/docs");
    task.start().unwrap();
    // report.pdf, q1.csv, q2.csv, 2024, empty, docs
    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Completed { bytes: 6 });
    assert!(!ctx.server.fs().exists("docs"));
    assert!(!ctx.server.fs().exists("docs/2024/q1.csv"));

    let task = tree.delete_task("/docs");
    task.start().unwrap();
    assert_eq!(task.wait().await.unwrap_err().code(), ErrorCode::FileNotFound);
}

#[tokio::test]
async fn test_delete_failure_code() {
    let ctx = TestContext::new().await;
    ctx.server
        .faults()
        .fail_next
        .push_back((Smb2Command::SetInfo, NtStatus::AccessDenied));
    let tree = ctx.share().await;

    let task = tree.delete_task("docs/report.pdf");
    task.start().unwrap();
    assert_eq!(
        task.wait().await.unwrap_err().code(),
        ErrorCode::UnableToDeleteItem
    );
    assert!(ctx.server.fs().exists("docs/report.pdf"));
}

#[tokio::test]
async fn test_partial_upload_removed_on_cancel() {
    let ctx = TestContext::new().await;
    ctx.server.faults().write_delay = Duration::from_millis(30);
    let tree = ctx.share().await;
    let local = ctx.local("data.bin");
    std::fs::write(&local, pattern(600_000)).unwrap();

    let task = tree
        .upload_task(&local, "data.bin")
        .with_partial_policy(PartialPolicy::Delete);
    task.start().unwrap();
    wait_for_progress(&task, 1).await;
    task.cancel().unwrap();
    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Cancelled);
    assert!(!ctx.server.fs().exists("data.bin"));
    assert!(ctx.server.state().writes() < 10);
}

#[tokio::test]
async fn test_suspend_during_last_read_parks_before_completion() {
    let ctx = TestContext::new().await;
    ctx.server.fs().add_file("docs/small.txt", pattern(1000));
    ctx.server.faults().read_delay = Duration::from_millis(200);
    let tree = ctx.share().await;
    let local = ctx.local("small.txt");

    let task = tree
        .download_task("docs/small.txt", &local)
        .with_partial_policy(PartialPolicy::Delete);
    task.start().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    task.suspend().unwrap();

    // The only read lands after the suspension; the task must not settle
    tokio::time::sleep(Duration::from_millis(300)).await;
    assert_eq!(task.state(), TransferTaskState::Suspended);
    assert!(tokio::time::timeout(Duration::from_millis(50), task.wait())
        .await
        .is_err());
    assert_eq!(std::fs::read(&local).unwrap(), pattern(1000));

    task.resume().unwrap();
    assert_eq!(
        task.wait().await.unwrap(),
        TransferOutcome::Completed { bytes: 1000 }
    );
    assert_eq!(task.state(), TransferTaskState::Completed);
    assert_eq!(std::fs::read(&local).unwrap(), pattern(1000));
}

#[tokio::test]
async fn test_cancel_after_last_read_while_suspended() {
    let ctx = TestContext::new().await;
    ctx.server.fs().add_file("docs/small.txt", pattern(1000));
    ctx.server.faults().read_delay = Duration::from_millis(200);
    let tree = ctx.share().await;
    let local = ctx.local("small.txt");

    let task = tree.download_task("docs/small.txt", &local);
    task.start().unwrap();
    tokio::time::sleep(Duration::from_millis(80)).await;
    task.suspend().unwrap();
    tokio::time::sleep(Duration::from_millis(300)).await;

    task.cancel().unwrap();
    assert_eq!(task.wait().await.unwrap(), TransferOutcome::Cancelled);
    assert_eq!(task.state(), TransferTaskState::Cancelled);
    assert!(task.resume().is_err());
    assert_eq!(task.state(), TransferTaskState::Cancelled);
    assert!(local.exists());
}

#[tokio::test]
async fn test_upload_offset_beyond_remote_size_resumes_from_remote_end() {
    let ctx = TestContext::new().await;
    let content = pattern(300_000);
    ctx.server.fs().add_file("data.bin", content[..1000].to_vec());
    let tree = ctx.share().await;
    let local = ctx.local("data.bin");
    std::fs::write(&local, &content).unwrap();

    let task = TransferTask::new(
        tree.clone(),
        TransferRequest::Upload {
            local,
            remote: "data.bin".into(),
            offset: 100_000,
        },
    );
    task.start().unwrap();
    assert_eq!(
        task.wait().await.unwrap(),
        TransferOutcome::Completed { bytes: 300_000 }
    );
    assert_eq!(ctx.server.fs().file("data.bin"), Some(&content[..]));
    assert_eq!(task.progress().bytes_transferred, 300_000);
}

#[tokio::test]
async fn test_concurrent_tasks_share_one_session() {
    let ctx = TestContext::new().await;
    ctx.server.faults().read_delay = Duration::from_millis(10);
    let tree = ctx.share().await;
    let first_local = ctx.local("first.pdf");
    let second_local = ctx.local("second.pdf");

    let first = tree.download_task("docs/report.pdf", &first_local);
    let second = tree.download_task("docs/report.pdf", &second_local);
    first.start().unwrap();
    second.start().unwrap();
    wait_for_progress(&first, 1).await;
    wait_for_progress(&second, 1).await;
    assert_eq!(first.state(), TransferTaskState::Running);
    assert_eq!(second.state(), TransferTaskState::Running);

    first.cancel().unwrap();
    assert_eq!(first.wait().await.unwrap(), TransferOutcome::Cancelled);
    assert_eq!(
        second.wait().await.unwrap(),
        TransferOutcome::Completed {
            bytes: REPORT_SIZE as u64
        }
    );
    assert_eq!(std::fs::read(&second_local).unwrap(), pattern(REPORT_SIZE));
    assert!(std::fs::metadata(&first_local).unwrap().len() < REPORT_SIZE as u64);
    assert_eq!(tree.session().state(), SessionState::SessionOk);
    assert!(tree.is_connected().await);
}
