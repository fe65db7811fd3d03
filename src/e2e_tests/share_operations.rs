//! Share level primitives: listings, metadata and remote file handles

use super::test_context::{pattern, TestContext, REPORT_SIZE};
use crate::error::ErrorCode;

#[tokio::test]
async fn test_list_directory() {
    let ctx = TestContext::new().await;
    {
        let mut fs = ctx.server.fs();
        fs.add_file("docs/notes.txt", b"hello".to_vec());
        fs.add_dir("docs/archive");
    }
    let tree = ctx.share().await;

    let mut entries = tree.list_directory("/docs").await.unwrap().collect().await.unwrap();
    entries.sort_by(|a, b| a.name.cmp(&b.name));
    let names: Vec<_> = entries.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, ["archive", "notes.txt", "report.pdf"]);
    assert!(entries[0].is_directory);
    assert_eq!(entries[1].size, 5);
    assert_eq!(entries[2].size, REPORT_SIZE as u64);
}

#[tokio::test]
async fn test_listing_is_lazy_and_closes_its_handle() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let mut listing = tree.list_directory("\\").await.unwrap();
    assert_eq!(listing.path(), "");
    let first = listing.next_entry().await.unwrap().unwrap();
    assert_eq!(first.name, "docs");
    assert!(listing.next_entry().await.unwrap().is_none());
    // Exhausted listings stay exhausted without further requests
    let requests = ctx.server.state().requests();
    assert!(listing.next_entry().await.unwrap().is_none());
    assert_eq!(ctx.server.state().requests(), requests);
}

#[tokio::test]
async fn test_list_missing_directory() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let err = tree.list_directory("/nowhere").await.err().unwrap();
    assert_eq!(err.code(), ErrorCode::FileNotFound);
}

#[tokio::test]
async fn test_stat_and_read_at() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let entry = tree.stat("docs/report.pdf").await.unwrap();
    assert_eq!(entry.name, "report.pdf");
    assert!(!entry.is_directory);
    assert_eq!(entry.size, REPORT_SIZE as u64);
    assert!(tree.stat("docs").await.unwrap().is_directory);

    let file = tree.open_read("docs/report.pdf").await.unwrap();
    assert_eq!(file.size(), REPORT_SIZE as u64);
    let data = file.read_at(1000, 16).await.unwrap();
    assert_eq!(data, pattern(REPORT_SIZE)[1000..1016]);
    assert!(file.read_at(REPORT_SIZE as u64, 16).await.unwrap().is_empty());
    file.close().await.unwrap();
}

#[tokio::test]
async fn test_write_at_and_rename() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let file = tree.open_write("draft.txt", true).await.unwrap();
    assert_eq!(file.write_at(0, b"first draft".to_vec()).await.unwrap(), 11);
    file.close().await.unwrap();

    tree.rename("draft.txt", "docs/final.txt", false).await.unwrap();
    assert_eq!(ctx.server.fs().file("docs/final.txt"), Some(&b"first draft"[..]));
    assert!(!ctx.server.fs().exists("draft.txt"));

    let err = tree.rename("draft.txt", "x.txt", false).await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::FileNotFound);
    let err = tree
        .rename("docs/final.txt", "docs/report.pdf", false)
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToMoveFile);
}

#[tokio::test]
async fn test_delete_refuses_non_empty_directory() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let err = tree.delete("docs").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::UnableToDeleteItem);
    assert!(ctx.server.fs().exists("docs/report.pdf"));
}

#[tokio::test]
async fn test_parent_references_rejected() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    let requests = ctx.server.state().requests();
    assert!(tree.stat("docs/../../etc").await.is_err());
    assert_eq!(ctx.server.state().requests(), requests);
}

#[tokio::test]
async fn test_share_disconnect_is_idempotent() {
    let ctx = TestContext::new().await;
    let tree = ctx.share().await;

    tree.disconnect().await.unwrap();
    tree.disconnect().await.unwrap();
    assert!(!tree.is_connected().await);
    let err = tree.stat("docs").await.unwrap_err();
    assert_eq!(err.code(), ErrorCode::ShareConnectionFailed);
}
