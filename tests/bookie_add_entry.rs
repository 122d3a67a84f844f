mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bookie::bookie::{
    Bookie, BookieError, BookieId, RejectReason, StatusCode, WriteCallback, WriteContext,
};
use bookie::config::ByteSize;
use bookie::entry::{CodecError, Entry, INVALID_ENTRY_ID, master_key_entry};
use bytes::Bytes;
use common::*;
use tempfile::TempDir;
use tokio::time::timeout;

#[tokio::test]
async fn test_ack_before_sync_entry_is_readable() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 2)).await;
    let (callback, mut rx) = recording_callback();

    let entry = Entry::new(1, 1, "This is a test entry").encode();
    bookie
        .add_entry(&entry, true, callback, ctx("string"), b"")
        .unwrap();

    let recorded = expect_completion(&mut rx).await;
    assert_eq!(
        recorded,
        Recorded {
            status: StatusCode::Ok,
            ledger_id: 1,
            entry_id: 1,
            bookie: "bookie-test:3181".to_string(),
            ctx: Some("string".to_string()),
        }
    );

    assert_eq!(bookie.read_last_add_confirmed(1).unwrap(), 1);
    let read = bookie.read_entry(1, 1).unwrap();
    assert_eq!(read.payload, Bytes::from("This is a test entry"));
    // the caller's buffer is untouched
    assert_eq!(entry.len(), 16 + "This is a test entry".len());

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_synced_adds_complete_in_order() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;
    let (callback, mut rx) = recording_callback();

    for entry_id in 0..10 {
        let entry = Entry::new(7, entry_id, format!("payload-{entry_id}")).encode();
        bookie
            .add_entry(&entry, false, callback.clone(), ctx("sync"), b"key")
            .unwrap();
    }

    for entry_id in 0..10 {
        let recorded = expect_completion(&mut rx).await;
        assert_eq!(recorded.status, StatusCode::Ok);
        assert_eq!(recorded.entry_id, entry_id);
    }
    assert_eq!(bookie.read_last_add_confirmed(7).unwrap(), 9);
    assert_eq!(bookie.metrics().snapshot().entries_added, 10);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fenced_ledger_rejects_ordinary_adds_but_not_recovery() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 2)).await;
    let (callback, mut rx) = recording_callback();
    let key = b"ledger-3-key";

    let handle = bookie.fence_ledger(3, key).unwrap();
    assert!(timeout(CALLBACK_TIMEOUT, handle.wait()).await.unwrap());

    let metadata = master_key_entry(3, key);
    let err = bookie
        .add_entry(&metadata, true, callback.clone(), ctx("fenced"), key)
        .unwrap_err();
    assert!(matches!(err, BookieError::LedgerFenced(3)));
    assert_eq!(err.status_code(), StatusCode::LedgerFenced);

    let data = Entry::new(3, 0, "late write").encode();
    assert!(matches!(
        bookie.add_entry(&data, false, callback.clone(), ctx("fenced"), key),
        Err(BookieError::LedgerFenced(3))
    ));
    expect_no_completion(&mut rx).await;

    bookie
        .recovery_add_entry(&metadata, callback.clone(), ctx("recovery"), key)
        .unwrap();
    let recorded = expect_completion(&mut rx).await;
    assert_eq!(recorded.status, StatusCode::Ok);
    assert_eq!(recorded.ctx.as_deref(), Some("recovery"));

    bookie
        .recovery_add_entry(&data, callback.clone(), ctx("recovery"), key)
        .unwrap();
    assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);
    assert_eq!(bookie.read_last_add_confirmed(3).unwrap(), 0);

    // recovery leaves the fence in place
    assert!(bookie.is_fenced(3).unwrap());
    assert!(matches!(
        bookie.recovery_add_entry(&data, callback, ctx("recovery"), b"wrong"),
        Err(BookieError::UnauthorizedKey(3))
    ));

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fence_waits_for_earlier_adds() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;
    let (callback, mut rx) = recording_callback();

    for entry_id in 0..5 {
        let entry = Entry::new(11, entry_id, "before fence").encode();
        bookie
            .add_entry(&entry, false, callback.clone(), ctx("pre"), b"")
            .unwrap();
    }
    let handle = bookie.fence_ledger(11, b"").unwrap();
    assert!(timeout(CALLBACK_TIMEOUT, handle.wait()).await.unwrap());

    // every earlier add has already completed by the time the fence resolves
    for _ in 0..5 {
        let recorded = rx.try_recv().expect("add completed after the fence");
        assert_eq!(recorded.status, StatusCode::Ok);
    }
    assert_eq!(bookie.read_last_add_confirmed(11).unwrap(), 4);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_fence_with_wrong_key() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;
    let (callback, mut rx) = recording_callback();

    bookie
        .add_entry(&Entry::new(12, 0, "x").encode(), true, callback, ctx(""), b"owner")
        .unwrap();
    expect_completion(&mut rx).await;

    assert!(matches!(
        bookie.fence_ledger(12, b"intruder"),
        Err(BookieError::UnauthorizedKey(12))
    ));
    assert!(!bookie.is_fenced(12).unwrap());

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_master_key_enforcement() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;
    let (callback, mut rx) = recording_callback();

    bookie
        .add_entry(&Entry::new(4, 0, "a").encode(), true, callback.clone(), ctx(""), b"")
        .unwrap();
    expect_completion(&mut rx).await;
    let err = bookie
        .add_entry(&Entry::new(4, 1, "b").encode(), true, callback.clone(), ctx(""), b"secret")
        .unwrap_err();
    assert!(matches!(err, BookieError::UnauthorizedKey(4)));
    assert!(!err.is_rejection());

    for entry_id in 0..2 {
        bookie
            .add_entry(
                &Entry::new(5, entry_id, "c").encode(),
                true,
                callback.clone(),
                ctx(""),
                b"secret",
            )
            .unwrap();
        assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);
    }

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_all_writers_key() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp, 1);
    config.all_writers_key = Some("root".to_string());
    let bookie = start_bookie(&config).await;
    let (callback, mut rx) = recording_callback();

    bookie
        .add_entry(&Entry::new(6, 0, "a").encode(), true, callback.clone(), ctx(""), b"owner")
        .unwrap();
    bookie
        .add_entry(&Entry::new(6, 1, "b").encode(), true, callback, ctx(""), b"root")
        .unwrap();
    assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);
    assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_malformed_entries_fail_synchronously() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;
    let (callback, mut rx) = recording_callback();

    let cases = [
        (Bytes::new(), CodecError::TooShort { len: 0 }),
        (Bytes::from_static(&[0u8; 15]), CodecError::TooShort { len: 15 }),
        (Entry::new(-1, 0, "x").encode(), CodecError::NegativeLedgerId(-1)),
        (Entry::new(1, -2, "x").encode(), CodecError::NegativeEntryId(-2)),
    ];
    for (buf, expected) in cases {
        match bookie.add_entry(&buf, true, callback.clone(), ctx(""), b"") {
            Err(BookieError::MalformedEntry(e)) => assert_eq!(e, expected),
            other => panic!("expected malformed entry, got {other:?}"),
        }
    }
    expect_no_completion(&mut rx).await;
    assert_eq!(bookie.metrics().snapshot().add_failures, 4);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_no_writable_dir_rejects_without_creating_ledger() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 2)).await;
    let (callback, mut rx) = recording_callback();

    for dir in 0..bookie.ledger_dirs().len() {
        bookie.ledger_dirs().mark_unwritable(dir);
    }

    let err = bookie
        .add_entry(&Entry::new(7, 0, "x").encode(), true, callback, ctx(""), b"a")
        .unwrap_err();
    assert!(err.is_rejection());
    assert!(matches!(
        err,
        BookieError::Rejected(RejectReason::NoWritableLedgerDir)
    ));
    expect_no_completion(&mut rx).await;
    assert_eq!(bookie.metrics().snapshot().adds_rejected, 1);

    // the refused write left no ledger behind, and no claim on its key
    assert!(matches!(
        bookie.read_entry(7, 0),
        Err(BookieError::NoLedger(7))
    ));
    assert!(matches!(
        bookie.read_last_add_confirmed(7),
        Err(BookieError::NoLedger(7))
    ));
    assert_eq!(bookie.stats().ledgers, 0);

    bookie.ledger_dirs().mark_writable(1);
    let (callback, mut rx) = recording_callback();
    bookie
        .add_entry(&Entry::new(7, 0, "x").encode(), true, callback, ctx(""), b"b")
        .unwrap();
    assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);
    assert_eq!(bookie.read_last_add_confirmed(7).unwrap(), 0);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_free_space_threshold_rejects() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp, 2);
    config.min_free_space = ByteSize(u64::MAX);
    let bookie = start_bookie(&config).await;
    let (callback, mut rx) = recording_callback();

    assert!(matches!(
        bookie.add_entry(&Entry::new(1, 0, "x").encode(), true, callback, ctx(""), b""),
        Err(BookieError::Rejected(RejectReason::NoWritableLedgerDir))
    ));
    expect_no_completion(&mut rx).await;
    // below-threshold directories are skipped, not marked
    assert_eq!(bookie.ledger_dirs().writable_dirs().len(), 2);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_full_queue_rejects() {
    let temp = TempDir::new().unwrap();
    let mut config = test_config(&temp, 1);
    config.journal_queue_size = 1;
    let bookie = start_bookie(&config).await;
    let (callback, mut rx) = recording_callback();

    // nothing yields between the two submissions, so the pipeline cannot drain
    bookie
        .add_entry(&Entry::new(1, 0, "a").encode(), true, callback.clone(), ctx("first"), b"")
        .unwrap();
    let err = bookie
        .add_entry(&Entry::new(1, 1, "b").encode(), true, callback.clone(), ctx("second"), b"")
        .unwrap_err();
    assert!(matches!(err, BookieError::Rejected(RejectReason::QueueFull)));
    let err = bookie
        .add_entry(&Entry::new(30, 0, "c").encode(), true, callback, ctx("third"), b"k")
        .unwrap_err();
    assert!(matches!(err, BookieError::Rejected(RejectReason::QueueFull)));

    let recorded = expect_completion(&mut rx).await;
    assert_eq!(recorded.ctx.as_deref(), Some("first"));
    expect_no_completion(&mut rx).await;
    assert!(matches!(
        bookie.read_last_add_confirmed(30),
        Err(BookieError::NoLedger(30))
    ));

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_panicking_callback_does_not_undo_the_write() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;

    let (done_tx, done_rx) = tokio::sync::oneshot::channel();
    let done_tx = std::sync::Mutex::new(Some(done_tx));
    let callback: Arc<dyn WriteCallback> = Arc::new(
        move |status: StatusCode, _: i64, _: i64, _: &BookieId, _: WriteContext| {
            if let Some(tx) = done_tx.lock().unwrap().take() {
                let _ = tx.send(status);
            }
            panic!("Invalid callback");
        },
    );

    bookie
        .add_entry(&Entry::new(8, 0, "survives").encode(), false, callback, ctx(""), b"")
        .unwrap();
    let status = timeout(CALLBACK_TIMEOUT, done_rx).await.unwrap().unwrap();
    assert_eq!(status, StatusCode::Ok);

    // the pipeline keeps going after the panic
    let (callback, mut rx) = recording_callback();
    bookie
        .add_entry(&Entry::new(8, 1, "next").encode(), false, callback, ctx(""), b"")
        .unwrap();
    assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);

    assert_eq!(bookie.read_last_add_confirmed(8).unwrap(), 1);
    assert_eq!(bookie.read_entry(8, 0).unwrap().payload, Bytes::from("survives"));
    assert_eq!(bookie.metrics().snapshot().callback_panics, 1);

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_slow_callback_does_not_stall_other_ledgers() {
    let temp = TempDir::new().unwrap();
    let bookie = start_bookie(&test_config(&temp, 1)).await;

    let (release_tx, release_rx) = std::sync::mpsc::channel::<()>();
    let release_rx = std::sync::Mutex::new(release_rx);
    let (entered_tx, entered_rx) = tokio::sync::oneshot::channel();
    let entered_tx = std::sync::Mutex::new(Some(entered_tx));
    let blocking: Arc<dyn WriteCallback> = Arc::new(
        move |_: StatusCode, _: i64, _: i64, _: &BookieId, _: WriteContext| {
            if let Some(tx) = entered_tx.lock().unwrap().take() {
                let _ = tx.send(());
            }
            let _ = release_rx.lock().unwrap().recv_timeout(CALLBACK_TIMEOUT);
        },
    );

    bookie
        .add_entry(&Entry::new(20, 0, "slow").encode(), false, blocking, ctx(""), b"")
        .unwrap();
    timeout(CALLBACK_TIMEOUT, entered_rx).await.unwrap().unwrap();

    // ledger 20's callback is still running; ledger 21 keeps moving
    let (callback, mut rx) = recording_callback();
    bookie
        .add_entry(&Entry::new(21, 0, "fast").encode(), false, callback, ctx(""), b"")
        .unwrap();
    timeout(CALLBACK_TIMEOUT, async {
        while bookie.read_last_add_confirmed(21).ok() != Some(0) {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("journal pipeline stalled behind a slow callback");
    assert_eq!(bookie.read_entry(21, 0).unwrap().payload, Bytes::from("fast"));
    assert!(rx.try_recv().is_err());

    release_tx.send(()).unwrap();
    assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);

    bookie.shutdown().await.unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_writers_keep_lac_monotonic() {
    const WRITERS: i64 = 4;
    const PER_WRITER: i64 = 50;

    let temp = TempDir::new().unwrap();
    let bookie = Arc::new(start_bookie(&test_config(&temp, 2)).await);
    let (callback, mut rx) = recording_callback();
    let stop = Arc::new(AtomicBool::new(false));

    let observer = {
        let bookie = bookie.clone();
        let stop = stop.clone();
        std::thread::spawn(move || {
            let mut last = INVALID_ENTRY_ID;
            while !stop.load(Ordering::Relaxed) {
                if let Ok(lac) = bookie.read_last_add_confirmed(9) {
                    assert!(lac >= last, "last-add-confirmed went from {last} to {lac}");
                    last = lac;
                }
            }
        })
    };

    let writers: Vec<_> = (0..WRITERS)
        .map(|writer| {
            let bookie = bookie.clone();
            let callback = callback.clone();
            std::thread::spawn(move || {
                for i in 0..PER_WRITER {
                    let entry_id = i * WRITERS + writer;
                    let entry = Entry::new(9, entry_id, format!("entry-{entry_id}")).encode();
                    bookie
                        .add_entry(&entry, writer % 2 == 0, callback.clone(), ctx(""), b"")
                        .unwrap();
                }
            })
        })
        .collect();
    for writer in writers {
        writer.join().unwrap();
    }

    for _ in 0..WRITERS * PER_WRITER {
        assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);
    }
    stop.store(true, Ordering::Relaxed);
    observer.join().unwrap();

    assert_eq!(
        bookie.read_last_add_confirmed(9).unwrap(),
        WRITERS * PER_WRITER - 1
    );
    for entry_id in 0..WRITERS * PER_WRITER {
        let entry = bookie.read_entry(9, entry_id).unwrap();
        assert_eq!(entry.payload, Bytes::from(format!("entry-{entry_id}")));
    }

    bookie.shutdown().await.unwrap();
}

#[tokio::test]
async fn test_shutdown_completes_accepted_writes() {
    let temp = TempDir::new().unwrap();
    let bookie: Bookie = start_bookie(&test_config(&temp, 1)).await;
    let (callback, mut rx) = recording_callback();

    for entry_id in 0..20 {
        bookie
            .add_entry(&Entry::new(2, entry_id, "x").encode(), false, callback.clone(), ctx(""), b"")
            .unwrap();
    }
    bookie.shutdown().await.unwrap();

    for _ in 0..20 {
        assert_eq!(expect_completion(&mut rx).await.status, StatusCode::Ok);
    }
    assert!(matches!(
        bookie.add_entry(&Entry::new(2, 20, "x").encode(), false, callback, ctx(""), b""),
        Err(BookieError::Rejected(RejectReason::ShuttingDown))
    ));
}
