use super::*;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::pipeline::channel::transfer_channel;
use crate::pipeline::worker::{
    Collaborators, WorkerContext, WorkerMessage, process_descriptor, run_worker,
};
use crate::store::FsStore;
use crate::types::Event;

struct Harness {
    ctx: WorkerContext,
    remote: Arc<MockRemote>,
    dir: TempDir,
}

fn harness(delete_after_transfer: bool, remote: MockRemote) -> Harness {
    let dir = TempDir::new().unwrap();
    let controller = controller_in(&dir, |c| c.delete_after_transfer = delete_after_transfer);
    let remote = Arc::new(remote);
    let (_writer, reader) = transfer_channel(4);
    let (outcome_tx, _messages) = mpsc::unbounded_channel();
    let ctx = WorkerContext {
        index: 0,
        cancel: controller.cancel_token.clone(),
        reader,
        collaborators: Collaborators {
            fetcher: remote.clone(),
            deleter: remote.clone(),
            store: Arc::new(FsStore::new(dir.path())),
        },
        controller,
        outcome_tx,
    };
    Harness {
        ctx,
        remote,
        dir,
    }
}

#[tokio::test]
async fn downloads_to_final_name() {
    let h = harness(false, MockRemote::new());

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(fault.is_none());
    assert_eq!(report.outcomes, vec![TransferOutcome::Downloaded]);
    let path = report.local_path.unwrap();
    assert_eq!(path.file_name().unwrap(), "a.zip");
    assert_eq!(std::fs::read_to_string(path).unwrap(), content_of("octo/a"));
    assert!(h.remote.deletes().is_empty(), "delete policy is off");
}

#[tokio::test]
async fn deletes_only_after_download() {
    let h = harness(true, MockRemote::new());

    let (report, _) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert_eq!(
        report.outcomes,
        vec![TransferOutcome::Downloaded, TransferOutcome::Deleted]
    );
    assert_eq!(
        h.remote.calls(),
        vec![Call::Fetch("octo/a".into()), Call::Delete("octo/a".into())]
    );
}

#[tokio::test]
async fn failed_download_is_never_deleted() {
    let remote = MockRemote::new().fail_fetch("a", || TransferError::NotFound("gone".into()));
    let h = harness(true, remote);

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(fault.is_none());
    assert!(matches!(
        report.outcomes.as_slice(),
        [TransferOutcome::DownloadFailed(cause)] if cause.kind == FailureKind::NotFound
    ));
    assert!(h.remote.deletes().is_empty());
}

#[tokio::test]
async fn broken_stream_leaves_no_file_and_no_delete() {
    let h = harness(true, MockRemote::new().break_stream("a"));

    let (report, _) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(matches!(
        report.outcomes.as_slice(),
        [TransferOutcome::DownloadFailed(cause)] if cause.kind == FailureKind::Transport
    ));
    assert!(h.remote.deletes().is_empty());
    let leftovers: Vec<_> = std::fs::read_dir(h.dir.path())
        .map(|entries| entries.flatten().collect())
        .unwrap_or_default();
    assert!(leftovers.is_empty(), "found {leftovers:?}");
}

#[tokio::test]
async fn delete_failure_keeps_local_copy() {
    let remote =
        MockRemote::new().fail_delete("a", || TransferError::Forbidden("must be admin".into()));
    let h = harness(true, remote);

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(fault.is_none());
    assert!(matches!(
        report.outcomes.as_slice(),
        [TransferOutcome::Downloaded, TransferOutcome::DeleteFailed(cause)]
            if cause.kind == FailureKind::Forbidden
    ));
    assert!(report.local_path.unwrap().exists());
}

#[tokio::test]
async fn auth_failure_is_reported_as_fault() {
    let remote = MockRemote::new().fail_fetch("a", || TransferError::Auth("bad credentials".into()));
    let h = harness(false, remote);

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(matches!(fault, Some(PipelineError::Auth(_))));
    assert!(matches!(
        report.outcomes.as_slice(),
        [TransferOutcome::DownloadFailed(cause)] if cause.kind == FailureKind::Auth
    ));
}

#[tokio::test]
async fn cancelled_worker_skips_without_calls() {
    let h = harness(true, MockRemote::new());
    h.ctx.controller.cancel();

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(fault.is_none());
    assert_eq!(
        report.outcomes,
        vec![TransferOutcome::Skipped(SkipReason::Cancelled)]
    );
    assert!(h.remote.calls().is_empty());
}

#[tokio::test]
async fn cancel_during_download_skips_delete() {
    let dir = TempDir::new().unwrap();
    let controller = controller_in(&dir, |c| c.delete_after_transfer = true);
    let remote = Arc::new(MockRemote::new().cancel_on_fetch("a", &controller));
    let (_writer, reader) = transfer_channel(4);
    let (outcome_tx, _messages) = mpsc::unbounded_channel();
    let ctx = WorkerContext {
        index: 0,
        cancel: controller.cancel_token.clone(),
        reader,
        collaborators: Collaborators {
            fetcher: remote.clone(),
            deleter: remote.clone(),
            store: Arc::new(FsStore::new(dir.path())),
        },
        controller,
        outcome_tx,
    };

    let (report, _) = process_descriptor(&ctx, descriptor("a")).await;

    assert_eq!(
        report.outcomes,
        vec![
            TransferOutcome::Downloaded,
            TransferOutcome::Skipped(SkipReason::Cancelled)
        ]
    );
    assert!(remote.deletes().is_empty());
}

#[tokio::test]
async fn hung_download_is_abandoned_after_grace() {
    let h = harness(false, MockRemote::new().hang_fetch("a"));
    let controller = h.ctx.controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.cancel();
    });

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(fault.is_none());
    assert!(matches!(
        report.outcomes.as_slice(),
        [TransferOutcome::DownloadFailed(cause)] if cause.kind == FailureKind::Cancelled
    ));
}

#[tokio::test]
async fn hung_delete_is_abandoned_after_grace() {
    let h = harness(true, MockRemote::new().hang_delete("a"));
    let controller = h.ctx.controller.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        controller.cancel();
    });

    let (report, fault) = process_descriptor(&h.ctx, descriptor("a")).await;

    assert!(fault.is_none());
    assert!(matches!(
        report.outcomes.as_slice(),
        [TransferOutcome::Downloaded, TransferOutcome::DeleteFailed(cause)]
            if cause.kind == FailureKind::Cancelled
    ));
    assert!(report.local_path.unwrap().exists(), "local copy is kept");
    assert_eq!(h.remote.deletes(), vec!["octo/a"]);
}

#[tokio::test]
async fn skips_are_announced() {
    let h = harness(true, MockRemote::new());
    let mut events = h.ctx.controller.subscribe();
    h.ctx.controller.cancel();

    process_descriptor(&h.ctx, descriptor("a")).await;

    let mut skipped = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let Event::Skipped { id, reason } = event {
            skipped.push((id.as_str().to_string(), reason));
        }
    }
    assert_eq!(skipped, vec![("octo/a".to_string(), SkipReason::Cancelled)]);
}

#[tokio::test]
async fn skipped_delete_is_announced() {
    let dir = TempDir::new().unwrap();
    let controller = controller_in(&dir, |c| c.delete_after_transfer = true);
    let mut events = controller.subscribe();
    let remote = Arc::new(MockRemote::new().cancel_on_fetch("a", &controller));
    let (_writer, reader) = transfer_channel(4);
    let (outcome_tx, _messages) = mpsc::unbounded_channel();
    let ctx = WorkerContext {
        index: 0,
        cancel: controller.cancel_token.clone(),
        reader,
        collaborators: Collaborators {
            fetcher: remote.clone(),
            deleter: remote.clone(),
            store: Arc::new(FsStore::new(dir.path())),
        },
        controller,
        outcome_tx,
    };

    process_descriptor(&ctx, descriptor("a")).await;

    let mut sequence = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            Event::DownloadFinished { .. } => sequence.push("download_finished"),
            Event::Skipped { .. } => sequence.push("skipped"),
            Event::DeleteStarted { .. } => sequence.push("delete_started"),
            _ => {}
        }
    }
    assert_eq!(sequence, vec!["download_finished", "skipped"]);
}

#[tokio::test]
async fn worker_loop_reports_each_item_then_exits() {
    let dir = TempDir::new().unwrap();
    let controller = controller_in(&dir, |_| {});
    let remote = Arc::new(MockRemote::new());
    let (writer, reader) = transfer_channel(4);
    let (outcome_tx, mut messages) = mpsc::unbounded_channel();
    let cancel = controller.cancel_token.clone();
    for d in descriptors(3) {
        writer.send(d, &cancel).await.unwrap();
    }
    writer.close();

    run_worker(WorkerContext {
        index: 7,
        cancel,
        reader,
        collaborators: Collaborators {
            fetcher: remote.clone(),
            deleter: remote.clone(),
            store: Arc::new(FsStore::new(dir.path())),
        },
        controller,
        outcome_tx,
    })
    .await;

    let mut started = 0;
    let mut finished = 0;
    let mut exited = false;
    while let Ok(message) = messages.try_recv() {
        match message {
            WorkerMessage::Started { worker, .. } => {
                assert_eq!(worker, 7);
                started += 1;
            }
            WorkerMessage::Finished { report, fault, .. } => {
                assert!(fault.is_none());
                assert!(report.downloaded());
                finished += 1;
            }
            WorkerMessage::Exited { worker } => {
                assert_eq!(worker, 7);
                exited = true;
            }
        }
    }
    assert_eq!((started, finished), (3, 3));
    assert!(exited);
    assert_eq!(remote.fetches().len(), 3);
}
