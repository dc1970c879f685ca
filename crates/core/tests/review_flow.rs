mod common;

use common::{test_config, two_page_pdf, FakeTransport, HALF_LETTER_PX};
use pdf_engine::read_page_overlays;
use redline_core::{
    DocumentId, DraftStore, ExportMode, InteractionState, LoadError, MemoryDraftStore,
    NotesRequired, OverlayPoint, ReviewAction, SubmissionPayload, SubmitError, Tool,
    TransportError, Viewer, ViewerState,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

struct Harness {
    viewer: Viewer,
    transport: Arc<FakeTransport>,
    drafts: Arc<MemoryDraftStore>,
}

fn harness(transport: FakeTransport) -> Harness {
    let transport = Arc::new(transport);
    let drafts = Arc::new(MemoryDraftStore::new());
    let viewer = Viewer::new(transport.clone(), drafts.clone(), test_config());
    Harness { viewer, transport, drafts }
}

fn doc() -> DocumentId {
    DocumentId::new("contract-42")
}

/// Open the document, render page 1 and draw one stroke
async fn open_and_mark(h: &mut Harness) {
    h.viewer.open(doc()).await.expect("open");
    let session = h.viewer.session_mut().expect("interactive");
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");
    let now = Instant::now();
    session.pointer_down(OverlayPoint::new(20.0, 20.0), now).expect("down");
    session.pointer_move(OverlayPoint::new(60.0, 30.0)).expect("move");
    session.pointer_up(OverlayPoint::new(100.0, 20.0), now).expect("up");
    session.flush_draft().expect("flush");
}

#[tokio::test(start_paused = true)]
async fn load_recovers_after_two_transient_failures() {
    let mut h = harness(FakeTransport::new(two_page_pdf()).failing_loads(2));

    h.viewer.open(doc()).await.expect("third attempt succeeds");

    assert_eq!(h.transport.source_calls(), 3);
    let session = h.viewer.session().expect("interactive");
    assert_eq!(session.page_count(), 2);
}

#[tokio::test(start_paused = true)]
async fn exhausted_load_waits_for_manual_retry() {
    let mut h = harness(FakeTransport::new(two_page_pdf()).failing_loads(3));

    let error = h.viewer.open(doc()).await.expect_err("budget exhausted");
    assert!(matches!(error, LoadError::Unavailable { attempts: 3, .. }));
    assert!(matches!(h.viewer.state(), ViewerState::Failed { .. }));

    h.viewer.retry().await.expect("retry succeeds");
    assert!(h.viewer.session().is_some());
    assert_eq!(h.transport.source_calls(), 4);
}

#[tokio::test]
async fn corrupt_document_fails_without_retry() {
    let mut h = harness(FakeTransport::new(b"not a pdf".to_vec()));

    let error = h.viewer.open(doc()).await.expect_err("decode fails");
    assert!(matches!(error, LoadError::Session(_)));
    assert_eq!(h.transport.source_calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn close_during_load_drops_the_result() {
    let mut h = harness(FakeTransport::new(two_page_pdf()).failing_loads(1));
    let handle = h.viewer.close_handle();

    let (result, _) = tokio::join!(h.viewer.open(doc()), async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        handle.close()
    });

    assert!(matches!(result, Err(LoadError::Cancelled)));
    assert!(matches!(h.viewer.state(), ViewerState::Closed));
}

#[tokio::test]
async fn notes_are_required_before_any_network_call() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    open_and_mark(&mut h).await;

    let result = h.viewer.submit(ReviewAction::ReturnForCorrection, Some("   ".into())).await;

    assert!(matches!(
        result,
        Err(SubmitError::NotesRequired(NotesRequired(ReviewAction::ReturnForCorrection)))
    ));
    assert!(h.transport.submissions().is_empty());
    assert_eq!(h.viewer.session().expect("interactive").store().len(), 1);
}

#[tokio::test]
async fn failed_submission_keeps_draft_byte_identical() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    open_and_mark(&mut h).await;
    let before = h.drafts.raw(&doc()).expect("draft written");

    h.transport.fail_submissions(TransportError::Server { status: 502, message: "bad gateway".into() });
    let result = h.viewer.submit(ReviewAction::Reject, Some("wrong revision".into())).await;

    assert!(matches!(result, Err(SubmitError::Transport(TransportError::Server { status: 502, .. }))));
    assert_eq!(h.drafts.raw(&doc()), Some(before));
    assert_eq!(h.viewer.session().expect("interactive").store().len(), 1);
    assert!(!h.viewer.is_busy());
}

#[tokio::test]
async fn acknowledged_submission_clears_marks_and_draft() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    open_and_mark(&mut h).await;

    let ack = h
        .viewer
        .submit(ReviewAction::ApproveWithNotes, Some("minor nits".into()))
        .await
        .expect("ack");

    assert_eq!(ack.message.as_deref(), Some("received"));
    let sent = h.transport.submissions();
    assert_eq!(sent.len(), 1);
    assert_eq!(sent[0].notes(), Some("minor nits"));
    assert!(matches!(sent[0].payload(), Some(SubmissionPayload::Annotations(list)) if list.len() == 1));

    assert!(h.drafts.load(&doc()).expect("load").is_none());
    let session = h.viewer.session().expect("still interactive");
    assert!(session.store().is_empty());
    assert!(!session.surface(1).expect("surface").has_ink());
}

#[tokio::test]
async fn revision_submits_a_baked_file() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    open_and_mark(&mut h).await;

    h.viewer.submit(ReviewAction::SubmitRevision, None).await.expect("ack");

    let sent = h.transport.submissions();
    let Some(SubmissionPayload::BakedFile(bytes)) = sent[0].payload() else {
        panic!("expected baked file, got {:?}", sent[0].payload());
    };
    let overlays = read_page_overlays(bytes).expect("overlays");
    assert_eq!(overlays.iter().map(|o| o.page_number).collect::<Vec<_>>(), vec![1]);
}

#[tokio::test]
async fn approval_without_marks_has_no_payload() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    h.viewer.open(doc()).await.expect("open");

    h.viewer
        .submit_with(ReviewAction::Approve, None, ExportMode::BakedPdf)
        .await
        .expect("ack");

    assert_eq!(h.transport.submissions()[0].payload(), None);
}

#[tokio::test]
async fn remote_draft_carries_the_annotation_list() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    open_and_mark(&mut h).await;

    h.viewer.save_draft_remote().await.expect("saved");

    let drafts = h.transport.remote_drafts();
    assert_eq!(drafts.len(), 1);
    assert_eq!(drafts[0].len(), 1);
}

#[tokio::test]
async fn teardown_mid_drag_commits_nothing() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    h.viewer.open(doc()).await.expect("open");
    let session = h.viewer.session_mut().expect("interactive");
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");
    session.set_tool(Tool::Text).expect("tool");
    let now = Instant::now();
    session.pointer_down(OverlayPoint::new(50.0, 50.0), now).expect("down");
    session.confirm_text("Initial here", now).expect("confirm");
    let placed = session.store().all()[0].position();
    session.set_tool(Tool::Pencil).expect("tool");

    session.pointer_down(OverlayPoint::new(55.0, 58.0), now).expect("grab");
    session.pointer_move(OverlayPoint::new(200.0, 300.0)).expect("drag");
    assert!(matches!(session.interaction_state(), InteractionState::Dragging(_)));

    h.viewer.close().expect("close");
    h.viewer.open(doc()).await.expect("reopen");

    let session = h.viewer.session().expect("interactive");
    assert_eq!(session.store().len(), 1);
    assert_eq!(session.store().all()[0].position(), placed);
}

#[tokio::test]
async fn opening_another_document_flushes_the_previous_draft() {
    let mut h = harness(FakeTransport::new(two_page_pdf()));
    h.viewer.open(doc()).await.expect("open");
    let session = h.viewer.session_mut().expect("interactive");
    session.on_page_rendered(1, HALF_LETTER_PX).expect("render");
    let now = Instant::now();
    session.pointer_down(OverlayPoint::new(10.0, 10.0), now).expect("down");
    session.pointer_up(OverlayPoint::new(40.0, 40.0), now).expect("up");
    assert!(session.has_unsaved_draft());

    h.viewer.open(DocumentId::new("other")).await.expect("open other");

    let draft = h.drafts.load(&doc()).expect("load").expect("flushed on close");
    assert_eq!(draft.annotations.len(), 1);
    assert!(h.viewer.session().expect("interactive").store().is_empty());
}
