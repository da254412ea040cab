//! Session controller: activation, gating, uploads and restore.

mod common;

use std::time::Duration;

use common::{
    completed_status, hardware_response, multi_part_upload, single_file_upload, status,
    CallCounts, FixedFingerprint, TestHarness,
};
use pconvert::storage::{
    KEY_API_KEY, KEY_LAST_IMAGE_COUNT, KEY_LAST_RESULT_ID, KEY_LAST_RESULT_TEXT,
};
use pconvert::{
    ApiError, HardwareInfo, JobStatus, KeyValueStore, MemoryStore, PconvertError, PollError,
    ResultRecord, SessionControls, UploadOutcome, ValidationError,
};

#[tokio::test]
async fn test_initialize_activates_with_derived_triple() {
    let mut harness = TestHarness::new();
    harness
        .session
        .initialize(&FixedFingerprint)
        .await
        .unwrap();

    let activation = &harness.session.state().activation;
    assert!(activation.activated);
    assert_eq!(activation.hardware_id(), Some("HW-TEST-Premium"));

    let registered = harness.backend.registered();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].cpu_id, "0123456789abcdef0123456789abcdef8");
    assert_eq!(registered[0].bios_serial, "linux/x86_6401234567");
    assert_eq!(
        registered[0].motherboard_serial,
        "pconvert/0.1.0 (linu89abcdef"
    );
}

#[tokio::test]
async fn test_activation_stays_false_until_confirmed() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .set_hardware(Ok(hardware_response("HW-NEW", false)));

    harness
        .session
        .initialize(&FixedFingerprint)
        .await
        .unwrap();

    let activation = &harness.session.state().activation;
    assert!(!activation.activated);
    assert_eq!(activation.hardware_id(), Some("HW-NEW"));
}

#[tokio::test]
async fn test_failed_activation_keeps_previous_state() {
    let mut harness = TestHarness::new();
    harness
        .session
        .initialize(&FixedFingerprint)
        .await
        .unwrap();
    let before = harness.session.state().activation.clone();

    harness
        .backend
        .set_hardware(Err(ApiError::server("Thiếu thông tin phần cứng")));
    let err = harness
        .session
        .activate(&FixedFingerprint)
        .await
        .unwrap_err();
    assert_eq!(err.to_string(), "Thiếu thông tin phần cứng");
    assert_eq!(harness.session.state().activation, before);

    harness
        .backend
        .set_hardware(Err(ApiError::Transport("connection refused".to_string())));
    assert!(harness.session.activate(&FixedFingerprint).await.is_err());
    assert_eq!(harness.session.state().activation, before);
}

#[tokio::test]
async fn test_manual_activation_validates_locally() {
    let mut harness = TestHarness::new();

    let err = harness
        .session
        .activate_manual(HardwareInfo::new("CPU-1", "  ", ""))
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Validation(ValidationError::MissingFields(ref fields))
            if fields == &vec!["bios_serial", "motherboard_serial"]
    ));
    assert_eq!(CallCounts::get(&harness.backend.calls.register_hardware), 0);

    harness
        .session
        .activate_manual(HardwareInfo::new(" CPU-1 ", "BIOS-2", "MB-3"))
        .await
        .unwrap();
    assert_eq!(
        harness.backend.registered(),
        vec![HardwareInfo::new("CPU-1", "BIOS-2", "MB-3")]
    );
    assert!(harness.session.state().activation.activated);
}

#[tokio::test]
async fn test_conversion_gating() {
    let mut harness = TestHarness::new();
    let disabled = |h: &TestHarness| !h.session.controls().conversion_enabled;

    assert!(disabled(&harness));

    harness
        .session
        .initialize(&FixedFingerprint)
        .await
        .unwrap();
    assert!(disabled(&harness));

    harness.session.set_api_key("sk-test").await.unwrap();
    assert!(disabled(&harness));

    let pdf = harness.pdf("scan.pdf");
    harness.session.select_file(&pdf).unwrap();
    assert!(!disabled(&harness));

    // Any one of the three turning false disables conversion.
    harness.session.clear_file();
    assert!(disabled(&harness));
    harness.session.select_file(&pdf).unwrap();
    assert!(!disabled(&harness));

    harness.session.clear_api_key().unwrap();
    assert!(disabled(&harness));
    harness.session.set_api_key("sk-test").await.unwrap();
    assert!(!disabled(&harness));

    harness
        .backend
        .set_hardware(Ok(hardware_response("HW-TEST", false)));
    harness.session.activate(&FixedFingerprint).await.unwrap();
    assert!(disabled(&harness));
}

#[tokio::test]
async fn test_upload_refused_without_api_key_or_activation() {
    let mut harness = TestHarness::new();
    let pdf = harness.pdf("scan.pdf");
    harness.session.select_file(&pdf).unwrap();

    let err = harness.session.upload().await.unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Validation(ValidationError::ApiKeyNotSet)
    ));

    harness.session.set_api_key("sk-test").await.unwrap();
    let err = harness.session.upload().await.unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Validation(ValidationError::NotActivated)
    ));

    assert_eq!(CallCounts::get(&harness.backend.calls.upload), 0);
}

#[tokio::test]
async fn test_upload_without_file() {
    let mut harness = TestHarness::new();
    let err = harness.session.upload().await.unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Validation(ValidationError::NoFileSelected)
    ));
}

#[tokio::test]
async fn test_rejected_file_keeps_selection() {
    let mut harness = TestHarness::new();
    let pdf = harness.pdf("scan.pdf");
    harness.session.select_file(&pdf).unwrap();

    let docx = harness.path().join("notes.docx");
    std::fs::write(&docx, b"x").unwrap();
    assert!(harness.session.select_file(&docx).is_err());

    let selected = harness.session.state().file.as_ref().unwrap();
    assert_eq!(selected.file_name, "scan.pdf");
}

#[tokio::test]
async fn test_empty_api_key_is_rejected_locally() {
    let mut harness = TestHarness::new();
    let err = harness.session.set_api_key("   ").await.unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Validation(ValidationError::EmptyApiKey)
    ));
    assert_eq!(CallCounts::get(&harness.backend.calls.set_api_key), 0);
    assert!(!harness.session.state().api_key_set());
}

#[tokio::test]
async fn test_api_key_is_saved_and_cleared() {
    let mut harness = TestHarness::new();
    let model = harness.session.set_api_key(" sk-test ").await.unwrap();
    assert_eq!(model, "gemini-test");
    assert_eq!(
        harness.session.store().get(KEY_API_KEY).as_deref(),
        Some("sk-test")
    );

    harness.session.clear_api_key().unwrap();
    assert_eq!(harness.session.store().get(KEY_API_KEY), None);
}

#[tokio::test]
async fn test_rejected_api_key_keeps_previous_state() {
    let mut harness = TestHarness::new();
    harness
        .backend
        .set_api_key_response(Err(ApiError::server("API key is required")));

    let err = harness.session.set_api_key("bad").await.unwrap_err();
    assert_eq!(err.to_string(), "API key is required");
    assert!(!harness.session.state().api_key_set());
    assert_eq!(harness.session.store().get(KEY_API_KEY), None);
}

#[tokio::test]
async fn test_single_file_upload_presents_and_saves_result() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    harness
        .backend
        .push_upload(Ok(single_file_upload("res-1", "x^2 + 1", 3)));

    let outcome = harness.session.upload().await.unwrap();
    let expected = ResultRecord {
        result_id: "res-1".to_string(),
        text: "x^2 + 1".to_string(),
        image_count: 3,
    };
    assert_eq!(outcome, UploadOutcome::Completed(expected.clone()));
    assert_eq!(harness.session.result(), Some(&expected));

    let store = harness.session.store();
    assert_eq!(store.get(KEY_LAST_RESULT_ID).as_deref(), Some("res-1"));
    assert_eq!(store.get(KEY_LAST_IMAGE_COUNT).as_deref(), Some("3"));
    assert_eq!(store.get(KEY_LAST_RESULT_TEXT).as_deref(), Some("x^2 + 1"));

    assert_eq!(
        harness.session.controls(),
        SessionControls {
            conversion_enabled: true,
            export_enabled: true,
            images_enabled: true,
        }
    );
}

#[tokio::test]
async fn test_failed_upload_leaves_state_untouched() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    harness
        .backend
        .push_upload(Ok(single_file_upload("res-1", "first", 0)));
    harness.session.upload().await.unwrap();

    harness
        .backend
        .push_upload(Err(ApiError::server("File quá lớn")));
    let err = harness.session.upload().await.unwrap_err();
    assert_eq!(err.to_string(), "File quá lớn");

    assert_eq!(harness.session.result().unwrap().text, "first");
    assert!(harness.session.state().pending_job.is_none());
    assert_eq!(
        harness.session.store().get(KEY_LAST_RESULT_ID).as_deref(),
        Some("res-1")
    );
}

#[tokio::test(start_paused = true)]
async fn test_multi_part_upload_then_convert() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    harness
        .backend
        .push_upload(Ok(multi_part_upload("job-42", 3)));
    harness
        .backend
        .push_status(Ok(status(JobStatus::InProgress, 1, 3)));
    harness
        .backend
        .push_status(Ok(completed_status(3, "merged", "res-42", 5)));

    let outcome = harness.session.upload().await.unwrap();
    assert_eq!(
        outcome,
        UploadOutcome::MultiPart {
            job_id: "job-42".to_string(),
            total_parts: 3
        }
    );
    assert!(harness.session.result().is_none());

    let record = harness.session.convert().await.unwrap();
    assert_eq!(record.result_id, "res-42");
    assert_eq!(record.text, "merged");
    assert_eq!(harness.session.result(), Some(&record));
    assert!(harness.session.state().pending_job.is_none());
    assert_eq!(CallCounts::get(&harness.backend.calls.start_conversion), 1);
    assert_eq!(harness.backend.status_job_ids(), vec!["job-42", "job-42"]);
}

#[tokio::test(start_paused = true)]
async fn test_failed_conversion_keeps_pending_job() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    harness
        .backend
        .push_upload(Ok(multi_part_upload("job-7", 2)));
    let mut failure = status(JobStatus::Error, 1, 2);
    failure.message = Some("OCR engine crashed".to_string());
    harness.backend.push_status(Ok(failure));

    harness.session.upload().await.unwrap();
    let err = harness.session.convert().await.unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Poll(PollError::JobFailed { ref job_id, ref message })
            if job_id == "job-7" && message == "OCR engine crashed"
    ));
    assert!(harness.session.result().is_none());
    assert_eq!(
        harness.session.state().pending_job.as_ref().map(|j| j.job_id.as_str()),
        Some("job-7")
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_conversion() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    harness
        .backend
        .push_upload(Ok(multi_part_upload("job-9", 4)));
    harness.session.upload().await.unwrap();

    let handle = harness.session.begin_conversion().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert!(harness.session.cancel_conversion());

    let outcome = handle.wait().await;
    let err = harness
        .session
        .finish_conversion("job-9", outcome)
        .unwrap_err();
    assert!(matches!(err, PconvertError::Poll(PollError::Cancelled { .. })));

    tokio::time::sleep(Duration::from_secs(30)).await;
    assert_eq!(
        CallCounts::get(&harness.backend.calls.conversion_status),
        1
    );
}

#[tokio::test(start_paused = true)]
async fn test_cancel_during_status_request_shows_nothing() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    harness
        .backend
        .push_upload(Ok(multi_part_upload("job-5", 2)));
    harness.backend.set_status_delay(Duration::from_secs(5));
    harness
        .backend
        .push_status(Ok(completed_status(2, "too late", "res-5", 1)));
    harness.session.upload().await.unwrap();

    let handle = harness.session.begin_conversion().await.unwrap();
    tokio::time::sleep(Duration::from_secs(4)).await;
    assert_eq!(
        CallCounts::get(&harness.backend.calls.conversion_status),
        1
    );
    assert!(harness.session.cancel_conversion());

    tokio::time::sleep(Duration::from_secs(30)).await;
    let outcome = handle.wait().await;
    assert!(harness
        .session
        .finish_conversion("job-5", outcome)
        .is_err());

    assert!(harness.session.result().is_none());
    assert_eq!(harness.session.store().get(KEY_LAST_RESULT_ID), None);
    assert_eq!(
        harness.session.state().pending_job.as_ref().map(|j| j.job_id.as_str()),
        Some("job-5")
    );
}

#[tokio::test]
async fn test_convert_without_pending_job() {
    let mut harness = TestHarness::new();
    harness.ready().await;
    let err = harness.session.convert().await.unwrap_err();
    assert!(matches!(
        err,
        PconvertError::Validation(ValidationError::NoPendingJob)
    ));
}

#[test]
fn test_restore_saved_result() {
    let store = MemoryStore::with_entries(&[
        (KEY_LAST_RESULT_ID, "r1"),
        (KEY_LAST_IMAGE_COUNT, "3"),
        (KEY_LAST_RESULT_TEXT, "hello"),
    ]);
    let mut harness = TestHarness::with_store(store);

    let record = harness.session.restore().cloned().unwrap();
    assert_eq!(
        record,
        ResultRecord {
            result_id: "r1".to_string(),
            text: "hello".to_string(),
            image_count: 3,
        }
    );

    let controls = harness.session.controls();
    assert!(controls.images_enabled);
    assert!(controls.export_enabled);
}

#[test]
fn test_restore_without_saved_result() {
    let mut harness = TestHarness::new();
    assert!(harness.session.restore().is_none());
    assert_eq!(harness.session.controls(), SessionControls::default());
}

#[test]
fn test_restore_with_bad_image_count() {
    let store = MemoryStore::with_entries(&[
        (KEY_LAST_RESULT_ID, "r1"),
        (KEY_LAST_IMAGE_COUNT, "many"),
        (KEY_LAST_RESULT_TEXT, "hello"),
    ]);
    let mut harness = TestHarness::with_store(store);

    assert_eq!(harness.session.restore().unwrap().image_count, 0);
    assert!(!harness.session.controls().images_enabled);
    assert!(harness.session.controls().export_enabled);
}

#[test]
fn test_restore_picks_up_saved_api_key() {
    let store = MemoryStore::with_entries(&[(KEY_API_KEY, "sk-saved")]);
    let mut harness = TestHarness::with_store(store);

    assert!(harness.session.restore().is_none());
    assert!(harness.session.state().api_key_set());
}
