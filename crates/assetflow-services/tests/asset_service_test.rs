mod common;

use std::collections::HashSet;

use bytes::Bytes;
use chrono::{Duration, Utc};
use uuid::Uuid;

use assetflow_core::lifecycle::DownloadTarget;
use assetflow_core::models::{
    AccessLevel, AddVersionRequest, AssetStatus, JobKind, JobOutcome, JobState,
    UpdateDescriptorsRequest,
};
use assetflow_core::{Caller, ErrorMetadata, Role};
use assetflow_db::{AssetFilter, JobStore};
use assetflow_services::MaintenanceService;
use assetflow_storage::Storage;

use common::{finalize_request, png, Harness};

#[tokio::test]
async fn test_create_upload_registers_first_version() {
    let h = Harness::new().await;
    let content = png(32, 32, 1);

    let ticket = h
        .service
        .create_upload(h.upload_request("My Photo.png", &content), &h.member)
        .await
        .unwrap();

    assert!(ticket.storage_key.ends_with("/original/v1/My_Photo.png"));
    assert!(ticket.expires_at > Utc::now());
    assert!(!ticket.upload_url.is_empty());

    let asset = h.asset(ticket.asset_id).await;
    assert_eq!(asset.status, AssetStatus::Uploading);
    assert_eq!(asset.latest_version(), 1);
    assert_eq!(asset.versions.latest().storage_key, ticket.storage_key);
    assert_eq!(asset.uploader_id, h.member.user_id);

    // Nothing is queued before finalize
    let jobs = h
        .service
        .list_jobs_for_asset(ticket.asset_id, &h.member)
        .await
        .unwrap();
    assert!(jobs.is_empty());
}

#[tokio::test]
async fn test_create_upload_checks_references() {
    let h = Harness::new().await;
    let content = png(8, 8, 2);

    let mut request = h.upload_request("a.png", &content);
    request.project_id = Uuid::new_v4();
    let err = h.service.create_upload(request, &h.admin).await.unwrap_err();
    assert_eq!(err.error_code(), "REFERENCE_NOT_FOUND");

    // A project of another organization does not count
    let other_org = Uuid::new_v4();
    let other_project = Uuid::new_v4();
    h.directory.add_organization(other_org);
    h.directory.add_project(other_org, other_project);
    let mut request = h.upload_request("a.png", &content);
    request.project_id = other_project;
    let err = h.service.create_upload(request, &h.admin).await.unwrap_err();
    assert_eq!(err.error_code(), "REFERENCE_NOT_FOUND");
}

#[tokio::test]
async fn test_create_upload_rejects_viewers_and_bad_input() {
    let h = Harness::new().await;
    let content = png(8, 8, 3);

    let err = h
        .service
        .create_upload(h.upload_request("a.png", &content), &h.viewer)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let mut request = h.upload_request("a.png", &content);
    request.checksum = "sha256:not-hex".to_string();
    let err = h.service.create_upload(request, &h.member).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_INPUT");

    let mut request = h.upload_request("a.png", &content);
    request.mime_type = "png".to_string();
    let err = h.service.create_upload(request, &h.member).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_INPUT");
}

#[tokio::test]
async fn test_duplicate_checksum_rejected_until_deleted() {
    let h = Harness::new().await;
    let content = png(16, 16, 4);

    let first = h.uploaded("first.png", &content, &h.member).await;
    let err = h
        .service
        .create_upload(h.upload_request("second.png", &content), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "DUPLICATE_ASSET");
    match err {
        assetflow_core::AppError::DuplicateAsset { existing_id } => assert_eq!(existing_id, first),
        other => panic!("unexpected error: {other}"),
    }

    h.service.soft_delete(first, &h.member).await.unwrap();

    let ticket = h
        .service
        .create_upload(h.upload_request("second.png", &content), &h.member)
        .await
        .unwrap();
    assert_ne!(ticket.asset_id, first);
}

#[tokio::test]
async fn test_finalize_moves_to_pending_with_one_ingest_job() {
    let h = Harness::new().await;
    let content = png(16, 16, 5);

    let asset = h.finalized("a.png", &content, &h.member).await;
    assert_eq!(asset.status, AssetStatus::Pending);

    let jobs = h.service.list_jobs_for_asset(asset.id, &h.member).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Ingest);
    assert_eq!(jobs[0].state, JobState::Queued);
}

#[tokio::test]
async fn test_finalize_is_idempotent() {
    let h = Harness::new().await;
    let content = png(16, 16, 6);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let again = h
        .service
        .finalize_upload(asset.id, finalize_request(&content), &h.member)
        .await
        .unwrap();
    assert_eq!(again.status, AssetStatus::Pending);
    assert_eq!(again.revision, asset.revision);

    let jobs = h.service.list_jobs_for_asset(asset.id, &h.member).await.unwrap();
    assert_eq!(jobs.len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_finalize_enqueues_one_ingest() {
    let h = Harness::new().await;
    let content = png(16, 16, 7);
    let asset_id = h.uploaded("a.png", &content, &h.member).await;

    let mut handles = Vec::new();
    for _ in 0..4 {
        let service = h.service.clone();
        let caller = h.member.clone();
        let request = finalize_request(&content);
        handles.push(tokio::spawn(async move {
            service.finalize_upload(asset_id, request, &caller).await
        }));
    }
    for handle in handles {
        let asset = handle.await.unwrap().unwrap();
        assert_eq!(asset.status, AssetStatus::Pending);
    }

    let jobs = h.service.list_jobs_for_asset(asset_id, &h.member).await.unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].kind, JobKind::Ingest);
}

#[tokio::test]
async fn test_checksum_mismatch_fails_asset_without_job() {
    let h = Harness::new().await;
    let content = png(16, 16, 8);
    let asset_id = h.uploaded("a.png", &content, &h.member).await;

    let err = h
        .service
        .finalize_upload(asset_id, finalize_request(b"something else"), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "CHECKSUM_MISMATCH");

    let asset = h.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    let recorded = asset.processing_error.unwrap();
    assert_eq!(recorded.code, "CHECKSUM_MISMATCH");
    assert!(recorded.job_id.is_none());

    let jobs = h.service.list_jobs_for_asset(asset_id, &h.member).await.unwrap();
    assert!(jobs.is_empty());

    // The bad upload cannot be revived
    let err = h
        .service
        .finalize_upload(asset_id, finalize_request(&content), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");
    let err = h.service.retry_processing(asset_id, &h.member).await.unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");
}

#[tokio::test]
async fn test_size_mismatch_fails_asset() {
    let h = Harness::new().await;
    let content = png(16, 16, 9);
    let asset_id = h.uploaded("a.png", &content, &h.member).await;

    let mut request = finalize_request(&content);
    request.size += 1;
    let err = h
        .service
        .finalize_upload(asset_id, request, &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "SIZE_MISMATCH");
    assert_eq!(h.asset(asset_id).await.status, AssetStatus::Failed);
}

#[tokio::test]
async fn test_finalize_access_and_missing_assets() {
    let h = Harness::new().await;
    let content = png(16, 16, 10);
    let asset_id = h.uploaded("a.png", &content, &h.member).await;

    let other_member = Caller::new(Uuid::new_v4(), h.organization_id, Role::Member);
    let err = h
        .service
        .finalize_upload(asset_id, finalize_request(&content), &other_member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");
    assert_eq!(h.asset(asset_id).await.status, AssetStatus::Uploading);

    let err = h
        .service
        .finalize_upload(Uuid::new_v4(), finalize_request(&content), &h.admin)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ASSET_NOT_FOUND");

    h.service.soft_delete(asset_id, &h.admin).await.unwrap();
    let err = h
        .service
        .finalize_upload(asset_id, finalize_request(&content), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ASSET_NOT_FOUND");
}

#[tokio::test]
async fn test_expired_upload_is_failed_by_sweep() {
    let h = Harness::new().await;
    let content = png(16, 16, 11);
    let asset_id = h.uploaded("a.png", &content, &h.member).await;

    let expired = h
        .service
        .expire_uploads(Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(expired, 1);

    let asset = h.asset(asset_id).await;
    assert_eq!(asset.status, AssetStatus::Failed);
    assert_eq!(asset.processing_error.unwrap().code, "UPLOAD_URL_EXPIRED");

    let err = h
        .service
        .finalize_upload(asset_id, finalize_request(&content), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "UPLOAD_URL_EXPIRED");

    // Already swept
    let expired = h
        .service
        .expire_uploads(Utc::now() + Duration::hours(2))
        .await
        .unwrap();
    assert_eq!(expired, 0);
}

#[tokio::test]
async fn test_maintenance_pass_sweeps_and_purges() {
    let h = Harness::new().await;
    let maintenance = MaintenanceService::new(h.service.clone(), std::time::Duration::from_secs(60), 30);

    let report = maintenance.run_once().await.unwrap();
    assert_eq!(report.expired_uploads, 0);
    assert_eq!(report.purged_jobs, 0);
}

#[tokio::test]
async fn test_update_descriptors_and_listing() {
    let h = Harness::new().await;
    let content = png(16, 16, 12);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let mut custom_metadata = std::collections::BTreeMap::new();
    custom_metadata.insert("campaign".to_string(), "spring".to_string());
    let updated = h
        .service
        .update_descriptors(
            asset.id,
            UpdateDescriptorsRequest {
                tags: Some(vec![" hero ".to_string(), "hero".to_string(), "web".to_string()]),
                custom_metadata: Some(custom_metadata),
                access_level: Some(AccessLevel::Organization),
            },
            &h.member,
        )
        .await
        .unwrap();
    assert_eq!(updated.tags, vec!["hero".to_string(), "web".to_string()]);
    assert_eq!(updated.custom_metadata["campaign"], "spring");
    assert_eq!(updated.access_level, AccessLevel::Organization);

    // Viewers cannot edit but now see the asset
    let err = h
        .service
        .update_descriptors(asset.id, UpdateDescriptorsRequest::default(), &h.viewer)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let listed = h
        .service
        .list_assets(AssetFilter::for_organization(h.organization_id), &h.viewer)
        .await
        .unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, asset.id);

    let outsider = Caller::new(Uuid::new_v4(), Uuid::new_v4(), Role::Owner);
    let err = h
        .service
        .list_assets(AssetFilter::for_organization(h.organization_id), &outsider)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");
}

#[tokio::test]
async fn test_private_assets_hidden_from_other_members() {
    let h = Harness::new().await;
    let content = png(16, 16, 13);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let other_member = Caller::new(Uuid::new_v4(), h.organization_id, Role::Member);
    let err = h.service.get_asset(asset.id, &other_member).await.unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    let listed = h
        .service
        .list_assets(AssetFilter::for_organization(h.organization_id), &other_member)
        .await
        .unwrap();
    assert!(listed.is_empty());

    assert!(h.service.get_asset(asset.id, &h.admin).await.is_ok());
}

#[tokio::test]
async fn test_get_asset_counts_views() {
    let h = Harness::new().await;
    let content = png(16, 16, 14);
    let asset = h.finalized("a.png", &content, &h.member).await;

    h.service.get_asset(asset.id, &h.member).await.unwrap();
    h.service.get_asset(asset.id, &h.member).await.unwrap();
    assert_eq!(h.asset(asset.id).await.view_count, 2);
}

#[tokio::test]
async fn test_download_requires_completed_asset() {
    let h = Harness::new().await;
    let content = png(16, 16, 15);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let err = h
        .service
        .get_download_url(asset.id, None, &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "NOT_READY");

    let err = h
        .service
        .get_download_url(Uuid::new_v4(), None, &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ASSET_NOT_FOUND");
}

#[tokio::test]
async fn test_add_version_requires_pending_or_completed() {
    let h = Harness::new().await;
    let content = png(16, 16, 16);
    let asset_id = h.uploaded("a.png", &content, &h.member).await;

    let request = AddVersionRequest {
        filename: "b.png".to_string(),
        file_size: 100,
    };
    let err = h
        .service
        .add_version(asset_id, request.clone(), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");

    h.service
        .finalize_upload(asset_id, finalize_request(&content), &h.member)
        .await
        .unwrap();
    let ticket = h
        .service
        .add_version(asset_id, request.clone(), &h.member)
        .await
        .unwrap();
    assert_eq!(ticket.version, 2);
    assert!(ticket.storage_key.ends_with("/original/v2/b.png"));
    assert_eq!(h.asset(asset_id).await.latest_version(), 2);

    h.service.soft_delete(asset_id, &h.member).await.unwrap();
    let err = h
        .service
        .add_version(asset_id, request, &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "ASSET_NOT_FOUND");
}

#[tokio::test]
async fn test_version_added_while_pending_does_not_break_ingest() {
    let h = Harness::new().await;
    let content = png(320, 200, 22);
    let asset = h.finalized("first.png", &content, &h.member).await;
    assert_eq!(asset.status, AssetStatus::Pending);

    let second = png(100, 100, 23);
    let ticket = h
        .service
        .add_version(
            asset.id,
            AddVersionRequest {
                filename: "second.png".to_string(),
                file_size: second.len() as i64,
            },
            &h.member,
        )
        .await
        .unwrap();
    assert_eq!(ticket.version, 2);

    // Version 2 is reserved but its content is not uploaded yet
    assert_eq!(h.drain().await, 1);
    let completed = h.asset(asset.id).await;
    assert_eq!(completed.status, AssetStatus::Completed);
    assert!(completed.processing_error.is_none());
    assert_eq!(completed.metadata.width, Some(320));
    assert_eq!(completed.latest_version(), 2);

    let download = h
        .service
        .get_download_url(asset.id, None, &h.member)
        .await
        .unwrap();
    assert_eq!(download.storage_key, asset.storage_key);

    h.storage
        .put(&ticket.storage_key, Bytes::from(second), "image/png")
        .await
        .unwrap();
    let download = h
        .service
        .get_download_url(asset.id, None, &h.member)
        .await
        .unwrap();
    assert_eq!(download.storage_key, ticket.storage_key);

    // Auxiliary jobs read the newest uploaded version
    h.service
        .reprocess(asset.id, JobKind::ExtractMetadata, &h.member)
        .await
        .unwrap();
    assert_eq!(h.drain().await, 1);
    let refreshed = h.asset(asset.id).await;
    assert_eq!(refreshed.metadata.width, Some(100));
    assert!(refreshed.processing_error.is_none());
}

#[tokio::test]
async fn test_ingest_result_without_start_still_walks_processing() {
    let h = Harness::new().await;
    let content = png(16, 16, 24);
    let asset = h.finalized("a.png", &content, &h.member).await;

    // Claimed without the start notification reaching the asset
    let job = h
        .store
        .claim_next("worker-a", Utc::now())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.kind, JobKind::Ingest);
    assert_eq!(h.asset(asset.id).await.status, AssetStatus::Pending);

    h.service
        .apply_processing_result(job.id, JobOutcome::Succeeded(Default::default()))
        .await
        .unwrap();
    let completed = h.asset(asset.id).await;
    assert_eq!(completed.status, AssetStatus::Completed);
    assert_eq!(
        h.service.get_job(job.id, &h.member).await.unwrap().state,
        JobState::Completed
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_add_version_keeps_ledger_dense() {
    let h = Harness::new().await;
    let content = png(16, 16, 17);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        let service = h.service.clone();
        let caller = h.member.clone();
        handles.push(tokio::spawn(async move {
            service
                .add_version(
                    asset.id,
                    AddVersionRequest {
                        filename: format!("v{}.png", i),
                        file_size: 10 + i,
                    },
                    &caller,
                )
                .await
        }));
    }

    let mut versions = HashSet::new();
    for handle in handles {
        versions.insert(handle.await.unwrap().unwrap().version);
    }
    assert_eq!(versions, HashSet::from([2, 3, 4, 5]));

    let stored = h.asset(asset.id).await;
    assert_eq!(stored.latest_version(), 5);
    let numbers: Vec<i32> = stored.versions.iter().map(|v| v.version).collect();
    assert_eq!(numbers, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_soft_delete_enqueues_cleanup_of_all_keys() {
    let h = Harness::new().await;
    let content = png(16, 16, 18);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let err = h.service.soft_delete(asset.id, &h.viewer).await.unwrap_err();
    assert_eq!(err.error_code(), "ACCESS_DENIED");

    h.service.soft_delete(asset.id, &h.member).await.unwrap();
    let err = h.service.soft_delete(asset.id, &h.member).await.unwrap_err();
    assert_eq!(err.error_code(), "ASSET_NOT_FOUND");

    let stored = h.asset(asset.id).await;
    assert!(stored.is_deleted());
    let jobs = h.service.list_jobs_for_asset(asset.id, &h.admin).await;
    assert_eq!(jobs.unwrap_err().error_code(), "ASSET_NOT_FOUND");

    let stats = h.service.job_stats(Some(JobKind::Cleanup)).await.unwrap();
    assert_eq!(stats.queued, 1);
}

#[tokio::test]
async fn test_apply_result_unknown_and_finished_jobs() {
    let h = Harness::new().await;
    let err = h
        .service
        .apply_processing_result(Uuid::new_v4(), JobOutcome::Succeeded(Default::default()))
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "JOB_NOT_FOUND");

    let content = png(16, 16, 19);
    let asset = h.finalized("a.png", &content, &h.member).await;
    assert_eq!(h.drain().await, 1);
    let completed = h.asset(asset.id).await;
    assert_eq!(completed.status, AssetStatus::Completed);

    let job = h.service.list_jobs_for_asset(asset.id, &h.member).await.unwrap()[0].clone();
    assert_eq!(job.state, JobState::Completed);

    // A late duplicate report changes nothing
    h.service
        .apply_processing_result(job.id, JobOutcome::Succeeded(Default::default()))
        .await
        .unwrap();
    assert_eq!(h.asset(asset.id).await.revision, completed.revision);
}

#[tokio::test]
async fn test_reprocess_requires_completed_auxiliary_kind() {
    let h = Harness::new().await;
    let content = png(16, 16, 20);
    let asset = h.finalized("a.png", &content, &h.member).await;

    let err = h
        .service
        .reprocess(asset.id, JobKind::GenerateThumbnails, &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_STATE");

    h.drain().await;
    let err = h
        .service
        .reprocess(asset.id, JobKind::Ingest, &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_INPUT");

    let job = h
        .service
        .reprocess(asset.id, JobKind::GenerateThumbnails, &h.member)
        .await
        .unwrap();
    assert_eq!(job.kind, JobKind::GenerateThumbnails);
    assert_eq!(
        h.service.get_job(job.id, &h.member).await.unwrap().state,
        JobState::Queued
    );
}

#[tokio::test]
async fn test_download_of_unknown_version() {
    let h = Harness::new().await;
    let content = png(16, 16, 21);
    let asset = h.finalized("a.png", &content, &h.member).await;
    h.drain().await;

    let err = h
        .service
        .get_download_url(asset.id, Some(DownloadTarget::Version(7)), &h.member)
        .await
        .unwrap_err();
    assert_eq!(err.error_code(), "INVALID_INPUT");

    let ticket = h
        .service
        .get_download_url(asset.id, Some(DownloadTarget::Version(1)), &h.member)
        .await
        .unwrap();
    assert_eq!(ticket.storage_key, asset.versions.latest().storage_key);
}
