//! Connection repository behaviour against an in-memory database.

mod test_utils;

use std::sync::Arc;

use chrono::{Duration, Utc};
use uuid::Uuid;

use publisher::models::cms_connection::ConnectionStatus;
use publisher::providers::{
    CredentialBundle, NormalizedArticle, ProviderContext, ProviderKind, PublishMode, RemoteStatus,
};
use publisher::repositories::{CmsConnectionRepository, NewConnection, PublishRecordRepository};
use test_utils::{PipelineHarness, setup_test_db, test_crypto_key};

fn new_connection(owner_id: Uuid, site_id: Uuid, token: &str) -> NewConnection {
    NewConnection {
        owner_id,
        site_id,
        provider: ProviderKind::Webflow,
        context: ProviderContext::default(),
        display_name: None,
        credentials: CredentialBundle {
            access_token: token.to_string(),
            refresh_token: Some(format!("{token}-refresh")),
            expires_at: Some(Utc::now() + Duration::hours(1)),
            scopes: vec!["sites:read".to_string(), "cms:write".to_string()],
        },
    }
}

async fn repository() -> CmsConnectionRepository {
    let db = setup_test_db().await.unwrap();
    CmsConnectionRepository::new(db, test_crypto_key())
}

#[tokio::test]
async fn credentials_are_encrypted_at_rest() {
    let repo = repository().await;
    let connection = repo
        .upsert_active(&new_connection(Uuid::new_v4(), Uuid::new_v4(), "secret-token"))
        .await
        .unwrap();

    let needle = b"secret-token";
    assert!(
        !connection
            .access_token_ciphertext
            .windows(needle.len())
            .any(|window| window == needle)
    );

    let bundle = repo.decrypt_credentials(&connection).unwrap();
    assert_eq!(bundle.access_token, "secret-token");
    assert_eq!(bundle.refresh_token.as_deref(), Some("secret-token-refresh"));
    assert_eq!(bundle.scopes.len(), 2);
}

#[tokio::test]
async fn credentials_do_not_decrypt_under_another_key() {
    let db = setup_test_db().await.unwrap();
    let repo = CmsConnectionRepository::new(Arc::clone(&db), test_crypto_key());
    let connection = repo
        .upsert_active(&new_connection(Uuid::new_v4(), Uuid::new_v4(), "secret-token"))
        .await
        .unwrap();

    let other = CmsConnectionRepository::new(
        db,
        publisher::crypto::CryptoKey::new(vec![9u8; 32]).unwrap(),
    );
    assert!(other.decrypt_credentials(&connection).is_err());
}

#[tokio::test]
async fn refresh_write_is_conditional_on_token_version() {
    let repo = repository().await;
    let connection = repo
        .upsert_active(&new_connection(Uuid::new_v4(), Uuid::new_v4(), "v1"))
        .await
        .unwrap();
    assert_eq!(connection.token_version, 1);

    let rotated = CredentialBundle::bearer("v2");
    assert!(
        repo.store_refreshed_credentials(&connection, &rotated)
            .await
            .unwrap()
    );

    // A second writer still holding the version-1 row loses
    let stale = CredentialBundle::bearer("v2-from-slow-worker");
    assert!(
        !repo
            .store_refreshed_credentials(&connection, &stale)
            .await
            .unwrap()
    );

    let stored = repo.find_by_id(connection.id).await.unwrap().unwrap();
    assert_eq!(stored.token_version, 2);
    assert_eq!(repo.decrypt_credentials(&stored).unwrap().access_token, "v2");
}

#[tokio::test]
async fn reconnecting_reactivates_the_errored_row() {
    let repo = repository().await;
    let (owner_id, site_id) = (Uuid::new_v4(), Uuid::new_v4());
    let first = repo
        .upsert_active(&new_connection(owner_id, site_id, "old"))
        .await
        .unwrap();

    repo.mark_error(first.id, "token revoked").await.unwrap();
    assert!(repo.find_active_for_site(site_id).await.unwrap().is_none());

    let second = repo
        .upsert_active(&new_connection(owner_id, site_id, "new"))
        .await
        .unwrap();
    assert_eq!(second.id, first.id);
    assert_eq!(second.connection_status().unwrap(), ConnectionStatus::Active);
    assert!(second.last_error.is_none());
    assert_eq!(second.token_version, 2);
    assert_eq!(repo.decrypt_credentials(&second).unwrap().access_token, "new");

    let active = repo.find_active_for_site(site_id).await.unwrap().unwrap();
    assert_eq!(active.id, first.id);
}

#[tokio::test]
async fn settings_survive_credential_rotation() {
    let repo = repository().await;
    let (owner_id, site_id) = (Uuid::new_v4(), Uuid::new_v4());
    let connection = repo
        .upsert_active(&new_connection(owner_id, site_id, "v1"))
        .await
        .unwrap();

    let mut settings = connection.settings();
    settings.target_id = Some("collection-1".to_string());
    settings.target_name = Some("Blog Posts".to_string());
    settings.publish_mode = PublishMode::Draft;
    let updated = repo.update_settings(connection.id, &settings).await.unwrap();
    assert_eq!(updated.settings().target_id.as_deref(), Some("collection-1"));

    let reconnected = repo
        .upsert_active(&new_connection(owner_id, site_id, "v2"))
        .await
        .unwrap();
    let settings = reconnected.settings();
    assert_eq!(settings.target_id.as_deref(), Some("collection-1"));
    assert_eq!(settings.publish_mode, PublishMode::Draft);
}

#[tokio::test]
async fn publish_records_are_kept_per_job() {
    let harness = PipelineHarness::new().await;
    let (owner_id, site_id) = (Uuid::new_v4(), Uuid::new_v4());
    harness.connect_site(owner_id, site_id).await;
    let job = harness.create_job(owner_id, site_id).await;
    harness.pipeline.advance(job.id).await.unwrap();

    let records = PublishRecordRepository::new(Arc::clone(&harness.db));
    let stored = records.list_for_job(job.id).await.unwrap();
    assert_eq!(stored.len(), 1);
    assert_eq!(stored[0].remote_id, "remote-0");
    assert_eq!(stored[0].remote_status, "published");
    assert!(records.list_for_job(Uuid::new_v4()).await.unwrap().is_empty());
}

#[tokio::test]
async fn remote_entry_is_kept_without_overwriting() {
    let harness = PipelineHarness::new().await;
    let (owner_id, site_id) = (Uuid::new_v4(), Uuid::new_v4());
    let connection = harness.connect_site(owner_id, site_id).await;
    let job = harness.create_job(owner_id, site_id).await;
    let entry = |id: &str| NormalizedArticle {
        id: id.to_string(),
        title: job.title.clone(),
        content: String::new(),
        excerpt: None,
        slug: job.slug.clone(),
        status: RemoteStatus::Draft,
        published_at: None,
        url: Some(format!("https://blog.example.com/?p={id}")),
    };

    assert!(
        harness
            .jobs
            .record_remote_entry(job.id, connection.id, &entry("7"))
            .await
            .unwrap()
    );
    assert!(
        !harness
            .jobs
            .record_remote_entry(job.id, connection.id, &entry("8"))
            .await
            .unwrap()
    );
    let stored = harness.reload(job.id).await;
    assert_eq!(stored.remote_id.as_deref(), Some("7"));
    assert_eq!(stored.connection_id, Some(connection.id));
    assert_eq!(stored.status, "pending");

    assert!(
        harness
            .records
            .latest_for_job(job.id, connection.id)
            .await
            .unwrap()
            .is_none()
    );
    harness
        .records
        .insert(job.id, connection.id, ProviderKind::WordPress, &entry("7"))
        .await
        .unwrap();
    let latest = harness
        .records
        .latest_for_job(job.id, connection.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(latest.remote_id, "7");
    assert!(
        harness
            .records
            .latest_for_job(job.id, Uuid::new_v4())
            .await
            .unwrap()
            .is_none()
    );
}
