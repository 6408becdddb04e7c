//! Runtime wiring tests over the in-memory adapters

use std::sync::Arc;
use std::time::Duration;

use core_kernel::{AuditContext, OrganizationId, Role, UserIdentity};
use domain_compliance::ports::mock::{
    MemoryDatabase, MemoryLegacyInbox, MemoryTaskLock, RecordingNotificationSink, StaticReferenceData,
};
use domain_compliance::{InboxMessage, LegacyAction, LegacyMessage, OrganizationProfile, ReferenceData};
use domain_ledger::{BalanceCache, IssuanceKind, LedgerDatabase, NewIssuance};
use interface_service::auth::JwtIdentityProvider;
use interface_service::cache::LocalBalanceCache;
use interface_service::config::IdentitySettings;
use interface_service::{Runtime, ServiceConfig, Services};

fn profile(id: i64) -> OrganizationProfile {
    OrganizationProfile {
        organization_id: OrganizationId::new(id),
        name: format!("Supplier {id} Ltd"),
        operating_name: format!("Supplier {id}"),
        email: None,
        phone: None,
        service_address: "1 Harbour Rd, Victoria BC".into(),
        attorney_address: None,
    }
}

fn services(database: Arc<MemoryDatabase>, cache: Option<Arc<dyn BalanceCache>>, config: &ServiceConfig) -> Services {
    Services::new(
        database,
        Arc::new(StaticReferenceData::new(ReferenceData::default())),
        Arc::new(RecordingNotificationSink::new()),
        cache,
        config,
    )
}

#[tokio::test]
async fn test_consumer_applies_inbox_messages() {
    let mut config = ServiceConfig::default();
    config.consumer.poll_interval_ms = 10;
    let database = Arc::new(MemoryDatabase::with_organizations(&[(profile(7), 0)]));
    let inbox = Arc::new(MemoryLegacyInbox::new());
    inbox
        .push(InboxMessage {
            message_id: 1,
            attempts: 0,
            body: LegacyMessage {
                legacy_id: 501,
                organization_id: OrganizationId::new(7),
                compliance_period: 2023,
                action: LegacyAction::Create,
                compliance_units: None,
            },
        })
        .await;

    let runtime = Runtime::start(
        services(database, None, &config),
        Arc::new(MemoryTaskLock::new()),
        inbox.clone(),
        &config,
    );
    tokio::time::sleep(Duration::from_millis(200)).await;
    runtime.shutdown().await;

    let state = inbox.state().await;
    assert_eq!(state.acked, vec![1]);
    assert!(state.dead_letters.is_empty());
}

#[tokio::test]
async fn test_admin_adjustment_through_wired_services() {
    let config = ServiceConfig::default();
    let database = Arc::new(MemoryDatabase::with_organizations(&[(profile(3), 0)]));
    let cache = Arc::new(LocalBalanceCache::new(Duration::from_secs(60)));
    let services = services(database.clone(), Some(cache.clone()), &config);

    let analyst = UserIdentity::new("analyst", [Role::Analyst]);
    let director = UserIdentity::new("director", [Role::Director]);
    let issuance = services
        .issuances
        .create(
            &analyst,
            NewIssuance {
                kind: IssuanceKind::AdminAdjustment,
                organization_id: OrganizationId::new(3),
                compliance_units: 250,
                transaction_effective_date: None,
                gov_comment: None,
            },
        )
        .await
        .unwrap();
    services.issuances.recommend(&analyst, issuance.id).await.unwrap();
    services.issuances.approve(&director, issuance.id).await.unwrap();

    let mut uow = database.begin_ledger(&AuditContext::for_user(&director)).await.unwrap();
    let balance = services
        .ledger
        .cached_balance(uow.as_mut(), OrganizationId::new(3))
        .await
        .unwrap();
    drop(uow);
    assert_eq!(balance.committed_units, 250);
    assert_eq!(balance.available_units, 250);
    assert_eq!(cache.len().await, 1);
}

#[test]
fn test_token_identity_reaches_core_shape() {
    let provider = JwtIdentityProvider::new(IdentitySettings {
        jwt_secret: "integration-secret-value".into(),
        ..IdentitySettings::default()
    });
    let manager = UserIdentity::new("manager", [Role::ComplianceManager]);
    let token = provider.issue(&manager).unwrap();

    let identity = provider.authenticate(&token).unwrap();
    assert!(identity.is_government());
    assert_eq!(identity.organization_id, None);
}
