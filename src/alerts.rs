use crate::{
    models::{Alert, AlertStatus, Severity},
    store::Store,
};
use chrono::Utc;
use std::sync::Arc;
use tracing::{error, warn};
use uuid::Uuid;

/// Entity an alert points at, e.g. `("gbp_connection", id)`.
pub type EntityRef = (&'static str, Uuid);

/// Fire-and-forget sink for operator-visible failures. A failing insert is
/// logged and swallowed; raising never fails the caller.
#[derive(Clone)]
pub struct AlertSink {
    store: Arc<dyn Store>,
}

impl AlertSink {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    pub async fn raise(
        &self,
        tenant_id: Option<Uuid>,
        severity: Severity,
        alert_type: &str,
        message: impl Into<String>,
        entity: Option<EntityRef>,
    ) {
        let alert = Alert {
            id: Uuid::new_v4(),
            tenant_id,
            severity,
            alert_type: alert_type.to_string(),
            message: message.into(),
            entity_type: entity.map(|(kind, _)| kind.to_string()),
            entity_id: entity.map(|(_, id)| id),
            status: AlertStatus::Open,
            created_at: Utc::now(),
        };
        warn!(
            target = "salon_gbp.alerts",
            alert_type = %alert.alert_type,
            severity = severity.as_str(),
            tenant_id = ?tenant_id,
            message = %alert.message,
            "alert_raised"
        );
        if let Err(err) = self.store.insert_alert(&alert).await {
            error!(
                target = "salon_gbp.alerts",
                alert_type = %alert.alert_type,
                error = %err,
                "alert_persist_failed"
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryStore;

    #[tokio::test]
    async fn raised_alerts_are_persisted_with_entity_reference() {
        let store = Arc::new(MemoryStore::new());
        let sink = AlertSink::new(store.clone());
        let tenant_id = Uuid::new_v4();
        let connection_id = Uuid::new_v4();

        sink.raise(
            Some(tenant_id),
            Severity::Critical,
            "oauth_expired",
            "GBP token expired or revoked. Reconnect Google account.",
            Some(("gbp_connection", connection_id)),
        )
        .await;
        sink.raise(None, Severity::Info, "note", "global", None).await;

        let scoped = store.list_alerts(Some(tenant_id)).await.unwrap();
        assert_eq!(scoped.len(), 1);
        assert_eq!(scoped[0].alert_type, "oauth_expired");
        assert_eq!(scoped[0].entity_type.as_deref(), Some("gbp_connection"));
        assert_eq!(scoped[0].entity_id, Some(connection_id));
        assert_eq!(store.list_alerts(None).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn acknowledging_is_tenant_scoped_and_once_only() {
        let store = Arc::new(MemoryStore::new());
        let sink = AlertSink::new(store.clone());
        let tenant_id = Uuid::new_v4();
        sink.raise(Some(tenant_id), Severity::Warning, "scrape_failed", "HTTP 503", None)
            .await;
        let alert_id = store.list_alerts(Some(tenant_id)).await.unwrap()[0].id;

        assert!(!store.acknowledge_alert(Uuid::new_v4(), alert_id).await.unwrap());
        assert!(store.acknowledge_alert(tenant_id, alert_id).await.unwrap());
        assert!(!store.acknowledge_alert(tenant_id, alert_id).await.unwrap());
        let alert = &store.list_alerts(Some(tenant_id)).await.unwrap()[0];
        assert_eq!(alert.status, AlertStatus::Acked);
    }
}
