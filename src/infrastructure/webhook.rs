use crate::domain::models::Record;
use crate::infrastructure::error::InfraError;
use async_trait::async_trait;
use reqwest::Client;
use url::Url;

#[async_trait]
pub trait WebhookNotifier: Send + Sync {
    async fn notify(&self, url: &str, record: &Record) -> Result<(), InfraError>;
}

#[derive(Debug, Clone, Default)]
pub struct ReqwestWebhookNotifier {
    client: Client,
}

impl ReqwestWebhookNotifier {
    pub fn new() -> Self {
        Self {
            client: Client::new(),
        }
    }
}

/// Form fields posted for one record, in a stable order.
pub fn record_form_fields(record: &Record) -> Vec<(&'static str, String)> {
    vec![
        ("id", record.id.clone()),
        ("createdAt", record.created_at.to_rfc3339()),
        ("ownerUsername", record.owner_username.clone()),
        ("employeeName", record.employee_name.clone()),
        ("supervisor", record.supervisor.clone()),
        ("startDate", record.start_date.clone()),
        ("startTime", record.start_time.clone()),
        ("endDate", record.end_date.clone()),
        ("endTime", record.end_time.clone()),
        ("durationMinutes", record.duration_minutes.to_string()),
        ("reason", record.reason.clone()),
        ("status", record.status.as_str().to_string()),
    ]
}

#[async_trait]
impl WebhookNotifier for ReqwestWebhookNotifier {
    async fn notify(&self, url: &str, record: &Record) -> Result<(), InfraError> {
        let endpoint = Url::parse(url.trim())
            .map_err(|error| InfraError::InvalidConfig(format!("invalid webhook url: {error}")))?;
        let response = self
            .client
            .post(endpoint)
            .form(&record_form_fields(record))
            .send()
            .await
            .map_err(|error| InfraError::Transport(format!("network error while posting webhook: {error}")))?;

        let status = response.status();
        if !status.is_success() {
            return Err(InfraError::RemoteStatus {
                status: status.as_u16(),
            });
        }
        Ok(())
    }
}
