//! CRM collaborator: contact upsert and lead creation.
//!
//! [`BitrixClient`] talks to a Bitrix24 inbound webhook
//! (`https://<portal>/rest/<user>/<token>/`). Each REST method is called as
//! `POST {webhook}/{method}.json` with a JSON body:
//!
//! | Operation | Methods |
//! |-----------|---------|
//! | [`CrmClient::upsert_contact`] | `crm.contact.list` (filter by phone), else `crm.contact.add` |
//! | [`CrmClient::create_lead`] | `crm.lead.add` |
//!
//! Bitrix reports some failures with HTTP 200 and an `error` field, so both
//! the status and the body are checked. Every failure maps to
//! [`PipelineError::CrmUnavailable`]; the engine decides whether to retry.

use anyhow::Result;
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::json;
use std::time::Duration;

use consult_core::error::PipelineError;

/// Contact fields sent to the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContactRequest {
    pub full_name: String,
    pub phone: String,
    pub email: Option<String>,
}

/// Lead fields sent to the CRM.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LeadRequest {
    pub contact_id: String,
    pub service_code: String,
    pub service_title: String,
    pub full_name: String,
    pub phone: String,
    pub user_id: i64,
    /// Rendered lead summary, stored as the lead comment.
    pub summary: String,
}

#[async_trait]
pub trait CrmClient: Send + Sync {
    /// Find a contact by phone or create one. Returns the CRM contact id.
    async fn upsert_contact(&self, contact: &ContactRequest) -> Result<String, PipelineError>;

    /// Create a lead linked to `contact_id`. Returns the CRM lead id.
    async fn create_lead(&self, lead: &LeadRequest) -> Result<String, PipelineError>;
}

/// Split "First Last ..." into (`NAME`, `LAST_NAME`).
pub fn split_name(full_name: &str) -> (String, String) {
    let mut parts = full_name.split_whitespace();
    let first = parts.next().unwrap_or_default().to_string();
    let last = parts.collect::<Vec<_>>().join(" ");
    (first, last)
}

// ============ Bitrix24 ============

#[derive(Deserialize)]
struct BitrixEnvelope<T> {
    result: Option<T>,
    #[serde(default)]
    error: Option<String>,
    #[serde(default)]
    error_description: Option<String>,
}

#[derive(Deserialize)]
struct BitrixContactRow {
    #[serde(rename = "ID")]
    id: BitrixId,
}

/// Bitrix returns ids as numbers from `*.add` and strings from `*.list`.
#[derive(Deserialize)]
#[serde(untagged)]
enum BitrixId {
    Number(i64),
    Text(String),
}

impl BitrixId {
    fn into_string(self) -> String {
        match self {
            BitrixId::Number(n) => n.to_string(),
            BitrixId::Text(s) => s,
        }
    }
}

pub struct BitrixClient {
    client: reqwest::Client,
    webhook: String,
}

impl BitrixClient {
    /// `webhook_url` may be the bare webhook base or a full method URL such as
    /// `.../crm.lead.add.json`; the method suffix is stripped.
    pub fn new(webhook_url: &str, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            webhook: webhook_base(webhook_url),
        })
    }

    async fn call<T: DeserializeOwned>(
        &self,
        method: &str,
        body: serde_json::Value,
    ) -> Result<T, PipelineError> {
        let url = format!("{}/{}.json", self.webhook, method);
        let response = self
            .client
            .post(&url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    PipelineError::CrmUnavailable(format!("{} timed out", method))
                } else {
                    PipelineError::CrmUnavailable(format!("{} request failed: {}", method, e))
                }
            })?;

        let status = response.status();
        let text = response.text().await.unwrap_or_default();
        let envelope: Option<BitrixEnvelope<T>> = serde_json::from_str(&text).ok();

        match envelope {
            Some(BitrixEnvelope {
                error: Some(code),
                error_description,
                ..
            }) => Err(PipelineError::CrmUnavailable(format!(
                "{} failed ({}): {}: {}",
                method,
                status,
                code,
                error_description.unwrap_or_default()
            ))),
            Some(BitrixEnvelope {
                result: Some(result),
                ..
            }) if status.is_success() => Ok(result),
            _ => Err(PipelineError::CrmUnavailable(format!(
                "{} returned {}: {}",
                method,
                status,
                truncate(&text, 200)
            ))),
        }
    }
}

fn webhook_base(url: &str) -> String {
    let trimmed = url.trim().trim_end_matches('/');
    match trimmed.rsplit_once('/') {
        Some((base, last)) if last.starts_with("crm.") || last.ends_with(".json") => {
            base.to_string()
        }
        _ => trimmed.to_string(),
    }
}

fn work_phone(phone: &str) -> serde_json::Value {
    json!([{ "VALUE": phone, "VALUE_TYPE": "WORK" }])
}

fn truncate(s: &str, max: usize) -> String {
    s.chars().take(max).collect()
}

#[async_trait]
impl CrmClient for BitrixClient {
    async fn upsert_contact(&self, contact: &ContactRequest) -> Result<String, PipelineError> {
        let existing: Vec<BitrixContactRow> = self
            .call(
                "crm.contact.list",
                json!({
                    "filter": { "PHONE": contact.phone },
                    "select": ["ID"],
                }),
            )
            .await?;
        if let Some(row) = existing.into_iter().next() {
            let id = row.id.into_string();
            tracing::debug!(contact_id = %id, "existing CRM contact matched by phone");
            return Ok(id);
        }

        let (first, last) = split_name(&contact.full_name);
        let mut fields = json!({
            "NAME": first,
            "LAST_NAME": last,
            "PHONE": work_phone(&contact.phone),
            "SOURCE_ID": "TELEGRAM",
            "OPENED": "Y",
        });
        if let Some(email) = &contact.email {
            fields["EMAIL"] = json!([{ "VALUE": email, "VALUE_TYPE": "WORK" }]);
        }
        let id: BitrixId = self
            .call("crm.contact.add", json!({ "fields": fields }))
            .await?;
        Ok(id.into_string())
    }

    async fn create_lead(&self, lead: &LeadRequest) -> Result<String, PipelineError> {
        let (first, last) = split_name(&lead.full_name);
        let comment = format!(
            "Source: Telegram bot\nService: {}\nTelegram ID: {}\n\n{}",
            lead.service_title, lead.user_id, lead.summary
        );
        let id: BitrixId = self
            .call(
                "crm.lead.add",
                json!({
                    "fields": {
                        "TITLE": format!("Telegram bot lead - {}", lead.service_title),
                        "NAME": first,
                        "LAST_NAME": last,
                        "CONTACT_ID": lead.contact_id,
                        "PHONE": work_phone(&lead.phone),
                        "SOURCE_ID": "TELEGRAM",
                        "STATUS_ID": "NEW",
                        "OPENED": "Y",
                        "COMMENTS": comment,
                    }
                }),
            )
            .await?;
        Ok(id.into_string())
    }
}
