use std::time::Duration;

use async_trait::async_trait;
use kto_common::LaunchError;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::json;
use tokio::sync::Mutex;
use tokio::time::{sleep, Instant};

use crate::{api, CloudProvider};

const API_BASE: &str = "https://cloud.lambda.ai";

/// Documented Lambda Cloud rate limits: roughly one request per second in
/// general, one launch per twelve seconds. The scripts this replaces never
/// enforced them; the client does, so callers cannot trip the limiter by
/// accident.
pub const GENERAL_SPACING: Duration = Duration::from_secs(1);
pub const LAUNCH_SPACING: Duration = Duration::from_secs(12);

pub struct LambdaProvider {
    client: Client,
    api_key: String,
    base_url: String,
    general_spacing: Duration,
    launch_spacing: Duration,
    last_request: Mutex<Option<Instant>>,
}

impl LambdaProvider {
    pub fn new(api_key: String) -> Self {
        Self::with_spacing(api_key, GENERAL_SPACING, LAUNCH_SPACING)
    }

    /// Constructor with explicit request spacing, used by tests to keep
    /// the throttle near zero.
    pub fn with_spacing(api_key: String, general: Duration, launch: Duration) -> Self {
        // Default reqwest client has no overall timeout. If the API stalls,
        // a batch run can hang forever.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(5))
            .timeout(Duration::from_secs(30))
            .build()
            .unwrap();
        Self {
            client,
            api_key: api_key.trim().to_string(),
            base_url: API_BASE.to_string(),
            general_spacing: general,
            launch_spacing: launch,
            last_request: Mutex::new(None),
        }
    }

    /// Sleep until at least `spacing` has passed since the previous request.
    pub(crate) async fn throttle(&self, spacing: Duration) {
        let mut last = self.last_request.lock().await;
        if let Some(prev) = *last {
            let elapsed = prev.elapsed();
            if elapsed < spacing {
                sleep(spacing - elapsed).await;
            }
        }
        *last = Some(Instant::now());
    }

    async fn api_get<T: DeserializeOwned>(&self, path: &str) -> Result<T, LaunchError> {
        self.throttle(self.general_spacing).await;
        let url = format!("{}{}", self.base_url, path);
        eprintln!("🔵 [Lambda API] GET {}", url);

        let resp = self
            .client
            .get(&url)
            .basic_auth(&self.api_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .send()
            .await
            .map_err(|e| LaunchError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        let body = resp
            .text()
            .await
            .map_err(|e| LaunchError::Http(e.to_string()))?;
        finish_request("GET", &url, status, parse_api_response(status, &body))
    }

    async fn api_post<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
        spacing: Duration,
    ) -> Result<T, LaunchError> {
        self.throttle(spacing).await;
        let url = format!("{}{}", self.base_url, path);
        eprintln!("🔵 [Lambda API] POST {}", url);

        let resp = self
            .client
            .post(&url)
            .basic_auth(&self.api_key, Some(""))
            .header(reqwest::header::ACCEPT, "application/json")
            .json(body)
            .send()
            .await
            .map_err(|e| LaunchError::Http(e.to_string()))?;

        let status = resp.status().as_u16();
        let text = resp
            .text()
            .await
            .map_err(|e| LaunchError::Http(e.to_string()))?;
        finish_request("POST", &url, status, parse_api_response(status, &text))
    }
}

fn finish_request<T>(
    method: &str,
    url: &str,
    status: u16,
    result: Result<T, LaunchError>,
) -> Result<T, LaunchError> {
    match &result {
        Ok(_) => eprintln!("✅ [Lambda API] {} {} succeeded: status={}", method, url, status),
        Err(e) => eprintln!("❌ [Lambda API] {} {} failed: status={} error={}", method, url, status, e),
    }
    result
}

/// Decode an API response body. Any body carrying an `error` object is a
/// provider failure regardless of the HTTP status code; otherwise the
/// payload lives under `data`.
pub(crate) fn parse_api_response<T: DeserializeOwned>(
    status: u16,
    body: &str,
) -> Result<T, LaunchError> {
    let value: serde_json::Value = serde_json::from_str(body).map_err(|e| {
        if (200..300).contains(&status) {
            LaunchError::Http(format!("invalid JSON from API: {}", e))
        } else {
            LaunchError::provider(status.to_string(), truncate_body(body))
        }
    })?;

    if let Some(err) = value.get("error") {
        let code = err
            .get("code")
            .and_then(|v| v.as_str())
            .unwrap_or("unknown")
            .to_string();
        let message = err
            .get("message")
            .and_then(|v| v.as_str())
            .unwrap_or("Unknown error")
            .to_string();
        let suggestion = err
            .get("suggestion")
            .and_then(|v| v.as_str())
            .map(String::from);
        return Err(LaunchError::Provider {
            code,
            message,
            suggestion,
        });
    }

    if !(200..300).contains(&status) {
        return Err(LaunchError::provider(
            status.to_string(),
            truncate_body(body),
        ));
    }

    let data = value
        .get("data")
        .cloned()
        .ok_or_else(|| LaunchError::Http("no `data` field in API response".to_string()))?;
    serde_json::from_value(data)
        .map_err(|e| LaunchError::Http(format!("unexpected API response shape: {}", e)))
}

fn truncate_body(body: &str) -> String {
    const MAX_BYTES: usize = 500;
    if body.len() <= MAX_BYTES {
        return body.to_string();
    }
    // Back off to a char boundary; slicing mid-codepoint panics.
    let mut end = MAX_BYTES;
    while !body.is_char_boundary(end) {
        end -= 1;
    }
    format!("{}... (truncated)", &body[..end])
}

#[async_trait]
impl CloudProvider for LambdaProvider {
    async fn list_instance_types(&self) -> Result<Vec<api::InstanceTypeInfo>, LaunchError> {
        self.api_get("/api/v1/instance-types").await
    }

    async fn list_instances(&self) -> Result<Vec<api::Instance>, LaunchError> {
        self.api_get("/api/v1/instances").await
    }

    async fn get_instance(&self, id: &str) -> Result<api::Instance, LaunchError> {
        let result: Result<api::Instance, LaunchError> =
            self.api_get(&format!("/api/v1/instances/{}", id)).await;
        match result {
            Err(LaunchError::Provider { code, .. })
                if code == "404" || code == "global/object-does-not-exist" =>
            {
                Err(LaunchError::NotFound(format!("instance {}", id)))
            }
            other => other,
        }
    }

    async fn launch_instances(&self, req: &api::LaunchRequest) -> Result<Vec<String>, LaunchError> {
        eprintln!(
            "🔵 [Lambda API] Launching: type={}, region={}, name={}, quantity={}",
            req.instance_type_name,
            req.region_name,
            req.name.as_deref().unwrap_or("-"),
            req.quantity
        );
        let resp: api::LaunchResponse = self
            .api_post("/api/v1/instance-operations/launch", req, self.launch_spacing)
            .await?;
        if resp.instance_ids.is_empty() {
            return Err(LaunchError::provider(
                "launch/empty-response",
                "no instance ids returned from launch request",
            ));
        }
        Ok(resp.instance_ids)
    }

    async fn terminate_instances(&self, ids: &[String]) -> Result<Vec<api::Instance>, LaunchError> {
        let body = json!({ "instance_ids": ids });
        let resp: api::TerminateResponse = self
            .api_post(
                "/api/v1/instance-operations/terminate",
                &body,
                self.general_spacing,
            )
            .await?;
        Ok(resp.terminated_instances)
    }

    async fn restart_instances(&self, ids: &[String]) -> Result<Vec<api::Instance>, LaunchError> {
        let body = json!({ "instance_ids": ids });
        let resp: api::RestartResponse = self
            .api_post(
                "/api/v1/instance-operations/restart",
                &body,
                self.general_spacing,
            )
            .await?;
        Ok(resp.restarted_instances)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_payload_fails_even_with_200_status() {
        let body = r#"{
            "error": {
                "code": "instance-operations/launch/insufficient-capacity",
                "message": "Not enough capacity",
                "suggestion": "Try a different region"
            }
        }"#;
        let err = parse_api_response::<api::LaunchResponse>(200, body).unwrap_err();
        match err {
            LaunchError::Provider {
                code, suggestion, ..
            } => {
                assert_eq!(code, "instance-operations/launch/insufficient-capacity");
                assert_eq!(suggestion.as_deref(), Some("Try a different region"));
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn data_payload_deserializes_to_typed_response() {
        let body = r#"{"data": {"instance_ids": ["inst-1", "inst-2"]}}"#;
        let resp: api::LaunchResponse = parse_api_response(200, body).unwrap();
        assert_eq!(resp.instance_ids, vec!["inst-1", "inst-2"]);
    }

    #[test]
    fn non_success_status_without_error_field_is_provider_error() {
        let err = parse_api_response::<api::LaunchResponse>(503, r#"{"data": null}"#).unwrap_err();
        assert!(matches!(err, LaunchError::Http(_) | LaunchError::Provider { .. }));
    }

    #[test]
    fn oversized_multibyte_error_body_truncates_on_char_boundary() {
        let body = format!("{}日本語の長いエラー", "x".repeat(499));
        let err = parse_api_response::<api::Instance>(500, &body).unwrap_err();
        match err {
            LaunchError::Provider { code, message, .. } => {
                assert_eq!(code, "500");
                assert!(message.ends_with("... (truncated)"));
            }
            other => panic!("expected provider error, got {:?}", other),
        }
    }

    #[test]
    fn instance_record_readiness() {
        let body = r#"{"data": {"id": "i-1", "status": "active", "ip": "203.0.113.7"}}"#;
        let inst: api::Instance = parse_api_response(200, body).unwrap();
        assert!(inst.is_ready());

        let booting = r#"{"data": {"id": "i-1", "status": "booting", "ip": null}}"#;
        let inst: api::Instance = parse_api_response(200, booting).unwrap();
        assert!(!inst.is_ready());
    }

    #[tokio::test]
    async fn throttle_spaces_out_consecutive_requests() {
        let provider = LambdaProvider::with_spacing(
            "key".to_string(),
            Duration::from_millis(50),
            Duration::from_millis(50),
        );
        let start = std::time::Instant::now();
        provider.throttle(provider.general_spacing).await;
        provider.throttle(provider.general_spacing).await;
        assert!(start.elapsed() >= Duration::from_millis(50));
    }
}
