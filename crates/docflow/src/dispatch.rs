//! Job dispatcher: typed requests to the external processing services
//!
//! Every call is a single HTTP round trip. Transport failures surface as
//! [`Error::UpstreamUnreachable`], non-2xx responses as
//! [`Error::UpstreamRejected`] carrying the raw body. Nothing is retried.

use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::time::Duration;

use crate::config::ServicesConfig;
use crate::error::{Error, Result};

/// Default instruction for the large-model OCR service
pub const DEFAULT_LARGE_MODEL_PROMPT: &str =
    "<image>\\n<|grounding|>Convert the document to markdown,Filter out watermarks named CSG, keep table structure.";

/// External services reachable from the gateway
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Service {
    Ocr,
    LargeModel,
    Schema,
    Extract,
    Pipeline,
    Database,
}

impl Service {
    pub fn name(&self) -> &'static str {
        match self {
            Service::Ocr => "ocr",
            Service::LargeModel => "large_model",
            Service::Schema => "schema",
            Service::Extract => "extract",
            Service::Pipeline => "pipeline",
            Service::Database => "database",
        }
    }
}

/// Upstream ids are integers when they look like one
pub fn user_id_value(user: &str) -> Value {
    match user.trim().parse::<i64>() {
        Ok(n) => Value::from(n),
        Err(_) => Value::from(user),
    }
}

/// OCR submission for either model
#[derive(Debug, Clone, Serialize)]
pub struct OcrRequest {
    pub task_id: String,
    pub status: u8,
    #[serde(rename = "agentUserId")]
    pub agent_user_id: Value,
    pub file_name: String,
    pub input_file_path: String,
    pub output_file_path: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub prompt: Option<String>,
}

/// Schema generation submission
#[derive(Debug, Clone, Serialize)]
pub struct SchemaGenerateRequest {
    pub task_id: String,
    pub status: Value,
    #[serde(rename = "agentUserId")]
    pub agent_user_id: Value,
    pub content_file: String,
    pub schema_map_file: String,
}

/// Entity extraction submission
#[derive(Debug, Clone, Serialize)]
pub struct ExtractRequest {
    pub task_id: String,
    pub status: Value,
    #[serde(rename = "agentUserId")]
    pub agent_user_id: Value,
    pub content_file: String,
    #[serde(rename = "schema_map_forEnti_file")]
    pub schema_map_for_entity_file: String,
    pub output_json_file: String,
}

/// Extraction over inline content, used by the quick path
#[derive(Debug, Clone, Serialize)]
pub struct QuickExtractRequest {
    pub task_id: String,
    pub status: u8,
    #[serde(rename = "agentUserId")]
    pub agent_user_id: Value,
    pub content: String,
    pub schema_map: String,
    pub output_json_file: String,
}

/// Parsing pipeline submission (run_check and statistics)
#[derive(Debug, Clone, Serialize)]
pub struct PipelineRequest {
    pub file_name: String,
    pub task_id: String,
    #[serde(rename = "agentUserId")]
    pub agent_user_id: Value,
    pub input_file_path: String,
    pub output_file_path: String,
}

/// Database import submission
#[derive(Debug, Clone, Serialize)]
pub struct ImportRequest {
    pub json_file_path: String,
}

/// Small-model OCR acknowledgement
#[derive(Debug, Clone, Deserialize)]
pub struct OcrAck {
    pub report_generation_status: Option<i64>,
    pub report_generation_condition: Option<String>,
}

/// Raw answer of a status endpoint; 404 is a regular outcome here
#[derive(Debug, Clone)]
pub struct StatusProbe {
    pub status: u16,
    pub body: Value,
}

impl StatusProbe {
    pub fn is_not_found(&self) -> bool {
        self.status == StatusCode::NOT_FOUND.as_u16()
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// HTTP client for all processing services
#[derive(Clone)]
pub struct ServiceClient {
    client: Client,
    services: ServicesConfig,
}

impl ServiceClient {
    /// Create a new service client
    pub fn new(services: ServicesConfig) -> Self {
        let client = Client::builder()
            .timeout(Duration::from_secs(services.timeout_secs))
            .build()
            .expect("Failed to create HTTP client");

        Self { client, services }
    }

    pub fn base_url(&self, service: Service) -> &str {
        let url = match service {
            Service::Ocr => &self.services.ocr_url,
            Service::LargeModel => &self.services.large_model_url,
            Service::Schema => &self.services.schema_url,
            Service::Extract => &self.services.extract_url,
            Service::Pipeline => &self.services.pipeline_url,
            Service::Database => &self.services.db_url,
        };
        url.trim_end_matches('/')
    }

    fn url(&self, service: Service, path: &str) -> String {
        format!("{}{}", self.base_url(service), path)
    }

    /// POST a JSON body and return the parsed JSON answer.
    ///
    /// Non-JSON bodies come back as a JSON string, empty bodies as null.
    pub async fn post_json<B: Serialize + ?Sized>(
        &self,
        service: Service,
        path: &str,
        body: &B,
    ) -> Result<Value> {
        let url = self.url(service, path);
        tracing::debug!(service = service.name(), %url, "Dispatching request");

        let response = self
            .client
            .post(&url)
            .json(body)
            .send()
            .await
            .map_err(|e| Error::unreachable(service.name(), e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| Error::unreachable(service.name(), e.to_string()))?;

        if !status.is_success() {
            tracing::warn!(service = service.name(), status = status.as_u16(), "Service rejected request");
            return Err(Error::rejected(service.name(), status.as_u16(), text));
        }

        Ok(parse_body(&text))
    }

    /// GET a status endpoint. Any HTTP answer is returned as a probe.
    pub async fn probe(&self, service: Service, path: &str) -> Result<StatusProbe> {
        let url = self.url(service, path);
        let response = self
            .client
            .get(&url)
            .send()
            .await
            .map_err(|e| Error::unreachable(service.name(), e.to_string()))?;

        let status = response.status().as_u16();
        let text = response
            .text()
            .await
            .map_err(|e| Error::unreachable(service.name(), e.to_string()))?;

        Ok(StatusProbe {
            status,
            body: parse_body(&text),
        })
    }

    /// Submit an OCR job to the small model. Accepted iff the service
    /// answers `report_generation_status == 0`.
    pub async fn submit_ocr(&self, request: &OcrRequest) -> Result<Value> {
        let value = self.post_json(Service::Ocr, "/generate_report/", request).await?;
        let ack: OcrAck = serde_json::from_value(value.clone()).unwrap_or(OcrAck {
            report_generation_status: None,
            report_generation_condition: None,
        });

        if ack.report_generation_status == Some(0) {
            tracing::info!(task_id = %request.task_id, "OCR job accepted");
            Ok(value)
        } else {
            let message = ack
                .report_generation_condition
                .unwrap_or_else(|| "OCR service returned an error".to_string());
            Err(Error::rejected(Service::Ocr.name(), 502, message))
        }
    }

    /// Submit an OCR job to the large model; any 2xx is an acceptance
    pub async fn submit_large_model_ocr(&self, request: &OcrRequest) -> Result<Value> {
        let value = self
            .post_json(Service::LargeModel, "/generate_task/", request)
            .await?;
        tracing::info!(task_id = %request.task_id, "Large-model OCR job accepted");
        Ok(value)
    }

    /// Status of an OCR or report job: `GET /report_status/{task_id}`
    pub async fn report_status(&self, service: Service, task_id: &str) -> Result<StatusProbe> {
        let path = format!("/report_status/{}", crate::storage::encode_segment(task_id));
        self.probe(service, &path).await
    }

    pub async fn generate_schema(&self, request: &SchemaGenerateRequest) -> Result<Value> {
        self.post_json(Service::Schema, "/generate_Attribute/", request).await
    }

    pub async fn extract(&self, request: &ExtractRequest) -> Result<Value> {
        self.post_json(Service::Extract, "/extract_Attribute/", request).await
    }

    pub async fn extract_quick(&self, request: &QuickExtractRequest) -> Result<Value> {
        self.post_json(Service::Extract, "/extract_Attribute/", request).await
    }

    pub async fn pipeline_run_check(&self, request: &PipelineRequest) -> Result<Value> {
        self.post_json(Service::Pipeline, "/pipeline/run_check", request).await
    }

    pub async fn pipeline_statistics(&self, request: &PipelineRequest) -> Result<Value> {
        self.post_json(Service::Pipeline, "/pipeline/statistics", request).await
    }

    /// `GET /pipeline/status?query_id=...`
    pub async fn pipeline_status(&self, query_id: &str) -> Result<StatusProbe> {
        let path = format!("/pipeline/status?query_id={}", crate::storage::encode_segment(query_id));
        self.probe(Service::Pipeline, &path).await
    }

    pub async fn import_table_cells(&self, request: &ImportRequest) -> Result<Value> {
        self.post_json(Service::Database, "/import/table_cells", request).await
    }
}

fn parse_body(text: &str) -> Value {
    if text.trim().is_empty() {
        return Value::Null;
    }
    serde_json::from_str(text).unwrap_or_else(|_| Value::String(text.to_string()))
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use axum::{
        extract::Path,
        http::StatusCode as AxumStatus,
        routing::{get, post},
        Json, Router,
    };
    use serde_json::json;

    /// Serve a router on an ephemeral port and return its base URL
    pub(crate) async fn spawn_upstream(router: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, router).await.unwrap();
        });
        format!("http://{}", addr)
    }

    pub(crate) fn client_for(url: &str) -> ServiceClient {
        ServiceClient::new(ServicesConfig {
            ocr_url: url.to_string(),
            large_model_url: url.to_string(),
            schema_url: url.to_string(),
            extract_url: url.to_string(),
            pipeline_url: url.to_string(),
            db_url: url.to_string(),
            timeout_secs: 5,
        })
    }

    fn ocr_request(task_id: &str) -> OcrRequest {
        OcrRequest {
            task_id: task_id.to_string(),
            status: 0,
            agent_user_id: user_id_value("123"),
            file_name: "a.pdf".to_string(),
            input_file_path: "/home/cqj/my-doc-system-uploads/upload".to_string(),
            output_file_path: "/home/cqj/my-doc-system-uploads/save".to_string(),
            prompt: None,
        }
    }

    #[test]
    fn test_request_wire_format() {
        let value = serde_json::to_value(ocr_request("7")).unwrap();
        assert_eq!(value["agentUserId"], 123);
        assert_eq!(value["status"], 0);
        assert!(value.get("prompt").is_none());

        let extract = ExtractRequest {
            task_id: "7".into(),
            status: json!(0),
            agent_user_id: user_id_value("abc"),
            content_file: "c".into(),
            schema_map_for_entity_file: "s".into(),
            output_json_file: "o".into(),
        };
        let value = serde_json::to_value(extract).unwrap();
        assert_eq!(value["schema_map_forEnti_file"], "s");
        assert_eq!(value["agentUserId"], "abc");
    }

    #[tokio::test]
    async fn test_ocr_acceptance_sentinel() {
        let router = Router::new().route(
            "/generate_report/",
            post(|Json(body): Json<Value>| async move {
                if body["task_id"] == "1" {
                    Json(json!({"report_generation_status": 0}))
                } else {
                    Json(json!({"report_generation_status": 1, "report_generation_condition": "busy"}))
                }
            }),
        );
        let client = client_for(&spawn_upstream(router).await);

        assert!(client.submit_ocr(&ocr_request("1")).await.is_ok());
        let err = client.submit_ocr(&ocr_request("2")).await.unwrap_err();
        match err {
            Error::UpstreamRejected { body, .. } => assert_eq!(body, "busy"),
            other => panic!("unexpected error: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_rejected_and_probe() {
        let router = Router::new()
            .route(
                "/extract_Attribute/",
                post(|| async { (AxumStatus::UNPROCESSABLE_ENTITY, "bad schema") }),
            )
            .route(
                "/report_status/:id",
                get(|Path(id): Path<String>| async move {
                    if id == "missing" {
                        (AxumStatus::NOT_FOUND, Json(json!({"detail": "not found"})))
                    } else {
                        (AxumStatus::OK, Json(json!({"report_generation_status": 2})))
                    }
                }),
            );
        let client = client_for(&spawn_upstream(router).await);

        let request = ExtractRequest {
            task_id: "1".into(),
            status: json!(0),
            agent_user_id: json!(123),
            content_file: String::new(),
            schema_map_for_entity_file: String::new(),
            output_json_file: String::new(),
        };
        match client.extract(&request).await.unwrap_err() {
            Error::UpstreamRejected { status, body, .. } => {
                assert_eq!(status, 422);
                assert_eq!(body, "bad schema");
            }
            other => panic!("unexpected error: {:?}", other),
        }

        let probe = client.report_status(Service::Ocr, "missing").await.unwrap();
        assert!(probe.is_not_found());
        let probe = client.report_status(Service::Ocr, "5").await.unwrap();
        assert_eq!(probe.body["report_generation_status"], 2);
    }

    #[tokio::test]
    async fn test_unreachable() {
        let client = client_for("http://127.0.0.1:1");
        let err = client.pipeline_status("q").await.unwrap_err();
        assert!(matches!(err, Error::UpstreamUnreachable { .. }));
    }
}
