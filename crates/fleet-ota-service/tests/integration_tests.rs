//! End-to-end tests of the HTTP API through the router

use std::sync::Arc;

use anyhow::{Result, anyhow};
use axum::{
    Router,
    body::{Body, to_bytes},
    http::{Request, StatusCode, header},
};
use fleet_ota_rollout::prelude::*;
use fleet_ota_service::{ApiMetrics, AppState, router};
use serde_json::{Value, json};
use tempfile::TempDir;
use tower::ServiceExt;

const BOUNDARY: &str = "ota-test-boundary";
const FLEET: [&str; 3] = ["valve-1", "valve-2", "valve-3"];

struct TestApp {
    router: Router,
    service: Arc<OtaService>,
    _storage_dir: TempDir,
}

impl TestApp {
    async fn send(&self, request: Request<Body>) -> Result<(StatusCode, Value)> {
        let response = self.router.clone().oneshot(request).await?;
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await?;
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap_or_else(|_| {
                Value::String(String::from_utf8_lossy(&bytes).into_owned())
            })
        };
        Ok((status, body))
    }

    async fn get(&self, uri: &str) -> Result<(StatusCode, Value)> {
        self.send(Request::builder().uri(uri).body(Body::empty())?)
            .await
    }

    async fn put(&self, uri: &str) -> Result<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .method("PUT")
                .uri(uri)
                .body(Body::empty())?,
        )
        .await
    }

    async fn post_json(&self, uri: &str, body: &Value) -> Result<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .method("POST")
                .uri(uri)
                .header(header::CONTENT_TYPE, "application/json")
                .body(Body::from(serde_json::to_vec(body)?))?,
        )
        .await
    }

    async fn upload(&self, version: &str, binary: &[u8]) -> Result<(StatusCode, Value)> {
        let fields = [
            ("template_id", "valve-controller"),
            ("version", version),
            ("channel", "stable"),
            ("release_notes", "test build"),
            ("created_by", "ci"),
        ];
        self.upload_form(&fields, binary).await
    }

    async fn upload_form(
        &self,
        fields: &[(&str, &str)],
        binary: &[u8],
    ) -> Result<(StatusCode, Value)> {
        self.send(
            Request::builder()
                .method("POST")
                .uri("/api/v1/ota/releases")
                .header(
                    header::CONTENT_TYPE,
                    format!("multipart/form-data; boundary={}", BOUNDARY),
                )
                .body(Body::from(multipart_body(fields, binary)))?,
        )
        .await
    }

    async fn release_id(&self, version: &str, binary: &[u8]) -> Result<String> {
        let (status, body) = self.upload(version, binary).await?;
        assert_eq!(status, StatusCode::CREATED, "{}", body);
        string_field(&body, "release_id")
    }

    async fn deploy(&self, release_id: &str, config: Value) -> Result<(StatusCode, Value)> {
        self.post_json(
            "/api/v1/ota/deployments",
            &json!({ "release_id": release_id, "config": config }),
        )
        .await
    }

    async fn report(
        &self,
        device_id: &str,
        release_id: &str,
        status: &str,
        progress: u8,
    ) -> Result<(StatusCode, Value)> {
        self.post_json(
            "/api/v1/ota/updates/status",
            &json!({
                "device_id": device_id,
                "release_id": release_id,
                "status": status,
                "progress": progress,
                "error_message": (status == "failed").then_some("flash write error"),
            }),
        )
        .await
    }
}

fn multipart_body(fields: &[(&str, &str)], binary: &[u8]) -> Vec<u8> {
    let mut body = Vec::new();
    for (name, value) in fields {
        body.extend_from_slice(
            format!(
                "--{}\r\nContent-Disposition: form-data; name=\"{}\"\r\n\r\n{}\r\n",
                BOUNDARY, name, value
            )
            .as_bytes(),
        );
    }
    body.extend_from_slice(
        format!(
            "--{}\r\nContent-Disposition: form-data; name=\"binary\"; filename=\"firmware.bin\"\r\nContent-Type: application/octet-stream\r\n\r\n",
            BOUNDARY
        )
        .as_bytes(),
    );
    body.extend_from_slice(binary);
    body.extend_from_slice(format!("\r\n--{}--\r\n", BOUNDARY).as_bytes());
    body
}

fn string_field(body: &Value, field: &str) -> Result<String> {
    body.get(field)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| anyhow!("missing '{}' in {}", field, body))
}

async fn app_with(config: RolloutConfig, public_url: bool) -> Result<TestApp> {
    let storage_dir = TempDir::new()?;
    let mut storage = LocalStorageBackend::new(storage_dir.path());
    if public_url {
        storage = storage.with_public_url("http://ota.test/api/v1/ota", "download-secret");
    }
    let storage = Arc::new(storage);

    let registry = InMemoryDeviceRegistry::with_devices(
        FLEET
            .iter()
            .map(|id| DeviceRecord::new(*id, "valve-controller", ReleaseChannel::Stable))
            .collect(),
    );

    let service = Arc::new(
        OtaService::builder()
            .storage(storage.clone())
            .registry(Arc::new(registry))
            .signer(Arc::new(Ed25519FirmwareSigner::generate()?))
            .config(config)
            .build()?,
    );
    let state = AppState::new(service.clone(), Arc::new(ApiMetrics::new()?)).with_binaries(storage);

    Ok(TestApp {
        router: router(state),
        service,
        _storage_dir: storage_dir,
    })
}

async fn app() -> Result<TestApp> {
    app_with(RolloutConfig::default(), false).await
}

#[tokio::test]
async fn test_health() -> Result<()> {
    let app = app().await?;
    let (status, body) = app.get("/api/v1/ota/health").await?;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["service"], "ota-service");
    assert_eq!(body["version"], env!("CARGO_PKG_VERSION"));
    Ok(())
}

#[tokio::test]
async fn test_release_lifecycle() -> Result<()> {
    let app = app().await?;

    let (status, created) = app.upload("1.4.0", b"valve firmware").await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(created["version"], "1.4.0");
    assert_eq!(created["channel"], "stable");
    assert_eq!(created["binary_size"], 14);
    let release_id = string_field(&created, "release_id")?;

    let (status, fetched) = app
        .get(&format!("/api/v1/ota/releases/{}", release_id))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(fetched, created);

    let (status, listed) = app
        .get("/api/v1/ota/releases?template_id=valve-controller&channel=stable")
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, verified) = app
        .post_json(
            &format!("/api/v1/ota/releases/{}/verify", release_id),
            &Value::Null,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(verified["verified"], true);

    let (status, deleted) = app
        .send(
            Request::builder()
                .method("DELETE")
                .uri(format!("/api/v1/ota/releases/{}", release_id))
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(deleted["message"], "release deleted");

    let (status, missing) = app
        .get(&format!("/api/v1/ota/releases/{}", release_id))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(missing["code"], "not_found");
    Ok(())
}

#[tokio::test]
async fn test_release_validation_errors() -> Result<()> {
    let app = app().await?;

    let (status, body) = app.upload("not-a-version", b"data").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = app.upload("1.0.0", b"").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    // no channel field: never defaulted to the production channel
    let (status, body) = app
        .upload_form(
            &[
                ("template_id", "valve-controller"),
                ("version", "1.0.0"),
                ("created_by", "ci"),
            ],
            b"data",
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    let stable = app
        .service
        .releases()
        .list_releases("valve-controller", ReleaseChannel::Stable)
        .await?;
    assert!(stable.is_empty());

    let (status, body) = app
        .get("/api/v1/ota/releases?template_id=valve-controller")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, _) = app
        .get("/api/v1/ota/releases?template_id=valve-controller&channel=nightly")
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_device_polls_and_completes() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("2.0.0", b"image-v2").await?;

    let (status, deployment) = app
        .deploy(&release_id, json!({ "strategy": "immediate" }))
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deployment["status"], "active");
    assert_eq!(deployment["failure_threshold"], 10);
    let deployment_id = string_field(&deployment, "deployment_id")?;

    for device in FLEET {
        let (status, update) = app.get(&format!("/api/v1/ota/updates/{}", device)).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(update["release_id"], release_id.as_str());
        assert!(
            update["binary_url"]
                .as_str()
                .is_some_and(|url| url.starts_with("file://"))
        );

        let (status, body) = app.report(device, &release_id, "completed", 100).await?;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["message"], "status updated");
    }

    let (status, report) = app
        .get(&format!(
            "/api/v1/ota/deployments/{}?status=true",
            deployment_id
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(report["status"], "completed");
    assert_eq!(report["completed_count"], 3);
    assert_eq!(report["progress_percentage"], 100);

    let (status, update) = app.get("/api/v1/ota/updates/valve-1").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(update["code"], "no_pending_update");
    Ok(())
}

#[tokio::test]
async fn test_no_pending_update_is_distinct_from_not_found() -> Result<()> {
    let app = app().await?;

    let (status, body) = app.get("/api/v1/ota/updates/unknown-device").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(
        body,
        json!({ "error": "no pending update", "code": "no_pending_update" })
    );

    let (status, body) = app.get("/api/v1/ota/deployments/does-not-exist").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");
    Ok(())
}

#[tokio::test]
async fn test_pause_gates_delivery() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("2.1.0", b"image").await?;
    let (_, deployment) = app
        .deploy(&release_id, json!({ "strategy": "immediate" }))
        .await?;
    let deployment_id = string_field(&deployment, "deployment_id")?;

    let (status, paused) = app
        .put(&format!("/api/v1/ota/deployments/{}/pause", deployment_id))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(paused["status"], "paused");

    let (status, body) = app.get("/api/v1/ota/updates/valve-2").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "no_pending_update");

    let (status, _) = app
        .put(&format!("/api/v1/ota/deployments/{}/pause", deployment_id))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    let (status, resumed) = app
        .put(&format!("/api/v1/ota/deployments/{}/resume", deployment_id))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(resumed["status"], "active");

    let (status, _) = app.get("/api/v1/ota/updates/valve-2").await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_canary_requires_activation() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("3.0.0", b"canary").await?;

    let (status, deployment) = app
        .deploy(
            &release_id,
            json!({ "strategy": "canary", "target_devices": ["valve-3"] }),
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(deployment["status"], "pending");
    assert_eq!(deployment["target_devices"], json!(["valve-3"]));
    let deployment_id = string_field(&deployment, "deployment_id")?;

    let (status, _) = app.get("/api/v1/ota/updates/valve-3").await?;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, active) = app
        .put(&format!("/api/v1/ota/deployments/{}/activate", deployment_id))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(active["status"], "active");

    let (_, listed) = app.get("/api/v1/ota/deployments/active").await?;
    assert_eq!(listed.as_array().map(Vec::len), Some(1));

    let (status, _) = app.get("/api/v1/ota/updates/valve-3").await?;
    assert_eq!(status, StatusCode::OK);
    Ok(())
}

#[tokio::test]
async fn test_deployment_validation() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("1.0.0", b"image").await?;

    let (status, body) = app
        .deploy(
            &release_id,
            json!({ "strategy": "staged", "rollout_percentage": 150 }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = app
        .post_json("/api/v1/ota/deployments", &json!({ "release_id": release_id }))
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = app
        .deploy("missing-release", json!({ "strategy": "immediate" }))
        .await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, _) = app.get("/api/v1/ota/deployments").await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    Ok(())
}

#[tokio::test]
async fn test_failure_threshold_and_manual_rollback() -> Result<()> {
    let app = app().await?;
    let old_release = app.release_id("1.0.0", b"stable image").await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let new_release = app.release_id("1.1.0", b"broken image").await?;

    let (_, deployment) = app
        .deploy(
            &new_release,
            json!({ "strategy": "immediate", "failure_threshold": 30 }),
        )
        .await?;
    let deployment_id = string_field(&deployment, "deployment_id")?;

    let (status, _) = app.report("valve-1", &new_release, "failed", 40).await?;
    assert_eq!(status, StatusCode::OK);

    let (_, current) = app
        .get(&format!("/api/v1/ota/deployments/{}", deployment_id))
        .await?;
    assert_eq!(current["status"], "failed");
    assert_eq!(current["failure_count"], 1);

    let (status, failed) = app
        .get(&format!(
            "/api/v1/ota/deployments/{}/devices?status=failed",
            deployment_id
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(failed.as_array().map(Vec::len), Some(1));
    assert_eq!(failed[0]["error_message"], "flash write error");

    let (status, replacement) = app
        .post_json(
            &format!("/api/v1/ota/deployments/{}/rollback", deployment_id),
            &Value::Null,
        )
        .await?;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(replacement["release_id"], old_release.as_str());
    assert_eq!(replacement["strategy"], "immediate");

    let (status, update) = app.get("/api/v1/ota/updates/valve-1").await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(update["release_id"], old_release.as_str());

    let (status, body) = app
        .post_json(
            &format!("/api/v1/ota/deployments/{}/rollback", deployment_id),
            &Value::Null,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    Ok(())
}

#[tokio::test]
async fn test_rollback_without_older_release() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("1.0.0", b"only image").await?;
    let (_, deployment) = app
        .deploy(&release_id, json!({ "strategy": "immediate" }))
        .await?;
    let deployment_id = string_field(&deployment, "deployment_id")?;

    let (status, body) = app
        .post_json(
            &format!("/api/v1/ota/deployments/{}/rollback", deployment_id),
            &Value::Null,
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    Ok(())
}

#[tokio::test]
async fn test_status_report_validation() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("1.0.0", b"image").await?;
    app.deploy(&release_id, json!({ "strategy": "immediate" }))
        .await?;

    let (status, body) = app.report("valve-1", &release_id, "downloading", 101).await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");

    let (status, body) = app.report("valve-9", &release_id, "downloading", 10).await?;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "not_found");

    let (status, body) = app
        .post_json(
            "/api/v1/ota/updates/status",
            &json!({ "device_id": "valve-1", "release_id": release_id, "status": "rebooting" }),
        )
        .await?;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "validation");
    Ok(())
}

#[tokio::test]
async fn test_pending_devices_listing() -> Result<()> {
    let app = app().await?;
    let release_id = app.release_id("1.0.0", b"image").await?;
    let (_, deployment) = app
        .deploy(&release_id, json!({ "strategy": "immediate" }))
        .await?;
    let deployment_id = string_field(&deployment, "deployment_id")?;

    app.report("valve-1", &release_id, "downloading", 20).await?;

    let (status, pending) = app
        .get(&format!(
            "/api/v1/ota/deployments/{}/devices/pending?limit=10",
            deployment_id
        ))
        .await?;
    assert_eq!(status, StatusCode::OK);
    let mut pending: Vec<String> = serde_json::from_value(pending)?;
    pending.sort();
    assert_eq!(pending, vec!["valve-2".to_string(), "valve-3".to_string()]);

    let (status, all) = app
        .get(&format!("/api/v1/ota/deployments/{}/devices", deployment_id))
        .await?;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(all.as_array().map(Vec::len), Some(3));
    Ok(())
}

#[tokio::test]
async fn test_signed_download() -> Result<()> {
    let app = app_with(RolloutConfig::default(), true).await?;
    let firmware = b"signed download payload".to_vec();
    let release_id = app.release_id("4.0.0", &firmware).await?;
    app.deploy(&release_id, json!({ "strategy": "immediate" }))
        .await?;

    let (_, update) = app.get("/api/v1/ota/updates/valve-1").await?;
    let url = string_field(&update, "binary_url")?;
    let local = url
        .strip_prefix("http://ota.test")
        .ok_or_else(|| anyhow!("unexpected download url {}", url))?
        .to_string();

    let response = app
        .router
        .clone()
        .oneshot(Request::builder().uri(&local).body(Body::empty())?)
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await?;
    assert_eq!(bytes.as_ref(), firmware.as_slice());

    let tampered = local.replace("token=", "token=00");
    let (status, body) = app.get(&tampered).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "forbidden");

    let expired = format!(
        "/api/v1/ota/binaries/{}/firmware.bin?expires=1&token=abc",
        release_id
    );
    let (status, _) = app.get(&expired).await?;
    assert_eq!(status, StatusCode::FORBIDDEN);
    Ok(())
}

#[tokio::test]
async fn test_auto_rollback_through_reports() -> Result<()> {
    let app = app_with(RolloutConfig::default().with_auto_rollback(true), false).await?;
    let old_release = app.release_id("5.0.0", b"good").await?;
    tokio::time::sleep(std::time::Duration::from_millis(5)).await;
    let new_release = app.release_id("5.1.0", b"bad").await?;
    app.deploy(
        &new_release,
        json!({ "strategy": "immediate", "failure_threshold": 50 }),
    )
    .await?;

    app.report("valve-1", &new_release, "failed", 0).await?;
    let (status, _) = app.report("valve-2", &new_release, "failed", 0).await?;
    assert_eq!(status, StatusCode::OK);

    let active = app.service.planner().get_active_deployments().await?;
    assert_eq!(active.len(), 1);
    assert_eq!(
        active.first().map(|d| d.release_id.as_str()),
        Some(old_release.as_str())
    );
    Ok(())
}

#[tokio::test]
async fn test_metrics_endpoint() -> Result<()> {
    let app = app().await?;
    app.get("/api/v1/ota/health").await?;
    app.release_id("1.0.0", b"metrics").await?;

    let response = app
        .router
        .clone()
        .oneshot(
            Request::builder()
                .uri("/api/v1/ota/metrics")
                .body(Body::empty())?,
        )
        .await?;
    assert_eq!(response.status(), StatusCode::OK);
    let text = String::from_utf8(to_bytes(response.into_body(), usize::MAX).await?.to_vec())?;

    assert!(text.contains("ota_releases_created_total 1"));
    assert!(text.contains("ota_http_requests_total"));
    assert!(text.contains("/health\""));
    Ok(())
}
