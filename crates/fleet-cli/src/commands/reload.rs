use serde_json::Value;

use super::{api_client, api_error_message, friendly_error};

/// Ask the daemon to re-read its configuration file.
pub async fn run(api_url: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .post(format!("{api_url}/api/reload"))
        .send()
        .await
        .map_err(friendly_error)?;

    let status = resp.status();
    let body: Value = resp.json().await.map_err(friendly_error)?;

    if status.is_success() {
        let version = body["version"].as_u64().unwrap_or(0);
        println!("Configuration reloaded (version {version})");
        Ok(())
    } else {
        anyhow::bail!("Reload rejected: {} (HTTP {status})", api_error_message(&body));
    }
}

#[cfg(test)]
mod tests {
    use axum::{http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    use super::*;

    async fn serve(app: Router) -> String {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn reload_succeeds() {
        let app = Router::new().route(
            "/api/reload",
            post(|| async { Json(json!({"version": 3, "loaded_at": "2026-01-01T00:00:00Z"})) }),
        );
        assert!(run(&serve(app).await).await.is_ok());
    }

    #[tokio::test]
    async fn reload_surfaces_validation_error() {
        let app = Router::new().route(
            "/api/reload",
            post(|| async {
                (
                    StatusCode::BAD_REQUEST,
                    Json(json!({"error": "validation: task_list contains duplicate entry 'a'"})),
                )
            }),
        );
        let err = run(&serve(app).await).await.unwrap_err();
        assert!(err.to_string().contains("duplicate entry 'a'"));
        assert!(err.to_string().contains("400"));
    }

    #[tokio::test]
    async fn reload_reports_unreachable_daemon() {
        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);

        let err = run(&format!("http://{addr}")).await.unwrap_err();
        assert!(err.to_string().contains("Could not connect"));
    }
}
