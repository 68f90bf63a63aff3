use serde_json::Value;

use super::{api_client, api_error_message, friendly_error};

/// Manually restart one worker.
pub async fn run(api_url: &str, worker: &str) -> anyhow::Result<()> {
    let resp = api_client()
        .post(format!("{api_url}/api/workers/{worker}/restart"))
        .send()
        .await
        .map_err(friendly_error)?;

    let status = resp.status();
    let body: Value = resp.json().await.map_err(friendly_error)?;

    if status.is_success() {
        println!("Worker restarted: {worker}");
        Ok(())
    } else {
        anyhow::bail!(
            "Failed to restart {worker}: {} (HTTP {status})",
            api_error_message(&body)
        );
    }
}

#[cfg(test)]
mod tests {
    use axum::{extract::Path, http::StatusCode, routing::post, Json, Router};
    use serde_json::json;

    use super::*;

    #[tokio::test]
    async fn restart_hits_worker_route() {
        let app = Router::new().route(
            "/api/workers/{name}/restart",
            post(|Path(name): Path<String>| async move {
                if name == "refiner" {
                    (StatusCode::OK, Json(json!({"restarted": name})))
                } else {
                    (
                        StatusCode::NOT_FOUND,
                        Json(json!({"error": format!("unknown worker: {name}")})),
                    )
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });
        let base = format!("http://{addr}");

        assert!(run(&base, "refiner").await.is_ok());
        let err = run(&base, "ghost").await.unwrap_err();
        assert!(err.to_string().contains("unknown worker: ghost"));
    }
}
