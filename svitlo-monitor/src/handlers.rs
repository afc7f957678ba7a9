use std::future::ready;

use axum::{routing::get, Router};
use eyre::Result;
use svitlo_common::health::HealthRegistry;
use tokio::net::TcpListener;

pub async fn listen(app: Router, bind: String) -> Result<()> {
    let listener = TcpListener::bind(bind).await?;

    axum::serve(listener, app).await?;

    Ok(())
}

pub fn app(liveness: HealthRegistry) -> Router {
    Router::new()
        .route("/", get(index))
        .route("/_readiness", get(index))
        .route("/_liveness", get(move || ready(liveness.get_status())))
}

pub async fn index() -> &'static str {
    "svitlo monitor"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    async fn spawn_app(liveness: HealthRegistry) -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move { axum::serve(listener, app(liveness)).await });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn index_and_readiness() {
        let base = spawn_app(HealthRegistry::new("liveness")).await;

        for path in ["/", "/_readiness"] {
            let response = reqwest::get(format!("{base}{path}")).await.unwrap();
            assert_eq!(response.status(), 200);
            assert_eq!(response.text().await.unwrap(), "svitlo monitor");
        }
    }

    #[tokio::test]
    async fn liveness_follows_registry() {
        let liveness = HealthRegistry::new("liveness");
        let poller = liveness.register("poller".to_string(), Duration::from_secs(60));
        let base = spawn_app(liveness).await;

        let response = reqwest::get(format!("{base}/_liveness")).await.unwrap();
        assert_eq!(response.status(), 500);

        poller.report_healthy();
        let response = reqwest::get(format!("{base}/_liveness")).await.unwrap();
        assert_eq!(response.status(), 200);
    }
}
