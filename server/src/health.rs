//! The HTTP health check server.

use chef_model::store::Connection;
use serde_json::json;
use tide::{Request, Response, StatusCode};

pub const RUNNING: &str = "Cooking Bot is running OK";

pub fn app(store: Connection) -> tide::Server<Connection> {
    let mut app = tide::with_state(store);
    app.at("/").get(health);
    app.at("/health").get(health);
    app.at("/db-health").get(db_health);
    app
}

pub async fn serve(port: u16, store: Connection) -> Result<(), anyhow::Error> {
    let addr = format!("0.0.0.0:{port}");
    tracing::info!(%addr, "health server listening");
    app(store).listen(addr).await?;
    Ok(())
}

async fn health(_req: Request<Connection>) -> tide::Result<&'static str> {
    Ok(RUNNING)
}

/// Check that storage answers a statistics query.
async fn db_health(req: Request<Connection>) -> tide::Result<Response> {
    let res = match req.state().stats().await {
        Ok(stats) => Response::builder(StatusCode::Ok).body(json!({
            "status": "healthy",
            "database": "connected",
            "stats": stats,
        })),
        Err(err) => {
            tracing::error!("storage health check failed: {err:#}");
            Response::builder(StatusCode::InternalServerError).body(json!({
                "status": "unhealthy",
                "database": "disconnected",
                "error": err.to_string(),
            }))
        }
    };
    Ok(res.build())
}
