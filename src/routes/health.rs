use axum::{response::IntoResponse, response::Json};
use serde::{Deserialize, Serialize};

#[derive(Serialize, Deserialize, Debug, PartialEq, Eq)]
pub struct Health {
    pub status: String,
    pub version: String,
}

pub async fn healthcheck() -> impl IntoResponse {
    Json(Health {
        status: "Available".into(),
        version: env!("CARGO_PKG_VERSION").into(),
    })
}
