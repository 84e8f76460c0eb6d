//! 文章发布与 PocketBase 数据浏览

use axum::{
    extract::{Path, State},
    response::Response,
    Json,
};
use serde::Deserialize;
use serde_json::Value;
use wordcast_services::publish_service::{
    ArticleListing, CollectionListing, DeleteResult, PublishResult, SchemaListing, ARTICLES_COLLECTION,
};
use wordcast_server_utils::{passthrough_response, ApiResult};

use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct SchemaBody {
    #[serde(default = "default_collection")]
    pub collection: String,
}

fn default_collection() -> String {
    ARTICLES_COLLECTION.to_string()
}

pub async fn schema(State(state): State<AppState>, Json(body): Json<SchemaBody>) -> ApiResult<Json<SchemaListing>> {
    Ok(Json(state.publish.schema(&body.collection).await?))
}

pub async fn publish(State(state): State<AppState>, Json(payload): Json<Value>) -> ApiResult<Json<PublishResult>> {
    Ok(Json(state.publish.publish(&payload).await?))
}

pub async fn list_articles(State(state): State<AppState>) -> ApiResult<Json<ArticleListing>> {
    Ok(Json(state.publish.list_articles().await?))
}

pub async fn delete_article(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> ApiResult<Json<DeleteResult>> {
    Ok(Json(state.publish.delete_article(&id).await?))
}

pub async fn test_connection(State(state): State<AppState>) -> Json<Value> {
    Json(state.publish.test_connection().await)
}

pub async fn collections(State(state): State<AppState>) -> Json<CollectionListing> {
    Json(state.publish.collections().await)
}

pub async fn collection_records(
    State(state): State<AppState>,
    Path(name): Path<String>,
) -> ApiResult<Response> {
    let response = state.publish.collection_records(&name).await?;
    Ok(passthrough_response(response.status, response.body))
}
