use std::net::SocketAddr;
use std::path::PathBuf;

use anyhow::Result;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Path, Query, Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, patch, post};
use axum::{Json, Router};
use clap::Parser;
use serde::Deserialize;
use serde_json::{json, Value};
use shopper_api::{ApiError, ItemPatch, NewItem, ShopperApi};
use shopper_core::{ItemId, ListEntry};

const API_KEY_HEADER: &str = "x-api-key";
const DEFAULT_API_KEY: &str = "dev-key-local-only";

#[derive(Debug, Clone)]
struct ServiceState {
    api: ShopperApi,
    api_key: String,
}

#[derive(Debug)]
struct ApiFailure {
    status: StatusCode,
    message: String,
}

impl ApiFailure {
    fn bad_request(message: impl Into<String>) -> Self {
        Self { status: StatusCode::BAD_REQUEST, message: message.into() }
    }

    fn not_found(message: impl Into<String>) -> Self {
        Self { status: StatusCode::NOT_FOUND, message: message.into() }
    }
}

impl IntoResponse for ApiFailure {
    fn into_response(self) -> Response {
        (self.status, Json(json!({ "error": self.message }))).into_response()
    }
}

impl From<ApiError> for ApiFailure {
    fn from(err: ApiError) -> Self {
        match err {
            ApiError::Domain(domain) => Self::bad_request(domain.to_string()),
            ApiError::Storage(storage) => {
                tracing::error!(error = %storage, "storage failure while serving request");
                Self {
                    status: StatusCode::INTERNAL_SERVER_ERROR,
                    message: storage.to_string(),
                }
            }
        }
    }
}

#[derive(Debug, Parser)]
#[command(name = "shopper-service")]
#[command(about = "HTTP API for the Shopper shopping-list store")]
struct Args {
    #[arg(long, default_value = "./data/db.json")]
    db: PathBuf,
    #[arg(long, default_value = "127.0.0.1:4020")]
    bind: SocketAddr,
    /// API key required in the x-api-key header; falls back to the
    /// SHOPPER_API_KEY environment variable, then a local-dev default.
    #[arg(long)]
    api_key: Option<String>,
}

fn resolve_api_key(flag: Option<String>) -> String {
    flag.or_else(|| std::env::var("SHOPPER_API_KEY").ok())
        .unwrap_or_else(|| DEFAULT_API_KEY.to_string())
}

fn app(state: ServiceState) -> Router {
    let protected = Router::new()
        .route("/items", get(items_index).post(items_create))
        .route("/items/:id", get(items_show).patch(items_update).delete(items_delete))
        .route("/items/:id/inventory", post(inventory_create))
        .route("/list", get(list_index).post(list_add).delete(list_remove))
        .route("/list/:item_id/picked", patch(list_set_flags))
        .route_layer(middleware::from_fn_with_state(state.clone(), require_api_key));

    Router::new()
        .route("/health", get(health))
        .route("/docs", get(docs))
        .merge(protected)
        .with_state(state)
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let state = ServiceState {
        api: ShopperApi::new(args.db),
        api_key: resolve_api_key(args.api_key),
    };

    let listener = tokio::net::TcpListener::bind(args.bind).await?;
    tracing::info!(bind = %args.bind, "shopper-service listening");
    axum::serve(listener, app(state)).await?;
    Ok(())
}

// Rejects before any record-store call when the presented key is missing or
// wrong; public routes never pass through this layer.
async fn require_api_key(State(state): State<ServiceState>, request: Request, next: Next) -> Response {
    let presented = request.headers().get(API_KEY_HEADER).and_then(|value| value.to_str().ok());
    if presented != Some(state.api_key.as_str()) {
        return (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Missing or invalid x-api-key header" })),
        )
            .into_response();
    }
    next.run(request).await
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn docs() -> Json<Value> {
    Json(json!({
        "title": "Shopper API",
        "description": "All endpoints except /health and /docs require the header x-api-key. Set SHOPPER_API_KEY in the environment; for local dev the default is dev-key-local-only.",
        "endpoints": [
            { "method": "GET", "path": "/items", "description": "List all items", "response": { "items": "Item[]" } },
            { "method": "POST", "path": "/items", "description": "Create an item", "body": { "name": "string", "category": "string (optional)", "defaultStore": "string (optional)" }, "response": { "item": "Item" } },
            { "method": "GET", "path": "/items/:id", "description": "Get one item by id", "response": { "item": "Item" } },
            { "method": "PATCH", "path": "/items/:id", "description": "Update item name, category, or defaultStore", "body": { "name": "string (optional)", "category": "string (optional)", "defaultStore": "string (optional)" }, "response": { "item": "Item" } },
            { "method": "DELETE", "path": "/items/:id", "description": "Delete an item (and remove from list, clear inventory notes)", "response": { "deleted": true } },
            { "method": "POST", "path": "/items/:id/inventory", "description": "Add an inventory note for an item (e.g. \"5 packets\", \"Plenty\")", "body": { "note": "string" }, "response": { "note": "InventoryNote" } },
            { "method": "GET", "path": "/list", "description": "Get the shopping list (all list entries with item details)", "response": { "list": "(Item & ListEntry)[]" } },
            { "method": "POST", "path": "/list", "description": "Add an item to the shopping list", "body": { "itemId": "string" }, "response": { "entry": "ListEntry" } },
            { "method": "DELETE", "path": "/list?itemId=:itemId", "description": "Remove an item from the list", "response": { "removed": true } },
            { "method": "PATCH", "path": "/list/:itemId/picked", "description": "Mark item as picked up and/or unavailable", "body": { "pickedUp": "boolean (optional)", "unavailable": "boolean (optional)" }, "response": { "entry": "ListEntry" } }
        ],
        "types": {
            "Item": { "id": "string", "name": "string", "category": "string | null", "defaultStore": "string | null", "createdAt": "string" },
            "ListEntry": { "itemId": "string", "pickedUp": "boolean", "unavailable": "boolean", "addedAt": "string" },
            "InventoryNote": { "id": "string", "itemId": "string", "note": "string", "createdAt": "string" }
        }
    }))
}

fn parse_item_id(raw: &str) -> Result<ItemId, ApiFailure> {
    // A malformed id cannot reference any record, so it reads as absent.
    raw.parse::<ItemId>().map_err(|_| ApiFailure::not_found("Item not found"))
}

fn json_body(body: Result<Json<Value>, JsonRejection>) -> Result<Value, ApiFailure> {
    match body {
        Ok(Json(value)) => Ok(value),
        Err(_) => Err(ApiFailure::bad_request("Invalid JSON body")),
    }
}

fn optional_text(body: &Value, key: &str) -> Option<String> {
    body.get(key).and_then(Value::as_str).map(str::to_string)
}

async fn items_index(State(state): State<ServiceState>) -> Result<Json<Value>, ApiFailure> {
    let items = state.api.list_items()?;
    Ok(Json(json!({ "items": items })))
}

async fn items_create(
    State(state): State<ServiceState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiFailure> {
    let body = json_body(body)?;
    let Some(name) = body.get("name").and_then(Value::as_str) else {
        return Err(ApiFailure::bad_request("Body must include name (string)"));
    };

    let item = state.api.create_item(NewItem {
        name: name.to_string(),
        category: optional_text(&body, "category"),
        default_store: optional_text(&body, "defaultStore"),
    })?;
    Ok(Json(json!({ "item": item })))
}

async fn items_show(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiFailure> {
    let id = parse_item_id(&id)?;
    let item = state.api.get_item(id)?.ok_or_else(|| ApiFailure::not_found("Item not found"))?;
    Ok(Json(json!({ "item": item })))
}

async fn items_update(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiFailure> {
    let id = parse_item_id(&id)?;
    let body = json_body(body)?;

    let patch = ItemPatch {
        name: optional_text(&body, "name"),
        category: optional_text(&body, "category"),
        default_store: optional_text(&body, "defaultStore"),
    };
    let item =
        state.api.update_item(id, patch)?.ok_or_else(|| ApiFailure::not_found("Item not found"))?;
    Ok(Json(json!({ "item": item })))
}

async fn items_delete(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
) -> Result<Json<Value>, ApiFailure> {
    let id = parse_item_id(&id)?;
    if !state.api.delete_item(id)? {
        return Err(ApiFailure::not_found("Item not found"));
    }
    Ok(Json(json!({ "deleted": true })))
}

async fn inventory_create(
    State(state): State<ServiceState>,
    Path(id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiFailure> {
    let id = parse_item_id(&id)?;
    let body = json_body(body)?;
    let Some(note) = body.get("note").and_then(Value::as_str) else {
        return Err(ApiFailure::bad_request("Body must include note (string)"));
    };

    let note = state
        .api
        .add_inventory_note(id, note)?
        .ok_or_else(|| ApiFailure::not_found("Item not found"))?;
    Ok(Json(json!({ "note": note })))
}

async fn list_index(State(state): State<ServiceState>) -> Result<Json<Value>, ApiFailure> {
    let entries = state.api.get_list()?;
    Ok(Json(json!({ "list": entries })))
}

async fn list_add(
    State(state): State<ServiceState>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiFailure> {
    let body = json_body(body)?;
    let Some(item_id) = body.get("itemId").and_then(Value::as_str) else {
        return Err(ApiFailure::bad_request("Body must include itemId"));
    };

    let id = parse_item_id(item_id)?;
    let entry =
        state.api.add_to_list(id)?.ok_or_else(|| ApiFailure::not_found("Item not found"))?;
    Ok(Json(json!({ "entry": entry })))
}

#[derive(Debug, Deserialize)]
struct RemoveParams {
    #[serde(rename = "itemId")]
    item_id: Option<String>,
}

async fn list_remove(
    State(state): State<ServiceState>,
    Query(params): Query<RemoveParams>,
) -> Result<Json<Value>, ApiFailure> {
    let Some(item_id) = params.item_id else {
        return Err(ApiFailure::bad_request("Query param itemId required"));
    };

    let id = item_id
        .parse::<ItemId>()
        .map_err(|_| ApiFailure::not_found("Not on list or not found"))?;
    if !state.api.remove_from_list(id)? {
        return Err(ApiFailure::not_found("Not on list or not found"));
    }
    Ok(Json(json!({ "removed": true })))
}

async fn list_set_flags(
    State(state): State<ServiceState>,
    Path(item_id): Path<String>,
    body: Result<Json<Value>, JsonRejection>,
) -> Result<Json<Value>, ApiFailure> {
    let id =
        item_id.parse::<ItemId>().map_err(|_| ApiFailure::not_found("Item not on list"))?;
    let body = json_body(body)?;

    let picked_up = body.get("pickedUp").and_then(Value::as_bool);
    let unavailable = body.get("unavailable").and_then(Value::as_bool);
    if picked_up.is_none() && unavailable.is_none() {
        return Err(ApiFailure::bad_request(
            "Body must include pickedUp or unavailable (boolean)",
        ));
    }

    let mut updated: Option<ListEntry> = None;
    if let Some(picked_up) = picked_up {
        updated = state.api.set_picked_up(id, picked_up)?;
        if updated.is_none() {
            return Err(ApiFailure::not_found("Item not on list"));
        }
    }
    if let Some(unavailable) = unavailable {
        updated = state.api.set_unavailable(id, unavailable)?;
    }

    let entry = updated.ok_or_else(|| ApiFailure::not_found("Item not on list"))?;
    Ok(Json(json!({ "entry": entry })))
}

#[cfg(test)]
mod tests {
    use axum::body::{to_bytes, Body};
    use http::Request;
    use tower::ServiceExt;

    use super::*;

    const TEST_KEY: &str = "test-key";

    fn unique_temp_db_path() -> PathBuf {
        std::env::temp_dir().join(format!("shopper-service-{}.json", ulid::Ulid::new()))
    }

    fn test_router(db_path: PathBuf) -> Router {
        app(ServiceState { api: ShopperApi::new(db_path), api_key: TEST_KEY.to_string() })
    }

    fn request(method: &str, uri: &str, body: Option<Value>) -> Request<Body> {
        let builder = Request::builder()
            .uri(uri)
            .method(method)
            .header(API_KEY_HEADER, TEST_KEY)
            .header("content-type", "application/json");
        let body = match body {
            Some(value) => Body::from(value.to_string()),
            None => Body::empty(),
        };
        builder.body(body).unwrap_or_else(|err| panic!("failed to build request: {err}"))
    }

    async fn send(router: &Router, req: Request<Body>) -> Response {
        router
            .clone()
            .oneshot(req)
            .await
            .unwrap_or_else(|err| panic!("router request failed: {err}"))
    }

    async fn response_json(response: Response) -> Value {
        let bytes = match to_bytes(response.into_body(), 1024 * 1024).await {
            Ok(bytes) => bytes,
            Err(err) => panic!("failed to read response body: {err}"),
        };
        let body = match String::from_utf8(bytes.to_vec()) {
            Ok(body) => body,
            Err(err) => panic!("response body is not UTF-8: {err}"),
        };
        match serde_json::from_str(&body) {
            Ok(value) => value,
            Err(err) => panic!("response body is not JSON: {err}; body={body}"),
        }
    }

    fn field<'a>(value: &'a Value, pointer: &str) -> &'a Value {
        value
            .pointer(pointer)
            .unwrap_or_else(|| panic!("missing field `{pointer}` in response: {value}"))
    }

    #[tokio::test]
    async fn health_endpoint_is_public() {
        let router = test_router(unique_temp_db_path());

        let req = Request::builder()
            .uri("/health")
            .method("GET")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        let response = send(&router, req).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(field(&value, "/status").as_str(), Some("ok"));
    }

    #[tokio::test]
    async fn docs_endpoint_is_public_and_lists_routes() {
        let router = test_router(unique_temp_db_path());

        let req = Request::builder()
            .uri("/docs")
            .method("GET")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        let response = send(&router, req).await;
        assert_eq!(response.status(), StatusCode::OK);

        let value = response_json(response).await;
        assert_eq!(field(&value, "/title").as_str(), Some("Shopper API"));
        let endpoints = field(&value, "/endpoints")
            .as_array()
            .unwrap_or_else(|| panic!("endpoints should be an array"));
        assert!(endpoints.iter().any(|endpoint| {
            endpoint.get("path").and_then(Value::as_str) == Some("/list/:itemId/picked")
        }));
    }

    #[tokio::test]
    async fn missing_or_wrong_api_key_is_rejected_before_the_store() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let missing = Request::builder()
            .uri("/items")
            .method("GET")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        let response = send(&router, missing).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
        let value = response_json(response).await;
        assert_eq!(
            field(&value, "/error").as_str(),
            Some("Missing or invalid x-api-key header")
        );

        let wrong = Request::builder()
            .uri("/items")
            .method("GET")
            .header(API_KEY_HEADER, "nope")
            .body(Body::empty())
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        let response = send(&router, wrong).await;
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn create_without_name_is_rejected() {
        let router = test_router(unique_temp_db_path());

        let response =
            send(&router, request("POST", "/items", Some(json!({ "category": "Produce" })))).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert_eq!(field(&value, "/error").as_str(), Some("Body must include name (string)"));
    }

    #[tokio::test]
    async fn malformed_json_body_is_a_bad_request() {
        let router = test_router(unique_temp_db_path());

        let req = Request::builder()
            .uri("/items")
            .method("POST")
            .header(API_KEY_HEADER, TEST_KEY)
            .header("content-type", "application/json")
            .body(Body::from("{ not json"))
            .unwrap_or_else(|err| panic!("failed to build request: {err}"));
        let response = send(&router, req).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert_eq!(field(&value, "/error").as_str(), Some("Invalid JSON body"));
    }

    #[tokio::test]
    async fn unknown_item_routes_answer_not_found() {
        let router = test_router(unique_temp_db_path());
        let unknown = ItemId::new().to_string();

        for (method, uri) in [
            ("GET", format!("/items/{unknown}")),
            ("DELETE", format!("/items/{unknown}")),
            ("GET", "/items/not-a-ulid".to_string()),
        ] {
            let response = send(&router, request(method, &uri, None)).await;
            assert_eq!(response.status(), StatusCode::NOT_FOUND, "{method} {uri}");
        }

        let response =
            send(&router, request("PATCH", &format!("/items/{unknown}"), Some(json!({})))).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn patch_picked_requires_a_boolean_flag() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        let created =
            send(&router, request("POST", "/items", Some(json!({ "name": "Milk" })))).await;
        let created = response_json(created).await;
        let id = field(&created, "/item/id")
            .as_str()
            .unwrap_or_else(|| panic!("item id should be a string"))
            .to_string();
        let _ = send(&router, request("POST", "/list", Some(json!({ "itemId": id })))).await;

        let response = send(
            &router,
            request("PATCH", &format!("/list/{id}/picked"), Some(json!({ "pickedUp": "yes" }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);

        let response = send(
            &router,
            request("PATCH", "/list/not-a-ulid/picked", Some(json!({ "pickedUp": true }))),
        )
        .await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let value = response_json(response).await;
        assert_eq!(field(&value, "/error").as_str(), Some("Item not on list"));

        let response = send(
            &router,
            request(
                "PATCH",
                &format!("/list/{id}/picked"),
                Some(json!({ "pickedUp": true, "unavailable": true })),
            ),
        )
        .await;
        assert_eq!(response.status(), StatusCode::OK);
        let value = response_json(response).await;
        assert_eq!(field(&value, "/entry/pickedUp").as_bool(), Some(true));
        assert_eq!(field(&value, "/entry/unavailable").as_bool(), Some(true));

        let _ = std::fs::remove_file(&db_path);
    }

    #[tokio::test]
    async fn list_remove_requires_the_item_id_param() {
        let router = test_router(unique_temp_db_path());

        let response = send(&router, request("DELETE", "/list", None)).await;
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let value = response_json(response).await;
        assert_eq!(field(&value, "/error").as_str(), Some("Query param itemId required"));

        let unknown = ItemId::new();
        let response = send(&router, request("DELETE", &format!("/list?itemId={unknown}"), None)).await;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn bananas_lifecycle_round_trips_through_every_surface() {
        let db_path = unique_temp_db_path();
        let router = test_router(db_path.clone());

        // Create: trimmed fields, generated id and timestamp, null defaultStore.
        let created = send(
            &router,
            request("POST", "/items", Some(json!({ "name": "Bananas", "category": "Produce" }))),
        )
        .await;
        assert_eq!(created.status(), StatusCode::OK);
        let created = response_json(created).await;
        assert_eq!(field(&created, "/item/name").as_str(), Some("Bananas"));
        assert_eq!(field(&created, "/item/category").as_str(), Some("Produce"));
        assert!(field(&created, "/item/defaultStore").is_null());
        let id = field(&created, "/item/id")
            .as_str()
            .unwrap_or_else(|| panic!("item id should be a string"))
            .to_string();

        // On the list with both flags down.
        let added = send(&router, request("POST", "/list", Some(json!({ "itemId": id })))).await;
        assert_eq!(added.status(), StatusCode::OK);
        let listed = response_json(send(&router, request("GET", "/list", None)).await).await;
        let list = field(&listed, "/list")
            .as_array()
            .unwrap_or_else(|| panic!("list should be an array"));
        assert_eq!(list.len(), 1);
        assert_eq!(list[0].get("pickedUp").and_then(Value::as_bool), Some(false));
        assert_eq!(list[0].get("unavailable").and_then(Value::as_bool), Some(false));

        // Inventory note round trip.
        let noted = send(
            &router,
            request("POST", &format!("/items/{id}/inventory"), Some(json!({ "note": "6 left" }))),
        )
        .await;
        assert_eq!(noted.status(), StatusCode::OK);
        let noted = response_json(noted).await;
        assert_eq!(field(&noted, "/note/note").as_str(), Some("6 left"));

        // Delete cascades everything.
        let deleted = send(&router, request("DELETE", &format!("/items/{id}"), None)).await;
        assert_eq!(deleted.status(), StatusCode::OK);

        let items = response_json(send(&router, request("GET", "/items", None)).await).await;
        assert_eq!(
            field(&items, "/items").as_array().map(Vec::len),
            Some(0),
            "items should be empty after delete"
        );
        let listed = response_json(send(&router, request("GET", "/list", None)).await).await;
        assert_eq!(field(&listed, "/list").as_array().map(Vec::len), Some(0));

        let _ = std::fs::remove_file(&db_path);
    }
}
