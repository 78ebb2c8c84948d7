use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Query, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::de::DeserializeOwned;
use serde::Deserialize;
use serde_json::{json, Map, Value};
use std::sync::Arc;

use crate::link::{Link, LinkKey, LinkOutcome, LinkPatch};
use crate::server::AppState;
use crate::storage::EntityStore;
use crate::{Error, Feature, Provision, Result};

#[derive(Deserialize)]
pub struct IdParams {
    pub id: Option<String>,
}

#[derive(Deserialize)]
pub struct FeatureParams {
    pub feature_id: Option<String>,
}

#[derive(Deserialize)]
pub struct ProvisionParams {
    pub provision_id: Option<String>,
}

#[derive(Deserialize)]
pub struct PairParams {
    pub feature_id: Option<String>,
    pub provision_id: Option<String>,
}

type QueryResult<T> = std::result::Result<Query<T>, QueryRejection>;

/// Unwrap query parameters, reporting a malformed query string as a validation error
fn query<T>(params: QueryResult<T>) -> Result<T> {
    params
        .map(|Query(inner)| inner)
        .map_err(|rejection| Error::Validation(format!("Invalid query string: {}", rejection.body_text())))
}

fn required_id(value: Option<&str>, name: &str) -> Result<i64> {
    let raw = value
        .filter(|v| !v.is_empty())
        .ok_or_else(|| Error::Validation(format!("Missing {} parameter", name)))?;
    raw.parse::<i64>()
        .map_err(|_| Error::Validation(format!("Invalid {} parameter", name)))
}

fn decode_json<T: DeserializeOwned>(body: &[u8]) -> Result<T> {
    serde_json::from_slice(body).map_err(|e| Error::Validation(format!("Invalid request body: {}", e)))
}

fn link_conflict(key: LinkKey) -> Response {
    Error::DuplicateLink {
        feature_id: key.feature_id,
        provision_id: key.provision_id,
    }
    .into_response()
}

pub async fn health(State(state): State<Arc<AppState>>) -> Result<Json<Value>> {
    let stats = state.run(|m| m.stats()).await?;
    Ok(Json(json!({
        "status": "ok",
        "features": stats.features,
        "provisions": stats.provisions,
        "links": stats.links,
    })))
}

// ====== Feature Handlers ======

pub async fn create_feature(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<(StatusCode, Json<Feature>)> {
    let feature = EntityStore::<Feature>::decode(decode_json(&body)?)?;
    let created = state.run(move |m| m.create_feature(&feature)).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

pub async fn get_feature(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
) -> Result<Json<Feature>> {
    let params = query(params)?;
    let id = required_id(params.id.as_deref(), "id")?;
    Ok(Json(state.run(move |m| m.get_feature(id)).await?))
}

pub async fn list_features(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Feature>>> {
    Ok(Json(state.run(|m| m.list_features()).await?))
}

pub async fn update_feature(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
    body: Bytes,
) -> Result<Json<Map<String, Value>>> {
    let params = query(params)?;
    let id = required_id(params.id.as_deref(), "id")?;
    let fields: Map<String, Value> = decode_json(&body)?;
    Ok(Json(state.run(move |m| m.update_feature(id, &fields)).await?))
}

pub async fn delete_feature(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
) -> Result<Json<Value>> {
    let params = query(params)?;
    let id = required_id(params.id.as_deref(), "id")?;
    let links_deleted = state.run(move |m| m.delete_feature(id)).await?;
    Ok(Json(json!({
        "message": "Feature deleted successfully",
        "links_deleted": links_deleted,
    })))
}

// ====== Provision Handlers ======

/// Accepts a single provision object or an array inserted as one batch
pub async fn create_provision(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    match decode_json::<Value>(&body)? {
        Value::Array(items) => {
            let provisions = items
                .into_iter()
                .map(EntityStore::<Provision>::decode)
                .collect::<Result<Vec<_>>>()?;
            let created = state.run(move |m| m.create_provisions(&provisions)).await?;
            Ok((StatusCode::CREATED, Json(created)).into_response())
        }
        value => {
            let provision = EntityStore::<Provision>::decode(value)?;
            let created = state.run(move |m| m.create_provision(&provision)).await?;
            Ok((StatusCode::CREATED, Json(created)).into_response())
        }
    }
}

pub async fn get_provision(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
) -> Result<Json<Provision>> {
    let params = query(params)?;
    let id = required_id(params.id.as_deref(), "id")?;
    Ok(Json(state.run(move |m| m.get_provision(id)).await?))
}

pub async fn list_provisions(State(state): State<Arc<AppState>>) -> Result<Json<Vec<Provision>>> {
    Ok(Json(state.run(|m| m.list_provisions()).await?))
}

pub async fn update_provision(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
    body: Bytes,
) -> Result<Json<Map<String, Value>>> {
    let params = query(params)?;
    let id = required_id(params.id.as_deref(), "id")?;
    let fields: Map<String, Value> = decode_json(&body)?;
    Ok(Json(state.run(move |m| m.update_provision(id, &fields)).await?))
}

pub async fn delete_provision(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
) -> Result<Json<Value>> {
    let params = query(params)?;
    let id = required_id(params.id.as_deref(), "id")?;
    let links_deleted = state.run(move |m| m.delete_provision(id)).await?;
    Ok(Json(json!({
        "message": "Provision deleted successfully",
        "links_deleted": links_deleted,
    })))
}

// ====== Link Handlers ======

pub async fn create_link(
    State(state): State<Arc<AppState>>,
    body: Bytes,
) -> Result<Response> {
    let key: LinkKey = decode_json(&body)?;
    key.validate()?;

    match state.run(move |m| m.link(key)).await? {
        LinkOutcome::Linked(link) => Ok((StatusCode::CREATED, Json(link)).into_response()),
        LinkOutcome::Conflict(key) => Ok(link_conflict(key)),
    }
}

pub async fn update_link(
    State(state): State<Arc<AppState>>,
    params: QueryResult<IdParams>,
    body: Bytes,
) -> Result<Response> {
    let params = query(params)?;
    let link_id = required_id(params.id.as_deref(), "id")?;
    let patch: LinkPatch = decode_json(&body)?;

    match state.run(move |m| m.relink(link_id, patch)).await? {
        LinkOutcome::Linked(link) => Ok(Json(link).into_response()),
        LinkOutcome::Conflict(key) => Ok(link_conflict(key)),
    }
}

pub async fn delete_link(
    State(state): State<Arc<AppState>>,
    params: QueryResult<PairParams>,
) -> Result<Json<Value>> {
    let params = query(params)?;
    let key = LinkKey::new(
        required_id(params.feature_id.as_deref(), "feature_id")?,
        required_id(params.provision_id.as_deref(), "provision_id")?,
    );
    state.run(move |m| m.unlink(key)).await?;
    Ok(Json(json!({ "message": "Link deleted successfully" })))
}

pub async fn provisions_by_feature(
    State(state): State<Arc<AppState>>,
    params: QueryResult<FeatureParams>,
) -> Result<Json<Vec<Link>>> {
    let params = query(params)?;
    let feature_id = required_id(params.feature_id.as_deref(), "feature_id")?;
    Ok(Json(state.run(move |m| m.provisions_for_feature(feature_id)).await?))
}

pub async fn features_by_provision(
    State(state): State<Arc<AppState>>,
    params: QueryResult<ProvisionParams>,
) -> Result<Json<Vec<Link>>> {
    let params = query(params)?;
    let provision_id = required_id(params.provision_id.as_deref(), "provision_id")?;
    Ok(Json(state.run(move |m| m.features_for_provision(provision_id)).await?))
}

pub async fn delete_links_by_feature(
    State(state): State<Arc<AppState>>,
    params: QueryResult<FeatureParams>,
) -> Result<Json<Value>> {
    let params = query(params)?;
    let feature_id = required_id(params.feature_id.as_deref(), "feature_id")?;
    let deleted = state.run(move |m| m.delete_links_by_feature(feature_id)).await?;
    Ok(Json(json!({
        "deleted_count": deleted,
        "message": "Links deleted successfully",
    })))
}

pub async fn delete_links_by_provision(
    State(state): State<Arc<AppState>>,
    params: QueryResult<ProvisionParams>,
) -> Result<Json<Value>> {
    let params = query(params)?;
    let provision_id = required_id(params.provision_id.as_deref(), "provision_id")?;
    let deleted = state.run(move |m| m.delete_links_by_provision(provision_id)).await?;
    Ok(Json(json!({
        "deleted_count": deleted,
        "message": "Links deleted successfully",
    })))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::server::error::ErrorBody;
    use crate::server::router;
    use crate::{Database, LinkManager};
    use axum::body::Body;
    use axum::http::Request;
    use axum::Router;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;

    fn test_app() -> (Router, Arc<Database>) {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let manager = LinkManager::new(Arc::clone(&db));
        let state = Arc::new(AppState::new(manager, Duration::from_secs(5)));
        (router(state), db)
    }

    async fn send(app: &Router, method: &str, uri: &str, body: Option<Value>) -> Response {
        let body = match body {
            Some(v) => Body::from(v.to_string()),
            None => Body::empty(),
        };
        let req = Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(body)
            .unwrap();
        app.clone().oneshot(req).await.unwrap()
    }

    async fn body_json<T: DeserializeOwned>(resp: Response) -> T {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[test]
    fn test_required_id() {
        assert_eq!(required_id(Some("12"), "id").unwrap(), 12);
        assert!(matches!(required_id(None, "id"), Err(Error::Validation(_))));
        assert!(matches!(required_id(Some(""), "id"), Err(Error::Validation(_))));
        assert!(matches!(required_id(Some("abc"), "id"), Err(Error::Validation(_))));
    }

    #[tokio::test]
    async fn create_link_then_duplicate_is_409() {
        let (app, _db) = test_app();
        let body = json!({"feature_id": 1, "provision_id": 101});

        let resp = send(&app, "POST", "/link", Some(body.clone())).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let link: Link = body_json(resp).await;
        assert_eq!(link.key(), LinkKey::new(1, 101));

        let resp = send(&app, "POST", "/link", Some(body)).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);
        let err: ErrorBody = body_json(resp).await;
        assert_eq!(err.error.code, "LINK_EXISTS");
    }

    #[tokio::test]
    async fn malformed_link_body_is_400() {
        let (app, _db) = test_app();
        let resp = send(&app, "POST", "/link", Some(json!({"feature_id": "one"}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);

        let resp = send(&app, "POST", "/link", Some(json!({"feature_id": 0, "provision_id": 3}))).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn feature_crud_over_http() {
        let (app, _db) = test_app();

        let resp = send(&app, "POST", "/feature", Some(json!({"feature_id": 7, "feature_title": "Geo"}))).await;
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = send(&app, "PUT", "/feature?id=7", Some(json!({"feature_type": "location"}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let applied: Map<String, Value> = body_json(resp).await;
        assert_eq!(applied["feature_type"], "location");

        let resp = send(&app, "GET", "/feature?id=7", None).await;
        let feature: Feature = body_json(resp).await;
        assert_eq!(feature.feature_title, "Geo");
        assert_eq!(feature.feature_type, "location");

        let resp = send(&app, "GET", "/features", None).await;
        let features: Vec<Feature> = body_json(resp).await;
        assert_eq!(features.len(), 1);

        let resp = send(&app, "DELETE", "/feature?id=7", None).await;
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = send(&app, "DELETE", "/feature?id=7", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&app, "GET", "/feature", None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn provision_array_create() {
        let (app, _db) = test_app();
        let batch = json!([
            {"id": 101, "provision_title": "Art. 1", "relevant_labels": ["minors"]},
            {"id": 102, "provision_title": "Art. 2"}
        ]);

        let resp = send(&app, "POST", "/provision", Some(batch)).await;
        assert_eq!(resp.status(), StatusCode::CREATED);
        let created: Vec<Provision> = body_json(resp).await;
        assert_eq!(created.len(), 2);

        let resp = send(&app, "POST", "/provision", Some(json!({"id": 101}))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = send(&app, "GET", "/provision?id=101", None).await;
        let provision: Provision = body_json(resp).await;
        assert_eq!(provision.relevant_labels, vec!["minors"]);
    }

    #[tokio::test]
    async fn deleting_feature_removes_its_links() {
        let (app, _db) = test_app();
        send(&app, "POST", "/feature", Some(json!({"feature_id": 1}))).await;
        for p in [101, 102] {
            send(&app, "POST", "/link", Some(json!({"feature_id": 1, "provision_id": p}))).await;
        }

        let resp = send(&app, "DELETE", "/feature?id=1", None).await;
        let body: Value = body_json(resp).await;
        assert_eq!(body["links_deleted"], 2);

        let resp = send(&app, "GET", "/link/provisions?feature_id=1", None).await;
        let links: Vec<Link> = body_json(resp).await;
        assert!(links.is_empty());
    }

    #[tokio::test]
    async fn update_and_delete_single_link() {
        let (app, _db) = test_app();
        let resp = send(&app, "POST", "/link", Some(json!({"feature_id": 1, "provision_id": 101}))).await;
        let link: Link = body_json(resp).await;
        send(&app, "POST", "/link", Some(json!({"feature_id": 1, "provision_id": 102}))).await;

        let uri = format!("/link?id={}", link.link_id);
        let resp = send(&app, "PUT", &uri, Some(json!({"provision_id": 102}))).await;
        assert_eq!(resp.status(), StatusCode::CONFLICT);

        let resp = send(&app, "PUT", &uri, Some(json!({"provision_id": 103}))).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let moved: Link = body_json(resp).await;
        assert_eq!(moved.key(), LinkKey::new(1, 103));

        let resp = send(&app, "PUT", "/link?id=9999", Some(json!({"provision_id": 5}))).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);

        let resp = send(&app, "DELETE", "/link?feature_id=1&provision_id=103", None).await;
        assert_eq!(resp.status(), StatusCode::OK);
        let resp = send(&app, "DELETE", "/link?feature_id=1&provision_id=103", None).await;
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn malformed_query_string_is_json_400() {
        let (app, _db) = test_app();
        let resp = send(&app, "GET", "/feature?id=1&id=2", None).await;
        assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
        let err: ErrorBody = body_json(resp).await;
        assert_eq!(err.error.code, "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn expired_deadline_is_503_without_write() {
        let db = Arc::new(Database::open_in_memory().unwrap());
        let state = Arc::new(AppState::new(LinkManager::new(Arc::clone(&db)), Duration::ZERO));
        let app = router(Arc::clone(&state));

        let resp = send(&app, "POST", "/link", Some(json!({"feature_id": 1, "provision_id": 101}))).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert!(resp.headers().contains_key("retry-after"));

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(state.manager.provisions_for_feature(1).unwrap().is_empty());
    }

    #[tokio::test]
    async fn closed_database_is_503() {
        let (app, db) = test_app();
        db.close().unwrap();

        let resp = send(&app, "GET", "/features", None).await;
        assert_eq!(resp.status(), StatusCode::SERVICE_UNAVAILABLE);
        let err: ErrorBody = body_json(resp).await;
        assert_eq!(err.error.code, "STORAGE_UNAVAILABLE");
    }
}
