//! Entity CRUD routes, flat and nested under a parent record.

use axum::{
    body::Bytes,
    extract::{rejection::QueryRejection, Path, Query, State},
    http::StatusCode,
    routing::get,
    Json, Router,
};
use serde_json::Value;
use tether_engine::{EntitySchema, Record, RemoteRecord};

use crate::error::{AppError, Result};
use crate::protocol::{CreatedResponse, ListQuery, ListResponse};
use crate::server::{AppState, Authorized};
use crate::store::LocalStore;

/// Create entity routes.
pub fn routes<S: LocalStore>() -> Router<AppState<S>> {
    Router::new()
        .route("/api/{entity}", get(list::<S>).post(create::<S>))
        .route(
            "/api/{entity}/{id}",
            get(fetch::<S>).put(replace::<S>).delete(remove::<S>),
        )
        .route(
            "/api/{entity}/{id}/{segment}",
            get(list_children::<S>).post(create_child::<S>),
        )
        .route(
            "/api/{entity}/{id}/{segment}/{child_id}",
            get(fetch_child::<S>)
                .put(replace_child::<S>)
                .delete(remove_child::<S>),
        )
}

/// Local ids are UUIDs; anything else is a malformed identifier.
fn parse_id(id: &str) -> Result<()> {
    uuid::Uuid::parse_str(id)
        .map(|_| ())
        .map_err(|_| AppError::BadRequest(format!("Invalid id: {id}")))
}

fn parse_payload(body: &Bytes) -> Result<Value> {
    serde_json::from_slice(body).map_err(|e| AppError::BadRequest(format!("Malformed JSON: {e}")))
}

fn parse_query(query: std::result::Result<Query<ListQuery>, QueryRejection>) -> Result<ListQuery> {
    query
        .map(|Query(query)| query)
        .map_err(|e| AppError::BadRequest(e.body_text()))
}

/// Slice a record list into one page.
fn page(records: &[Record], query: ListQuery) -> ListResponse {
    let offset = query.offset().min(records.len());
    let limit = query.limit();

    ListResponse {
        items: records[offset..]
            .iter()
            .take(limit)
            .map(RemoteRecord::from)
            .collect(),
        has_more: offset + limit < records.len(),
    }
}

/// Write the parent link into a child payload.
fn link_to_parent(schema: &EntitySchema, payload: &mut Value, parent_id: &str) -> Result<()> {
    let Some(link) = &schema.parent else {
        return Ok(());
    };
    payload
        .as_object_mut()
        .ok_or_else(|| AppError::BadRequest("payload must be an object".into()))?
        .insert(link.field.clone(), Value::String(parent_id.to_string()));
    Ok(())
}

/// Create a record, or return the one already holding its natural key.
async fn create_record<S: LocalStore>(
    state: &AppState<S>,
    entity: &str,
    payload: Value,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let schema = state.store.schema().entity(entity)?;
    let natural_key = schema.validate_payload(&payload)?;

    if let (Some(link), Some(parent_id)) = (&schema.parent, schema.parent_id_of(&payload)) {
        if state.store.get(&link.entity, parent_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "{} {} does not exist",
                link.entity, parent_id
            )));
        }
    }

    if let Some(key) = &natural_key {
        if let Some(existing) = state.store.find_by_natural_key(entity, key).await? {
            tracing::debug!(entity, id = %existing.local_id, natural_key = %key, "Create matched existing record");
            return Ok((
                StatusCode::OK,
                Json(CreatedResponse {
                    id: existing.local_id,
                }),
            ));
        }
    }

    match state.store.create(entity, payload).await {
        Ok(record) => {
            tracing::debug!(entity, id = %record.local_id, "Created record");
            Ok((
                StatusCode::CREATED,
                Json(CreatedResponse {
                    id: record.local_id,
                }),
            ))
        }
        // Lost a race with a concurrent create of the same key
        Err(e) if e.is_duplicate_key() => {
            let key = natural_key.unwrap_or_default();
            let existing = state
                .store
                .find_by_natural_key(entity, &key)
                .await?
                .ok_or(AppError::Store(e))?;
            Ok((
                StatusCode::OK,
                Json(CreatedResponse {
                    id: existing.local_id,
                }),
            ))
        }
        Err(e) => Err(e.into()),
    }
}

/// GET /api/{entity} - List records, paged.
async fn list<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path(entity): Path<String>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse>> {
    let query = parse_query(query)?;
    let records = state.store.list(&entity).await?;
    Ok(Json(page(&records, query)))
}

/// POST /api/{entity} - Create a record.
async fn create<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path(entity): Path<String>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let payload = parse_payload(&body)?;
    create_record(&state, &entity, payload).await
}

/// GET /api/{entity}/{id} - Fetch one record.
async fn fetch<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id)): Path<(String, String)>,
) -> Result<Json<RemoteRecord>> {
    parse_id(&id)?;
    let record = state
        .store
        .get(&entity, &id)
        .await?
        .ok_or_else(|| AppError::NotFound(format!("{entity} {id}")))?;
    Ok(Json(RemoteRecord::from(&record)))
}

/// PUT /api/{entity}/{id} - Replace a record's payload.
async fn replace<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id)): Path<(String, String)>,
    body: Bytes,
) -> Result<Json<RemoteRecord>> {
    parse_id(&id)?;
    let payload = parse_payload(&body)?;
    let record = state.store.update(&entity, &id, payload).await?;
    Ok(Json(RemoteRecord::from(&record)))
}

/// DELETE /api/{entity}/{id} - Delete a record.
async fn remove<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id)): Path<(String, String)>,
) -> Result<StatusCode> {
    parse_id(&id)?;
    match state.store.remove(&entity, &id).await? {
        Some(_) => Ok(StatusCode::NO_CONTENT),
        None => Err(AppError::NotFound(format!("{entity} {id}"))),
    }
}

/// Resolve the child entity mounted at `/{entity}/{id}/{segment}` and check
/// the parent record exists.
async fn child_schema<S: LocalStore>(
    state: &AppState<S>,
    entity: &str,
    id: &str,
    segment: &str,
) -> Result<EntitySchema> {
    parse_id(id)?;
    let schema = state.store.schema();
    schema.entity(entity)?;
    let child = schema
        .child_entity(entity, segment)
        .ok_or_else(|| AppError::NotFound(format!("{entity} has no {segment}")))?
        .clone();

    if state.store.get(entity, id).await?.is_none() {
        return Err(AppError::NotFound(format!("{entity} {id}")));
    }
    Ok(child)
}

/// Fetch a child record that belongs to `parent_id`.
async fn owned_child<S: LocalStore>(
    state: &AppState<S>,
    child: &EntitySchema,
    parent_id: &str,
    child_id: &str,
) -> Result<Record> {
    parse_id(child_id)?;
    state
        .store
        .get(&child.name, child_id)
        .await?
        .filter(|record| child.parent_id_of(&record.payload) == Some(parent_id))
        .ok_or_else(|| AppError::NotFound(format!("{} {}", child.name, child_id)))
}

/// GET /api/{entity}/{id}/{segment} - List a parent's children.
async fn list_children<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id, segment)): Path<(String, String, String)>,
    query: std::result::Result<Query<ListQuery>, QueryRejection>,
) -> Result<Json<ListResponse>> {
    let query = parse_query(query)?;
    let child = child_schema(&state, &entity, &id, &segment).await?;

    let records: Vec<Record> = state
        .store
        .list(&child.name)
        .await?
        .into_iter()
        .filter(|record| child.parent_id_of(&record.payload) == Some(id.as_str()))
        .collect();
    Ok(Json(page(&records, query)))
}

/// POST /api/{entity}/{id}/{segment} - Create a child of a parent record.
async fn create_child<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id, segment)): Path<(String, String, String)>,
    body: Bytes,
) -> Result<(StatusCode, Json<CreatedResponse>)> {
    let mut payload = parse_payload(&body)?;
    let child = child_schema(&state, &entity, &id, &segment).await?;

    link_to_parent(&child, &mut payload, &id)?;
    create_record(&state, &child.name, payload).await
}

/// GET /api/{entity}/{id}/{segment}/{child_id} - Fetch one child.
async fn fetch_child<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id, segment, child_id)): Path<(String, String, String, String)>,
) -> Result<Json<RemoteRecord>> {
    let child = child_schema(&state, &entity, &id, &segment).await?;
    let record = owned_child(&state, &child, &id, &child_id).await?;
    Ok(Json(RemoteRecord::from(&record)))
}

/// PUT /api/{entity}/{id}/{segment}/{child_id} - Replace a child.
async fn replace_child<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id, segment, child_id)): Path<(String, String, String, String)>,
    body: Bytes,
) -> Result<Json<RemoteRecord>> {
    let mut payload = parse_payload(&body)?;
    let child = child_schema(&state, &entity, &id, &segment).await?;
    owned_child(&state, &child, &id, &child_id).await?;

    link_to_parent(&child, &mut payload, &id)?;
    let record = state.store.update(&child.name, &child_id, payload).await?;
    Ok(Json(RemoteRecord::from(&record)))
}

/// DELETE /api/{entity}/{id}/{segment}/{child_id} - Delete a child.
async fn remove_child<S: LocalStore>(
    State(state): State<AppState<S>>,
    _auth: Authorized,
    Path((entity, id, segment, child_id)): Path<(String, String, String, String)>,
) -> Result<StatusCode> {
    let child = child_schema(&state, &entity, &id, &segment).await?;
    owned_child(&state, &child, &id, &child_id).await?;

    state.store.remove(&child.name, &child_id).await?;
    Ok(StatusCode::NO_CONTENT)
}
