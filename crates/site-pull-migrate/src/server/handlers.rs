//! Request handlers.
//!
//! One POST endpoint dispatches on the `serve_type` form field. Every
//! request authenticates, takes the single-flight serve lease, performs
//! exactly one bounded protocol step, and releases the lease; streaming
//! responses release it from the stream finalizer instead, after the
//! last body byte and the sent-stamping write.

use axum::body::Body;
use axum::extract::{Form, State};
use axum::http::header::{self, HeaderValue};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use bytes::Bytes;
use futures::StreamExt;
use serde::Deserialize;
use tokio_util::io::ReaderStream;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context::ServeContext;
use crate::error::{MigrateError, Result};
use crate::server::auth::verify_signature;
use crate::server::response::MetaHeaders;
use crate::store::{OPT_API_SIGNATURE, OPT_MIGRATE_KEY};
use crate::transfer::{
    ArchiveDelivery, DbTransferEngine, FileServeOutcome, FileTransferEngine, Reconciler,
    SingleDelivery,
};

/// Form fields carried by every serve request.
#[derive(Debug, Deserialize)]
pub struct ServeRequest {
    #[serde(default)]
    pub migrate_key: Option<String>,
    #[serde(default)]
    pub api_signature: Option<String>,
    #[serde(default)]
    pub serve_type: Option<String>,
    #[serde(default)]
    pub sent_filename: Option<String>,
    #[serde(default)]
    pub checksum: Option<String>,
}

pub async fn health() -> &'static str {
    "ok"
}

pub async fn serve(State(ctx): State<ServeContext>, Form(req): Form<ServeRequest>) -> Response {
    match handle(&ctx, req).await {
        Ok(response) => response,
        Err(err) => {
            warn!(error = %err, "serve request failed");
            (
                StatusCode::OK,
                MetaHeaders::failed(&err.to_string()).into_map(),
            )
                .into_response()
        }
    }
}

/// A handler result plus whether the lease outlives the handler (it does
/// for streaming responses, which release it from the finalizer).
struct HandlerResponse {
    response: Response,
    lease_deferred: bool,
}

impl HandlerResponse {
    fn immediate(response: Response) -> Self {
        Self {
            response,
            lease_deferred: false,
        }
    }

    fn streaming(response: Response) -> Self {
        Self {
            response,
            lease_deferred: true,
        }
    }
}

async fn handle(ctx: &ServeContext, req: ServeRequest) -> Result<Response> {
    authenticate(ctx, &req).await?;

    let holder = Uuid::new_v4().to_string();
    if !ctx
        .store
        .try_acquire_lease(&holder, ctx.config.transfer.sending_lease_secs)
        .await?
    {
        return Err(MigrateError::Busy(
            "another request currently holds the serve lease".to_string(),
        ));
    }

    let serve_type = req.serve_type.as_deref().unwrap_or("");
    let result = match serve_type {
        "files" => serve_files(ctx, &holder).await,
        "db" => serve_db(ctx).await,
        "unmark_sent_files" => unmark_sent_files(ctx, &req).await,
        other => Err(MigrateError::UnknownOperation(if other.is_empty() {
            "missing serve_type".to_string()
        } else {
            other.to_string()
        })),
    };

    match result {
        Ok(handled) => {
            if !handled.lease_deferred {
                ctx.store.release_lease(&holder).await?;
            }
            Ok(handled.response)
        }
        Err(err) => {
            if let Err(release_err) = ctx.store.release_lease(&holder).await {
                warn!(error = %release_err, "could not release serve lease");
            }
            Err(err)
        }
    }
}

async fn authenticate(ctx: &ServeContext, req: &ServeRequest) -> Result<()> {
    let stored = ctx
        .store
        .get_option(OPT_API_SIGNATURE)
        .await?
        .filter(|s| !s.is_empty())
        .ok_or_else(|| MigrateError::precondition("no api signature configured"))?;
    if !verify_signature(req.api_signature.as_deref().unwrap_or(""), &stored) {
        return Err(MigrateError::precondition("invalid api signature"));
    }

    if let Some(expected) = ctx
        .store
        .get_option(OPT_MIGRATE_KEY)
        .await?
        .filter(|s| !s.is_empty())
    {
        if req.migrate_key.as_deref() != Some(expected.as_str()) {
            return Err(MigrateError::precondition("migrate key mismatch"));
        }
    }
    Ok(())
}

async fn serve_files(ctx: &ServeContext, holder: &str) -> Result<HandlerResponse> {
    let engine = FileTransferEngine::new(ctx);
    match engine.serve().await? {
        FileServeOutcome::Enumerated {
            newly_recorded,
            total_files,
            progress,
        } => {
            info!(newly_recorded, total_files, "enumeration window served");
            let headers = MetaHeaders::ok()
                .message(&format!(
                    "enumerated {newly_recorded} new units, {total_files} total"
                ))
                .transfer_complete(false)
                .progress(progress)
                .into_map();
            Ok(HandlerResponse::immediate(
                (StatusCode::OK, headers).into_response(),
            ))
        }
        FileServeOutcome::Complete => {
            let headers = MetaHeaders::ok()
                .transfer_complete(true)
                .progress(100.0)
                .into_map();
            Ok(HandlerResponse::immediate(
                (StatusCode::OK, headers).into_response(),
            ))
        }
        FileServeOutcome::Archive(delivery) => {
            let kind = ctx
                .archiver
                .as_ref()
                .map(|a| a.format_name())
                .unwrap_or("archive");
            let mut meta = MetaHeaders::ok()
                .filename(&delivery.sent_filename)
                .checksum(&delivery.checksum)
                .content_kind(kind)
                .progress(delivery.progress)
                .transfer_complete(false);
            for unit_error in &delivery.unit_errors {
                meta = meta.unit_error(unit_error);
            }
            let mut headers = meta.into_map();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(delivery.size));

            let body = archive_body(ctx, delivery, holder.to_string()).await?;
            Ok(HandlerResponse::streaming(
                (StatusCode::OK, headers, body).into_response(),
            ))
        }
        FileServeOutcome::Single(delivery) => {
            let mut headers = MetaHeaders::ok()
                .filename(&delivery.sent_filename)
                .checksum(&delivery.checksum)
                .content_kind("file")
                .progress(delivery.progress)
                .transfer_complete(false)
                .into_map();
            headers.insert(
                header::CONTENT_TYPE,
                HeaderValue::from_static("application/octet-stream"),
            );
            headers.insert(header::CONTENT_LENGTH, HeaderValue::from(delivery.size));

            let body = single_body(ctx, delivery, holder.to_string()).await?;
            Ok(HandlerResponse::streaming(
                (StatusCode::OK, headers, body).into_response(),
            ))
        }
    }
}

/// Stream the archive, then stamp its units sent and release the lease.
///
/// If the connection drops mid-body the finalizer never runs: the units
/// stay `Sending` until the stale-flight sweep reclaims them and the
/// lease expires on its own.
async fn archive_body(
    ctx: &ServeContext,
    delivery: ArchiveDelivery,
    holder: String,
) -> Result<Body> {
    let file = tokio::fs::File::open(&delivery.archive_path).await?;
    let stream = ReaderStream::with_capacity(file, ctx.config.transfer.chunk_size);
    let store = ctx.store.clone();

    let finalizer = futures::stream::once(async move {
        let ArchiveDelivery {
            archive_path,
            sent_filename,
            checksum,
            unit_ids,
            ..
        } = delivery;
        for id in &unit_ids {
            if let Err(err) = store.mark_file_sent(*id, &sent_filename, &checksum).await {
                error!(unit = id, error = %err, "could not stamp unit sent");
            }
        }
        if let Err(err) = store.release_lease(&holder).await {
            warn!(error = %err, "could not release serve lease");
        }
        drop(archive_path);
        Ok::<Bytes, std::io::Error>(Bytes::new())
    });

    Ok(Body::from_stream(stream.chain(finalizer)))
}

async fn single_body(ctx: &ServeContext, delivery: SingleDelivery, holder: String) -> Result<Body> {
    let file = tokio::fs::File::open(&delivery.path).await?;
    let stream = ReaderStream::with_capacity(file, ctx.config.transfer.chunk_size);
    let store = ctx.store.clone();

    let finalizer = futures::stream::once(async move {
        let SingleDelivery {
            unit_id,
            transformed,
            sent_filename,
            checksum,
            ..
        } = delivery;
        if let Err(err) = store.mark_file_sent(unit_id, &sent_filename, &checksum).await {
            error!(unit = unit_id, error = %err, "could not stamp unit sent");
        }
        if let Err(err) = store.release_lease(&holder).await {
            warn!(error = %err, "could not release serve lease");
        }
        drop(transformed);
        Ok::<Bytes, std::io::Error>(Bytes::new())
    });

    Ok(Body::from_stream(stream.chain(finalizer)))
}

async fn serve_db(ctx: &ServeContext) -> Result<HandlerResponse> {
    let engine = DbTransferEngine::new(ctx)?;
    let outcome = engine.serve_slice().await?;

    let mut meta = MetaHeaders::ok()
        .content_kind("db")
        .progress(outcome.progress)
        .transfer_complete(outcome.complete);
    if let Some(table) = &outcome.table_name {
        meta = meta.message(&format!("{} rows from {table}", outcome.rows));
    }
    let mut headers = meta.into_map();
    headers.insert(
        header::CONTENT_TYPE,
        HeaderValue::from_static("application/sql"),
    );

    Ok(HandlerResponse::immediate(
        (StatusCode::OK, headers, outcome.sql).into_response(),
    ))
}

async fn unmark_sent_files(ctx: &ServeContext, req: &ServeRequest) -> Result<HandlerResponse> {
    let reverted = Reconciler::new(ctx.store.clone())
        .unmark(
            req.sent_filename.as_deref().unwrap_or(""),
            req.checksum.as_deref().unwrap_or(""),
        )
        .await?;

    let headers = MetaHeaders::ok()
        .message(&format!("{reverted} units reverted to pending"))
        .into_map();
    Ok(HandlerResponse::immediate(
        (StatusCode::OK, headers).into_response(),
    ))
}
