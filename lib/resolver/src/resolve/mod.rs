use std::sync::Arc;
use std::time::{Duration, Instant};

use bytes::{BufMut, Bytes};
use dashmap::DashMap;
use tokio::sync::{mpsc, OnceCell};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::buffer::BufPair;
use crate::consts::{COMMA, LBRACK, NULL, RBRACE, RBRACK};
use crate::context::Context;
use crate::error::ResolveError;
use crate::extract::extract_response;
use crate::plan::{
    GraphQLResponse, GraphQLResponsePatch, GraphQLStreamingResponse, GraphQLSubscription,
    ProcessResponseConfig,
};
use crate::pool::{self, Pool};
use crate::sources::{DataSourceError, FlushWriter};

mod fetch;
mod walk;

use fetch::{ABuildHasher, ResultSet, SharedLoad};

/// Renders pre-planned execution trees into serialized GraphQL responses.
/// One resolver serves many concurrent requests; per-request state lives in
/// the caller-owned [`Context`].
pub struct Resolver {
    /// Enables coalescing of identical in-flight fetches. Off by default;
    /// individual fetches additionally opt out for write operations.
    pub enable_single_flight_loader: bool,
    cancellation: CancellationToken,
    buf_pairs: Pool<BufPair>,
    result_sets: Pool<ResultSet>,
    inflight_fetches: DashMap<u64, Arc<OnceCell<SharedLoad>>, ABuildHasher>,
}

impl Resolver {
    /// `cancellation` terminates all active subscriptions and streams.
    pub fn new(cancellation: CancellationToken) -> Self {
        Resolver {
            enable_single_flight_loader: false,
            cancellation,
            buf_pairs: Pool::new(),
            result_sets: Pool::new(),
            inflight_fetches: DashMap::default(),
        }
    }

    /// Resolves one request into a single `{"errors":...,"data":...}`
    /// document. `data` may itself be a GraphQL envelope (e.g. a
    /// subscription frame); its errors are merged into the output and its
    /// `data` value becomes the root the plan is walked against.
    pub async fn resolve_graphql_response<W: FlushWriter>(
        &self,
        ctx: &mut Context,
        response: &GraphQLResponse,
        data: &[u8],
        writer: &mut W,
    ) -> Result<(), ResolveError> {
        let mut buf = self.get_buf_pair();
        let mut response_buf = self.get_buf_pair();
        extract_response(
            data,
            &mut response_buf,
            ProcessResponseConfig {
                extract_graphql_response: true,
                extract_federation_entities: false,
            },
        );

        let mut ignore_data = false;
        let resolve_result = {
            let root_data: &[u8] = &response_buf.data;
            self.resolve_node(ctx, &response.data, root_data, &mut buf)
                .await
        };
        match resolve_result {
            Ok(()) => {}
            Err(ResolveError::NonNullableNull) => ignore_data = true,
            Err(err) => {
                self.free_buf_pair(buf);
                self.free_buf_pair(response_buf);
                return Err(err);
            }
        }
        if response_buf.has_errors() {
            buf.merge_errors(&mut response_buf);
        }

        let write_result = write_graphql_response(&buf, writer, ignore_data);
        self.free_buf_pair(buf);
        self.free_buf_pair(response_buf);
        write_result
    }

    /// Starts the subscription source and re-renders every pushed frame as a
    /// full response document, flushing the writer after each one.
    pub async fn resolve_graphql_subscription<W: FlushWriter>(
        &self,
        ctx: &mut Context,
        subscription: &GraphQLSubscription,
        writer: &mut W,
    ) -> Result<(), ResolveError> {
        let mut input_buf = self.get_buf_pair();
        if let Err(err) =
            subscription
                .trigger
                .input_template
                .render(ctx, &[], &mut input_buf.data)
        {
            self.free_buf_pair(input_buf);
            return Err(err);
        }
        let subscription_input = Bytes::copy_from_slice(&input_buf.data);
        self.free_buf_pair(input_buf);

        let cancel = ctx.cancellation().child_token();
        let _cancel_guard = cancel.clone().drop_guard();
        let (next_tx, mut next_rx) = mpsc::channel::<Bytes>(1);
        match subscription
            .trigger
            .source
            .start(cancel, &subscription_input, next_tx)
            .await
        {
            Ok(()) => {}
            Err(DataSourceError::UnableToResolve) => {
                debug!("subscription source cannot resolve the operation");
                writer.write_all(br#"{"errors":[{"message":"unable to resolve"}]}"#)?;
                writer.flush()?;
                return Ok(());
            }
            Err(err) => return Err(err.into()),
        }

        loop {
            tokio::select! {
                biased;
                _ = self.cancellation.cancelled() => return Ok(()),
                message = next_rx.recv() => {
                    let Some(data) = message else { return Ok(()) };
                    self.resolve_graphql_response(ctx, &subscription.response, &data, writer)
                        .await?;
                    writer.flush()?;
                }
            }
        }
    }

    /// Writes the initial response, then drains queued patches into JSON
    /// arrays of patch frames, one write per flush interval.
    pub async fn resolve_graphql_streaming_response<W: FlushWriter>(
        &self,
        ctx: &mut Context,
        response: &GraphQLStreamingResponse,
        data: &[u8],
        writer: &mut W,
    ) -> Result<(), ResolveError> {
        if !ctx.is_reset() {
            return Err(ResolveError::InvalidContext);
        }

        self.resolve_graphql_response(ctx, &response.initial_response, data, writer)
            .await?;
        writer.flush()?;

        let flush_interval = Duration::from_millis(response.flush_interval_ms);
        let mut next_flush = Instant::now() + flush_interval;

        let cancellation = ctx.cancellation().clone();
        let mut buf = pool::acquire_buf();
        buf.put_slice(LBRACK);

        loop {
            if cancellation.is_cancelled() {
                return Ok(());
            }
            let Some(patch) = ctx.pop_next_patch() else { break };
            if patch.index >= response.patches.len() {
                continue;
            }
            if buf.len() != 1 {
                buf.put_slice(COMMA);
            }
            let prepared_patch = &response.patches[patch.index];
            let mut frame_writer = (&mut *buf).writer();
            self.resolve_graphql_response_patch(
                ctx,
                prepared_patch,
                &patch.data,
                &patch.path,
                patch.extra_path.as_deref(),
                &mut frame_writer,
            )
            .await?;

            if Instant::now() >= next_flush {
                buf.put_slice(RBRACK);
                writer.write_all(&buf)?;
                writer.flush()?;
                buf.clear();
                buf.put_slice(LBRACK);
                next_flush = Instant::now() + flush_interval;
            }
        }

        if buf.len() != 1 {
            buf.put_slice(RBRACK);
            writer.write_all(&buf)?;
            writer.flush()?;
        }

        Ok(())
    }

    /// Renders one pre-planned patch against `data` and emits it as a
    /// `{"op":...,"path":...,"value":...}` frame. A patch whose subtree
    /// produced errors is dropped without emission.
    pub async fn resolve_graphql_response_patch<W: FlushWriter>(
        &self,
        ctx: &mut Context,
        patch: &GraphQLResponsePatch,
        data: &[u8],
        path: &[u8],
        extra_path: Option<&[u8]>,
        writer: &mut W,
    ) -> Result<(), ResolveError> {
        let mut buf = self.get_buf_pair();
        ctx.set_path_prefix(path, extra_path.unwrap_or(&[]));

        let mut set = None;
        if let Some(fetch) = &patch.fetch {
            let mut result_set = self.get_result_set();
            match self.resolve_fetch(ctx, fetch, data, &mut result_set).await {
                Ok(()) => {
                    if let Some(buffer) = result_set.buffers.get_mut(&0) {
                        buf.merge_errors(buffer);
                    }
                    set = Some(result_set);
                }
                Err(err) => {
                    self.free_result_set(result_set);
                    self.free_buf_pair(buf);
                    return Err(err);
                }
            }
        }
        let mut data = data;
        if let Some(set) = &set {
            if let Some(buffer) = set.buffers.get(&0) {
                data = &buffer.data;
            }
        }

        let resolve_result = self.resolve_node(ctx, &patch.value, data, &mut buf).await;
        if let Err(err) = resolve_result {
            if let Some(set) = set {
                self.free_result_set(set);
            }
            self.free_buf_pair(buf);
            return Err(err);
        }

        let emit_result = if !buf.has_errors() && buf.has_data() {
            write_patch_frame(&patch.operation, path, &buf.data, writer)
        } else {
            Ok(())
        };
        if let Some(set) = set {
            self.free_result_set(set);
        }
        self.free_buf_pair(buf);
        emit_result
    }

    pub(crate) fn get_buf_pair(&self) -> BufPair {
        self.buf_pairs.get_or(BufPair::new)
    }

    pub(crate) fn free_buf_pair(&self, mut pair: BufPair) {
        pair.reset();
        self.buf_pairs.put(pair);
    }

    pub(crate) fn get_result_set(&self) -> ResultSet {
        self.result_sets.get_or(ResultSet::default)
    }

    pub(crate) fn free_result_set(&self, mut set: ResultSet) {
        for (_, mut pair) in set.buffers.drain() {
            pair.reset();
            self.buf_pairs.put(pair);
        }
        self.result_sets.put(set);
    }
}

/// Serializes the response envelope. `errors` is omitted when empty; `data`
/// is always present and becomes `null` when the walk failed on a
/// non-nullable root.
fn write_graphql_response<W: FlushWriter>(
    buf: &BufPair,
    writer: &mut W,
    ignore_data: bool,
) -> Result<(), ResolveError> {
    let has_errors = buf.has_errors();
    let has_data = buf.has_data() && !ignore_data;

    writer.write_all(b"{")?;
    if has_errors {
        writer.write_all(b"\"errors\":[")?;
        writer.write_all(&buf.errors)?;
        writer.write_all(b"],")?;
    }
    writer.write_all(b"\"data\":")?;
    if has_data {
        writer.write_all(&buf.data)?;
    } else {
        writer.write_all(NULL)?;
    }
    writer.write_all(RBRACE)?;
    Ok(())
}

fn write_patch_frame<W: FlushWriter>(
    operation: &[u8],
    path: &[u8],
    value: &[u8],
    writer: &mut W,
) -> Result<(), ResolveError> {
    writer.write_all(b"{\"op\":\"")?;
    writer.write_all(operation)?;
    writer.write_all(b"\",\"path\":\"")?;
    writer.write_all(path)?;
    writer.write_all(b"\",\"value\":")?;
    writer.write_all(value)?;
    writer.write_all(RBRACE)?;
    Ok(())
}
