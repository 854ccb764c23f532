use std::collections::HashMap;
use std::hash::BuildHasherDefault;

use ahash::AHasher;
use bytes::{BufMut, Bytes};
use futures::future::join_all;
use tracing::{debug, trace};
use xxhash_rust::xxh3::Xxh3;

use crate::buffer::BufPair;
use crate::context::{hook_context, Context};
use crate::error::ResolveError;
use crate::extract::extract_response;
use crate::plan::{Fetch, SingleFetch};
use crate::pool;
use crate::resolve::Resolver;
use crate::sources::DataSourceError;

pub(crate) type ABuildHasher = BuildHasherDefault<AHasher>;

/// Per-object scratch map routing each fetch result into the buffer its
/// fields consume.
#[derive(Default)]
pub(crate) struct ResultSet {
    pub(crate) buffers: HashMap<usize, BufPair>,
}

/// The outcome of one upstream load, shared between a single-flight leader
/// and its waiters. The `Arc` holding it keeps the entry alive until the
/// last waiter has copied it out.
pub(crate) struct SharedLoad {
    pub(crate) data: Bytes,
    pub(crate) errors: Bytes,
    pub(crate) error: Option<DataSourceError>,
}

fn fetch_fingerprint(data_source_identifier: &[u8], input: &[u8]) -> u64 {
    let mut hasher = Xxh3::new();
    hasher.update(data_source_identifier);
    hasher.update(input);
    hasher.digest()
}

impl Resolver {
    /// Runs a fetch node, routing each result into `set` keyed by buffer id.
    /// Parallel children render their inputs up front and run concurrently;
    /// each writes only to its own slot.
    pub(crate) async fn resolve_fetch(
        &self,
        ctx: &mut Context,
        fetch: &Fetch,
        data: &[u8],
        set: &mut ResultSet,
    ) -> Result<(), ResolveError> {
        match fetch {
            Fetch::Single(single) => {
                let mut prepared = self.get_buf_pair();
                if let Err(err) = single.input_template.render(ctx, data, &mut prepared.data) {
                    self.free_buf_pair(prepared);
                    return Err(err);
                }
                let mut out = self.get_buf_pair();
                let result = self
                    .resolve_single_fetch(ctx, single, &prepared.data, &mut out)
                    .await;
                set.buffers.insert(single.buffer_id, out);
                self.free_buf_pair(prepared);
                result
            }
            Fetch::Parallel(parallel) => {
                let mut prepared_inputs = Vec::with_capacity(parallel.fetches.len());
                for single in &parallel.fetches {
                    let mut prepared = self.get_buf_pair();
                    if let Err(err) = single.input_template.render(ctx, data, &mut prepared.data)
                    {
                        self.free_buf_pair(prepared);
                        for prepared in prepared_inputs {
                            self.free_buf_pair(prepared);
                        }
                        return Err(err);
                    }
                    prepared_inputs.push(prepared);
                }

                let ctx_shared: &Context = ctx;
                let fetch_futures = parallel
                    .fetches
                    .iter()
                    .zip(prepared_inputs.iter())
                    .map(|(single, prepared)| async move {
                        let mut out = self.get_buf_pair();
                        let result = self
                            .resolve_single_fetch(ctx_shared, single, &prepared.data, &mut out)
                            .await;
                        (single.buffer_id, out, result)
                    });
                // Load failures still leave their extracted errors in the
                // per-fetch buffer; the walk carries on with whatever the
                // upstreams produced.
                for (buffer_id, out, _result) in join_all(fetch_futures).await {
                    set.buffers.insert(buffer_id, out);
                }
                for prepared in prepared_inputs {
                    self.free_buf_pair(prepared);
                }
                Ok(())
            }
        }
    }

    /// Loads one fetch, extracting the upstream envelope into `buf`. With
    /// single-flight enabled, identical concurrent fetches share one
    /// upstream call: the first becomes the leader and performs the load,
    /// later arrivals wait and copy the shared result.
    pub(crate) async fn resolve_single_fetch(
        &self,
        ctx: &Context,
        fetch: &SingleFetch,
        input: &[u8],
        buf: &mut BufPair,
    ) -> Result<(), ResolveError> {
        if let Some(hook) = ctx.before_fetch_hook() {
            let path = ctx.path();
            hook.on_before_fetch(hook_context(&path), input);
        }

        if !self.enable_single_flight_loader || fetch.disallow_single_flight {
            let mut data_buf = pool::acquire_buf();
            let load_result = fetch
                .data_source
                .load(ctx.cancellation(), input, &mut data_buf)
                .await;
            extract_response(&data_buf, buf, fetch.process_response_config);
            if let Some(hook) = ctx.after_fetch_hook() {
                let path = ctx.path();
                if buf.has_data() {
                    hook.on_data(hook_context(&path), &buf.data, false);
                }
                if buf.has_errors() {
                    hook.on_error(hook_context(&path), &buf.errors, false);
                }
            }
            return load_result.map_err(ResolveError::from);
        }

        let fetch_id = fetch_fingerprint(&fetch.data_source_identifier, input);
        // Clone the cell out of the map so the shard lock is released
        // before anyone waits on it.
        let cell = self
            .inflight_fetches
            .entry(fetch_id)
            .or_default()
            .value()
            .clone();

        let mut is_leader = false;
        let shared = cell
            .get_or_init(|| async {
                is_leader = true;
                let mut data_buf = pool::acquire_buf();
                let load_result = fetch
                    .data_source
                    .load(ctx.cancellation(), input, &mut data_buf)
                    .await;
                let mut pair = BufPair::new();
                extract_response(&data_buf, &mut pair, fetch.process_response_config);
                // Remove the entry before the cell resolves so no later
                // request joins a finished load.
                self.inflight_fetches.remove(&fetch_id);
                SharedLoad {
                    data: pair.data.freeze(),
                    errors: pair.errors.freeze(),
                    error: load_result.err(),
                }
            })
            .await;

        if is_leader {
            trace!(fetch_id, "single-flight load completed");
        } else {
            debug!(fetch_id, "joined in-flight fetch");
        }

        if !shared.data.is_empty() {
            if let Some(hook) = ctx.after_fetch_hook() {
                let path = ctx.path();
                hook.on_data(hook_context(&path), &shared.data, !is_leader);
            }
            buf.data.put_slice(&shared.data);
        }
        if !shared.errors.is_empty() {
            if let Some(hook) = ctx.after_fetch_hook() {
                let path = ctx.path();
                hook.on_error(hook_context(&path), &shared.errors, true);
            }
            buf.errors.put_slice(&shared.errors);
        }

        match &shared.error {
            Some(err) => Err(err.clone().into()),
            None => Ok(()),
        }
    }
}
