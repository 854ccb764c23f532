use std::sync::Arc;

use bytes::{BufMut, Bytes};
use http::HeaderMap;
use tokio_util::sync::CancellationToken;

use crate::consts::{LITERAL_DATA, SLASH};
use crate::pool::{self, PooledBuf};
use crate::sources::{AfterFetchHook, BeforeFetchHook, HookContext};

/// Source position of the field currently being resolved, stamped into
/// synthetic error locations.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Position {
    pub line: u32,
    pub column: u32,
}

/// The client request surface visible to input templates.
#[derive(Debug, Default)]
pub struct Request {
    pub header: HeaderMap,
}

#[derive(Debug, Clone)]
pub(crate) enum PathElement {
    Key(Bytes),
    Index(usize),
}

/// A queued instruction to later render a subtree as a JSON-Patch frame.
/// Path and payload buffers are leased from the shared pool and return to it
/// when the patch is dropped.
pub(crate) struct Patch {
    pub(crate) index: usize,
    pub(crate) path: PooledBuf,
    pub(crate) extra_path: Option<Bytes>,
    pub(crate) data: PooledBuf,
}

/// Per-request state, exclusively owned by the caller. A context is created
/// empty, mutated during the walk, and must be [`reset`](Context::reset)
/// before it can serve another request; resetting releases every pooled
/// buffer the request leased.
pub struct Context {
    cancellation: CancellationToken,
    /// Request variables as raw JSON, addressed by context variables.
    pub variables: Bytes,
    pub request: Request,
    path_elements: Vec<PathElement>,
    patches: Vec<Option<Patch>>,
    current_patch: usize,
    path_prefix: Vec<u8>,
    before_fetch_hook: Option<Arc<dyn BeforeFetchHook>>,
    after_fetch_hook: Option<Arc<dyn AfterFetchHook>>,
    position: Position,
}

impl Context {
    pub fn new(cancellation: CancellationToken) -> Self {
        Context {
            cancellation,
            variables: Bytes::new(),
            request: Request::default(),
            path_elements: Vec::with_capacity(16),
            patches: Vec::with_capacity(8),
            current_patch: 0,
            path_prefix: Vec::new(),
            before_fetch_hook: None,
            after_fetch_hook: None,
            position: Position::default(),
        }
    }

    /// Returns the context to its initial state, handing all leased buffers
    /// back to the pool.
    pub fn reset(&mut self) {
        self.variables = Bytes::new();
        self.request.header = HeaderMap::new();
        self.path_elements.clear();
        self.patches.clear();
        self.current_patch = 0;
        self.path_prefix.clear();
        self.before_fetch_hook = None;
        self.after_fetch_hook = None;
        self.position = Position::default();
    }

    pub fn set_before_fetch_hook(&mut self, hook: Arc<dyn BeforeFetchHook>) {
        self.before_fetch_hook = Some(hook);
    }

    pub fn set_after_fetch_hook(&mut self, hook: Arc<dyn AfterFetchHook>) {
        self.after_fetch_hook = Some(hook);
    }

    pub(crate) fn before_fetch_hook(&self) -> Option<&Arc<dyn BeforeFetchHook>> {
        self.before_fetch_hook.as_ref()
    }

    pub(crate) fn after_fetch_hook(&self) -> Option<&Arc<dyn AfterFetchHook>> {
        self.after_fetch_hook.as_ref()
    }

    pub(crate) fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub(crate) fn position(&self) -> Position {
        self.position
    }

    pub(crate) fn set_position(&mut self, position: Position) {
        self.position = position;
    }

    pub(crate) fn add_path_element(&mut self, name: Bytes) {
        self.path_elements.push(PathElement::Key(name));
    }

    pub(crate) fn add_index_path_element(&mut self, index: usize) {
        self.path_elements.push(PathElement::Index(index));
    }

    pub(crate) fn remove_last_path_element(&mut self) {
        self.path_elements.pop();
    }

    pub(crate) fn path_elements(&self) -> &[PathElement] {
        &self.path_elements
    }

    pub(crate) fn set_path_prefix(&mut self, path: &[u8], extra_path: &[u8]) {
        self.path_prefix.clear();
        self.path_prefix.extend_from_slice(path);
        self.path_prefix.extend_from_slice(extra_path);
    }

    /// Renders the current location as a JSON pointer into a pooled buffer.
    /// The root prefix is `/data` unless a patch overrode it; a leading
    /// `data` path element is elided so it can serve as a synthetic root
    /// marker without being emitted twice.
    pub(crate) fn path(&self) -> PooledBuf {
        let mut buf = pool::acquire_buf();
        if !self.path_prefix.is_empty() {
            buf.put_slice(&self.path_prefix);
        } else {
            buf.put_slice(SLASH);
            buf.put_slice(LITERAL_DATA);
        }
        for (i, element) in self.path_elements.iter().enumerate() {
            if i == 0 {
                if let PathElement::Key(key) = element {
                    if key.as_ref() == LITERAL_DATA {
                        continue;
                    }
                }
            }
            buf.put_slice(SLASH);
            match element {
                PathElement::Key(key) => buf.put_slice(key),
                PathElement::Index(index) => {
                    let mut digits = itoa::Buffer::new();
                    buf.put_slice(digits.format(*index).as_bytes());
                }
            }
        }
        buf
    }

    pub(crate) fn add_patch(
        &mut self,
        index: usize,
        path: PooledBuf,
        extra_path: Option<Bytes>,
        data: PooledBuf,
    ) {
        self.patches.push(Some(Patch {
            index,
            path,
            extra_path,
            data,
        }));
    }

    pub(crate) fn pop_next_patch(&mut self) -> Option<Patch> {
        let slot = self.patches.get_mut(self.current_patch)?;
        self.current_patch += 1;
        slot.take()
    }

    /// Whether this context is still in its freshly-created (or freshly
    /// reset) state with respect to the patch queue.
    pub(crate) fn is_reset(&self) -> bool {
        self.patches.is_empty() && self.current_patch == 0
    }
}

impl Clone for Context {
    /// Deep copy for fan-out tasks: variables, path prefix, path stack, and
    /// a snapshot of the patch queue are copied; hooks are shared by
    /// reference and the buffer-lease set starts empty (the clone leases its
    /// own patch buffers from the pool).
    fn clone(&self) -> Self {
        let patches = self
            .patches
            .iter()
            .map(|slot| {
                slot.as_ref().map(|patch| {
                    let mut path = pool::acquire_buf();
                    path.put_slice(&patch.path);
                    let mut data = pool::acquire_buf();
                    data.put_slice(&patch.data);
                    Patch {
                        index: patch.index,
                        path,
                        extra_path: patch.extra_path.clone(),
                        data,
                    }
                })
            })
            .collect();
        Context {
            cancellation: self.cancellation.clone(),
            variables: self.variables.clone(),
            request: Request {
                header: self.request.header.clone(),
            },
            path_elements: self.path_elements.clone(),
            patches,
            current_patch: self.current_patch,
            path_prefix: self.path_prefix.clone(),
            before_fetch_hook: self.before_fetch_hook.clone(),
            after_fetch_hook: self.after_fetch_hook.clone(),
            position: self.position,
        }
    }
}

pub(crate) fn hook_context<'a>(path: &'a PooledBuf) -> HookContext<'a> {
    HookContext {
        current_path: &path[..],
    }
}
