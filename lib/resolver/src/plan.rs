//! The pre-planned execution tree. A plan is a schema-agnostic description
//! of the response shape with embedded fetch directives; the resolver walks
//! it against fetched data without ever consulting a schema.

use std::sync::Arc;

use bytes::Bytes;

use crate::context::Position;
use crate::sources::{DataSource, SubscriptionDataSource};
use crate::template::InputTemplate;
use crate::variables::Variables;

pub enum Node {
    Object(Object),
    EmptyObject,
    Array(Array),
    EmptyArray,
    Null(NullNode),
    String(StringNode),
    Boolean(BooleanNode),
    Integer(IntegerNode),
    Float(FloatNode),
}

pub struct Object {
    pub nullable: bool,
    /// Path into the parent data where this object's source record lives.
    pub path: Vec<String>,
    pub fields: Vec<Field>,
    /// Executed before the fields are rendered; results are keyed by buffer
    /// id and consumed by fields that declare `has_buffer`.
    pub fetch: Option<Fetch>,
}

pub struct Field {
    pub name: Bytes,
    pub value: Node,
    pub position: Position,
    pub defer: Option<DeferField>,
    pub stream: Option<StreamField>,
    pub has_buffer: bool,
    pub buffer_id: usize,
    /// Gates the field on the parent's `__typename` for union/interface
    /// selections.
    pub on_type_name: Option<Bytes>,
}

/// Marker left by the planner on fields selected with `@defer`; the plan
/// post-processor rewrites the affected subtree into a deferred `Null`.
pub struct DeferField;

pub struct StreamField {
    pub initial_batch_size: usize,
}

pub struct Array {
    pub nullable: bool,
    pub path: Vec<String>,
    pub item: Box<Node>,
    pub resolve_asynchronous: bool,
    pub stream: ArrayStream,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ArrayStream {
    pub enabled: bool,
    pub initial_batch_size: usize,
    pub patch_index: usize,
}

pub struct NullNode {
    pub defer: Defer,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct Defer {
    pub enabled: bool,
    pub patch_index: usize,
}

#[derive(Debug, Clone, Default)]
pub struct StringNode {
    pub path: Vec<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct BooleanNode {
    pub path: Vec<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct IntegerNode {
    pub path: Vec<String>,
    pub nullable: bool,
}

#[derive(Debug, Clone, Default)]
pub struct FloatNode {
    pub path: Vec<String>,
    pub nullable: bool,
}

pub enum Fetch {
    Single(SingleFetch),
    Parallel(ParallelFetch),
}

pub struct SingleFetch {
    pub buffer_id: usize,
    pub input_template: InputTemplate,
    pub data_source: Arc<dyn DataSource>,
    pub data_source_identifier: Bytes,
    /// Opts this fetch out of request coalescing, used for write operations
    /// that must reach the upstream even when an identical request is
    /// already in flight.
    pub disallow_single_flight: bool,
    pub process_response_config: ProcessResponseConfig,
}

#[derive(Debug, Clone, Copy, Default)]
pub struct ProcessResponseConfig {
    pub extract_graphql_response: bool,
    pub extract_federation_entities: bool,
}

pub struct ParallelFetch {
    pub fetches: Vec<SingleFetch>,
}

pub struct GraphQLResponse {
    pub data: Node,
}

pub struct GraphQLStreamingResponse {
    pub initial_response: GraphQLResponse,
    pub patches: Vec<GraphQLResponsePatch>,
    pub flush_interval_ms: u64,
}

pub struct GraphQLResponsePatch {
    pub value: Node,
    pub fetch: Option<Fetch>,
    /// JSON-Patch operation name, e.g. `add`.
    pub operation: Bytes,
}

pub struct GraphQLSubscription {
    pub trigger: GraphQLSubscriptionTrigger,
    pub response: GraphQLResponse,
}

pub struct GraphQLSubscriptionTrigger {
    pub input_template: InputTemplate,
    pub variables: Variables,
    pub source: Arc<dyn SubscriptionDataSource>,
}
