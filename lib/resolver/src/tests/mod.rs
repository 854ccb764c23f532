use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

use crate::context::{Context, Position};
use crate::error::ResolveError;
use crate::plan::{
    Array, ArrayStream, Defer, Fetch, Field, GraphQLResponse, GraphQLResponsePatch,
    GraphQLStreamingResponse, GraphQLSubscription, GraphQLSubscriptionTrigger, IntegerNode, Node,
    NullNode, Object, ParallelFetch, ProcessResponseConfig, SingleFetch, StringNode,
};
use crate::resolve::Resolver;
use crate::sources::DataSource;
use crate::template::{InputTemplate, TemplateSegment, VariableSource};
use crate::variables::Variables;


use fixtures::{
    EchoDataSource, FrameSource, RecordingHooks, StallingFrameSource, StaticDataSource,
    TestFlushWriter, UnresolvableSubscriptionSource,
};

fn to_path(path: &[&str]) -> Vec<String> {
    path.iter().map(|segment| segment.to_string()).collect()
}

fn field(name: &'static str, value: Node) -> Field {
    Field {
        name: Bytes::from_static(name.as_bytes()),
        value,
        position: Position::default(),
        defer: None,
        stream: None,
        has_buffer: false,
        buffer_id: 0,
        on_type_name: None,
    }
}

fn string(path: &[&str]) -> Node {
    Node::String(StringNode {
        path: to_path(path),
        nullable: false,
    })
}

fn integer(path: &[&str]) -> Node {
    Node::Integer(IntegerNode {
        path: to_path(path),
        nullable: false,
    })
}

fn object(fields: Vec<Field>) -> Node {
    Node::Object(Object {
        nullable: false,
        path: Vec::new(),
        fields,
        fetch: None,
    })
}

fn response(root: Node) -> GraphQLResponse {
    GraphQLResponse { data: root }
}

fn static_fetch(buffer_id: usize, data_source: Arc<dyn DataSource>, input: &'static [u8]) -> SingleFetch {
    SingleFetch {
        buffer_id,
        input_template: InputTemplate {
            segments: vec![TemplateSegment::Static(Bytes::from_static(input))],
        },
        data_source,
        data_source_identifier: Bytes::from_static(b"test-source"),
        disallow_single_flight: false,
        process_response_config: ProcessResponseConfig {
            extract_graphql_response: true,
            extract_federation_entities: false,
        },
    }
}

fn new_resolver() -> Resolver {
    Resolver::new(CancellationToken::new())
}

fn new_ctx() -> Context {
    Context::new(CancellationToken::new())
}

fn resolve_to_string(
    resolver: &Resolver,
    ctx: &mut Context,
    response: &GraphQLResponse,
    data: &[u8],
) -> String {
    tokio_test::block_on(async {
        let mut out = Vec::new();
        resolver
            .resolve_graphql_response(ctx, response, data, &mut out)
            .await
            .unwrap();
        String::from_utf8(out).unwrap()
    })
}

#[test]
fn resolves_a_plain_string_field() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let plan = response(object(vec![field("hello", string(&["hello"]))]));
    let out = resolve_to_string(&resolver, &mut ctx, &plan, br#"{"data":{"hello":"world"}}"#);
    assert_eq!(out, r#"{"data":{"hello":"world"}}"#);
}

#[test]
fn non_nullable_missing_leaf_nulls_the_response() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let plan = response(object(vec![
        field("hello", string(&["hello"])),
        field("n", integer(&["n"])),
    ]));
    let out = resolve_to_string(&resolver, &mut ctx, &plan, br#"{"data":{"hello":"world"}}"#);
    assert_eq!(
        out,
        r#"{"errors":[{"message":"unable to resolve","locations":[{"line":0,"column":0}],"path":["n"]}],"data":null}"#
    );
}

#[test]
fn nearest_nullable_ancestor_catches_the_null() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let inner = Node::Object(Object {
        nullable: true,
        path: to_path(&["obj"]),
        fields: vec![field("n", integer(&["n"]))],
        fetch: None,
    });
    let plan = response(object(vec![field("obj", inner)]));
    let out = resolve_to_string(&resolver, &mut ctx, &plan, br#"{"data":{"obj":{"x":1}}}"#);
    assert_eq!(out, r#"{"data":{"obj":null}}"#);
}

#[test]
fn field_order_follows_the_plan() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let plan = response(object(vec![
        field("c", string(&["c"])),
        field("a", string(&["a"])),
        field("b", string(&["b"])),
    ]));
    let out = resolve_to_string(
        &resolver,
        &mut ctx,
        &plan,
        br#"{"data":{"a":"1","b":"2","c":"3"}}"#,
    );
    assert_eq!(out, r#"{"data":{"c":"3","a":"1","b":"2"}}"#);
}

#[test]
fn type_name_gates_fields() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let mut meow = field("meow", string(&["meow"]));
    meow.on_type_name = Some(Bytes::from_static(b"Cat"));
    let mut woof = field("woof", string(&["woof"]));
    woof.on_type_name = Some(Bytes::from_static(b"Dog"));
    let plan = response(object(vec![field("name", string(&["name"])), meow, woof]));
    let out = resolve_to_string(
        &resolver,
        &mut ctx,
        &plan,
        br#"{"data":{"__typename":"Cat","name":"whiskers","meow":"yes","woof":"no"}}"#,
    );
    assert_eq!(out, r#"{"data":{"name":"whiskers","meow":"yes"}}"#);
}

#[test]
fn fully_gated_object_is_elided() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let mut woof = field("woof", string(&["woof"]));
    woof.on_type_name = Some(Bytes::from_static(b"Dog"));
    let pet = Node::Object(Object {
        nullable: false,
        path: to_path(&["pet"]),
        fields: vec![woof],
        fetch: None,
    });
    let plan = response(object(vec![field("pet", pet)]));
    let out = resolve_to_string(
        &resolver,
        &mut ctx,
        &plan,
        br#"{"data":{"pet":{"__typename":"Cat"}}}"#,
    );
    assert_eq!(out, r#"{"data":{}}"#);
}

#[test]
fn gated_array_elements_are_skipped() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let mut woof = field("woof", string(&["woof"]));
    woof.on_type_name = Some(Bytes::from_static(b"Dog"));
    let item = object(vec![woof]);
    let plan = response(object(vec![field(
        "pets",
        Node::Array(Array {
            nullable: false,
            path: to_path(&["pets"]),
            item: Box::new(item),
            resolve_asynchronous: false,
            stream: ArrayStream::default(),
        }),
    )]));
    let out = resolve_to_string(
        &resolver,
        &mut ctx,
        &plan,
        br#"{"data":{"pets":[{"__typename":"Dog","woof":"w"},{"__typename":"Cat"}]}}"#,
    );
    assert_eq!(out, r#"{"data":{"pets":[{"woof":"w"}]}}"#);
}

#[test]
fn empty_array_handling_depends_on_nullability() {
    let resolver = new_resolver();

    let mut ctx = new_ctx();
    let nullable_plan = response(object(vec![field(
        "items",
        Node::Array(Array {
            nullable: true,
            path: to_path(&["list"]),
            item: Box::new(integer(&["i"])),
            resolve_asynchronous: false,
            stream: ArrayStream::default(),
        }),
    )]));
    let out = resolve_to_string(&resolver, &mut ctx, &nullable_plan, br#"{"data":{"list":[]}}"#);
    assert_eq!(out, r#"{"data":{"items":null}}"#);

    let mut ctx = new_ctx();
    let strict_plan = response(object(vec![field(
        "items",
        Node::Array(Array {
            nullable: false,
            path: to_path(&["list"]),
            item: Box::new(integer(&["i"])),
            resolve_asynchronous: false,
            stream: ArrayStream::default(),
        }),
    )]));
    let out = resolve_to_string(&resolver, &mut ctx, &strict_plan, br#"{"data":{"list":[]}}"#);
    assert_eq!(
        out,
        r#"{"errors":[{"message":"unable to resolve","locations":[{"line":0,"column":0}],"path":["items"]}],"data":null}"#
    );
}

fn echo_item(echo: &Arc<EchoDataSource>) -> Node {
    Node::Object(Object {
        nullable: false,
        path: Vec::new(),
        fields: vec![Field {
            has_buffer: true,
            buffer_id: 0,
            ..field("i", integer(&["i"]))
        }],
        fetch: Some(Fetch::Single(SingleFetch {
            buffer_id: 0,
            input_template: InputTemplate {
                segments: vec![TemplateSegment::Variable {
                    source: VariableSource::Object,
                    path: Vec::new(),
                    render_as_graphql_value: false,
                }],
            },
            data_source: echo.clone(),
            data_source_identifier: Bytes::from_static(b"echo"),
            disallow_single_flight: false,
            process_response_config: ProcessResponseConfig {
                extract_graphql_response: true,
                extract_federation_entities: false,
            },
        })),
    })
}

fn items_array(item: Node, asynchronous: bool) -> GraphQLResponse {
    response(object(vec![field(
        "items",
        Node::Array(Array {
            nullable: false,
            path: to_path(&["list"]),
            item: Box::new(item),
            resolve_asynchronous: asynchronous,
            stream: ArrayStream::default(),
        }),
    )]))
}

#[test]
fn asynchronous_array_preserves_element_order() {
    // Delays are inverted so later elements complete first; the output must
    // still follow input order and match the synchronous rendering.
    let data: &[u8] = br#"{"data":{"list":[{"d":50,"i":0},{"d":35,"i":1},{"d":25,"i":2},{"d":15,"i":3},{"d":5,"i":4}]}}"#;
    let echo = Arc::new(EchoDataSource);
    let resolver = new_resolver();

    let mut ctx = new_ctx();
    let async_plan = items_array(echo_item(&echo), true);
    let async_out = resolve_to_string(&resolver, &mut ctx, &async_plan, data);

    let mut ctx = new_ctx();
    let sync_plan = items_array(echo_item(&echo), false);
    let sync_out = resolve_to_string(&resolver, &mut ctx, &sync_plan, data);

    assert_eq!(
        async_out,
        r#"{"data":{"items":[{"i":0},{"i":1},{"i":2},{"i":3},{"i":4}]}}"#
    );
    assert_eq!(async_out, sync_out);
}

#[test]
fn parallel_fetches_fill_separate_buffers() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let source_a = StaticDataSource::new(br#"{"data":{"a":1}}"#);
    let source_b = StaticDataSource::new(br#"{"data":{"b":2}}"#);
    let root = Node::Object(Object {
        nullable: false,
        path: Vec::new(),
        fields: vec![
            Field {
                has_buffer: true,
                buffer_id: 0,
                ..field("a", integer(&["a"]))
            },
            Field {
                has_buffer: true,
                buffer_id: 1,
                ..field("b", integer(&["b"]))
            },
        ],
        fetch: Some(Fetch::Parallel(ParallelFetch {
            fetches: vec![
                static_fetch(0, source_a.clone(), b"{}"),
                static_fetch(1, source_b.clone(), b"{}"),
            ],
        })),
    });
    let plan = response(root);
    let out = resolve_to_string(&resolver, &mut ctx, &plan, b"{}");
    assert_eq!(out, r#"{"data":{"a":1,"b":2}}"#);
    assert_eq!(source_a.loads.load(Ordering::SeqCst), 1);
    assert_eq!(source_b.loads.load(Ordering::SeqCst), 1);
}

#[test]
fn identical_concurrent_fetches_are_coalesced() {
    tokio_test::block_on(async {
        let gate = Arc::new(Notify::new());
        let source = StaticDataSource::gated(br#"{"data":{"x":1}}"#, gate.clone());
        let hooks = Arc::new(RecordingHooks::default());

        let mut resolver = new_resolver();
        resolver.enable_single_flight_loader = true;
        let resolver = resolver;

        let root = Node::Object(Object {
            nullable: false,
            path: Vec::new(),
            fields: vec![Field {
                has_buffer: true,
                buffer_id: 0,
                ..field("x", integer(&["x"]))
            }],
            fetch: Some(Fetch::Single(static_fetch(0, source.clone(), b"{}"))),
        });
        let plan = response(root);

        let mut ctx_one = new_ctx();
        ctx_one.set_before_fetch_hook(hooks.clone());
        ctx_one.set_after_fetch_hook(hooks.clone());
        let mut ctx_two = new_ctx();
        ctx_two.set_before_fetch_hook(hooks.clone());
        ctx_two.set_after_fetch_hook(hooks.clone());

        let mut out_one = Vec::new();
        let mut out_two = Vec::new();
        let first = resolver.resolve_graphql_response(&mut ctx_one, &plan, b"{}", &mut out_one);
        let second = resolver.resolve_graphql_response(&mut ctx_two, &plan, b"{}", &mut out_two);
        let release = async {
            tokio::time::sleep(Duration::from_millis(20)).await;
            gate.notify_one();
        };
        let (first, second, _) = tokio::join!(first, second, release);
        first.unwrap();
        second.unwrap();

        assert_eq!(source.loads.load(Ordering::SeqCst), 1);
        assert_eq!(out_one, out_two);
        assert_eq!(
            String::from_utf8(out_one).unwrap(),
            r#"{"data":{"x":1}}"#
        );
        assert_eq!(hooks.before.lock().unwrap().len(), 2);
        let mut flags: Vec<bool> = hooks
            .data
            .lock()
            .unwrap()
            .iter()
            .map(|(_, single_flight)| *single_flight)
            .collect();
        flags.sort();
        assert_eq!(flags, vec![false, true]);
        assert!(hooks.errors.lock().unwrap().is_empty());
    });
}

#[test]
fn unquoted_word_payloads_are_accepted_for_path_free_strings() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let plan = response(object(vec![field(
        "words",
        Node::Array(Array {
            nullable: false,
            path: to_path(&["words"]),
            item: Box::new(Node::String(StringNode {
                path: Vec::new(),
                nullable: false,
            })),
            resolve_asynchronous: false,
            stream: ArrayStream::default(),
        }),
    )]));
    let out = resolve_to_string(
        &resolver,
        &mut ctx,
        &plan,
        br#"{"data":{"words":["alpha","beta"]}}"#,
    );
    assert_eq!(out, r#"{"data":{"words":["alpha","beta"]}}"#);

    // A payload that is neither a JSON string nor letter-led fails the
    // non-nullable leaf.
    let mut ctx = new_ctx();
    let plan = response(object(vec![field(
        "words",
        Node::Array(Array {
            nullable: false,
            path: to_path(&["words"]),
            item: Box::new(Node::String(StringNode {
                path: Vec::new(),
                nullable: false,
            })),
            resolve_asynchronous: false,
            stream: ArrayStream::default(),
        }),
    )]));
    let out = resolve_to_string(&resolver, &mut ctx, &plan, br#"{"data":{"words":[123]}}"#);
    assert_eq!(
        out,
        r#"{"errors":[{"message":"unable to resolve","locations":[{"line":0,"column":0}],"path":["words"]}],"data":null}"#
    );
}

#[test]
fn upstream_envelope_errors_are_forwarded() {
    let resolver = new_resolver();
    let mut ctx = new_ctx();
    let plan = response(object(vec![field("hello", string(&["hello"]))]));
    let out = resolve_to_string(
        &resolver,
        &mut ctx,
        &plan,
        br#"{"data":{"hello":"world"},"errors":[{"message":"upstream broke"}]}"#,
    );
    assert_eq!(
        out,
        r#"{"errors":[{"message":"upstream broke"}],"data":{"hello":"world"}}"#
    );
}

fn streamed_item() -> Node {
    object(vec![field("i", integer(&["i"]))])
}

#[test]
fn streaming_array_emits_initial_batch_then_patches() {
    tokio_test::block_on(async {
        let initial = response(object(vec![field(
            "list",
            Node::Array(Array {
                nullable: false,
                path: to_path(&["list"]),
                item: Box::new(streamed_item()),
                resolve_asynchronous: false,
                stream: ArrayStream {
                    enabled: true,
                    initial_batch_size: 1,
                    patch_index: 0,
                },
            }),
        )]));
        let streaming = GraphQLStreamingResponse {
            initial_response: initial,
            patches: vec![GraphQLResponsePatch {
                value: streamed_item(),
                fetch: None,
                operation: Bytes::from_static(b"add"),
            }],
            flush_interval_ms: 10,
        };
        let resolver = new_resolver();
        let mut ctx = new_ctx();
        let mut writer = TestFlushWriter::default();
        resolver
            .resolve_graphql_streaming_response(
                &mut ctx,
                &streaming,
                br#"{"data":{"list":[{"i":0},{"i":1},{"i":2}]}}"#,
                &mut writer,
            )
            .await
            .unwrap();
        assert_eq!(
            writer.flushed,
            vec![
                r#"{"data":{"list":[{"i":0}]}}"#.to_string(),
                r#"[{"op":"add","path":"/data/list/1","value":{"i":1}},{"op":"add","path":"/data/list/2","value":{"i":2}}]"#
                    .to_string(),
            ]
        );
    });
}

#[test]
fn deferred_null_enqueues_a_patch() {
    tokio_test::block_on(async {
        let initial = response(object(vec![field(
            "lazy",
            Node::Null(NullNode {
                defer: Defer {
                    enabled: true,
                    patch_index: 0,
                },
            }),
        )]));
        let streaming = GraphQLStreamingResponse {
            initial_response: initial,
            patches: vec![GraphQLResponsePatch {
                value: object(vec![field("x", integer(&["x"]))]),
                fetch: None,
                operation: Bytes::from_static(b"add"),
            }],
            flush_interval_ms: 10,
        };
        let resolver = new_resolver();
        let mut ctx = new_ctx();
        let mut writer = TestFlushWriter::default();
        resolver
            .resolve_graphql_streaming_response(&mut ctx, &streaming, br#"{"data":{"x":5}}"#, &mut writer)
            .await
            .unwrap();
        assert_eq!(
            writer.flushed,
            vec![
                r#"{"data":{"lazy":null}}"#.to_string(),
                r#"[{"op":"add","path":"/data/lazy","value":{"x":5}}]"#.to_string(),
            ]
        );
    });
}

#[test]
fn streaming_requires_a_reset_context() {
    tokio_test::block_on(async {
        let streaming = GraphQLStreamingResponse {
            initial_response: response(object(vec![field(
                "lazy",
                Node::Null(NullNode {
                    defer: Defer {
                        enabled: true,
                        patch_index: 0,
                    },
                }),
            )])),
            patches: vec![GraphQLResponsePatch {
                value: object(vec![field("x", integer(&["x"]))]),
                fetch: None,
                operation: Bytes::from_static(b"add"),
            }],
            flush_interval_ms: 10,
        };
        let resolver = new_resolver();
        let mut ctx = new_ctx();
        let mut writer = TestFlushWriter::default();
        resolver
            .resolve_graphql_streaming_response(&mut ctx, &streaming, br#"{"data":{"x":5}}"#, &mut writer)
            .await
            .unwrap();

        let err = resolver
            .resolve_graphql_streaming_response(&mut ctx, &streaming, br#"{"data":{"x":5}}"#, &mut writer)
            .await
            .unwrap_err();
        assert!(matches!(err, ResolveError::InvalidContext));

        ctx.reset();
        resolver
            .resolve_graphql_streaming_response(&mut ctx, &streaming, br#"{"data":{"x":5}}"#, &mut writer)
            .await
            .unwrap();
    });
}

fn counter_subscription(source: Arc<dyn crate::sources::SubscriptionDataSource>) -> GraphQLSubscription {
    GraphQLSubscription {
        trigger: GraphQLSubscriptionTrigger {
            input_template: InputTemplate {
                segments: vec![TemplateSegment::Static(Bytes::from_static(
                    br#"{"topic":"counter"}"#,
                ))],
            },
            variables: Variables::default(),
            source,
        },
        response: response(object(vec![field("counter", integer(&["counter"]))])),
    }
}

#[test]
fn subscription_renders_each_frame() {
    tokio_test::block_on(async {
        let source = Arc::new(FrameSource {
            frames: vec![
                Bytes::from_static(br#"{"data":{"counter":0}}"#),
                Bytes::from_static(br#"{"data":{"counter":1}}"#),
                Bytes::from_static(br#"{"data":{"counter":2}}"#),
            ],
        });
        let subscription = counter_subscription(source);
        let resolver = new_resolver();
        let mut ctx = new_ctx();
        let mut writer = TestFlushWriter::default();
        resolver
            .resolve_graphql_subscription(&mut ctx, &subscription, &mut writer)
            .await
            .unwrap();
        assert_eq!(
            writer.flushed,
            vec![
                r#"{"data":{"counter":0}}"#.to_string(),
                r#"{"data":{"counter":1}}"#.to_string(),
                r#"{"data":{"counter":2}}"#.to_string(),
            ]
        );
    });
}

#[test]
fn unresolvable_subscription_reports_a_single_error() {
    tokio_test::block_on(async {
        let subscription = counter_subscription(Arc::new(UnresolvableSubscriptionSource));
        let resolver = new_resolver();
        let mut ctx = new_ctx();
        let mut writer = TestFlushWriter::default();
        resolver
            .resolve_graphql_subscription(&mut ctx, &subscription, &mut writer)
            .await
            .unwrap();
        assert_eq!(
            writer.flushed,
            vec![r#"{"errors":[{"message":"unable to resolve"}]}"#.to_string()]
        );
    });
}

#[test]
fn resolver_cancellation_ends_subscriptions() {
    tokio_test::block_on(async {
        let cancellation = CancellationToken::new();
        let resolver = Resolver::new(cancellation.clone());
        let source = Arc::new(StallingFrameSource {
            frame: Bytes::from_static(br#"{"data":{"counter":0}}"#),
        });
        let subscription = counter_subscription(source);
        let mut ctx = new_ctx();
        let mut writer = TestFlushWriter::default();

        let driver = resolver.resolve_graphql_subscription(&mut ctx, &subscription, &mut writer);
        let canceller = async {
            tokio::time::sleep(Duration::from_millis(30)).await;
            cancellation.cancel();
        };
        let (result, _) = tokio::join!(driver, canceller);
        result.unwrap();
        assert_eq!(
            writer.flushed,
            vec![r#"{"data":{"counter":0}}"#.to_string()]
        );
    });
}
