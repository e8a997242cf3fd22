// Copyright 2025 Crrow
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//      http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end pipeline tests: the middleware wraps a plain tower service
//! and is driven with `oneshot`, asserting on the events a capturing
//! logger observed and on what reached the wire.

use std::{
    convert::Infallible,
    sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use axum::body::Body;
use bytes::Bytes;
use http::{Request, Response, StatusCode, header::CONTENT_TYPE};
use http_body_util::BodyExt;
use reqlog::{
    HttpLogLayer, Options, RequestDeadline, RequestId,
    body::JsonSanitizer,
    capability::{CapturedEvent, CapturingLogger, LogLevel},
    config::CustomField,
    metrics::InMemoryMetricsRecorder,
    sample::{CompositeMode, CompositeSampler, NeverSampler, PathSampler, PathSamplingRule, RateSampler, Sampler},
    trace::{TraceFormat, TraceOptions},
};
use serde_json::{Value, json};
use tower::{Layer, ServiceExt, service_fn};

fn init_test_logging() { reqlog_telemetry::init_default_ut_logging(); }

fn capturing_options() -> (Options, CapturingLogger) {
    init_test_logging();
    let logger = CapturingLogger::new();
    let options = Options::builder()
        .log_capability(Arc::new(logger.clone()))
        .build();
    (options, logger)
}

fn wrap<S>(options: Options, service: S) -> reqlog::HttpLogService<S> {
    HttpLogLayer::new(options)
        .expect("valid options")
        .layer(service)
}

fn created_handler()
-> impl tower::Service<Request<Body>, Response = Response<Body>, Error = Infallible, Future: Send> + Clone + Send + 'static {
    service_fn(|_req: Request<Body>| async move {
        Ok::<_, Infallible>(
            Response::builder()
                .status(StatusCode::CREATED)
                .body(Body::from("created: yes!"))
                .unwrap(),
        )
    })
}

#[allow(unreachable_code)]
async fn panicking_handler(_req: Request<Body>) -> Result<Response<Body>, Infallible> {
    panic!("boom");
    Ok(Response::new(Body::empty()))
}

async fn read_body(body: Body) -> Bytes {
    body.collect().await.expect("collect body").to_bytes()
}

fn single_event(logger: &CapturingLogger) -> CapturedEvent {
    let events = logger.events();
    assert_eq!(events.len(), 1, "expected exactly one event: {events:?}");
    events.into_iter().next().unwrap()
}

// S1: skipped paths bypass the pipeline entirely.
#[tokio::test]
async fn skip_path_bypasses_pipeline() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.skip_paths = vec!["/health".to_string()];

    let invoked = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&invoked);
    let service = service_fn(move |_req: Request<Body>| {
        let seen = Arc::clone(&seen);
        async move {
            seen.store(true, Ordering::SeqCst);
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        }
    });

    let response = wrap(options, service)
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(invoked.load(Ordering::SeqCst));
    assert!(response.headers().get("x-request-id").is_none());
    assert!(logger.events().is_empty());
}

// S2: one information-level event with the standard record shape.
#[tokio::test]
async fn basic_logging_emits_one_enriched_event() {
    let (options, logger) = capturing_options();

    let response = wrap(options, created_handler())
        .oneshot(Request::get("/api/users").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(read_body(response.into_body()).await, Bytes::from("created: yes!"));

    let event = single_event(&logger);
    assert_eq!(event.level, LogLevel::Information);
    assert_eq!(
        event.template,
        "HTTP {Method} {Path} responded {StatusCode} in {duration_ms}ms"
    );
    assert!(event.message.starts_with("HTTP GET /api/users responded 201 in "));
    assert_eq!(event.property("Method"), Some(&json!("GET")));
    assert_eq!(event.property("Path"), Some(&json!("/api/users")));
    assert_eq!(event.property("StatusCode"), Some(&json!(201)));
    assert_eq!(event.property("Size"), Some(&json!(13)));
    assert!(
        event
            .property("RequestId")
            .and_then(Value::as_str)
            .is_some_and(|id| !id.is_empty())
    );
    assert!(
        event
            .property("duration_ms")
            .and_then(Value::as_u64)
            .is_some()
    );
}

// The request id is echoed on the response and reused when supplied.
#[tokio::test]
async fn request_id_is_echoed_and_inbound_ids_win() {
    let (options, _logger) = capturing_options();
    let response = wrap(options, created_handler())
        .oneshot(Request::get("/api/users").body(Body::empty()).unwrap())
        .await
        .unwrap();
    let generated = response
        .headers()
        .get("x-request-id")
        .expect("generated id")
        .to_str()
        .unwrap()
        .to_string();
    assert_eq!(generated.len(), 32);

    let (options, logger) = capturing_options();
    let response = wrap(options, created_handler())
        .oneshot(
            Request::get("/api/users")
                .header("X-Request-ID", "client-chosen-7")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(
        response.headers().get("x-request-id").unwrap(),
        "client-chosen-7"
    );
    assert_eq!(
        single_event(&logger).property("RequestId"),
        Some(&json!("client-chosen-7"))
    );
}

// S3: panics are contained, logged at error level and counted.
#[tokio::test]
async fn panic_is_recovered_logged_and_counted() {
    let (options, logger) = capturing_options();
    let mut options = options;
    let metrics = Arc::new(InMemoryMetricsRecorder::new(16));
    options.metrics_recorder = metrics.clone();

    let response = wrap(options, service_fn(panicking_handler))
        .oneshot(Request::get("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    assert_eq!(
        read_body(response.into_body()).await,
        Bytes::from("Internal Server Error")
    );

    let event = single_event(&logger);
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.message, "Panic in handler: boom");
    assert_eq!(event.property("Panic"), Some(&json!("boom")));
    assert_eq!(event.property("StatusCode"), Some(&json!(500)));

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.panics.len(), 1);
    assert_eq!(snapshot.panics[0].method, "GET");
    assert_eq!(snapshot.panics[0].path, "/x");
}

// A custom panic handler owns the wire response; the record still says 500.
#[tokio::test]
async fn custom_panic_handler_controls_the_response() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.panic_handler = Some(Arc::new(|_info, recovered| {
        Response::builder()
            .status(StatusCode::SERVICE_UNAVAILABLE)
            .body(Body::from(format!("recovered: {recovered}")))
            .unwrap()
    }));

    let response = wrap(options, service_fn(panicking_handler))
        .oneshot(Request::get("/x").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(
        read_body(response.into_body()).await,
        Bytes::from("recovered: boom")
    );
    let event = single_event(&logger);
    assert_eq!(event.property("StatusCode"), Some(&json!(500)));
}

// S4: the handler sees the original body; the record sees the redaction.
#[tokio::test]
async fn body_capture_redacts_record_but_not_handler() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.log_request_body = true;
    options.max_body_size = 1000;
    options.body_sanitizer = Some(Arc::new(JsonSanitizer::new()));

    let payload = r#"{"username":"john","password":"secret"}"#;
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let service = service_fn(move |req: Request<Body>| {
        let sink = Arc::clone(&sink);
        async move {
            let bytes = req.into_body().collect().await.unwrap().to_bytes();
            sink.lock().unwrap().extend_from_slice(&bytes);
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        }
    });

    let _ = wrap(options, service)
        .oneshot(
            Request::post("/login")
                .header(CONTENT_TYPE, "application/json")
                .body(Body::from(payload))
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(String::from_utf8(seen.lock().unwrap().clone()).unwrap(), payload);

    let event = single_event(&logger);
    let body = event
        .property("RequestBody")
        .and_then(Value::as_str)
        .expect("RequestBody property");
    assert!(body.contains(r#""password":"[REDACTED]""#));
    assert!(body.contains(r#""username":"john""#));
}

// S5: truncation clips the record while the handler reads everything.
#[tokio::test]
async fn truncated_capture_preserves_handler_bytes() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.log_request_body = true;
    options.max_body_size = 10;

    let payload: String = (0..50).map(|i| char::from(b'a' + (i % 26) as u8)).collect();
    let seen = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&seen);
    let service = service_fn(move |req: Request<Body>| {
        let sink = Arc::clone(&sink);
        async move {
            let bytes = req.into_body().collect().await.unwrap().to_bytes();
            sink.lock().unwrap().extend_from_slice(&bytes);
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        }
    });

    let _ = wrap(options, service)
        .oneshot(Request::post("/upload").body(Body::from(payload.clone())).unwrap())
        .await
        .unwrap();

    assert_eq!(seen.lock().unwrap().len(), 50);

    let event = single_event(&logger);
    assert_eq!(
        event.property("RequestBody"),
        Some(&json!(format!("{}...[truncated]", &payload[..10])))
    );
}

// Response capture: the wire bytes match the handler's, the record is
// clipped.
#[tokio::test]
async fn response_capture_passes_bytes_through() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.log_response_body = true;
    options.max_body_size = 8;

    let service = service_fn(|_req: Request<Body>| async move {
        Ok::<_, Infallible>(Response::new(Body::from("a response body")))
    });

    let response = wrap(options, service)
        .oneshot(Request::get("/api").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(read_body(response.into_body()).await, Bytes::from("a response body"));

    let event = single_event(&logger);
    assert_eq!(event.property("Size"), Some(&json!(15)));
    assert_eq!(
        event.property("ResponseBody"),
        Some(&json!("a respon...[truncated]"))
    );
}

// S6: W3C trace propagation end to end.
#[tokio::test]
async fn w3c_trace_context_is_bridged() {
    const TRACE: &str = "4bf92f3577b34da6a3ce929d0e0e4736";
    const PARENT: &str = "00f067aa0ba902b7";

    let (options, logger) = capturing_options();
    let mut options = options;
    options.trace = Some(TraceOptions::builder().format(TraceFormat::W3c).build());

    let response = wrap(options, created_handler())
        .oneshot(
            Request::get("/api/users")
                .header("traceparent", format!("00-{TRACE}-{PARENT}-01"))
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let event = single_event(&logger);
    assert_eq!(event.property("TraceId"), Some(&json!(TRACE)));
    assert_eq!(event.property("ParentSpanId"), Some(&json!(PARENT)));
    let span = event
        .property("SpanId")
        .and_then(Value::as_str)
        .expect("generated span id");
    assert_eq!(span.len(), 16);
    assert_ne!(span, PARENT);

    let echoed = response
        .headers()
        .get("traceparent")
        .expect("traceparent echoed")
        .to_str()
        .unwrap();
    assert!(echoed.contains(TRACE));
    assert!(echoed.contains(span));
}

// Baggage rides along under its prefix.
#[tokio::test]
async fn baggage_is_extracted_enriched_and_propagated() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.trace = Some(
        TraceOptions::builder()
            .format(TraceFormat::B3Multi)
            .baggage_prefix("x-baggage-".to_string())
            .build(),
    );

    let response = wrap(options, created_handler())
        .oneshot(
            Request::get("/api/users")
                .header("x-baggage-tenant", "acme")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(response.headers().get("x-baggage-tenant").unwrap(), "acme");
    let event = single_event(&logger);
    assert_eq!(event.property("Baggage.tenant"), Some(&json!("acme")));
}

// S7: composite AND of a path rule-set and a rate sampler.
#[tokio::test]
async fn composite_and_sampling_silences_health_checks() {
    let sampler = CompositeSampler::new(
        CompositeMode::And,
        vec![
            Arc::new(PathSampler::new(vec![
                PathSamplingRule::new("/health", 0.0),
                PathSamplingRule::new("*", 1.0),
            ])) as Arc<dyn Sampler>,
            Arc::new(RateSampler::new(1.0)) as Arc<dyn Sampler>,
        ],
    );

    let (options, logger) = capturing_options();
    let mut options = options;
    options.sampler = Arc::new(sampler);

    let service = wrap(options, created_handler());

    let _ = service
        .clone()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert!(logger.events().is_empty());

    let _ = service
        .oneshot(Request::get("/api/x").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(logger.events().len(), 1);
}

// A sampled-out request performs no observable pipeline work.
#[tokio::test]
async fn sampled_out_requests_are_untouched() {
    let (options, logger) = capturing_options();
    let mut options = options;
    options.sampler = Arc::new(NeverSampler);
    let metrics = Arc::new(InMemoryMetricsRecorder::new(16));
    options.metrics_recorder = metrics.clone();

    let invoked = Arc::new(AtomicBool::new(false));
    let seen = Arc::clone(&invoked);
    let service = service_fn(move |req: Request<Body>| {
        let seen = Arc::clone(&seen);
        async move {
            seen.store(true, Ordering::SeqCst);
            assert!(req.extensions().get::<RequestId>().is_none());
            Ok::<_, Infallible>(Response::new(Body::from("ok")))
        }
    });

    let response = wrap(options, service)
        .oneshot(Request::get("/api").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert!(invoked.load(Ordering::SeqCst));
    assert!(response.headers().get("x-request-id").is_none());
    assert!(logger.events().is_empty());
    assert!(metrics.get_metrics().requests.is_empty());
}

// Request fields and custom extractors enrich in order; absent values are
// skipped and later duplicates win.
#[tokio::test]
async fn request_and_custom_fields_enrich_the_record() {
    use reqlog::RequestField;

    let (options, logger) = capturing_options();
    let mut options = options;
    options.request_fields = vec![RequestField::Ip, RequestField::UserAgent, RequestField::Referer];
    options.custom_fields = vec![
        CustomField::from_header("Tenant", "x-tenant"),
        CustomField::new("Absent", |_| None),
        CustomField::new("Tenant", |_| Some(json!("overridden"))),
    ];

    let _ = wrap(options, created_handler())
        .oneshot(
            Request::get("/api/users")
                .header("x-forwarded-for", "203.0.113.9, 10.0.0.1")
                .header("user-agent", "curl/8.0")
                .header("x-tenant", "acme")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    let event = single_event(&logger);
    assert_eq!(event.property("Ip"), Some(&json!("203.0.113.9")));
    assert_eq!(event.property("UserAgent"), Some(&json!("curl/8.0")));
    assert_eq!(event.property("Referer"), None);
    assert_eq!(event.property("Absent"), None);
    assert_eq!(event.property("Tenant"), Some(&json!("overridden")));
}

// Status-derived levels: 4xx warns, 5xx errors.
#[tokio::test]
async fn emission_level_follows_status() {
    for (status, level) in [
        (StatusCode::OK, LogLevel::Information),
        (StatusCode::NOT_FOUND, LogLevel::Warning),
        (StatusCode::BAD_GATEWAY, LogLevel::Error),
    ] {
        let (options, logger) = capturing_options();
        let service = service_fn(move |_req: Request<Body>| async move {
            Ok::<_, Infallible>(
                Response::builder().status(status).body(Body::empty()).unwrap(),
            )
        });
        let _ = wrap(options, service)
            .oneshot(Request::get("/api").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(single_event(&logger).level, level, "status {status}");
    }
}

// Hooks bracket the handler: before runs first, after runs post-emission.
#[tokio::test]
async fn hooks_run_in_order_around_the_handler() {
    let order = Arc::new(Mutex::new(Vec::new()));
    let (options, logger) = capturing_options();
    let mut options = options;
    {
        let order = Arc::clone(&order);
        options.before_request = Some(Arc::new(move |_info, _log| {
            order.lock().unwrap().push("before");
        }));
    }
    {
        let order = Arc::clone(&order);
        options.after_request = Some(Arc::new(move |_info, status, _duration, _log| {
            order.lock().unwrap().push(if status == 201 { "after" } else { "after?" });
        }));
    }

    let handler_order = Arc::clone(&order);
    let service = service_fn(move |_req: Request<Body>| {
        let order = Arc::clone(&handler_order);
        async move {
            order.lock().unwrap().push("handler");
            Ok::<_, Infallible>(
                Response::builder()
                    .status(StatusCode::CREATED)
                    .body(Body::empty())
                    .unwrap(),
            )
        }
    });

    let _ = wrap(options, service)
        .oneshot(Request::get("/api").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(logger.events().len(), 1);
    assert_eq!(*order.lock().unwrap(), ["before", "handler", "after"]);
}

// The timeout handler fires once for nearly expired deadlines.
#[tokio::test]
async fn deadline_probe_notifies_the_timeout_handler() {
    let fired = Arc::new(AtomicUsize::new(0));
    let (options, _logger) = capturing_options();
    let mut options = options;
    {
        let fired = Arc::clone(&fired);
        options.timeout_handler = Some(Arc::new(move |_info, remaining| {
            assert!(remaining <= Duration::from_secs(5));
            fired.fetch_add(1, Ordering::SeqCst);
        }));
    }

    let mut request = Request::get("/api").body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(RequestDeadline(Instant::now() + Duration::from_secs(2)));
    let _ = wrap(options, created_handler()).oneshot(request).await.unwrap();
    assert_eq!(fired.load(Ordering::SeqCst), 1);

    // A comfortable deadline does not fire.
    let fired_far = Arc::new(AtomicUsize::new(0));
    let (options, _logger) = capturing_options();
    let mut options = options;
    {
        let fired_far = Arc::clone(&fired_far);
        options.timeout_handler = Some(Arc::new(move |_info, _remaining| {
            fired_far.fetch_add(1, Ordering::SeqCst);
        }));
    }
    let mut request = Request::get("/api").body(Body::empty()).unwrap();
    request
        .extensions_mut()
        .insert(RequestDeadline(Instant::now() + Duration::from_secs(60)));
    let _ = wrap(options, created_handler()).oneshot(request).await.unwrap();
    assert_eq!(fired_far.load(Ordering::SeqCst), 0);
}

// Handlers can reach the logger and request id through extensions.
#[tokio::test]
async fn handlers_see_request_local_context() {
    let (options, logger) = capturing_options();

    let service = service_fn(|req: Request<Body>| async move {
        let id = req
            .extensions()
            .get::<RequestId>()
            .expect("request id extension")
            .0
            .clone();
        let log = req
            .extensions()
            .get::<reqlog::RequestLogger>()
            .expect("logger extension")
            .0
            .clone();
        log.information("handler speaking", &[]);
        Ok::<_, Infallible>(Response::new(Body::from(id)))
    });

    let response = wrap(options, service)
        .oneshot(
            Request::get("/api")
                .header("X-Request-ID", "ctx-42")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();

    assert_eq!(read_body(response.into_body()).await, Bytes::from("ctx-42"));
    let events = logger.events();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].message, "handler speaking");
    assert_eq!(events[0].property("RequestId"), Some(&json!("ctx-42")));
    assert_eq!(events[1].property("StatusCode"), Some(&json!(200)));
}

// A sampler that panics on live traffic is contained like a handler panic.
#[tokio::test]
async fn panicking_sampler_is_contained() {
    struct PathologicalSampler;
    impl Sampler for PathologicalSampler {
        fn should_sample(&self, parts: &http::request::Parts) -> bool {
            assert_ne!(parts.uri.path(), "/trigger", "sampler bug");
            true
        }
    }

    let (options, logger) = capturing_options();
    let mut options = options;
    options.sampler = Arc::new(PathologicalSampler);

    let response = wrap(options, created_handler())
        .oneshot(Request::get("/trigger").body(Body::empty()).unwrap())
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    let event = single_event(&logger);
    assert_eq!(event.level, LogLevel::Error);
    assert_eq!(event.property("StatusCode"), Some(&json!(500)));
    assert!(event.property("Panic").is_some());
}

// Metrics capture request, panic and body-size observations.
#[tokio::test]
async fn metrics_recorder_sees_the_full_request() {
    let (options, _logger) = capturing_options();
    let mut options = options;
    options.log_request_body = true;
    options.log_response_body = true;
    let metrics = Arc::new(InMemoryMetricsRecorder::new(16));
    options.metrics_recorder = metrics.clone();

    let service = service_fn(|req: Request<Body>| async move {
        let _ = req.into_body().collect().await.unwrap();
        Ok::<_, Infallible>(Response::new(Body::from("pong")))
    });

    let _ = wrap(options, service)
        .oneshot(Request::post("/ping").body(Body::from("ping!")).unwrap())
        .await
        .unwrap();

    let snapshot = metrics.get_metrics();
    assert_eq!(snapshot.requests.len(), 1);
    assert_eq!(snapshot.requests[0].method, "POST");
    assert_eq!(snapshot.requests[0].path, "/ping");
    assert_eq!(snapshot.requests[0].status, 200);
    assert_eq!(snapshot.body_sizes.len(), 2);
    assert_eq!(snapshot.body_sizes[0].size, 5);
    assert_eq!(snapshot.body_sizes[1].size, 4);
}
