use std::collections::VecDeque;
use std::pin::Pin;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::task::{Context as TaskContext, Poll};
use std::time::Duration;

use bytes::Bytes;
use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION};
use http::{HeaderMap, HeaderValue, Method, Request, Response, StatusCode, Uri};
use http_body_util::BodyExt;
use hyper::body::{Body, Frame};
use tokio::time::Instant;

use crate::body::{ReqBody, ResBody, full};
use crate::error::{BoxError, Error, TransportError, TransportErrorKind};
use crate::middleware::{Middleware, Next, SendResult};
use crate::transport::{Transport, TransportTuning};
use crate::{Backoff, Client, Context, MultipartForm, RequestOption};

const URL: &str = "http://svc.local/v1/items";

enum Scripted {
    Status(u16, Bytes),
    Redirect(u16, &'static str),
    /// Headers arrive, then the body yields `partial` and never finishes.
    Stall(u16, &'static [u8]),
    Fail(TransportErrorKind),
    Hang,
}

struct SeenRequest {
    method: Method,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
    at: Instant,
}

#[derive(Default)]
struct ScriptedTransport {
    script: Mutex<VecDeque<Scripted>>,
    calls: AtomicUsize,
    seen: Mutex<Vec<SeenRequest>>,
}

impl ScriptedTransport {
    fn new(script: impl IntoIterator<Item = Scripted>) -> Arc<Self> {
        Arc::new(Self {
            script: Mutex::new(script.into_iter().collect()),
            ..Self::default()
        })
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    fn attempt_times(&self) -> Vec<Instant> {
        self.seen
            .lock()
            .expect("seen lock")
            .iter()
            .map(|seen| seen.at)
            .collect()
    }
}

impl Transport for ScriptedTransport {
    fn send(
        &self,
        request: Request<ReqBody>,
    ) -> BoxFuture<'_, Result<Response<ResBody>, TransportError>> {
        async move {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let (parts, body) = request.into_parts();
            let body = body
                .collect()
                .await
                .map(|collected| collected.to_bytes())
                .unwrap_or_default();
            self.seen.lock().expect("seen lock").push(SeenRequest {
                method: parts.method,
                uri: parts.uri,
                headers: parts.headers,
                body,
                at: Instant::now(),
            });
            let next = self
                .script
                .lock()
                .expect("script lock")
                .pop_front()
                .unwrap_or(Scripted::Status(200, Bytes::new()));
            match next {
                Scripted::Status(status, body) => {
                    let mut response = Response::new(full(body));
                    *response.status_mut() =
                        StatusCode::from_u16(status).expect("scripted status is valid");
                    Ok(response)
                }
                Scripted::Redirect(status, location) => {
                    let mut response = Response::new(full(Bytes::new()));
                    *response.status_mut() =
                        StatusCode::from_u16(status).expect("scripted status is valid");
                    response
                        .headers_mut()
                        .insert(LOCATION, HeaderValue::from_static(location));
                    Ok(response)
                }
                Scripted::Stall(status, partial) => {
                    let mut response = Response::new(
                        StallingBody {
                            partial: Some(Bytes::from_static(partial)),
                        }
                        .boxed(),
                    );
                    *response.status_mut() =
                        StatusCode::from_u16(status).expect("scripted status is valid");
                    Ok(response)
                }
                Scripted::Fail(kind) => Err(TransportError::new(kind, "scripted failure")),
                Scripted::Hang => std::future::pending().await,
            }
        }
        .boxed()
    }
}

struct StallingBody {
    partial: Option<Bytes>,
}

impl Body for StallingBody {
    type Data = Bytes;
    type Error = BoxError;

    fn poll_frame(
        self: Pin<&mut Self>,
        _cx: &mut TaskContext<'_>,
    ) -> Poll<Option<Result<Frame<Bytes>, BoxError>>> {
        match self.get_mut().partial.take() {
            Some(partial) => Poll::Ready(Some(Ok(Frame::data(partial)))),
            None => Poll::Pending,
        }
    }
}

fn status(code: u16) -> Scripted {
    Scripted::Status(code, Bytes::new())
}

fn client(transport: &Arc<ScriptedTransport>) -> Client {
    Client::builder()
        .client_name("test")
        .transport(transport.clone())
        .metrics_enabled(true)
        .build()
}

fn no_options() -> Vec<RequestOption> {
    Vec::new()
}

#[tokio::test(start_paused = true)]
async fn first_attempt_success_returns_unread_body() {
    let transport = ScriptedTransport::new([Scripted::Status(200, Bytes::from_static(b"payload"))]);
    let client = client(&transport);
    let started = Instant::now();

    let response = client
        .get(&Context::background(), URL, no_options())
        .await
        .expect("request should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.text().await.expect("body should read"), "payload");
    assert_eq!(transport.calls(), 1);
    assert_eq!(started.elapsed(), Duration::ZERO);
}

#[tokio::test(start_paused = true)]
async fn get_retries_server_errors_with_exponential_backoff() {
    let transport = ScriptedTransport::new([status(503), status(503), status(200)]);
    let client = client(&transport);

    let response = client
        .get(&Context::background(), URL, no_options())
        .await
        .expect("third attempt should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.calls(), 3);
    let times = transport.attempt_times();
    let first_wait = times[1] - times[0];
    let second_wait = times[2] - times[1];
    assert!(first_wait >= Duration::from_millis(500) && first_wait < Duration::from_millis(510));
    assert!(second_wait >= Duration::from_millis(1000) && second_wait < Duration::from_millis(1010));

    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.attempts, 3);
    assert_eq!(metrics.retries, 2);
    assert_eq!(metrics.requests_succeeded, 1);
    assert_eq!(metrics.status_counts.get(&503), Some(&2));
    assert_eq!(metrics.in_flight, 0);
}

#[tokio::test(start_paused = true)]
async fn head_is_retried_like_get() {
    let transport = ScriptedTransport::new([status(502), status(204)]);
    let client = client(&transport);
    let response = client
        .head(&Context::background(), URL, no_options())
        .await
        .expect("second attempt should succeed");
    assert_eq!(response.status(), StatusCode::NO_CONTENT);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn post_server_error_is_not_retried_without_force() {
    let transport = ScriptedTransport::new([status(503), status(200)]);
    let client = client(&transport);

    let error = client
        .post(
            &Context::background(),
            URL,
            Some(Bytes::from_static(b"{}")),
            [RequestOption::retries(5)],
        )
        .await
        .expect_err("post must not be retried");

    assert_eq!(transport.calls(), 1);
    assert_eq!(error.status(), Some(503));
}

#[tokio::test(start_paused = true)]
async fn forced_retry_applies_to_post() {
    let transport = ScriptedTransport::new([status(500), status(201)]);
    let client = client(&transport);

    let response = client
        .post(
            &Context::background(),
            URL,
            Some(Bytes::from_static(b"{}")),
            [RequestOption::force_retry()],
        )
        .await
        .expect("forced retry should reach the second attempt");

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn client_errors_are_never_retried() {
    let transport = ScriptedTransport::new([
        Scripted::Status(404, Bytes::from_static(b"no such item")),
        status(200),
    ]);
    let client = client(&transport);

    let error = client
        .get(
            &Context::background(),
            URL,
            [RequestOption::force_retry(), RequestOption::retries(4)],
        )
        .await
        .expect_err("404 is fatal");

    assert_eq!(transport.calls(), 1);
    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.status(), 404);
    assert_eq!(attempt.body_text_lossy(), "no such item");
    assert_eq!(attempt.method(), &Method::GET);
    assert_eq!(attempt.url(), URL);
    assert_eq!(
        error.to_string(),
        "GET http://svc.local/v1/items failed: status 404, body: \"no such item\""
    );
}

#[tokio::test(start_paused = true)]
async fn exhausted_retries_return_the_last_error() {
    let transport = ScriptedTransport::new([
        Scripted::Status(500, Bytes::from_static(b"first")),
        Scripted::Status(502, Bytes::from_static(b"second")),
        Scripted::Status(503, Bytes::from_static(b"third")),
    ]);
    let client = client(&transport);

    let error = client
        .get(
            &Context::background(),
            URL,
            [
                RequestOption::retries(2),
                RequestOption::backoff(Backoff::fixed(Duration::from_millis(10))),
            ],
        )
        .await
        .expect_err("every attempt fails");

    assert_eq!(transport.calls(), 3);
    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.status(), 503);
    assert_eq!(attempt.body_text_lossy(), "third");
    assert_eq!(client.metrics_snapshot().requests_failed, 1);
}

#[tokio::test(start_paused = true)]
async fn zero_retries_sends_once() {
    let transport = ScriptedTransport::new([status(503), status(200)]);
    let client = client(&transport);
    let result = client
        .get(&Context::background(), URL, [RequestOption::retries(0)])
        .await;
    assert!(result.is_err());
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_errors_are_retried_and_reported_with_status_zero() {
    let transport = ScriptedTransport::new([
        Scripted::Fail(TransportErrorKind::Connect),
        Scripted::Fail(TransportErrorKind::Dns),
    ]);
    let client = client(&transport);

    let error = client
        .get(&Context::background(), URL, [RequestOption::retries(1)])
        .await
        .expect_err("both attempts fail");

    assert_eq!(transport.calls(), 2);
    assert_eq!(error.status(), None);
    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.status(), 0);
    assert_eq!(
        attempt.transport_error().map(TransportError::kind),
        Some(TransportErrorKind::Dns)
    );
    assert!(error.to_string().contains(", error: dns transport error"));
    assert_eq!(client.metrics_snapshot().transport_errors, 2);
}

#[tokio::test(start_paused = true)]
async fn transport_recovers_after_connect_failure() {
    let transport = ScriptedTransport::new([Scripted::Fail(TransportErrorKind::Connect), status(200)]);
    let client = client(&transport);
    let response = client
        .get(&Context::background(), URL, no_options())
        .await
        .expect("second attempt should succeed");
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn cancellation_during_backoff_stops_further_attempts() {
    let transport = ScriptedTransport::new([status(503), status(200)]);
    let client = client(&transport);
    let ctx = Context::background();
    let canceller = ctx.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(100)).await;
        canceller.cancel();
    });

    let error = client
        .get(&ctx, URL, no_options())
        .await
        .expect_err("cancellation wins over the backoff wait");

    assert!(matches!(error, Error::Cancelled));
    assert_eq!(transport.calls(), 1);
    assert_eq!(client.metrics_snapshot().cancelled, 1);
}

#[tokio::test(start_paused = true)]
async fn cancelled_context_prevents_any_attempt() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);
    let ctx = Context::background();
    ctx.cancel();

    let error = client
        .get(&ctx, URL, no_options())
        .await
        .expect_err("no attempt after cancellation");

    assert!(matches!(error, Error::Cancelled));
    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn deadline_interrupts_a_hanging_send() {
    let transport = ScriptedTransport::new([Scripted::Hang]);
    let client = client(&transport);
    let ctx = Context::background().with_timeout(Duration::from_secs(2));

    let error = client
        .get(&ctx, URL, no_options())
        .await
        .expect_err("deadline should fire first");

    assert!(matches!(error, Error::DeadlineExceeded));
    assert_eq!(transport.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn transport_timeout_counts_as_retryable_failure() {
    let transport = ScriptedTransport::new([Scripted::Hang, Scripted::Hang]);
    let client = client(&transport);

    let error = client
        .get(
            &Context::background(),
            URL,
            [
                RequestOption::timeout(Duration::from_secs(1)),
                RequestOption::retries(1),
            ],
        )
        .await
        .expect_err("both attempts time out");

    assert_eq!(transport.calls(), 2);
    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.status(), 0);
    assert_eq!(
        attempt.transport_error().map(TransportError::kind),
        Some(TransportErrorKind::Timeout)
    );
}

#[tokio::test(start_paused = true)]
async fn diagnostic_body_is_truncated() {
    let transport = ScriptedTransport::new([Scripted::Status(500, Bytes::from(vec![b'e'; 2000]))]);
    let client = client(&transport);

    let error = client
        .get(&Context::background(), URL, [RequestOption::retries(0)])
        .await
        .expect_err("500 with no retries fails");

    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.body().len(), 512);
}

#[tokio::test(start_paused = true)]
async fn pooled_buffers_are_returned_on_every_path() {
    let transport = ScriptedTransport::new([status(503), status(503), status(503)]);
    let client = client(&transport);
    let payload = Bytes::from(vec![b'p'; 4096]);

    let error = client
        .put(
            &Context::background(),
            URL,
            Some(payload.clone()),
            [RequestOption::force_retry(), RequestOption::retries(2)],
        )
        .await
        .expect_err("every attempt fails");

    assert_eq!(error.status(), Some(503));
    assert_eq!(client.buffer_pool_stats().checked_out, 0);
    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 3);
    assert!(seen.iter().all(|request| request.body == payload));
    assert!(seen.iter().all(|request| request.method == Method::PUT));
}

#[tokio::test(start_paused = true)]
async fn pooled_buffer_is_returned_after_cancellation() {
    let transport = ScriptedTransport::new([Scripted::Hang]);
    let client = client(&transport);
    let ctx = Context::background().with_timeout(Duration::from_millis(300));

    let result = client
        .post(&ctx, URL, Some(Bytes::from(vec![1_u8; 2048])), no_options())
        .await;

    assert!(matches!(result, Err(Error::DeadlineExceeded)));
    assert_eq!(client.buffer_pool_stats().checked_out, 0);
}

#[tokio::test(start_paused = true)]
async fn header_options_merge_with_later_values_winning() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);

    client
        .get(
            &Context::background(),
            URL,
            [
                RequestOption::header("x-tenant", "alpha"),
                RequestOption::headers([("x-trace", "t-1"), ("x-tenant", "beta")]),
            ],
        )
        .await
        .expect("request should succeed");

    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen[0].headers["x-tenant"], "beta");
    assert_eq!(seen[0].headers["x-trace"], "t-1");
    assert_eq!(seen[0].headers.get_all("x-tenant").iter().count(), 1);
}

#[tokio::test(start_paused = true)]
async fn default_options_apply_before_call_options() {
    let transport = ScriptedTransport::new([status(503), status(503)]);
    let client = Client::builder()
        .transport(transport.clone())
        .default_option(RequestOption::retries(0))
        .default_option(RequestOption::header("user-agent", "reqflow-test"))
        .build();

    let result = client
        .get(&Context::background(), URL, [RequestOption::header("user-agent", "override")])
        .await;

    assert!(result.is_err());
    assert_eq!(transport.calls(), 1);
    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen[0].headers["user-agent"], "override");
}

struct CountingMiddleware {
    invocations: Arc<AtomicUsize>,
}

impl Middleware for CountingMiddleware {
    fn handle<'a>(&'a self, mut request: Request<ReqBody>, next: Next<'a>) -> BoxFuture<'a, SendResult> {
        let count = self.invocations.fetch_add(1, Ordering::SeqCst) + 1;
        request.headers_mut().insert(
            "x-attempt",
            HeaderValue::from_str(&count.to_string()).expect("digits are a valid header"),
        );
        next.run(request)
    }
}

#[tokio::test(start_paused = true)]
async fn middleware_runs_on_every_attempt() {
    let transport = ScriptedTransport::new([status(500), status(200)]);
    let client = client(&transport);
    let invocations = Arc::new(AtomicUsize::new(0));

    client
        .get(
            &Context::background(),
            URL,
            [RequestOption::middleware(Arc::new(CountingMiddleware {
                invocations: Arc::clone(&invocations),
            }))],
        )
        .await
        .expect("second attempt should succeed");

    assert_eq!(invocations.load(Ordering::SeqCst), 2);
    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen[1].headers["x-attempt"], "2");
}

#[tokio::test(start_paused = true)]
async fn tuning_options_update_the_client_store() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);

    client
        .get(
            &Context::background(),
            URL,
            [
                RequestOption::timeout(Duration::from_secs(2)),
                RequestOption::max_conns_per_host(8),
            ],
        )
        .await
        .expect("request should succeed");

    let settings = client.transport_store().settings();
    assert_eq!(settings.timeout, Duration::from_secs(2));
    assert_eq!(settings.max_conns_per_host, Some(8));

    client
        .transport_store()
        .apply(&[TransportTuning::MaxConnsPerHost(0)])
        .expect("tuning should apply");
    assert_eq!(client.transport_store().settings().max_conns_per_host, None);
}

#[tokio::test(start_paused = true)]
async fn validation_failures_never_reach_the_network() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);
    let ctx = Context::background();

    let invalid_uri = client
        .get(&ctx, "not a url", no_options())
        .await
        .expect_err("invalid uri");
    assert!(matches!(invalid_uri, Error::InvalidUri { .. }));

    let invalid_header = client
        .get(&ctx, URL, [RequestOption::header("bad name", "v")])
        .await
        .expect_err("invalid header");
    assert!(matches!(invalid_header, Error::InvalidHeaderName { .. }));

    let empty_form = client
        .post_multipart(&ctx, URL, &MultipartForm::new(), no_options())
        .await
        .expect_err("empty multipart");
    assert!(matches!(empty_form, Error::EmptyMultipart));

    assert_eq!(transport.calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn post_json_sets_body_and_content_type() {
    let transport = ScriptedTransport::new([status(201)]);
    let client = client(&transport);

    client
        .post_json(
            &Context::background(),
            URL,
            &serde_json::json!({ "name": "demo" }),
            [RequestOption::header("content-type", "text/plain")],
        )
        .await
        .expect("request should succeed");

    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen[0].method, Method::POST);
    assert_eq!(seen[0].headers["content-type"], "application/json");
    assert_eq!(seen[0].body.as_ref(), br#"{"name":"demo"}"#);
}

#[tokio::test(start_paused = true)]
async fn post_form_encodes_pairs() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);

    client
        .post_form(
            &Context::background(),
            URL,
            &[("q", "rust lang"), ("page", "2")],
            no_options(),
        )
        .await
        .expect("request should succeed");

    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(
        seen[0].headers["content-type"],
        "application/x-www-form-urlencoded"
    );
    assert_eq!(seen[0].body.as_ref(), b"q=rust+lang&page=2");
}

#[tokio::test(start_paused = true)]
async fn post_multipart_sends_boundary_content_type() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);
    let form = MultipartForm::new().field("name", "demo");

    client
        .post_multipart(&Context::background(), URL, &form, no_options())
        .await
        .expect("request should succeed");

    let seen = transport.seen.lock().expect("seen lock");
    let content_type = seen[0].headers["content-type"]
        .to_str()
        .expect("ascii content type");
    let boundary = content_type
        .strip_prefix("multipart/form-data; boundary=")
        .expect("multipart content type");
    let body = String::from_utf8(seen[0].body.to_vec()).expect("utf-8 body");
    assert!(body.starts_with(&format!("--{boundary}\r\n")));
    assert!(body.ends_with(&format!("--{boundary}--\r\n")));
}

#[tokio::test(start_paused = true)]
async fn every_verb_wrapper_uses_its_method() {
    let transport = ScriptedTransport::new(Vec::new());
    let client = client(&transport);
    let ctx = Context::background();

    client.get(&ctx, URL, no_options()).await.expect("get");
    client.head(&ctx, URL, no_options()).await.expect("head");
    client.post(&ctx, URL, None, no_options()).await.expect("post");
    client.put(&ctx, URL, None, no_options()).await.expect("put");
    client.patch(&ctx, URL, None, no_options()).await.expect("patch");
    client.delete(&ctx, URL, None, no_options()).await.expect("delete");
    client.options(&ctx, URL, no_options()).await.expect("options");
    client.connect(&ctx, URL, no_options()).await.expect("connect");
    client.trace(&ctx, URL, no_options()).await.expect("trace");

    let methods = transport
        .seen
        .lock()
        .expect("seen lock")
        .iter()
        .map(|request| request.method.clone())
        .collect::<Vec<_>>();
    assert_eq!(
        methods,
        vec![
            Method::GET,
            Method::HEAD,
            Method::POST,
            Method::PUT,
            Method::PATCH,
            Method::DELETE,
            Method::OPTIONS,
            Method::CONNECT,
            Method::TRACE,
        ]
    );
}

#[tokio::test(start_paused = true)]
async fn empty_body_is_sent_when_none_given() {
    let transport = ScriptedTransport::new([status(200)]);
    let client = client(&transport);
    client
        .post(&Context::background(), URL, None, no_options())
        .await
        .expect("request should succeed");
    let seen = transport.seen.lock().expect("seen lock");
    assert!(seen[0].body.is_empty());
}

#[tokio::test(start_paused = true)]
async fn stalled_error_body_is_bounded_by_the_send_timeout() {
    let transport = ScriptedTransport::new([
        Scripted::Stall(503, b"partial"),
        Scripted::Stall(503, b"partial"),
    ]);
    let client = Client::builder()
        .transport(transport.clone())
        .timeout(Duration::from_secs(10))
        .build();
    let started = Instant::now();

    let error = tokio::time::timeout(
        Duration::from_secs(3600),
        client.get(&Context::background(), URL, [RequestOption::retries(1)]),
    )
    .await
    .expect("stalled body must not hang the request")
    .expect_err("both attempts stall");

    assert_eq!(transport.calls(), 2);
    assert!(started.elapsed() >= Duration::from_secs(20));
    assert!(started.elapsed() < Duration::from_secs(30));
    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.status(), 503);
    assert_eq!(attempt.body().as_ref(), b"partial");
    assert_eq!(
        attempt.transport_error().map(TransportError::kind),
        Some(TransportErrorKind::Timeout)
    );
}

#[tokio::test(start_paused = true)]
async fn stalled_client_error_body_still_fails_fast() {
    let transport = ScriptedTransport::new([Scripted::Stall(404, b"missing")]);
    let client = Client::builder()
        .transport(transport.clone())
        .timeout(Duration::from_secs(5))
        .build();

    let error = client
        .get(&Context::background(), URL, no_options())
        .await
        .expect_err("404 is terminal");

    assert_eq!(transport.calls(), 1);
    assert_eq!(error.status(), Some(404));
    assert_eq!(error.as_attempt().expect("attempt error").body().as_ref(), b"missing");
}

#[tokio::test(start_paused = true)]
async fn redirects_are_followed_within_one_attempt() {
    let transport = ScriptedTransport::new([
        Scripted::Redirect(302, "/v1/moved"),
        Scripted::Redirect(301, "http://svc.local/v1/final?token=secret"),
        Scripted::Status(200, Bytes::from_static(b"here")),
    ]);
    let client = client(&transport);

    let response = client
        .get(&Context::background(), URL, no_options())
        .await
        .expect("redirect chain should resolve");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(response.url(), "http://svc.local/v1/final");
    assert_eq!(transport.calls(), 3);
    let metrics = client.metrics_snapshot();
    assert_eq!(metrics.attempts, 1);
    assert_eq!(metrics.retries, 0);
    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen[1].uri, Uri::from_static("http://svc.local/v1/moved"));
    assert_eq!(
        seen[2].uri,
        Uri::from_static("http://svc.local/v1/final?token=secret")
    );
    assert!(seen.iter().all(|request| request.method == Method::GET));
}

#[tokio::test(start_paused = true)]
async fn see_other_turns_post_into_bodyless_get_and_drops_credentials_across_hosts() {
    let transport = ScriptedTransport::new([
        Scripted::Redirect(303, "http://other.local/receipt"),
        status(200),
    ]);
    let client = client(&transport);

    client
        .post_json(
            &Context::background(),
            URL,
            &serde_json::json!({ "sku": "a-1" }),
            [RequestOption::header("authorization", "Bearer t")],
        )
        .await
        .expect("redirected post should succeed");

    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 2);
    assert_eq!(seen[0].method, Method::POST);
    assert!(seen[0].headers.contains_key(AUTHORIZATION));
    assert_eq!(seen[1].method, Method::GET);
    assert!(seen[1].body.is_empty());
    assert!(!seen[1].headers.contains_key(AUTHORIZATION));
    assert!(!seen[1].headers.contains_key(CONTENT_TYPE));
}

#[tokio::test(start_paused = true)]
async fn temporary_redirect_resends_method_and_pooled_body() {
    let transport = ScriptedTransport::new([Scripted::Redirect(307, "/v1/other"), status(201)]);
    let client = client(&transport);
    let payload = Bytes::from(vec![b'q'; 4096]);

    let response = client
        .put(&Context::background(), URL, Some(payload.clone()), no_options())
        .await
        .expect("redirected put should succeed");

    assert_eq!(response.status(), StatusCode::CREATED);
    assert_eq!(client.buffer_pool_stats().checked_out, 0);
    let seen = transport.seen.lock().expect("seen lock");
    assert_eq!(seen.len(), 2);
    assert!(seen.iter().all(|request| request.method == Method::PUT));
    assert!(seen.iter().all(|request| request.body == payload));
}

#[tokio::test(start_paused = true)]
async fn redirect_loops_stop_after_ten_hops() {
    let transport = ScriptedTransport::new((0..11).map(|_| Scripted::Redirect(302, "/v1/loop")));
    let client = client(&transport);

    let error = client
        .get(&Context::background(), URL, [RequestOption::retries(0)])
        .await
        .expect_err("redirect loop must fail");

    assert_eq!(transport.calls(), 11);
    let attempt = error.as_attempt().expect("attempt error");
    assert_eq!(attempt.status(), 0);
    assert_eq!(
        attempt.transport_error().map(TransportError::kind),
        Some(TransportErrorKind::Other)
    );
    assert!(error.to_string().contains("stopped after 10 redirects"));
}

#[tokio::test(start_paused = true)]
async fn exhausted_redirect_chain_is_retried_like_a_transport_failure() {
    let mut script = (0..11)
        .map(|_| Scripted::Redirect(302, "/v1/loop"))
        .collect::<Vec<_>>();
    script.push(status(200));
    let transport = ScriptedTransport::new(script);
    let client = client(&transport);

    let response = client
        .get(&Context::background(), URL, [RequestOption::retries(1)])
        .await
        .expect("second attempt should succeed");

    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(transport.calls(), 12);
    assert_eq!(client.metrics_snapshot().retries, 1);
}

#[tokio::test(start_paused = true)]
async fn redirect_without_location_is_classified_as_retryable() {
    let transport = ScriptedTransport::new([status(302), status(302)]);
    let client = client(&transport);

    let error = client
        .get(&Context::background(), URL, [RequestOption::retries(1)])
        .await
        .expect_err("302 without location cannot be followed");

    assert_eq!(transport.calls(), 2);
    assert_eq!(error.status(), Some(302));
}
