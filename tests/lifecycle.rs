//! End-to-end request lifecycles against the in-memory host.

use std::cell::RefCell;
use std::rc::Rc;

use bytes::Bytes;
use geata::host::memory::{CannedReply, MemoryHost};
use geata::{
	BodyInit, FetchState, GeataErrorKind, RequestInit, ResponseInit, Runtime, StreamId,
	Transformer, Value,
};

fn runtime_for(host: &MemoryHost) -> Runtime {
	Runtime::new(Box::new(host.clone()))
}

#[test]
fn echo_a_plain_response() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/echo", &[], b"");
	let mut rt = runtime_for(&host);

	rt.add_fetch_listener(|rt| {
		let response = rt.response_new(
			Some(BodyInit::Text("hello".into())),
			ResponseInit {
				status: Some(200),
				headers: Vec::new(),
			},
		)?;
		let promise = rt.promise_resolved(Value::Response(response));
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	assert_eq!(rt.event_state().unwrap(), FetchState::ResponseDone);
	let sent = host.downstream().expect("a response was sent downstream");
	assert_eq!(sent.status, 200);
	assert_eq!(sent.body, b"hello");
	assert!(!sent.streaming);
}

#[test]
fn forward_the_downstream_request_to_a_backend() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "https://edge.example/forward", &[], b"");
	host.add_backend(
		"origin",
		CannedReply {
			status: 204,
			headers: Vec::new(),
			body: Vec::new(),
		},
	);
	let mut rt = runtime_for(&host);
	rt.set_default_backend("origin");

	rt.add_fetch_listener(|rt| {
		let request = rt.event_request()?;
		let promise = rt.fetch(request);
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	assert_eq!(rt.event_state().unwrap(), FetchState::ResponseDone);
	let sent = host.downstream().unwrap();
	assert_eq!(sent.status, 204);
	assert!(sent.body.is_empty());
	assert!(!sent.streaming);

	let request = rt.event_request().unwrap();
	assert!(rt.body_used(request.into()));

	let upstream = host.sent_requests();
	assert_eq!(upstream.len(), 1);
	assert_eq!(upstream[0].backend, "origin");
	assert_eq!(upstream[0].uri, "https://edge.example/forward");
}

#[test]
fn pipe_the_request_body_through_a_transform_into_the_response() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "https://edge.example/t", &[], &[0x41, 0x42, 0x43]);
	let mut rt = runtime_for(&host);

	rt.add_fetch_listener(|rt| {
		let request = rt.event_request()?;
		let body = rt.body_stream(request.into()).expect("downstream body");
		let ts = rt.transform_stream_new(Transformer {
			transform: Some(Rc::new(|rt, id, chunk: Bytes| {
				rt.controller_enqueue(id, chunk)?;
				Ok(None)
			})),
			flush: None,
		});
		let readable = rt.pipe_through(body, ts)?;
		let response = rt.response_new(Some(BodyInit::Stream(readable)), ResponseInit::default())?;
		let promise = rt.promise_resolved(Value::Response(response));
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	assert_eq!(rt.event_state().unwrap(), FetchState::ResponseDone);
	let sent = host.downstream().unwrap();
	assert_eq!(sent.body, b"ABC");
	assert!(sent.streaming);
	assert!(sent.body_closed);

	// native body to native body: one host-side append, no guest reads
	let stats = host.stats();
	assert_eq!(stats.body_appends, 1);
	assert_eq!(stats.body_reads, 0);
}

#[test]
fn transform_chunks_cross_the_guest_when_the_readable_is_consumed_by_hand() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "https://edge.example/u", &[], b"abc");
	let mut rt = runtime_for(&host);

	fn pump(rt: &mut Runtime, stream: StreamId, done: geata::PromiseId, acc: Rc<RefCell<Vec<u8>>>) {
		let read = rt.reader_read(stream);
		rt.promise_then(read, move |rt, value| match value {
			Value::ReadResult(Some(chunk)) => {
				acc.borrow_mut().extend_from_slice(&chunk);
				pump(rt, stream, done, acc);
			}
			Value::ReadResult(None) => {
				let response = rt
					.response_new(
						Some(BodyInit::Bytes(acc.borrow().clone().into())),
						ResponseInit::default(),
					)
					.expect("building the response");
				rt.resolve_promise(done, Value::Response(response));
			}
			other => panic!("unexpected read result: {other:?}"),
		});
	}

	rt.add_fetch_listener(|rt| {
		let request = rt.event_request()?;
		let body = rt.body_stream(request.into()).expect("downstream body");
		let ts = rt.transform_stream_new(Transformer {
			transform: Some(Rc::new(|rt, id, chunk: Bytes| {
				let upper: Vec<u8> = chunk.iter().map(u8::to_ascii_uppercase).collect();
				rt.controller_enqueue(id, upper.into())?;
				Ok(None)
			})),
			flush: None,
		});
		let out = rt.pipe_through(body, ts)?;
		rt.stream_get_reader(out)?;
		let done = rt.promise_new();
		rt.respond_with(done)?;
		pump(rt, out, done, Rc::new(RefCell::new(Vec::new())));
		Ok(())
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	assert_eq!(rt.event_state().unwrap(), FetchState::ResponseDone);
	let sent = host.downstream().unwrap();
	assert_eq!(sent.body, b"ABC");
	assert!(!sent.streaming);
	assert!(host.stats().body_reads > 0);
}

#[test]
fn upstream_response_headers_delazify_once() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "https://edge.example/h", &[], b"");
	host.add_backend(
		"origin",
		CannedReply {
			status: 200,
			headers: vec![("Foo".into(), "a".into()), ("Foo".into(), "b".into())],
			body: Vec::new(),
		},
	);
	let mut rt = runtime_for(&host);

	let seen = Rc::new(RefCell::new(None));
	let captured = seen.clone();
	rt.add_fetch_listener(move |rt| {
		let promise = rt.fetch_with(
			"https://origin.example/",
			RequestInit {
				backend: Some("origin".into()),
				..Default::default()
			},
		);
		let captured = captured.clone();
		rt.promise_then(promise, move |_, value| {
			if let Value::Response(id) = value {
				*captured.borrow_mut() = Some(id);
			}
		});
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	let response = seen.borrow().expect("fetch resolved with a response");
	let headers = rt.response_headers(response).unwrap();
	assert_eq!(rt.headers_get(headers, "FOO").unwrap(), Some("a, b".into()));
	let entries = rt.headers_entries(headers).unwrap();
	assert_eq!(entries, [("foo".to_string(), "a, b".to_string())]);
}

#[test]
fn second_respond_with_throws_and_changes_nothing() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/double", &[], b"");
	let mut rt = runtime_for(&host);

	let second_error = Rc::new(RefCell::new(None));
	let captured = second_error.clone();
	rt.add_fetch_listener(move |rt| {
		let first = rt.response_new(Some(BodyInit::Text("first".into())), ResponseInit::default())?;
		let p1 = rt.promise_resolved(Value::Response(first));
		rt.respond_with(p1)?;

		let second =
			rt.response_new(Some(BodyInit::Text("second".into())), ResponseInit::default())?;
		let p2 = rt.promise_resolved(Value::Response(second));
		*captured.borrow_mut() = rt.respond_with(p2).err();
		Ok(())
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	assert_eq!(
		second_error.borrow().as_ref().map(|e| e.kind),
		Some(GeataErrorKind::AlreadyResponded)
	);
	assert_eq!(rt.event_state().unwrap(), FetchState::ResponseDone);
	assert_eq!(host.downstream().unwrap().body, b"first");
}

#[test]
fn network_errors_reject_the_fetch_promise() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/down", &[], b"");
	host.add_failing_backend("origin");
	let mut rt = runtime_for(&host);

	let reason = Rc::new(RefCell::new(None));
	let captured = reason.clone();
	rt.add_fetch_listener(move |rt| {
		let promise = rt.fetch_with(
			"https://origin.example/",
			RequestInit {
				backend: Some("origin".into()),
				..Default::default()
			},
		);
		let captured = captured.clone();
		rt.promise_catch(promise, move |_, reason| {
			*captured.borrow_mut() = Some(reason);
		});
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	match reason.borrow().as_ref() {
		Some(Value::Error(err)) => {
			assert_eq!(err.message(), "NetworkError when attempting to fetch resource.");
		}
		other => panic!("expected a network error, got {other:?}"),
	}

	// the rejection path always ends in a synthetic 500
	assert_eq!(rt.event_state().unwrap(), FetchState::RespondedWithError);
	assert_eq!(host.downstream().unwrap().status, 500);
}

#[test]
fn fetch_without_a_backend_rejects() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/nobackend", &[], b"");
	let mut rt = runtime_for(&host);

	let reason = Rc::new(RefCell::new(None));
	let captured = reason.clone();
	rt.add_fetch_listener(move |rt| {
		let promise = rt.fetch_with("https://origin.example/x", RequestInit::default());
		let captured = captured.clone();
		rt.promise_catch(promise, move |_, reason| {
			*captured.borrow_mut() = Some(reason);
		});
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	match reason.borrow().as_ref() {
		Some(Value::Error(err)) => {
			assert_eq!(err.kind, GeataErrorKind::NoBackend);
			assert!(err.message().contains("https://origin.example/x"));
		}
		other => panic!("expected a no-backend error, got {other:?}"),
	}
}

#[test]
fn wait_until_keeps_the_event_alive_until_settlement() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/wait", &[], b"");
	host.add_backend(
		"audit",
		CannedReply {
			status: 200,
			headers: Vec::new(),
			body: b"ok".to_vec(),
		},
	);
	let mut rt = runtime_for(&host);

	rt.add_fetch_listener(|rt| {
		let response = rt.response_new(Some(BodyInit::Text("done".into())), ResponseInit::default())?;
		let p = rt.promise_resolved(Value::Response(response));
		rt.respond_with(p)?;

		let audit = rt.fetch_with(
			"https://audit.example/ping",
			RequestInit {
				backend: Some("audit".into()),
				..Default::default()
			},
		);
		rt.wait_until(audit)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	assert!(!rt.event_is_active());
	assert_eq!(host.downstream().unwrap().body, b"done");
	assert_eq!(host.sent_requests().len(), 1);
	assert_eq!(host.sent_requests()[0].backend, "audit");
}

#[test]
fn respond_with_is_dispatch_only() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/late", &[], b"");
	let mut rt = runtime_for(&host);
	rt.dispatch_fetch_event().unwrap();

	// nothing responded during dispatch, so a synthetic error went out
	assert_eq!(rt.event_state().unwrap(), FetchState::RespondedWithError);
	assert_eq!(host.downstream().unwrap().status, 500);

	let response = rt
		.response_new(Some(BodyInit::Text("late".into())), ResponseInit::default())
		.unwrap();
	let promise = rt.promise_resolved(Value::Response(response));
	let err = rt.respond_with(promise).unwrap_err();
	assert_eq!(err.kind, GeataErrorKind::RespondOutsideDispatch);
}

#[test]
fn cache_override_reaches_the_host_on_fetch() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/co", &[], b"");
	host.add_backend(
		"origin",
		CannedReply {
			status: 200,
			headers: Vec::new(),
			body: Vec::new(),
		},
	);
	let mut rt = runtime_for(&host);

	rt.add_fetch_listener(|rt| {
		let mut cache_override = geata::CacheOverride::from_mode_str("override")?;
		cache_override.set_ttl(Some(120))?;
		cache_override.set_swr(Some(30))?;
		let promise = rt.fetch_with(
			"https://origin.example/cached",
			RequestInit {
				backend: Some("origin".into()),
				cache_override: Some(cache_override),
				..Default::default()
			},
		);
		rt.respond_with(promise)
	});

	rt.dispatch_fetch_event().unwrap();
	rt.run_event_loop().unwrap();

	let record = host
		.cache_override_for_last_sent()
		.expect("cache override was applied");
	// TTL and SWR bits
	assert_eq!(record.tag, (1 << 1) | (1 << 2));
	assert_eq!(record.ttl, 120);
	assert_eq!(record.swr, 30);
	assert!(!record.has_surrogate_key);
}

#[test]
fn client_info_is_cached_per_event() {
	let host = MemoryHost::new();
	host.set_downstream_request("GET", "/client", &[], b"");
	host.set_client_ip("203.0.113.9".parse().unwrap());
	host.add_geo("203.0.113.9".parse().unwrap(), r#"{"city":"Galway"}"#);
	let mut rt = runtime_for(&host);
	rt.dispatch_fetch_event().unwrap();

	let address = rt.event_client_address().unwrap();
	assert_eq!(address, Some("203.0.113.9".parse().unwrap()));
	let geo = rt.event_client_geo().unwrap();
	assert_eq!(geo, serde_json::json!({"city": "Galway"}));
	// second lookup comes from the cache
	assert_eq!(rt.event_client_geo().unwrap(), geo);
}
