#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::thread;

use parking_lot::Mutex;
use serde_json::{json, Value};
use tiny_http::{Header, Response, Server};

/// Minimal stand-in for the public XRPC endpoints, served on a random local
/// port. Responses are keyed by method and the `handle` / `uri` parameter.
pub struct MockApi {
    server: Arc<Server>,
    pub base_url: String,
    pub requests: Arc<Mutex<Vec<String>>>,
    routes: Arc<Mutex<Routes>>,
    handle: Option<thread::JoinHandle<()>>,
}

#[derive(Default, Clone)]
pub struct Routes {
    responses: HashMap<(String, String), (u16, String)>,
}

impl Routes {
    pub fn handle(mut self, handle: &str, did: &str) -> Self {
        self.responses.insert(
            ("com.atproto.identity.resolveHandle".into(), handle.into()),
            (200, json!({ "did": did }).to_string()),
        );
        self
    }

    pub fn thread(mut self, uri: &str, thread: Value) -> Self {
        self.responses.insert(
            ("app.bsky.feed.getPostThread".into(), uri.into()),
            (200, json!({ "thread": thread }).to_string()),
        );
        self
    }

    pub fn raw(mut self, method: &str, key: &str, status: u16, body: &str) -> Self {
        self.responses
            .insert((method.into(), key.into()), (status, body.into()));
        self
    }
}

impl MockApi {
    pub fn start(routes: Routes) -> Self {
        let server = Arc::new(Server::http("127.0.0.1:0").expect("bind mock server"));
        let addr = server.server_addr().to_ip().expect("ip listener");
        let requests = Arc::new(Mutex::new(Vec::new()));
        let routes = Arc::new(Mutex::new(routes));

        let worker_server = server.clone();
        let worker_requests = requests.clone();
        let worker_routes = routes.clone();
        let handle = thread::spawn(move || {
            for request in worker_server.incoming_requests() {
                let target = url::Url::parse(&format!("http://mock{}", request.url()))
                    .expect("request url");
                worker_requests.lock().push(request.url().to_string());

                let method = target.path().trim_start_matches("/xrpc/").to_string();
                let params: HashMap<String, String> = target.query_pairs().into_owned().collect();
                let key = params
                    .get("uri")
                    .or_else(|| params.get("handle"))
                    .cloned()
                    .unwrap_or_default();

                let (status, body) = worker_routes
                    .lock()
                    .responses
                    .get(&(method, key))
                    .cloned()
                    .unwrap_or((404, r#"{"error":"NotFound"}"#.to_string()));
                let header = Header::from_bytes("Content-Type", "application/json")
                    .expect("content type header");
                let response = Response::from_string(body)
                    .with_status_code(status)
                    .with_header(header);
                let _ = request.respond(response);
            }
        });

        Self {
            server,
            base_url: format!("http://{addr}/xrpc"),
            requests,
            routes,
            handle: Some(handle),
        }
    }

    /// Scheme, host and port of the server, e.g. for image URLs.
    pub fn origin(&self) -> String {
        self.base_url.trim_end_matches("/xrpc").to_string()
    }

    /// Add routes to a running server.
    pub fn extend(&self, more: Routes) {
        self.routes.lock().responses.extend(more.responses);
    }

    /// Decoded `uri` parameters of every thread request, in arrival order.
    pub fn thread_requests(&self) -> Vec<String> {
        self.requests
            .lock()
            .iter()
            .filter(|url| url.starts_with("/xrpc/app.bsky.feed.getPostThread"))
            .filter_map(|url| {
                let parsed = url::Url::parse(&format!("http://mock{url}")).ok()?;
                parsed
                    .query_pairs()
                    .find(|(key, _)| key == "uri")
                    .map(|(_, value)| value.into_owned())
            })
            .collect()
    }
}

impl Drop for MockApi {
    fn drop(&mut self) {
        self.server.unblock();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

pub fn post(uri: &str, did: &str, handle: &str, text: &str, reply_count: u64) -> Value {
    json!({
        "uri": uri,
        "cid": "bafytest",
        "author": { "did": did, "handle": handle },
        "record": {
            "$type": "app.bsky.feed.post",
            "text": text,
            "createdAt": "2024-05-01T12:30:00.000Z"
        },
        "replyCount": reply_count,
        "likeCount": 4,
        "repostCount": 1
    })
}

pub fn view(post: Value, replies: Option<Vec<Value>>) -> Value {
    let mut node = json!({
        "$type": "app.bsky.feed.defs#threadViewPost",
        "post": post,
    });
    if let Some(replies) = replies {
        node["replies"] = Value::Array(replies);
    }
    node
}
