#![allow(dead_code)]

use chrono::Duration as ChronoDuration;
use pa_aqi_pipeline::config::Config;
use pa_aqi_pipeline::error::{PipelineError, Result};
use pa_aqi_pipeline::retry::RetryPolicy;
use pa_aqi_pipeline::types::{BoundingBox, FeedRequest, FeedRow, SensorRecord, StreamCredentials};
use pa_aqi_pipeline::{FeedSource, SensorDirectory};
use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

/// Fast retries, no inter-request delay, everything under `root`.
pub fn test_config(root: &Path) -> Config {
    Config {
        api_key: "test-key".into(),
        data_root: root.to_path_buf(),
        request_delay: Duration::ZERO,
        retry: RetryPolicy::default()
            .with_attempts(2)
            .with_delay(Duration::from_millis(1))
            .with_cooldown(Duration::from_millis(1)),
        ..Config::default()
    }
}

pub fn sensor(index: i64, with_a: bool, with_b: bool) -> SensorRecord {
    let creds = |tag: &str| StreamCredentials {
        stream_id: format!("{}{}", index, tag),
        stream_key: format!("key-{}{}", index, tag),
    };
    SensorRecord {
        sensor_index: index,
        name: format!("S{}", index),
        latitude: 33.70 + index as f64 / 100.0,
        longitude: -117.50 + index as f64 / 100.0,
        channel_a: with_a.then(|| creds("a")),
        channel_b: with_b.then(|| creds("b")),
    }
}

pub struct FakeDirectory {
    pub sensors: Vec<SensorRecord>,
    pub fail: bool,
    pub queried: Mutex<Vec<BoundingBox>>,
}

impl FakeDirectory {
    pub fn with(sensors: Vec<SensorRecord>) -> Self {
        Self {
            sensors,
            fail: false,
            queried: Mutex::new(Vec::new()),
        }
    }

    pub fn failing() -> Self {
        Self {
            sensors: Vec::new(),
            fail: true,
            queried: Mutex::new(Vec::new()),
        }
    }
}

impl SensorDirectory for FakeDirectory {
    async fn list_sensors(&self, bbox: &BoundingBox) -> Result<Vec<SensorRecord>> {
        self.queried.lock().push(*bbox);
        if self.fail {
            return Err(PipelineError::DirectoryUnavailable {
                message: "HTTP 500".into(),
                status: Some(500),
            });
        }
        Ok(self.sensors.clone())
    }
}

#[derive(Debug, Clone, Copy)]
pub enum Behavior {
    /// This many rows of PM2.5 = 10.0 per window.
    Rows(usize),
    AlwaysFail,
    FailTimes(u32),
    RateLimitOnce,
    NotFound,
    Infinite,
    /// Three rows after a pause.
    Slow(Duration),
}

/// In-memory feed keyed by stream id.
pub struct FakeFeed {
    behaviors: HashMap<String, Behavior>,
    calls: Mutex<HashMap<String, u32>>,
    started: Mutex<Vec<Instant>>,
    in_flight: AtomicUsize,
    pub peak_in_flight: AtomicUsize,
    pub total_calls: AtomicUsize,
}

impl FakeFeed {
    pub fn new() -> Self {
        Self {
            behaviors: HashMap::new(),
            calls: Mutex::new(HashMap::new()),
            started: Mutex::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            peak_in_flight: AtomicUsize::new(0),
            total_calls: AtomicUsize::new(0),
        }
    }

    pub fn on(mut self, stream_id: &str, behavior: Behavior) -> Self {
        self.behaviors.insert(stream_id.to_string(), behavior);
        self
    }

    pub fn calls_for(&self, stream_id: &str) -> u32 {
        self.calls.lock().get(stream_id).copied().unwrap_or(0)
    }

    /// Gaps between the starts of consecutive calls.
    pub fn start_gaps(&self) -> Vec<Duration> {
        let started = self.started.lock();
        started.windows(2).map(|w| w[1] - w[0]).collect()
    }
}

/// Rows spaced ten minutes apart from the window start, with entry ids unique
/// across windows.
pub fn rows_for(request: &FeedRequest, n: usize, density: f64) -> Vec<FeedRow> {
    let base = request.window.start.timestamp() / 600;
    (0..n)
        .map(|i| {
            let at = request.window.start + ChronoDuration::minutes(10 * i as i64);
            FeedRow {
                created_at: at.format("%Y-%m-%d %H:%M:%S UTC").to_string(),
                entry_id: Some(base + i as i64),
                field1: Some(density * 0.6),
                field2: Some(density * 1.1),
                field4: Some(600.0 + i as f64),
                field8: Some(density),
                ..Default::default()
            }
        })
        .collect()
}

impl FeedSource for FakeFeed {
    async fn fetch_window(&self, request: &FeedRequest) -> Result<Vec<FeedRow>> {
        self.total_calls.fetch_add(1, Ordering::SeqCst);
        self.started.lock().push(Instant::now());
        let running = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak_in_flight.fetch_max(running, Ordering::SeqCst);
        let result = self.respond(request).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

impl FakeFeed {
    async fn respond(&self, request: &FeedRequest) -> Result<Vec<FeedRow>> {
        let attempt = {
            let mut calls = self.calls.lock();
            let count = calls.entry(request.stream_id.clone()).or_insert(0);
            *count += 1;
            *count
        };

        let behavior = self
            .behaviors
            .get(&request.stream_id)
            .copied()
            .unwrap_or(Behavior::Rows(3));
        match behavior {
            Behavior::Rows(n) => Ok(rows_for(request, n, 10.0)),
            Behavior::AlwaysFail => Err(PipelineError::transient("connection refused", request.to_string())),
            Behavior::FailTimes(k) if attempt <= k => {
                Err(PipelineError::transient("connection reset", request.to_string()))
            }
            Behavior::FailTimes(_) => Ok(rows_for(request, 3, 10.0)),
            Behavior::RateLimitOnce if attempt == 1 => {
                Err(PipelineError::rate_limited(Duration::from_millis(1)))
            }
            Behavior::RateLimitOnce => Ok(rows_for(request, 3, 10.0)),
            Behavior::NotFound => Err(PipelineError::Server {
                message: "not found".into(),
                status: 404,
                body: None,
            }),
            Behavior::Infinite => Ok(rows_for(request, 1, f64::INFINITY)),
            Behavior::Slow(pause) => {
                tokio::time::sleep(pause).await;
                Ok(rows_for(request, 3, 10.0))
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct MockResponse {
    pub status: u16,
    pub content_type: &'static str,
    pub body: String,
}

impl MockResponse {
    pub fn json(body: serde_json::Value) -> Self {
        Self {
            status: 200,
            content_type: "application/json",
            body: body.to_string(),
        }
    }

    pub fn csv(body: &str) -> Self {
        Self {
            status: 200,
            content_type: "text/csv",
            body: body.to_string(),
        }
    }

    pub fn status(status: u16) -> Self {
        Self {
            status,
            content_type: "text/plain",
            body: String::new(),
        }
    }
}

/// Minimal HTTP/1.1 responder on a local port. Replies in order and repeats
/// the last response once the script runs out.
pub struct MockServer {
    pub base_url: String,
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockServer {
    pub async fn start(script: Vec<MockResponse>) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let base_url = format!("http://{}", listener.local_addr().unwrap());
        let requests = Arc::new(Mutex::new(Vec::new()));
        let script = Arc::new(Mutex::new(VecDeque::from(script)));

        let seen = requests.clone();
        tokio::spawn(async move {
            while let Ok((stream, _)) = listener.accept().await {
                let next = {
                    let mut script = script.lock();
                    if script.len() > 1 {
                        script.pop_front()
                    } else {
                        script.front().cloned()
                    }
                };
                let Some(response) = next else { break };
                let seen = seen.clone();
                tokio::spawn(async move {
                    let _ = respond(stream, response, seen).await;
                });
            }
        });

        Self { base_url, requests }
    }

    /// Raw request heads received so far.
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().clone()
    }
}

async fn respond(
    mut stream: TcpStream,
    response: MockResponse,
    seen: Arc<Mutex<Vec<String>>>,
) -> std::io::Result<()> {
    let mut head = Vec::new();
    let mut chunk = [0u8; 4096];
    loop {
        let n = stream.read(&mut chunk).await?;
        if n == 0 {
            break;
        }
        head.extend_from_slice(&chunk[..n]);
        if head.windows(4).any(|w| w == b"\r\n\r\n") {
            break;
        }
    }
    seen.lock().push(String::from_utf8_lossy(&head).into_owned());

    let reply = format!(
        "HTTP/1.1 {} Mock\r\nContent-Type: {}\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        response.status,
        response.content_type,
        response.body.len(),
        response.body
    );
    stream.write_all(reply.as_bytes()).await?;
    stream.shutdown().await
}
