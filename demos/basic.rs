//! Minimal service: one JSON handler behind tracing, recovery and a naive
//! per-IP rate limit.
//!
//! Run with:
//!   RUST_LOG=info cargo run --example basic
//!
//! Try:
//!   curl -X POST http://localhost:3000 -H 'content-type: application/json' \
//!        -d '{"name":"alice","age":3}'
//!   curl -X POST http://localhost:3000 -H 'content-type: application/json' \
//!        -d '{"name":"","age":0}'
//!   curl -X POST http://localhost:3000 -d '{"name":"panic","age":1}'
//!   curl -X POST http://localhost:3000 -H 'x-request-id: abc' -d 'not json'

use std::collections::HashMap;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tsu_lifecycle::{
    BoxFuture, Context, Error, FieldViolation, FieldViolations, HandlerResult, Pipeline, RateLimit,
    RateLimiter, Reply, Server, SettingsBuilder, TracingTracer, Validate,
};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt::init();

    let settings = SettingsBuilder::from_env().application_name("basic").build();
    let pipeline = Pipeline::builder(settings)
        .tracer(TracingTracer::new())
        .layer(RateLimit::new(PerSecond::new(20)))
        .build(create_user);

    Server::bind(([0, 0, 0, 0], 3000).into()).serve(pipeline).await?;
    Ok(())
}

#[derive(Default, Deserialize)]
struct NewUser {
    name: String,
    age: i64,
}

impl Validate for NewUser {
    fn validate(&self) -> Result<(), FieldViolations> {
        let mut v = FieldViolations::new();
        if self.name.is_empty() {
            v.push(FieldViolation::required("name"));
        }
        if self.age <= 0 {
            v.push(FieldViolation::positive("age"));
        }
        v.into_result()
    }
}

#[derive(Serialize)]
struct User {
    id: u64,
    name: String,
}

fn create_user(ctx: &mut Context) -> BoxFuture<'_, HandlerResult> {
    Box::pin(async move {
        let input: NewUser = ctx.valid_json()?;
        if input.name == "panic" {
            panic!("refusing to create {}", input.name);
        }
        ctx.add_log_field("user", input.name.clone());
        Reply::json(&User { id: 42, name: input.name })
    })
}

// ── Rate limiting ─────────────────────────────────────────────────────────────

struct PerSecond {
    limit: u32,
    windows: Mutex<HashMap<String, (Instant, u32)>>,
}

impl PerSecond {
    fn new(limit: u32) -> Self {
        Self { limit, windows: Mutex::new(HashMap::new()) }
    }
}

impl RateLimiter for PerSecond {
    fn check(&self, identity: &str) -> Result<(), Error> {
        let now = Instant::now();
        let mut windows = self.windows.lock();
        let (start, count) = windows.entry(identity.to_owned()).or_insert((now, 0));
        if now.duration_since(*start) >= Duration::from_secs(1) {
            *start = now;
            *count = 0;
        }
        *count += 1;
        if *count > self.limit {
            return Err(Error::new("too many requests").with_code("429"));
        }
        Ok(())
    }
}
