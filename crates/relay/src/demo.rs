//! Demo procedures served by the binary.
//!
//! - `clock` (atom): wall-clock milliseconds, updated every second
//! - `counter` (atom) and `counter.increment` (unary)
//! - `countdown` (stream): numbered events, resumable via `Last-Event-ID`
//! - `echo` (unary)

use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use async_trait::async_trait;
use futures::FutureExt;
use relay_core::RelayError;
use relay_server::{
    Atom, CallContext, EventEmitter, Interceptor, Next, ProcedureRegistry, StreamError,
    StreamHandler, UnaryHandler, unary_fn,
};
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

const CLOCK_PERIOD: Duration = Duration::from_secs(1);
const MAX_COUNTDOWN: u64 = 10_000;

/// Value of the `clock` atom.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ClockTick {
    /// Milliseconds since the Unix epoch.
    pub unix_ms: u64,
}

impl ClockTick {
    fn now() -> Self {
        let unix_ms = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| u64::try_from(d.as_millis()).unwrap_or(u64::MAX));
        Self { unix_ms }
    }
}

/// The cells behind the demo procedures.
pub struct Demo {
    clock: Atom<ClockTick>,
    counter: Atom<u64>,
}

impl Demo {
    /// Fresh cells: the clock at the current time, the counter at zero.
    pub fn new() -> Self {
        Self {
            clock: Atom::new(ClockTick::now()),
            counter: Atom::new(0),
        }
    }

    /// Registry with every demo procedure and the request logger.
    pub fn registry(&self) -> ProcedureRegistry {
        let mut reg = ProcedureRegistry::new();
        let _ = reg.intercept(RequestLogger);

        let _ = reg
            .atom("clock", &self.clock)
            .value_type("ClockTick")
            .describe("Wall-clock time, once per second");
        let _ = reg
            .atom("counter", &self.counter)
            .value_type("u64")
            .describe("Shared counter");
        let _ = reg
            .unary(
                "counter.increment",
                Increment {
                    counter: self.counter.clone(),
                },
            )
            .value_type("u64")
            .describe("Add `by` (default 1) to the counter");
        let _ = reg
            .stream("countdown", Countdown)
            .value_type("u64")
            .describe("Counts down from `from`; resumes after Last-Event-ID");
        let _ = reg
            .unary(
                "echo",
                unary_fn(|_ctx, input| async move { Ok(input) }.boxed()),
            )
            .describe("Returns its input");
        reg
    }

    /// Tick the clock atom until `cancel` fires.
    pub fn spawn_clock(&self, cancel: CancellationToken) -> JoinHandle<()> {
        let clock = self.clock.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(CLOCK_PERIOD);
            loop {
                tokio::select! {
                    () = cancel.cancelled() => break,
                    _ = ticker.tick() => clock.write(ClockTick::now()),
                }
            }
            debug!("clock stopped");
        })
    }
}

/// Logs every call with its outcome and duration.
struct RequestLogger;

#[async_trait]
impl Interceptor for RequestLogger {
    async fn intercept(
        &self,
        ctx: &CallContext,
        req: Value,
        next: Next<'_>,
    ) -> Result<Value, RelayError> {
        let start = Instant::now();
        let result = next.run(ctx, req).await;
        let elapsed_ms = start.elapsed().as_millis();
        match &result {
            Ok(_) => info!(
                procedure = ctx.procedure(),
                request_id = %ctx.request_id(),
                kind = ctx.kind().as_str(),
                elapsed_ms,
                "call accepted"
            ),
            Err(err) => info!(
                procedure = ctx.procedure(),
                request_id = %ctx.request_id(),
                code = err.code(),
                elapsed_ms,
                "call rejected"
            ),
        }
        result
    }
}

#[derive(Debug, Deserialize)]
struct IncrementInput {
    #[serde(default = "one")]
    by: u64,
}

fn one() -> u64 {
    1
}

struct Increment {
    counter: Atom<u64>,
}

#[async_trait]
impl UnaryHandler for Increment {
    async fn call(&self, _ctx: &CallContext, input: Value) -> Result<Value, RelayError> {
        let IncrementInput { by } = if input.is_null() {
            IncrementInput { by: 1 }
        } else {
            serde_json::from_value(input).map_err(|e| RelayError::invalid_params(e.to_string()))?
        };
        let mut next = 0;
        self.counter.update(|n| {
            next = n.saturating_add(by);
            next
        });
        Ok(json!(next))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct CountdownInput {
    from: u64,
    #[serde(default = "default_interval_ms")]
    interval_ms: u64,
}

fn default_interval_ms() -> u64 {
    1000
}

struct Countdown;

#[async_trait]
impl StreamHandler for Countdown {
    async fn run(
        &self,
        _ctx: &CallContext,
        input: Value,
        emitter: EventEmitter,
    ) -> Result<(), RelayError> {
        let input: CountdownInput = serde_json::from_value(input)
            .map_err(|e| RelayError::invalid_params(format!("countdown: {e}")))?;
        if input.from > MAX_COUNTDOWN {
            return Err(RelayError::invalid_params(format!(
                "countdown: from must be at most {MAX_COUNTDOWN}"
            )));
        }

        // resume below the last delivered number
        let start = match emitter.last_event_id().parse::<u64>() {
            Ok(last) if last <= input.from => last.checked_sub(1),
            _ => Some(input.from),
        };
        let Some(start) = start else {
            return Ok(());
        };

        let period = Duration::from_millis(input.interval_ms);
        for n in (0..=start).rev() {
            emitter.send_with_id(&n.to_string(), &n).await?;
            if n > 0 {
                tokio::select! {
                    () = emitter.cancelled() => return Err(StreamError::Canceled.into()),
                    () = tokio::time::sleep(period) => {}
                }
            }
        }
        Ok(())
    }
}
