//! Scoreboard polling client: timer-driven fetch → decode → publish.
//!
//! ```text
//!  interval tick ──▶ fetch (HTTP GET, bounded timeout)
//!                        │ raw bytes
//!                        ▼
//!                     decode ─── failure ──▶ warn + keep last good snapshot
//!                        │ Vec<ScoreEvent>
//!                        ▼
//!                 publish snapshot ──▶ delivery task ──▶ observer callbacks
//! ```
//!
//! One client per sport path; clients are fully independent. A cycle that
//! fails, for any reason, never replaces the last good snapshot; stale data
//! beats no data. At most one request per client is in flight at any moment:
//! timer cycles run back to back inside one task, and `fetch_once` waits on
//! the same guard, so publishes stay in fetch-completion order.

mod subscribers;

pub use subscribers::{Snapshot, SubscriptionToken};

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex as AsyncMutex;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::error::FetchError;
use crate::scoreboard::decode;
use crate::scoreboard::source::{HttpSource, ScoreboardSource, DEFAULT_BASE_URL};
use subscribers::Publisher;

/// Default pause between poll cycles.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(4);
/// Default per-request HTTP timeout.
pub const DEFAULT_HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// The leagues the public scoreboard API is known to serve. One
/// [`ScoreboardClient`] per league replaces per-sport copies of the fetch
/// code; any other sport path can still be passed to
/// [`ScoreboardClient::new`] directly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum League {
    Nba,
    Nfl,
    Mlb,
    Wnba,
    Nhl,
}

impl League {
    pub const ALL: [League; 5] = [
        League::Nba,
        League::Nfl,
        League::Mlb,
        League::Wnba,
        League::Nhl,
    ];

    /// API path segment for this league.
    pub fn sport_path(self) -> &'static str {
        match self {
            League::Nba => "basketball/nba",
            League::Nfl => "football/nfl",
            League::Mlb => "baseball/mlb",
            League::Wnba => "basketball/wnba",
            League::Nhl => "hockey/nhl",
        }
    }
}

/// Polling client for one sport's scoreboard.
///
/// Owns the published event list; observers get read-only snapshots through
/// [`subscribe`](Self::subscribe) and [`current_events`](Self::current_events)
/// and never block the poll loop.
pub struct ScoreboardClient {
    source: Option<Arc<dyn ScoreboardSource>>,
    poll_interval: Duration,
    publisher: Arc<Publisher>,
    /// Held across a whole fetch-decode-publish cycle: the timer path and
    /// `fetch_once` can never have two requests in flight at once.
    in_flight: Arc<AsyncMutex<()>>,
    /// Bumped by `stop()`. A cycle publishes only if the epoch it started
    /// under is still current, so a request resolving after `stop()` is
    /// discarded.
    epoch: Arc<Mutex<u64>>,
    worker: Mutex<Option<JoinHandle<()>>>,
}

impl ScoreboardClient {
    /// Build a client for `sport_path`, e.g. "basketball/nba", polling the
    /// public API with default interval and timeout.
    ///
    /// A path that cannot form a scoreboard endpoint yields an **inert**
    /// client: `start()` and `fetch_once()` log a warning and do nothing.
    /// Construction never fails.
    ///
    /// Must be called within a Tokio runtime, since the client spawns the
    /// task observers are notified on.
    pub fn new(sport_path: &str) -> Self {
        Self::with_options(
            sport_path,
            DEFAULT_BASE_URL,
            DEFAULT_POLL_INTERVAL,
            DEFAULT_HTTP_TIMEOUT,
        )
    }

    /// Client for one of the known leagues.
    pub fn for_league(league: League) -> Self {
        Self::new(league.sport_path())
    }

    /// Full-control constructor. `base_url` exists for pointing tests at a
    /// local server.
    pub fn with_options(
        sport_path: &str,
        base_url: &str,
        poll_interval: Duration,
        http_timeout: Duration,
    ) -> Self {
        let source = match HttpSource::new(base_url, sport_path, http_timeout) {
            Some(source) => Some(Arc::new(source) as Arc<dyn ScoreboardSource>),
            None => {
                warn!("invalid sport path {:?}, client will never fetch", sport_path);
                None
            }
        };
        Self::from_source(source, poll_interval)
    }

    /// Client over an arbitrary byte source instead of the HTTP endpoint.
    pub fn with_source(source: Arc<dyn ScoreboardSource>, poll_interval: Duration) -> Self {
        Self::from_source(Some(source), poll_interval)
    }

    fn from_source(source: Option<Arc<dyn ScoreboardSource>>, poll_interval: Duration) -> Self {
        ScoreboardClient {
            source,
            poll_interval,
            publisher: Publisher::new(),
            in_flight: Arc::new(AsyncMutex::new(())),
            epoch: Arc::new(Mutex::new(0)),
            worker: Mutex::new(None),
        }
    }

    // ── Lifecycle ────────────────────────────────────────────────────────────

    /// Begin polling: one cycle immediately, then one per interval. Calling
    /// `start()` while already running is a no-op; after [`stop`](Self::stop)
    /// it starts a fresh timer.
    pub fn start(&self) {
        let Some(source) = self.source.clone() else {
            warn!("start() on inert client ignored");
            return;
        };

        let mut worker = self.worker.lock().unwrap();
        if let Some(handle) = worker.as_ref() {
            if !handle.is_finished() {
                debug!("poll loop for {} already running", source.endpoint());
                return;
            }
        }

        info!(
            "polling {} every {:?}",
            source.endpoint(),
            self.poll_interval
        );

        let publisher = Arc::clone(&self.publisher);
        let in_flight = Arc::clone(&self.in_flight);
        let epoch = Arc::clone(&self.epoch);
        let interval = self.poll_interval;

        *worker = Some(tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
            loop {
                ticker.tick().await;
                // Awaited inline: the next tick cannot start a cycle while
                // this one is still on the wire.
                let _ = run_cycle(&source, &publisher, &in_flight, &epoch).await;
            }
        }));
    }

    /// Stop polling and cancel any in-flight request. Once this returns, a
    /// request that was already on the wire can no longer publish. Safe to
    /// call repeatedly, or without a prior `start()`.
    pub fn stop(&self) {
        *self.epoch.lock().unwrap() += 1;
        if let Some(handle) = self.worker.lock().unwrap().take() {
            handle.abort();
            info!("scoreboard polling stopped");
        }
    }

    /// One on-demand fetch-decode-publish cycle outside the timer, e.g. when
    /// the scoreboard comes back on screen. Waits for any in-flight cycle to
    /// finish first rather than overlapping it. The error is also recorded
    /// in [`last_error`](Self::last_error); it is never delivered to
    /// subscribers.
    pub async fn fetch_once(&self) -> Result<(), FetchError> {
        let Some(source) = self.source.clone() else {
            warn!("fetch_once() on inert client ignored");
            return Ok(());
        };
        run_cycle(&source, &self.publisher, &self.in_flight, &self.epoch).await
    }

    /// Whether the poll loop is currently running.
    pub fn is_running(&self) -> bool {
        self.worker
            .lock()
            .unwrap()
            .as_ref()
            .map(|handle| !handle.is_finished())
            .unwrap_or(false)
    }

    // ── Subscription surface ─────────────────────────────────────────────────

    /// Register an observer. The callback runs on the client's delivery
    /// task (never on the poll loop), once per publish, in subscription
    /// order across observers.
    pub fn subscribe(
        &self,
        callback: impl Fn(&Snapshot) + Send + Sync + 'static,
    ) -> SubscriptionToken {
        self.publisher.subscribe(callback)
    }

    /// Remove an observer. Returns whether the token was still registered.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.publisher.unsubscribe(token)
    }

    /// Latest published snapshot. Empty before the first successful fetch;
    /// that is a valid state, not an error.
    pub fn current_events(&self) -> Snapshot {
        self.publisher.current()
    }

    /// When the snapshot was last replaced, if ever.
    pub fn last_updated(&self) -> Option<DateTime<Utc>> {
        self.publisher.last_updated()
    }

    /// Description of the most recent failed cycle, cleared by the next
    /// successful one.
    pub fn last_error(&self) -> Option<String> {
        self.publisher.last_error()
    }
}

impl Drop for ScoreboardClient {
    fn drop(&mut self) {
        if let Ok(mut worker) = self.worker.lock() {
            if let Some(handle) = worker.take() {
                handle.abort();
            }
        }
    }
}

/// One fetch-decode-publish cycle. A failure leaves the previous snapshot in
/// place; the cycle only reports it.
async fn run_cycle(
    source: &Arc<dyn ScoreboardSource>,
    publisher: &Arc<Publisher>,
    in_flight: &AsyncMutex<()>,
    epoch: &Mutex<u64>,
) -> Result<(), FetchError> {
    let _guard = in_flight.lock().await;
    let started_under = *epoch.lock().unwrap();

    let outcome = match source.fetch().await {
        Ok(payload) => decode(&payload).map_err(FetchError::from),
        Err(e) => Err(e),
    };

    match outcome {
        Ok(events) => {
            // Checked under the same lock `stop()` bumps: a publish either
            // completes before stop() returns or not at all.
            let current = epoch.lock().unwrap();
            if *current != started_under {
                debug!("discarding result of cancelled cycle for {}", source.endpoint());
                return Ok(());
            }
            debug!("publishing {} event(s) from {}", events.len(), source.endpoint());
            publisher.publish(events);
            Ok(())
        }
        Err(e) => {
            warn!("scoreboard cycle for {} failed: {}", source.endpoint(), e);
            if *epoch.lock().unwrap() == started_under {
                publisher.record_failure(e.to_string());
            }
            Err(e)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DecodeError;

    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;

    fn init_logs() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(
                tracing_subscriber::EnvFilter::try_from_default_env()
                    .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("scorewatch=debug")),
            )
            .with_test_writer()
            .try_init();
    }

    fn payload(id: &str) -> String {
        format!(
            r#"{{"events":[{{"id":"{id}","name":"Team A at Team B","date":"2024-01-01T18:00Z","competitions":[{{"competitors":[{{"team":{{"displayName":"Team A"}},"score":"10"}},{{"team":{{"displayName":"Team B"}},"score":"7"}}],"status":{{"type":{{"description":"Final"}}}}}}]}}]}}"#
        )
    }

    enum Step {
        Ok(String, Duration),
        Fail(Duration),
    }

    /// Plays back a fixed sequence of responses, then empty scoreboards.
    struct ScriptedSource {
        steps: AsyncMutex<VecDeque<Step>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn new(steps: Vec<Step>) -> Arc<Self> {
            Arc::new(ScriptedSource {
                steps: AsyncMutex::new(steps.into()),
                calls: AtomicUsize::new(0),
            })
        }

        fn calls(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    #[async_trait]
    impl ScoreboardSource for ScriptedSource {
        async fn fetch(&self) -> Result<Vec<u8>, FetchError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let step = self.steps.lock().await.pop_front();
            match step {
                Some(Step::Ok(body, delay)) => {
                    tokio::time::sleep(delay).await;
                    Ok(body.into_bytes())
                }
                Some(Step::Fail(delay)) => {
                    tokio::time::sleep(delay).await;
                    Err(FetchError::Status {
                        url: "scripted://scoreboard".to_string(),
                        status: reqwest::StatusCode::INTERNAL_SERVER_ERROR,
                    })
                }
                None => Ok(br#"{"events":[]}"#.to_vec()),
            }
        }

        fn endpoint(&self) -> &str {
            "scripted://scoreboard"
        }
    }

    #[test]
    fn test_league_sport_paths() {
        assert_eq!(League::Nba.sport_path(), "basketball/nba");
        assert_eq!(League::Nfl.sport_path(), "football/nfl");
        assert_eq!(League::Mlb.sport_path(), "baseball/mlb");
        assert_eq!(League::Wnba.sport_path(), "basketball/wnba");
        assert_eq!(League::Nhl.sport_path(), "hockey/nhl");
        assert_eq!(League::ALL.len(), 5);
    }

    #[tokio::test]
    async fn test_fetch_once_publishes_and_notifies() -> anyhow::Result<()> {
        init_logs();
        let source = ScriptedSource::new(vec![Step::Ok(payload("401"), Duration::ZERO)]);
        let client = ScoreboardClient::with_source(source, DEFAULT_POLL_INTERVAL);

        let seen: Arc<StdMutex<Vec<usize>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        client.subscribe(move |snap| sink.lock().unwrap().push(snap.len()));

        client.fetch_once().await?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(client.current_events()[0].id, "401");
        assert!(client.last_updated().is_some());
        assert_eq!(*seen.lock().unwrap(), vec![1]);
        Ok(())
    }

    #[tokio::test]
    async fn test_failed_fetch_keeps_previous_snapshot() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![
            Step::Ok(payload("401"), Duration::ZERO),
            Step::Fail(Duration::ZERO),
            Step::Ok(payload("402"), Duration::ZERO),
        ]);
        let client = ScoreboardClient::with_source(source, DEFAULT_POLL_INTERVAL);

        client.fetch_once().await?;
        assert_eq!(client.current_events()[0].id, "401");

        let err = client.fetch_once().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { .. }));
        assert_eq!(
            client.current_events()[0].id,
            "401",
            "failed cycle must not replace good data"
        );
        assert!(client.last_error().is_some());

        client.fetch_once().await?;
        assert_eq!(client.current_events()[0].id, "402");
        assert!(client.last_error().is_none(), "success clears the diagnostic");
        Ok(())
    }

    #[tokio::test]
    async fn test_malformed_body_keeps_previous_snapshot() -> anyhow::Result<()> {
        let truncated = r#"{"events":[{"id":"4"#.to_string();
        let source = ScriptedSource::new(vec![
            Step::Ok(truncated.clone(), Duration::ZERO),
            Step::Ok(payload("401"), Duration::ZERO),
            Step::Ok(truncated, Duration::ZERO),
        ]);
        let client = ScoreboardClient::with_source(source, DEFAULT_POLL_INTERVAL);

        // Malformed before anything was published: snapshot stays empty.
        let err = client.fetch_once().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(DecodeError::Malformed(_))));
        assert!(client.current_events().is_empty());

        client.fetch_once().await?;
        assert_eq!(client.current_events()[0].id, "401");

        // Malformed after a good publish: good data survives.
        let err = client.fetch_once().await.unwrap_err();
        assert!(matches!(err, FetchError::Decode(DecodeError::Malformed(_))));
        assert_eq!(client.current_events()[0].id, "401");
        Ok(())
    }

    #[tokio::test]
    async fn test_cycles_never_overlap_and_last_completion_wins() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![
            Step::Ok(payload("first"), Duration::from_millis(120)),
            Step::Ok(payload("second"), Duration::from_millis(10)),
        ]);
        let client = ScoreboardClient::with_source(source, DEFAULT_POLL_INTERVAL);

        let order: Arc<StdMutex<Vec<String>>> = Arc::new(StdMutex::new(Vec::new()));
        let sink = Arc::clone(&order);
        client.subscribe(move |snap| sink.lock().unwrap().push(snap[0].id.clone()));

        // Two on-demand cycles racing: the guard serializes them, so the
        // slow first request finishes (and publishes) before the fast
        // second one even starts.
        let (a, b) = tokio::join!(client.fetch_once(), client.fetch_once());
        a?;
        b?;
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert_eq!(client.current_events()[0].id, "second");
        assert_eq!(*order.lock().unwrap(), vec!["first".to_string(), "second".to_string()]);
        Ok(())
    }

    #[tokio::test]
    async fn test_stop_suppresses_inflight_publish() -> anyhow::Result<()> {
        init_logs();
        let source = ScriptedSource::new(vec![Step::Ok(payload("401"), Duration::from_millis(150))]);
        let client = Arc::new(ScoreboardClient::with_source(source, DEFAULT_POLL_INTERVAL));

        let notified = Arc::new(AtomicUsize::new(0));
        let sink = Arc::clone(&notified);
        client.subscribe(move |_| {
            sink.fetch_add(1, Ordering::SeqCst);
        });

        let background = Arc::clone(&client);
        let cycle = tokio::spawn(async move { background.fetch_once().await });

        // Let the request get onto the wire, then cancel.
        tokio::time::sleep(Duration::from_millis(30)).await;
        client.stop();

        cycle.await.unwrap()?;
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert!(
            client.current_events().is_empty(),
            "a request resolving after stop() must not publish"
        );
        assert_eq!(notified.load(Ordering::SeqCst), 0);
        Ok(())
    }

    #[tokio::test]
    async fn test_fetch_once_after_stop_is_a_fresh_cycle() -> anyhow::Result<()> {
        let source = ScriptedSource::new(vec![Step::Ok(payload("401"), Duration::ZERO)]);
        let client = ScoreboardClient::with_source(source, DEFAULT_POLL_INTERVAL);

        client.stop();
        client.fetch_once().await?;
        assert_eq!(client.current_events()[0].id, "401");
        Ok(())
    }

    #[tokio::test]
    async fn test_start_polls_on_interval_until_stopped() {
        init_logs();
        let source = ScriptedSource::new(Vec::new());
        let client = ScoreboardClient::with_source(
            Arc::clone(&source) as Arc<dyn ScoreboardSource>,
            Duration::from_millis(25),
        );

        client.start();
        assert!(client.is_running());
        client.start(); // no-op while running

        tokio::time::sleep(Duration::from_millis(140)).await;
        client.stop();
        client.stop(); // idempotent

        let calls_at_stop = source.calls();
        assert!(
            calls_at_stop >= 3,
            "expected an immediate cycle plus ticks, got {calls_at_stop}"
        );
        assert!(!client.is_running());

        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(source.calls(), calls_at_stop, "no fetches after stop()");

        // The loop can be started again after a stop.
        client.start();
        tokio::time::sleep(Duration::from_millis(40)).await;
        assert!(client.is_running());
        assert!(source.calls() > calls_at_stop);
        client.stop();
    }

    #[tokio::test]
    async fn test_inert_client_never_fetches() -> anyhow::Result<()> {
        let client = ScoreboardClient::new("not a sport path");

        client.start();
        assert!(!client.is_running());

        client.fetch_once().await?;
        assert!(client.current_events().is_empty());
        assert!(client.last_updated().is_none());

        client.stop();
        Ok(())
    }

    #[tokio::test]
    async fn test_client_over_local_http_server() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/apis/site/v2/sports/basketball/nba/scoreboard")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(payload("401"))
            .create_async()
            .await;

        let client = ScoreboardClient::with_options(
            "basketball/nba",
            &server.url(),
            DEFAULT_POLL_INTERVAL,
            Duration::from_secs(2),
        );
        client.fetch_once().await?;

        mock.assert_async().await;
        assert_eq!(client.current_events()[0].id, "401");
        Ok(())
    }

    #[tokio::test]
    async fn test_client_reports_server_errors() -> anyhow::Result<()> {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/apis/site/v2/sports/basketball/nba/scoreboard")
            .with_status(500)
            .create_async()
            .await;

        let client = ScoreboardClient::with_options(
            "basketball/nba",
            &server.url(),
            DEFAULT_POLL_INTERVAL,
            Duration::from_secs(2),
        );

        let err = client.fetch_once().await.unwrap_err();
        assert!(matches!(err, FetchError::Status { .. }));
        assert!(client.current_events().is_empty());
        assert!(client.last_error().is_some());
        Ok(())
    }
}
