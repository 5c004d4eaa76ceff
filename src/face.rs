use axum::Router;
use axum::extract::State;
use axum::response::Html;
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::routing::get;
use serde::Serialize;
use std::convert::Infallible;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::sync::broadcast;
use tokio_stream::StreamExt;
use tokio_stream::wrappers::BroadcastStream;
use tracing::{debug, info, warn};

/// Progress of a run, streamed to the monitor page as Server-Sent Events.
#[derive(Clone, Debug, Serialize)]
#[serde(rename_all = "snake_case", tag = "event")]
pub enum SessionEvent {
    StepStarted {
        step: usize,
        url: String,
    },
    PlanReady {
        step: usize,
        actions: usize,
        from_playbook: bool,
    },
    ActionExecuted {
        field: String,
        kind: String,
    },
    ActionSkipped {
        field: String,
        reason: String,
    },
    Finished {
        status: String,
        steps: usize,
        last_url: Option<String>,
        reason: Option<String>,
    },
}

impl SessionEvent {
    fn name(&self) -> &'static str {
        match self {
            SessionEvent::StepStarted { .. } => "step_started",
            SessionEvent::PlanReady { .. } => "plan_ready",
            SessionEvent::ActionExecuted { .. } => "action_executed",
            SessionEvent::ActionSkipped { .. } => "action_skipped",
            SessionEvent::Finished { .. } => "finished",
        }
    }

    fn to_sse_event(&self) -> Event {
        let data = serde_json::to_string(self).unwrap_or_else(|_| "{}".to_string());
        Event::default().event(self.name()).data(data)
    }
}

struct MonitorState {
    events: broadcast::Sender<SessionEvent>,
}

/// Serve the monitor on 127.0.0.1, trying `port` and the nine after it.
pub async fn start_server(
    port: u16,
    events: broadcast::Sender<SessionEvent>,
) -> anyhow::Result<SocketAddr> {
    let state = Arc::new(MonitorState { events });

    let app = Router::new()
        .route("/", get(index_handler))
        .route("/events", get(sse_handler))
        .route(
            "/favicon.ico",
            get(|| async { axum::http::StatusCode::NO_CONTENT }),
        )
        .with_state(state);

    let mut listener = None;
    for p in port..port.saturating_add(10) {
        match tokio::net::TcpListener::bind(("127.0.0.1", p)).await {
            Ok(l) => {
                listener = Some(l);
                break;
            }
            Err(e) => debug!(port = p, error = %e, "monitor port busy"),
        }
    }
    let listener = listener.ok_or_else(|| {
        anyhow::anyhow!("could not bind any monitor port in {}..{}", port, port.saturating_add(10))
    })?;
    let addr = listener.local_addr()?;
    info!("run monitor at http://{}", addr);

    tokio::spawn(async move {
        if let Err(e) = axum::serve(listener, app).await {
            warn!(error = %e, "run monitor stopped");
        }
    });

    Ok(addr)
}

async fn index_handler() -> Html<&'static str> {
    Html(INDEX_HTML)
}

async fn sse_handler(
    State(state): State<Arc<MonitorState>>,
) -> Sse<impl tokio_stream::Stream<Item = Result<Event, Infallible>>> {
    let rx = state.events.subscribe();
    let stream =
        BroadcastStream::new(rx).filter_map(|result: Result<SessionEvent, _>| match result {
            Ok(event) => Some(Ok::<_, Infallible>(event.to_sse_event())),
            Err(_) => None,
        });
    Sse::new(stream).keep_alive(KeepAlive::default())
}

const INDEX_HTML: &str = r##"<!DOCTYPE html>
<html lang="en">
<head>
<meta charset="UTF-8">
<title>apply-pilot</title>
<style>
  body { font-family: system-ui, sans-serif; background: #111; color: #ddd; margin: 2rem; }
  .entry { padding: .35rem .6rem; border-left: 3px solid #444; margin: .25rem 0; }
  .step { border-color: #4a8; } .plan { border-color: #48c; }
  .skip { border-color: #aa4; color: #aaa; } .done { border-color: #4c4; font-weight: bold; }
  .failed { border-color: #c44; font-weight: bold; }
</style>
</head>
<body>
<h1>apply-pilot</h1>
<div id="log"></div>
<script>
  const log = document.getElementById('log');
  function add(cls, text) {
    const el = document.createElement('div');
    el.className = 'entry ' + cls;
    el.textContent = text;
    log.appendChild(el);
  }
  const es = new EventSource('/events');
  es.addEventListener('step_started', e => {
    const d = JSON.parse(e.data);
    add('step', 'Step ' + d.step + ' at ' + d.url);
  });
  es.addEventListener('plan_ready', e => {
    const d = JSON.parse(e.data);
    add('plan', d.actions + ' action(s) ' + (d.from_playbook ? 'from playbook' : 'from planner'));
  });
  es.addEventListener('action_executed', e => {
    const d = JSON.parse(e.data);
    add('', d.kind + ': ' + d.field);
  });
  es.addEventListener('action_skipped', e => {
    const d = JSON.parse(e.data);
    add('skip', 'skipped ' + d.field + ' (' + d.reason + ')');
  });
  es.addEventListener('finished', e => {
    const d = JSON.parse(e.data);
    add(d.status === 'failed' ? 'failed' : 'done',
        'Finished: ' + d.status + ' after ' + d.steps + ' step(s)' + (d.reason ? ' (' + d.reason + ')' : ''));
  });
</script>
</body>
</html>
"##;
