use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::Serialize;
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::{debug, warn};
use ulid::Ulid;

use crate::command::{self, Command, CommandError};
use crate::engine::{format_verdict, Engine, EngineError, Verdict, VerdictView, DEFAULT_TREND_WEEKS};
use crate::limits::MAX_LINE_LEN;
use crate::observability::{command_label, COMMANDS_TOTAL, COMMAND_DURATION_SECONDS};

const OUTBOUND_CAPACITY: usize = 256;

/// Why a command produced an error reply.
enum Failure {
    Engine(EngineError),
    Request(String),
}

impl From<EngineError> for Failure {
    fn from(e: EngineError) -> Self {
        Failure::Engine(e)
    }
}

impl From<serde_json::Error> for Failure {
    fn from(e: serde_json::Error) -> Self {
        Failure::Request(format!("encode error: {e}"))
    }
}

fn success(data: Value) -> String {
    json!({ "ok": true, "data": data }).to_string()
}

fn failure(f: &Failure) -> String {
    match f {
        Failure::Engine(EngineError::Rejected(verdict)) => json!({
            "ok": false,
            "code": "rejected",
            "error": format_verdict(verdict),
            "verdict": VerdictView::from(verdict),
        })
        .to_string(),
        Failure::Engine(e) => json!({ "ok": false, "code": e.code(), "error": e.to_string() }).to_string(),
        Failure::Request(msg) => json!({ "ok": false, "code": "bad_request", "error": msg }).to_string(),
    }
}

#[derive(Serialize)]
struct VerdictReply {
    #[serde(flatten)]
    view: VerdictView,
    message: String,
}

impl From<&Verdict> for VerdictReply {
    fn from(v: &Verdict) -> Self {
        Self {
            view: VerdictView::from(v),
            message: format_verdict(v),
        }
    }
}

async fn execute(engine: &Engine, cmd: Command) -> Result<Value, Failure> {
    let data = match cmd {
        Command::CreateActivity { activity } => {
            serde_json::to_value(engine.create_activity(activity).await?)?
        }
        Command::UpdateActivity { id, patch } => {
            serde_json::to_value(engine.update_activity(id, patch).await?)?
        }
        Command::DeleteActivity { id } => {
            engine.delete_activity(id).await?;
            json!({ "deleted": id })
        }
        Command::GetActivity { id } => serde_json::to_value(engine.get_activity(id).await?)?,
        Command::ListActivities { filter } => {
            serde_json::to_value(engine.list_activities(&filter).await?)?
        }
        Command::UpsertUser { user } => {
            let id = user.id;
            engine.upsert_user(user).await?;
            json!({ "user_id": id })
        }
        Command::Evaluate {
            user_id,
            activity_id,
        } => {
            let verdict = engine.evaluate_registration(user_id, activity_id).await?;
            serde_json::to_value(VerdictReply::from(&verdict))?
        }
        Command::Register {
            user_id,
            activity_id,
        } => {
            let (booking, verdict) = engine.register(user_id, activity_id).await?;
            json!({ "booking": booking, "verdict": VerdictReply::from(&verdict) })
        }
        Command::Match {
            user_id,
            activity_id,
        } => {
            let (booking, verdict) = engine.match_volunteer(user_id, activity_id).await?;
            json!({ "booking": booking, "verdict": VerdictReply::from(&verdict) })
        }
        Command::Cancel { booking_id } => {
            serde_json::to_value(engine.cancel_booking(booking_id).await?)?
        }
        Command::Available { user_id, today } => {
            let today = today.unwrap_or_else(|| engine.today());
            serde_json::to_value(engine.available_for_volunteer(user_id, today).await?)?
        }
        Command::Bookings {
            user_id: Some(user_id),
            kind,
            ..
        } => serde_json::to_value(engine.bookings_for_user(user_id, kind).await?)?,
        Command::Bookings {
            activity_id: Some(activity_id),
            kind,
            ..
        } => {
            let bookings: Vec<_> = engine
                .bookings_for_activity(activity_id)
                .await?
                .into_iter()
                .filter(|b| kind.is_none_or(|k| b.kind == k))
                .collect();
            serde_json::to_value(bookings)?
        }
        Command::Bookings { .. } => {
            return Err(Failure::Request(
                "bookings needs a user_id or an activity_id".into(),
            ));
        }
        Command::Quota { user_id, date } => {
            serde_json::to_value(engine.quota_status(user_id, date).await?)?
        }
        Command::Subscribe { activity_id } => {
            engine.get_activity(activity_id).await?;
            json!({ "subscribed": activity_id })
        }
        Command::Dashboard => serde_json::to_value(engine.dashboard_metrics().await?)?,
        Command::WeeklyTrends { weeks } => {
            let weeks = weeks.unwrap_or(DEFAULT_TREND_WEEKS);
            serde_json::to_value(engine.weekly_trends(weeks).await?)?
        }
        Command::Attendance { activity_id } => {
            serde_json::to_value(engine.activity_attendance(activity_id).await?)?
        }
        Command::ProgramBreakdown {
            start_date,
            end_date,
        } => {
            let range = match (start_date, end_date) {
                (Some(start), Some(end)) => Some((start, end)),
                (None, None) => None,
                _ => {
                    return Err(Failure::Request(
                        "program_breakdown needs both start_date and end_date, or neither".into(),
                    ));
                }
            };
            serde_json::to_value(engine.program_breakdown(range).await?)?
        }
        Command::RangeReport {
            start_date,
            end_date,
        } => serde_json::to_value(engine.range_report(start_date, end_date).await?)?,
    };
    Ok(data)
}

/// Forward change events for one activity onto the connection's outbound queue.
fn forward_events(
    mut events: broadcast::Receiver<crate::model::Event>,
    activity_id: Ulid,
    tx: mpsc::Sender<String>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(event) => {
                    let line = json!({ "event": event }).to_string();
                    if tx.send(line).await.is_err() {
                        break;
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("subscriber for {activity_id} lagged, {n} events dropped");
                }
                Err(broadcast::error::RecvError::Closed) => break,
            }
        }
    })
}

fn codec_to_io(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

/// Serve one client: newline-delimited JSON requests in, one JSON reply per
/// request out, with subscription events interleaved between replies.
pub async fn process_connection(socket: TcpStream, engine: Arc<Engine>) -> io::Result<()> {
    let framed = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    let (mut sink, mut lines) = framed.split();
    let (tx, mut rx) = mpsc::channel::<String>(OUTBOUND_CAPACITY);

    let writer = tokio::spawn(async move {
        while let Some(line) = rx.recv().await {
            sink.send(line).await?;
        }
        Ok::<_, LinesCodecError>(())
    });

    let mut subscriptions: Vec<JoinHandle<()>> = Vec::new();
    // Framed yields a single None after a decode error, then resumes reading.
    let mut resuming = false;
    let result = loop {
        let line = match lines.next().await {
            None if resuming => {
                resuming = false;
                continue;
            }
            None => break Ok(()),
            Some(Ok(line)) => line,
            Some(Err(LinesCodecError::MaxLineLengthExceeded)) => {
                resuming = true;
                let reply = failure(&Failure::Request(format!(
                    "request exceeds {MAX_LINE_LEN} bytes"
                )));
                if tx.send(reply).await.is_err() {
                    break Ok(());
                }
                continue;
            }
            Some(Err(LinesCodecError::Io(e))) => break Err(e),
        };

        let cmd = match command::parse(&line) {
            Ok(cmd) => cmd,
            Err(CommandError::Empty) => continue,
            Err(e) => {
                metrics::counter!(COMMANDS_TOTAL, "command" => "unknown", "status" => "error")
                    .increment(1);
                if tx.send(failure(&Failure::Request(e.to_string()))).await.is_err() {
                    break Ok(());
                }
                continue;
            }
        };

        let label = command_label(&cmd);
        let subscribe_to = match &cmd {
            Command::Subscribe { activity_id } => Some(*activity_id),
            _ => None,
        };
        debug!("command: {label}");

        let start = Instant::now();
        let outcome = execute(&engine, cmd).await;
        metrics::histogram!(COMMAND_DURATION_SECONDS, "command" => label)
            .record(start.elapsed().as_secs_f64());
        let ok = outcome.is_ok();
        let status = if ok { "ok" } else { "error" };
        metrics::counter!(COMMANDS_TOTAL, "command" => label, "status" => status).increment(1);

        // Subscribe before acknowledging so no event after the ack is missed.
        let events = match subscribe_to {
            Some(activity_id) if ok => Some((activity_id, engine.notify.subscribe(activity_id))),
            _ => None,
        };

        let reply = match outcome {
            Ok(data) => success(data),
            Err(f) => failure(&f),
        };
        if tx.send(reply).await.is_err() {
            break Ok(());
        }

        if let Some((activity_id, events)) = events {
            subscriptions.push(forward_events(events, activity_id, tx.clone()));
        }
    };

    for handle in &subscriptions {
        handle.abort();
    }
    drop(tx);
    match writer.await {
        Ok(Ok(())) => {}
        Ok(Err(e)) => return Err(codec_to_io(e)),
        Err(e) if e.is_cancelled() => {}
        Err(e) => return Err(io::Error::other(e)),
    }
    result
}
