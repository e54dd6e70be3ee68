use std::io;
use std::sync::Arc;
use std::time::Instant;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::net::TcpStream;
use tokio_util::codec::{Framed, LinesCodec, LinesCodecError};
use tracing::debug;

use crate::archive::Archive;
use crate::auth::PasswordAuth;
use crate::engine::{CellStore, Engine, EngineError};
use crate::limits::MAX_LINE_LEN;
use crate::model::*;
use crate::observability;

/// One request line. `action` selects the variant.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum Request {
    Auth {
        password: String,
    },
    Create {
        table: TableId,
        booking: NewBooking,
        actor: Actor,
    },
    WalkIn {
        table: TableId,
        party_size: u32,
        #[serde(default)]
        note: String,
        actor: Actor,
    },
    CheckIn {
        booking_id: BookingId,
        actor: Actor,
    },
    Close {
        booking_id: BookingId,
        #[serde(default)]
        confirm: bool,
        actor: Actor,
    },
    Cancel {
        booking_id: BookingId,
        #[serde(default)]
        reason: String,
        actor: Actor,
    },
    Merge {
        source: TableId,
        target: TableId,
        booking_id: BookingId,
        actor: Actor,
    },
    Split {
        table: TableId,
        booking_id: BookingId,
        actor: Actor,
    },
    Lock {
        table: TableId,
        actor: Actor,
    },
    Unlock {
        table: TableId,
        actor: Actor,
    },
    Cell {
        table: TableId,
    },
    Booking {
        booking_id: BookingId,
    },
    Floor,
    Summary,
    Search {
        query: String,
    },
    Locks,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub kind: String,
    pub message: String,
}

/// One reply line: `{"ok":true,"data":…}` or `{"ok":false,"error":{…}}`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reply {
    pub ok: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<ErrorBody>,
}

impl Reply {
    pub fn data<T: Serialize>(value: &T) -> Self {
        match serde_json::to_value(value) {
            Ok(data) => Self {
                ok: true,
                data: Some(data),
                error: None,
            },
            Err(e) => Self::error("Internal", e.to_string()),
        }
    }

    pub fn error(kind: &str, message: impl Into<String>) -> Self {
        Self {
            ok: false,
            data: None,
            error: Some(ErrorBody {
                kind: kind.to_string(),
                message: message.into(),
            }),
        }
    }

    fn from_engine(e: &EngineError) -> Self {
        Self::error(e.kind(), e.to_string())
    }
}

#[derive(Debug, Serialize)]
struct LockView {
    table: TableId,
    locked_by: String,
    locked_at: Ms,
}

/// Run one authenticated request against the engine.
pub async fn dispatch<S: CellStore, A: Archive>(engine: &Engine<S, A>, req: Request) -> Result<Reply, EngineError> {
    let reply = match req {
        Request::Auth { .. } => Reply::data(&json!({ "authenticated": true })),
        Request::Create { table, booking, actor } => {
            Reply::data(&engine.create(&table, booking, &actor).await?)
        }
        Request::WalkIn {
            table,
            party_size,
            note,
            actor,
        } => Reply::data(&engine.walk_in(&table, party_size, note, &actor).await?),
        Request::CheckIn { booking_id, actor } => {
            Reply::data(&engine.check_in(booking_id, &actor).await?)
        }
        Request::Close {
            booking_id,
            confirm,
            actor,
        } => Reply::data(&engine.close(booking_id, confirm, &actor).await?),
        Request::Cancel {
            booking_id,
            reason,
            actor,
        } => Reply::data(&engine.cancel(booking_id, &reason, &actor).await?),
        Request::Merge {
            source,
            target,
            booking_id,
            actor,
        } => Reply::data(&engine.merge(&source, &target, booking_id, &actor).await?),
        Request::Split {
            table,
            booking_id,
            actor,
        } => Reply::data(&engine.split(&table, booking_id, &actor).await?),
        Request::Lock { table, actor } => {
            let changed = engine.lock_table(&table, &actor).await?;
            Reply::data(&json!({ "changed": changed }))
        }
        Request::Unlock { table, actor } => {
            let changed = engine.unlock_table(&table, &actor).await?;
            Reply::data(&json!({ "changed": changed }))
        }
        Request::Cell { table } => Reply::data(&engine.cell(&table).await?),
        Request::Booking { booking_id } => Reply::data(&engine.booking(booking_id).await?),
        Request::Floor => Reply::data(&engine.floor().await),
        Request::Summary => Reply::data(&engine.summary().await),
        Request::Search { query } => Reply::data(&engine.search(&query).await),
        Request::Locks => {
            let locks: Vec<LockView> = engine
                .locked_tables()
                .await
                .into_iter()
                .map(|(table, info)| LockView {
                    table,
                    locked_by: info.locked_by,
                    locked_at: info.locked_at,
                })
                .collect();
            Reply::data(&locks)
        }
    };
    Ok(reply)
}

type Lines = Framed<TcpStream, LinesCodec>;

fn codec_err(e: LinesCodecError) -> io::Error {
    match e {
        LinesCodecError::Io(e) => e,
        LinesCodecError::MaxLineLengthExceeded => {
            io::Error::new(io::ErrorKind::InvalidData, "line too long")
        }
    }
}

async fn send(lines: &mut Lines, reply: &Reply) -> io::Result<()> {
    let line = serde_json::to_string(reply)?;
    lines.send(line).await.map_err(codec_err)
}

/// First line must authenticate. Returns false (after replying) otherwise.
async fn handshake(lines: &mut Lines, auth: &PasswordAuth) -> io::Result<bool> {
    let Some(first) = lines.next().await else {
        return Ok(false);
    };
    let first = first.map_err(codec_err)?;
    match serde_json::from_str::<Request>(&first) {
        Ok(Request::Auth { password }) if auth.verify(&password) => {
            send(lines, &Reply::data(&json!({ "authenticated": true }))).await?;
            Ok(true)
        }
        _ => {
            metrics::counter!(observability::AUTH_FAILURES_TOTAL).increment(1);
            send(lines, &Reply::error("AuthFailed", "authentication required")).await?;
            Ok(false)
        }
    }
}

/// Serve one client: handshake, then one reply per request line until EOF.
pub async fn process_connection<S, A>(
    socket: TcpStream,
    engine: Arc<Engine<S, A>>,
    auth: Arc<PasswordAuth>,
) -> io::Result<()>
where
    S: CellStore,
    A: Archive,
{
    let mut lines = Framed::new(socket, LinesCodec::new_with_max_length(MAX_LINE_LEN));
    if !handshake(&mut lines, &auth).await? {
        return Ok(());
    }

    while let Some(line) = lines.next().await {
        let line = match line {
            Ok(line) => line,
            Err(LinesCodecError::MaxLineLengthExceeded) => {
                send(&mut lines, &Reply::error("LimitExceeded", "line too long")).await?;
                continue;
            }
            Err(LinesCodecError::Io(e)) => return Err(e),
        };
        if line.trim().is_empty() {
            continue;
        }

        let req = match serde_json::from_str::<Request>(&line) {
            Ok(req) => req,
            Err(e) => {
                debug!("malformed request: {e}");
                send(&mut lines, &Reply::error("BadRequest", e.to_string())).await?;
                continue;
            }
        };

        let label = observability::action_label(&req);
        let start = Instant::now();
        let reply = match dispatch(&engine, req).await {
            Ok(reply) => {
                metrics::counter!(observability::ACTIONS_TOTAL, "action" => label, "status" => "ok")
                    .increment(1);
                reply
            }
            Err(e) => {
                debug!("{label} rejected: {e}");
                metrics::counter!(observability::ACTIONS_TOTAL, "action" => label, "status" => "error")
                    .increment(1);
                metrics::counter!(observability::ACTION_ERRORS_TOTAL, "action" => label, "kind" => e.kind())
                    .increment(1);
                Reply::from_engine(&e)
            }
        };
        metrics::histogram!(observability::ACTION_DURATION_SECONDS, "action" => label)
            .record(start.elapsed().as_secs_f64());
        send(&mut lines, &reply).await?;
    }
    Ok(())
}
