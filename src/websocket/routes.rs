use std::time::{Duration, Instant};

use actix::prelude::*;
use actix_identity::Identity;
use actix_web::web::{Data, Path, Query};
use actix_web::{get, web, HttpRequest};
use actix_web_actors::ws;

use crate::auth::{self, AccessToken};
use crate::errors::ServiceError;
use crate::queue::QueueSession;
use crate::server::{Response, State};
use crate::websocket::server;

const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// a watcher that stays silent this long is dropped
const CLIENT_TIMEOUT: Duration = Duration::from_secs(10);

/// Browsers can't set headers on a websocket handshake, they send the token as a query parameter
#[derive(Debug, Deserialize)]
pub struct LiveQuery {
    token: Option<String>,
}

/// live updates of a queue session
#[get("/queue-sessions/{session_id}/live")]
async fn live(
    req: HttpRequest,
    stream: web::Payload,
    session_id: Path<i64>,
    query: Query<LiveQuery>,
    id: Identity,
    state: Data<State>,
) -> Response {
    let user = match (id.identity(), &query.token) {
        (Some(_), _) => auth::get_user(&id, &state.db).await?,
        (None, Some(token)) => AccessToken::find_user(token, &state.db).await?,
        (None, None) => return Err(ServiceError::Unauthorized),
    };
    let session = QueueSession::find(*session_id, &state.db).await?;

    debug!("user {} is watching queue session {}", user.id, session.id);

    ws::start(
        QueueWatcher {
            id: 0,
            hb: Instant::now(),
            session_id: session.id,
            notifier: state.notifier.clone(),
        },
        &req,
        stream,
    )
    .map_err(|err| ServiceError::BadRequest(err.to_string()))
}

struct QueueWatcher {
    /// filled in by the notifier once connected
    id: usize,
    /// last ping or pong seen from the client
    hb: Instant,
    session_id: i64,
    notifier: Addr<server::QueueNotifier>,
}

impl Actor for QueueWatcher {
    type Context = ws::WebsocketContext<Self>;

    fn started(&mut self, ctx: &mut Self::Context) {
        self.hb(ctx);

        // no other events are processed until the notifier knows about us
        let addr = ctx.address();
        self.notifier
            .send(server::Connect {
                addr: addr.recipient(),
                session_id: self.session_id,
            })
            .into_actor(self)
            .then(|res, act, ctx| {
                match res {
                    Ok(res) => act.id = res,
                    Err(e) => {
                        error!("unable to start websocket connection: {}", e);
                        ctx.stop();
                    }
                }
                fut::ready(())
            })
            .wait(ctx);
    }

    fn stopping(&mut self, _: &mut Self::Context) -> Running {
        self.notifier.do_send(server::Disconnect { id: self.id });
        Running::Stop
    }
}

/// Forward queue updates to the client
impl Handler<server::QueueUpdate> for QueueWatcher {
    type Result = ();

    fn handle(&mut self, update: server::QueueUpdate, ctx: &mut Self::Context) {
        match serde_json::to_string(&update) {
            Ok(json) => ctx.text(json),
            Err(error) => error!(
                "unable to serialize websocket message: {:?}, error: {}",
                update, error
            ),
        }
    }
}

impl StreamHandler<Result<ws::Message, ws::ProtocolError>> for QueueWatcher {
    fn handle(&mut self, msg: Result<ws::Message, ws::ProtocolError>, ctx: &mut Self::Context) {
        let msg = match msg {
            Err(error) => {
                warn!("queue watcher of session {} sent garbage: {}", self.session_id, error);
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Protocol)));
                ctx.stop();
                return;
            }
            Ok(msg) => msg,
        };

        trace!("queue watcher {} sent {:?}", self.id, msg);
        match msg {
            ws::Message::Ping(msg) => {
                self.hb = Instant::now();
                ctx.pong(&msg);
            }
            ws::Message::Pong(_) => {
                self.hb = Instant::now();
            }
            ws::Message::Text(_) | ws::Message::Binary(_) => {
                debug!("queue watchers only listen, closing the connection");
                ctx.close(Some(ws::CloseReason::from(ws::CloseCode::Unsupported)));
                ctx.stop();
            }
            ws::Message::Close(reason) => {
                ctx.close(reason);
                ctx.stop();
            }
            ws::Message::Continuation(_) => {
                ctx.stop();
            }
            ws::Message::Nop => (),
        }
    }
}

impl QueueWatcher {
    /// ping the client every HEARTBEAT_INTERVAL and drop it when it stops answering
    fn hb(&self, ctx: &mut ws::WebsocketContext<Self>) {
        ctx.run_interval(HEARTBEAT_INTERVAL, |act, ctx| {
            if Instant::now().duration_since(act.hb) > CLIENT_TIMEOUT {
                warn!(
                    "websocket client of queue session {} timed out, disconnecting",
                    act.session_id
                );

                act.notifier.do_send(server::Disconnect { id: act.id });
                ctx.stop();

                return;
            }

            ctx.ping(b"");
        });
    }
}

pub fn register(cfg: &mut web::ServiceConfig) {
    cfg.service(live);
}

