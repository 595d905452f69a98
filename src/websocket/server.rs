use std::collections::{HashMap, HashSet};

use actix::prelude::*;
use rand::{self, rngs::ThreadRng, Rng};

/// Pushed to every client watching a queue session
#[derive(Message, Debug, Serialize, Clone, PartialEq)]
#[rtype(result = "()")]
pub struct QueueUpdate {
    #[serde(rename = "type")]
    pub kind: &'static str,
    pub session_id: i64,
    pub reason: &'static str,
}

impl QueueUpdate {
    pub fn new(session_id: i64, reason: &'static str) -> Self {
        QueueUpdate {
            kind: "queue_updated",
            session_id,
            reason,
        }
    }
}

#[derive(Message)]
#[rtype(usize)]
pub struct Connect {
    pub addr: Recipient<QueueUpdate>,
    pub session_id: i64,
}

#[derive(Message)]
#[rtype(result = "()")]
pub struct Disconnect {
    pub id: usize,
}

/// Number of open websocket connections
#[derive(Message)]
#[rtype(usize)]
pub struct ConnectionCount;

type ConnectionId = usize;
type QueueSessionId = i64;

/// `QueueNotifier` keeps track of who is watching which queue session
pub struct QueueNotifier {
    connections: HashMap<ConnectionId, Recipient<QueueUpdate>>,
    watchers: HashMap<QueueSessionId, HashSet<ConnectionId>>,
    rng: ThreadRng,
}

impl Default for QueueNotifier {
    fn default() -> QueueNotifier {
        QueueNotifier {
            connections: HashMap::new(),
            watchers: HashMap::new(),
            rng: rand::thread_rng(),
        }
    }
}

impl QueueNotifier {
    fn notify_watchers(&self, update: QueueUpdate) {
        if let Some(watchers) = self.watchers.get(&update.session_id) {
            for id in watchers {
                if let Some(addr) = self.connections.get(id) {
                    let _ = addr.do_send(update.clone());
                }
            }
        }
    }
}

impl Actor for QueueNotifier {
    type Context = Context<Self>;
}

/// Register a connection under a random id
impl Handler<Connect> for QueueNotifier {
    type Result = usize;

    fn handle(&mut self, msg: Connect, _: &mut Context<Self>) -> Self::Result {
        let id = self.rng.gen::<usize>();
        self.connections.insert(id, msg.addr);

        self.watchers
            .entry(msg.session_id)
            .or_insert_with(HashSet::new)
            .insert(id);

        id
    }
}

impl Handler<Disconnect> for QueueNotifier {
    type Result = ();

    fn handle(&mut self, msg: Disconnect, _: &mut Context<Self>) {
        if self.connections.remove(&msg.id).is_some() {
            for watchers in self.watchers.values_mut() {
                watchers.remove(&msg.id);
            }
            self.watchers.retain(|_, watchers| !watchers.is_empty());
        }
    }
}

impl Handler<QueueUpdate> for QueueNotifier {
    type Result = ();

    fn handle(&mut self, update: QueueUpdate, _: &mut Context<Self>) {
        self.notify_watchers(update);
    }
}

impl Handler<ConnectionCount> for QueueNotifier {
    type Result = usize;

    fn handle(&mut self, _: ConnectionCount, _: &mut Context<Self>) -> Self::Result {
        self.connections.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// collects everything it receives
    #[derive(Default)]
    struct Listener {
        received: Vec<QueueUpdate>,
    }

    impl Actor for Listener {
        type Context = Context<Self>;
    }

    impl Handler<QueueUpdate> for Listener {
        type Result = ();

        fn handle(&mut self, update: QueueUpdate, _: &mut Context<Self>) {
            self.received.push(update);
        }
    }

    #[derive(Message)]
    #[rtype(result = "Vec<QueueUpdate>")]
    struct Received;

    impl Handler<Received> for Listener {
        type Result = MessageResult<Received>;

        fn handle(&mut self, _: Received, _: &mut Context<Self>) -> Self::Result {
            MessageResult(self.received.clone())
        }
    }

    #[test]
    fn serializes_as_typed_message() {
        let json = serde_json::to_value(QueueUpdate::new(4, "match_started")).unwrap();

        assert_eq!(
            json,
            serde_json::json!({
                "type": "queue_updated",
                "session_id": 4,
                "reason": "match_started",
            })
        );
    }

    #[actix_rt::test]
    async fn only_watchers_of_the_session_are_notified() {
        let notifier = QueueNotifier::default().start();
        let watcher = Listener::default().start();
        let bystander = Listener::default().start();

        let id = notifier
            .send(Connect {
                addr: watcher.clone().recipient(),
                session_id: 1,
            })
            .await
            .unwrap();
        notifier
            .send(Connect {
                addr: bystander.clone().recipient(),
                session_id: 2,
            })
            .await
            .unwrap();
        assert_eq!(notifier.send(ConnectionCount).await.unwrap(), 2);

        notifier.send(QueueUpdate::new(1, "entry_joined")).await.unwrap();

        assert_eq!(
            watcher.send(Received).await.unwrap(),
            vec![QueueUpdate::new(1, "entry_joined")]
        );
        assert!(bystander.send(Received).await.unwrap().is_empty());

        notifier.send(Disconnect { id }).await.unwrap();
        assert_eq!(notifier.send(ConnectionCount).await.unwrap(), 1);
    }
}
