//! Redis Streams-backed broker (durable, at-least-once delivery).
//!
//! Maps the declared topology onto streams: each queue is one stream
//! (`postbox:queue:<name>`) with a consumer group, and exchange bindings are
//! resolved at publish time. Messages persist until XACK'd; entries left
//! pending by a crashed consumer are reclaimed after an idle timeout.
//!
//! The `redis` crate's connection API is blocking, so every command runs on
//! the blocking thread pool.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use tracing::warn;

use postbox_events::{
    Broker, BrokerConsumer, BrokerError, BrokerResult, Delivery, Message, Topology,
    HEADER_DEATH_REASON,
};

const GROUP: &str = "postbox";
const STREAM_PREFIX: &str = "postbox:queue:";
const BLOCK_MS: u64 = 1_000;

/// Pending entries idle longer than this are reclaimed (crash redelivery).
const PENDING_IDLE_MS: u64 = 60_000;

fn stream_key(queue: &str) -> String {
    format!("{STREAM_PREFIX}{queue}")
}

#[derive(Debug, Default, Clone)]
struct Routing {
    /// exchange -> [(routing_key, queue)]
    bindings: HashMap<String, Vec<(String, String)>>,
    /// queue -> (dead letter exchange, dead letter routing key)
    dead_letters: HashMap<String, (String, String)>,
}

/// Broker adapter over Redis Streams.
#[derive(Clone)]
pub struct RedisBroker {
    client: Arc<redis::Client>,
    routing: Arc<Mutex<Routing>>,
}

impl RedisBroker {
    pub fn new(redis_url: impl AsRef<str>) -> BrokerResult<Self> {
        let client = redis::Client::open(redis_url.as_ref())
            .map_err(|e| BrokerError::Connection(e.to_string()))?;

        Ok(Self {
            client: Arc::new(client),
            routing: Arc::new(Mutex::new(Routing::default())),
        })
    }

    /// Round-trip a PING (health checks).
    pub async fn ping(&self) -> BrokerResult<()> {
        self.run_blocking(|conn| {
            let _: String = redis::cmd("PING")
                .query(conn)
                .map_err(|e| BrokerError::Command(format!("PING failed: {e}")))?;
            Ok(())
        })
        .await
    }

    fn queues_for(&self, exchange: &str, routing_key: &str) -> BrokerResult<Vec<String>> {
        let routing = self.routing.lock().unwrap();
        let bindings = routing
            .bindings
            .get(exchange)
            .ok_or_else(|| BrokerError::UnknownExchange(exchange.to_string()))?;

        Ok(bindings
            .iter()
            .filter(|(key, _)| key == routing_key)
            .map(|(_, queue)| queue.clone())
            .collect())
    }

    async fn run_blocking<T, F>(&self, op: F) -> BrokerResult<T>
    where
        T: Send + 'static,
        F: FnOnce(&mut redis::Connection) -> BrokerResult<T> + Send + 'static,
    {
        let client = self.client.clone();
        tokio::task::spawn_blocking(move || {
            let mut conn = client
                .get_connection()
                .map_err(|e| BrokerError::Connection(e.to_string()))?;
            op(&mut conn)
        })
        .await
        .map_err(|e| BrokerError::Command(format!("blocking task failed: {e}")))?
    }
}

fn xadd(conn: &mut redis::Connection, stream: &str, message: &Message, delivery: u32) -> BrokerResult<()> {
    let headers = serde_json::to_string(&message.headers)
        .map_err(|e| BrokerError::Command(format!("encode headers: {e}")))?;

    let _: String = redis::cmd("XADD")
        .arg(stream)
        .arg("*")
        .arg("message_id")
        .arg(&message.message_id)
        .arg("routing_key")
        .arg(&message.routing_key)
        .arg("content_type")
        .arg(&message.content_type)
        .arg("headers")
        .arg(&headers)
        .arg("delivery")
        .arg(delivery.to_string())
        .arg("body")
        .arg(&message.body[..])
        .query(conn)
        .map_err(|e| BrokerError::Command(format!("XADD failed: {e}")))?;

    Ok(())
}

fn xack(conn: &mut redis::Connection, stream: &str, id: &str) -> BrokerResult<()> {
    let _: u64 = redis::cmd("XACK")
        .arg(stream)
        .arg(GROUP)
        .arg(id)
        .query(conn)
        .map_err(|e| BrokerError::Command(format!("XACK failed: {e}")))?;

    Ok(())
}

#[async_trait]
impl Broker for RedisBroker {
    type Consumer = RedisConsumer;

    async fn declare_topology(&self, topology: &Topology) -> BrokerResult<()> {
        {
            let mut routing = self.routing.lock().unwrap();
            for exchange in &topology.exchanges {
                routing.bindings.entry(exchange.name.clone()).or_default();
            }
            for queue in &topology.queues {
                let bindings = routing
                    .bindings
                    .get_mut(&queue.exchange)
                    .ok_or_else(|| BrokerError::UnknownExchange(queue.exchange.clone()))?;
                let binding = (queue.routing_key.clone(), queue.name.clone());
                if !bindings.contains(&binding) {
                    bindings.push(binding);
                }

                if let Some(dl) = &queue.dead_letter {
                    routing
                        .dead_letters
                        .insert(queue.name.clone(), (dl.exchange.clone(), dl.routing_key.clone()));
                }
            }
        }

        let queues: Vec<String> = topology.queues.iter().map(|q| q.name.clone()).collect();
        self.run_blocking(move |conn| {
            for queue in queues {
                // MKSTREAM creates the stream; an existing group is fine.
                let _: Result<String, _> = redis::cmd("XGROUP")
                    .arg("CREATE")
                    .arg(stream_key(&queue))
                    .arg(GROUP)
                    .arg("0")
                    .arg("MKSTREAM")
                    .query(conn);
            }
            Ok(())
        })
        .await
    }

    async fn publish(&self, exchange: &str, message: Message) -> BrokerResult<()> {
        let queues = self.queues_for(exchange, &message.routing_key)?;

        self.run_blocking(move |conn| {
            for queue in &queues {
                xadd(conn, &stream_key(queue), &message, 1)?;
            }
            Ok(())
        })
        .await
    }

    async fn subscribe(&self, queue: &str, prefetch: u16) -> BrokerResult<RedisConsumer> {
        let dead_letter = self.routing.lock().unwrap().dead_letters.get(queue).cloned();

        Ok(RedisConsumer {
            broker: self.clone(),
            queue: queue.to_string(),
            stream: stream_key(queue),
            consumer_name: format!("consumer-{}", uuid::Uuid::now_v7()),
            prefetch: prefetch.max(1),
            dead_letter,
            buffer: VecDeque::new(),
        })
    }
}

/// Consumer over one queue stream.
pub struct RedisConsumer {
    broker: RedisBroker,
    queue: String,
    stream: String,
    consumer_name: String,
    prefetch: u16,
    dead_letter: Option<(String, String)>,
    buffer: VecDeque<Delivery>,
}

impl RedisConsumer {
    async fn fetch(&mut self) -> BrokerResult<Vec<Delivery>> {
        let stream = self.stream.clone();
        let consumer = self.consumer_name.clone();
        let count = usize::from(self.prefetch);

        self.broker
            .run_blocking(move |conn| {
                // Reclaim entries a crashed consumer left pending.
                let reclaimed = claim_stale_pending(conn, &stream, &consumer, count)?;
                if !reclaimed.is_empty() {
                    return Ok(reclaimed);
                }

                read_new(conn, &stream, &consumer, count)
            })
            .await
    }
}

#[async_trait]
impl BrokerConsumer for RedisConsumer {
    async fn next(&mut self) -> BrokerResult<Option<Delivery>> {
        loop {
            if let Some(delivery) = self.buffer.pop_front() {
                return Ok(Some(delivery));
            }

            let fetched = self.fetch().await?;
            self.buffer.extend(fetched);
        }
    }

    async fn ack(&mut self, delivery: Delivery) -> BrokerResult<()> {
        let stream = self.stream.clone();
        self.broker
            .run_blocking(move |conn| xack(conn, &stream, &delivery.tag))
            .await
    }

    async fn requeue(&mut self, delivery: Delivery) -> BrokerResult<()> {
        let stream = self.stream.clone();
        self.broker
            .run_blocking(move |conn| {
                xack(conn, &stream, &delivery.tag)?;
                xadd(conn, &stream, &delivery.message, delivery.delivery_count + 1)
            })
            .await
    }

    async fn reject(&mut self, delivery: Delivery, reason: &str) -> BrokerResult<()> {
        let stream = self.stream.clone();
        let reason = reason.to_string();

        let Some((dl_exchange, dl_routing_key)) = self.dead_letter.clone() else {
            warn!(queue = %self.queue, "reject without DLX binding, discarding");
            return self
                .broker
                .run_blocking(move |conn| xack(conn, &stream, &delivery.tag))
                .await;
        };

        let dlq_queues = self.broker.queues_for(&dl_exchange, &dl_routing_key)?;

        self.broker
            .run_blocking(move |conn| {
                xack(conn, &stream, &delivery.tag)?;

                let mut message = delivery.message;
                message.routing_key = dl_routing_key;
                message
                    .headers
                    .insert(HEADER_DEATH_REASON.to_string(), reason);

                for queue in &dlq_queues {
                    xadd(conn, &stream_key(queue), &message, 1)?;
                }
                Ok(())
            })
            .await
    }
}

fn read_new(
    conn: &mut redis::Connection,
    stream: &str,
    consumer: &str,
    count: usize,
) -> BrokerResult<Vec<Delivery>> {
    let result: redis::RedisResult<redis::Value> = redis::cmd("XREADGROUP")
        .arg("GROUP")
        .arg(GROUP)
        .arg(consumer)
        .arg("COUNT")
        .arg(count.to_string())
        .arg("BLOCK")
        .arg(BLOCK_MS.to_string())
        .arg("STREAMS")
        .arg(stream)
        .arg(">")
        .query(conn);

    match result {
        // Nil on blocking timeout: no new entries.
        Ok(redis::Value::Nil) => Ok(Vec::new()),
        Ok(value) => parse_read_reply(value),
        Err(e) => Err(BrokerError::Command(format!("XREADGROUP failed: {e}"))),
    }
}

fn claim_stale_pending(
    conn: &mut redis::Connection,
    stream: &str,
    consumer: &str,
    count: usize,
) -> BrokerResult<Vec<Delivery>> {
    let pending: redis::RedisResult<Vec<(String, String, u64, u64)>> = redis::cmd("XPENDING")
        .arg(stream)
        .arg(GROUP)
        .arg("-")
        .arg("+")
        .arg(count.to_string())
        .query(conn);

    let stale_ids: Vec<String> = match pending {
        Ok(entries) => entries
            .into_iter()
            .filter(|(_, _, idle_ms, _)| *idle_ms >= PENDING_IDLE_MS)
            .map(|(id, _, _, _)| id)
            .collect(),
        Err(_) => return Ok(Vec::new()),
    };

    if stale_ids.is_empty() {
        return Ok(Vec::new());
    }

    let claimed: redis::RedisResult<redis::Value> = redis::cmd("XCLAIM")
        .arg(stream)
        .arg(GROUP)
        .arg(consumer)
        .arg(PENDING_IDLE_MS.to_string())
        .arg(&stale_ids[..])
        .query(conn);

    match claimed {
        Ok(value) => parse_entries(value),
        Err(_) => Ok(Vec::new()),
    }
}

/// XREADGROUP reply: `[[stream, [entry, ...]], ...]`.
fn parse_read_reply(value: redis::Value) -> BrokerResult<Vec<Delivery>> {
    let streams = match value {
        redis::Value::Bulk(streams) => streams,
        _ => return Err(invalid("unexpected XREADGROUP reply shape")),
    };

    let mut deliveries = Vec::new();
    for stream in streams {
        let parts = match stream {
            redis::Value::Bulk(parts) => parts,
            _ => continue,
        };
        if let Some(entries) = parts.into_iter().nth(1) {
            deliveries.extend(parse_entries(entries)?);
        }
    }

    Ok(deliveries)
}

/// Entry list: `[[id, [field, value, ...]], ...]`.
fn parse_entries(value: redis::Value) -> BrokerResult<Vec<Delivery>> {
    let entries = match value {
        redis::Value::Bulk(entries) => entries,
        redis::Value::Nil => return Ok(Vec::new()),
        _ => return Err(invalid("unexpected entry list shape")),
    };

    let mut deliveries = Vec::new();
    for entry in entries {
        if let Some(delivery) = parse_entry(entry)? {
            deliveries.push(delivery);
        }
    }

    Ok(deliveries)
}

fn parse_entry(entry: redis::Value) -> BrokerResult<Option<Delivery>> {
    let parts = match entry {
        redis::Value::Bulk(parts) => parts,
        // XCLAIM may report deleted entries as Nil.
        redis::Value::Nil => return Ok(None),
        _ => return Err(invalid("unexpected entry shape")),
    };
    if parts.len() < 2 {
        return Err(invalid("entry too short"));
    }

    let tag = match &parts[0] {
        redis::Value::Data(data) => String::from_utf8_lossy(data).to_string(),
        _ => return Err(invalid("unexpected entry id shape")),
    };

    let field_values = match &parts[1] {
        redis::Value::Bulk(fields) => fields,
        _ => return Err(invalid("unexpected field list shape")),
    };

    let mut fields: HashMap<String, Vec<u8>> = HashMap::new();
    for chunk in field_values.chunks(2) {
        if let [redis::Value::Data(key), redis::Value::Data(value)] = chunk {
            fields.insert(String::from_utf8_lossy(key).to_string(), value.clone());
        }
    }

    let body = fields.remove("body").unwrap_or_default();
    let text = |name: &str| -> BrokerResult<String> {
        fields
            .get(name)
            .map(|v| String::from_utf8_lossy(v).to_string())
            .ok_or_else(|| invalid(&format!("missing field {name}")))
    };

    let headers = serde_json::from_str(&text("headers")?)
        .map_err(|e| invalid(&format!("decode headers: {e}")))?;
    let delivery_count = text("delivery")?
        .parse()
        .map_err(|_| invalid("decode delivery count"))?;

    let message = Message {
        message_id: text("message_id")?,
        routing_key: text("routing_key")?,
        content_type: text("content_type")?,
        headers,
        body,
    };

    Ok(Some(Delivery {
        message,
        delivery_count,
        tag,
    }))
}

fn invalid(msg: &str) -> BrokerError {
    BrokerError::Command(format!("invalid stream entry: {msg}"))
}
