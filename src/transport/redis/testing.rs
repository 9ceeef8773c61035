//! Минимальный RESP-брокер для тестов: PING, AUTH, PUBLISH, SUBSCRIBE.

use std::{
    collections::HashMap,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
};

use bytes::{Buf, BytesMut};
use parking_lot::Mutex;
use tokio::{
    io::{AsyncReadExt, AsyncWriteExt},
    net::{TcpListener, TcpStream},
    sync::mpsc,
    task::{AbortHandle, JoinHandle},
};

use super::resp::{self, Frame};

type Outbox = mpsc::UnboundedSender<BytesMut>;
/// Общее состояние брокера и всех его соединений.
#[derive(Default)]
struct BrokerState {
    subscribers: Mutex<HashMap<String, Vec<Outbox>>>,
    connections: Mutex<Vec<AbortHandle>>,
    /// `SUBSCRIBE` принимается, но не выполняется и не подтверждается.
    mute_subscribe: AtomicBool,
}

pub struct FakeBroker {
    pub address: String,
    state: Arc<BrokerState>,
    accept: JoinHandle<()>,
}

impl FakeBroker {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let address = listener.local_addr().unwrap().to_string();
        let state = Arc::new(BrokerState::default());

        let shared = state.clone();
        let accept = tokio::spawn(async move {
            while let Ok((sock, _)) = listener.accept().await {
                let task = tokio::spawn(serve(sock, shared.clone()));
                shared.connections.lock().push(task.abort_handle());
            }
        });
        Self {
            address,
            state,
            accept,
        }
    }

    /// Рвёт все открытые соединения и забывает подписки, как при
    /// перезапуске брокера.
    pub fn kill_connections(&self) {
        for task in self.state.connections.lock().drain(..) {
            task.abort();
        }
        self.state.subscribers.lock().clear();
    }

    pub fn mute_subscribe(
        &self,
        mute: bool,
    ) {
        self.state.mute_subscribe.store(mute, Ordering::Release);
    }
}

impl Drop for FakeBroker {
    fn drop(&mut self) {
        self.accept.abort();
    }
}

async fn serve(
    sock: TcpStream,
    state: Arc<BrokerState>,
) {
    let (mut rd, mut wr) = sock.into_split();
    let (tx, mut rx) = mpsc::unbounded_channel::<BytesMut>();
    let writer = tokio::spawn(async move {
        while let Some(out) = rx.recv().await {
            if wr.write_all(&out).await.is_err() {
                break;
            }
        }
    });
    state.connections.lock().push(writer.abort_handle());
    let subscribers = &state.subscribers;

    let mut buf = BytesMut::new();
    loop {
        while let Ok(Some((frame, used))) = resp::parse(&buf) {
            buf.advance(used);
            let Frame::Array(Some(items)) = frame else {
                continue;
            };
            let args: Vec<Vec<u8>> = items
                .iter()
                .filter_map(|f| f.as_bytes().map(<[u8]>::to_vec))
                .collect();
            let Some(name) = args.first() else {
                continue;
            };

            let reply = match String::from_utf8_lossy(name).to_ascii_uppercase().as_str() {
                "SUBSCRIBE" if state.mute_subscribe.load(Ordering::Acquire) => continue,
                "PING" => BytesMut::from(&b"+PONG\r\n"[..]),
                "AUTH" => BytesMut::from(&b"+OK\r\n"[..]),
                "SUBSCRIBE" if args.len() == 2 => {
                    let channel = String::from_utf8_lossy(&args[1]).to_string();
                    subscribers
                        .lock()
                        .entry(channel.clone())
                        .or_default()
                        .push(tx.clone());
                    let mut ack = resp::encode_command(&[b"subscribe", channel.as_bytes()]);
                    // Счётчик подписок вместо третьего BulkString.
                    ack[1] = b'3';
                    ack.extend_from_slice(b":1\r\n");
                    ack
                }
                "PUBLISH" if args.len() == 3 => {
                    let channel = String::from_utf8_lossy(&args[1]).to_string();
                    let targets = subscribers.lock().get(&channel).cloned().unwrap_or_default();
                    let push = resp::encode_command(&[b"message", channel.as_bytes(), &args[2]]);
                    let delivered = targets.iter().filter(|t| t.send(push.clone()).is_ok()).count();
                    BytesMut::from(format!(":{delivered}\r\n").as_bytes())
                }
                _ => BytesMut::from(&b"-ERR unknown command\r\n"[..]),
            };
            if tx.send(reply).is_err() {
                return;
            }
        }

        match rd.read_buf(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(_) => {}
        }
    }
}
