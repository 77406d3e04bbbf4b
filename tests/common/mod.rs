//! Scripted in-process Elios4you device for integration tests

#![allow(dead_code)]

use elios4you::config::{ConnectionConfig, DeviceConfig};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

#[derive(Debug)]
pub struct MockState {
    pub connections: AtomicUsize,
    pub commands: Mutex<Vec<String>>,
    pub relay: AtomicI64,
    /// Read commands but never answer
    pub silent: AtomicBool,
    /// Accept relay changes without applying them
    pub stuck_relay: AtomicBool,
    /// Key the `@rel` answer reports the relay under
    pub readback_key: Mutex<String>,
    /// Single command left unanswered while everything else works
    pub muted: Mutex<Option<String>>,
    /// `produced_power` reported by `@dat`
    pub produced_power: Mutex<String>,
}

impl MockState {
    pub fn connections(&self) -> usize {
        self.connections.load(Ordering::SeqCst)
    }

    pub fn commands(&self) -> Vec<String> {
        self.commands.lock().unwrap().clone()
    }

    pub fn count(&self, cmd: &str) -> usize {
        self.commands().iter().filter(|c| c.as_str() == cmd).count()
    }
}

pub struct MockDevice {
    pub addr: SocketAddr,
    pub state: Arc<MockState>,
}

impl MockDevice {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = Arc::new(MockState {
            connections: AtomicUsize::new(0),
            commands: Mutex::new(Vec::new()),
            relay: AtomicI64::new(0),
            silent: AtomicBool::new(false),
            stuck_relay: AtomicBool::new(false),
            readback_key: Mutex::new("rel".to_string()),
            muted: Mutex::new(None),
            produced_power: Mutex::new("2.456".to_string()),
        });

        let accept_state = state.clone();
        tokio::spawn(async move {
            while let Ok((socket, _)) = listener.accept().await {
                accept_state.connections.fetch_add(1, Ordering::SeqCst);
                tokio::spawn(serve_connection(socket, accept_state.clone()));
            }
        });

        Self { addr, state }
    }

    pub fn device_config(&self) -> DeviceConfig {
        DeviceConfig {
            name: "Test Elios".to_string(),
            host: self.addr.ip().to_string(),
            port: self.addr.port(),
        }
    }
}

/// Short timeouts so failure paths finish quickly
pub fn fast_settings() -> ConnectionConfig {
    ConnectionConfig {
        connect_timeout_secs: 1,
        command_timeout_secs: 1,
        chunk_timeout_ms: 200,
        retry_delay_ms: 10,
        drain_timeout_ms: 20,
        ..ConnectionConfig::default()
    }
}

/// A local port with nothing listening on it
pub async fn closed_port() -> u16 {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let port = listener.local_addr().unwrap().port();
    drop(listener);
    port
}

async fn serve_connection(socket: TcpStream, state: Arc<MockState>) {
    let (reader, mut writer) = socket.into_split();
    let mut lines = BufReader::new(reader).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let cmd = line.trim().to_string();
        state.commands.lock().unwrap().push(cmd.clone());
        if state.silent.load(Ordering::SeqCst)
            || state.muted.lock().unwrap().as_deref() == Some(cmd.as_str())
        {
            continue;
        }
        let reply = respond(&cmd, &state);
        if writer.write_all(reply.as_bytes()).await.is_err() {
            break;
        }
    }
}

fn respond(cmd: &str, state: &MockState) -> String {
    let body = match cmd {
        "@dat" => format!(
            "0;produced_power;{}\n\
             0;consumed_power;3.1\n\
             0;bought_power;1.0\n\
             0;sold_power;0.4\n\
             0;produced_energy;1500.5\n\
             0;sold_energy;300.25\n\
             0;produced_energy_f1;700\n\
             0;sold_energy_f1;100\n\
             0;alarm_1;0\n\
             0;relay_state;{}\n\
             0;utc_time;2024-01-01 12:00:00\n",
            state.produced_power.lock().unwrap(),
            state.relay.load(Ordering::SeqCst)
        ),
        "@sta" => "0;daily_peak;4.321\n0;monthly_peak;5.5\n".to_string(),
        "@inf" => "sn=E4U123456\n\
                   fwtop=1.2.3\n\
                   fwbtm=4.5.6\n\
                   hwver=B\n\
                   HW Wifi=2.0\n"
            .to_string(),
        "@hwr" => "hw=ok\n".to_string(),
        "@rel" => format!(
            "{}={}\nmode=0\n",
            state.readback_key.lock().unwrap(),
            state.relay.load(Ordering::SeqCst)
        ),
        set if set.starts_with("@rel 0 ") => {
            if !state.stuck_relay.load(Ordering::SeqCst)
                && let Ok(v) = set["@rel 0 ".len()..].parse::<i64>()
            {
                state.relay.store(v, Ordering::SeqCst);
            }
            "ok\n".to_string()
        }
        _ => String::new(),
    };
    format!("{}\n{}\nready...", cmd, body)
}
