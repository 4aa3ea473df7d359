use crate::device::{DeviceControl, DeviceError, DeviceStatus, RecordAction};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::task::JoinHandle;

/// Device that records commands and serves a settable status
pub struct FakeDevice {
    actions: Mutex<Vec<RecordAction>>,
    status: Mutex<DeviceStatus>,
    failing: AtomicBool,
    status_calls: AtomicUsize,
    delay: Option<Duration>,
}

impl FakeDevice {
    pub fn new() -> Self {
        Self {
            actions: Mutex::new(Vec::new()),
            status: Mutex::new(DeviceStatus::default()),
            failing: AtomicBool::new(false),
            status_calls: AtomicUsize::new(0),
            delay: None,
        }
    }

    /// Delay every remote recording request
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    /// Make every call fail at the transport level
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::SeqCst);
    }

    pub fn set_status(&self, status: DeviceStatus) {
        *self.status.lock() = status;
    }

    pub fn actions(&self) -> Vec<RecordAction> {
        self.actions.lock().clone()
    }

    pub fn status_calls(&self) -> usize {
        self.status_calls.load(Ordering::SeqCst)
    }

    fn transport_error(&self) -> Option<DeviceError> {
        if !self.failing.load(Ordering::SeqCst) {
            return None;
        }
        let err = reqwest::Client::new()
            .get("not a url")
            .build()
            .unwrap_err();
        Some(DeviceError::Http(err))
    }
}

#[async_trait]
impl DeviceControl for FakeDevice {
    async fn set_remote_recording(&self, action: RecordAction) -> Result<(), DeviceError> {
        self.actions.lock().push(action);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        match self.transport_error() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    async fn status(&self) -> Result<DeviceStatus, DeviceError> {
        self.status_calls.fetch_add(1, Ordering::SeqCst);
        match self.transport_error() {
            Some(err) => Err(err),
            None => Ok(self.status.lock().clone()),
        }
    }
}

/// Serve one HTTP response on a local port.
///
/// Returns the base URL and a task yielding the raw request text.
pub async fn serve_once(status: &str, body: &str) -> (String, JoinHandle<String>) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let response = format!(
        "HTTP/1.1 {}\r\nContent-Type: application/json\r\nContent-Length: {}\r\nConnection: close\r\n\r\n{}",
        status,
        body.len(),
        body
    );

    let task = tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.unwrap();
        let request = read_request(&mut socket).await;
        socket.write_all(response.as_bytes()).await.unwrap();
        let _ = socket.shutdown().await;
        request
    });

    (format!("http://{}", addr), task)
}

async fn read_request(socket: &mut TcpStream) -> String {
    let mut data = Vec::new();
    let mut buf = [0u8; 1024];

    loop {
        let n = socket.read(&mut buf).await.unwrap();
        if n == 0 {
            break;
        }
        data.extend_from_slice(&buf[..n]);

        let Some(end) = data.windows(4).position(|w| w == b"\r\n\r\n") else {
            continue;
        };
        let head = String::from_utf8_lossy(&data[..end]).to_ascii_lowercase();
        let body_len = head
            .lines()
            .find_map(|line| line.strip_prefix("content-length:"))
            .and_then(|value| value.trim().parse::<usize>().ok())
            .unwrap_or(0);
        if data.len() >= end + 4 + body_len {
            break;
        }
    }

    String::from_utf8_lossy(&data).into_owned()
}
