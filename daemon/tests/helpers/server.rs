use std::net::SocketAddr;
use tokio::net::TcpListener;
use tokio::task::JoinHandle;
use zelland_lib::daemon::gateway::router;
use zelland_lib::daemon::state::AppState;

/// In-process daemon on an ephemeral loopback port; stops when dropped.
pub struct TestServer {
    pub addr: SocketAddr,
    pub state: AppState,
    task: JoinHandle<()>,
}

impl TestServer {
    pub async fn start() -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let state = AppState::new();
        let app = router(state.clone()).into_make_service_with_connect_info::<SocketAddr>();

        let task = tokio::spawn(async move {
            if let Err(err) = axum::serve(listener, app).await {
                eprintln!("test server stopped: {}", err);
            }
        });

        Self { addr, state, task }
    }

    pub fn http_url(&self, path: &str) -> String {
        format!("http://{}{}", self.addr, path)
    }

    pub fn ws_url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.task.abort();
    }
}
