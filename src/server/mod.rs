pub mod api;
pub mod websocket;

use crate::cli::Args;
use crate::service::CallService;
use std::error::Error;

pub struct Server {
    addr: String,
    service: CallService,
    args: Args,
}

impl Server {
    pub fn new(addr: String, service: CallService, args: Args) -> Self {
        Self { addr, service, args }
    }

    pub async fn run(&self) -> Result<(), Box<dyn Error + Send + Sync>> {
        if let Some(http_port) = self.args.http_port {
            api::start_http_server(http_port, self.service.clone()).await?;
        }

        websocket::start_ws_server(
            &self.addr,
            self.service.clone(),
            self.args.server_secret.clone().filter(|s| !s.is_empty()),
            self.args.connection_rate_limit
        ).await
    }
}
