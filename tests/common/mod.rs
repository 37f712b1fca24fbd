#![allow(dead_code)]

use cascade_server::{App, RawRequest, RawResponse};
use std::collections::HashMap;
use tokio::io::AsyncReadExt;

/// A response as seen by the client
#[derive(Debug)]
pub struct TestResponse {
    pub status: u16,
    pub headers: HashMap<String, String>,
    pub body: Vec<u8>,
}

impl TestResponse {
    pub fn parse(raw: &[u8]) -> Self {
        let split = raw
            .windows(4)
            .position(|window| window == b"\r\n\r\n")
            .expect("response has no head");
        let head = std::str::from_utf8(&raw[..split]).unwrap();
        let mut lines = head.split("\r\n");

        let status = lines
            .next()
            .and_then(|line| line.split_whitespace().nth(1))
            .and_then(|code| code.parse().ok())
            .expect("invalid status line");
        let headers = lines
            .filter_map(|line| line.split_once(':'))
            .map(|(name, value)| (name.trim().to_lowercase(), value.trim().to_string()))
            .collect();

        Self {
            status,
            headers,
            body: raw[split + 4..].to_vec(),
        }
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(&name.to_lowercase()).map(String::as_str)
    }

    pub fn text(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }
}

/// Dispatch `request` through `app` over an in-memory transport
pub async fn exchange(app: &App, request: RawRequest) -> TestResponse {
    let (mut client, server) = tokio::io::duplex(64 * 1024);
    let mut raw = Vec::new();

    let (_, read) = tokio::join!(
        app.dispatch(request, RawResponse::new(server)),
        client.read_to_end(&mut raw)
    );
    read.unwrap();

    TestResponse::parse(&raw)
}
