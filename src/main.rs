// ABOUTME: hubproxy server binary
// ABOUTME: Loads configuration from the environment and runs the HTTP server
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 Hubproxy Authors

use hubproxy::config::ServerConfig;
use hubproxy::{logging, server};

#[tokio::main]
async fn main() {
    logging::init();

    let config = match ServerConfig::from_env() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("configuration error: {e}");
            std::process::exit(1);
        }
    };

    if let Err(e) = server::run(config).await {
        eprintln!("server error: {e}");
        std::process::exit(1);
    }
}
