//! coldview_feed: simulated cold-room plant served over WebSocket, with a
//! property write endpoint.

mod config;
mod plant;
mod sampler;
mod state;
mod write;
mod ws;

use std::env;
use std::net::SocketAddr;

use anyhow::Context;
use axum::{
    routing::{get, post},
    Router,
};
use tracing_subscriber::EnvFilter;

use crate::config::{parse_args, TOKEN_ENV};
use crate::plant::Plant;
use crate::sampler::spawn_sampler;
use crate::state::AppState;
use crate::write::{acknowledge_handler, write_handler};
use crate::ws::ws_handler;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = match parse_args(env::args(), env::var(TOKEN_ENV).ok()) {
        Ok(a) => a,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let state = AppState::new(Plant::new(args.rooms), args.token.clone());
    // warm the cache so the first client gets a snapshot right away
    state.publish().await.context("serializing initial snapshot")?;
    let _sampler = spawn_sampler(state.clone(), args.period);

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/write", post(write_handler))
        .route("/acknowledge", post(acknowledge_handler))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], args.port));
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {addr}"))?;
    let local = listener.local_addr()?;
    println!(
        "coldview feed running at http://{local} ({} rooms, every {} ms, writes {})",
        args.rooms,
        args.period.as_millis(),
        if args.token.is_some() { "need a token" } else { "open" }
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            let _ = tokio::signal::ctrl_c().await;
        })
        .await
        .context("serving")?;
    Ok(())
}
