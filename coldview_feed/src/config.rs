//! Command line for the feed server.

use std::time::Duration;

pub const DEFAULT_PORT: u16 = 3000;
pub const DEFAULT_ROOMS: usize = 3;
pub const DEFAULT_PERIOD: Duration = Duration::from_millis(2000);
pub const TOKEN_ENV: &str = "COLDVIEW_FEED_TOKEN";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FeedArgs {
    pub port: u16,
    pub rooms: usize,
    pub period: Duration,
    /// Expected `X-CSRFToken` on writes. `None` accepts any request.
    pub token: Option<String>,
}

/// `--token` wins over the environment.
pub fn parse_args<I: IntoIterator<Item = String>>(
    args: I,
    env_token: Option<String>,
) -> Result<FeedArgs, String> {
    let mut it = args.into_iter();
    let prog = it.next().unwrap_or_else(|| "coldview_feed".into());
    let usage = || {
        format!("Usage: {prog} [--port PORT|-p PORT] [--rooms N] [--period-ms MS] [--token TOKEN]\n  env {TOKEN_ENV} sets the write token")
    };
    let mut port: Option<String> = None;
    let mut rooms: Option<String> = None;
    let mut period: Option<String> = None;
    let mut token: Option<String> = None;

    while let Some(a) = it.next() {
        match a.as_str() {
            "-h" | "--help" => return Err(usage()),
            "--port" | "-p" => port = it.next(),
            "--rooms" => rooms = it.next(),
            "--period-ms" => period = it.next(),
            "--token" => token = it.next(),
            _ if a.starts_with("--port=") => {
                if let Some((_, v)) = a.split_once('=') {
                    port = Some(v.to_string());
                }
            }
            _ => return Err(format!("Unexpected argument '{a}'. {}", usage())),
        }
    }

    let port = match port {
        Some(p) => p.parse().map_err(|_| format!("invalid port '{p}'"))?,
        None => DEFAULT_PORT,
    };
    let rooms = match rooms {
        Some(r) => match r.parse::<usize>() {
            Ok(n) if n > 0 => n,
            _ => return Err(format!("invalid room count '{r}'")),
        },
        None => DEFAULT_ROOMS,
    };
    let period = match period {
        Some(ms) => match ms.parse::<u64>() {
            Ok(n) if n > 0 => Duration::from_millis(n),
            _ => return Err(format!("invalid period '{ms}'")),
        },
        None => DEFAULT_PERIOD,
    };
    let token = token.or(env_token).filter(|t| !t.is_empty());

    Ok(FeedArgs {
        port,
        rooms,
        period,
        token,
    })
}
