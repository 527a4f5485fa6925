//! Entry point for the coldview console. Parses args, resolves the profile and
//! either follows the feed or sends a one-shot write.

use std::env;
use std::io::{self, Write};
use std::time::Duration;

use anyhow::Context;
use serde_json::{Map, Value};
use tracing_subscriber::EnvFilter;

use coldview::alarms::AlarmFilter;
use coldview::app::{self, Settings};
use coldview::codec::unflatten;
use coldview::profiles::{load_profiles, save_profiles, ProfileEntry, ProfileRequest, ResolveProfile};
use coldview::transport::{TransportConfig, DEFAULT_RECONNECT_DELAY};
use coldview::types::EntityId;

const USAGE_FLAGS: &str = "[--profile NAME|-P NAME] [--save] [--write-url URL|-w URL] [--token TOKEN|-k TOKEN] [--room ID|-r ID] [--active-only] [--reconnect-ms MS] [--dry-run] [--set ROOM PATH=JSON...] [ws://HOST:PORT/ws]";

#[derive(Debug, Default)]
struct ParsedArgs {
    url: Option<String>,
    profile: Option<String>,
    save: bool,
    write_url: Option<String>,
    token: Option<String>,
    room: Option<EntityId>,
    active_only: bool,
    reconnect_ms: Option<u64>,
    dry_run: bool,
    set: Option<(EntityId, Vec<String>)>,
}

fn parse_args<I: IntoIterator<Item = String>>(args: I) -> Result<ParsedArgs, String> {
    let mut it = args.into_iter().peekable();
    let prog = it.next().unwrap_or_else(|| "coldview".into());
    let usage = || format!("Usage: {prog} {USAGE_FLAGS}");
    let mut p = ParsedArgs::default();

    while let Some(arg) = it.next() {
        match arg.as_str() {
            "-h" | "--help" => return Err(usage()),
            "--profile" | "-P" => p.profile = it.next(),
            "--save" => p.save = true,
            "--write-url" | "-w" => p.write_url = it.next(),
            "--token" | "-k" => p.token = it.next(),
            "--active-only" => p.active_only = true,
            "--dry-run" => p.dry_run = true,
            "--room" | "-r" => {
                let v = it.next().ok_or_else(usage)?;
                p.room = Some(v.parse().map_err(|_| format!("invalid room id '{v}'"))?);
            }
            "--reconnect-ms" => {
                let v = it.next().ok_or_else(usage)?;
                p.reconnect_ms = Some(v.parse().map_err(|_| format!("invalid delay '{v}'"))?);
            }
            "--set" => {
                let v = it.next().ok_or_else(usage)?;
                let room = v.parse().map_err(|_| format!("invalid room id '{v}'"))?;
                let mut assignments = Vec::new();
                while let Some(next) = it.next_if(|a| is_assignment(a)) {
                    assignments.push(next);
                }
                if assignments.is_empty() {
                    return Err(format!("--set needs at least one PATH=JSON\n{}", usage()));
                }
                p.set = Some((room, assignments));
            }
            _ if arg.starts_with("--profile=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        p.profile = Some(v.to_string());
                    }
                }
            }
            _ if arg.starts_with("--write-url=") => {
                if let Some((_, v)) = arg.split_once('=') {
                    if !v.is_empty() {
                        p.write_url = Some(v.to_string());
                    }
                }
            }
            _ => {
                if p.url.is_none() && !arg.starts_with('-') {
                    p.url = Some(arg);
                } else {
                    return Err(format!("Unexpected argument '{arg}'. {}", usage()));
                }
            }
        }
    }
    Ok(p)
}

fn is_assignment(a: &str) -> bool {
    !a.starts_with('-') && !a.starts_with("ws://") && !a.starts_with("wss://") && a.contains('=')
}

// PATH=JSON pairs -> nested edit; values that are not JSON are sent as strings
fn build_edit(assignments: &[String]) -> Value {
    let mut flat = Map::new();
    for a in assignments {
        if let Some((path, raw)) = a.split_once('=') {
            let value = serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()));
            flat.insert(path.to_string(), value);
        }
    }
    unflatten(&Value::Object(flat))
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Reuse the same parsing logic for testability
    let parsed = match parse_args(env::args()) {
        Ok(v) => v,
        Err(msg) => {
            eprintln!("{msg}");
            return Ok(());
        }
    };
    init_tracing();

    let profiles_file = load_profiles();
    let req = ProfileRequest {
        profile_name: parsed.profile.clone(),
        url: parsed.url.clone(),
        write_url: parsed.write_url.clone(),
        csrf_token: parsed.token.clone(),
        reconnect_ms: parsed.reconnect_ms,
    };

    let mut profiles_mut = profiles_file.clone();
    let entry = match req.resolve(&profiles_file) {
        ResolveProfile::Direct(entry) => {
            // Possibly save if profile specified and --save or new entry
            if let Some(name) = parsed.profile.as_ref() {
                let store = match profiles_mut.profiles.get(name) {
                    // New profile: auto-save immediately
                    None => true,
                    Some(existing) if *existing != entry => {
                        parsed.save
                            || prompt_yes_no(&format!("Overwrite existing profile '{name}'? [y/N]: "))
                    }
                    Some(_) => false,
                };
                if store {
                    profiles_mut.profiles.insert(name.clone(), entry.clone());
                    save_profiles(&profiles_mut).context("saving profiles")?;
                }
            }
            entry
        }
        ResolveProfile::Loaded(entry) => entry,
        ResolveProfile::PromptSelect(names) => match prompt_select(&names) {
            Some(name) => match profiles_mut.profiles.get(&name) {
                Some(entry) => entry.clone(),
                None => return Ok(()),
            },
            None => return Ok(()),
        },
        ResolveProfile::Unknown(name) => {
            eprintln!("Profile '{name}' does not exist yet. Pass a URL to create it: --profile {name} ws://HOST:PORT/ws");
            return Ok(());
        }
        ResolveProfile::None => {
            eprintln!("No URL provided and no profiles to select.");
            return Ok(());
        }
    };

    let settings = settings_from(&entry, &parsed);
    TransportConfig::new(settings.url.clone())
        .validate()
        .with_context(|| format!("bad feed url '{}'", settings.url))?;

    if parsed.dry_run {
        print_settings(&settings);
        return Ok(());
    }

    if let Some((room, assignments)) = parsed.set.as_ref() {
        let edit = build_edit(assignments);
        let batch = app::write_once(&settings, *room, &edit).await?;
        for o in &batch.outcomes {
            match &o.result {
                Ok(c) if o.is_exact() => println!("ok      {c}"),
                Ok(c) => println!("coerced {c} (requested {})", o.request.value),
                Err(e) => println!("failed  {}: {e}", o.request.property),
            }
        }
        return Ok(());
    }

    app::run(&settings).await
}

fn settings_from(entry: &ProfileEntry, parsed: &ParsedArgs) -> Settings {
    Settings {
        url: entry.url.clone(),
        write_url: entry.write_url.clone(),
        csrf_token: entry.csrf_token.clone(),
        reconnect_delay: entry
            .reconnect_ms
            .map(Duration::from_millis)
            .unwrap_or(DEFAULT_RECONNECT_DELAY),
        filter: AlarmFilter {
            entity: parsed.room,
            active_only: parsed.active_only,
            ..Default::default()
        },
    }
}

fn print_settings(s: &Settings) {
    println!("url: {}", s.url);
    println!("write_url: {}", s.write_url.as_deref().unwrap_or("-"));
    println!("csrf_token: {}", if s.csrf_token.is_some() { "set" } else { "-" });
    println!("reconnect_ms: {}", s.reconnect_delay.as_millis());
    match s.filter.entity {
        Some(id) => println!("room: {id}"),
        None => println!("room: all"),
    }
    println!("active_only: {}", s.filter.active_only);
}

fn prompt_select(names: &[String]) -> Option<String> {
    eprintln!("Select profile:");
    for (i, n) in names.iter().enumerate() {
        eprintln!("  {}. {}", i + 1, n);
    }
    eprint!("Enter number (or blank to abort): ");
    let _ = io::stderr().flush();
    let mut line = String::new();
    io::stdin().read_line(&mut line).ok()?;
    let idx = line.trim().parse::<usize>().ok()?;
    if idx >= 1 && idx <= names.len() {
        Some(names[idx - 1].clone())
    } else {
        None
    }
}

fn prompt_yes_no(prompt: &str) -> bool {
    eprint!("{prompt}");
    let _ = io::stderr().flush();
    let mut line = String::new();
    if io::stdin().read_line(&mut line).is_ok() {
        matches!(line.trim().to_ascii_lowercase().as_str(), "y" | "yes")
    } else {
        false
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn args(a: &[&str]) -> Vec<String> {
        std::iter::once("coldview")
            .chain(a.iter().copied())
            .map(String::from)
            .collect()
    }

    #[test]
    fn parses_flags_and_url() {
        let p = parse_args(args(&["-P", "plant", "--room", "3", "--active-only", "ws://h:1/ws"])).unwrap();
        assert_eq!(p.profile.as_deref(), Some("plant"));
        assert_eq!(p.room, Some(3));
        assert!(p.active_only);
        assert_eq!(p.url.as_deref(), Some("ws://h:1/ws"));
    }

    #[test]
    fn set_collects_assignments_until_next_flag() {
        let p = parse_args(args(&["--set", "2", "a.b=1", "c=true", "--dry-run", "ws://h/ws"])).unwrap();
        let (room, assignments) = p.set.unwrap();
        assert_eq!(room, 2);
        assert_eq!(assignments, vec!["a.b=1", "c=true"]);
        assert!(p.dry_run);
        assert_eq!(p.url.as_deref(), Some("ws://h/ws"));
    }

    #[test]
    fn errors_and_help() {
        assert!(parse_args(args(&["--help"])).unwrap_err().starts_with("Usage:"));
        assert!(parse_args(args(&["--room", "x"])).is_err());
        assert!(parse_args(args(&["--set", "1"])).is_err());
        assert!(parse_args(args(&["ws://a/ws", "ws://b/ws"])).is_err());
    }

    #[test]
    fn edit_is_nested_from_paths() {
        let edit = build_edit(&["posedge.flag=false".into(), "name=cold room".into(), "sp=4.5".into()]);
        assert_eq!(edit, json!({"posedge": {"flag": false}, "name": "cold room", "sp": 4.5}));
    }
}
